//! Binary entrypoint for the slimevault CLI.
//!
//! Commands:
//! - `init` - write a starter `slimevault.toml` and create the data directory
//! - `run [--tick-ms <ms>] [--memory]` - read JSON-lines host events from stdin, reply on stdout
//! - `status` - stored profile count and save counters
//! - `show --player <id>` - print one stored profile as JSON
//!
//! See the library crate docs for module-level details: `slimevault::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use slimevault::config::Config;
use slimevault::host::{self, HostReply};
use slimevault::metrics;
use slimevault::profile::{PlayerId, ProfileRepository};
use slimevault::schedule::SystemClock;
use slimevault::service::VaultService;
use slimevault::store::{KeyValueStore, MemoryStore, SledStore};

#[derive(Parser)]
#[command(name = "slimevault")]
#[command(about = "Player profile persistence and inventory sync for a slime ranch game")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "slimevault.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the data directory
    Init,
    /// Serve host events from stdin until EOF, ctrl-c or a shutdown event
    Run {
        /// How often due work runs when no events arrive
        #[arg(long, default_value_t = 250)]
        tick_ms: u64,
        /// Keep profiles in memory only (dry run)
        #[arg(long)]
        memory: bool,
    },
    /// Show stored profile count and save counters
    Status,
    /// Print a stored profile
    Show {
        #[arg(short, long)]
        player: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                warn!("{} already exists; leaving it untouched", cli.config);
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            }
            let config = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&config.storage.data_dir).await?;
            let store = SledStore::open(config.storage.db_path())?;
            info!("Profile store ready at {}", store.path().display());
        }
        Commands::Run { tick_ms, memory } => {
            let config = load_config(pre_config, &cli.config).await?;
            if memory {
                warn!("Running with an in-memory store; profiles will not outlive this process");
                let vault = VaultService::new(MemoryStore::new(), config, Arc::new(SystemClock));
                serve(vault, tick_ms).await?;
            } else {
                tokio::fs::create_dir_all(&config.storage.data_dir).await?;
                let store = SledStore::open(config.storage.db_path())?;
                info!("Serving host events (store {})", store.path().display());
                let vault = VaultService::new(store, config, Arc::new(SystemClock));
                serve(vault, tick_ms).await?;
            }
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            let store = SledStore::open(config.storage.db_path())?;
            let repo = ProfileRepository::new(store, config.storage.key_prefix.clone());
            let players = repo.list_stored_players()?;
            let snap = metrics::snapshot();
            println!("slimevault status");
            println!("  store: {}", config.storage.db_path().display());
            println!("  stored profiles: {}", players.len());
            println!(
                "  autosave: every {}s, exit save: {} attempts",
                config.saves.autosave_interval_secs, config.saves.exit_save_attempts
            );
            println!(
                "  saves this process: {} attempted, {} ok, {} failed",
                snap.saves_attempted, snap.saves_succeeded, snap.saves_failed
            );
        }
        Commands::Show { player } => {
            let config = load_config(pre_config, &cli.config).await?;
            let store = SledStore::open(config.storage.db_path())?;
            let repo = ProfileRepository::new(store, config.storage.key_prefix.clone());
            let profile = repo
                .peek_stored(PlayerId(player))?
                .ok_or_else(|| anyhow!("no stored profile for player {}", player))?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
    }

    Ok(())
}

async fn load_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        None => Config::load(path).await,
    }
}

async fn serve<S: KeyValueStore>(mut vault: VaultService<S>, tick_ms: u64) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(tick_ms.max(10)));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let (replies, stop) = host::handle_line(&mut vault, &line);
                        write_replies(&mut stdout, &replies).await?;
                        if stop {
                            info!("Shutdown requested by host");
                            return Ok(());
                        }
                    }
                    None => {
                        info!("Host closed stdin");
                        break;
                    }
                }
            }
            _ = tick.tick() => {
                let replies: Vec<HostReply> = vault
                    .run_due()
                    .into_iter()
                    .map(|o| HostReply::Work { outcome: o.to_string() })
                    .collect();
                write_replies(&mut stdout, &replies).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let report = vault.on_process_shutdown();
    if !report.failed.is_empty() {
        warn!("Profiles not saved at shutdown: {:?}", report.failed);
    }
    Ok(())
}

async fn write_replies(stdout: &mut tokio::io::Stdout, replies: &[HostReply]) -> Result<()> {
    for reply in replies {
        let mut line = serde_json::to_string(reply)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
    }
    if !replies.is_empty() {
        stdout.flush().await?;
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    let sink = file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match sink {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // stdout carries host replies, so the console echo goes to stderr
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    builder.target(env_logger::Target::Stderr);
    let _ = builder.try_init();
}
