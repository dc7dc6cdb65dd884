//! Newline-delimited JSON bridge to the game host.
//!
//! Each input line is one [`HostEvent`]; every event produces zero or more
//! [`HostReply`] lines. Due work is run after each event so that queued
//! saves and exit-save steps make progress even without a `tick`.
//!
//! ```text
//! {"event":"join","player":42}
//! {"event":"request","player":42,"request":{"action":"hatch","egg_id":"e1","request_token":"r7"}}
//! {"event":"leave","player":42}
//! ```

use log::warn;
use serde::{Deserialize, Serialize};

use crate::flows::{FlowRequest, FlowResponse};
use crate::inventory::RemoveOptions;
use crate::logutil::escape_log;
use crate::profile::{InventoryField, Item, ItemId, ItemPayload, PlayerId};
use crate::service::VaultService;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Join {
        player: PlayerId,
    },
    Leave {
        player: PlayerId,
    },
    Spawn {
        player: PlayerId,
        field: InventoryField,
        item: Item,
    },
    Remove {
        player: PlayerId,
        field: InventoryField,
        item_id: ItemId,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        force: bool,
    },
    Request {
        player: PlayerId,
        request: FlowRequest,
    },
    EnsureEntry {
        player: PlayerId,
        field: InventoryField,
        item_id: ItemId,
        payload: ItemPayload,
    },
    Correlated {
        player: PlayerId,
        field: InventoryField,
        count: usize,
    },
    Save {
        player: PlayerId,
        #[serde(default)]
        force: bool,
    },
    Tick,
    Shutdown,
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Join { .. } => "join",
            HostEvent::Leave { .. } => "leave",
            HostEvent::Spawn { .. } => "spawn",
            HostEvent::Remove { .. } => "remove",
            HostEvent::Request { .. } => "request",
            HostEvent::EnsureEntry { .. } => "ensure_entry",
            HostEvent::Correlated { .. } => "correlated",
            HostEvent::Save { .. } => "save",
            HostEvent::Tick => "tick",
            HostEvent::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum HostReply {
    Response {
        player: PlayerId,
        response: FlowResponse,
    },
    Ack {
        event: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PlayerId>,
        ok: bool,
        detail: String,
    },
    Work {
        outcome: String,
    },
    Error {
        detail: String,
    },
}

impl HostReply {
    fn ack(event: &'static str, player: PlayerId, ok: bool, detail: impl Into<String>) -> Self {
        HostReply::Ack {
            event,
            player: Some(player),
            ok,
            detail: detail.into(),
        }
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<HostEvent>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Parse and dispatch one line; malformed input becomes an error reply.
pub fn handle_line<S: KeyValueStore>(service: &mut VaultService<S>, line: &str) -> (Vec<HostReply>, bool) {
    match parse_line(line) {
        Ok(Some(event)) => {
            let stop = matches!(event, HostEvent::Shutdown);
            (dispatch(service, event), stop)
        }
        Ok(None) => (Vec::new(), false),
        Err(e) => {
            warn!("Unparseable host event {}: {}", escape_log(line), e);
            (
                vec![HostReply::Error {
                    detail: format!("invalid event: {}", e),
                }],
                false,
            )
        }
    }
}

pub fn dispatch<S: KeyValueStore>(service: &mut VaultService<S>, event: HostEvent) -> Vec<HostReply> {
    let name = event.name();
    let mut replies = Vec::new();
    match event {
        HostEvent::Join { player } => {
            service.on_player_join(player);
            replies.push(HostReply::ack(name, player, true, "session started"));
        }
        HostEvent::Leave { player } => {
            let outcomes = service.on_player_leave(player);
            replies.push(HostReply::ack(name, player, true, "exit save started"));
            replies.extend(outcomes.into_iter().map(|o| HostReply::Work {
                outcome: o.to_string(),
            }));
        }
        HostEvent::Spawn {
            player,
            field,
            item,
        } => {
            let reply = match service.spawn_item(player, field, item) {
                Ok(true) => HostReply::ack(name, player, true, "spawned"),
                Ok(false) => HostReply::ack(name, player, false, "id already present"),
                Err(e) => HostReply::ack(name, player, false, e.to_string()),
            };
            replies.push(reply);
        }
        HostEvent::Remove {
            player,
            field,
            item_id,
            reason,
            force,
        } => {
            let reason = reason.unwrap_or_else(|| "host removal".to_string());
            let opts = RemoveOptions {
                force,
                retry_after_grace: true,
            };
            let reply = match service.safe_remove_or_defer(player, field, &item_id, &reason, opts) {
                Ok(outcome) => HostReply::ack(name, player, true, format!("{:?}", outcome)),
                Err(e) => HostReply::ack(name, player, false, e.to_string()),
            };
            replies.push(reply);
        }
        HostEvent::Request { player, request } => {
            let response = service.handle_request(player, request);
            replies.push(HostReply::Response { player, response });
        }
        HostEvent::EnsureEntry {
            player,
            field,
            item_id,
            payload,
        } => {
            let reply = match service.ensure_entry_has_id(player, field, item_id, payload) {
                Ok(outcome) => HostReply::ack(name, player, true, format!("{:?}", outcome)),
                Err(e) => HostReply::ack(name, player, false, e.to_string()),
            };
            replies.push(reply);
        }
        HostEvent::Correlated {
            player,
            field,
            count,
        } => {
            service.record_correlated_event(player, field, count);
            replies.push(HostReply::ack(name, player, true, "recorded"));
        }
        HostEvent::Save { player, force } => {
            if force {
                let ok = service.force_full_save_now(player, "host request");
                replies.push(HostReply::ack(name, player, ok, if ok { "saved" } else { "save failed" }));
            } else {
                service.save_now(player, "host request");
                replies.push(HostReply::ack(name, player, true, "queued"));
            }
        }
        HostEvent::Tick => {}
        HostEvent::Shutdown => {
            let report = service.on_process_shutdown();
            replies.push(HostReply::Ack {
                event: name,
                player: None,
                ok: report.failed.is_empty(),
                detail: format!("{} saved, {} failed", report.saved.len(), report.failed.len()),
            });
            return replies;
        }
    }
    replies.extend(service.run_due().into_iter().map(|o| HostReply::Work {
        outcome: o.to_string(),
    }));
    replies
}
