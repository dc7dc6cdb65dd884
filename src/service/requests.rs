use log::{debug, info, warn};

use super::VaultService;
use crate::flows::{capture, feed, hatch, sale, FlowAction, FlowError, FlowRequest, FlowResponse};
use crate::logutil::preview_ids;
use crate::profile::{InventoryField, PlayerId};
use crate::store::KeyValueStore;

impl<S: KeyValueStore> VaultService<S> {
    /// Run a flow and build the reply. The request token is always echoed.
    pub fn handle_request(&mut self, player: PlayerId, request: FlowRequest) -> FlowResponse {
        let token = request.request_token.clone();
        let name = request.action.name();
        match self.run_flow(player, request.action) {
            Ok(mut response) => {
                info!("{} for {}: {}", name, player, response.message);
                response.request_token = token;
                response
            }
            Err(e) => {
                info!("{} for {} rejected: {}", name, player, e);
                FlowResponse::failure(&e, token)
            }
        }
    }

    fn run_flow(&mut self, player: PlayerId, action: FlowAction) -> Result<FlowResponse, FlowError> {
        if !self.is_active(player) {
            return Err(FlowError::NoSession);
        }
        let now = self.clock.now();
        let world = self.worlds.get_mut(&player).ok_or(FlowError::NoSession)?;

        match action {
            FlowAction::Hatch { egg_id } => {
                let outcome = hatch::hatch_egg(world, &egg_id, now)?;
                self.routine_save(player, "hatch");
                let species = outcome
                    .slime
                    .slime()
                    .map(|s| s.species.clone())
                    .unwrap_or_default();
                Ok(FlowResponse {
                    item_id: Some(outcome.slime.id.clone()),
                    ..FlowResponse::ok(
                        format!("Egg {} hatched into a {} slime", egg_id, species),
                        None,
                    )
                })
            }
            FlowAction::Feed { slime_id, food_id } => {
                let outcome = feed::feed_slime(world, &slime_id, &food_id)?;
                self.routine_save(player, "feed");
                Ok(FlowResponse {
                    item_id: Some(slime_id.clone()),
                    ..FlowResponse::ok(
                        format!("Slime {} is now size {:.2}", slime_id, outcome.new_size),
                        None,
                    )
                })
            }
            FlowAction::Capture { slime_id } => {
                capture::capture_slime(world, &slime_id)?;
                self.sync
                    .record_correlated_event(player, InventoryField::WorldSlimes, 1, now);
                self.routine_save(player, "capture");
                Ok(FlowResponse {
                    item_id: Some(slime_id.clone()),
                    ..FlowResponse::ok(format!("Captured slime {}", slime_id), None)
                })
            }
            FlowAction::PlaceEgg { egg_id } => {
                capture::place_egg(world, &egg_id, now)?;
                self.sync
                    .record_correlated_event(player, InventoryField::EggTools, 1, now);
                self.routine_save(player, "place egg");
                Ok(FlowResponse {
                    item_id: Some(egg_id.clone()),
                    ..FlowResponse::ok(format!("Placed egg {}", egg_id), None)
                })
            }
            FlowAction::PickUpEgg { egg_id } => {
                capture::pick_up_egg(world, &egg_id)?;
                self.sync
                    .record_correlated_event(player, InventoryField::WorldEggs, 1, now);
                self.routine_save(player, "pick up egg");
                Ok(FlowResponse {
                    item_id: Some(egg_id.clone()),
                    ..FlowResponse::ok(format!("Picked up egg {}", egg_id), None)
                })
            }
            FlowAction::Sell { faction, slime_ids } => {
                let (key, cfg) = self
                    .config
                    .economy
                    .faction(&faction)
                    .map(|(key, cfg)| (key.to_string(), cfg.clone()))
                    .ok_or_else(|| FlowError::UnknownFaction(faction.clone()))?;
                let profile = self.repo.get_or_load(player);
                let outcome = sale::sell_slimes(world, profile, &key, &cfg, &slime_ids)?;
                debug!(
                    "Sale to {} by {}: {} -> {:?}",
                    key,
                    player,
                    preview_ids(&outcome.sold, 5),
                    outcome.unit_payouts
                );
                self.repo.mark_dirty(player);
                self.sync.record_correlated_event(
                    player,
                    InventoryField::CapturedSlimes,
                    outcome.sold.len(),
                    now,
                );

                let mut message = format!(
                    "Sold {} slimes to {} for {} coins",
                    outcome.sold.len(),
                    cfg.display_name,
                    outcome.total_payout
                );
                if !self.force_full_save_now(player, "faction sale") {
                    warn!("Sale for {} applied but not yet persisted", player);
                    message.push_str(" (save pending)");
                    self.mark_changed(player, "faction sale retry");
                }
                Ok(FlowResponse {
                    total_payout: Some(outcome.total_payout),
                    sold_count: Some(outcome.sold.len() as u32),
                    standing_before: Some(outcome.standing_before),
                    standing_after: Some(outcome.standing_after),
                    coins: Some(outcome.coins_after),
                    ..FlowResponse::ok(message, None)
                })
            }
        }
    }

    fn routine_save(&mut self, player: PlayerId, reason: &str) {
        self.repo.mark_dirty(player);
        self.save_now(player, reason);
    }
}
