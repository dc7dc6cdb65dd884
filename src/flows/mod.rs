//! Transactional game flows.
//!
//! Each flow validates against the live world and profile, then mutates both.
//! Persistence is left to the caller ([`crate::service::VaultService`]), which
//! picks the save path and builds the [`FlowResponse`].

pub mod capture;
pub mod feed;
pub mod hatch;
pub mod sale;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{InventoryField, ItemId};

#[derive(Debug, Error, PartialEq)]
pub enum FlowError {
    #[error("no active session")]
    NoSession,
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: ItemId },
    #[error("egg {id} is not ready until {ready_at}")]
    NotReady { id: ItemId, ready_at: DateTime<Utc> },
    #[error("egg {0} has not been placed")]
    NotPlaced(ItemId),
    #[error("unknown faction {0}")]
    UnknownFaction(String),
    #[error("nothing to sell")]
    EmptySale,
    #[error("item {0} listed more than once")]
    DuplicateItem(ItemId),
    #[error("{id} in {field} is not the expected kind")]
    WrongKind { field: InventoryField, id: ItemId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FlowAction {
    Hatch { egg_id: ItemId },
    Feed { slime_id: ItemId, food_id: ItemId },
    Capture { slime_id: ItemId },
    PlaceEgg { egg_id: ItemId },
    PickUpEgg { egg_id: ItemId },
    Sell { faction: String, slime_ids: Vec<ItemId> },
}

impl FlowAction {
    pub fn name(&self) -> &'static str {
        match self {
            FlowAction::Hatch { .. } => "hatch",
            FlowAction::Feed { .. } => "feed",
            FlowAction::Capture { .. } => "capture",
            FlowAction::PlaceEgg { .. } => "place_egg",
            FlowAction::PickUpEgg { .. } => "pick_up_egg",
            FlowAction::Sell { .. } => "sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRequest {
    #[serde(flatten)]
    pub action: FlowAction,
    /// Opaque correlation id echoed in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
}

impl FlowRequest {
    pub fn new(action: FlowAction) -> Self {
        Self {
            action,
            request_token: Some(uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_payout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sold_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standing_before: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standing_after: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coins: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    pub request_token: Option<String>,
}

impl FlowResponse {
    pub fn ok(message: impl Into<String>, request_token: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            request_token,
            ..Default::default()
        }
    }

    pub fn failure(error: &FlowError, request_token: Option<String>) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            request_token,
            ..Default::default()
        }
    }
}
