use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fixedpoint::PriceMicros;
use crate::rule::Direction;

/// A point-in-time summary of one open position, sent to the Layer-3 advisory oracle.
/// This is the boundary type between the engine and the external advisory model: it
/// carries no rule internals, only what an outside observer needs to render a verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub open_price: PriceMicros,
    pub current_price: PriceMicros,
    pub unrealized_pips: i64,
    pub opened_at: DateTime<Utc>,
    pub volume_remaining_fraction: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictAction {
    Continue,
    ClosePartial,
    CloseAll,
    TightenStop,
    Escalate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub position_id: Uuid,
    pub action: VerdictAction,
    pub close_fraction: Option<f64>,
    pub new_stop: Option<PriceMicros>,
    pub reason: String,
}
