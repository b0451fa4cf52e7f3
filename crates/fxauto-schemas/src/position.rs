use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fixedpoint::PriceMicros;
use crate::rule::{Direction, StructuredRule};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

/// A live or closed trade, carrying the rule snapshot it was opened under so that
/// exit evaluation never has to re-fetch a rule that may have since expired or changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub open_price: PriceMicros,
    pub volume_initial: f64,
    pub volume_remaining: f64,
    pub insurance_sl: PriceMicros,
    pub trailing_stop: Option<PriceMicros>,
    pub executed_tp_levels: BTreeSet<usize>,
    pub rule_snapshot: StructuredRule,
    pub account_equity_at_open: PriceMicros,
    pub status: PositionStatus,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !matches!(self.status, PositionStatus::Closed)
    }

    /// Fraction of the original volume already closed out, in `[0, 1]`.
    pub fn closed_fraction(&self) -> f64 {
        if self.volume_initial <= 0.0 {
            return 0.0;
        }
        1.0 - (self.volume_remaining / self.volume_initial)
    }
}
