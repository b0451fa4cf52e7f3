use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fixedpoint::{PriceMicros, Pips};

/// A single bid/ask quote update from the broker. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub bid: PriceMicros,
    pub ask: PriceMicros,
    pub volume: i64,
}

/// Invariant violation detected while constructing a [`Tick`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickError {
    AskBelowBid { bid: i64, ask: i64 },
}

impl std::fmt::Display for TickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickError::AskBelowBid { bid, ask } => {
                write!(f, "tick invariant violated: ask ({ask}) < bid ({bid})")
            }
        }
    }
}

impl std::error::Error for TickError {}

impl Tick {
    /// Construct a tick, rejecting `ask < bid` per §3.
    pub fn new(time: DateTime<Utc>, bid: PriceMicros, ask: PriceMicros, volume: i64) -> Result<Self, TickError> {
        if ask < bid {
            return Err(TickError::AskBelowBid {
                bid: bid.raw(),
                ask: ask.raw(),
            });
        }
        Ok(Self { time, bid, ask, volume })
    }

    pub fn mid(&self) -> PriceMicros {
        PriceMicros::mid(self.bid, self.ask)
    }

    pub fn spread_pips(&self, pip_scale: i64) -> Pips {
        self.bid.pips_to(self.ask, pip_scale)
    }

    /// Idempotency key per §6: duplicates share `(time, bid, ask)`.
    pub fn dedupe_key(&self) -> (i64, i64, i64) {
        (self.time.timestamp_millis(), self.bid.raw(), self.ask.raw())
    }
}
