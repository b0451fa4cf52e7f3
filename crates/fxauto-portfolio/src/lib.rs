//! Position Book (C5): the authoritative in-memory set of open positions.
//!
//! This is the sole owner of position state. Every mutation goes through one
//! of the methods below; there is no way for a caller to reach into a
//! `Position` and edit it directly. Each method enforces the invariants spec
//! §4.5 states: `0 <= volume_remaining <= volume_initial`, an ascending
//! prefix of executed TP levels, and a monotonic realized-PnL tally.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::position::{Position, PositionStatus};
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortfolioError {
    UnknownPosition,
    PositionAlreadyClosed,
    LevelAlreadyExecuted,
    LevelOutOfOrder,
    CloseExceedsRemaining,
    MaxPositionsReached,
}

impl std::fmt::Display for PortfolioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PortfolioError::UnknownPosition => "no position with that id",
            PortfolioError::PositionAlreadyClosed => "position is already closed",
            PortfolioError::LevelAlreadyExecuted => "take-profit level already executed",
            PortfolioError::LevelOutOfOrder => "take-profit levels must execute in ascending order",
            PortfolioError::CloseExceedsRemaining => "close volume exceeds volume_remaining",
            PortfolioError::MaxPositionsReached => "symbol already at max_positions",
        };
        write!(f, "portfolio invariant violated: {msg}")
    }
}

impl std::error::Error for PortfolioError {}

/// One realized partial- or full-close record, used for the PnL tally.
#[derive(Clone, Debug, PartialEq)]
pub struct RealizedClose {
    pub position_id: Uuid,
    pub at: DateTime<Utc>,
    pub volume_closed: f64,
    pub close_price: PriceMicros,
    pub pips: i64,
}

#[derive(Default)]
pub struct PositionBook {
    open_or_closing: BTreeMap<Uuid, Position>,
    realized: Vec<RealizedClose>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&Position> {
        self.open_or_closing.get(&id)
    }

    /// Read-only snapshot of every position still tracked (open, partially
    /// closed, or closed-but-not-yet-acknowledged by the Event Sink).
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.open_or_closing.values()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open_or_closing.values().filter(|p| p.is_open())
    }

    pub fn count_open(&self, symbol: &str) -> u32 {
        self.open_positions().filter(|p| p.symbol == symbol).count() as u32
    }

    pub fn realized(&self) -> &[RealizedClose] {
        &self.realized
    }

    pub fn realized_pnl_pips(&self) -> i64 {
        self.realized.iter().map(|r| r.pips).sum()
    }

    /// Register a freshly-opened position. Caller (the entry pipeline, via
    /// the Broker Gateway) has already confirmed the fill.
    pub fn open(&mut self, position: Position, max_positions: u32) -> Result<(), PortfolioError> {
        if self.count_open(&position.symbol) >= max_positions {
            return Err(PortfolioError::MaxPositionsReached);
        }
        self.open_or_closing.insert(position.id, position);
        Ok(())
    }

    /// Apply a take-profit or indicator-triggered partial close. `close_percent`
    /// is a percentage of `volume_initial`, per spec §4.4.2 step 3 ("proportional
    /// to the position's original volume, not remaining").
    pub fn partial_close(
        &mut self,
        id: Uuid,
        level_index: Option<usize>,
        close_percent: f64,
        at: DateTime<Utc>,
        close_price: PriceMicros,
        pip_scale: i64,
    ) -> Result<RealizedClose, PortfolioError> {
        let position = self
            .open_or_closing
            .get_mut(&id)
            .ok_or(PortfolioError::UnknownPosition)?;
        if !position.is_open() {
            return Err(PortfolioError::PositionAlreadyClosed);
        }

        if let Some(idx) = level_index {
            if position.executed_tp_levels.contains(&idx) {
                return Err(PortfolioError::LevelAlreadyExecuted);
            }
            if let Some(&max_executed) = position.executed_tp_levels.iter().next_back() {
                if idx <= max_executed {
                    return Err(PortfolioError::LevelOutOfOrder);
                }
            }
        }

        let volume_closed = position.volume_initial * (close_percent / 100.0);
        if volume_closed > position.volume_remaining + f64::EPSILON {
            return Err(PortfolioError::CloseExceedsRemaining);
        }

        position.volume_remaining = (position.volume_remaining - volume_closed).max(0.0);
        if let Some(idx) = level_index {
            position.executed_tp_levels.insert(idx);
        }
        position.status = if position.volume_remaining <= f64::EPSILON {
            PositionStatus::Closed
        } else {
            PositionStatus::PartiallyClosed
        };

        let pips = position.open_price.pips_to(close_price, pip_scale).raw() * position.direction.sign();
        let record = RealizedClose {
            position_id: id,
            at,
            volume_closed,
            close_price,
            pips,
        };
        self.realized.push(record.clone());
        Ok(record)
    }

    /// Close whatever volume remains in one step (hard stop, force-close,
    /// emergency stop, or the final leg of a TP ladder).
    pub fn full_close(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
        close_price: PriceMicros,
        pip_scale: i64,
    ) -> Result<RealizedClose, PortfolioError> {
        let position = self
            .open_or_closing
            .get_mut(&id)
            .ok_or(PortfolioError::UnknownPosition)?;
        if !position.is_open() {
            return Err(PortfolioError::PositionAlreadyClosed);
        }
        let volume_closed = position.volume_remaining;
        position.volume_remaining = 0.0;
        position.status = PositionStatus::Closed;

        let pips = position.open_price.pips_to(close_price, pip_scale).raw() * position.direction.sign();
        let record = RealizedClose {
            position_id: id,
            at,
            volume_closed,
            close_price,
            pips,
        };
        self.realized.push(record.clone());
        Ok(record)
    }

    pub fn update_trailing_stop(&mut self, id: Uuid, new_stop: PriceMicros) -> Result<(), PortfolioError> {
        let position = self
            .open_or_closing
            .get_mut(&id)
            .ok_or(PortfolioError::UnknownPosition)?;
        if !position.is_open() {
            return Err(PortfolioError::PositionAlreadyClosed);
        }
        position.trailing_stop = Some(new_stop);
        Ok(())
    }

    /// Drop positions the Event Sink has acknowledged the FullClose for.
    /// Until acknowledged, closed positions stay in the book per §4.5.
    pub fn forget(&mut self, id: Uuid) {
        self.open_or_closing.remove(&id);
    }
}
