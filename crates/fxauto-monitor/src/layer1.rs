use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use fxauto_schemas::position::Position;
use fxauto_schemas::tick::Tick;
use fxauto_schemas::PriceMicros;

/// Same standard-lot JPY-per-pip approximation used by the entry sizing gate
/// (see fxauto-rules); kept local here rather than shared to avoid a
/// cross-crate dependency for one constant.
const JPY_PIP_VALUE_PER_LOT: f64 = 1000.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layer1Trigger {
    Account2Pct,
    HardStop50Pips,
    SpreadAlert,
    FlashCrash,
}

impl Layer1Trigger {
    pub fn reason(self) -> &'static str {
        match self {
            Layer1Trigger::Account2Pct => "account_2pct",
            Layer1Trigger::HardStop50Pips => "hard_stop_50pips",
            Layer1Trigger::SpreadAlert => "spread_alert",
            Layer1Trigger::FlashCrash => "flash_crash",
        }
    }
}

/// Tracks a short mid-price history so flash-crash detection can compare
/// against the price ~100 ms ago without MarketView needing to carry
/// monitor-specific state.
pub struct Layer1Monitor {
    price_history: VecDeque<(DateTime<Utc>, PriceMicros)>,
    pip_scale: i64,
}

impl Layer1Monitor {
    pub fn new(pip_scale: i64) -> Self {
        Self { price_history: VecDeque::new(), pip_scale }
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>, mid: PriceMicros) {
        self.price_history.push_back((now, mid));
        let cutoff = now - Duration::milliseconds(500);
        while matches!(self.price_history.front(), Some((t, _)) if *t < cutoff) {
            self.price_history.pop_front();
        }
    }

    fn price_n_ms_ago(&self, now: DateTime<Utc>, ms: i64) -> Option<PriceMicros> {
        let target = now - Duration::milliseconds(ms);
        self.price_history
            .iter()
            .filter(|(t, _)| *t <= target)
            .next_back()
            .map(|(_, p)| *p)
    }

    /// Spec §4.7's budget: must not perform I/O, and must be evaluated per
    /// tick for every open position before any other monitor layer runs.
    pub fn evaluate(
        &self,
        position: &Position,
        tick: &Tick,
        now: DateTime<Utc>,
        realized_pnl_jpy: f64,
    ) -> Option<Layer1Trigger> {
        let mid = tick.mid();
        let sign = position.direction.sign();
        let current_pips = position.open_price.pips_to(mid, self.pip_scale).raw() * sign;

        let unrealized_loss_jpy = if current_pips < 0 {
            (-current_pips) as f64 * JPY_PIP_VALUE_PER_LOT * position.volume_remaining
        } else {
            0.0
        };
        let realized_loss_jpy = (-realized_pnl_jpy).max(0.0);
        let equity = position.account_equity_at_open.to_f64();
        if realized_loss_jpy + unrealized_loss_jpy >= 0.02 * equity {
            return Some(Layer1Trigger::Account2Pct);
        }

        if current_pips.abs() >= 50 {
            return Some(Layer1Trigger::HardStop50Pips);
        }

        if tick.spread_pips(self.pip_scale).raw() >= 20 {
            return Some(Layer1Trigger::SpreadAlert);
        }

        if let Some(prior) = self.price_n_ms_ago(now, 100) {
            if prior.pips_to(mid, self.pip_scale).abs().raw() >= 30 {
                return Some(Layer1Trigger::FlashCrash);
            }
        }

        None
    }
}
