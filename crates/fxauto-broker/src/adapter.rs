use fxauto_schemas::fixedpoint::PriceMicros;
use uuid::Uuid;

use crate::types::{AccountInfo, BrokerError, Fill, OrderIntent, SymbolInfo};

/// The broker capability set, per spec §4.6. Two implementations: a thin
/// wrapper over a real broker terminal (not provided here; out of scope per
/// §1) and a deterministic simulator used in tests and backtests.
pub trait BrokerAdapter {
    fn market_open(&mut self, direction: fxauto_schemas::rule::Direction, volume: f64) -> Result<Fill, BrokerError>;
    fn close(&mut self, position_id: Uuid, volume_fraction: f64, current_fill_price: PriceMicros) -> Result<Fill, BrokerError>;
    fn modify_stop(&mut self, position_id: Uuid, new_stop: PriceMicros) -> Result<(), BrokerError>;
    fn account_info(&self) -> AccountInfo;
    fn symbol_info(&self) -> SymbolInfo;
}

/// Deterministic fills at the current bid (sell-closes) / ask (buy-opens),
/// with configurable slippage and commission, per spec §4.6. No network I/O;
/// suitable for tests, backtests, and the happy-path scenarios in §8.
pub struct SimulatedBrokerAdapter {
    pub bid: PriceMicros,
    pub ask: PriceMicros,
    pub slippage_pips: i64,
    pub pip_scale: i64,
    pub account: AccountInfo,
    pub symbol: SymbolInfo,
    pub fail_next_close: bool,
}

impl SimulatedBrokerAdapter {
    pub fn new(bid: PriceMicros, ask: PriceMicros, pip_scale: i64, account: AccountInfo, symbol: SymbolInfo) -> Self {
        Self {
            bid,
            ask,
            slippage_pips: 0,
            pip_scale,
            account,
            symbol,
            fail_next_close: false,
        }
    }

    pub fn set_quote(&mut self, bid: PriceMicros, ask: PriceMicros) {
        self.bid = bid;
        self.ask = ask;
    }

    fn slippage_delta(&self) -> PriceMicros {
        fxauto_schemas::fixedpoint::Pips::new(self.slippage_pips).to_price_delta(self.pip_scale)
    }
}

impl BrokerAdapter for SimulatedBrokerAdapter {
    fn market_open(&mut self, direction: fxauto_schemas::rule::Direction, volume: f64) -> Result<Fill, BrokerError> {
        if volume < self.symbol.volume_min || volume > self.symbol.volume_max {
            return Err(BrokerError::InvalidVolume);
        }
        let base = match direction {
            fxauto_schemas::rule::Direction::Buy => self.ask,
            fxauto_schemas::rule::Direction::Sell => self.bid,
        };
        Ok(Fill { price: base + self.slippage_delta(), volume })
    }

    fn close(&mut self, _position_id: Uuid, volume_fraction: f64, current_fill_price: PriceMicros) -> Result<Fill, BrokerError> {
        if self.fail_next_close {
            self.fail_next_close = false;
            return Err(BrokerError::Timeout);
        }
        Ok(Fill { price: current_fill_price, volume: volume_fraction })
    }

    fn modify_stop(&mut self, _position_id: Uuid, _new_stop: PriceMicros) -> Result<(), BrokerError> {
        Ok(())
    }

    fn account_info(&self) -> AccountInfo {
        self.account
    }

    fn symbol_info(&self) -> SymbolInfo {
        self.symbol
    }
}

/// Thin wire-up to a live broker terminal. The transport itself is an
/// external collaborator out of scope per spec §1; this adapter's job is to
/// classify the terminal's responses into the [`BrokerError`] taxonomy the
/// gateway retries against.
pub trait LiveTerminal {
    fn send_market_order(&mut self, direction: fxauto_schemas::rule::Direction, volume: f64) -> Result<Fill, BrokerError>;
    fn send_close(&mut self, position_id: Uuid, volume_fraction: f64) -> Result<Fill, BrokerError>;
    fn send_modify_stop(&mut self, position_id: Uuid, new_stop: PriceMicros) -> Result<(), BrokerError>;
    fn account_info(&self) -> AccountInfo;
    fn symbol_info(&self) -> SymbolInfo;
}

pub struct LiveBrokerAdapter<T: LiveTerminal> {
    terminal: T,
}

impl<T: LiveTerminal> LiveBrokerAdapter<T> {
    pub fn new(terminal: T) -> Self {
        Self { terminal }
    }
}

impl<T: LiveTerminal> BrokerAdapter for LiveBrokerAdapter<T> {
    fn market_open(&mut self, direction: fxauto_schemas::rule::Direction, volume: f64) -> Result<Fill, BrokerError> {
        self.terminal.send_market_order(direction, volume)
    }

    fn close(&mut self, position_id: Uuid, volume_fraction: f64, _current_fill_price: PriceMicros) -> Result<Fill, BrokerError> {
        self.terminal.send_close(position_id, volume_fraction)
    }

    fn modify_stop(&mut self, position_id: Uuid, new_stop: PriceMicros) -> Result<(), BrokerError> {
        self.terminal.send_modify_stop(position_id, new_stop)
    }

    fn account_info(&self) -> AccountInfo {
        self.terminal.account_info()
    }

    fn symbol_info(&self) -> SymbolInfo {
        self.terminal.symbol_info()
    }
}
