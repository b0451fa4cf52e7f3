use std::thread::sleep;
use std::time::Duration as StdDuration;

use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::rule::Direction;
use uuid::Uuid;

use crate::adapter::BrokerAdapter;
use crate::types::{AccountInfo, BrokerError, Fill, SymbolInfo};

const TRANSIENT_RETRY_LIMIT: u32 = 3;
const TRANSIENT_RETRY_BACKOFF: StdDuration = StdDuration::from_secs(1);

/// Why the gateway refused to even attempt the call, before reaching the
/// broker adapter. Mirrors the ordered-gate-check pattern used elsewhere in
/// this engine: the gate fires before any I/O is attempted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GateRefusal {
    Degraded,
}

impl std::fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRefusal::Degraded => write!(f, "gateway refused: engine is in degraded mode"),
        }
    }
}

impl std::error::Error for GateRefusal {}

#[derive(Debug, PartialEq)]
pub enum GatewayError {
    Refused(GateRefusal),
    Broker(BrokerError),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Refused(r) => write!(f, "{r}"),
            GatewayError::Broker(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Wraps a [`BrokerAdapter`] with the retry-on-transient and
/// degrade-on-close-failure policy from spec §4.6/§7. Close failures are
/// catastrophic: once one occurs, every subsequent `market_open` is refused
/// until [`BrokerGateway::acknowledge_operator_clear`] is called.
pub struct BrokerGateway<B: BrokerAdapter> {
    adapter: B,
    degraded: bool,
    sleep_for_retry: bool,
}

impl<B: BrokerAdapter> BrokerGateway<B> {
    pub fn new(adapter: B) -> Self {
        Self { adapter, degraded: false, sleep_for_retry: true }
    }

    /// Test-only hook: skip the real 1 s backoff between retries.
    #[doc(hidden)]
    pub fn without_retry_sleep(mut self) -> Self {
        self.sleep_for_retry = false;
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn acknowledge_operator_clear(&mut self) {
        self.degraded = false;
    }

    pub fn account_info(&self) -> AccountInfo {
        self.adapter.account_info()
    }

    pub fn symbol_info(&self) -> SymbolInfo {
        self.adapter.symbol_info()
    }

    pub fn market_open(&mut self, direction: Direction, volume: f64) -> Result<Fill, GatewayError> {
        if self.degraded {
            return Err(GatewayError::Refused(GateRefusal::Degraded));
        }
        self.call_with_retry(|adapter| adapter.market_open(direction, volume))
    }

    /// A close failure is never retried as a transient error: per spec §4.6,
    /// any close failure immediately degrades the engine.
    pub fn close(
        &mut self,
        position_id: Uuid,
        volume_fraction: f64,
        current_fill_price: PriceMicros,
    ) -> Result<Fill, GatewayError> {
        match self.adapter.close(position_id, volume_fraction, current_fill_price) {
            Ok(fill) => Ok(fill),
            Err(err) => {
                self.degraded = true;
                Err(GatewayError::Broker(err))
            }
        }
    }

    pub fn modify_stop(&mut self, position_id: Uuid, new_stop: PriceMicros) -> Result<(), GatewayError> {
        self.call_with_retry(|adapter| adapter.modify_stop(position_id, new_stop))
    }

    fn call_with_retry<T>(&mut self, mut f: impl FnMut(&mut B) -> Result<T, BrokerError>) -> Result<T, GatewayError> {
        let mut attempt = 0;
        loop {
            match f(&mut self.adapter) {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt + 1 < TRANSIENT_RETRY_LIMIT => {
                    attempt += 1;
                    if self.sleep_for_retry {
                        sleep(TRANSIENT_RETRY_BACKOFF);
                    }
                }
                Err(err) => return Err(GatewayError::Broker(err)),
            }
        }
    }
}
