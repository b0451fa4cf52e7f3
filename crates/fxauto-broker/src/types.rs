use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::rule::Direction;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum OrderIntent {
    MarketOpen {
        direction: Direction,
        volume: f64,
        stop_loss: PriceMicros,
    },
    Close {
        position_id: Uuid,
        volume_fraction: f64,
    },
    ModifyStop {
        position_id: Uuid,
        new_stop: PriceMicros,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub price: PriceMicros,
    pub volume: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderResult {
    Opened { position_id: Uuid, fill: Fill },
    Closed { fill: Fill },
    StopModified,
}

/// Errors as classified by spec §7: transient gateway errors are retried by
/// the gateway; fatal ones propagate immediately and suppress further entries.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerError {
    Requote,
    PriceOff,
    NoMoney,
    InvalidVolume,
    Timeout,
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Requote | BrokerError::PriceOff)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            BrokerError::Requote => "requote",
            BrokerError::PriceOff => "price off",
            BrokerError::NoMoney => "insufficient margin",
            BrokerError::InvalidVolume => "invalid volume",
            BrokerError::Timeout => "broker call timed out",
        };
        write!(f, "broker error: {msg}")
    }
}

impl std::error::Error for BrokerError {}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AccountInfo {
    pub equity: PriceMicros,
    pub free_margin: PriceMicros,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SymbolInfo {
    pub volume_step: f64,
    pub volume_min: f64,
    pub volume_max: f64,
}
