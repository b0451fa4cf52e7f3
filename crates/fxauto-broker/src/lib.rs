//! Broker Gateway (C6): order execution with retry-on-transient and
//! degrade-on-close-failure policy, over a pluggable [`adapter::BrokerAdapter`].

pub mod adapter;
pub mod gateway;
pub mod types;

pub use adapter::{BrokerAdapter, LiveBrokerAdapter, LiveTerminal, SimulatedBrokerAdapter};
pub use gateway::{BrokerGateway, GateRefusal, GatewayError};
pub use types::{AccountInfo, BrokerError, Fill, OrderIntent, OrderResult, SymbolInfo};
