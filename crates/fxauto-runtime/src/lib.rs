//! The engine loop (C1-C10 composition): owns MarketView, RuleStore, and
//! PositionBook exclusively, drives them through the scheduler's total-order
//! job fan-out, and routes every decision through the Broker Gateway and
//! Event Sink.

pub mod engine;

pub use engine::{Engine, LoopMessage};
