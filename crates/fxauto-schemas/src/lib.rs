//! Shared data types for the USDJPY rule-driven trading engine: fixed-point
//! price arithmetic, market data, the structured rule wire schema, positions,
//! the audit event log, and the advisory boundary types.

pub mod advisory;
pub mod bar;
pub mod event;
pub mod fixedpoint;
pub mod indicator;
pub mod position;
pub mod rule;
pub mod tick;
pub mod timeframe;

pub use advisory::{PositionSnapshot, Verdict, VerdictAction};
pub use bar::{BarError, OhlcBar, RingBuffer};
pub use event::{Escalation, EventKind, EventRecord, Severity};
pub use fixedpoint::{Pips, PriceMicros};
pub use indicator::{EmaPoint, IndicatorSnapshot, IndicatorVector, MacdPoint};
pub use position::{Position, PositionStatus};
pub use rule::{validate_rule, Direction, RuleValidationError, StructuredRule};
pub use tick::{Tick, TickError};
pub use timeframe::Timeframe;
