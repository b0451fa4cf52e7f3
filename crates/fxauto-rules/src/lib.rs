//! Stateless entry/exit rule evaluation and the append-only rule history.

pub mod evaluator;
pub mod store;

pub use evaluator::{
    evaluate_entry, evaluate_exit, AdmissibilityFailure, EntryContext, EntryPlan, EntryRejection,
    EntryVerdict, ExitAction, ExitContext, ExitReason,
};
pub use store::RuleStore;
