use chrono::{DateTime, Utc};
use fxauto_schemas::rule::{validate_rule, RuleValidationError, StructuredRule};

/// Append-only ordered history of installed rules. Rules are never mutated
/// or removed once accepted; superseding a rule means installing a new one.
#[derive(Default)]
pub struct RuleStore {
    rules: Vec<StructuredRule>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append `rule`. Rejects (without mutating the store) any
    /// rule violating §3's invariants; the caller is responsible for emitting
    /// the corresponding `RuleActivated{accepted:false, ..}` event.
    pub fn install(&mut self, rule: StructuredRule) -> Result<(), RuleValidationError> {
        validate_rule(&rule)?;
        self.rules.push(rule);
        Ok(())
    }

    /// The most recently installed rule whose `[generated_at, valid_until]`
    /// interval contains `at`. `None` means the engine is in rule-expired
    /// mode: no new entries, but existing positions keep their own snapshot.
    pub fn current(&self, at: DateTime<Utc>) -> Option<&StructuredRule> {
        self.rules
            .iter()
            .rev()
            .find(|r| r.generated_at <= at && at <= r.valid_until)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
