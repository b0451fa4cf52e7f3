use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advisory::Verdict;
use crate::rule::StructuredRule;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A Layer-2 anomaly signal raised against the book or the market feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    pub trigger: String,
    pub position_id: Option<Uuid>,
}

/// The append-only audit trail's payload variants. `EventRecord` wraps one of these
/// with sequence number and timestamp; the hash chain covers the whole envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    RuleActivated {
        accepted: bool,
        reason: Option<String>,
        rule: StructuredRule,
    },
    EntryExecuted {
        volume: f64,
    },
    PartialClose {
        level_index: usize,
        volume_closed: f64,
    },
    FullClose {
        reason: String,
    },
    EmergencyStop {
        reason: String,
    },
    Layer2Trigger {
        escalation: Escalation,
    },
    Layer3aVerdict {
        verdict: Verdict,
    },
    Layer3bVerdict {
        verdict: Verdict,
    },
    ForceClose {
        reason: String,
    },
    /// §4.7's budget clause: the 100 ms scheduler fired but the last tick
    /// was older than 1 s, so Layer-1 had nothing to evaluate.
    Layer1Skipped,
    /// §5's shutdown clause: a broker order was in flight when the
    /// shutdown budget expired; the outcome needs manual reconciliation.
    UnknownOutcome {
        intent: String,
    },
    /// A daily broker-local wall-clock tick with no dedicated close action
    /// (e.g. the 06:00/08:00/12:00/16:00/21:30 review slots in spec §2) —
    /// recorded so the embedder's downstream review tooling has a hook.
    DailyWallClockEvent {
        label: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub position_id: Option<Uuid>,
    pub kind: EventKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_is_low_to_critical() {
        assert!(Severity::Low < Severity::Critical);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn event_kind_serializes_with_tag_field() {
        let kind = EventKind::ForceClose { reason: "daily".to_string() };
        let v = serde_json::to_value(&kind).unwrap();
        assert_eq!(v["kind"], "force_close");
        assert_eq!(v["reason"], "daily");
    }
}
