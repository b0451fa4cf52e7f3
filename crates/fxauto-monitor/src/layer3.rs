use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use fxauto_schemas::advisory::{PositionSnapshot, Verdict, VerdictAction};
use fxauto_schemas::fixedpoint::PriceMicros;
use uuid::Uuid;

use crate::advisory::Advisory;

const COALESCE_WINDOW: Duration = Duration::seconds(60);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Layer3Action {
    Continue,
    ClosePartial { fraction: f64 },
    CloseAll { reason: CloseAllReason },
    TightenStop { new_stop: PriceMicros },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CloseAllReason {
    Advisory,
    AdvisoryTimeout,
}

impl Layer3Action {
    /// Ranking used to resolve "most severe verdict wins" when several
    /// escalations are coalesced into one coordinator pass (spec §4.9).
    fn severity_rank(&self) -> u8 {
        match self {
            Layer3Action::Continue => 0,
            Layer3Action::TightenStop { .. } => 1,
            Layer3Action::ClosePartial { .. } => 2,
            Layer3Action::CloseAll { .. } => 3,
        }
    }
}

fn verdict_to_action(verdict: &Verdict) -> Layer3Action {
    match verdict.action {
        VerdictAction::Continue | VerdictAction::Escalate => Layer3Action::Continue,
        VerdictAction::ClosePartial => {
            Layer3Action::ClosePartial { fraction: verdict.close_fraction.unwrap_or(0.5) }
        }
        VerdictAction::CloseAll => Layer3Action::CloseAll { reason: CloseAllReason::Advisory },
        VerdictAction::TightenStop => match verdict.new_stop {
            Some(stop) => Layer3Action::TightenStop { new_stop: stop },
            None => Layer3Action::Continue,
        },
    }
}

/// Layer-3 coordinator (C9): periodic re-evaluation (3a) and event-driven
/// emergency evaluation (3b). Holds per-position coalescing state so
/// identical consecutive triggers within 60 s don't double-call the
/// advisory oracle.
pub struct Layer3Coordinator<A: Advisory> {
    advisory: A,
    last_trigger: HashMap<Uuid, (String, DateTime<Utc>)>,
}

impl<A: Advisory> Layer3Coordinator<A> {
    pub fn new(advisory: A) -> Self {
        Self { advisory, last_trigger: HashMap::new() }
    }

    /// Layer-3a: periodic, every 900 s, positions-only. A timeout or oracle
    /// failure defaults to the safe action: continue. An `escalate` verdict
    /// is the caller's signal to immediately invoke [`Self::evaluate_emergency`].
    pub fn evaluate_periodic(&mut self, snapshot: &PositionSnapshot) -> (Layer3Action, bool) {
        match self.advisory.periodic(snapshot) {
            Some(verdict) => {
                let escalate = matches!(verdict.action, VerdictAction::Escalate);
                (verdict_to_action(&verdict), escalate)
            }
            None => (Layer3Action::Continue, false),
        }
    }

    /// Layer-3b: event-driven, triggered by a Layer-2 escalation or a 3a
    /// `escalate`. A timeout or oracle failure defaults to the safe action:
    /// close everything — unknown risk on an already-flagged anomaly
    /// resolves to protection of capital (spec §4.9).
    pub fn evaluate_emergency(
        &mut self,
        position_id: Uuid,
        snapshot: &PositionSnapshot,
        trigger: &str,
        now: DateTime<Utc>,
    ) -> Layer3Action {
        if let Some((last_trigger, last_at)) = self.last_trigger.get(&position_id) {
            if last_trigger == trigger && now - *last_at < COALESCE_WINDOW {
                return Layer3Action::Continue;
            }
        }
        self.last_trigger.insert(position_id, (trigger.to_string(), now));

        match self.advisory.emergency(snapshot, trigger) {
            Some(verdict) => verdict_to_action(&verdict),
            None => Layer3Action::CloseAll { reason: CloseAllReason::AdvisoryTimeout },
        }
    }

    /// Resolve several simultaneously-coalesced emergency actions to the
    /// single most severe one.
    pub fn most_severe(actions: impl IntoIterator<Item = Layer3Action>) -> Layer3Action {
        actions
            .into_iter()
            .max_by_key(|a| a.severity_rank())
            .unwrap_or(Layer3Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::{NullAdvisory, ScriptedAdvisory};
    use fxauto_schemas::rule::Direction;
    use uuid::Uuid;

    fn snapshot() -> PositionSnapshot {
        PositionSnapshot {
            position_id: Uuid::nil(),
            symbol: "USDJPY".to_string(),
            direction: Direction::Buy,
            open_price: PriceMicros::from_f64(149.60),
            current_price: PriceMicros::from_f64(149.30),
            unrealized_pips: -30,
            opened_at: Utc::now(),
            volume_remaining_fraction: 1.0,
        }
    }

    #[test]
    fn advisory_timeout_defaults_periodic_to_continue() {
        let mut coordinator = Layer3Coordinator::new(NullAdvisory);
        let (action, escalate) = coordinator.evaluate_periodic(&snapshot());
        assert_eq!(action, Layer3Action::Continue);
        assert!(!escalate);
    }

    #[test]
    fn advisory_timeout_defaults_emergency_to_close_all() {
        let mut coordinator = Layer3Coordinator::new(NullAdvisory);
        let action = coordinator.evaluate_emergency(Uuid::nil(), &snapshot(), "critical_support_broken", Utc::now());
        assert_eq!(action, Layer3Action::CloseAll { reason: CloseAllReason::AdvisoryTimeout });
    }

    #[test]
    fn identical_trigger_within_60s_is_coalesced() {
        let mut coordinator = Layer3Coordinator::new(ScriptedAdvisory {
            periodic_script: vec![],
            emergency_script: vec![Some(Verdict {
                position_id: Uuid::nil(),
                action: VerdictAction::CloseAll,
                close_fraction: None,
                new_stop: None,
                reason: "test".to_string(),
            })],
        });
        let now = Utc::now();
        let first = coordinator.evaluate_emergency(Uuid::nil(), &snapshot(), "critical_support_broken", now);
        assert_eq!(first, Layer3Action::CloseAll { reason: CloseAllReason::Advisory });
        let second = coordinator.evaluate_emergency(
            Uuid::nil(),
            &snapshot(),
            "critical_support_broken",
            now + Duration::seconds(10),
        );
        assert_eq!(second, Layer3Action::Continue);
    }

    #[test]
    fn most_severe_prefers_close_all_over_continue() {
        let resolved = Layer3Coordinator::<NullAdvisory>::most_severe(vec![
            Layer3Action::Continue,
            Layer3Action::CloseAll { reason: CloseAllReason::Advisory },
            Layer3Action::TightenStop { new_stop: PriceMicros::ZERO },
        ]);
        assert_eq!(resolved, Layer3Action::CloseAll { reason: CloseAllReason::Advisory });
    }
}
