use fxauto_schemas::advisory::{PositionSnapshot, Verdict};

/// External decision service boundary for periodic and emergency
/// re-evaluation of a position (spec §6). The transport to the actual
/// analysis service is out of scope; this trait is the seam the coordinator
/// calls through and tests substitute.
pub trait Advisory {
    fn periodic(&mut self, snapshot: &PositionSnapshot) -> Option<Verdict>;
    fn emergency(&mut self, snapshot: &PositionSnapshot, trigger: &str) -> Option<Verdict>;
}

/// Always times out. Useful for exercising the safe-default paths in §4.9.
#[derive(Default)]
pub struct NullAdvisory;

impl Advisory for NullAdvisory {
    fn periodic(&mut self, _snapshot: &PositionSnapshot) -> Option<Verdict> {
        None
    }

    fn emergency(&mut self, _snapshot: &PositionSnapshot, _trigger: &str) -> Option<Verdict> {
        None
    }
}

/// Returns pre-programmed verdicts in call order, for deterministic
/// scenario tests.
#[derive(Default)]
pub struct ScriptedAdvisory {
    pub periodic_script: Vec<Option<Verdict>>,
    pub emergency_script: Vec<Option<Verdict>>,
}

impl Advisory for ScriptedAdvisory {
    fn periodic(&mut self, _snapshot: &PositionSnapshot) -> Option<Verdict> {
        if self.periodic_script.is_empty() {
            None
        } else {
            self.periodic_script.remove(0)
        }
    }

    fn emergency(&mut self, _snapshot: &PositionSnapshot, _trigger: &str) -> Option<Verdict> {
        if self.emergency_script.is_empty() {
            None
        } else {
            self.emergency_script.remove(0)
        }
    }
}
