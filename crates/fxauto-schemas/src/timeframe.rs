use serde::{Deserialize, Serialize};

/// The four timeframes the engine consumes indicator/bar data on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    D1,
    H4,
    H1,
    M15,
}

impl Timeframe {
    /// Ring-buffer window size per §3 MarketView eviction policy.
    pub fn window_capacity(self) -> usize {
        match self {
            Timeframe::D1 => 30,
            Timeframe::H4 => 50,
            Timeframe::H1 => 100,
            Timeframe::M15 => 100,
        }
    }

    pub const ALL: [Timeframe; 4] = [Timeframe::D1, Timeframe::H4, Timeframe::H1, Timeframe::M15];
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::D1 => "D1",
            Timeframe::H4 => "H4",
            Timeframe::H1 => "H1",
            Timeframe::M15 => "M15",
        };
        write!(f, "{s}")
    }
}
