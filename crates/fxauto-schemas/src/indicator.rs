use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixedpoint::PriceMicros;
use crate::timeframe::Timeframe;

/// One EMA line's current and previous sample, needed for cross detection.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmaPoint {
    pub period: u32,
    pub value: f64,
    pub prev_value: f64,
    pub price: PriceMicros,
    pub prev_price: PriceMicros,
}

impl EmaPoint {
    /// True if price crossed from below the EMA to above it on this sample.
    pub fn crossed_above(&self) -> bool {
        self.prev_price.to_f64() <= self.prev_value && self.price.to_f64() > self.value
    }

    /// True if price crossed from above the EMA to below it on this sample.
    pub fn crossed_below(&self) -> bool {
        self.prev_price.to_f64() >= self.prev_value && self.price.to_f64() < self.value
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_macd: f64,
    pub prev_signal: f64,
}

impl MacdPoint {
    pub fn signal_crossed_above(&self) -> bool {
        self.prev_macd <= self.prev_signal && self.macd > self.signal
    }

    pub fn signal_crossed_below(&self) -> bool {
        self.prev_macd >= self.prev_signal && self.macd < self.signal
    }
}

/// All indicator readings for a single timeframe at the current instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub ema: BTreeMap<u32, EmaPoint>,
    pub macd: Option<MacdPoint>,
}

/// Indicator state across every tracked timeframe, as seen by the rule evaluator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorVector {
    pub by_timeframe: BTreeMap<Timeframe, IndicatorSnapshot>,
}

impl IndicatorVector {
    pub fn snapshot(&self, tf: Timeframe) -> Option<&IndicatorSnapshot> {
        self.by_timeframe.get(&tf)
    }

    pub fn set(&mut self, tf: Timeframe, snapshot: IndicatorSnapshot) {
        self.by_timeframe.insert(tf, snapshot);
    }
}
