//! On-disk scenario format the runner drives: a rule document, a broker
//! starting state, and a tick sequence, all in simulated-clock mode. This is
//! the thin wiring needed to give the exit-code contract a concrete
//! implementation to test against; it has no report rendering and no live
//! broker path.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use fxauto_broker::{AccountInfo, SimulatedBrokerAdapter, SymbolInfo};
use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::rule::StructuredRule;
use fxauto_schemas::tick::Tick;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSpec {
    pub bid: f64,
    pub ask: f64,
    pub equity: f64,
    pub free_margin: f64,
    pub volume_step: f64,
    pub volume_min: f64,
    pub volume_max: f64,
}

impl BrokerSpec {
    fn into_adapter(self, pip_scale: i64) -> SimulatedBrokerAdapter {
        SimulatedBrokerAdapter::new(
            PriceMicros::from_f64(self.bid),
            PriceMicros::from_f64(self.ask),
            pip_scale,
            AccountInfo {
                equity: PriceMicros::from_f64(self.equity),
                free_margin: PriceMicros::from_f64(self.free_margin),
            },
            SymbolInfo {
                volume_step: self.volume_step,
                volume_min: self.volume_min,
                volume_max: self.volume_max,
            },
        )
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TickSpec {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    #[serde(default = "default_tick_volume")]
    pub volume: i64,
}

fn default_tick_volume() -> i64 {
    1
}

impl TickSpec {
    fn into_tick(self) -> Result<Tick> {
        Tick::new(self.time, PriceMicros::from_f64(self.bid), PriceMicros::from_f64(self.ask), self.volume)
            .with_context(|| format!("tick at {} fails its own invariants", self.time))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub broker_offset_hours: i32,
    pub broker: BrokerSpec,
    pub rule: StructuredRule,
    pub ticks: Vec<TickSpec>,
}

pub struct Scenario {
    pub broker_offset_hours: i32,
    pub broker: SimulatedBrokerAdapter,
    pub rule: StructuredRule,
    pub ticks: Vec<Tick>,
}

impl Scenario {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.ticks.first().map(|t| t.time)
    }
}

pub fn load(path: &Path, pip_scale: i64) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario file {}", path.display()))?;
    let parsed: ScenarioFile =
        serde_json::from_str(&text).with_context(|| format!("parsing scenario file {}", path.display()))?;
    let ticks = parsed
        .ticks
        .into_iter()
        .map(TickSpec::into_tick)
        .collect::<Result<Vec<_>>>()?;
    Ok(Scenario {
        broker_offset_hours: parsed.broker_offset_hours,
        broker: parsed.broker.into_adapter(pip_scale),
        rule: parsed.rule,
        ticks,
    })
}
