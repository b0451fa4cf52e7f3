//! The single-writer market data view: last tick, per-timeframe bar windows,
//! and the indicator vector computed over them. Owned exclusively by the
//! engine loop thread; there is no internal locking.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use fxauto_schemas::bar::{OhlcBar, RingBuffer};
use fxauto_schemas::indicator::IndicatorVector;
use fxauto_schemas::tick::Tick;
use fxauto_schemas::timeframe::Timeframe;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Market data state as seen by rule evaluation and the monitor layers.
pub struct MarketView {
    last_tick: Option<Tick>,
    last_tick_seen_at: Option<DateTime<Utc>>,
    last_tick_time: Option<DateTime<Utc>>,
    bars: HashMap<Timeframe, RingBuffer<OhlcBar>>,
    indicators: IndicatorVector,
    staleness_threshold: Duration,
    last_dedupe_key: Option<(i64, i64, i64)>,
}

impl MarketView {
    pub fn new(staleness_threshold_ms: u64) -> Self {
        let mut bars = HashMap::new();
        for tf in Timeframe::ALL {
            bars.insert(tf, RingBuffer::new(tf.window_capacity()));
        }
        Self {
            last_tick: None,
            last_tick_seen_at: None,
            last_tick_time: None,
            bars,
            indicators: IndicatorVector::default(),
            staleness_threshold: Duration::milliseconds(staleness_threshold_ms as i64),
            last_dedupe_key: None,
        }
    }

    /// Ingest a new tick. Returns `false` and leaves the view unchanged in
    /// two cases: an exact duplicate of the most recently ingested tick
    /// (same `(time, bid, ask)`, idempotent per §6), or a tick whose `time`
    /// does not strictly advance past the last accepted tick's `time`
    /// (out-of-order, dropped and logged per §6/§8).
    pub fn ingest_tick(&mut self, tick: Tick, now: DateTime<Utc>) -> bool {
        let key = tick.dedupe_key();
        if self.last_dedupe_key == Some(key) {
            return false;
        }
        if let Some(last_time) = self.last_tick_time {
            if tick.time <= last_time {
                tracing::warn!(
                    tick_time = %tick.time,
                    last_tick_time = %last_time,
                    "dropping out-of-order tick"
                );
                return false;
            }
        }
        self.last_dedupe_key = Some(key);
        self.last_tick_time = Some(tick.time);
        self.last_tick_seen_at = Some(now);
        self.last_tick = Some(tick);
        true
    }

    pub fn ingest_bar(&mut self, tf: Timeframe, bar: OhlcBar) {
        self.bars.entry(tf).or_insert_with(|| RingBuffer::new(tf.window_capacity())).push(bar);
    }

    pub fn replace_forming_bar(&mut self, tf: Timeframe, bar: OhlcBar) {
        self.bars.entry(tf).or_insert_with(|| RingBuffer::new(tf.window_capacity())).replace_last(bar);
    }

    pub fn set_indicators(&mut self, indicators: IndicatorVector) {
        self.indicators = indicators;
    }

    pub fn indicators(&self) -> &IndicatorVector {
        &self.indicators
    }

    pub fn bars(&self, tf: Timeframe) -> Option<&RingBuffer<OhlcBar>> {
        self.bars.get(&tf)
    }

    pub fn last_tick(&self) -> Option<&Tick> {
        self.last_tick.as_ref()
    }

    /// Freshness as of `now`, per the configured staleness threshold. Before
    /// any tick has ever arrived the view is considered stale rather than
    /// panicking or defaulting to fresh.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        match self.last_tick_seen_at {
            None => Freshness::Stale,
            Some(seen_at) if now - seen_at > self.staleness_threshold => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        }
    }
}
