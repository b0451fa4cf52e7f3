//! The daily wall-clock job force-closes every open position at
//! `daily_close_hhmm` regardless of weekend gating, and the weekend window
//! then suppresses new entries starting from the tick after the boundary is
//! crossed (weekend mode is recomputed once per `advance`, which runs after
//! entry evaluation for the same tick).

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fxauto_audit::InMemoryEventSink;
use fxauto_broker::{AccountInfo, SimulatedBrokerAdapter, SymbolInfo};
use fxauto_config::EngineConfig;
use fxauto_monitor::NullAdvisory;
use fxauto_runtime::Engine;
use fxauto_schemas::event::EventKind;
use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::rule::{
    DailyBias, Direction, EntryConditions, ExitStrategy, IndicatorPredicates, KeyLevels, PriceZone,
    RiskManagement, SpreadGuard, StopLoss, StructuredRule, TakeProfitLevel, TimeExits, TimeFilter,
};
use fxauto_schemas::tick::Tick;

fn test_config() -> EngineConfig {
    EngineConfig {
        base_lot: 0.1,
        pip_scale: 100,
        layer1_period_ms: 100,
        layer2a_period_s: 60,
        layer2b_period_s: 300,
        layer3a_period_s: 900,
        daily_close_hhmm: "23:00".to_string(),
        tick_staleness_threshold_ms: 10_000,
        advisory_timeout_periodic_ms: 3_000,
        advisory_timeout_emergency_ms: 10_000,
        weekend_start: "FRI 23:00".to_string(),
        weekend_end: "MON 07:00".to_string(),
    }
}

fn test_broker() -> SimulatedBrokerAdapter {
    SimulatedBrokerAdapter::new(
        PriceMicros::from_f64(149.60),
        PriceMicros::from_f64(149.60),
        100,
        AccountInfo { equity: PriceMicros::from_f64(1_000_000.0), free_margin: PriceMicros::from_f64(900_000.0) },
        SymbolInfo { volume_step: 0.01, volume_min: 0.01, volume_max: 10.0 },
    )
}

fn rule(start: DateTime<Utc>) -> StructuredRule {
    StructuredRule {
        version: 1,
        generated_at: start,
        valid_until: start + Duration::hours(18),
        symbol: "USDJPY".to_string(),
        daily_bias: DailyBias::Buy,
        confidence: 0.8,
        entry_conditions: EntryConditions {
            should_trade: true,
            direction: Some(Direction::Buy),
            price_zone: PriceZone { min: PriceMicros::from_f64(149.50), max: PriceMicros::from_f64(149.65) },
            indicators: IndicatorPredicates::default(),
            spread: SpreadGuard { max_pips: 5.0 },
            time_filter: TimeFilter::default(),
        },
        exit_strategy: ExitStrategy {
            take_profit: vec![TakeProfitLevel { pips: 10, close_percent: 30.0 }],
            stop_loss: StopLoss { initial_pips: 50, price_level: None, trailing: None },
            indicator_exits: vec![],
            time_exits: TimeExits {
                max_hold_minutes: 600,
                force_close_time: chrono::NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            },
        },
        risk_management: RiskManagement {
            position_size_multiplier: 0.8,
            max_risk_per_trade_percent: 1.0,
            max_total_exposure_percent: 5.0,
            max_positions: 1,
        },
        key_levels: KeyLevels::default(),
    }
}

fn tick(t: DateTime<Utc>, price: f64) -> Tick {
    Tick::new(t, PriceMicros::from_f64(price), PriceMicros::from_f64(price), 1).unwrap()
}

#[test]
fn daily_close_fires_then_weekend_window_gates_the_next_entry() -> Result<()> {
    // 2026-07-31 is a Friday; with broker_offset_hours = 0 broker-local time
    // equals UTC, so the weekend window opens at Fri 23:00 UTC.
    let friday = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
    let morning = friday.and_hms_opt(10, 0, 0).unwrap().and_utc();
    let mut engine = Engine::new(test_config(), 0, morning, test_broker(), NullAdvisory, InMemoryEventSink::default())?;
    engine.install_rule(rule(morning), morning)?;

    engine.step(tick(morning, 149.60))?;
    assert_eq!(engine.positions().iter().count(), 1);
    let id = engine.positions().iter().next().unwrap().id;

    let before_close = friday.and_hms_opt(22, 59, 59).unwrap().and_utc();
    engine.step(tick(before_close, 149.60))?;
    assert!(engine.positions().get(id).unwrap().is_open());

    let at_close = friday.and_hms_opt(23, 0, 0).unwrap().and_utc();
    engine.step(tick(at_close, 149.60))?;
    assert!(!engine.positions().get(id).unwrap().is_open());
    assert!(engine.sink().records.iter().any(|r| matches!(
        &r.kind,
        EventKind::ForceClose { reason } if reason == "daily_close"
    )));

    // weekend_mode is recomputed by `advance`, which runs after this same
    // tick's own entry evaluation, so suppression is only visible starting
    // with the next tick strictly after the boundary crossing.
    let after_close = friday.and_hms_opt(23, 5, 0).unwrap().and_utc();
    let entries_before = engine
        .sink()
        .records
        .iter()
        .filter(|r| matches!(r.kind, EventKind::EntryExecuted { .. }))
        .count();
    engine.step(tick(after_close, 149.60))?;
    let entries_after = engine
        .sink()
        .records
        .iter()
        .filter(|r| matches!(r.kind, EventKind::EntryExecuted { .. }))
        .count();
    assert_eq!(entries_after, entries_before, "weekend window suppresses the new entry");

    Ok(())
}
