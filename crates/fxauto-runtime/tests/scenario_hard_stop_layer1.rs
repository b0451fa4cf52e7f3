//! A 50-pip adverse move trips the Layer-1 hard-stop before the exit
//! pipeline's own stop-loss ever gets a chance to evaluate, and the resulting
//! close is recorded as an ordinary `FullClose`, never an `EmergencyStop`.

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
        valid_until: start + Duration::hours(4),
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
            max_positions: 3,
        },
        key_levels: KeyLevels::default(),
    }
}

fn tick(t: DateTime<Utc>, price: f64) -> Tick {
    Tick::new(t, PriceMicros::from_f64(price), PriceMicros::from_f64(price), 1).unwrap()
}

#[test]
fn hard_stop_wins_over_the_exit_pipeline_and_never_emergency_stops() -> Result<()> {
    let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
    let mut engine = Engine::new(test_config(), 9, start, test_broker(), NullAdvisory, InMemoryEventSink::default())?;
    engine.install_rule(rule(start), start)?;

    engine.step(tick(start, 149.60))?;
    assert_eq!(engine.positions().iter().count(), 1);
    let id = engine.positions().iter().next().unwrap().id;

    engine.step(tick(start + Duration::seconds(1), 149.10))?;

    assert!(!engine.positions().get(id).unwrap().is_open());
    let records = &engine.sink().records;
    assert!(records.iter().any(|r| matches!(
        &r.kind,
        EventKind::FullClose { reason } if reason == "hard_stop_50pips"
    )));
    assert!(!records.iter().any(|r| matches!(r.kind, EventKind::EmergencyStop { .. })));

    Ok(())
}
