//! The single-threaded engine loop: owns `MarketView`, `RuleStore`, and
//! `PositionBook` exclusively and drives every tick, bar close, and
//! scheduled job through the rule evaluator, the safety-monitor layers, and
//! the Broker Gateway, recording every decision to the event sink.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc, Weekday};
use uuid::Uuid;

use fxauto_audit::EventSink;
use fxauto_broker::{BrokerAdapter, BrokerGateway, GatewayError};
use fxauto_config::EngineConfig;
use fxauto_market::MarketView;
use fxauto_monitor::{
    evaluate_five_minute_checks, evaluate_minute_checks, Advisory, CloseAllReason, Layer1Monitor,
    Layer3Action, Layer3Coordinator,
};
use fxauto_portfolio::PositionBook;
use fxauto_rules::{
    evaluate_entry, evaluate_exit, EntryContext, EntryVerdict, ExitAction, ExitContext, ExitReason,
    RuleStore,
};
use fxauto_scheduler::{BrokerLocalClock, FixedOffsetBrokerClock, JobKind, Scheduler};
use fxauto_schemas::advisory::{PositionSnapshot, Verdict, VerdictAction};
use fxauto_schemas::bar::OhlcBar;
use fxauto_schemas::event::EventKind;
use fxauto_schemas::fixedpoint::PriceMicros;
use fxauto_schemas::indicator::IndicatorVector;
use fxauto_schemas::position::{Position, PositionStatus};
use fxauto_schemas::rule::{Direction, StructuredRule};
use fxauto_schemas::tick::Tick;
use fxauto_schemas::timeframe::Timeframe;

/// Standard-lot JPY-per-pip approximation, matching the constant each of
/// `fxauto-rules` and `fxauto-monitor` keep locally for their own sizing math.
const JPY_PIP_VALUE_PER_LOT: f64 = 1000.0;

/// Assumed account leverage for the entry margin pre-check. The source
/// system's real margin formula wasn't retained (see DESIGN.md); this is a
/// standard 100:1 FX-broker approximation, used only to gate new entries.
const ASSUMED_LEVERAGE: f64 = 100.0;

/// One step of external input the loop-driving API consumes.
pub enum LoopMessage {
    Tick(Tick),
    BarClose(Timeframe, OhlcBar, IndicatorVector),
    Tock(DateTime<Utc>),
}

/// Single-owner engine loop (C1-C10 composition). Every method other than
/// the read-only accessors takes `&mut self`; there is no internal locking
/// anywhere in this type or the state it owns.
pub struct Engine<B: BrokerAdapter, A: Advisory, S: EventSink> {
    config: EngineConfig,
    market: MarketView,
    rules: RuleStore,
    positions: PositionBook,
    gateway: BrokerGateway<B>,
    layer1: Layer1Monitor,
    layer3: Layer3Coordinator<A>,
    scheduler: Scheduler<FixedOffsetBrokerClock>,
    sink: S,
    weekend_start: (Weekday, NaiveTime),
    weekend_end: (Weekday, NaiveTime),
    weekend_mode: bool,
    high_water: HashMap<Uuid, PriceMicros>,
    last_tick_time: Option<DateTime<Utc>>,
}

impl<B: BrokerAdapter, A: Advisory, S: EventSink> Engine<B, A, S> {
    pub fn new(
        config: EngineConfig,
        broker_offset_hours: i32,
        start: DateTime<Utc>,
        broker: B,
        advisory: A,
        sink: S,
    ) -> Result<Self> {
        let broker_clock = FixedOffsetBrokerClock::new(broker_offset_hours);
        let mut scheduler = Scheduler::new(broker_clock, start);
        scheduler.register_periodic(
            JobKind::Layer1,
            "layer1",
            Duration::milliseconds(config.layer1_period_ms as i64),
            Duration::zero(),
        );
        scheduler.register_periodic(
            JobKind::Layer2a,
            "layer2a",
            Duration::seconds(config.layer2a_period_s as i64),
            Duration::zero(),
        );
        scheduler.register_periodic(
            JobKind::Layer2b,
            "layer2b",
            Duration::seconds(config.layer2b_period_s as i64),
            Duration::zero(),
        );
        scheduler.register_periodic(
            JobKind::Layer3a,
            "layer3a",
            Duration::seconds(config.layer3a_period_s as i64),
            Duration::zero(),
        );

        let (daily_h, daily_m) = fxauto_config::parse_hhmm(&config.daily_close_hhmm)?;
        let daily_close_time =
            NaiveTime::from_hms_opt(daily_h, daily_m, 0).context("daily_close_hhmm out of range")?;
        scheduler.register_daily("force_close", daily_close_time);
        for slot in ["06:00", "08:00", "12:00", "16:00", "21:30"] {
            let (h, m) = fxauto_config::parse_hhmm(slot).expect("hardcoded review slot is valid");
            let t = NaiveTime::from_hms_opt(h, m, 0).expect("hardcoded review slot is valid");
            scheduler.register_daily(slot, t);
        }

        let weekend_start = parse_weekday_hhmm(&config.weekend_start)?;
        let weekend_end = parse_weekday_hhmm(&config.weekend_end)?;

        let market = MarketView::new(config.tick_staleness_threshold_ms);
        let layer1 = Layer1Monitor::new(config.pip_scale);

        Ok(Self {
            config,
            market,
            rules: RuleStore::new(),
            positions: PositionBook::new(),
            gateway: BrokerGateway::new(broker),
            layer1,
            layer3: Layer3Coordinator::new(advisory),
            scheduler,
            sink,
            weekend_start,
            weekend_end,
            weekend_mode: false,
            high_water: HashMap::new(),
            last_tick_time: None,
        })
    }

    pub fn install_rule(&mut self, rule: StructuredRule, now: DateTime<Utc>) -> Result<()> {
        match self.rules.install(rule.clone()) {
            Ok(()) => self.emit(now, None, EventKind::RuleActivated { accepted: true, reason: None, rule }),
            Err(err) => self.emit(
                now,
                None,
                EventKind::RuleActivated { accepted: false, reason: Some(err.to_string()), rule },
            ),
        }
    }

    pub fn on_tick(&mut self, tick: Tick, now: DateTime<Utc>) -> Result<()> {
        let changed = self.market.ingest_tick(tick.clone(), now);
        if !changed {
            return Ok(());
        }
        self.run_layer1(&tick, now)?;
        self.update_high_water(&tick);
        self.process_exits_for_all_open(now)?;
        self.try_enter(now)?;
        Ok(())
    }

    pub fn on_bar_close(
        &mut self,
        tf: Timeframe,
        bar: OhlcBar,
        indicators: IndicatorVector,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.market.ingest_bar(tf, bar);
        self.market.set_indicators(indicators);
        if tf == Timeframe::M15 {
            self.process_exits_for_all_open(now)?;
            self.try_enter(now)?;
        }
        Ok(())
    }

    /// Run every scheduled job due as of `now`, in the scheduler's total
    /// order (Layer-1 watchdog, then Layer-2a/2b, then Layer-3a, then daily).
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.update_weekend_mode(now);
        let due = self.scheduler.advance(now);
        for job in due {
            match job.kind {
                JobKind::Layer1 => self.handle_layer1_scheduled(now)?,
                JobKind::Layer2a => self.handle_layer2a(now)?,
                JobKind::Layer2b => self.handle_layer2b(now)?,
                JobKind::Layer3a => self.handle_layer3a(now)?,
                JobKind::Daily => self.handle_daily(&job.name, now)?,
            }
        }
        Ok(())
    }

    pub fn run_loop(&mut self, rx: std::sync::mpsc::Receiver<LoopMessage>) -> Result<()> {
        for msg in rx {
            match msg {
                LoopMessage::Tick(tick) => self.step(tick)?,
                LoopMessage::BarClose(tf, bar, indicators) => {
                    let now = bar.time;
                    self.on_bar_close(tf, bar, indicators, now)?;
                }
                LoopMessage::Tock(now) => self.advance(now)?,
            }
        }
        Ok(())
    }

    /// Deterministic single-tick step for backtests and tests: ingest the
    /// tick, then run every job the scheduler now considers due.
    ///
    /// A tick whose `time` does not strictly advance past the last tick this
    /// engine accepted is dropped before touching any state: processing it
    /// would rewind the scheduler's virtual clock (`advance` is driven by
    /// `tick.time`), which would let an already-settled instant fire its
    /// jobs again out of order. Per spec §6/§8, out-of-order ticks are
    /// dropped and logged, never processed.
    pub fn step(&mut self, tick: Tick) -> Result<()> {
        if let Some(last) = self.last_tick_time {
            if tick.time < last {
                tracing::warn!(
                    tick_time = %tick.time,
                    last_tick_time = %last,
                    "dropping out-of-order tick, not rewinding engine clock"
                );
                return Ok(());
            }
        }
        let now = tick.time;
        self.last_tick_time = Some(now);
        self.on_tick(tick, now)?;
        self.advance(now)
    }

    pub fn is_degraded(&self) -> bool {
        self.gateway.is_degraded()
    }

    pub fn acknowledge_operator_clear(&mut self) {
        self.gateway.acknowledge_operator_clear();
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn positions(&self) -> &PositionBook {
        &self.positions
    }

    pub fn market(&self) -> &MarketView {
        &self.market
    }

    fn emit(&mut self, at: DateTime<Utc>, position_id: Option<Uuid>, kind: EventKind) -> Result<()> {
        self.sink.record(at, position_id, kind)
    }

    fn current_mid(&self) -> Option<PriceMicros> {
        self.market.last_tick().map(|t| t.mid())
    }

    fn update_high_water(&mut self, tick: &Tick) {
        let mid = tick.mid();
        for position in self.positions.open_positions() {
            let entry = self.high_water.entry(position.id).or_insert(position.open_price);
            let improves = match position.direction {
                Direction::Buy => mid > *entry,
                Direction::Sell => mid < *entry,
            };
            if improves {
                *entry = mid;
            }
        }
    }

    fn realized_pnl_jpy_for(&self, id: Uuid) -> f64 {
        self.positions
            .realized()
            .iter()
            .filter(|r| r.position_id == id)
            .map(|r| r.pips as f64 * r.volume_closed * JPY_PIP_VALUE_PER_LOT)
            .sum()
    }

    fn run_layer1(&mut self, tick: &Tick, now: DateTime<Utc>) -> Result<()> {
        self.layer1.on_tick(now, tick.mid());
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            let position = match self.positions.get(id) {
                Some(p) if p.is_open() => p.clone(),
                _ => continue,
            };
            let realized_jpy = self.realized_pnl_jpy_for(id);
            if let Some(trigger) = self.layer1.evaluate(&position, tick, now, realized_jpy) {
                self.close_full(id, now, trigger.reason().to_string(), |r| EventKind::FullClose {
                    reason: r,
                })?;
            }
        }
        Ok(())
    }

    fn handle_layer1_scheduled(&mut self, now: DateTime<Utc>) -> Result<()> {
        let stale = match self.market.last_tick() {
            None => true,
            Some(tick) => now - tick.time > Duration::seconds(1),
        };
        if stale {
            self.emit(now, None, EventKind::Layer1Skipped)?;
        }
        Ok(())
    }

    fn process_exits_for_all_open(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            self.manage_one_exit(id, now)?;
        }
        Ok(())
    }

    fn manage_one_exit(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let current_price = match self.current_mid() {
            Some(p) => p,
            None => return Ok(()),
        };
        let position = match self.positions.get(id) {
            Some(p) if p.is_open() => p.clone(),
            _ => return Ok(()),
        };
        let high_water = *self.high_water.get(&id).unwrap_or(&position.open_price);
        let broker_local_time = self.scheduler.broker_clock().local_time(now);
        let ctx = ExitContext { current_price, high_water, pip_scale: self.config.pip_scale, now, broker_local_time };
        let actions = evaluate_exit(&position, &self.market, &ctx);

        for action in actions {
            match action {
                ExitAction::PartialClose { level_index, close_percent, .. } => {
                    let close_volume = {
                        let position = match self.positions.get(id) {
                            Some(p) if p.is_open() => p,
                            _ => break,
                        };
                        position.volume_initial * (close_percent / 100.0)
                    };
                    match self.gateway.close(id, close_volume, current_price) {
                        Ok(fill) => {
                            let level_opt = if level_index == usize::MAX { None } else { Some(level_index) };
                            let record = self.positions.partial_close(
                                id,
                                level_opt,
                                close_percent,
                                now,
                                fill.price,
                                self.config.pip_scale,
                            )?;
                            self.emit(
                                now,
                                Some(id),
                                EventKind::PartialClose { level_index, volume_closed: record.volume_closed },
                            )?;
                        }
                        Err(err) => {
                            self.emit(
                                now,
                                Some(id),
                                EventKind::EmergencyStop { reason: format!("close_failed: {err}") },
                            )?;
                            break;
                        }
                    }
                }
                ExitAction::UpdateTrailingStop { new_stop } => {
                    self.gateway.modify_stop(id, new_stop)?;
                    self.positions.update_trailing_stop(id, new_stop)?;
                }
                ExitAction::FullClose { reason } => {
                    self.close_full(id, now, exit_reason_label(reason).to_string(), |r| {
                        EventKind::FullClose { reason: r }
                    })?;
                }
            }
        }
        Ok(())
    }

    fn margin_sufficient(&self, rule: &StructuredRule) -> bool {
        let symbol = self.gateway.symbol_info();
        let account = self.gateway.account_info();
        let approx_volume =
            (self.config.base_lot * rule.risk_management.position_size_multiplier).clamp(symbol.volume_min, symbol.volume_max);
        let mid = self.current_mid().unwrap_or(PriceMicros::ZERO);
        let notional = approx_volume * 100_000.0 * mid.to_f64();
        let required_margin = notional / ASSUMED_LEVERAGE;
        account.free_margin.to_f64() >= required_margin
    }

    fn try_enter(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.weekend_mode || self.gateway.is_degraded() {
            return Ok(());
        }
        let rule = match self.rules.current(now) {
            Some(r) => r.clone(),
            None => return Ok(()),
        };
        let margin_ok = self.margin_sufficient(&rule);
        let symbol = self.gateway.symbol_info();
        let account = self.gateway.account_info();
        let broker_local_time = self.scheduler.broker_clock().local_time(now);
        let ctx = EntryContext {
            now,
            broker_local_time,
            open_position_count: self.positions.count_open(&rule.symbol),
            pip_scale: self.config.pip_scale,
            base_lot: self.config.base_lot,
            volume_step: symbol.volume_step,
            volume_min: symbol.volume_min,
            volume_max: symbol.volume_max,
            account_equity: account.equity,
            margin_sufficient: margin_ok,
        };

        let plan = match evaluate_entry(&rule, &self.market, &ctx) {
            EntryVerdict::Accept(plan) => plan,
            EntryVerdict::Reject(_) => return Ok(()),
        };

        match self.gateway.market_open(plan.direction, plan.volume) {
            Ok(fill) => {
                let id = Uuid::new_v4();
                let position = Position {
                    id,
                    symbol: rule.symbol.clone(),
                    direction: plan.direction,
                    opened_at: now,
                    open_price: fill.price,
                    volume_initial: fill.volume,
                    volume_remaining: fill.volume,
                    insurance_sl: plan.insurance_sl,
                    trailing_stop: None,
                    executed_tp_levels: BTreeSet::new(),
                    rule_snapshot: rule.clone(),
                    account_equity_at_open: account.equity,
                    status: PositionStatus::Open,
                };
                self.positions.open(position, rule.risk_management.max_positions)?;
                self.high_water.insert(id, fill.price);
                self.emit(now, Some(id), EventKind::EntryExecuted { volume: fill.volume })?;
            }
            Err(GatewayError::Broker(err)) if !err.is_transient() => {
                self.emit(now, None, EventKind::EmergencyStop { reason: format!("entry_failed: {err}") })?;
            }
            Err(_) => {}
        }
        Ok(())
    }

    /// Close out whatever volume remains, in one step. `on_success` builds
    /// the event variant to record (`FullClose` for ordinary exits and
    /// Layer-1/Layer-3 closes, `ForceClose` for the daily wall-clock job); a
    /// broker close failure always records `EmergencyStop` and degrades the
    /// gateway, per spec §4.6/§7, regardless of why the close was attempted.
    fn close_full(
        &mut self,
        id: Uuid,
        now: DateTime<Utc>,
        reason: String,
        on_success: impl FnOnce(String) -> EventKind,
    ) -> Result<()> {
        let (remaining, open_price) = match self.positions.get(id) {
            Some(p) if p.is_open() => (p.volume_remaining, p.open_price),
            _ => return Ok(()),
        };
        let current_price = self.current_mid().unwrap_or(open_price);
        match self.gateway.close(id, remaining, current_price) {
            Ok(fill) => {
                self.positions.full_close(id, now, fill.price, self.config.pip_scale)?;
                self.high_water.remove(&id);
                self.emit(now, Some(id), on_success(reason))?;
            }
            Err(err) => {
                self.emit(now, Some(id), EventKind::EmergencyStop { reason: format!("close_failed: {err}") })?;
            }
        }
        Ok(())
    }

    fn position_snapshot(&self, id: Uuid) -> Option<PositionSnapshot> {
        let position = self.positions.get(id)?;
        let current = self.current_mid().unwrap_or(position.open_price);
        let pips = position.open_price.pips_to(current, self.config.pip_scale).raw() * position.direction.sign();
        let fraction = if position.volume_initial > 0.0 {
            position.volume_remaining / position.volume_initial
        } else {
            0.0
        };
        Some(PositionSnapshot {
            position_id: id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            open_price: position.open_price,
            current_price: current,
            unrealized_pips: pips,
            opened_at: position.opened_at,
            volume_remaining_fraction: fraction,
        })
    }

    fn apply_layer3_action(&mut self, id: Uuid, now: DateTime<Utc>, action: Layer3Action) -> Result<()> {
        match action {
            Layer3Action::Continue => Ok(()),
            Layer3Action::TightenStop { new_stop } => {
                self.gateway.modify_stop(id, new_stop)?;
                self.positions.update_trailing_stop(id, new_stop)?;
                Ok(())
            }
            Layer3Action::ClosePartial { fraction } => {
                let (volume_initial, open_price) = match self.positions.get(id) {
                    Some(p) if p.is_open() => (p.volume_initial, p.open_price),
                    _ => return Ok(()),
                };
                let current_price = self.current_mid().unwrap_or(open_price);
                let close_percent = fraction * 100.0;
                match self.gateway.close(id, volume_initial * fraction, current_price) {
                    Ok(fill) => {
                        let record = self.positions.partial_close(
                            id,
                            None,
                            close_percent,
                            now,
                            fill.price,
                            self.config.pip_scale,
                        )?;
                        self.emit(
                            now,
                            Some(id),
                            EventKind::PartialClose { level_index: usize::MAX, volume_closed: record.volume_closed },
                        )?;
                    }
                    Err(err) => {
                        self.emit(now, Some(id), EventKind::EmergencyStop { reason: format!("close_failed: {err}") })?;
                    }
                }
                Ok(())
            }
            Layer3Action::CloseAll { reason } => {
                let label = match reason {
                    CloseAllReason::Advisory => "advisory",
                    CloseAllReason::AdvisoryTimeout => "advisory_timeout",
                };
                self.close_full(id, now, label.to_string(), |r| EventKind::FullClose { reason: r })
            }
        }
    }

    fn handle_layer2a(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            let position = match self.positions.get(id) {
                Some(p) if p.is_open() => p.clone(),
                _ => continue,
            };
            let escalations = evaluate_minute_checks(&position, &self.market, now);
            for escalation in escalations {
                let trigger = escalation.trigger.clone();
                self.emit(now, Some(id), EventKind::Layer2Trigger { escalation })?;
                let snapshot = match self.position_snapshot(id) {
                    Some(s) => s,
                    None => continue,
                };
                let action = self.layer3.evaluate_emergency(id, &snapshot, &trigger, now);
                let verdict = layer3_action_to_verdict(id, action, &trigger);
                self.emit(now, Some(id), EventKind::Layer3bVerdict { verdict })?;
                self.apply_layer3_action(id, now, action)?;
            }
        }
        Ok(())
    }

    fn handle_layer2b(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            let position = match self.positions.get(id) {
                Some(p) if p.is_open() => p.clone(),
                _ => continue,
            };
            let broker_local_time = self.scheduler.broker_clock().local_time(now);
            let escalations = evaluate_five_minute_checks(&position, &self.market, now, broker_local_time);
            for escalation in escalations {
                let trigger = escalation.trigger.clone();
                self.emit(now, Some(id), EventKind::Layer2Trigger { escalation })?;
                let snapshot = match self.position_snapshot(id) {
                    Some(s) => s,
                    None => continue,
                };
                let action = self.layer3.evaluate_emergency(id, &snapshot, &trigger, now);
                let verdict = layer3_action_to_verdict(id, action, &trigger);
                self.emit(now, Some(id), EventKind::Layer3bVerdict { verdict })?;
                self.apply_layer3_action(id, now, action)?;
            }
        }
        Ok(())
    }

    fn handle_layer3a(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            let snapshot = match self.position_snapshot(id) {
                Some(s) => s,
                None => continue,
            };
            let (action, escalate) = self.layer3.evaluate_periodic(&snapshot);
            let verdict = layer3_action_to_verdict(id, action, "periodic");
            self.emit(now, Some(id), EventKind::Layer3aVerdict { verdict })?;
            self.apply_layer3_action(id, now, action)?;
            if escalate {
                let emergency_action = self.layer3.evaluate_emergency(id, &snapshot, "layer3a_escalate", now);
                let emergency_verdict = layer3_action_to_verdict(id, emergency_action, "layer3a_escalate");
                self.emit(now, Some(id), EventKind::Layer3bVerdict { verdict: emergency_verdict })?;
                self.apply_layer3_action(id, now, emergency_action)?;
            }
        }
        Ok(())
    }

    fn handle_daily(&mut self, name: &str, now: DateTime<Utc>) -> Result<()> {
        if name == "force_close" {
            self.force_close_all_daily(now)
        } else {
            self.emit(now, None, EventKind::DailyWallClockEvent { label: name.to_string() })
        }
    }

    fn force_close_all_daily(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ids: Vec<Uuid> = self.positions.open_positions().map(|p| p.id).collect();
        for id in ids {
            self.close_full(id, now, "daily_close".to_string(), |r| EventKind::ForceClose { reason: r })?;
        }
        Ok(())
    }

    fn update_weekend_mode(&mut self, now: DateTime<Utc>) {
        self.weekend_mode = self.in_weekend_window(now);
    }

    /// Entries are suppressed from `weekend_start` up to (but not
    /// including) `weekend_end`, per §6. This is independent of the daily
    /// force-close job: the daily close fires every broker-local day, the
    /// weekend window only ever gates new entries.
    fn in_weekend_window(&self, now: DateTime<Utc>) -> bool {
        let clock = self.scheduler.broker_clock();
        let weekday = clock.local_weekday(now);
        let time = clock.local_time(now);
        let week_minute = |wd: Weekday, t: NaiveTime| -> i64 {
            wd.num_days_from_monday() as i64 * 1440 + t.num_seconds_from_midnight() as i64 / 60
        };
        let now_min = week_minute(weekday, time);
        let start_min = week_minute(self.weekend_start.0, self.weekend_start.1);
        let end_min = week_minute(self.weekend_end.0, self.weekend_end.1);
        if start_min <= end_min {
            now_min >= start_min && now_min < end_min
        } else {
            now_min >= start_min || now_min < end_min
        }
    }
}

fn exit_reason_label(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::HardStop => "hard_stop",
        ExitReason::TakeProfit => "take_profit",
        ExitReason::Trailing => "trailing_stop",
        ExitReason::IndicatorExit => "indicator_exit",
        ExitReason::MaxHoldTime => "max_hold_time",
        ExitReason::ForceCloseTime => "rule_force_close_time",
    }
}

fn layer3_action_to_verdict(position_id: Uuid, action: Layer3Action, reason: &str) -> Verdict {
    let (verdict_action, close_fraction, new_stop) = match action {
        Layer3Action::Continue => (VerdictAction::Continue, None, None),
        Layer3Action::TightenStop { new_stop } => (VerdictAction::TightenStop, None, Some(new_stop)),
        Layer3Action::ClosePartial { fraction } => (VerdictAction::ClosePartial, Some(fraction), None),
        Layer3Action::CloseAll { .. } => (VerdictAction::CloseAll, None, None),
    };
    Verdict { position_id, action: verdict_action, close_fraction, new_stop, reason: reason.to_string() }
}

fn parse_weekday_hhmm(s: &str) -> Result<(Weekday, NaiveTime)> {
    let (day, hhmm) = s.split_once(' ').with_context(|| format!("expected 'DOW HH:MM', got '{s}'"))?;
    let weekday = parse_weekday(day)?;
    let (h, m) = fxauto_config::parse_hhmm(hhmm)?;
    let time = NaiveTime::from_hms_opt(h, m, 0).with_context(|| format!("invalid time in '{s}'"))?;
    Ok((weekday, time))
}

fn parse_weekday(s: &str) -> Result<Weekday> {
    match s.to_ascii_uppercase().as_str() {
        "MON" => Ok(Weekday::Mon),
        "TUE" => Ok(Weekday::Tue),
        "WED" => Ok(Weekday::Wed),
        "THU" => Ok(Weekday::Thu),
        "FRI" => Ok(Weekday::Fri),
        "SAT" => Ok(Weekday::Sat),
        "SUN" => Ok(Weekday::Sun),
        other => bail!("unrecognized weekday abbreviation '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fxauto_audit::InMemoryEventSink;
    use fxauto_broker::{AccountInfo, SimulatedBrokerAdapter, SymbolInfo};
    use fxauto_monitor::NullAdvisory;
    use fxauto_schemas::rule::{
        DailyBias, EntryConditions, ExitStrategy, IndicatorPredicates, KeyLevels, PriceZone,
        RiskManagement, SpreadGuard, StopLoss, TakeProfitLevel, TimeExits, TimeFilter,
    };

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
            PriceMicros::from_f64(149.595),
            PriceMicros::from_f64(149.605),
            100,
            AccountInfo { equity: PriceMicros::from_f64(1_000_000.0), free_margin: PriceMicros::from_f64(900_000.0) },
            SymbolInfo { volume_step: 0.01, volume_min: 0.01, volume_max: 10.0 },
        )
    }

    fn staged_tp_rule(start: DateTime<Utc>) -> StructuredRule {
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
                take_profit: vec![
                    TakeProfitLevel { pips: 10, close_percent: 30.0 },
                    TakeProfitLevel { pips: 20, close_percent: 40.0 },
                    TakeProfitLevel { pips: 30, close_percent: 30.0 },
                ],
                stop_loss: StopLoss { initial_pips: 50, price_level: None, trailing: None },
                indicator_exits: vec![],
                time_exits: TimeExits { max_hold_minutes: 600, force_close_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap() },
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

    fn engine_at(start: DateTime<Utc>) -> Engine<SimulatedBrokerAdapter, NullAdvisory, InMemoryEventSink> {
        Engine::new(test_config(), 9, start, test_broker(), NullAdvisory, InMemoryEventSink::default()).unwrap()
    }

    fn tick(t: DateTime<Utc>, bid: f64, ask: f64) -> Tick {
        Tick::new(t, PriceMicros::from_f64(bid), PriceMicros::from_f64(ask), 1).unwrap()
    }

    #[test]
    fn entry_executes_inside_zone_and_tp_ladder_closes_in_order() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
        let mut engine = engine_at(start);
        engine.install_rule(staged_tp_rule(start), start).unwrap();

        engine.step(tick(start, 149.60, 149.60)).unwrap();
        assert_eq!(engine.positions().iter().count(), 1);

        let id = engine.positions().iter().next().unwrap().id;
        engine.step(tick(start + Duration::seconds(1), 149.70, 149.70)).unwrap();
        assert_eq!(engine.positions().get(id).unwrap().executed_tp_levels.len(), 1);

        engine.step(tick(start + Duration::seconds(2), 149.80, 149.80)).unwrap();
        assert_eq!(engine.positions().get(id).unwrap().executed_tp_levels.len(), 2);

        engine.step(tick(start + Duration::seconds(3), 149.90, 149.90)).unwrap();
        assert!(!engine.positions().get(id).unwrap().is_open());
    }

    #[test]
    fn hard_stop_closes_with_full_close_not_emergency_stop() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
        let mut engine = engine_at(start);
        engine.install_rule(staged_tp_rule(start), start).unwrap();
        engine.step(tick(start, 149.60, 149.60)).unwrap();

        engine.step(tick(start + Duration::seconds(1), 149.10, 149.10)).unwrap();

        let records = &engine.sink().records;
        assert!(records.iter().any(|r| matches!(&r.kind, EventKind::FullClose { reason } if reason == "hard_stop_50pips")));
        assert!(!records.iter().any(|r| matches!(r.kind, EventKind::EmergencyStop { .. })));
    }

    #[test]
    fn duplicate_tick_does_not_duplicate_entries() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
        let mut engine = engine_at(start);
        engine.install_rule(staged_tp_rule(start), start).unwrap();
        let t = tick(start, 149.595, 149.605);
        engine.step(t.clone()).unwrap();
        engine.step(t).unwrap();
        assert_eq!(engine.positions().iter().count(), 1);
    }

    #[test]
    fn out_of_order_tick_is_dropped_without_rewinding_engine_clock() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
        let mut engine = engine_at(start);
        engine.install_rule(staged_tp_rule(start), start).unwrap();

        engine.step(tick(start, 149.60, 149.60)).unwrap();
        assert_eq!(engine.positions().iter().count(), 1);
        let id = engine.positions().iter().next().unwrap().id;

        engine.step(tick(start + Duration::seconds(1), 149.70, 149.70)).unwrap();
        assert_eq!(engine.positions().get(id).unwrap().executed_tp_levels.len(), 1);

        // A tick stamped before the last accepted one must be dropped outright,
        // not processed against rewound state.
        let late_records = engine.sink().records.len();
        engine.step(tick(start, 149.10, 149.10)).unwrap();
        assert_eq!(engine.sink().records.len(), late_records);
        assert_eq!(engine.positions().get(id).unwrap().executed_tp_levels.len(), 1);
        assert!(engine.positions().get(id).unwrap().is_open());

        // The clock must still be where the last accepted tick left it: a
        // later tick continues the TP ladder rather than re-triggering entry.
        engine.step(tick(start + Duration::seconds(2), 149.80, 149.80)).unwrap();
        assert_eq!(engine.positions().get(id).unwrap().executed_tp_levels.len(), 2);
        assert_eq!(engine.positions().iter().count(), 1);
    }

    #[test]
    fn weekend_window_suppresses_entries_but_not_existing_positions() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap().and_hms_opt(14, 30, 0).unwrap().and_utc(); // Fri 23:30 JST
        let engine = engine_at(start);
        assert!(engine.in_weekend_window(start));
    }

    #[test]
    fn rule_expiry_stops_new_entries_but_keeps_position_management() {
        let start = NaiveDate::from_ymd_opt(2026, 7, 27).unwrap().and_hms_opt(1, 0, 0).unwrap().and_utc();
        let mut engine = engine_at(start);
        let mut rule = staged_tp_rule(start);
        rule.valid_until = start + Duration::seconds(1);
        engine.install_rule(rule, start).unwrap();
        engine.step(tick(start, 149.595, 149.605)).unwrap();
        assert_eq!(engine.positions().iter().count(), 1);

        let later = start + Duration::seconds(5);
        engine.step(tick(later, 149.595, 149.605)).unwrap();
        // still exactly one position: rule expired, no second entry was opened.
        assert_eq!(engine.positions().iter().count(), 1);
    }
}
