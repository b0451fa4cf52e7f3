use chrono::{DateTime, NaiveTime, Utc};
use fxauto_market::{Freshness, MarketView};
use fxauto_schemas::indicator::IndicatorSnapshot;
use fxauto_schemas::position::Position;
use fxauto_schemas::rule::{
    EmaCondition, EmaPredicate, IndicatorExitAction, IndicatorExitTrigger, MacdCondition,
    MacdPredicate, RsiPredicate, StructuredRule,
};
use fxauto_schemas::{Direction, Pips, PriceMicros};

/// JPY-per-pip value for a single standard lot, used to translate the 5%
/// account-equity insurance distance into a pip count. The source system's
/// exact value-per-pip model wasn't retained (see DESIGN.md); this uses the
/// standard USDJPY approximation (100,000 units × 0.01 JPY per pip).
const JPY_PIP_VALUE_PER_LOT: f64 = 1000.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdmissibilityFailure {
    NeutralBias,
    ShouldNotTrade,
    MaxPositionsReached,
    Stale,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryRejection {
    Admissibility(AdmissibilityFailure),
    OutsidePriceZone,
    IndicatorPredicateFailed,
    SpreadTooWide,
    InAvoidWindow,
    MarginInsufficient,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntryPlan {
    pub direction: Direction,
    pub volume: f64,
    pub insurance_sl: PriceMicros,
    pub entry_price: PriceMicros,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntryVerdict {
    Accept(EntryPlan),
    Reject(EntryRejection),
}

/// Everything the entry pipeline needs that isn't carried by the rule or the
/// market view: account state, broker volume constraints, and the margin
/// pre-check delegated to the Broker Gateway's dry run.
pub struct EntryContext {
    pub now: DateTime<Utc>,
    pub broker_local_time: NaiveTime,
    pub open_position_count: u32,
    pub pip_scale: i64,
    pub base_lot: f64,
    pub volume_step: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub account_equity: PriceMicros,
    pub margin_sufficient: bool,
}

/// Five-gate entry evaluation per spec §4.4.1. Each gate short-circuits with
/// a concrete rejection reason; callers use it verbatim for event logging.
pub fn evaluate_entry(rule: &StructuredRule, market: &MarketView, ctx: &EntryContext) -> EntryVerdict {
    use fxauto_schemas::rule::DailyBias;

    // Gate 1: admissibility.
    if matches!(rule.daily_bias, DailyBias::Neutral) {
        return EntryVerdict::Reject(EntryRejection::Admissibility(AdmissibilityFailure::NeutralBias));
    }
    if !rule.entry_conditions.should_trade {
        return EntryVerdict::Reject(EntryRejection::Admissibility(AdmissibilityFailure::ShouldNotTrade));
    }
    if ctx.open_position_count >= rule.risk_management.max_positions {
        return EntryVerdict::Reject(EntryRejection::Admissibility(
            AdmissibilityFailure::MaxPositionsReached,
        ));
    }
    if market.freshness(ctx.now) == Freshness::Stale {
        return EntryVerdict::Reject(EntryRejection::Admissibility(AdmissibilityFailure::Stale));
    }

    let tick = match market.last_tick() {
        Some(t) => t,
        None => return EntryVerdict::Reject(EntryRejection::Admissibility(AdmissibilityFailure::Stale)),
    };
    let mid_price = tick.mid();

    // Gate 2: price zone.
    if !rule.entry_conditions.price_zone.contains(mid_price) {
        return EntryVerdict::Reject(EntryRejection::OutsidePriceZone);
    }

    // Gate 3: indicator requirements.
    if !indicator_predicates_hold(rule, market) {
        return EntryVerdict::Reject(EntryRejection::IndicatorPredicateFailed);
    }

    // Gate 4: guardrails.
    let spread_pips = tick.spread_pips(ctx.pip_scale);
    if spread_pips.raw() as f64 > rule.entry_conditions.spread.max_pips {
        return EntryVerdict::Reject(EntryRejection::SpreadTooWide);
    }
    if rule.entry_conditions.time_filter.is_avoided(ctx.broker_local_time) {
        return EntryVerdict::Reject(EntryRejection::InAvoidWindow);
    }
    if !ctx.margin_sufficient {
        return EntryVerdict::Reject(EntryRejection::MarginInsufficient);
    }

    // Gate 5: risk sizing.
    let direction = rule
        .entry_conditions
        .direction
        .expect("should_trade implies direction per rule validation");
    let raw_volume = ctx.base_lot * rule.risk_management.position_size_multiplier;
    let stepped = round_to_step(raw_volume, ctx.volume_step);
    let volume = stepped.clamp(ctx.volume_min, ctx.volume_max);

    let insurance_distance_pips = insurance_stop_pips(ctx.account_equity, volume);
    let final_sl_pips = insurance_distance_pips.min(rule.exit_strategy.stop_loss.initial_pips);
    let sl_delta = Pips::new(final_sl_pips).to_price_delta(ctx.pip_scale);
    let insurance_sl = match direction {
        Direction::Buy => mid_price - sl_delta,
        Direction::Sell => mid_price + sl_delta,
    };

    EntryVerdict::Accept(EntryPlan {
        direction,
        volume,
        insurance_sl,
        entry_price: mid_price,
    })
}

fn round_to_step(volume: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return volume;
    }
    (volume / step).round() * step
}

/// 5% of account equity, translated to a pip distance for the given volume.
fn insurance_stop_pips(equity: PriceMicros, volume_lots: f64) -> i64 {
    if volume_lots <= 0.0 {
        return i64::MAX;
    }
    let risk_amount = equity.to_f64() * 0.05;
    (risk_amount / (volume_lots * JPY_PIP_VALUE_PER_LOT)) as i64
}

fn indicator_predicates_hold(rule: &StructuredRule, market: &MarketView) -> bool {
    let preds = &rule.entry_conditions.indicators;
    if let Some(rsi) = &preds.rsi {
        if !rsi_predicate_holds(rsi, market) {
            return false;
        }
    }
    if let Some(ema) = &preds.ema {
        if !ema_predicate_holds(ema, market) {
            return false;
        }
    }
    if let Some(macd) = &preds.macd {
        if !macd_predicate_holds(macd, market) {
            return false;
        }
    }
    true
}

fn snapshot_for(market: &MarketView, tf: fxauto_schemas::Timeframe) -> Option<&IndicatorSnapshot> {
    market.indicators().snapshot(tf)
}

fn rsi_predicate_holds(pred: &RsiPredicate, market: &MarketView) -> bool {
    match snapshot_for(market, pred.timeframe).and_then(|s| s.rsi) {
        Some(rsi) => rsi >= pred.min && rsi <= pred.max,
        None => false,
    }
}

fn ema_predicate_holds(pred: &EmaPredicate, market: &MarketView) -> bool {
    let snapshot = match snapshot_for(market, pred.timeframe) {
        Some(s) => s,
        None => return false,
    };
    let point = match snapshot.ema.get(&pred.period) {
        Some(p) => p,
        None => return false,
    };
    match pred.condition {
        EmaCondition::PriceAbove => point.price.to_f64() > point.value,
        EmaCondition::PriceBelow => point.price.to_f64() < point.value,
        EmaCondition::CrossAbove => point.crossed_above(),
        EmaCondition::CrossBelow => point.crossed_below(),
    }
}

fn macd_predicate_holds(pred: &MacdPredicate, market: &MarketView) -> bool {
    let snapshot = match snapshot_for(market, pred.timeframe) {
        Some(s) => s,
        None => return false,
    };
    let macd = match &snapshot.macd {
        Some(m) => m,
        None => return false,
    };
    match pred.condition {
        MacdCondition::HistogramPositive => macd.histogram > 0.0,
        MacdCondition::HistogramNegative => macd.histogram < 0.0,
        MacdCondition::SignalCrossAbove => macd.signal_crossed_above(),
        MacdCondition::SignalCrossBelow => macd.signal_crossed_below(),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    HardStop,
    TakeProfit,
    Trailing,
    IndicatorExit,
    MaxHoldTime,
    ForceCloseTime,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExitAction {
    FullClose { reason: ExitReason },
    PartialClose { level_index: usize, close_percent: f64, reason: ExitReason },
    UpdateTrailingStop { new_stop: PriceMicros },
}

pub struct ExitContext {
    pub current_price: PriceMicros,
    pub high_water: PriceMicros,
    pub pip_scale: i64,
    pub now: DateTime<Utc>,
    pub broker_local_time: NaiveTime,
}

/// Ordered exit pipeline per spec §4.4.2, steps 2-6 (Layer-1 emergencies are
/// evaluated separately and take precedence ahead of this pipeline). Returns
/// every action that fires this evaluation; a full close makes any further
/// action in the same call moot, so the pipeline stops there.
pub fn evaluate_exit(position: &Position, market: &MarketView, ctx: &ExitContext) -> Vec<ExitAction> {
    let mut actions = Vec::new();
    let rule = &position.rule_snapshot;
    let sign = position.direction.sign();
    let current_pips = position.open_price.pips_to(ctx.current_price, ctx.pip_scale).raw() * sign;

    // Step 2: hard stop-loss.
    if let Some(level) = rule.exit_strategy.stop_loss.price_level {
        let hit = match position.direction {
            Direction::Buy => ctx.current_price <= level,
            Direction::Sell => ctx.current_price >= level,
        };
        if hit {
            return vec![ExitAction::FullClose { reason: ExitReason::HardStop }];
        }
    } else if current_pips <= -rule.exit_strategy.stop_loss.initial_pips {
        return vec![ExitAction::FullClose { reason: ExitReason::HardStop }];
    }

    // Step 3: take-profit ladder, strictly ascending, each level at most once.
    for (idx, level) in rule.exit_strategy.take_profit.iter().enumerate() {
        if position.executed_tp_levels.contains(&idx) {
            continue;
        }
        if current_pips >= level.pips {
            actions.push(ExitAction::PartialClose {
                level_index: idx,
                close_percent: level.close_percent,
                reason: ExitReason::TakeProfit,
            });
        } else {
            // Ladder is ascending; once one level fails to reach, none after it can either.
            break;
        }
    }

    // Step 4: trailing stop.
    if let Some(trailing) = rule.exit_strategy.stop_loss.trailing {
        let favourable_pips = position.open_price.pips_to(ctx.high_water, ctx.pip_scale).raw() * sign;
        if favourable_pips >= trailing.activate_at_pips {
            let trail_delta = Pips::new(trailing.trail_distance_pips).to_price_delta(ctx.pip_scale);
            let new_stop = match position.direction {
                Direction::Buy => ctx.high_water - trail_delta,
                Direction::Sell => ctx.high_water + trail_delta,
            };
            let improved = match (position.direction, position.trailing_stop) {
                (Direction::Buy, Some(existing)) => new_stop > existing,
                (Direction::Sell, Some(existing)) => new_stop < existing,
                (_, None) => true,
            };
            if improved {
                actions.push(ExitAction::UpdateTrailingStop { new_stop });
            }
            let stop_level = position.trailing_stop.unwrap_or(new_stop);
            let triggered = match position.direction {
                Direction::Buy => ctx.current_price <= stop_level,
                Direction::Sell => ctx.current_price >= stop_level,
            };
            if triggered {
                return vec![ExitAction::FullClose { reason: ExitReason::Trailing }];
            }
        }
    }

    // Step 5: indicator exits. At most one fires per evaluation; first match by declaration order.
    for exit in &rule.exit_strategy.indicator_exits {
        if indicator_exit_fires(&exit.trigger, market) {
            match exit.action {
                IndicatorExitAction::CloseAll => {
                    return {
                        actions.push(ExitAction::FullClose { reason: ExitReason::IndicatorExit });
                        actions
                    };
                }
                IndicatorExitAction::Close50 => actions.push(ExitAction::PartialClose {
                    level_index: usize::MAX,
                    close_percent: 50.0,
                    reason: ExitReason::IndicatorExit,
                }),
                IndicatorExitAction::Close75 => actions.push(ExitAction::PartialClose {
                    level_index: usize::MAX,
                    close_percent: 75.0,
                    reason: ExitReason::IndicatorExit,
                }),
            }
            break;
        }
    }

    // Step 6: time exits.
    let held = ctx.now - position.opened_at;
    if held.num_minutes() >= rule.exit_strategy.time_exits.max_hold_minutes {
        return {
            actions.push(ExitAction::FullClose { reason: ExitReason::MaxHoldTime });
            actions
        };
    }
    if ctx.broker_local_time >= rule.exit_strategy.time_exits.force_close_time {
        return {
            actions.push(ExitAction::FullClose { reason: ExitReason::ForceCloseTime });
            actions
        };
    }

    actions
}

fn indicator_exit_fires(trigger: &IndicatorExitTrigger, market: &MarketView) -> bool {
    match trigger {
        IndicatorExitTrigger::Rsi(p) => rsi_predicate_holds(p, market),
        IndicatorExitTrigger::Ema(p) => ema_predicate_holds(p, market),
        IndicatorExitTrigger::Macd(p) => macd_predicate_holds(p, market),
    }
}
