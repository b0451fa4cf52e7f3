use chrono::{DateTime, NaiveTime, Utc};
use fxauto_market::MarketView;
use fxauto_schemas::event::{Escalation, Severity};
use fxauto_schemas::position::Position;
use fxauto_schemas::rule::Direction;
use fxauto_schemas::{OhlcBar, Timeframe};

/// Every 60 s, per open position: critical-level breach, indicator reversal
/// on M15, three-candle adversity. Layer-2 never closes positions — it only
/// raises an [`Escalation`] for Layer-3 to act on.
pub fn evaluate_minute_checks(position: &Position, market: &MarketView, now: DateTime<Utc>) -> Vec<Escalation> {
    let mut escalations = Vec::new();

    if let Some(mid) = market.last_tick().map(|t| t.mid()) {
        let levels = &position.rule_snapshot.key_levels;
        let breached = match position.direction {
            Direction::Buy => levels.critical_support.first().is_some_and(|s| mid < *s),
            Direction::Sell => levels.critical_resistance.first().is_some_and(|r| mid > *r),
        };
        if breached {
            escalations.push(Escalation {
                at: now,
                severity: Severity::High,
                trigger: "critical_level_breach".to_string(),
                position_id: Some(position.id),
            });
        }
    }

    if let Some(snapshot) = market.indicators().snapshot(Timeframe::M15) {
        let reversal = snapshot.macd.is_some_and(|m| match position.direction {
            Direction::Buy => m.signal_crossed_below(),
            Direction::Sell => m.signal_crossed_above(),
        }) || snapshot.ema.get(&20).zip(snapshot.ema.get(&50)).is_some_and(|(fast, slow)| {
            let fast_below_slow_now = fast.value < slow.value;
            let fast_below_slow_prev = fast.prev_value < slow.prev_value;
            fast_below_slow_now != fast_below_slow_prev
                && match position.direction {
                    Direction::Buy => fast_below_slow_now,
                    Direction::Sell => !fast_below_slow_now,
                }
        });
        if reversal {
            escalations.push(Escalation {
                at: now,
                severity: Severity::Medium,
                trigger: "indicator_reversal".to_string(),
                position_id: Some(position.id),
            });
        }
    }

    if let Some(window) = market.bars(Timeframe::M15) {
        if three_candle_adversity(window.last_n(3), position.direction) {
            escalations.push(Escalation {
                at: now,
                severity: Severity::Medium,
                trigger: "three_candle_adversity".to_string(),
                position_id: Some(position.id),
            });
        }
    }

    escalations
}

fn three_candle_adversity(bars: &[OhlcBar], direction: Direction) -> bool {
    if bars.len() < 3 {
        return false;
    }
    bars.iter().all(|bar| match direction {
        Direction::Buy => bar.close < bar.open,
        Direction::Sell => bar.close > bar.open,
    })
}

/// Every 300 s: the entry rule's avoid-condition predicates re-checked
/// against a position already open, plus RSI overheat.
pub fn evaluate_five_minute_checks(
    position: &Position,
    market: &MarketView,
    now: DateTime<Utc>,
    broker_local_time: NaiveTime,
) -> Vec<Escalation> {
    let mut escalations = Vec::new();

    if position.rule_snapshot.entry_conditions.time_filter.is_avoided(broker_local_time) {
        escalations.push(Escalation {
            at: now,
            severity: Severity::Low,
            trigger: "avoid_window_entered".to_string(),
            position_id: Some(position.id),
        });
    }

    if let Some(snapshot) = market.indicators().snapshot(Timeframe::H1) {
        if let Some(rsi) = snapshot.rsi {
            let overheat = match position.direction {
                Direction::Buy => rsi > 80.0,
                Direction::Sell => rsi < 20.0,
            };
            if overheat {
                escalations.push(Escalation {
                    at: now,
                    severity: Severity::Low,
                    trigger: "rsi_overheat".to_string(),
                    position_id: Some(position.id),
                });
            }
        }
    }

    escalations
}
