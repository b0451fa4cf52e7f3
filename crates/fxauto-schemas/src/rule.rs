use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fixedpoint::PriceMicros;
use crate::timeframe::Timeframe;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyBias {
    Buy,
    Sell,
    Neutral,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceZone {
    pub min: PriceMicros,
    pub max: PriceMicros,
}

impl PriceZone {
    pub fn contains(&self, price: PriceMicros) -> bool {
        price >= self.min && price <= self.max
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsiPredicate {
    pub timeframe: Timeframe,
    pub min: f64,
    pub max: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaCondition {
    PriceAbove,
    PriceBelow,
    CrossAbove,
    CrossBelow,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmaPredicate {
    pub timeframe: Timeframe,
    pub condition: EmaCondition,
    pub period: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdCondition {
    HistogramPositive,
    HistogramNegative,
    SignalCrossAbove,
    SignalCrossBelow,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacdPredicate {
    pub timeframe: Timeframe,
    pub condition: MacdCondition,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorPredicates {
    pub rsi: Option<RsiPredicate>,
    pub ema: Option<EmaPredicate>,
    pub macd: Option<MacdPredicate>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpreadGuard {
    pub max_pips: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvoidWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub reason: String,
}

impl AvoidWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            // wraps midnight
            t >= self.start || t < self.end
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeFilter {
    pub avoid_times: Vec<AvoidWindow>,
}

impl TimeFilter {
    pub fn is_avoided(&self, t: NaiveTime) -> bool {
        self.avoid_times.iter().any(|w| w.contains(t))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryConditions {
    pub should_trade: bool,
    pub direction: Option<Direction>,
    pub price_zone: PriceZone,
    pub indicators: IndicatorPredicates,
    pub spread: SpreadGuard,
    pub time_filter: TimeFilter,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TakeProfitLevel {
    pub pips: i64,
    pub close_percent: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailingStop {
    pub activate_at_pips: i64,
    pub trail_distance_pips: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopLoss {
    pub initial_pips: i64,
    pub price_level: Option<PriceMicros>,
    pub trailing: Option<TrailingStop>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorExitAction {
    Close50,
    Close75,
    CloseAll,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorExitTrigger {
    Rsi(RsiPredicate),
    Ema(EmaPredicate),
    Macd(MacdPredicate),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorExit {
    pub trigger: IndicatorExitTrigger,
    pub action: IndicatorExitAction,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeExits {
    pub max_hold_minutes: i64,
    pub force_close_time: NaiveTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExitStrategy {
    pub take_profit: Vec<TakeProfitLevel>,
    pub stop_loss: StopLoss,
    pub indicator_exits: Vec<IndicatorExit>,
    pub time_exits: TimeExits,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskManagement {
    pub position_size_multiplier: f64,
    pub max_risk_per_trade_percent: f64,
    pub max_total_exposure_percent: f64,
    pub max_positions: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyLevels {
    pub entry_target: Option<PriceMicros>,
    pub invalidation_level: Option<PriceMicros>,
    pub critical_support: Vec<PriceMicros>,
    pub critical_resistance: Vec<PriceMicros>,
}

/// The structured rule document produced hourly upstream and consumed at `install` time.
/// Every nested type rejects unknown fields: a rule document with a typo or a field from
/// a newer schema version must fail validation loudly rather than silently ignore it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredRule {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub symbol: String,
    pub daily_bias: DailyBias,
    pub confidence: f64,
    pub entry_conditions: EntryConditions,
    pub exit_strategy: ExitStrategy,
    pub risk_management: RiskManagement,
    pub key_levels: KeyLevels,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuleValidationError {
    ValidUntilBeforeGenerated,
    ShouldTradeWithoutDirection,
    PriceZoneInverted,
    TakeProfitLaddersNotAscending,
    TakeProfitClosePercentExceeds100,
    ConfidenceOutOfRange,
    EmptySymbol,
}

impl std::fmt::Display for RuleValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            RuleValidationError::ValidUntilBeforeGenerated => "valid_until must be >= generated_at",
            RuleValidationError::ShouldTradeWithoutDirection => {
                "should_trade is true but direction is absent"
            }
            RuleValidationError::PriceZoneInverted => "price_zone.min must be <= price_zone.max",
            RuleValidationError::TakeProfitLaddersNotAscending => {
                "take_profit pip levels must be strictly ascending"
            }
            RuleValidationError::TakeProfitClosePercentExceeds100 => {
                "take_profit close_percent values must sum to <= 100"
            }
            RuleValidationError::ConfidenceOutOfRange => "confidence must be within [0, 1]",
            RuleValidationError::EmptySymbol => "symbol must not be empty",
        };
        write!(f, "rule validation failed: {msg}")
    }
}

impl std::error::Error for RuleValidationError {}

/// Validate a freshly-deserialized rule document before it is allowed into the store.
/// Structural well-formedness (unknown fields, wrong types) is already rejected by serde;
/// this covers the semantic invariants serde can't express.
pub fn validate_rule(rule: &StructuredRule) -> Result<(), RuleValidationError> {
    if rule.valid_until < rule.generated_at {
        return Err(RuleValidationError::ValidUntilBeforeGenerated);
    }
    if rule.symbol.trim().is_empty() {
        return Err(RuleValidationError::EmptySymbol);
    }
    if !(0.0..=1.0).contains(&rule.confidence) {
        return Err(RuleValidationError::ConfidenceOutOfRange);
    }
    if rule.entry_conditions.should_trade && rule.entry_conditions.direction.is_none() {
        return Err(RuleValidationError::ShouldTradeWithoutDirection);
    }
    if rule.entry_conditions.price_zone.min > rule.entry_conditions.price_zone.max {
        return Err(RuleValidationError::PriceZoneInverted);
    }

    let levels = &rule.exit_strategy.take_profit;
    for pair in levels.windows(2) {
        if pair[1].pips <= pair[0].pips {
            return Err(RuleValidationError::TakeProfitLaddersNotAscending);
        }
    }
    let total_close_percent: f64 = levels.iter().map(|l| l.close_percent).sum();
    if total_close_percent > 100.0 + f64::EPSILON {
        return Err(RuleValidationError::TakeProfitClosePercentExceeds100);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_rule() -> StructuredRule {
        let now = Utc::now();
        StructuredRule {
            version: 1,
            generated_at: now,
            valid_until: now + Duration::hours(1),
            symbol: "USDJPY".to_string(),
            daily_bias: DailyBias::Buy,
            confidence: 0.7,
            entry_conditions: EntryConditions {
                should_trade: true,
                direction: Some(Direction::Buy),
                price_zone: PriceZone {
                    min: PriceMicros::from_f64(149.0),
                    max: PriceMicros::from_f64(150.0),
                },
                indicators: IndicatorPredicates::default(),
                spread: SpreadGuard { max_pips: 3.0 },
                time_filter: TimeFilter::default(),
            },
            exit_strategy: ExitStrategy {
                take_profit: vec![
                    TakeProfitLevel { pips: 10, close_percent: 50.0 },
                    TakeProfitLevel { pips: 20, close_percent: 50.0 },
                ],
                stop_loss: StopLoss {
                    initial_pips: 15,
                    price_level: None,
                    trailing: None,
                },
                indicator_exits: vec![],
                time_exits: TimeExits {
                    max_hold_minutes: 240,
                    force_close_time: NaiveTime::from_hms_opt(16, 55, 0).unwrap(),
                },
            },
            risk_management: RiskManagement {
                position_size_multiplier: 1.0,
                max_risk_per_trade_percent: 1.0,
                max_total_exposure_percent: 5.0,
                max_positions: 3,
            },
            key_levels: KeyLevels::default(),
        }
    }

    #[test]
    fn well_formed_rule_validates() {
        assert!(validate_rule(&base_rule()).is_ok());
    }

    #[test]
    fn should_trade_without_direction_is_rejected() {
        let mut r = base_rule();
        r.entry_conditions.direction = None;
        assert_eq!(
            validate_rule(&r).unwrap_err(),
            RuleValidationError::ShouldTradeWithoutDirection
        );
    }

    #[test]
    fn non_ascending_take_profit_ladder_is_rejected() {
        let mut r = base_rule();
        r.exit_strategy.take_profit = vec![
            TakeProfitLevel { pips: 20, close_percent: 50.0 },
            TakeProfitLevel { pips: 10, close_percent: 50.0 },
        ];
        assert_eq!(
            validate_rule(&r).unwrap_err(),
            RuleValidationError::TakeProfitLaddersNotAscending
        );
    }

    #[test]
    fn close_percent_over_100_is_rejected() {
        let mut r = base_rule();
        r.exit_strategy.take_profit = vec![
            TakeProfitLevel { pips: 10, close_percent: 60.0 },
            TakeProfitLevel { pips: 20, close_percent: 60.0 },
        ];
        assert_eq!(
            validate_rule(&r).unwrap_err(),
            RuleValidationError::TakeProfitClosePercentExceeds100
        );
    }

    #[test]
    fn avoid_window_wraps_midnight() {
        let w = AvoidWindow {
            start: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            reason: "rollover".to_string(),
        };
        assert!(w.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(0, 30, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn canonical_json_roundtrip_is_a_fixed_point() {
        let r = base_rule();
        let encoded = serde_json::to_string(&r).unwrap();
        let decoded: StructuredRule = serde_json::from_str(&encoded).unwrap();
        let reencoded = serde_json::to_string(&decoded).unwrap();
        assert_eq!(encoded, reencoded);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let r = base_rule();
        let mut value = serde_json::to_value(&r).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("extra_field".to_string(), serde_json::json!(true));
        let result: Result<StructuredRule, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }
}
