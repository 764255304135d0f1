//! The decision function.
//!
//! `decide` reconciles the market snapshot, the anchor trade, and an optional
//! forecast band into one [`Action`]. It performs no I/O and keeps no state:
//! identical inputs always produce an identical [`Decision`].
//!
//! The held asset is inferred from the anchor's side:
//!
//! | anchor side | state          | eligible action |
//! |-------------|----------------|-----------------|
//! | Sell        | `HoldingQuote` | Buy             |
//! | Buy         | `HoldingBase`  | Sell            |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{DecisionConfig, DecisionMode};
use crate::domain::{BandError, Forecast, MarketSnapshot, Side, Trade};

/// Recommended action. Amounts are always in base units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Hold,
    Buy { base_amount: f64 },
    Sell { base_amount: f64 },
}

impl Action {
    /// Order side, `None` for a hold.
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Hold => None,
            Action::Buy { .. } => Some(Side::Buy),
            Action::Sell { .. } => Some(Side::Sell),
        }
    }

    /// Order size in base units, `None` for a hold.
    pub fn base_amount(&self) -> Option<f64> {
        match *self {
            Action::Hold => None,
            Action::Buy { base_amount } | Action::Sell { base_amount } => Some(base_amount),
        }
    }

    /// True when no order is placed.
    pub fn is_hold(&self) -> bool {
        matches!(self, Action::Hold)
    }
}

/// Which asset the anchor says we hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    HoldingQuote,
    HoldingBase,
}

impl PositionState {
    /// Held asset implied by the anchor: a sell leaves quote, a buy leaves base.
    pub fn infer(anchor: &Trade) -> Self {
        match anchor.side {
            Side::Sell => PositionState::HoldingQuote,
            Side::Buy => PositionState::HoldingBase,
        }
    }
}

/// The rule that produced the action, for auditing holds as well as trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// No anchor trade: a seed position must be recorded first.
    NoAnchor,
    /// Snapshot price or balances are not usable.
    InvalidSnapshot,
    /// The anchor's side has no matching free balance.
    NoEligibleBalance,
    /// Target price is zero or negative; no ratio can be formed.
    NonPositiveTarget,
    /// Anchor amounts or price are not usable.
    InvalidAnchor,
    /// Stale position close to the forecast bound.
    StaleProximity,
    /// Price favorable relative to the anchor and forecast.
    Favorable,
    Unfavorable,
    /// Full-balance conversion beats the anchor amount plus margin.
    ProfitTargetMet,
    ProfitTargetMissed,
}

impl Branch {
    /// Holds caused by bad data rather than market conditions.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Branch::InvalidSnapshot | Branch::NonPositiveTarget | Branch::InvalidAnchor
        )
    }
}

/// Everything `decide` looked at, flattened for logs and the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionInputs {
    pub last_price: f64,
    pub free_base: f64,
    pub free_quote: f64,
    pub anchor_side: Option<Side>,
    pub anchor_price: Option<f64>,
    pub anchor_base_amount: Option<f64>,
    pub anchor_quote_amount: Option<f64>,
    pub elapsed_secs: Option<i64>,
    pub forecast_low: Option<f64>,
    pub forecast_high: Option<f64>,
    pub forecast_rejected: Option<BandError>,
    pub target_price: Option<f64>,
    pub expected_amount: Option<f64>,
    pub required_amount: Option<f64>,
}

/// Result of one `decide` call: the action, its reason, and its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub branch: Branch,
    pub state: Option<PositionState>,
    pub inputs: DecisionInputs,
}

impl Decision {
    fn new(action: Action, branch: Branch, state: Option<PositionState>, inputs: DecisionInputs) -> Self {
        Self { action, branch, state, inputs }
    }

    fn hold(branch: Branch, state: Option<PositionState>, inputs: DecisionInputs) -> Self {
        Self::new(Action::Hold, branch, state, inputs)
    }
}

/// Decide what to do for one cycle.
///
/// `last_trade` is the anchor (most recent filled trade). `now` is passed in
/// so the function stays deterministic.
pub fn decide(
    snapshot: &MarketSnapshot,
    last_trade: Option<&Trade>,
    forecast: Option<&Forecast>,
    now: DateTime<Utc>,
    config: &DecisionConfig,
) -> Decision {
    let mut inputs = DecisionInputs {
        last_price: snapshot.last_price,
        free_base: snapshot.free_base,
        free_quote: snapshot.free_quote,
        ..DecisionInputs::default()
    };

    // An unusable band is treated exactly like a missing one.
    let band = match forecast.map(|f| f.validate().map(|()| f)) {
        Some(Ok(f)) => {
            inputs.forecast_low = Some(f.low_pred);
            inputs.forecast_high = Some(f.high_pred);
            Some(f)
        }
        Some(Err(e)) => {
            inputs.forecast_rejected = Some(e);
            None
        }
        None => None,
    };

    let Some(anchor) = last_trade else {
        return Decision::hold(Branch::NoAnchor, None, inputs);
    };
    let elapsed = now - anchor.timestamp;
    inputs.anchor_side = Some(anchor.side);
    inputs.anchor_price = Some(anchor.average_price);
    inputs.anchor_base_amount = Some(anchor.base_amount);
    inputs.anchor_quote_amount = Some(anchor.quote_amount);
    inputs.elapsed_secs = Some(elapsed.num_seconds());

    let state = PositionState::infer(anchor);
    if !snapshot.is_valid() {
        return Decision::hold(Branch::InvalidSnapshot, Some(state), inputs);
    }

    let eligible = match state {
        PositionState::HoldingQuote => snapshot.free_quote > 0.0,
        PositionState::HoldingBase => snapshot.free_base > 0.0,
    };
    if !eligible {
        return Decision::hold(Branch::NoEligibleBalance, Some(state), inputs);
    }

    match config.mode {
        DecisionMode::ForecastBand => {
            forecast_band(snapshot, anchor, band, elapsed, state, config, inputs)
        }
        DecisionMode::MinProfit => min_profit(snapshot, anchor, state, config, inputs),
    }
}

fn forecast_band(
    snapshot: &MarketSnapshot,
    anchor: &Trade,
    band: Option<&Forecast>,
    elapsed: chrono::Duration,
    state: PositionState,
    config: &DecisionConfig,
    mut inputs: DecisionInputs,
) -> Decision {
    let price = snapshot.last_price;
    let target = match (state, band) {
        (PositionState::HoldingQuote, Some(f)) => f.low_pred,
        (PositionState::HoldingBase, Some(f)) => f.high_pred,
        (_, None) => anchor.average_price,
    };
    inputs.target_price = Some(target);

    if !(target > 0.0) {
        return Decision::hold(Branch::NonPositiveTarget, Some(state), inputs);
    }
    if !anchor.is_well_formed() {
        return Decision::hold(Branch::InvalidAnchor, Some(state), inputs);
    }

    let stale = elapsed > config.staleness_threshold;
    let near_target = (price - target).abs() / target < config.proximity_tolerance;
    let act = match state {
        PositionState::HoldingQuote => Action::Buy {
            base_amount: snapshot.free_quote / price,
        },
        PositionState::HoldingBase => Action::Sell {
            base_amount: snapshot.free_base,
        },
    };

    if stale && near_target {
        return Decision::new(act, Branch::StaleProximity, Some(state), inputs);
    }

    let favorable = match state {
        PositionState::HoldingQuote => price < anchor.average_price.max(target),
        PositionState::HoldingBase => price > anchor.average_price,
    };
    if favorable {
        Decision::new(act, Branch::Favorable, Some(state), inputs)
    } else {
        Decision::hold(Branch::Unfavorable, Some(state), inputs)
    }
}

fn min_profit(
    snapshot: &MarketSnapshot,
    anchor: &Trade,
    state: PositionState,
    config: &DecisionConfig,
    mut inputs: DecisionInputs,
) -> Decision {
    if !anchor.is_well_formed() {
        return Decision::hold(Branch::InvalidAnchor, Some(state), inputs);
    }
    let price = snapshot.last_price;
    let margin = 1.0 + config.min_profit_rate;

    // Compare in the asset we would receive against what the anchor gave up.
    let (expected, required, act) = match state {
        PositionState::HoldingQuote => {
            let expected = snapshot.free_quote / price;
            (
                expected,
                anchor.base_amount * margin,
                Action::Buy { base_amount: expected },
            )
        }
        PositionState::HoldingBase => (
            snapshot.free_base * price,
            anchor.quote_amount * margin,
            Action::Sell {
                base_amount: snapshot.free_base,
            },
        ),
    };
    inputs.expected_amount = Some(expected);
    inputs.required_amount = Some(required);

    if expected > required {
        Decision::new(act, Branch::ProfitTargetMet, Some(state), inputs)
    } else {
        Decision::hold(Branch::ProfitTargetMissed, Some(state), inputs)
    }
}
