//! Decision engine: a pure function from cycle inputs to an action.

pub mod config;
pub mod decide;

pub use config::{DecisionConfig, DecisionConfigError, DecisionMode};
pub use decide::{decide, Action, Branch, Decision, DecisionInputs, PositionState};
