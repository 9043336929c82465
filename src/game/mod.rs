pub mod clock;
pub mod controller;
pub mod evaluator;
pub mod rules;
pub mod store;

pub use clock::{MatchClock, TimeControl};
pub use controller::{AppliedMove, DrawOutcome, StateSnapshot, TurnController};
pub use evaluator::GameEndEvaluator;
pub use rules::{ChessRules, PositionStatus, RulesEngine};
pub use store::ReplicatedStore;
