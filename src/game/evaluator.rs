//! Terminal-condition detection.
//!
//! Every write goes through `ReplicatedStore::conclude`, which refuses once
//! the match is over, so any number of repeated triggers leaves the first
//! outcome in place.

use chess::ALL_SQUARES;
use log::info;

use crate::game::rules::{PositionStatus, RulesEngine};
use crate::game::store::ReplicatedStore;
use crate::models::{EndReason, GameEndState, Side};

#[derive(Debug, Clone, Copy, Default)]
pub struct GameEndEvaluator;

impl GameEndEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Runs after `mover`'s move has been applied.
    ///
    /// Returns the terminal state only on the call that wrote it.
    pub fn after_move(
        &self,
        store: &mut ReplicatedStore,
        rules: &dyn RulesEngine,
        mover: Side,
    ) -> Option<GameEndState> {
        if store.is_over() {
            return None;
        }
        let end = classify(rules, mover)?;
        self.write(store, end)
    }

    /// On-demand evaluation of the current position
    pub fn evaluate(&self, store: &mut ReplicatedStore, rules: &dyn RulesEngine) -> Option<GameEndState> {
        let mover = rules.side_to_move().opponent();
        self.after_move(store, rules, mover)
    }

    pub fn resign(&self, store: &mut ReplicatedStore, side: Side) -> Option<GameEndState> {
        self.write(store, GameEndState::over(EndReason::Resignation, Some(side.opponent())))
    }

    pub fn agree_draw(&self, store: &mut ReplicatedStore) -> Option<GameEndState> {
        self.write(store, GameEndState::over(EndReason::Draw, None))
    }

    /// `side` ran out of time
    pub fn timeout(&self, store: &mut ReplicatedStore, side: Side) -> Option<GameEndState> {
        self.write(store, GameEndState::over(EndReason::Timeout, Some(side.opponent())))
    }

    fn write(&self, store: &mut ReplicatedStore, end: GameEndState) -> Option<GameEndState> {
        if !store.turn().game_in_progress || store.is_over() {
            return None;
        }
        store.conclude(end).then(|| store.end())
    }
}

/// Classifies the position reported by the rules engine after `mover` moved
pub fn classify(rules: &dyn RulesEngine, mover: Side) -> Option<GameEndState> {
    match rules.status() {
        PositionStatus::Checkmate => Some(GameEndState::over(EndReason::Checkmate, Some(mover))),
        PositionStatus::Stalemate => Some(GameEndState::over(EndReason::Stalemate, None)),
        PositionStatus::Ongoing | PositionStatus::Check => {
            if rules.insufficient_material() {
                info!("Insufficient material, declaring a draw");
                Some(GameEndState::over(EndReason::Draw, None))
            } else {
                None
            }
        }
    }
}

/// Square-by-square check for mate or stalemate of the side to move.
///
/// Agrees with the engine's own status; kept as an independent cross-check.
pub fn full_scan(rules: &dyn RulesEngine) -> Option<PositionStatus> {
    let to_move = rules.side_to_move();
    let has_move = ALL_SQUARES.iter().any(|&square| {
        matches!(rules.piece_at(square), Some((side, _)) if side == to_move)
            && !rules.legal_moves_from(square).is_empty()
    });

    if has_move {
        None
    } else if rules.in_check() {
        Some(PositionStatus::Checkmate)
    } else {
        Some(PositionStatus::Stalemate)
    }
}
