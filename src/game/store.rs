use log::{info, warn};

use crate::models::{GameEndState, Side, TurnState};

/// Server-owned values every participant reads: the turn and the terminal
/// outcome. Only the turn controller and the game-end evaluator write here.
#[derive(Debug, Clone, Default)]
pub struct ReplicatedStore {
    turn: TurnState,
    end: GameEndState,
}

impl ReplicatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn end(&self) -> GameEndState {
        self.end
    }

    pub fn current_side(&self) -> Side {
        self.turn.current_side
    }

    pub fn is_over(&self) -> bool {
        self.end.is_over
    }

    /// A match is running, or has run to a terminal state
    pub fn match_started(&self) -> bool {
        self.turn.game_in_progress || self.end.is_over
    }

    /// Opens a fresh match with `first` to move.
    ///
    /// Refused once a match has started: an in-progress or finished match is
    /// never reset from here.
    pub(crate) fn begin_match(&mut self, first: Side) -> bool {
        if self.match_started() {
            warn!("Refusing to reset a match that has already started");
            return false;
        }
        self.turn = TurnState {
            current_side: first,
            game_in_progress: true,
        };
        true
    }

    /// Hands the move to the other side and returns it
    pub(crate) fn advance_turn(&mut self) -> Side {
        self.turn.current_side = self.turn.current_side.opponent();
        self.turn.current_side
    }

    /// Writes the terminal state. Only the first write wins.
    pub(crate) fn conclude(&mut self, end: GameEndState) -> bool {
        if self.end.is_over {
            return false;
        }
        info!(
            "Match over: reason={:?} winner={}",
            end.reason,
            end.winner.map(Side::as_str).unwrap_or("none")
        );
        self.end = GameEndState { is_over: true, ..end };
        self.turn.game_in_progress = false;
        true
    }
}
