use chess::ChessMove;
use log::{info, warn};
use std::time::Instant;

use crate::error::{Rejection, RulesError};
use crate::game::clock::{MatchClock, TimeControl};
use crate::game::evaluator::GameEndEvaluator;
use crate::game::rules::{parse_square, RulesEngine};
use crate::game::store::ReplicatedStore;
use crate::models::{ClockSnapshot, GameEndState, MoveProposal, ServerMessage, Side};

/// Result of an accepted proposal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub mover: Side,
    /// Long algebraic form, e.g. `e7e8q`
    pub notation: String,
    pub board: String,
    pub turn: Side,
    pub clock: Option<ClockSnapshot>,
    /// Set when this move ended the match
    pub end: Option<GameEndState>,
}

impl AppliedMove {
    pub fn state_message(&self) -> ServerMessage {
        ServerMessage::State {
            board: self.board.clone(),
            turn: self.turn,
            clock: self.clock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Offered(Side),
    Agreed(GameEndState),
}

/// Canonical board plus turn, as sent on state and sync messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub board: String,
    pub turn: Side,
    pub clock: Option<ClockSnapshot>,
}

impl StateSnapshot {
    pub fn state_message(&self) -> ServerMessage {
        ServerMessage::State {
            board: self.board.clone(),
            turn: self.turn,
            clock: self.clock,
        }
    }

    pub fn sync_message(&self) -> ServerMessage {
        ServerMessage::Sync {
            board: self.board.clone(),
            turn: self.turn,
            clock: self.clock,
        }
    }
}

/// Sole arbiter of whether a proposed move is applied.
///
/// Owns the board, the replicated turn and end state, the clock and any
/// pending draw offer for one match.
pub struct TurnController<R: RulesEngine> {
    rules: R,
    store: ReplicatedStore,
    evaluator: GameEndEvaluator,
    clock: Option<MatchClock>,
    draw_offer: Option<Side>,
}

impl<R: RulesEngine> TurnController<R> {
    pub fn new(rules: R, evaluator: GameEndEvaluator, time_control: Option<TimeControl>) -> Self {
        Self {
            rules,
            store: ReplicatedStore::new(),
            evaluator,
            clock: time_control.map(MatchClock::new),
            draw_offer: None,
        }
    }

    pub fn store(&self) -> &ReplicatedStore {
        &self.store
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn draw_offer(&self) -> Option<Side> {
        self.draw_offer
    }

    pub fn time_control(&self) -> Option<TimeControl> {
        self.clock.as_ref().map(MatchClock::control)
    }

    /// Initializes a new match from the standard starting position.
    /// Returns false if a match has already started.
    pub fn start_match(&mut self, now: Instant) -> bool {
        if self.store.match_started() {
            return false;
        }
        self.rules.reset();
        self.open(now)
    }

    /// Initializes a new match from a board snapshot
    pub fn start_match_from(&mut self, snapshot: &str, now: Instant) -> Result<bool, RulesError> {
        if self.store.match_started() {
            return Ok(false);
        }
        self.rules.load(snapshot)?;
        Ok(self.open(now))
    }

    fn open(&mut self, now: Instant) -> bool {
        let first = self.rules.side_to_move();
        if !self.store.begin_match(first) {
            return false;
        }
        self.draw_offer = None;
        if let Some(clock) = &mut self.clock {
            clock.start(first, now);
        }
        info!("Match started, {} to move", first);
        true
    }

    pub fn snapshot(&self, now: Instant) -> StateSnapshot {
        StateSnapshot {
            board: self.rules.snapshot(),
            turn: self.store.current_side(),
            clock: self.clock.as_ref().map(|c| c.snapshot(now)),
        }
    }

    /// Validates and applies one proposal.
    ///
    /// On `Err` the board is untouched. A flag that fell before `now` ends
    /// the match as a timeout and is reported as `TimeExpired`.
    pub fn propose(
        &mut self,
        proposer: Option<Side>,
        proposal: &MoveProposal,
        now: Instant,
    ) -> Result<AppliedMove, Rejection> {
        let to_move = self.store.current_side();
        if self.check_clock(now).is_some() {
            return Err(Rejection::TimeExpired(to_move));
        }
        let chess_move = self.validate(proposer, proposal)?;
        let mover = self.store.current_side();

        if let Err(e) = self.rules.apply(chess_move) {
            warn!("Rules engine refused a validated move: {}", e);
            return Err(Rejection::Illegal(chess_move.to_string()));
        }
        let turn = self.store.advance_turn();
        self.draw_offer = None;

        let mut end = None;
        if let Some(clock) = &mut self.clock {
            if let Err(flagged) = clock.press(mover, now) {
                end = self.evaluator.timeout(&mut self.store, flagged);
            }
        }
        if end.is_none() {
            end = self.evaluator.after_move(&mut self.store, &self.rules, mover);
        }
        if end.is_some() {
            self.stop_clock(now);
        }

        info!("Applied {} by {}, {} to move", chess_move, mover, turn);
        Ok(AppliedMove {
            mover,
            notation: chess_move.to_string(),
            board: self.rules.snapshot(),
            turn,
            clock: self.clock.as_ref().map(|c| c.snapshot(now)),
            end,
        })
    }

    fn validate(&self, proposer: Option<Side>, proposal: &MoveProposal) -> Result<ChessMove, Rejection> {
        if self.store.is_over() {
            return Err(Rejection::GameOver);
        }
        if !self.store.turn().game_in_progress {
            return Err(Rejection::NotStarted);
        }

        let from = parse_square(&proposal.from)
            .ok_or_else(|| Rejection::MalformedSquare(proposal.from.clone()))?;
        let (piece, _) = self
            .rules
            .piece_at(from)
            .ok_or_else(|| Rejection::NoPiece(proposal.from.clone()))?;

        let current = self.store.current_side();
        if piece != current {
            return Err(Rejection::NotYourTurn { piece, current });
        }
        match proposer {
            None => return Err(Rejection::Spectator),
            Some(side) if side != piece => return Err(Rejection::NotYourPiece { piece }),
            Some(_) => {}
        }

        let to = parse_square(&proposal.to)
            .ok_or_else(|| Rejection::MalformedSquare(proposal.to.clone()))?;
        let chess_move = ChessMove::new(from, to, proposal.promotion.piece());
        if !self.rules.is_legal(chess_move) {
            return Err(Rejection::Illegal(chess_move.to_string()));
        }
        Ok(chess_move)
    }

    /// Legal moves of the piece on `square`, in long algebraic form
    pub fn legal_moves(&self, square: &str) -> Result<Vec<String>, Rejection> {
        let from = parse_square(square).ok_or_else(|| Rejection::MalformedSquare(square.to_string()))?;
        if self.rules.piece_at(from).is_none() {
            return Err(Rejection::NoPiece(square.to_string()));
        }
        Ok(self
            .rules
            .legal_moves_from(from)
            .into_iter()
            .map(|m| m.to_string())
            .collect())
    }

    pub fn resign(&mut self, side: Side, now: Instant) -> Result<GameEndState, Rejection> {
        self.ensure_running()?;
        let end = self
            .evaluator
            .resign(&mut self.store, side)
            .ok_or(Rejection::GameOver)?;
        self.stop_clock(now);
        Ok(end)
    }

    /// Offering while the opponent's offer is pending accepts it
    pub fn offer_draw(&mut self, side: Side, now: Instant) -> Result<DrawOutcome, Rejection> {
        self.ensure_running()?;
        if self.draw_offer == Some(side.opponent()) {
            return self.accept_draw(side, now).map(DrawOutcome::Agreed);
        }
        self.draw_offer = Some(side);
        Ok(DrawOutcome::Offered(side))
    }

    pub fn accept_draw(&mut self, side: Side, now: Instant) -> Result<GameEndState, Rejection> {
        self.ensure_running()?;
        if self.draw_offer != Some(side.opponent()) {
            return Err(Rejection::NoDrawOffer);
        }
        let end = self
            .evaluator
            .agree_draw(&mut self.store)
            .ok_or(Rejection::GameOver)?;
        self.draw_offer = None;
        self.stop_clock(now);
        Ok(end)
    }

    /// Ends the match if the side to move has run out of time
    pub fn check_clock(&mut self, now: Instant) -> Option<GameEndState> {
        if !self.store.turn().game_in_progress {
            return None;
        }
        let flagged = self.clock.as_ref()?.expired(now)?;
        let end = self.evaluator.timeout(&mut self.store, flagged)?;
        self.stop_clock(now);
        Some(end)
    }

    fn ensure_running(&self) -> Result<(), Rejection> {
        if self.store.is_over() {
            Err(Rejection::GameOver)
        } else if !self.store.turn().game_in_progress {
            Err(Rejection::NotStarted)
        } else {
            Ok(())
        }
    }

    fn stop_clock(&mut self, now: Instant) {
        if let Some(clock) = &mut self.clock {
            clock.stop(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::evaluator::full_scan;
    use crate::game::rules::{ChessRules, PositionStatus};
    use crate::models::{EndReason, Promotion};
    use chess::ALL_SQUARES;
    use std::time::Duration;

    fn controller() -> TurnController<ChessRules> {
        let mut controller = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), None);
        assert!(controller.start_match(Instant::now()));
        controller
    }

    fn mv(from: &str, to: &str) -> MoveProposal {
        MoveProposal::new(from, to)
    }

    #[test]
    fn legal_move_is_applied_and_turn_flips() {
        let mut c = controller();
        let before = c.rules().snapshot();

        let applied = c.propose(Some(Side::White), &mv("e2", "e4"), Instant::now()).unwrap();

        assert_eq!(applied.mover, Side::White);
        assert_eq!(applied.turn, Side::Black);
        assert_eq!(applied.notation, "e2e4");
        assert_ne!(applied.board, before);
        assert_eq!(applied.board, c.rules().snapshot());
        assert_eq!(c.store().current_side(), Side::Black);
        assert_eq!(applied.end, None);
    }

    #[test]
    fn turn_alternates_with_every_accepted_move() {
        let mut c = controller();
        let line = [
            ("e2", "e4", Side::White),
            ("e7", "e5", Side::Black),
            ("g1", "f3", Side::White),
            ("b8", "c6", Side::Black),
            ("f1", "b5", Side::White),
            ("a7", "a6", Side::Black),
        ];
        for (n, (from, to, side)) in line.into_iter().enumerate() {
            c.propose(Some(side), &mv(from, to), Instant::now()).unwrap();
            let expected = if (n + 1) % 2 == 0 { Side::White } else { Side::Black };
            assert_eq!(c.store().current_side(), expected, "after move {}", n + 1);
            assert_eq!(c.rules().side_to_move(), expected);
        }
    }

    #[test]
    fn out_of_turn_proposals_never_touch_the_board() {
        let mut c = controller();
        let before = c.rules().snapshot();

        for from in ALL_SQUARES {
            for to in ALL_SQUARES {
                let proposal = mv(&from.to_string(), &to.to_string());
                assert!(c.propose(Some(Side::Black), &proposal, Instant::now()).is_err());
            }
        }

        assert_eq!(c.rules().snapshot(), before);
        assert_eq!(c.store().current_side(), Side::White);
    }

    #[test]
    fn validation_order_is_respected() {
        let mut c = controller();
        let now = Instant::now();

        assert_eq!(
            c.propose(Some(Side::White), &mv("e3", "e4"), now),
            Err(Rejection::NoPiece("e3".into()))
        );
        assert_eq!(
            c.propose(Some(Side::Black), &mv("e7", "e5"), now),
            Err(Rejection::NotYourTurn {
                piece: Side::Black,
                current: Side::White
            })
        );
        assert_eq!(
            c.propose(Some(Side::Black), &mv("e2", "e4"), now),
            Err(Rejection::NotYourPiece { piece: Side::White })
        );
        assert_eq!(c.propose(None, &mv("e2", "e4"), now), Err(Rejection::Spectator));
        assert_eq!(
            c.propose(Some(Side::White), &mv("e2", "e5"), now),
            Err(Rejection::Illegal("e2e5".into()))
        );
        assert_eq!(
            c.propose(Some(Side::White), &mv("x9", "e4"), now),
            Err(Rejection::MalformedSquare("x9".into()))
        );
    }

    #[test]
    fn nothing_moves_before_the_match_starts() {
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), None);
        assert_eq!(
            c.propose(Some(Side::White), &mv("e2", "e4"), Instant::now()),
            Err(Rejection::NotStarted)
        );
    }

    #[test]
    fn checkmate_ends_the_match_and_freezes_it() {
        let mut c = controller();
        let now = Instant::now();
        c.propose(Some(Side::White), &mv("f2", "f3"), now).unwrap();
        c.propose(Some(Side::Black), &mv("e7", "e5"), now).unwrap();
        c.propose(Some(Side::White), &mv("g2", "g4"), now).unwrap();
        let mate = c.propose(Some(Side::Black), &mv("d8", "h4"), now).unwrap();

        let end = GameEndState::over(EndReason::Checkmate, Some(Side::Black));
        assert_eq!(mate.end, Some(end));
        assert_eq!(full_scan(c.rules()), Some(PositionStatus::Checkmate));

        let board = c.rules().snapshot();
        assert_eq!(c.propose(Some(Side::White), &mv("a2", "a3"), now), Err(Rejection::GameOver));
        assert_eq!(c.propose(Some(Side::Black), &mv("a7", "a6"), now), Err(Rejection::GameOver));
        assert_eq!(c.resign(Side::White, now), Err(Rejection::GameOver));
        assert_eq!(c.rules().snapshot(), board);
        assert_eq!(c.store().end(), end);
    }

    #[test]
    fn promotion_kind_is_part_of_legality() {
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), None);
        c.start_match_from("8/P6k/8/8/8/8/8/K7 w - - 0 1", Instant::now()).unwrap();

        assert_eq!(
            c.propose(Some(Side::White), &mv("a7", "a8"), Instant::now()),
            Err(Rejection::Illegal("a7a8".into()))
        );
        let applied = c
            .propose(Some(Side::White), &mv("a7", "a8").promoting(Promotion::Knight), Instant::now())
            .unwrap();
        assert_eq!(applied.notation, "a7a8n");
        assert_eq!(applied.end, None);
    }

    #[test]
    fn capture_leaving_bare_kings_is_a_draw() {
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), None);
        c.start_match_from("8/8/8/4k3/2n5/3K4/8/8 w - - 0 1", Instant::now()).unwrap();

        let applied = c.propose(Some(Side::White), &mv("d3", "c4"), Instant::now()).unwrap();
        assert_eq!(applied.end, Some(GameEndState::over(EndReason::Draw, None)));
    }

    #[test]
    fn draw_offer_and_acceptance() {
        let mut c = controller();
        let now = Instant::now();

        assert_eq!(c.accept_draw(Side::Black, now), Err(Rejection::NoDrawOffer));
        assert_eq!(c.offer_draw(Side::White, now), Ok(DrawOutcome::Offered(Side::White)));
        // the offerer cannot accept its own offer
        assert_eq!(c.accept_draw(Side::White, now), Err(Rejection::NoDrawOffer));

        let end = c.accept_draw(Side::Black, now).unwrap();
        assert_eq!(end, GameEndState::over(EndReason::Draw, None));
    }

    #[test]
    fn a_move_withdraws_the_pending_offer() {
        let mut c = controller();
        let now = Instant::now();
        c.offer_draw(Side::White, now).unwrap();
        c.propose(Some(Side::White), &mv("e2", "e4"), now).unwrap();
        assert_eq!(c.draw_offer(), None);
        assert_eq!(c.accept_draw(Side::Black, now), Err(Rejection::NoDrawOffer));
    }

    #[test]
    fn crossing_offers_agree_a_draw() {
        let mut c = controller();
        let now = Instant::now();
        c.offer_draw(Side::Black, now).unwrap();
        let outcome = c.offer_draw(Side::White, now).unwrap();
        assert_eq!(outcome, DrawOutcome::Agreed(GameEndState::over(EndReason::Draw, None)));
    }

    #[test]
    fn flag_fall_is_a_timeout_loss() {
        let control = TimeControl {
            initial: Duration::from_secs(30),
            increment: Duration::ZERO,
        };
        let t0 = Instant::now();
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), Some(control));
        c.start_match(t0);
        c.propose(Some(Side::White), &mv("e2", "e4"), t0 + Duration::from_secs(5)).unwrap();

        assert_eq!(c.check_clock(t0 + Duration::from_secs(20)), None);
        let end = c.check_clock(t0 + Duration::from_secs(40)).unwrap();
        assert_eq!(end, GameEndState::over(EndReason::Timeout, Some(Side::White)));
        assert_eq!(c.check_clock(t0 + Duration::from_secs(50)), None);
    }

    #[test]
    fn move_after_the_flag_fell_is_not_applied() {
        let control = TimeControl {
            initial: Duration::from_secs(30),
            increment: Duration::ZERO,
        };
        let t0 = Instant::now();
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), Some(control));
        c.start_match(t0);
        let board = c.rules().snapshot();

        assert_eq!(
            c.propose(Some(Side::White), &mv("e2", "e4"), t0 + Duration::from_secs(31)),
            Err(Rejection::TimeExpired(Side::White))
        );
        assert_eq!(c.rules().snapshot(), board);
        assert_eq!(c.store().current_side(), Side::White);
        assert_eq!(c.store().end(), GameEndState::over(EndReason::Timeout, Some(Side::Black)));
    }

    #[test]
    fn unbounded_increment_does_not_overflow_the_clock() {
        let control = TimeControl {
            initial: Duration::from_secs(60),
            increment: Duration::MAX,
        };
        let t0 = Instant::now();
        let mut c = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), Some(control));
        c.start_match(t0);

        let applied = c.propose(Some(Side::White), &mv("e2", "e4"), t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(applied.end, None);
        assert_eq!(applied.clock.map(|clock| clock.white_time_ms), Some(u64::MAX));
    }
}
