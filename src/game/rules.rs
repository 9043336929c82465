//! Narrow interface to the rules engine.
//!
//! The synchronization core never looks inside a board: it asks the
//! `RulesEngine` for pieces, legality, position status and the canonical
//! snapshot. `ChessRules` is the production engine, backed by the `chess`
//! crate.

use chess::{Board, BoardStatus, ChessMove, MoveGen, Piece, Square, ALL_SQUARES};
use std::str::FromStr;

use crate::error::RulesError;
use crate::models::Side;

/// Status of the position for the side to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Ongoing,
    Check,
    Checkmate,
    Stalemate,
}

pub trait RulesEngine: Send {
    /// Back to the standard starting position
    fn reset(&mut self);

    /// Replace the position with a canonical snapshot
    fn load(&mut self, snapshot: &str) -> Result<(), RulesError>;

    /// Canonical snapshot (FEN) of the current position
    fn snapshot(&self) -> String;

    fn side_to_move(&self) -> Side;

    fn piece_at(&self, square: Square) -> Option<(Side, Piece)>;

    fn legal_moves_from(&self, square: Square) -> Vec<ChessMove>;

    fn is_legal(&self, chess_move: ChessMove) -> bool;

    fn apply(&mut self, chess_move: ChessMove) -> Result<(), RulesError>;

    fn in_check(&self) -> bool;

    fn status(&self) -> PositionStatus;

    /// Neither side can possibly deliver mate
    fn insufficient_material(&self) -> bool;
}

/// Parses a square such as `"e4"` (case-insensitive)
pub fn parse_square(square: &str) -> Option<Square> {
    Square::from_str(&square.trim().to_lowercase()).ok()
}

/// Rules engine over `chess::Board`
#[derive(Debug, Clone, Default)]
pub struct ChessRules {
    board: Board,
}

impl ChessRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: &str) -> Result<Self, RulesError> {
        let mut rules = Self::new();
        rules.load(snapshot)?;
        Ok(rules)
    }
}

impl RulesEngine for ChessRules {
    fn reset(&mut self) {
        self.board = Board::default();
    }

    fn load(&mut self, snapshot: &str) -> Result<(), RulesError> {
        self.board = Board::from_str(snapshot)
            .map_err(|e| RulesError::InvalidSnapshot(format!("{snapshot}: {e:?}")))?;
        Ok(())
    }

    fn snapshot(&self) -> String {
        self.board.to_string()
    }

    fn side_to_move(&self) -> Side {
        self.board.side_to_move().into()
    }

    fn piece_at(&self, square: Square) -> Option<(Side, Piece)> {
        let piece = self.board.piece_on(square)?;
        let color = self.board.color_on(square)?;
        Some((color.into(), piece))
    }

    fn legal_moves_from(&self, square: Square) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.board)
            .filter(|m| m.get_source() == square)
            .collect()
    }

    fn is_legal(&self, chess_move: ChessMove) -> bool {
        MoveGen::new_legal(&self.board).any(|m| m == chess_move)
    }

    fn apply(&mut self, chess_move: ChessMove) -> Result<(), RulesError> {
        if !self.is_legal(chess_move) {
            return Err(RulesError::IllegalMove(chess_move.to_string()));
        }
        self.board = self.board.make_move_new(chess_move);
        Ok(())
    }

    fn in_check(&self) -> bool {
        self.board.checkers().popcnt() > 0
    }

    fn status(&self) -> PositionStatus {
        match self.board.status() {
            BoardStatus::Checkmate => PositionStatus::Checkmate,
            BoardStatus::Stalemate => PositionStatus::Stalemate,
            BoardStatus::Ongoing if self.in_check() => PositionStatus::Check,
            BoardStatus::Ongoing => PositionStatus::Ongoing,
        }
    }

    fn insufficient_material(&self) -> bool {
        has_insufficient_material(&self.board)
    }
}

#[derive(Default)]
struct Material {
    heavy_or_pawns: u32,
    knights: u32,
    bishops: u32,
    // square colours of this side's bishops: [light, dark]
    bishop_squares: [bool; 2],
}

impl Material {
    fn minors(&self) -> u32 {
        self.knights + self.bishops
    }
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(board: &Board) -> bool {
    let mut white = Material::default();
    let mut black = Material::default();

    for square in ALL_SQUARES {
        let (Some(piece), Some(color)) = (board.piece_on(square), board.color_on(square)) else {
            continue;
        };
        let side = match Side::from(color) {
            Side::White => &mut white,
            Side::Black => &mut black,
        };
        match piece {
            Piece::Pawn | Piece::Rook | Piece::Queen => side.heavy_or_pawns += 1,
            Piece::Knight => side.knights += 1,
            Piece::Bishop => {
                side.bishops += 1;
                let dark = (square.get_rank().to_index() + square.get_file().to_index()) % 2 == 0;
                side.bishop_squares[dark as usize] = true;
            }
            Piece::King => {}
        }
    }

    if white.heavy_or_pawns > 0 || black.heavy_or_pawns > 0 {
        return false;
    }

    // King vs King, or a single minor piece on the board
    if white.minors() + black.minors() <= 1 {
        return true;
    }

    // King and Bishop vs King and Bishop, bishops on the same colour
    white.knights == 0
        && black.knights == 0
        && white.bishops == 1
        && black.bishops == 1
        && white.bishop_squares == black.bishop_squares
}
