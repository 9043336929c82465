use chess::{Color, Piece};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One of the two players' colours
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// The other side
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Self {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

/// Why a match ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    #[default]
    None,
    Checkmate,
    Stalemate,
    Resignation,
    Timeout,
    Draw,
}

/// Whose move it is and whether a match is running
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnState {
    pub current_side: Side,
    pub game_in_progress: bool,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            current_side: Side::White,
            game_in_progress: false,
        }
    }
}

/// Terminal outcome of a match. Immutable once `is_over` is set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GameEndState {
    pub is_over: bool,
    #[serde(with = "side_or_none")]
    pub winner: Option<Side>,
    pub reason: EndReason,
}

impl GameEndState {
    pub fn over(reason: EndReason, winner: Option<Side>) -> Self {
        Self {
            is_over: true,
            winner,
            reason,
        }
    }
}

/// Promotion piece requested with a move
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Promotion {
    #[default]
    None,
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    pub fn piece(self) -> Option<Piece> {
        match self {
            Promotion::None => None,
            Promotion::Queen => Some(Piece::Queen),
            Promotion::Rook => Some(Piece::Rook),
            Promotion::Bishop => Some(Piece::Bishop),
            Promotion::Knight => Some(Piece::Knight),
        }
    }
}

/// An unvalidated request to move a piece
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MoveProposal {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub promotion: Promotion,
}

impl MoveProposal {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: Promotion::None,
        }
    }

    pub fn promoting(mut self, promotion: Promotion) -> Self {
        self.promotion = promotion;
        self
    }
}

/// Stable identity of a participant across reconnects
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Secret that lets a participant reclaim its identity after a drop.
///
/// Only ever sent to the participant it belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RejoinToken(pub Uuid);

impl RejoinToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RejoinToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Remaining time on both clocks
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSnapshot {
    pub white_time_ms: u64,
    pub black_time_ms: u64,
    pub increment_ms: u64,
    pub active: Option<Side>,
}

/// Serializes `Option<Side>` as the side name or `"none"`.
pub mod side_or_none {
    use super::Side;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Side>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map(Side::as_str).unwrap_or("none"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Side>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "white" => Ok(Some(Side::White)),
            "black" => Ok(Some(Side::Black)),
            "none" => Ok(None),
            other => Err(serde::de::Error::unknown_variant(other, &["white", "black", "none"])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_serializes_as_none_when_absent() {
        let end = GameEndState::over(EndReason::Stalemate, None);
        let json = serde_json::to_value(end).unwrap();
        assert_eq!(json["winner"], "none");
        assert_eq!(json["reason"], "stalemate");
        assert_eq!(json["is_over"], true);
    }

    #[test]
    fn promotion_defaults_to_none_on_the_wire() {
        let proposal: MoveProposal = serde_json::from_str(r#"{"from":"e2","to":"e4"}"#).unwrap();
        assert_eq!(proposal.promotion, Promotion::None);
    }
}
