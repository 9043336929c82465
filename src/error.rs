use thiserror::Error;

use crate::models::{ParticipantId, Side};

/// Why the authority refused a move proposal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("game is already over")]
    GameOver,
    #[error("match has not started")]
    NotStarted,
    #[error("malformed square: {0}")]
    MalformedSquare(String),
    #[error("no piece on {0}")]
    NoPiece(String),
    #[error("it is {current}'s turn, piece on square belongs to {piece}")]
    NotYourTurn { piece: Side, current: Side },
    #[error("piece belongs to {piece}")]
    NotYourPiece { piece: Side },
    #[error("spectators cannot move")]
    Spectator,
    #[error("illegal move {0}")]
    Illegal(String),
    #[error("{0} ran out of time")]
    TimeExpired(Side),
    #[error("no draw offer to accept")]
    NoDrawOffer,
}

/// Failures of session bookkeeping on the authority
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} already exists")]
    CodeInUse(String),
    #[error("session {0} not found")]
    NotFound(String),
    #[error("invalid session code {0:?}")]
    InvalidCode(String),
    #[error("rejoin refused for {0}")]
    RejoinRefused(ParticipantId),
}

/// A requested time control outside the accepted range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeControlError {
    #[error("start time of {0} minutes is too long")]
    StartTooLong(u64),
    #[error("increment of {0} seconds is too long")]
    IncrementTooLong(u64),
}

/// Failures of the rules engine adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    #[error("invalid board snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("move {0} is not legal in this position")]
    IllegalMove(String),
}

/// Failures on the participant side of the protocol
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
    #[error("timed out waiting for state sync")]
    SyncTimeout,
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("server refused: {0}")]
    Server(String),
    #[error("rejoin refused: {0}")]
    RejoinRefused(String),
    #[error("no session to rejoin")]
    NoRememberedSession,
    #[error("not connected")]
    NotConnected,
    #[error("could not rejoin after {attempts} attempts")]
    RejoinExhausted { attempts: u32 },
    #[error("rejoin cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether another connection attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SyncError::SessionNotFound(_)
                | SyncError::RejoinRefused(_)
                | SyncError::NoRememberedSession
                | SyncError::Cancelled
        )
    }
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}
