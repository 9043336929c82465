use serde::{Deserialize, Serialize};

use crate::models::{
    ClockSnapshot, GameEndState, MoveProposal, ParticipantId, Promotion, RejoinToken, Side,
};

/// Message sent from a participant to the authority
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ClientMessage {
    Create {
        #[serde(default)]
        session: Option<String>,
        #[serde(default)]
        start_time_minutes: Option<u64>,
        #[serde(default)]
        increment_seconds: Option<u64>,
    },
    /// `participant` and `token` together reclaim an earlier identity
    Join {
        session: String,
        #[serde(default)]
        participant: Option<ParticipantId>,
        #[serde(default)]
        token: Option<RejoinToken>,
    },
    Move {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Promotion,
    },
    GetMoves {
        square: String,
    },
    Resign,
    OfferDraw,
    AcceptDraw,
    TimeSync,
    Teardown,
}

impl From<MoveProposal> for ClientMessage {
    fn from(proposal: MoveProposal) -> Self {
        ClientMessage::Move {
            from: proposal.from,
            to: proposal.to,
            promotion: proposal.promotion,
        }
    }
}

/// Message sent from the authority to participants
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionCreated {
        session: String,
        participant: ParticipantId,
        token: RejoinToken,
        side: Side,
    },
    Joined {
        session: String,
        participant: ParticipantId,
        token: RejoinToken,
        side: Option<Side>,
    },
    /// Canonical board and turn, sent to everyone
    State {
        board: String,
        turn: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<ClockSnapshot>,
    },
    /// Same payload as `State`, addressed to one (re)joining participant
    Sync {
        board: String,
        turn: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<ClockSnapshot>,
    },
    GameEnd(GameEndState),
    MoveRejected {
        from: String,
        to: String,
        reason: String,
        board: String,
    },
    AvailableMoves {
        square: String,
        moves: Vec<String>,
    },
    DrawOffered {
        by: Side,
    },
    /// Peers are announced by seat only; identities stay private
    ParticipantJoined {
        side: Option<Side>,
    },
    ParticipantLeft {
        side: Option<Side>,
    },
    SessionClosed,
    Error {
        code: ErrorCode,
        error: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, error: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SessionCreated { .. } => "session_created",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::State { .. } => "state",
            ServerMessage::Sync { .. } => "sync",
            ServerMessage::GameEnd(_) => "game_end",
            ServerMessage::MoveRejected { .. } => "move_rejected",
            ServerMessage::AvailableMoves { .. } => "available_moves",
            ServerMessage::DrawOffered { .. } => "draw_offered",
            ServerMessage::ParticipantJoined { .. } => "participant_joined",
            ServerMessage::ParticipantLeft { .. } => "participant_left",
            ServerMessage::SessionClosed => "session_closed",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    SessionNotFound,
    SessionExists,
    NotInSession,
    NotHost,
    RejoinRefused,
    Rejected,
}
