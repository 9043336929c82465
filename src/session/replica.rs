//! Participant-side mirror of the authoritative match state.
//!
//! The replica never applies a move on its own: a proposal is only recorded
//! as pending until the authority answers with a state or a rejection.

use log::{debug, info};

use crate::models::{
    ClientMessage, ClockSnapshot, ErrorCode, GameEndState, MoveProposal, ParticipantId,
    RejoinToken, ServerMessage, Side,
};

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Joined {
        session: String,
        participant: ParticipantId,
        side: Option<Side>,
    },
    /// Broadcast after an accepted move or at match start
    StateChanged {
        board: String,
        turn: Side,
        clock: Option<ClockSnapshot>,
    },
    /// Targeted state after (re)joining or a time sync
    Synced {
        board: String,
        turn: Side,
        clock: Option<ClockSnapshot>,
    },
    /// The pending proposal was refused; `board` is the authoritative position
    MoveReverted {
        from: String,
        to: String,
        reason: String,
        board: String,
    },
    GameEnded(GameEndState),
    AvailableMoves {
        square: String,
        moves: Vec<String>,
    },
    DrawOffered {
        by: Side,
    },
    PeerJoined {
        side: Option<Side>,
    },
    PeerLeft {
        side: Option<Side>,
    },
    SessionClosed,
    ServerError {
        code: ErrorCode,
        error: String,
    },
    Disconnected,
    Reconnecting {
        attempt: u32,
    },
    Rejoined,
    /// Terminal: the remembered session has been forgotten
    RejoinFailed {
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ReplicaState {
    session: Option<String>,
    participant: Option<ParticipantId>,
    token: Option<RejoinToken>,
    side: Option<Side>,
    board: Option<String>,
    turn: Option<Side>,
    clock: Option<ClockSnapshot>,
    end: GameEndState,
    draw_offer: Option<Side>,
    pending: Option<MoveProposal>,
}

impl ReplicaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    pub fn token(&self) -> Option<RejoinToken> {
        self.token
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    /// Last board received from the authority
    pub fn board(&self) -> Option<&str> {
        self.board.as_deref()
    }

    pub fn turn(&self) -> Option<Side> {
        self.turn
    }

    pub fn clock(&self) -> Option<ClockSnapshot> {
        self.clock
    }

    pub fn end(&self) -> GameEndState {
        self.end
    }

    pub fn draw_offer(&self) -> Option<Side> {
        self.draw_offer
    }

    pub fn pending(&self) -> Option<&MoveProposal> {
        self.pending.as_ref()
    }

    pub fn is_my_turn(&self) -> bool {
        !self.end.is_over && self.side.is_some() && self.side == self.turn
    }

    /// Records `proposal` as pending and returns the message to send
    pub fn propose(&mut self, proposal: MoveProposal) -> ClientMessage {
        debug!("Proposing {}{}", proposal.from, proposal.to);
        self.pending = Some(proposal.clone());
        proposal.into()
    }

    /// Folds one authority message into the replica
    pub fn apply(&mut self, message: ServerMessage) -> Vec<ClientEvent> {
        match message {
            ServerMessage::SessionCreated {
                session,
                participant,
                token,
                side,
            } => self.joined(session, participant, token, Some(side)),
            ServerMessage::Joined {
                session,
                participant,
                token,
                side,
            } => self.joined(session, participant, token, side),
            ServerMessage::State { board, turn, clock } => {
                self.adopt(&board, turn, clock);
                self.draw_offer = None;
                vec![ClientEvent::StateChanged { board, turn, clock }]
            }
            ServerMessage::Sync { board, turn, clock } => {
                self.adopt(&board, turn, clock);
                vec![ClientEvent::Synced { board, turn, clock }]
            }
            ServerMessage::GameEnd(end) => {
                if self.end.is_over {
                    debug!("Ignoring repeated game end");
                    return Vec::new();
                }
                info!("Game over: {:?}", end.reason);
                self.end = end;
                self.pending = None;
                self.draw_offer = None;
                vec![ClientEvent::GameEnded(end)]
            }
            ServerMessage::MoveRejected {
                from,
                to,
                reason,
                board,
            } => {
                info!("Move {}{} rejected: {}", from, to, reason);
                self.pending = None;
                self.board = Some(board.clone());
                vec![ClientEvent::MoveReverted {
                    from,
                    to,
                    reason,
                    board,
                }]
            }
            ServerMessage::AvailableMoves { square, moves } => {
                vec![ClientEvent::AvailableMoves { square, moves }]
            }
            ServerMessage::DrawOffered { by } => {
                self.draw_offer = Some(by);
                vec![ClientEvent::DrawOffered { by }]
            }
            ServerMessage::ParticipantJoined { side } => vec![ClientEvent::PeerJoined { side }],
            ServerMessage::ParticipantLeft { side } => vec![ClientEvent::PeerLeft { side }],
            ServerMessage::SessionClosed => {
                info!("Session {:?} closed", self.session);
                *self = Self::default();
                vec![ClientEvent::SessionClosed]
            }
            ServerMessage::Error { code, error } => vec![ClientEvent::ServerError { code, error }],
        }
    }

    /// Anything but a rejoin of the same identity starts from a clean slate
    fn joined(
        &mut self,
        session: String,
        participant: ParticipantId,
        token: RejoinToken,
        side: Option<Side>,
    ) -> Vec<ClientEvent> {
        let rejoin = self.session.as_deref() == Some(session.as_str()) && self.participant == Some(participant);
        if !rejoin {
            *self = Self::default();
        }
        self.session = Some(session.clone());
        self.participant = Some(participant);
        self.token = Some(token);
        self.side = side;
        vec![ClientEvent::Joined {
            session,
            participant,
            side,
        }]
    }

    fn adopt(&mut self, board: &str, turn: Side, clock: Option<ClockSnapshot>) {
        self.board = Some(board.to_string());
        self.turn = Some(turn);
        self.clock = clock;
        self.pending = None;
    }
}
