//! Per-match protocol core.
//!
//! `MatchHost` ties the session manager to the turn controller and turns
//! every inbound request into a list of addressed outbound messages. It does
//! no I/O; the match authority actor delivers the dispatches.

use log::{info, warn};
use std::time::Instant;
use tokio::sync::broadcast;

use crate::error::{Rejection, SessionError};
use crate::game::controller::{DrawOutcome, TurnController};
use crate::game::rules::RulesEngine;
use crate::models::{
    ClientMessage, ErrorCode, GameEndState, MoveProposal, ParticipantId, RejoinToken,
    ServerMessage, Side,
};
use crate::session::manager::SessionManager;

const EVENT_CAPACITY: usize = 64;

/// Who receives an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    AllExcept(ParticipantId),
    One(ParticipantId),
}

impl Target {
    pub fn includes(&self, participant: ParticipantId) -> bool {
        match self {
            Target::All => true,
            Target::AllExcept(excluded) => *excluded != participant,
            Target::One(only) => *only == participant,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub target: Target,
    pub message: ServerMessage,
}

impl Dispatch {
    pub fn all(message: ServerMessage) -> Self {
        Self {
            target: Target::All,
            message,
        }
    }

    pub fn all_except(participant: ParticipantId, message: ServerMessage) -> Self {
        Self {
            target: Target::AllExcept(participant),
            message,
        }
    }

    pub fn one(participant: ParticipantId, message: ServerMessage) -> Self {
        Self {
            target: Target::One(participant),
            message,
        }
    }
}

/// Protocol-level events for observers of a match
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    MatchStarted,
    MoveApplied {
        mover: Side,
        notation: String,
        board: String,
        turn: Side,
    },
    MatchEnded(GameEndState),
    ParticipantJoined {
        participant: ParticipantId,
        side: Option<Side>,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },
    Closed,
}

pub struct MatchHost<R: RulesEngine> {
    session: SessionManager,
    controller: TurnController<R>,
    events: broadcast::Sender<MatchEvent>,
    closed: bool,
}

impl<R: RulesEngine> MatchHost<R> {
    pub fn new(session: SessionManager, controller: TurnController<R>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session,
            controller,
            events,
            closed: false,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn controller(&self) -> &TurnController<R> {
        &self.controller
    }

    /// Events stop when the host is dropped
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn publish(&self, event: MatchEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Checks a reclaimed identity before it is connected. Fresh identities
    /// are minted by the authority and need no token.
    pub fn admit(&self, participant: ParticipantId, claim: Option<RejoinToken>) -> Result<(), SessionError> {
        match claim {
            Some(token) if !self.session.verify(participant, token) => {
                warn!("Refused rejoin of {} to session {}", participant, self.session.code());
                Err(SessionError::RejoinRefused(participant))
            }
            _ => Ok(()),
        }
    }

    /// A participant (new or returning, already admitted) has connected.
    ///
    /// A started match is never reset: the participant gets a targeted sync
    /// of the current position instead.
    pub fn connect(&mut self, participant: ParticipantId, now: Instant) -> Vec<Dispatch> {
        let seat = self.session.connect(participant);
        let code = self.session.code().to_string();

        let greeting = match seat.side {
            Some(side) if self.session.is_host(participant) && !seat.returning => {
                ServerMessage::SessionCreated {
                    session: code,
                    participant,
                    token: seat.token,
                    side,
                }
            }
            side => ServerMessage::Joined {
                session: code,
                participant,
                token: seat.token,
                side,
            },
        };

        let mut out = vec![
            Dispatch::one(participant, greeting),
            Dispatch::all_except(participant, ServerMessage::ParticipantJoined { side: seat.side }),
        ];

        let store = self.controller.store();
        if store.match_started() {
            out.push(Dispatch::one(participant, self.controller.snapshot(now).sync_message()));
            if store.is_over() {
                out.push(Dispatch::one(participant, ServerMessage::GameEnd(store.end())));
            } else if let Some(by) = self.controller.draw_offer() {
                out.push(Dispatch::one(participant, ServerMessage::DrawOffered { by }));
            }
        } else if self.session.both_sides_connected() && self.controller.start_match(now) {
            self.publish(MatchEvent::MatchStarted);
            out.push(Dispatch::all(self.controller.snapshot(now).state_message()));
        } else {
            out.push(Dispatch::one(participant, self.controller.snapshot(now).sync_message()));
        }

        self.publish(MatchEvent::ParticipantJoined {
            participant,
            side: seat.side,
        });
        out
    }

    /// The match keeps running; the participant can come back later
    pub fn disconnect(&mut self, participant: ParticipantId) -> Vec<Dispatch> {
        if !self.session.disconnect(participant) {
            return Vec::new();
        }
        self.publish(MatchEvent::ParticipantLeft { participant });
        let side = self.session.side_of(participant);
        vec![Dispatch::all_except(participant, ServerMessage::ParticipantLeft { side })]
    }

    /// Checks the clock; ends the match on a flag fall
    pub fn tick(&mut self, now: Instant) -> Vec<Dispatch> {
        match self.controller.check_clock(now) {
            Some(end) => self.ended(end),
            None => Vec::new(),
        }
    }

    /// Processes one request to completion
    pub fn handle(&mut self, participant: ParticipantId, message: ClientMessage, now: Instant) -> Vec<Dispatch> {
        if self.closed {
            return vec![Dispatch::one(participant, ServerMessage::SessionClosed)];
        }
        if !self.session.is_connected(participant) {
            warn!("Message from {} who is not in session {}", participant, self.session.code());
            return vec![Dispatch::one(
                participant,
                ServerMessage::error(ErrorCode::NotInSession, "Not in this session"),
            )];
        }

        // a flag that fell before this request was sent takes precedence
        let mut out = self.tick(now);

        match message {
            ClientMessage::Move { from, to, promotion } => {
                out.extend(self.handle_move(participant, MoveProposal { from, to, promotion }, now));
            }
            ClientMessage::GetMoves { square } => {
                let reply = match self.controller.legal_moves(&square) {
                    Ok(moves) => ServerMessage::AvailableMoves { square, moves },
                    Err(rejection) => ServerMessage::error(ErrorCode::Rejected, rejection.to_string()),
                };
                out.push(Dispatch::one(participant, reply));
            }
            ClientMessage::Resign => {
                let result = self
                    .seated(participant)
                    .and_then(|side| self.controller.resign(side, now));
                out.extend(self.conclude_or_reject(participant, result));
            }
            ClientMessage::OfferDraw => {
                let result = self
                    .seated(participant)
                    .and_then(|side| self.controller.offer_draw(side, now));
                match result {
                    Ok(DrawOutcome::Offered(by)) => {
                        info!("{} offers a draw in session {}", by, self.session.code());
                        out.push(Dispatch::all(ServerMessage::DrawOffered { by }));
                    }
                    Ok(DrawOutcome::Agreed(end)) => out.extend(self.ended(end)),
                    Err(rejection) => out.push(self.reject(participant, rejection)),
                }
            }
            ClientMessage::AcceptDraw => {
                let result = self
                    .seated(participant)
                    .and_then(|side| self.controller.accept_draw(side, now));
                out.extend(self.conclude_or_reject(participant, result));
            }
            ClientMessage::TimeSync => {
                out.push(Dispatch::one(participant, self.controller.snapshot(now).sync_message()));
            }
            ClientMessage::Teardown => {
                if self.session.is_host(participant) {
                    info!("Host tore down session {}", self.session.code());
                    self.closed = true;
                    self.publish(MatchEvent::Closed);
                    out.push(Dispatch::all(ServerMessage::SessionClosed));
                } else {
                    out.push(Dispatch::one(
                        participant,
                        ServerMessage::error(ErrorCode::NotHost, "Only the host can end the session"),
                    ));
                }
            }
            ClientMessage::Create { .. } | ClientMessage::Join { .. } => {
                out.push(Dispatch::one(
                    participant,
                    ServerMessage::error(ErrorCode::BadRequest, "Already in a session"),
                ));
            }
        }
        out
    }

    fn handle_move(&mut self, participant: ParticipantId, proposal: MoveProposal, now: Instant) -> Vec<Dispatch> {
        let side = self.session.side_of(participant);
        match self.controller.propose(side, &proposal, now) {
            Ok(applied) => {
                let mut out = vec![Dispatch::all(applied.state_message())];
                self.publish(MatchEvent::MoveApplied {
                    mover: applied.mover,
                    notation: applied.notation.clone(),
                    board: applied.board.clone(),
                    turn: applied.turn,
                });
                if let Some(end) = applied.end {
                    out.extend(self.ended(end));
                }
                out
            }
            Err(rejection) => {
                info!(
                    "Rejected {}{} from {}: {}",
                    proposal.from, proposal.to, participant, rejection
                );
                let flag_fell = matches!(rejection, Rejection::TimeExpired(_));
                let mut out = vec![Dispatch::one(
                    participant,
                    ServerMessage::MoveRejected {
                        from: proposal.from,
                        to: proposal.to,
                        reason: rejection.to_string(),
                        board: self.controller.rules().snapshot(),
                    },
                )];
                if flag_fell {
                    out.extend(self.ended(self.controller.store().end()));
                }
                out
            }
        }
    }

    fn seated(&self, participant: ParticipantId) -> Result<Side, Rejection> {
        self.session.side_of(participant).ok_or(Rejection::Spectator)
    }

    fn conclude_or_reject(
        &mut self,
        participant: ParticipantId,
        result: Result<GameEndState, Rejection>,
    ) -> Vec<Dispatch> {
        match result {
            Ok(end) => self.ended(end),
            Err(rejection) => vec![self.reject(participant, rejection)],
        }
    }

    fn reject(&self, participant: ParticipantId, rejection: Rejection) -> Dispatch {
        info!("Rejected request from {}: {}", participant, rejection);
        Dispatch::one(
            participant,
            ServerMessage::error(ErrorCode::Rejected, rejection.to_string()),
        )
    }

    fn ended(&self, end: GameEndState) -> Vec<Dispatch> {
        self.publish(MatchEvent::MatchEnded(end));
        vec![Dispatch::all(ServerMessage::GameEnd(end))]
    }
}
