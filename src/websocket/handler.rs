use actix::prelude::*;
use actix_web::web;
use actix_web_actors::ws;
use log::{info, warn};
use std::time::Instant;
use uuid::Uuid;

use crate::error::SessionError;
use crate::game::clock::TimeControl;
use crate::models::{AppState, ClientMessage, ErrorCode, ParticipantId, RejoinToken, ServerMessage};
use crate::websocket::authority::{Attach, Detach, Inbound, MatchAuthority, Outbound};

/// The match this connection speaks for
struct Membership {
    participant: ParticipantId,
    authority: Addr<MatchAuthority>,
}

/// One WebSocket connection. Parses client messages and forwards them to the
/// match authority; it holds no game state.
pub struct ChessWebSocket {
    conn_id: Uuid,
    app_state: web::Data<AppState>,
    membership: Option<Membership>,
    last_heartbeat: Instant,
}

impl ChessWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            app_state,
            membership: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn send_json(ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(payload) => ctx.text(payload),
            Err(e) => warn!("Failed to serialize outbound message: {}", e),
        }
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, code: ErrorCode, error: impl Into<String>) {
        Self::send_json(ctx, &ServerMessage::error(code, error));
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.app_state.config.client_timeout;
        ctx.run_interval(self.app_state.config.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!("Connection {} timed out", act.conn_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(membership) = &self.membership {
            membership.authority.do_send(Inbound {
                participant: membership.participant,
                conn_id: self.conn_id,
                message: msg,
            });
            return;
        }

        match msg {
            ClientMessage::Create {
                session,
                start_time_minutes,
                increment_seconds,
            } => self.handle_create(session, start_time_minutes, increment_seconds, ctx),
            ClientMessage::Join {
                session,
                participant,
                token,
            } => self.handle_join(&session, participant, token, ctx),
            other => {
                warn!("Connection {} sent {:?} before joining", self.conn_id, other);
                Self::send_error(ctx, ErrorCode::NotInSession, "Create or join a session first");
            }
        }
    }

    fn handle_create(
        &mut self,
        session: Option<String>,
        start_time_minutes: Option<u64>,
        increment_seconds: Option<u64>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let config = &self.app_state.config;
        let time_control = match TimeControl::from_minutes(start_time_minutes, increment_seconds) {
            Ok(requested) => requested.or(config.default_time_control),
            Err(e) => {
                warn!("Create refused: {}", e);
                Self::send_error(ctx, ErrorCode::BadRequest, e.to_string());
                return;
            }
        };
        let participant = ParticipantId::new();

        match self.app_state.directory.open(session, participant, time_control, config) {
            Ok((code, authority)) => {
                info!("Connection {} created session {}", self.conn_id, code);
                self.attach(participant, authority, None, ctx);
            }
            Err(e) => {
                warn!("Create refused: {}", e);
                let code = match e {
                    SessionError::CodeInUse(_) => ErrorCode::SessionExists,
                    _ => ErrorCode::BadRequest,
                };
                Self::send_error(ctx, code, e.to_string());
            }
        }
    }

    fn handle_join(
        &mut self,
        session: &str,
        participant: Option<ParticipantId>,
        token: Option<RejoinToken>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let (participant, claim) = match (participant, token) {
            (None, _) => (ParticipantId::new(), None),
            (Some(participant), Some(token)) => (participant, Some(token)),
            (Some(participant), None) => {
                warn!("Rejoin of {} without a token", participant);
                Self::send_error(ctx, ErrorCode::RejoinRefused, "Rejoining needs the rejoin token");
                return;
            }
        };
        match self.app_state.directory.resolve(session) {
            Ok(authority) => {
                info!("Connection {} joining {} as {}", self.conn_id, session, participant);
                self.attach(participant, authority, claim, ctx);
            }
            Err(e @ SessionError::NotFound(_)) => {
                warn!("Join refused: {}", e);
                Self::send_error(ctx, ErrorCode::SessionNotFound, e.to_string());
            }
            Err(e) => Self::send_error(ctx, ErrorCode::BadRequest, e.to_string()),
        }
    }

    fn attach(
        &mut self,
        participant: ParticipantId,
        authority: Addr<MatchAuthority>,
        claim: Option<RejoinToken>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        authority.do_send(Attach {
            participant,
            conn_id: self.conn_id,
            recipient: ctx.address().recipient(),
            claim,
        });
        self.membership = Some(Membership {
            participant,
            authority,
        });
    }
}

impl Actor for ChessWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started: {}", self.conn_id);
        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        if let Some(membership) = self.membership.take() {
            membership.authority.do_send(Detach {
                participant: membership.participant,
                conn_id: self.conn_id,
            });
        }
        info!("WebSocket connection closed: {}", self.conn_id);
    }
}

impl Handler<Outbound> for ChessWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Text(payload) => ctx.text(payload),
            Outbound::Close => {
                // the authority already forgot this connection
                self.membership = None;
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChessWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => self.handle_message(client_msg, ctx),
                    Err(e) => {
                        warn!("Error parsing client message: {}", e);
                        Self::send_error(ctx, ErrorCode::BadRequest, format!("Invalid message format: {}", e));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages are not supported");
                Self::send_error(ctx, ErrorCode::BadRequest, "Binary messages are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Connection closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {
                self.last_heartbeat = Instant::now();
            }
            Err(e) => {
                warn!("Protocol error on {}: {}", self.conn_id, e);
                ctx.stop();
            }
        }
    }
}
