//! One actor per match. Its mailbox is the proposal queue: every request is
//! validated, applied and broadcast before the next one is looked at.

use actix::prelude::*;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::clock::{millis, TimeControl};
use crate::game::controller::TurnController;
use crate::game::evaluator::GameEndEvaluator;
use crate::game::rules::ChessRules;
use crate::models::{
    ClientMessage, ErrorCode, GameEndState, ParticipantId, RejoinToken, ServerMessage, TurnState,
};
use crate::session::directory::SessionDirectory;
use crate::session::host::{Dispatch, MatchEvent, MatchHost};
use crate::session::manager::SessionManager;

/// Delivered to a connection actor
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum Outbound {
    Text(String),
    /// The authority has dropped this connection
    Close,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Attach {
    pub participant: ParticipantId,
    pub conn_id: Uuid,
    pub recipient: Recipient<Outbound>,
    /// Set when reclaiming an earlier identity
    pub claim: Option<RejoinToken>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Detach {
    pub participant: ParticipantId,
    pub conn_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Inbound {
    pub participant: ParticipantId,
    pub conn_id: Uuid,
    pub message: ClientMessage,
}

#[derive(Message)]
#[rtype(result = "SessionInfo")]
pub struct Describe;

#[derive(Message)]
#[rtype(result = "broadcast::Receiver<MatchEvent>")]
pub struct Subscribe;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TimeControlInfo {
    pub initial_ms: u64,
    pub increment_ms: u64,
}

/// Summary served by the session lookup route
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session: String,
    pub connected: usize,
    pub seats_filled: bool,
    pub turn: TurnState,
    pub end: GameEndState,
    pub time_control: Option<TimeControlInfo>,
}

struct Link {
    conn_id: Uuid,
    recipient: Recipient<Outbound>,
}

pub struct MatchAuthority {
    code: String,
    host: MatchHost<ChessRules>,
    links: HashMap<ParticipantId, Link>,
    directory: SessionDirectory,
    clock_tick: Duration,
    idle_timeout: Duration,
    idle: Option<SpawnHandle>,
}

impl MatchAuthority {
    pub fn new(
        code: String,
        host_id: ParticipantId,
        time_control: Option<TimeControl>,
        config: &ServerConfig,
        directory: SessionDirectory,
    ) -> Self {
        let session = SessionManager::create(code.clone(), host_id);
        let controller = TurnController::new(ChessRules::new(), GameEndEvaluator::new(), time_control);
        Self {
            code,
            host: MatchHost::new(session, controller),
            links: HashMap::new(),
            directory,
            clock_tick: config.clock_tick,
            idle_timeout: config.idle_session_timeout,
            idle: None,
        }
    }

    /// Serializes each message once and hands it to every addressed link
    fn deliver(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let payload = match serde_json::to_string(&dispatch.message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize {}: {}", dispatch.message.kind(), e);
                    continue;
                }
            };
            for (participant, link) in &self.links {
                if dispatch.target.includes(*participant) {
                    link.recipient.do_send(Outbound::Text(payload.clone()));
                }
            }
        }
    }

    fn arm_idle(&mut self, ctx: &mut Context<Self>) {
        self.disarm_idle(ctx);
        let handle = ctx.run_later(self.idle_timeout, |act, ctx| {
            if act.links.is_empty() {
                info!("Session {} idle, tearing down", act.code);
                ctx.stop();
            }
        });
        self.idle = Some(handle);
    }

    fn disarm_idle(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.idle.take() {
            ctx.cancel_future(handle);
        }
    }

    fn is_current(&self, participant: ParticipantId, conn_id: Uuid) -> bool {
        self.links
            .get(&participant)
            .map(|link| link.conn_id == conn_id)
            .unwrap_or(false)
    }
}

impl Actor for MatchAuthority {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Match authority for {} started", self.code);
        if self.host.controller().time_control().is_some() {
            ctx.run_interval(self.clock_tick, |act, _| {
                let out = act.host.tick(Instant::now());
                act.deliver(out);
            });
        }
        self.arm_idle(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        for link in self.links.values() {
            link.recipient.do_send(Outbound::Close);
        }
        self.directory.remove(&self.code);
        info!("Match authority for {} stopped", self.code);
    }
}

impl Handler<Attach> for MatchAuthority {
    type Result = ();

    fn handle(&mut self, msg: Attach, ctx: &mut Self::Context) {
        if let Err(e) = self.host.admit(msg.participant, msg.claim) {
            match serde_json::to_string(&ServerMessage::error(ErrorCode::RejoinRefused, e.to_string())) {
                Ok(payload) => msg.recipient.do_send(Outbound::Text(payload)),
                Err(e) => warn!("Failed to serialize refusal: {}", e),
            }
            msg.recipient.do_send(Outbound::Close);
            return;
        }
        let link = Link {
            conn_id: msg.conn_id,
            recipient: msg.recipient,
        };
        if let Some(old) = self.links.insert(msg.participant, link) {
            if old.conn_id != msg.conn_id {
                info!("Participant {} reconnected, closing previous socket", msg.participant);
                old.recipient.do_send(Outbound::Close);
            }
        }
        self.disarm_idle(ctx);
        let out = self.host.connect(msg.participant, Instant::now());
        self.deliver(out);
    }
}

impl Handler<Detach> for MatchAuthority {
    type Result = ();

    fn handle(&mut self, msg: Detach, ctx: &mut Self::Context) {
        if !self.is_current(msg.participant, msg.conn_id) {
            debug!("Ignoring stale detach for {}", msg.participant);
            return;
        }
        self.links.remove(&msg.participant);
        let out = self.host.disconnect(msg.participant);
        self.deliver(out);
        if self.links.is_empty() {
            self.arm_idle(ctx);
        }
    }
}

impl Handler<Inbound> for MatchAuthority {
    type Result = ();

    fn handle(&mut self, msg: Inbound, ctx: &mut Self::Context) {
        if !self.is_current(msg.participant, msg.conn_id) {
            debug!("Ignoring message from replaced socket of {}", msg.participant);
            return;
        }
        let out = self.host.handle(msg.participant, msg.message, Instant::now());
        self.deliver(out);

        if self.host.is_closed() {
            ctx.stop();
        }
    }
}

impl Handler<Describe> for MatchAuthority {
    type Result = MessageResult<Describe>;

    fn handle(&mut self, _: Describe, _: &mut Self::Context) -> Self::Result {
        let controller = self.host.controller();
        MessageResult(SessionInfo {
            session: self.code.clone(),
            connected: self.host.session().connected_count(),
            seats_filled: self.host.session().seats_filled(),
            turn: controller.store().turn(),
            end: controller.store().end(),
            time_control: controller.time_control().map(|tc| TimeControlInfo {
                initial_ms: millis(tc.initial),
                increment_ms: millis(tc.increment),
            }),
        })
    }
}

impl Handler<Subscribe> for MatchAuthority {
    type Result = MessageResult<Subscribe>;

    fn handle(&mut self, _: Subscribe, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.host.subscribe())
    }
}
