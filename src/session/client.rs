//! Participant side of a session: create, join, rejoin and play.

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::SyncError;
use crate::models::{
    ClientMessage, ErrorCode, MoveProposal, ParticipantId, RejoinToken, ServerMessage,
};
use crate::session::connector::{Connection, Connector, SessionResolver};
use crate::session::replica::{ClientEvent, ReplicaState};

/// What a participant needs to find its way back into a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberedSession {
    pub code: String,
    pub address: String,
    pub participant: ParticipantId,
    pub token: RejoinToken,
}

pub struct SessionClient<C: Connector, R: SessionResolver> {
    connector: C,
    resolver: R,
    policy: RetryPolicy,
    link: Option<C::Conn>,
    remembered: Option<RememberedSession>,
    replica: ReplicaState,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<C: Connector, R: SessionResolver> SessionClient<C, R> {
    /// Returns the client and the receiving end of its event stream
    pub fn new(
        connector: C,
        resolver: R,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let client = Self {
            connector,
            resolver,
            policy,
            link: None,
            remembered: None,
            replica: ReplicaState::new(),
            events,
        };
        (client, rx)
    }

    pub fn replica(&self) -> &ReplicaState {
        &self.replica
    }

    pub fn remembered(&self) -> Option<&RememberedSession> {
        self.remembered.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Hosts a new session; the creator plays White.
    ///
    /// Only a failed connect is retried; once the request is sent, a retry
    /// could mint a second identity.
    pub async fn create_session(
        &mut self,
        code: Option<String>,
        start_time_minutes: Option<u64>,
        increment_seconds: Option<u64>,
    ) -> Result<(), SyncError> {
        let address = self.resolver.resolve(code.as_deref()).await?;
        let request = ClientMessage::Create {
            session: code,
            start_time_minutes,
            increment_seconds,
        };
        let conn = self.connect_with_retry(&address).await?;
        self.exchange(conn, request).await?;
        self.remember(address)
    }

    /// Joins as a new identity; connect failures are retried like `create_session`
    pub async fn join_session(&mut self, code: &str) -> Result<(), SyncError> {
        let address = self.resolver.resolve(Some(code)).await?;
        let request = ClientMessage::Join {
            session: code.to_string(),
            participant: None,
            token: None,
        };
        let conn = self.connect_with_retry(&address).await?;
        self.exchange(conn, request).await?;
        self.remember(address)
    }

    /// Reconnects to the remembered session under the same identity.
    ///
    /// Retries with exponential backoff. Exhausting the policy forgets the
    /// session; cancelling through `cancel` keeps it.
    pub async fn rejoin_session(&mut self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let remembered = self.remembered.clone().ok_or(SyncError::NoRememberedSession)?;
        self.link = None;

        for attempt in 1..=self.policy.max_attempts {
            self.emit(ClientEvent::Reconnecting { attempt });
            let request = ClientMessage::Join {
                session: remembered.code.clone(),
                participant: Some(remembered.participant),
                token: Some(remembered.token),
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                result = self.handshake(&remembered.address, request) => result,
            };

            match result {
                Ok(()) => {
                    info!("Rejoined session {} on attempt {}", remembered.code, attempt);
                    self.emit(ClientEvent::Rejoined);
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Giving up on session {}: {}", remembered.code, e);
                    self.forget(attempt);
                    return Err(e);
                }
                Err(e) => warn!("Rejoin attempt {} failed: {}", attempt, e),
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.backoff(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let attempts = self.policy.max_attempts;
        self.forget(attempts);
        Err(SyncError::RejoinExhausted { attempts })
    }

    /// Closes the link but remembers the session for a later rejoin
    pub async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("Close failed: {}", e);
            }
            self.emit(ClientEvent::Disconnected);
        }
    }

    /// Sends a move; the board only changes when the authority answers
    pub async fn propose_move(&mut self, proposal: MoveProposal) -> Result<(), SyncError> {
        let message = self.replica.propose(proposal);
        self.send(&message).await
    }

    pub async fn request_moves(&mut self, square: &str) -> Result<(), SyncError> {
        self.send(&ClientMessage::GetMoves {
            square: square.to_string(),
        })
        .await
    }

    pub async fn resign(&mut self) -> Result<(), SyncError> {
        self.send(&ClientMessage::Resign).await
    }

    pub async fn offer_draw(&mut self) -> Result<(), SyncError> {
        self.send(&ClientMessage::OfferDraw).await
    }

    pub async fn accept_draw(&mut self) -> Result<(), SyncError> {
        self.send(&ClientMessage::AcceptDraw).await
    }

    pub async fn time_sync(&mut self) -> Result<(), SyncError> {
        self.send(&ClientMessage::TimeSync).await
    }

    /// Host only: closes the session for everyone
    pub async fn teardown(&mut self) -> Result<(), SyncError> {
        self.send(&ClientMessage::Teardown).await
    }

    /// Waits for the next authority message and folds it into the replica.
    /// Returns false once the link has closed.
    pub async fn poll(&mut self) -> Result<bool, SyncError> {
        let link = self.link.as_mut().ok_or(SyncError::NotConnected)?;
        let received = link.recv().await;
        match received {
            Ok(Some(message)) => {
                let closed = matches!(message, ServerMessage::SessionClosed);
                self.absorb(message);
                if closed {
                    self.link = None;
                    self.remembered = None;
                    return Ok(false);
                }
                Ok(true)
            }
            Ok(None) => {
                self.drop_link();
                Ok(false)
            }
            Err(e) => {
                self.drop_link();
                Err(e)
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        let link = self.link.as_mut().ok_or(SyncError::NotConnected)?;
        let sent = link.send(message).await;
        if let Err(e) = sent {
            self.drop_link();
            return Err(e);
        }
        Ok(())
    }

    async fn connect_with_retry(&self, address: &str) -> Result<C::Conn, SyncError> {
        let mut attempt = 1;
        loop {
            match self.connector.connect(address).await {
                Ok(conn) => return Ok(conn),
                Err(e @ SyncError::Connect { .. }) if attempt < self.policy.max_attempts => {
                    warn!("Connect attempt {} to {} failed: {}", attempt, address, e);
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Connects, sends `request` and reads until the first board arrives
    async fn handshake(&mut self, address: &str, request: ClientMessage) -> Result<(), SyncError> {
        let conn = self.connector.connect(address).await?;
        self.exchange(conn, request).await
    }

    async fn exchange(&mut self, mut conn: C::Conn, request: ClientMessage) -> Result<(), SyncError> {
        conn.send(&request).await?;

        let timeout = self.policy.sync_timeout;
        let received = tokio::time::timeout(timeout, Self::await_sync(&mut conn))
            .await
            .map_err(|_| SyncError::SyncTimeout)??;

        for message in received {
            self.absorb(message);
        }
        self.link = Some(conn);
        Ok(())
    }

    async fn await_sync(conn: &mut C::Conn) -> Result<Vec<ServerMessage>, SyncError> {
        let mut received = Vec::new();
        loop {
            let message = conn.recv().await?.ok_or(SyncError::Closed)?;
            match message {
                ServerMessage::Error {
                    code: ErrorCode::SessionNotFound,
                    error,
                } => return Err(SyncError::SessionNotFound(error)),
                ServerMessage::Error {
                    code: ErrorCode::RejoinRefused,
                    error,
                } => return Err(SyncError::RejoinRefused(error)),
                ServerMessage::Error { error, .. } => return Err(SyncError::Server(error)),
                ServerMessage::SessionClosed => return Err(SyncError::Closed),
                // a join that fills the second seat starts the match with a broadcast
                ServerMessage::Sync { .. } | ServerMessage::State { .. } => {
                    received.push(message);
                    return Ok(received);
                }
                other => received.push(other),
            }
        }
    }

    fn remember(&mut self, address: String) -> Result<(), SyncError> {
        let replica = &self.replica;
        let (Some(code), Some(participant), Some(token)) =
            (replica.session(), replica.participant(), replica.token())
        else {
            return Err(SyncError::Server("no session identity in handshake".to_string()));
        };
        info!("Joined session {} as {}", code, participant);
        self.remembered = Some(RememberedSession {
            code: code.to_string(),
            address,
            participant,
            token,
        });
        Ok(())
    }

    fn absorb(&mut self, message: ServerMessage) {
        for event in self.replica.apply(message) {
            self.emit(event);
        }
    }

    fn drop_link(&mut self) {
        if self.link.take().is_some() {
            self.emit(ClientEvent::Disconnected);
        }
    }

    fn forget(&mut self, attempts: u32) {
        self.remembered = None;
        self.emit(ClientEvent::RejoinFailed { attempts });
    }

    fn emit(&self, event: ClientEvent) {
        // a dropped receiver only means nobody is listening
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const BOARD_AT_12: &str = "r1bqk2r/2ppbppp/p1n2n2/1p2p3/B3P3/5N2/PPPP1PPP/RNBQR1K1 w kq b6 0 7";

    /// Scripted outcome of one connect call
    enum Script {
        Refuse,
        Accept(Vec<ServerMessage>),
    }

    #[derive(Clone, Default)]
    struct ScriptedConnector {
        scripts: Arc<Mutex<VecDeque<Script>>>,
        sent: Arc<Mutex<Vec<ClientMessage>>>,
        attempts: Arc<Mutex<u32>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Arc::new(Mutex::new(scripts.into())),
                ..Default::default()
            }
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }
    }

    struct ScriptedConnection {
        incoming: VecDeque<ServerMessage>,
        sent: Arc<Mutex<Vec<ClientMessage>>>,
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        async fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<ServerMessage>, SyncError> {
            match self.incoming.pop_front() {
                Some(message) => Ok(Some(message)),
                // a silent authority
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Conn = ScriptedConnection;

        async fn connect(&self, address: &str) -> Result<ScriptedConnection, SyncError> {
            *self.attempts.lock().unwrap() += 1;
            match self.scripts.lock().unwrap().pop_front() {
                Some(Script::Accept(incoming)) => Ok(ScriptedConnection {
                    incoming: incoming.into(),
                    sent: self.sent.clone(),
                }),
                _ => Err(SyncError::Connect {
                    address: address.to_string(),
                    reason: "refused".to_string(),
                }),
            }
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl SessionResolver for FixedResolver {
        async fn resolve(&self, _code: Option<&str>) -> Result<String, SyncError> {
            Ok("ws://authority/ws".to_string())
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            sync_timeout: Duration::from_millis(50),
        }
    }

    /// Scripted authorities hand out a token derived from the identity
    fn token_of(participant: ParticipantId) -> RejoinToken {
        RejoinToken(participant.0)
    }

    fn joined(participant: ParticipantId) -> ServerMessage {
        ServerMessage::Joined {
            session: "ABC123".into(),
            participant,
            token: token_of(participant),
            side: Some(Side::Black),
        }
    }

    fn sync_at_12() -> ServerMessage {
        ServerMessage::Sync {
            board: BOARD_AT_12.into(),
            turn: Side::White,
            clock: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn joined_client(
        me: ParticipantId,
        later: Vec<Script>,
    ) -> (
        SessionClient<ScriptedConnector, FixedResolver>,
        mpsc::UnboundedReceiver<ClientEvent>,
        ScriptedConnector,
    ) {
        let mut scripts = vec![Script::Accept(vec![joined(me), sync_at_12()])];
        scripts.extend(later);
        let connector = ScriptedConnector::new(scripts);
        let (mut client, mut rx) = SessionClient::new(connector.clone(), FixedResolver, quick_policy());
        client.join_session("ABC123").await.unwrap();
        drain(&mut rx);
        (client, rx, connector)
    }

    #[actix_rt::test]
    async fn join_waits_for_sync_and_remembers_the_session() {
        let me = ParticipantId::new();
        let connector = ScriptedConnector::new(vec![Script::Accept(vec![joined(me), sync_at_12()])]);
        let (mut client, mut rx) = SessionClient::new(connector.clone(), FixedResolver, quick_policy());

        client.join_session("ABC123").await.unwrap();

        assert_eq!(client.replica().board(), Some(BOARD_AT_12));
        assert_eq!(client.replica().side(), Some(Side::Black));
        assert_eq!(
            client.remembered(),
            Some(&RememberedSession {
                code: "ABC123".into(),
                address: "ws://authority/ws".into(),
                participant: me,
                token: token_of(me),
            })
        );
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ClientEvent::Synced { turn: Side::White, .. }));
    }

    #[actix_rt::test]
    async fn unknown_session_fails_the_join() {
        let connector = ScriptedConnector::new(vec![Script::Accept(vec![ServerMessage::error(
            ErrorCode::SessionNotFound,
            "no such session",
        )])]);
        let (mut client, _rx) = SessionClient::new(connector.clone(), FixedResolver, quick_policy());

        let err = client.join_session("NOPE00").await.unwrap_err();
        assert!(matches!(err, SyncError::SessionNotFound(_)));
        assert_eq!(connector.attempts(), 1);
        assert!(client.remembered().is_none());
        assert!(!client.is_connected());
    }

    #[actix_rt::test]
    async fn join_retries_a_refused_connect() {
        let me = ParticipantId::new();
        let connector = ScriptedConnector::new(vec![
            Script::Refuse,
            Script::Refuse,
            Script::Accept(vec![joined(me), sync_at_12()]),
        ]);
        let (mut client, _rx) = SessionClient::new(connector.clone(), FixedResolver, quick_policy());

        client.join_session("ABC123").await.unwrap();

        assert_eq!(connector.attempts(), 3);
        // only the successful connection carried a join
        assert_eq!(connector.sent.lock().unwrap().len(), 1);
        assert_eq!(client.remembered().map(|r| r.participant), Some(me));
        assert!(client.is_connected());
    }

    #[actix_rt::test]
    async fn join_gives_up_after_the_attempt_budget() {
        let connector = ScriptedConnector::new(vec![Script::Refuse, Script::Refuse, Script::Refuse, Script::Refuse]);
        let (mut client, _rx) = SessionClient::new(connector.clone(), FixedResolver, quick_policy());

        let err = client.join_session("ABC123").await.unwrap_err();

        assert!(matches!(err, SyncError::Connect { .. }));
        assert_eq!(connector.attempts(), 3);
        assert!(connector.sent.lock().unwrap().is_empty());
        assert!(client.remembered().is_none());
    }

    #[actix_rt::test]
    async fn refused_rejoin_token_is_not_retried() {
        let me = ParticipantId::new();
        let (mut client, mut rx, connector) = joined_client(
            me,
            vec![
                Script::Accept(vec![ServerMessage::error(ErrorCode::RejoinRefused, "rejoin refused")]),
                Script::Accept(vec![joined(me), sync_at_12()]),
            ],
        )
        .await;

        let err = client.rejoin_session(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::RejoinRefused(_)));
        assert_eq!(connector.attempts(), 2);
        assert!(client.remembered().is_none());
        assert_eq!(drain(&mut rx).last(), Some(&ClientEvent::RejoinFailed { attempts: 1 }));
    }

    #[actix_rt::test]
    async fn rejoin_retries_until_the_authority_answers() {
        let me = ParticipantId::new();
        let (mut client, mut rx, connector) = joined_client(
            me,
            vec![
                Script::Refuse,
                Script::Refuse,
                Script::Accept(vec![joined(me), sync_at_12()]),
            ],
        )
        .await;

        client.rejoin_session(&CancellationToken::new()).await.unwrap();

        assert_eq!(connector.attempts(), 4);
        let last = connector.sent.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            last,
            ClientMessage::Join {
                session: "ABC123".into(),
                participant: Some(me),
                token: Some(token_of(me)),
            }
        );
        let events = drain(&mut rx);
        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reconnecting { attempt } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(events.last(), Some(&ClientEvent::Rejoined));
        assert_eq!(client.replica().board(), Some(BOARD_AT_12));
        assert!(client.is_connected());
    }

    #[actix_rt::test]
    async fn exhausted_rejoin_forgets_the_session() {
        let me = ParticipantId::new();
        let (mut client, mut rx, connector) =
            joined_client(me, vec![Script::Refuse, Script::Refuse, Script::Refuse]).await;

        let err = client.rejoin_session(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::RejoinExhausted { attempts: 3 }));
        assert_eq!(connector.attempts(), 4);
        assert!(client.remembered().is_none());
        assert_eq!(drain(&mut rx).last(), Some(&ClientEvent::RejoinFailed { attempts: 3 }));
    }

    #[actix_rt::test]
    async fn silent_authority_times_out_the_attempt() {
        let me = ParticipantId::new();
        let (mut client, _rx, connector) = joined_client(
            me,
            vec![
                Script::Accept(vec![joined(me)]),
                Script::Accept(vec![joined(me), sync_at_12()]),
            ],
        )
        .await;

        client.rejoin_session(&CancellationToken::new()).await.unwrap();
        assert_eq!(connector.attempts(), 3);
    }

    #[actix_rt::test]
    async fn cancelled_rejoin_keeps_the_session() {
        let me = ParticipantId::new();
        let (mut client, _rx, _connector) = joined_client(me, vec![Script::Refuse]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.rejoin_session(&cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(client.remembered().map(|r| r.participant), Some(me));
    }

    #[actix_rt::test]
    async fn rejoin_without_a_session_is_refused() {
        let (mut client, _rx) = SessionClient::new(ScriptedConnector::default(), FixedResolver, quick_policy());
        let err = client.rejoin_session(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::NoRememberedSession));
    }

    #[actix_rt::test]
    async fn proposal_is_sent_but_not_applied() {
        let me = ParticipantId::new();
        let (mut client, _rx, connector) = joined_client(me, Vec::new()).await;

        client.propose_move(MoveProposal::new("e7", "e5")).await.unwrap();

        assert_eq!(client.replica().board(), Some(BOARD_AT_12));
        assert!(client.replica().pending().is_some());
        let last = connector.sent.lock().unwrap().last().cloned().unwrap();
        assert!(matches!(last, ClientMessage::Move { .. }));
    }
}
