use log::info;
use std::collections::{HashMap, HashSet};

use crate::models::{ParticipantId, RejoinToken, Side};

/// Membership of one match
#[derive(Debug, Clone)]
pub struct MatchSession {
    pub code: String,
    pub host: ParticipantId,
    pub connected: HashSet<ParticipantId>,
    pub sides: HashMap<ParticipantId, Side>,
}

/// Result of a participant connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub side: Option<Side>,
    /// The identity has been in this session before
    pub returning: bool,
    pub token: RejoinToken,
}

/// Owns session identity and side assignment on the authority.
///
/// Assignments are never forgotten while the session lives, so an identity
/// that drops and comes back gets the same side.
#[derive(Debug, Clone)]
pub struct SessionManager {
    session: MatchSession,
    /// Issued on first connect; also marks an identity as seen
    tokens: HashMap<ParticipantId, RejoinToken>,
}

impl SessionManager {
    /// The creator is White
    pub fn create(code: impl Into<String>, host: ParticipantId) -> Self {
        let code = code.into();
        info!("Session {} created by {}", code, host);
        Self {
            session: MatchSession {
                code,
                host,
                connected: HashSet::new(),
                sides: HashMap::from([(host, Side::White)]),
            },
            tokens: HashMap::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.session.code
    }

    pub fn session(&self) -> &MatchSession {
        &self.session
    }

    pub fn is_host(&self, participant: ParticipantId) -> bool {
        self.session.host == participant
    }

    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        self.session.sides.get(&participant).copied()
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.session.connected.contains(&participant)
    }

    pub fn connected_count(&self) -> usize {
        self.session.connected.len()
    }

    /// Both seats have an owner
    pub fn seats_filled(&self) -> bool {
        self.holder(Side::White).is_some() && self.holder(Side::Black).is_some()
    }

    /// Both seat owners are currently connected
    pub fn both_sides_connected(&self) -> bool {
        [Side::White, Side::Black].into_iter().all(|side| {
            self.holder(side)
                .map(|p| self.is_connected(p))
                .unwrap_or(false)
        })
    }

    /// Whether `token` is the one issued to `participant`
    pub fn verify(&self, participant: ParticipantId, token: RejoinToken) -> bool {
        self.tokens.get(&participant) == Some(&token)
    }

    pub fn holder(&self, side: Side) -> Option<ParticipantId> {
        self.session
            .sides
            .iter()
            .find(|(_, s)| **s == side)
            .map(|(p, _)| *p)
    }

    /// Marks `participant` connected. The first identity other than the host
    /// takes Black; later ones watch.
    pub fn connect(&mut self, participant: ParticipantId) -> Seat {
        let returning = self.tokens.contains_key(&participant);
        let token = *self.tokens.entry(participant).or_default();
        self.session.connected.insert(participant);

        if !self.session.sides.contains_key(&participant) && self.holder(Side::Black).is_none() {
            self.session.sides.insert(participant, Side::Black);
        }

        let side = self.side_of(participant);
        info!(
            "Participant {} {} session {} as {}",
            participant,
            if returning { "rejoined" } else { "joined" },
            self.session.code,
            side.map(Side::as_str).unwrap_or("spectator")
        );
        Seat {
            side,
            returning,
            token,
        }
    }

    /// Removes `participant` from the connected set; its side is kept
    pub fn disconnect(&mut self, participant: ParticipantId) -> bool {
        let removed = self.session.connected.remove(&participant);
        if removed {
            info!("Participant {} left session {}", participant, self.session.code);
        }
        removed
    }
}
