use actix::{Actor, Addr};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::game::clock::TimeControl;
use crate::models::ParticipantId;
use crate::websocket::authority::MatchAuthority;

const CODE_LEN: usize = 6;

/// Live sessions by code
#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<Mutex<HashMap<String, Addr<MatchAuthority>>>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Addr<MatchAuthority>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a match authority for `host` under `requested`, or under a
    /// fresh code when none is given.
    pub fn open(
        &self,
        requested: Option<String>,
        host: ParticipantId,
        time_control: Option<TimeControl>,
        config: &ServerConfig,
    ) -> Result<(String, Addr<MatchAuthority>), SessionError> {
        let mut sessions = self.lock();
        let code = match requested {
            Some(code) => {
                let code = normalize(&code);
                if code.is_empty() {
                    return Err(SessionError::InvalidCode(code));
                }
                if sessions.contains_key(&code) {
                    return Err(SessionError::CodeInUse(code));
                }
                code
            }
            None => loop {
                let code = generate_code();
                if !sessions.contains_key(&code) {
                    break code;
                }
            },
        };

        let authority = MatchAuthority::new(code.clone(), host, time_control, config, self.clone()).start();
        sessions.insert(code.clone(), authority.clone());
        info!("Opened session {} ({} live)", code, sessions.len());
        Ok((code, authority))
    }

    pub fn resolve(&self, code: &str) -> Result<Addr<MatchAuthority>, SessionError> {
        let code = normalize(code);
        self.lock()
            .get(&code)
            .cloned()
            .ok_or(SessionError::NotFound(code))
    }

    /// Releases `code`; called by the authority when it stops
    pub fn remove(&self, code: &str) {
        let mut sessions = self.lock();
        if sessions.remove(code).is_some() {
            info!("Released session {} ({} live)", code, sessions.len());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Codes are case-insensitive on input
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

fn generate_code() -> String {
    Uuid::new_v4().simple().to_string()[..CODE_LEN].to_uppercase()
}
