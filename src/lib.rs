pub mod config;
pub mod error;
pub mod game;
pub mod models;
pub mod routes;
pub mod session;
pub mod websocket;

pub use config::{RetryPolicy, ServerConfig};
pub use error::{ConfigError, Rejection, RulesError, SessionError, SyncError, TimeControlError};
