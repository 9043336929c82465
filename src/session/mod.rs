//! Session and reconnection management.
//!
//! The authority side (`manager`, `host`, `directory`) owns membership and
//! seats; the participant side (`client`, `replica`, `connector`) joins,
//! mirrors state and rejoins after a drop.

pub mod client;
pub mod connector;
pub mod directory;
pub mod host;
pub mod manager;
pub mod replica;

pub use client::{RememberedSession, SessionClient};
pub use connector::{Connection, Connector, SessionResolver, UrlResolver, WsConnector};
pub use directory::SessionDirectory;
pub use host::{Dispatch, MatchEvent, MatchHost, Target};
pub use manager::{MatchSession, Seat, SessionManager};
pub use replica::{ClientEvent, ReplicaState};
