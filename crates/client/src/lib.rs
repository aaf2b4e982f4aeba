//! Chatline client engine.
//!
//! Turns one duplex connection into a reliable, ordered, optimistically
//! updated conversation state: identity handshake, room discovery and
//! membership, and the pending→confirmed/error message lifecycle.
//! Rendering is the embedder's problem; this crate only owns state.

pub mod http;
pub mod identity;
pub mod messages;
pub mod rooms;
pub mod session;
pub mod storage;
pub mod ws;

pub use chatline_shared as shared;

pub use http::HttpFallback;
pub use identity::IdentityStore;
pub use messages::MessageEngine;
pub use rooms::{RoomDirectory, Visibility};
pub use session::{Session, SessionConfig, SessionEvent};
pub use ws::{ConnHandle, Connection, ConnectionState, Correlator};
