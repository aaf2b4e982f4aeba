//! WebSocket layer: connection lifecycle and request/response correlation.
//!
//! ```text
//! ┌──────────────┐   raw Response stream   ┌──────────────┐
//! │  Connection   │ ──────────────────────▶ │  Correlator  │
//! │ (socket task) │ ◀── Request channel ─── │ (waiters +   │
//! └──────────────┘                          │  overflow)   │
//!                                           └──────────────┘
//! ```
//!
//! The connection owns the socket and its state; everything above it
//! only holds a [`ConnHandle`] and subscribes to the inbound stream.

mod connection;
mod correlator;

pub use connection::{ConnHandle, Connection, ConnectionState};
pub use correlator::Correlator;
