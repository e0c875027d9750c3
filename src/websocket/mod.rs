//! WebSocket counter endpoint
//!
//! `handler` owns the axum upgrade and the socket tasks; `connection` holds the
//! protocol state and replies for one client.

mod connection;
mod handler;
mod message;

pub use connection::{
    Accepted, Connection, ConnectionContext, ConnectionError, ConnectionState, DrainConfig,
    DrainOutcome, InFlight, ProcessingError,
};
pub use handler::{session_id_from_params, ws_handler};
pub use message::{OutboundFrame, ServerMessage, SHUTDOWN_REASON};
