//! Kiosk Protocol
//!
//! Shared types for communication between the kiosk terminal and the
//! banking backend. Every frame is a JSON envelope
//! `{"event": "<name>", "data": {...}}` carried over WebSocket.

// Re-exports
pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::ClientMessage;
pub use codec::{decode_server_frame, encode_client_frame, ProtocolError};
pub use server::ServerMessage;
pub use types::*;
