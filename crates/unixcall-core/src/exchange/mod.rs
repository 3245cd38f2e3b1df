//! Single-shot JSON exchange over a Unix domain socket.
//!
//! A client connects, writes one JSON [`Message`], reads one JSON
//! [`Message`] back and disconnects. Nothing is pooled or reused.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐       Unix socket        ┌──────────────────┐
//! │ ExchangeClient │─────────────────────────▶│ listener (server │
//! │  └ Connection  │  {"text": .., "id": ..}  │ or any peer)     │
//! └────────────────┘◀─────────────────────────└──────────────────┘
//! ```
//!
//! The payload is unframed by default; see [`Framing`] for the optional
//! newline and length-prefixed modes.

pub mod client;
pub mod connection;
pub mod error;
pub mod framing;
pub mod message;
pub mod server;

pub use client::{ExchangeClient, ExchangeOptions};
pub use connection::{CallState, Connection};
pub use error::ExchangeError;
pub use framing::{Framing, UnknownFraming};
pub use message::Message;
pub use server::{ServerError, ServerOptions, ShutdownSignal, serve};
