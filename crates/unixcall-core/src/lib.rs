#![deny(unsafe_code)]

//! unixcall core — single-shot JSON call/reply over Unix domain sockets.
//!
//! The [`exchange`] module holds the whole protocol: the [`Message`] record,
//! payload [`Framing`], the per-call [`Connection`] state machine, the
//! [`ExchangeClient`] that drives it, and a reference server for the other
//! end of the socket.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Message codec, framing, client, and reference server.
pub mod exchange;

pub use exchange::{
    CallState, Connection, ExchangeClient, ExchangeError, ExchangeOptions, Framing, Message,
};
