#![deny(unsafe_code)]

//! Shared test utilities for the unixcall workspace.
//!
//! Provides a config builder and an in-process [`FakeListener`] that plays
//! the server side of one exchange, so tests never depend on an external
//! process or a fixed socket path.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! unixcall-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod listener;

pub use config::TestConfigBuilder;
pub use listener::FakeListener;
