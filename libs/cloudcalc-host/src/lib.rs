#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
//! Process hosting for CloudCalc binaries.
//!
//! A process is a set of [`harness::Listener`]s sharing one
//! [`CancellationToken`](tokio_util::sync::CancellationToken): the RPC
//! listener or probe loop, plus the [`diagnostics`] HTTP listener. The
//! [`harness::Harness`] runs them side by side and tears all of them down
//! when any one fails.

pub mod config;
pub mod diagnostics;
pub mod harness;
pub mod signals;

pub use config::{ConfigError, load_layered, normalize_listen_addr, resolve_rpc_addr};
pub use diagnostics::{DiagnosticsListener, DiagnosticsState};
pub use harness::{Harness, Listener, ListenerState, ListenerStatus};
