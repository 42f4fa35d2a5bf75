//! In-process buffers behind the diagnostics pages.
//!
//! [`RpcStats`] aggregates latency samples per caller identity and method
//! (`/debug/rpcz`), [`SpanStore`] keeps the most recent completed RPC spans
//! (`/debug/tracez`).

mod spans;
mod stats;

pub use spans::{SpanRecord, SpanStore, SpanStoreLayer};
pub use stats::{MethodStats, RpcStats, RpcStatsEntry};
