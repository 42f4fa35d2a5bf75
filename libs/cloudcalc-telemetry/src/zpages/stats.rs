use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::instrument::{CallOutcome, LatencySample};
use crate::registry::LATENCY_BOUNDARIES_MS;

/// Aggregated latency for one (identity, method) pair.
#[derive(Debug, Clone, Serialize)]
pub struct MethodStats {
    pub count: u64,
    pub errors: u64,
    pub aborted: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub last_ms: f64,
    /// Counts per histogram bucket; the last bucket is the overflow above the
    /// highest boundary.
    pub buckets: Vec<u64>,
    #[serde(skip)]
    sum_ms: f64,
}

impl Default for MethodStats {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            aborted: 0,
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            last_ms: 0.0,
            buckets: vec![0; LATENCY_BOUNDARIES_MS.len() + 1],
            sum_ms: 0.0,
        }
    }
}

impl MethodStats {
    #[allow(clippy::cast_precision_loss)]
    fn observe(&mut self, latency_ms: f64, outcome: CallOutcome) {
        if self.count == 0 {
            self.min_ms = latency_ms;
            self.max_ms = latency_ms;
        } else {
            self.min_ms = self.min_ms.min(latency_ms);
            self.max_ms = self.max_ms.max(latency_ms);
        }
        self.count += 1;
        self.sum_ms += latency_ms;
        self.mean_ms = self.sum_ms / self.count as f64;
        self.last_ms = latency_ms;

        match outcome {
            CallOutcome::Ok => {}
            CallOutcome::Error => self.errors += 1,
            CallOutcome::Aborted => self.aborted += 1,
        }

        let bucket = LATENCY_BOUNDARIES_MS
            .iter()
            .position(|bound| latency_ms <= *bound)
            .unwrap_or(LATENCY_BOUNDARIES_MS.len());
        self.buckets[bucket] += 1;
    }
}

/// One row of the `/debug/rpcz` page.
#[derive(Debug, Clone, Serialize)]
pub struct RpcStatsEntry {
    pub identity: String,
    pub method: String,
    #[serde(flatten)]
    pub stats: MethodStats,
}

/// Per-(identity, method) latency aggregates, updated on every sample.
#[derive(Default)]
pub struct RpcStats {
    entries: DashMap<(Arc<str>, &'static str), MethodStats>,
}

impl RpcStats {
    pub fn record(&self, sample: &LatencySample) {
        self.entries
            .entry((Arc::clone(&sample.identity), sample.method))
            .or_default()
            .observe(sample.latency_ms, sample.outcome);
    }

    /// Point-in-time copy, sorted by identity then method.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RpcStatsEntry> {
        let mut rows: Vec<RpcStatsEntry> = self
            .entries
            .iter()
            .map(|e| RpcStatsEntry {
                identity: e.key().0.to_string(),
                method: e.key().1.to_owned(),
                stats: e.value().clone(),
            })
            .collect();
        rows.sort_by(|a, b| (&a.identity, &a.method).cmp(&(&b.identity, &b.method)));
        rows
    }

    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.entries.iter().map(|e| e.value().count).sum()
    }
}
