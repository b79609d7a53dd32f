use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;

/// Confidence histogram bucket edges (confidence is a 0-1 score).
const CONFIDENCE_BUCKETS: usize = 5;

/// Records execution counts, latencies, confidence distribution and close
/// results for observability. Injected wherever needed; never on the
/// critical path; recording cannot fail the caller.
#[derive(Clone)]
pub struct StatsCollector {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Default)]
struct StatsInner {
    executions: HashMap<&'static str, u64>,
    latency_samples: u64,
    total_latency_ms: u64,
    max_latency_ms: u64,
    confidence_histogram: [u64; CONFIDENCE_BUCKETS],
    positions_closed: u64,
    realized_pnl_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub executions: HashMap<String, u64>,
    pub latency_samples: u64,
    pub avg_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Counts of executed-target confidence in [0,0.2), [0.2,0.4), ...
    pub confidence_histogram: [u64; CONFIDENCE_BUCKETS],
    pub positions_closed: u64,
    pub realized_pnl_total: Decimal,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    pub async fn record_execution(
        &self,
        outcome_label: &'static str,
        latency: Duration,
        confidence: Decimal,
    ) {
        counter!("snipe_executions_total", "outcome" => outcome_label).increment(1);
        histogram!("snipe_execution_latency_seconds").record(latency.as_secs_f64());

        let mut inner = self.inner.lock().await;
        *inner.executions.entry(outcome_label).or_insert(0) += 1;

        let latency_ms = latency.as_millis() as u64;
        inner.latency_samples += 1;
        inner.total_latency_ms += latency_ms;
        inner.max_latency_ms = inner.max_latency_ms.max(latency_ms);

        let bucket = confidence_bucket(confidence);
        inner.confidence_histogram[bucket] += 1;
    }

    pub async fn record_close(&self, reason: &str, realized_pnl: Decimal) {
        counter!("positions_closed_total", "reason" => reason.to_string()).increment(1);

        let mut inner = self.inner.lock().await;
        inner.positions_closed += 1;
        inner.realized_pnl_total += realized_pnl;
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().await;
        let avg_latency_ms = if inner.latency_samples == 0 {
            0
        } else {
            inner.total_latency_ms / inner.latency_samples
        };

        StatsSnapshot {
            executions: inner
                .executions
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            latency_samples: inner.latency_samples,
            avg_latency_ms,
            max_latency_ms: inner.max_latency_ms,
            confidence_histogram: inner.confidence_histogram,
            positions_closed: inner.positions_closed,
            realized_pnl_total: inner.realized_pnl_total,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn confidence_bucket(confidence: Decimal) -> usize {
    let scaled = confidence * Decimal::from(CONFIDENCE_BUCKETS);
    let idx = scaled.trunc().to_usize().unwrap_or(0);
    idx.min(CONFIDENCE_BUCKETS - 1)
}
