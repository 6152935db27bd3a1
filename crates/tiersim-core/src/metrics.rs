//! Counters, distributions, and run reporting.
//!
//! The engine records two kinds of metrics: monotonic counters for events
//! (queue/deliver/retry/timeout, OOM kills, recoveries, rejections) and
//! value distributions (per-node utilization percentages, per-source
//! end-to-end latency). Counter names are part of the crate's contract and
//! are exercised by the integration tests; per-node variants are recorded
//! alongside the aggregate under `"<name>.<node>"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contract metric names.
pub mod names {
    pub const OUTBOUND_QUEUED: &str = "outbound_queued";
    pub const OUTBOUND_DELIVERED: &str = "outbound_delivered";
    pub const OUTBOUND_TIMEOUT: &str = "outbound_timeout";
    pub const OUTBOUND_RETRY: &str = "outbound_retry";
    pub const OUTBOUND_RETRY_EXHAUSTED: &str = "outbound_retry_exhausted";

    pub const NODE_MEMORY_EXHAUSTION: &str = "node_memory_exhaustion";
    pub const NODE_RECOVERY: &str = "node_recovery";
    pub const NODE_CPU_DELAY: &str = "node_cpu_delay";
    pub const NODE_CPU_REJECT: &str = "node_cpu_reject";
    pub const NODE_NETWORK_SATURATED: &str = "node_network_saturated";

    pub const CALL_CH_SENT: &str = "call_ch_sent";
    pub const CALL_REPLY_KNOWN: &str = "call_reply_known";
    pub const CALL_REPLY_DROPPING_UNKNOWN: &str = "call_reply_dropping_unknown";

    pub const LB_CALL_SEND: &str = "lb_call_send";
    pub const SOURCE_CALL_GENERATED: &str = "source_call_generated";
    pub const SOURCE_REPLY_ERROR: &str = "source_reply_error";
    pub const FANOUT_UNKNOWN_ENDPOINT: &str = "fanout_unknown_endpoint";

    pub const CPU_UTILIZATION: &str = "cpu_utilization";
    pub const MEMORY_UTILIZATION: &str = "memory_utilization";
    pub const NETWORK_UTILIZATION: &str = "network_utilization";
    pub const LATENCY_MS: &str = "latency_ms";
}

/// Summary order statistics for a recorded distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Reduce a sample set to its summary statistics. Quantiles are read
    /// off the ordered samples with linear interpolation between the two
    /// nearest ranks; non-finite samples are ignored.
    pub fn from_values(values: &[f64]) -> Self {
        let mut ordered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if ordered.is_empty() {
            return Self::zeroed();
        }
        ordered.sort_by(f64::total_cmp);

        let quantile = |frac: f64| {
            let rank = frac * (ordered.len() - 1) as f64;
            let below = ordered[rank.floor() as usize];
            let above = ordered[rank.ceil() as usize];
            below + (above - below) * rank.fract()
        };

        Self {
            count: ordered.len() as u64,
            min: ordered[0],
            max: ordered[ordered.len() - 1],
            mean: ordered.iter().sum::<f64>() / ordered.len() as f64,
            p50: quantile(0.50),
            p75: quantile(0.75),
            p90: quantile(0.90),
            p95: quantile(0.95),
            p99: quantile(0.99),
        }
    }

    fn zeroed() -> Self {
        Self {
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            p50: 0.0,
            p75: 0.0,
            p90: 0.0,
            p95: 0.0,
            p99: 0.0,
        }
    }
}

/// Collector that accumulates counters and distributions during a run.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counters: BTreeMap<String, u64>,
    distributions: BTreeMap<String, Vec<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment an aggregate counter.
    pub fn incr(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Increment both the aggregate counter and its per-node variant.
    pub fn incr_node(&mut self, name: &str, node: &str) {
        self.incr(name);
        *self.counters.entry(format!("{name}.{node}")).or_insert(0) += 1;
    }

    /// Record a value into an aggregate distribution.
    pub fn observe(&mut self, name: &str, value: f64) {
        self.distributions
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    /// Record a value into both the aggregate and per-node distributions.
    pub fn observe_node(&mut self, name: &str, node: &str, value: f64) {
        self.observe(name, value);
        self.distributions
            .entry(format!("{name}.{node}"))
            .or_default()
            .push(value);
    }

    /// Current value of a counter (zero when never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Raw values recorded under a distribution name.
    pub fn distribution(&self, name: &str) -> Option<&[f64]> {
        self.distributions.get(name).map(|v| v.as_slice())
    }

    pub fn counters(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }

    /// Reduce the collected metrics into a serializable report.
    pub fn report(&self, scenario: &str, seed: u64, horizon_ms: f64) -> RunReport {
        let distributions = self
            .distributions
            .iter()
            .map(|(name, values)| (name.clone(), Percentiles::from_values(values)))
            .collect();
        RunReport {
            scenario: scenario.to_string(),
            seed,
            horizon_ms,
            counters: self.counters.clone(),
            distributions,
        }
    }
}

/// Aggregated results for an entire simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: String,
    pub seed: u64,
    pub horizon_ms: f64,
    pub counters: BTreeMap<String, u64>,
    pub distributions: BTreeMap<String, Percentiles>,
}

/// Format a run report as a pretty-printed table string.
pub fn format_table(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\n{:=<72}\n",
        format!("  {} Results  ", report.scenario)
    ));
    out.push_str(&format!(
        "  Seed: {} | Horizon: {:.0} ms\n",
        report.seed, report.horizon_ms
    ));

    out.push_str(&format!("{:-<72}\n", "  Counters  "));
    for (name, value) in &report.counters {
        // Per-node variants stay in the JSON output; keep the table short
        if name.contains('.') {
            continue;
        }
        out.push_str(&format!("  {:<40} {:>12}\n", name, value));
    }

    out.push_str(&format!("{:-<72}\n", "  Distributions  "));
    for (name, p) in &report.distributions {
        if name.contains('.') {
            continue;
        }
        out.push_str(&format!(
            "  {:<24} n={:<8} P50={:>9.1}  P90={:>9.1}  P99={:>9.1}\n",
            name, p.count, p.p50, p.p90, p.p99
        ));
    }
    out.push_str(&format!("{:=<72}\n", ""));
    out
}
