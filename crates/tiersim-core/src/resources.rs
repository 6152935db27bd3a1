//! Per-node resource accounting: CPU, memory, and network.
//!
//! The three resources play different roles. Network is a fast-decaying
//! admission gate: a receiver whose network utilization sits above its
//! limit refuses new calls, which is the backpressure signal senders react
//! to. Memory is a slow-decaying capacity: exceeding its limit kills the
//! node for a recovery window (OOM). CPU converts pressure into latency:
//! tasks fired above the soft limit get delayed, and above the hard reject
//! limit they are dropped with a 503.

use crate::call::Call;
use crate::clock::Milliseconds;
use crate::dists::Cdf;
use serde::{Deserialize, Serialize};

/// The three tracked resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cpu,
    Memory,
    Network,
}

/// Utilization state for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceState {
    /// Current utilization in `[0, 1]`.
    pub current: f64,
    /// Soft limit in `[0, 1]`.
    pub limit: f64,
    /// Per-tick utilization history for diagnostics.
    pub history: Vec<f64>,
}

impl ResourceState {
    fn new(limit: f64) -> Self {
        Self {
            current: 0.0,
            limit,
            history: Vec::new(),
        }
    }

    fn charge(&mut self, amount: f64) {
        self.current = (self.current + amount).min(1.0);
    }

    fn decay(&mut self, rate: f64) {
        self.current = (self.current - rate).max(0.0);
    }
}

/// Per-tier resource constants: consumption CDFs, limits, decay rates and
/// recovery settings. All fields have defaults, so a tier may configure
/// only the knobs it cares about (or omit the whole section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// CPU charged per task firing.
    pub cpu_per_local_work: Cdf,
    /// Memory charged per accepted call.
    pub memory_per_call: Cdf,
    /// Memory charged per queued or re-queued unit of work.
    pub memory_per_queued_call: Cdf,
    /// Network charged on admission.
    pub network_per_call: Cdf,
    /// Network charged on reply emission.
    pub network_per_reply: Cdf,

    pub cpu_limit: f64,
    pub memory_limit: f64,
    pub network_limit: f64,

    /// Hard CPU threshold above which tasks are rejected with 503.
    /// Zero disables the check.
    pub cpu_reject_limit: f64,
    /// Multiplier applied to CPU overage when delaying a task.
    pub cpu_delay_factor: f64,
    /// Downtime after a memory exhaustion kill.
    pub memory_recovery_ms: Milliseconds,

    /// Decay per millisecond; network decays fastest, memory slowest.
    pub cpu_decay_rate: f64,
    pub memory_decay_rate: f64,
    pub network_decay_rate: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu_per_local_work: Cdf::uniform(0.1, 0.3),
            memory_per_call: Cdf::uniform(0.05, 0.15),
            memory_per_queued_call: Cdf::uniform(0.01, 0.05),
            network_per_call: Cdf::uniform(0.1, 0.2),
            network_per_reply: Cdf::uniform(0.05, 0.1),

            cpu_limit: 0.95,
            memory_limit: 0.90,
            network_limit: 0.85,

            cpu_reject_limit: 0.0,
            cpu_delay_factor: 2.0,
            memory_recovery_ms: 15_000.0,

            cpu_decay_rate: 0.1,
            memory_decay_rate: 0.02,
            network_decay_rate: 0.15,
        }
    }
}

/// Copy of a node's per-tick utilization history, as surfaced for
/// diagnostics and reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceHistory {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub network: Vec<f64>,
}

/// All resource state for a node, including the down/recovery window and
/// the work parked while the node was down.
#[derive(Debug, Clone)]
pub struct NodeResources {
    pub cpu: ResourceState,
    pub memory: ResourceState,
    pub network: ResourceState,

    pub is_down: bool,
    /// When the node becomes available again.
    pub down_until: Milliseconds,
    /// Calls that arrived during the down window, reattached on recovery.
    pub pending_work: Vec<Call>,

    pub config: ResourceConfig,
}

impl NodeResources {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            cpu: ResourceState::new(config.cpu_limit),
            memory: ResourceState::new(config.memory_limit),
            network: ResourceState::new(config.network_limit),
            is_down: false,
            down_until: 0.0,
            pending_work: Vec::new(),
            config,
        }
    }

    /// Add `amount` to a resource, saturating at full utilization.
    pub fn charge(&mut self, kind: ResourceKind, amount: f64) {
        match kind {
            ResourceKind::Cpu => self.cpu.charge(amount),
            ResourceKind::Memory => self.memory.charge(amount),
            ResourceKind::Network => self.network.charge(amount),
        }
    }

    /// Admission gate. Refuses while network utilization sits above the
    /// limit; otherwise charges the cost (overshoot allowed, clamped at 1).
    /// Used for both call admission and reply emission; reply emission
    /// ignores a refusal beyond counting it.
    pub fn charge_network(&mut self, cost: f64) -> bool {
        if self.network.current > self.network.limit {
            return false;
        }
        self.network.charge(cost);
        true
    }

    pub fn memory_exceeded(&self) -> bool {
        self.memory.current > self.memory.limit
    }

    /// Transition to the down state after a memory exhaustion kill.
    /// Work parked for the down window is discarded; the node's queues are
    /// cleared later, at recovery time.
    pub fn trip_oom(&mut self, now: Milliseconds) {
        self.is_down = true;
        self.down_until = now + self.config.memory_recovery_ms;
        self.pending_work.clear();
    }

    /// Clear the down state once the recovery window has elapsed,
    /// zeroing all utilization. Returns true on the transition tick.
    pub fn try_recover(&mut self, now: Milliseconds) -> bool {
        if self.is_down && now >= self.down_until {
            self.is_down = false;
            self.cpu.current = 0.0;
            self.memory.current = 0.0;
            self.network.current = 0.0;
            return true;
        }
        false
    }

    /// Apply per-tick decay. Down nodes hold their utilization frozen
    /// until recovery zeroes it.
    pub fn decay_tick(&mut self) {
        if self.is_down {
            return;
        }
        self.cpu.decay(self.config.cpu_decay_rate);
        self.memory.decay(self.config.memory_decay_rate);
        self.network.decay(self.config.network_decay_rate);
    }

    /// Append current utilization to the history arrays.
    pub fn snapshot(&mut self) {
        self.cpu.history.push(self.cpu.current);
        self.memory.history.push(self.memory.current);
        self.network.history.push(self.network.current);
    }

    /// Extra milliseconds of delay for a task fired while CPU is over its
    /// soft limit; zero when under.
    pub fn cpu_delay_ms(&self) -> Milliseconds {
        if self.cpu.current > self.cpu.limit {
            (self.cpu.current - self.cpu.limit) * self.config.cpu_delay_factor
        } else {
            0.0
        }
    }

    /// Current `(cpu, memory, network)` utilization.
    pub fn utilization(&self) -> (f64, f64, f64) {
        (
            self.cpu.current,
            self.memory.current,
            self.network.current,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> NodeResources {
        NodeResources::new(ResourceConfig::default())
    }

    #[test]
    fn test_charge_saturates_at_one() {
        let mut r = resources();
        r.charge(ResourceKind::Cpu, 0.7);
        r.charge(ResourceKind::Cpu, 0.7);
        assert_eq!(r.cpu.current, 1.0);
    }

    #[test]
    fn test_decay_floors_at_zero() {
        let mut r = resources();
        r.charge(ResourceKind::Network, 0.1);
        for _ in 0..10 {
            r.decay_tick();
        }
        assert_eq!(r.network.current, 0.0);
    }

    #[test]
    fn test_network_gate_refuses_above_limit() {
        let mut r = NodeResources::new(ResourceConfig {
            network_limit: 0.3,
            ..ResourceConfig::default()
        });
        assert!(r.charge_network(0.45));
        assert_eq!(r.network.current, 0.45);
        // Now above the limit: refuse without charging
        assert!(!r.charge_network(0.1));
        assert_eq!(r.network.current, 0.45);
    }

    #[test]
    fn test_network_gate_reopens_after_decay() {
        let mut r = NodeResources::new(ResourceConfig {
            network_limit: 0.3,
            network_decay_rate: 0.2,
            ..ResourceConfig::default()
        });
        assert!(r.charge_network(0.45));
        assert!(!r.charge_network(0.45));
        r.decay_tick();
        assert!(r.charge_network(0.45));
    }

    #[test]
    fn test_oom_and_recovery_cycle() {
        let mut r = NodeResources::new(ResourceConfig {
            memory_limit: 0.4,
            memory_recovery_ms: 20.0,
            ..ResourceConfig::default()
        });
        r.charge(ResourceKind::Memory, 0.5);
        assert!(r.memory_exceeded());

        r.trip_oom(1000.0);
        assert!(r.is_down);
        assert_eq!(r.down_until, 1020.0);

        assert!(!r.try_recover(1010.0));
        assert!(r.is_down);

        assert!(r.try_recover(1020.0));
        assert!(!r.is_down);
        assert_eq!(r.memory.current, 0.0);
        assert_eq!(r.cpu.current, 0.0);
        assert_eq!(r.network.current, 0.0);
    }

    #[test]
    fn test_down_node_holds_utilization() {
        let mut r = resources();
        r.charge(ResourceKind::Cpu, 0.5);
        r.trip_oom(1000.0);
        r.decay_tick();
        assert_eq!(r.cpu.current, 0.5);
    }

    #[test]
    fn test_cpu_delay_proportional_to_overage() {
        let mut r = NodeResources::new(ResourceConfig {
            cpu_limit: 0.2,
            cpu_delay_factor: 3.0,
            ..ResourceConfig::default()
        });
        assert_eq!(r.cpu_delay_ms(), 0.0);
        r.charge(ResourceKind::Cpu, 0.5);
        assert!((r.cpu_delay_ms() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_records_history_within_bounds() {
        let mut r = resources();
        for _ in 0..5 {
            r.charge(ResourceKind::Memory, 0.3);
            r.decay_tick();
            r.snapshot();
        }
        assert_eq!(r.memory.history.len(), 5);
        for v in &r.memory.history {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let cfg: ResourceConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ResourceConfig::default());
    }

    #[test]
    fn test_config_partial_toml_overrides() {
        let cfg: ResourceConfig = toml::from_str(
            r#"
memory_limit = 0.4
memory_recovery_ms = 20.0
memory_per_call = { dist = "uniform", low = 0.3, high = 0.5 }
"#,
        )
        .unwrap();
        assert_eq!(cfg.memory_limit, 0.4);
        assert_eq!(cfg.memory_recovery_ms, 20.0);
        assert_eq!(cfg.memory_per_call, Cdf::uniform(0.3, 0.5));
        // Untouched knobs keep their defaults
        assert_eq!(cfg.cpu_limit, 0.95);
    }
}
