//! TierSim — discrete-event simulator for distributed service topologies.
//!
//! A topology is a graph of service tiers (load-balanced pools of worker
//! instances) connected by remote-call edges and driven by open-loop
//! Poisson traffic sources. The engine advances virtual time in 1 ms
//! ticks and reports per-endpoint latency distributions, per-node
//! resource-utilization histories, and counters for retries, rejections,
//! memory-exhaustion kills and recoveries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌────────────┐     ┌──────────────┐
//! │ Sources  │────▶│   Loop     │────▶│   Metrics    │
//! │ (Poisson)│     │ (1ms tick) │     │  Collection  │
//! └──────────┘     └─────┬──────┘     └──────────────┘
//!                        │
//!              ┌─────────┴─────────┐
//!              │  Registry (name   │
//!              │   -> balancer)    │
//!              └─────────┬─────────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!    ┌──────────┐  ┌──────────┐  ┌──────────┐
//!    │ Tier A   │  │ Tier B   │  │ Tier N   │
//!    │ LB + N   │  │ LB + N   │  │ LB + N   │
//!    │ workers  │  │ workers  │  │ workers  │
//!    └──────────┘  └──────────┘  └──────────┘
//! ```
//!
//! Each node owns an inbound call heap, a task heap and an outbound
//! retry queue, all keyed by wake-up time, plus a CPU/memory/network
//! resource model that gates admission and can cascade into OOM kills.
//! Given the same seed, a run is bit-for-bit reproducible.

pub mod call;
pub mod clock;
pub mod config;
pub mod dists;
pub mod engine;
pub mod lb;
pub mod metrics;
pub mod node;
pub mod pqueue;
pub mod resources;
pub mod retry;
pub mod scenarios;
pub mod source;
pub mod topology;

// Re-export key types for convenience.
pub use call::{Call, CostOverrides, NodeId, Params, Reply, STATUS_OK, STATUS_UNAVAILABLE};
pub use clock::{Milliseconds, SimClock, NETWORK_DELAY_MS, SIM_START_MS};
pub use config::{ConfigError, SimConfig};
pub use dists::{Cdf, SimRng};
pub use engine::{BuildError, Simulation};
pub use metrics::{format_table, Metrics, Percentiles, RunReport};
pub use pqueue::TimeQueue;
pub use resources::{NodeResources, ResourceConfig, ResourceHistory};
pub use retry::{RetryPolicy, RetryState};
pub use topology::{
    AppConf, CallFilter, CallSpec, LbConf, Registry, RemoteCall, SourceConf, StageConf, LB_SUFFIX,
};

/// Build and run the simulation a configuration describes, returning the
/// aggregated run report.
pub fn run_scenario(config: &SimConfig) -> Result<RunReport, ConfigError> {
    let mut sim = config.build()?;
    sim.run(config.simulation.horizon_ms);
    Ok(sim.report())
}
