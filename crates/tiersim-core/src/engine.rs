//! The loop driver: topology registration and the global time-stepper.
//!
//! A [`Simulation`] owns every node, the endpoint registry, the shared
//! PRNG and the metrics collector. [`Simulation::run`] advances virtual
//! time in 1 ms ticks; on each tick every source fires its due arrivals
//! and every node processes its queues. The walk order is fixed at
//! registration time, so a seeded run is fully deterministic. Cross-node
//! interaction happens only through mailboxes, which plays the role of
//! the end-of-tick barrier between peers.

use crate::call::NodeId;
use crate::clock::{Milliseconds, SimClock, SIM_START_MS};
use crate::dists::SimRng;
use crate::metrics::{format_table, Metrics, RunReport};
use crate::node::{Node, NodeRole};
use crate::resources::{ResourceConfig, ResourceHistory};
use crate::source::SourceRuntime;
use crate::topology::{LbConf, Registry, SourceConf, LB_SUFFIX};
use rand_distr::Exp;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while assembling a topology.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    #[error("tier {0} has an empty pool")]
    EmptyPool(String),
    #[error("source {0} must have a positive lambda")]
    InvalidLambda(String),
}

/// The top-level simulation container and time-stepper.
pub struct Simulation {
    name: String,
    seed: u64,
    pub(crate) clock: SimClock,
    pub(crate) rng: SimRng,
    pub(crate) nodes: Vec<Node>,
    pub(crate) sources: Vec<SourceRuntime>,
    /// Workers and balancers in registration order; the per-tick walk.
    pub(crate) node_order: Vec<NodeId>,
    pub(crate) registry: Registry,
    pub(crate) metrics: Metrics,
    next_req_id: u64,
    horizon_ms: Milliseconds,
}

impl Simulation {
    /// Create an empty simulation. The seed fixes the PRNG and therefore
    /// every variate drawn during the run.
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            seed,
            clock: SimClock::new(),
            rng: SimRng::new(seed),
            nodes: Vec::new(),
            sources: Vec::new(),
            node_order: Vec::new(),
            registry: Registry::new(),
            metrics: Metrics::new(),
            next_req_id: 0,
            horizon_ms: 0.0,
        }
    }

    /// Register a tier: `pool_size` worker instances plus the round-robin
    /// balancer that fronts them, entered into the endpoint registry
    /// under `"<name>-lb"`.
    pub fn register_lb(&mut self, conf: LbConf) -> Result<(), BuildError> {
        if conf.app.pool_size == 0 {
            return Err(BuildError::EmptyPool(conf.app.name.clone()));
        }
        let app = Arc::new(conf.app);
        let resources = app.resources.clone().unwrap_or_default();

        let mut pool = Vec::with_capacity(app.pool_size as usize);
        for i in 0..app.pool_size {
            let name = format!("{}-{}", app.name, i);
            let id = self.add_node(
                name,
                NodeRole::Worker {
                    app: Arc::clone(&app),
                },
                resources.clone(),
            )?;
            pool.push(id);
            self.node_order.push(id);
        }

        let lb_name = format!("{}{}", conf.name, LB_SUFFIX);
        let id = self.add_node(
            lb_name.clone(),
            NodeRole::LoadBalancer {
                app: Arc::clone(&app),
                pool,
                cursor: 0,
            },
            resources,
        )?;
        self.node_order.push(id);
        self.registry.insert(lb_name, id);
        Ok(())
    }

    /// Register an open-loop Poisson traffic source.
    pub fn register_source(&mut self, conf: SourceConf) -> Result<(), BuildError> {
        let exp = Exp::new(conf.lambda)
            .map_err(|_| BuildError::InvalidLambda(conf.name.clone()))?;
        let id = self.add_node(conf.name.clone(), NodeRole::Source, ResourceConfig::default())?;
        let next_arrival = SIM_START_MS + self.rng.sample_exp(exp);
        self.sources.push(SourceRuntime {
            node: id,
            conf,
            exp,
            next_arrival,
        });
        Ok(())
    }

    fn add_node(
        &mut self,
        name: String,
        role: NodeRole,
        config: ResourceConfig,
    ) -> Result<NodeId, BuildError> {
        if self.nodes.iter().any(|n| n.name == name) {
            return Err(BuildError::DuplicateName(name));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name, role, config));
        Ok(id)
    }

    /// Run the simulation for `horizon_ms` of virtual time.
    pub fn run(&mut self, horizon_ms: Milliseconds) {
        self.horizon_ms = horizon_ms;
        let end = SIM_START_MS + horizon_ms;
        info!(
            scenario = %self.name,
            seed = self.seed,
            horizon_ms,
            nodes = self.nodes.len(),
            sources = self.sources.len(),
            "starting simulation"
        );

        while self.clock.now_ms() < end {
            for idx in 0..self.sources.len() {
                self.source_tick(idx);
            }
            for i in 0..self.node_order.len() {
                let id = self.node_order[i];
                self.node_tick(id);
            }
            self.clock.tick();
        }

        // Shutdown sweep: relay nodes first so in-flight replies still
        // reach their sources and get accounted.
        for i in 0..self.node_order.len() {
            let id = self.node_order[i];
            self.drain_replies(id);
        }
        for idx in 0..self.sources.len() {
            let id = self.sources[idx].node;
            self.drain_replies(id);
        }

        info!(final_time = self.clock.now_ms(), "simulation complete");
    }

    /// Allocate the next run-global request id.
    pub(crate) fn alloc_req_id(&mut self) -> u64 {
        self.next_req_id += 1;
        self.next_req_id
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> Milliseconds {
        self.clock.now_ms()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Aggregate the run's counters and distributions into a report.
    pub fn report(&self) -> RunReport {
        self.metrics.report(&self.name, self.seed, self.horizon_ms)
    }

    /// Human-readable statistics for the run.
    pub fn stats(&self) -> String {
        format_table(&self.report())
    }

    /// Calls still parked on outbound queues across all nodes.
    pub fn outbound_in_flight(&self) -> usize {
        self.nodes.iter().map(|n| n.outbound.len()).sum()
    }

    /// Pending-call entries still waiting for a reply across all nodes.
    pub fn pending_in_flight(&self) -> usize {
        self.nodes.iter().map(|n| n.pending.len()).sum()
    }

    /// Per-node resource utilization histories, for diagnostics and the
    /// property tests.
    pub fn resource_histories(&self) -> BTreeMap<String, ResourceHistory> {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.role, NodeRole::Source))
            .map(|n| {
                (
                    n.name.clone(),
                    ResourceHistory {
                        cpu: n.resources.cpu.history.clone(),
                        memory: n.resources.memory.history.clone(),
                        network: n.resources.network.history.clone(),
                    },
                )
            })
            .collect()
    }
}
