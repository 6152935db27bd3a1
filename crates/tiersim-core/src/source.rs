//! Open-loop Poisson traffic sources.
//!
//! A source mints origin calls against a named endpoint with
//! exponentially distributed inter-arrival times. It is a node like any
//! other as far as queues go (refused calls park on its outbound queue),
//! but it does no resource accounting and its reply handler records
//! end-to-end latency instead of relaying.

use crate::call::{Call, NodeId, PendingCall, Reply, ReplyHandler};
use crate::clock::{Milliseconds, NETWORK_DELAY_MS};
use crate::engine::Simulation;
use crate::metrics::names;
use crate::topology::SourceConf;
use rand_distr::Exp;
use tracing::{trace, warn};

/// Engine-side state for one registered source.
#[derive(Debug)]
pub(crate) struct SourceRuntime {
    pub node: NodeId,
    pub conf: SourceConf,
    pub exp: Exp<f64>,
    pub next_arrival: Milliseconds,
}

impl Simulation {
    /// One tick of a source: account replies, retry parked calls, then
    /// fire every arrival due this millisecond. High-rate sources fire
    /// many times per tick.
    pub(crate) fn source_tick(&mut self, idx: usize) {
        let id = self.sources[idx].node;
        self.drain_replies(id);
        self.drain_outbound(id);

        let now = self.clock.now_ms();
        while self.sources[idx].next_arrival <= now {
            let exp = self.sources[idx].exp;
            let step = self.rng.sample_exp(exp).max(1e-9);
            self.sources[idx].next_arrival += step;
            self.fire_source_call(idx);
        }
    }

    /// Mint one origin call and send it toward the target balancer.
    fn fire_source_call(&mut self, idx: usize) {
        let now = self.clock.now_ms();
        let id = self.sources[idx].node;
        let (source_name, spec) = {
            let s = &self.sources[idx];
            (s.conf.name.clone(), s.conf.call.clone())
        };
        let Some(lb_id) = self.registry.lookup(&spec.endpoint) else {
            warn!(source = %source_name, endpoint = %spec.endpoint, "source endpoint has no registered balancer");
            self.metrics.incr(names::FANOUT_UNKNOWN_ENDPOINT);
            return;
        };

        let req_id = self.alloc_req_id();
        self.metrics.incr_node(names::SOURCE_CALL_GENERATED, &source_name);
        trace!(source = %source_name, req_id, endpoint = %spec.endpoint, "minting call");

        let call = Call {
            req_id,
            endpoint: spec.endpoint,
            caller: id,
            start_time: now,
            wake_time: now + NETWORK_DELAY_MS,
            timeout_ms: spec.timeout_ms,
            params: spec.params,
            cost: spec.cost,
        };
        self.nodes[id.0].pending.insert(
            req_id,
            PendingCall {
                handler: ReplyHandler::RecordLatency,
                issued_at: now,
            },
        );
        if let Err(refused) = self.try_accept_call(lb_id, call) {
            self.queue_outbound(id, lb_id, refused, None);
        }
    }

    /// Terminal reply handling at a source: successful replies record
    /// end-to-end latency, failures are counted.
    pub(crate) fn record_source_reply(&mut self, id: NodeId, reply: Reply) {
        let name = self.nodes[id.0].name.clone();
        if reply.is_ok() {
            let latency = self.clock.now_ms() - reply.call.start_time;
            self.metrics.observe_node(names::LATENCY_MS, &name, latency);
        } else {
            self.metrics.incr_node(names::SOURCE_REPLY_ERROR, &name);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dists::Cdf;
    use crate::engine::Simulation;
    use crate::metrics::names;
    use crate::topology::{AppConf, CallSpec, LbConf, SourceConf, StageConf};

    fn tier() -> LbConf {
        LbConf::for_app(AppConf {
            name: "serverA".to_string(),
            pool_size: 2,
            stages: vec![StageConf::local(Cdf::uniform(1.0, 3.0))],
            reply_len: Cdf::uniform(100.0, 500.0),
            resources: None,
        })
    }

    #[test]
    fn test_arrival_count_tracks_lambda() {
        let mut sim = Simulation::new("source-test", 11);
        sim.register_lb(tier()).unwrap();
        sim.register_source(SourceConf {
            name: "gen".to_string(),
            lambda: 0.5,
            call: CallSpec::to("serverA"),
        })
        .unwrap();
        sim.run(400.0);

        // Poisson with lambda 0.5/ms over 400 ms: expect ~200 arrivals.
        let generated = sim.metrics().counter(names::SOURCE_CALL_GENERATED);
        assert!(
            (100..=320).contains(&(generated as i64)),
            "arrival count {generated} far from expectation"
        );
    }

    #[test]
    fn test_high_rate_source_fires_many_per_tick() {
        let mut sim = Simulation::new("burst-test", 3);
        sim.register_lb(tier()).unwrap();
        sim.register_source(SourceConf {
            name: "burst".to_string(),
            lambda: 20.0,
            call: CallSpec::to("serverA"),
        })
        .unwrap();
        sim.run(5.0);

        let generated = sim.metrics().counter(names::SOURCE_CALL_GENERATED);
        assert!(generated > 40, "expected a burst, got {generated}");
    }

    #[test]
    fn test_unknown_endpoint_is_counted_not_fatal() {
        let mut sim = Simulation::new("dangling", 5);
        sim.register_source(SourceConf {
            name: "lost".to_string(),
            lambda: 1.0,
            call: CallSpec::to("nowhere"),
        })
        .unwrap();
        sim.run(20.0);
        assert!(sim.metrics().counter(names::FANOUT_UNKNOWN_ENDPOINT) > 0);
    }
}
