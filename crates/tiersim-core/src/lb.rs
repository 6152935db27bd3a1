//! Round-robin load balancing.
//!
//! A load balancer is a node whose call handling forwards each inbound
//! call to one pool member and relays the worker's reply back to the
//! original caller under the same request id. Balancers run no stages and
//! charge no CPU or per-call memory; their network gate and outbound
//! queue behave like any other node's.

use crate::call::{Call, NodeId, PendingCall, ReplyHandler};
use crate::clock::NETWORK_DELAY_MS;
use crate::engine::Simulation;
use crate::metrics::names;
use crate::node::NodeRole;
use tracing::trace;

impl Simulation {
    /// Forward one inbound call to the next pool member in rotation.
    pub(crate) fn lb_handle_call(&mut self, id: NodeId, mut call: Call) {
        if self.nodes[id.0].resources.is_down {
            self.send_error_reply(call);
            return;
        }
        let now = self.clock.now_ms();

        let (worker, lb_name) = {
            let node = &mut self.nodes[id.0];
            match &mut node.role {
                NodeRole::LoadBalancer { pool, cursor, .. } => {
                    *cursor += 1;
                    (pool[*cursor % pool.len()], node.name.clone())
                }
                _ => return,
            }
        };

        let orig_caller = call.caller;
        call.caller = id;
        call.wake_time = now + NETWORK_DELAY_MS;
        call.endpoint = self.nodes[worker.0].name.clone();
        trace!(lb = %lb_name, req_id = call.req_id, worker = %call.endpoint, "forwarding call");
        self.metrics.incr_node(names::LB_CALL_SEND, &lb_name);

        // Same request id end to end: the relay entry routes the worker's
        // reply back to whoever called the balancer.
        self.nodes[id.0].pending.insert(
            call.req_id,
            PendingCall {
                handler: ReplyHandler::Relay { to: orig_caller },
                issued_at: now,
            },
        );
        if let Err(refused) = self.try_accept_call(worker, call) {
            self.queue_outbound(id, worker, refused, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dists::Cdf;
    use crate::engine::Simulation;
    use crate::metrics::names;
    use crate::resources::ResourceConfig;
    use crate::topology::{AppConf, CallSpec, LbConf, SourceConf, StageConf};

    /// A tier with costs zeroed out so admission never refuses.
    fn free_tier(name: &str, pool_size: u16) -> LbConf {
        LbConf::for_app(AppConf {
            name: name.to_string(),
            pool_size,
            stages: vec![StageConf::local(Cdf::uniform(1.0, 2.0))],
            reply_len: Cdf::uniform(100.0, 200.0),
            resources: Some(ResourceConfig {
                // Memory kept at a small cost with near-zero decay so
                // traffic stays visible in each worker's history.
                memory_per_call: Cdf::uniform(0.01, 0.02),
                memory_decay_rate: 0.0001,
                network_per_call: Cdf::uniform(0.0, 0.0),
                network_per_reply: Cdf::uniform(0.0, 0.0),
                cpu_per_local_work: Cdf::uniform(0.0, 0.0),
                ..ResourceConfig::default()
            }),
        })
    }

    #[test]
    fn test_round_robin_spreads_calls_across_pool() {
        let mut sim = Simulation::new("lb-test", 7);
        sim.register_lb(free_tier("serverA", 4)).unwrap();
        sim.register_source(SourceConf {
            name: "gen".to_string(),
            lambda: 2.0,
            call: CallSpec::to("serverA"),
        })
        .unwrap();
        sim.run(60.0);

        // With ~120 forwarded calls over a pool of 4, every worker must
        // have seen some traffic.
        let sent = sim.metrics().counter(names::LB_CALL_SEND);
        assert!(sent > 20, "expected forwarded calls, got {sent}");
        let histories = sim.resource_histories();
        for (worker, hist) in &histories {
            if !worker.starts_with("serverA-") || worker.ends_with("-lb") {
                continue;
            }
            assert!(
                hist.memory.iter().any(|&v| v > 0.0),
                "worker {worker} saw no calls"
            );
        }
        // Replies relayed back means latencies were recorded.
        let lat = sim.metrics().distribution(names::LATENCY_MS);
        assert!(lat.is_some_and(|v| !v.is_empty()));
    }
}
