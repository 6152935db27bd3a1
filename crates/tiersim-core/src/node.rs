//! Per-node event machine.
//!
//! Each simulated node owns an inbound mailbox, a call heap and a task
//! heap (both keyed by wake-up time), an outbound retry queue, and a
//! pending-call table. The engine walks every node once per tick in a
//! fixed order: drain replies, drain the mailbox into the call heap,
//! drain the outbound queue, handle due calls, fire due tasks, then
//! update resources. A node that OOM-killed skips all local work and
//! parks arrivals until its recovery time.

use crate::call::{
    Call, NodeId, PendingCall, Reply, ReplyHandler, STATUS_OK, STATUS_UNAVAILABLE,
    DEFAULT_TIMEOUT_MS,
};
use crate::clock::{Milliseconds, NETWORK_DELAY_MS};
use crate::engine::Simulation;
use crate::metrics::names;
use crate::pqueue::TimeQueue;
use crate::resources::{NodeResources, ResourceConfig, ResourceKind};
use crate::retry::{RetryPolicy, RetryState};
use crate::topology::AppConf;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What kind of node this is. The variant set is closed: plain workers,
/// load balancers, and traffic sources.
#[derive(Debug)]
pub enum NodeRole {
    /// A pool member executing stages and fanning out remote calls.
    Worker { app: Arc<AppConf> },
    /// Round-robin front for a pool of workers.
    LoadBalancer {
        app: Arc<AppConf>,
        pool: Vec<NodeId>,
        cursor: usize,
    },
    /// Open-loop traffic generator; owns queues but does no stage work.
    Source,
}

/// A scheduled unit of local work derived from a stage for a given call.
#[derive(Debug)]
pub struct Task {
    pub wake: Milliseconds,
    /// Index of the stage this task executes the fan-out for.
    pub stage: usize,
    pub call: Call,
    /// Set on the final stage's task, which emits the reply.
    pub is_last: bool,
}

/// A call parked at the sender because the callee refused delivery.
#[derive(Debug)]
pub struct OutboundCall {
    pub call: Call,
    pub callee: NodeId,
    pub queued_at: Milliseconds,
    pub retry: Option<RetryState>,
}

/// A simulation particle that can take in or emit work.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    /// Channel analog: calls delivered by admission, read at tick start.
    pub inbound: VecDeque<Call>,
    /// Channel analog: replies delivered by callees.
    pub replies: VecDeque<Reply>,
    pub calls: TimeQueue<Call>,
    pub tasks: TimeQueue<Task>,
    pub outbound: Vec<OutboundCall>,
    /// Request id -> handler to run when the reply comes back.
    pub pending: HashMap<u64, PendingCall>,
    pub resources: NodeResources,
}

impl Node {
    pub(crate) fn new(name: String, role: NodeRole, config: ResourceConfig) -> Self {
        Self {
            name,
            role,
            inbound: VecDeque::new(),
            replies: VecDeque::new(),
            calls: TimeQueue::new(),
            tasks: TimeQueue::new(),
            outbound: Vec::new(),
            pending: HashMap::new(),
            resources: NodeResources::new(config),
        }
    }
}

impl Simulation {
    /// One tick of a worker or load-balancer node.
    pub(crate) fn node_tick(&mut self, id: NodeId) {
        self.drain_replies(id);

        if self.nodes[id.0].resources.is_down {
            // Park arrivals across the down window; no local work happens.
            loop {
                let call = match self.nodes[id.0].inbound.pop_front() {
                    Some(c) => c,
                    None => break,
                };
                self.nodes[id.0].resources.pending_work.push(call);
            }
            self.update_resources(id);
            return;
        }

        self.drain_inbound(id);
        self.drain_outbound(id);
        self.handle_due_calls(id);
        self.handle_due_tasks(id);
        self.update_resources(id);
    }

    /// Dispatch replies to their pending-call handlers. Runs outside the
    /// down check: a dead node still sinks replies, counting the ones
    /// whose entries vanished with its table.
    pub(crate) fn drain_replies(&mut self, id: NodeId) {
        loop {
            let reply = match self.nodes[id.0].replies.pop_front() {
                Some(r) => r,
                None => break,
            };
            match self.nodes[id.0].pending.remove(&reply.req_id) {
                None => {
                    trace!(req_id = reply.req_id, "reply for unknown request id, dropping");
                    self.metrics.incr(names::CALL_REPLY_DROPPING_UNKNOWN);
                }
                Some(entry) => {
                    self.metrics.incr(names::CALL_REPLY_KNOWN);
                    match entry.handler {
                        ReplyHandler::Observe => {}
                        ReplyHandler::RecordLatency => self.record_source_reply(id, reply),
                        ReplyHandler::Relay { to } => {
                            self.nodes[to.0].replies.push_back(reply);
                        }
                    }
                }
            }
        }
    }

    /// Move newly arrived calls from the mailbox onto the call heap.
    fn drain_inbound(&mut self, id: NodeId) {
        loop {
            let call = match self.nodes[id.0].inbound.pop_front() {
                Some(c) => c,
                None => break,
            };
            let wake = call.wake_time;
            self.nodes[id.0].calls.push(wake, call);
        }
    }

    fn handle_due_calls(&mut self, id: NodeId) {
        let now = self.clock.now_ms();
        loop {
            let call = match self.nodes[id.0].calls.pop_due(now) {
                Some(c) => c,
                None => break,
            };
            if matches!(self.nodes[id.0].role, NodeRole::LoadBalancer { .. }) {
                self.lb_handle_call(id, call);
            } else {
                self.worker_handle_call(id, call);
            }
        }
    }

    /// Accept one call on a worker: charge memory, then decompose the
    /// application's stages into tasks on the task heap.
    fn worker_handle_call(&mut self, id: NodeId, call: Call) {
        let now = self.clock.now_ms();
        if self.nodes[id.0].resources.is_down {
            self.send_error_reply(call);
            return;
        }

        let p = self.rng.p();
        let oomed = {
            let node = &mut self.nodes[id.0];
            let cost = call
                .cost
                .memory
                .as_ref()
                .unwrap_or(&node.resources.config.memory_per_call)
                .sample(p);
            node.resources.charge(ResourceKind::Memory, cost);
            if node.resources.memory_exceeded() {
                node.resources.trip_oom(now);
                node.pending.clear();
                true
            } else {
                false
            }
        };
        if oomed {
            let name = self.nodes[id.0].name.clone();
            self.metrics.incr_node(names::NODE_MEMORY_EXHAUSTION, &name);
            warn!(node = %name, req_id = call.req_id, "memory exhausted handling call, node down");
            return;
        }

        let app = match &self.nodes[id.0].role {
            NodeRole::Worker { app } => Arc::clone(app),
            _ => return,
        };
        if app.stages.is_empty() {
            self.emit_final_reply(id, call);
            return;
        }
        let last = app.stages.len() - 1;
        for (i, stage) in app.stages.iter().enumerate() {
            let p = self.rng.p();
            let wake = now + stage.local_work.sample(p);
            self.nodes[id.0].tasks.push(
                wake,
                Task {
                    wake,
                    stage: i,
                    call: call.clone(),
                    is_last: i == last,
                },
            );
        }
    }

    fn handle_due_tasks(&mut self, id: NodeId) {
        let now = self.clock.now_ms();
        loop {
            // An OOM mid-tick freezes the remaining tasks; they are
            // discarded at recovery.
            if self.nodes[id.0].resources.is_down {
                break;
            }
            let task = match self.nodes[id.0].tasks.pop_due(now) {
                Some(t) => t,
                None => break,
            };
            self.fire_task(id, task);
        }
    }

    /// Fire one task: charge CPU, apply the reject/delay ladder, then run
    /// the stage's fan-out and emit the final reply on the last task.
    fn fire_task(&mut self, id: NodeId, mut task: Task) {
        let now = self.clock.now_ms();
        let p = self.rng.p();
        let (reject, delay, name) = {
            let node = &mut self.nodes[id.0];
            let cost = task
                .call
                .cost
                .cpu
                .as_ref()
                .unwrap_or(&node.resources.config.cpu_per_local_work)
                .sample(p);
            node.resources.charge(ResourceKind::Cpu, cost);
            let cfg = &node.resources.config;
            let reject =
                cfg.cpu_reject_limit > 0.0 && node.resources.cpu.current >= cfg.cpu_reject_limit;
            let delay = if reject { 0.0 } else { node.resources.cpu_delay_ms() };
            (reject, delay, node.name.clone())
        };

        if reject {
            self.metrics.incr_node(names::NODE_CPU_REJECT, &name);
            debug!(node = %name, req_id = task.call.req_id, "cpu reject limit hit, dropping task");
            self.send_error_reply(task.call);
            return;
        }
        if delay > 0.0 {
            self.metrics.incr_node(names::NODE_CPU_DELAY, &name);
            self.charge_queued_memory(id);
            task.wake = now + delay;
            let wake = task.wake;
            self.nodes[id.0].tasks.push(wake, task);
            return;
        }

        self.fan_out(id, task.stage, &task.call);
        if task.is_last {
            self.emit_final_reply(id, task.call);
        }
    }

    /// Mint and send one call per remote-call spec of the given stage.
    fn fan_out(&mut self, id: NodeId, stage_idx: usize, call: &Call) {
        let app = match &self.nodes[id.0].role {
            NodeRole::Worker { app } => Arc::clone(app),
            _ => return,
        };
        let Some(stage) = app.stages.get(stage_idx) else {
            return;
        };
        for rc in &stage.remote_calls {
            if let Some(filter) = &stage.filter {
                if !filter.allows(&rc.endpoint, &call.params) {
                    trace!(endpoint = %rc.endpoint, req_id = call.req_id, "fan-out filtered");
                    continue;
                }
            }
            let Some(lb_id) = self.registry.lookup(&rc.endpoint) else {
                warn!(endpoint = %rc.endpoint, "fan-out endpoint has no registered balancer");
                self.metrics.incr(names::FANOUT_UNKNOWN_ENDPOINT);
                continue;
            };
            let now = self.clock.now_ms();
            let req_id = self.alloc_req_id();
            let params = if call.params.is_empty() {
                rc.params.clone()
            } else {
                call.params.clone()
            };
            let new_call = Call {
                req_id,
                endpoint: rc.endpoint.clone(),
                caller: id,
                start_time: now,
                wake_time: now + NETWORK_DELAY_MS,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                params,
                cost: rc.cost.clone(),
            };
            // Register the pending entry before transmission. The reply is
            // observational: this node's useful work is local.
            self.nodes[id.0].pending.insert(
                req_id,
                PendingCall {
                    handler: ReplyHandler::Observe,
                    issued_at: now,
                },
            );
            if let Err(refused) = self.try_accept_call(lb_id, new_call) {
                self.queue_outbound(id, lb_id, refused, rc.retry.clone());
            }
        }
    }

    /// Emit the success reply for a completed call chain.
    fn emit_final_reply(&mut self, id: NodeId, call: Call) {
        let p_len = self.rng.p();
        let p_net = self.rng.p();
        let (length, saturated, name) = {
            let node = &mut self.nodes[id.0];
            let app = match &node.role {
                NodeRole::Worker { app } => Arc::clone(app),
                _ => return,
            };
            let length = app.reply_len.sample(p_len).max(0.0) as u64;
            let cost = node.resources.config.network_per_reply.sample(p_net);
            // Observational at emit time: the reply goes out regardless.
            let ok = node.resources.charge_network(cost);
            (length, !ok, node.name.clone())
        };
        if saturated {
            self.metrics.incr_node(names::NODE_NETWORK_SATURATED, &name);
        }
        let caller = call.caller;
        let reply = Reply {
            req_id: call.req_id,
            length,
            status: STATUS_OK,
            call,
        };
        self.nodes[caller.0].replies.push_back(reply);
    }

    /// Send a 503 for a call back to its caller's reply channel.
    pub(crate) fn send_error_reply(&mut self, call: Call) {
        let caller = call.caller;
        let reply = Reply {
            req_id: call.req_id,
            length: 0,
            status: STATUS_UNAVAILABLE,
            call,
        };
        self.nodes[caller.0].replies.push_back(reply);
    }

    /// Receiver-side admission: refuse when the callee is down or its
    /// network gate is shut; otherwise charge network and enqueue.
    pub(crate) fn try_accept_call(&mut self, callee: NodeId, call: Call) -> Result<(), Call> {
        let p = self.rng.p();
        if self.nodes[callee.0].resources.is_down {
            trace!(req_id = call.req_id, "admission refused: callee down");
            return Err(call);
        }
        let cost = {
            let node = &self.nodes[callee.0];
            call.cost
                .network
                .as_ref()
                .unwrap_or(&node.resources.config.network_per_call)
                .sample(p)
        };
        if !self.nodes[callee.0].resources.charge_network(cost) {
            let name = self.nodes[callee.0].name.clone();
            self.metrics.incr_node(names::NODE_NETWORK_SATURATED, &name);
            return Err(call);
        }
        self.metrics.incr(names::CALL_CH_SENT);
        self.nodes[callee.0].inbound.push_back(call);
        Ok(())
    }

    /// Park a refused call on the sender's outbound queue.
    pub(crate) fn queue_outbound(
        &mut self,
        sender: NodeId,
        callee: NodeId,
        call: Call,
        retry: Option<RetryPolicy>,
    ) {
        let now = self.clock.now_ms();
        let name = self.nodes[sender.0].name.clone();
        self.metrics.incr_node(names::OUTBOUND_QUEUED, &name);
        self.charge_queued_memory(sender);
        self.nodes[sender.0].outbound.push(OutboundCall {
            call,
            callee,
            queued_at: now,
            retry: retry.map(RetryState::new),
        });
    }

    /// Walk the outbound queue: enforce timeouts, re-attempt delivery,
    /// and advance retry state for survivors.
    pub(crate) fn drain_outbound(&mut self, id: NodeId) {
        if self.nodes[id.0].outbound.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let name = self.nodes[id.0].name.clone();
        let queue = std::mem::take(&mut self.nodes[id.0].outbound);
        let mut survivors = Vec::with_capacity(queue.len());

        for mut oc in queue {
            if let Some(rs) = &oc.retry {
                if rs.next_retry_at > now {
                    survivors.push(oc);
                    continue;
                }
            }
            if now - oc.queued_at > oc.call.timeout_ms {
                self.metrics.incr_node(names::OUTBOUND_TIMEOUT, &name);
                debug!(node = %name, req_id = oc.call.req_id, "outbound call timed out");
                self.send_error_reply(oc.call);
                continue;
            }
            match self.try_accept_call(oc.callee, oc.call) {
                Ok(()) => {
                    self.metrics.incr_node(names::OUTBOUND_DELIVERED, &name);
                }
                Err(call) => {
                    oc.call = call;
                    let mut rs = oc
                        .retry
                        .take()
                        .unwrap_or_else(|| RetryState::new(RetryPolicy::default()));
                    rs.attempt += 1;
                    if rs.exhausted() {
                        self.metrics.incr_node(names::OUTBOUND_RETRY_EXHAUSTED, &name);
                        debug!(node = %name, req_id = oc.call.req_id, attempts = rs.attempt, "retries exhausted");
                        self.send_error_reply(oc.call);
                        continue;
                    }
                    rs.next_retry_at = now + rs.policy.delay_for_attempt(rs.attempt, &mut self.rng);
                    self.metrics.incr_node(names::OUTBOUND_RETRY, &name);
                    oc.retry = Some(rs);
                    survivors.push(oc);
                }
            }
        }
        self.nodes[id.0].outbound = survivors;
    }

    /// One unit of queued-call memory on the sender. This is the cascade
    /// vector: sustained CPU or network pressure builds queue depth, which
    /// can trip OOM.
    fn charge_queued_memory(&mut self, id: NodeId) {
        if matches!(self.nodes[id.0].role, NodeRole::Source) {
            return;
        }
        if self.nodes[id.0].resources.is_down {
            return;
        }
        let p = self.rng.p();
        let now = self.clock.now_ms();
        let oomed = {
            let node = &mut self.nodes[id.0];
            let cost = node.resources.config.memory_per_queued_call.sample(p);
            node.resources.charge(ResourceKind::Memory, cost);
            if node.resources.memory_exceeded() {
                node.resources.trip_oom(now);
                node.pending.clear();
                true
            } else {
                false
            }
        };
        if oomed {
            let name = self.nodes[id.0].name.clone();
            self.metrics.incr_node(names::NODE_MEMORY_EXHAUSTION, &name);
            warn!(node = %name, "memory exhausted from queued work, node down");
        }
    }

    /// Per-tick resource update: recovery or decay, history snapshot,
    /// utilization metric emission.
    fn update_resources(&mut self, id: NodeId) {
        let now = self.clock.now_ms();
        if self.nodes[id.0].resources.try_recover(now) {
            let name = self.nodes[id.0].name.clone();
            self.metrics.incr_node(names::NODE_RECOVERY, &name);
            debug!(node = %name, "node recovered from memory exhaustion");
            let node = &mut self.nodes[id.0];
            node.inbound.clear();
            node.calls.clear();
            node.tasks.clear();
            node.outbound.clear();
            let parked = std::mem::take(&mut node.resources.pending_work);
            for call in parked {
                node.inbound.push_back(call);
            }
        } else {
            self.nodes[id.0].resources.decay_tick();
        }
        self.nodes[id.0].resources.snapshot();

        if !matches!(self.nodes[id.0].role, NodeRole::Source) {
            let name = self.nodes[id.0].name.clone();
            let (cpu, mem, net) = self.nodes[id.0].resources.utilization();
            self.metrics.observe_node(names::CPU_UTILIZATION, &name, cpu * 100.0);
            self.metrics
                .observe_node(names::MEMORY_UTILIZATION, &name, mem * 100.0);
            self.metrics
                .observe_node(names::NETWORK_UTILIZATION, &name, net * 100.0);
        }
    }
}
