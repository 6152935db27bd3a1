//! Built-in sample topology: a small data center.
//!
//! Four web frontends fan out to a middle tier of services, each service
//! talks to its database through a proxy tier, and four Poisson sources
//! drive the public endpoints. Tier resource constants are tuned per
//! layer: web containers are small (few CPUs, low concurrency), services
//! and proxies are larger and mostly I/O bound.

use crate::dists::Cdf;
use crate::engine::{BuildError, Simulation};
use crate::resources::ResourceConfig;
use crate::topology::{AppConf, CallSpec, LbConf, RemoteCall, SourceConf, StageConf};

const DEFAULT_POOL_SIZE: u16 = 20;
const DB_POOL_SIZE: u16 = 4;
const DEFAULT_TIMEOUT_MS: f64 = 2000.0;

const MEMORY_RECOVERY_MS: f64 = 10_000.0;
const CPU_DELAY_FACTOR: f64 = 2.0;
const CPU_DECAY_RATE: f64 = 0.10;
const MEMORY_DECAY_RATE: f64 = 0.02;
const NETWORK_DECAY_RATE: f64 = 0.50;

/// CDF spread multipliers applied around a tier's nominal per-call cost.
const LOW: f64 = 0.8;
const HIGH: f64 = 1.2;
const REPLY_LOW: f64 = 0.4;
const REPLY_HIGH: f64 = 0.6;

/// Web tier: 2-CPU containers handling ~3 overlapping transactions.
fn web_resources() -> ResourceConfig {
    tier_resources(0.05, 0.10, 0.01, 1.0 / 3.0, 0.40, 0.95, 0.02, 0.04, 0.95)
}

/// Service tier: 16-CPU containers handling ~50 overlapping transactions.
fn svc_resources() -> ResourceConfig {
    tier_resources(
        0.00125,
        0.005,
        0.001,
        1.0 / 50.0,
        0.05,
        0.95,
        0.005,
        0.01,
        0.90,
    )
}

/// DB proxy tier: I/O bound, ~500 overlapping transactions.
fn db_proxy_resources() -> ResourceConfig {
    tier_resources(
        0.000125,
        0.0005,
        0.0001,
        1.0 / 500.0,
        0.005,
        0.95,
        0.001,
        0.002,
        0.85,
    )
}

#[allow(clippy::too_many_arguments)]
fn tier_resources(
    cpu_per_work: f64,
    memory_per_call: f64,
    network_per_call: f64,
    cpu_limit: f64,
    memory_limit: f64,
    network_limit: f64,
    queued_mem_min: f64,
    queued_mem_max: f64,
    cpu_reject_limit: f64,
) -> ResourceConfig {
    ResourceConfig {
        cpu_per_local_work: Cdf::uniform(cpu_per_work * LOW, cpu_per_work * HIGH),
        memory_per_call: Cdf::uniform(memory_per_call * LOW, memory_per_call * HIGH),
        memory_per_queued_call: Cdf::uniform(queued_mem_min, queued_mem_max),
        network_per_call: Cdf::uniform(network_per_call * LOW, network_per_call * HIGH),
        network_per_reply: Cdf::uniform(network_per_call * REPLY_LOW, network_per_call * REPLY_HIGH),
        cpu_limit,
        memory_limit,
        network_limit,
        cpu_reject_limit,
        cpu_delay_factor: CPU_DELAY_FACTOR,
        memory_recovery_ms: MEMORY_RECOVERY_MS,
        cpu_decay_rate: CPU_DECAY_RATE,
        memory_decay_rate: MEMORY_DECAY_RATE,
        network_decay_rate: NETWORK_DECAY_RATE,
    }
}

/// Each service owns a database, reached through its proxy.
const SERVICES: &[(&str, &[&str])] = &[
    ("userdataserv", &["dbproxy-userdata"]),
    ("checkoutserv", &["dbproxy-checkout", "dbproxy-wallet"]),
    ("walletserv", &["dbproxy-wallet"]),
    ("authserv", &["dbproxy-auth", "dbproxy-userdata"]),
    ("fulfillmentserv", &["dbproxy-fulfillment", "dbproxy-checkout"]),
    ("planningserv", &["dbproxy-planning"]),
];

const DATABASES: &[&str] = &[
    "db-userdata",
    "db-checkout",
    "db-wallet",
    "db-auth",
    "db-fulfillment",
    "db-planning",
];

const DB_PROXIES: &[(&str, &str)] = &[
    ("dbproxy-userdata", "db-userdata"),
    ("dbproxy-checkout", "db-checkout"),
    ("dbproxy-wallet", "db-wallet"),
    ("dbproxy-auth", "db-auth"),
    ("dbproxy-fulfillment", "db-fulfillment"),
    ("dbproxy-planning", "db-planning"),
];

const WEB_FRONTENDS: &[(&str, &[&str])] = &[
    ("loginweb", &["authserv", "userdataserv"]),
    ("checkoutweb", &["checkoutserv", "walletserv"]),
    ("planweb", &["planningserv", "userdataserv"]),
    ("payweb", &["walletserv", "fulfillmentserv"]),
];

/// External traffic: `(source, endpoint, lambda per ms)`.
const TRAFFIC: &[(&str, &str, f64)] = &[
    ("login-traffic", "loginweb", 0.005),
    ("checkout-traffic", "checkoutweb", 0.003),
    ("plan-traffic", "planweb", 0.005),
    ("pay-traffic", "payweb", 0.002),
];

/// Build the data center from the bottom up: databases, proxies,
/// services, frontends, then traffic.
pub fn datacenter(seed: u64) -> Result<Simulation, BuildError> {
    let mut sim = Simulation::new("datacenter", seed);

    // Databases: simple endpoints that just add read latency.
    for db in DATABASES {
        sim.register_lb(LbConf::for_app(AppConf {
            name: format!("{db}-read"),
            pool_size: DB_POOL_SIZE,
            stages: vec![StageConf::local(Cdf::uniform(0.5, 1.5))],
            reply_len: Cdf::uniform(100.0, 1000.0),
            resources: None,
        }))?;
        sim.register_lb(LbConf::for_app(AppConf {
            name: format!("{db}-write"),
            pool_size: DB_POOL_SIZE,
            stages: vec![StageConf::local(Cdf::uniform(9.0, 11.0))],
            reply_len: Cdf::uniform(50.0, 200.0),
            resources: None,
        }))?;
    }

    for (proxy, db) in DB_PROXIES {
        sim.register_lb(LbConf::for_app(AppConf {
            name: proxy.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            stages: vec![StageConf::local(Cdf::uniform(0.5, 1.0))
                .with_remote_calls(vec![RemoteCall::to(format!("{db}-read"))])],
            reply_len: Cdf::uniform(100.0, 500.0),
            resources: Some(db_proxy_resources()),
        }))?;
    }

    for (service, proxies) in SERVICES {
        let remote_calls = proxies.iter().map(|p| RemoteCall::to(*p)).collect();
        sim.register_lb(LbConf::for_app(AppConf {
            name: service.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            stages: vec![
                StageConf::local(Cdf::uniform(1.0, 3.0)).with_remote_calls(remote_calls)
            ],
            reply_len: Cdf::uniform(200.0, 2000.0),
            resources: Some(svc_resources()),
        }))?;
    }

    for (web, services) in WEB_FRONTENDS {
        let remote_calls = services.iter().map(|s| RemoteCall::to(*s)).collect();
        sim.register_lb(LbConf::for_app(AppConf {
            name: web.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            stages: vec![
                StageConf::local(Cdf::uniform(2.0, 5.0)).with_remote_calls(remote_calls)
            ],
            reply_len: Cdf::uniform(1000.0, 10_000.0),
            resources: Some(web_resources()),
        }))?;
    }

    for (source, endpoint, lambda) in TRAFFIC {
        sim.register_source(SourceConf {
            name: source.to_string(),
            lambda: *lambda,
            call: CallSpec::to(*endpoint).with_timeout_ms(DEFAULT_TIMEOUT_MS),
        })?;
    }

    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::names;

    #[test]
    fn test_datacenter_builds() {
        let sim = datacenter(42).unwrap();
        // 12 db tiers * 5 + 6 proxies * 21 + 6 services * 21 + 4 webs * 21
        assert!(sim.resource_histories().len() > 300);
    }

    #[test]
    fn test_datacenter_serves_traffic() {
        let mut sim = datacenter(42).unwrap();
        sim.run(2000.0);
        let report = sim.report();

        assert!(report.counters[names::SOURCE_CALL_GENERATED] > 0);
        let latency = &report.distributions[names::LATENCY_MS];
        assert!(latency.count > 0, "no end-to-end replies recorded");
        // A web transaction crosses at least four hops of 1 ms each plus
        // local work at every layer.
        assert!(latency.min >= 4.0);
    }
}
