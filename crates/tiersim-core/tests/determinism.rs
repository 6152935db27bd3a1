//! Reproducibility: identical (seed, horizon, topology) must give
//! bit-identical counters and distributions.

use tiersim_core::config::SimConfig;
use tiersim_core::run_scenario;

const TOPOLOGY: &str = r#"
[simulation]
name = "determinism"
seed = 1234
horizon_ms = 200.0

[[tier]]
name = "backend"
pool_size = 2
reply_len = { dist = "uniform", low = 100, high = 200 }

[tier.resources]
network_limit = 0.4
network_per_call = { dist = "uniform", low = 0.2, high = 0.3 }

[[tier.stage]]
local_work = { dist = "uniform", low = 1, high = 4 }

[[tier]]
name = "frontend"
pool_size = 3
reply_len = { dist = "uniform", low = 500, high = 2000 }

[[tier.stage]]
local_work = { dist = "uniform", low = 2, high = 6 }

[[tier.stage.remote_calls]]
endpoint = "backend"
retry = { max_retries = 3, initial_delay_ms = 10.0 }

[[source]]
name = "gen"
lambda = 2.0
endpoint = "frontend"
"#;

#[test]
fn test_same_seed_same_report() {
    let config = SimConfig::from_str(TOPOLOGY).unwrap();
    let first = run_scenario(&config).unwrap();
    let second = run_scenario(&config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_different_seed_different_run() {
    let config = SimConfig::from_str(TOPOLOGY).unwrap();
    let first = run_scenario(&config).unwrap();

    let mut other = SimConfig::from_str(TOPOLOGY).unwrap();
    other.simulation.seed = 99;
    let second = run_scenario(&other).unwrap();

    assert_ne!(
        first.distributions, second.distributions,
        "different seeds produced identical runs"
    );
}

#[test]
fn test_report_survives_json_round_trip() {
    let config = SimConfig::from_str(TOPOLOGY).unwrap();
    let report = run_scenario(&config).unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: tiersim_core::RunReport = serde_json::from_str(&json).unwrap();
    assert_eq!(report, back);
}
