//! TOML scenario configuration.
//!
//! A scenario file declares the whole topology: general run parameters,
//! the service tiers with their stages and resource constants, and the
//! traffic sources. [`SimConfig::build`] turns a validated configuration
//! into a ready-to-run [`Simulation`]; builder code can also skip TOML
//! and call the registration API directly.

use crate::call::{CostOverrides, Params};
use crate::clock::Milliseconds;
use crate::dists::Cdf;
use crate::engine::{BuildError, Simulation};
use crate::resources::ResourceConfig;
use crate::topology::{AppConf, CallSpec, LbConf, SourceConf, StageConf};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Invalid topology: {0}")]
    Build(#[from] BuildError),
}

/// Top-level scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub simulation: SimulationSection,
    #[serde(default, rename = "tier")]
    pub tiers: Vec<TierSection>,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceSection>,
}

/// General run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Human-readable name for this scenario.
    #[serde(default = "default_sim_name")]
    pub name: String,
    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Simulated-time horizon in milliseconds.
    #[serde(default = "default_horizon_ms")]
    pub horizon_ms: Milliseconds,
}

fn default_sim_name() -> String {
    "simulation".to_string()
}

fn default_seed() -> u64 {
    42
}

fn default_horizon_ms() -> Milliseconds {
    1000.0
}

/// One load-balanced service tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSection {
    pub name: String,
    /// Number of worker instances behind the tier's balancer.
    pub pool_size: u16,
    /// Reply body length CDF, in bytes.
    pub reply_len: Cdf,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConf>,
    /// Tier resource constants; engine defaults apply when omitted.
    #[serde(default)]
    pub resources: Option<ResourceConfig>,
}

/// One open-loop traffic source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    pub name: String,
    /// Arrival rate in events per millisecond.
    pub lambda: f64,
    /// Target tier name (without the `-lb` suffix).
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: Milliseconds,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub cost: CostOverrides,
}

fn default_timeout_ms() -> Milliseconds {
    crate::call::DEFAULT_TIMEOUT_MS
}

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.horizon_ms <= 0.0 {
            return Err(ConfigError::Validation(
                "horizon_ms must be > 0".to_string(),
            ));
        }

        let mut tier_names = HashSet::new();
        for tier in &self.tiers {
            if !tier_names.insert(tier.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate tier name: {}",
                    tier.name
                )));
            }
            if tier.pool_size == 0 {
                return Err(ConfigError::Validation(format!(
                    "tier {} must have pool_size > 0",
                    tier.name
                )));
            }
        }

        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if source.lambda <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "source {} must have lambda > 0",
                    source.name
                )));
            }
            if !tier_names.contains(source.endpoint.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "source {} targets unknown endpoint {}",
                    source.name, source.endpoint
                )));
            }
        }

        // Every fan-out target must resolve to a declared tier.
        for tier in &self.tiers {
            for stage in &tier.stages {
                for rc in &stage.remote_calls {
                    if !tier_names.contains(rc.endpoint.as_str()) {
                        return Err(ConfigError::Validation(format!(
                            "tier {} fans out to unknown endpoint {}",
                            tier.name, rc.endpoint
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Assemble the simulation this configuration describes.
    pub fn build(&self) -> Result<Simulation, ConfigError> {
        let mut sim = Simulation::new(&self.simulation.name, self.simulation.seed);
        for tier in &self.tiers {
            sim.register_lb(LbConf::for_app(AppConf {
                name: tier.name.clone(),
                pool_size: tier.pool_size,
                stages: tier.stages.clone(),
                reply_len: tier.reply_len.clone(),
                resources: tier.resources.clone(),
            }))?;
        }
        for source in &self.sources {
            sim.register_source(SourceConf {
                name: source.name.clone(),
                lambda: source.lambda,
                call: CallSpec {
                    endpoint: source.endpoint.clone(),
                    timeout_ms: source.timeout_ms,
                    params: source.params.clone(),
                    cost: source.cost.clone(),
                },
            })?;
        }
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[simulation]
name = "baseline"
seed = 123
horizon_ms = 100.0

[[tier]]
name = "serverA"
pool_size = 5
reply_len = { dist = "uniform", low = 200, high = 20000 }

[[tier.stage]]
local_work = { dist = "uniform", low = 1, high = 10 }

[[source]]
name = "ngrl"
lambda = 0.1
endpoint = "serverA"
"#;

    #[test]
    fn test_parse_config() {
        let config = SimConfig::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.simulation.name, "baseline");
        assert_eq!(config.simulation.seed, 123);
        assert_eq!(config.tiers.len(), 1);
        assert_eq!(config.tiers[0].pool_size, 5);
        assert_eq!(config.sources[0].lambda, 0.1);
        assert_eq!(config.sources[0].timeout_ms, 90.0);
    }

    #[test]
    fn test_build_registers_topology() {
        let config = SimConfig::from_str(SAMPLE_CONFIG).unwrap();
        let sim = config.build().unwrap();
        // 5 workers + 1 balancer (the source is not resource-tracked)
        assert_eq!(sim.resource_histories().len(), 6);
        assert_eq!(sim.pending_in_flight(), 0);
    }

    #[test]
    fn test_defaults() {
        let config = SimConfig::from_str(
            r#"
[simulation]

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }
"#,
        )
        .unwrap();
        assert_eq!(config.simulation.seed, 42);
        assert_eq!(config.simulation.horizon_ms, 1000.0);
        assert_eq!(config.simulation.name, "simulation");
    }

    #[test]
    fn test_validation_zero_pool() {
        let toml = r#"
[simulation]

[[tier]]
name = "a"
pool_size = 0
reply_len = { dist = "uniform", low = 1, high = 2 }
"#;
        assert!(SimConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validation_duplicate_tier() {
        let toml = r#"
[simulation]

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }
"#;
        assert!(SimConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validation_unknown_source_endpoint() {
        let toml = r#"
[simulation]

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }

[[source]]
name = "s"
lambda = 0.1
endpoint = "missing"
"#;
        assert!(SimConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validation_unknown_fanout_endpoint() {
        let toml = r#"
[simulation]

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }

[[tier.stage]]
local_work = { dist = "uniform", low = 1, high = 2 }

[[tier.stage.remote_calls]]
endpoint = "missing"
"#;
        assert!(SimConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_validation_negative_lambda() {
        let toml = r#"
[simulation]

[[tier]]
name = "a"
pool_size = 1
reply_len = { dist = "uniform", low = 1, high = 2 }

[[source]]
name = "s"
lambda = -1.0
endpoint = "a"
"#;
        assert!(SimConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_resources_and_retry_sections_parse() {
        let toml = r#"
[simulation]

[[tier]]
name = "backend"
pool_size = 2
reply_len = { dist = "uniform", low = 100, high = 200 }

[tier.resources]
network_limit = 0.2
network_per_call = { dist = "uniform", low = 0.5, high = 0.6 }
network_decay_rate = 0.1

[[tier]]
name = "frontend"
pool_size = 2
reply_len = { dist = "uniform", low = 100, high = 200 }

[[tier.stage]]
local_work = { dist = "uniform", low = 1, high = 3 }

[[tier.stage.remote_calls]]
endpoint = "backend"
retry = { max_retries = 2, initial_delay_ms = 5.0, backoff_factor = 2.0, max_delay_ms = 50.0, jitter = 0.1 }

[[source]]
name = "gen"
lambda = 0.04
endpoint = "frontend"
timeout_ms = 200.0
"#;
        let config = SimConfig::from_str(toml).unwrap();
        let backend = &config.tiers[0];
        let res = backend.resources.as_ref().unwrap();
        assert_eq!(res.network_limit, 0.2);
        let retry = config.tiers[1].stages[0].remote_calls[0]
            .retry
            .as_ref()
            .unwrap();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.initial_delay_ms, 5.0);
    }
}
