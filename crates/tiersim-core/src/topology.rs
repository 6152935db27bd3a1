//! Topology configuration and the endpoint registry.
//!
//! A topology is declared as tiers: each tier is a load-balanced pool of
//! identical worker instances described by an [`AppConf`]. Workers do
//! their work in [`StageConf`] stages, each a sample of local work plus an
//! optional fan-out of [`RemoteCall`]s to other tiers. Fan-out resolves a
//! target endpoint by looking up `"<endpoint>-lb"` in the [`Registry`],
//! so builder code registers every tier's balancer under that suffixed
//! name.

use crate::call::{CostOverrides, NodeId, Params, DEFAULT_TIMEOUT_MS};
use crate::clock::Milliseconds;
use crate::dists::Cdf;
use crate::resources::ResourceConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Suffix under which every tier's load balancer is registered.
pub const LB_SUFFIX: &str = "-lb";

/// A remote call a stage fans out to on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Target tier name (without the `-lb` suffix).
    pub endpoint: String,
    /// Default parameter map, used when the inbound call carries none.
    #[serde(default)]
    pub params: Params,
    /// Retry policy applied when the target refuses delivery.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-call resource-cost overrides carried on the minted call.
    #[serde(default)]
    pub cost: CostOverrides,
}

impl RemoteCall {
    pub fn to(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Params::new(),
            retry: None,
            cost: CostOverrides::default(),
        }
    }
}

/// Declarative predicate deciding whether a stage forwards a remote call.
///
/// Reproduces the do-not-forward convention: a call tagged with the given
/// parameter key is not fanned out further, except to endpoints matching
/// the exempt substring (e.g. accounting endpoints that must always see
/// the call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CallFilter {
    SkipOnParam {
        key: String,
        #[serde(default)]
        exempt_endpoint: Option<String>,
    },
}

impl CallFilter {
    /// True when the remote call should be made.
    pub fn allows(&self, endpoint: &str, params: &Params) -> bool {
        match self {
            CallFilter::SkipOnParam {
                key,
                exempt_endpoint,
            } => {
                if let Some(exempt) = exempt_endpoint {
                    if endpoint.contains(exempt.as_str()) {
                        return true;
                    }
                }
                !params.contains_key(key)
            }
        }
    }
}

/// One stage of an application's work: a local-work sample followed by an
/// optional filtered fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConf {
    /// Local work duration CDF, in milliseconds.
    pub local_work: Cdf,
    #[serde(default)]
    pub filter: Option<CallFilter>,
    #[serde(default)]
    pub remote_calls: Vec<RemoteCall>,
}

impl StageConf {
    pub fn local(local_work: Cdf) -> Self {
        Self {
            local_work,
            filter: None,
            remote_calls: Vec::new(),
        }
    }

    pub fn with_remote_calls(mut self, remote_calls: Vec<RemoteCall>) -> Self {
        self.remote_calls = remote_calls;
        self
    }
}

/// Configuration of one application tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConf {
    pub name: String,
    /// Number of worker instances behind the tier's balancer.
    pub pool_size: u16,
    pub stages: Vec<StageConf>,
    /// Reply body length CDF, in bytes.
    pub reply_len: Cdf,
    /// Tier resource constants; defaults apply when omitted.
    #[serde(default)]
    pub resources: Option<ResourceConfig>,
}

/// Registration request for a tier and its load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct LbConf {
    pub name: String,
    pub app: AppConf,
}

impl LbConf {
    /// Balancer named after the application it fronts.
    pub fn for_app(app: AppConf) -> Self {
        Self {
            name: app.name.clone(),
            app,
        }
    }
}

/// Template for the calls a source mints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
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
    DEFAULT_TIMEOUT_MS
}

impl CallSpec {
    pub fn to(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            params: Params::new(),
            cost: CostOverrides::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: Milliseconds) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Configuration of an open-loop Poisson traffic source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConf {
    pub name: String,
    /// Arrival rate in events per millisecond.
    pub lambda: f64,
    pub call: CallSpec,
}

/// Name-to-balancer map used to resolve outbound endpoints.
#[derive(Debug, Default)]
pub struct Registry {
    lbs: HashMap<String, NodeId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a balancer under its already-suffixed name.
    pub fn insert(&mut self, lb_name: String, id: NodeId) {
        self.lbs.insert(lb_name, id);
    }

    /// Resolve a logical endpoint to its balancer.
    pub fn lookup(&self, endpoint: &str) -> Option<NodeId> {
        self.lbs.get(&format!("{endpoint}{LB_SUFFIX}")).copied()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.lookup(endpoint).is_some()
    }

    pub fn len(&self) -> usize {
        self.lbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lbs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_appends_suffix() {
        let mut reg = Registry::new();
        reg.insert("serverA-lb".to_string(), NodeId(7));
        assert_eq!(reg.lookup("serverA"), Some(NodeId(7)));
        assert_eq!(reg.lookup("serverB"), None);
        assert!(reg.contains("serverA"));
    }

    #[test]
    fn test_filter_skips_tagged_params() {
        let filter = CallFilter::SkipOnParam {
            key: "DNF".to_string(),
            exempt_endpoint: Some("count".to_string()),
        };
        let mut params = Params::new();
        assert!(filter.allows("proxy-b", &params));

        params.insert("DNF".to_string(), "1".to_string());
        assert!(!filter.allows("proxy-b", &params));
        // Accounting endpoints are exempt from the skip
        assert!(filter.allows("count-a", &params));
    }

    #[test]
    fn test_filter_without_exemption() {
        let filter = CallFilter::SkipOnParam {
            key: "DNF".to_string(),
            exempt_endpoint: None,
        };
        let mut params = Params::new();
        params.insert("DNF".to_string(), "1".to_string());
        assert!(!filter.allows("count-a", &params));
    }

    #[test]
    fn test_call_spec_defaults() {
        let spec = CallSpec::to("serverA");
        assert_eq!(spec.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(spec.params.is_empty());
        assert!(spec.cost.is_empty());
    }

    #[test]
    fn test_stage_conf_toml() {
        let stage: StageConf = toml::from_str(
            r#"
local_work = { dist = "uniform", low = 1.0, high = 5.0 }
filter = { rule = "skip_on_param", key = "DNF", exempt_endpoint = "count" }

[[remote_calls]]
endpoint = "count-a"

[[remote_calls]]
endpoint = "proxy-b"
params = { DNF = "1" }
"#,
        )
        .unwrap();
        assert_eq!(stage.remote_calls.len(), 2);
        assert_eq!(stage.remote_calls[1].params.get("DNF").unwrap(), "1");
        assert!(stage.filter.is_some());
    }
}
