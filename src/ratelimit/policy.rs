//! Admission policies and the named policy set.
//!
//! A policy is an immutable `{name, window, max}` triple. Each policy owns
//! its own key namespace (`"<name>:<identity>"`), so the same client can be
//! counted independently by a coarse global policy and by stricter
//! per-route policies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::RateLimitingConfig;
use crate::error::{GatekeeperError, Result};

/// Name of the policy applied to all traffic.
pub const GLOBAL_POLICY: &str = "global";
/// Name of the policy applied to file uploads.
pub const UPLOAD_POLICY: &str = "upload";
/// Name of the policy applied to document analysis requests.
pub const ANALYSIS_POLICY: &str = "analysis";

/// A fixed-window admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    name: String,
    window_secs: u64,
    max_requests: u64,
}

impl AdmissionPolicy {
    /// Create a validated policy.
    ///
    /// The name must be non-empty and free of `:` so that keys from two
    /// policies can never collide.
    pub fn new(name: impl Into<String>, window_secs: u64, max_requests: u64) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(GatekeeperError::Config("policy name must not be empty".into()));
        }
        if name.contains(':') {
            return Err(GatekeeperError::Config(format!(
                "policy name '{}' must not contain ':'",
                name
            )));
        }
        if window_secs == 0 {
            return Err(GatekeeperError::Config(format!(
                "policy '{}': window_seconds must be greater than zero",
                name
            )));
        }
        if max_requests == 0 {
            return Err(GatekeeperError::Config(format!(
                "policy '{}': max_requests must be greater than zero",
                name
            )));
        }

        Ok(Self {
            name,
            window_secs,
            max_requests,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Storage key for `identity` under this policy.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.name, identity)
    }
}

/// The set of named policies the host application can attach to routes.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: HashMap<String, Arc<AdmissionPolicy>>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the policy set from configuration.
    ///
    /// The built-in `global`, `upload` and `analysis` policies are always
    /// present; configured entries with the same name replace them, and
    /// configured fields left out fall back to the global defaults.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let mut set = Self::new();
        set.insert(AdmissionPolicy::new(
            GLOBAL_POLICY,
            config.window_seconds,
            config.max_requests,
        )?);
        set.insert(AdmissionPolicy::new(UPLOAD_POLICY, 3600, 10)?);
        set.insert(AdmissionPolicy::new(ANALYSIS_POLICY, 3600, 20)?);

        for entry in &config.policies {
            let policy = AdmissionPolicy::new(
                entry.name.clone(),
                entry.window_seconds.unwrap_or(config.window_seconds),
                entry.max_requests.unwrap_or(config.max_requests),
            )?;
            info!(
                policy = %policy.name(),
                window_secs = policy.window_secs(),
                max_requests = policy.max_requests(),
                "Configured admission policy"
            );
            set.insert(policy);
        }

        Ok(set)
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, policy: AdmissionPolicy) {
        self.policies.insert(policy.name.clone(), Arc::new(policy));
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<AdmissionPolicy>> {
        self.policies.get(name).cloned()
    }

    /// Look up a policy that the host cannot run without.
    pub fn require(&self, name: &str) -> Result<Arc<AdmissionPolicy>> {
        self.get(name)
            .ok_or_else(|| GatekeeperError::Config(format!("missing admission policy '{}'", name)))
    }

    /// The shortest window across all policies.
    pub fn shortest_window(&self) -> Option<Duration> {
        self.policies.values().map(|p| p.window()).min()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;

    #[test]
    fn test_policy_key_namespacing() {
        let upload = AdmissionPolicy::new("upload", 3600, 10).unwrap();
        let analysis = AdmissionPolicy::new("analysis", 3600, 20).unwrap();

        assert_eq!(upload.key("1.2.3.4"), "upload:1.2.3.4");
        assert_ne!(upload.key("1.2.3.4"), analysis.key("1.2.3.4"));
    }

    #[test]
    fn test_policy_rejects_zero_window() {
        let err = AdmissionPolicy::new("global", 0, 10).unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_policy_rejects_zero_max() {
        assert!(AdmissionPolicy::new("global", 60, 0).is_err());
    }

    #[test]
    fn test_policy_rejects_bad_names() {
        assert!(AdmissionPolicy::new("", 60, 10).is_err());
        assert!(AdmissionPolicy::new("a:b", 60, 10).is_err());
    }

    #[test]
    fn test_default_policy_set() {
        let set = PolicySet::from_config(&RateLimitingConfig::default()).unwrap();
        assert_eq!(set.len(), 3);

        let global = set.require(GLOBAL_POLICY).unwrap();
        assert_eq!(global.window_secs(), 60);
        assert_eq!(global.max_requests(), 120);

        let upload = set.require(UPLOAD_POLICY).unwrap();
        assert_eq!((upload.window_secs(), upload.max_requests()), (3600, 10));

        let analysis = set.require(ANALYSIS_POLICY).unwrap();
        assert_eq!((analysis.window_secs(), analysis.max_requests()), (3600, 20));

        assert_eq!(set.shortest_window(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_configured_policies_override_and_extend() {
        let config = RateLimitingConfig {
            window_seconds: 30,
            max_requests: 50,
            policies: vec![
                PolicyConfig {
                    name: "upload".to_string(),
                    window_seconds: Some(600),
                    max_requests: None,
                },
                PolicyConfig {
                    name: "export".to_string(),
                    window_seconds: None,
                    max_requests: Some(5),
                },
            ],
            ..RateLimitingConfig::default()
        };
        let set = PolicySet::from_config(&config).unwrap();

        let upload = set.require("upload").unwrap();
        assert_eq!((upload.window_secs(), upload.max_requests()), (600, 50));

        let export = set.require("export").unwrap();
        assert_eq!((export.window_secs(), export.max_requests()), (30, 5));

        assert_eq!(set.shortest_window(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_configured_policy_fails() {
        let config = RateLimitingConfig {
            policies: vec![PolicyConfig {
                name: "broken".to_string(),
                window_seconds: Some(0),
                max_requests: None,
            }],
            ..RateLimitingConfig::default()
        };
        assert!(PolicySet::from_config(&config).is_err());
    }

    #[test]
    fn test_require_missing_policy() {
        let set = PolicySet::new();
        assert!(set.is_empty());
        assert!(set.require("global").is_err());
    }
}
