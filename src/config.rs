//! File-based harness settings
//!
//! Settings are read from YAML, every field optional:
//!
//! ```yaml
//! service:
//!   namespace: default
//!   name: nginx-lb
//! backends:
//!   namespace: metallb-system
//!   labelSelector: component=speaker
//!   node: worker-0
//! mode: multiple
//! families: dualstack
//! connectionsPerFamily: 4
//! globalTimeoutSecs: 900
//! probe:
//!   readDeadlineMs: 300
//! ```
//!
//! CLI flags override file values; [`HarnessSettings::into_config`] validates
//! the merged result and produces a [`HarnessConfig`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::IpFamilyPolicy;
use crate::failover::{BackendSelector, FailoverTimings};
use crate::harness::{HarnessConfig, ProbeMode, ServiceRef};
use crate::probe::ProbeTimings;
use crate::{Error, Result};

/// Default namespace of the backend pods (the MetalLB speakers)
pub const DEFAULT_BACKEND_NAMESPACE: &str = "metallb-system";
/// Default label selector of the backend pods
pub const DEFAULT_BACKEND_SELECTOR: &str = "component=speaker";
/// Default namespace of the service under test
pub const DEFAULT_SERVICE_NAMESPACE: &str = "default";

/// Service section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSettings {
    /// Service namespace
    pub namespace: String,
    /// Service name
    pub name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            name: String::new(),
        }
    }
}

/// Backend section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendSettings {
    /// Backend namespace
    pub namespace: String,
    /// Backend label selector
    pub label_selector: String,
    /// Node whose backend is replaced
    pub node: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_BACKEND_NAMESPACE.to_string(),
            label_selector: DEFAULT_BACKEND_SELECTOR.to_string(),
            node: String::new(),
        }
    }
}

/// Probe timing section, in milliseconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProbeSettings {
    /// Actor dial budget
    pub dial_budget_ms: u64,
    /// Actor per-attempt dial timeout
    pub dial_attempt_timeout_ms: u64,
    /// Spawner dial timeout
    pub spawner_dial_timeout_ms: u64,
    /// Read deadline
    pub read_deadline_ms: u64,
    /// Write timeout
    pub write_timeout_ms: u64,
    /// Pause between iterations
    pub interval_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        let d = ProbeTimings::default();
        Self {
            dial_budget_ms: millis(d.dial_budget),
            dial_attempt_timeout_ms: millis(d.dial_attempt_timeout),
            spawner_dial_timeout_ms: millis(d.spawner_dial_timeout),
            read_deadline_ms: millis(d.read_deadline),
            write_timeout_ms: millis(d.write_timeout),
            interval_ms: millis(d.interval),
        }
    }
}

impl From<&ProbeSettings> for ProbeTimings {
    fn from(s: &ProbeSettings) -> Self {
        Self {
            dial_budget: Duration::from_millis(s.dial_budget_ms),
            dial_attempt_timeout: Duration::from_millis(s.dial_attempt_timeout_ms),
            spawner_dial_timeout: Duration::from_millis(s.spawner_dial_timeout_ms),
            read_deadline: Duration::from_millis(s.read_deadline_ms),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            interval: Duration::from_millis(s.interval_ms),
        }
    }
}

/// Failover timing section, in seconds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FailoverSettings {
    /// Deletion acknowledgement timeout
    pub delete_timeout_secs: u64,
    /// Poll interval while waiting for the deletion to land
    pub delete_poll_interval_secs: u64,
    /// Replacement poll interval
    pub replacement_interval_secs: u64,
    /// Replacement timeout
    pub replacement_timeout_secs: u64,
    /// Readiness poll interval
    pub ready_interval_secs: u64,
    /// Readiness timeout
    pub ready_timeout_secs: u64,
}

impl Default for FailoverSettings {
    fn default() -> Self {
        let d = FailoverTimings::default();
        Self {
            delete_timeout_secs: d.delete_timeout.as_secs(),
            delete_poll_interval_secs: d.delete_poll_interval.as_secs(),
            replacement_interval_secs: d.replacement_interval.as_secs(),
            replacement_timeout_secs: d.replacement_timeout.as_secs(),
            ready_interval_secs: d.ready_interval.as_secs(),
            ready_timeout_secs: d.ready_timeout.as_secs(),
        }
    }
}

impl From<&FailoverSettings> for FailoverTimings {
    fn from(s: &FailoverSettings) -> Self {
        Self {
            delete_timeout: Duration::from_secs(s.delete_timeout_secs),
            delete_poll_interval: Duration::from_secs(s.delete_poll_interval_secs),
            replacement_interval: Duration::from_secs(s.replacement_interval_secs),
            replacement_timeout: Duration::from_secs(s.replacement_timeout_secs),
            ready_interval: Duration::from_secs(s.ready_interval_secs),
            ready_timeout: Duration::from_secs(s.ready_timeout_secs),
        }
    }
}

/// Complete harness settings as read from file and flags
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessSettings {
    /// Service under test
    pub service: ServiceSettings,
    /// Backend to replace
    pub backends: BackendSettings,
    /// Traffic mode
    pub mode: ProbeMode,
    /// Address families
    pub families: IpFamilyPolicy,
    /// Probe units per family
    pub connections_per_family: usize,
    /// Ingress wait, seconds
    pub ingress_timeout_secs: u64,
    /// Global timeout, seconds
    pub global_timeout_secs: u64,
    /// Allowed failure rate for multiple-connection runs, percent
    pub max_failure_rate_percent: f64,
    /// Probe timings
    pub probe: ProbeSettings,
    /// Failover timings
    pub failover: FailoverSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            backends: BackendSettings::default(),
            mode: ProbeMode::default(),
            families: IpFamilyPolicy::default(),
            connections_per_family: 1,
            ingress_timeout_secs: 120,
            global_timeout_secs: crate::harness::DEFAULT_GLOBAL_TIMEOUT.as_secs(),
            max_failure_rate_percent: crate::harness::DEFAULT_MAX_FAILURE_RATE_PERCENT,
            probe: ProbeSettings::default(),
            failover: FailoverSettings::default(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl HarnessSettings {
    /// Parse settings from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse settings: {}", e)))
    }

    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
        Self::from_yaml(&content)
    }

    /// Check that a run can be built from these settings
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("service.name", &self.service.name),
            ("service.namespace", &self.service.namespace),
            ("backends.namespace", &self.backends.namespace),
            ("backends.labelSelector", &self.backends.label_selector),
            ("backends.node", &self.backends.node),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(Error::config(format!("{} must not be empty", field)));
        }
        if self.connections_per_family == 0 {
            return Err(Error::config("connectionsPerFamily must be at least 1"));
        }
        if self.global_timeout_secs == 0 {
            return Err(Error::config("globalTimeoutSecs must be greater than 0"));
        }
        if !self.max_failure_rate_percent.is_finite() || self.max_failure_rate_percent < 0.0 {
            return Err(Error::config(format!(
                "maxFailureRatePercent must be a non-negative number, got {}",
                self.max_failure_rate_percent
            )));
        }
        let probe_deadlines = [
            ("probe.dialAttemptTimeoutMs", self.probe.dial_attempt_timeout_ms),
            ("probe.spawnerDialTimeoutMs", self.probe.spawner_dial_timeout_ms),
            ("probe.readDeadlineMs", self.probe.read_deadline_ms),
            ("probe.writeTimeoutMs", self.probe.write_timeout_ms),
        ];
        if let Some((field, _)) = probe_deadlines.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::config(format!("{} must be greater than 0", field)));
        }
        let failover_intervals = [
            ("failover.deletePollIntervalSecs", self.failover.delete_poll_interval_secs),
            ("failover.replacementIntervalSecs", self.failover.replacement_interval_secs),
            ("failover.readyIntervalSecs", self.failover.ready_interval_secs),
        ];
        if let Some((field, _)) = failover_intervals.iter().find(|(_, s)| *s == 0) {
            return Err(Error::config(format!("{} must be greater than 0", field)));
        }
        Ok(())
    }

    /// Validate and convert into a runtime config
    pub fn into_config(self) -> Result<HarnessConfig> {
        self.validate()?;

        let mut config = HarnessConfig::new(
            ServiceRef {
                namespace: self.service.namespace,
                name: self.service.name,
            },
            BackendSelector {
                namespace: self.backends.namespace,
                label_selector: self.backends.label_selector,
                node: self.backends.node,
            },
        );
        config.mode = self.mode;
        config.families = self.families;
        config.connections_per_family = self.connections_per_family;
        config.ingress_timeout = Duration::from_secs(self.ingress_timeout_secs);
        config.global_timeout = Duration::from_secs(self.global_timeout_secs);
        config.max_failure_rate_percent = self.max_failure_rate_percent;
        config.probe = ProbeTimings::from(&self.probe);
        config.failover = FailoverTimings::from(&self.failover);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> HarnessSettings {
        let mut settings = HarnessSettings::default();
        settings.service.name = "nginx-lb".to_string();
        settings.backends.node = "worker-0".to_string();
        settings
    }

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = minimal().into_config().unwrap();
        assert_eq!(config.probe, ProbeTimings::default());
        assert_eq!(config.failover, FailoverTimings::default());
        assert_eq!(config.global_timeout, Duration::from_secs(900));
        assert_eq!(config.mode, ProbeMode::SingleConnection);
        assert_eq!(config.backends.label_selector, "component=speaker");
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
service:
  namespace: test-ns
  name: nginx-lb
backends:
  labelSelector: app=speaker
  node: worker-2
mode: multiple
families: dualstack
connectionsPerFamily: 4
globalTimeoutSecs: 600
maxFailureRatePercent: 1.0
probe:
  readDeadlineMs: 500
failover:
  readyTimeoutSecs: 60
"#;
        let settings = HarnessSettings::from_yaml(yaml).unwrap();
        assert_eq!(settings.backends.namespace, DEFAULT_BACKEND_NAMESPACE);

        let config = settings.into_config().unwrap();
        assert_eq!(config.service.namespace, "test-ns");
        assert_eq!(config.mode, ProbeMode::MultipleConnections);
        assert_eq!(config.families, IpFamilyPolicy::DualStack);
        assert_eq!(config.connections_per_family, 4);
        assert_eq!(config.global_timeout, Duration::from_secs(600));
        assert_eq!(config.probe.read_deadline, Duration::from_millis(500));
        assert_eq!(config.probe.interval, ProbeTimings::default().interval);
        assert_eq!(config.failover.ready_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service:\n  name: web\nbackends:\n  node: worker-1").unwrap();

        let settings = HarnessSettings::load(file.path()).unwrap();
        assert_eq!(settings.service.name, "web");
        assert_eq!(settings.backends.node, "worker-1");
    }

    #[test]
    fn test_missing_node_is_rejected() {
        let mut settings = minimal();
        settings.backends.node = " ".to_string();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("backends.node"));
    }

    #[test]
    fn test_zero_connections_rejected() {
        let mut settings = minimal();
        settings.connections_per_family = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let mut settings = minimal();
        settings.max_failure_rate_percent = f64::NAN;
        assert!(settings.validate().is_err());
        settings.max_failure_rate_percent = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_dial_timeouts_rejected() {
        let mut settings = minimal();
        settings.probe.dial_attempt_timeout_ms = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("dialAttemptTimeoutMs"), "{err}");

        let mut settings = minimal();
        settings.probe.spawner_dial_timeout_ms = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("spawnerDialTimeoutMs"), "{err}");
    }

    #[test]
    fn test_failover_poll_intervals_are_independent() {
        let yaml = r#"
service:
  name: nginx-lb
backends:
  node: worker-0
failover:
  deletePollIntervalSecs: 2
  replacementIntervalSecs: 5
  readyIntervalSecs: 7
"#;
        let config = HarnessSettings::from_yaml(yaml)
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.failover.delete_poll_interval, Duration::from_secs(2));
        assert_eq!(config.failover.replacement_interval, Duration::from_secs(5));
        assert_eq!(config.failover.ready_interval, Duration::from_secs(7));

        let mut settings = minimal();
        settings.failover.ready_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_mode_is_a_parse_error() {
        let err = HarnessSettings::from_yaml("mode: sometimes").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
