//! Shared Kubernetes helpers: client construction, condition checks and the
//! generic poll-until-converged combinator.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::time::Instant;
use tracing::trace;

use crate::Error;

/// The "Ready" condition type for pods
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)` or `timeout` has
/// elapsed. Errors from `check_fn` are treated as "not yet" and polling
/// continues. Time is measured with the tokio clock, so this never blocks past
/// `timeout + poll_interval` plus the duration of one check.
///
/// # Returns
/// `Ok(())` if the condition was met, or `Err` carrying `timeout_msg` (and the
/// last check error, if any) on timeout
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    let timeout_msg = timeout_msg.into();
    let mut last_error: Option<String> = None;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) => {
                trace!("Polling check returned error (retrying): {}", e);
                last_error = Some(e.to_string());
            }
        }

        if start.elapsed() + poll_interval > timeout {
            let message = match last_error {
                Some(e) => format!("{} (last error: {})", timeout_msg, e),
                None => timeout_msg,
            };
            return Err(Error::internal_with_context("poll_until", message));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodCondition;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn condition(type_: &str, status: &str) -> PodCondition {
        PodCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_condition_with_ready() {
        let conditions = vec![
            condition("PodScheduled", "True"),
            condition(CONDITION_READY, "True"),
        ];
        assert!(has_condition(Some(conditions.as_slice()), CONDITION_READY));
    }

    #[test]
    fn test_has_condition_not_ready() {
        let conditions = vec![condition(CONDITION_READY, "False")];
        assert!(!has_condition(Some(conditions.as_slice()), CONDITION_READY));
    }

    #[test]
    fn test_has_condition_none() {
        assert!(!has_condition::<PodCondition>(None, CONDITION_READY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_a_few_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = poll_until(
            Duration::from_secs(90),
            Duration::from_secs(3),
            "never converged",
            || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out_within_bound() {
        let start = Instant::now();

        let result = poll_until(
            Duration::from_secs(180),
            Duration::from_secs(3),
            "backend never ready",
            || async { Ok(false) },
        )
        .await;

        let err = result.expect_err("condition never holds");
        assert!(err.to_string().contains("backend never ready"));
        assert!(start.elapsed() <= Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_reports_last_check_error() {
        let result = poll_until(
            Duration::from_secs(10),
            Duration::from_secs(3),
            "gave up",
            || async { Err(Error::internal("apiserver unavailable")) },
        )
        .await;

        let msg = result.expect_err("checks always fail").to_string();
        assert!(msg.contains("gave up"));
        assert!(msg.contains("apiserver unavailable"));
    }
}
