//! Health check execution.
//!
//! A phase passes its boundary iff every declared check passes. Per-check
//! duration and status are recorded for the audit trail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

use fleetkern_tasks::HealthCheckSpec;

/// Outcome of one health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckOutcome {
    pub name: String,
    pub check_type: String,
    pub target: String,
    pub passed: bool,
    pub duration_ms: u64,
}

/// Probe seam: real deployments point this at HTTP/TCP/agent probes.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, check: &HealthCheckSpec) -> bool;
}

/// Probe that always passes.
#[derive(Debug, Clone, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self, _check: &HealthCheckSpec) -> bool {
        true
    }
}

/// Probe with scripted failures by check name.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    failing: HashSet<String>,
}

impl ScriptedProbe {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, check: &HealthCheckSpec) -> bool {
        !self.failing.contains(&check.name)
    }
}

/// Run a check battery. Passes iff all checks pass.
pub async fn run_checks(
    probe: &dyn HealthProbe,
    checks: &[HealthCheckSpec],
) -> (bool, Vec<HealthCheckOutcome>) {
    let mut outcomes = Vec::with_capacity(checks.len());
    let mut all_passed = true;

    for check in checks {
        let started = Instant::now();
        let passed = probe.probe(check).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if !passed {
            all_passed = false;
            tracing::warn!(
                check = %check.name,
                target = %check.target,
                "Health check failed"
            );
        }
        outcomes.push(HealthCheckOutcome {
            name: check.name.clone(),
            check_type: check.check_type.clone(),
            target: check.target.clone(),
            passed,
            duration_ms,
        });
    }

    (all_passed, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str) -> HealthCheckSpec {
        HealthCheckSpec {
            name: name.into(),
            check_type: "connectivity".into(),
            target: "https://web".into(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_all_pass() {
        let (passed, outcomes) =
            run_checks(&AlwaysHealthy, &[check("http"), check("dns")]).await;
        assert!(passed);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.passed));
    }

    #[tokio::test]
    async fn test_one_failure_fails_battery() {
        let probe = ScriptedProbe::failing(&["dns"]);
        let (passed, outcomes) = run_checks(&probe, &[check("http"), check("dns")]).await;
        assert!(!passed);
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
    }

    #[tokio::test]
    async fn test_empty_battery_passes() {
        let (passed, outcomes) = run_checks(&AlwaysHealthy, &[]).await;
        assert!(passed);
        assert!(outcomes.is_empty());
    }
}
