//! Plan validation.
//!
//! Checks run in order (schema, policy, safety), short-circuiting on the
//! first failing class. The result carries a boolean per class plus the
//! violation list; `overall_valid` iff all three pass. The quality score is
//! advisory feedback for the planner and never gates.

use serde::{Deserialize, Serialize};

use fleetkern_tenancy::EnvironmentName;

use crate::plan::{
    parse_duration_literal, HealthCheckSpec, PhaseSpec, PhaseType, PlanSpec, RollbackPolicy,
    RollbackScope,
};
use crate::task::ExecutionPolicy;

/// Validation check classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationClass {
    Schema,
    Policy,
    Safety,
}

/// One recorded violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Which class flagged it
    pub class: ValidationClass,
    /// What went wrong
    pub message: String,
}

/// Validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub schema_valid: bool,
    pub policy_valid: bool,
    pub safety_valid: bool,
    pub overall_valid: bool,
    pub violations: Vec<Violation>,
    /// Advisory, 0-100
    pub quality_score: u8,
}

/// Plan validator.
pub struct PlanValidator {
    /// Per-phase batch size cap
    max_batch_size: u64,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self { max_batch_size: 50 }
    }
}

impl PlanValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_size(mut self, cap: u64) -> Self {
        self.max_batch_size = cap;
        self
    }

    /// Validate a planner payload against the task's policy and target
    /// environment. Returns the outcome plus the typed spec when the schema
    /// parsed.
    pub fn validate(
        &self,
        payload: &serde_json::Value,
        policy: &ExecutionPolicy,
        environment: EnvironmentName,
    ) -> (ValidationResult, Option<PlanSpec>) {
        let mut violations = Vec::new();

        // === SCHEMA ===
        let spec = match self.check_schema(payload, environment, &mut violations) {
            Some(spec) if violations.is_empty() => spec,
            spec => {
                return (Self::result(false, false, false, violations), spec);
            }
        };
        let schema_valid = true;

        // === POLICY ===
        let before = violations.len();
        self.check_policy(payload, &spec, policy, &mut violations);
        let policy_valid = violations.len() == before;
        if !policy_valid {
            return (
                Self::result(schema_valid, policy_valid, false, violations),
                Some(spec),
            );
        }

        // === SAFETY ===
        let before = violations.len();
        self.check_safety(&spec, &mut violations);
        let safety_valid = violations.len() == before;

        (
            Self::result(schema_valid, policy_valid, safety_valid, violations),
            Some(spec),
        )
    }

    fn result(
        schema_valid: bool,
        policy_valid: bool,
        safety_valid: bool,
        violations: Vec<Violation>,
    ) -> ValidationResult {
        let penalty = (violations.len() as u32 * 15).min(100) as u8;
        let quality_score = 100 - penalty;
        ValidationResult {
            schema_valid,
            policy_valid,
            safety_valid,
            overall_valid: schema_valid && policy_valid && safety_valid,
            violations,
            quality_score,
        }
    }

    fn check_schema(
        &self,
        payload: &serde_json::Value,
        environment: EnvironmentName,
        violations: &mut Vec<Violation>,
    ) -> Option<PlanSpec> {
        let schema = |message: String| Violation {
            class: ValidationClass::Schema,
            message,
        };

        let phases_value = match payload.get("phases").and_then(|p| p.as_array()) {
            Some(phases) if !phases.is_empty() => phases,
            _ => {
                violations.push(schema("plan payload has no phases".into()));
                return None;
            }
        };

        let mut phases = Vec::new();
        for (index, phase) in phases_value.iter().enumerate() {
            let name = match phase.get("name").and_then(|n| n.as_str()) {
                Some(name) => name.to_string(),
                None => {
                    violations.push(schema(format!("phase {index} has no name")));
                    continue;
                }
            };

            let phase_type = match phase
                .get("type")
                .and_then(|t| t.as_str())
                .and_then(PhaseType::parse)
            {
                Some(t) => t,
                None => {
                    violations.push(schema(format!(
                        "phase '{name}' has a missing or unknown type"
                    )));
                    continue;
                }
            };

            let assets: Vec<String> = phase
                .get("assets")
                .or_else(|| phase.get("asset_ids"))
                .and_then(|a| a.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            let asset_count = phase.get("asset_count").and_then(|c| c.as_u64());

            if assets.is_empty() && asset_count.is_none() && phase_type == PhaseType::Patch {
                violations.push(schema(format!(
                    "patch phase '{name}' declares no assets, asset_ids or asset_count"
                )));
            }

            let wait_time = phase
                .get("wait_time")
                .and_then(|w| w.as_str())
                .map(String::from);
            if let Some(wait) = &wait_time {
                if parse_duration_literal(wait).is_none() {
                    violations.push(schema(format!(
                        "phase '{name}' wait_time '{wait}' is not a duration literal"
                    )));
                }
            }

            let health_checks: Vec<HealthCheckSpec> = phase
                .get("health_checks")
                .map(|checks| serde_json::from_value(checks.clone()).unwrap_or_default())
                .unwrap_or_default();

            phases.push(PhaseSpec {
                name,
                phase_type,
                target_image: phase
                    .get("target_image")
                    .and_then(|t| t.as_str())
                    .map(String::from),
                assets,
                asset_count,
                wait_time,
                health_checks,
            });
        }

        if !violations.is_empty() {
            return None;
        }

        let rollback: RollbackPolicy = payload
            .get("rollback")
            .map(|r| {
                serde_json::from_value(r.clone()).unwrap_or_else(|_| RollbackPolicy {
                    max_error_rate: r
                        .get("max_error_rate")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(0.25),
                    automatic_triggers: Vec::new(),
                    scope: RollbackScope::Phase,
                })
            })
            .unwrap_or(RollbackPolicy {
                max_error_rate: 0.25,
                automatic_triggers: Vec::new(),
                scope: RollbackScope::Phase,
            });

        Some(PlanSpec {
            environment,
            phases,
            rollback,
        })
    }

    fn check_policy(
        &self,
        payload: &serde_json::Value,
        spec: &PlanSpec,
        policy: &ExecutionPolicy,
        violations: &mut Vec<Violation>,
    ) {
        let has_prod_state_change = spec.environment.is_production()
            && spec
                .phases
                .iter()
                .any(|p| !p.phase_type.is_validator_only());
        if has_prod_state_change && !policy.require_two_approvers {
            violations.push(Violation {
                class: ValidationClass::Policy,
                message: "production state-change plan requires a two-approver policy".into(),
            });
        }

        // OPA-compatible rule slot: deleting a resource marked as a unique
        // dependency is forbidden.
        if let Some(phases) = payload.get("phases").and_then(|p| p.as_array()) {
            for phase in phases {
                let is_delete = phase.get("action").and_then(|a| a.as_str()) == Some("delete");
                let unique_dep = phase
                    .get("unique_dependency")
                    .and_then(|u| u.as_bool())
                    .unwrap_or(false);
                if is_delete && unique_dep {
                    violations.push(Violation {
                        class: ValidationClass::Policy,
                        message: format!(
                            "phase '{}' deletes a unique-dependency resource",
                            phase.get("name").and_then(|n| n.as_str()).unwrap_or("?")
                        ),
                    });
                }
            }
        }
    }

    fn check_safety(&self, spec: &PlanSpec, violations: &mut Vec<Violation>) {
        for phase in &spec.phases {
            let population = phase.asset_population();
            if population > self.max_batch_size {
                violations.push(Violation {
                    class: ValidationClass::Safety,
                    message: format!(
                        "phase '{}' batch size {population} exceeds cap {}",
                        phase.name, self.max_batch_size
                    ),
                });
            }

            if phase.phase_type == PhaseType::Patch
                && spec.environment.is_production()
                && phase.health_checks.is_empty()
            {
                violations.push(Violation {
                    class: ValidationClass::Safety,
                    message: format!(
                        "production patch phase '{}' declares no health checks",
                        phase.name
                    ),
                });
            }
        }

        if spec.rollback.automatic_triggers.is_empty() {
            violations.push(Violation {
                class: ValidationClass::Safety,
                message: "rollback conditions include no automatic trigger".into(),
            });
        }
    }
}
