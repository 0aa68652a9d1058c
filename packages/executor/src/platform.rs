//! Platform client contract.
//!
//! The seam between the executor and the cloud SDK wrappers. Clients are
//! cancel-aware, return typed errors, and treat `(asset, action, run)` as
//! an idempotency key: retried non-idempotent actions reconcile on the
//! `execution_id` recorded at first invocation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fleetkern_engine::OrchestratorError;
use fleetkern_registry::AssetFact;

/// Typed platform errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlatformError {
    #[error("asset {0} not reachable")]
    AssetNotReachable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transient backend failure: {0}")]
    TransientBackend(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl PlatformError {
    /// Wrap into the orchestrator taxonomy at the activity boundary.
    pub fn to_orchestrator(&self) -> OrchestratorError {
        match self {
            Self::AssetNotReachable(m) => OrchestratorError::PlatformUnreachable(m.clone()),
            Self::PermissionDenied(m) => OrchestratorError::Permission(m.clone()),
            Self::TransientBackend(m) => OrchestratorError::Transient(m.clone()),
            Self::Provider(m) => OrchestratorError::Provider(m.clone()),
        }
    }
}

/// Image fact as a platform reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFact {
    pub reference: String,
    pub version: String,
    pub native_ref: String,
}

/// Receipt for a dispatched action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub execution_id: String,
    /// Whether completion must be polled via `verify_action`
    pub asynchronous: bool,
}

/// Receipt for a taken snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotReceipt {
    pub snapshot_id: String,
}

/// Verification status of an asynchronous action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Success,
    Failed,
}

/// Verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionVerification {
    pub status: ActionStatus,
    pub detail: String,
}

/// The platform client contract consumed by the executor, the DR
/// coordinator and certificate rotation.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Enumerate assets, optionally scoped to a region.
    async fn list_assets(&self, region: Option<&str>) -> Result<Vec<AssetFact>, PlatformError>;

    /// Resolve an image reference.
    async fn get_image(&self, image_ref: &str) -> Result<ImageFact, PlatformError>;

    /// Patch an asset in place.
    async fn patch_asset(
        &self,
        instance_id: &str,
        params: &serde_json::Value,
    ) -> Result<ActionReceipt, PlatformError>;

    /// Reimage an asset onto a target image.
    async fn reimage_asset(
        &self,
        instance_id: &str,
        target_image: &str,
    ) -> Result<ActionReceipt, PlatformError>;

    /// Take a restorable snapshot.
    async fn snapshot_asset(&self, instance_id: &str) -> Result<SnapshotReceipt, PlatformError>;

    /// Restore an asset from a snapshot.
    async fn restore_snapshot(
        &self,
        instance_id: &str,
        snapshot_id: &str,
    ) -> Result<ActionReceipt, PlatformError>;

    /// Poll an asynchronous action.
    async fn verify_action(&self, execution_id: &str)
        -> Result<ActionVerification, PlatformError>;
}

// ============================================================================
// MOCK CLIENT (deterministic, scriptable failures)
// ============================================================================

#[derive(Default)]
struct MockState {
    assets: Vec<AssetFact>,
    /// Instance ids whose patch calls fail
    fail_patch: HashSet<String>,
    /// Instance ids whose patch calls fail transiently this many times
    flaky_patch: HashMap<String, u32>,
    /// Dedupe map: idempotency key -> execution id
    executions: HashMap<String, String>,
    patch_calls: Vec<String>,
    snapshot_calls: Vec<String>,
    restore_calls: Vec<(String, String)>,
    counter: u64,
}

/// Deterministic in-memory platform client for tests and dry runs.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the asset inventory reported by `list_assets`.
    pub fn with_assets(self, assets: Vec<AssetFact>) -> Self {
        self.state.lock().assets = assets;
        self
    }

    /// Script a hard patch failure for an instance.
    pub fn fail_patch_on(&self, instance_id: impl Into<String>) {
        self.state.lock().fail_patch.insert(instance_id.into());
    }

    /// Script `failures` transient patch failures before success.
    pub fn flaky_patch_on(&self, instance_id: impl Into<String>, failures: u32) {
        self.state
            .lock()
            .flaky_patch
            .insert(instance_id.into(), failures);
    }

    /// Instances patched so far. Dispatch is deduplicated by idempotency
    /// key, so retried attempts appear once.
    pub fn patched(&self) -> Vec<String> {
        self.state.lock().patch_calls.clone()
    }

    /// Snapshots taken so far.
    pub fn snapshots(&self) -> Vec<String> {
        self.state.lock().snapshot_calls.clone()
    }

    /// Restores performed so far, as `(instance, snapshot)` pairs.
    pub fn restores(&self) -> Vec<(String, String)> {
        self.state.lock().restore_calls.clone()
    }

    fn next_id(state: &mut MockState, prefix: &str) -> String {
        state.counter += 1;
        format!("{prefix}-{:04}", state.counter)
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn list_assets(&self, _region: Option<&str>) -> Result<Vec<AssetFact>, PlatformError> {
        Ok(self.state.lock().assets.clone())
    }

    async fn get_image(&self, image_ref: &str) -> Result<ImageFact, PlatformError> {
        let (reference, version) = image_ref.split_once(':').unwrap_or((image_ref, "latest"));
        Ok(ImageFact {
            reference: reference.to_string(),
            version: version.to_string(),
            native_ref: format!("native-{image_ref}"),
        })
    }

    async fn patch_asset(
        &self,
        instance_id: &str,
        params: &serde_json::Value,
    ) -> Result<ActionReceipt, PlatformError> {
        let mut state = self.state.lock();

        // Retried dispatch with the same idempotency key reconciles to the
        // first execution id.
        let key = params
            .get("idempotency_key")
            .and_then(|k| k.as_str())
            .map(String::from);
        if let Some(key) = &key {
            if let Some(execution_id) = state.executions.get(key) {
                return Ok(ActionReceipt {
                    execution_id: execution_id.clone(),
                    asynchronous: false,
                });
            }
        }

        if let Some(remaining) = state.flaky_patch.get_mut(instance_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::TransientBackend(format!(
                    "backend busy patching {instance_id}"
                )));
            }
        }
        if state.fail_patch.contains(instance_id) {
            return Err(PlatformError::Provider(format!(
                "patch rejected for {instance_id}"
            )));
        }

        state.patch_calls.push(instance_id.to_string());
        let execution_id = Self::next_id(&mut state, "exec");
        if let Some(key) = key {
            state.executions.insert(key, execution_id.clone());
        }
        Ok(ActionReceipt {
            execution_id,
            asynchronous: false,
        })
    }

    async fn reimage_asset(
        &self,
        instance_id: &str,
        target_image: &str,
    ) -> Result<ActionReceipt, PlatformError> {
        let mut state = self.state.lock();
        if state.fail_patch.contains(instance_id) {
            return Err(PlatformError::Provider(format!(
                "reimage rejected for {instance_id}"
            )));
        }
        state
            .patch_calls
            .push(format!("{instance_id}=>{target_image}"));
        let execution_id = Self::next_id(&mut state, "exec");
        Ok(ActionReceipt {
            execution_id,
            asynchronous: false,
        })
    }

    async fn snapshot_asset(&self, instance_id: &str) -> Result<SnapshotReceipt, PlatformError> {
        let mut state = self.state.lock();
        state.snapshot_calls.push(instance_id.to_string());
        let snapshot_id = Self::next_id(&mut state, "snap");
        Ok(SnapshotReceipt { snapshot_id })
    }

    async fn restore_snapshot(
        &self,
        instance_id: &str,
        snapshot_id: &str,
    ) -> Result<ActionReceipt, PlatformError> {
        let mut state = self.state.lock();
        state
            .restore_calls
            .push((instance_id.to_string(), snapshot_id.to_string()));
        let execution_id = Self::next_id(&mut state, "exec");
        Ok(ActionReceipt {
            execution_id,
            asynchronous: false,
        })
    }

    async fn verify_action(
        &self,
        execution_id: &str,
    ) -> Result<ActionVerification, PlatformError> {
        Ok(ActionVerification {
            status: ActionStatus::Success,
            detail: format!("execution {execution_id} complete"),
        })
    }
}
