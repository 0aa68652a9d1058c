//! Rollback execution.
//!
//! Assets with a stored snapshot restore from it; everything else gets a
//! platform-native revert. Outcomes classify as completed, partial or
//! failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use fleetkern_engine::{ActivityOptions, WorkflowContext};

use crate::platform::PlatformClient;

/// Classification of a rollback pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackOutcome {
    Completed,
    Partial,
    Failed,
}

/// Report for one rollback pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub outcome: RollbackOutcome,
    /// Assets restored from snapshots
    pub restored: u64,
    /// Assets reverted platform-natively (no snapshot)
    pub reverted: u64,
    /// Assets whose rollback failed
    pub failed: u64,
    /// Why the rollback ran
    pub reason: String,
    pub rolled_back_at: DateTime<Utc>,
}

/// Roll back `assets`, restoring stored snapshots where bound.
///
/// Each asset's rollback is an activity, so a resumed workflow never
/// restores the same asset twice.
pub async fn rollback_assets(
    ctx: &WorkflowContext,
    client: Arc<dyn PlatformClient>,
    snapshots: &HashMap<String, String>,
    assets: &[String],
    reason: &str,
) -> RollbackReport {
    let mut restored = 0u64;
    let mut reverted = 0u64;
    let mut failed = 0u64;

    for asset in assets {
        let snapshot = snapshots.get(asset).cloned();
        let client2 = client.clone();
        let asset2 = asset.clone();
        let had_snapshot = snapshot.is_some();

        let result: Result<bool, _> = ctx
            .activity(
                &format!("rollback:{asset}"),
                ActivityOptions::default(),
                move || {
                    let client = client2.clone();
                    let asset = asset2.clone();
                    let snapshot = snapshot.clone();
                    async move {
                        match snapshot {
                            Some(snapshot_id) => client
                                .restore_snapshot(&asset, &snapshot_id)
                                .await
                                .map(|_| true)
                                .map_err(|e| e.to_orchestrator()),
                            None => client
                                .patch_asset(
                                    &asset,
                                    &serde_json::json!({ "action": "revert_previous_version" }),
                                )
                                .await
                                .map(|_| false)
                                .map_err(|e| e.to_orchestrator()),
                        }
                    }
                },
            )
            .await;

        match result {
            Ok(true) => restored += 1,
            Ok(false) => reverted += 1,
            Err(err) => {
                failed += 1;
                tracing::error!(
                    asset = %asset,
                    had_snapshot,
                    error = %err,
                    "Asset rollback failed"
                );
            }
        }
    }

    let outcome = if failed == 0 {
        RollbackOutcome::Completed
    } else if restored + reverted > 0 {
        RollbackOutcome::Partial
    } else {
        RollbackOutcome::Failed
    };

    RollbackReport {
        outcome,
        restored,
        reverted,
        failed,
        reason: reason.to_string(),
        rolled_back_at: Utc::now(),
    }
}
