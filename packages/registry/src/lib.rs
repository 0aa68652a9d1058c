//! Fleetkern-Registry: Fleet Inventory & Golden Images
//!
//! Normalized inventory of cloud assets, the golden-image registry with
//! lineage, point-in-time drift reports, and the certificate inventory.
//!
//! Drift is the divergence between an asset's running image version and the
//! current production version for its image family. Reports are immutable:
//! a refresh produces a new row, never an update.

pub mod asset;
pub mod certificate;
pub mod drift;
pub mod image;

// Re-exports
pub use asset::{Asset, AssetFact, AssetFilter, AssetRegistry, AssetState, Platform, SyncCounters};
pub use certificate::{
    CertStatus, Certificate, CertificateFact, CertificateInventory, ExpiryAlert,
};
pub use drift::{DriftEngine, DriftError, DriftReport, DriftScope, DriftStatus};
pub use image::{
    Image, ImageCoordinate, ImageError, ImageRegistry, ImageStatus,
};
