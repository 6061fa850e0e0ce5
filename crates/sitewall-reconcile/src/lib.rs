//! Block/allow reconciliation for websites on a firewall appliance.
//!
//! A request is validated ([`validate`]), then [`SiteAccessReconciler`] reads
//! the appliance through a [`ControlPlaneClient`] and applies the smallest set
//! of changes that leaves exactly one matcher and one drop rule for a blocked
//! site, or none for an allowed one.

pub mod client;
pub mod error;
pub mod locks;
pub mod reconciler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod validate;

pub use client::ControlPlaneClient;
pub use error::{ControlPlaneError, Operation, ReconciliationError, SiteAccessError, ValidationError};
pub use locks::SiteLocks;
pub use reconciler::{Outcome, ReconciliationResult, SiteAccessReconciler};
pub use validate::{site_pattern, validate, ValidatedRequest};
