use async_trait::async_trait;
use sitewall_common::{FilterRule, NewFilterRule, PatternMatcher};

use crate::error::ControlPlaneError;

/// Direct access to the appliance's matchers and filter rules.
///
/// Every method is one remote call with no local buffering. Implementations
/// must not cache results between calls.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn list_matchers(&self) -> Result<Vec<PatternMatcher>, ControlPlaneError>;

    /// Create a matcher and return it with its appliance-assigned id
    async fn add_matcher(
        &self,
        name: &str,
        pattern: &str,
    ) -> Result<PatternMatcher, ControlPlaneError>;

    async fn remove_matcher(&self, id: &str) -> Result<(), ControlPlaneError>;

    async fn list_filter_rules(&self) -> Result<Vec<FilterRule>, ControlPlaneError>;

    /// Create a filter rule and return it with its appliance-assigned id
    async fn add_filter_rule(&self, rule: &NewFilterRule)
        -> Result<FilterRule, ControlPlaneError>;

    async fn remove_filter_rule(&self, id: &str) -> Result<(), ControlPlaneError>;
}
