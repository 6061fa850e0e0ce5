//! Shared types between the reconciler, the appliance client and the API.
//!
//! These mirror the two kinds of objects sitewall manages on the appliance:
//! layer-7 pattern matchers and firewall filter rules.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain every block rule is placed in.
pub const BLOCK_CHAIN: &str = "forward";
/// Protocol every block rule applies to.
pub const BLOCK_PROTOCOL: &str = "tcp";
/// Filter action that makes a rule a block rule.
pub const DROP_ACTION: &str = "drop";

/// Desired access state for a site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteAction {
    Block,
    Allow,
}

impl fmt::Display for SiteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteAction::Block => f.write_str("block"),
            SiteAction::Allow => f.write_str("allow"),
        }
    }
}

/// A named content-matching rule on the appliance.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatternMatcher {
    /// Appliance-assigned identifier (e.g. `*1A`)
    pub id: String,
    pub name: String,
    pub pattern: String,
}

/// A traffic-filter entry, optionally referencing a matcher by name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct FilterRule {
    pub id: String,
    pub chain: String,
    pub protocol: Option<String>,
    pub action: String,
    pub matcher_ref: Option<String>,
    pub comment: Option<String>,
}

impl FilterRule {
    /// True if this rule drops traffic classified by the matcher named `site`.
    pub fn is_block_for(&self, site: &str) -> bool {
        self.action == DROP_ACTION && self.matcher_ref.as_deref() == Some(site)
    }
}

/// Attributes of a filter rule about to be created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewFilterRule {
    pub chain: String,
    pub protocol: String,
    pub action: String,
    pub matcher_ref: String,
    pub comment: String,
}

impl NewFilterRule {
    /// The drop rule that blocks `site`.
    pub fn block(site: &str) -> Self {
        Self {
            chain: BLOCK_CHAIN.to_string(),
            protocol: BLOCK_PROTOCOL.to_string(),
            action: DROP_ACTION.to_string(),
            matcher_ref: site.to_string(),
            comment: format!("Blocked by sitewall (site: {site})"),
        }
    }
}
