use std::fmt;
use thiserror::Error;

/// Malformed caller input. Never reaches the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("site is required")]
    EmptySite,

    #[error("invalid site '{site}': {reason}")]
    InvalidSite { site: String, reason: &'static str },

    #[error("invalid action")]
    InvalidAction(String),
}

/// Failure of a single call against the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    /// Appliance unreachable, login rejected, timed out or stream broken
    #[error("connection error: {0}")]
    Connection(String),

    /// Appliance reachable but refused the operation
    #[error("appliance rejected operation: {0}")]
    Remote(String),

    /// The addressed object does not exist (anymore)
    #[error("not found: {0}")]
    NotFound(String),
}

/// The appliance call a reconciliation step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListMatchers,
    AddMatcher,
    RemoveMatcher,
    ListFilterRules,
    AddFilterRule,
    RemoveFilterRule,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ListMatchers => "list matchers",
            Operation::AddMatcher => "add matcher",
            Operation::RemoveMatcher => "remove matcher",
            Operation::ListFilterRules => "list filter rules",
            Operation::AddFilterRule => "add filter rule",
            Operation::RemoveFilterRule => "remove filter rule",
        };
        f.write_str(name)
    }
}

/// A reconciliation aborted at `operation`.
///
/// `compensation` holds the error of a failed rollback, if one was attempted
/// and did not succeed. It never replaces `source`.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed for site {site}: {source}")]
pub struct ReconciliationError {
    pub site: String,
    pub operation: Operation,
    pub source: ControlPlaneError,
    pub compensation: Option<ControlPlaneError>,
}

impl ReconciliationError {
    pub fn new(site: &str, operation: Operation, source: ControlPlaneError) -> Self {
        Self {
            site: site.to_string(),
            operation,
            source,
            compensation: None,
        }
    }
}

/// Everything that can go wrong handling one block/allow request.
#[derive(Debug, Error)]
pub enum SiteAccessError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
}
