//! Site access reconciliation.
//!
//! Reads the appliance's matchers and filter rules, repairs duplicates left
//! behind by earlier races or partial failures, then creates or deletes
//! objects until the site is in the requested state.
//!
//! The appliance has no transactions, so ordering carries the consistency:
//! on block the matcher is created before the rule that references it, on
//! allow the rules go before the matcher. Duplicate removal always runs
//! before any create.

use serde::Serialize;
use sitewall_common::{NewFilterRule, SiteAction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::client::ControlPlaneClient;
use crate::error::{ControlPlaneError, Operation, ReconciliationError, SiteAccessError};
use crate::locks::SiteLocks;
use crate::validate::{site_pattern, validate, ValidatedRequest};

/// What a reconciliation changed on the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub site: String,
    pub action: SiteAction,
    pub matcher_created: bool,
    pub matchers_removed: usize,
    pub filter_created: bool,
    pub filters_removed: usize,
}

/// Caller-facing summary of a [`ReconciliationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Blocked,
    AlreadyBlocked,
    Unblocked { rules: usize },
    NoRuleExisted,
}

impl ReconciliationResult {
    fn new(site: &str, action: SiteAction) -> Self {
        Self {
            site: site.to_string(),
            action,
            matcher_created: false,
            matchers_removed: 0,
            filter_created: false,
            filters_removed: 0,
        }
    }

    /// True if the appliance was not modified.
    pub fn is_noop(&self) -> bool {
        !self.matcher_created
            && !self.filter_created
            && self.matchers_removed == 0
            && self.filters_removed == 0
    }

    pub fn outcome(&self) -> Outcome {
        match self.action {
            SiteAction::Block if self.matcher_created || self.filter_created => Outcome::Blocked,
            SiteAction::Block => Outcome::AlreadyBlocked,
            SiteAction::Allow if self.filters_removed > 0 => Outcome::Unblocked {
                rules: self.filters_removed,
            },
            SiteAction::Allow => Outcome::NoRuleExisted,
        }
    }

    pub fn message(&self) -> String {
        let site = &self.site;
        match self.outcome() {
            Outcome::Blocked => format!("site {site} blocked"),
            Outcome::AlreadyBlocked => format!("site {site} already blocked"),
            Outcome::Unblocked { rules: 1 } => format!("site {site} unblocked (1 rule removed)"),
            Outcome::Unblocked { rules } => {
                format!("site {site} unblocked ({rules} rules removed)")
            }
            Outcome::NoRuleExisted => format!("no rule existed for site {site}"),
        }
    }
}

/// Undo steps recorded while moving forward, run in reverse on failure.
enum Compensation {
    RemoveMatcher { id: String },
}

#[derive(Default)]
struct Compensations(Vec<Compensation>);

impl Compensations {
    fn push(&mut self, step: Compensation) {
        self.0.push(step);
    }
}

pub struct SiteAccessReconciler {
    client: Arc<dyn ControlPlaneClient>,
    locks: SiteLocks,
    call_timeout: Duration,
}

impl SiteAccessReconciler {
    pub fn new(client: Arc<dyn ControlPlaneClient>, call_timeout: Duration) -> Self {
        Self {
            client,
            locks: SiteLocks::new(),
            call_timeout,
        }
    }

    /// Validate a raw `(site, action)` pair and reconcile it.
    pub async fn handle(
        &self,
        site: &str,
        action: &str,
    ) -> Result<ReconciliationResult, SiteAccessError> {
        let request = validate(site, action)?;
        Ok(self.reconcile(&request).await?)
    }

    /// Bring the appliance to the state `request` asks for.
    ///
    /// Reconciliations for the same site are serialized; different sites
    /// run concurrently.
    pub async fn reconcile(
        &self,
        request: &ValidatedRequest,
    ) -> Result<ReconciliationResult, ReconciliationError> {
        let site = request.site();
        let _guard = self.locks.acquire(site).await;
        debug!(site, action = %request.action(), "Reconciling site");

        match request.action() {
            SiteAction::Block => self.block(site).await,
            SiteAction::Allow => self.allow(site).await,
        }
    }

    async fn block(&self, site: &str) -> Result<ReconciliationResult, ReconciliationError> {
        let mut result = ReconciliationResult::new(site, SiteAction::Block);

        let matchers = self
            .call(site, Operation::ListMatchers, self.client.list_matchers())
            .await?;
        let (matcher, duplicate_matchers) =
            split_first(matchers.into_iter().filter(|m| m.name == site));

        let rules = self
            .call(site, Operation::ListFilterRules, self.client.list_filter_rules())
            .await?;
        let (rule, duplicate_rules) = split_first(rules.into_iter().filter(|r| r.is_block_for(site)));

        for duplicate in &duplicate_rules {
            warn!(site, id = %duplicate.id, "Removing duplicate block rule");
            if self
                .remove(
                    site,
                    Operation::RemoveFilterRule,
                    self.client.remove_filter_rule(&duplicate.id),
                )
                .await?
            {
                result.filters_removed += 1;
            }
        }

        for duplicate in &duplicate_matchers {
            warn!(site, id = %duplicate.id, "Removing duplicate pattern matcher");
            if self
                .remove(
                    site,
                    Operation::RemoveMatcher,
                    self.client.remove_matcher(&duplicate.id),
                )
                .await?
            {
                result.matchers_removed += 1;
            }
        }

        let mut compensations = Compensations::default();

        if matcher.is_none() {
            let pattern = site_pattern(site);
            let created = self
                .call(site, Operation::AddMatcher, self.client.add_matcher(site, &pattern))
                .await?;
            info!(site, id = %created.id, pattern = %created.pattern, "Created pattern matcher");
            compensations.push(Compensation::RemoveMatcher { id: created.id });
            result.matcher_created = true;
        }

        if let Some(rule) = rule {
            debug!(site, id = %rule.id, "Block rule already present");
            return Ok(result);
        }

        let new_rule = NewFilterRule::block(site);
        match self
            .call(site, Operation::AddFilterRule, self.client.add_filter_rule(&new_rule))
            .await
        {
            Ok(created) => {
                info!(site, id = %created.id, "Created block rule");
                result.filter_created = true;
                Ok(result)
            }
            Err(mut err) => {
                err.compensation = self.unwind(site, compensations).await;
                Err(err)
            }
        }
    }

    async fn allow(&self, site: &str) -> Result<ReconciliationResult, ReconciliationError> {
        let mut result = ReconciliationResult::new(site, SiteAction::Allow);

        let rules = self
            .call(site, Operation::ListFilterRules, self.client.list_filter_rules())
            .await?;
        for rule in rules.iter().filter(|r| r.is_block_for(site)) {
            if self
                .remove(
                    site,
                    Operation::RemoveFilterRule,
                    self.client.remove_filter_rule(&rule.id),
                )
                .await?
            {
                info!(site, id = %rule.id, "Removed block rule");
                result.filters_removed += 1;
            }
        }

        let matchers = self
            .call(site, Operation::ListMatchers, self.client.list_matchers())
            .await?;
        for matcher in matchers.iter().filter(|m| m.name == site) {
            if self
                .remove(
                    site,
                    Operation::RemoveMatcher,
                    self.client.remove_matcher(&matcher.id),
                )
                .await?
            {
                info!(site, id = %matcher.id, "Removed pattern matcher");
                result.matchers_removed += 1;
            }
        }

        if result.filters_removed == 0 && result.matchers_removed > 0 {
            warn!(site, "Removed pattern matcher without a block rule");
        }

        Ok(result)
    }

    /// Run compensations newest first. Returns the first failure, if any.
    async fn unwind(&self, site: &str, compensations: Compensations) -> Option<ControlPlaneError> {
        let mut failure = None;

        for step in compensations.0.into_iter().rev() {
            match step {
                Compensation::RemoveMatcher { id } => {
                    match self
                        .remove(site, Operation::RemoveMatcher, self.client.remove_matcher(&id))
                        .await
                    {
                        Ok(_) => info!(site, id = %id, "Rolled back pattern matcher"),
                        Err(e) => {
                            error!(site, id = %id, error = %e, "Failed to roll back pattern matcher");
                            if failure.is_none() {
                                failure = Some(e.source);
                            }
                        }
                    }
                }
            }
        }

        failure
    }

    /// A remove call. An object that is already gone counts as removed by
    /// someone else: returns `Ok(false)` instead of failing.
    async fn remove<F>(
        &self,
        site: &str,
        operation: Operation,
        call: F,
    ) -> Result<bool, ReconciliationError>
    where
        F: Future<Output = Result<(), ControlPlaneError>>,
    {
        let removed = async {
            match call.await {
                Ok(()) => Ok(true),
                Err(ControlPlaneError::NotFound(message)) => {
                    debug!(site, %operation, reason = %message, "Object already gone");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        };
        self.call(site, operation, removed).await
    }

    /// One remote call, bounded by the call timeout.
    async fn call<T, F>(
        &self,
        site: &str,
        operation: Operation,
        call: F,
    ) -> Result<T, ReconciliationError>
    where
        F: Future<Output = Result<T, ControlPlaneError>>,
    {
        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ControlPlaneError::Connection(format!(
                "timed out after {}s",
                self.call_timeout.as_secs_f64()
            ))),
        };

        outcome.map_err(|source| {
            warn!(site, %operation, error = %source, "Appliance call failed");
            ReconciliationError::new(site, operation, source)
        })
    }
}

/// First item plus everything after it.
fn split_first<T>(mut items: impl Iterator<Item = T>) -> (Option<T>, Vec<T>) {
    let first = items.next();
    (first, items.collect())
}
