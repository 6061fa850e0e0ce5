//! In-memory appliance for tests.

use async_trait::async_trait;
use sitewall_common::{FilterRule, NewFilterRule, PatternMatcher};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::ControlPlaneClient;
use crate::error::{ControlPlaneError, Operation};

#[derive(Default)]
struct Appliance {
    matchers: Vec<PatternMatcher>,
    rules: Vec<FilterRule>,
    next_id: u32,
    calls: Vec<Operation>,
    failures: HashMap<Operation, ControlPlaneError>,
    hangs: HashSet<Operation>,
    latency: Option<Duration>,
}

impl Appliance {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("*{:X}", self.next_id)
    }
}

/// Mock appliance: records every call, supports failure injection.
#[derive(Default)]
pub struct MockControlPlane {
    state: Mutex<Appliance>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a matcher, bypassing call recording
    pub fn with_matcher(self, name: &str, pattern: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id();
            state.matchers.push(PatternMatcher {
                id,
                name: name.to_string(),
                pattern: pattern.to_string(),
            });
        }
        self
    }

    /// Seed a drop rule for `site`, bypassing call recording
    pub fn with_block_rule(self, site: &str) -> Self {
        self.with_rule(&NewFilterRule::block(site))
    }

    pub fn with_rule(self, rule: &NewFilterRule) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id();
            state.rules.push(stored_rule(id, rule));
        }
        self
    }

    /// Make every call of `operation` fail with `error`
    pub fn fail_on(&self, operation: Operation, error: ControlPlaneError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    /// Make every call of `operation` never complete
    pub fn hang_on(&self, operation: Operation) {
        self.state.lock().unwrap().hangs.insert(operation);
    }

    /// Delay every call, so concurrent callers interleave
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    pub fn matchers(&self) -> Vec<PatternMatcher> {
        self.state.lock().unwrap().matchers.clone()
    }

    pub fn rules(&self) -> Vec<FilterRule> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded add/remove calls
    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|op| !matches!(op, Operation::ListMatchers | Operation::ListFilterRules))
            .count()
    }

    async fn enter(&self, operation: Operation) -> Result<(), ControlPlaneError> {
        let (latency, hang, failure) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(operation);
            (
                state.latency,
                state.hangs.contains(&operation),
                state.failures.get(&operation).cloned(),
            )
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if hang {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn stored_rule(id: String, rule: &NewFilterRule) -> FilterRule {
    FilterRule {
        id,
        chain: rule.chain.clone(),
        protocol: Some(rule.protocol.clone()),
        action: rule.action.clone(),
        matcher_ref: Some(rule.matcher_ref.clone()),
        comment: Some(rule.comment.clone()),
    }
}

fn no_such_item() -> ControlPlaneError {
    ControlPlaneError::NotFound("no such item".to_string())
}

#[async_trait]
impl ControlPlaneClient for MockControlPlane {
    async fn list_matchers(&self) -> Result<Vec<PatternMatcher>, ControlPlaneError> {
        self.enter(Operation::ListMatchers).await?;
        Ok(self.matchers())
    }

    async fn add_matcher(
        &self,
        name: &str,
        pattern: &str,
    ) -> Result<PatternMatcher, ControlPlaneError> {
        self.enter(Operation::AddMatcher).await?;
        let mut state = self.state.lock().unwrap();
        let matcher = PatternMatcher {
            id: state.next_id(),
            name: name.to_string(),
            pattern: pattern.to_string(),
        };
        state.matchers.push(matcher.clone());
        Ok(matcher)
    }

    async fn remove_matcher(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.enter(Operation::RemoveMatcher).await?;
        let mut state = self.state.lock().unwrap();
        let before = state.matchers.len();
        state.matchers.retain(|m| m.id != id);
        if state.matchers.len() == before {
            return Err(no_such_item());
        }
        Ok(())
    }

    async fn list_filter_rules(&self) -> Result<Vec<FilterRule>, ControlPlaneError> {
        self.enter(Operation::ListFilterRules).await?;
        Ok(self.rules())
    }

    async fn add_filter_rule(
        &self,
        rule: &NewFilterRule,
    ) -> Result<FilterRule, ControlPlaneError> {
        self.enter(Operation::AddFilterRule).await?;
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let stored = stored_rule(id, rule);
        state.rules.push(stored.clone());
        Ok(stored)
    }

    async fn remove_filter_rule(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.enter(Operation::RemoveFilterRule).await?;
        let mut state = self.state.lock().unwrap();
        let before = state.rules.len();
        state.rules.retain(|r| r.id != id);
        if state.rules.len() == before {
            return Err(no_such_item());
        }
        Ok(())
    }
}
