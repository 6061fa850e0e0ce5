use async_trait::async_trait;
use sitewall_common::{FilterRule, NewFilterRule, PatternMatcher};
use sitewall_config::ApplianceConfig;
use sitewall_reconcile::{ControlPlaneClient, ControlPlaneError};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::connection::{Response, TcpConnection};
use crate::protocol::{Attributes, ProtocolError};

const LAYER7_PATH: &str = "/ip/firewall/layer7-protocol";
const FILTER_PATH: &str = "/ip/firewall/filter";

/// Idle sessions kept for reuse. Extra sessions are closed when returned.
const MAX_IDLE_SESSIONS: usize = 4;

/// Trap text RouterOS sends when an `.id` does not exist.
const NO_SUCH_ITEM: &str = "no such item";

impl From<ProtocolError> for ControlPlaneError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Trap(message) if message.contains(NO_SUCH_ITEM) => {
                ControlPlaneError::NotFound(message)
            }
            ProtocolError::Trap(message) => ControlPlaneError::Remote(message),
            other => ControlPlaneError::Connection(other.to_string()),
        }
    }
}

/// [`ControlPlaneClient`] backed by the RouterOS API.
///
/// Every in-flight command owns its own logged-in session, so commands for
/// different sites never wait on each other. A session is taken from the
/// idle pool (or opened) when a command starts and only returned once the
/// command completed, so a failed or abandoned command always forces a
/// fresh login.
pub struct RouterOsClient {
    config: ApplianceConfig,
    idle: Mutex<Vec<TcpConnection>>,
}

impl RouterOsClient {
    pub fn new(config: ApplianceConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn checkout(&self) -> Option<TcpConnection> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn checkin(&self, conn: TcpConnection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < MAX_IDLE_SESSIONS {
            idle.push(conn);
        }
    }

    /// Number of sessions waiting for reuse
    pub fn idle_sessions(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn open(&self) -> Result<TcpConnection, ControlPlaneError> {
        let address = self.config.address();
        let mut conn = TcpConnection::connect(&address, self.config.timeout())
            .await
            .map_err(|e| ControlPlaneError::Connection(format!("{address}: {e}")))?;

        conn.login(&self.config.username, &self.config.password)
            .await
            .map_err(|e| ControlPlaneError::Connection(format!("login rejected: {e}")))?;

        info!(address = %address, user = %self.config.username, "Logged in to appliance");
        Ok(conn)
    }

    async fn run(
        &self,
        path: &str,
        attributes: &[(&str, &str)],
    ) -> Result<Response, ControlPlaneError> {
        let mut conn = match self.checkout() {
            Some(conn) => conn,
            None => self.open().await?,
        };

        debug!(path, "Running API command");
        match conn.command(path, attributes).await {
            Ok(response) => {
                self.checkin(conn);
                Ok(response)
            }
            Err(err @ ProtocolError::Trap(_)) => {
                self.checkin(conn);
                Err(err.into())
            }
            Err(e) => {
                warn!(path, error = %e, "Dropping appliance session");
                Err(e.into())
            }
        }
    }
}

fn required(record: &Attributes, key: &str) -> Result<String, ControlPlaneError> {
    record
        .get(key)
        .cloned()
        .ok_or_else(|| ControlPlaneError::Connection(format!("malformed reply: missing '{key}'")))
}

fn created_id(response: &Response) -> Result<String, ControlPlaneError> {
    required(&response.done, "ret")
}

fn parse_matcher(record: &Attributes) -> Result<PatternMatcher, ControlPlaneError> {
    Ok(PatternMatcher {
        id: required(record, ".id")?,
        name: required(record, "name")?,
        pattern: record.get("regexp").cloned().unwrap_or_default(),
    })
}

fn parse_rule(record: &Attributes) -> Result<FilterRule, ControlPlaneError> {
    Ok(FilterRule {
        id: required(record, ".id")?,
        chain: required(record, "chain")?,
        protocol: record.get("protocol").cloned(),
        action: required(record, "action")?,
        matcher_ref: record.get("layer7-protocol").cloned(),
        comment: record.get("comment").cloned(),
    })
}

#[async_trait]
impl ControlPlaneClient for RouterOsClient {
    async fn list_matchers(&self) -> Result<Vec<PatternMatcher>, ControlPlaneError> {
        let response = self.run(&format!("{LAYER7_PATH}/print"), &[]).await?;
        response.records.iter().map(parse_matcher).collect()
    }

    async fn add_matcher(
        &self,
        name: &str,
        pattern: &str,
    ) -> Result<PatternMatcher, ControlPlaneError> {
        let response = self
            .run(
                &format!("{LAYER7_PATH}/add"),
                &[("name", name), ("regexp", pattern)],
            )
            .await?;
        Ok(PatternMatcher {
            id: created_id(&response)?,
            name: name.to_string(),
            pattern: pattern.to_string(),
        })
    }

    async fn remove_matcher(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.run(&format!("{LAYER7_PATH}/remove"), &[(".id", id)])
            .await?;
        Ok(())
    }

    async fn list_filter_rules(&self) -> Result<Vec<FilterRule>, ControlPlaneError> {
        let response = self.run(&format!("{FILTER_PATH}/print"), &[]).await?;
        response.records.iter().map(parse_rule).collect()
    }

    async fn add_filter_rule(
        &self,
        rule: &NewFilterRule,
    ) -> Result<FilterRule, ControlPlaneError> {
        let response = self
            .run(
                &format!("{FILTER_PATH}/add"),
                &[
                    ("chain", rule.chain.as_str()),
                    ("protocol", rule.protocol.as_str()),
                    ("action", rule.action.as_str()),
                    ("layer7-protocol", rule.matcher_ref.as_str()),
                    ("comment", rule.comment.as_str()),
                ],
            )
            .await?;
        Ok(FilterRule {
            id: created_id(&response)?,
            chain: rule.chain.clone(),
            protocol: Some(rule.protocol.clone()),
            action: rule.action.clone(),
            matcher_ref: Some(rule.matcher_ref.clone()),
            comment: Some(rule.comment.clone()),
        })
    }

    async fn remove_filter_rule(&self, id: &str) -> Result<(), ControlPlaneError> {
        self.run(&format!("{FILTER_PATH}/remove"), &[(".id", id)])
            .await?;
        Ok(())
    }
}
