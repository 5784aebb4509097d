// Copyright (c) 2025 - Cowboy AI, Inc.
//! Sync server client
//!
//! HTTP transport for the central sync server. The endpoint contract is
//! frozen:
//!
//! ```text
//! GET  /sync/count-entities?configId      → {count}
//! GET  /sync/pull?since&configId          → {events, nextCursor, hasMore}
//! POST /sync/push                         → {status} | {status, conflicts}
//! GET  /sync/pull/audit-logs?since&configId
//! POST /sync/push/audit-logs
//! POST /users/login                       → {token, userId}
//! ```
//!
//! All sync requests carry bearer auth and a 30 s timeout. Status
//! mapping: 401 aborts the sync as `Unauthorized`, other 4xx are fatal
//! for the batch, 5xx are transient and retried by the caller.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::domain::AuditLogEntry;
use crate::errors::{EngineError, EngineResult};

use super::{
    AuditPushRequest, CountResponse, LoginRequest, LoginResponse, PullResponse, PushRequest,
    PushResponse,
};

/// Default per-request timeout for sync calls
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport to the central sync server
///
/// The engine talks to this trait; [`SyncServerClient`] is the HTTPS
/// implementation, tests substitute an in-process one.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// One page of remote events at or after `since`
    async fn pull_events(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        token: &str,
    ) -> EngineResult<PullResponse>;

    /// Push one batch of local events
    async fn push_events(
        &self,
        events: &[crate::domain::FormSubmission],
        token: &str,
    ) -> EngineResult<PushResponse>;

    /// Remote audit entries at or after `since`
    async fn pull_audit_logs(
        &self,
        since: DateTime<Utc>,
        token: &str,
    ) -> EngineResult<Vec<AuditLogEntry>>;

    /// Push local audit entries
    async fn push_audit_logs(&self, entries: &[AuditLogEntry], token: &str) -> EngineResult<()>;

    /// Number of entities the server holds for this tenant
    async fn count_entities(&self, token: &str) -> EngineResult<u64>;

    /// Password login against the server
    async fn login(&self, email: &str, password: &str) -> EngineResult<LoginResponse>;
}

/// Configuration for the sync server connection
#[derive(Debug, Clone)]
pub struct SyncServerConfig {
    /// Server base URL, e.g. `https://sync.example.org`
    pub base_url: String,
    /// Tenant configuration id sent as `configId`
    pub config_id: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl SyncServerConfig {
    /// Config with the default timeout
    pub fn new(base_url: impl Into<String>, config_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config_id: config_id.into(),
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}

/// HTTPS implementation of [`SyncTransport`]
pub struct SyncServerClient {
    config: SyncServerConfig,
    client: Client,
}

impl SyncServerClient {
    /// Build a client for one sync server
    pub fn new(config: SyncServerConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(&self, response: Response) -> EngineResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }
}

/// Map an HTTP error status onto the engine taxonomy
fn map_status(status: StatusCode, body: &str) -> EngineError {
    if status == StatusCode::UNAUTHORIZED {
        EngineError::Unauthorized(format!("sync server returned 401: {}", body))
    } else if status.is_client_error() {
        EngineError::Conflict(format!("sync server rejected request ({}): {}", status, body))
    } else {
        EngineError::Network(format!("sync server error ({}): {}", status, body))
    }
}

#[async_trait]
impl SyncTransport for SyncServerClient {
    async fn pull_events(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&str>,
        token: &str,
    ) -> EngineResult<PullResponse> {
        let mut query = vec![
            (
                "since",
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("configId", self.config.config_id.clone()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self
            .client
            .get(self.url("/sync/pull"))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;
        let response = self.check(response).await?;
        debug!("pulled events page");
        Ok(response.json().await?)
    }

    async fn push_events(
        &self,
        events: &[crate::domain::FormSubmission],
        token: &str,
    ) -> EngineResult<PushResponse> {
        let body = PushRequest {
            events: events.to_vec(),
            config_id: self.config.config_id.clone(),
        };
        let response = self
            .client
            .post(self.url("/sync/push"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = self.check(response).await?;
        debug!(batch = events.len(), "pushed events batch");
        Ok(response.json().await?)
    }

    async fn pull_audit_logs(
        &self,
        since: DateTime<Utc>,
        token: &str,
    ) -> EngineResult<Vec<AuditLogEntry>> {
        let response = self
            .client
            .get(self.url("/sync/pull/audit-logs"))
            .bearer_auth(token)
            .query(&[
                (
                    "since",
                    since.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                ("configId", self.config.config_id.clone()),
            ])
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }

    async fn push_audit_logs(&self, entries: &[AuditLogEntry], token: &str) -> EngineResult<()> {
        let body = AuditPushRequest {
            audit_logs: entries.to_vec(),
            config_id: self.config.config_id.clone(),
        };
        let response = self
            .client
            .post(self.url("/sync/push/audit-logs"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn count_entities(&self, token: &str) -> EngineResult<u64> {
        let response = self
            .client
            .get(self.url("/sync/count-entities"))
            .bearer_auth(token)
            .query(&[("configId", self.config.config_id.clone())])
            .send()
            .await?;
        let response = self.check(response).await?;
        let count: CountResponse = response.json().await?;
        Ok(count.count)
    }

    async fn login(&self, email: &str, password: &str) -> EngineResult<LoginResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .client
            .post(self.url("/users/login"))
            .json(&body)
            .send()
            .await?;
        let response = self.check(response).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, ""),
            EngineError::Unauthorized(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, ""),
            EngineError::Conflict(_)
        ));
        let transient = map_status(StatusCode::BAD_GATEWAY, "");
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_url_join_tolerates_trailing_slash() {
        let client = SyncServerClient::new(SyncServerConfig::new(
            "https://sync.example.org/",
            "cfg-1",
        ))
        .unwrap();
        assert_eq!(client.url("/sync/pull"), "https://sync.example.org/sync/pull");
    }
}
