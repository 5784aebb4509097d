// Copyright (c) 2025 - Cowboy AI, Inc.
//! Auth gate
//!
//! Resolves a bearer token from an ordered list of providers before any
//! sync operation. Two provider shapes exist:
//!
//! - `default` - username/password against the sync server's login
//!   endpoint
//! - OAuth authorization-code providers - a code is exchanged at the
//!   provider's token endpoint; the userinfo endpoint validates tokens
//!
//! Tokens are held in the [`AuthStoragePort`] keyed by provider name.
//! `logout` clears every provider's token.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::storage::{AuthStoragePort, StoredToken};
use crate::sync::SyncTransport;

/// Name of the built-in username/password provider
pub const DEFAULT_PROVIDER: &str = "default";

/// Timeout for userinfo token validation
pub const TOKEN_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of one auth provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthProviderConfig {
    /// Username/password against the sync server
    Default,
    /// Generic OAuth authorization-code provider
    Oauth {
        /// Provider name, the token storage key
        name: String,
        /// Token endpoint for the code exchange
        token_endpoint: String,
        /// Userinfo endpoint for token validation
        userinfo_endpoint: String,
        /// OAuth client id
        client_id: String,
        /// OAuth client secret, absent for public clients
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_secret: Option<String>,
    },
}

impl AuthProviderConfig {
    /// The provider's name, used as the token storage key
    pub fn name(&self) -> &str {
        match self {
            AuthProviderConfig::Default => DEFAULT_PROVIDER,
            AuthProviderConfig::Oauth { name, .. } => name,
        }
    }
}

/// Credentials presented to [`AuthGate::login`]
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Email/password pair for the default provider
    Password {
        email: String,
        password: String,
    },
    /// Authorization code from an OAuth redirect
    AuthorizationCode {
        code: String,
        redirect_uri: String,
    },
}

#[derive(Debug, Deserialize)]
struct OauthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Resolves and validates bearer tokens for the sync managers
pub struct AuthGate {
    providers: Vec<AuthProviderConfig>,
    storage: Arc<dyn AuthStoragePort>,
    transport: Arc<dyn SyncTransport>,
    http: Client,
}

impl AuthGate {
    /// Build a gate over an ordered provider list
    ///
    /// Provider order matters: [`AuthGate::active_token`] returns the
    /// first non-expired token in this order.
    pub fn new(
        providers: Vec<AuthProviderConfig>,
        storage: Arc<dyn AuthStoragePort>,
        transport: Arc<dyn SyncTransport>,
    ) -> EngineResult<Self> {
        let http = Client::builder()
            .timeout(TOKEN_VALIDATION_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        Ok(Self {
            providers,
            storage,
            transport,
            http,
        })
    }

    fn provider(&self, name: &str) -> EngineResult<&AuthProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| EngineError::Configuration(format!("unknown auth provider {}", name)))
    }

    /// Log in through a provider
    ///
    /// With no explicit provider, a password pair goes to `default` and
    /// an authorization code goes to the first OAuth provider.
    pub async fn login(
        &self,
        credentials: Credentials,
        provider: Option<&str>,
    ) -> EngineResult<()> {
        let provider = match provider {
            Some(name) => self.provider(name)?,
            None => match &credentials {
                Credentials::Password { .. } => self.provider(DEFAULT_PROVIDER)?,
                Credentials::AuthorizationCode { .. } => self
                    .providers
                    .iter()
                    .find(|p| matches!(p, AuthProviderConfig::Oauth { .. }))
                    .ok_or_else(|| {
                        EngineError::Configuration("no oauth provider configured".into())
                    })?,
            },
        };

        match (provider, credentials) {
            (AuthProviderConfig::Default, Credentials::Password { email, password }) => {
                let response = self.transport.login(&email, &password).await?;
                self.storage
                    .set_token(
                        DEFAULT_PROVIDER,
                        &StoredToken {
                            token: response.token,
                            expires_at: None,
                        },
                    )
                    .await?;
                self.storage.set_username(&email).await?;
                info!(user = %response.user_id, "logged in via default provider");
                Ok(())
            }
            (
                AuthProviderConfig::Oauth {
                    name,
                    token_endpoint,
                    client_id,
                    client_secret,
                    ..
                },
                Credentials::AuthorizationCode { code, redirect_uri },
            ) => {
                let mut params = vec![
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("client_id", client_id.clone()),
                ];
                if let Some(secret) = client_secret {
                    params.push(("client_secret", secret.clone()));
                }

                let response = self.http.post(token_endpoint).form(&params).send().await?;
                if !response.status().is_success() {
                    return Err(EngineError::Unauthorized(format!(
                        "token exchange failed with {}",
                        response.status()
                    )));
                }
                let token: OauthTokenResponse = response.json().await?;
                let expires_at = token
                    .expires_in
                    .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
                self.storage
                    .set_token(
                        name,
                        &StoredToken {
                            token: token.access_token,
                            expires_at,
                        },
                    )
                    .await?;
                info!(provider = %name, "logged in via oauth provider");
                Ok(())
            }
            _ => Err(EngineError::Validation(
                "credentials do not match the provider type".into(),
            )),
        }
    }

    /// Whether any provider holds a non-expired token
    pub async fn is_authenticated(&self) -> EngineResult<bool> {
        Ok(self.active_token().await.is_ok())
    }

    /// The first non-expired token in provider order
    ///
    /// # Errors
    ///
    /// [`EngineError::Unauthorized`] when no provider holds one.
    pub async fn active_token(&self) -> EngineResult<String> {
        let now = Utc::now();
        for provider in &self.providers {
            if let Some(token) = self.storage.get_token(provider.name()).await? {
                if token.is_expired(now) {
                    debug!(provider = provider.name(), "stored token expired");
                    continue;
                }
                return Ok(token.token);
            }
        }
        Err(EngineError::Unauthorized("no active token".into()))
    }

    /// Validate a token against a provider's userinfo endpoint
    ///
    /// Uses the 5 s validation timeout; any non-success status counts
    /// as invalid.
    pub async fn validate_token(&self, provider: &str, token: &str) -> EngineResult<bool> {
        match self.provider(provider)? {
            AuthProviderConfig::Default => {
                // The sync server has no userinfo endpoint; a 401 from
                // any sync call is the validity signal. Probe with the
                // cheapest request.
                match self.transport.count_entities(token).await {
                    Ok(_) => Ok(true),
                    Err(EngineError::Unauthorized(_)) => Ok(false),
                    Err(err) => Err(err),
                }
            }
            AuthProviderConfig::Oauth {
                userinfo_endpoint, ..
            } => {
                let response = self
                    .http
                    .get(userinfo_endpoint)
                    .bearer_auth(token)
                    .send()
                    .await;
                match response {
                    Ok(response) => Ok(response.status().is_success()),
                    Err(err) if err.is_timeout() => {
                        warn!(provider, "userinfo validation timed out");
                        Err(EngineError::Timeout(err.to_string()))
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Clear every provider's token and the username
    pub async fn logout(&self) -> EngineResult<()> {
        self.storage.remove_all().await?;
        info!("logged out, all provider tokens cleared");
        Ok(())
    }
}
