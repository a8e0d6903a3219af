//! Session providers: resolve a bearer token to the caller's session.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use dbclone_core::{Error, Result, Session, SessionProvider, SessionUser};

/// Default timeout for session lookups.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    user: Option<SessionUser>,
}

/// Looks sessions up on the hosting platform's HTTP session endpoint.
///
/// Sends `GET <url>` with the caller's bearer token and expects
/// `{"user": {"role": "..."}}`. 401/403/404 mean "no session".
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionProvider {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("session url is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        let response = self.client.get(&self.url).bearer_auth(token).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!(
                    subsystem = "api",
                    component = "sessions",
                    status = response.status().as_u16(),
                    "Session service rejected token"
                );
                return Ok(None);
            }
            status if !status.is_success() => {
                warn!(
                    subsystem = "api",
                    component = "sessions",
                    status = status.as_u16(),
                    "Session service returned an error"
                );
                return Err(Error::Request(format!(
                    "session service returned {}",
                    status.as_u16()
                )));
            }
            _ => {}
        }

        let envelope: SessionEnvelope = response.json().await?;
        Ok(envelope.user.map(|user| Session { user }))
    }
}

/// Fixed token-to-role map for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionProvider {
    sessions: HashMap<String, Session>,
}

impl StaticSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, role: impl Into<String>) -> Self {
        self.sessions.insert(token.into(), Session::with_role(role));
        self
    }

    /// Parse `token:role,token:role`.
    pub fn parse(entries: &str) -> Result<Self> {
        let mut provider = Self::new();
        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, role) = entry
                .split_once(':')
                .map(|(t, r)| (t.trim(), r.trim()))
                .filter(|(t, r)| !t.is_empty() && !r.is_empty())
                .ok_or_else(|| {
                    Error::Config("STATIC_SESSIONS entries must look like token:role".to_string())
                })?;
            provider = provider.with_session(token, role);
        }
        if provider.sessions.is_empty() {
            return Err(Error::Config("STATIC_SESSIONS is empty".to_string()));
        }
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(token).cloned())
    }
}
