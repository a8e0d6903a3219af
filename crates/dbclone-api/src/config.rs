//! Server configuration.

use std::sync::Arc;

use axum::http::HeaderValue;
use tracing::{info, warn};

use dbclone_core::{defaults, Error, Result, SessionProvider};

use crate::sessions::{HttpSessionProvider, StaticSessionProvider};

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Hosting platform session endpoint.
    pub session_url: Option<String>,
    /// `token:role,...` pairs for development.
    pub static_sessions: Option<String>,
    /// CORS origins.
    pub allowed_origins: Vec<String>,
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::SERVER_HOST.to_string(),
            port: defaults::SERVER_PORT,
            session_url: None,
            static_sessions: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            body_limit: defaults::REQUEST_BODY_LIMIT,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `HOST` | `0.0.0.0` | Bind address |
    /// | `PORT` | `3000` | Bind port |
    /// | `SESSION_URL` | unset | Session endpoint of the hosting platform |
    /// | `STATIC_SESSIONS` | unset | `token:role,...` for development |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` | Comma-separated CORS origins |
    pub fn from_env() -> Self {
        let base = Self::default();

        let host = non_empty_var("HOST").unwrap_or(base.host);
        let port = non_empty_var("PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(base.port);
        let allowed_origins = non_empty_var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(base.allowed_origins);

        Self {
            host,
            port,
            session_url: non_empty_var("SESSION_URL"),
            static_sessions: non_empty_var("STATIC_SESSIONS"),
            allowed_origins,
            body_limit: base.body_limit,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_session_url(mut self, url: impl Into<String>) -> Self {
        self.session_url = Some(url.into());
        self
    }

    pub fn with_static_sessions(mut self, entries: impl Into<String>) -> Self {
        self.static_sessions = Some(entries.into());
        self
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the configured session provider. `SESSION_URL` wins over
    /// `STATIC_SESSIONS`; one of them is required.
    pub fn session_provider(&self) -> Result<Arc<dyn SessionProvider>> {
        if let Some(url) = &self.session_url {
            info!(subsystem = "api", component = "sessions", "Using HTTP session provider");
            return Ok(Arc::new(HttpSessionProvider::new(url.clone())?));
        }
        if let Some(entries) = &self.static_sessions {
            let provider = StaticSessionProvider::parse(entries)?;
            warn!(
                subsystem = "api",
                component = "sessions",
                sessions = provider.len(),
                "Using static session tokens; do not use in production"
            );
            return Ok(Arc::new(provider));
        }
        Err(Error::Config(
            "either SESSION_URL or STATIC_SESSIONS must be set".to_string(),
        ))
    }

    /// Parsed CORS origins; invalid entries are skipped with a warning.
    pub fn cors_origins(&self) -> Vec<HeaderValue> {
        self.allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", origin, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.body_limit, defaults::REQUEST_BODY_LIMIT);
    }

    #[test]
    fn test_session_provider_required() {
        assert!(matches!(
            ServerConfig::default().session_provider(),
            Err(Error::Config(_))
        ));
        assert!(ServerConfig::default()
            .with_static_sessions("t:superuser")
            .session_provider()
            .is_ok());
    }

    #[test]
    fn test_cors_origins_skip_invalid() {
        let config = ServerConfig::default().with_allowed_origins(vec![
            "https://admin.loft-algerie.com".to_string(),
            "bad\norigin".to_string(),
        ]);
        assert_eq!(config.cors_origins().len(), 1);
    }
}
