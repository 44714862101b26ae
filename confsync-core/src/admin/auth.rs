//! Admin server authentication.

use super::AdminConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// HTTP Basic authentication for the admin routes.
#[derive(Debug, Clone, Default)]
pub struct AdminAuth {
    credentials: Option<(String, String)>,
}

impl AdminAuth {
    /// Create a validator from the admin config. Without a username the
    /// server runs in open mode.
    pub fn from_config(config: &AdminConfig) -> Self {
        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone().unwrap_or_default()));
        Self { credentials }
    }

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some((username.into(), password.into())),
        }
    }

    /// Whether no authentication is required.
    pub fn is_open_mode(&self) -> bool {
        self.credentials.is_none()
    }

    /// Validate an `Authorization` header value.
    pub fn validate(&self, header: Option<&str>) -> bool {
        let Some((user, pass)) = &self.credentials else {
            return true;
        };
        let Some(encoded) = header.and_then(|h| h.strip_prefix("Basic ")) else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((u, p)) => u == user && p == pass,
            None => false,
        }
    }
}

/// Build a Basic `Authorization` header value.
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
