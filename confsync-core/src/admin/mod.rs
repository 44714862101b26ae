//! # Administrative server
//!
//! A small HTTP surface over the shared store: a health probe plus direct
//! key reads, writes and deletes. Optional HTTP Basic authentication guards
//! the key routes.

pub mod auth;
pub mod server;

pub use auth::AdminAuth;
pub use server::{AdminState, SharedAdmin, router, run, serve};

use serde::{Deserialize, Serialize};

/// Configuration for the administrative server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Enables Basic authentication when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8800,
            username: None,
            password: None,
        }
    }
}

impl AdminConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.enabled {
            return problems;
        }
        if self.host.is_empty() {
            problems.push("admin.host must not be empty".to_string());
        }
        match (&self.username, &self.password) {
            (Some(_), None) => {
                problems.push("admin.password is required when admin.username is set".to_string())
            }
            (None, Some(_)) => {
                problems.push("admin.username is required when admin.password is set".to_string())
            }
            _ => {}
        }
        problems
    }
}
