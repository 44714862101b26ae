//! Session ownership, liveness probing, and lazy reconnect.
//!
//! `ConnectionManager` holds at most one session. A session that fails its
//! probe is dropped and replaced wholesale by a fresh sweep over the endpoint
//! list; it is never repaired in place.

use super::endpoint::Endpoint;
use super::protocol::RespValue;
use crate::error::StoreError;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// A live request/reply session with the store.
#[async_trait]
pub trait Session: Send {
    /// Send one command and wait for its reply. Error replies from the store
    /// come back as `StoreError::Command`.
    async fn call(&mut self, args: &[&str]) -> Result<RespValue, StoreError>;
}

/// Opens sessions to individual endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    /// Dial `endpoint`, authenticating with `credential` when one is set.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: Option<&str>,
    ) -> Result<Self::Session, StoreError>;
}

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Failed(StoreError),
}

impl ProbeOutcome {
    /// Classify a `PING` reply. Only `PONG` counts as healthy.
    pub fn from_reply(reply: Result<RespValue, StoreError>) -> Self {
        match reply {
            Ok(RespValue::SimpleString(s)) if s == "PONG" => ProbeOutcome::Healthy,
            Ok(other) => ProbeOutcome::Failed(StoreError::Protocol {
                message: format!("unexpected {} in reply to PING", other.kind()),
            }),
            Err(err) => ProbeOutcome::Failed(err),
        }
    }
}

/// Connection state machine.
#[derive(Debug)]
pub enum ConnectionState<S> {
    Disconnected,
    Connected(S),
}

impl<S> ConnectionState<S> {
    /// Next state given the outcome of probing the current one.
    pub fn after_probe(self, outcome: &ProbeOutcome) -> Self {
        match (self, outcome) {
            (ConnectionState::Connected(session), ProbeOutcome::Healthy) => {
                ConnectionState::Connected(session)
            }
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }
}

/// Owns the single session to the store.
///
/// Not internally synchronized: callers that share a manager must serialize
/// access (the Redis client wraps it in a mutex).
pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoints: Vec<Endpoint>,
    credential: Option<String>,
    state: ConnectionState<C::Session>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoints", &self.endpoints)
            .field("authenticated", &self.credential.is_some())
            .field("connected", &self.state.is_connected())
            .finish()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager in the disconnected state.
    pub fn new(connector: C, endpoints: Vec<Endpoint>, credential: Option<String>) -> Self {
        Self {
            connector,
            endpoints,
            credential: credential.filter(|c| !c.is_empty()),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Sweep the endpoint list and install the first session that opens.
    pub async fn connect(&mut self) -> Result<(), StoreError> {
        let session =
            Self::try_connect(&self.connector, &self.endpoints, self.credential.as_deref()).await?;
        self.state = ConnectionState::Connected(session);
        Ok(())
    }

    /// Make sure a healthy session is installed.
    ///
    /// An existing session is probed first; a failed probe drops it and
    /// triggers exactly one reconnect sweep.
    pub async fn ensure_live(&mut self) -> Result<(), StoreError> {
        if let ConnectionState::Connected(session) = &mut self.state {
            debug!("Testing existing store connection");
            let outcome = ProbeOutcome::from_reply(session.call(&["PING"]).await);
            if let ProbeOutcome::Failed(err) = &outcome {
                error!(error = %err, "Existing store connection no longer usable, will try to re-establish");
            }
            let state = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
            self.state = state.after_probe(&outcome);
        }

        if !self.state.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    /// Run one command on the current session without probing it first.
    ///
    /// Transport and protocol failures drop the session so the next
    /// `ensure_live` reconnects.
    pub async fn execute(&mut self, args: &[&str]) -> Result<RespValue, StoreError> {
        let result = match &mut self.state {
            ConnectionState::Connected(session) => session.call(args).await,
            ConnectionState::Disconnected => {
                return Err(StoreError::Connection {
                    endpoint: self.endpoint_summary(),
                    message: "no live session".to_string(),
                });
            }
        };

        if let Err(err) = &result {
            if err.invalidates_session() {
                warn!(error = %err, "Dropping store session after failed command");
                self.state = ConnectionState::Disconnected;
            }
        }
        result
    }

    // Borrows fields rather than `&self` so the future stays `Send` for
    // sessions that are not `Sync`.
    async fn try_connect(
        connector: &C,
        endpoints: &[Endpoint],
        credential: Option<&str>,
    ) -> Result<C::Session, StoreError> {
        let mut last_error = None;
        for endpoint in endpoints {
            info!(
                address = endpoint.target(),
                db = endpoint.database(),
                transport = %endpoint.transport(),
                "Trying to connect to store"
            );
            match connector.connect(endpoint, credential).await {
                Ok(session) => return Ok(session),
                Err(err) => {
                    warn!(address = endpoint.target(), error = %err, "Store endpoint refused session");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StoreError::Connection {
            endpoint: "<none>".to_string(),
            message: "no endpoints configured".to_string(),
        }))
    }

    fn endpoint_summary(&self) -> String {
        self.endpoints
            .iter()
            .map(|e| e.target())
            .collect::<Vec<_>>()
            .join(",")
    }
}
