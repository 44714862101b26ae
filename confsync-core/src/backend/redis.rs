//! Redis-compatible store client.
//!
//! Point lookups use `GET`; when a key holds no value it is treated as a
//! directory and enumerated with `SCAN` pagination. Every operation probes the
//! session with `PING` first and reconnects once if the probe fails.

use super::connection::{ConnectionManager, Connector, Session};
use super::endpoint::{Endpoint, TransportKind};
use super::protocol::{self, RespValue};
use super::{BackendCapabilities, KeyValueMap, StoreClient, scan_pattern, strip_wildcard};
use crate::error::{FetchError, StoreError};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connect, read, and write timeout for every store I/O.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// `COUNT` hint sent with every `SCAN`.
pub const SCAN_PAGE_SIZE: usize = 1000;

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// A RESP2 session over TCP or a local socket.
pub struct RespSession {
    stream: Box<dyn AsyncStream>,
    buffer: BytesMut,
    timeout: Duration,
    peer: String,
}

impl RespSession {
    fn new(stream: impl AsyncStream + 'static, peer: String, timeout: Duration) -> Self {
        Self {
            stream: Box::new(stream),
            buffer: BytesMut::with_capacity(4096),
            timeout,
            peer,
        }
    }

    async fn read_reply(&mut self) -> Result<RespValue, StoreError> {
        loop {
            if let Some((value, used)) = protocol::parse(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(value);
            }
            let read = tokio::time::timeout(self.timeout, self.stream.read_buf(&mut self.buffer))
                .await
                .map_err(|_| transport_error(&self.peer, "read timed out"))?
                .map_err(|e| transport_error(&self.peer, &e.to_string()))?;
            if read == 0 {
                return Err(transport_error(&self.peer, "connection closed by store"));
            }
        }
    }
}

#[async_trait]
impl Session for RespSession {
    async fn call(&mut self, args: &[&str]) -> Result<RespValue, StoreError> {
        let frame = protocol::encode_command(args);
        tokio::time::timeout(self.timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| transport_error(&self.peer, "write timed out"))?
            .map_err(|e| transport_error(&self.peer, &e.to_string()))?;

        match self.read_reply().await? {
            RespValue::Error(message) => Err(StoreError::Command { message }),
            reply => Ok(reply),
        }
    }
}

/// Dials real sockets.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    timeout: Duration,
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self {
            timeout: IO_TIMEOUT,
        }
    }
}

impl RedisConnector {
    async fn dial(&self, endpoint: &Endpoint) -> Result<RespSession, StoreError> {
        let peer = endpoint.target().to_string();
        match endpoint.transport() {
            TransportKind::Tcp => {
                let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&peer))
                    .await
                    .map_err(|_| transport_error(&peer, "connect timed out"))?
                    .map_err(|e| transport_error(&peer, &e.to_string()))?;
                let _ = stream.set_nodelay(true);
                Ok(RespSession::new(stream, peer, self.timeout))
            }
            #[cfg(unix)]
            TransportKind::Unix => {
                let stream =
                    tokio::time::timeout(self.timeout, tokio::net::UnixStream::connect(&peer))
                        .await
                        .map_err(|_| transport_error(&peer, "connect timed out"))?
                        .map_err(|e| transport_error(&peer, &e.to_string()))?;
                Ok(RespSession::new(stream, peer, self.timeout))
            }
            #[cfg(not(unix))]
            TransportKind::Unix => Err(transport_error(
                &peer,
                "local socket endpoints are not supported on this platform",
            )),
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Session = RespSession;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: Option<&str>,
    ) -> Result<RespSession, StoreError> {
        let mut session = self.dial(endpoint).await?;

        if let Some(password) = credential {
            expect_ok(session.call(&["AUTH", password]).await, endpoint, "AUTH")?;
        }
        if endpoint.database() != 0 {
            let db = endpoint.database().to_string();
            expect_ok(session.call(&["SELECT", &db]).await, endpoint, "SELECT")?;
        }
        Ok(session)
    }
}

/// Store client for Redis and protocol-compatible servers.
///
/// The connection manager sits behind one mutex so the admin server and the
/// template processor never race a reconnect.
pub struct RedisStoreClient<C: Connector = RedisConnector> {
    conn: Mutex<ConnectionManager<C>>,
}

impl RedisStoreClient<RedisConnector> {
    /// Connect to the first reachable endpoint. Fails if none accepts a
    /// session.
    pub async fn connect(
        endpoints: Vec<Endpoint>,
        credential: Option<String>,
    ) -> Result<Self, StoreError> {
        Self::with_connector(RedisConnector::default(), endpoints, credential).await
    }
}

impl<C: Connector> RedisStoreClient<C> {
    pub async fn with_connector(
        connector: C,
        endpoints: Vec<Endpoint>,
        credential: Option<String>,
    ) -> Result<Self, StoreError> {
        let mut manager = ConnectionManager::new(connector, endpoints, credential);
        manager.connect().await?;
        Ok(Self {
            conn: Mutex::new(manager),
        })
    }
}

#[async_trait]
impl<C: Connector + 'static> StoreClient for RedisStoreClient<C> {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_watch: false,
        }
    }

    async fn get_values(&self, keys: &[String]) -> Result<KeyValueMap, FetchError> {
        let mut conn = self.conn.lock().await;
        let mut values = KeyValueMap::new();
        if let Err(err) = conn.ensure_live().await {
            return Err(FetchError::new(values, err));
        }
        for key in keys {
            if let Err(err) = collect_key(&mut conn, key, &mut values).await {
                return Err(FetchError::new(values, err));
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        conn.ensure_live().await?;
        match conn.execute(&["SET", key, value]).await? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        conn.ensure_live().await?;
        match conn.execute(&["DEL", key]).await? {
            RespValue::Integer(n) if n > 0 => Ok(()),
            RespValue::Integer(_) => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            other => Err(unexpected("DEL", &other)),
        }
    }

    /// Redis offers no change notification here; this only waits for `stop`.
    async fn watch_prefix(
        &self,
        prefix: &str,
        _keys: &[String],
        _wait_index: u64,
        stop: &CancellationToken,
    ) -> Result<u64, StoreError> {
        debug!(prefix, "Watch is not supported by the redis backend, waiting for stop");
        stop.cancelled().await;
        Ok(0)
    }
}

async fn collect_key<C: Connector>(
    conn: &mut ConnectionManager<C>,
    key: &str,
    values: &mut KeyValueMap,
) -> Result<(), StoreError> {
    let key = strip_wildcard(key);
    match get_string(conn, key).await {
        Ok(value) => {
            values.insert(key.to_string(), value);
            return Ok(());
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(err),
    }

    let pattern = scan_pattern(key);
    for name in scan_all(conn, &pattern).await? {
        match get_string(conn, &name).await {
            Ok(value) => {
                values.insert(name, value);
            }
            // deleted between SCAN and GET
            Err(err) if err.is_not_found() => {}
            Err(StoreError::Command { message }) => {
                warn!(key = %name, %message, "Skipping key that does not hold a string value");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

async fn get_string<C: Connector>(
    conn: &mut ConnectionManager<C>,
    key: &str,
) -> Result<String, StoreError> {
    match conn.execute(&["GET", key]).await? {
        RespValue::BulkString(Some(data)) => Ok(String::from_utf8_lossy(&data).into_owned()),
        RespValue::BulkString(None) => Err(StoreError::NotFound {
            key: key.to_string(),
        }),
        other => Err(unexpected("GET", &other)),
    }
}

/// Page through `SCAN` until the cursor returns to 0.
async fn scan_all<C: Connector>(
    conn: &mut ConnectionManager<C>,
    pattern: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let page_size = SCAN_PAGE_SIZE.to_string();
    let mut names = BTreeSet::new();
    let mut cursor = 0u64;
    loop {
        let cursor_arg = cursor.to_string();
        let reply = conn
            .execute(&["SCAN", &cursor_arg, "MATCH", pattern, "COUNT", &page_size])
            .await
            .and_then(parse_scan_reply)
            .map_err(|source| StoreError::Scan {
                pattern: pattern.to_string(),
                cursor,
                source: Box::new(source),
            })?;
        let (next, page) = reply;
        names.extend(page);
        if next == 0 {
            return Ok(names);
        }
        cursor = next;
    }
}

/// Split a `SCAN` reply into the next cursor and the page of key names.
pub fn parse_scan_reply(reply: RespValue) -> Result<(u64, Vec<String>), StoreError> {
    let mut parts = match reply {
        RespValue::Array(Some(parts)) => parts,
        other => return Err(unexpected("SCAN", &other)),
    };
    if parts.len() != 2 {
        return Err(StoreError::Protocol {
            message: format!("SCAN reply has {} elements, expected 2", parts.len()),
        });
    }
    let items = parts.pop();
    let cursor = parts.pop();

    let cursor = match cursor {
        Some(RespValue::BulkString(Some(data))) => std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.parse::<u64>().ok()),
        Some(RespValue::Integer(n)) => u64::try_from(n).ok(),
        _ => None,
    }
    .ok_or_else(|| StoreError::Protocol {
        message: "SCAN cursor is not an unsigned integer".to_string(),
    })?;

    let Some(RespValue::Array(Some(items))) = items else {
        return Err(StoreError::Protocol {
            message: "SCAN key list is not an array".to_string(),
        });
    };
    let names = items
        .into_iter()
        .map(|item| match item {
            RespValue::BulkString(Some(data)) => Ok(String::from_utf8_lossy(&data).into_owned()),
            other => Err(unexpected("SCAN", &other)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((cursor, names))
}

fn expect_ok(
    reply: Result<RespValue, StoreError>,
    endpoint: &Endpoint,
    command: &str,
) -> Result<(), StoreError> {
    match reply {
        Ok(RespValue::SimpleString(s)) if s == "OK" => Ok(()),
        Ok(other) => Err(transport_error(
            endpoint.target(),
            &format!("unexpected {} in reply to {command}", other.kind()),
        )),
        Err(err) => Err(transport_error(
            endpoint.target(),
            &format!("{command} failed: {err}"),
        )),
    }
}

fn unexpected(command: &str, reply: &RespValue) -> StoreError {
    StoreError::Protocol {
        message: format!("unexpected {} in reply to {command}", reply.kind()),
    }
}

fn transport_error(peer: &str, message: &str) -> StoreError {
    StoreError::Connection {
        endpoint: peer.to_string(),
        message: message.to_string(),
    }
}
