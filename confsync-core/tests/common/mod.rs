//! A small RESP2 server speaking just enough Redis for the backend tests.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use confsync_core::backend::protocol::{self, RespValue};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Default)]
pub struct ServerState {
    pub data: BTreeMap<String, String>,
    pub password: Option<String>,
    /// Keys per SCAN page; 0 means 10.
    pub page_size: usize,
    pub generation: u64,
    pub connections: usize,
    pub selected: Vec<u32>,
    pub scan_calls: usize,
    pub commands: Vec<Vec<String>>,
}

impl ServerState {
    /// Command names in the order they arrived.
    pub fn command_names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c[0].clone()).collect()
    }

    fn dispatch(&mut self, args: &[String], authed: &mut bool) -> RespValue {
        self.commands.push(args.to_vec());
        let name = args[0].to_ascii_uppercase();
        let rest: Vec<&str> = args[1..].iter().map(String::as_str).collect();

        if name == "AUTH" {
            return match (&self.password, rest.as_slice()) {
                (Some(expected), [given]) if expected == given => {
                    *authed = true;
                    ok()
                }
                _ => RespValue::Error("WRONGPASS invalid username-password pair".into()),
            };
        }
        if !*authed {
            return RespValue::Error("NOAUTH Authentication required.".into());
        }

        match (name.as_str(), rest.as_slice()) {
            ("PING", []) => RespValue::SimpleString("PONG".into()),
            ("SELECT", [db]) => match db.parse() {
                Ok(db) => {
                    self.selected.push(db);
                    ok()
                }
                Err(_) => RespValue::Error("ERR value is not an integer".into()),
            },
            ("GET", [key]) => match self.data.get(*key) {
                Some(v) => RespValue::bulk(v),
                None => RespValue::BulkString(None),
            },
            ("SET", [key, value]) => {
                self.data.insert(key.to_string(), value.to_string());
                ok()
            }
            ("DEL", keys) => {
                let removed = keys.iter().filter(|k| self.data.remove(**k).is_some()).count();
                RespValue::Integer(removed as i64)
            }
            ("SCAN", [cursor, "MATCH", pattern, "COUNT", _]) => self.scan(cursor, pattern),
            _ => RespValue::Error(format!("ERR unknown command '{name}'")),
        }
    }

    fn scan(&mut self, cursor: &str, pattern: &str) -> RespValue {
        self.scan_calls += 1;
        let Ok(start) = cursor.parse::<usize>() else {
            return RespValue::Error("ERR invalid cursor".into());
        };
        let prefix = pattern.trim_end_matches('*');
        let matching: Vec<&String> = self.data.keys().filter(|k| k.starts_with(prefix)).collect();
        let page = if self.page_size == 0 { 10 } else { self.page_size };
        let end = (start + page).min(matching.len());
        let names: Vec<RespValue> = matching
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(RespValue::bulk)
            .collect();
        let next = if end >= matching.len() { 0 } else { end };
        RespValue::Array(Some(vec![
            RespValue::bulk(next.to_string()),
            RespValue::Array(Some(names)),
        ]))
    }
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".into())
}

pub type Shared = Arc<Mutex<ServerState>>;

pub fn state_with(pairs: &[(&str, &str)]) -> Shared {
    let state = ServerState {
        data: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..ServerState::default()
    };
    Arc::new(Mutex::new(state))
}

/// Drop every open connection at its next command.
pub fn kill_connections(state: &Shared) {
    state.lock().unwrap().generation += 1;
}

/// Serve `state` on an ephemeral localhost port.
pub async fn spawn_tcp(state: Shared) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, state.clone()));
        }
    });
    addr
}

/// Serve `state` on a unix socket at `path`.
#[cfg(unix)]
pub async fn spawn_unix(state: Shared, path: &std::path::Path) {
    let listener = tokio::net::UnixListener::bind(path).unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, state.clone()));
        }
    });
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, state: Shared) {
    let (generation, mut authed) = {
        let mut s = state.lock().unwrap();
        s.connections += 1;
        (s.generation, s.password.is_none())
    };
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        while let Ok(Some((frame, used))) = protocol::parse(&buf) {
            buf.advance(used);
            let Some(args) = command_args(frame) else {
                return;
            };
            let reply = {
                let mut s = state.lock().unwrap();
                if s.generation != generation {
                    return;
                }
                s.dispatch(&args, &mut authed)
            };
            let mut out = BytesMut::new();
            reply.encode(&mut out);
            if stream.write_all(&out).await.is_err() {
                return;
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn command_args(frame: RespValue) -> Option<Vec<String>> {
    let RespValue::Array(Some(items)) = frame else {
        return None;
    };
    let args: Vec<String> = items
        .into_iter()
        .filter_map(|item| match item {
            RespValue::BulkString(Some(data)) => Some(String::from_utf8_lossy(&data).into_owned()),
            _ => None,
        })
        .collect();
    (!args.is_empty()).then_some(args)
}
