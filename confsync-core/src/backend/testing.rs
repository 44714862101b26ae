//! Scriptable in-process stand-in for a Redis server, for unit tests.

use super::connection::{Connector, Session};
use super::endpoint::Endpoint;
use super::protocol::RespValue;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub(crate) type SharedFake = Arc<Mutex<FakeRedis>>;

#[derive(Debug, Default)]
pub(crate) struct FakeRedis {
    pub data: BTreeMap<String, String>,
    /// Keys returned per SCAN page; 0 means 10.
    pub page_size: usize,
    pub password: Option<String>,
    pub refuse_targets: Vec<String>,
    /// Reply to the next PING instead of PONG.
    pub ping_reply: Option<RespValue>,
    /// 1-based SCAN call that fails with a transport error.
    pub fail_scan_call: Option<usize>,
    /// Keys deleted right after a SCAN page reports them.
    pub vanish_after_scan: Vec<String>,
    /// Keys whose GET answers with a WRONGTYPE error.
    pub wrong_type: Vec<String>,
    pub generation: u64,
    pub connects: usize,
    pub connect_attempts: usize,
    pub dialed: Vec<String>,
    pub scan_calls: usize,
    pub commands: Vec<String>,
}

impl FakeRedis {
    pub fn shared() -> SharedFake {
        Arc::new(Mutex::new(FakeRedis::default()))
    }

    pub fn with_data(pairs: &[(&str, &str)]) -> SharedFake {
        let fake = FakeRedis::shared();
        {
            let mut state = fake.lock().unwrap();
            for (k, v) in pairs {
                state.data.insert(k.to_string(), v.to_string());
            }
        }
        fake
    }

    /// Make every session opened so far fail its next call.
    pub fn break_sessions(&mut self) {
        self.generation += 1;
    }

    fn dispatch(&mut self, args: &[&str]) -> Result<RespValue, StoreError> {
        let name = args.first().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
        self.commands.push(name.clone());
        match (name.as_str(), &args[1..]) {
            ("PING", []) => Ok(self
                .ping_reply
                .take()
                .unwrap_or_else(|| RespValue::SimpleString("PONG".into()))),
            ("GET", [key]) => {
                if self.wrong_type.iter().any(|k| k.as_str() == *key) {
                    return Err(StoreError::Command {
                        message: "WRONGTYPE Operation against a key holding the wrong kind of value"
                            .into(),
                    });
                }
                Ok(match self.data.get(*key) {
                    Some(v) => RespValue::bulk(v),
                    None => RespValue::BulkString(None),
                })
            }
            ("SET", [key, value]) => {
                self.data.insert(key.to_string(), value.to_string());
                Ok(RespValue::SimpleString("OK".into()))
            }
            ("DEL", keys) => {
                let removed = keys.iter().filter(|k| self.data.remove(**k).is_some()).count();
                Ok(RespValue::Integer(removed as i64))
            }
            ("SCAN", [cursor, "MATCH", pattern, "COUNT", _]) => self.scan(cursor, pattern),
            _ => Err(StoreError::Command {
                message: format!("ERR unknown command '{name}'"),
            }),
        }
    }

    fn scan(&mut self, cursor: &str, pattern: &str) -> Result<RespValue, StoreError> {
        self.scan_calls += 1;
        if self.fail_scan_call == Some(self.scan_calls) {
            self.break_sessions();
            return Err(StoreError::Connection {
                endpoint: "fake".into(),
                message: "connection reset by peer".into(),
            });
        }
        let start: usize = cursor.parse().map_err(|_| StoreError::Command {
            message: "ERR invalid cursor".into(),
        })?;
        let page = if self.page_size == 0 { 10 } else { self.page_size };
        let matching: Vec<String> = self
            .data
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        let end = (start + page).min(matching.len());
        let names: Vec<String> = matching.get(start..end).unwrap_or_default().to_vec();
        let next = if end >= matching.len() { 0 } else { end };

        for name in &names {
            if self.vanish_after_scan.contains(name) {
                self.data.remove(name);
            }
        }

        Ok(RespValue::Array(Some(vec![
            RespValue::bulk(next.to_string()),
            RespValue::Array(Some(names.iter().map(RespValue::bulk).collect())),
        ])))
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

pub(crate) struct FakeConnector {
    fake: SharedFake,
}

impl FakeConnector {
    pub fn new(fake: SharedFake) -> Self {
        Self { fake }
    }
}

pub(crate) struct FakeSession {
    fake: SharedFake,
    generation: u64,
    endpoint: String,
}

#[async_trait]
impl Session for FakeSession {
    async fn call(&mut self, args: &[&str]) -> Result<RespValue, StoreError> {
        let mut state = self.fake.lock().unwrap();
        if state.generation != self.generation {
            return Err(StoreError::Connection {
                endpoint: self.endpoint.clone(),
                message: "broken pipe".into(),
            });
        }
        state.dispatch(args)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credential: Option<&str>,
    ) -> Result<FakeSession, StoreError> {
        let mut state = self.fake.lock().unwrap();
        state.connect_attempts += 1;
        state.dialed.push(endpoint.target().to_string());
        if state.refuse_targets.iter().any(|t| t == endpoint.target()) {
            return Err(StoreError::Connection {
                endpoint: endpoint.target().to_string(),
                message: "connection refused".into(),
            });
        }
        if state.password.is_some() && state.password.as_deref() != credential {
            return Err(StoreError::Connection {
                endpoint: endpoint.target().to_string(),
                message: "WRONGPASS invalid password".into(),
            });
        }
        state.connects += 1;
        Ok(FakeSession {
            fake: self.fake.clone(),
            generation: state.generation,
            endpoint: endpoint.target().to_string(),
        })
    }
}
