//! In-process stand-in for a cluster node.
//!
//! [`MockNode`] speaks RESP2 on an ephemeral localhost port and keeps a small
//! in-memory keyspace. Its `CLUSTER NODES` reply is scripted by the test.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;

/// Reply of a node running without cluster support.
pub const CLUSTER_DISABLED: &str = "ERR This instance has cluster support disabled";

#[derive(Debug, Clone)]
enum ClusterReply {
    Text(String),
    Error(String),
}

#[derive(Debug)]
struct State {
    cluster: ClusterReply,
    password: Option<String>,
    reply_delay: Option<Duration>,
    strings: HashMap<Bytes, Bytes>,
    hashes: HashMap<Bytes, BTreeMap<Bytes, Bytes>>,
    lists: HashMap<Bytes, VecDeque<Bytes>>,
    counts: HashMap<String, usize>,
    accepted: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            cluster: ClusterReply::Error(CLUSTER_DISABLED.to_string()),
            password: None,
            reply_delay: None,
            strings: HashMap::new(),
            hashes: HashMap::new(),
            lists: HashMap::new(),
            counts: HashMap::new(),
            accepted: 0,
        }
    }
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A scripted node listening on `127.0.0.1`.
///
/// Without a script, `CLUSTER NODES` answers like a node with clustering
/// disabled. The listener and every connection stop when the value drops.
pub struct MockNode {
    port: u16,
    state: Shared<State>,
    sessions: Shared<Vec<JoinHandle<()>>>,
    listener: JoinHandle<()>,
}

impl MockNode {
    /// Binds an ephemeral port and starts accepting connections.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock node");
        let port = listener.local_addr().expect("mock node address").port();
        let state: Shared<State> = Arc::default();
        let sessions: Shared<Vec<JoinHandle<()>>> = Arc::default();

        let accept_state = state.clone();
        let accept_sessions = sessions.clone();
        let listener = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                lock(&accept_state).accepted += 1;
                let session = tokio::spawn(serve(socket, accept_state.clone()));
                lock(&accept_sessions).push(session);
            }
        });

        Self {
            port,
            state,
            sessions,
            listener,
        }
    }

    /// Returns the listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `127.0.0.1:<port>`.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Answers `CLUSTER NODES` with `text`.
    pub fn set_cluster_nodes(&self, text: &str) {
        lock(&self.state).cluster = ClusterReply::Text(text.to_string());
    }

    /// Answers `CLUSTER NODES` with the cluster-disabled error.
    pub fn set_cluster_disabled(&self) {
        self.set_cluster_error(CLUSTER_DISABLED);
    }

    /// Answers `CLUSTER NODES` with an arbitrary error.
    pub fn set_cluster_error(&self, message: &str) {
        lock(&self.state).cluster = ClusterReply::Error(message.to_string());
    }

    /// Requires AUTH with `password` before any other command.
    pub fn set_password(&self, password: &str) {
        lock(&self.state).password = Some(password.to_string());
    }

    /// Delays every reply.
    pub fn set_reply_delay(&self, delay: Option<Duration>) {
        lock(&self.state).reply_delay = delay;
    }

    /// Returns how many times a command (case-insensitive) was received.
    pub fn command_count(&self, name: &str) -> usize {
        let state = lock(&self.state);
        state
            .counts
            .get(&name.to_ascii_uppercase())
            .copied()
            .unwrap_or(0)
    }

    /// Returns how many connections were accepted so far.
    pub fn connections_accepted(&self) -> usize {
        lock(&self.state).accepted
    }

    /// Drops every open client socket. New connections are still accepted.
    pub async fn drop_connections(&self) {
        let sessions = std::mem::take(&mut *lock(&self.sessions));
        for session in sessions {
            session.abort();
            let _ = session.await;
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.listener.abort();
        for session in lock(&self.sessions).drain(..) {
            session.abort();
        }
    }
}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNode").field("port", &self.port).finish()
    }
}

async fn serve(mut socket: TcpStream, state: Shared<State>) {
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut buf = [0u8; 4096];
    let mut authenticated = false;

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.append(&buf[..n]);

        while let Ok(Some(frame)) = decoder.decode() {
            let (reply, delay) = {
                let mut state = lock(&state);
                let reply = match frame {
                    Frame::Array(args) => state.execute(args_of(args), &mut authenticated),
                    _ => error("ERR protocol error"),
                };
                (reply, state.reply_delay)
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            encoder.encode(&reply);
            if socket.write_all(&encoder.take()).await.is_err() {
                return;
            }
        }
    }
}

fn args_of(frames: Vec<Frame>) -> Vec<Bytes> {
    frames
        .into_iter()
        .map(|frame| match frame {
            Frame::BulkString(Some(b)) => b,
            Frame::SimpleString(s) => Bytes::from(s),
            _ => Bytes::new(),
        })
        .collect()
}

fn ok() -> Frame {
    Frame::SimpleString(b"OK".to_vec())
}

fn error(message: &str) -> Frame {
    Frame::Error(message.as_bytes().to_vec())
}

fn bulk(value: Option<Bytes>) -> Frame {
    Frame::BulkString(value)
}

fn array(items: impl IntoIterator<Item = Bytes>) -> Frame {
    Frame::Array(items.into_iter().map(|b| bulk(Some(b))).collect())
}

fn wrong_args(name: &str) -> Frame {
    error(&format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn int_arg(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn not_an_integer() -> Frame {
    error("ERR value is not an integer or out of range")
}

impl State {
    fn execute(&mut self, args: Vec<Bytes>, authenticated: &mut bool) -> Frame {
        let Some(name) = args.first() else {
            return error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        *self.counts.entry(name.clone()).or_default() += 1;
        let args = &args[1..];

        if name == "AUTH" {
            return match (&self.password, args) {
                (None, _) => error("ERR AUTH <password> called without any password configured"),
                (Some(expected), [given]) if given.as_ref() == expected.as_bytes() => {
                    *authenticated = true;
                    ok()
                }
                (Some(_), [_]) => {
                    error("WRONGPASS invalid username-password pair or user is disabled.")
                }
                _ => wrong_args(&name),
            };
        }
        if self.password.is_some() && !*authenticated {
            return error("NOAUTH Authentication required.");
        }

        match (name.as_str(), args) {
            ("PING", []) => Frame::SimpleString(b"PONG".to_vec()),
            ("FLUSHALL", []) => {
                self.strings.clear();
                self.hashes.clear();
                self.lists.clear();
                ok()
            }
            ("CLUSTER", [sub]) if sub.eq_ignore_ascii_case(b"NODES") => match &self.cluster {
                ClusterReply::Text(text) => bulk(Some(Bytes::from(text.clone()))),
                ClusterReply::Error(message) => error(message),
            },
            ("GET", [key]) => bulk(self.strings.get(key).cloned()),
            ("SET", [key, value, options @ ..]) => self.set(key, value, options),
            ("APPEND", [key, value]) => {
                let current = self.strings.entry(key.clone()).or_default();
                let mut joined = current.to_vec();
                joined.extend_from_slice(value);
                *current = Bytes::from(joined);
                Frame::Integer(current.len() as i64)
            }
            ("DEL", keys) if !keys.is_empty() => {
                let removed = keys.iter().filter(|key| self.remove(key)).count();
                Frame::Integer(removed as i64)
            }
            ("INCR", [key]) => self.incr_by(key, 1),
            ("DECR", [key]) => self.incr_by(key, -1),
            ("INCRBY", [key, amount]) => match int_arg(amount) {
                Some(amount) => self.incr_by(key, amount),
                None => not_an_integer(),
            },
            ("DECRBY", [key, amount]) => match int_arg(amount) {
                Some(amount) => self.incr_by(key, -amount),
                None => not_an_integer(),
            },
            ("HSET", [key, field, value]) => {
                let hash = self.hashes.entry(key.clone()).or_default();
                Frame::Integer(i64::from(hash.insert(field.clone(), value.clone()).is_none()))
            }
            ("HSETNX", [key, field, value]) => {
                let hash = self.hashes.entry(key.clone()).or_default();
                if hash.contains_key(field) {
                    Frame::Integer(0)
                } else {
                    hash.insert(field.clone(), value.clone());
                    Frame::Integer(1)
                }
            }
            ("HMSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
                let hash = self.hashes.entry(key.clone()).or_default();
                for pair in pairs.chunks(2) {
                    hash.insert(pair[0].clone(), pair[1].clone());
                }
                ok()
            }
            ("HGET", [key, field]) => bulk(self.hash(key).and_then(|h| h.get(field)).cloned()),
            ("HMGET", [key, fields @ ..]) if !fields.is_empty() => {
                let hash = self.hash(key);
                Frame::Array(
                    fields
                        .iter()
                        .map(|field| bulk(hash.and_then(|h| h.get(field)).cloned()))
                        .collect(),
                )
            }
            ("HDEL", [key, field]) => {
                let removed = self
                    .hashes
                    .get_mut(key)
                    .and_then(|hash| hash.remove(field))
                    .is_some();
                Frame::Integer(i64::from(removed))
            }
            ("HEXISTS", [key, field]) => {
                Frame::Integer(i64::from(self.hash(key).is_some_and(|h| h.contains_key(field))))
            }
            ("HLEN", [key]) => Frame::Integer(self.hash(key).map_or(0, |h| h.len() as i64)),
            ("HKEYS", [key]) => array(self.hash(key).into_iter().flat_map(|h| h.keys().cloned())),
            ("HVALS", [key]) => array(self.hash(key).into_iter().flat_map(|h| h.values().cloned())),
            ("HGETALL", [key]) => array(
                self.hash(key)
                    .into_iter()
                    .flat_map(|h| h.iter().flat_map(|(f, v)| [f.clone(), v.clone()])),
            ),
            ("HINCRBY", [key, field, amount]) => {
                let Some(amount) = int_arg(amount) else {
                    return not_an_integer();
                };
                let hash = self.hashes.entry(key.clone()).or_default();
                let current = hash.get(field).map_or(Some(0), int_arg);
                match current.and_then(|n| n.checked_add(amount)) {
                    Some(n) => {
                        hash.insert(field.clone(), Bytes::from(n.to_string()));
                        Frame::Integer(n)
                    }
                    None => error("ERR hash value is not an integer"),
                }
            }
            ("HINCRBYFLOAT", [key, field, amount]) => {
                let parse = |b: &Bytes| std::str::from_utf8(b).ok()?.parse::<f64>().ok();
                let hash = self.hashes.entry(key.clone()).or_default();
                let current = hash.get(field).map_or(Some(0.0), parse);
                match (current, parse(amount)) {
                    (Some(current), Some(amount)) => {
                        let value = Bytes::from((current + amount).to_string());
                        hash.insert(field.clone(), value.clone());
                        bulk(Some(value))
                    }
                    _ => error("ERR hash value is not a float"),
                }
            }
            ("LPUSH", [key, values @ ..]) if !values.is_empty() => {
                let list = self.lists.entry(key.clone()).or_default();
                for value in values {
                    list.push_front(value.clone());
                }
                Frame::Integer(list.len() as i64)
            }
            ("RPUSH", [key, values @ ..]) if !values.is_empty() => {
                let list = self.lists.entry(key.clone()).or_default();
                list.extend(values.iter().cloned());
                Frame::Integer(list.len() as i64)
            }
            ("LPUSHX", [key, value]) => match self.lists.get_mut(key) {
                Some(list) => {
                    list.push_front(value.clone());
                    Frame::Integer(list.len() as i64)
                }
                None => Frame::Integer(0),
            },
            ("RPUSHX", [key, value]) => match self.lists.get_mut(key) {
                Some(list) => {
                    list.push_back(value.clone());
                    Frame::Integer(list.len() as i64)
                }
                None => Frame::Integer(0),
            },
            ("LPOP", [key]) => bulk(self.pop(key, true)),
            ("RPOP", [key]) => bulk(self.pop(key, false)),
            ("BLPOP", [key, _timeout]) => self.blocking_pop(key, true),
            ("BRPOP", [key, _timeout]) => self.blocking_pop(key, false),
            ("RPOPLPUSH", [source, destination]) | ("BRPOPLPUSH", [source, destination, _]) => {
                let value = self.pop(source, false);
                if let Some(value) = &value {
                    self.lists
                        .entry(destination.clone())
                        .or_default()
                        .push_front(value.clone());
                }
                bulk(value)
            }
            ("LLEN", [key]) => Frame::Integer(self.lists.get(key).map_or(0, |l| l.len() as i64)),
            ("LINDEX", [key, index]) => {
                let value = int_arg(index).and_then(|index| {
                    let list = self.lists.get(key)?;
                    list.get(normalize(index, list.len())?).cloned()
                });
                bulk(value)
            }
            ("LRANGE", [key, start, stop]) => {
                let (Some(start), Some(stop)) = (int_arg(start), int_arg(stop)) else {
                    return not_an_integer();
                };
                let list = self.lists.get(key).cloned().unwrap_or_default();
                let len = list.len() as i64;
                let start = if start < 0 { (len + start).max(0) } else { start };
                let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                if start > stop {
                    return Frame::Array(Vec::new());
                }
                array(
                    list.into_iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize),
                )
            }
            ("LSET", [key, index, value]) => {
                let Some(index) = int_arg(index) else {
                    return not_an_integer();
                };
                let Some(list) = self.lists.get_mut(key) else {
                    return error("ERR no such key");
                };
                match normalize(index, list.len()) {
                    Some(i) => {
                        list[i] = value.clone();
                        ok()
                    }
                    None => error("ERR index out of range"),
                }
            }
            ("LTRIM", [key, start, stop]) => {
                let (Some(start), Some(stop)) = (int_arg(start), int_arg(stop)) else {
                    return not_an_integer();
                };
                if let Some(list) = self.lists.get_mut(key) {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    let kept: VecDeque<Bytes> = if start > stop {
                        VecDeque::new()
                    } else {
                        list.iter()
                            .skip(start as usize)
                            .take((stop - start + 1) as usize)
                            .cloned()
                            .collect()
                    };
                    *list = kept;
                }
                ok()
            }
            ("LREM", [key, count, value]) => {
                let Some(count) = int_arg(count) else {
                    return not_an_integer();
                };
                let Some(list) = self.lists.get_mut(key) else {
                    return Frame::Integer(0);
                };
                let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
                let mut removed = 0;
                if count >= 0 {
                    list.retain(|item| {
                        let hit = removed < limit && item == value;
                        removed += usize::from(hit);
                        !hit
                    });
                } else {
                    let mut reversed: VecDeque<Bytes> = list.drain(..).rev().collect();
                    reversed.retain(|item| {
                        let hit = removed < limit && item == value;
                        removed += usize::from(hit);
                        !hit
                    });
                    *list = reversed.into_iter().rev().collect();
                }
                Frame::Integer(removed as i64)
            }
            ("LINSERT", [key, position, pivot, value]) => {
                let before = position.eq_ignore_ascii_case(b"BEFORE");
                let Some(list) = self.lists.get_mut(key) else {
                    return Frame::Integer(0);
                };
                match list.iter().position(|item| item == pivot) {
                    Some(i) => {
                        list.insert(if before { i } else { i + 1 }, value.clone());
                        Frame::Integer(list.len() as i64)
                    }
                    None => Frame::Integer(-1),
                }
            }
            (name, _) if KNOWN.contains(&name) => wrong_args(name),
            (name, _) => error(&format!("ERR unknown command '{}'", name)),
        }
    }

    fn set(&mut self, key: &Bytes, value: &Bytes, options: &[Bytes]) -> Frame {
        let mut only_if_exists = false;
        let mut only_if_missing = false;
        let mut options = options.iter();
        while let Some(option) = options.next() {
            match option.to_ascii_uppercase().as_slice() {
                b"NX" => only_if_missing = true,
                b"XX" => only_if_exists = true,
                b"EX" | b"PX" => {
                    if options.next().and_then(int_arg).is_none() {
                        return not_an_integer();
                    }
                }
                _ => return error("ERR syntax error"),
            }
        }

        let exists = self.strings.contains_key(key);
        if (only_if_exists && !exists) || (only_if_missing && exists) {
            return Frame::Null;
        }
        self.strings.insert(key.clone(), value.clone());
        ok()
    }

    fn incr_by(&mut self, key: &Bytes, amount: i64) -> Frame {
        let current = match self.strings.get(key) {
            Some(value) => int_arg(value),
            None => Some(0),
        };
        match current.and_then(|n| n.checked_add(amount)) {
            Some(n) => {
                self.strings.insert(key.clone(), Bytes::from(n.to_string()));
                Frame::Integer(n)
            }
            None => not_an_integer(),
        }
    }

    fn remove(&mut self, key: &Bytes) -> bool {
        let string = self.strings.remove(key).is_some();
        let hash = self.hashes.remove(key).is_some();
        let list = self.lists.remove(key).is_some();
        string || hash || list
    }

    fn hash(&self, key: &Bytes) -> Option<&BTreeMap<Bytes, Bytes>> {
        self.hashes.get(key)
    }

    fn pop(&mut self, key: &Bytes, front: bool) -> Option<Bytes> {
        let list = self.lists.get_mut(key)?;
        let value = if front { list.pop_front() } else { list.pop_back() };
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }

    /// Pops without blocking; an empty list answers like an expired timeout.
    fn blocking_pop(&mut self, key: &Bytes, front: bool) -> Frame {
        match self.pop(key, front) {
            Some(value) => array([key.clone(), value]),
            None => Frame::Null,
        }
    }
}

const KNOWN: &[&str] = &[
    "PING", "FLUSHALL", "CLUSTER", "GET", "SET", "APPEND", "DEL", "INCR", "DECR", "INCRBY",
    "DECRBY", "HSET", "HSETNX", "HMSET", "HGET", "HMGET", "HDEL", "HEXISTS", "HLEN", "HKEYS",
    "HVALS", "HGETALL", "HINCRBY", "HINCRBYFLOAT", "LPUSH", "RPUSH", "LPUSHX", "RPUSHX", "LPOP",
    "RPOP", "BLPOP", "BRPOP", "RPOPLPUSH", "BRPOPLPUSH", "LLEN", "LINDEX", "LRANGE", "LSET",
    "LTRIM", "LREM", "LINSERT",
];

fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}
