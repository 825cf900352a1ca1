//! Connections handed out by the pool.
//!
//! A [`NodeConnection`] is a cheap-to-clone handle on one node's multiplexed
//! socket. It forwards commands verbatim and converts replies; routing and
//! argument validation happen in the layers above.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::cluster::address::AddressKey;
use crate::cluster::errors::parse_server_error;
use crate::core::command::{self, Cmd, SetCondition};
use crate::core::connection::with_timeout;
use crate::core::multiplexed::MultiplexedConnection;
use crate::proto::frame::Frame;
use crate::{Error, Result};

struct Inner {
    key: AddressKey,
    host: String,
    port: u16,
    connection: MultiplexedConnection,
    command_timeout: Option<Duration>,
}

/// Handle on the connection to one cluster node.
///
/// Clones share the socket. Two handles compare equal only if they share
/// the same socket, so a replaced connection never equals its predecessor.
#[derive(Clone)]
pub struct NodeConnection {
    inner: Arc<Inner>,
}

impl NodeConnection {
    /// Wraps an established connection to `host:port`.
    pub fn new(
        key: AddressKey,
        host: impl Into<String>,
        port: u16,
        connection: MultiplexedConnection,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                key,
                host: host.into(),
                port,
                connection,
                command_timeout,
            }),
        }
    }

    /// Returns the address key.
    pub fn key(&self) -> AddressKey {
        self.inner.key
    }

    /// Returns the IPv4 address of the node.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Returns the port of the node.
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Returns true once the socket is closed or failed.
    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    /// Sends a command and returns the raw reply, error replies included.
    pub async fn send(&self, cmd: Cmd) -> Result<Frame> {
        self.send_with_timeout(cmd, self.inner.command_timeout).await
    }

    pub(crate) async fn send_with_timeout(
        &self,
        cmd: Cmd,
        limit: Option<Duration>,
    ) -> Result<Frame> {
        let connection = &self.inner.connection;
        with_timeout(limit, "command", connection.send_command(cmd.into_frame())).await
    }

    /// Sends `name` with `args` and returns the reply, turning error
    /// replies into errors.
    pub async fn send_raw_command<I, T>(&self, name: &str, args: I) -> Result<Frame>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let cmd = Cmd::new(name.to_string()).args(args);
        command::parse_frame_response(self.send(cmd).await?)
    }

    /// Authenticates the connection.
    ///
    /// Returns `Ok(false)` if the node rejected the password.
    pub async fn authenticate(&self, password: &str) -> Result<bool> {
        match self.send(command::auth(password.to_string())).await? {
            Frame::Error(e) => match parse_server_error(&e) {
                Error::Auth | Error::Server { .. } => Ok(false),
                other => Err(other),
            },
            _ => Ok(true),
        }
    }

    /// Closes the socket. Commands in flight still receive their replies.
    pub async fn close(&self) {
        self.inner.connection.close().await;
    }

    /// Sends PING.
    pub async fn ping(&self) -> Result<bool> {
        let frame = command::parse_frame_response(self.send(command::ping()).await?)?;
        Ok(frame.as_text().is_some_and(|s| s == "PONG"))
    }

    /// Removes every key on the node.
    pub async fn flush_all(&self) -> Result<bool> {
        command::frame_to_ok(self.send(command::flushall()).await?)
    }

    /// GET.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.send(command::get(key.to_string())).await?)
    }

    /// SET.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<bool> {
        command::frame_to_ok(self.send(command::set(key.to_string(), value)).await?)
    }

    /// SET with optional `EX` and `NX`/`XX`; false if the condition failed.
    pub async fn set_with_options(
        &self,
        key: &str,
        value: Bytes,
        expiry: Option<Duration>,
        condition: Option<SetCondition>,
    ) -> Result<bool> {
        let cmd = command::set_with_options(key.to_string(), value, expiry, condition);
        command::frame_to_ok(self.send(cmd).await?)
    }

    /// APPEND; returns the new length.
    pub async fn append(&self, key: &str, value: Bytes) -> Result<i64> {
        command::frame_to_int(self.send(command::append(key.to_string(), value)).await?)
    }

    /// DEL; true if the key existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        command::frame_to_bool(self.send(command::del(key.to_string())).await?)
    }

    /// INCR.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::incr(key.to_string())).await?)
    }

    /// INCRBY.
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        command::frame_to_int(self.send(command::incr_by(key.to_string(), amount)).await?)
    }

    /// DECR.
    pub async fn decr(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::decr(key.to_string())).await?)
    }

    /// DECRBY.
    pub async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        command::frame_to_int(self.send(command::decr_by(key.to_string(), amount)).await?)
    }

    /// HDEL; true if the field existed.
    pub async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let cmd = command::hdel(key.to_string(), field.to_string());
        command::frame_to_bool(self.send(cmd).await?)
    }

    /// HEXISTS.
    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let cmd = command::hexists(key.to_string(), field.to_string());
        command::frame_to_bool(self.send(cmd).await?)
    }

    /// HGET.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let cmd = command::hget(key.to_string(), field.to_string());
        command::frame_to_bytes(self.send(cmd).await?)
    }

    /// HGETALL.
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        command::frame_to_hashmap(self.send(command::hgetall(key.to_string())).await?)
    }

    /// HINCRBY.
    pub async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64> {
        let cmd = command::hincrby(key.to_string(), field.to_string(), increment);
        command::frame_to_int(self.send(cmd).await?)
    }

    /// HINCRBYFLOAT.
    pub async fn hincrbyfloat(&self, key: &str, field: &str, increment: f64) -> Result<f64> {
        let cmd = command::hincrbyfloat(key.to_string(), field.to_string(), increment);
        command::frame_to_float(self.send(cmd).await?)
    }

    /// HKEYS.
    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        command::frame_to_vec_string(self.send(command::hkeys(key.to_string())).await?)
    }

    /// HLEN.
    pub async fn hlen(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::hlen(key.to_string())).await?)
    }

    /// HMGET; missing fields are `None`.
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Bytes>>> {
        let fields = fields.iter().map(|f| f.to_string());
        command::frame_to_vec_bytes(self.send(command::hmget(key.to_string(), fields)).await?)
    }

    /// HMSET.
    pub async fn hmset(&self, key: &str, pairs: &[(&str, Bytes)]) -> Result<bool> {
        let pairs = pairs.iter().map(|(f, v)| (f.to_string(), v.clone()));
        command::frame_to_ok(self.send(command::hmset(key.to_string(), pairs)).await?)
    }

    /// HSET; true if the field is new.
    pub async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        let cmd = command::hset(key.to_string(), field.to_string(), value);
        command::frame_to_bool(self.send(cmd).await?)
    }

    /// HSETNX; true if the field was set.
    pub async fn hsetnx(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        let cmd = command::hsetnx(key.to_string(), field.to_string(), value);
        command::frame_to_bool(self.send(cmd).await?)
    }

    /// HVALS.
    pub async fn hvals(&self, key: &str) -> Result<Vec<Bytes>> {
        values(self.send(command::hvals(key.to_string())).await?)
    }

    /// LINDEX.
    pub async fn lindex(&self, key: &str, index: i64) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.send(command::lindex(key.to_string(), index)).await?)
    }

    /// LINSERT; returns the new length, or -1 if `pivot` was not found.
    pub async fn linsert(
        &self,
        key: &str,
        before: bool,
        pivot: Bytes,
        value: Bytes,
    ) -> Result<i64> {
        let cmd = command::linsert(key.to_string(), before, pivot, value);
        command::frame_to_int(self.send(cmd).await?)
    }

    /// LLEN.
    pub async fn llen(&self, key: &str) -> Result<i64> {
        command::frame_to_int(self.send(command::llen(key.to_string())).await?)
    }

    /// LPOP.
    pub async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.send(command::lpop(key.to_string())).await?)
    }

    /// LPUSH; returns the new length.
    pub async fn lpush(&self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        command::frame_to_int(self.send(command::lpush(key.to_string(), values)).await?)
    }

    /// LPUSHX; returns the new length, 0 if the list did not exist.
    pub async fn lpushx(&self, key: &str, value: Bytes) -> Result<i64> {
        command::frame_to_int(self.send(command::lpushx(key.to_string(), value)).await?)
    }

    /// LRANGE.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        values(self.send(command::lrange(key.to_string(), start, stop)).await?)
    }

    /// LREM; returns the number of removed elements.
    pub async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<i64> {
        command::frame_to_int(self.send(command::lrem(key.to_string(), count, value)).await?)
    }

    /// LSET.
    pub async fn lset(&self, key: &str, index: i64, value: Bytes) -> Result<bool> {
        command::frame_to_ok(self.send(command::lset(key.to_string(), index, value)).await?)
    }

    /// LTRIM.
    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<bool> {
        command::frame_to_ok(self.send(command::ltrim(key.to_string(), start, stop)).await?)
    }

    /// RPOP.
    pub async fn rpop(&self, key: &str) -> Result<Option<Bytes>> {
        command::frame_to_bytes(self.send(command::rpop(key.to_string())).await?)
    }

    /// RPOPLPUSH.
    pub async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<Bytes>> {
        let cmd = command::rpoplpush(source.to_string(), destination.to_string());
        command::frame_to_bytes(self.send(cmd).await?)
    }

    /// RPUSH; returns the new length.
    pub async fn rpush(&self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        command::frame_to_int(self.send(command::rpush(key.to_string(), values)).await?)
    }

    /// RPUSHX; returns the new length, 0 if the list did not exist.
    pub async fn rpushx(&self, key: &str, value: Bytes) -> Result<i64> {
        command::frame_to_int(self.send(command::rpushx(key.to_string(), value)).await?)
    }

    /// BLPOP on one key; `None` when the timeout expires.
    ///
    /// The command timeout is extended by the blocking timeout.
    pub async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let cmd = command::blpop(key.to_string(), timeout);
        popped(self.send_with_timeout(cmd, self.blocking_limit(timeout)).await?)
    }

    /// BRPOP on one key; `None` when the timeout expires.
    pub async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let cmd = command::brpop(key.to_string(), timeout);
        popped(self.send_with_timeout(cmd, self.blocking_limit(timeout)).await?)
    }

    /// BRPOPLPUSH; `None` when the timeout expires.
    pub async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        let cmd = command::brpoplpush(source.to_string(), destination.to_string(), timeout);
        let frame = self
            .send_with_timeout(cmd, self.blocking_limit(timeout))
            .await?;
        command::frame_to_bytes(frame)
    }

    fn blocking_limit(&self, timeout: Duration) -> Option<Duration> {
        self.inner.command_timeout.map(|limit| limit + timeout)
    }
}

/// Flattens an array reply, dropping nulls.
fn values(frame: Frame) -> Result<Vec<Bytes>> {
    Ok(command::frame_to_vec_bytes(frame)?
        .into_iter()
        .flatten()
        .collect())
}

/// Extracts the value from a `[key, value]` blocking pop reply.
fn popped(frame: Frame) -> Result<Option<Bytes>> {
    let mut items = command::frame_to_vec_bytes(frame)?;
    if items.len() < 2 {
        return Ok(None);
    }
    Ok(items.swap_remove(1))
}

impl PartialEq for NodeConnection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for NodeConnection {}

impl fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConnection")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for NodeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.host, self.inner.port)
    }
}
