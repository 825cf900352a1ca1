//! Pass-through command layer on top of the pool.
//!
//! Every command validates its arguments, resolves the owning connection
//! and forwards verbatim. Redirections are not followed; a stale routing
//! table shows up as a server error until the next refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::cluster::connection::NodeConnection;
use crate::cluster::pool::{ConnectionPool, RefreshOutcome};
use crate::cluster::slot::hash_slot;
use crate::core::builder::ClusterBuilder;
use crate::core::command::SetCondition;
use crate::{Error, Result};

/// Values must be strictly smaller than this (1 GiB).
pub const MAX_VALUE_LEN: usize = 1 << 30;

/// Cluster client routing each command to the node owning its key.
///
/// Cloning is cheap; clones share the pool.
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use shardmux::ClusterClient;
///
/// # async fn example() -> shardmux::Result<()> {
/// let client = ClusterClient::connect("redis://10.0.0.5:7000").await?;
/// client.set("user:1000", Bytes::from("alice")).await?;
/// let name = client.get("user:1000").await?;
/// # let _ = name;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClusterClient {
    pool: Arc<ConnectionPool>,
}

impl ClusterClient {
    /// Wraps an existing pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connects through a seed address with default settings.
    ///
    /// Use [`ClusterBuilder`] for passwords and timeouts.
    pub async fn connect(address: &str) -> Result<Self> {
        ClusterBuilder::new().address(address).build().await
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Reloads the topology.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.pool.refresh().await
    }

    /// Closes every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Sends FLUSHALL to every slot owner; true if all acknowledged.
    pub async fn flush_all(&self) -> bool {
        self.pool.flush_all().await
    }

    async fn route(&self, key: &str) -> Result<NodeConnection> {
        check_key(key)?;
        self.pool.resolve(key).await.ok_or_else(|| Error::SlotNotCovered {
            slot: hash_slot(key.as_bytes(), self.pool.config().hash_tags),
        })
    }

    async fn route_pair(&self, first: &str, second: &str) -> Result<NodeConnection> {
        check_key(first)?;
        check_key(second)?;
        if let Some(conn) = self.pool.resolve_all(&[first, second]).await {
            return Ok(conn);
        }

        // Tell a missing owner apart from keys on different nodes.
        self.route(first).await?;
        self.route(second).await?;
        Err(Error::CrossSlot {
            first: first.to_string(),
            second: second.to_string(),
        })
    }

    /// Hands the result back, reporting connection failures to the pool.
    async fn observe<T>(&self, conn: &NodeConnection, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_failure() {
                debug!(node = %conn, error = %e, "command failed on connection");
                self.pool.mark_disconnected(conn).await;
            }
        }
        result
    }

    // Strings

    /// GET.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.get(key).await;
        self.observe(&conn, result).await
    }

    /// SET.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<bool> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.set(key, value).await;
        self.observe(&conn, result).await
    }

    /// SET with an expiry.
    pub async fn set_with_expiry(&self, key: &str, value: Bytes, expiry: Duration) -> Result<bool> {
        self.set_conditional(key, value, Some(expiry), None).await
    }

    /// SET XX; false if the key did not exist.
    pub async fn set_if_exists(
        &self,
        key: &str,
        value: Bytes,
        expiry: Option<Duration>,
    ) -> Result<bool> {
        self.set_conditional(key, value, expiry, Some(SetCondition::IfExists))
            .await
    }

    /// SET NX; false if the key already existed.
    pub async fn set_if_not_exists(
        &self,
        key: &str,
        value: Bytes,
        expiry: Option<Duration>,
    ) -> Result<bool> {
        self.set_conditional(key, value, expiry, Some(SetCondition::IfNotExists))
            .await
    }

    async fn set_conditional(
        &self,
        key: &str,
        value: Bytes,
        expiry: Option<Duration>,
        condition: Option<SetCondition>,
    ) -> Result<bool> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.set_with_options(key, value, expiry, condition).await;
        self.observe(&conn, result).await
    }

    /// Sets several keys, each on its own node. True if every SET succeeded.
    ///
    /// Arguments are validated before anything is sent.
    pub async fn set_all(&self, pairs: &[(&str, Bytes)]) -> Result<bool> {
        for (key, value) in pairs {
            check_key(key)?;
            check_value(value)?;
        }

        let mut all = true;
        for (key, value) in pairs {
            all &= self.set(key, value.clone()).await?;
        }
        Ok(all)
    }

    /// APPEND; returns the new length.
    pub async fn append(&self, key: &str, value: Bytes) -> Result<i64> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.append(key, value).await;
        self.observe(&conn, result).await
    }

    /// DEL; true if the key existed.
    pub async fn del(&self, key: &str) -> Result<bool> {
        let conn = self.route(key).await?;
        let result = conn.del(key).await;
        self.observe(&conn, result).await
    }

    // Counters

    /// INCR.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.incr(key).await;
        self.observe(&conn, result).await
    }

    /// INCRBY.
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.incr_by(key, amount).await;
        self.observe(&conn, result).await
    }

    /// DECR.
    pub async fn decr(&self, key: &str) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.decr(key).await;
        self.observe(&conn, result).await
    }

    /// DECRBY.
    pub async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.decr_by(key, amount).await;
        self.observe(&conn, result).await
    }

    // Hashes

    /// HDEL.
    pub async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        check_field(field)?;
        let conn = self.route(key).await?;
        let result = conn.hdel(key, field).await;
        self.observe(&conn, result).await
    }

    /// HEXISTS.
    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        check_field(field)?;
        let conn = self.route(key).await?;
        let result = conn.hexists(key, field).await;
        self.observe(&conn, result).await
    }

    /// HGET.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        check_field(field)?;
        let conn = self.route(key).await?;
        let result = conn.hget(key, field).await;
        self.observe(&conn, result).await
    }

    /// HGETALL.
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.hgetall(key).await;
        self.observe(&conn, result).await
    }

    /// HINCRBY.
    pub async fn hincrby(&self, key: &str, field: &str, increment: i64) -> Result<i64> {
        check_field(field)?;
        let conn = self.route(key).await?;
        let result = conn.hincrby(key, field, increment).await;
        self.observe(&conn, result).await
    }

    /// HINCRBYFLOAT.
    pub async fn hincrbyfloat(&self, key: &str, field: &str, increment: f64) -> Result<f64> {
        check_field(field)?;
        let conn = self.route(key).await?;
        let result = conn.hincrbyfloat(key, field, increment).await;
        self.observe(&conn, result).await
    }

    /// HKEYS.
    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.route(key).await?;
        let result = conn.hkeys(key).await;
        self.observe(&conn, result).await
    }

    /// HLEN.
    pub async fn hlen(&self, key: &str) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.hlen(key).await;
        self.observe(&conn, result).await
    }

    /// HMGET.
    pub async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<Bytes>>> {
        non_empty(fields.len(), "fields")?;
        for field in fields {
            check_field(field)?;
        }
        let conn = self.route(key).await?;
        let result = conn.hmget(key, fields).await;
        self.observe(&conn, result).await
    }

    /// HMSET.
    pub async fn hmset(&self, key: &str, pairs: &[(&str, Bytes)]) -> Result<bool> {
        non_empty(pairs.len(), "field/value pairs")?;
        for (field, value) in pairs {
            check_field(field)?;
            check_value(value)?;
        }
        let conn = self.route(key).await?;
        let result = conn.hmset(key, pairs).await;
        self.observe(&conn, result).await
    }

    /// HSET; true if the field is new.
    pub async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        check_field(field)?;
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.hset(key, field, value).await;
        self.observe(&conn, result).await
    }

    /// HSETNX; true if the field was set.
    pub async fn hsetnx(&self, key: &str, field: &str, value: Bytes) -> Result<bool> {
        check_field(field)?;
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.hsetnx(key, field, value).await;
        self.observe(&conn, result).await
    }

    /// HVALS.
    pub async fn hvals(&self, key: &str) -> Result<Vec<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.hvals(key).await;
        self.observe(&conn, result).await
    }

    // Lists

    /// LINDEX.
    pub async fn lindex(&self, key: &str, index: i64) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.lindex(key, index).await;
        self.observe(&conn, result).await
    }

    /// LINSERT BEFORE/AFTER `pivot`.
    pub async fn linsert(
        &self,
        key: &str,
        before: bool,
        pivot: Bytes,
        value: Bytes,
    ) -> Result<i64> {
        check_value(&pivot)?;
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.linsert(key, before, pivot, value).await;
        self.observe(&conn, result).await
    }

    /// LLEN.
    pub async fn llen(&self, key: &str) -> Result<i64> {
        let conn = self.route(key).await?;
        let result = conn.llen(key).await;
        self.observe(&conn, result).await
    }

    /// LPOP.
    pub async fn lpop(&self, key: &str) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.lpop(key).await;
        self.observe(&conn, result).await
    }

    /// LPUSH one value.
    pub async fn lpush(&self, key: &str, value: Bytes) -> Result<i64> {
        self.lpush_many(key, vec![value]).await
    }

    /// LPUSH several values.
    pub async fn lpush_many(&self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        check_values(&values)?;
        let conn = self.route(key).await?;
        let result = conn.lpush(key, values).await;
        self.observe(&conn, result).await
    }

    /// LPUSHX.
    pub async fn lpushx(&self, key: &str, value: Bytes) -> Result<i64> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.lpushx(key, value).await;
        self.observe(&conn, result).await
    }

    /// LRANGE.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.lrange(key, start, stop).await;
        self.observe(&conn, result).await
    }

    /// LREM.
    pub async fn lrem(&self, key: &str, count: i64, value: Bytes) -> Result<i64> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.lrem(key, count, value).await;
        self.observe(&conn, result).await
    }

    /// LSET.
    pub async fn lset(&self, key: &str, index: i64, value: Bytes) -> Result<bool> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.lset(key, index, value).await;
        self.observe(&conn, result).await
    }

    /// LTRIM.
    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<bool> {
        let conn = self.route(key).await?;
        let result = conn.ltrim(key, start, stop).await;
        self.observe(&conn, result).await
    }

    /// RPOP.
    pub async fn rpop(&self, key: &str) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.rpop(key).await;
        self.observe(&conn, result).await
    }

    /// RPOPLPUSH; both keys must live on the same node.
    pub async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<Bytes>> {
        let conn = self.route_pair(source, destination).await?;
        let result = conn.rpoplpush(source, destination).await;
        self.observe(&conn, result).await
    }

    /// RPUSH one value.
    pub async fn rpush(&self, key: &str, value: Bytes) -> Result<i64> {
        self.rpush_many(key, vec![value]).await
    }

    /// RPUSH several values.
    pub async fn rpush_many(&self, key: &str, values: Vec<Bytes>) -> Result<i64> {
        check_values(&values)?;
        let conn = self.route(key).await?;
        let result = conn.rpush(key, values).await;
        self.observe(&conn, result).await
    }

    /// RPUSHX.
    pub async fn rpushx(&self, key: &str, value: Bytes) -> Result<i64> {
        check_value(&value)?;
        let conn = self.route(key).await?;
        let result = conn.rpushx(key, value).await;
        self.observe(&conn, result).await
    }

    /// BLPOP; `None` if nothing arrived within `timeout`.
    pub async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.blpop(key, timeout).await;
        self.observe(&conn, result).await
    }

    /// BRPOP; `None` if nothing arrived within `timeout`.
    pub async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let conn = self.route(key).await?;
        let result = conn.brpop(key, timeout).await;
        self.observe(&conn, result).await
    }

    /// BRPOPLPUSH; both keys must live on the same node.
    pub async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<Bytes>> {
        let conn = self.route_pair(source, destination).await?;
        let result = conn.brpoplpush(source, destination, timeout).await;
        self.observe(&conn, result).await
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(invalid("key must not be empty"));
    }
    Ok(())
}

fn check_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(invalid("field must not be empty"));
    }
    Ok(())
}

fn check_value(value: &Bytes) -> Result<()> {
    if value.is_empty() {
        return Err(invalid("value must not be empty"));
    }
    if value.len() >= MAX_VALUE_LEN {
        return Err(invalid("value must be smaller than 1 GiB"));
    }
    Ok(())
}

fn check_values(values: &[Bytes]) -> Result<()> {
    non_empty(values.len(), "values")?;
    values.iter().try_for_each(check_value)
}

fn non_empty(len: usize, what: &str) -> Result<()> {
    if len == 0 {
        return Err(Error::InvalidArgument {
            message: format!("{} must not be empty", what),
        });
    }
    Ok(())
}

fn invalid(message: &str) -> Error {
    Error::InvalidArgument {
        message: message.to_string(),
    }
}
