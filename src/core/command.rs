use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::cluster::errors::parse_server_error;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A command ready to be sent to a node.
///
/// Commands are built using the builder pattern and converted to frames
/// for transmission over the connection.
///
/// # Example
///
/// ```
/// use shardmux::core::command::{get, Cmd};
///
/// let cmd = Cmd::new("CLUSTER").arg("NODES");
/// let get_cmd = get("key");
/// # let _ = (cmd, get_cmd);
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument yielded by `args`.
    #[inline]
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns the command name as sent on the wire.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Write condition for SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Only set the key if it already exists (`XX`).
    IfExists,
    /// Only set the key if it does not exist yet (`NX`).
    IfNotExists,
}

/// Creates a PING command.
#[inline]
pub fn ping() -> Cmd {
    Cmd::new("PING")
}

/// Creates an AUTH command with password only.
#[inline]
pub fn auth(password: impl Into<Bytes>) -> Cmd {
    Cmd::new("AUTH").arg(password)
}

/// Creates a FLUSHALL command.
#[inline]
pub fn flushall() -> Cmd {
    Cmd::new("FLUSHALL")
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a SET command with an optional expiry and write condition.
pub fn set_with_options(
    key: impl Into<Bytes>,
    value: impl Into<Bytes>,
    expiry: Option<Duration>,
    condition: Option<SetCondition>,
) -> Cmd {
    let mut cmd = set(key, value);
    if let Some(expiry) = expiry {
        cmd = cmd.arg("EX").arg(expiry.as_secs().to_string());
    }
    match condition {
        Some(SetCondition::IfExists) => cmd.arg("XX"),
        Some(SetCondition::IfNotExists) => cmd.arg("NX"),
        None => cmd,
    }
}

/// Creates an APPEND command.
#[inline]
pub fn append(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("APPEND").arg(key).arg(value)
}

/// Creates a DEL command.
#[inline]
pub fn del(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DEL").arg(key)
}

/// Creates an INCR command.
#[inline]
pub fn incr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("INCR").arg(key)
}

/// Creates an INCRBY command.
#[inline]
pub fn incr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("INCRBY").arg(key).arg(amount.to_string())
}

/// Creates a DECR command.
#[inline]
pub fn decr(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("DECR").arg(key)
}

/// Creates a DECRBY command.
#[inline]
pub fn decr_by(key: impl Into<Bytes>, amount: i64) -> Cmd {
    Cmd::new("DECRBY").arg(key).arg(amount.to_string())
}

/// Creates an HDEL command.
#[inline]
pub fn hdel(key: impl Into<Bytes>, field: impl Into<Bytes>) -> Cmd {
    Cmd::new("HDEL").arg(key).arg(field)
}

/// Creates an HEXISTS command.
#[inline]
pub fn hexists(key: impl Into<Bytes>, field: impl Into<Bytes>) -> Cmd {
    Cmd::new("HEXISTS").arg(key).arg(field)
}

/// Creates an HGET command.
#[inline]
pub fn hget(key: impl Into<Bytes>, field: impl Into<Bytes>) -> Cmd {
    Cmd::new("HGET").arg(key).arg(field)
}

/// Creates an HGETALL command.
#[inline]
pub fn hgetall(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("HGETALL").arg(key)
}

/// Creates an HINCRBY command.
#[inline]
pub fn hincrby(key: impl Into<Bytes>, field: impl Into<Bytes>, increment: i64) -> Cmd {
    Cmd::new("HINCRBY")
        .arg(key)
        .arg(field)
        .arg(increment.to_string())
}

/// Creates an HINCRBYFLOAT command.
#[inline]
pub fn hincrbyfloat(key: impl Into<Bytes>, field: impl Into<Bytes>, increment: f64) -> Cmd {
    Cmd::new("HINCRBYFLOAT")
        .arg(key)
        .arg(field)
        .arg(increment.to_string())
}

/// Creates an HKEYS command.
#[inline]
pub fn hkeys(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("HKEYS").arg(key)
}

/// Creates an HLEN command.
#[inline]
pub fn hlen(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("HLEN").arg(key)
}

/// Creates an HMGET command.
pub fn hmget<F: Into<Bytes>>(key: impl Into<Bytes>, fields: impl IntoIterator<Item = F>) -> Cmd {
    Cmd::new("HMGET").arg(key).args(fields)
}

/// Creates an HMSET command.
pub fn hmset<F, V>(key: impl Into<Bytes>, pairs: impl IntoIterator<Item = (F, V)>) -> Cmd
where
    F: Into<Bytes>,
    V: Into<Bytes>,
{
    let mut cmd = Cmd::new("HMSET").arg(key);
    for (field, value) in pairs {
        cmd = cmd.arg(field).arg(value);
    }
    cmd
}

/// Creates an HSET command.
#[inline]
pub fn hset(key: impl Into<Bytes>, field: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("HSET").arg(key).arg(field).arg(value)
}

/// Creates an HSETNX command.
#[inline]
pub fn hsetnx(key: impl Into<Bytes>, field: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("HSETNX").arg(key).arg(field).arg(value)
}

/// Creates an HVALS command.
#[inline]
pub fn hvals(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("HVALS").arg(key)
}

/// Creates an LINDEX command.
#[inline]
pub fn lindex(key: impl Into<Bytes>, index: i64) -> Cmd {
    Cmd::new("LINDEX").arg(key).arg(index.to_string())
}

/// Creates an LINSERT command.
pub fn linsert(
    key: impl Into<Bytes>,
    before: bool,
    pivot: impl Into<Bytes>,
    value: impl Into<Bytes>,
) -> Cmd {
    Cmd::new("LINSERT")
        .arg(key)
        .arg(if before { "BEFORE" } else { "AFTER" })
        .arg(pivot)
        .arg(value)
}

/// Creates an LLEN command.
#[inline]
pub fn llen(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("LLEN").arg(key)
}

/// Creates an LPOP command.
#[inline]
pub fn lpop(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("LPOP").arg(key)
}

/// Creates an LPUSH command for one or more values.
pub fn lpush<V: Into<Bytes>>(key: impl Into<Bytes>, values: impl IntoIterator<Item = V>) -> Cmd {
    Cmd::new("LPUSH").arg(key).args(values)
}

/// Creates an LPUSHX command.
#[inline]
pub fn lpushx(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("LPUSHX").arg(key).arg(value)
}

/// Creates an LRANGE command.
#[inline]
pub fn lrange(key: impl Into<Bytes>, start: i64, stop: i64) -> Cmd {
    Cmd::new("LRANGE")
        .arg(key)
        .arg(start.to_string())
        .arg(stop.to_string())
}

/// Creates an LREM command.
#[inline]
pub fn lrem(key: impl Into<Bytes>, count: i64, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("LREM").arg(key).arg(count.to_string()).arg(value)
}

/// Creates an LSET command.
#[inline]
pub fn lset(key: impl Into<Bytes>, index: i64, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("LSET").arg(key).arg(index.to_string()).arg(value)
}

/// Creates an LTRIM command.
#[inline]
pub fn ltrim(key: impl Into<Bytes>, start: i64, stop: i64) -> Cmd {
    Cmd::new("LTRIM")
        .arg(key)
        .arg(start.to_string())
        .arg(stop.to_string())
}

/// Creates an RPOP command.
#[inline]
pub fn rpop(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("RPOP").arg(key)
}

/// Creates an RPOPLPUSH command.
#[inline]
pub fn rpoplpush(source: impl Into<Bytes>, destination: impl Into<Bytes>) -> Cmd {
    Cmd::new("RPOPLPUSH").arg(source).arg(destination)
}

/// Creates an RPUSH command for one or more values.
pub fn rpush<V: Into<Bytes>>(key: impl Into<Bytes>, values: impl IntoIterator<Item = V>) -> Cmd {
    Cmd::new("RPUSH").arg(key).args(values)
}

/// Creates an RPUSHX command.
#[inline]
pub fn rpushx(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("RPUSHX").arg(key).arg(value)
}

/// Creates a BLPOP command for a single key.
#[inline]
pub fn blpop(key: impl Into<Bytes>, timeout: Duration) -> Cmd {
    Cmd::new("BLPOP").arg(key).arg(timeout.as_secs().to_string())
}

/// Creates a BRPOP command for a single key.
#[inline]
pub fn brpop(key: impl Into<Bytes>, timeout: Duration) -> Cmd {
    Cmd::new("BRPOP").arg(key).arg(timeout.as_secs().to_string())
}

/// Creates a BRPOPLPUSH command.
#[inline]
pub fn brpoplpush(
    source: impl Into<Bytes>,
    destination: impl Into<Bytes>,
    timeout: Duration,
) -> Cmd {
    Cmd::new("BRPOPLPUSH")
        .arg(source)
        .arg(destination)
        .arg(timeout.as_secs().to_string())
}

/// Passes through any non-error frame, converting error replies.
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Ok(frame),
    }
}

/// Interprets a status reply: `OK` is true, a null reply (unmet SET
/// condition) is false.
#[inline]
pub fn frame_to_ok(frame: Frame) -> Result<bool> {
    match frame {
        Frame::SimpleString(s) => Ok(s.eq_ignore_ascii_case(b"OK")),
        Frame::BulkString(None) | Frame::Null => Ok(false),
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Err(unexpected("status")),
    }
}

/// Converts a frame to bytes.
#[inline]
pub fn frame_to_bytes(frame: Frame) -> Result<Option<Bytes>> {
    match frame {
        Frame::BulkString(b) => Ok(b),
        Frame::SimpleString(s) => Ok(Some(Bytes::from(s))),
        Frame::Null => Ok(None),
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Err(unexpected("bulk string")),
    }
}

/// Converts a frame to an integer.
#[inline]
pub fn frame_to_int(frame: Frame) -> Result<i64> {
    match frame {
        Frame::Integer(i) => Ok(i),
        Frame::BulkString(Some(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::Protocol {
                message: "invalid integer".to_string(),
            }),
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Err(unexpected("integer")),
    }
}

/// Converts an integer reply to a boolean (non-zero is true).
#[inline]
pub fn frame_to_bool(frame: Frame) -> Result<bool> {
    frame_to_int(frame).map(|n| n != 0)
}

/// Converts a frame to a float.
#[inline]
pub fn frame_to_float(frame: Frame) -> Result<f64> {
    match frame {
        Frame::BulkString(Some(b)) => String::from_utf8_lossy(&b)
            .parse::<f64>()
            .map_err(|_| Error::Protocol {
                message: "invalid float value".to_string(),
            }),
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Err(unexpected("bulk string")),
    }
}

/// Converts a frame array to a vector of optional bytes.
#[inline]
pub fn frame_to_vec_bytes(frame: Frame) -> Result<Vec<Option<Bytes>>> {
    match frame {
        Frame::Array(arr) => arr.into_iter().map(frame_to_bytes).collect(),
        Frame::Null | Frame::BulkString(None) => Ok(Vec::new()),
        Frame::Error(e) => Err(parse_server_error(&e)),
        _ => Err(unexpected("array")),
    }
}

/// Converts a frame array to a vector of strings; null elements become
/// empty strings.
#[inline]
pub fn frame_to_vec_string(frame: Frame) -> Result<Vec<String>> {
    Ok(frame_to_vec_bytes(frame)?
        .into_iter()
        .map(|b| b.map(|b| String::from_utf8_lossy(&b).into_owned()).unwrap_or_default())
        .collect())
}

/// Converts a flat field/value array (HGETALL reply) into a map.
pub fn frame_to_hashmap(frame: Frame) -> Result<HashMap<String, Bytes>> {
    let items = frame_to_vec_bytes(frame)?;
    if items.len() % 2 != 0 {
        return Err(Error::Protocol {
            message: "HGETALL response must have even number of elements".to_string(),
        });
    }

    let mut result = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = field
            .map(|f| String::from_utf8_lossy(&f).into_owned())
            .unwrap_or_default();
        result.insert(field, value.unwrap_or_default());
    }
    Ok(result)
}

fn unexpected(expected: &str) -> Error {
    Error::Protocol {
        message: format!("unexpected frame type, expected {}", expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(cmd: Cmd) -> Vec<String> {
        match cmd.into_frame() {
            Frame::Array(args) => args
                .into_iter()
                .map(|f| f.as_text().unwrap_or_default())
                .collect(),
            other => panic!("expected array frame, got {:?}", other),
        }
    }

    #[test]
    fn test_cmd_name() {
        let cmd = Cmd::new("HSET").arg("k").arg("f").arg("v");
        assert_eq!(cmd.name(), b"HSET");
    }

    #[test]
    fn test_set_with_options() {
        assert_eq!(
            words(set_with_options(
                "k",
                "v",
                Some(Duration::from_secs(30)),
                Some(SetCondition::IfNotExists)
            )),
            vec!["SET", "k", "v", "EX", "30", "NX"]
        );
        assert_eq!(
            words(set_with_options("k", "v", None, Some(SetCondition::IfExists))),
            vec!["SET", "k", "v", "XX"]
        );
        assert_eq!(words(set_with_options("k", "v", None, None)), vec!["SET", "k", "v"]);
    }

    #[test]
    fn test_variadic_list_push() {
        assert_eq!(
            words(lpush("list", ["a", "b", "c"])),
            vec!["LPUSH", "list", "a", "b", "c"]
        );
        assert_eq!(words(rpush("list", ["z"])), vec!["RPUSH", "list", "z"]);
    }

    #[test]
    fn test_hmset_pairs() {
        assert_eq!(
            words(hmset("h", [("f1", "v1"), ("f2", "v2")])),
            vec!["HMSET", "h", "f1", "v1", "f2", "v2"]
        );
    }

    #[test]
    fn test_linsert_direction() {
        assert_eq!(
            words(linsert("l", true, "p", "v")),
            vec!["LINSERT", "l", "BEFORE", "p", "v"]
        );
        assert_eq!(
            words(linsert("l", false, "p", "v")),
            vec!["LINSERT", "l", "AFTER", "p", "v"]
        );
    }

    #[test]
    fn test_blocking_pops_use_whole_seconds() {
        assert_eq!(
            words(brpoplpush("src", "dst", Duration::from_millis(2500))),
            vec!["BRPOPLPUSH", "src", "dst", "2"]
        );
        assert_eq!(
            words(blpop("q", Duration::from_secs(1))),
            vec!["BLPOP", "q", "1"]
        );
    }

    #[test]
    fn test_frame_to_ok() {
        assert!(frame_to_ok(Frame::SimpleString(b"OK".to_vec())).unwrap());
        assert!(!frame_to_ok(Frame::BulkString(None)).unwrap());
        assert!(frame_to_ok(Frame::Error(b"ERR wrong".to_vec())).is_err());
    }

    #[test]
    fn test_frame_to_int_from_bulk() {
        assert_eq!(
            frame_to_int(Frame::BulkString(Some(Bytes::from("17")))).unwrap(),
            17
        );
        assert!(frame_to_int(Frame::BulkString(Some(Bytes::from("x")))).is_err());
    }

    #[test]
    fn test_frame_to_vec_string_nulls() {
        let frame = Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from("a"))),
            Frame::BulkString(None),
        ]);
        assert_eq!(
            frame_to_vec_string(frame).unwrap(),
            vec!["a".to_string(), String::new()]
        );
    }

    #[test]
    fn test_frame_to_hashmap() {
        let frame = Frame::Array(vec![
            Frame::BulkString(Some(Bytes::from("f1"))),
            Frame::BulkString(Some(Bytes::from("v1"))),
            Frame::BulkString(Some(Bytes::from("f2"))),
            Frame::BulkString(Some(Bytes::from("v2"))),
        ]);
        let map = frame_to_hashmap(frame).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["f1"], Bytes::from("v1"));

        let odd = Frame::Array(vec![Frame::BulkString(Some(Bytes::from("f1")))]);
        assert!(frame_to_hashmap(odd).is_err());
    }

    #[test]
    fn test_frame_to_float() {
        let value = frame_to_float(Frame::BulkString(Some(Bytes::from("10.5")))).unwrap();
        assert!((value - 10.5).abs() < f64::EPSILON);
    }
}
