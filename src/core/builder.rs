use std::time::Duration;

use crate::cluster::{ClusterClient, ConnectionPool};
use crate::{Error, Result};

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_QUEUE_SIZE: usize = 1024;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TOPOLOGY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every connection a [`ConnectionPool`] opens.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Password sent with `AUTH` on every new connection.
    pub password: Option<String>,
    /// Bound on TCP connection establishment.
    pub connection_timeout: Option<Duration>,
    /// Bound on the `CLUSTER NODES` query of a refresh.
    pub topology_timeout: Option<Duration>,
    /// Bound on pass-through commands.
    pub command_timeout: Option<Duration>,
    /// Maximum number of pending requests per connection.
    pub queue_size: usize,
    /// Report the key and slot of every routing miss.
    pub diagnostics: bool,
    /// Hash only the `{...}` section of keys that carry one.
    pub hash_tags: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            password: None,
            connection_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            topology_timeout: Some(DEFAULT_TOPOLOGY_TIMEOUT),
            command_timeout: None,
            queue_size: DEFAULT_QUEUE_SIZE,
            diagnostics: cfg!(debug_assertions),
            hash_tags: false,
        }
    }
}

/// Builder for configuring and creating a [`ClusterClient`].
///
/// # Example
///
/// ```no_run
/// use shardmux::core::builder::ClusterBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterBuilder::new()
///     .address("redis://10.0.0.5:7000")
///     .password("secret")
///     .build()
///     .await?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    address: Option<String>,
    config: PoolConfig,
}

impl ClusterBuilder {
    /// Creates a new [`ClusterBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the seed node address.
    ///
    /// # Arguments
    ///
    /// * `address` - `host:port` or `redis://host:port`; the port defaults to 6379
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the password every new connection authenticates with.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Sets the connection timeout. `None` waits indefinitely.
    #[inline]
    pub fn connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Sets the timeout of the topology query. `None` waits indefinitely.
    #[inline]
    pub fn topology_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.topology_timeout = timeout;
        self
    }

    /// Sets the timeout of pass-through commands. `None` waits indefinitely.
    #[inline]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Sets the maximum number of pending requests per connection.
    ///
    /// # Arguments
    ///
    /// * `size` - Maximum number of requests (default: 1024)
    #[inline]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size.max(1);
        self
    }

    /// Enables or disables logging of the key and slot of routing misses.
    #[inline]
    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.config.diagnostics = enabled;
        self
    }

    /// Enables or disables `{hash tag}` aware slot hashing.
    #[inline]
    pub fn hash_tags(mut self, enabled: bool) -> Self {
        self.config.hash_tags = enabled;
        self
    }

    /// Returns the configuration assembled so far.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connects to the seed node and builds a [`ClusterClient`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the address is missing or
    /// malformed, and an IO or timeout error if the seed is unreachable.
    pub async fn build(self) -> Result<ClusterClient> {
        Ok(ClusterClient::new(self.build_pool().await?))
    }

    /// Connects to the seed node and builds a bare [`ConnectionPool`].
    pub async fn build_pool(self) -> Result<ConnectionPool> {
        let address = self.address.ok_or_else(|| Error::InvalidArgument {
            message: "address is required".to_string(),
        })?;
        let (host, port) = parse_seed(&address)?;
        ConnectionPool::connect(&host, port, self.config).await
    }
}

/// Splits a seed address into host and port.
pub(crate) fn parse_seed(address: &str) -> Result<(String, u16)> {
    let with_scheme;
    let address = if address.contains("://") {
        address
    } else {
        with_scheme = format!("redis://{}", address);
        &with_scheme
    };

    let parsed = url::Url::parse(address).map_err(|_| Error::InvalidArgument {
        message: "invalid address format".to_string(),
    })?;

    if parsed.scheme() != "redis" {
        return Err(Error::InvalidArgument {
            message: "invalid scheme, expected redis://".to_string(),
        });
    }

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::InvalidArgument {
            message: "missing host in address".to_string(),
        })?;

    Ok((host.to_string(), parsed.port().unwrap_or(DEFAULT_PORT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert!(config.password.is_none());
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.topology_timeout, Some(Duration::from_secs(5)));
        assert!(config.command_timeout.is_none());
        assert_eq!(config.queue_size, 1024);
        assert_eq!(config.diagnostics, cfg!(debug_assertions));
        assert!(!config.hash_tags);
    }

    #[test]
    fn test_builder_chaining() {
        let builder = ClusterBuilder::new()
            .address("10.0.0.5:7000")
            .password("secret")
            .connection_timeout(Some(Duration::from_secs(1)))
            .topology_timeout(None)
            .command_timeout(Some(Duration::from_millis(250)))
            .queue_size(0)
            .diagnostics(true)
            .hash_tags(true);

        assert_eq!(builder.address, Some("10.0.0.5:7000".to_string()));
        let config = builder.config();
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(1)));
        assert!(config.topology_timeout.is_none());
        assert_eq!(config.command_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.queue_size, 1);
        assert!(config.diagnostics);
        assert!(config.hash_tags);
    }

    #[test]
    fn test_parse_seed_forms() {
        assert_eq!(
            parse_seed("10.0.0.5:7000").unwrap(),
            ("10.0.0.5".to_string(), 7000)
        );
        assert_eq!(
            parse_seed("redis://10.0.0.5:7001").unwrap(),
            ("10.0.0.5".to_string(), 7001)
        );
        assert_eq!(
            parse_seed("localhost").unwrap(),
            ("localhost".to_string(), 6379)
        );
    }

    #[test]
    fn test_parse_seed_rejects_other_schemes() {
        assert!(matches!(
            parse_seed("http://10.0.0.5:7000"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_seed("redis://:7000"),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_builder_build_without_address() {
        match ClusterBuilder::new().build().await {
            Err(Error::InvalidArgument { message }) => {
                assert_eq!(message, "address is required");
            }
            _ => panic!("Expected InvalidArgument error"),
        }
    }
}
