//! Connection configuration and builder.

use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;

/// Default time allowed for the TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Tunables for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Frames declaring more bytes than this are rejected and skipped.
    pub max_frame_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// User name and password for `chap-sha1` authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Where to connect and as whom.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

/// Builder for opening a [`Connection`].
///
/// ```ignore
/// use tarantool_driver::Connection;
///
/// let conn = Connection::builder("127.0.0.1", 3301)
///     .credentials("admin", "secret")
///     .connect_timeout(std::time::Duration::from_secs(1))
///     .connect()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    options: ConnectionOptions,
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            options: ConnectionOptions {
                host: host.into(),
                port,
                credentials: None,
            },
            config: ConnectionConfig::default(),
        }
    }

    /// Authenticate with these credentials right after the greeting.
    pub fn credentials(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.options.credentials = Some(Credentials {
            user_name: user_name.into(),
            password: password.into(),
        });
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.config.max_frame_size = max_frame_size;
        self
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the connection and, if credentials were given, authenticate.
    pub async fn connect(self) -> Result<Connection> {
        let connection = Connection::with_config(self.config);
        connection
            .open(&self.options.host, self.options.port)
            .await?;
        if let Some(credentials) = &self.options.credentials {
            connection
                .authenticate(&credentials.user_name, &credentials.password)
                .await?;
        }
        Ok(connection)
    }
}
