//! Server configuration.
//!
//! Defaults can be overridden from an optional TOML file:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9000
//! outbound_capacity = 512
//!
//! [file]
//! max_file_size = 104857600
//! poll_interval_ms = 250
//!
//! [pod]
//! snapshot_timeout_ms = 2000
//!
//! [websocket]
//! pong_timeout_ms = 30000
//! ping_interval_ms = 27000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use weblogview_logs::{FileTailerConfig, PodTailerConfig};

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// WebSocket keepalive and framing limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Time allowed to write one frame to the peer
    pub write_timeout: Duration,
    /// Time allowed between frames from the peer before it is considered dead
    pub pong_timeout: Duration,
    /// Ping period, must be below `pong_timeout`
    pub ping_interval: Duration,
    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        let pong_timeout = Duration::from_secs(60);
        Self {
            write_timeout: Duration::from_secs(10),
            pong_timeout,
            ping_interval: pong_timeout * 9 / 10,
            max_message_size: 8192,
        }
    }
}

/// Configuration for the weblogview server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Snapshot size used when neither the client nor the settings give one
    pub default_tail_lines: usize,
    /// Upper bound on any requested snapshot size
    pub max_tail_lines: usize,
    /// Outbound messages buffered per connection before new ones are dropped
    pub outbound_capacity: usize,
    /// Directory with the browser UI, served for any non-API path
    pub static_dir: Option<PathBuf>,
    pub file: FileTailerConfig,
    pub pod: PodTailerConfig,
    pub keepalive: KeepaliveConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            default_tail_lines: 1000,
            max_tail_lines: 100_000,
            outbound_capacity: 256,
            static_dir: None,
            file: FileTailerConfig::default(),
            pod: PodTailerConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults overridden by the TOML file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML overrides on top of the defaults
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(Self::default().apply(file))
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_file_config(mut self, file: FileTailerConfig) -> Self {
        self.file = file;
        self
    }

    #[must_use]
    pub fn with_pod_config(mut self, pod: PodTailerConfig) -> Self {
        self.pod = pod;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// `host:port` for binding and for the browser URL
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let keepalive = &self.keepalive;
        if keepalive.ping_interval.is_zero() || keepalive.ping_interval >= keepalive.pong_timeout {
            return Err(ConfigError::Invalid(format!(
                "ping interval ({:?}) must be non-zero and below the pong timeout ({:?})",
                keepalive.ping_interval, keepalive.pong_timeout
            )));
        }
        if keepalive.write_timeout.is_zero() {
            return Err(ConfigError::Invalid("write timeout must be non-zero".into()));
        }
        if keepalive.max_message_size == 0 {
            return Err(ConfigError::Invalid("max message size must be non-zero".into()));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Invalid("outbound capacity must be non-zero".into()));
        }
        if self.default_tail_lines == 0 || self.default_tail_lines > self.max_tail_lines {
            return Err(ConfigError::Invalid(format!(
                "default tail lines ({}) must be between 1 and {}",
                self.default_tail_lines, self.max_tail_lines
            )));
        }
        if self.file.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("file poll interval must be non-zero".into()));
        }
        if self.file.read_buffer_size == 0 || self.file.batch_lines == 0 {
            return Err(ConfigError::Invalid(
                "file read buffer and batch size must be non-zero".into(),
            ));
        }
        if self.file.max_line_length == 0 {
            return Err(ConfigError::Invalid("max line length must be non-zero".into()));
        }
        Ok(())
    }

    fn apply(mut self, file: ConfigFile) -> Self {
        let ConfigFile {
            server,
            file: tail,
            pod,
            websocket,
        } = file;

        if let Some(host) = server.host {
            self.host = host;
        }
        set(&mut self.port, server.port);
        set(&mut self.default_tail_lines, server.default_tail_lines);
        set(&mut self.max_tail_lines, server.max_tail_lines);
        set(&mut self.outbound_capacity, server.outbound_capacity);
        if server.static_dir.is_some() {
            self.static_dir = server.static_dir;
        }

        set(&mut self.file.max_file_size, tail.max_file_size);
        set(&mut self.file.max_line_length, tail.max_line_length);
        set(&mut self.file.read_buffer_size, tail.read_buffer_size);
        set(&mut self.file.batch_lines, tail.batch_lines);
        set(&mut self.file.poll_interval, tail.poll_interval_ms.map(Duration::from_millis));

        set(
            &mut self.pod.snapshot_timeout,
            pod.snapshot_timeout_ms.map(Duration::from_millis),
        );

        set(
            &mut self.keepalive.write_timeout,
            websocket.write_timeout_ms.map(Duration::from_millis),
        );
        set(
            &mut self.keepalive.pong_timeout,
            websocket.pong_timeout_ms.map(Duration::from_millis),
        );
        match websocket.ping_interval_ms {
            Some(ms) => self.keepalive.ping_interval = Duration::from_millis(ms),
            // Keep the ping period tied to a changed deadline
            None if websocket.pong_timeout_ms.is_some() => {
                self.keepalive.ping_interval = self.keepalive.pong_timeout * 9 / 10;
            }
            None => {}
        }
        set(&mut self.keepalive.max_message_size, websocket.max_message_size);

        self
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

// ============================================================================
// TOML layout
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    server: ServerSection,
    file: FileSection,
    pod: PodSection,
    websocket: WebSocketSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    default_tail_lines: Option<usize>,
    max_tail_lines: Option<usize>,
    outbound_capacity: Option<usize>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSection {
    max_file_size: Option<u64>,
    max_line_length: Option<usize>,
    poll_interval_ms: Option<u64>,
    read_buffer_size: Option<usize>,
    batch_lines: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PodSection {
    snapshot_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WebSocketSection {
    write_timeout_ms: Option<u64>,
    pong_timeout_ms: Option<u64>,
    ping_interval_ms: Option<u64>,
    max_message_size: Option<usize>,
}
