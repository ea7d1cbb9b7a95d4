//! Configuration system for the client-side connection core.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/shellcore/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The signaling URL does not start with `ws://` or `wss://`.
    #[error("signaling_url must start with ws:// or wss://, got {0:?}")]
    InvalidSignalingUrl(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    transport: TransportFileConfig,
    files: FilesFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    signaling_url: Option<String>,
    ice_servers: Option<Vec<String>>,
    connect_timeout_secs: Option<u64>,
    register_timeout_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[transport]` section of the config file: watermarks and chunking.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TransportFileConfig {
    chunk_size: Option<u32>,
    high_watermark: Option<u64>,
    low_watermark: Option<u64>,
}

/// `[files]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct FilesFileConfig {
    show_hidden_default: Option<bool>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration (spec 3.6).
#[derive(Debug, Clone)]
pub struct ShellCoreConfig {
    /// Signaling relay WebSocket URL (`ws://` or `wss://`).
    pub signaling_url: String,
    /// STUN/TURN server URLs handed to the transport backend.
    pub ice_servers: Vec<String>,
    /// Timeout for connecting to the signaling relay.
    pub connect_timeout: Duration,
    /// Timeout for relay join acknowledgment.
    pub register_timeout: Duration,
    /// Maximum reconnect attempts before signaling degrades to disconnected.
    pub max_reconnect_attempts: u32,
    /// Initial backoff delay between reconnect attempts.
    pub reconnect_initial_delay: Duration,
    /// Maximum backoff delay between reconnect attempts.
    pub reconnect_max_delay: Duration,
    /// Channel capacity for internal mpsc buffers.
    pub channel_capacity: usize,
    /// File transfer chunk size in bytes.
    pub chunk_size: u32,
    /// Terminal receive buffer high watermark (bytes) — above this, pause.
    pub high_watermark: u64,
    /// Terminal receive buffer low watermark (bytes) — below this, resume.
    pub low_watermark: u64,
    /// Default value of `show_hidden` for newly created file browser state.
    pub show_hidden_default: bool,
}

impl Default for ShellCoreConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080/ws".to_string(),
            ice_servers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            register_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 10,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            channel_capacity: 256,
            chunk_size: 64 * 1024,
            high_watermark: 400 * 1024,
            low_watermark: 150 * 1024,
            show_hidden_default: false,
        }
    }
}

impl ShellCoreConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/shellcore/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved `signaling_url` doesn't start with
    /// `ws://`/`wss://`.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ShellCoreConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing. Does not validate — callers
    /// that skip `load()` should call [`Self::validate`] themselves.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            signaling_url: cli
                .signaling_url
                .clone()
                .or_else(|| file.network.signaling_url.clone())
                .unwrap_or(defaults.signaling_url),
            ice_servers: if cli.ice_servers.is_empty() {
                file.network
                    .ice_servers
                    .clone()
                    .unwrap_or(defaults.ice_servers)
            } else {
                cli.ice_servers.clone()
            },
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            register_timeout: file
                .network
                .register_timeout_secs
                .map_or(defaults.register_timeout, Duration::from_secs),
            max_reconnect_attempts: file
                .network
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_initial_delay: file
                .network
                .reconnect_initial_delay_ms
                .map_or(defaults.reconnect_initial_delay, Duration::from_millis),
            reconnect_max_delay: file
                .network
                .reconnect_max_delay_secs
                .map_or(defaults.reconnect_max_delay, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            chunk_size: file.transport.chunk_size.unwrap_or(defaults.chunk_size),
            high_watermark: file
                .transport
                .high_watermark
                .unwrap_or(defaults.high_watermark),
            low_watermark: file
                .transport
                .low_watermark
                .unwrap_or(defaults.low_watermark),
            show_hidden_default: file
                .files
                .show_hidden_default
                .unwrap_or(defaults.show_hidden_default),
        }
    }

    /// Validate cross-field and format invariants not expressible as plain
    /// defaults (spec 3.6: `signaling_url` must start `ws://`/`wss://`).
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidSignalingUrl(self.signaling_url.clone()));
        }
        Ok(())
    }

    /// Build the [`crate::signaling::ReconnectPolicy`] this config implies.
    #[must_use]
    pub fn reconnect_policy(&self) -> crate::signaling::ReconnectPolicy {
        crate::signaling::ReconnectPolicy {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            max_attempts: self.max_reconnect_attempts,
            ..Default::default()
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Client-side connection core for a remote shell")]
pub struct CliArgs {
    /// WebSocket URL of the signaling relay.
    #[arg(long, env = "SIGNALING_URL")]
    pub signaling_url: Option<String>,

    /// STUN/TURN server URLs (repeatable).
    #[arg(long = "ice-server", env = "ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,

    /// Path to config file (default: `~/.config/shellcore/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Signaling room to join on startup.
    #[arg(long, env = "SHELLCORE_ROOM")]
    pub room: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SHELLCORE_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/shellcore.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("shellcore").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = ShellCoreConfig::default();
        assert_eq!(config.signaling_url, "ws://127.0.0.1:8080/ws");
        assert!(config.ice_servers.is_empty());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.register_timeout, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_initial_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.high_watermark, 400 * 1024);
        assert_eq!(config.low_watermark, 150 * 1024);
        assert!(!config.show_hidden_default);
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[network]
signaling_url = "wss://relay.example.com/ws"
ice_servers = ["stun:stun.example.com:3478"]
connect_timeout_secs = 30
register_timeout_secs = 10
max_reconnect_attempts = 20
reconnect_initial_delay_ms = 250
reconnect_max_delay_secs = 60
channel_capacity = 512

[transport]
chunk_size = 32768
high_watermark = 800000
low_watermark = 200000

[files]
show_hidden_default = true
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs::default();
        let config = ShellCoreConfig::resolve(&cli, &file);

        assert_eq!(config.signaling_url, "wss://relay.example.com/ws");
        assert_eq!(config.ice_servers, vec!["stun:stun.example.com:3478"]);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.register_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 20);
        assert_eq!(config.reconnect_initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(60));
        assert_eq!(config.channel_capacity, 512);
        assert_eq!(config.chunk_size, 32768);
        assert_eq!(config.high_watermark, 800_000);
        assert_eq!(config.low_watermark, 200_000);
        assert!(config.show_hidden_default);
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r#"
[network]
signaling_url = "ws://custom:9000/ws"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs::default();
        let config = ShellCoreConfig::resolve(&cli, &file);

        assert_eq!(config.signaling_url, "ws://custom:9000/ws");
        // Everything else should be default.
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.chunk_size, 64 * 1024);
    }

    #[test]
    fn toml_parsing_empty() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let cli = CliArgs::default();
        let config = ShellCoreConfig::resolve(&cli, &file);

        assert_eq!(config.signaling_url, "ws://127.0.0.1:8080/ws");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[network]
signaling_url = "wss://file.example.com/ws"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            signaling_url: Some("wss://cli.example.com/ws".to_string()),
            ..Default::default()
        };
        let config = ShellCoreConfig::resolve(&cli, &file);

        assert_eq!(config.signaling_url, "wss://cli.example.com/ws");
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = load_config_file(None);
        assert!(result.is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(result.is_err());
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }

    #[test]
    fn validate_rejects_non_ws_url() {
        let config = ShellCoreConfig {
            signaling_url: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSignalingUrl(_))
        ));
    }

    #[test]
    fn validate_accepts_ws_and_wss() {
        let mut config = ShellCoreConfig {
            signaling_url: "ws://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.signaling_url = "wss://example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reconnect_policy_reflects_config() {
        let config = ShellCoreConfig {
            reconnect_initial_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(15),
            max_reconnect_attempts: 3,
            ..Default::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(15));
        assert_eq!(policy.max_attempts, 3);
    }
}
