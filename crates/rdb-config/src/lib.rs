//! Configuration for the rdb debugger back end.
//!
//! A [`DebuggerConfig`] is read from TOML, validated, and then used to set up
//! logging ([`init_tracing`]) and to open a [`rdb_stack::DebugSession`]
//! ([`connect_session`]).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use rdb_metadata::MetadataError;
use rdb_stack::{ByteOrder, MethodLayout, ResolveOptions};
use rdb_wire::{QueueConfig, WireError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;
mod session;

pub use logging::init_tracing;
pub use session::connect_session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Address of the target's debug server.
    #[serde(default = "TransportConfig::default_address")]
    pub address: SocketAddr,

    #[serde(default = "TransportConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long a single command may wait for its reply.
    #[serde(default = "TransportConfig::default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Largest reply frame accepted from the target, in bytes.
    #[serde(default = "TransportConfig::default_max_frame_len")]
    pub max_frame_len: usize,
}

impl TransportConfig {
    fn default_address() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7777)
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_reply_timeout_ms() -> u64 {
        10_000
    }

    fn default_max_frame_len() -> usize {
        16 * 1024 * 1024
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            connect_timeout: self.connect_timeout(),
            reply_timeout: self.reply_timeout(),
            max_frame_len: self.max_frame_len,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            reply_timeout_ms: Self::default_reply_timeout_ms(),
            max_frame_len: Self::default_max_frame_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrderConfig {
    #[default]
    Big,
    Little,
}

impl From<ByteOrderConfig> for ByteOrder {
    fn from(value: ByteOrderConfig) -> Self {
        match value {
            ByteOrderConfig::Big => ByteOrder::Big,
            ByteOrderConfig::Little => ByteOrder::Little,
        }
    }
}

/// Runtime method record layout. Only needs overriding when debugging a target
/// built by a compiler whose runtime headers moved the name or descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default = "LayoutConfig::default_name_ptr_offset")]
    pub name_ptr_offset: u64,
    #[serde(default = "LayoutConfig::default_desc_ptr_offset")]
    pub desc_ptr_offset: u64,
    #[serde(default)]
    pub byte_order: ByteOrderConfig,
}

impl LayoutConfig {
    fn default_name_ptr_offset() -> u64 {
        MethodLayout::CURRENT.name_ptr_offset
    }

    fn default_desc_ptr_offset() -> u64 {
        MethodLayout::CURRENT.desc_ptr_offset
    }

    pub fn method_layout(&self) -> MethodLayout {
        MethodLayout {
            name_ptr_offset: self.name_ptr_offset,
            desc_ptr_offset: self.desc_ptr_offset,
            ..MethodLayout::CURRENT
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            name_ptr_offset: Self::default_name_ptr_offset(),
            desc_ptr_offset: Self::default_desc_ptr_offset(),
            byte_order: ByteOrderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolutionConfig {
    /// Hide variables whose line scope does not cover the frame's current line.
    #[serde(default)]
    pub skip_out_of_scope: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    /// Root of the per-class debug info emitted by the compiler.
    #[serde(default = "MetadataConfig::default_class_dir")]
    pub class_dir: PathBuf,

    /// JSON symbol table of the target executable.
    #[serde(default)]
    pub symbols: Option<PathBuf>,
}

impl MetadataConfig {
    fn default_class_dir() -> PathBuf {
        PathBuf::from("target/debug-info")
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            class_dir: Self::default_class_dir(),
            symbols: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. An unopenable file disables only this sink.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level merged with `RUST_LOG`, if set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let config_directives = Self::normalize_level_directives(&self.level);
                tracing_subscriber::EnvFilter::try_new(format!(
                    "{config_directives},{env_directives}"
                ))
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

/// Top-level `rdb.toml`.
///
/// ```toml
/// [transport]
/// address = "127.0.0.1:7777"
/// reply_timeout_ms = 10000
///
/// [layout]
/// byte_order = "big"
///
/// [metadata]
/// class_dir = "target/debug-info"
/// symbols = "target/debug-info/symbols.json"
///
/// [logging]
/// level = "rdb.stack=debug,info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("failed to connect to target: {0}")]
    Connect(#[from] WireError),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_owned())
    }
}

impl DebuggerConfig {
    /// Load a config file. Relative metadata and log paths are taken relative to
    /// the file's directory.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::load_from_str(&text)?;
        if let Some(dir) = path.parent() {
            config.rebase_paths(dir);
        }
        tracing::debug!(target: "rdb.config", path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn rebase_paths(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.metadata.class_dir);
        if let Some(symbols) = self.metadata.symbols.as_mut() {
            rebase(symbols);
        }
        if let Some(file) = self.logging.file.as_mut() {
            rebase(file);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.connect_timeout_ms",
                message: "must be greater than zero".into(),
            });
        }
        if self.transport.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.reply_timeout_ms",
                message: "must be greater than zero".into(),
            });
        }
        if self.transport.max_frame_len == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.max_frame_len",
                message: "must be greater than zero".into(),
            });
        }
        if !self.layout.method_layout().is_consistent() {
            return Err(ConfigError::Invalid {
                field: "layout",
                message: format!(
                    "name pointer at {} overlaps descriptor pointer at {}",
                    self.layout.name_ptr_offset, self.layout.desc_ptr_offset
                ),
            });
        }
        Ok(())
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            layout: self.layout.method_layout(),
            byte_order: self.layout.byte_order.into(),
            skip_out_of_scope: self.resolution.skip_out_of_scope,
            reply_timeout: Some(self.transport.reply_timeout()),
        }
    }
}

pub const RDB_CONFIG_ENV_VAR: &str = "RDB_CONFIG_PATH";

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the lock that serializes access to [`RDB_CONFIG_ENV_VAR`].
///
/// Tests that set the variable must wrap both the mutation and the discovery
/// call in this helper.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Find the config file for `workspace_root`.
///
/// Search order:
/// 1) `RDB_CONFIG_PATH` (absolute or relative to `workspace_root`)
/// 2) `rdb.toml`
/// 3) `.rdb.toml`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(RDB_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["rdb.toml", ".rdb.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load and validate the config for `workspace_root`.
///
/// Without a config file this returns the defaults, with relative paths taken
/// from `workspace_root`, and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(DebuggerConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        let mut config = DebuggerConfig::default();
        config.rebase_paths(workspace_root);
        return Ok((config, None));
    };

    let config = DebuggerConfig::load_from_path(&path)?;
    config.validate()?;
    Ok((config, Some(path)))
}
