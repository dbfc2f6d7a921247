//! Client configuration
//!
//! Values are resolved in layers, later layers winning: built-in defaults, the
//! TOML file, `BILI2TEXT_*` environment variables, then command-line flags
//! (applied by the binary after [`ClientConfig::load`]).

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backoff::BackoffPolicy;
use crate::channel::ChannelConfig;
use crate::endpoints::Endpoints;
use crate::error::{Error, Result};
use crate::request::RequestConfig;

const FILE_NAME: &str = "client.toml";
const APP_DIR: &str = "bili2text";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub channel: ChannelSettings,
    pub request: RequestSettings,
    pub logging: LoggingSettings,
}

/// `[server]`: where the web service lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// http(s) origin; channel URLs swap the scheme for ws(s)
    pub base_url: String,
    pub api_path: String,
    pub ws_path: String,
}

/// `[channel]`, all durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub heartbeat_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

/// `[request]`, all durations in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    /// Per attempt, not per logical request
    pub timeout_ms: u64,
    /// Retries on top of the first attempt
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Rotated daily when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub max_files: u32,
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            api_path: "/api".into(),
            ws_path: "/ws".into(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

type Override = fn(&mut ClientConfig, String);

/// Environment variables and the setting each one replaces. Numeric values
/// that fail to parse are ignored.
const ENV_OVERRIDES: &[(&str, Override)] = &[
    ("BILI2TEXT_BASE_URL", |c, v| c.server.base_url = v),
    ("BILI2TEXT_HEARTBEAT_INTERVAL_MS", |c, v| {
        parse_into(&v, &mut c.channel.heartbeat_interval_ms)
    }),
    ("BILI2TEXT_MAX_RECONNECT_ATTEMPTS", |c, v| {
        parse_into(&v, &mut c.channel.max_reconnect_attempts)
    }),
    ("BILI2TEXT_RECONNECT_BASE_DELAY_MS", |c, v| {
        parse_into(&v, &mut c.channel.reconnect_base_delay_ms)
    }),
    ("BILI2TEXT_REQUEST_TIMEOUT_MS", |c, v| parse_into(&v, &mut c.request.timeout_ms)),
    ("BILI2TEXT_MAX_RETRIES", |c, v| parse_into(&v, &mut c.request.max_retries)),
    ("BILI2TEXT_RETRY_BASE_DELAY_MS", |c, v| {
        parse_into(&v, &mut c.request.retry_base_delay_ms)
    }),
    ("BILI2TEXT_LOG_LEVEL", |c, v| c.logging.level = v),
    ("BILI2TEXT_LOG_FILE", |c, v| c.logging.file = Some(v)),
    ("BILI2TEXT_LOG_JSON", |c, v| {
        c.logging.json_format = matches!(v.to_lowercase().as_str(), "1" | "true")
    }),
];

impl ClientConfig {
    /// Resolve defaults, file and environment, then validate.
    ///
    /// An explicit `config_path` must exist; without one the search path is
    /// tried and a missing file simply means defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match locate(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        if let Some(file) = config.logging.file.take() {
            config.logging.file = Some(expand_path(&file));
        }
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| Error::ConfigSyntax {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (name, apply) in ENV_OVERRIDES {
            if let Ok(value) = std::env::var(name) {
                debug!(variable = name, "Applying environment override");
                apply(self, value);
            }
        }
    }

    /// Reject values the client cannot run with, naming the offending key
    pub fn validate(&self) -> Result<()> {
        let base = self.server.base_url.as_str();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::config_field_invalid(
                "server.base_url",
                format!("'{}' is not an http:// or https:// URL", base),
            ));
        }
        self.endpoints()?;

        require_positive("channel.heartbeat_interval_ms", self.channel.heartbeat_interval_ms)?;
        require_positive("channel.connect_timeout_ms", self.channel.connect_timeout_ms)?;
        require_positive("request.timeout_ms", self.request.timeout_ms)?;

        if tracing::Level::from_str(&self.logging.level).is_err() {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "unknown level '{}', expected trace, debug, info, warn or error",
                    self.logging.level
                ),
            ));
        }

        Ok(())
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::new(&self.server.base_url, &self.server.api_path, &self.server.ws_path)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let channel = &self.channel;
        ChannelConfig {
            heartbeat_interval: Duration::from_millis(channel.heartbeat_interval_ms),
            max_reconnect_attempts: channel.max_reconnect_attempts,
            backoff: BackoffPolicy::from_millis(channel.reconnect_base_delay_ms),
            connect_timeout: Duration::from_millis(channel.connect_timeout_ms),
        }
    }

    pub fn request_config(&self) -> RequestConfig {
        let request = &self.request;
        RequestConfig {
            timeout: Duration::from_millis(request.timeout_ms),
            max_retries: request.max_retries,
            backoff: BackoffPolicy::from_millis(request.retry_base_delay_ms),
        }
    }
}

fn parse_into<T: FromStr>(value: &str, target: &mut T) {
    if let Ok(parsed) = value.parse() {
        *target = parsed;
    }
}

fn require_positive(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::config_field_invalid(field, "must be greater than 0"));
    }
    Ok(())
}

/// `~` and `$VAR` expansion; unexpandable input is kept as written
fn expand_path(path: &str) -> String {
    match shellexpand::full(path) {
        Ok(expanded) => expanded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Candidate files, most specific first
fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("bili2text-client.toml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME)));
    paths.extend(dirs::home_dir().map(|home| home.join(".bili2text").join(FILE_NAME)));
    paths
}

fn locate(explicit: Option<&str>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        let path = PathBuf::from(expand_path(path));
        return if path.is_file() {
            Ok(Some(path))
        } else {
            Err(Error::config_not_found(path))
        };
    }

    let found = search_paths().into_iter().find(|path| path.is_file());
    if let Some(path) = &found {
        debug!(path = %path.display(), "Found configuration file");
    }
    Ok(found)
}

/// Where `config init` writes without `--path`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bili2text")
        .join(FILE_NAME)
}

/// Write the commented default file; refuses to replace one unless `force`
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let target = match path {
        Some(path) => PathBuf::from(expand_path(path)),
        None => default_config_path(),
    };

    if target.exists() && !force {
        return Err(Error::ConfigInvalid {
            field: None,
            message: format!(
                "{} already exists (pass --force to replace it)",
                target.display()
            ),
        });
    }

    let write_error = |path: &Path| {
        let path = path.to_path_buf();
        move |source| Error::WriteFile { path, source }
    };

    if let Some(dir) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(write_error(dir))?;
    }
    fs::write(&target, DEFAULT_CONFIG).map_err(write_error(&target))?;

    Ok(target)
}

const DEFAULT_CONFIG: &str = r#"# bili2text client settings
# Every key is optional; omitted keys take the value shown here.

[server]
# Web service origin. Channels connect to the same host over ws:// or wss://.
base_url = "http://localhost:5000"
api_path = "/api"
ws_path = "/ws"

[channel]
# Pings go out this often (ms). Twice this long without a pong forces a reconnect.
heartbeat_interval_ms = 30000
# Give up and report RECONNECT_EXHAUSTED after this many reconnects.
max_reconnect_attempts = 5
# Reconnect n waits reconnect_base_delay_ms * 2^n.
reconnect_base_delay_ms = 1000
connect_timeout_ms = 10000

[request]
# Applies to each attempt separately (ms).
timeout_ms = 30000
# Extra attempts for network errors, timeouts and 5xx responses.
max_retries = 3
# Retry n waits retry_base_delay_ms * 2^n.
retry_base_delay_ms = 1000

[logging]
# trace | debug | info | warn | error
level = "info"
# Uncomment to also log to a daily-rotated file.
# file = "~/.bili2text/logs/client.log"
max_files = 5
json_format = false
"#;
