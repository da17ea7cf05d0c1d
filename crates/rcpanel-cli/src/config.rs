//! Configuration Vault – reads/writes `~/.rcpanel/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcpanel_kernel::DebouncePolicy;
use rcpanel_middleware::BrokerConfig;
use rcpanel_types::{CommandTopic, Modality, RcError, Speed};
use zeroize::Zeroizing;

/// Broker connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path; a leading `/` is added when missing.
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Wiped from memory on drop; on disk the file is written owner-only.
    #[serde(default, skip_serializing_if = "is_blank")]
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for BrokerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            keepalive_secs: default_keepalive(),
            username: String::new(),
            password: Zeroizing::default(),
        }
    }
}

impl BrokerSection {
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            path: normalize_path(&self.path),
            keepalive: Duration::from_secs(self.keepalive_secs),
            username: (!self.username.is_empty()).then(|| self.username.clone()),
            password: (!self.password.is_empty()).then(|| self.password.clone()),
        }
    }
}

/// Per-modality overrides. Anything left out falls back to the modality's
/// default [`DebouncePolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalitySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,

    /// Recorded predictions replayed in place of the live model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<PathBuf>,

    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,

    #[serde(default)]
    pub looping: bool,
}

impl Default for ModalitySection {
    fn default() -> Self {
        Self {
            threshold: None,
            interval_ms: None,
            replay: None,
            frame_rate: default_frame_rate(),
            looping: false,
        }
    }
}

/// Shortest replay frame interval, whatever the configured rate.
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

impl ModalitySection {
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            self.frame_rate
        } else {
            default_frame_rate()
        };
        Duration::from_secs_f32(1.0 / fps).max(MIN_FRAME_INTERVAL)
    }
}

/// Persisted configuration stored in `~/.rcpanel/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Must match the id compiled into the device firmware.
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default)]
    pub default_speed: Speed,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub audio: ModalitySection,

    #[serde(default)]
    pub image: ModalitySection,

    #[serde(default)]
    pub pose: ModalitySection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            default_speed: Speed::default(),
            broker: BrokerSection::default(),
            audio: ModalitySection::default(),
            image: ModalitySection::default(),
            pose: ModalitySection::default(),
        }
    }
}

impl Config {
    pub fn topic(&self) -> CommandTopic {
        CommandTopic::for_device(&self.device_id)
    }

    /// Section for a classifier modality; `None` for the keyboard.
    pub fn section(&self, modality: Modality) -> Option<&ModalitySection> {
        match modality {
            Modality::Keyboard => None,
            Modality::Audio => Some(&self.audio),
            Modality::Image => Some(&self.image),
            Modality::Pose => Some(&self.pose),
        }
    }

    /// Default policy for `modality` with the configured overrides applied.
    pub fn policy(&self, modality: Modality) -> DebouncePolicy {
        let mut policy = DebouncePolicy::for_modality(modality);
        if let Some(section) = self.section(modality) {
            if section.threshold.is_some() {
                policy = policy.with_threshold(section.threshold);
            }
            if let Some(ms) = section.interval_ms {
                policy = policy.with_min_interval(Duration::from_millis(ms));
            }
        }
        policy
    }
}

fn default_host() -> String {
    "test.mosquitto.org".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_path() -> String {
    "/mqtt".to_string()
}
fn default_keepalive() -> u64 {
    30
}
fn default_device_id() -> String {
    "robotcar_umk1".to_string()
}
fn default_frame_rate() -> f32 {
    30.0
}

fn is_blank(secret: &Zeroizing<String>) -> bool {
    secret.is_empty()
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Return the path to `~/.rcpanel/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rcpanel").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, RcError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RcError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RcError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| RcError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WSS_HOST` | `broker.host` |
/// | `WSS_PORT` | `broker.port` |
/// | `WSS_PATH` | `broker.path` |
/// | `KEEPALIVE` | `broker.keepalive_secs` |
/// | `MQTT_USERNAME` | `broker.username` |
/// | `MQTT_PASSWORD` | `broker.password` |
/// | `DEVICE_ID` | `device_id` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("WSS_HOST") {
        cfg.broker.host = v;
    }
    if let Some(port) = lookup("WSS_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        cfg.broker.port = port;
    }
    if let Some(v) = lookup("WSS_PATH") {
        cfg.broker.path = normalize_path(&v);
    }
    if let Some(secs) = lookup("KEEPALIVE").and_then(|v| v.trim().parse::<u64>().ok()) {
        cfg.broker.keepalive_secs = secs;
    }
    if let Some(v) = lookup("MQTT_USERNAME") {
        cfg.broker.username = v;
    }
    if let Some(v) = lookup("MQTT_PASSWORD") {
        cfg.broker.password = Zeroizing::new(v);
    }
    if let Some(v) = lookup("DEVICE_ID") {
        cfg.device_id = v;
    }
}

/// Save the config to disk, creating `~/.rcpanel/` if necessary.
pub fn save(cfg: &Config) -> Result<(), RcError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RcError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RcError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(raw.as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)?;
    Ok(())
}
