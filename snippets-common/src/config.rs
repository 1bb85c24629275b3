//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "SNIPPETS_ROOT_FOLDER";

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "SNIPPETS_CONFIG";

const DEFAULT_SAMPLE_RATE: f64 = 0.1;
const DEFAULT_GEO_URL: &str = "https://location.services.mozilla.com/v1/country";
const DEFAULT_GEO_TIMEOUT_SECS: u64 = 60;
const DEFAULT_GEO_CACHE_DAYS: i64 = 30;

/// What the surface does after the user dismisses a snippet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    /// Reload the page so the next eligible snippet (or default content) shows
    #[default]
    Reload,
    /// Hide the snippet container for the rest of the session
    Hide,
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub root_folder: PathBuf,
    /// Database file name, relative to `root_folder`
    pub database_file: String,
    /// Legacy key-value slot file name, relative to `root_folder`
    pub legacy_slot_file: String,
    /// Collector endpoint; metrics are never sent when unset
    pub metrics_url: Option<String>,
    /// Probability that a metric is transmitted (0.0 ..= 1.0)
    pub metrics_sample_rate: f64,
    pub geo_url: Option<String>,
    pub geo_timeout_secs: u64,
    pub geo_cache_days: i64,
    pub locale: String,
    /// Major version of the current release channel; relative version
    /// bounds are not checked while unset
    pub current_release: Option<u32>,
    /// Product token whose `<token>/<major>.` is read from the user agent
    pub version_token: String,
    /// Diagnostic mode: first snippet wins, metrics are only logged
    pub preview: bool,
    pub block_action: BlockAction,
    /// Links starting with this prefix open the host's account flow
    pub accounts_link_prefix: String,
    /// Fixed seed for reproducible draws
    pub random_seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_folder: get_default_root_folder(),
            database_file: "snippets.db".to_string(),
            legacy_slot_file: "legacy_slot.json".to_string(),
            metrics_url: None,
            metrics_sample_rate: DEFAULT_SAMPLE_RATE,
            geo_url: Some(DEFAULT_GEO_URL.to_string()),
            geo_timeout_secs: DEFAULT_GEO_TIMEOUT_SECS,
            geo_cache_days: DEFAULT_GEO_CACHE_DAYS,
            locale: "en-US".to_string(),
            current_release: None,
            version_token: "Firefox".to_string(),
            preview: false,
            block_action: BlockAction::Reload,
            accounts_link_prefix: "about:accounts".to_string(),
            random_seed: None,
        }
    }
}

impl ClientConfig {
    /// Parse configuration from a TOML string, filling gaps with defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error: a warning is logged and defaults are used.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                info!("Loaded config file: {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file not found ({}), using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Locate and load the config file, then resolve the root folder
    ///
    /// Config file: explicit path > `SNIPPETS_CONFIG` > platform config dir.
    /// Root folder: CLI argument > `SNIPPETS_ROOT_FOLDER` > TOML > OS default.
    pub fn resolve(config_path: Option<&Path>, root_folder_arg: Option<&Path>) -> Result<Self> {
        let config_file = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
            .or_else(|| find_config_file().ok());

        let mut config = match config_file {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.root_folder = resolve_root_folder(root_folder_arg, Some(&config.root_folder));
        Ok(config)
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.metrics_sample_rate) {
            return Err(Error::Config(format!(
                "metrics_sample_rate must be within [0, 1], got {}",
                self.metrics_sample_rate
            )));
        }
        if self.geo_cache_days < 0 {
            return Err(Error::Config("geo_cache_days must not be negative".to_string()));
        }
        if self.current_release == Some(0) {
            return Err(Error::Config("current_release must be a positive major version".to_string()));
        }
        if self.version_token.is_empty() {
            return Err(Error::Config("version_token must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(&self.database_file)
    }

    pub fn legacy_slot_path(&self) -> PathBuf {
        self.root_folder.join(&self.legacy_slot_file)
    }

    pub fn geo_timeout(&self) -> Duration {
        Duration::from_secs(self.geo_timeout_secs)
    }

    pub fn geo_cache_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.geo_cache_days)
    }
}

/// TOML file structure for deserialization
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    root_folder: Option<PathBuf>,
    database_file: Option<String>,
    legacy_slot_file: Option<String>,
    #[serde(default)]
    metrics: MetricsSection,
    #[serde(default)]
    geo: GeoSection,
    #[serde(default)]
    client: ClientSection,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsSection {
    url: Option<String>,
    sample_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct GeoSection {
    url: Option<String>,
    timeout_secs: Option<u64>,
    cache_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    locale: Option<String>,
    current_release: Option<u32>,
    version_token: Option<String>,
    preview: Option<bool>,
    block_action: Option<BlockAction>,
    accounts_link_prefix: Option<String>,
    random_seed: Option<u64>,
}

impl From<TomlConfig> for ClientConfig {
    fn from(file: TomlConfig) -> Self {
        let defaults = ClientConfig::default();
        Self {
            root_folder: file.root_folder.unwrap_or(defaults.root_folder),
            database_file: file.database_file.unwrap_or(defaults.database_file),
            legacy_slot_file: file.legacy_slot_file.unwrap_or(defaults.legacy_slot_file),
            metrics_url: file.metrics.url.filter(|u| !u.is_empty()),
            metrics_sample_rate: file.metrics.sample_rate.unwrap_or(defaults.metrics_sample_rate),
            // An explicit empty URL disables geolocation
            geo_url: match file.geo.url {
                Some(url) if url.is_empty() => None,
                Some(url) => Some(url),
                None => defaults.geo_url,
            },
            geo_timeout_secs: file.geo.timeout_secs.unwrap_or(defaults.geo_timeout_secs),
            geo_cache_days: file.geo.cache_days.unwrap_or(defaults.geo_cache_days),
            locale: file.client.locale.unwrap_or(defaults.locale),
            current_release: file.client.current_release.or(defaults.current_release),
            version_token: file.client.version_token.unwrap_or(defaults.version_token),
            preview: file.client.preview.unwrap_or(defaults.preview),
            block_action: file.client.block_action.unwrap_or(defaults.block_action),
            accounts_link_prefix: file
                .client
                .accounts_link_prefix
                .unwrap_or(defaults.accounts_link_prefix),
            random_seed: file.client.random_seed,
        }
    }
}

/// Root folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file value
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    get_default_root_folder()
}

/// Get default configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("snippets").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/snippets/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/snippets (or /var/lib/snippets for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("snippets"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/snippets"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("snippets"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/snippets"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("snippets"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\snippets"))
    } else {
        PathBuf::from("./snippets_data")
    }
}
