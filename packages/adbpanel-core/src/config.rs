//! Runtime configuration.
//!
//! Values are resolved with priority:
//! 1. Environment variables (`ADBPANEL_BRIDGE`, `ADBPANEL_PROJECT_ROOT`)
//! 2. Config file (`~/.config/adbpanel/config.toml`)
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the device bridge program
const ENV_BRIDGE: &str = "ADBPANEL_BRIDGE";

/// Environment variable overriding the project root
const ENV_PROJECT_ROOT: &str = "ADBPANEL_PROJECT_ROOT";

const DEFAULT_BRIDGE: &str = "adb";

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// At least one value came from an environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub resolver: ResolverConfig,
    pub sweep: SweepConfig,
    pub registry: RegistryConfig,
    /// Directory holding the registry file and scan exports.
    /// Not read from the file; set from the environment or the working directory.
    #[serde(skip)]
    pub project_root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path or name of the device bridge executable
    pub program: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Public address used to pick the outbound interface
    pub probe_address: String,
    pub subnet_timeout_ms: u64,
    pub scan_timeout_secs: u64,
    /// Active scanner executables, tried in order
    pub scanner_candidates: Vec<String>,
    /// Scanner export file, relative to the project root
    pub export_file: String,
    /// Pause between the sweep and the neighbor table read
    pub settle_delay_ms: u64,
    pub overall_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_address: "8.8.8.8:80".to_string(),
            subnet_timeout_ms: 500,
            scan_timeout_secs: 30,
            scanner_candidates: ["ipscan", "ipscan.exe", "angryip", "angryip.exe"]
                .into_iter()
                .map(String::from)
                .collect(),
            export_file: "angry_scan_result.txt".to_string(),
            settle_delay_ms: 300,
            overall_timeout_secs: 90,
        }
    }
}

impl ResolverConfig {
    pub fn subnet_timeout(&self) -> Duration {
        Duration::from_millis(self.subnet_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Probes launched before each pacing pause
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_pause_ms: 50,
            probe_timeout_ms: 200,
        }
    }
}

impl SweepConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry file, relative to the project root
    pub file: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            file: "devices.json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, the config file and defaults.
    pub fn load() -> (AppConfig, ConfigSource) {
        let (mut config, mut source) = match load_config_file() {
            Some(config) => (config, ConfigSource::ConfigFile),
            None => (AppConfig::default(), ConfigSource::Default),
        };

        config.project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        if let Some(root) = env_value(ENV_PROJECT_ROOT) {
            tracing::info!("Using project root from environment variable: {}", root);
            config.project_root = PathBuf::from(root);
            source = ConfigSource::Environment;
        }

        if let Some(bridge) = env_value(ENV_BRIDGE) {
            tracing::info!("Using bridge program from environment variable: {}", bridge);
            config.bridge.program = Some(bridge);
            source = ConfigSource::Environment;
        }

        (config, source)
    }

    /// Parse a TOML document; missing sections and keys take defaults.
    pub fn from_toml_str(content: &str) -> anyhow::Result<AppConfig> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn registry_path(&self) -> PathBuf {
        self.project_root.join(&self.registry.file)
    }

    pub fn export_path(&self) -> PathBuf {
        self.project_root.join(&self.resolver.export_file)
    }

    /// The bridge executable: configured value, then a bundled
    /// `tools/platform-tools` copy under the project root, then `adb` on PATH.
    pub fn bridge_program(&self) -> String {
        if let Some(program) = self.bridge.program.as_deref().map(str::trim) {
            if !program.is_empty() {
                return program.to_string();
            }
        }
        bundled_bridge(&self.project_root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| DEFAULT_BRIDGE.to_string())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bundled_bridge(project_root: &Path) -> Option<PathBuf> {
    let tools = project_root.join("tools").join("platform-tools");
    ["adb", "adb.exe"]
        .iter()
        .map(|name| tools.join(name))
        .find(|path| path.is_file())
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("adbpanel").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<AppConfig> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match AppConfig::from_toml_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/adbpanel/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# adbpanel configuration
# Place this file at: ~/.config/adbpanel/config.toml

[bridge]
# Device bridge executable (default: tools/platform-tools/adb, then adb on PATH)
# program = "/opt/platform-tools/adb"

[resolver]
# probe_address = "8.8.8.8:80"
# subnet_timeout_ms = 500
# scan_timeout_secs = 30
# scanner_candidates = ["ipscan", "ipscan.exe", "angryip", "angryip.exe"]
# export_file = "angry_scan_result.txt"
# settle_delay_ms = 300
# overall_timeout_secs = 90

[sweep]
# batch_size = 50
# batch_pause_ms = 50
# probe_timeout_ms = 200

[registry]
# file = "devices.json"
"#
    .to_string()
}
