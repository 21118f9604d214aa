//! Configuration for the pilot runtime.
//!
//! Loads configuration from ${PILOT_HOME}/config.toml with sensible
//! defaults. Secrets stay out of the file: the decision-service API key
//! falls back to `OPENAI_API_KEY`, and the emulator tool paths fall back
//! to `ADB_PATH` / `EMULATOR_PATH` / `AVD_NAME`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which device backend a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Emulated Android phone over adb.
    #[default]
    Android,
    /// Remote desktop sandbox behind the HTTP bridge.
    Desktop,
}

/// Which decision protocol drives the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionProtocol {
    /// Function-calling decider with an explicit stop tool.
    #[default]
    ToolCall,
    /// Computer-use decider threading screenshots through response ids.
    ComputerUse,
}

/// Decision service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Protocol used to obtain decisions.
    pub protocol: DecisionProtocol,
    /// Model for the function-calling decider and the analyser.
    pub model: String,
    /// Model for the computer-use decider.
    pub computer_use_model: String,
    /// Whether to run the perception pass before each decision.
    pub analyser_enabled: bool,
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    /// Base URL of the decision service.
    pub base_url: String,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            protocol: DecisionProtocol::default(),
            model: "gpt-4o".to_string(),
            computer_use_model: "computer-use-preview".to_string(),
            analyser_enabled: true,
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl DecisionConfig {
    /// Resolves the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        std::env::var("OPENAI_API_KEY")
            .context("No API key configured: set decision.api_key or OPENAI_API_KEY")
    }
}

/// Android emulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Path to the adb binary.
    pub adb_path: String,
    /// Path to the emulator binary.
    pub emulator_path: String,
    /// Name of the AVD to launch.
    pub avd_name: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            adb_path: env_or("ADB_PATH", "adb"),
            emulator_path: env_or("EMULATOR_PATH", "emulator"),
            avd_name: env_or("AVD_NAME", "Pixel_7"),
        }
    }
}

/// Desktop sandbox bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopConfig {
    /// Base URL of the sandbox bridge.
    pub bridge_url: String,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            bridge_url: env_or("SANDBOX_BRIDGE_URL", "http://localhost:8700"),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device backend to drive.
    pub device: DeviceKind,

    /// Native device resolution as [width, height].
    pub resolution: [u32; 2],

    /// Iteration cap per run.
    pub max_iterations: u32,

    /// Delay after each dispatched action, in milliseconds.
    pub settle_delay_ms: u64,

    /// Decision service configuration.
    pub decision: DecisionConfig,

    /// Android emulator configuration.
    pub emulator: EmulatorConfig,

    /// Desktop sandbox bridge configuration.
    pub desktop: DesktopConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceKind::default(),
            resolution: [1080, 2400],
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            settle_delay_ms: Self::DEFAULT_SETTLE_DELAY_MS,
            decision: DecisionConfig::default(),
            emulator: EmulatorConfig::default(),
            desktop: DesktopConfig::default(),
        }
    }
}

impl Config {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 25;
    pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.resolution[0], self.resolution[1])
    }
}

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_string())
}

pub mod paths {
    //! Path resolution for pilot configuration directories.
    //!
    //! PILOT_HOME resolution order:
    //! 1. PILOT_HOME environment variable (if set)
    //! 2. ~/.config/pilot (default)

    use std::path::PathBuf;

    pub fn pilot_home() -> PathBuf {
        if let Ok(home) = std::env::var("PILOT_HOME") {
            return PathBuf::from(home);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config").join("pilot"))
            .unwrap_or_else(|_| PathBuf::from(".pilot"))
    }

    pub fn config_path() -> PathBuf {
        pilot_home().join("config.toml")
    }
}
