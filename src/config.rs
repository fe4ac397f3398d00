//! Configuration for the storewatch agents.
//!
//! One JSON file configures the whole fleet at a trading point: the point
//! identity, the remote service endpoint, the local data directory, and
//! one entry per monitored zone with that agent's thresholds.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sink::RemoteConfig;

/// Main configuration for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Trading point this deployment belongs to.
    pub point_id: i64,

    /// Remote event store / schedule service endpoint.
    pub remote: RemoteConfig,

    /// Path for the local event buffer and other agent state.
    pub data_path: PathBuf,

    /// Retry delay when the schedule service is unreachable (seconds).
    #[serde(default = "default_schedule_retry_secs")]
    pub schedule_retry_secs: u64,

    /// One entry per monitored zone.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn default_schedule_retry_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storewatch");

        Self {
            point_id: 0,
            remote: RemoteConfig::new("127.0.0.1", 8080, ""),
            data_path: data_dir,
            schedule_retry_secs: default_schedule_retry_secs(),
            agents: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storewatch")
            .join("config.json")
    }

    /// Path of the local event buffer database.
    pub fn queue_path(&self) -> PathBuf {
        self.data_path.join("event_buffer.db")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Check every configured agent carries the thresholds its kind needs.
    ///
    /// A misconfigured agent is the one startup error worth dying for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for agent in &self.agents {
            agent.validate()?;
        }
        Ok(())
    }

    /// Agents selected by a comma-separated kind list (`"all"` for all).
    pub fn select_agents(&self, selector: &str) -> Vec<AgentConfig> {
        let wanted: Vec<String> = selector
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .collect();
        let all = wanted.iter().any(|s| s == "all");

        self.agents
            .iter()
            .filter(|a| all || wanted.iter().any(|w| w == a.kind.as_str()))
            .cloned()
            .collect()
    }
}

/// The five agent shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Cashier absence timer (till zone).
    Cashier,
    /// Client wait timer (queue zone + till zone).
    Client,
    /// Kitchen work sessions plus PPE violation watching.
    Chef,
    /// Unique-visitor counting.
    People,
    /// Scale overload alerts.
    Scale,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Cashier => "cashier",
            AgentKind::Client => "client",
            AgentKind::Chef => "chef",
            AgentKind::People => "people",
            AgentKind::Scale => "scale",
        }
    }
}

/// Per-zone agent settings. Threshold fields are optional in the file;
/// which ones are required depends on the kind (see [`AgentConfig::validate`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub kind: AgentKind,

    /// Human label for the monitored zone, used in logs and evidence.
    pub zone: String,

    /// Seconds between samples.
    #[serde(default = "default_sampling_interval_secs")]
    pub sampling_interval_secs: u64,

    /// Hold before an absence (or presence) span confirms.
    pub timeout_secs: Option<u64>,

    /// Client must be visible this long before counting as present.
    pub appearance_secs: Option<u64>,

    /// Client must be gone this long before the visit closes.
    pub departure_secs: Option<u64>,

    /// Minimum unattended visit length worth reporting.
    pub neglect_secs: Option<u64>,

    /// Consecutive violating frames before evidence fires.
    pub violation_streak: Option<u32>,

    /// Gap that invalidates a running violation streak.
    pub violation_stale_secs: Option<u64>,

    /// People-count flush interval.
    pub report_interval_secs: Option<u64>,
}

fn default_sampling_interval_secs() -> u64 {
    1
}

impl AgentConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs(self.sampling_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        self.require_secs(self.timeout_secs, "timeout_secs")
    }

    pub fn appearance(&self) -> Result<Duration, ConfigError> {
        self.require_secs(self.appearance_secs, "appearance_secs")
    }

    pub fn departure(&self) -> Result<Duration, ConfigError> {
        self.require_secs(self.departure_secs, "departure_secs")
    }

    pub fn neglect(&self) -> Result<Duration, ConfigError> {
        self.require_secs(self.neglect_secs, "neglect_secs")
    }

    pub fn report_interval(&self) -> Result<Duration, ConfigError> {
        self.require_secs(self.report_interval_secs, "report_interval_secs")
    }

    pub fn streak(&self) -> Result<u32, ConfigError> {
        self.violation_streak
            .ok_or_else(|| self.missing("violation_streak"))
    }

    /// Verify the thresholds this kind needs are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            AgentKind::Cashier => {
                self.timeout()?;
            }
            AgentKind::Client => {
                self.appearance()?;
                self.departure()?;
                self.neglect()?;
            }
            AgentKind::Chef => {
                self.timeout()?;
                self.streak()?;
            }
            AgentKind::People => {
                self.report_interval()?;
            }
            AgentKind::Scale => {
                self.streak()?;
            }
        }
        Ok(())
    }

    fn require_secs(&self, value: Option<u64>, field: &str) -> Result<Duration, ConfigError> {
        value
            .map(Duration::from_secs)
            .ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "agent '{}' ({}) is missing required {field}",
            self.zone,
            self.kind.as_str()
        ))
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
