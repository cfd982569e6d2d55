// Timeouts, topics, serial settings and the controller config file
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Serial line settings for XD controllers
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const LINE_TERMINATOR: u8 = b'\n';
pub const MAX_LINE_LEN: usize = 128;
// Unexpected lines skipped while waiting for a reply's echo
pub const MAX_STALE_LINES: usize = 8;

// Poll intervals
pub const DEFAULT_MOVING_POLL: Duration = Duration::from_millis(100);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(1000);

// Cycles polled at the moving rate after a motion command
pub const FORCED_FAST_POLLS: u32 = 2;

// Runtime loop frequency for draining motion requests
pub const CMD_LOOP_HZ: u64 = 50;

// Motion requests buffered per controller
pub const COMMAND_QUEUE_DEPTH: usize = 64;

// Zenoh topics
pub const TOPIC_CMD: &str = "xeryon/cmd"; // motion requests
pub const TOPIC_READBACK_BASE: &str = "xeryon"; // xeryon/<controller>/<axis>/readback

pub const DEFAULT_CONFIG_PATH: &str = "xeryon-xd.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "controller")]
    pub controllers: Vec<ControllerConfig>,
}

/// One "create controller" entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub port: String,
    #[serde(default = "default_baudrate")]
    pub baud_rate: u32,
    pub axes: usize,
    #[serde(default = "default_moving_poll_ms")]
    pub moving_poll_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// "configure axis" entries
    #[serde(default, rename = "axis")]
    pub axis_stages: Vec<AxisStageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisStageConfig {
    pub index: usize,
    pub stage: String,
}

fn default_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}

fn default_moving_poll_ms() -> u64 {
    DEFAULT_MOVING_POLL.as_millis() as u64
}

fn default_idle_poll_ms() -> u64 {
    DEFAULT_IDLE_POLL.as_millis() as u64
}

impl ControllerConfig {
    pub fn poll_periods(&self) -> crate::xd::PollPeriods {
        crate::xd::PollPeriods {
            moving: Duration::from_millis(self.moving_poll_ms),
            idle: Duration::from_millis(self.idle_poll_ms),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for c in &self.controllers {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}' defined twice",
                    c.name
                )));
            }
            if c.axes == 0 || c.axes > crate::xd::MAX_AXES {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}': axes must be 1..={}",
                    c.name,
                    crate::xd::MAX_AXES
                )));
            }
            if c.moving_poll_ms == 0 || c.idle_poll_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}': poll periods must be non-zero",
                    c.name
                )));
            }
            if let Some(a) = c.axis_stages.iter().find(|a| a.index >= c.axes) {
                return Err(ConfigError::Invalid(format!(
                    "controller '{}': axis {} out of range",
                    c.name, a.index
                )));
            }
        }
        Ok(())
    }
}
