use crate::consts::{self, InIdx, OutIdx};
use crate::polarity::Sense;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device {0} must not be empty")]
    EmptyDeviceField(&'static str),
    #[error("input {name} uses index {index}, but only {count} inputs exist")]
    InputOutOfRange { name: String, index: InIdx, count: u8 },
    #[error("input index {0} is configured more than once")]
    DuplicateIndex(InIdx),
    #[error("siren output {0} is configured more than once")]
    DuplicateOutput(OutIdx),
    #[error("name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("name '{0}' is not usable as a topic level")]
    InvalidName(String),
    #[error("poll interval must be positive")]
    ZeroPoll,
    #[error("settle time must be positive")]
    ZeroSettle,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_settle_ms() -> u64 {
    consts::DEFAULT_SETTLE_MS
}

fn default_poll_ms() -> u64 {
    consts::DEFAULT_POLL_MS
}

fn default_true() -> bool {
    true
}

fn default_device_class() -> String {
    "motion".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: consts::DEFAULT_SETTLE_MS,
            poll_ms: consts::DEFAULT_POLL_MS,
        }
    }
}

impl TimingConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Single sensor input.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub index: InIdx,
    /// Topic level, eg. HallwayMotion
    pub name: String,
    /// Display name, eg. "Hallway Motion"
    pub label: String,
    pub sense: Sense,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bypassed zones report state but never trigger the alarm.
    #[serde(default)]
    pub bypass: bool,
    #[serde(default = "default_device_class")]
    pub device_class: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SirenConfig {
    pub name: String,
    pub label: String,
    pub output: OutIdx,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Device name used in topics.
    pub name: String,
    /// Persisted device UID; unique IDs of all entities derive from it.
    pub uid: String,
    #[serde(default)]
    pub timing: TimingConfig,
    pub inputs: Vec<InputConfig>,
    #[serde(default)]
    pub sirens: Vec<SirenConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(filename: P) -> anyhow::Result<Self> {
        let handle = File::open(filename)?;
        let data: Config = serde_yaml::from_reader(handle)?;

        Ok(data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Check invariants the control loop relies on. Any error here is fatal.
    pub fn validate(&self, input_count: u8) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyDeviceField("name"));
        }
        if self.uid.is_empty() {
            return Err(ConfigError::EmptyDeviceField("uid"));
        }
        check_topic_level(&self.name)?;

        if self.timing.settle_ms == 0 {
            return Err(ConfigError::ZeroSettle);
        }
        if self.timing.poll_ms == 0 {
            return Err(ConfigError::ZeroPoll);
        }
        if self.timing.poll_ms > 2 * self.timing.settle_ms {
            // Confirmation latency grows to two poll periods.
            warn!(
                "Poll interval {}ms is long compared to settle time {}ms",
                self.timing.poll_ms, self.timing.settle_ms
            );
        }

        let mut indices = HashSet::new();
        let mut names = HashSet::new();
        for input in &self.inputs {
            if input.index >= input_count {
                return Err(ConfigError::InputOutOfRange {
                    name: input.name.clone(),
                    index: input.index,
                    count: input_count,
                });
            }
            if !indices.insert(input.index) {
                return Err(ConfigError::DuplicateIndex(input.index));
            }
            check_topic_level(&input.name)?;
            if !names.insert(input.name.as_str()) {
                return Err(ConfigError::DuplicateName(input.name.clone()));
            }
        }

        let mut outputs = HashSet::new();
        let mut siren_names = HashSet::new();
        for siren in &self.sirens {
            if !outputs.insert(siren.output) {
                return Err(ConfigError::DuplicateOutput(siren.output));
            }
            check_topic_level(&siren.name)?;
            if !siren_names.insert(siren.name.as_str()) {
                return Err(ConfigError::DuplicateName(siren.name.clone()));
            }
        }

        Ok(())
    }
}

fn check_topic_level(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains(['/', '+', '#']) || name.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}
