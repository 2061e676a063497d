// Monitor configuration loading
use std::path::PathBuf;

use serde::Deserialize;

use crate::application::inbox::DEFAULT_INBOX_CAPACITY;
use crate::domain::history;
use crate::error::MonitorResult;

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub broker: BrokerSettings,
    pub topics: TopicSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TopicSettings {
    pub sensors: String,
    pub commands: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Consumer tick cadence in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            history_capacity: default_history_capacity(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file_prefix: default_file_prefix(),
            directory: default_log_directory(),
        }
    }
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_history_capacity() -> usize {
    history::DEFAULT_CAPACITY
}

fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

fn default_file_prefix() -> String {
    "power_log".to_string()
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

pub fn load_monitor_config() -> MonitorResult<MonitorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/monitor"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
