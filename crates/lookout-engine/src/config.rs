use crate::recognition::LoopSettings;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const STORE_FILE_NAME: &str = "face-db.json";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("match threshold must be positive and finite, got {0}")]
    InvalidThreshold(f32),
    #[error("tick interval must be at least 1 ms")]
    ZeroTickInterval,
}

/// Runtime configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the JSON gallery store.
    pub store_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    /// Interval between recognition ticks, in milliseconds.
    pub tick_interval_ms: u64,
}

impl Config {
    /// Load configuration from `LOOKOUT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("lookout");

        let store_path = var("LOOKOUT_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(STORE_FILE_NAME));

        Self {
            store_path,
            match_threshold: parse_or(&var, "LOOKOUT_MATCH_THRESHOLD", lookout_core::DEFAULT_MATCH_THRESHOLD),
            tick_interval_ms: parse_or(&var, "LOOKOUT_TICK_INTERVAL_MS", 250),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.loop_settings().validate()
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            match_threshold: self.match_threshold,
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            default
        }),
        None => default,
    }
}
