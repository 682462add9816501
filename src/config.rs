use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregation::matcher::MAX_SCORE;
use crate::error::AggregationError;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "CONFLUX_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Name-level confidence needed to merge automatically.
    #[serde(default = "default_primary_threshold")]
    pub primary_threshold: i32,

    /// Confidence needed once email or phone evidence narrowed the candidates.
    #[serde(default = "default_secondary_threshold")]
    pub secondary_threshold: i32,

    /// Lowest score offered as a suggestion.
    #[serde(default = "default_suggest_threshold")]
    pub suggest_threshold: i32,

    /// Row cap for each identity and name candidate query.
    #[serde(default = "default_primary_hit_limit")]
    pub primary_hit_limit: usize,

    /// More secondary candidates than this are treated as shared data
    /// (an office switchboard, a team mailbox) rather than evidence.
    #[serde(default = "default_secondary_hit_limit")]
    pub secondary_hit_limit: usize,

    /// Row cap for each approximate name bucket scan.
    #[serde(default = "default_approximate_hit_limit")]
    pub approximate_hit_limit: usize,

    /// Require phone numbers to match digit for digit.
    #[serde(default)]
    pub strict_phone_matching: bool,
}

fn default_primary_threshold() -> i32 {
    70
}

fn default_secondary_threshold() -> i32 {
    50
}

fn default_suggest_threshold() -> i32 {
    40
}

fn default_primary_hit_limit() -> usize {
    15
}

fn default_secondary_hit_limit() -> usize {
    20
}

fn default_approximate_hit_limit() -> usize {
    100
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            primary_threshold: default_primary_threshold(),
            secondary_threshold: default_secondary_threshold(),
            suggest_threshold: default_suggest_threshold(),
            primary_hit_limit: default_primary_hit_limit(),
            secondary_hit_limit: default_secondary_hit_limit(),
            approximate_hit_limit: default_approximate_hit_limit(),
            strict_phone_matching: false,
        }
    }
}

impl AggregationConfig {
    /// Thresholds must satisfy `0 < suggest < secondary < primary <= MAX_SCORE`
    /// and every hit limit must be positive.
    pub fn validate(&self) -> Result<(), AggregationError> {
        if !(0 < self.suggest_threshold
            && self.suggest_threshold < self.secondary_threshold
            && self.secondary_threshold < self.primary_threshold
            && self.primary_threshold <= MAX_SCORE)
        {
            return Err(AggregationError::InvalidConfig(format!(
                "thresholds must satisfy 0 < suggest ({}) < secondary ({}) < primary ({}) <= {}",
                self.suggest_threshold, self.secondary_threshold, self.primary_threshold, MAX_SCORE
            )));
        }
        if self.primary_hit_limit == 0 || self.secondary_hit_limit == 0 || self.approximate_hit_limit == 0 {
            return Err(AggregationError::InvalidConfig(
                "hit limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file when journald is unavailable.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Level for conflux's own events; dependencies stay at `warn`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log every aggregation decision at `debug`, whatever `level` says.
    #[serde(default)]
    pub decisions: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
            decisions: false,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conflux")
        .join("contacts.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            aggregation: AggregationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, `$CONFLUX_CONFIG`, or the default location.
    ///
    /// A missing file at the default location is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path(),
        };

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.aggregation.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("conflux")
            .join("config.toml")
    }
}
