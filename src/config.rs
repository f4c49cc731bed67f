use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::services::composer::ServingPolicy;
use crate::services::computer::model_recs::ModelWeighting;
use crate::services::factorization::FactorizationParams;
use crate::services::retry::RetryPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis connection URL (candidate cache and event stream)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// CSV file holding the flushed interaction history
    #[serde(default = "default_interactions_path")]
    pub interactions_path: PathBuf,

    /// Remove the interaction log left over from a previous run
    #[serde(default)]
    pub reset_log_on_start: bool,

    /// Redis stream the interaction events arrive on
    #[serde(default = "default_event_stream")]
    pub event_stream: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Must stay the same across restarts so unacknowledged events are
    /// replayed; every concurrently running replica needs its own name
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Connection attempts before a transport is declared unreachable
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_connect_backoff_secs")]
    pub connect_backoff_secs: u64,

    /// Seconds between ingestor flushes to the interaction log
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_top_items_interval_secs")]
    pub top_items_interval_secs: u64,

    #[serde(default = "default_model_interval_secs")]
    pub model_interval_secs: u64,

    #[serde(default = "default_novel_items_interval_secs")]
    pub novel_items_interval_secs: u64,

    /// Length of the global top-items tier
    #[serde(default = "default_top_items_limit")]
    pub top_items_limit: usize,

    /// Size of every serving result
    #[serde(default = "default_recs_k")]
    pub recs_k: usize,

    /// Probability of answering with a fully random exploration sample
    #[serde(default = "default_recs_epsilon")]
    pub recs_epsilon: f64,

    #[serde(default = "default_true")]
    pub model_tier_enabled: bool,

    #[serde(default = "default_true")]
    pub top_items_tier_enabled: bool,

    #[serde(default = "default_true")]
    pub novel_items_tier_enabled: bool,

    #[serde(default)]
    pub model_weighting: ModelWeighting,

    #[serde(default = "default_model_factors")]
    pub model_factors: usize,

    #[serde(default = "default_model_epochs")]
    pub model_epochs: usize,

    #[serde(default = "default_model_seed")]
    pub model_seed: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5001
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_interactions_path() -> PathBuf {
    PathBuf::from("data/interactions.csv")
}

fn default_event_stream() -> String {
    "user_interactions".to_string()
}

fn default_consumer_group() -> String {
    "recs_pipeline".to_string()
}

fn default_consumer_name() -> String {
    "ingestor".to_string()
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_backoff_secs() -> u64 {
    2
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_top_items_interval_secs() -> u64 {
    10
}

fn default_model_interval_secs() -> u64 {
    30
}

fn default_novel_items_interval_secs() -> u64 {
    5
}

fn default_top_items_limit() -> usize {
    100
}

fn default_recs_k() -> usize {
    10
}

fn default_recs_epsilon() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

fn default_model_factors() -> usize {
    16
}

fn default_model_epochs() -> usize {
    30
}

fn default_model_seed() -> u64 {
    42
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.recs_k == 0 {
            anyhow::bail!("RECS_K must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.recs_epsilon) {
            anyhow::bail!("RECS_EPSILON must lie in [0, 1], got {}", self.recs_epsilon);
        }
        if self.connect_attempts == 0 {
            anyhow::bail!("CONNECT_ATTEMPTS must be at least 1");
        }
        Ok(())
    }

    pub fn serving_policy(&self) -> ServingPolicy {
        ServingPolicy {
            k: self.recs_k,
            epsilon: self.recs_epsilon,
            model_tier_enabled: self.model_tier_enabled,
            top_items_tier_enabled: self.top_items_tier_enabled,
            novel_items_tier_enabled: self.novel_items_tier_enabled,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            backoff: Duration::from_secs(self.connect_backoff_secs),
        }
    }

    pub fn factorization_params(&self) -> FactorizationParams {
        FactorizationParams {
            factors: self.model_factors,
            epochs: self.model_epochs,
            seed: self.model_seed,
            ..FactorizationParams::default()
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}
