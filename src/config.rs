//! Configuration types for dm-archiver

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for [`DmArchiver`](crate::DmArchiver)
///
/// Every field has a sensible default; `Config::default()` works out of the
/// box against the public Discord API. Durations are serialized as integer
/// seconds (`retry` delays) or milliseconds (`page_delay`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat service HTTP API (default: Discord v10)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Directory for per-conversation archive documents (default: "./conversations")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for downloaded attachments, namespaced by channel id
    /// (default: "./attachments")
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,

    /// Path of the shared checkpoint file (default: "./archive_checkpoint.json")
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,

    /// Maximum number of channels archived concurrently (default: 3)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_channels: usize,

    /// Messages requested per history page, service maximum is 100 (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Fixed pacing delay between history pages, applied regardless of
    /// rate-limit signals to stay under the service's soft limits (default: 100ms)
    #[serde(default = "default_page_delay", with = "duration_millis_serde")]
    pub page_delay: Duration,

    /// Retry behavior for transient request failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            output_dir: default_output_dir(),
            attachment_dir: default_attachment_dir(),
            checkpoint_file: default_checkpoint_file(),
            max_concurrent_channels: default_max_concurrent(),
            batch_size: default_batch_size(),
            page_delay: default_page_delay(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient request failures
///
/// The defaults reproduce a deterministic `2^attempt`-seconds backoff
/// schedule (1s, 2s, 4s, 8s) over a 5-attempt ceiling. Jitter is off by
/// default; embedders running many instances against the same service may
/// want it on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per logical request, including the first
    /// (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to backoff delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./conversations")
}

fn default_attachment_dir() -> PathBuf {
    PathBuf::from("./attachments")
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("./archive_checkpoint.json")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_batch_size() -> usize {
    100
}

fn default_page_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (integer seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (integer milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
