//! Pipeline configuration
//!
//! Loaded from an optional YAML file with `${VAR}` / `${VAR:-default}`
//! expansion, then overridden by command-line arguments and validated.
//!
//! ```yaml
//! kafka:
//!   bootstrap_servers: ["${KAFKA_BROKERS:-localhost:9092}"]
//!   input_topic: dbserver1.inventory.orders
//!   output_topic: orders.enriched
//!   start_offset: earliest
//! database:
//!   url: ${DATABASE_URL}
//!   max_connections: 4
//! processing:
//!   delete_policy: tombstone
//!   on_error: fail
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use streamagg_cdc::{DeletePolicy, SchemaEnvelope};
use streamagg_rdbc::prelude::{redact_url, PoolConfig};
use validator::Validate;

use crate::publisher::CompressionCodec;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct PipelineConfig {
    /// Input and output streams
    #[serde(default)]
    #[validate(nested)]
    pub kafka: KafkaConfig,

    /// Reference store
    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Record handling
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Where a partition starts reading when the pipeline boots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Replay the whole topic (rebuilds the table)
    #[default]
    Earliest,
    /// Only records produced after startup
    Latest,
}

/// Kafka settings
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct KafkaConfig {
    /// Bootstrap brokers
    #[serde(default)]
    #[validate(length(min = 1))]
    pub bootstrap_servers: Vec<String>,

    /// Debezium change topic for the orders table
    #[serde(default)]
    #[validate(length(min = 1, max = 249))]
    pub input_topic: String,

    /// Topic receiving enriched orders
    #[serde(default)]
    #[validate(length(min = 1, max = 249))]
    pub output_topic: String,

    /// Start position when no offset is known
    #[serde(default)]
    pub start_offset: StartOffset,

    /// Upper bound of bytes per fetch
    #[serde(default = "default_fetch_max_bytes")]
    #[validate(range(min = 1024, max = 104_857_600))]
    pub fetch_max_bytes: i32,

    /// Broker-side wait for data per fetch
    #[serde(default = "default_max_wait_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub max_wait_ms: i32,

    /// Sleep after a fetch that returned nothing
    #[serde(default = "default_empty_poll_delay_ms")]
    pub empty_poll_delay_ms: u64,

    /// Initial backoff after a failed fetch
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Output compression
    #[serde(default)]
    pub compression: CompressionCodec,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 100))]
    pub connect_timeout_ms: u64,
}

fn default_fetch_max_bytes() -> i32 {
    1024 * 1024
}

fn default_max_wait_ms() -> i32 {
    500
}

fn default_empty_poll_delay_ms() -> u64 {
    100
}

fn default_retry_initial_ms() -> u64 {
    100
}

fn default_retry_max_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            input_topic: String::new(),
            output_topic: String::new(),
            start_offset: StartOffset::default(),
            fetch_max_bytes: default_fetch_max_bytes(),
            max_wait_ms: default_max_wait_ms(),
            empty_poll_delay_ms: default_empty_poll_delay_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            compression: CompressionCodec::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Reference store settings
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    /// Connection URL, `mysql://` or `postgres://`
    #[serde(default)]
    #[validate(length(min = 1))]
    pub url: String,

    /// Connections opened at startup
    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    /// Pool ceiling
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1, max = 1000))]
    pub max_connections: usize,

    /// Wait for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Deadline for one reference lookup
    #[serde(default = "default_lookup_timeout_ms")]
    #[validate(range(min = 1))]
    pub lookup_timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_db_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_min_connections() -> usize {
    1
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_lookup_timeout_ms() -> u64 {
    5_000
}

fn default_db_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            connect_timeout_ms: default_db_connect_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact_url(&self.url))
            .field("min_connections", &self.min_connections)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("lookup_timeout_ms", &self.lookup_timeout_ms)
            .finish()
    }
}

impl DatabaseConfig {
    /// Pool settings for this store
    pub fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::new(self.url.clone())
            .with_min_size(self.min_connections)
            .with_max_size(self.max_connections)
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms));
        pool.connection.connect_timeout_ms = self.connect_timeout_ms;
        pool
    }

    /// Per-lookup deadline
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// What a partition does with a record it cannot process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the pipeline with the error
    #[default]
    Fail,
    /// Log, count, and continue with the next record
    Skip,
}

/// Record handling
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Output for deleted orders
    #[serde(default)]
    pub delete_policy: DeletePolicy,

    /// Handling of malformed records and failed enrichments
    #[serde(default)]
    pub on_error: ErrorPolicy,

    /// Handling of the Debezium `{schema, payload}` wrapper
    #[serde(default)]
    pub schema_envelope: SchemaEnvelope,

    /// Also log every output record
    #[serde(default)]
    pub print_output: bool,
}

impl PipelineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        serde_yaml::from_str(&expanded).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        Validate::validate(self).map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        if self.kafka.bootstrap_servers.iter().any(|b| b.trim().is_empty()) {
            anyhow::bail!("kafka.bootstrap_servers contains an empty address");
        }
        if self.kafka.input_topic == self.kafka.output_topic {
            anyhow::bail!(
                "input and output topic must differ (both are '{}')",
                self.kafka.input_topic
            );
        }
        if self.kafka.retry_initial_ms > self.kafka.retry_max_ms {
            anyhow::bail!(
                "kafka.retry_initial_ms ({}) exceeds kafka.retry_max_ms ({})",
                self.kafka.retry_initial_ms,
                self.kafka.retry_max_ms
            );
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }
        self.database
            .pool_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid database settings: {}", e))?;

        Ok(())
    }
}
