//! Kafka change-stream source
//!
//! One fetch stream per input partition, built on the pure-Rust `rskafka`
//! client. There is no consumer group: each partition starts at the
//! configured [`StartOffset`] and the materialized table is rebuilt by
//! replay on every start.

use futures::stream::BoxStream;
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use std::sync::Arc;
use std::time::Duration;
use streamagg_cdc::StreamPosition;
use tracing::{debug, info, warn};

use crate::config::{KafkaConfig, StartOffset};
use crate::error::{PipelineError, Result};

/// An undecoded record read from the change stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Record key bytes
    pub key: Option<Vec<u8>>,
    /// Record value bytes; `None` for a tombstone
    pub value: Option<Vec<u8>>,
    /// Where the record was read
    pub position: StreamPosition,
}

impl RawRecord {
    /// Create a record
    pub fn new(key: Option<Vec<u8>>, value: Option<Vec<u8>>, position: StreamPosition) -> Self {
        Self {
            key,
            value,
            position,
        }
    }
}

/// Create an rskafka client for the configured brokers.
pub async fn create_client(config: &KafkaConfig) -> Result<Client> {
    let brokers = &config.bootstrap_servers;
    let limit = Duration::from_millis(config.connect_timeout_ms);
    let connect = ClientBuilder::new(brokers.clone()).build();
    let Ok(built) = tokio::time::timeout(limit, connect).await else {
        return Err(PipelineError::connection(format!(
            "no answer from brokers {brokers:?} within {}ms",
            config.connect_timeout_ms
        )));
    };
    built.map_err(|e| PipelineError::connection(format!("Kafka bootstrap failed: {e}")))
}

/// Partition ids of `topic`, sorted ascending.
pub async fn partition_ids(client: &Client, topic: &str) -> Result<Vec<i32>> {
    let topics = client.list_topics().await?;
    let found = topics
        .into_iter()
        .find(|t| t.name == topic)
        .ok_or_else(|| PipelineError::connection(format!("topic {topic} does not exist")))?;

    let mut ids: Vec<i32> = found.partitions.into_iter().collect();
    ids.sort_unstable();
    if ids.is_empty() {
        return Err(PipelineError::connection(format!(
            "topic {topic} has no partitions"
        )));
    }
    Ok(ids)
}

/// Reads the Debezium change topic
pub struct KafkaChangeSource {
    client: Arc<Client>,
    config: KafkaConfig,
}

impl std::fmt::Debug for KafkaChangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaChangeSource")
            .field("topic", &self.config.input_topic)
            .field("start_offset", &self.config.start_offset)
            .finish()
    }
}

impl KafkaChangeSource {
    /// Create a source over an existing client
    pub fn new(client: Arc<Client>, config: KafkaConfig) -> Self {
        Self { client, config }
    }

    /// Input topic
    pub fn topic(&self) -> &str {
        &self.config.input_topic
    }

    /// Partitions of the input topic
    pub async fn partitions(&self) -> Result<Vec<i32>> {
        partition_ids(&self.client, &self.config.input_topic).await
    }

    /// Endless stream of records from one partition, in offset order.
    ///
    /// Fetch errors are retried with exponential backoff; only a failure to
    /// resolve the start offset ends the stream with an error.
    pub async fn partition_stream(
        &self,
        partition: i32,
    ) -> Result<BoxStream<'static, Result<RawRecord>>> {
        let partition_client: PartitionClient = self
            .client
            .partition_client(
                self.config.input_topic.clone(),
                partition,
                UnknownTopicHandling::Retry,
            )
            .await?;
        let partition_client = Arc::new(partition_client);

        let topic = self.config.input_topic.clone();
        let offset_at = match self.config.start_offset {
            StartOffset::Earliest => OffsetAt::Earliest,
            StartOffset::Latest => OffsetAt::Latest,
        };
        let fetch_max_bytes = self.config.fetch_max_bytes;
        let max_wait_ms = self.config.max_wait_ms;
        let empty_poll_delay_ms = self.config.empty_poll_delay_ms;
        let retry_initial_ms = self.config.retry_initial_ms;
        let retry_max_ms = self.config.retry_max_ms;

        let stream = async_stream::stream! {
            let mut current_offset = match partition_client.get_offset(offset_at).await {
                Ok(o) => o,
                Err(e) => {
                    yield Err(PipelineError::connection(format!(
                        "Failed to get start offset for {topic}/{partition}: {e}"
                    )));
                    return;
                }
            };
            let mut current_backoff_ms = retry_initial_ms;

            info!(
                topic = %topic,
                partition,
                offset = current_offset,
                "partition reader starting"
            );

            loop {
                let records = match partition_client
                    .fetch_records(current_offset, 1..fetch_max_bytes, max_wait_ms)
                    .await
                {
                    Ok((records, _high_watermark)) => {
                        current_backoff_ms = retry_initial_ms;
                        records
                    }
                    Err(e) => {
                        warn!(
                            partition,
                            "Failed to fetch records (backoff {}ms): {}", current_backoff_ms, e
                        );
                        tokio::time::sleep(Duration::from_millis(current_backoff_ms)).await;
                        current_backoff_ms = (current_backoff_ms * 2).min(retry_max_ms);
                        continue;
                    }
                };

                if records.is_empty() {
                    tokio::time::sleep(Duration::from_millis(empty_poll_delay_ms)).await;
                    continue;
                }

                debug!(partition, count = records.len(), "fetched");
                for record_and_offset in records {
                    // Fetches may return records before the requested offset
                    // when it falls inside a compressed batch.
                    if record_and_offset.offset < current_offset {
                        continue;
                    }
                    current_offset = record_and_offset.offset + 1;

                    let record = record_and_offset.record;
                    yield Ok(RawRecord::new(
                        record.key,
                        record.value,
                        StreamPosition::new(partition, record_and_offset.offset),
                    ));
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
