//! Output publishers
//!
//! | Publisher          | Destination                         |
//! |--------------------|-------------------------------------|
//! | [`KafkaPublisher`] | output topic via rskafka            |
//! | [`MemoryPublisher`]| in-process buffer (tests, dry runs) |
//! | [`LogPublisher`]   | `tracing` output, then an inner one |
//!
//! Records keep the input key, encoded as `{"id": n}`. Delivery is
//! at-least-once.

use async_trait::async_trait;
use parking_lot::Mutex;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::Client;
use rskafka::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use streamagg_cdc::JsonCodec;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::model::{ChangeKey, EnrichedOrder};

/// Destination for enriched records
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a record; `None` publishes a tombstone
    async fn publish(&self, key: &ChangeKey, value: Option<&EnrichedOrder>) -> Result<()>;

    /// Wait until everything published so far is durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Output compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    /// No compression
    #[default]
    None,
    /// Gzip
    Gzip,
    /// Snappy
    Snappy,
    /// LZ4
    Lz4,
    /// Zstandard
    Zstd,
}

impl From<CompressionCodec> for Compression {
    fn from(codec: CompressionCodec) -> Self {
        match codec {
            CompressionCodec::None => Compression::NoCompression,
            CompressionCodec::Gzip => Compression::Gzip,
            CompressionCodec::Snappy => Compression::Snappy,
            CompressionCodec::Lz4 => Compression::Lz4,
            CompressionCodec::Zstd => Compression::Zstd,
        }
    }
}

/// Kafka's murmur2 hash, as used by the default Java partitioner
fn murmur2(data: &[u8]) -> i32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let len = data.len();
    let mut h: u32 = SEED ^ (len as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

/// Partition for an encoded key, matching Kafka's default partitioner
pub fn partition_for_key(key: &[u8], partitions: usize) -> usize {
    let positive = (murmur2(key) & 0x7fff_ffff) as usize;
    positive % partitions.max(1)
}

/// Publishes to a Kafka topic, one partition client per partition
pub struct KafkaPublisher {
    topic: String,
    partitions: Vec<PartitionClient>,
    compression: CompressionCodec,
    codec: JsonCodec,
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("topic", &self.topic)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

impl KafkaPublisher {
    /// Connect partition clients for every partition of `topic`
    pub async fn new(
        client: &Client,
        topic: impl Into<String>,
        compression: CompressionCodec,
    ) -> Result<Self> {
        let topic = topic.into();
        let count = crate::source::partition_ids(client, &topic).await?.len();

        let mut partitions = Vec::with_capacity(count);
        for partition in 0..count as i32 {
            let pc = client
                .partition_client(topic.clone(), partition, UnknownTopicHandling::Retry)
                .await?;
            partitions.push(pc);
        }

        info!(topic = %topic, partitions = count, "output topic ready");
        Ok(Self {
            topic,
            partitions,
            compression,
            codec: JsonCodec,
        })
    }

    /// Output topic
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, key: &ChangeKey, value: Option<&EnrichedOrder>) -> Result<()> {
        let key_bytes = self.codec.encode(key)?;
        let value_bytes = value.map(|v| self.codec.encode(v)).transpose()?;

        let idx = partition_for_key(&key_bytes, self.partitions.len());
        let partition = self.partitions.get(idx).ok_or_else(|| {
            PipelineError::publish(format!("topic {} has no partitions", self.topic))
        })?;

        let record = Record {
            key: Some(key_bytes),
            value: value_bytes,
            headers: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        };

        // Produce returns once the broker acknowledged the batch
        let offsets = partition
            .produce(vec![record], self.compression.into())
            .await?;
        debug!(%key, partition = idx, offset = ?offsets.first(), "published");
        Ok(())
    }
}

/// A record captured by [`MemoryPublisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    /// Output key
    pub key: ChangeKey,
    /// Output value, `None` for a tombstone
    pub value: Option<EnrichedOrder>,
}

/// Keeps published records in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    records: Mutex<Vec<PublishedRecord>>,
}

impl MemoryPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order
    pub fn records(&self) -> Vec<PublishedRecord> {
        self.records.lock().clone()
    }

    /// Number of published records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was published
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drain the buffer
    pub fn take(&self) -> Vec<PublishedRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, key: &ChangeKey, value: Option<&EnrichedOrder>) -> Result<()> {
        self.records.lock().push(PublishedRecord {
            key: *key,
            value: value.cloned(),
        });
        Ok(())
    }
}

/// Logs each record as JSON at `info`, then hands it to an inner publisher
pub struct LogPublisher {
    inner: Arc<dyn Publisher>,
    codec: JsonCodec,
}

impl LogPublisher {
    /// Wrap a publisher
    pub fn new(inner: Arc<dyn Publisher>) -> Self {
        Self {
            inner,
            codec: JsonCodec,
        }
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, key: &ChangeKey, value: Option<&EnrichedOrder>) -> Result<()> {
        let rendered = match value {
            Some(v) => String::from_utf8_lossy(&self.codec.encode(v)?).into_owned(),
            None => "null".to_string(),
        };
        info!(target: "streamagg::output", key = key.id, value = %rendered, "output record");
        self.inner.publish(key, value).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_matches_kafka() {
        // Reference values from org.apache.kafka.common.utils.Utils.murmur2
        assert_eq!(murmur2(b"21"), -973932308);
        assert_eq!(murmur2(b"foobar"), -790332482);
        assert_eq!(murmur2(b"a-little-bit-long-string"), -985981536);
        assert_eq!(murmur2(b"a-little-bit-longer-string"), -1486304829);
        assert_eq!(murmur2(b"abc"), 479470107);
    }

    #[test]
    fn test_partition_for_key_is_stable() {
        let key = br#"{"id":1}"#;
        let p = partition_for_key(key, 6);
        assert!(p < 6);
        assert_eq!(partition_for_key(key, 6), p);
        assert_eq!(partition_for_key(key, 1), 0);
        assert_eq!(partition_for_key(key, 0), 0);
    }

    #[test]
    fn test_compression_mapping() {
        assert!(matches!(
            Compression::from(CompressionCodec::None),
            Compression::NoCompression
        ));
        assert!(matches!(
            Compression::from(CompressionCodec::Zstd),
            Compression::Zstd
        ));
    }

    #[tokio::test]
    async fn test_memory_publisher() {
        let publisher = MemoryPublisher::new();
        publisher.publish(&ChangeKey::new(1), None).await.unwrap();
        assert_eq!(publisher.len(), 1);
        let records = publisher.take();
        assert_eq!(records[0].key, ChangeKey::new(1));
        assert!(records[0].value.is_none());
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn test_log_publisher_delegates() {
        let memory = Arc::new(MemoryPublisher::new());
        let publisher = LogPublisher::new(memory.clone());
        publisher.publish(&ChangeKey::new(7), None).await.unwrap();
        publisher.flush().await.unwrap();
        assert_eq!(memory.records()[0].key.id, 7);
    }
}
