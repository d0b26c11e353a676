//! Pipeline runner
//!
//! ```text
//!  partition 0 ─▶ decode ─▶ MaterializedTable ─▶ EnrichmentMapper ─▶ Publisher
//!  partition 1 ─▶ decode ─▶ MaterializedTable ─▶ EnrichmentMapper ─▶ Publisher
//!                                                      │
//!                                               LookupGateway ─▶ pool
//! ```
//!
//! Every input partition runs in its own task with its own table. Records
//! of a partition are processed strictly one after another, so output for a
//! key is published in input order. The pool and the publisher are shared.

use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::Arc;
use streamagg_cdc::{ChangeCodec, MaterializedTable, SchemaEnvelope};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::ErrorPolicy;
use crate::enrich::{Emit, EnrichmentMapper};
use crate::error::{PipelineError, Result};
use crate::metrics::PipelineMetrics;
use crate::model::{ChangeKey, OrderEntity};
use crate::publisher::Publisher;
use crate::source::RawRecord;

/// Materialized view of one partition of the orders stream
pub type OrderTable = MaterializedTable<ChangeKey, OrderEntity>;

/// Processes the records of one input partition
pub struct PartitionPipeline {
    partition: i32,
    codec: ChangeCodec<ChangeKey, OrderEntity>,
    table: OrderTable,
    mapper: Arc<EnrichmentMapper>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<PipelineMetrics>,
    on_error: ErrorPolicy,
}

impl std::fmt::Debug for PartitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionPipeline")
            .field("partition", &self.partition)
            .field("keys", &self.table.len())
            .field("on_error", &self.on_error)
            .finish()
    }
}

impl PartitionPipeline {
    /// Create a runner with an empty table
    pub fn new(
        partition: i32,
        mapper: Arc<EnrichmentMapper>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            partition,
            codec: ChangeCodec::default(),
            table: OrderTable::new(),
            mapper,
            publisher,
            metrics,
            on_error: ErrorPolicy::default(),
        }
    }

    /// Set the error policy
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Set how the `{schema, payload}` wrapper is handled
    pub fn with_schema_envelope(mut self, mode: SchemaEnvelope) -> Self {
        self.codec = ChangeCodec::new(mode);
        self
    }

    /// Input partition
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Current materialized view
    pub fn table(&self) -> &OrderTable {
        &self.table
    }

    /// Process one record under the error policy.
    ///
    /// Returns an error only when the partition must stop.
    pub async fn process(&mut self, record: RawRecord) -> Result<()> {
        self.metrics.record_consumed();

        let err = match self.handle(record).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        self.metrics.record_error();
        if self.on_error == ErrorPolicy::Skip && err.is_record_error() {
            warn!(partition = self.partition, error = %err, "skipping record");
            self.metrics.record_skipped();
            return Ok(());
        }
        Err(err)
    }

    async fn handle(&mut self, record: RawRecord) -> Result<()> {
        let position = record.position;

        let change = self
            .codec
            .decode(record.key.as_deref(), record.value.as_deref(), position)
            .map_err(|source| PipelineError::Malformed { position, source })?;

        let update = self
            .table
            .apply(change)
            .map_err(|source| PipelineError::Malformed { position, source })?;

        let Some(update) = update else {
            debug!(%position, "no change to the table");
            return Ok(());
        };
        self.metrics.record_changelog_update();

        let emit = self
            .mapper
            .map(&update.key, update.value.as_ref())
            .await
            .map_err(|source| PipelineError::Enrich { position, source })?;

        match emit {
            Emit::Record(order) => {
                self.publisher.publish(&update.key, Some(&order)).await?;
                self.metrics.record_published();
            }
            Emit::Tombstone => {
                self.publisher.publish(&update.key, None).await?;
                self.metrics.record_tombstone();
            }
            Emit::Skip => self.metrics.record_delete_dropped(),
        }
        debug!(key = %update.key, cause = ?update.cause, %position, "processed");
        Ok(())
    }

    /// Consume `stream` until it ends, shutdown is signalled, or a record
    /// fails under the `fail` policy.
    pub async fn run<S>(
        mut self,
        mut stream: S,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()>
    where
        S: Stream<Item = Result<RawRecord>> + Unpin + Send,
    {
        info!(partition = self.partition, "partition started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(partition = self.partition, "partition shutting down");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(record)) => self.process(record).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        info!(partition = self.partition, "input ended");
                        break;
                    }
                },
            }
        }

        let stats = self.table.stats();
        info!(
            partition = self.partition,
            keys = self.table.len(),
            upserts = stats.upserts,
            deletes = stats.deletes,
            ignored_deletes = stats.ignored_deletes,
            "partition stopped"
        );
        Ok(())
    }
}

/// Runs one [`PartitionPipeline`] per input partition
pub struct Pipeline {
    mapper: Arc<EnrichmentMapper>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<PipelineMetrics>,
    on_error: ErrorPolicy,
    schema_envelope: SchemaEnvelope,
}

impl Pipeline {
    /// Create a pipeline
    pub fn new(
        mapper: EnrichmentMapper,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            mapper: Arc::new(mapper),
            publisher,
            metrics,
            on_error: ErrorPolicy::default(),
            schema_envelope: SchemaEnvelope::default(),
        }
    }

    /// Set the error policy for every partition
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Set the schema wrapper handling for every partition
    pub fn with_schema_envelope(mut self, mode: SchemaEnvelope) -> Self {
        self.schema_envelope = mode;
        self
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Runner for one partition
    pub fn partition(&self, partition: i32) -> PartitionPipeline {
        PartitionPipeline::new(
            partition,
            self.mapper.clone(),
            self.publisher.clone(),
            self.metrics.clone(),
        )
        .with_error_policy(self.on_error)
        .with_schema_envelope(self.schema_envelope)
    }

    /// Run every partition until its input ends or shutdown is signalled.
    ///
    /// A partition that fails signals shutdown to all others. The first
    /// failure is returned once every partition has stopped.
    pub async fn run(
        &self,
        streams: Vec<(i32, BoxStream<'static, Result<RawRecord>>)>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<()> {
        let mut tasks = Vec::with_capacity(streams.len());

        for (partition, stream) in streams {
            let worker = self.partition(partition);
            let shutdown_rx = shutdown_tx.subscribe();
            let shutdown_tx = shutdown_tx.clone();

            tasks.push(tokio::spawn(async move {
                let result = worker.run(stream, shutdown_rx).await;
                if let Err(e) = &result {
                    error!(partition, error = %e, "partition failed, stopping pipeline");
                    let _ = shutdown_tx.send(());
                }
                result
            }));
        }

        info!(partitions = tasks.len(), "pipeline running");

        let mut first_error = None;
        for joined in futures::future::join_all(tasks).await {
            let result = joined.map_err(PipelineError::from).and_then(|r| r);
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        self.publisher.flush().await?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
