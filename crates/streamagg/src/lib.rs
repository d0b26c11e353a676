//! # streamagg
//!
//! Streaming join of a Debezium `orders` change stream with the `products`
//! and `customers` reference tables.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐   ┌───────────┐
//! │ orders topic │──▶│ MaterializedTable│──▶│ EnrichmentMapper │──▶│ Publisher │──▶ output topic
//! │  (Debezium)  │   │  latest per key  │   │ product+customer │   │  (Kafka)  │
//! └──────────────┘   └──────────────────┘   └────────┬─────────┘   └───────────┘
//!                                                    │ point lookups
//!                                           ┌────────▼────────┐
//!                                           │ reference store │
//!                                           │ MySQL/Postgres  │
//!                                           └─────────────────┘
//! ```
//!
//! Each input partition is processed by its own [`PartitionPipeline`];
//! lookups borrow connections from a shared
//! [`ConnectionPool`](streamagg_rdbc::prelude::ConnectionPool). Output
//! records keep the input key and carry the order joined with its product
//! and customer, either of which may be `null`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod enrich;
pub mod error;
pub mod lookup;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod publisher;
pub mod source;
pub mod testing;

pub use config::{ErrorPolicy, PipelineConfig, StartOffset};
pub use enrich::{epoch_day_to_utc, Emit, EnrichmentMapper};
pub use error::{EnrichError, LookupError, PipelineError, Result};
pub use lookup::{LookupGateway, Reference, ReferenceKind};
pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};
pub use model::{ChangeKey, Customer, EnrichedOrder, OrderEntity, Product};
pub use pipeline::{OrderTable, PartitionPipeline, Pipeline};
pub use publisher::{
    CompressionCodec, KafkaPublisher, LogPublisher, MemoryPublisher, PublishedRecord, Publisher,
};
pub use source::{KafkaChangeSource, RawRecord};
pub use streamagg_cdc::DeletePolicy;
