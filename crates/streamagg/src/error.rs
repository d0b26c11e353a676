//! Error types for the enrichment pipeline
//!
//! - [`LookupError`]: the reference store could not answer
//! - [`EnrichError`]: a changelog update could not be turned into output
//! - [`PipelineError`]: anything that stops a partition

use streamagg_cdc::{CdcError, StreamPosition};
use thiserror::Error;

use crate::lookup::ReferenceKind;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Reference lookup failures.
///
/// An id with no row is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum LookupError {
    /// No connection could be borrowed from the pool
    #[error("no connection for {kind} lookup of id {id}: {source}")]
    Connection {
        /// Reference table queried
        kind: ReferenceKind,
        /// Primary key looked up
        id: i64,
        /// Store error
        #[source]
        source: streamagg_rdbc::Error,
    },

    /// The query failed on the store
    #[error("{kind} lookup of id {id} failed: {source}")]
    Query {
        /// Reference table queried
        kind: ReferenceKind,
        /// Primary key looked up
        id: i64,
        /// Store error
        #[source]
        source: streamagg_rdbc::Error,
    },

    /// The lookup did not finish within the configured deadline
    #[error("{kind} lookup of id {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Reference table queried
        kind: ReferenceKind,
        /// Primary key looked up
        id: i64,
        /// Deadline that expired
        timeout_ms: u64,
    },

    /// A row came back but could not be read into the entity
    #[error("{kind} row for id {id} is unreadable: {source}")]
    Decode {
        /// Reference table queried
        kind: ReferenceKind,
        /// Primary key looked up
        id: i64,
        /// Store error
        #[source]
        source: streamagg_rdbc::Error,
    },
}

impl LookupError {
    /// Which reference the failing lookup was for
    pub fn kind(&self) -> ReferenceKind {
        match self {
            Self::Connection { kind, .. }
            | Self::Query { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Decode { kind, .. } => *kind,
        }
    }

    /// Whether the store could not be reached or did not answer
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Decode { .. })
    }
}

/// Failure to enrich one changelog update
#[derive(Error, Debug)]
pub enum EnrichError {
    /// A reference lookup failed
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The order date does not map to a calendar day
    #[error("order {order_id} has out-of-range order_date {days}")]
    InvalidOrderDate {
        /// Order carrying the date
        order_id: i64,
        /// Days since the Unix epoch
        days: i64,
    },
}

/// Errors that stop a partition
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Kafka client error
    #[error("kafka error: {0}")]
    Kafka(#[from] rskafka::client::error::Error),

    /// Broker unreachable or topic missing
    #[error("connection error: {0}")]
    Connection(String),

    /// A record could not be decoded or applied to the table
    #[error("malformed record at {position}: {source}")]
    Malformed {
        /// Where the record was read
        position: StreamPosition,
        /// Decode or table error
        #[source]
        source: CdcError,
    },

    /// Enrichment failed
    #[error("enrichment failed at {position}: {source}")]
    Enrich {
        /// Where the record was read
        position: StreamPosition,
        /// Enrichment error
        #[source]
        source: EnrichError,
    },

    /// Output could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] CdcError),

    /// Output could not be published
    #[error("publish error: {0}")]
    Publish(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A partition task panicked or was cancelled
    #[error("partition task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a publish error
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error concerns a single record; the `skip` policy only
    /// skips these.
    pub fn is_record_error(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::Enrich { .. })
    }
}
