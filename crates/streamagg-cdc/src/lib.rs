//! # streamagg-cdc
//!
//! Change-stream building blocks for the streamagg enrichment pipeline.
//!
//! - [`ChangeCodec`]: decodes Debezium JSON keys and envelopes, with or
//!   without the `{schema, payload}` wrapper
//! - [`MaterializedTable`]: folds the change stream into the latest value
//!   per key and emits a changelog
//! - [`DeletePolicy`]: whether removed keys produce output tombstones
//!
//! ```rust
//! use serde::Deserialize;
//! use streamagg_cdc::{ChangeCodec, MaterializedTable, StreamPosition};
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
//! struct Key { id: i64 }
//!
//! let codec: ChangeCodec<Key, serde_json::Value> = ChangeCodec::default();
//! let mut table = MaterializedTable::new();
//!
//! let record = codec.decode(
//!     Some(br#"{"id":1}"#),
//!     Some(br#"{"after":{"id":1,"quantity":2},"op":"c"}"#),
//!     StreamPosition::new(0, 0),
//! )?;
//! let update = table.apply(record)?.expect("created");
//! assert_eq!(update.key, Key { id: 1 });
//! # Ok::<(), streamagg_cdc::CdcError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod event;
pub mod policy;
pub mod table;

pub use codec::{ChangeCodec, JsonCodec, SchemaEnvelope};
pub use error::{CdcError, ErrorCategory, Result};
pub use event::{ChangeEnvelope, ChangeOp, ChangeRecord, SourceInfo, StreamPosition};
pub use policy::DeletePolicy;
pub use table::{ChangelogUpdate, MaterializedTable, TableStats, UpdateCause};
