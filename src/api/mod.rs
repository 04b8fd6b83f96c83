//! Purpose: Define the public Rust API boundary for csvd.
//! Exports: Store handle, table/tag types, errors, and the shared `LocalClient`.
//! Role: The only path the binary and integration tests use into the storage core.
//! Invariants: Storage primitives stay in `core`; this module re-exports, never reimplements.

mod client;
pub mod listing;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::rows::{DeleteSummary, RowCursor, primary_key};
pub use crate::core::store::{DB_FILE_NAME, Store};
pub use crate::core::tabledef::{TableDef, TableState};
pub use crate::core::tags::TagInfo;
pub use client::{ApiResult, DeleteOutcome, IngestOutcome, LocalClient, TableScan};
