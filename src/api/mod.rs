//! Purpose: Define the public Rust API boundary for record files.
//! Exports: `RecordFile`, `RecordFileOptions`, `Record`, `Durability`, `Error`, `ErrorKind`.
//! Role: Public, additive-only surface; hides slot, frontier, and store internals.
//! Invariants: Every operation is callable from any number of threads through `&RecordFile`.
//! Invariants: Reads past the write frontier block; they never surface end-of-file.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::record_file::{Record, RecordFile, RecordFileOptions};
pub use crate::core::store::Durability;
