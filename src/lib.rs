//! Purpose: Library crate behind the `recfile` CLI and integration tests.
//! Exports: `api` (record file type, options, errors).
//! Role: Concurrent fixed-length record storage for in-process writers and readers.
//! Invariants: `api` is the only public path; `core` stays crate-private.
//! Invariants: A record file has exactly one owner; it is not a cross-process queue.
pub mod api;
mod core;
