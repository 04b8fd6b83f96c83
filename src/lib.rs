//! Purpose: Library crate behind the `csvd` server and CLI.
//! Exports: `core` (key codec, store handle, registry, rows, tags) and `api` (shared client surface).
//! Role: Everything that touches the ordered store lives here; the binary only adapts.
//! Invariants: One `Store` per process, passed explicitly; no global handles.
pub mod api;
pub mod core;
