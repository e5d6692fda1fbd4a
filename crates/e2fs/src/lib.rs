#![forbid(unsafe_code)]
//! Public API facade for the e2fs engine.
//!
//! Re-exports the core surface through one stable crate so downstream
//! consumers depend on `e2fs` alone.

pub use e2fs_core::*;
