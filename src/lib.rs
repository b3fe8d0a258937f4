//! `argcat` — a schema-driven command line argument parser with validation,
//! shell completion, and help/usage rendering.
//!
//! This crate re-exports the engine from `argcat-core`; see that crate for
//! the schema, parser, and message-builder implementation.

pub use argcat_core::*;
