//! Propagation Integration Tests
//!
//! Tests for units of work under each propagation mode, run against the
//! in-memory provider so every physical begin/commit/rollback is observable.

#[path = "../common/mod.rs"]
mod common;

mod nested;
mod supports_not_supported;
