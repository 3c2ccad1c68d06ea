//! Statement executor integration tests
//!
//! Run with: cargo test --test executor

#[path = "../common/mod.rs"]
mod common;

mod binding;
mod cardinality;
