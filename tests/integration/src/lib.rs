//! Integration test utilities for the POS gateway
//!
//! This crate provides helpers for running end-to-end tests against a real
//! upgrade host on an ephemeral port.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
