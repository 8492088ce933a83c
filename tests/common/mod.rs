//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A local/remote `MemoryStore` pair and harnesses that drive them through
//!   the full engine or through a worker-less reflector
//! - Record fixtures and conflict-tolerant mutation helpers
//! - Polling helpers for eventually-consistent assertions

#![allow(dead_code)]

pub mod clusters;
pub mod fixtures;

pub use clusters::*;
pub use fixtures::*;
