//! Shared test utilities for coffeetrack integration tests.
//!
//! This module provides:
//! - `TestHarness` for services backed by a database in a temp directory
//! - Builder patterns for configurations, farmer reports and verdicts

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{advance_on, TestHarness};
