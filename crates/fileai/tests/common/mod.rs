//! Shared test utilities for fileai integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated queue runs over a temporary database
//! - Scripted fake analyzers with call recording

pub mod analyzers;
pub mod harness;

pub use analyzers::*;
pub use harness::*;
