//! Shared test utilities for discflow integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated engines over temp directories and a file database
//! - Recording fakes for the metadata and transcoding services

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
