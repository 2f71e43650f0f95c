//! Shared test utilities for docshift integration tests.
//!
//! This module provides:
//! - `TestHarness`: an isolated app with a temp storage root and an
//!   in-memory database, driven through `tower::ServiceExt::oneshot`
//! - Builders for fixture documents and multipart requests

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
