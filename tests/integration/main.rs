//! Integration tests for newscover
//!
//! These tests use wiremock to create mock HTTP servers and exercise covers,
//! the scheduler and the persister end-to-end through the public API.

mod common;
mod cover_tests;
mod sync_tests;
