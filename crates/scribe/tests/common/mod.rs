//! Shared test utilities for scribe integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated test execution with a temp directory and
//!   an on-disk job database
//! - Fake processors and status sources for driving the job core
//! - `StubServer`, a loopback HTTP server with a canned response

pub mod fakes;
pub mod harness;
pub mod http_stub;

pub use fakes::*;
pub use harness::{wait_terminal, TestHarness};
pub use http_stub::StubServer;
