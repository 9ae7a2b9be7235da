//! Integration tests for lodge.
//!
//! This crate provides:
//! - A service harness over a temporary data root
//! - A propagator that fails on chosen paths
//! - End-to-end tests of the client operations, in process and over TCP

pub mod faulty;
pub mod harness;

pub use faulty::FaultyPropagator;
pub use harness::{TestClient, TestResult, TestService, TEST_SECRET};
