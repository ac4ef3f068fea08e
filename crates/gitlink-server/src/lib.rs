//! Gitlink server library.
//!
//! This library exposes the server components for use in integration tests.

pub mod routes;
pub mod state;

pub use state::{AppState, ServerConfig};

// Re-export gitlink_core for convenience
pub use gitlink_core;

// Test utilities are available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
