//! Logging setup shared by the index engine, its services and its tests.

pub mod tracing;

pub use crate::tracing::{TracingError, init_test_tracing, init_tracing};
