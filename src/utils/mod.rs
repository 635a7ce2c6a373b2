//! The `utils` module provides the pieces shared across the `fcmpush` crate:
//! the crate-wide error type with its retry classification, and tracing
//! setup for binaries and tests.

pub mod error;
pub mod logging;
