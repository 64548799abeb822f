//! Deterministic, pure logic shared by the deployment steps.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod args;
pub mod artifact;
pub mod outcome;
