//! I/O helpers for the deployment steps.

pub mod backend;
pub mod config;
pub mod mask;
pub mod ods;
pub mod process;
pub mod secrets;
pub mod workspace;
