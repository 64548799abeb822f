//! Stable exit codes for the deploy-terraform CLI.

/// Deployment finished, or stopped early on purpose.
pub const OK: i32 = 0;
/// Deployment failed; the cause is printed to stderr.
pub const FAILED: i32 = 1;
