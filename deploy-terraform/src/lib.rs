//! Terraform deployment step for ODS pipelines.
//!
//! A deployment is a fixed sequence of steps ([`steps::DEPLOY_STEPS`]) run by a
//! small engine ([`pipeline`]) over one mutable [`context::DeployContext`]:
//!
//! - **[`core`]**: Pure logic (argument assembly, artifact naming, step outcomes).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (processes, secrets, filesystem, output
//!   redaction). Isolated behind small types and traits so tests can swap them.
//!
//! Terraform output is streamed through [`io::mask::MaskWriter`] so secret values
//! never reach the build log or the plan artifacts.

pub mod context;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::io::Write;

use anyhow::{Context, Result};

use crate::context::DeployContext;
use crate::pipeline::{Completion, run_steps};
use crate::steps::DEPLOY_STEPS;

/// Run the full deployment against `ctx` and flush its output sinks.
pub fn deploy(ctx: &mut DeployContext) -> Result<Completion> {
    let result = run_steps(ctx, DEPLOY_STEPS);
    let flushed = ctx.out.flush().and_then(|()| ctx.err.flush());
    let completion = result?;
    flushed.context("flush output")?;
    Ok(completion)
}
