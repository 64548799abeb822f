//! Three-way result of a pipeline step.

use anyhow::Result;

/// What a step tells the pipeline to do next.
#[derive(Debug)]
pub enum Outcome {
    /// Proceed with the next step.
    Continue,
    /// End the run successfully without running the remaining steps.
    Stop(String),
    /// End the run with this error.
    Fail(anyhow::Error),
}

impl Outcome {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop(reason.into())
    }
}

impl From<anyhow::Error> for Outcome {
    fn from(err: anyhow::Error) -> Self {
        Self::Fail(err)
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(err) => Self::Fail(err),
        }
    }
}

impl From<Result<Outcome>> for Outcome {
    fn from(result: Result<Outcome>) -> Self {
        result.unwrap_or_else(Self::Fail)
    }
}
