//! Sequential step engine.
//!
//! A pipeline is an ordered slice of [`Step`]s sharing one mutable context.
//! Each step returns an [`Outcome`]: continue, stop early without error, or fail.

use anyhow::Result;
use tracing::{debug, error, info, instrument};

use crate::core::outcome::Outcome;

/// A named unit of work over context `C`.
///
/// Steps are plain functions; anything a later step needs must be stored in the
/// context.
pub struct Step<C> {
    pub name: &'static str,
    pub run: fn(&mut C) -> Outcome,
}

impl<C> Step<C> {
    pub const fn new(name: &'static str, run: fn(&mut C) -> Outcome) -> Self {
        Self { name, run }
    }
}

impl<C> Clone for Step<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Step<C> {}

impl<C> std::fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Every step ran.
    Finished,
    /// A step asked to stop; later steps were skipped.
    Stopped { step: &'static str, reason: String },
}

/// Run `steps` in order against `ctx`.
///
/// The first failing step ends the run and its error is returned as-is. A step
/// returning [`Outcome::Stop`] ends the run successfully.
#[instrument(skip_all, fields(steps = steps.len()))]
pub fn run_steps<C>(ctx: &mut C, steps: &[Step<C>]) -> Result<Completion> {
    for step in steps {
        debug!(step = step.name, "running step");
        match (step.run)(ctx) {
            Outcome::Continue => {}
            Outcome::Stop(reason) => {
                info!(step = step.name, "{reason}");
                return Ok(Completion::Stopped {
                    step: step.name,
                    reason,
                });
            }
            Outcome::Fail(err) => {
                error!(step = step.name, err = %format!("{err:#}"), "step failed");
                return Err(err);
            }
        }
    }
    Ok(Completion::Finished)
}
