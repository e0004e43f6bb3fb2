//! Seams between the unlock core and whoever is watching it.
//!
//! The core never prints. It reports through a [`Reporter`] and asks for
//! permission through an [`Operator`], both injected by the caller.

use std::time::Duration;

/// Progress and status callbacks
pub trait Reporter {
    /// A new step is starting or has completed.
    fn status(&mut self, message: &str);
    /// Time spent so far waiting on something bounded by `total`.
    fn progress(&mut self, elapsed: Duration, total: Duration);
    /// A step failed.
    fn error(&mut self, message: &str);
}

/// The human in front of the device.
pub trait Operator {
    /// Ask a yes/no question. Returning `false` aborts the workflow.
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Operator for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// A [`Reporter`] that only logs.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn status(&mut self, message: &str) {
        log::info!("{}", message);
    }

    fn progress(&mut self, elapsed: Duration, total: Duration) {
        log::trace!("waited {:?} of {:?}", elapsed, total);
    }

    fn error(&mut self, message: &str) {
        log::error!("{}", message);
    }
}
