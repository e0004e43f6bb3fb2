//! Terminal implementations of the [`Reporter`] and [`Operator`] seams.

use std::time::Duration;

use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

use crate::report::{Operator, Reporter};

/// Prints status lines and shows a spinner while something is being waited
/// on.
#[derive(Default)]
pub struct ConsoleReporter {
    spinner: Option<ProgressBar>,
    /// The last status line, reused as the spinner message.
    waiting_for: String,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop_spinner(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn status(&mut self, message: &str) {
        self.stop_spinner();
        println!("[LD] {} {}", style("•").cyan(), message);
        self.waiting_for = message.to_string();
    }

    fn progress(&mut self, elapsed: Duration, total: Duration) {
        let waiting_for = self.waiting_for.clone();
        let pb = self.spinner.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(120);
            pb.set_style(
                ProgressStyle::default_spinner()
                    .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
                    .template("[LD] {spinner:.blue} {msg}"),
            );
            pb
        });
        pb.set_message(format!(
            "[{:03}s/{:03}s] ⏳ {}",
            style(elapsed.as_secs()).dim(),
            total.as_secs(),
            waiting_for
        ));
    }

    fn error(&mut self, message: &str) {
        self.stop_spinner();
        eprintln!("[LD] {} {}", style("error:").red().bold(), message);
    }
}

impl Drop for ConsoleReporter {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}

/// Asks the person at the keyboard. Anything but an explicit yes is a no.
#[derive(Debug, Default)]
pub struct TermOperator;

impl Operator for TermOperator {
    fn confirm(&mut self, prompt: &str) -> bool {
        match Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!("Could not read the answer: {}", err);
                false
            }
        }
    }
}
