//! The end to end unlock procedure.
//!
//! **Example** - Running the workflow on a real serial port:
//! ```ignore
//! use ldata_unlock::{factory, LogReporter, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new()
//!     .path("/dev/ttyUSB0")
//!     .device_id("LDATA-0042")
//!     .finalize();
//! let mut workflow = factory(settings, Box::new(LogReporter), Box::new(|_: &str| true));
//! let outcome = workflow.run();
//! std::process::exit(outcome.exit_code() as i32);
//! ```
//!
//! **Example** - Running it over any other [`Transport`](crate::Transport):
//! ```ignore
//! let connector: Connector = Box::new(|_| Ok(Box::new(MyConsole::new()) as Box<dyn Transport>));
//! let mut workflow = UnlockWorkflow::with_connector(settings, connector, reporter, operator);
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{factory, Connector, Outcome, Stage, UnlockWorkflow};
