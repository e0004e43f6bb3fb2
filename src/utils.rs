//! Terminal helpers for the command line front end: port discovery, keyboard
//! polling and the interactive reporter/operator.

mod keyboard;
mod ports;
mod terminal;

pub use ports::{select_port, wait_for_port, PortWait};
pub use terminal::{ConsoleReporter, TermOperator};
