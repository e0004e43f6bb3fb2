//! Finding the serial port the panel is attached to.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serialport::{available_ports, SerialPortType};

use std::{thread, time::Duration};

use super::keyboard::{poll_key, KeyPress};

//==============================================================================
// Public Interface
//==============================================================================

/// How waiting for a port ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortWait {
    Ready,
    /// The operator pressed `ESC`.
    Cancelled,
    /// The operator pressed Ctrl+C.
    Interrupted,
}

/// Wait until at least one serial port shows up, then let the operator pick
/// one of them.
///
/// Returns `None` if the operator cancelled the selection, in which case the
/// caller may simply ask again to get a refreshed list.
pub fn select_port() -> Option<String> {
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    let _ = Term::stdout().hide_cursor();
    loop {
        found_ports = enumerate_serial_ports();
        if !found_ports.is_empty() {
            pb.finish_with_message("Select the port the panel is attached to:");
            break;
        }
        pb.set_message(format!(
            "[{:03}s] ⌛ Waiting for a USB serial adapter to be connected...",
            style(attempt * waiting_period).dim(),
        ));
        attempt += 1;
        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    let _ = Term::stdout().show_cursor();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} selected", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled");
        }
    }
    selection
}

/// Check for a port with the given path in the system. If not immediately
/// found, keep checking every couple of seconds. While waiting, the operator
/// can cancel by pressing the `ESC` key.
pub fn wait_for_port(path: &str) -> PortWait {
    let pb = spinner();
    let waiting_period = Duration::from_secs(2);
    let started = std::time::Instant::now();

    loop {
        let found_ports = enumerate_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            return PortWait::Ready;
        }

        let waited = started.elapsed().as_secs();
        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            found_ports.len(),
            style(path).cyan()
        ));

        // The keyboard poll doubles as the delay between two enumerations.
        match poll_key(waiting_period) {
            Ok(KeyPress::Escape) => {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                return PortWait::Cancelled;
            }
            Ok(KeyPress::Interrupt) => {
                pb.finish_with_message("🛑 Interrupted");
                return PortWait::Interrupted;
            }
            Ok(_) => {}
            Err(err) => {
                // No usable terminal: keep waiting without the escape hatch.
                warn!("Keyboard polling failed: {}", err);
                thread::sleep(waiting_period);
            }
        }
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[LD] {spinner:.blue} {msg}"),
    );
    pb
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|port| port_path(port) == path)
}

/// The port path out of an entry built by `enumerate_serial_ports`.
fn port_path(entry: &str) -> &str {
    match entry.find(": (") {
        Some(at) => &entry[..at],
        None => entry,
    }
}

/// Enumerates serial ports on the system, with the adapter's manufacturer
/// and product appended for USB ones.
fn enumerate_serial_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => format!(
                    "{}: ({} / {})",
                    p.port_name,
                    info.manufacturer.as_ref().map_or("", String::as_str),
                    info.product.as_ref().map_or("", String::as_str)
                ),
                _ => p.port_name,
            })
            .collect(),
        Err(ref e) => {
            info!("Could not enumerate serial ports: {}", e);
            vec![]
        }
    }
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    match select.default(0).interact_on_opt(&term) {
        Ok(selection) => selection
            .and_then(|x| ports.get(x))
            .map(|entry| port_path(entry).to_string()),
        Err(err) => {
            warn!("Port selection failed: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_details_are_stripped() {
        assert_eq!(port_path("/dev/ttyUSB0: (FTDI / FT232R USB UART)"), "/dev/ttyUSB0");
        assert_eq!(port_path("COM4"), "COM4");
    }

    #[test]
    fn requested_port_must_match_exactly() {
        let ports = vec![
            "/dev/ttyUSB10: (FTDI / FT232R USB UART)".to_string(),
            "/dev/ttyS0".to_string(),
        ];
        assert!(!check_requested_port(&ports, "/dev/ttyUSB1"));
        assert!(check_requested_port(&ports, "/dev/ttyUSB10"));
        assert!(check_requested_port(&ports, "/dev/ttyS0"));
    }
}
