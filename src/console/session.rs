//! Line oriented session with the bootloader console.
//!
//! The session goes through the following states:
//!
//! ```text
//!   Disconnected <---------------- close() ------------------.
//!        |                                                   |
//!      new()                                                 |
//!        v                                                   |
//!  AwaitingPrompt --prompt seen--> PromptReady <-----------. |
//!        |                             |                   | |
//!     deadline                      command()              | |
//!        v                             v                   | |
//!     Timeout                     CommandSent              | |
//!                                      |                   | |
//!                                 settle delay             | |
//!                                      v                   | |
//!                              ResponseCollecting ---------' |
//!                                                            |
//!  PromptReady --reset()--> Rebooting -----------------------'
//! ```
//!
//! A command may also be issued from `AwaitingPrompt` or `Timeout`: a board
//! already sitting at the prompt prints nothing until spoken to.

use std::{
    fmt, thread,
    time::{Duration, Instant},
};

use log::{debug, log_enabled, trace, Level::Trace};

use crate::error::{Result, UnlockError};
use crate::report::Reporter;
use crate::settings::Settings;
use crate::transport::{Transport, MAX_READ_CHUNK};

/// Where the console conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingPrompt,
    PromptReady,
    CommandSent,
    ResponseCollecting,
    Timeout,
    Rebooting,
}

/// Owns the transport for the lifetime of the run and serializes every
/// exchange with the console.
pub struct BootloaderSession {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    prompt_banner: String,
    read_timeout: Duration,
    poll_interval: Duration,
    wake_interval: Duration,
    /// Output of the current command cycle or wait. Reset each time.
    buffer: Vec<u8>,
}

impl BootloaderSession {
    pub fn new(transport: Box<dyn Transport>, settings: &Settings) -> Self {
        debug!("Console session opened on {}", transport.name());
        BootloaderSession {
            transport: Some(transport),
            state: SessionState::AwaitingPrompt,
            prompt_banner: settings.prompt_banner.clone(),
            read_timeout: settings.read_timeout,
            poll_interval: settings.delays.poll_interval,
            wake_interval: settings.delays.wake_interval,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Everything captured during the last command cycle or wait.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Wait until the bootloader prompt shows up, nudging the console with an
    /// empty line every `wake_interval` to stop autoboot and make an idle
    /// prompt print itself again.
    ///
    /// Returns how long it took. On expiry the session is left in `Timeout`
    /// and the elapsed time in the error is never below `deadline`.
    pub fn wait_for_prompt(
        &mut self,
        deadline: Duration,
        reporter: &mut dyn Reporter,
    ) -> Result<Duration> {
        if self.state == SessionState::Disconnected {
            return Err(UnlockError::NotReady(self.state));
        }
        self.transition(SessionState::AwaitingPrompt);

        let banner = self.prompt_banner.clone();
        let wake = Some(self.wake_interval);
        match self.wait_for_banner(&banner, deadline, wake, reporter) {
            Ok(elapsed) => {
                self.transition(SessionState::PromptReady);
                Ok(elapsed)
            }
            Err(err) => {
                if let UnlockError::Timeout { .. } = err {
                    self.transition(SessionState::Timeout);
                }
                Err(err)
            }
        }
    }

    /// Poll the console until `banner` appears in the output accumulated since
    /// the call started, or `deadline` expires.
    ///
    /// The deadline is checked between polls, so the wait can overrun it by at
    /// most one read timeout plus one poll interval.
    pub fn wait_for_banner(
        &mut self,
        banner: &str,
        deadline: Duration,
        wake: Option<Duration>,
        reporter: &mut dyn Reporter,
    ) -> Result<Duration> {
        if self.state == SessionState::Disconnected {
            return Err(UnlockError::NotReady(self.state));
        }
        debug!("Waiting up to {:?} for `{}`", deadline, banner);
        self.buffer.clear();
        let start = Instant::now();
        let mut last_nudge: Option<Instant> = None;

        loop {
            if let Some(period) = wake {
                if last_nudge.map_or(true, |at| at.elapsed() >= period) {
                    trace!("Nudging console");
                    self.transport()?.write(b"\n")?;
                    last_nudge = Some(Instant::now());
                }
            }

            self.pull()?;
            if self.buffer_contains(banner) {
                let elapsed = start.elapsed();
                debug!("Found `{}` after {:?}", banner, elapsed);
                return Ok(elapsed);
            }

            let elapsed = start.elapsed();
            reporter.progress(elapsed, deadline);
            if elapsed >= deadline {
                return Err(UnlockError::Timeout {
                    banner: banner.into(),
                    elapsed,
                });
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Send one command line, wait `settle` and return what the console
    /// printed in the meantime.
    ///
    /// The session is `PromptReady` afterwards only if the prompt came back
    /// within `settle`, `Timeout` otherwise.
    pub fn command(&mut self, line: &str, settle: Duration) -> Result<String> {
        match self.state {
            SessionState::Disconnected | SessionState::Rebooting => {
                return Err(UnlockError::NotReady(self.state))
            }
            _ => {}
        }

        self.discard_stale()?;
        self.buffer.clear();

        debug!("> {}", line);
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.transport()?.write(&bytes)?;
        self.transition(SessionState::CommandSent);

        // The console never says when it is done. Give it time, then take
        // whatever is there.
        thread::sleep(settle);
        self.transition(SessionState::ResponseCollecting);
        let data = self.transport()?.drain()?;
        self.record(&data);
        if self.buffer_contains(&self.prompt_banner) {
            self.transition(SessionState::PromptReady);
        } else {
            debug!("No prompt after `{}`", line);
            self.transition(SessionState::Timeout);
        }

        Ok(self.output())
    }

    /// Ask the bootloader to reset the board.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Err(UnlockError::NotReady(self.state));
        }
        self.discard_stale()?;
        self.buffer.clear();
        debug!("> reset");
        self.transport()?.write(b"reset\n")?;
        self.transition(SessionState::Rebooting);
        Ok(())
    }

    /// Release the serial handle. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!("Closing console session on {}", transport.name());
        }
        self.transition(SessionState::Disconnected);
    }

    // -------------------------------------------------------------------------

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        let state = self.state;
        self.transport
            .as_mut()
            .ok_or(UnlockError::NotReady(state))
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            trace!("session: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Read what is available right now, if anything.
    fn pull(&mut self) -> Result<usize> {
        let read_timeout = self.read_timeout;
        let transport = self.transport()?;
        let available = transport.poll()?;
        if available == 0 {
            return Ok(0);
        }
        let mut chunk = vec![0; available.min(MAX_READ_CHUNK)];
        let read = transport.read_timeout(&mut chunk, read_timeout)?;
        self.record(&chunk[..read]);
        Ok(read)
    }

    fn discard_stale(&mut self) -> Result<()> {
        let stale = self.transport()?.drain()?;
        if !stale.is_empty() {
            trace!("Discarding {} stale bytes", stale.len());
        }
        Ok(())
    }

    fn record(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if log_enabled!(Trace) {
            use hexplay::HexViewBuilder;
            let view = HexViewBuilder::new(data)
                .address_offset(self.buffer.len())
                .row_width(16)
                .finish();
            trace!("< {} bytes\n{}", data.len(), view);
        }
        self.buffer.extend_from_slice(data);
    }

    fn buffer_contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.buffer).contains(needle)
    }
}

impl fmt::Debug for BootloaderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootloaderSession")
            .field("port", &self.transport.as_ref().map(|t| t.name()))
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl Drop for BootloaderSession {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
