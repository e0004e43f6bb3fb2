//! States for the unlock workflow state machine.
//!
//! This modules is private and restricted to the
//! [`workflow`](crate::workflow) scope. The public interface of the state
//! machine is provided by [`workflow`](crate::workflow).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use log::{error, info, warn};

use super::events::*;
use super::state_machine::{Connector, Outcome, Stage};

use crate::backup::BackupManager;
use crate::console::{
    BootloaderSession, FlagWriter, ModificationVerifier, PartitionLocator, SessionState,
};
use crate::device::Device;
use crate::error::UnlockError;
use crate::report::{Operator, Reporter};
use crate::settings::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Everything the states share for the duration of a run.
pub(crate) struct Context {
    pub settings: Settings,
    pub device: Device,
    pub backups: BackupManager,
    /// Lives here rather than in a state so that its at-most-once guard
    /// covers the whole run.
    pub flag_writer: FlagWriter,
    pub connector: Connector,
    pub reporter: Box<dyn Reporter>,
    pub operator: Box<dyn Operator>,
}

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests a transition to a `new state` by returning the
    /// appropriate `event`. The `state` and the `event` are consumed to create
    /// the `new state` using the corresponding [`From`] trait implementation
    /// (provided such implementation exists).
    fn run(&mut self, ctx: &mut Context) -> Event;
}

// Init State ==================================================================

/// The initial state of the workflow. Always moves on to
/// [`PortSelectionState`].
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Init");
        ctx.reporter.status("Starting LDATA unlock");
        Event::SelectPort(SelectPortEvent {})
    }
}

// PortSelection State =========================================================

/// Checks that the caller picked a port and starts the device record with it.
///
/// Transitions:
///
///  * **[`ConnectEvent`] => [`ConnectingState`]** when a port path is set,
///  * **[`FailEvent`] => [`FailedState`]** otherwise.
#[derive(Debug)]
pub(crate) struct PortSelectionState {}
impl Runnable for PortSelectionState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Port Selection");
        let path = match &ctx.settings.path {
            Some(path) => path.clone(),
            None => {
                return fail(
                    None,
                    Stage::PortSelection,
                    UnlockError::Connection("no serial port selected".into()),
                )
            }
        };

        ctx.device = Device::new(path);
        ctx.device.device_id = ctx.settings.device_id.clone();
        info!("Using serial port {}", ctx.device.serial_port);
        Event::Connect(ConnectEvent {})
    }
}

// Connecting State ============================================================

/// Opens the serial port and starts a console session over it.
///
/// Transitions:
///
///  * **[`BackUpEvent`] => [`BackingUpState`]** with the new session,
///  * **[`FailEvent`] => [`FailedState`]** when the port cannot be opened,
///    after the retries done by the transport.
#[derive(Debug)]
pub(crate) struct ConnectingState {}
impl Runnable for ConnectingState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Connecting");
        ctx.reporter
            .status(&format!("Connecting to {}...", ctx.device.serial_port));

        match (ctx.connector)(&ctx.settings) {
            Ok(transport) => Event::BackUp(BackUpEvent {
                session: BootloaderSession::new(transport, &ctx.settings),
            }),
            Err(err) => fail(None, Stage::Connecting, err),
        }
    }
}

// BackingUp State =============================================================

/// Writes the identity snapshot before anything on the device is touched.
///
/// A missing device id only skips the snapshot. Failing to write it is fatal.
#[derive(Debug)]
pub(crate) struct BackingUpState {
    pub session: Option<BootloaderSession>,
}
impl Runnable for BackingUpState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Backing Up");
        let session = match claim(&mut self.session, Stage::BackingUp) {
            Ok(session) => session,
            Err(event) => return event,
        };

        match ctx.backups.backup(&ctx.device) {
            Ok(Some(dir)) => {
                ctx.reporter
                    .status(&format!("Backup written to {}", dir.display()));
                Event::DiscoverPartition(DiscoverPartitionEvent { session })
            }
            Ok(None) => {
                ctx.reporter
                    .status("Device id unknown, skipping backup (use --device-id to enable it)");
                Event::DiscoverPartition(DiscoverPartitionEvent { session })
            }
            Err(err) => fail(Some(session), Stage::BackingUp, err),
        }
    }
}

// PartitionDiscovery State ====================================================

/// Finds the data partition and the MAC addresses from the bootloader
/// environment.
#[derive(Debug)]
pub(crate) struct PartitionDiscoveryState {
    pub session: Option<BootloaderSession>,
}
impl Runnable for PartitionDiscoveryState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Partition Discovery");
        let mut session = match claim(&mut self.session, Stage::PartitionDiscovery) {
            Ok(session) => session,
            Err(event) => return event,
        };

        let locator = PartitionLocator::new(&ctx.settings);
        match locator.locate(&mut session, ctx.reporter.as_mut()) {
            Ok(layout) => {
                if layout.mmc_dev != ctx.settings.fs_device {
                    warn!(
                        "Environment says mmcdev={} but filesystem commands use device {}",
                        layout.mmc_dev, ctx.settings.fs_device
                    );
                }
                ctx.device.data_partition = Some(layout.data_partition.index);
                ctx.device.mac_addresses = layout.mac_addresses;
                ctx.reporter.status(&format!(
                    "Data partition found: {}",
                    layout.data_partition.index
                ));
                Event::AwaitBootloader(AwaitBootloaderEvent { session })
            }
            Err(err) => fail(Some(session), Stage::PartitionDiscovery, err),
        }
    }
}

// BootloaderWait State ========================================================

/// Synchronizes on the bootloader prompt.
///
/// Transitions:
///
///  * **[`EnableEvent`] => [`EnablingState`]** once the prompt is seen,
///  * **[`ManualRetryEvent`] => [`BootloaderWaitState`]** on the first timeout
///    if the operator agrees to power cycle the board,
///  * **[`DoneEvent`] => [`DoneState`]** if the operator declines,
///  * **[`FailEvent`] => [`FailedState`]** on the second timeout or any other
///    error.
#[derive(Debug)]
pub(crate) struct BootloaderWaitState {
    pub session: Option<BootloaderSession>,
    /// Set when this is the operator-assisted second attempt.
    pub manual_retry: bool,
}
impl Runnable for BootloaderWaitState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Bootloader Wait (manual retry: {})", self.manual_retry);
        let mut session = match claim(&mut self.session, Stage::BootloaderWait) {
            Ok(session) => session,
            Err(event) => return event,
        };

        let deadline = if self.manual_retry {
            ctx.settings.manual_retry_timeout
        } else {
            ctx.settings.prompt_timeout
        };
        ctx.reporter.status("Waiting for the bootloader prompt...");

        match session.wait_for_prompt(deadline, ctx.reporter.as_mut()) {
            Ok(elapsed) => {
                info!("Bootloader prompt after {:?}", elapsed);
                Event::Enable(EnableEvent { session })
            }
            Err(err @ UnlockError::Timeout { .. }) if !self.manual_retry => {
                ctx.reporter.error(&err.to_string());
                let retry = ctx.operator.confirm(
                    "Bootloader prompt not seen. Power cycle the device now and confirm \
                     to keep waiting",
                );
                if retry {
                    Event::ManualRetry(ManualRetryEvent { session })
                } else {
                    Event::Done(DoneEvent {
                        session: Some(session),
                        outcome: Outcome::Aborted(Stage::BootloaderWait),
                    })
                }
            }
            Err(err) => fail(Some(session), Stage::BootloaderWait, err),
        }
    }
}

// Enabling State ==============================================================

/// Asks the operator for the go-ahead, then writes the flag file.
///
/// Once the operator confirmed, nothing in this state can be cancelled.
#[derive(Debug)]
pub(crate) struct EnablingState {
    pub session: Option<BootloaderSession>,
}
impl Runnable for EnablingState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Enabling");
        let mut session = match claim(&mut self.session, Stage::Enabling) {
            Ok(session) => session,
            Err(event) => return event,
        };

        let question = format!(
            "Please ensure you have physical access to the device. Write {} to \
             partition {}:{}?",
            ctx.settings.flag_path,
            ctx.settings.fs_device,
            ctx.device
                .data_partition
                .map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        if !ctx.operator.confirm(&question) {
            info!("Operator declined to modify the device");
            return Event::Done(DoneEvent {
                session: Some(session),
                outcome: Outcome::Aborted(Stage::Enabling),
            });
        }

        match ctx
            .flag_writer
            .enable(&mut session, &mut ctx.device, ctx.reporter.as_mut())
        {
            Ok(()) => {
                ctx.reporter.status("Flag file written and confirmed");
                Event::Verify(VerifyEvent { session })
            }
            Err(err) => fail(Some(session), Stage::Enabling, err),
        }
    }
}

// Verifying State =============================================================

/// Reboots once and waits for the firmware to announce the API.
#[derive(Debug)]
pub(crate) struct VerifyingState {
    pub session: Option<BootloaderSession>,
}
impl Runnable for VerifyingState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Verifying");
        let mut session = match claim(&mut self.session, Stage::Verifying) {
            Ok(session) => session,
            Err(event) => return event,
        };

        let verifier = ModificationVerifier::new(&ctx.settings);
        match verifier.verify(&mut session, &ctx.device, ctx.reporter.as_mut()) {
            Ok(_) => Event::Done(DoneEvent {
                session: Some(session),
                outcome: Outcome::Unlocked,
            }),
            Err(err) => fail(Some(session), Stage::Verifying, err),
        }
    }
}

// Done State ==================================================================

/// Reached on success or when the operator chose to stop.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub session: Option<BootloaderSession>,
    pub outcome: Option<Outcome>,
}
impl Runnable for DoneState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Done");
        let outcome = self.outcome.take().unwrap_or_else(lost_outcome);
        match &outcome {
            Outcome::Unlocked => ctx
                .reporter
                .status("Local API enabled, the panel is unlocked"),
            Outcome::Aborted(stage) => ctx
                .reporter
                .status(&format!("Stopped by the operator during {}", stage)),
            Outcome::Failed { stage, error } => ctx
                .reporter
                .error(&format!("Failed during {}: {}", stage, error)),
        }
        Event::Cleanup(CleanupEvent {
            session: self.session.take(),
            outcome,
        })
    }
}

// Failed State ================================================================

/// Reached from any stage on an error. Reports it with the stage it happened
/// in.
#[derive(Debug)]
pub(crate) struct FailedState {
    pub session: Option<BootloaderSession>,
    pub stage: Stage,
    pub error: Option<UnlockError>,
}
impl Runnable for FailedState {
    fn run(&mut self, ctx: &mut Context) -> Event {
        info!("=> Failed");
        let error = self
            .error
            .take()
            .unwrap_or_else(|| UnlockError::Verification("unknown failure".into()));

        error!("{} failed during {}: {}", error.kind(), self.stage, error);
        ctx.reporter
            .error(&format!("Failed during {}: {}", self.stage, error));
        if ctx.flag_writer.persist_attempted() && !ctx.device.api_enabled {
            warn!("ext4write was issued but never confirmed, the data partition state is unknown");
            ctx.reporter.error(
                "The flag file write was sent but could not be confirmed. Do not retry blindly.",
            );
        }

        Event::Cleanup(CleanupEvent {
            session: self.session.take(),
            outcome: Outcome::Failed {
                stage: self.stage,
                error,
            },
        })
    }
}

// Cleanup State ===============================================================

/// Closes the console session, releasing the serial port, on every exit path.
#[derive(Debug)]
pub(crate) struct CleanupState {
    pub session: Option<BootloaderSession>,
    pub outcome: Option<Outcome>,
    /// Set by the final transition, checked by the event loop.
    pub should_exit: bool,
}
impl Runnable for CleanupState {
    fn run(&mut self, _ctx: &mut Context) -> Event {
        info!("=> Cleanup");
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        let outcome = self.outcome.take().unwrap_or_else(lost_outcome);
        Event::Exit(ExitEvent { outcome })
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn fail(session: Option<BootloaderSession>, stage: Stage, error: UnlockError) -> Event {
    Event::Fail(FailEvent {
        session,
        stage,
        error,
    })
}

/// Stands in for an outcome that was already taken. A run that lost track of
/// its outcome is a failed run.
pub(crate) fn lost_outcome() -> Outcome {
    Outcome::Failed {
        stage: Stage::Init,
        error: UnlockError::Verification("workflow ended without an outcome".into()),
    }
}

/// Takes the session handed over by the previous state.
fn claim(slot: &mut Option<BootloaderSession>, stage: Stage) -> Result<BootloaderSession, Event> {
    slot.take()
        .ok_or_else(|| fail(None, stage, UnlockError::NotReady(SessionState::Disconnected)))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::report::LogReporter;
    use crate::settings::SettingsBuilder;
    use crate::transport::Transport;

    fn context() -> Context {
        let settings = SettingsBuilder::new().path("none").finalize();
        let connector: Connector = Box::new(|_: &Settings| -> Result<Box<dyn Transport>> {
            Err(UnlockError::Connection("not connected".into()))
        });
        Context {
            device: Device::default(),
            backups: BackupManager::new(settings.backup_dir.clone()),
            flag_writer: FlagWriter::new(&settings),
            settings,
            connector,
            reporter: Box::new(LogReporter),
            operator: Box::new(|_: &str| true),
        }
    }

    #[test]
    fn done_without_outcome_is_a_failure() {
        let mut ctx = context();
        let mut done = DoneState {
            session: None,
            outcome: None,
        };
        match done.run(&mut ctx) {
            Event::Cleanup(CleanupEvent { outcome, .. }) => {
                assert!(!outcome.is_unlocked());
                assert_eq!(outcome.exit_code(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cleanup_without_outcome_is_a_failure() {
        let mut ctx = context();
        let mut cleanup = CleanupState {
            session: None,
            outcome: None,
            should_exit: false,
        };
        match cleanup.run(&mut ctx) {
            Event::Exit(ExitEvent { outcome }) => assert_eq!(outcome.exit_code(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cleanup_hands_on_the_outcome_it_was_given() {
        let mut ctx = context();
        let mut cleanup = CleanupState {
            session: None,
            outcome: Some(Outcome::Aborted(Stage::Enabling)),
            should_exit: false,
        };
        match cleanup.run(&mut ctx) {
            Event::Exit(ExitEvent { outcome }) => {
                assert!(matches!(outcome, Outcome::Aborted(Stage::Enabling)))
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
