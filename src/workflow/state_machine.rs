//! The unlock workflow state machine.
//!
//! The workflow is strictly one-directional. The only loop is the single
//! operator-assisted power-cycle retry while waiting for the bootloader prompt.
//! Any error sends the machine to `Failed`; both `Done` and `Failed` go through
//! `Cleanup`, which releases the serial port.
//!
//! ```text
//!          START
//!            |
//!            v
//!         .------.      .---------------.      .------------.
//!         | Init |----->| PortSelection |----->| Connecting |
//!         '------'      '---------------'      '------------'
//!                                                    |
//!                                                    v
//!  .--------------------.      .-----------.     .-----------.
//!  | PartitionDiscovery |<-----| BackingUp |<----'
//!  '--------------------'      '-----------'
//!            |                           manual retry (once)
//!            v                             .-----.
//!   .----------------.                     |     |
//!   | BootloaderWait |<--------------------'     |
//!   '----------------'---------------------------'
//!            |
//!            v
//!       .----------.      .-----------.      .------.
//!       | Enabling |----->| Verifying |----->| Done |---.
//!       '----------'      '-----------'      '------'   |
//!                                                       v
//!     any stage --error--> .--------.            .---------.
//!                          | Failed |----------->| Cleanup |--> END
//!                          '--------'            '---------'
//! ```
//!
//! An operator declining a confirmation (before the retry, before the first
//! destructive step) goes straight to `Done` with an aborted outcome.

use std::{fmt, path::Path};

use super::events::*;
use super::states::*;
use crate::backup::BackupManager;
use crate::console::FlagWriter;
use crate::device::Device;
use crate::error::{Result, UnlockError};
use crate::report::{Operator, Reporter};
use crate::settings::Settings;
use crate::transport::{SerialTransport, Transport};

// =============================================================================
// Public Interface
// =============================================================================

/// Opens the transport for a run.
pub type Connector = Box<dyn FnMut(&Settings) -> Result<Box<dyn Transport>>>;

/// The stages of the workflow, used to give context to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    PortSelection,
    Connecting,
    BackingUp,
    PartitionDiscovery,
    BootloaderWait,
    Enabling,
    Verifying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::PortSelection => "port selection",
            Stage::Connecting => "connecting",
            Stage::BackingUp => "backing up",
            Stage::PartitionDiscovery => "partition discovery",
            Stage::BootloaderWait => "bootloader wait",
            Stage::Enabling => "enabling API",
            Stage::Verifying => "verifying",
        };
        f.write_str(name)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The flag file is in place and the API banner was seen after reboot.
    Unlocked,
    /// The operator declined to continue at the given stage. Nothing was
    /// modified on the device.
    Aborted(Stage),
    Failed { stage: Stage, error: UnlockError },
}

impl Outcome {
    /// `0` when unlocked, `2` when aborted by the operator, `1` on failure.
    pub fn exit_code(&self) -> i8 {
        match self {
            Outcome::Unlocked => 0,
            Outcome::Failed { .. } => 1,
            Outcome::Aborted(_) => 2,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        matches!(self, Outcome::Unlocked)
    }
}

/// Represents the unlock workflow. Use the `factory()` function to get an
/// instance connected to a real serial port, then run it by calling its
/// `run()` method.
pub struct UnlockWorkflow {
    ctx: Context,
    sm: WorkflowStates,
}

impl UnlockWorkflow {
    /// A workflow using `connector` to open its transport.
    pub fn with_connector(
        settings: Settings,
        connector: Connector,
        reporter: Box<dyn Reporter>,
        operator: Box<dyn Operator>,
    ) -> Self {
        UnlockWorkflow {
            ctx: Context {
                device: Device::default(),
                backups: BackupManager::new(settings.backup_dir.clone()),
                flag_writer: FlagWriter::new(&settings),
                settings,
                connector,
                reporter,
                operator,
            },
            // The workflow naturally starts in the `Init` state.
            sm: WorkflowStates::Init(InitState {}),
        }
    }

    /// The event loop runs until the `Cleanup` state is reached and its
    /// `should_exit` flag is set. The outcome is then handed back.
    pub fn run(&mut self) -> Outcome {
        loop {
            self.sm = self.sm.step(&mut self.ctx);
            if let WorkflowStates::Cleanup(state) = &mut self.sm {
                if state.should_exit {
                    return state.outcome.take().unwrap_or_else(lost_outcome);
                }
            }
        }
    }

    /// The device record as filled in so far.
    pub fn device(&self) -> &Device {
        &self.ctx.device
    }

    /// Where the backup of this run went, if one was written.
    pub fn backup_path(&self) -> Option<&Path> {
        self.ctx.backups.written()
    }
}

/// Factory function for the unlock workflow on a real serial port. Use it to
/// get an instance of the state machine, which you can run by invoking its
/// `run()` method.
pub fn factory(
    settings: Settings,
    reporter: Box<dyn Reporter>,
    operator: Box<dyn Operator>,
) -> UnlockWorkflow {
    let connector: Connector = Box::new(|settings: &Settings| {
        SerialTransport::open(settings).map(|t| Box::new(t) as Box<dyn Transport>)
    });
    UnlockWorkflow::with_connector(settings, connector, reporter, operator)
}

// =============================================================================
// Private stuff
// =============================================================================

/// An enum wrapper around the states of the workflow. It provides a simpler
/// and more intuitive model for manipulating states and their transitions.
enum WorkflowStates {
    Init(InitState),
    PortSelection(PortSelectionState),
    Connecting(ConnectingState),
    BackingUp(BackingUpState),
    PartitionDiscovery(PartitionDiscoveryState),
    BootloaderWait(BootloaderWaitState),
    Enabling(EnablingState),
    Verifying(VerifyingState),
    Done(DoneState),
    Failed(FailedState),
    Cleanup(CleanupState),
}

impl WorkflowStates {
    /// The unit of work in the event loop. It runs the current state and
    /// decides the next transition from the event it returns. State
    /// transitions from events are implemented using the rust `From`/`Into`
    /// pattern, so most mismatches are caught at compile time.
    fn step(&mut self, ctx: &mut Context) -> Self {
        match self {
            WorkflowStates::Init(state) => match state.run(ctx) {
                Event::SelectPort(ev) => WorkflowStates::PortSelection(ev.into()),
                event => illegal(event, "Init"),
            },
            WorkflowStates::PortSelection(state) => match state.run(ctx) {
                Event::Connect(ev) => WorkflowStates::Connecting(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "PortSelection"),
            },
            WorkflowStates::Connecting(state) => match state.run(ctx) {
                Event::BackUp(ev) => WorkflowStates::BackingUp(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "Connecting"),
            },
            WorkflowStates::BackingUp(state) => match state.run(ctx) {
                Event::DiscoverPartition(ev) => WorkflowStates::PartitionDiscovery(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "BackingUp"),
            },
            WorkflowStates::PartitionDiscovery(state) => match state.run(ctx) {
                Event::AwaitBootloader(ev) => WorkflowStates::BootloaderWait(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "PartitionDiscovery"),
            },
            WorkflowStates::BootloaderWait(state) => match state.run(ctx) {
                Event::Enable(ev) => WorkflowStates::Enabling(ev.into()),
                Event::ManualRetry(ev) => WorkflowStates::BootloaderWait(ev.into()),
                Event::Done(ev) => WorkflowStates::Done(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "BootloaderWait"),
            },
            WorkflowStates::Enabling(state) => match state.run(ctx) {
                Event::Verify(ev) => WorkflowStates::Verifying(ev.into()),
                Event::Done(ev) => WorkflowStates::Done(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "Enabling"),
            },
            WorkflowStates::Verifying(state) => match state.run(ctx) {
                Event::Done(ev) => WorkflowStates::Done(ev.into()),
                Event::Fail(ev) => WorkflowStates::Failed(ev.into()),
                event => illegal(event, "Verifying"),
            },
            WorkflowStates::Done(state) => match state.run(ctx) {
                Event::Cleanup(ev) => WorkflowStates::Cleanup(ev.into()),
                event => illegal(event, "Done"),
            },
            WorkflowStates::Failed(state) => match state.run(ctx) {
                Event::Cleanup(ev) => WorkflowStates::Cleanup(ev.into()),
                event => illegal(event, "Failed"),
            },
            WorkflowStates::Cleanup(state) => match state.run(ctx) {
                Event::Exit(ev) => WorkflowStates::Cleanup(ev.into()),
                event => illegal(event, "Cleanup"),
            },
        }
    }
}

fn illegal(event: Event, state: &str) -> ! {
    unreachable!("illegal event {:#?} at current state {}", event, state)
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<SelectPortEvent> for PortSelectionState {
    fn from(_: SelectPortEvent) -> PortSelectionState {
        PortSelectionState {}
    }
}

impl From<ConnectEvent> for ConnectingState {
    fn from(_: ConnectEvent) -> ConnectingState {
        ConnectingState {}
    }
}

impl From<BackUpEvent> for BackingUpState {
    fn from(event: BackUpEvent) -> BackingUpState {
        BackingUpState {
            session: Some(event.session),
        }
    }
}

impl From<DiscoverPartitionEvent> for PartitionDiscoveryState {
    fn from(event: DiscoverPartitionEvent) -> PartitionDiscoveryState {
        PartitionDiscoveryState {
            session: Some(event.session),
        }
    }
}

impl From<AwaitBootloaderEvent> for BootloaderWaitState {
    fn from(event: AwaitBootloaderEvent) -> BootloaderWaitState {
        BootloaderWaitState {
            session: Some(event.session),
            manual_retry: false,
        }
    }
}
impl From<ManualRetryEvent> for BootloaderWaitState {
    fn from(event: ManualRetryEvent) -> BootloaderWaitState {
        BootloaderWaitState {
            session: Some(event.session),
            manual_retry: true,
        }
    }
}

impl From<EnableEvent> for EnablingState {
    fn from(event: EnableEvent) -> EnablingState {
        EnablingState {
            session: Some(event.session),
        }
    }
}

impl From<VerifyEvent> for VerifyingState {
    fn from(event: VerifyEvent) -> VerifyingState {
        VerifyingState {
            session: Some(event.session),
        }
    }
}

impl From<DoneEvent> for DoneState {
    fn from(event: DoneEvent) -> DoneState {
        DoneState {
            session: event.session,
            outcome: Some(event.outcome),
        }
    }
}

impl From<FailEvent> for FailedState {
    fn from(event: FailEvent) -> FailedState {
        FailedState {
            session: event.session,
            stage: event.stage,
            error: Some(event.error),
        }
    }
}

impl From<CleanupEvent> for CleanupState {
    fn from(event: CleanupEvent) -> CleanupState {
        CleanupState {
            session: event.session,
            outcome: Some(event.outcome),
            should_exit: false,
        }
    }
}
impl From<ExitEvent> for CleanupState {
    fn from(event: ExitEvent) -> CleanupState {
        CleanupState {
            session: None,
            outcome: Some(event.outcome),
            should_exit: true,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
