//! Events for the unlock workflow state machine.
//!
//! This modules is private and restricted to the
//! [`workflow`](crate::workflow) scope. The public interface of the state
//! machine is provided by [`workflow`](crate::workflow).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.
//!
//! Once a console session exists it travels from state to state inside the
//! events, so that the state owning it is always the one that must release it.

use crate::console::BootloaderSession;
use crate::error::UnlockError;

use super::state_machine::{Outcome, Stage};

// =============================================================================
// Crate-Public Interface
// =============================================================================

// SelectPortEvent =============================================================

/// Fired from `Init` to move on to checking the port handed over by the
/// caller.
#[derive(Debug)]
pub(crate) struct SelectPortEvent {}

// ConnectEvent ================================================================

/// Fired once a port path is known and recorded in the device record.
#[derive(Debug)]
pub(crate) struct ConnectEvent {}

// BackUpEvent =================================================================

/// Fired after the serial port was opened and a console session started.
#[derive(Debug)]
pub(crate) struct BackUpEvent {
    pub session: BootloaderSession,
}

// DiscoverPartitionEvent ======================================================

/// Fired after the backup step, whether or not a snapshot could be written.
#[derive(Debug)]
pub(crate) struct DiscoverPartitionEvent {
    pub session: BootloaderSession,
}

// AwaitBootloaderEvent ========================================================

/// Fired once the data partition is known, to synchronize on the bootloader
/// prompt before anything is modified.
#[derive(Debug)]
pub(crate) struct AwaitBootloaderEvent {
    pub session: BootloaderSession,
}

// ManualRetryEvent ============================================================

/// Fired when the prompt did not show up and the operator agreed to power
/// cycle the board. Can only happen once per run.
#[derive(Debug)]
pub(crate) struct ManualRetryEvent {
    pub session: BootloaderSession,
}

// EnableEvent =================================================================

/// Fired when the bootloader prompt is ready.
#[derive(Debug)]
pub(crate) struct EnableEvent {
    pub session: BootloaderSession,
}

// VerifyEvent =================================================================

/// Fired after the flag file was confirmed on the data partition.
#[derive(Debug)]
pub(crate) struct VerifyEvent {
    pub session: BootloaderSession,
}

// DoneEvent ===================================================================

/// Fired on success or when the operator declined to go on.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub session: Option<BootloaderSession>,
    pub outcome: Outcome,
}

// FailEvent ===================================================================

/// Fired from any stage on an unhandled error.
#[derive(Debug)]
pub(crate) struct FailEvent {
    pub session: Option<BootloaderSession>,
    pub stage: Stage,
    pub error: UnlockError,
}

// CleanupEvent ================================================================

/// Fired by both `Done` and `Failed`, leading to the release of the serial
/// port.
#[derive(Debug)]
pub(crate) struct CleanupEvent {
    pub session: Option<BootloaderSession>,
    pub outcome: Outcome,
}

// ExitEvent ===================================================================

/// The last event of the workflow. It makes the event loop return the outcome
/// to the caller.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub outcome: Outcome,
}

// Events enum ==================================================================

/// Events that can be triggered within the unlock workflow.
///
/// Each possible value holds an `event`, which in turn may hold additional data
/// for the state transition. Such data is passed by the origin state for
/// potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    SelectPort(SelectPortEvent),
    Connect(ConnectEvent),
    BackUp(BackUpEvent),
    DiscoverPartition(DiscoverPartitionEvent),
    AwaitBootloader(AwaitBootloaderEvent),
    ManualRetry(ManualRetryEvent),
    Enable(EnableEvent),
    Verify(VerifyEvent),
    Done(DoneEvent),
    Fail(FailEvent),
    Cleanup(CleanupEvent),
    Exit(ExitEvent),
}
