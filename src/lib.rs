//! `ldata-unlock` re-enables the local HTTP API of a Leviton LDATA smart panel
//! by talking to its U-Boot console over the debug UART.
//!
//! The firmware starts its local API only when a file named
//! `HTTP_API_ALWAYS_ON` exists on the data partition of the on-board eMMC. The
//! bootloader has no command to create a file from text, so the content is
//! staged byte by byte in RAM with `mw.b`, checked with `md.b` and then copied
//! to the ext4 partition with `ext4write`. The board is finally reset and its
//! boot log watched for the API banner.
//!
//! The console has no framing and no acknowledgements. Every exchange is a
//! line written, a fixed settle delay, and a substring search in whatever came
//! back. Success of a write is never assumed from the write itself, only from a
//! later read back.
//!
//! The procedure is run as a state machine implemented in terms of **states**
//! and **transitions** between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Transitioning from one state to another consumes the original state and
//!   renders it unusable. Any transition back to that state would create a new
//!   state.
//! * Data can be transferred from one state to the next by attaching it to the
//!   transition event. The console session itself travels this way.
//!
//! The implementation of state transitions leverages `rust`'s `From` and `Into`
//! pattern. Only transitions for which the `From` trait is implemented are
//! authorized and any other transition would be detected at compile-time as an
//! error.
//!
//! **Example**
//!
//! ```no_run
//! use ldata_unlock::{factory, LogReporter, SettingsBuilder};
//!
//! let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
//! let mut workflow = factory(settings, Box::new(LogReporter), Box::new(|_: &str| true));
//! let outcome = workflow.run();
//! println!("exit code {}", outcome.exit_code());
//! ```

mod backup;
mod console;
mod device;
mod error;
mod report;
mod settings;
mod transport;
mod utils;
mod workflow;

pub use backup::{BackupManager, BackupSnapshot, BACKUP_FILE_NAME};
pub use console::{
    dumped_bytes, parse_env_value, parse_mac_addresses, parse_partition_table,
    select_data_partition, BootloaderSession, FlagWriter, ModificationVerifier, PartitionEntry,
    PartitionLocator, SessionState, StorageLayout,
};
pub use device::Device;
pub use error::{Result, UnlockError};
pub use report::{LogReporter, Operator, Reporter};
pub use settings::{
    Delays, Settings, SettingsBuilder, DEFAULT_API_TIMEOUT, DEFAULT_BACKUP_DIR, DEFAULT_BAUD_RATE,
    DEFAULT_PROMPT_TIMEOUT,
};
pub use transport::{SerialTransport, Transport, MAX_READ_CHUNK};
pub use utils::{select_port, wait_for_port, ConsoleReporter, PortWait, TermOperator};
pub use workflow::{factory, Connector, Outcome, Stage, UnlockWorkflow};
