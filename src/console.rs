//! Everything spoken over the U-Boot console of the LDATA board.
//!
//! The console is a plain line interpreter: we type a command followed by a
//! newline and whatever it prints comes back on the same line. There is no
//! framing and no acknowledgement, so every operation here works the same way:
//! send one line, wait a fixed settle delay, then look for expected substrings
//! in what was printed.
//!
//! ```ignore
//! use crate::console::{BootloaderSession, PartitionLocator};
//!
//! let mut session = BootloaderSession::new(transport, &settings);
//! session.wait_for_prompt(settings.prompt_timeout, &mut reporter)?;
//! let layout = PartitionLocator::new(&settings).locate(&mut session, &mut reporter)?;
//! ```

mod flag_writer;
mod locator;
mod session;
mod verifier;

pub use flag_writer::{dumped_bytes, FlagWriter};
pub use locator::{
    parse_env_value, parse_mac_addresses, parse_partition_table, select_data_partition,
    PartitionEntry, PartitionLocator, StorageLayout,
};
pub use session::{BootloaderSession, SessionState};
pub use verifier::ModificationVerifier;
