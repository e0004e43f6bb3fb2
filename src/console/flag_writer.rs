//! Stages the API flag file in RAM and persists it to the data partition.
//!
//! The console takes one discrete command per line, so the file content is
//! poked into memory one byte at a time, read back with `md.b`, and only then
//! copied to the ext4 data partition with `ext4write`. Each step gates the
//! next one; nothing touches the flash before the RAM copy is confirmed.
//!
//! Once `ext4write` has been sent the outcome on the device is unknown until
//! the directory listing says otherwise. A run interrupted at that point cannot
//! be resumed safely and is not retried.

use std::convert::TryFrom;

use log::{debug, error, info, warn};

use crate::device::Device;
use crate::error::{Result, UnlockError};
use crate::report::Reporter;
use crate::settings::{Delays, Settings};

use super::BootloaderSession;

/// Writes the flag file, at most once per instance.
pub struct FlagWriter {
    scratch_addr: u32,
    scratch_len: u32,
    flag_value: Vec<u8>,
    flag_path: String,
    fs_device: u32,
    delays: Delays,
    /// Set as soon as `ext4write` is about to be sent.
    persist_attempted: bool,
}

impl FlagWriter {
    pub fn new(settings: &Settings) -> Self {
        FlagWriter {
            scratch_addr: settings.scratch_addr,
            scratch_len: settings.scratch_len,
            flag_value: settings.flag_value.clone(),
            flag_path: settings.flag_path.clone(),
            fs_device: settings.fs_device,
            delays: settings.delays.clone(),
            persist_attempted: false,
        }
    }

    /// Whether `ext4write` was already issued by this writer.
    pub fn persist_attempted(&self) -> bool {
        self.persist_attempted
    }

    /// Run the whole procedure. `device.api_enabled` becomes `true` only when
    /// the flag file shows up in the partition listing.
    pub fn enable(
        &mut self,
        session: &mut BootloaderSession,
        device: &mut Device,
        reporter: &mut dyn Reporter,
    ) -> Result<()> {
        let partition = logged("validate partition", validate_partition(device.data_partition))?;
        if self.persist_attempted {
            return logged("guard", Err(UnlockError::AlreadyPersisted));
        }

        reporter.status("Clearing scratch memory...");
        logged("zero scratch", self.zero_scratch(session))?;
        reporter.status("Writing flag to memory...");
        logged("write flag bytes", self.write_flag_bytes(session))?;
        logged("verify memory", self.verify_scratch(session))?;

        reporter.status("Persisting flag file to the data partition...");
        self.persist_attempted = true;
        logged("ext4write", self.persist(session, partition))?;
        logged("verify file", self.verify_persisted(session, partition))?;

        device.api_enabled = true;
        info!("Flag file {} is on {}:{}", self.flag_path, self.fs_device, partition);
        Ok(())
    }

    fn zero_scratch(&self, session: &mut BootloaderSession) -> Result<()> {
        let line = format!("mw.b 0x{:08x} 0 {:x}", self.scratch_addr, self.scratch_len);
        session.command(&line, self.delays.fill_settle)?;
        Ok(())
    }

    fn write_flag_bytes(&self, session: &mut BootloaderSession) -> Result<()> {
        for (offset, byte) in self.flag_value.iter().enumerate() {
            let addr = self.address_at(offset)?;
            session.command(&format!("mw.b 0x{:08x} 0x{:02x}", addr, byte), self.delays.byte_settle)?;
        }
        Ok(())
    }

    fn verify_scratch(&self, session: &mut BootloaderSession) -> Result<()> {
        let line = format!("md.b 0x{:08x} 0x{:x}", self.scratch_addr, self.flag_value.len());
        let dump = session.command(&line, self.delays.dump_settle)?;
        let dumped = dumped_bytes(&dump, self.flag_value.len());
        debug!("Dumped {:02x?}", dumped);

        let missing: Vec<String> = self
            .flag_value
            .iter()
            .filter(|b| !dumped.contains(*b))
            .map(|b| format!("{:02x}", b))
            .collect();
        if !missing.is_empty() {
            return Err(UnlockError::Verification(format!(
                "byte(s) {} missing from memory dump",
                missing.join(" ")
            )));
        }
        if dumped != self.flag_value {
            warn!("Memory dump holds the flag bytes but not in the expected order");
        }
        Ok(())
    }

    fn persist(&self, session: &mut BootloaderSession, partition: u32) -> Result<()> {
        let line = format!(
            "ext4write mmc {}:{} 0x{:08x} {} {:#x}",
            self.fs_device,
            partition,
            self.scratch_addr,
            self.flag_path,
            self.flag_value.len()
        );
        let out = session.command(&line, self.delays.fs_settle)?;
        debug!("ext4write said: {}", out.trim());
        Ok(())
    }

    fn verify_persisted(&self, session: &mut BootloaderSession, partition: u32) -> Result<()> {
        let listing = session.command(
            &format!("ext4ls mmc {}:{}", self.fs_device, partition),
            self.delays.fs_settle,
        )?;
        let file_name = self.flag_path.trim_start_matches('/');
        if lists_file(&listing, file_name) {
            Ok(())
        } else {
            Err(UnlockError::Verification(format!(
                "{} not listed on {}:{}",
                file_name, self.fs_device, partition
            )))
        }
    }

    fn address_at(&self, offset: usize) -> Result<u32> {
        u32::try_from(offset)
            .ok()
            .and_then(|o| self.scratch_addr.checked_add(o))
            .ok_or_else(|| UnlockError::Verification("flag does not fit in scratch memory".into()))
    }
}

/// The first `count` byte values of an `md.b` dump, in address order.
///
/// Dump lines look like `82000000: 74 72 75 65 0a    true.`; anything not
/// shaped like that (the echoed command, the prompt) is ignored.
pub fn dumped_bytes(text: &str, count: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(count);
    for line in text.lines() {
        let line = line.trim();
        let rest = match line.split_once(':') {
            Some((addr, rest)) if !addr.is_empty() && addr.chars().all(|c| c.is_ascii_hexdigit()) => {
                rest
            }
            _ => continue,
        };
        for token in rest.split_whitespace() {
            if bytes.len() == count || token.len() != 2 {
                break;
            }
            match u8::from_str_radix(token, 16) {
                Ok(b) => bytes.push(b),
                Err(_) => break,
            }
        }
        if bytes.len() == count {
            break;
        }
    }
    bytes
}

/// Whether an `ext4ls` listing has a regular file entry named `name`.
///
/// Entries look like `         5 HTTP_API_ALWAYS_ON`. Error lines (`** ... **`)
/// can carry the file name too, for instance late output of a failed
/// `ext4write`, and never count.
fn lists_file(listing: &str, name: &str) -> bool {
    listing.lines().map(str::trim).any(|line| {
        if line.starts_with("**") {
            return false;
        }
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next(), columns.next()) {
            (Some(size), Some(entry), None) => {
                size.chars().all(|c| c.is_ascii_digit()) && entry == name
            }
            _ => false,
        }
    })
}

fn validate_partition(partition: Option<u32>) -> Result<u32> {
    match partition {
        Some(index) if index > 0 => Ok(index),
        _ => Err(UnlockError::MissingPartition),
    }
}

fn logged<T>(step: &str, result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        error!("Enabling API access, step `{}` failed: {}", step, e);
    }
    result
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_is_read_in_address_order() {
        let dump = "md.b 0x82000000 0x5\r\n82000000: 74 72 75 65 0a                                   true.\r\nMX6UL_VAR_DART(mmc)==> ";
        assert_eq!(dumped_bytes(dump, 5), b"true\n".to_vec());
    }

    #[test]
    fn listing_needs_a_file_entry() {
        let listing = "ext4ls mmc 1:2\r\n\
            <DIR>       4096 .\r\n\
            <DIR>       4096 ..\r\n\
                           5 HTTP_API_ALWAYS_ON\r\n\
            MX6UL_VAR_DART(mmc)==> ";
        assert!(lists_file(listing, "HTTP_API_ALWAYS_ON"));
        assert!(!lists_file(listing, "HTTP_API"));
    }

    #[test]
    fn write_errors_naming_the_file_are_not_entries() {
        let listing = "ext4ls mmc 1:2\r\n\
            ** Error ext4fs_write() **\r\n\
            ** Unable to write file /HTTP_API_ALWAYS_ON **\r\n\
            <DIR>       4096 .\r\n\
            <DIR>       4096 ..\r\n\
            <DIR>      16384 lost+found\r\n\
            MX6UL_VAR_DART(mmc)==> ";
        assert!(!lists_file(listing, "HTTP_API_ALWAYS_ON"));
        assert!(!lists_file("HTTP_API_ALWAYS_ON\r\n", "HTTP_API_ALWAYS_ON"));
        assert!(!lists_file("<DIR> 4096 HTTP_API_ALWAYS_ON\r\n", "HTTP_API_ALWAYS_ON"));
    }

    #[test]
    fn dump_stops_at_count() {
        let dump = "82000000: 74 72 75 65 0a 00 00 00 00 00 00 00 00 00 00 00    true............";
        assert_eq!(dumped_bytes(dump, 5), b"true\n".to_vec());
    }

    #[test]
    fn dump_without_data_lines() {
        assert!(dumped_bytes("Unknown command 'md.b' - try 'help'\n", 5).is_empty());
    }

    #[test]
    fn partition_must_be_known_and_non_zero() {
        assert!(matches!(validate_partition(None), Err(UnlockError::MissingPartition)));
        assert!(matches!(validate_partition(Some(0)), Err(UnlockError::MissingPartition)));
        assert_eq!(validate_partition(Some(3)).unwrap(), 3);
    }
}
