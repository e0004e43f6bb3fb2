//! Finds the data partition from what U-Boot prints.
//!
//! `printenv` tells which MMC device the board boots from, `mmc part` lists
//! its partitions. The data partition is taken to be the largest one: the
//! partition type column is not reliable enough on these boards to match on.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::error::{Result, UnlockError};
use crate::report::Reporter;
use crate::settings::{Delays, Settings};

use super::BootloaderSession;

/// One row of the `mmc part` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionEntry {
    pub index: u32,
    pub size: u64,
}

/// What partition discovery learned about the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Value of `mmcdev` in the environment.
    pub mmc_dev: u32,
    pub data_partition: PartitionEntry,
    /// `ethaddr`, `eth1addr`... as found in the environment.
    pub mac_addresses: BTreeMap<String, String>,
}

pub struct PartitionLocator {
    mmcdev_key: String,
    delays: Delays,
}

impl PartitionLocator {
    pub fn new(settings: &Settings) -> Self {
        PartitionLocator {
            mmcdev_key: settings.mmcdev_key.clone(),
            delays: settings.delays.clone(),
        }
    }

    pub fn locate(
        &self,
        session: &mut BootloaderSession,
        reporter: &mut dyn Reporter,
    ) -> Result<StorageLayout> {
        reporter.status("Reading bootloader environment...");
        let env = session.command("printenv", self.delays.env_settle)?;
        let value = parse_env_value(&env, &self.mmcdev_key)?;
        let mmc_dev: u32 = value.parse().map_err(|_| {
            UnlockError::Parse(format!("`{}{}` is not a device index", self.mmcdev_key, value))
        })?;
        let mac_addresses = parse_mac_addresses(&env);
        debug!("mmcdev={}, {} MAC address(es)", mmc_dev, mac_addresses.len());

        reporter.status("Reading partition table...");
        let selected = session.command(&format!("mmc dev {}", mmc_dev), self.delays.mmc_dev_settle)?;
        if selected.contains("no card present") || selected.contains("Invalid") {
            warn!("`mmc dev {}` said: {}", mmc_dev, selected.trim());
        }
        let table = session.command("mmc part", self.delays.part_settle)?;
        let entries = parse_partition_table(&table);
        let data_partition = select_data_partition(&entries)?;
        info!(
            "Data partition is {}:{} (largest of {}, size {})",
            mmc_dev,
            data_partition.index,
            entries.len(),
            data_partition.size
        );

        Ok(StorageLayout {
            mmc_dev,
            data_partition,
            mac_addresses,
        })
    }
}

/// Value of the first line starting with `key` (falling back to the first
/// line merely containing it), trimmed.
pub fn parse_env_value(text: &str, key: &str) -> Result<String> {
    let value_after = |line: &str| {
        line.find(key)
            .map(|at| line[at + key.len()..].trim().to_string())
    };
    text.lines()
        .find(|line| line.trim_start().starts_with(key))
        .or_else(|| text.lines().find(|line| line.contains(key)))
        .and_then(value_after)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| UnlockError::Parse(format!("`{}` not found in environment", key)))
}

/// Every `eth<N>addr=` / `ethaddr=` entry of a `printenv` dump.
pub fn parse_mac_addresses(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (name, value) = line.trim().split_once('=')?;
            let is_mac_key = name.starts_with("eth")
                && name.ends_with("addr")
                && name[3..name.len() - 4].chars().all(|c| c.is_ascii_digit());
            if is_mac_key {
                Some((name.to_string(), value.trim().to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Rows of `mmc part` output: lines starting with a decimal digit, with at
/// least three whitespace separated fields, the third one being the size.
/// Rows whose index or size does not parse are skipped.
pub fn parse_partition_table(text: &str) -> Vec<PartitionEntry> {
    text.lines()
        .map(str::trim_start)
        .filter(|line| line.chars().next().map_or(false, |c| c.is_ascii_digit()))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            let index = fields[0].parse().ok()?;
            let size = parse_number(fields[2])?;
            Some(PartitionEntry { index, size })
        })
        .collect()
}

/// The largest partition, the first one listed when sizes tie.
pub fn select_data_partition(entries: &[PartitionEntry]) -> Result<PartitionEntry> {
    entries
        .iter()
        .fold(None, |best: Option<PartitionEntry>, entry| match best {
            Some(b) if b.size >= entry.size => Some(b),
            _ => Some(*entry),
        })
        .ok_or_else(|| UnlockError::Parse("no partition found in `mmc part` output".into()))
}

/// Decimal, or hexadecimal with a `0x` prefix as U-Boot prints sector counts.
fn parse_number(field: &str) -> Option<u64> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
