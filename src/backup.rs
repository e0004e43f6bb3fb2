//! Snapshot of the device identity, taken before anything is modified.
//!
//! Each run gets its own `backup_<YYYYmmdd_HHMMSS>` directory under the backup
//! root, holding a `device_info.json`. The name only has second resolution:
//! two runs started within the same second share a directory.
//!
//! Nothing is written when the device id is unknown, which is the usual case
//! on a first unlock unless the operator supplies it.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{Result, UnlockError};

pub const BACKUP_FILE_NAME: &str = "device_info.json";

/// Identity fields of the device record, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub device_id: String,
    pub mac_addresses: BTreeMap<String, String>,
    pub data_partition: Option<u32>,
}

impl BackupSnapshot {
    /// `None` when the device id is not known.
    pub fn of(device: &Device) -> Option<Self> {
        let device_id = device.device_id.clone()?;
        Some(BackupSnapshot {
            device_id,
            mac_addresses: device.mac_addresses.clone(),
            data_partition: device.data_partition,
        })
    }
}

#[derive(Debug)]
pub struct BackupManager {
    root: PathBuf,
    written: Option<PathBuf>,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BackupManager {
            root: root.into(),
            written: None,
        }
    }

    /// Directory of the snapshot written by this manager, if any.
    pub fn written(&self) -> Option<&Path> {
        self.written.as_deref()
    }

    pub fn backup(&mut self, device: &Device) -> Result<Option<PathBuf>> {
        self.backup_at(device, Local::now())
    }

    /// Write the snapshot of `device` into a directory named after `now`.
    /// Only the first successful call writes anything.
    pub fn backup_at(&mut self, device: &Device, now: DateTime<Local>) -> Result<Option<PathBuf>> {
        if let Some(dir) = &self.written {
            info!("Backup already written to {}", dir.display());
            return Ok(Some(dir.clone()));
        }

        let snapshot = match BackupSnapshot::of(device) {
            Some(snapshot) => snapshot,
            None => {
                warn!("Device id unknown, no backup written");
                return Ok(None);
            }
        };

        let dir = self
            .root
            .join(format!("backup_{}", now.format("%Y%m%d_%H%M%S")));
        fs::create_dir_all(&dir).map_err(UnlockError::Backup)?;
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(dir.join(BACKUP_FILE_NAME), json).map_err(UnlockError::Backup)?;

        info!("Created backup at {}", dir.display());
        self.written = Some(dir.clone());
        Ok(Some(dir))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
