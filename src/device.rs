//! The device record, filled in stage by stage during a run.

use std::collections::BTreeMap;

/// What we know about the panel attached to the serial port.
///
/// Created with only the port known. Fields are set as each stage succeeds
/// and nothing survives the process except what the backup snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Device {
    pub serial_port: String,
    pub device_id: Option<String>,
    /// Subsystem name (e.g. `ethaddr`) to MAC address.
    pub mac_addresses: BTreeMap<String, String>,
    pub data_partition: Option<u32>,
    pub api_enabled: bool,
}

impl Device {
    pub fn new<'a>(serial_port: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        Device {
            serial_port: serial_port.into().into_owned(),
            ..Default::default()
        }
    }
}
