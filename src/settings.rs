//! Settings for the serial port, the bootloader console protocol and the
//! unlock procedure.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. Every delay used to pace the
//! bootloader console has a named default below: the console offers no
//! completion token, so these fixed waits are the only synchronization we get.

use std::path::PathBuf;
use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Defaults
// =============================================================================

/// Baud rate of the LDATA debug UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Timeout applied to each blocking read on the serial port.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Total number of attempts to open the serial port.
pub const DEFAULT_OPEN_ATTEMPTS: u32 = 3;
/// First backoff delay between open attempts, doubled after each failure.
pub const DEFAULT_OPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Printed by U-Boot on the LDATA board each time it is ready for a command.
pub const DEFAULT_PROMPT_BANNER: &str = "MX6UL_VAR_DART(mmc)==>";
/// Printed by the panel firmware once the local HTTP API is listening.
pub const DEFAULT_API_BANNER: &str = "HTTP API server started on port";

pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the single operator-assisted power-cycle retry.
pub const DEFAULT_MANUAL_RETRY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(60);
/// Time given to the board to start rebooting before listening for the API.
pub const DEFAULT_REBOOT_GRACE: Duration = Duration::from_secs(5);
/// Sleep between two polls of the serial input while waiting on a banner.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Period of the newline nudges sent while waiting for the prompt.
pub const DEFAULT_WAKE_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_ENV_SETTLE: Duration = Duration::from_secs(1);
pub const DEFAULT_MMC_DEV_SETTLE: Duration = Duration::from_millis(500);
pub const DEFAULT_PART_SETTLE: Duration = Duration::from_secs(1);
pub const DEFAULT_FILL_SETTLE: Duration = Duration::from_secs(1);
/// Pause after each single byte `mw.b` write.
pub const DEFAULT_BYTE_SETTLE: Duration = Duration::from_millis(200);
pub const DEFAULT_DUMP_SETTLE: Duration = Duration::from_secs(1);
pub const DEFAULT_FS_SETTLE: Duration = Duration::from_secs(1);

/// Physical address of the RAM scratch region used to stage the flag file.
pub const DEFAULT_SCRATCH_ADDR: u32 = 0x8200_0000;
/// Number of bytes zeroed in the scratch region before staging.
pub const DEFAULT_SCRATCH_LEN: u32 = 0x630_0000;
pub const DEFAULT_FLAG_VALUE: &[u8] = b"true\n";
/// Flag file checked by the panel firmware at startup.
pub const DEFAULT_FLAG_PATH: &str = "/HTTP_API_ALWAYS_ON";
/// MMC device index used in `ext4write`/`ext4ls`.
pub const DEFAULT_FS_DEVICE: u32 = 1;
/// Environment variable holding the boot MMC device index.
pub const DEFAULT_MMCDEV_KEY: &str = "mmcdev=";
pub const DEFAULT_BACKUP_DIR: &str = "ldata_backups";

// =============================================================================
// Public Interface
// =============================================================================

/// Pacing of the bootloader console.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Delays {
    pub poll_interval: Duration,
    pub wake_interval: Duration,
    pub env_settle: Duration,
    pub mmc_dev_settle: Duration,
    pub part_settle: Duration,
    pub fill_settle: Duration,
    pub byte_settle: Duration,
    pub dump_settle: Duration,
    pub fs_settle: Duration,
    pub reboot_grace: Duration,
}
impl Default for Delays {
    fn default() -> Self {
        Delays {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wake_interval: DEFAULT_WAKE_INTERVAL,
            env_settle: DEFAULT_ENV_SETTLE,
            mmc_dev_settle: DEFAULT_MMC_DEV_SETTLE,
            part_settle: DEFAULT_PART_SETTLE,
            fill_settle: DEFAULT_FILL_SETTLE,
            byte_settle: DEFAULT_BYTE_SETTLE,
            dump_settle: DEFAULT_DUMP_SETTLE,
            fs_settle: DEFAULT_FS_SETTLE,
            reboot_grace: DEFAULT_REBOOT_GRACE,
        }
    }
}
impl Delays {
    /// Every delay set to `delay`. Mostly useful to run the console protocol
    /// against a simulated device.
    pub fn uniform(delay: Duration) -> Self {
        Delays {
            poll_interval: delay,
            wake_interval: delay,
            env_settle: delay,
            mmc_dev_settle: delay,
            part_settle: delay,
            fill_settle: delay,
            byte_settle: delay,
            dump_settle: delay,
            fs_settle: delay,
            reboot_grace: delay,
        }
    }
}

/// Groups all settings used by `ldata-unlock` and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path. Selected by the caller, the
    /// unlock workflow never picks a port on its own.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,
    pub read_timeout: Duration,
    pub open_attempts: u32,
    pub open_backoff: Duration,

    pub prompt_banner: String,
    pub api_banner: String,
    pub prompt_timeout: Duration,
    pub manual_retry_timeout: Duration,
    pub api_timeout: Duration,
    pub delays: Delays,

    pub scratch_addr: u32,
    pub scratch_len: u32,
    pub flag_value: Vec<u8>,
    pub flag_path: String,
    pub fs_device: u32,
    pub mmcdev_key: String,

    /// Root directory under which one backup directory is created per run.
    pub backup_dir: PathBuf,
    /// Device identity supplied by the operator. Without it no backup is
    /// written.
    pub device_id: Option<String>,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use ldata_unlock::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// assert_eq!(settings.baud_rate, 115_200);
/// ```
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            path: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: DEFAULT_READ_TIMEOUT,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_backoff: DEFAULT_OPEN_BACKOFF,
            prompt_banner: DEFAULT_PROMPT_BANNER.into(),
            api_banner: DEFAULT_API_BANNER.into(),
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            manual_retry_timeout: DEFAULT_MANUAL_RETRY_TIMEOUT,
            api_timeout: DEFAULT_API_TIMEOUT,
            delays: Delays::default(),
            scratch_addr: DEFAULT_SCRATCH_ADDR,
            scratch_len: DEFAULT_SCRATCH_LEN,
            flag_value: DEFAULT_FLAG_VALUE.to_vec(),
            flag_path: DEFAULT_FLAG_PATH.into(),
            fs_device: DEFAULT_FS_DEVICE,
            mmcdev_key: DEFAULT_MMCDEV_KEY.into(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            device_id: None,
            _private_use_builder: (),
        }
    }
}

impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().into_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.settings.read_timeout = read_timeout;
        self
    }

    /// Set how many times opening the port is attempted (at least once).
    pub fn open_attempts(mut self, attempts: u32) -> Self {
        self.settings.open_attempts = attempts.max(1);
        self
    }

    pub fn open_backoff(mut self, backoff: Duration) -> Self {
        self.settings.open_backoff = backoff;
        self
    }

    pub fn prompt_banner<'a>(mut self, banner: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.prompt_banner = banner.into().into_owned();
        self
    }

    pub fn api_banner<'a>(mut self, banner: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.api_banner = banner.into().into_owned();
        self
    }

    pub fn prompt_timeout(mut self, timeout: Duration) -> Self {
        self.settings.prompt_timeout = timeout;
        self
    }

    pub fn manual_retry_timeout(mut self, timeout: Duration) -> Self {
        self.settings.manual_retry_timeout = timeout;
        self
    }

    pub fn api_timeout(mut self, timeout: Duration) -> Self {
        self.settings.api_timeout = timeout;
        self
    }

    /// Replace the whole set of console delays
    pub fn delays(mut self, delays: Delays) -> Self {
        self.settings.delays = delays;
        self
    }

    pub fn reboot_grace(mut self, grace: Duration) -> Self {
        self.settings.delays.reboot_grace = grace;
        self
    }

    pub fn scratch_addr(mut self, addr: u32) -> Self {
        self.settings.scratch_addr = addr;
        self
    }

    pub fn scratch_len(mut self, len: u32) -> Self {
        self.settings.scratch_len = len;
        self
    }

    pub fn flag_path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.flag_path = path.into().into_owned();
        self
    }

    pub fn fs_device(mut self, device: u32) -> Self {
        self.settings.fs_device = device;
        self
    }

    /// Set the root directory for backups
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.backup_dir = dir.into();
        self
    }

    /// Set the device identity recorded in the backup
    pub fn device_id<'a>(mut self, id: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.device_id = Some(id.into().into_owned());
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(settings.path, None);
    assert_eq!(settings.baud_rate, 115_200);
    assert_eq!(settings.data_bits, DataBits::Eight);
    assert_eq!(settings.parity, Parity::None);
    assert_eq!(settings.stop_bits, StopBits::One);
    assert_eq!(settings.flow_control, FlowControl::None);
    assert_eq!(settings.open_attempts, 3);
    assert_eq!(settings.prompt_timeout, Duration::from_secs(30));
    assert_eq!(settings.manual_retry_timeout, Duration::from_secs(60));
    assert_eq!(settings.api_timeout, Duration::from_secs(60));
    assert_eq!(settings.flag_value, b"true\n".to_vec());
    assert_eq!(settings.device_id, None);
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn baud_rate() {
    let baud_rate = 57_600;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn open_attempts_never_zero() {
    let settings = SettingsBuilder::new().open_attempts(0).finalize();
    assert_eq!(settings.open_attempts, 1);
}

#[test]
fn uniform_delays() {
    let delay = Duration::from_millis(3);
    let settings = SettingsBuilder::new()
        .delays(Delays::uniform(delay))
        .finalize();
    assert_eq!(settings.delays.byte_settle, delay);
    assert_eq!(settings.delays.reboot_grace, delay);
}

#[test]
fn reboot_grace_keeps_other_delays() {
    let settings = SettingsBuilder::new()
        .reboot_grace(Duration::from_secs(9))
        .finalize();
    assert_eq!(settings.delays.reboot_grace, Duration::from_secs(9));
    assert_eq!(settings.delays.byte_settle, DEFAULT_BYTE_SETTLE);
}

#[test]
fn device_id_and_backup_dir() {
    let settings = SettingsBuilder::new()
        .device_id("LDATA-1234")
        .backup_dir("/tmp/backups")
        .finalize();
    assert_eq!(settings.device_id.as_deref(), Some("LDATA-1234"));
    assert_eq!(settings.backup_dir, PathBuf::from("/tmp/backups"));
}
