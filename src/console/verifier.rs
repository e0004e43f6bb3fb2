//! Reboots the board and waits for the firmware to announce the local API.

use std::{thread, time::Duration};

use log::info;

use crate::device::Device;
use crate::error::{Result, UnlockError};
use crate::report::Reporter;
use crate::settings::Settings;

use super::BootloaderSession;

pub struct ModificationVerifier {
    api_banner: String,
    api_timeout: Duration,
    reboot_grace: Duration,
}

impl ModificationVerifier {
    pub fn new(settings: &Settings) -> Self {
        ModificationVerifier {
            api_banner: settings.api_banner.clone(),
            api_timeout: settings.api_timeout,
            reboot_grace: settings.delays.reboot_grace,
        }
    }

    /// Reset the board once and watch its boot log for the API banner.
    ///
    /// Only meaningful after the flag file was confirmed on the partition.
    /// Returns the time it took for the banner to show up after the grace
    /// period.
    pub fn verify(
        &self,
        session: &mut BootloaderSession,
        device: &Device,
        reporter: &mut dyn Reporter,
    ) -> Result<Duration> {
        if !device.api_enabled {
            return Err(UnlockError::Verification(
                "flag file was never confirmed, refusing to reboot".into(),
            ));
        }

        reporter.status("Rebooting the panel...");
        session.reset()?;
        thread::sleep(self.reboot_grace);

        reporter.status("Waiting for the local API to start...");
        let elapsed = session.wait_for_banner(&self.api_banner, self.api_timeout, None, reporter)?;
        info!("API banner seen {:?} after reboot grace", elapsed);
        Ok(elapsed)
    }
}
