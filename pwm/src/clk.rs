//! Clock Handle
//!
//! Owns the acquire/enable lifecycle of a device's reference clock and
//! exposes its current rate. The enable is strictly paired: a [`Clk`]
//! dropped while enabled disables the clock, so a driver state that
//! owns a `Clk` releases it automatically during teardown.
//!
//! Rates come from the device description; a real clock controller is
//! outside the scope of this subsystem.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::device::Device;
use crate::error::{Error, Result};

/// Shared clock state, owned by the device.
pub(crate) struct ClkCore {
    rate_hz: u64,
    enables: AtomicU32,
}

impl ClkCore {
    pub(crate) fn new(rate_hz: u64) -> Self {
        Self {
            rate_hz,
            enables: AtomicU32::new(0),
        }
    }

    pub(crate) fn enable_count(&self) -> u32 {
        self.enables.load(Ordering::Acquire)
    }
}

/// Handle to a device's reference clock.
pub struct Clk {
    core: Arc<ClkCore>,
    enabled: bool,
}

impl Clk {
    /// Acquire the device's reference clock.
    ///
    /// Fails with [`Error::ResourceUnavailable`] when the device
    /// description carries no clock.
    pub fn get(dev: &Device) -> Result<Clk> {
        let core = dev.clk_core().ok_or_else(|| {
            log::error!("{}: no reference clock", dev.name());
            Error::ResourceUnavailable
        })?;
        Ok(Clk {
            core,
            enabled: false,
        })
    }

    /// Prepare and enable the clock. Idempotent per handle.
    pub fn prepare_enable(&mut self) -> Result<()> {
        if !self.enabled {
            self.core.enables.fetch_add(1, Ordering::AcqRel);
            self.enabled = true;
        }
        Ok(())
    }

    /// Disable the clock if this handle enabled it.
    pub fn disable_unprepare(&mut self) {
        if self.enabled {
            self.core.enables.fetch_sub(1, Ordering::AcqRel);
            self.enabled = false;
        }
    }

    /// Current clock rate in Hz.
    pub fn rate(&self) -> u64 {
        self.core.rate_hz
    }
}

impl Drop for Clk {
    fn drop(&mut self) {
        self.disable_unprepare();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;

    #[test]
    fn enable_is_paired_with_drop() {
        let dev = Device::new(DeviceConfig::new("clk-pair").with_clock(24_000_000));

        let mut clk = Clk::get(&dev).unwrap();
        assert_eq!(clk.rate(), 24_000_000);
        assert_eq!(dev.clock_enable_count(), 0);

        clk.prepare_enable().unwrap();
        clk.prepare_enable().unwrap();
        assert_eq!(dev.clock_enable_count(), 1);

        drop(clk);
        assert_eq!(dev.clock_enable_count(), 0);
    }

    #[test]
    fn missing_clock() {
        let dev = Device::new(DeviceConfig::new("clk-missing"));
        assert_eq!(Clk::get(&dev).err(), Some(Error::ResourceUnavailable));
    }
}
