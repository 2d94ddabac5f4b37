//! Scoped Register Window
//!
//! Access path to a device's memory-mapped registers that cannot outlive
//! the device binding:
//!
//! ```text
//! Driver state ──owns──▶ RegisterWindow ──access(token)──▶ Accessor
//!                              │                               │
//!                              ▼                               ▼
//!                         WindowSlot  ◀──revoked on unbind── read32/write32
//! ```
//!
//! The window is created at probe time but the mapping itself is
//! deferred to the first access. Every `read32`/`write32` re-validates
//! the slot instead of caching a raw address, so an unbind that lands in
//! the middle of a multi-register sequence makes the next access fail
//! with [`Error::IoFault`] rather than touching a dead mapping.

use alloc::{sync::Arc, vec};
use core::ptr::{read_volatile, write_volatile};

use crate::device::{BoundDevice, Device};
use crate::error::{Error, Result};

/// Memory-backed register block for tests and simulated platforms.
///
/// Stands in for a real register file: drivers go through the exact same
/// window/accessor path whether the resource is backed by hardware or by
/// this block. `peek`/`poke` exist for test harnesses to inspect what a
/// driver wrote; they panic on out-of-range offsets.
pub struct SimRegs {
    size: usize,
    words: spin::Mutex<vec::Vec<u32>>,
}

impl SimRegs {
    /// Allocate a zeroed register block of `size` bytes (multiple of 4).
    pub fn new(size: usize) -> Arc<Self> {
        assert!(size > 0 && size % 4 == 0);
        Arc::new(Self {
            size,
            words: spin::Mutex::new(vec![0; size / 4]),
        })
    }

    /// Size of the block in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Read a register directly, bypassing the window (test use).
    pub fn peek(&self, offset: usize) -> u32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.size);
        self.words.lock()[offset / 4]
    }

    /// Write a register directly, bypassing the window (test use).
    pub fn poke(&self, value: u32, offset: usize) {
        assert!(offset % 4 == 0 && offset + 4 <= self.size);
        self.words.lock()[offset / 4] = value;
    }

    fn load(&self, offset: usize) -> u32 {
        self.words.lock()[offset / 4]
    }

    fn store(&self, value: u32, offset: usize) {
        self.words.lock()[offset / 4] = value;
    }
}

/// Backing store of an I/O resource.
#[derive(Clone)]
enum Backing {
    /// Physical registers at a fixed bus address.
    Mmio { base: usize },
    /// Memory-backed simulated registers.
    Sim(Arc<SimRegs>),
}

impl Backing {
    /// `offset` has been validated against the window size and alignment.
    fn read32(&self, offset: usize) -> u32 {
        match self {
            // SAFETY: `IoResource::mmio` requires the region to be a
            // valid, mapped device region of the declared size for the
            // life of the resource, and `offset` is in bounds.
            Backing::Mmio { base } => unsafe { read_volatile((base + offset) as *const u32) },
            Backing::Sim(regs) => regs.load(offset),
        }
    }

    fn write32(&self, value: u32, offset: usize) {
        match self {
            // SAFETY: same contract as `read32`.
            Backing::Mmio { base } => unsafe { write_volatile((base + offset) as *mut u32, value) },
            Backing::Sim(regs) => regs.store(value, offset),
        }
    }
}

/// Description of the register region a device exposes.
#[derive(Clone)]
pub struct IoResource {
    backing: Backing,
    size: usize,
}

impl IoResource {
    /// Describe a physical MMIO region.
    ///
    /// # Safety
    ///
    /// - `base..base + size` must be a mapped device-memory region of a
    ///   single peripheral, valid for volatile 32-bit access.
    /// - The mapping must remain valid for the life of the resource.
    pub const unsafe fn mmio(base: usize, size: usize) -> Self {
        Self {
            backing: Backing::Mmio { base },
            size,
        }
    }

    /// Describe a simulated region backed by [`SimRegs`].
    pub fn sim(regs: Arc<SimRegs>) -> Self {
        let size = regs.size();
        Self {
            backing: Backing::Sim(regs),
            size,
        }
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

enum SlotState {
    /// Created but not yet mapped; mapping happens on first access.
    Unmapped,
    Mapped(Backing),
    /// Torn down by unbind or window drop; all further access fails.
    Revoked,
}

/// Device-attached revocation point shared between a window and the
/// device's unbind path.
pub(crate) struct WindowSlot {
    state: spin::Mutex<SlotState>,
}

impl WindowSlot {
    pub(crate) fn revoke(&self) {
        *self.state.lock() = SlotState::Revoked;
    }
}

/// Lazily mapped, binding-scoped window onto a device's registers.
pub struct RegisterWindow {
    dev: Device,
    res: IoResource,
    size: usize,
    slot: Arc<WindowSlot>,
}

impl RegisterWindow {
    /// Reserve a window over the first `size` bytes of the device's
    /// register resource. The mapping is deferred until first access.
    ///
    /// Fails with [`Error::ResourceUnavailable`] when the device has no
    /// I/O resource or the resource is smaller than `size`.
    pub fn map(dev: &Device, size: usize) -> Result<RegisterWindow> {
        let res = dev.io().cloned().ok_or_else(|| {
            log::error!("{}: no register resource", dev.name());
            Error::ResourceUnavailable
        })?;

        if size == 0 || size > res.size() {
            log::error!(
                "{}: register resource too small ({} < {} bytes)",
                dev.name(),
                res.size(),
                size
            );
            return Err(Error::ResourceUnavailable);
        }

        let slot = Arc::new(WindowSlot {
            state: spin::Mutex::new(SlotState::Unmapped),
        });
        dev.attach_window(&slot);

        Ok(RegisterWindow {
            dev: dev.clone(),
            res,
            size,
            slot,
        })
    }

    /// Obtain a register accessor, re-validating device liveness.
    ///
    /// The token must belong to this window's device and the binding
    /// must still be live; otherwise [`Error::Unbound`].
    pub fn access<'w>(&'w self, token: &BoundDevice<'_>) -> Result<Accessor<'w>> {
        if !self.dev.same_device(token.device()) || !self.dev.is_bound() {
            return Err(Error::Unbound);
        }
        Ok(Accessor { window: self })
    }

    fn with_mapping<R>(&self, offset: usize, op: impl FnOnce(&Backing) -> R) -> Result<R> {
        if offset % 4 != 0 || offset.checked_add(4).is_none_or(|end| end > self.size) {
            log::error!(
                "{}: register access out of window (offset {:#x}, size {:#x})",
                self.dev.name(),
                offset,
                self.size
            );
            return Err(Error::IoFault);
        }

        let mut state = self.slot.state.lock();
        match &*state {
            SlotState::Revoked => Err(Error::IoFault),
            SlotState::Mapped(backing) => Ok(op(backing)),
            SlotState::Unmapped => {
                let backing = self.res.backing.clone();
                let result = op(&backing);
                *state = SlotState::Mapped(backing);
                Ok(result)
            }
        }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        // The slot may already be revoked by unbind; revoking again is a
        // no-op. Either way no mapping survives the window.
        self.slot.revoke();
    }
}

/// Short-lived register accessor tied to one liveness check.
///
/// Each operation still re-validates the underlying slot, so a loss of
/// binding between two accesses surfaces as [`Error::IoFault`] on the
/// next one.
pub struct Accessor<'w> {
    window: &'w RegisterWindow,
}

impl Accessor<'_> {
    /// Read a 32-bit register at `offset` bytes into the window.
    pub fn read32(&self, offset: usize) -> Result<u32> {
        self.window.with_mapping(offset, |backing| backing.read32(offset))
    }

    /// Write a 32-bit register at `offset` bytes into the window.
    pub fn write32(&self, value: u32, offset: usize) -> Result<()> {
        self.window
            .with_mapping(offset, |backing| backing.write32(value, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;

    fn sim_device(name: &str, size: usize) -> (Device, Arc<SimRegs>) {
        let regs = SimRegs::new(size);
        let dev = Device::new(DeviceConfig::new(name).with_io(IoResource::sim(regs.clone())));
        (dev, regs)
    }

    #[test]
    fn read_write_through_window() {
        let (dev, regs) = sim_device("io-rw", 0x20);
        let window = RegisterWindow::map(&dev, 0x20).unwrap();

        let bound = dev.as_bound().unwrap();
        let io = window.access(&bound).unwrap();
        io.write32(0xdead_beef, 0x08).unwrap();
        assert_eq!(io.read32(0x08), Ok(0xdead_beef));
        assert_eq!(regs.peek(0x08), 0xdead_beef);
    }

    #[test]
    fn rejects_out_of_window_access() {
        let (dev, _regs) = sim_device("io-oob", 0x20);
        let window = RegisterWindow::map(&dev, 0x10).unwrap();

        let bound = dev.as_bound().unwrap();
        let io = window.access(&bound).unwrap();
        assert_eq!(io.read32(0x10), Err(Error::IoFault));
        assert_eq!(io.write32(0, 0x2), Err(Error::IoFault));
    }

    #[test]
    fn window_needs_a_large_enough_resource() {
        let (dev, _regs) = sim_device("io-small", 0x10);
        assert_eq!(
            RegisterWindow::map(&dev, 0x20).err(),
            Some(Error::ResourceUnavailable)
        );

        let bare = Device::new(DeviceConfig::new("io-none"));
        assert_eq!(
            RegisterWindow::map(&bare, 0x10).err(),
            Some(Error::ResourceUnavailable)
        );
    }

    #[test]
    fn unbind_revokes_access() {
        let (dev, _regs) = sim_device("io-unbind", 0x10);
        let window = RegisterWindow::map(&dev, 0x10).unwrap();

        let bound = dev.as_bound().unwrap();
        let io = window.access(&bound).unwrap();
        io.write32(1, 0x0).unwrap();

        // Unbind lands between two accesses of an ongoing sequence: the
        // accessor already exists, the next access faults.
        dev.unbind();
        assert_eq!(io.read32(0x0), Err(Error::IoFault));

        // A fresh token is not obtainable at all.
        assert_eq!(dev.as_bound().err(), Some(Error::Unbound));
    }

    #[test]
    fn dropped_windows_do_not_accumulate_on_the_device() {
        let (dev, _regs) = sim_device("io-window-churn", 0x10);

        for _ in 0..16 {
            let window = RegisterWindow::map(&dev, 0x10).unwrap();
            drop(window);
        }

        let _live = RegisterWindow::map(&dev, 0x10).unwrap();
        assert_eq!(dev.attached_window_count(), 1);
    }

    #[test]
    fn token_from_another_device_is_rejected() {
        let (dev, _regs) = sim_device("io-token-a", 0x10);
        let other = Device::new(DeviceConfig::new("io-token-b"));
        let window = RegisterWindow::map(&dev, 0x10).unwrap();

        let foreign = other.as_bound().unwrap();
        assert!(window.access(&foreign).is_err());
    }
}
