//! Chip, Hardware-Operations Contract and Registration
//!
//! The pieces a controller driver plugs into:
//!
//! ```text
//! Subsystem requests
//!        ↓
//! Registration (RAII: chip-add / chip-remove)
//!        ↓
//! Chip<T> dispatch (per-chip serialization)
//!        ↓
//! PwmOps callbacks (T = driver state)
//!        ↓
//! RegisterWindow / Clk
//! ```
//!
//! A [`Chip`] owns one contiguous allocation holding both the generic
//! chip header and the driver's private state, so the two can never have
//! decoupled lifetimes and the state's address is fixed from construction
//! to teardown. The subsystem keeps referring to that address for as long
//! as the chip is registered.

use alloc::{
    alloc::{Layout, alloc, dealloc},
    collections::BTreeMap,
    string::{String, ToString},
};
use core::ops::Deref;
use core::ptr::NonNull;

use crate::device::{BoundDevice, Device};
use crate::error::{Error, Result};
use crate::waveform::{Rounding, RoundedWaveform, Waveform};

/// One PWM output line on a chip.
///
/// Carries only the channel index; it is handed to every hardware
/// operation. Obtained from [`Chip::channel`], which validates the index
/// against the chip's channel count.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channel {
    index: u32,
}

impl Channel {
    /// Index of this channel within its chip.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// The hardware-operations contract a controller driver implements.
///
/// `Self` is the driver's private state, stored inside the chip block and
/// reachable through [`Chip::drvdata`]. The subsystem serializes the four
/// operations per chip; implementations do no locking of their own.
pub trait PwmOps: Sized + Send + Sync + 'static {
    /// The driver-specific hardware representation of a waveform,
    /// typically fixed-width register values.
    type WfHw: Copy + Default + core::fmt::Debug;

    /// Convert a physical-unit waveform to the hardware representation.
    ///
    /// Pure calculation, no I/O. Values are floored to the hardware's
    /// cycle granularity and must never exceed the request; a floored
    /// duty larger than the floored period is clamped to the period.
    /// Fails with [`Error::ClockNotReady`] when the reference clock rate
    /// is zero.
    fn translate_to_hardware(
        chip: &Chip<Self>,
        channel: Channel,
        wf: &Waveform,
    ) -> Result<RoundedWaveform<Self::WfHw>>;

    /// Convert a hardware representation back to physical units.
    ///
    /// Pure calculation, no I/O; the exact inverse arithmetic of
    /// [`PwmOps::translate_to_hardware`].
    fn translate_from_hardware(
        chip: &Chip<Self>,
        channel: Channel,
        wfhw: &Self::WfHw,
    ) -> Result<Waveform>;

    /// Commit hardware-native values to the controller's registers.
    ///
    /// Performs all writes of one update in the controller-defined order.
    /// A failure mid-sequence (device unbound between writes) surfaces as
    /// [`Error::IoFault`] and leaves the hardware in the partial state
    /// the failed write produced; callers must not assume atomicity
    /// beyond what the controller's own latch mechanism provides.
    fn write_waveform(
        chip: &Chip<Self>,
        channel: Channel,
        wfhw: &Self::WfHw,
        bound: &BoundDevice<'_>,
    ) -> Result<()>;

    /// Read back the hardware-native values currently latched.
    fn read_waveform(
        chip: &Chip<Self>,
        channel: Channel,
        bound: &BoundDevice<'_>,
    ) -> Result<Self::WfHw>;
}

/// Generic chip handle, co-allocated ahead of the driver state.
struct ChipHeader {
    dev: Device,
    label: String,
    nchannels: u32,
    /// Serializes the dispatch surface per chip; stands in for the lock
    /// the surrounding subsystem holds around request handling.
    ops_lock: spin::Mutex<()>,
}

/// The single contiguous block: generic handle first, driver state at a
/// fixed offset behind it.
#[repr(C)]
struct ChipBlock<T> {
    header: ChipHeader,
    data: T,
}

/// A PWM controller bound to one driver-state type.
///
/// Holds the combined header/state block at a fixed address for its
/// whole lifetime; the block is constructed in place and never moved.
pub struct Chip<T: PwmOps> {
    block: NonNull<ChipBlock<T>>,
}

// SAFETY: the chip block is owned by exactly one `Chip` and the dispatch
// surface serializes mutation-free callback access through `ops_lock`;
// `T` itself is required to be `Send + Sync`.
unsafe impl<T: PwmOps> Send for Chip<T> {}

// SAFETY: shared access only hands out `&T` and `&ChipHeader`, both of
// which are `Sync`.
unsafe impl<T: PwmOps> Sync for Chip<T> {}

impl<T: PwmOps> Chip<T> {
    /// Allocate the combined chip/state block and construct the driver
    /// state in its final location.
    ///
    /// `init` is the driver-state initializer: it acquires the state's
    /// resources in field order and fails by returning an error, at
    /// which point every already-acquired resource is released in
    /// reverse order (ordinary drop order of the initializer's locals
    /// and partial value) before the error propagates. Fails with
    /// [`Error::AllocationFailure`] when the block cannot be allocated.
    pub fn new(
        dev: &Device,
        nchannels: u32,
        init: impl FnOnce(&Device) -> Result<T>,
    ) -> Result<Chip<T>> {
        if nchannels == 0 {
            return Err(Error::InvalidConfiguration);
        }

        let layout = Layout::new::<ChipBlock<T>>();
        // SAFETY: `layout` has nonzero size (the header is not
        // zero-sized).
        let raw = unsafe { alloc(layout) }.cast::<ChipBlock<T>>();
        let Some(block) = NonNull::new(raw) else {
            return Err(Error::AllocationFailure);
        };

        let header = ChipHeader {
            dev: dev.clone(),
            label: dev.name().to_string(),
            nchannels,
            ops_lock: spin::Mutex::new(()),
        };
        // SAFETY: `raw` is valid for writes of `ChipBlock<T>`; the field
        // is written before any read.
        unsafe { (&raw mut (*raw).header).write(header) };

        match init(dev) {
            // SAFETY: as above; the state lands at its final offset
            // inside the block and is never moved again.
            Ok(data) => unsafe { (&raw mut (*raw).data).write(data) },
            Err(err) => {
                // SAFETY: the header was initialized above and `data`
                // was not; drop only the header, then free the block.
                unsafe {
                    core::ptr::drop_in_place(&raw mut (*raw).header);
                    dealloc(raw.cast(), layout);
                }
                return Err(err);
            }
        }

        Ok(Chip { block })
    }

    fn header(&self) -> &ChipHeader {
        // SAFETY: `block` points to a fully initialized `ChipBlock<T>`
        // for the life of `self`.
        unsafe { &self.block.as_ref().header }
    }

    /// The device this chip belongs to.
    pub fn device(&self) -> &Device {
        &self.header().dev
    }

    /// The chip's label (its device name).
    pub fn label(&self) -> &str {
        &self.header().label
    }

    /// Number of PWM output lines on this chip.
    pub fn num_channels(&self) -> u32 {
        self.header().nchannels
    }

    /// The driver's private state.
    pub fn drvdata(&self) -> &T {
        // SAFETY: `block` points to a fully initialized `ChipBlock<T>`
        // for the life of `self`.
        unsafe { &self.block.as_ref().data }
    }

    /// Look up a channel by index.
    pub fn channel(&self, index: u32) -> Result<Channel> {
        if index < self.num_channels() {
            Ok(Channel { index })
        } else {
            Err(Error::InvalidConfiguration)
        }
    }

    fn check_channel(&self, channel: Channel) -> Result<()> {
        if channel.index < self.num_channels() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration)
        }
    }

    /// Report the waveform the hardware would actually produce for a
    /// request, without touching the hardware.
    pub fn round_waveform(&self, channel: Channel, wf: &Waveform) -> Result<(Waveform, Rounding)> {
        self.check_channel(channel)?;
        let _ops = self.header().ops_lock.lock();

        let rounded = T::translate_to_hardware(self, channel, wf)?;
        let actual = T::translate_from_hardware(self, channel, &rounded.hardware_waveform)?;
        Ok((actual, rounded.status))
    }

    /// Translate and commit a waveform to the hardware.
    pub fn apply_waveform(&self, channel: Channel, wf: &Waveform) -> Result<Rounding> {
        self.check_channel(channel)?;
        let _ops = self.header().ops_lock.lock();

        let rounded = T::translate_to_hardware(self, channel, wf)?;
        let bound = self.device().as_bound()?;
        T::write_waveform(self, channel, &rounded.hardware_waveform, &bound)?;
        Ok(rounded.status)
    }

    /// Read back the currently applied waveform in physical units.
    pub fn current_waveform(&self, channel: Channel) -> Result<Waveform> {
        self.check_channel(channel)?;
        let _ops = self.header().ops_lock.lock();

        let bound = self.device().as_bound()?;
        let wfhw = T::read_waveform(self, channel, &bound)?;
        T::translate_from_hardware(self, channel, &wfhw)
    }
}

impl<T: PwmOps> Drop for Chip<T> {
    fn drop(&mut self) {
        let raw = self.block.as_ptr();
        // SAFETY: both fields are initialized and dropped exactly once:
        // the driver state first, then the header, then the block is
        // freed with the layout it was allocated with.
        unsafe {
            core::ptr::drop_in_place(&raw mut (*raw).data);
            core::ptr::drop_in_place(&raw mut (*raw).header);
            dealloc(raw.cast(), Layout::new::<ChipBlock<T>>());
        }
    }
}

/// Chips currently registered with the subsystem, keyed by label.
static CHIPS: spin::Mutex<BTreeMap<String, u32>> = spin::Mutex::new(BTreeMap::new());

fn chip_add(label: &str, nchannels: u32) -> Result<()> {
    let mut chips = CHIPS.lock();
    if chips.contains_key(label) {
        log::error!("{}: chip already registered", label);
        return Err(Error::AlreadyRegistered);
    }
    chips.insert(label.to_string(), nchannels);
    log::info!("{}: registered pwm chip with {} channels", label, nchannels);
    Ok(())
}

fn chip_remove(label: &str) {
    CHIPS.lock().remove(label);
    log::info!("{}: removed pwm chip", label);
}

/// Whether a chip with the given label is currently registered.
pub fn is_registered(label: &str) -> bool {
    CHIPS.lock().contains_key(label)
}

/// Number of chips currently registered.
pub fn registered_count() -> usize {
    CHIPS.lock().len()
}

/// RAII guard owning the "chip is registered" fact.
///
/// Consumes the [`Chip`] on registration, so a second registration of
/// the same chip is unrepresentable; dropping the guard removes the chip
/// exactly once and then tears down the chip block itself.
pub struct Registration<T: PwmOps> {
    chip: Chip<T>,
}

impl<T: PwmOps> Registration<T> {
    /// Register `chip` with the subsystem.
    ///
    /// `dev` must be the device the chip was created for. On failure the
    /// chip is torn down before the error is returned, so no partially
    /// registered controller is left behind.
    pub fn register(dev: &Device, chip: Chip<T>) -> Result<Registration<T>> {
        if !dev.same_device(chip.device()) {
            return Err(Error::InvalidConfiguration);
        }
        chip_add(chip.label(), chip.num_channels())?;
        Ok(Registration { chip })
    }

    /// The registered chip.
    pub fn chip(&self) -> &Chip<T> {
        &self.chip
    }
}

impl<T: PwmOps> Deref for Registration<T> {
    type Target = Chip<T>;

    fn deref(&self) -> &Chip<T> {
        &self.chip
    }
}

impl<T: PwmOps> Drop for Registration<T> {
    fn drop(&mut self) {
        chip_remove(self.chip.label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
    struct NoHw;

    /// State that only tracks whether it was dropped.
    struct NullState {
        drops: Arc<AtomicU32>,
    }

    impl Drop for NullState {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::AcqRel);
        }
    }

    impl PwmOps for NullState {
        type WfHw = NoHw;

        fn translate_to_hardware(
            _chip: &Chip<Self>,
            _channel: Channel,
            _wf: &Waveform,
        ) -> Result<RoundedWaveform<NoHw>> {
            Ok(RoundedWaveform {
                status: Rounding::Exact,
                hardware_waveform: NoHw,
            })
        }

        fn translate_from_hardware(
            _chip: &Chip<Self>,
            _channel: Channel,
            _wfhw: &NoHw,
        ) -> Result<Waveform> {
            Ok(Waveform::default())
        }

        fn write_waveform(
            _chip: &Chip<Self>,
            _channel: Channel,
            _wfhw: &NoHw,
            _bound: &BoundDevice<'_>,
        ) -> Result<()> {
            Ok(())
        }

        fn read_waveform(
            _chip: &Chip<Self>,
            _channel: Channel,
            _bound: &BoundDevice<'_>,
        ) -> Result<NoHw> {
            Ok(NoHw)
        }
    }

    fn null_chip(dev: &Device, drops: &Arc<AtomicU32>) -> Chip<NullState> {
        let drops = drops.clone();
        Chip::new(dev, 2, move |_| Ok(NullState { drops })).unwrap()
    }

    #[test]
    fn channel_index_is_validated() {
        let dev = Device::new(DeviceConfig::new("chip-chan"));
        let drops = Arc::new(AtomicU32::new(0));
        let chip = null_chip(&dev, &drops);

        assert_eq!(chip.channel(0).unwrap().index(), 0);
        assert_eq!(chip.channel(1).unwrap().index(), 1);
        assert_eq!(chip.channel(2).err(), Some(Error::InvalidConfiguration));
        assert_eq!(chip.num_channels(), 2);
        assert_eq!(chip.label(), "chip-chan");
    }

    #[test]
    fn init_failure_releases_partial_state() {
        let dev = Device::new(DeviceConfig::new("chip-init-fail"));
        let drops = Arc::new(AtomicU32::new(0));

        let tracker = drops.clone();
        let result: Result<Chip<NullState>> = Chip::new(&dev, 2, move |_| {
            // First "field" constructs, second fails: the first must be
            // dropped exactly once before the error surfaces.
            let _first = NullState { drops: tracker };
            Err(Error::ResourceUnavailable)
        });

        assert_eq!(result.err(), Some(Error::ResourceUnavailable));
        assert_eq!(drops.load(Ordering::Acquire), 1);
    }

    #[test]
    fn chip_drop_runs_state_destructor_once() {
        let dev = Device::new(DeviceConfig::new("chip-drop"));
        let drops = Arc::new(AtomicU32::new(0));
        let chip = null_chip(&dev, &drops);

        drop(chip);
        assert_eq!(drops.load(Ordering::Acquire), 1);
    }

    #[test]
    fn registration_pairs_add_and_remove() {
        let dev = Device::new(DeviceConfig::new("chip-reg"));
        let drops = Arc::new(AtomicU32::new(0));

        let reg = Registration::register(&dev, null_chip(&dev, &drops)).unwrap();
        assert!(is_registered("chip-reg"));

        // A second chip under the same label is refused and torn down.
        let second = Registration::register(&dev, null_chip(&dev, &drops));
        assert_eq!(second.err(), Some(Error::AlreadyRegistered));
        assert_eq!(drops.load(Ordering::Acquire), 1);

        drop(reg);
        assert!(!is_registered("chip-reg"));
        assert_eq!(drops.load(Ordering::Acquire), 2);
    }

    #[test]
    fn registration_rejects_foreign_device() {
        let dev = Device::new(DeviceConfig::new("chip-reg-dev-a"));
        let other = Device::new(DeviceConfig::new("chip-reg-dev-b"));
        let drops = Arc::new(AtomicU32::new(0));

        let chip = null_chip(&dev, &drops);
        assert_eq!(
            Registration::register(&other, chip).err(),
            Some(Error::InvalidConfiguration)
        );
        assert_eq!(drops.load(Ordering::Acquire), 1);
    }
}
