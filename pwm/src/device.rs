//! Platform Device Handle and Binding State
//!
//! The driver-model binder (external to this crate) creates a [`Device`]
//! from a [`DeviceConfig`] describing the hardware: register region,
//! reference clock, firmware properties. The same binder later signals
//! teardown through [`Device::unbind`].
//!
//! Binding is the one cross-cutting fact the rest of the subsystem
//! observes: register windows must not be used once it is gone. The
//! [`BoundDevice`] token is the proof-of-liveness handed to the
//! register-touching hardware operations.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::clk::ClkCore;
use crate::error::{Error, Result};
use crate::iomem::{IoResource, WindowSlot};

/// Static description of a platform device, assembled by the binder.
pub struct DeviceConfig {
    name: String,
    io: Option<IoResource>,
    clock_rate_hz: Option<u64>,
    properties: BTreeMap<String, u64>,
}

impl DeviceConfig {
    /// Start a description for a device with the given unique name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            io: None,
            clock_rate_hz: None,
            properties: BTreeMap::new(),
        }
    }

    /// Attach the device's memory-mapped register resource.
    pub fn with_io(mut self, io: IoResource) -> Self {
        self.io = Some(io);
        self
    }

    /// Attach a reference clock running at the given rate.
    pub fn with_clock(mut self, rate_hz: u64) -> Self {
        self.clock_rate_hz = Some(rate_hz);
        self
    }

    /// Add a firmware-description property.
    pub fn with_property(mut self, key: &str, value: u64) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

struct DeviceInner {
    name: String,
    io: Option<IoResource>,
    clk: Option<Arc<ClkCore>>,
    properties: BTreeMap<String, u64>,
    bound: AtomicBool,
    /// Register-window slots to revoke on unbind, in attach order.
    windows: spin::Mutex<Vec<Weak<WindowSlot>>>,
}

/// Handle to one platform device. Cheap to clone; all clones observe the
/// same binding state.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Create a bound device from its description.
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                name: config.name,
                io: config.io,
                clk: config.clock_rate_hz.map(|rate| Arc::new(ClkCore::new(rate))),
                properties: config.properties,
                bound: AtomicBool::new(true),
                windows: spin::Mutex::new(Vec::new()),
            }),
        }
    }

    /// The device's unique name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the device is still bound to its driver.
    pub fn is_bound(&self) -> bool {
        self.inner.bound.load(Ordering::Acquire)
    }

    /// Obtain a liveness token, or [`Error::Unbound`] if the binding is
    /// already gone.
    pub fn as_bound(&self) -> Result<BoundDevice<'_>> {
        if self.is_bound() {
            Ok(BoundDevice { dev: self })
        } else {
            Err(Error::Unbound)
        }
    }

    /// Tear down the binding.
    ///
    /// Invoked by the binder when the device is unbound or hot-unplugged.
    /// Every attached register window is revoked in reverse attach order;
    /// subsequent accesses fail instead of touching stale mappings. The
    /// driver value itself is destroyed separately by the binder.
    pub fn unbind(&self) {
        if self.inner.bound.swap(false, Ordering::AcqRel) {
            log::info!("{}: unbound", self.name());
            let windows = self.inner.windows.lock();
            for slot in windows.iter().rev() {
                if let Some(slot) = slot.upgrade() {
                    slot.revoke();
                }
            }
        }
    }

    /// Look up a firmware-description property.
    pub fn property_u64(&self, key: &str) -> Option<u64> {
        self.inner.properties.get(key).copied()
    }

    /// Look up a property the driver cannot operate without.
    pub fn require_property_u64(&self, key: &str) -> Result<u64> {
        self.property_u64(key).ok_or_else(|| {
            log::error!("{}: missing required property '{}'", self.name(), key);
            Error::InvalidConfiguration
        })
    }

    /// Enable count of the reference clock, for diagnostics. Zero when
    /// the device has no clock.
    pub fn clock_enable_count(&self) -> u32 {
        self.inner.clk.as_ref().map_or(0, |clk| clk.enable_count())
    }

    pub(crate) fn clk_core(&self) -> Option<Arc<ClkCore>> {
        self.inner.clk.clone()
    }

    pub(crate) fn io(&self) -> Option<&IoResource> {
        self.inner.io.as_ref()
    }

    pub(crate) fn attach_window(&self, slot: &Arc<WindowSlot>) {
        let mut windows = self.inner.windows.lock();
        // Windows that have since been dropped leave dead weak entries
        // behind; sweep them here so the list stays bounded by the
        // number of live windows.
        windows.retain(|slot| slot.strong_count() > 0);
        windows.push(Arc::downgrade(slot));
    }

    pub(crate) fn attached_window_count(&self) -> usize {
        self.inner.windows.lock().len()
    }

    pub(crate) fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Proof that a device was bound when the token was created.
///
/// Handed to the register-touching hardware operations; the register
/// window still re-validates liveness on every access, so a token only
/// rules out calls made after teardown has already been observed.
pub struct BoundDevice<'a> {
    dev: &'a Device,
}

impl BoundDevice<'_> {
    /// The device this token belongs to.
    pub fn device(&self) -> &Device {
        self.dev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_token_follows_state() {
        let dev = Device::new(DeviceConfig::new("dev-binding"));
        assert!(dev.is_bound());
        assert!(dev.as_bound().is_ok());

        dev.unbind();
        assert!(!dev.is_bound());
        assert_eq!(dev.as_bound().err(), Some(Error::Unbound));

        // Unbinding twice is harmless.
        dev.unbind();
    }

    #[test]
    fn properties() {
        let dev = Device::new(DeviceConfig::new("dev-props").with_property("prescaler", 8));
        assert_eq!(dev.property_u64("prescaler"), Some(8));
        assert_eq!(dev.property_u64("missing"), None);
        assert_eq!(
            dev.require_property_u64("missing").err(),
            Some(Error::InvalidConfiguration)
        );
    }

    #[test]
    fn clones_share_binding() {
        let dev = Device::new(DeviceConfig::new("dev-clone"));
        let other = dev.clone();
        assert!(dev.same_device(&other));
        other.unbind();
        assert!(!dev.is_bound());
    }
}
