//! PWM Chip Abstraction Layer
//!
//! This crate lets a controller driver describe a PWM chip's behavior
//! without hand-writing raw pointer plumbing or lifetime bookkeeping.
//! It sits between a generic PWM subsystem, which issues requests in
//! physical time units, and a specific chip's register set.
//!
//! # Module Organization
//!
//! - [`waveform`]: Physical-unit waveform model and cycle conversion
//! - [`chip`]: Hardware-operations contract, chip block, registration
//! - [`iomem`]: Binding-scoped register windows
//! - [`clk`]: Reference clock handles
//! - [`device`]: Platform device handle and binding state
//! - [`error`]: Unified error type
//!
//! # Design Principles
//!
//! 1. **Scoped hardware access**: Register access re-validates device
//!    binding on every operation; nothing outlives an unbind
//! 2. **Paired lifecycles**: Clock enables, register mappings and chip
//!    registration all release exactly once, in reverse order of
//!    acquisition, on both success and failure paths
//! 3. **Fixed addresses**: The chip header and driver state share one
//!    allocation that never moves while the subsystem references it
//! 4. **No hidden retries**: Every fallible operation reports a
//!    [`Error`] upward; nothing panics on expected hardware failure
//!
//! # Usage Example
//!
//! ```
//! use pwm::{Chip, Clk, Device, DeviceConfig, IoResource, RegisterWindow, Registration, SimRegs};
//! # use pwm::{BoundDevice, Channel, Error, PwmOps, Result, RoundedWaveform, Rounding, Waveform};
//! # struct State { window: RegisterWindow, clk: Clk }
//! # #[derive(Debug, Copy, Clone, Default)]
//! # struct Hw;
//! # impl PwmOps for State {
//! #     type WfHw = Hw;
//! #     fn translate_to_hardware(_: &Chip<Self>, _: Channel, _: &Waveform)
//! #         -> Result<RoundedWaveform<Hw>> {
//! #         Ok(RoundedWaveform { status: Rounding::Exact, hardware_waveform: Hw })
//! #     }
//! #     fn translate_from_hardware(_: &Chip<Self>, _: Channel, _: &Hw) -> Result<Waveform> {
//! #         Ok(Waveform::default())
//! #     }
//! #     fn write_waveform(_: &Chip<Self>, _: Channel, _: &Hw, _: &BoundDevice<'_>) -> Result<()> {
//! #         Ok(())
//! #     }
//! #     fn read_waveform(_: &Chip<Self>, _: Channel, _: &BoundDevice<'_>) -> Result<Hw> {
//! #         Ok(Hw)
//! #     }
//! # }
//!
//! // The binder describes the device; tests use a simulated region.
//! let dev = Device::new(
//!     DeviceConfig::new("pwm-example")
//!         .with_io(IoResource::sim(SimRegs::new(0x40)))
//!         .with_clock(100_000_000),
//! );
//!
//! // Probe-time wiring: clock, driver state in place, register, done.
//! let mut clk = Clk::get(&dev).unwrap();
//! clk.prepare_enable().unwrap();
//! let chip = Chip::new(&dev, 4, move |dev| {
//!     Ok(State { window: RegisterWindow::map(dev, 0x40)?, clk })
//! })
//! .unwrap();
//! let registration = Registration::register(&dev, chip).unwrap();
//!
//! let channel = registration.channel(0).unwrap();
//! registration.apply_waveform(channel, &Waveform::default()).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

pub mod chip;
pub mod clk;
pub mod device;
pub mod error;
pub mod iomem;
pub mod waveform;

// Re-export commonly used types
pub use chip::{Channel, Chip, PwmOps, Registration};
pub use clk::Clk;
pub use device::{BoundDevice, Device, DeviceConfig};
pub use error::{Error, Result};
pub use iomem::{Accessor, IoResource, RegisterWindow, SimRegs};
pub use waveform::{NSEC_PER_SEC, Polarity, Rounding, RoundedWaveform, Waveform};
