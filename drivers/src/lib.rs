//! PWM Controller Drivers
//!
//! Concrete controller drivers built on the [`pwm`] abstraction layer.
//!
//! # Module Organization
//!
//! - [`platform`]: SoC-specific PWM controller drivers
//!
//! Each driver supplies the four hardware operations of
//! [`pwm::PwmOps`] and a probe entry point that wires up its clock,
//! register window and chip registration. All hardware access goes
//! through binding-scoped register windows; a driver never holds a raw
//! register address of its own.

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

pub mod platform;

// Re-export commonly used types
pub use platform::titan::TitanPwm;
