//! Platform-Specific PWM Controllers
//!
//! One module per supported SoC. Platform code talks to hardware only
//! through the abstraction layer's register windows and clock handles,
//! so the same driver runs unchanged against real MMIO or a simulated
//! register block.

pub mod titan;
