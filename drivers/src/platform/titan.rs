//! Titan SoC PWM Controller Driver
//!
//! The Titan PWM block drives four independent output channels from one
//! reference clock. Period and duty are 32-bit cycle counters, so the
//! achievable resolution is bounded by the clock rate; rates above 1 GHz
//! are rejected at probe time because one cycle would be shorter than a
//! nanosecond.
//!
//! Register layout:
//!
//! ```text
//! 0x00  APPLY    global latch, bit n commits channel n's staged values
//! 0x10  CTRL0    enable / invert bits          ┐
//! 0x14  PERIOD0  period in clock cycles        │ channel 0
//! 0x18  DUTY0    duty in clock cycles          ┘
//! 0x20  CTRL1    ...one block per channel, stride 0x10
//! ```
//!
//! Staged values take effect only when the channel's APPLY bit is
//! written, so reconfiguration is glitch-free: the staged PERIOD, DUTY
//! and CTRL writes are invisible to the output until the trailing latch.
//! Polarity is a plain inversion bit; duty offsets are not supported.

use bitflags::bitflags;
use pwm::{
    BoundDevice, Channel, Chip, Clk, Device, Error, PwmOps, RegisterWindow, Registration, Result,
    RoundedWaveform, Rounding, Waveform,
    waveform::{NSEC_PER_SEC, Polarity, cycles_to_ns, ns_to_cycles},
};

/// Number of output channels on the Titan PWM block.
pub const TITAN_CHANNELS: u32 = 4;

/// Size of the register block in bytes.
pub const TITAN_REG_SIZE: usize = 0x50;

/// Highest reference clock rate the cycle arithmetic supports.
const TITAN_MAX_RATE_HZ: u64 = NSEC_PER_SEC;

// Register offsets
const TITAN_APPLY: usize = 0x00;

const fn titan_chn_base(ch: u32) -> usize {
    0x10 + (ch as usize) * 0x10
}

const fn titan_ctrl(ch: u32) -> usize {
    titan_chn_base(ch)
}

const fn titan_period(ch: u32) -> usize {
    titan_chn_base(ch) + 0x4
}

const fn titan_duty(ch: u32) -> usize {
    titan_chn_base(ch) + 0x8
}

bitflags! {
    /// Per-channel control register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct Ctrl: u32 {
        const ENABLE = 1 << 0;
        const INVERT = 1 << 1;
    }
}

/// Hardware-native waveform representation of the Titan block.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TitanWfHw {
    period_cycles: u32,
    duty_cycles: u32,
    ctrl: u32,
}

/// Driver state: the register window and the reference clock, torn down
/// in reverse order when the chip block is destroyed.
pub struct TitanState {
    window: RegisterWindow,
    clk: Clk,
}

/// Floor a cycle count into the 32-bit register range.
fn clamp_cycles(cycles: u64) -> (u32, bool) {
    if cycles > u64::from(u32::MAX) {
        (u32::MAX, true)
    } else {
        (cycles as u32, false)
    }
}

impl PwmOps for TitanState {
    type WfHw = TitanWfHw;

    fn translate_to_hardware(
        chip: &Chip<Self>,
        channel: Channel,
        wf: &Waveform,
    ) -> Result<RoundedWaveform<TitanWfHw>> {
        let rate = chip.drvdata().clk.rate();
        if rate == 0 {
            return Err(Error::ClockNotReady);
        }

        let (period, period_exact) = ns_to_cycles(wf.period_ns, rate);
        let (duty, duty_exact) = ns_to_cycles(wf.duty_ns, rate);
        let mut rounded = !period_exact || !duty_exact;

        let (period_cycles, clamped) = clamp_cycles(period);
        rounded |= clamped;
        let (mut duty_cycles, clamped) = clamp_cycles(duty);
        rounded |= clamped;

        // The output must never be on longer than requested, so a duty
        // that floors above the floored period collapses onto it.
        if duty_cycles > period_cycles {
            duty_cycles = period_cycles;
            rounded = true;
        }

        let mut ctrl = Ctrl::empty();
        if wf.enabled {
            ctrl |= Ctrl::ENABLE;
        }
        if wf.polarity == Polarity::Inverted {
            ctrl |= Ctrl::INVERT;
        }

        log::debug!(
            "{}: pwm-{} request {}/{} ns -> {}/{} cycles @ {} Hz, ctrl {:#x}",
            chip.label(),
            channel.index(),
            wf.duty_ns,
            wf.period_ns,
            duty_cycles,
            period_cycles,
            rate,
            ctrl.bits()
        );

        Ok(RoundedWaveform {
            status: if rounded {
                Rounding::Rounded
            } else {
                Rounding::Exact
            },
            hardware_waveform: TitanWfHw {
                period_cycles,
                duty_cycles,
                ctrl: ctrl.bits(),
            },
        })
    }

    fn translate_from_hardware(
        chip: &Chip<Self>,
        _channel: Channel,
        wfhw: &TitanWfHw,
    ) -> Result<Waveform> {
        let rate = chip.drvdata().clk.rate();
        if rate == 0 {
            return Err(Error::ClockNotReady);
        }

        let ctrl = Ctrl::from_bits_truncate(wfhw.ctrl);
        Ok(Waveform {
            period_ns: cycles_to_ns(u64::from(wfhw.period_cycles), rate),
            duty_ns: cycles_to_ns(u64::from(wfhw.duty_cycles), rate),
            polarity: if ctrl.contains(Ctrl::INVERT) {
                Polarity::Inverted
            } else {
                Polarity::Normal
            },
            enabled: ctrl.contains(Ctrl::ENABLE),
        })
    }

    fn write_waveform(
        chip: &Chip<Self>,
        channel: Channel,
        wfhw: &TitanWfHw,
        bound: &BoundDevice<'_>,
    ) -> Result<()> {
        let ch = channel.index();
        let io = chip.drvdata().window.access(bound)?;

        // Stage the new configuration, then latch it in one shot. The
        // latch write must come last; everything before it is invisible
        // to the output.
        io.write32(wfhw.period_cycles, titan_period(ch))?;
        io.write32(wfhw.duty_cycles, titan_duty(ch))?;
        io.write32(wfhw.ctrl, titan_ctrl(ch))?;
        io.write32(1 << ch, TITAN_APPLY)?;

        log::debug!(
            "{}: pwm-{} wrote {}/{} cycles, ctrl {:#x}",
            chip.label(),
            ch,
            wfhw.duty_cycles,
            wfhw.period_cycles,
            wfhw.ctrl
        );
        Ok(())
    }

    fn read_waveform(
        chip: &Chip<Self>,
        channel: Channel,
        bound: &BoundDevice<'_>,
    ) -> Result<TitanWfHw> {
        let ch = channel.index();
        let io = chip.drvdata().window.access(bound)?;

        Ok(TitanWfHw {
            period_cycles: io.read32(titan_period(ch))?,
            duty_cycles: io.read32(titan_duty(ch))?,
            ctrl: io.read32(titan_ctrl(ch))?,
        })
    }
}

/// A probed Titan PWM controller.
///
/// Owns the chip registration; dropping the driver unregisters the chip
/// and then tears down the driver state, window before clock, the
/// reverse of construction.
pub struct TitanPwm {
    registration: Registration<TitanState>,
}

impl TitanPwm {
    /// Probe entry point, invoked once per matching device.
    ///
    /// On any failure every partially acquired resource is released in
    /// reverse order before the error propagates, leaving no registered
    /// chip and no enabled clock behind.
    pub fn probe(dev: &Device) -> Result<TitanPwm> {
        let mut clk = Clk::get(dev)?;
        clk.prepare_enable()?;

        let rate = clk.rate();
        if rate == 0 {
            log::error!("{}: clock rate is zero", dev.name());
            return Err(Error::InvalidConfiguration);
        }
        if rate > TITAN_MAX_RATE_HZ {
            log::error!("{}: clock rate {} Hz not supported", dev.name(), rate);
            return Err(Error::InvalidConfiguration);
        }

        let chip = Chip::new(dev, TITAN_CHANNELS, move |dev| {
            Ok(TitanState {
                window: RegisterWindow::map(dev, TITAN_REG_SIZE)?,
                clk,
            })
        })?;

        let registration = Registration::register(dev, chip)?;
        log::info!(
            "{}: titan pwm ready, {} channels @ {} Hz",
            dev.name(),
            TITAN_CHANNELS,
            rate
        );
        Ok(TitanPwm { registration })
    }

    /// The registered chip, for the subsystem's dispatch surface.
    pub fn chip(&self) -> &Chip<TitanState> {
        self.registration.chip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwm::{DeviceConfig, IoResource, SimRegs};

    fn titan_device(name: &str, rate_hz: u64) -> Device {
        Device::new(
            DeviceConfig::new(name)
                .with_io(IoResource::sim(SimRegs::new(TITAN_REG_SIZE)))
                .with_clock(rate_hz),
        )
    }

    #[test]
    fn translation_is_exact_on_cycle_boundaries() {
        let dev = titan_device("titan-exact", 100_000_000);
        let titan = TitanPwm::probe(&dev).unwrap();
        let channel = titan.chip().channel(0).unwrap();

        let wf = Waveform {
            period_ns: 1_000_000,
            duty_ns: 500_000,
            polarity: Polarity::Normal,
            enabled: true,
        };
        let (actual, status) = titan.chip().round_waveform(channel, &wf).unwrap();
        assert_eq!(status, Rounding::Exact);
        assert_eq!(actual, wf);
    }

    #[test]
    fn translation_floors_and_reports_rounding() {
        // 3 Hz clock: a 1 s period is exact, 999_999_999 ns is not.
        let dev = titan_device("titan-floor", 3);
        let titan = TitanPwm::probe(&dev).unwrap();
        let channel = titan.chip().channel(0).unwrap();

        let wf = Waveform {
            period_ns: 999_999_999,
            duty_ns: 400_000_000,
            polarity: Polarity::Normal,
            enabled: true,
        };
        let (actual, status) = titan.chip().round_waveform(channel, &wf).unwrap();
        assert_eq!(status, Rounding::Rounded);
        assert!(actual.period_ns <= wf.period_ns);
        assert!(actual.duty_ns <= wf.duty_ns);
    }

    #[test]
    fn duty_clamps_to_period() {
        let dev = titan_device("titan-clamp", 1_000_000);
        let titan = TitanPwm::probe(&dev).unwrap();
        let channel = titan.chip().channel(0).unwrap();

        let wf = Waveform {
            period_ns: 100_000,
            duty_ns: 300_000,
            polarity: Polarity::Normal,
            enabled: true,
        };
        let (actual, status) = titan.chip().round_waveform(channel, &wf).unwrap();
        assert_eq!(status, Rounding::Rounded);
        assert_eq!(actual.duty_ns, actual.period_ns);
    }

    #[test]
    fn polarity_round_trips_through_ctrl_bits() {
        let dev = titan_device("titan-invert", 1_000_000);
        let titan = TitanPwm::probe(&dev).unwrap();
        let channel = titan.chip().channel(2).unwrap();

        let wf = Waveform {
            period_ns: 20_000,
            duty_ns: 5_000,
            polarity: Polarity::Inverted,
            enabled: true,
        };
        titan.chip().apply_waveform(channel, &wf).unwrap();
        let actual = titan.chip().current_waveform(channel).unwrap();
        assert_eq!(actual.polarity, Polarity::Inverted);
        assert!(actual.enabled);
    }

    #[test]
    fn probe_rejects_unsupported_rates() {
        let zero = titan_device("titan-rate-zero", 0);
        assert_eq!(
            TitanPwm::probe(&zero).err(),
            Some(Error::InvalidConfiguration)
        );
        assert_eq!(zero.clock_enable_count(), 0);

        let fast = titan_device("titan-rate-fast", 2_000_000_000);
        assert_eq!(
            TitanPwm::probe(&fast).err(),
            Some(Error::InvalidConfiguration)
        );
        assert_eq!(fast.clock_enable_count(), 0);
    }
}
