//! Waveform Model
//!
//! Physical-unit description of a PWM signal and the helpers for
//! converting between nanoseconds and hardware clock cycles.
//!
//! The conversion policy is deliberately one-sided: both directions
//! floor. A controller must never produce more "on" time than it was
//! asked for, so a request is rounded down to the hardware's cycle
//! granularity, and the value reported back never exceeds the request.

/// Nanoseconds per second.
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Output polarity of a PWM signal.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Polarity {
    /// The duty portion of the period is the active-high time.
    #[default]
    Normal,
    /// The signal is inverted: the duty portion is the active-low time.
    Inverted,
}

/// Controller-agnostic PWM signal description in physical units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Waveform {
    /// Duration of one complete cycle, in nanoseconds.
    pub period_ns: u64,
    /// Active time within one period, in nanoseconds.
    pub duty_ns: u64,
    /// Output polarity.
    pub polarity: Polarity,
    /// Whether the output is driven at all.
    pub enabled: bool,
}

/// Whether translating a [`Waveform`] into hardware units lost precision.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Rounding {
    /// The hardware representation matches the request exactly.
    Exact,
    /// At least one value was rounded down to the hardware granularity.
    Rounded,
}

/// Result of translating a [`Waveform`] into a controller's native form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoundedWaveform<Hw> {
    /// Records whether the translation changed the requested values.
    pub status: Rounding,
    /// The controller-specific register-ready representation.
    pub hardware_waveform: Hw,
}

/// Convert a duration in nanoseconds to clock cycles, flooring.
///
/// Returns the cycle count and whether the conversion was exact. The
/// intermediate product is computed in 128 bits, so no input can
/// overflow; a result beyond `u64::MAX` saturates and is reported as
/// inexact.
///
/// `rate_hz` must be nonzero; callers check the clock rate first.
pub fn ns_to_cycles(ns: u64, rate_hz: u64) -> (u64, bool) {
    debug_assert!(rate_hz > 0);

    let product = u128::from(ns) * u128::from(rate_hz);
    let cycles = product / u128::from(NSEC_PER_SEC);
    let exact = product % u128::from(NSEC_PER_SEC) == 0 && cycles <= u128::from(u64::MAX);

    (cycles.min(u128::from(u64::MAX)) as u64, exact)
}

/// Convert a cycle count back to nanoseconds, flooring.
///
/// Exact inverse arithmetic of [`ns_to_cycles`]: for any request, the
/// floored cycle count converted back is within one cycle's nanosecond
/// equivalent of the request and never exceeds it.
///
/// `rate_hz` must be nonzero; callers check the clock rate first.
pub fn cycles_to_ns(cycles: u64, rate_hz: u64) -> u64 {
    debug_assert!(rate_hz > 0);

    let ns = u128::from(cycles) * u128::from(NSEC_PER_SEC) / u128::from(rate_hz);
    ns.min(u128::from(u64::MAX)) as u64
}
