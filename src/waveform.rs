//! Output waveform reconstruction and spectrum helpers.
//!
//! For a quarter-wave symmetric staircase only odd harmonics exist and
//!
//! ```text
//! V_n = 4 / (n pi) * sum(c_i * cos(n * theta_i))
//! ```
//!
//! in units of the mean module voltage.

use core::f32::consts::PI;

use fixed::types::I16F16;
use libm::{cosf, sqrtf};

use crate::module::Module;
use crate::NUM_MODULES;

// Below this the staircase has no usable fundamental.
const MIN_FUNDAMENTAL: f32 = 1e-6;

/// Instantaneous output voltage of the series string.
///
/// Conducting modules add `+vdc` or `-vdc`; invalid modules are skipped.
pub fn synthesized_voltage(modules: &[Module]) -> f32 {
    modules
        .iter()
        .filter(|module| module.valid)
        .map(|module| module.state.polarity() as f32 * module.vdc)
        .sum()
}

/// Output polarity encoded in the top two gate bits: `10` drives `+vdc`,
/// `01` drives `-vdc`, anything else bypasses.
pub fn polarity_from_gate_bits(bits: u8) -> i8 {
    match bits >> 6 {
        0b10 => 1,
        0b01 => -1,
        _ => 0,
    }
}

/// Output voltage implied by gate patterns as the bridges would see them.
///
/// `pattern[i]` drives the module with voltage `vdc[i]`. Entries where
/// `valid[i]` is false are skipped.
pub fn gate_voltage(pattern: &[u8], vdc: &[f32], valid: &[bool]) -> f32 {
    pattern
        .iter()
        .zip(vdc)
        .zip(valid)
        .filter(|(_, valid)| **valid)
        .map(|((&bits, &vdc), _)| polarity_from_gate_bits(bits) as f32 * vdc)
        .sum()
}

/// Ideal sinusoidal level `N * m * sin(angle)` the staircase approximates.
pub fn reference_level(angle: I16F16, modulation_index: I16F16) -> I16F16 {
    let (sin_angle, _) = cordic::sin_cos(angle.rem_euclid(I16F16::TAU));
    I16F16::from_num(NUM_MODULES) * modulation_index * sin_angle
}

/// Amplitude of harmonic `n` for the quadrant angles `theta`.
pub fn harmonic_amplitude(theta: &[f32; NUM_MODULES], ratios: &[f32; NUM_MODULES], n: u32) -> f32 {
    if n % 2 == 0 {
        return 0.0;
    }
    let order = n as f32;
    let sum: f32 = theta
        .iter()
        .zip(ratios)
        .map(|(&theta, &ratio)| ratio * cosf(order * theta))
        .sum();
    4.0 / (order * PI) * sum
}

/// THD over the odd harmonics `3..=max_harmonic`, relative to the
/// fundamental. `None` when the fundamental vanishes.
pub fn thd(theta: &[f32; NUM_MODULES], ratios: &[f32; NUM_MODULES], max_harmonic: u32) -> Option<f32> {
    let fundamental = harmonic_amplitude(theta, ratios, 1);
    if fundamental.abs() < MIN_FUNDAMENTAL {
        return None;
    }
    let power: f32 = (3..=max_harmonic)
        .step_by(2)
        .map(|n| {
            let amplitude = harmonic_amplitude(theta, ratios, n);
            amplitude * amplitude
        })
        .sum();
    Some(sqrtf(power) / fundamental.abs())
}

#[cfg(test)]
mod tests {
    use core::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::module::{gate, SwitchState};

    const THETA: [f32; NUM_MODULES] = [0.2, 0.5, 0.8, 1.2];
    const UNITY: [f32; NUM_MODULES] = [1.0; NUM_MODULES];

    #[track_caller]
    fn assert_close(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() < tolerance,
            "{actual} != {expected} (tolerance {tolerance})"
        );
    }

    #[test]
    fn synthesized_voltage_skips_invalid_modules() {
        let states = [
            SwitchState::Positive,
            SwitchState::Positive,
            SwitchState::Negative,
            SwitchState::Bypass,
        ];
        let mut modules: [Module; 4] = core::array::from_fn(|i| Module {
            vdc: 10.0 * (i + 1) as f32,
            valid: true,
            state: states[i],
            ..Module::new(i as u8)
        });
        assert_close(synthesized_voltage(&modules), 10.0 + 20.0 - 30.0, 1e-6);

        modules[1].valid = false;
        assert_close(synthesized_voltage(&modules), 10.0 - 30.0, 1e-6);
    }

    #[test]
    fn gate_bits_polarity() {
        assert_eq!(polarity_from_gate_bits(gate::POSITIVE), 1);
        assert_eq!(polarity_from_gate_bits(gate::NEGATIVE), -1);
        assert_eq!(polarity_from_gate_bits(gate::BYPASS_LOW), 0);
        assert_eq!(polarity_from_gate_bits(gate::BYPASS_HIGH), 0);
        assert_eq!(polarity_from_gate_bits(gate::ALL_OFF), 0);
    }

    #[test]
    fn gate_voltage_matches_module_states() {
        let pattern = [gate::POSITIVE, gate::POSITIVE, gate::NEGATIVE, gate::BYPASS];
        let vdc = [48.0, 50.0, 52.0, 49.0];
        assert_close(gate_voltage(&pattern, &vdc, &[true; 4]), 46.0, 1e-4);
        assert_close(
            gate_voltage(&pattern, &vdc, &[true, false, true, true]),
            -4.0,
            1e-4,
        );
    }

    #[test]
    fn reference_level_peaks_at_quarter_cycle() {
        let m = I16F16::from_num(0.8);
        let peak = reference_level(I16F16::FRAC_PI_2, m);
        dbg!(peak);
        assert!(peak.abs_diff(I16F16::from_num(3.2)) < 0.01);

        let trough = reference_level(-I16F16::FRAC_PI_2, m);
        assert!(trough.abs_diff(I16F16::from_num(-3.2)) < 0.01);

        let zero = reference_level(I16F16::PI, m);
        assert!(zero.abs() < 0.01);
    }

    #[test]
    fn even_harmonics_vanish() {
        for n in [0, 2, 4, 10] {
            assert_eq!(harmonic_amplitude(&THETA, &UNITY, n), 0.0);
        }
    }

    #[test]
    fn square_wave_fundamental() {
        // every module switching at zero is a square wave of height N
        let square = [0.0; NUM_MODULES];
        assert_close(
            harmonic_amplitude(&square, &UNITY, 1),
            4.0 * NUM_MODULES as f32 / PI,
            1e-5,
        );
        assert_close(
            harmonic_amplitude(&square, &UNITY, 3),
            4.0 * NUM_MODULES as f32 / (3.0 * PI),
            1e-5,
        );
    }

    #[test]
    fn staircase_beats_square_wave_thd() {
        let square = thd(&[0.0; NUM_MODULES], &UNITY, 49).unwrap();
        let staircase = thd(&THETA, &UNITY, 49).unwrap();
        dbg!(square, staircase);
        assert!(staircase < square);
        assert!(square > 0.4 && square < 0.5);
    }

    #[test]
    fn thd_needs_a_fundamental() {
        assert_eq!(thd(&[FRAC_PI_2; NUM_MODULES], &UNITY, 49), None);
    }
}
