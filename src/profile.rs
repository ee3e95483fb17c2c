//! One electrical cycle of the staircase as an ordered breakpoint table.
//!
//! From the quadrant angles `theta_1 < ... < theta_N` the full cycle follows
//! by quarter-wave symmetry:
//!
//! ```text
//! 0, theta_1 .. theta_N,                 rising to +N
//! pi - theta_N .. pi - theta_1,          falling to 0
//! pi + theta_1 .. pi + theta_N,          falling to -N
//! 2pi - theta_N .. 2pi - theta_1, 2pi    rising back to 0
//! ```
//!
//! Breakpoint angles are stored as `I16F16` so the dispatcher runs in
//! fixed point.

use core::f32::consts::FRAC_PI_2;

use fixed::types::I16F16;

use crate::error::ProfileError;
use crate::NUM_MODULES;

/// Breakpoints in one cycle, `4 * N + 2`.
pub const PROFILE_POINTS: usize = 4 * NUM_MODULES + 2;

/// Aggregate level entered at each breakpoint.
///
/// Written out for four modules. Other module counts need their own
/// pattern here; everything else in the profile is count-independent.
pub const LEVELS: [i8; PROFILE_POINTS] = [
    0, 1, 2, 3, 4, 3, 2, 1, 0, -1, -2, -3, -4, -3, -2, -1, 0, 0,
];

const _: () = assert!(NUM_MODULES == 4, "LEVELS is written for four modules");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub angle: I16F16,
    pub level: i8,
}

#[derive(Debug, Clone)]
pub struct StaircaseProfile {
    angles: [I16F16; PROFILE_POINTS],
    ready: bool,
    revision: u32,
}

impl StaircaseProfile {
    /// An empty profile. Dispatching against it fails until the first
    /// successful [`rebuild`](Self::rebuild).
    pub const fn new() -> Self {
        Self {
            angles: [I16F16::ZERO; PROFILE_POINTS],
            ready: false,
            revision: 0,
        }
    }

    /// Replace the breakpoints with the ones derived from `theta`.
    ///
    /// `theta` is sorted before use. Angles on the quadrant edges or equal
    /// to a neighbour are pulled apart by one LSB, so every step keeps a
    /// non-zero width. On error the previous breakpoints stay in place, so a
    /// bad solve never reaches the dispatcher.
    pub fn rebuild(&mut self, theta: &[f32; NUM_MODULES]) -> Result<(), ProfileError> {
        for (index, angle) in theta.iter().enumerate() {
            if !angle.is_finite() || !(0.0..=FRAC_PI_2).contains(angle) {
                warn!("Profile rebuild rejected: angle {} out of range", index);
                return Err(ProfileError::AngleOutOfRange { index });
            }
        }

        let mut sorted = *theta;
        sorted.sort_unstable_by(f32::total_cmp);
        let mut quadrant = sorted.map(I16F16::from_num);
        separate(&mut quadrant);

        let angles = reflect(&quadrant);
        if let Some(index) = angles.windows(2).position(|pair| pair[0] >= pair[1]) {
            warn!(
                "Profile rebuild rejected: breakpoints {} and {} collide",
                index,
                index + 1
            );
            return Err(ProfileError::Degenerate {
                index,
                next: index + 1,
            });
        }

        self.angles = angles;
        self.ready = true;
        self.revision = self.revision.wrapping_add(1);
        trace!("Profile rebuilt, revision {}", self.revision);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Increments on every successful rebuild.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn angles(&self) -> &[I16F16; PROFILE_POINTS] {
        &self.angles
    }

    pub fn levels(&self) -> &[i8; PROFILE_POINTS] {
        &LEVELS
    }

    pub fn breakpoint(&self, index: usize) -> Breakpoint {
        Breakpoint {
            angle: self.angles[index],
            level: LEVELS[index],
        }
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        (0..PROFILE_POINTS).map(|index| self.breakpoint(index))
    }

    /// Quadrant angles the profile was built from.
    pub fn quadrant(&self) -> [I16F16; NUM_MODULES] {
        core::array::from_fn(|k| self.angles[k + 1])
    }
}

impl Default for StaircaseProfile {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep sorted quadrant angles inside `(0, pi/2)` and at least one LSB
/// apart.
fn separate(quadrant: &mut [I16F16; NUM_MODULES]) {
    let mut low = I16F16::DELTA;
    for theta in quadrant.iter_mut() {
        *theta = (*theta).max(low);
        low = *theta + I16F16::DELTA;
    }
    // PI / 2 rounds down, so pi - theta stays above theta
    let mut high = I16F16::PI / 2_i32 - I16F16::DELTA;
    for theta in quadrant.iter_mut().rev() {
        *theta = (*theta).min(high);
        high = *theta - I16F16::DELTA;
    }
}

fn reflect(quadrant: &[I16F16; NUM_MODULES]) -> [I16F16; PROFILE_POINTS] {
    let n = NUM_MODULES;
    let mut angles = [I16F16::ZERO; PROFILE_POINTS];
    for (k, &theta) in quadrant.iter().enumerate() {
        let mirrored = n - 1 - k;
        angles[1 + k] = theta;
        angles[n + 1 + mirrored] = I16F16::PI - theta;
        angles[2 * n + 1 + k] = I16F16::PI + theta;
        angles[3 * n + 1 + mirrored] = I16F16::TAU - theta;
    }
    angles[PROFILE_POINTS - 1] = I16F16::TAU;
    angles
}
