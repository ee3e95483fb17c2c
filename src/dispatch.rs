//! Maps the instantaneous electrical angle to a staircase level.
//!
//! The angle normally advances a little between calls, so the dispatcher
//! remembers the last breakpoint interval and first scans a short window
//! forward from it. Anything else (a jump, a reversal, a fresh profile) falls
//! back to a binary search over the whole cycle.

use fixed::types::I16F16;

use crate::config::ModulatorConfig;
use crate::error::DispatchError;
use crate::profile::{StaircaseProfile, LEVELS, PROFILE_POINTS};

/// Intervals in one cycle. The last breakpoint only closes the cycle.
const INTERVALS: usize = PROFILE_POINTS - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    /// Index `i` of the breakpoint interval `[angle_i, angle_i+1)`.
    pub index: usize,
    /// Aggregate level to output.
    pub level: i8,
    /// Angle after margin and wrapping, in `[0, 2pi)`.
    pub angle: I16F16,
    /// Distance to the next breakpoint.
    pub phase_to_next: I16F16,
}

#[derive(Debug, Clone)]
pub struct SwitchingDispatcher {
    cursor: Option<usize>,
    window: usize,
    margin: I16F16,
    fallbacks: u32,
}

impl SwitchingDispatcher {
    pub const fn new(config: &ModulatorConfig) -> Self {
        Self {
            cursor: None,
            window: config.search_window,
            margin: config.safety_margin,
            fallbacks: 0,
        }
    }

    /// Forget the last interval. Call after every profile rebuild.
    pub fn invalidate(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Number of lookups that needed the full binary search.
    pub fn fallbacks(&self) -> u32 {
        self.fallbacks
    }

    /// Level for `angle` (radians, any value) under `profile`.
    pub fn locate(
        &mut self,
        profile: &StaircaseProfile,
        angle: I16F16,
    ) -> Result<DispatchResult, DispatchError> {
        if !profile.is_ready() {
            return Err(DispatchError::ProfileNotReady);
        }

        let angles = profile.angles();
        let angle = normalize(angle, self.margin);

        let index = match self
            .cursor
            .and_then(|cursor| scan_window(angles, cursor, self.window, angle))
        {
            Some(index) => index,
            None => {
                self.fallbacks = self.fallbacks.wrapping_add(1);
                trace!("Dispatcher fallback search");
                search(angles, angle)
            }
        };
        self.cursor = Some(index);

        Ok(DispatchResult {
            index,
            level: LEVELS[index],
            angle,
            phase_to_next: angles[index + 1] - angle,
        })
    }
}

/// Advance `angle` by `margin` and wrap it into `[0, 2pi)`.
pub fn normalize(angle: I16F16, margin: I16F16) -> I16F16 {
    angle.saturating_add(margin).rem_euclid(I16F16::TAU)
}

/// Interval containing `angle` by binary search. `angle` must already be
/// normalized.
pub fn search(angles: &[I16F16; PROFILE_POINTS], angle: I16F16) -> usize {
    // angles[0] is zero, so at least one breakpoint is <= angle
    let above = angles.partition_point(|&breakpoint| breakpoint <= angle);
    above.saturating_sub(1).min(INTERVALS - 1)
}

fn scan_window(
    angles: &[I16F16; PROFILE_POINTS],
    cursor: usize,
    window: usize,
    angle: I16F16,
) -> Option<usize> {
    (0..=window)
        .map(|step| (cursor + step) % INTERVALS)
        .find(|&i| angles[i] <= angle && angle < angles[i + 1])
}
