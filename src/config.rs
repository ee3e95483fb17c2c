//! Tuning parameters of the modulation engine.

use fixed::types::I16F16;

/// Default values, grouped by the stage that consumes them.
pub mod defaults {
    use fixed::types::I16F16;

    /// Supported voltage-ratio domain of the reference angle table.
    pub const RATIO_DOMAIN: (f32, f32) = (0.95, 1.05);

    /// Supported modulation-index domain of the reference angle table.
    pub const MODULATION_DOMAIN: (f32, f32) = (0.75, 1.0);

    /// Correction step applied along the V1 error gradient.
    pub const LEARNING_RATE: f32 = 0.1;

    /// Relative V1 error (0.1 %) under which the correction stops.
    pub const CONVERGENCE_THRESHOLD: f32 = 0.001;

    /// Upper bound on correction iterations per solve.
    pub const MAX_ITERATIONS: u16 = 50;

    /// Angle added to every dispatch query so a query landing exactly on a
    /// breakpoint resolves to the step it is about to enter. One LSB.
    pub const SAFETY_MARGIN: I16F16 = I16F16::DELTA;

    /// Breakpoints scanned ahead of the cached bracket before falling back
    /// to a full search.
    pub const SEARCH_WINDOW: usize = 2;

    /// SOC difference below which balancing falls back to voltage order.
    pub const SOC_DEADBAND: f32 = 0.05;

    /// Ratio change that forces a solve and profile rebuild.
    pub const REBUILD_RATIO_TOLERANCE: f32 = 1e-3;

    /// Modulation-index change that forces a solve and profile rebuild.
    pub const REBUILD_MODULATION_TOLERANCE: f32 = 1e-3;
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModulatorConfig {
    /// (min, max) clamp for voltage ratios
    pub ratio_domain: (f32, f32),
    /// (min, max) clamp for the modulation index
    pub modulation_domain: (f32, f32),
    pub learning_rate: f32,
    /// Relative, not percent.
    pub convergence_threshold: f32,
    pub max_iterations: u16,
    pub safety_margin: I16F16,
    pub search_window: usize,
    pub soc_deadband: f32,
    pub rebuild_ratio_tolerance: f32,
    pub rebuild_modulation_tolerance: f32,
}

impl ModulatorConfig {
    pub const fn new() -> Self {
        Self {
            ratio_domain: defaults::RATIO_DOMAIN,
            modulation_domain: defaults::MODULATION_DOMAIN,
            learning_rate: defaults::LEARNING_RATE,
            convergence_threshold: defaults::CONVERGENCE_THRESHOLD,
            max_iterations: defaults::MAX_ITERATIONS,
            safety_margin: defaults::SAFETY_MARGIN,
            search_window: defaults::SEARCH_WINDOW,
            soc_deadband: defaults::SOC_DEADBAND,
            rebuild_ratio_tolerance: defaults::REBUILD_RATIO_TOLERANCE,
            rebuild_modulation_tolerance: defaults::REBUILD_MODULATION_TOLERANCE,
        }
    }
}

impl Default for ModulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
