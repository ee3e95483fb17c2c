//! DC-source modules and their H-bridge switch states.

/// Switch state of one H-bridge module.
///
/// The discriminant is the module's contribution sign convention used by
/// the gate driver firmware; use [`SwitchState::polarity`] for the output
/// contribution itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i8)]
pub enum SwitchState {
    /// Every switch open. Safe state.
    #[default]
    AllOff = 0,
    Positive = 1,
    Negative = -1,
    /// Bypass through the low-side switches.
    BypassLow = 2,
    /// Bypass through the high-side switches.
    BypassHigh = -2,
    /// Bypass, leg chosen by the driver.
    Bypass = 3,
}

/// Gate pattern bit layout: `[S1H S1L S2H S2L 0 0 0 0]`.
pub mod gate {
    pub const POSITIVE: u8 = 0b1010_0000;
    pub const NEGATIVE: u8 = 0b0101_0000;
    pub const BYPASS_LOW: u8 = 0b0011_0000;
    pub const BYPASS_HIGH: u8 = 0b1100_0000;
    /// Generic bypass drives the high-side bypass leg.
    pub const BYPASS: u8 = BYPASS_HIGH;
    pub const ALL_OFF: u8 = 0b0000_0000;
}

impl SwitchState {
    /// Gate driver bit pattern for this state.
    pub const fn gate_bits(self) -> u8 {
        match self {
            SwitchState::Positive => gate::POSITIVE,
            SwitchState::Negative => gate::NEGATIVE,
            SwitchState::BypassLow => gate::BYPASS_LOW,
            SwitchState::BypassHigh => gate::BYPASS_HIGH,
            SwitchState::Bypass => gate::BYPASS,
            SwitchState::AllOff => gate::ALL_OFF,
        }
    }

    /// State for a gate pattern read back from the driver.
    ///
    /// The generic bypass shares its pattern with [`SwitchState::BypassHigh`]
    /// and decodes as that.
    pub const fn from_gate_bits(bits: u8) -> Option<Self> {
        match bits {
            gate::POSITIVE => Some(SwitchState::Positive),
            gate::NEGATIVE => Some(SwitchState::Negative),
            gate::BYPASS_LOW => Some(SwitchState::BypassLow),
            gate::BYPASS_HIGH => Some(SwitchState::BypassHigh),
            gate::ALL_OFF => Some(SwitchState::AllOff),
            _ => None,
        }
    }

    /// Contribution of the module to the aggregate level: +1, -1 or 0.
    pub const fn polarity(self) -> i8 {
        match self {
            SwitchState::Positive => 1,
            SwitchState::Negative => -1,
            _ => 0,
        }
    }
}

/// One series-connected DC source and its H-bridge.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Stable hardware output index of the bridge.
    pub index: u8,
    /// Measured DC voltage, any consistent unit.
    pub vdc: f32,
    /// `vdc / mean(vdc)` over the valid modules.
    pub ratio: f32,
    /// Target modulation index shared by the whole bank.
    pub m_common: f32,
    /// Modulation index this module delivers from its slot,
    /// `N * ratio * cos(theta) / pi`. Averages to the achieved index.
    pub m_self: f32,
    /// State of charge, 0..=1.
    pub soc: f32,
    pub valid: bool,
    pub state: SwitchState,
}

impl Module {
    pub const fn new(index: u8) -> Self {
        Self {
            index,
            vdc: 0.0,
            ratio: 1.0,
            m_common: 0.0,
            m_self: 0.0,
            soc: 0.0,
            valid: false,
            state: SwitchState::AllOff,
        }
    }
}

/// Per-module inputs sampled by the surrounding controller.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceMeasurement {
    pub vdc: f32,
    pub soc: f32,
    pub valid: bool,
}

impl SourceMeasurement {
    pub const fn new(vdc: f32, soc: f32) -> Self {
        Self {
            vdc,
            soc,
            valid: true,
        }
    }
}

/// Recompute every module's voltage ratio against the mean of the valid
/// modules' voltages.
///
/// Invalid modules, and every module when no usable mean exists, get a
/// ratio of 1.0.
pub fn update_ratios(modules: &mut [Module]) {
    let (sum, count) = modules
        .iter()
        .filter(|module| module.valid && module.vdc.is_finite())
        .fold((0.0f32, 0u32), |(sum, count), module| {
            (sum + module.vdc, count + 1)
        });
    let mean = if count > 0 { sum / count as f32 } else { 0.0 };

    for module in modules.iter_mut() {
        module.ratio = if module.valid && mean > 0.0 && module.vdc.is_finite() {
            module.vdc / mean
        } else {
            1.0
        };
    }
}
