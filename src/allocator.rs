//! Turns an aggregate level into per-module switch states.
//!
//! The module array is reordered in place by the active [`SortPolicy`]; the
//! first `|level|` valid modules in that order then conduct and every other
//! module is bypassed. The array order is the allocator's memory: a policy
//! that keeps the order reuses whatever the previous call left behind.

use crate::config::ModulatorConfig;
use crate::module::{Module, SwitchState};
use crate::NUM_MODULES;

/// Event that caused the current dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Trigger {
    PeriodicTimer,
    FeedbackRequest,
    ZeroCrossing,
    SocBalance,
    CycleRotation,
}

/// Order in which modules are offered conduction slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortPolicy {
    /// Keep the order from the previous allocation.
    PreserveOrder,
    /// Highest DC voltage first.
    VoltageDescending,
    /// Highest SOC first, but only where two modules differ by more than
    /// `deadband`; closer pairs are ordered by voltage.
    SocDescending { deadband: f32 },
    /// Shift the order by one module per call.
    Rotate,
}

impl SortPolicy {
    pub fn for_trigger(trigger: Trigger, soc_deadband: f32) -> Self {
        match trigger {
            Trigger::PeriodicTimer => SortPolicy::PreserveOrder,
            Trigger::FeedbackRequest | Trigger::ZeroCrossing => SortPolicy::VoltageDescending,
            Trigger::SocBalance => SortPolicy::SocDescending {
                deadband: soc_deadband,
            },
            Trigger::CycleRotation => SortPolicy::Rotate,
        }
    }

    /// Whether `a` must be placed strictly before `b`.
    fn precedes(&self, a: &Module, b: &Module) -> bool {
        match *self {
            SortPolicy::PreserveOrder | SortPolicy::Rotate => false,
            SortPolicy::VoltageDescending => a.vdc > b.vdc,
            SortPolicy::SocDescending { deadband } => {
                if (a.soc - b.soc).abs() > deadband {
                    a.soc > b.soc
                } else {
                    a.vdc > b.vdc
                }
            }
        }
    }

    /// Stable in-place sort of `modules` under this policy.
    pub fn apply(&self, modules: &mut [Module]) {
        if let SortPolicy::Rotate = self {
            if !modules.is_empty() {
                modules.rotate_left(1);
            }
            return;
        }

        for i in 1..modules.len() {
            let mut j = i;
            while j > 0 && self.precedes(&modules[j], &modules[j - 1]) {
                modules.swap(j, j - 1);
                j -= 1;
            }
        }
    }
}

/// Requested and delivered aggregate level of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Allocation {
    pub requested: i8,
    pub achieved: i8,
}

impl Allocation {
    /// Fewer valid modules than `|requested|` were available.
    pub fn is_short(&self) -> bool {
        self.achieved != self.requested
    }
}

#[derive(Debug, Clone)]
pub struct ModuleAllocator {
    soc_deadband: f32,
}

impl ModuleAllocator {
    pub const fn new(config: &ModulatorConfig) -> Self {
        Self {
            soc_deadband: config.soc_deadband,
        }
    }

    pub fn policy(&self, trigger: Trigger) -> SortPolicy {
        SortPolicy::for_trigger(trigger, self.soc_deadband)
    }

    /// Sort `modules` for `trigger` and assign switch states for `level`.
    pub fn allocate(&self, modules: &mut [Module], level: i8, trigger: Trigger) -> Allocation {
        self.allocate_with(modules, level, self.policy(trigger))
    }

    pub fn allocate_with(
        &self,
        modules: &mut [Module],
        level: i8,
        policy: SortPolicy,
    ) -> Allocation {
        policy.apply(modules);

        let conducting = if level >= 0 {
            SwitchState::Positive
        } else {
            SwitchState::Negative
        };
        let wanted = level.unsigned_abs();

        let mut assigned: u8 = 0;
        for module in modules.iter_mut() {
            module.state = if module.valid && assigned < wanted {
                assigned += 1;
                conducting
            } else {
                SwitchState::Bypass
            };
        }

        let achieved = if level >= 0 {
            assigned as i8
        } else {
            -(assigned as i8)
        };
        let allocation = Allocation {
            requested: level,
            achieved,
        };
        if allocation.is_short() {
            warn!(
                "Level {} requested, only {} valid modules",
                level, assigned
            );
        }
        allocation
    }
}

/// Gate pattern for every output, indexed by the module's hardware index.
///
/// Outputs with no module in `modules` stay at
/// [`gate::ALL_OFF`](crate::module::gate::ALL_OFF).
pub fn gate_pattern(modules: &[Module]) -> [u8; NUM_MODULES] {
    let mut pattern = [SwitchState::AllOff.gate_bits(); NUM_MODULES];
    for module in modules {
        if let Some(bits) = pattern.get_mut(module.index as usize) {
            *bits = module.state.gate_bits();
        }
    }
    pattern
}

/// Aggregate level the current states actually produce.
pub fn output_level(modules: &[Module]) -> i8 {
    modules.iter().map(|module| module.state.polarity()).sum()
}
