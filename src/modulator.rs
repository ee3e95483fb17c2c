//! The complete modulation engine.
//!
//! [`StaircaseModulator`] runs at two rates. The control loop calls
//! [`update_sources`](StaircaseModulator::update_sources) with fresh voltage
//! and SOC measurements and the event that triggered it. The trigger's sort
//! policy fixes the module order, and when the order or the operating point
//! moved enough the angles are re-solved for that order and the profile is
//! rebuilt. The switching interrupt calls [`tick`](StaircaseModulator::tick)
//! with the electrical angle, which dispatches a level, assigns it to the
//! modules in that order and writes the gate patterns.
//!
//! Both paths take `&mut self`, so a rebuild can never overlap a tick. A
//! platform that runs them at different interrupt priorities must keep the
//! modulator behind a critical section.

use core::f32::consts::PI;

use fixed::types::I16F16;
use libm::cosf;

use crate::allocator::{gate_pattern, Allocation, ModuleAllocator, SortPolicy, Trigger};
use crate::config::ModulatorConfig;
use crate::dispatch::{DispatchResult, SwitchingDispatcher};
use crate::error::Error;
use crate::module::{update_ratios, Module, SourceMeasurement, SwitchState};
use crate::profile::StaircaseProfile;
use crate::sink::OutputSink;
use crate::solver::{AngleSolver, SolverResult};
use crate::table::AngleTable;
use crate::NUM_MODULES;

/// Inputs the current profile was solved for.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OperatingPoint {
    /// Hardware index of the module in each allocation slot.
    order: [u8; NUM_MODULES],
    /// Voltage ratio per allocation slot.
    ratios: [f32; NUM_MODULES],
    modulation_index: f32,
}

/// Outcome of [`StaircaseModulator::update_sources`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Update {
    /// Inputs within tolerance of the current profile.
    Unchanged,
    Rebuilt(SolverResult),
}

/// Everything one tick decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub dispatch: DispatchResult,
    pub allocation: Allocation,
    /// Gate bits written, indexed by hardware output.
    pub gate_bits: [u8; NUM_MODULES],
}

pub struct StaircaseModulator<'a, S> {
    config: ModulatorConfig,
    solver: AngleSolver<'a>,
    profile: StaircaseProfile,
    dispatcher: SwitchingDispatcher,
    allocator: ModuleAllocator,
    modules: [Module; NUM_MODULES],
    sink: S,
    pending: OperatingPoint,
    applied: Option<OperatingPoint>,
    solution: Option<SolverResult>,
    phase_shift: I16F16,
}

impl<'a, S: OutputSink> StaircaseModulator<'a, S> {
    /// A modulator with no profile yet. [`tick`](Self::tick) fails until the
    /// first successful [`update_sources`](Self::update_sources).
    pub fn new(table: AngleTable<'a>, config: ModulatorConfig, sink: S) -> Self {
        Self {
            solver: AngleSolver::new(table, &config),
            profile: StaircaseProfile::new(),
            dispatcher: SwitchingDispatcher::new(&config),
            allocator: ModuleAllocator::new(&config),
            modules: core::array::from_fn(|index| Module::new(index as u8)),
            sink,
            pending: OperatingPoint {
                order: core::array::from_fn(|index| index as u8),
                ratios: [1.0; NUM_MODULES],
                modulation_index: config.modulation_domain.0,
            },
            applied: None,
            solution: None,
            phase_shift: I16F16::ZERO,
            config,
        }
    }

    /// Take new measurements, indexed by hardware output, and order the
    /// modules with the sort policy for `trigger`.
    ///
    /// The angles are solved with the ratios in that order, because the
    /// module in slot `k` conducts from the k-th switching angle. Re-solves
    /// and rebuilds only when the order changed or the modulation index or
    /// any ratio moved beyond its tolerance. On error the previous profile
    /// stays active.
    pub fn update_sources(
        &mut self,
        sources: &[SourceMeasurement; NUM_MODULES],
        modulation_index: f32,
        phase_shift: I16F16,
        trigger: Trigger,
    ) -> Result<Update, Error> {
        for module in self.modules.iter_mut() {
            let source = &sources[module.index as usize];
            module.vdc = source.vdc;
            module.soc = source.soc;
            module.valid = source.valid;
            module.m_common = modulation_index;
        }
        update_ratios(&mut self.modules);
        self.allocator.policy(trigger).apply(&mut self.modules);

        self.pending = OperatingPoint {
            order: self.modules.map(|module| module.index),
            ratios: self.modules.map(|module| module.ratio),
            modulation_index,
        };

        if phase_shift != self.phase_shift {
            self.phase_shift = phase_shift;
            self.dispatcher.invalidate();
        }

        match self.applied {
            Some(applied) if !self.is_material(&applied, &self.pending) => Ok(Update::Unchanged),
            _ => self.rebuild().map(Update::Rebuilt),
        }
    }

    /// Re-solve for the latest inputs regardless of tolerance.
    pub fn force_rebuild(&mut self) -> Result<SolverResult, Error> {
        self.rebuild()
    }

    /// Dispatch `angle` (plus the current phase shift), assign the level to
    /// the modules in their solved order and write their gate bits to the
    /// sink.
    pub fn tick(&mut self, angle: I16F16) -> Result<TickOutput, Error> {
        let dispatch = self
            .dispatcher
            .locate(&self.profile, angle.saturating_add(self.phase_shift))?;
        let allocation = self.allocator.allocate_with(
            &mut self.modules,
            dispatch.level,
            SortPolicy::PreserveOrder,
        );
        self.write_outputs()?;

        Ok(TickOutput {
            dispatch,
            allocation,
            gate_bits: gate_pattern(&self.modules),
        })
    }

    /// Open every bridge and write the pattern out.
    pub fn all_off(&mut self) -> Result<(), Error> {
        for module in self.modules.iter_mut() {
            module.state = SwitchState::AllOff;
        }
        self.write_outputs()
    }

    pub fn config(&self) -> &ModulatorConfig {
        &self.config
    }

    pub fn solver(&self) -> &AngleSolver<'a> {
        &self.solver
    }

    pub fn profile(&self) -> &StaircaseProfile {
        &self.profile
    }

    pub fn dispatcher(&self) -> &SwitchingDispatcher {
        &self.dispatcher
    }

    /// Modules in their current allocation order.
    pub fn modules(&self) -> &[Module; NUM_MODULES] {
        &self.modules
    }

    /// Result behind the active profile.
    pub fn solution(&self) -> Option<&SolverResult> {
        self.solution.as_ref()
    }

    pub fn phase_shift(&self) -> I16F16 {
        self.phase_shift
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn is_material(&self, applied: &OperatingPoint, pending: &OperatingPoint) -> bool {
        // written so that NaN always counts as a change
        let moved = |from: f32, to: f32, tolerance: f32| !((to - from).abs() <= tolerance);

        let ratios_moved = applied
            .ratios
            .iter()
            .zip(&pending.ratios)
            .any(|(&from, &to)| moved(from, to, self.config.rebuild_ratio_tolerance));

        applied.order != pending.order
            || ratios_moved
            || moved(
                applied.modulation_index,
                pending.modulation_index,
                self.config.rebuild_modulation_tolerance,
            )
    }

    fn rebuild(&mut self) -> Result<SolverResult, Error> {
        let point = self.pending;
        let result = self
            .solver
            .solve(&point.ratios, point.modulation_index)
            .inspect_err(|_| warn!("Angle solve failed, keeping previous profile"))?;
        self.profile.rebuild(&result.theta)?;
        self.dispatcher.invalidate();

        for (module, theta) in self.modules.iter_mut().zip(result.theta) {
            module.m_self = NUM_MODULES as f32 * module.ratio * cosf(theta) / PI;
        }

        debug!(
            "Profile rebuilt for m = {}, V1 error {}",
            point.modulation_index,
            result.v1_error
        );
        self.applied = Some(point);
        self.solution = Some(result);
        Ok(result)
    }

    /// Write every module, even after a failure, and report the first
    /// output that failed. The sink's own error is only logged.
    fn write_outputs(&mut self) -> Result<(), Error> {
        let mut failed = None;
        for module in &self.modules {
            if self
                .sink
                .write_gate_bits(module.index, module.state.gate_bits())
                .is_err()
            {
                error!("Gate write to output {} failed", module.index);
                failed.get_or_insert(module.index);
            }
        }
        match failed {
            Some(index) => Err(Error::Sink { index }),
            None => Ok(()),
        }
    }
}
