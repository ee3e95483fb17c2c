//! Staircase modulation for cascaded H-bridge multilevel inverters.
//!
//! Switching angles come from an offline-optimized [`AngleTable`], are
//! refined by the [`AngleSolver`] for the measured source voltages, expanded
//! into a full-cycle [`StaircaseProfile`], and played back tick by tick by the
//! [`SwitchingDispatcher`] and [`ModuleAllocator`]. [`StaircaseModulator`]
//! wires them together behind an [`OutputSink`].

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

// must come first so the logging macros are visible to every module
mod fmt;

pub mod allocator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod module;
pub mod modulator;
pub mod profile;
pub mod sink;
pub mod solver;
#[doc(hidden)]
pub mod synthetic;
pub mod table;
pub mod waveform;

#[cfg(test)]
mod test_support;

/// Number of series-connected H-bridge modules.
pub const NUM_MODULES: usize = 4;

pub use allocator::{Allocation, ModuleAllocator, SortPolicy, Trigger};
pub use config::ModulatorConfig;
pub use dispatch::{DispatchResult, SwitchingDispatcher};
pub use error::{DispatchError, Error, ProfileError, SolverError, TableError};
pub use module::{Module, SourceMeasurement, SwitchState};
pub use modulator::{StaircaseModulator, TickOutput, Update};
pub use profile::{Breakpoint, StaircaseProfile};
pub use sink::{MemorySink, NullSink, OutputSink};
pub use solver::{AngleSolver, SolverResult};
pub use table::AngleTable;
