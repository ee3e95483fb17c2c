//! Error types for each stage of the modulation pipeline.

use thiserror::Error;

/// Reasons an angle table blob is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableError {
    #[error("malformed table: header declares {ratio_points}x{m_points} grid, expected {expected_ratio_points}x{expected_m_points}")]
    DimensionMismatch {
        ratio_points: i32,
        m_points: i32,
        expected_ratio_points: usize,
        expected_m_points: usize,
    },
    #[error("malformed table: {actual} bytes available, {expected} required")]
    Truncated { expected: usize, actual: usize },
    #[error("malformed table: {extra} unexpected trailing bytes")]
    TrailingData { extra: usize },
    #[error("malformed table: axis breakpoints are not strictly increasing at {index}")]
    NonMonotonicAxis { index: usize },
    #[error("malformed table: non-finite value at offset {offset}")]
    NonFinite { offset: usize },
    #[error("malformed table: angle of module {module} at offset {offset} outside [0, pi/2]")]
    AngleOutOfRange { module: usize, offset: usize },
}

/// Inputs the solver refuses to work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SolverError {
    #[error("voltage ratio of module {module} is not finite")]
    NonFiniteRatio { module: usize },
    #[error("modulation index is not finite")]
    NonFiniteModulationIndex,
}

/// Quadrant angles that cannot form a valid staircase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProfileError {
    #[error("quadrant angle {index} is outside [0, pi/2] or not finite")]
    AngleOutOfRange { index: usize },
    #[error("breakpoints {index} and {next} do not strictly increase")]
    Degenerate { index: usize, next: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispatchError {
    #[error("staircase profile has not been built")]
    ProfileNotReady,
}

/// Crate level error, wrapping every stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("output sink rejected the write for hardware index {index}")]
    Sink { index: u8 },
}
