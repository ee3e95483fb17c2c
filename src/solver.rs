//! Switching angle solver.
//!
//! Looks the quadrant angles up in the [`AngleTable`] and then nudges them
//! until the synthesized fundamental matches the target:
//!
//! ```text
//! V1_actual = sum(c_i * cos(theta_i))
//! V1_ideal  = pi * m
//! ```
//!
//! The correction is plain gradient descent on `(V1_actual - V1_ideal)^2`
//! with `dV1/dtheta_i = -c_i * sin(theta_i)`, bounded by an iteration budget
//! so it always terminates inside a control period.

use core::f32::consts::{FRAC_PI_2, PI};

use libm::{cosf, sinf};

use crate::config::ModulatorConfig;
use crate::error::SolverError;
use crate::table::AngleTable;
use crate::NUM_MODULES;

/// Quadrant angles for one parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverResult {
    /// Quadrant switching angle per module, radians in `[0, pi/2]`.
    pub theta: [f32; NUM_MODULES],
    /// Signed relative fundamental error `(V1_actual - V1_ideal) / V1_ideal`
    /// from the last successful evaluation.
    pub v1_error: f32,
    /// THD predicted by the table at this point.
    pub thd: f32,
    pub iterations: u16,
    pub converged: bool,
}

impl SolverResult {
    pub const ZERO: Self = Self {
        theta: [0.0; NUM_MODULES],
        v1_error: 0.0,
        thd: 0.0,
        iterations: 0,
        converged: false,
    };
}

/// Outcome of the correction loop alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub theta: [f32; NUM_MODULES],
    pub v1_error: f32,
    pub iterations: u16,
    pub converged: bool,
    /// A non-finite value stopped the loop; `theta` is the input unchanged.
    pub aborted: bool,
}

pub struct AngleSolver<'a> {
    table: AngleTable<'a>,
    config: ModulatorConfig,
}

impl<'a> AngleSolver<'a> {
    pub fn new(table: AngleTable<'a>, config: &ModulatorConfig) -> Self {
        Self {
            table,
            config: *config,
        }
    }

    pub fn table(&self) -> &AngleTable<'a> {
        &self.table
    }

    /// Solve for the quadrant angles of `ratios` at modulation index `m`.
    ///
    /// `ratios[k]` belongs to the module in allocation slot `k`, which
    /// conducts from the k-th smallest angle, so the returned angles are
    /// ascending and the reported V1 error is for that pairing.
    ///
    /// Ratios and `m` outside the supported domain are clamped to it. Fails
    /// only on non-finite inputs.
    pub fn solve(
        &self,
        ratios: &[f32; NUM_MODULES],
        m: f32,
    ) -> Result<SolverResult, SolverError> {
        for (module, ratio) in ratios.iter().enumerate() {
            if !ratio.is_finite() {
                return Err(SolverError::NonFiniteRatio { module });
            }
        }
        if !m.is_finite() {
            return Err(SolverError::NonFiniteModulationIndex);
        }

        let (r_min, r_max) = self.config.ratio_domain;
        let (m_min, m_max) = self.config.modulation_domain;
        let ratios = ratios.map(|ratio| ratio.clamp(r_min, r_max));
        let m = m.clamp(m_min, m_max);

        let raw = self.table.lookup(&ratios, m);
        let theta = raw.theta.map(|angle| angle.clamp(0.0, FRAC_PI_2));
        if theta.iter().any(|angle| !angle.is_finite()) {
            warn!("Interpolated angles not finite, using zero angles");
            return Ok(SolverResult::ZERO);
        }

        let mut correction = self.correct(theta, &ratios, m);
        if !correction.aborted && !is_ascending(&correction.theta) {
            // slot k conducts from the k-th smallest angle, so the fundamental
            // has to be corrected for that pairing
            let mut ranked = correction.theta;
            ranked.sort_unstable_by(f32::total_cmp);
            let budget = self.config.max_iterations.saturating_sub(correction.iterations);
            let spent = correction.iterations;
            correction = self.correct_within(ranked, &ratios, m, budget);
            correction.iterations = correction.iterations.saturating_add(spent);
            if !correction.aborted && !is_ascending(&correction.theta) {
                correction.theta.sort_unstable_by(f32::total_cmp);
                if let Some(error) = relative_v1_error(&correction.theta, &ratios, PI * m) {
                    correction.v1_error = error;
                    correction.converged = error.abs() <= self.config.convergence_threshold;
                }
            }
        }
        if !correction.converged && !correction.aborted {
            debug!(
                "Angle correction stopped after {} iterations, V1 error {}",
                correction.iterations,
                correction.v1_error
            );
        }

        Ok(SolverResult {
            theta: correction.theta,
            v1_error: correction.v1_error,
            thd: raw.thd,
            iterations: correction.iterations,
            converged: correction.converged,
        })
    }

    /// Run the bounded V1 correction on `theta`.
    ///
    /// Inputs are used as given; [`AngleSolver::solve`] clamps them first.
    pub fn correct(
        &self,
        theta: [f32; NUM_MODULES],
        ratios: &[f32; NUM_MODULES],
        m: f32,
    ) -> Correction {
        self.correct_within(theta, ratios, m, self.config.max_iterations)
    }

    fn correct_within(
        &self,
        theta: [f32; NUM_MODULES],
        ratios: &[f32; NUM_MODULES],
        m: f32,
        budget: u16,
    ) -> Correction {
        let aborted = Correction {
            theta,
            v1_error: 0.0,
            iterations: 0,
            converged: false,
            aborted: true,
        };

        let ideal = PI * m;
        let mut working = theta;
        let Some(mut error) = relative_v1_error(&working, ratios, ideal) else {
            warn!("Initial V1 error not finite, correction skipped");
            return aborted;
        };

        let mut iterations = 0;
        while error.abs() > self.config.convergence_threshold
            && iterations < budget
        {
            let actual = fundamental(&working, ratios);
            if !actual.is_finite() {
                warn!("V1 not finite at iteration {}", iterations);
                return Correction { iterations, ..aborted };
            }
            let error_factor = 2.0 * (actual - ideal);

            for (angle, ratio) in working.iter_mut().zip(ratios) {
                let gradient = error_factor * (-ratio * sinf(*angle));
                if !gradient.is_finite() {
                    warn!("Gradient not finite at iteration {}", iterations);
                    return Correction { iterations, ..aborted };
                }
                *angle = (*angle - self.config.learning_rate * gradient).clamp(0.0, FRAC_PI_2);
            }

            iterations += 1;
            match relative_v1_error(&working, ratios, ideal) {
                Some(e) => error = e,
                None => {
                    warn!("V1 error not finite at iteration {}", iterations);
                    return Correction { iterations, ..aborted };
                }
            }
        }

        if working.iter().any(|angle| !angle.is_finite()) {
            return Correction { iterations, ..aborted };
        }

        Correction {
            theta: working,
            v1_error: error,
            iterations,
            converged: error.abs() <= self.config.convergence_threshold,
            aborted: false,
        }
    }
}

/// Fundamental amplitude of the staircase, normalized so that `pi * m` is
/// the target.
pub fn fundamental(theta: &[f32; NUM_MODULES], ratios: &[f32; NUM_MODULES]) -> f32 {
    theta
        .iter()
        .zip(ratios)
        .map(|(angle, ratio)| ratio * cosf(*angle))
        .sum()
}

fn is_ascending(theta: &[f32; NUM_MODULES]) -> bool {
    theta.windows(2).all(|pair| pair[0] <= pair[1])
}

fn relative_v1_error(
    theta: &[f32; NUM_MODULES],
    ratios: &[f32; NUM_MODULES],
    ideal: f32,
) -> Option<f32> {
    let error = (fundamental(theta, ratios) - ideal) / ideal;
    error.is_finite().then_some(error)
}
