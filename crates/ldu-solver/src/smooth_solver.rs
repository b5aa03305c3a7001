//! Stand-alone smoother iteration (`smoothSolver`).
//!
//! Applies `nSweeps` sweeps of the configured smoother between residual
//! checks until the tolerance, the relative tolerance or `maxIter` is
//! reached. The iteration count advances by `nSweeps` per check.

use tracing::debug;

use crate::controls::SolverControls;
use crate::error::{ConfigError, SolverError};
use crate::matrix::LduMatrix;
use crate::monitor::{initial_residual, ConvergenceMonitor};
use crate::smoother::LduSmoother;
use crate::traits::LinearSolver;
use crate::types::SolverPerformance;
use crate::validation::validate_system;

/// Smoother-only solver.
#[derive(Debug, Clone)]
pub struct SmoothSolver {
    field_name: String,
    controls: SolverControls,
}

impl SmoothSolver {
    /// Solver for `field_name` with `controls.smoother` and `controls.n_sweeps`.
    ///
    /// # Errors
    ///
    /// Returns the first violation [`SolverControls::validate`] finds.
    pub fn new(field_name: impl Into<String>, controls: SolverControls) -> Result<Self, ConfigError> {
        controls.validate()?;
        Ok(Self {
            field_name: field_name.into(),
            controls,
        })
    }
}

impl LinearSolver for SmoothSolver {
    fn solve(
        &self,
        matrix: &LduMatrix,
        psi: &mut [f64],
        source: &[f64],
    ) -> Result<SolverPerformance, SolverError> {
        validate_system(matrix, psi, source)?;
        let controls = &self.controls;
        let mut perf = SolverPerformance::new(self.name(), &self.field_name);

        let (mut r, norm_factor) = initial_residual(matrix, psi, source, controls.norm)?;
        perf.set_initial(matrix.global_norm(&r, controls.norm)? / norm_factor);

        let mut monitor = ConvergenceMonitor::new(controls);
        if monitor.start(&mut perf, psi) {
            let smoother = LduSmoother::new(controls.smoother, matrix)?;
            loop {
                smoother.smooth(matrix, psi, source, controls.n_sweeps)?;
                perf.n_iterations += controls.n_sweeps;
                matrix.residual(psi, source, &mut r)?;
                perf.record(matrix.global_norm(&r, controls.norm)? / norm_factor);
                if monitor.check_divergence(&mut perf, psi) || !monitor.should_continue(&mut perf) {
                    break;
                }
            }
        }

        debug!(smoother = %controls.smoother, "{perf}");
        Ok(perf)
    }

    fn name(&self) -> &'static str {
        "smoothSolver"
    }

    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn controls(&self) -> &SolverControls {
        &self.controls
    }
}
