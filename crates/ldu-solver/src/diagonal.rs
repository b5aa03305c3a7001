//! Solver for diagonal matrices: `psi = source / diag`.

use crate::controls::SolverControls;
use crate::error::{ConfigError, SolverError};
use crate::matrix::LduMatrix;
use crate::traits::LinearSolver;
use crate::types::{SolverPerformance, VSMALL};
use crate::validation::validate_system;

/// Exact solve of a diagonal system.
#[derive(Debug, Clone)]
pub struct DiagonalSolver {
    field_name: String,
    controls: SolverControls,
}

impl DiagonalSolver {
    /// Diagonal solver for `field_name`.
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

impl LinearSolver for DiagonalSolver {
    fn solve(
        &self,
        matrix: &LduMatrix,
        psi: &mut [f64],
        source: &[f64],
    ) -> Result<SolverPerformance, SolverError> {
        validate_system(matrix, psi, source)?;
        if let Some(row) = matrix.diag().iter().position(|d| d.abs() < VSMALL) {
            return Err(SolverError::NumericalInstability {
                iteration: 0,
                detail: format!("zero diagonal coefficient in row {row}"),
            });
        }
        for ((p, s), d) in psi.iter_mut().zip(source).zip(matrix.diag()) {
            *p = s / d;
        }
        Ok(SolverPerformance::trivially_converged(self.name(), &self.field_name))
    }

    fn name(&self) -> &'static str {
        "diagonal"
    }

    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn controls(&self) -> &SolverControls {
        &self.controls
    }
}
