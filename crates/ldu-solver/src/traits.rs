//! Solver and equation trait seams.
//!
//! Every linear solver implements [`LinearSolver`]. The equation seam
//! ([`EquationAssembler`], [`SolutionField`]) is what a discretisation layer
//! implements to hand systems to [`solve_equation`](crate::equation::solve_equation)
//! and receive the solution back.

use std::sync::Arc;

use crate::controls::SolverControls;
use crate::equation::LinearSystem;
use crate::error::SolverError;
use crate::matrix::LduMatrix;
use crate::mesh::LduMesh;
use crate::types::SolverPerformance;

/// A configured linear solver for one field.
///
/// Solvers return the [`SolverPerformance`] of every solve, converged or
/// not; turning non-convergence into an error is the caller's policy (see
/// [`selection::solve`](crate::selection::solve)).
pub trait LinearSolver: Send + Sync {
    /// Solve `A psi = source`, starting from and updating `psi`.
    ///
    /// Collective when the matrix has processor interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError`] for invalid input, a singular coarsest level
    /// or a failed halo exchange.
    fn solve(
        &self,
        matrix: &LduMatrix,
        psi: &mut [f64],
        source: &[f64],
    ) -> Result<SolverPerformance, SolverError>;

    /// Solver type name as it appears in controls and logs.
    fn name(&self) -> &'static str;

    /// Field this solver was configured for.
    fn field_name(&self) -> &str;

    /// Controls in effect.
    fn controls(&self) -> &SolverControls;
}

/// Builds the linear system of one field.
pub trait EquationAssembler {
    /// Name of the field the system is for.
    fn field_name(&self) -> &str;

    /// Assemble matrix and source on `mesh`.
    ///
    /// # Errors
    ///
    /// Returns [`SolverError`] when the coefficients cannot be assembled.
    fn assemble(&self, mesh: &Arc<LduMesh>) -> Result<LinearSystem, SolverError>;
}

/// Cell values of a field plus its boundary-condition update.
pub trait SolutionField {
    /// Cell values.
    fn values(&self) -> &[f64];

    /// Mutable cell values.
    fn values_mut(&mut self) -> &mut [f64];

    /// Re-evaluate boundary values after the cell values changed.
    fn correct_boundary_conditions(&mut self) -> Result<(), SolverError> {
        Ok(())
    }
}

impl SolutionField for Vec<f64> {
    fn values(&self) -> &[f64] {
        self
    }

    fn values_mut(&mut self) -> &mut [f64] {
        self
    }
}
