//! Assemble, solve and write back one field equation.

use std::sync::Arc;

use tracing::debug;

use crate::controls::SolverControls;
use crate::error::{SolverError, ValidationError};
use crate::matrix::LduMatrix;
use crate::mesh::LduMesh;
use crate::selection;
use crate::traits::{EquationAssembler, SolutionField};
use crate::types::SolverPerformance;

/// Matrix and source of one field equation.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    /// Coefficients.
    pub matrix: LduMatrix,
    /// Right-hand side.
    pub source: Vec<f64>,
}

impl LinearSystem {
    /// Pair a matrix with its source.
    ///
    /// # Errors
    ///
    /// [`ValidationError::DimensionMismatch`] when `source` does not have one
    /// entry per cell.
    pub fn new(matrix: LduMatrix, source: Vec<f64>) -> Result<Self, ValidationError> {
        if source.len() != matrix.n_cells() {
            return Err(ValidationError::DimensionMismatch(format!(
                "source has length {} but the matrix has {} cells",
                source.len(),
                matrix.n_cells(),
            )));
        }
        Ok(Self { matrix, source })
    }
}

/// Assemble the equation of `assembler` on `mesh`, optionally under-relax it
/// by `relaxation`, solve it starting from the current `field` values and
/// write the solution back.
///
/// Boundary conditions are corrected after the write-back.
///
/// Collective when the mesh has processor interfaces.
pub fn solve_equation<A, F>(
    mesh: &Arc<LduMesh>,
    assembler: &A,
    field: &mut F,
    controls: &SolverControls,
    relaxation: Option<f64>,
) -> Result<SolverPerformance, SolverError>
where
    A: EquationAssembler + ?Sized,
    F: SolutionField + ?Sized,
{
    let LinearSystem {
        mut matrix,
        mut source,
    } = assembler.assemble(mesh)?;

    if let Some(alpha) = relaxation {
        matrix.relax(field.values(), &mut source, alpha)?;
        debug!(field = assembler.field_name(), alpha, "relaxed equation");
    }

    let mut psi = field.values().to_vec();
    let perf = selection::solve(assembler.field_name(), &matrix, &mut psi, &source, controls)?;

    let values = field.values_mut();
    if values.len() != psi.len() {
        return Err(ValidationError::DimensionMismatch(format!(
            "field {} has {} values but the system has {} cells",
            assembler.field_name(),
            values.len(),
            psi.len(),
        ))
        .into());
    }
    values.copy_from_slice(&psi);
    field.correct_boundary_conditions()?;
    Ok(perf)
}
