//! Input validation for solver operations.
//!
//! All validation functions run eagerly before any computation begins, so
//! callers receive clear diagnostics instead of numerical failures deep in a
//! cycle. Every public function returns [`ValidationError`] on failure, which
//! converts into [`SolverError::InvalidInput`](crate::error::SolverError) via
//! `From`.
//!
//! # Limits
//!
//! | Resource                  | Limit       | Constant                   |
//! |---------------------------|-------------|----------------------------|
//! | Cells per rank            | 50,000,000  | [`MAX_CELLS`]              |
//! | Direct coarsest-level size| 4,096       | [`MAX_DIRECT_SOLVE_CELLS`] |
//! | Iterations                | 1,000,000   | [`MAX_ITERATIONS`]         |
//! | Sweeps per smoothing call | 1,000       | [`MAX_SWEEPS`]             |

use crate::error::ValidationError;
use crate::matrix::LduMatrix;
use crate::types::SolverPerformance;

// ---------------------------------------------------------------------------
// Resource limits
// ---------------------------------------------------------------------------

/// Maximum number of cells on one rank.
pub const MAX_CELLS: usize = 50_000_000;

/// Largest global coarse system factorised densely.
///
/// Above this the coarsest level falls back to an iterative solve.
pub const MAX_DIRECT_SOLVE_CELLS: usize = 4_096;

/// Maximum solver iterations to prevent runaway computation.
pub const MAX_ITERATIONS: usize = 1_000_000;

/// Maximum sweeps in a single smoothing call.
pub const MAX_SWEEPS: usize = 1_000;

// ---------------------------------------------------------------------------
// Field validation
// ---------------------------------------------------------------------------

/// Reject `NaN` and `Inf` entries.
///
/// # Errors
///
/// Returns [`ValidationError::NonFiniteValue`] naming the first bad index.
pub fn validate_finite(name: &str, values: &[f64]) -> Result<(), ValidationError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(ValidationError::NonFiniteValue(format!(
            "{name}[{i}] = {}",
            values[i],
        ))),
        None => Ok(()),
    }
}

/// Validate a linear system before solving.
///
/// Checks, in order:
///
/// 1. The local cell count is within [`MAX_CELLS`].
/// 2. `psi` and `source` have one entry per cell.
/// 3. `psi` and `source` are finite.
///
/// # Errors
///
/// Returns [`ValidationError`] describing the first violation found.
pub fn validate_system(
    matrix: &LduMatrix,
    psi: &[f64],
    source: &[f64],
) -> Result<(), ValidationError> {
    let n = matrix.n_cells();
    if n > MAX_CELLS {
        return Err(ValidationError::MatrixTooLarge {
            rows: n,
            max_dim: MAX_CELLS,
        });
    }
    for (name, values) in [("psi", psi), ("source", source)] {
        if values.len() != n {
            return Err(ValidationError::DimensionMismatch(format!(
                "{name} has length {} but the matrix has {n} cells",
                values.len(),
            )));
        }
        validate_finite(name, values)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output validation (post-solve)
// ---------------------------------------------------------------------------

/// Validate a solve after it completes.
///
/// Catches silent corruption: a non-finite solution entry or residual.
///
/// # Errors
///
/// Returns [`ValidationError::NonFiniteValue`] if the output is corrupted.
pub fn validate_output(psi: &[f64], perf: &SolverPerformance) -> Result<(), ValidationError> {
    validate_finite("solution", psi)?;
    if !perf.final_residual.is_finite() {
        return Err(ValidationError::NonFiniteValue(format!(
            "final residual of {} = {}",
            perf.field_name, perf.final_residual,
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LduAddressing;
    use crate::mesh::LduMesh;
    use std::sync::Arc;

    fn pair_matrix() -> LduMatrix {
        let addr = LduAddressing::new(2, vec![0], vec![1]).unwrap();
        LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), vec![2.0, 2.0], vec![-1.0])
            .unwrap()
    }

    #[test]
    fn finite_values_pass() {
        assert!(validate_finite("x", &[0.0, -1.0, 1e300]).is_ok());
    }

    #[test]
    fn nan_and_inf_rejected() {
        let err = validate_finite("x", &[0.0, f64::INFINITY]).unwrap_err();
        assert!(err.to_string().contains("x[1]"));
        assert!(validate_finite("x", &[f64::NAN]).is_err());
    }

    #[test]
    fn system_length_mismatch() {
        let m = pair_matrix();
        assert!(validate_system(&m, &[0.0, 0.0], &[1.0, 1.0]).is_ok());
        let err = validate_system(&m, &[0.0], &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, ValidationError::DimensionMismatch(_)));
    }

    #[test]
    fn output_with_nan_rejected() {
        let mut perf = SolverPerformance::new("GAMG", "p");
        perf.final_residual = 1e-7;
        assert!(validate_output(&[1.0], &perf).is_ok());
        assert!(validate_output(&[f64::NAN], &perf).is_err());
        perf.final_residual = f64::NAN;
        assert!(validate_output(&[1.0], &perf).is_err());
    }
}
