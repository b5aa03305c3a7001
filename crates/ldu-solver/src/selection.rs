//! Run-time solver selection and the failure policy.
//!
//! [`select_solver`] maps the `solver` key of a [`SolverControls`] block to a
//! boxed [`LinearSolver`]. [`solve`] is the checked entry point used by the
//! equation layer: it validates the controls, routes diagonal matrices to the
//! diagonal solver, rejects solver/matrix combinations that cannot work, and
//! applies the `onFailure` policy to the returned performance.
//!
//! # Routing
//!
//! | Matrix      | `solver`       | Result                                    |
//! |-------------|----------------|-------------------------------------------|
//! | diagonal    | any            | [`DiagonalSolver`]                        |
//! | symmetric   | any            | as configured                             |
//! | asymmetric  | `PCG`          | [`ConfigError::IncompatibleMatrix`]       |
//! | asymmetric  | smoother `DIC` | [`ConfigError::IncompatibleMatrix`]       |
//! | asymmetric  | otherwise      | as configured                             |

use tracing::{info, warn};

use crate::controls::{FailurePolicy, SmootherType, SolverControls, SolverType};
use crate::diagonal::DiagonalSolver;
use crate::error::{ConfigError, SolverError};
use crate::gamg::GamgSolver;
use crate::matrix::LduMatrix;
use crate::pcg::PcgSolver;
use crate::smooth_solver::SmoothSolver;
use crate::traits::LinearSolver;
use crate::types::SolverPerformance;
use crate::validation::{validate_output, validate_system};

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Solver named by `controls.solver`, configured for `field_name`.
///
/// # Errors
///
/// Returns the first violation [`SolverControls::validate`] finds.
pub fn select_solver(
    field_name: &str,
    controls: &SolverControls,
) -> Result<Box<dyn LinearSolver>, ConfigError> {
    let controls = controls.clone();
    Ok(match controls.solver {
        SolverType::SmoothSolver => Box::new(SmoothSolver::new(field_name, controls)?),
        SolverType::Pcg => Box::new(PcgSolver::new(field_name, controls)?),
        SolverType::Gamg => Box::new(GamgSolver::new(field_name, controls)?),
        SolverType::Diagonal => Box::new(DiagonalSolver::new(field_name, controls)?),
    })
}

/// Reject combinations that need a symmetric matrix.
fn check_compatible(controls: &SolverControls, matrix: &LduMatrix) -> Result<(), ConfigError> {
    if !matrix.is_asymmetric() {
        return Ok(());
    }
    let incompatible = |solver: &str| ConfigError::IncompatibleMatrix {
        solver: solver.to_string(),
        matrix_type: matrix.matrix_type().label(),
    };
    match controls.solver {
        SolverType::Pcg => Err(incompatible("PCG")),
        SolverType::SmoothSolver | SolverType::Gamg if controls.smoother == SmootherType::Dic => {
            Err(incompatible("DIC smoother"))
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Checked solve
// ---------------------------------------------------------------------------

/// Solve `A psi = source` for `field_name` with the solver `controls` select.
///
/// Collective when the matrix has processor interfaces.
///
/// # Errors
///
/// * [`SolverError::Config`] for invalid controls or an incompatible matrix.
/// * [`SolverError::InvalidInput`] for bad dimensions or non-finite input,
///   and for a non-finite solution.
/// * With `onFailure error`: [`SolverError::Diverged`],
///   [`SolverError::NumericalInstability`] for a singular system and
///   [`SolverError::NonConvergence`] otherwise.
pub fn solve(
    field_name: &str,
    matrix: &LduMatrix,
    psi: &mut [f64],
    source: &[f64],
    controls: &SolverControls,
) -> Result<SolverPerformance, SolverError> {
    let solver: Box<dyn LinearSolver> = if matrix.is_diagonal() {
        Box::new(DiagonalSolver::new(field_name, controls.clone())?)
    } else {
        let solver = select_solver(field_name, controls)?;
        check_compatible(controls, matrix)?;
        solver
    };
    validate_system(matrix, psi, source)?;

    let perf = solver.solve(matrix, psi, source)?;
    validate_output(psi, &perf)?;
    info!("{perf}");

    apply_failure_policy(controls, perf)
}

fn apply_failure_policy(
    controls: &SolverControls,
    perf: SolverPerformance,
) -> Result<SolverPerformance, SolverError> {
    if perf.converged || controls.max_iter == 0 {
        return Ok(perf);
    }

    match controls.on_failure {
        FailurePolicy::Warn => {
            warn!(
                solver = %perf.solver_name,
                field = %perf.field_name,
                iterations = perf.n_iterations,
                residual = perf.final_residual,
                singular = perf.singular,
                diverged = perf.diverged,
                "linear solve did not converge"
            );
            Ok(perf)
        }
        FailurePolicy::Error if perf.diverged => Err(SolverError::Diverged {
            solver: perf.solver_name,
            field: perf.field_name,
            iteration: perf.n_iterations,
            residual: perf.final_residual,
        }),
        FailurePolicy::Error if perf.singular => Err(SolverError::NumericalInstability {
            iteration: perf.n_iterations,
            detail: format!("{} found the system for {} singular", perf.solver_name, perf.field_name),
        }),
        FailurePolicy::Error => Err(SolverError::NonConvergence {
            solver: perf.solver_name,
            field: perf.field_name,
            iterations: perf.n_iterations,
            residual: perf.final_residual,
            tolerance: controls.tolerance,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LduAddressing;
    use crate::controls::PreconditionerType;
    use crate::mesh::LduMesh;
    use std::sync::Arc;

    fn chain_mesh(n: usize) -> Arc<LduMesh> {
        let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
        Arc::new(LduMesh::serial(addr))
    }

    fn symmetric(n: usize) -> LduMatrix {
        LduMatrix::new_symmetric(chain_mesh(n), vec![3.0; n], vec![-1.0; n - 1]).unwrap()
    }

    fn asymmetric(n: usize) -> LduMatrix {
        LduMatrix::new_asymmetric(chain_mesh(n), vec![3.0; n], vec![-1.0; n - 1], vec![-0.5; n - 1])
            .unwrap()
    }

    #[test]
    fn selects_by_name() {
        for (solver, name) in [
            (SolverType::SmoothSolver, "smoothSolver"),
            (SolverType::Pcg, "PCG"),
            (SolverType::Gamg, "GAMG"),
            (SolverType::Diagonal, "diagonal"),
        ] {
            let controls = SolverControls {
                solver,
                ..Default::default()
            };
            let s = select_solver("U", &controls).unwrap();
            assert_eq!(s.name(), name);
            assert_eq!(s.field_name(), "U");
        }
    }

    #[test]
    fn selection_validates_the_controls() {
        for solver in [SolverType::SmoothSolver, SolverType::Pcg, SolverType::Gamg, SolverType::Diagonal] {
            let controls = SolverControls {
                solver,
                merge_levels: 0,
                ..Default::default()
            };
            let err = select_solver("U", &controls).err().unwrap();
            assert!(matches!(err, ConfigError::InvalidValue { key: "mergeLevels", .. }), "{solver}: {err}");
        }
    }

    #[test]
    fn diagonal_matrices_bypass_the_configured_solver() {
        let m = LduMatrix::new_diagonal(chain_mesh(3), vec![2.0; 3]).unwrap();
        let mut psi = vec![0.0; 3];
        let perf = solve("T", &m, &mut psi, &[2.0, 4.0, 6.0], &SolverControls::gamg(SmootherType::GaussSeidel))
            .unwrap();
        assert_eq!(perf.solver_name, "diagonal");
        assert_eq!(psi, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn rejects_pcg_and_dic_on_asymmetric() {
        let m = asymmetric(6);
        let source = vec![1.0; 6];
        for controls in [
            SolverControls::pcg(PreconditionerType::Diagonal),
            SolverControls::smooth(SmootherType::Dic),
            SolverControls::gamg(SmootherType::Dic),
        ] {
            let mut psi = vec![0.0; 6];
            let err = solve("U", &m, &mut psi, &source, &controls).unwrap_err();
            assert!(
                matches!(err, SolverError::Config(ConfigError::IncompatibleMatrix { .. })),
                "{err}"
            );
            assert_eq!(psi, vec![0.0; 6]);
        }
    }

    #[test]
    fn asymmetric_gamg_with_dilu_solves() {
        let m = asymmetric(20);
        let mut psi = vec![0.0; 20];
        let perf = solve("U", &m, &mut psi, &vec![1.0; 20], &SolverControls::gamg(SmootherType::Dilu)).unwrap();
        assert!(perf.converged, "{perf}");
    }

    #[test]
    fn failure_policy_warn_returns_performance() {
        let m = symmetric(30);
        let controls = SolverControls {
            max_iter: 1,
            tolerance: 1e-14,
            ..SolverControls::smooth(SmootherType::GaussSeidel)
        };
        let mut psi = vec![0.0; 30];
        let perf = solve("T", &m, &mut psi, &vec![1.0; 30], &controls).unwrap();
        assert!(!perf.converged);
        assert_eq!(perf.n_iterations, 1);
    }

    #[test]
    fn failure_policy_error_raises_non_convergence() {
        let m = symmetric(30);
        let controls = SolverControls {
            max_iter: 1,
            tolerance: 1e-14,
            on_failure: FailurePolicy::Error,
            ..SolverControls::smooth(SmootherType::GaussSeidel)
        };
        let mut psi = vec![0.0; 30];
        let err = solve("T", &m, &mut psi, &vec![1.0; 30], &controls).unwrap_err();
        match err {
            SolverError::NonConvergence {
                solver, iterations, ..
            } => {
                assert_eq!(solver, "smoothSolver");
                assert_eq!(iterations, 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn invalid_controls_fail_before_solving() {
        let m = symmetric(4);
        let controls = SolverControls {
            n_sweeps: 0,
            ..Default::default()
        };
        let mut psi = vec![0.0; 4];
        let err = solve("T", &m, &mut psi, &[1.0; 4], &controls).unwrap_err();
        assert!(matches!(err, SolverError::Config(ConfigError::InvalidValue { key: "nSweeps", .. })));
    }

    #[test]
    fn wrong_source_length_is_invalid_input() {
        let m = symmetric(4);
        let mut psi = vec![0.0; 4];
        let err = solve("T", &m, &mut psi, &[1.0; 3], &SolverControls::default()).unwrap_err();
        assert!(matches!(err, SolverError::InvalidInput(_)));
    }
}
