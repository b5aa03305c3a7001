//! Geometric-agglomerated algebraic multigrid (GAMG).
//!
//! [`GamgSolver`] iterates V or W cycles on the finest level until the
//! normalised residual meets the tolerance. The hierarchy (agglomeration,
//! restricted matrices, smoothers and the coarsest solver) is rebuilt for
//! every solve; the agglomeration itself is cached on the mesh unless
//! `cacheAgglomeration` is off.

mod cycle;
mod hierarchy;

pub use hierarchy::{restrict_matrix, GamgHierarchy};

use tracing::debug;

use crate::controls::SolverControls;
use crate::error::{ConfigError, SolverError};
use crate::matrix::LduMatrix;
use crate::monitor::{initial_residual, ConvergenceMonitor};
use crate::traits::LinearSolver;
use crate::types::SolverPerformance;
use crate::validation::validate_system;

/// GAMG solver.
#[derive(Debug, Clone)]
pub struct GamgSolver {
    field_name: String,
    controls: SolverControls,
}

impl GamgSolver {
    /// GAMG solver for `field_name`.
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

impl LinearSolver for GamgSolver {
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
            let hierarchy = GamgHierarchy::build(matrix, controls)?;
            loop {
                hierarchy.cycle(matrix, psi, source)?;
                matrix.residual(psi, source, &mut r)?;
                perf.n_iterations += 1;
                perf.record(matrix.global_norm(&r, controls.norm)? / norm_factor);
                if monitor.check_divergence(&mut perf, psi) || !monitor.should_continue(&mut perf) {
                    break;
                }
            }
            debug!(levels = hierarchy.n_levels(), cycle = %controls.cycle, "{perf}");
        }

        Ok(perf)
    }

    fn name(&self) -> &'static str {
        "GAMG"
    }

    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn controls(&self) -> &SolverControls {
        &self.controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LduAddressing;
    use crate::controls::{AgglomeratorType, CycleType, SmootherType};
    use crate::mesh::LduMesh;
    use std::sync::Arc;

    /// 5-point Laplacian on an `nx` x `ny` grid with a Dirichlet row on the
    /// west boundary.
    fn grid(nx: usize, ny: usize) -> LduMatrix {
        let n = nx * ny;
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for c in 0..n {
            let (i, j) = (c % nx, c / nx);
            if i + 1 < nx {
                lower.push(c);
                upper.push(c + 1);
            }
            if j + 1 < ny {
                lower.push(c);
                upper.push(c + nx);
            }
        }
        let addr = LduAddressing::new(n, lower, upper).unwrap();
        let mut diag = vec![0.0; n];
        for (&l, &u) in addr.lower_addr().iter().zip(addr.upper_addr()) {
            diag[l] += 1.0;
            diag[u] += 1.0;
        }
        for j in 0..ny {
            diag[j * nx] += 2.0;
        }
        let n_faces = addr.n_faces();
        LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), diag, vec![-1.0; n_faces]).unwrap()
    }

    fn solve(m: &LduMatrix, controls: SolverControls) -> SolverPerformance {
        let source = vec![1.0; m.n_cells()];
        let mut psi = vec![0.0; m.n_cells()];
        GamgSolver::new("p", controls).unwrap().solve(m, &mut psi, &source).unwrap()
    }

    #[test]
    fn converges_on_a_grid() {
        let m = grid(16, 16);
        let perf = solve(
            &m,
            SolverControls {
                tolerance: 1e-8,
                ..SolverControls::gamg(SmootherType::GaussSeidel)
            },
        );
        assert!(perf.converged, "{perf}");
        assert!(perf.final_residual < 1e-8);
        assert!(perf.n_iterations < 50, "{perf}");
        assert_eq!(perf.solver_name, "GAMG");
    }

    #[test]
    fn w_cycle_needs_no_more_cycles_than_v() {
        let m = grid(16, 16);
        let base = SolverControls {
            tolerance: 1e-8,
            cache_agglomeration: false,
            ..SolverControls::gamg(SmootherType::GaussSeidel)
        };
        let v = solve(&m, base.clone());
        let w = solve(
            &m,
            SolverControls {
                cycle: CycleType::W,
                ..base
            },
        );
        assert!(v.converged && w.converged);
        assert!(w.n_iterations <= v.n_iterations, "W {w} vs V {v}");
    }

    #[test]
    fn every_agglomerator_and_smoother_converges() {
        let m = grid(12, 12);
        for agglomerator in [
            AgglomeratorType::FaceAreaPair,
            AgglomeratorType::AlgebraicPair,
            AgglomeratorType::MGridGen,
        ] {
            for smoother in [SmootherType::GaussSeidel, SmootherType::SymGaussSeidel, SmootherType::Dic] {
                for scale_correction in [Some(true), Some(false)] {
                    let perf = solve(
                        &m,
                        SolverControls {
                            agglomerator,
                            scale_correction,
                            tolerance: 1e-7,
                            max_iter: 200,
                            ..SolverControls::gamg(smoother)
                        },
                    );
                    assert!(perf.converged, "{agglomerator}/{smoother}/{scale_correction:?}: {perf}");
                }
            }
        }
    }

    #[test]
    fn iterative_coarsest_level_converges() {
        let m = grid(12, 12);
        let perf = solve(
            &m,
            SolverControls {
                direct_solve_coarsest: false,
                tolerance: 1e-7,
                ..SolverControls::gamg(SmootherType::GaussSeidel)
            },
        );
        assert!(perf.converged, "{perf}");
    }

    #[test]
    fn zero_max_iter_does_nothing() {
        let m = grid(4, 4);
        let perf = solve(
            &m,
            SolverControls {
                max_iter: 0,
                ..SolverControls::gamg(SmootherType::GaussSeidel)
            },
        );
        assert_eq!(perf.n_iterations, 0);
        assert!(!perf.converged);
        assert_eq!(perf.initial_residual, perf.final_residual);
    }

    #[test]
    fn inverted_size_bounds_fail_at_construction() {
        let controls = SolverControls {
            agglomerator: AgglomeratorType::MGridGen,
            min_size: Some(8),
            max_size: Some(2),
            ..SolverControls::gamg(SmootherType::GaussSeidel)
        };
        let err = GamgSolver::new("p", controls).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "minSize", .. }), "{err}");

        let controls = SolverControls {
            n_cells_in_coarsest_level: 0,
            ..SolverControls::gamg(SmootherType::GaussSeidel)
        };
        let err = GamgSolver::new("p", controls).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "nCellsInCoarsestLevel", .. }));
    }
}
