//! The multigrid cycle.
//!
//! ```text
//! finest:  r = source - A psi
//!          restrict r -> coarse correction (recursive) -> prolong
//!          [scale] psi += correction; smooth nFinestSweeps
//! level k: psi_k = 0; pre-smooth
//!          repeat 1 (V) or 2 (W) times:
//!              r_k = source_k - A_k psi_k
//!              restrict -> coarse correction of level k+1 -> prolong
//!              [scale] psi_k += correction
//!          post-smooth
//! coarsest: direct LU (or an iterative fallback)
//! ```

use tracing::trace;

use super::hierarchy::{CoarsestSolver, GamgHierarchy};
use crate::controls::{PreconditionerType, SmootherType, SolverControls};
use crate::error::SolverError;
use crate::matrix::LduMatrix;
use crate::pcg::{axpy_f64, dot_f64, PcgSolver};
use crate::smooth_solver::SmoothSolver;
use crate::traits::LinearSolver;
use crate::types::VSMALL;

impl GamgHierarchy {
    /// One cycle on the finest level, updating `psi` in place.
    ///
    /// Collective.
    pub fn cycle(&self, matrix: &LduMatrix, psi: &mut [f64], source: &[f64]) -> Result<(), SolverError> {
        let n = psi.len();
        let mut r = vec![0.0; n];
        matrix.residual(psi, source, &mut r)?;

        let mut correction = vec![0.0; n];
        if self.n_levels() == 0 {
            self.solve_coarsest(matrix, &mut correction, &r)?;
        } else {
            let agglomeration = &self.agglomeration;
            let mut coarse_source = vec![0.0; agglomeration.level(0).n_coarse_cells()];
            agglomeration.restrict_field(0, &r, &mut coarse_source);
            let coarse_correction = self.coarse_correction(1, &coarse_source)?;
            agglomeration.prolong_field(0, &coarse_correction, &mut correction);
            if self.scale_correction {
                scale_correction(matrix, &mut correction, &r)?;
            }
        }
        axpy_f64(1.0, &correction, psi);

        self.fine_smoother
            .smooth(matrix, psi, source, self.controls.n_finest_sweeps)
    }

    /// Correction on coarse level `level` for the restricted residual
    /// `source`, starting from zero.
    fn coarse_correction(&self, level: usize, source: &[f64]) -> Result<Vec<f64>, SolverError> {
        let matrix = &self.matrices[level - 1];
        let mut psi = vec![0.0; matrix.n_cells()];
        if level == self.n_levels() {
            self.solve_coarsest(matrix, &mut psi, source)?;
            return Ok(psi);
        }

        let controls = &self.controls;
        let smoother = &self.smoothers[level - 1];
        let pre_sweeps = controls.pre_sweeps(level);
        if pre_sweeps > 0 {
            smoother.smooth(matrix, &mut psi, source, pre_sweeps)?;
        }

        let agglomeration = &self.agglomeration;
        let mut r = vec![0.0; psi.len()];
        let mut correction = vec![0.0; psi.len()];
        let mut coarse_source = vec![0.0; agglomeration.level(level).n_coarse_cells()];
        for _ in 0..controls.cycle.coarse_visits() {
            matrix.residual(&psi, source, &mut r)?;
            agglomeration.restrict_field(level, &r, &mut coarse_source);
            let coarse_correction = self.coarse_correction(level + 1, &coarse_source)?;
            agglomeration.prolong_field(level, &coarse_correction, &mut correction);
            if self.scale_correction {
                scale_correction(matrix, &mut correction, &r)?;
            }
            axpy_f64(1.0, &correction, &mut psi);
        }

        let post_sweeps = controls.post_sweeps(level);
        if post_sweeps > 0 {
            smoother.smooth(matrix, &mut psi, source, post_sweeps)?;
        }
        Ok(psi)
    }

    fn solve_coarsest(&self, matrix: &LduMatrix, psi: &mut [f64], source: &[f64]) -> Result<(), SolverError> {
        match &self.coarsest {
            CoarsestSolver::Direct(lu) => lu.solve(psi, source),
            CoarsestSolver::Iterative => {
                let controls = SolverControls {
                    tolerance: self.controls.tolerance,
                    rel_tol: self.controls.rel_tol,
                    norm: self.controls.norm,
                    ..SolverControls::pcg(PreconditionerType::Diagonal)
                };
                let perf = if matrix.is_symmetric() {
                    PcgSolver::new("coarsest", controls)?.solve(matrix, psi, source)?
                } else {
                    let controls = SolverControls {
                        smoother: SmootherType::SymGaussSeidel,
                        ..controls
                    };
                    SmoothSolver::new("coarsest", controls)?.solve(matrix, psi, source)?
                };
                trace!("{perf}");
                Ok(())
            }
        }
    }
}

/// Scale a prolonged correction by the factor minimising the energy norm of
/// the error, then add a Jacobi update of what is left.
///
/// `sf = (r . c) / (c . A c)`, `c <- sf c + (r - sf A c) / D`.
pub(crate) fn scale_correction(
    matrix: &LduMatrix,
    correction: &mut [f64],
    residual: &[f64],
) -> Result<(), SolverError> {
    let mut a_corr = vec![0.0; correction.len()];
    matrix.amul(correction, &mut a_corr)?;
    let sums = matrix
        .mesh()
        .comm()
        .sum_many(&[dot_f64(residual, correction), dot_f64(correction, &a_corr)])?;
    let denominator = sums[1] + sums[1].signum() * VSMALL;
    let sf = sums[0] / denominator;

    for (((c, r), ac), d) in correction
        .iter_mut()
        .zip(residual)
        .zip(&a_corr)
        .zip(matrix.diag())
    {
        *c = sf * *c + (r - sf * ac) / d;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LduAddressing;
    use crate::controls::CycleType;
    use crate::mesh::LduMesh;
    use std::sync::Arc;

    fn chain(n: usize) -> LduMatrix {
        let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
        let mut diag = vec![2.0; n];
        diag[0] = 3.0;
        LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), diag, vec![-1.0; n - 1]).unwrap()
    }

    fn residual_norm(m: &LduMatrix, psi: &[f64], source: &[f64]) -> f64 {
        let mut r = vec![0.0; psi.len()];
        m.residual(psi, source, &mut r).unwrap();
        r.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn ten_cycles_reduce_the_residual() {
        let m = chain(64);
        let source = vec![1.0; 64];
        for cycle in [CycleType::V, CycleType::W] {
            let controls = SolverControls {
                cycle,
                cache_agglomeration: false,
                ..SolverControls::gamg(SmootherType::GaussSeidel)
            };
            let h = GamgHierarchy::build(&m, &controls).unwrap();
            let mut psi = vec![0.0; 64];
            let initial = residual_norm(&m, &psi, &source);
            for _ in 0..10 {
                h.cycle(&m, &mut psi, &source).unwrap();
            }
            let now = residual_norm(&m, &psi, &source);
            assert!(now < 0.1 * initial, "{cycle}: {now} vs {initial}");
        }
    }

    #[test]
    fn single_level_is_a_direct_solve() {
        let m = chain(6);
        let controls = SolverControls {
            n_cells_in_coarsest_level: 10,
            ..SolverControls::gamg(SmootherType::GaussSeidel)
        };
        let h = GamgHierarchy::build(&m, &controls).unwrap();
        assert_eq!(h.n_levels(), 0);
        let source = vec![1.0; 6];
        let mut psi = vec![0.0; 6];
        h.cycle(&m, &mut psi, &source).unwrap();
        assert!(residual_norm(&m, &psi, &source) < 1e-12);
    }

    #[test]
    fn scaling_is_exact_for_an_eigen_direction() {
        // A = 2I on a disconnected mesh; any correction direction is an
        // eigenvector, so scaling recovers the exact update.
        let addr = LduAddressing::new(3, vec![], vec![]).unwrap();
        let m = LduMatrix::new_diagonal(Arc::new(LduMesh::serial(addr)), vec![2.0; 3]).unwrap();
        let r = [2.0, 4.0, 6.0];
        let mut c = vec![10.0, 20.0, 30.0];
        scale_correction(&m, &mut c, &r).unwrap();
        for (ci, e) in c.iter().zip([1.0, 2.0, 3.0]) {
            assert!((ci - e).abs() < 1e-12);
        }
    }
}
