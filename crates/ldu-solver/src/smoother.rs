//! Smoothers: Gauss-Seidel, symmetric Gauss-Seidel, DIC and DILU.
//!
//! A smoother performs a fixed number of relaxation sweeps on `A psi =
//! source`. Smoothers are selected by [`SmootherType`] and dispatched through
//! the [`LduSmoother`] enum; the incomplete-factorisation variants carry their
//! reciprocal diagonal, which is computed once per matrix.
//!
//! # Coupled boundaries
//!
//! Gauss-Seidel exchanges halo values at the start of every sweep and moves
//! the interface contributions to the right-hand side:
//!
//! ```text
//! b'[fc] = source[fc] + coeff * psi_remote
//! ```
//!
//! so within a sweep only local values change. DIC/DILU sweeps work on the
//! full residual (which includes the interfaces) and ignore interfaces in the
//! factorisation.

use tracing::trace;

use crate::controls::SmootherType;
use crate::error::{ConfigError, SolverError};
use crate::matrix::LduMatrix;
use crate::types::VSMALL;

/// A smoother bound to one matrix.
#[derive(Debug, Clone)]
pub enum LduSmoother {
    /// Forward Gauss-Seidel.
    GaussSeidel,
    /// Forward then backward Gauss-Seidel.
    SymGaussSeidel,
    /// Diagonal incomplete Cholesky; holds the reciprocal factor diagonal.
    Dic {
        /// `1 / D*` of the incomplete factorisation.
        r_d: Vec<f64>,
    },
    /// Diagonal incomplete LU; holds the reciprocal factor diagonal.
    Dilu {
        /// `1 / D*` of the incomplete factorisation.
        r_d: Vec<f64>,
    },
}

impl LduSmoother {
    /// Prepare a smoother of `kind` for `matrix`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::IncompatibleMatrix`] for DIC on an asymmetric matrix.
    /// * [`SolverError::NumericalInstability`] for a zero diagonal or a zero
    ///   incomplete-factorisation pivot.
    pub fn new(kind: SmootherType, matrix: &LduMatrix) -> Result<Self, SolverError> {
        check_diagonal(matrix)?;
        match kind {
            SmootherType::GaussSeidel => Ok(LduSmoother::GaussSeidel),
            SmootherType::SymGaussSeidel => Ok(LduSmoother::SymGaussSeidel),
            SmootherType::Dic => {
                if matrix.is_asymmetric() {
                    return Err(ConfigError::IncompatibleMatrix {
                        solver: "DIC smoother".into(),
                        matrix_type: "asymmetric",
                    }
                    .into());
                }
                Ok(LduSmoother::Dic {
                    r_d: reciprocal_factor_diagonal(matrix)?,
                })
            }
            SmootherType::Dilu => Ok(LduSmoother::Dilu {
                r_d: reciprocal_factor_diagonal(matrix)?,
            }),
        }
    }

    /// Which smoother this is.
    pub fn kind(&self) -> SmootherType {
        match self {
            LduSmoother::GaussSeidel => SmootherType::GaussSeidel,
            LduSmoother::SymGaussSeidel => SmootherType::SymGaussSeidel,
            LduSmoother::Dic { .. } => SmootherType::Dic,
            LduSmoother::Dilu { .. } => SmootherType::Dilu,
        }
    }

    /// Run `n_sweeps` sweeps on `A psi = source`, updating `psi` in place.
    pub fn smooth(
        &self,
        matrix: &LduMatrix,
        psi: &mut [f64],
        source: &[f64],
        n_sweeps: usize,
    ) -> Result<(), SolverError> {
        trace!(smoother = %self.kind(), n_cells = psi.len(), n_sweeps, "smooth");
        match self {
            LduSmoother::GaussSeidel => {
                for _ in 0..n_sweeps {
                    let b_prime = coupled_source(matrix, psi, source)?;
                    gauss_seidel_sweep(matrix, psi, &b_prime, Direction::Forward);
                }
            }
            LduSmoother::SymGaussSeidel => {
                for _ in 0..n_sweeps {
                    let b_prime = coupled_source(matrix, psi, source)?;
                    gauss_seidel_sweep(matrix, psi, &b_prime, Direction::Forward);
                    let b_prime = coupled_source(matrix, psi, source)?;
                    gauss_seidel_sweep(matrix, psi, &b_prime, Direction::Backward);
                }
            }
            LduSmoother::Dic { r_d } | LduSmoother::Dilu { r_d } => {
                let mut r_a = vec![0.0; psi.len()];
                for _ in 0..n_sweeps {
                    matrix.residual(psi, source, &mut r_a)?;
                    for (r, d) in r_a.iter_mut().zip(r_d) {
                        *r *= d;
                    }
                    apply_incomplete_factor(matrix, r_d, &mut r_a);
                    for (p, r) in psi.iter_mut().zip(&r_a) {
                        *p += r;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Collective: a zero diagonal on any rank fails every rank.
fn check_diagonal(matrix: &LduMatrix) -> Result<(), SolverError> {
    let row = matrix.diag().iter().position(|d| d.abs() < VSMALL);
    fail_together(matrix, row.map(|row| format!("zero diagonal coefficient in row {row}")))
}

/// Reduce a local failure so every rank returns the same error.
fn fail_together(matrix: &LduMatrix, local: Option<String>) -> Result<(), SolverError> {
    if !matrix.mesh().comm().any(local.is_some())? {
        return Ok(());
    }
    Err(SolverError::NumericalInstability {
        iteration: 0,
        detail: local.unwrap_or_else(|| "zero pivot on another rank".to_string()),
    })
}

/// `source` plus the interface contributions evaluated at the current `psi`.
fn coupled_source(matrix: &LduMatrix, psi: &[f64], source: &[f64]) -> Result<Vec<f64>, SolverError> {
    let mut b_prime = source.to_vec();
    if matrix.interface_coeffs().is_empty() {
        return Ok(b_prime);
    }
    let halo = matrix.mesh().exchange(psi)?;
    for ((iface, coeffs), remote) in matrix
        .mesh()
        .interfaces()
        .iter()
        .zip(matrix.interface_coeffs())
        .zip(&halo)
    {
        for ((&cell, c), r) in iface.face_cells().iter().zip(coeffs).zip(remote) {
            b_prime[cell] += c * r;
        }
    }
    Ok(b_prime)
}

/// One row-by-row Gauss-Seidel pass.
///
/// Row `c` reads its upper entries through `owner_start` and its lower
/// entries through `losort`, so each update uses the newest values of
/// already-visited cells.
fn gauss_seidel_sweep(matrix: &LduMatrix, psi: &mut [f64], b_prime: &[f64], direction: Direction) {
    let addr = matrix.mesh().addressing();
    let (l, u) = (addr.lower_addr(), addr.upper_addr());
    let (diag, upper, lower) = (matrix.diag(), matrix.upper(), matrix.lower());

    let mut relax = |cell: usize| {
        let mut value = b_prime[cell];
        for face in addr.owner_faces(cell) {
            value -= upper[face] * psi[u[face]];
        }
        for &face in addr.neighbour_faces(cell) {
            value -= lower[face] * psi[l[face]];
        }
        psi[cell] = value / diag[cell];
    };

    match direction {
        Direction::Forward => (0..addr.n_cells()).for_each(&mut relax),
        Direction::Backward => (0..addr.n_cells()).rev().for_each(&mut relax),
    }
}

/// Reciprocal diagonal of the diagonal incomplete factorisation.
///
/// `D*[u] = D[u] - upper[f] lower[f] / D*[l]` over faces in order; returns
/// `1 / D*`.
///
/// Collective: a vanishing pivot on any rank fails every rank.
pub(crate) fn reciprocal_factor_diagonal(matrix: &LduMatrix) -> Result<Vec<f64>, SolverError> {
    let addr = matrix.mesh().addressing();
    let (l, u) = (addr.lower_addr(), addr.upper_addr());
    let (upper, lower) = (matrix.upper(), matrix.lower());
    let mut r_d = matrix.diag().to_vec();
    for face in 0..l.len() {
        r_d[u[face]] -= upper[face] * lower[face] / r_d[l[face]];
    }
    let bad = r_d
        .iter()
        .enumerate()
        .find(|(_, d)| !d.is_finite() || d.abs() < VSMALL)
        .map(|(row, d)| format!("incomplete factorisation pivot {d:.3e} in row {row}"));
    fail_together(matrix, bad)?;
    r_d.iter_mut().for_each(|d| *d = 1.0 / *d);
    Ok(r_d)
}

/// Forward and backward substitution with the incomplete factor.
///
/// On entry `x` holds `rD * r`; on exit `x = M^-1 r`.
pub(crate) fn apply_incomplete_factor(matrix: &LduMatrix, r_d: &[f64], x: &mut [f64]) {
    let addr = matrix.mesh().addressing();
    let (l, u) = (addr.lower_addr(), addr.upper_addr());
    let (upper, lower) = (matrix.upper(), matrix.lower());
    for face in 0..l.len() {
        x[u[face]] -= r_d[u[face]] * lower[face] * x[l[face]];
    }
    for face in (0..l.len()).rev() {
        x[l[face]] -= r_d[l[face]] * upper[face] * x[u[face]];
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::LduAddressing;
    use crate::mesh::LduMesh;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// Tridiagonal chain: diag 4, off-diagonal -1.
    fn chain(n: usize) -> LduMatrix {
        let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
        LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), vec![4.0; n], vec![-1.0; n - 1])
            .unwrap()
    }

    fn residual_norm(m: &LduMatrix, psi: &[f64], source: &[f64]) -> f64 {
        let mut r = vec![0.0; psi.len()];
        m.residual(psi, source, &mut r).unwrap();
        r.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    #[test]
    fn one_forward_sweep_by_hand() {
        let m = chain(3);
        let smoother = LduSmoother::new(SmootherType::GaussSeidel, &m).unwrap();
        let mut psi = vec![0.0; 3];
        smoother.smooth(&m, &mut psi, &[4.0, 4.0, 4.0], 1).unwrap();
        // x0 = 1, x1 = (4 + 1) / 4, x2 = (4 + 1.25) / 4
        assert_relative_eq!(psi[0], 1.0);
        assert_relative_eq!(psi[1], 1.25);
        assert_relative_eq!(psi[2], 1.3125);
    }

    #[test]
    fn backward_sweep_starts_at_last_row() {
        let m = chain(3);
        let smoother = LduSmoother::new(SmootherType::SymGaussSeidel, &m).unwrap();
        let mut psi = vec![0.0; 3];
        smoother.smooth(&m, &mut psi, &[4.0, 4.0, 4.0], 1).unwrap();
        // after forward: [1, 1.25, 1.3125]; backward:
        let x2 = (4.0 + 1.25) / 4.0;
        let x1 = (4.0 + 1.0 + x2) / 4.0;
        let x0 = (4.0 + x1) / 4.0;
        assert_relative_eq!(psi[2], x2);
        assert_relative_eq!(psi[1], x1);
        assert_relative_eq!(psi[0], x0);
    }

    #[test]
    fn all_smoothers_reduce_the_residual() {
        let m = chain(20);
        let source: Vec<f64> = (0..20).map(|i| (i as f64 * 0.3).sin()).collect();
        for kind in [
            SmootherType::GaussSeidel,
            SmootherType::SymGaussSeidel,
            SmootherType::Dic,
            SmootherType::Dilu,
        ] {
            let smoother = LduSmoother::new(kind, &m).unwrap();
            let mut psi = vec![0.0; 20];
            let mut previous = residual_norm(&m, &psi, &source);
            for _ in 0..8 {
                smoother.smooth(&m, &mut psi, &source, 1).unwrap();
                let current = residual_norm(&m, &psi, &source);
                assert!(current <= previous + 1e-14, "{kind}: {current} > {previous}");
                previous = current;
            }
            assert!(previous < 1e-2, "{kind} residual {previous}");
        }
    }

    #[test]
    fn dic_on_tridiagonal_is_exact() {
        // the incomplete Cholesky of a tridiagonal matrix is complete
        let m = chain(6);
        let smoother = LduSmoother::new(SmootherType::Dic, &m).unwrap();
        let source = vec![1.0, -2.0, 0.5, 3.0, 0.0, 1.0];
        let mut psi = vec![0.0; 6];
        smoother.smooth(&m, &mut psi, &source, 1).unwrap();
        assert!(residual_norm(&m, &psi, &source) < 1e-12);
    }

    #[test]
    fn dic_rejects_asymmetric() {
        let addr = LduAddressing::new(2, vec![0], vec![1]).unwrap();
        let m = LduMatrix::new_asymmetric(
            Arc::new(LduMesh::serial(addr)),
            vec![2.0, 2.0],
            vec![-1.0],
            vec![-0.5],
        )
        .unwrap();
        let err = LduSmoother::new(SmootherType::Dic, &m).unwrap_err();
        assert!(matches!(err, SolverError::Config(ConfigError::IncompatibleMatrix { .. })));
        assert!(LduSmoother::new(SmootherType::Dilu, &m).is_ok());
    }

    #[test]
    fn zero_diagonal_rejected() {
        let addr = LduAddressing::new(2, vec![0], vec![1]).unwrap();
        let m = LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), vec![0.0, 1.0], vec![1.0])
            .unwrap();
        assert!(matches!(
            LduSmoother::new(SmootherType::GaussSeidel, &m),
            Err(SolverError::NumericalInstability { .. })
        ));
    }
}
