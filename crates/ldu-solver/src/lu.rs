//! Dense LU solve of the coarsest multigrid level.
//!
//! [`LuScalarMatrix`] gathers the global coarse matrix onto every rank,
//! factorises it with partial pivoting and keeps the factors. Each solve
//! gathers the right-hand side, back-substitutes redundantly on every rank
//! and extracts the local slice, so no scatter step is needed.
//!
//! Global cell ids are `offset(rank) + local cell`, with offsets taken from
//! an all-gather of the local cell counts. Interface entries are placed by
//! exchanging the global ids of the face cells across each interface.

use std::sync::Arc;

use tracing::debug;

use crate::comm::{Communicator, SerialComm};
use crate::error::{SolverError, ValidationError};
use crate::matrix::LduMatrix;
use crate::validation::MAX_DIRECT_SOLVE_CELLS;

/// LU factors of a dense matrix, plus the slice of it owned by this rank.
#[derive(Debug, Clone)]
pub struct LuScalarMatrix {
    n: usize,
    /// Row-major packed factors: unit-lower `L` below the diagonal, `U` on
    /// and above it.
    factors: Vec<f64>,
    /// `pivots[k]` is the row swapped with row `k` at elimination step `k`.
    pivots: Vec<usize>,
    offset: usize,
    n_local: usize,
    comm: Arc<dyn Communicator>,
}

impl LuScalarMatrix {
    /// Factorise a row-major `n x n` matrix on a single process.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::DimensionMismatch`] if `values.len() != n * n`.
    /// * [`SolverError::SingularMatrix`] on a vanishing pivot.
    pub fn from_dense(n: usize, values: Vec<f64>) -> Result<Self, SolverError> {
        if values.len() != n * n {
            return Err(ValidationError::DimensionMismatch(format!(
                "{} values for a {n}x{n} matrix",
                values.len()
            ))
            .into());
        }
        let (factors, pivots) = factorise(n, values)?;
        Ok(Self {
            n,
            factors,
            pivots,
            offset: 0,
            n_local: n,
            comm: Arc::new(SerialComm::new()),
        })
    }

    /// Gather `matrix` from every rank and factorise it.
    ///
    /// Collective: every rank must call this with its part of the matrix.
    ///
    /// # Errors
    ///
    /// * [`ValidationError::MatrixTooLarge`] above [`MAX_DIRECT_SOLVE_CELLS`]
    ///   global cells.
    /// * [`SolverError::SingularMatrix`] on a vanishing pivot.
    /// * [`SolverError::Comm`] if a gather or exchange fails.
    pub fn from_ldu(matrix: &LduMatrix) -> Result<Self, SolverError> {
        let mesh = matrix.mesh();
        let comm = mesh.comm_arc();
        let n_local = matrix.n_cells();

        let sizes: Vec<usize> = comm
            .all_gather_labels(&[n_local])?
            .iter()
            .map(|v| v[0])
            .collect();
        let n: usize = sizes.iter().sum();
        if n > MAX_DIRECT_SOLVE_CELLS {
            return Err(ValidationError::MatrixTooLarge {
                rows: n,
                max_dim: MAX_DIRECT_SOLVE_CELLS,
            }
            .into());
        }
        let offset: usize = sizes[..comm.rank()].iter().sum();

        // (row, col) pairs and values of every local entry, in global ids.
        let addr = mesh.addressing();
        let (l, u) = (addr.lower_addr(), addr.upper_addr());
        let (upper, lower) = (matrix.upper(), matrix.lower());
        let mut index = Vec::with_capacity(2 * (n_local + 2 * l.len()));
        let mut values = Vec::with_capacity(n_local + 2 * l.len());
        for (cell, &d) in matrix.diag().iter().enumerate() {
            index.extend([offset + cell, offset + cell]);
            values.push(d);
        }
        for face in 0..l.len() {
            index.extend([offset + l[face], offset + u[face]]);
            values.push(upper[face]);
            index.extend([offset + u[face], offset + l[face]]);
            values.push(lower[face]);
        }
        if !mesh.interfaces().is_empty() {
            let global_ids: Vec<usize> = (offset..offset + n_local).collect();
            let remote_ids = mesh.exchange_labels(&global_ids)?;
            for ((iface, coeffs), remote) in mesh
                .interfaces()
                .iter()
                .zip(matrix.interface_coeffs())
                .zip(&remote_ids)
            {
                for ((&cell, &c), &col) in iface.face_cells().iter().zip(coeffs).zip(remote) {
                    index.extend([offset + cell, col]);
                    values.push(-c);
                }
            }
        }

        let all_index = comm.all_gather_labels(&index)?;
        let all_values = comm.all_gather_scalars(&values)?;
        let mut dense = vec![0.0; n * n];
        for (idx, vals) in all_index.iter().zip(&all_values) {
            for (rc, v) in idx.chunks_exact(2).zip(vals) {
                dense[rc[0] * n + rc[1]] += v;
            }
        }

        let (factors, pivots) = factorise(n, dense)?;
        debug!(n_global = n, n_local, offset, "factorised coarsest level");
        Ok(Self {
            n,
            factors,
            pivots,
            offset,
            n_local,
            comm,
        })
    }

    /// Global size of the factorised matrix.
    #[inline]
    pub fn size(&self) -> usize {
        self.n
    }

    /// Solve for the local slice of `psi` given the local slice of `source`.
    ///
    /// Collective when the matrix was gathered from several ranks.
    pub fn solve(&self, psi: &mut [f64], source: &[f64]) -> Result<(), SolverError> {
        if psi.len() != self.n_local || source.len() != self.n_local {
            return Err(ValidationError::DimensionMismatch(format!(
                "psi/source lengths {}/{} for {} local rows",
                psi.len(),
                source.len(),
                self.n_local
            ))
            .into());
        }
        let mut b: Vec<f64> = if self.comm.is_parallel() {
            self.comm.all_gather_scalars(source)?.concat()
        } else {
            source.to_vec()
        };
        self.solve_in_place(&mut b);
        psi.copy_from_slice(&b[self.offset..self.offset + self.n_local]);
        Ok(())
    }

    /// Solve `A x = b` for a full-length `b`, overwriting it with `x`.
    pub fn solve_in_place(&self, b: &mut [f64]) {
        let n = self.n;
        for (k, &p) in self.pivots.iter().enumerate() {
            b.swap(k, p);
        }
        for i in 0..n {
            let row = &self.factors[i * n..i * n + i];
            let s: f64 = row.iter().zip(&b[..i]).map(|(a, x)| a * x).sum();
            b[i] -= s;
        }
        for i in (0..n).rev() {
            let row = &self.factors[i * n..(i + 1) * n];
            let s: f64 = row[i + 1..].iter().zip(&b[i + 1..]).map(|(a, x)| a * x).sum();
            b[i] = (b[i] - s) / row[i];
        }
    }
}

/// In-place Doolittle elimination with partial pivoting.
fn factorise(n: usize, mut a: Vec<f64>) -> Result<(Vec<f64>, Vec<usize>), SolverError> {
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let threshold = f64::EPSILON * scale;
    let mut pivots = Vec::with_capacity(n);

    for k in 0..n {
        let (p, pivot) = (k..n)
            .map(|i| (i, a[i * n + k]))
            .fold((k, 0.0_f64), |best, (i, v)| if v.abs() > best.1.abs() { (i, v) } else { best });
        if pivot.abs() <= threshold {
            return Err(SolverError::SingularMatrix {
                row: k,
                pivot: pivot.abs(),
            });
        }
        if p != k {
            for j in 0..n {
                a.swap(k * n + j, p * n + j);
            }
        }
        pivots.push(p);

        for i in k + 1..n {
            let factor = a[i * n + k] / pivot;
            a[i * n + k] = factor;
            if factor != 0.0 {
                for j in k + 1..n {
                    a[i * n + j] -= factor * a[k * n + j];
                }
            }
        }
    }
    Ok((a, pivots))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
