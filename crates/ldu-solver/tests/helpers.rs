//! Shared test helpers for the ldu-solver integration test suite.
//!
//! Provides structured-grid Laplace systems (serial and decomposed into
//! strips with processor interfaces), a dense reference solver, a
//! deterministic generator for test data and a thread-per-rank runner.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use ldu_solver::addressing::LduAddressing;
use ldu_solver::comm::{Communicator, ThreadComm};
use ldu_solver::interface::LduInterface;
use ldu_solver::matrix::LduMatrix;
use ldu_solver::mesh::LduMesh;

// ---------------------------------------------------------------------------
// Random number generator (simple LCG for deterministic reproducibility)
// ---------------------------------------------------------------------------

/// A minimal linear congruential generator for deterministic test data.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    /// Create a new LCG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next u64 value.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.state
    }

    /// Generate a uniform f64 in [lo, hi).
    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        lo + (hi - lo) * unit
    }
}

/// Random vector of length `n` with entries in [-1, 1).
pub fn random_vector(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    (0..n).map(|_| rng.next_f64_range(-1.0, 1.0)).collect()
}

// ---------------------------------------------------------------------------
// Structured grids
// ---------------------------------------------------------------------------

/// `nx` x `ny` cells on the unit square, numbered `i + nx * j`.
#[derive(Debug, Clone, Copy)]
pub struct Grid2d {
    pub nx: usize,
    pub ny: usize,
}

impl Grid2d {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self { nx, ny }
    }

    pub fn n_cells(&self) -> usize {
        self.nx * self.ny
    }

    /// Cell centre of cell `(i, j)`.
    pub fn centre(&self, i: usize, j: usize) -> (f64, f64) {
        ((i as f64 + 0.5) / self.nx as f64, (j as f64 + 0.5) / self.ny as f64)
    }

    /// Internal faces of rows `j0..j1`, in upper-triangular order, with cell
    /// indices relative to row `j0`.
    pub fn strip_faces(&self, j0: usize, j1: usize) -> (Vec<usize>, Vec<usize>) {
        let nx = self.nx;
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for j in j0..j1 {
            for i in 0..nx {
                let c = i + nx * (j - j0);
                if i + 1 < nx {
                    lower.push(c);
                    upper.push(c + 1);
                }
                if j + 1 < j1 {
                    lower.push(c);
                    upper.push(c + nx);
                }
            }
        }
        (lower, upper)
    }

    pub fn addressing(&self) -> LduAddressing {
        let (lower, upper) = self.strip_faces(0, self.ny);
        LduAddressing::new(self.n_cells(), lower, upper).unwrap()
    }
}

/// Harmonic reference field used by the Laplace problems.
pub fn saddle(x: f64, y: f64) -> f64 {
    x * x - y * y
}

/// Diagonal and source of `-lap(u) = 0` on rows `j0..j1` of `grid`, with
/// Dirichlet values from `exact` on every physical boundary.
///
/// Every internal face has coefficient `-1`; a boundary face adds `2` to the
/// diagonal and `2 u_b` to the source. Faces between strips are not counted
/// as boundaries and add `1` to the diagonal of each side.
fn strip_coefficients(
    grid: Grid2d,
    j0: usize,
    j1: usize,
    exact: impl Fn(f64, f64) -> f64,
) -> (Vec<f64>, Vec<f64>) {
    let (nx, ny) = (grid.nx, grid.ny);
    let n = nx * (j1 - j0);
    let mut diag = vec![0.0; n];
    let mut source = vec![0.0; n];
    for j in j0..j1 {
        for i in 0..nx {
            let c = i + nx * (j - j0);
            let (x, y) = grid.centre(i, j);
            let mut neighbours = 0.0;
            let boundary = |xb: f64, yb: f64, diag: &mut f64, source: &mut f64| {
                *diag += 2.0;
                *source += 2.0 * exact(xb, yb);
            };
            if i > 0 {
                neighbours += 1.0;
            } else {
                boundary(0.0, y, &mut diag[c], &mut source[c]);
            }
            if i + 1 < nx {
                neighbours += 1.0;
            } else {
                boundary(1.0, y, &mut diag[c], &mut source[c]);
            }
            if j > 0 {
                neighbours += 1.0;
            } else {
                boundary(x, 0.0, &mut diag[c], &mut source[c]);
            }
            if j + 1 < ny {
                neighbours += 1.0;
            } else {
                boundary(x, 1.0, &mut diag[c], &mut source[c]);
            }
            diag[c] += neighbours;
        }
    }
    (diag, source)
}

/// Serial Laplace system on `grid` with Dirichlet values from `exact`.
pub fn laplace(grid: Grid2d, exact: impl Fn(f64, f64) -> f64) -> (LduMatrix, Vec<f64>) {
    let mesh = Arc::new(LduMesh::serial(grid.addressing()));
    let (diag, source) = strip_coefficients(grid, 0, grid.ny, exact);
    let n_faces = mesh.n_faces();
    let matrix = LduMatrix::new_symmetric(mesh, diag, vec![-1.0; n_faces]).unwrap();
    (matrix, source)
}

/// Rows owned by `rank` when `grid` is cut into `n_procs` horizontal strips.
pub fn strip_rows(grid: Grid2d, rank: usize, n_procs: usize) -> (usize, usize) {
    (rank * grid.ny / n_procs, (rank + 1) * grid.ny / n_procs)
}

/// The part of the serial Laplace system owned by `comm.rank()`.
///
/// Neighbouring strips are coupled by processor interfaces whose faces run
/// west to east, so face `k` matches on both sides.
pub fn partitioned_laplace(
    grid: Grid2d,
    comm: ThreadComm,
    exact: impl Fn(f64, f64) -> f64,
) -> (LduMatrix, Vec<f64>) {
    let (rank, n_procs) = (comm.rank(), comm.n_procs());
    let (j0, j1) = strip_rows(grid, rank, n_procs);
    let nx = grid.nx;
    let n = nx * (j1 - j0);

    let (lower, upper) = grid.strip_faces(j0, j1);
    let addr = LduAddressing::new(n, lower, upper).unwrap();

    let mut interfaces = Vec::new();
    if rank > 0 {
        interfaces.push(LduInterface::processor(
            format!("procBoundary{rank}to{}", rank - 1),
            rank - 1,
            (rank - 1) as u32,
            (0..nx).collect(),
        ));
    }
    if rank + 1 < n_procs {
        interfaces.push(LduInterface::processor(
            format!("procBoundary{rank}to{}", rank + 1),
            rank + 1,
            rank as u32,
            (n - nx..n).collect(),
        ));
    }
    let coeffs: Vec<Vec<f64>> = interfaces.iter().map(|i| vec![1.0; i.size()]).collect();

    let mesh = Arc::new(LduMesh::new(addr, interfaces, Arc::new(comm)).unwrap());
    let (diag, source) = strip_coefficients(grid, j0, j1, exact);
    let n_faces = mesh.n_faces();
    let matrix = LduMatrix::new_symmetric(mesh, diag, vec![-1.0; n_faces])
        .unwrap()
        .with_interface_coeffs(coeffs)
        .unwrap();
    (matrix, source)
}

/// Run `f` on every rank of a fresh `n_procs` thread world and collect the
/// results in rank order.
pub fn run_parallel<R, F>(n_procs: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadComm) -> R + Sync,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadComm::world(n_procs)
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

// ---------------------------------------------------------------------------
// Dense reference
// ---------------------------------------------------------------------------

/// Dense row-major copy of a serial matrix (interfaces ignored).
pub fn to_dense(matrix: &LduMatrix) -> Vec<Vec<f64>> {
    let n = matrix.n_cells();
    let addr = matrix.mesh().addressing();
    let mut a = vec![vec![0.0; n]; n];
    for (i, d) in matrix.diag().iter().enumerate() {
        a[i][i] = *d;
    }
    for (face, (&l, &u)) in addr.lower_addr().iter().zip(addr.upper_addr()).enumerate() {
        a[l][u] += matrix.upper()[face];
        a[u][l] += matrix.lower()[face];
    }
    a
}

/// Dense `A x`.
pub fn dense_matvec(a: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    a.iter()
        .map(|row| row.iter().zip(x).map(|(aij, xj)| aij * xj).sum())
        .collect()
}

/// Gaussian elimination with partial pivoting.
pub fn dense_solve(a: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut x = b.to_vec();
    for k in 0..n {
        let p = (k..n)
            .max_by(|&i, &j| m[i][k].abs().total_cmp(&m[j][k].abs()))
            .unwrap();
        m.swap(k, p);
        x.swap(k, p);
        for i in k + 1..n {
            let factor = m[i][k] / m[k][k];
            for j in k..n {
                m[i][j] -= factor * m[k][j];
            }
            x[i] -= factor * x[k];
        }
    }
    for k in (0..n).rev() {
        let tail: f64 = (k + 1..n).map(|j| m[k][j] * x[j]).sum();
        x[k] = (x[k] - tail) / m[k][k];
    }
    x
}

// ---------------------------------------------------------------------------
// Norms
// ---------------------------------------------------------------------------

pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// `source - A psi` through the library's own product.
pub fn residual(matrix: &LduMatrix, psi: &[f64], source: &[f64]) -> Vec<f64> {
    let mut r = vec![0.0; psi.len()];
    matrix.residual(psi, source, &mut r).unwrap();
    r
}
