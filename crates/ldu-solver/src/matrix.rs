//! Face-addressed sparse coefficient matrix.
//!
//! An [`LduMatrix`] stores one diagonal coefficient per cell and one or two
//! off-diagonal coefficients per internal face:
//!
//! ```text
//! A[lower[f]][upper[f]] = upper_coeffs[f]
//! A[upper[f]][lower[f]] = lower_coeffs[f]    (= upper_coeffs[f] if symmetric)
//! ```
//!
//! Coupled interfaces contribute through `interface_coeffs[i][k]`, the
//! *negated* coefficient linking face cell `face_cells[k]` of interface `i`
//! to the value on the other side. The matrix-vector product therefore
//! subtracts `coeff * psi_remote`.

use std::sync::Arc;

use crate::error::{SolverError, ValidationError};
use crate::mesh::LduMesh;
use crate::types::{ResidualNorm, NORM_FACTOR_OFFSET};
use crate::validation::validate_finite;

/// Storage class of an [`LduMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixType {
    /// Only the diagonal is populated.
    Diagonal,
    /// `lower == upper`; only `upper` is stored.
    Symmetric,
    /// Separate `upper` and `lower` coefficients.
    Asymmetric,
}

impl MatrixType {
    /// Lower-case label used in diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            MatrixType::Diagonal => "diagonal",
            MatrixType::Symmetric => "symmetric",
            MatrixType::Asymmetric => "asymmetric",
        }
    }
}

/// Sparse matrix on an [`LduMesh`].
#[derive(Debug, Clone)]
pub struct LduMatrix {
    mesh: Arc<LduMesh>,
    matrix_type: MatrixType,
    diag: Vec<f64>,
    upper: Vec<f64>,
    lower: Option<Vec<f64>>,
    interface_coeffs: Vec<Vec<f64>>,
}

impl LduMatrix {
    /// Diagonal-only matrix.
    pub fn new_diagonal(mesh: Arc<LduMesh>, diag: Vec<f64>) -> Result<Self, ValidationError> {
        let n_faces = mesh.n_faces();
        Self::build(mesh, MatrixType::Diagonal, diag, vec![0.0; n_faces], None)
    }

    /// Symmetric matrix (`lower == upper`).
    pub fn new_symmetric(
        mesh: Arc<LduMesh>,
        diag: Vec<f64>,
        upper: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        Self::build(mesh, MatrixType::Symmetric, diag, upper, None)
    }

    /// Asymmetric matrix.
    pub fn new_asymmetric(
        mesh: Arc<LduMesh>,
        diag: Vec<f64>,
        upper: Vec<f64>,
        lower: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        Self::build(mesh, MatrixType::Asymmetric, diag, upper, Some(lower))
    }

    fn build(
        mesh: Arc<LduMesh>,
        matrix_type: MatrixType,
        diag: Vec<f64>,
        upper: Vec<f64>,
        lower: Option<Vec<f64>>,
    ) -> Result<Self, ValidationError> {
        check_len("diag", diag.len(), mesh.n_cells())?;
        check_len("upper", upper.len(), mesh.n_faces())?;
        validate_finite("diag", &diag)?;
        validate_finite("upper", &upper)?;
        if let Some(lower) = &lower {
            check_len("lower", lower.len(), mesh.n_faces())?;
            validate_finite("lower", lower)?;
        }
        let interface_coeffs = mesh.interfaces().iter().map(|i| vec![0.0; i.size()]).collect();
        Ok(Self {
            mesh,
            matrix_type,
            diag,
            upper,
            lower,
            interface_coeffs,
        })
    }

    /// Replace the coupling coefficients of every interface.
    ///
    /// `coeffs[i][k]` is the negated matrix entry between face cell `k` of
    /// interface `i` and its remote neighbour.
    pub fn set_interface_coeffs(&mut self, coeffs: Vec<Vec<f64>>) -> Result<(), ValidationError> {
        let interfaces = self.mesh.interfaces();
        check_len("interface_coeffs", coeffs.len(), interfaces.len())?;
        for (iface, c) in interfaces.iter().zip(&coeffs) {
            check_len(iface.name(), c.len(), iface.size())?;
            validate_finite(iface.name(), c)?;
        }
        self.interface_coeffs = coeffs;
        Ok(())
    }

    /// Builder form of [`set_interface_coeffs`](Self::set_interface_coeffs).
    pub fn with_interface_coeffs(mut self, coeffs: Vec<Vec<f64>>) -> Result<Self, ValidationError> {
        self.set_interface_coeffs(coeffs)?;
        Ok(self)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Mesh the matrix lives on.
    #[inline]
    pub fn mesh(&self) -> &Arc<LduMesh> {
        &self.mesh
    }

    /// Number of rows.
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.diag.len()
    }

    /// Storage class.
    #[inline]
    pub fn matrix_type(&self) -> MatrixType {
        self.matrix_type
    }

    /// Diagonal coefficients.
    #[inline]
    pub fn diag(&self) -> &[f64] {
        &self.diag
    }

    /// Upper coefficients (row `lower[f]`, column `upper[f]`).
    #[inline]
    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    /// Lower coefficients; the upper ones when the matrix is symmetric.
    #[inline]
    pub fn lower(&self) -> &[f64] {
        self.lower.as_deref().unwrap_or(self.upper.as_slice())
    }

    /// Per-interface coupling coefficients.
    #[inline]
    pub fn interface_coeffs(&self) -> &[Vec<f64>] {
        &self.interface_coeffs
    }

    /// `lower == upper` (including diagonal matrices).
    #[inline]
    pub fn is_symmetric(&self) -> bool {
        self.matrix_type != MatrixType::Asymmetric
    }

    /// Separate lower coefficients are stored.
    #[inline]
    pub fn is_asymmetric(&self) -> bool {
        self.matrix_type == MatrixType::Asymmetric
    }

    /// No off-diagonal coefficients.
    #[inline]
    pub fn is_diagonal(&self) -> bool {
        self.matrix_type == MatrixType::Diagonal
    }

    // -----------------------------------------------------------------------
    // Products
    // -----------------------------------------------------------------------

    /// `result = A psi`, including coupled interfaces.
    pub fn amul(&self, psi: &[f64], result: &mut [f64]) -> Result<(), SolverError> {
        self.check_field("psi", psi)?;
        self.check_field("result", result)?;
        let addr = self.mesh.addressing();
        let (l, u) = (addr.lower_addr(), addr.upper_addr());
        let lower = self.lower();

        for ((r, d), p) in result.iter_mut().zip(&self.diag).zip(psi) {
            *r = d * p;
        }
        for face in 0..l.len() {
            result[l[face]] += self.upper[face] * psi[u[face]];
            result[u[face]] += lower[face] * psi[l[face]];
        }
        self.subtract_interface_contributions(psi, result)
    }

    /// `result = A^T psi`, including coupled interfaces.
    pub fn tmul(&self, psi: &[f64], result: &mut [f64]) -> Result<(), SolverError> {
        self.check_field("psi", psi)?;
        self.check_field("result", result)?;
        let addr = self.mesh.addressing();
        let (l, u) = (addr.lower_addr(), addr.upper_addr());
        let lower = self.lower();

        for ((r, d), p) in result.iter_mut().zip(&self.diag).zip(psi) {
            *r = d * p;
        }
        for face in 0..l.len() {
            result[u[face]] += self.upper[face] * psi[l[face]];
            result[l[face]] += lower[face] * psi[u[face]];
        }
        self.subtract_interface_contributions(psi, result)
    }

    /// `result[fc] -= coeff * psi_remote` over every interface face.
    pub fn subtract_interface_contributions(
        &self,
        psi: &[f64],
        result: &mut [f64],
    ) -> Result<(), SolverError> {
        if self.interface_coeffs.is_empty() {
            return Ok(());
        }
        let halo = self.mesh.exchange(psi)?;
        for ((iface, coeffs), remote) in self
            .mesh
            .interfaces()
            .iter()
            .zip(&self.interface_coeffs)
            .zip(&halo)
        {
            for ((&cell, c), r) in iface.face_cells().iter().zip(coeffs).zip(remote) {
                result[cell] -= c * r;
            }
        }
        Ok(())
    }

    /// Row sums `A 1`, including interface coefficients.
    pub fn sum_a(&self) -> Vec<f64> {
        let addr = self.mesh.addressing();
        let (l, u) = (addr.lower_addr(), addr.upper_addr());
        let lower = self.lower();
        let mut sum = self.diag.clone();
        for face in 0..l.len() {
            sum[l[face]] += self.upper[face];
            sum[u[face]] += lower[face];
        }
        for (iface, coeffs) in self.mesh.interfaces().iter().zip(&self.interface_coeffs) {
            for (&cell, c) in iface.face_cells().iter().zip(coeffs) {
                sum[cell] -= c;
            }
        }
        sum
    }

    /// `r = source - A psi`.
    pub fn residual(&self, psi: &[f64], source: &[f64], r: &mut [f64]) -> Result<(), SolverError> {
        self.check_field("source", source)?;
        self.amul(psi, r)?;
        for (ri, s) in r.iter_mut().zip(source) {
            *ri = s - *ri;
        }
        Ok(())
    }

    /// Residual normalisation factor.
    ///
    /// With `x_ref` the global average of `psi`, the factor is the selected
    /// norm of `|A psi - x_ref sumA| + |source - x_ref sumA|`, offset by a
    /// tiny constant so that a zero field never divides by zero. The
    /// normalised residual is then independent of the field's scale.
    pub fn norm_factor(
        &self,
        psi: &[f64],
        source: &[f64],
        a_psi: &[f64],
        norm: ResidualNorm,
    ) -> Result<f64, SolverError> {
        let comm = self.mesh.comm();
        let totals = comm.sum_many(&[psi.iter().sum(), psi.len() as f64])?;
        let x_ref = if totals[1] > 0.0 { totals[0] / totals[1] } else { 0.0 };

        let sum_a = self.sum_a();
        let weights: Vec<f64> = sum_a
            .iter()
            .zip(a_psi)
            .zip(source)
            .map(|((sa, ap), s)| {
                let reference = x_ref * sa;
                (ap - reference).abs() + (s - reference).abs()
            })
            .collect();
        Ok(norm.global(comm, &weights)? + NORM_FACTOR_OFFSET)
    }

    /// Global norm of a cell field on this matrix's mesh.
    pub fn global_norm(&self, values: &[f64], norm: ResidualNorm) -> Result<f64, SolverError> {
        Ok(norm.global(self.mesh.comm(), values)?)
    }

    /// Sum of off-diagonal magnitudes per row, including interfaces.
    pub fn sum_mag_off_diag(&self) -> Vec<f64> {
        let addr = self.mesh.addressing();
        let (l, u) = (addr.lower_addr(), addr.upper_addr());
        let lower = self.lower();
        let mut sum = vec![0.0; self.n_cells()];
        for face in 0..l.len() {
            sum[l[face]] += self.upper[face].abs();
            sum[u[face]] += lower[face].abs();
        }
        for (iface, coeffs) in self.mesh.interfaces().iter().zip(&self.interface_coeffs) {
            for (&cell, c) in iface.face_cells().iter().zip(coeffs) {
                sum[cell] += c.abs();
            }
        }
        sum
    }

    // -----------------------------------------------------------------------
    // In-place modification
    // -----------------------------------------------------------------------

    /// Implicit under-relaxation.
    ///
    /// The diagonal is first raised to the off-diagonal magnitude sum where
    /// needed, then divided by `alpha`; the source is compensated with the
    /// change in diagonal times the current `psi`, so the converged solution
    /// is unchanged.
    pub fn relax(&mut self, psi: &[f64], source: &mut [f64], alpha: f64) -> Result<(), SolverError> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ValidationError::ParameterOutOfRange {
                name: "relaxation factor".into(),
                value: alpha.to_string(),
                expected: "0 < alpha <= 1".into(),
            }
            .into());
        }
        self.check_field("psi", psi)?;
        self.check_field("source", source)?;

        let sum_off = self.sum_mag_off_diag();
        for (cell, d) in self.diag.iter_mut().enumerate() {
            let d0 = *d;
            let dominant = d0.abs().max(sum_off[cell]);
            let signed = if d0 < 0.0 { -dominant } else { dominant };
            let relaxed = signed / alpha;
            source[cell] += (relaxed - d0) * psi[cell];
            *d = relaxed;
        }
        Ok(())
    }

    /// `A <- -A`.
    pub fn negate(&mut self) {
        self.scale(-1.0);
    }

    /// `A <- factor * A`.
    pub fn scale(&mut self, factor: f64) {
        let scale_all = |v: &mut Vec<f64>| v.iter_mut().for_each(|x| *x *= factor);
        scale_all(&mut self.diag);
        scale_all(&mut self.upper);
        if let Some(lower) = &mut self.lower {
            scale_all(lower);
        }
        self.interface_coeffs.iter_mut().for_each(scale_all);
    }

    fn check_field(&self, name: &str, values: &[f64]) -> Result<(), ValidationError> {
        check_len(name, values.len(), self.n_cells())
    }
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<(), ValidationError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ValidationError::DimensionMismatch(format!(
            "{name} has length {actual}, expected {expected}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
