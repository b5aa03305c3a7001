//! Coarse matrices, smoothers and the coarsest-level solver of a GAMG
//! hierarchy.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::agglomeration::{AgglomerationLevel, FaceTarget, GamgAgglomeration};
use crate::controls::SolverControls;
use crate::error::SolverError;
use crate::lu::LuScalarMatrix;
use crate::matrix::{LduMatrix, MatrixType};
use crate::smoother::LduSmoother;
use crate::validation::MAX_DIRECT_SOLVE_CELLS;

/// How the coarsest level is solved.
#[derive(Debug)]
pub(crate) enum CoarsestSolver {
    /// Gathered dense LU.
    Direct(LuScalarMatrix),
    /// PCG (symmetric) or symmetric Gauss-Seidel iteration (asymmetric).
    Iterative,
}

/// Everything a GAMG cycle needs for one fine matrix.
///
/// Coarse level `k` (`1..=n_levels`) has its matrix at `matrices[k - 1]`;
/// every level except the coarsest has a smoother.
#[derive(Debug)]
pub struct GamgHierarchy {
    pub(crate) controls: SolverControls,
    pub(crate) agglomeration: Arc<GamgAgglomeration>,
    pub(crate) matrices: Vec<LduMatrix>,
    pub(crate) fine_smoother: LduSmoother,
    pub(crate) smoothers: Vec<LduSmoother>,
    pub(crate) coarsest: CoarsestSolver,
    pub(crate) scale_correction: bool,
}

impl GamgHierarchy {
    /// Agglomerate (or fetch the cached agglomeration), restrict the matrix
    /// to every level and prepare the smoothers and the coarsest solver.
    ///
    /// Collective.
    pub fn build(matrix: &LduMatrix, controls: &SolverControls) -> Result<Self, SolverError> {
        let params = controls.agglomeration_params();
        let agglomeration = if controls.cache_agglomeration {
            matrix
                .mesh()
                .agglomeration_or_build(&params, || GamgAgglomeration::build(matrix, &params))?
        } else {
            Arc::new(GamgAgglomeration::build(matrix, &params)?)
        };

        let mut matrices: Vec<LduMatrix> = Vec::with_capacity(agglomeration.n_levels());
        for level in agglomeration.levels() {
            let coarse = restrict_matrix(level, matrices.last().unwrap_or(matrix))?;
            matrices.push(coarse);
        }

        let fine_smoother = LduSmoother::new(controls.smoother, matrix)?;
        let n_smoothed = matrices.len().saturating_sub(1);
        let smoothers = matrices[..n_smoothed]
            .iter()
            .map(|m| LduSmoother::new(controls.smoother, m))
            .collect::<Result<Vec<_>, _>>()?;

        let coarsest_matrix = matrices.last().unwrap_or(matrix);
        let n_coarsest = coarsest_matrix.mesh().global_n_cells()?;
        let coarsest = if !controls.direct_solve_coarsest {
            CoarsestSolver::Iterative
        } else if n_coarsest > MAX_DIRECT_SOLVE_CELLS {
            warn!(
                n_cells = n_coarsest,
                max = MAX_DIRECT_SOLVE_CELLS,
                "coarsest level too large for a direct solve, solving iteratively"
            );
            CoarsestSolver::Iterative
        } else {
            CoarsestSolver::Direct(LuScalarMatrix::from_ldu(coarsest_matrix)?)
        };

        debug!(
            levels = matrices.len(),
            coarsest_cells = n_coarsest,
            direct = matches!(coarsest, CoarsestSolver::Direct(_)),
            smoother = %controls.smoother,
            "built GAMG hierarchy"
        );

        Ok(Self {
            controls: controls.clone(),
            scale_correction: controls.scale_correction_for(matrix.is_symmetric()),
            agglomeration,
            matrices,
            fine_smoother,
            smoothers,
            coarsest,
        })
    }

    /// Number of coarse levels.
    #[inline]
    pub fn n_levels(&self) -> usize {
        self.matrices.len()
    }

    /// Agglomeration the hierarchy was built on.
    #[inline]
    pub fn agglomeration(&self) -> &Arc<GamgAgglomeration> {
        &self.agglomeration
    }

    /// Matrix of coarse level `level` (`1..=n_levels`).
    #[inline]
    pub fn coarse_matrix(&self, level: usize) -> &LduMatrix {
        &self.matrices[level - 1]
    }

    /// Whether the coarsest level is solved by dense LU.
    #[inline]
    pub fn direct_coarsest(&self) -> bool {
        matches!(self.coarsest, CoarsestSolver::Direct(_))
    }
}

/// Galerkin-style summation of `fine` onto the coarse level of `level`.
///
/// Coarse diagonal: summed fine diagonals plus both coefficients of every
/// face that became internal. Coarse off-diagonals: summed fine face
/// coefficients, with upper and lower exchanged for flipped faces.
/// Interface coefficients are summed per coarse interface face.
pub fn restrict_matrix(level: &AgglomerationLevel, fine: &LduMatrix) -> Result<LduMatrix, SolverError> {
    let coarse_mesh = Arc::clone(level.coarse_mesh());
    let n_faces = coarse_mesh.n_faces();

    let mut diag = vec![0.0; level.n_coarse_cells()];
    for (&target, d) in level.restrict_addr().iter().zip(fine.diag()) {
        diag[target] += d;
    }

    let (fine_upper, fine_lower) = (fine.upper(), fine.lower());
    let mut upper = vec![0.0; n_faces];
    let mut lower = vec![0.0; n_faces];
    for (face, target) in level.face_restrict().iter().enumerate() {
        match *target {
            FaceTarget::Internal(cell) => diag[cell] += fine_upper[face] + fine_lower[face],
            FaceTarget::Face {
                index,
                flipped: false,
            } => {
                upper[index] += fine_upper[face];
                lower[index] += fine_lower[face];
            }
            FaceTarget::Face {
                index,
                flipped: true,
            } => {
                upper[index] += fine_lower[face];
                lower[index] += fine_upper[face];
            }
        }
    }

    let interface_coeffs: Vec<Vec<f64>> = coarse_mesh
        .interfaces()
        .iter()
        .zip(level.interface_face_restrict())
        .zip(fine.interface_coeffs())
        .map(|((iface, face_map), fine_coeffs)| {
            let mut coeffs = vec![0.0; iface.size()];
            for (&k, c) in face_map.iter().zip(fine_coeffs) {
                coeffs[k] += c;
            }
            coeffs
        })
        .collect();

    let coarse = match fine.matrix_type() {
        MatrixType::Diagonal => LduMatrix::new_diagonal(coarse_mesh, diag)?,
        MatrixType::Symmetric => LduMatrix::new_symmetric(coarse_mesh, diag, upper)?,
        MatrixType::Asymmetric => LduMatrix::new_asymmetric(coarse_mesh, diag, upper, lower)?,
    };
    Ok(coarse.with_interface_coeffs(interface_coeffs)?)
}
