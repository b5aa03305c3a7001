//! Preconditioned Conjugate Gradient for symmetric LDU matrices.
//!
//! # Algorithm
//!
//! ```text
//! rA = source - A psi
//! loop:
//!     wA = M^{-1} rA            (preconditioner)
//!     wArA = wA . rA
//!     pA = wA + (wArA / wArA_old) pA     (pA = wA on the first pass)
//!     wA = A pA
//!     wApA = wA . pA            (singular when |wApA| / normFactor < VSMALL)
//!     alpha = wArA / wApA
//!     psi += alpha pA
//!     rA  -= alpha wA
//! ```
//!
//! Every inner product is reduced over all ranks before use, so each rank
//! takes the same branch.
//!
//! # Preconditioners
//!
//! | Name       | `M^{-1} r`                                             |
//! |------------|--------------------------------------------------------|
//! | `none`     | `r`                                                    |
//! | `diagonal` | `r / diag`                                             |
//! | `DIC`      | diagonal incomplete Cholesky forward/backward solve    |
//! | `GAMG`     | `nVcycles` multigrid cycles from a zero initial guess  |

use tracing::debug;

use crate::controls::{PreconditionerType, SolverControls};
use crate::error::{ConfigError, SolverError};
use crate::gamg::GamgHierarchy;
use crate::matrix::LduMatrix;
use crate::monitor::{initial_residual, ConvergenceMonitor};
use crate::smoother::{apply_incomplete_factor, reciprocal_factor_diagonal};
use crate::traits::LinearSolver;
use crate::types::{SolverPerformance, GREAT, VSMALL};
use crate::validation::validate_system;

/// Local inner product; reduce with the communicator for the global value.
#[inline]
pub(crate) fn dot_f64(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `y += alpha x`.
#[inline]
pub(crate) fn axpy_f64(alpha: f64, x: &[f64], y: &mut [f64]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

// ---------------------------------------------------------------------------
// Preconditioner
// ---------------------------------------------------------------------------

/// A preconditioner bound to one matrix.
#[derive(Debug)]
pub enum Preconditioner {
    /// Identity.
    None,
    /// Reciprocal diagonal.
    Diagonal {
        /// `1 / diag`.
        r_d: Vec<f64>,
    },
    /// Diagonal incomplete Cholesky.
    Dic {
        /// `1 / D*` of the incomplete factorisation.
        r_d: Vec<f64>,
    },
    /// Multigrid cycles.
    Gamg {
        /// Hierarchy built for the matrix.
        hierarchy: Box<GamgHierarchy>,
        /// Cycles per application.
        n_v_cycles: usize,
    },
}

impl Preconditioner {
    /// Build the preconditioner `controls.preconditioner` for `matrix`.
    pub fn new(controls: &SolverControls, matrix: &LduMatrix) -> Result<Self, SolverError> {
        match controls.preconditioner {
            PreconditionerType::None => Ok(Preconditioner::None),
            PreconditionerType::Diagonal => {
                let r_d = matrix
                    .diag()
                    .iter()
                    .map(|&d| if d.abs() > VSMALL { 1.0 / d } else { 1.0 })
                    .collect();
                Ok(Preconditioner::Diagonal { r_d })
            }
            PreconditionerType::Dic => Ok(Preconditioner::Dic {
                r_d: reciprocal_factor_diagonal(matrix)?,
            }),
            PreconditionerType::Gamg => Ok(Preconditioner::Gamg {
                hierarchy: Box::new(GamgHierarchy::build(matrix, controls)?),
                n_v_cycles: controls.n_v_cycles,
            }),
        }
    }

    /// Which preconditioner this is.
    pub fn kind(&self) -> PreconditionerType {
        match self {
            Preconditioner::None => PreconditionerType::None,
            Preconditioner::Diagonal { .. } => PreconditionerType::Diagonal,
            Preconditioner::Dic { .. } => PreconditionerType::Dic,
            Preconditioner::Gamg { .. } => PreconditionerType::Gamg,
        }
    }

    /// `w = M^{-1} r`.
    pub fn precondition(
        &self,
        matrix: &LduMatrix,
        w: &mut [f64],
        r: &[f64],
    ) -> Result<(), SolverError> {
        match self {
            Preconditioner::None => w.copy_from_slice(r),
            Preconditioner::Diagonal { r_d } => {
                for ((wi, ri), d) in w.iter_mut().zip(r).zip(r_d) {
                    *wi = d * ri;
                }
            }
            Preconditioner::Dic { r_d } => {
                for ((wi, ri), d) in w.iter_mut().zip(r).zip(r_d) {
                    *wi = d * ri;
                }
                apply_incomplete_factor(matrix, r_d, w);
            }
            Preconditioner::Gamg {
                hierarchy,
                n_v_cycles,
            } => {
                w.iter_mut().for_each(|x| *x = 0.0);
                for _ in 0..*n_v_cycles {
                    hierarchy.cycle(matrix, w, r)?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PcgSolver
// ---------------------------------------------------------------------------

/// Preconditioned conjugate gradient.
#[derive(Debug, Clone)]
pub struct PcgSolver {
    field_name: String,
    controls: SolverControls,
}

impl PcgSolver {
    /// PCG for `field_name` using `controls.preconditioner`.
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

impl LinearSolver for PcgSolver {
    fn solve(
        &self,
        matrix: &LduMatrix,
        psi: &mut [f64],
        source: &[f64],
    ) -> Result<SolverPerformance, SolverError> {
        validate_system(matrix, psi, source)?;
        if matrix.is_asymmetric() {
            return Err(ConfigError::IncompatibleMatrix {
                solver: self.name().into(),
                matrix_type: matrix.matrix_type().label(),
            }
            .into());
        }
        let controls = &self.controls;
        let comm = matrix.mesh().comm();
        let mut perf = SolverPerformance::new(self.name(), &self.field_name);

        let (mut r_a, norm_factor) = initial_residual(matrix, psi, source, controls.norm)?;
        perf.set_initial(matrix.global_norm(&r_a, controls.norm)? / norm_factor);

        let mut monitor = ConvergenceMonitor::new(controls);
        if monitor.start(&mut perf, psi) {
            let preconditioner = Preconditioner::new(controls, matrix)?;
            let n = psi.len();
            let mut w_a = vec![0.0; n];
            let mut p_a = vec![0.0; n];
            let mut w_a_r_a = GREAT;

            loop {
                let w_a_r_a_old = w_a_r_a;
                preconditioner.precondition(matrix, &mut w_a, &r_a)?;
                w_a_r_a = comm.sum(dot_f64(&w_a, &r_a))?;

                if perf.n_iterations == 0 {
                    p_a.copy_from_slice(&w_a);
                } else {
                    let beta = w_a_r_a / w_a_r_a_old;
                    for (p, w) in p_a.iter_mut().zip(&w_a) {
                        *p = w + beta * *p;
                    }
                }

                matrix.amul(&p_a, &mut w_a)?;
                let w_a_p_a = comm.sum(dot_f64(&w_a, &p_a))?;
                if perf.check_singularity(w_a_p_a.abs() / norm_factor) {
                    break;
                }

                let alpha = w_a_r_a / w_a_p_a;
                axpy_f64(alpha, &p_a, psi);
                axpy_f64(-alpha, &w_a, &mut r_a);

                perf.n_iterations += 1;
                perf.record(matrix.global_norm(&r_a, controls.norm)? / norm_factor);
                if monitor.check_divergence(&mut perf, psi) || !monitor.should_continue(&mut perf) {
                    break;
                }
            }
            debug!(preconditioner = %preconditioner.kind(), "{perf}");
        }

        Ok(perf)
    }

    fn name(&self) -> &'static str {
        "PCG"
    }

    fn field_name(&self) -> &str {
        &self.field_name
    }

    fn controls(&self) -> &SolverControls {
        &self.controls
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
