//! Iteration control shared by the iterative solvers.
//!
//! [`ConvergenceMonitor`] owns the loop decisions every solver makes the same
//! way:
//!
//! * whether to iterate at all (`maxIter > 0` and either `minIter > 0` or the
//!   initial residual is not yet converged);
//! * whether to continue after an iteration
//!   (`(n < maxIter && !converged) || n < minIter`);
//! * divergence: when the residual stays above `divergenceFactor` times the
//!   best residual seen for `divergenceWindow` consecutive iterations, the
//!   iterate that produced the best residual is restored and the solve is
//!   flagged as diverged.
//!
//! All decisions use globally reduced residuals, so every rank agrees.

use tracing::{trace, warn};

use crate::controls::SolverControls;
use crate::error::SolverError;
use crate::matrix::LduMatrix;
use crate::types::{ResidualNorm, SolverPerformance};

/// Residual `source - A psi` and the normalisation factor of the system.
///
/// Collective.
pub fn initial_residual(
    matrix: &LduMatrix,
    psi: &[f64],
    source: &[f64],
    norm: ResidualNorm,
) -> Result<(Vec<f64>, f64), SolverError> {
    let mut a_psi = vec![0.0; psi.len()];
    matrix.amul(psi, &mut a_psi)?;
    let norm_factor = matrix.norm_factor(psi, source, &a_psi, norm)?;
    let residual = source.iter().zip(&a_psi).map(|(s, a)| s - a).collect();
    Ok((residual, norm_factor))
}

/// Loop and divergence bookkeeping for one solve.
///
/// Create one per solve; it is intentionally non-`Clone`.
#[derive(Debug)]
pub struct ConvergenceMonitor {
    tolerance: f64,
    rel_tol: f64,
    max_iter: usize,
    min_iter: usize,
    divergence_factor: f64,
    divergence_window: usize,
    best_residual: f64,
    best_psi: Vec<f64>,
    growing: usize,
}

impl ConvergenceMonitor {
    /// Monitor configured from the loop keys of `controls`.
    pub fn new(controls: &SolverControls) -> Self {
        Self {
            tolerance: controls.tolerance,
            rel_tol: controls.rel_tol,
            max_iter: controls.max_iter,
            min_iter: controls.min_iter,
            divergence_factor: controls.divergence_factor,
            divergence_window: controls.divergence_window,
            best_residual: f64::INFINITY,
            best_psi: Vec::new(),
            growing: 0,
        }
    }

    /// Record the starting point and decide whether to iterate.
    ///
    /// `perf.initial_residual` must already be set.
    pub fn start(&mut self, perf: &mut SolverPerformance, psi: &[f64]) -> bool {
        self.best_residual = perf.initial_residual;
        self.best_psi.clear();
        self.best_psi.extend_from_slice(psi);
        self.growing = 0;

        let converged = perf.check_convergence(self.tolerance, self.rel_tol);
        self.max_iter > 0 && (self.min_iter > 0 || !converged)
    }

    /// Decide whether to run another iteration.
    ///
    /// Also refreshes `perf.converged` from the latest residual.
    pub fn should_continue(&self, perf: &mut SolverPerformance) -> bool {
        let converged = perf.check_convergence(self.tolerance, self.rel_tol);
        trace!(
            solver = %perf.solver_name,
            field = %perf.field_name,
            iteration = perf.n_iterations,
            residual = perf.final_residual,
            converged,
            "iteration"
        );
        (perf.n_iterations < self.max_iter && !converged) || perf.n_iterations < self.min_iter
    }

    /// Track the best iterate and detect divergence.
    ///
    /// Returns `true` when divergence was declared; `psi` then holds the best
    /// iterate, `perf.final_residual` its residual, and `perf.diverged` is set.
    pub fn check_divergence(&mut self, perf: &mut SolverPerformance, psi: &mut [f64]) -> bool {
        let residual = perf.final_residual;
        if residual < self.best_residual {
            self.best_residual = residual;
            self.best_psi.clear();
            self.best_psi.extend_from_slice(psi);
            self.growing = 0;
            return false;
        }

        // NaN counts as growth.
        if residual <= self.divergence_factor * self.best_residual {
            self.growing = 0;
            return false;
        }
        self.growing += 1;
        if self.growing < self.divergence_window {
            return false;
        }

        warn!(
            solver = %perf.solver_name,
            field = %perf.field_name,
            iteration = perf.n_iterations,
            residual,
            best = self.best_residual,
            "divergence detected, restoring best iterate"
        );
        psi.copy_from_slice(&self.best_psi);
        perf.final_residual = self.best_residual;
        perf.diverged = true;
        perf.converged = false;
        true
    }

    /// Smallest residual seen so far.
    #[inline]
    pub fn best_residual(&self) -> f64 {
        self.best_residual
    }

    /// The absolute tolerance being enforced.
    #[inline]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
