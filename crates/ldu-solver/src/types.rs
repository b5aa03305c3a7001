//! Core result and norm types shared by every solver.
//!
//! Provides [`SolverPerformance`] (the record returned by each solve),
//! per-iteration [`ConvergenceInfo`] snapshots, and [`ResidualNorm`], the
//! choice of global norm used to normalise residuals.

use std::fmt;

use crate::comm::Communicator;
use crate::error::CommError;

// ---------------------------------------------------------------------------
// Numerical constants
// ---------------------------------------------------------------------------

/// Relative threshold below which `relTol` is treated as disabled.
pub const SMALL: f64 = 1.0e-15;

/// Threshold for singularity detection on normalised inner products.
pub const VSMALL: f64 = 1.0e-300;

/// Offset added to the residual normalisation factor.
pub const NORM_FACTOR_OFFSET: f64 = 1.0e-20;

/// Residual reported before a solver has run.
pub const GREAT: f64 = 1.0e20;

// ---------------------------------------------------------------------------
// ResidualNorm
// ---------------------------------------------------------------------------

/// Global norm used for residuals and their normalisation factor.
///
/// Whichever norm is selected is applied to both the residual vector and the
/// normalisation weights, so the ratio stays scale-invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ResidualNorm {
    /// Sum of magnitudes (the finite-volume default).
    #[default]
    #[serde(rename = "L1", alias = "l1")]
    L1,
    /// Euclidean norm.
    #[serde(rename = "L2", alias = "l2")]
    L2,
    /// Maximum magnitude.
    #[serde(rename = "LInf", alias = "linf")]
    LInf,
}

impl ResidualNorm {
    /// Evaluate the norm over the values owned by every rank.
    pub fn global(self, comm: &dyn Communicator, values: &[f64]) -> Result<f64, CommError> {
        match self {
            ResidualNorm::L1 => comm.sum(values.iter().map(|v| v.abs()).sum()),
            ResidualNorm::L2 => Ok(comm.sum(values.iter().map(|v| v * v).sum())?.sqrt()),
            ResidualNorm::LInf => comm.max(values.iter().fold(0.0, |m: f64, v| m.max(v.abs()))),
        }
    }
}

impl fmt::Display for ResidualNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidualNorm::L1 => write!(f, "L1"),
            ResidualNorm::L2 => write!(f, "L2"),
            ResidualNorm::LInf => write!(f, "LInf"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convergence tracking
// ---------------------------------------------------------------------------

/// Per-iteration convergence snapshot.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConvergenceInfo {
    /// Iteration index (1-based; iteration 0 is the initial residual).
    pub iteration: usize,
    /// Normalised residual after this iteration.
    pub residual_norm: f64,
}

/// Result of one linear solve.
///
/// Returned by value from every solver. `Display` renders the one-line
/// summary used in solver logs:
///
/// ```text
/// GAMG:  Solving for p, Initial residual = 1, Final residual = 8.2e-07, No Iterations 9
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SolverPerformance {
    /// Name of the solver that produced this record.
    pub solver_name: String,
    /// Name of the field that was solved.
    pub field_name: String,
    /// Normalised residual before the first iteration.
    pub initial_residual: f64,
    /// Normalised residual after the last iteration.
    pub final_residual: f64,
    /// Iterations (cycles, sweeps) performed.
    pub n_iterations: usize,
    /// Whether the tolerance or relative tolerance was met.
    pub converged: bool,
    /// Whether the solver detected a singular system.
    pub singular: bool,
    /// Whether divergence was detected and the best iterate restored.
    pub diverged: bool,
    /// Residual after every iteration, including the initial one.
    pub convergence_history: Vec<ConvergenceInfo>,
}

impl SolverPerformance {
    /// Fresh record with no iterations and `GREAT` residuals.
    pub fn new(solver_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            solver_name: solver_name.into(),
            field_name: field_name.into(),
            initial_residual: GREAT,
            final_residual: GREAT,
            n_iterations: 0,
            converged: false,
            singular: false,
            diverged: false,
            convergence_history: Vec::new(),
        }
    }

    /// Record the residual before iterating.
    pub fn set_initial(&mut self, residual: f64) {
        self.initial_residual = residual;
        self.final_residual = residual;
        self.convergence_history.push(ConvergenceInfo {
            iteration: 0,
            residual_norm: residual,
        });
    }

    /// Record the residual after an iteration.
    pub fn record(&mut self, residual: f64) {
        self.final_residual = residual;
        self.convergence_history.push(ConvergenceInfo {
            iteration: self.n_iterations,
            residual_norm: residual,
        });
    }

    /// Update and return `converged`.
    ///
    /// Converged when the final residual is below `tolerance`, or when
    /// `rel_tol` is active and the residual has dropped by that factor.
    pub fn check_convergence(&mut self, tolerance: f64, rel_tol: f64) -> bool {
        self.converged = self.final_residual < tolerance
            || (rel_tol > SMALL && self.final_residual < rel_tol * self.initial_residual);
        self.converged
    }

    /// Update and return `singular` from a normalised inner product.
    pub fn check_singularity(&mut self, value: f64) -> bool {
        self.singular = value < VSMALL;
        self.singular
    }

    /// Record for a system that needs no work (empty or already solved).
    pub fn trivially_converged(solver_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        let mut perf = Self::new(solver_name, field_name);
        perf.initial_residual = 0.0;
        perf.final_residual = 0.0;
        perf.converged = true;
        perf
    }
}

impl fmt::Display for SolverPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:  Solving for {}, Initial residual = {:e}, Final residual = {:e}, No Iterations {}",
            self.solver_name,
            self.field_name,
            self.initial_residual,
            self.final_residual,
            self.n_iterations,
        )?;
        if self.singular {
            write!(f, " (singular)")?;
        }
        if self.diverged {
            write!(f, " (diverged)")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
