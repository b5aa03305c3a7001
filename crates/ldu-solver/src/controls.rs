//! Solver controls and the run-time selectable type names.
//!
//! [`SolverControls`] is the keyword set a case supplies per field. It is
//! deserialised with `serde` (camelCase keys, unknown keys rejected, every
//! key optional with the usual finite-volume defaults) and validated once,
//! before any solver is built.
//!
//! # Example
//!
//! ```rust
//! use ldu_solver::controls::{SolverControls, SolverType, SmootherType};
//!
//! let controls = SolverControls::from_json(r#"{
//!     "solver": "GAMG",
//!     "smoother": "symGaussSeidel",
//!     "tolerance": 1e-7,
//!     "relTol": 0.01
//! }"#).unwrap();
//! assert_eq!(controls.solver, SolverType::Gamg);
//! assert_eq!(controls.smoother, SmootherType::SymGaussSeidel);
//! assert_eq!(controls.n_cells_in_coarsest_level, 10);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agglomeration::AgglomerationParams;
use crate::error::ConfigError;
use crate::types::ResidualNorm;
use crate::validation::{MAX_ITERATIONS, MAX_SWEEPS};

// ---------------------------------------------------------------------------
// Named enums
// ---------------------------------------------------------------------------

/// Look up `name` in a `(name, value)` table, reporting the valid names on a
/// miss.
fn lookup<T: Copy>(kind: &'static str, table: &[(&str, T)], name: &str) -> Result<T, ConfigError> {
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, v)| v)
        .ok_or_else(|| ConfigError::UnknownType {
            kind,
            name: name.to_string(),
            valid: table
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Top-level linear solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SolverType {
    /// Repeated smoother sweeps with a residual check.
    SmoothSolver,
    /// Preconditioned conjugate gradient.
    Pcg,
    /// Geometric-agglomerated algebraic multigrid.
    Gamg,
    /// Diagonal-only direct solve.
    Diagonal,
}

impl SolverType {
    const TABLE: [(&'static str, SolverType); 4] = [
        ("smoothSolver", SolverType::SmoothSolver),
        ("PCG", SolverType::Pcg),
        ("GAMG", SolverType::Gamg),
        ("diagonal", SolverType::Diagonal),
    ];

    /// Name used in controls and performance lines.
    pub fn name(self) -> &'static str {
        match self {
            SolverType::SmoothSolver => "smoothSolver",
            SolverType::Pcg => "PCG",
            SolverType::Gamg => "GAMG",
            SolverType::Diagonal => "diagonal",
        }
    }
}

/// Smoother used by `smoothSolver` and on every GAMG level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SmootherType {
    /// Forward Gauss-Seidel.
    GaussSeidel,
    /// Forward then backward Gauss-Seidel.
    SymGaussSeidel,
    /// Diagonal incomplete Cholesky (symmetric matrices).
    Dic,
    /// Diagonal incomplete LU (asymmetric matrices).
    Dilu,
}

impl SmootherType {
    const TABLE: [(&'static str, SmootherType); 4] = [
        ("GaussSeidel", SmootherType::GaussSeidel),
        ("symGaussSeidel", SmootherType::SymGaussSeidel),
        ("DIC", SmootherType::Dic),
        ("DILU", SmootherType::Dilu),
    ];

    /// Name used in controls.
    pub fn name(self) -> &'static str {
        match self {
            SmootherType::GaussSeidel => "GaussSeidel",
            SmootherType::SymGaussSeidel => "symGaussSeidel",
            SmootherType::Dic => "DIC",
            SmootherType::Dilu => "DILU",
        }
    }
}

/// PCG preconditioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PreconditionerType {
    /// Identity.
    None,
    /// Inverse diagonal.
    Diagonal,
    /// Diagonal incomplete Cholesky.
    Dic,
    /// A fixed number of GAMG cycles.
    Gamg,
}

impl PreconditionerType {
    const TABLE: [(&'static str, PreconditionerType); 4] = [
        ("none", PreconditionerType::None),
        ("diagonal", PreconditionerType::Diagonal),
        ("DIC", PreconditionerType::Dic),
        ("GAMG", PreconditionerType::Gamg),
    ];

    /// Name used in controls.
    pub fn name(self) -> &'static str {
        match self {
            PreconditionerType::None => "none",
            PreconditionerType::Diagonal => "diagonal",
            PreconditionerType::Dic => "DIC",
            PreconditionerType::Gamg => "GAMG",
        }
    }
}

/// GAMG agglomeration strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AgglomeratorType {
    /// Pairwise, weighted by face area.
    FaceAreaPair,
    /// Pairwise, weighted by coefficient strength.
    AlgebraicPair,
    /// Region growing with size bounds.
    MGridGen,
}

impl AgglomeratorType {
    const TABLE: [(&'static str, AgglomeratorType); 4] = [
        ("faceAreaPair", AgglomeratorType::FaceAreaPair),
        ("algebraicPair", AgglomeratorType::AlgebraicPair),
        ("algebraic", AgglomeratorType::AlgebraicPair),
        ("MGridGen", AgglomeratorType::MGridGen),
    ];

    /// Name used in controls.
    pub fn name(self) -> &'static str {
        match self {
            AgglomeratorType::FaceAreaPair => "faceAreaPair",
            AgglomeratorType::AlgebraicPair => "algebraicPair",
            AgglomeratorType::MGridGen => "MGridGen",
        }
    }

    /// Default `(minSize, maxSize)` of a coarse cell.
    pub fn default_size_bounds(self) -> (usize, usize) {
        match self {
            AgglomeratorType::FaceAreaPair | AgglomeratorType::AlgebraicPair => (1, 3),
            AgglomeratorType::MGridGen => (4, 6),
        }
    }
}

/// Multigrid cycle shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CycleType {
    /// One coarse-grid visit per level.
    V,
    /// Two coarse-grid visits per level.
    W,
}

impl CycleType {
    const TABLE: [(&'static str, CycleType); 2] = [("V", CycleType::V), ("W", CycleType::W)];

    /// Name used in controls.
    pub fn name(self) -> &'static str {
        match self {
            CycleType::V => "V",
            CycleType::W => "W",
        }
    }

    /// Coarse-grid visits per level.
    pub fn coarse_visits(self) -> usize {
        match self {
            CycleType::V => 1,
            CycleType::W => 2,
        }
    }
}

/// What to do when a solve does not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailurePolicy {
    /// Log a warning and return the performance record.
    Warn,
    /// Return [`SolverError::NonConvergence`](crate::error::SolverError).
    Error,
}

impl FailurePolicy {
    const TABLE: [(&'static str, FailurePolicy); 2] =
        [("warn", FailurePolicy::Warn), ("error", FailurePolicy::Error)];

    /// Name used in controls.
    pub fn name(self) -> &'static str {
        match self {
            FailurePolicy::Warn => "warn",
            FailurePolicy::Error => "error",
        }
    }
}

macro_rules! named_enum_impls {
    ($ty:ident, $kind:literal) => {
        impl FromStr for $ty {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                lookup($kind, &Self::TABLE, s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ConfigError;

            fn try_from(s: String) -> Result<Self, ConfigError> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.name().to_string()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_enum_impls!(SolverType, "solver");
named_enum_impls!(SmootherType, "smoother");
named_enum_impls!(PreconditionerType, "preconditioner");
named_enum_impls!(AgglomeratorType, "agglomerator");
named_enum_impls!(CycleType, "cycle");
named_enum_impls!(FailurePolicy, "failure policy");

// ---------------------------------------------------------------------------
// SolverControls
// ---------------------------------------------------------------------------

/// Per-field solver controls.
///
/// Keys not listed for the selected solver are accepted and ignored, so one
/// controls block can be switched between solvers by changing `solver`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SolverControls {
    /// Linear solver. Default: `GAMG`.
    pub solver: SolverType,
    /// Smoother for `smoothSolver` and GAMG. Default: `GaussSeidel`.
    pub smoother: SmootherType,
    /// Preconditioner for `PCG`. Default: `DIC`.
    pub preconditioner: PreconditionerType,

    /// Absolute tolerance on the normalised residual. Default: `1e-6`.
    pub tolerance: f64,
    /// Tolerance relative to the initial residual; `0` disables. Default: `0`.
    pub rel_tol: f64,
    /// Iteration cap. `0` performs no iterations. Default: `1000`.
    pub max_iter: usize,
    /// Iterations performed even when already converged. Default: `0`.
    pub min_iter: usize,
    /// Residual norm. Default: `L1`.
    pub norm: ResidualNorm,

    /// Sweeps between residual checks in `smoothSolver`. Default: `1`.
    pub n_sweeps: usize,

    /// Pre-smoothing sweeps on the first coarse level. Default: `0`.
    pub n_pre_sweeps: usize,
    /// Extra pre-sweeps per coarser level. Default: `1`.
    pub pre_sweeps_level_multiplier: usize,
    /// Cap on pre-sweeps. Default: `4`.
    pub max_pre_sweeps: usize,
    /// Post-smoothing sweeps on the first coarse level. Default: `2`.
    pub n_post_sweeps: usize,
    /// Extra post-sweeps per coarser level. Default: `1`.
    pub post_sweeps_level_multiplier: usize,
    /// Cap on post-sweeps. Default: `4`.
    pub max_post_sweeps: usize,
    /// Sweeps on the finest level after each correction. Default: `2`.
    pub n_finest_sweeps: usize,
    /// Cycle shape. Default: `V`.
    pub cycle: CycleType,
    /// Scale prolonged corrections by an energy-minimising factor.
    /// Default: on for symmetric matrices, off otherwise.
    pub scale_correction: Option<bool>,
    /// Factorise the coarsest level with dense LU. Default: `true`.
    pub direct_solve_coarsest: bool,

    /// Keep the agglomeration on the mesh between solves. Default: `true`.
    pub cache_agglomeration: bool,
    /// Agglomeration strategy. Default: `faceAreaPair`.
    pub agglomerator: AgglomeratorType,
    /// Stop coarsening at this many cells per rank. Default: `10`.
    pub n_cells_in_coarsest_level: usize,
    /// Pairing passes combined into one level. Default: `1`.
    pub merge_levels: usize,
    /// Maximum number of coarse levels. Default: `50`.
    pub max_levels: usize,
    /// Minimum cells per coarse cell (region growing only).
    pub min_size: Option<usize>,
    /// Maximum cells per coarse cell.
    pub max_size: Option<usize>,

    /// GAMG cycles per PCG preconditioning call. Default: `2`.
    #[serde(rename = "nVcycles", alias = "nVCycles")]
    pub n_v_cycles: usize,

    /// Residual growth over the best residual treated as divergence.
    /// Default: `100`.
    pub divergence_factor: f64,
    /// Consecutive growing iterations before divergence is declared.
    /// Default: `3`.
    pub divergence_window: usize,
    /// Non-convergence handling. Default: `warn`.
    pub on_failure: FailurePolicy,
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            solver: SolverType::Gamg,
            smoother: SmootherType::GaussSeidel,
            preconditioner: PreconditionerType::Dic,
            tolerance: 1e-6,
            rel_tol: 0.0,
            max_iter: 1000,
            min_iter: 0,
            norm: ResidualNorm::L1,
            n_sweeps: 1,
            n_pre_sweeps: 0,
            pre_sweeps_level_multiplier: 1,
            max_pre_sweeps: 4,
            n_post_sweeps: 2,
            post_sweeps_level_multiplier: 1,
            max_post_sweeps: 4,
            n_finest_sweeps: 2,
            cycle: CycleType::V,
            scale_correction: None,
            direct_solve_coarsest: true,
            cache_agglomeration: true,
            agglomerator: AgglomeratorType::FaceAreaPair,
            n_cells_in_coarsest_level: 10,
            merge_levels: 1,
            max_levels: 50,
            min_size: None,
            max_size: None,
            n_v_cycles: 2,
            divergence_factor: 100.0,
            divergence_window: 3,
            on_failure: FailurePolicy::Warn,
        }
    }
}

impl SolverControls {
    /// GAMG with the given smoother and defaults elsewhere.
    pub fn gamg(smoother: SmootherType) -> Self {
        Self {
            solver: SolverType::Gamg,
            smoother,
            ..Default::default()
        }
    }

    /// PCG with the given preconditioner.
    pub fn pcg(preconditioner: PreconditionerType) -> Self {
        Self {
            solver: SolverType::Pcg,
            preconditioner,
            ..Default::default()
        }
    }

    /// `smoothSolver` with the given smoother.
    pub fn smooth(smoother: SmootherType) -> Self {
        Self {
            solver: SolverType::SmoothSolver,
            smoother,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON controls document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, unknown keys or unknown
    /// type names; any [`validate`](Self::validate) error otherwise.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let controls: Self = serde_json::from_str(text)?;
        controls.validate()?;
        Ok(controls)
    }

    /// Check bounds and cross-key consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                key,
                value: value.to_string(),
                reason: reason.to_string(),
            }
        }

        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(invalid("tolerance", self.tolerance, "must be finite and >= 0"));
        }
        if !self.rel_tol.is_finite() || !(0.0..1.0).contains(&self.rel_tol) {
            return Err(invalid("relTol", self.rel_tol, "must be in [0, 1)"));
        }
        if self.max_iter > MAX_ITERATIONS {
            return Err(invalid("maxIter", self.max_iter, "exceeds the iteration limit"));
        }
        if self.min_iter > MAX_ITERATIONS {
            return Err(invalid("minIter", self.min_iter, "exceeds the iteration limit"));
        }
        if self.n_sweeps == 0 || self.n_sweeps > MAX_SWEEPS {
            return Err(invalid("nSweeps", self.n_sweeps, "must be in 1..=1000"));
        }
        for (key, value) in [
            ("nPreSweeps", self.n_pre_sweeps),
            ("maxPreSweeps", self.max_pre_sweeps),
            ("nPostSweeps", self.n_post_sweeps),
            ("maxPostSweeps", self.max_post_sweeps),
            ("nFinestSweeps", self.n_finest_sweeps),
        ] {
            if value > MAX_SWEEPS {
                return Err(invalid(key, value, "exceeds the sweep limit"));
            }
        }
        if self.n_cells_in_coarsest_level == 0 {
            return Err(invalid("nCellsInCoarsestLevel", 0, "must be >= 1"));
        }
        if self.merge_levels == 0 {
            return Err(invalid("mergeLevels", 0, "must be >= 1"));
        }
        let (min_size, max_size) = self.size_bounds();
        if min_size == 0 {
            return Err(invalid("minSize", min_size, "must be >= 1"));
        }
        if max_size < 2 {
            return Err(invalid("maxSize", max_size, "must be >= 2"));
        }
        if min_size > max_size {
            return Err(invalid("minSize", min_size, "must not exceed maxSize"));
        }
        if self.n_v_cycles == 0 {
            return Err(invalid("nVcycles", 0, "must be >= 1"));
        }
        if !(self.divergence_factor > 1.0) {
            return Err(invalid("divergenceFactor", self.divergence_factor, "must be > 1"));
        }
        if self.divergence_window == 0 {
            return Err(invalid("divergenceWindow", 0, "must be >= 1"));
        }
        Ok(())
    }

    /// Effective `(minSize, maxSize)` for the selected agglomerator.
    pub fn size_bounds(&self) -> (usize, usize) {
        let (min, max) = self.agglomerator.default_size_bounds();
        (self.min_size.unwrap_or(min), self.max_size.unwrap_or(max))
    }

    /// Cache key of the agglomeration these controls request.
    pub fn agglomeration_params(&self) -> AgglomerationParams {
        let (min_size, max_size) = self.size_bounds();
        AgglomerationParams {
            agglomerator: self.agglomerator,
            n_cells_in_coarsest_level: self.n_cells_in_coarsest_level,
            merge_levels: self.merge_levels,
            max_levels: self.max_levels,
            min_size,
            max_size,
        }
    }

    /// Whether correction scaling applies to a matrix of this symmetry.
    pub fn scale_correction_for(&self, symmetric: bool) -> bool {
        self.scale_correction.unwrap_or(symmetric)
    }

    /// Pre-smoothing sweeps on coarse level `level` (1 = first coarse level).
    pub fn pre_sweeps(&self, level: usize) -> usize {
        let extra = self.pre_sweeps_level_multiplier * level.saturating_sub(1);
        (self.n_pre_sweeps + extra).min(self.max_pre_sweeps)
    }

    /// Post-smoothing sweeps on coarse level `level` (1 = first coarse level).
    pub fn post_sweeps(&self, level: usize) -> usize {
        let extra = self.post_sweeps_level_multiplier * level.saturating_sub(1);
        (self.n_post_sweeps + extra).min(self.max_post_sweeps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = SolverControls::default();
        assert_eq!(c.solver, SolverType::Gamg);
        assert_eq!(c.tolerance, 1e-6);
        assert_eq!(c.rel_tol, 0.0);
        assert_eq!(c.max_iter, 1000);
        assert_eq!(c.n_cells_in_coarsest_level, 10);
        assert_eq!(c.size_bounds(), (1, 3));
        assert!(c.cache_agglomeration);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn empty_document_gives_defaults() {
        let c = SolverControls::from_json("{}").unwrap();
        assert_eq!(c, SolverControls::default());
    }

    #[test]
    fn parses_openfoam_style_names() {
        let c = SolverControls::from_json(
            r#"{"solver": "PCG", "preconditioner": "GAMG", "nVcycles": 3,
                "agglomerator": "algebraic", "norm": "L2", "onFailure": "error"}"#,
        )
        .unwrap();
        assert_eq!(c.solver, SolverType::Pcg);
        assert_eq!(c.preconditioner, PreconditionerType::Gamg);
        assert_eq!(c.n_v_cycles, 3);
        assert_eq!(c.agglomerator, AgglomeratorType::AlgebraicPair);
        assert_eq!(c.norm, ResidualNorm::L2);
        assert_eq!(c.on_failure, FailurePolicy::Error);
    }

    #[test]
    fn unknown_type_name_is_reported() {
        let err = SolverControls::from_json(r#"{"smoother": "Jacobi"}"#).unwrap_err();
        assert!(err.to_string().contains("unknown smoother 'Jacobi'"), "{err}");
        let err: ConfigError = "BiCG".parse::<SolverType>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownType { kind: "solver", .. }));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(SolverControls::from_json(r#"{"tolerence": 1e-6}"#).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for doc in [
            r#"{"relTol": 1.5}"#,
            r#"{"tolerance": -1}"#,
            r#"{"nSweeps": 0}"#,
            r#"{"mergeLevels": 0}"#,
            r#"{"agglomerator": "MGridGen", "minSize": 8}"#,
            r#"{"maxSize": 1}"#,
            r#"{"divergenceFactor": 0.5}"#,
        ] {
            let err = SolverControls::from_json(doc).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{doc}: {err}");
        }
    }

    #[test]
    fn sweep_schedule_grows_and_saturates() {
        let c = SolverControls::default();
        assert_eq!(c.pre_sweeps(1), 0);
        assert_eq!(c.pre_sweeps(3), 2);
        assert_eq!(c.post_sweeps(1), 2);
        assert_eq!(c.post_sweeps(2), 3);
        assert_eq!(c.post_sweeps(10), 4);
    }

    #[test]
    fn scale_correction_defaults_to_symmetry() {
        let c = SolverControls::default();
        assert!(c.scale_correction_for(true));
        assert!(!c.scale_correction_for(false));
        let forced = SolverControls {
            scale_correction: Some(false),
            ..Default::default()
        };
        assert!(!forced.scale_correction_for(true));
    }

    #[test]
    fn mgridgen_bounds() {
        let c = SolverControls {
            agglomerator: AgglomeratorType::MGridGen,
            ..Default::default()
        };
        assert_eq!(c.size_bounds(), (4, 6));
        assert_eq!(c.agglomeration_params().max_size, 6);
    }

    #[test]
    fn serialises_with_names() {
        let json = serde_json::to_string(&SolverControls::pcg(PreconditionerType::Diagonal)).unwrap();
        assert!(json.contains(r#""solver":"PCG""#), "{json}");
        assert!(json.contains(r#""preconditioner":"diagonal""#), "{json}");
        assert!(json.contains(r#""nVcycles":2"#), "{json}");
    }
}
