//! Error types for the LDU solver crate.
//!
//! Provides structured error variants for singular coarse systems,
//! convergence failures, invalid inputs, bad solver controls, and halo
//! exchange failures. All errors implement `std::error::Error` via
//! `thiserror`.

/// Primary error type for solver operations.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// The direct coarsest-level factorisation met a zero pivot.
    #[error("singular matrix: pivot {pivot:.3e} in row {row}")]
    SingularMatrix {
        /// Row (global coarse index) at which elimination failed.
        row: usize,
        /// Magnitude of the offending pivot.
        pivot: f64,
    },

    /// The solver did not reach the tolerance within `maxIter` iterations.
    ///
    /// Only raised when the failure policy is `error`; with the default
    /// `warn` policy the performance record is returned instead.
    #[error(
        "{solver} did not converge for {field} after {iterations} iterations \
         (residual={residual:.2e}, tol={tolerance:.2e})"
    )]
    NonConvergence {
        /// Solver that failed.
        solver: String,
        /// Field being solved.
        field: String,
        /// Iterations completed.
        iterations: usize,
        /// Final normalised residual.
        residual: f64,
        /// Absolute tolerance that was not reached.
        tolerance: f64,
    },

    /// The residual grew past the divergence threshold; the best iterate was
    /// restored before this error was raised.
    #[error("{solver} diverged for {field} at iteration {iteration} (residual={residual:.2e})")]
    Diverged {
        /// Solver that diverged.
        solver: String,
        /// Field being solved.
        field: String,
        /// Iteration at which divergence was declared.
        iteration: usize,
        /// Residual at the point of divergence.
        residual: f64,
    },

    /// A numerical breakdown (NaN, Inf, or a vanishing inner product).
    #[error("numerical instability at iteration {iteration}: {detail}")]
    NumericalInstability {
        /// Iteration at which the instability was detected.
        iteration: usize,
        /// Human-readable explanation.
        detail: String,
    },

    /// The caller supplied invalid input (dimensions, addressing, etc.).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// The solver controls are malformed or do not fit the matrix.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A halo exchange or collective failed.
    #[error("communication error: {0}")]
    Comm(#[from] CommError),
}

/// Validation errors for solver inputs.
///
/// These are raised eagerly before any computation begins so that callers get
/// clear diagnostics rather than mysterious numerical failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Array lengths are inconsistent with the addressing.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A value is NaN or infinite where a finite number is required.
    #[error("non-finite value detected: {0}")]
    NonFiniteValue(String),

    /// A face references a cell outside `0..n_cells`.
    #[error("cell index {index} out of range for {n_cells} cells (face {face})")]
    IndexOutOfBounds {
        /// Offending cell index.
        index: usize,
        /// Face that holds it.
        face: usize,
        /// Number of cells in the addressing.
        n_cells: usize,
    },

    /// A face violates `lower < upper` or the upper-triangular face order.
    #[error("face {face} breaks upper-triangular order: {detail}")]
    NotUpperTriangular {
        /// First face where the violation was detected.
        face: usize,
        /// What went wrong.
        detail: String,
    },

    /// Coupled interfaces do not pair up.
    #[error("interface mismatch: {0}")]
    InterfaceMismatch(String),

    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// Matrix size exceeds the implementation limit.
    #[error("matrix size {rows}x{rows} exceeds maximum supported {max_dim}x{max_dim}")]
    MatrixTooLarge {
        /// Number of rows.
        rows: usize,
        /// Maximum supported dimension.
        max_dim: usize,
    },
}

/// Errors in solver controls.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An enum-valued key named an unknown type.
    #[error("unknown {kind} '{name}'; valid choices: {valid}")]
    UnknownType {
        /// Which key was being parsed (`solver`, `smoother`, ...).
        kind: &'static str,
        /// The name that was not recognised.
        name: String,
        /// Comma-separated list of accepted names.
        valid: String,
    },

    /// A numeric control is out of bounds.
    #[error("invalid control {key} = {value}: {reason}")]
    InvalidValue {
        /// Control key.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A required control for the selected solver is missing.
    #[error("solver {solver} requires control '{key}'")]
    Missing {
        /// Selected solver.
        solver: String,
        /// Missing key.
        key: &'static str,
    },

    /// The selected solver cannot handle this matrix type.
    #[error("{solver} cannot be used with {matrix_type} matrices")]
    IncompatibleMatrix {
        /// Solver or preconditioner name.
        solver: String,
        /// `symmetric`, `asymmetric` or `diagonal`.
        matrix_type: &'static str,
    },

    /// The controls document could not be parsed.
    #[error("failed to parse solver controls: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised by a [`Communicator`](crate::comm::Communicator).
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// The peer rank does not exist in this world.
    #[error("rank {rank} out of range for {n_procs} processes")]
    InvalidRank {
        /// Requested rank.
        rank: usize,
        /// World size.
        n_procs: usize,
    },

    /// The channel to or from a peer was closed.
    #[error("peer {peer} disconnected")]
    Disconnected {
        /// Peer rank.
        peer: usize,
    },

    /// No message arrived from a peer within the receive timeout.
    #[error("timed out waiting for rank {peer} (tag {tag})")]
    Timeout {
        /// Peer rank.
        peer: usize,
        /// Message tag.
        tag: u32,
    },

    /// A message arrived with the wrong payload kind or length.
    #[error("unexpected payload from rank {peer} (tag {tag}): {detail}")]
    UnexpectedPayload {
        /// Peer rank.
        peer: usize,
        /// Message tag.
        tag: u32,
        /// What was expected.
        detail: String,
    },
}
