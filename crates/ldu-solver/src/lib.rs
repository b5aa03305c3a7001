//! LDU face-addressed sparse matrices and the linear solvers of a
//! finite-volume code.
//!
//! Matrices are stored the way a cell-centred finite-volume discretisation
//! produces them: a diagonal per cell and an upper/lower coefficient per
//! internal face, plus coupling coefficients on processor and cyclic
//! interfaces. Decomposed meshes exchange halo values through a
//! [`Communicator`](comm::Communicator) carried by the [`LduMesh`](mesh::LduMesh).
//!
//! # Available Solvers
//!
//! | Solver | `solver` key | Matrices | Method |
//! |--------|-------------|----------|--------|
//! | [`GamgSolver`](gamg::GamgSolver) | `GAMG` | any | agglomeration multigrid, V or W cycle |
//! | [`PcgSolver`](pcg::PcgSolver) | `PCG` | symmetric | conjugate gradient, `none`/`diagonal`/`DIC`/`GAMG` preconditioning |
//! | [`SmoothSolver`](smooth_solver::SmoothSolver) | `smoothSolver` | any | `GaussSeidel`, `symGaussSeidel`, `DIC`, `DILU` sweeps |
//! | [`DiagonalSolver`](diagonal::DiagonalSolver) | `diagonal` | diagonal | `psi = source / diag` |
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ldu_solver::addressing::LduAddressing;
//! use ldu_solver::controls::SolverControls;
//! use ldu_solver::matrix::LduMatrix;
//! use ldu_solver::mesh::LduMesh;
//! use ldu_solver::selection::solve;
//!
//! // 1-D chain of 20 cells with a fixed value on the left face.
//! let n = 20;
//! let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
//! let mesh = Arc::new(LduMesh::serial(addr));
//! let mut diag = vec![2.0; n];
//! diag[0] = 3.0;
//! let matrix = LduMatrix::new_symmetric(mesh, diag, vec![-1.0; n - 1]).unwrap();
//!
//! let source = vec![1.0; n];
//! let mut psi = vec![0.0; n];
//! let controls = SolverControls::from_json(r#"{ "solver": "GAMG", "tolerance": 1e-8 }"#).unwrap();
//! let perf = solve("T", &matrix, &mut psi, &source, &controls).unwrap();
//! assert!(perf.converged);
//! ```

pub mod addressing;
pub mod agglomeration;
pub mod comm;
pub mod controls;
pub mod diagonal;
pub mod equation;
pub mod error;
pub mod gamg;
pub mod interface;
pub mod lu;
pub mod matrix;
pub mod mesh;
pub mod monitor;
pub mod pcg;
pub mod selection;
pub mod smooth_solver;
pub mod smoother;
pub mod traits;
pub mod types;
pub mod validation;

pub use addressing::LduAddressing;
pub use agglomeration::{AgglomerationParams, GamgAgglomeration};
pub use comm::{Communicator, SerialComm, ThreadComm};
pub use controls::SolverControls;
pub use equation::{solve_equation, LinearSystem};
pub use error::{CommError, ConfigError, SolverError, ValidationError};
pub use gamg::{GamgHierarchy, GamgSolver};
pub use interface::{InterfaceKind, LduInterface};
pub use matrix::{LduMatrix, MatrixType};
pub use mesh::LduMesh;
pub use selection::{select_solver, solve};
pub use traits::{EquationAssembler, LinearSolver, SolutionField};
pub use types::{ResidualNorm, SolverPerformance};
