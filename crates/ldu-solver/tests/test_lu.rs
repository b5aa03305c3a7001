//! Integration tests for the dense LU coarsest-level solver.

mod helpers;

use std::sync::Arc;

use approx::assert_relative_eq;
use ldu_solver::addressing::LduAddressing;
use ldu_solver::lu::LuScalarMatrix;
use ldu_solver::matrix::LduMatrix;
use ldu_solver::mesh::LduMesh;
use ldu_solver::SolverError;

use helpers::{
    dense_solve, laplace, partitioned_laplace, random_vector, run_parallel, saddle, strip_rows,
    to_dense, Grid2d, Lcg,
};

#[test]
fn test_direct_solve_matches_dense_reference_up_to_ten_cells() {
    let mut rng = Lcg::new(17);
    for n in 2..=10 {
        let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
        let upper: Vec<f64> = (0..n - 1).map(|_| rng.next_f64_range(-2.0, 2.0)).collect();
        let lower: Vec<f64> = (0..n - 1).map(|_| rng.next_f64_range(-2.0, 2.0)).collect();
        let diag: Vec<f64> = (0..n).map(|_| rng.next_f64_range(4.5, 6.0)).collect();
        let m = LduMatrix::new_asymmetric(Arc::new(LduMesh::serial(addr)), diag, upper, lower).unwrap();

        let b = random_vector(n, n as u64);
        let expected = dense_solve(&to_dense(&m), &b);
        let lu = LuScalarMatrix::from_ldu(&m).unwrap();
        assert_eq!(lu.size(), n);
        let mut x = vec![0.0; n];
        lu.solve(&mut x, &b).unwrap();
        for (a, e) in x.iter().zip(&expected) {
            assert_relative_eq!(*a, *e, epsilon = 1e-9, max_relative = 1e-9);
        }
    }
}

#[test]
fn test_direct_solve_on_a_small_grid() {
    let (m, source) = laplace(Grid2d::new(3, 3), saddle);
    let lu = LuScalarMatrix::from_ldu(&m).unwrap();
    let mut x = vec![0.0; 9];
    lu.solve(&mut x, &source).unwrap();
    let expected = dense_solve(&to_dense(&m), &source);
    for (a, e) in x.iter().zip(&expected) {
        assert_relative_eq!(*a, *e, epsilon = 1e-12);
    }
}

#[test]
fn test_singular_system_is_reported() {
    // Pure Neumann chain: rows sum to zero.
    let addr = LduAddressing::new(3, vec![0, 1], vec![1, 2]).unwrap();
    let m = LduMatrix::new_symmetric(Arc::new(LduMesh::serial(addr)), vec![1.0, 2.0, 1.0], vec![-1.0, -1.0])
        .unwrap();
    let err = LuScalarMatrix::from_ldu(&m).unwrap_err();
    assert!(matches!(err, SolverError::SingularMatrix { row: 2, .. }), "{err}");
}

#[test]
fn test_gathered_solve_across_ranks_matches_serial() {
    let grid = Grid2d::new(4, 3);
    let (serial, serial_source) = laplace(grid, saddle);
    let expected = dense_solve(&to_dense(&serial), &serial_source);

    let results = run_parallel(3, |comm| {
        let (m, source) = partitioned_laplace(grid, comm, saddle);
        let lu = LuScalarMatrix::from_ldu(&m).unwrap();
        let mut x = vec![0.0; m.n_cells()];
        lu.solve(&mut x, &source).unwrap();
        x
    });

    for (rank, x) in results.iter().enumerate() {
        let (j0, j1) = strip_rows(grid, rank, 3);
        let slice = &expected[j0 * grid.nx..j1 * grid.nx];
        for (a, e) in x.iter().zip(slice) {
            assert_relative_eq!(*a, *e, epsilon = 1e-12);
        }
    }
}
