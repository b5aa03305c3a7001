//! Integration tests for LDU matrix products, residuals and normalisation.

mod helpers;

use std::sync::Arc;

use approx::assert_relative_eq;
use ldu_solver::addressing::LduAddressing;
use ldu_solver::comm::SerialComm;
use ldu_solver::interface::LduInterface;
use ldu_solver::matrix::LduMatrix;
use ldu_solver::mesh::LduMesh;
use ldu_solver::types::ResidualNorm;

use helpers::{dense_matvec, laplace, random_vector, saddle, to_dense, Grid2d};

fn chain_mesh(n: usize) -> Arc<LduMesh> {
    let addr = LduAddressing::new(n, (0..n - 1).collect(), (1..n).collect()).unwrap();
    Arc::new(LduMesh::serial(addr))
}

// ---------------------------------------------------------------------------
// Products against a dense reference
// ---------------------------------------------------------------------------

#[test]
fn test_amul_symmetric_chain_of_five() {
    let m = LduMatrix::new_symmetric(chain_mesh(5), vec![4.0, 5.0, 6.0, 7.0, 8.0], vec![-1.0, -2.0, -3.0, -4.0])
        .unwrap();
    let x = [1.0, 2.0, 3.0, 4.0, 5.0];
    let mut y = vec![0.0; 5];
    m.amul(&x, &mut y).unwrap();
    assert_eq!(y, vec![2.0, 3.0, 2.0, -1.0, 24.0]);
}

#[test]
fn test_amul_asymmetric_chain_of_five() {
    let upper = vec![-1.0, -2.0, -3.0, -4.0];
    let lower = vec![-0.5, -1.5, -2.5, -3.5];
    let m = LduMatrix::new_asymmetric(chain_mesh(5), vec![4.0; 5], upper, lower).unwrap();
    let x = [1.0, 2.0, 3.0, 4.0, 5.0];
    let mut y = vec![0.0; 5];
    m.amul(&x, &mut y).unwrap();
    // Row i: lower[i-1] x[i-1] + diag x[i] + upper[i] x[i+1].
    assert_eq!(y, vec![2.0, 1.5, -3.0, -11.5, 6.0]);

    let mut yt = vec![0.0; 5];
    m.tmul(&x, &mut yt).unwrap();
    let dense = to_dense(&m);
    let transposed: Vec<Vec<f64>> = (0..5).map(|i| (0..5).map(|j| dense[j][i]).collect()).collect();
    assert_eq!(yt, dense_matvec(&transposed, &x));
}

#[test]
fn test_amul_matches_dense_on_grid() {
    let (m, _) = laplace(Grid2d::new(7, 5), saddle);
    let x = random_vector(m.n_cells(), 11);
    let mut y = vec![0.0; m.n_cells()];
    m.amul(&x, &mut y).unwrap();
    let expected = dense_matvec(&to_dense(&m), &x);
    for (a, b) in y.iter().zip(&expected) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
fn test_amul_with_cyclic_interface() {
    // Periodic chain of five cells: the wrap-around face 4 -> 0 is carried
    // by a pair of cyclic interfaces.
    let addr = LduAddressing::new(5, vec![0, 1, 2, 3], vec![1, 2, 3, 4]).unwrap();
    let interfaces = vec![
        LduInterface::cyclic("left", 1, true, vec![0]),
        LduInterface::cyclic("right", 0, false, vec![4]),
    ];
    let mesh = Arc::new(LduMesh::new(addr, interfaces, Arc::new(SerialComm::new())).unwrap());
    let m = LduMatrix::new_symmetric(mesh, vec![2.0; 5], vec![-1.0; 4])
        .unwrap()
        .with_interface_coeffs(vec![vec![1.0], vec![1.0]])
        .unwrap();

    let x = [1.0, 2.0, 3.0, 4.0, 5.0];
    let mut y = vec![0.0; 5];
    m.amul(&x, &mut y).unwrap();
    assert_eq!(y, vec![2.0 - 2.0 - 5.0, 0.0, 0.0, 0.0, 10.0 - 4.0 - 1.0]);

    // A periodic Laplacian annihilates constants.
    let mut y = vec![0.0; 5];
    m.amul(&[3.0; 5], &mut y).unwrap();
    assert!(y.iter().all(|v| v.abs() < 1e-14));
    assert!(m.sum_a().iter().all(|v| v.abs() < 1e-14));
}

// ---------------------------------------------------------------------------
// Residual and normalisation
// ---------------------------------------------------------------------------

#[test]
fn test_residual_is_source_minus_product() {
    let (m, source) = laplace(Grid2d::new(4, 4), saddle);
    let psi = random_vector(16, 5);
    let mut r = vec![0.0; 16];
    m.residual(&psi, &source, &mut r).unwrap();
    let a_psi = dense_matvec(&to_dense(&m), &psi);
    for ((ri, s), ap) in r.iter().zip(&source).zip(&a_psi) {
        assert_relative_eq!(*ri, s - ap, epsilon = 1e-12);
    }
}

#[test]
fn test_normalised_residual_is_scale_invariant() {
    let (m, source) = laplace(Grid2d::new(6, 6), saddle);
    let psi = random_vector(36, 9);

    let normalised = |scale: f64| {
        let psi: Vec<f64> = psi.iter().map(|p| p * scale).collect();
        let source: Vec<f64> = source.iter().map(|s| s * scale).collect();
        let mut a_psi = vec![0.0; 36];
        m.amul(&psi, &mut a_psi).unwrap();
        let nf = m.norm_factor(&psi, &source, &a_psi, ResidualNorm::L1).unwrap();
        let mut r = vec![0.0; 36];
        m.residual(&psi, &source, &mut r).unwrap();
        m.global_norm(&r, ResidualNorm::L1).unwrap() / nf
    };
    assert_relative_eq!(normalised(1.0), normalised(1000.0), max_relative = 1e-9);
}

#[test]
fn test_mismatched_field_length_is_rejected() {
    let m = LduMatrix::new_symmetric(chain_mesh(3), vec![2.0; 3], vec![-1.0; 2]).unwrap();
    let mut y = vec![0.0; 3];
    assert!(m.amul(&[1.0, 2.0], &mut y).is_err());
    assert!(LduMatrix::new_symmetric(chain_mesh(3), vec![2.0; 3], vec![-1.0; 3]).is_err());
}
