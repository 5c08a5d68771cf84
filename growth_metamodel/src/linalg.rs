/// linalg.rs — Dense linear-algebra kernel
///
/// Everything here operates on small per-block matrices (observation counts
/// per age/output-type bucket rarely exceed a few dozen rows), so there is
/// no need for anything beyond `ndarray` with naive O(k^3) routines. The one
/// piece of domain-specific math is the AR(1) correlation matrix and its
/// closed-form tridiagonal inverse, which avoids a general matrix inversion
/// at every sampler step.
use ndarray::{Array1, Array2};

/// AR(1) correlation matrix over unit integer lag: `R[i][j] = rho^|i-j|`.
pub fn ar1_correlation(k: usize, rho: f64) -> Array2<f64> {
    let mut r = Array2::zeros((k, k));
    for i in 0..k {
        for j in 0..k {
            let d = (i as isize - j as isize).unsigned_abs() as i32;
            r[[i, j]] = rho.powi(d);
        }
    }
    r
}

/// Closed-form inverse of the k x k AR(1) correlation matrix.
///
/// For k == 1 the correlation matrix is degenerate (identity); for k >= 2
/// the inverse is tridiagonal:
///   diag    = [1, 1+rho^2, ..., 1+rho^2, 1] / (1 - rho^2)
///   offdiag = -rho / (1 - rho^2)
pub fn ar1_inverse(k: usize, rho: f64) -> Array2<f64> {
    if k == 0 {
        return Array2::zeros((0, 0));
    }
    if k == 1 {
        return Array2::eye(1);
    }
    let denom = 1.0 - rho * rho;
    let mut inv = Array2::zeros((k, k));
    for i in 0..k {
        let diag = if i == 0 || i == k - 1 {
            1.0 / denom
        } else {
            (1.0 + rho * rho) / denom
        };
        inv[[i, i]] = diag;
        if i + 1 < k {
            let off = -rho / denom;
            inv[[i, i + 1]] = off;
            inv[[i + 1, i]] = off;
        }
    }
    inv
}

/// log|R| for the k x k AR(1) correlation matrix: `(k-1) * log(1 - rho^2)`.
pub fn ar1_log_det(k: usize, rho: f64) -> f64 {
    if k <= 1 {
        return 0.0;
    }
    (k as f64 - 1.0) * (1.0 - rho * rho).ln()
}

/// Elementwise (Hadamard) product of two equally-shaped matrices.
pub fn hadamard(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    a * b
}

/// Quadratic form `x^T A x` for a column vector `x`.
pub fn quadratic_form(x: &Array1<f64>, a: &Array2<f64>) -> f64 {
    x.dot(&a.dot(x))
}

/// Assemble a block-diagonal matrix from a list of (possibly differently
/// sized) square blocks, in the order given. Used to build the global
/// residual covariance (C3 step 6) from per-ResultSet contributions.
pub fn block_diagonal(blocks: &[Array2<f64>]) -> Array2<f64> {
    let total: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = Array2::zeros((total, total));
    let mut offset = 0;
    for b in blocks {
        let k = b.nrows();
        for i in 0..k {
            for j in 0..k {
                out[[offset + i, offset + j]] = b[[i, j]];
            }
        }
        offset += k;
    }
    out
}

/// Lower-triangular Cholesky factor `L` such that `L * L^T = a`, for a
/// symmetric positive-(semi)definite `a`. Used to draw correlated Monte
/// Carlo parameter samples from `N(mean, cov)`. A non-positive pivot
/// is clamped to zero rather than failing: the covariance submatrix fed in
/// here is a sample covariance and can be slightly rank-deficient when the
/// thinned sample is small.
pub fn cholesky_lower(a: &Array2<f64>) -> Array2<f64> {
    let k = a.nrows();
    let mut l = Array2::zeros((k, k));
    for i in 0..k {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for m in 0..j {
                sum -= l[[i, m]] * l[[j, m]];
            }
            if i == j {
                l[[i, j]] = sum.max(0.0).sqrt();
            } else if l[[j, j]] > 0.0 {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    l
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matmul_close_to_identity(k: usize, rho: f64, tol: f64) {
        let r = ar1_correlation(k, rho);
        let r_inv = ar1_inverse(k, rho);
        let prod = r.dot(&r_inv);
        for i in 0..k {
            for j in 0..k {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (prod[[i, j]] - expected).abs() < tol,
                    "k={k} rho={rho} i={i} j={j} prod={}",
                    prod[[i, j]]
                );
            }
        }
    }

    #[test]
    fn ar1_inverse_round_trip_various_sizes_and_rho() {
        for &k in &[1usize, 2, 3, 5, 10] {
            for &rho in &[0.8, 0.9, 0.95, 0.995] {
                matmul_close_to_identity(k, rho, 1e-8);
            }
        }
    }

    #[test]
    fn ar1_log_det_matches_numeric_determinant_for_small_k() {
        // For k=2: R = [[1, rho],[rho,1]], det = 1 - rho^2.
        let rho = 0.9;
        let expected = (1.0 - rho * rho).ln();
        assert!((ar1_log_det(2, rho) - expected).abs() < 1e-12);
    }

    #[test]
    fn ar1_degenerate_block_size_one() {
        let r = ar1_correlation(1, 0.9);
        assert_eq!(r[[0, 0]], 1.0);
        assert_eq!(ar1_log_det(1, 0.9), 0.0);
    }

    #[test]
    fn cholesky_reconstructs_spd_matrix() {
        let a = ndarray::arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let l = cholesky_lower(&a);
        let reconstructed = l.dot(&l.t());
        for i in 0..2 {
            for j in 0..2 {
                assert!((reconstructed[[i, j]] - a[[i, j]]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn block_diagonal_assembly_preserves_blocks() {
        let a = Array2::from_elem((2, 2), 1.0);
        let b = Array2::from_elem((1, 1), 2.0);
        let joined = block_diagonal(&[a, b]);
        assert_eq!(joined.shape(), &[3, 3]);
        assert_eq!(joined[[0, 0]], 1.0);
        assert_eq!(joined[[2, 2]], 2.0);
        assert_eq!(joined[[0, 2]], 0.0);
    }
}
