//! Small dense linear-algebra kernels over `ndarray`.
//!
//! Covariances in a mixture are D×D with D usually below a few dozen, so
//! straightforward O(D³) routines are sufficient: a Cholesky factorization,
//! the two triangular solves it needs, and a cyclic Jacobi eigensolver for
//! principal axes. Nothing here inverts a matrix explicitly.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Maximum Jacobi sweeps before giving up on further off-diagonal reduction.
const JACOBI_MAX_SWEEPS: usize = 64;

/// Off-diagonal Frobenius norm (relative to the full norm) treated as zero.
const JACOBI_TOLERANCE: f64 = 1e-14;

/// Return `(a + aᵀ) / 2`.
pub fn symmetrize(a: ArrayView2<'_, f64>) -> Array2<f64> {
    let t = a.t();
    (&a + &t) * 0.5
}

/// Lower-triangular Cholesky factor `L` with `L Lᵀ = a`.
///
/// Returns `None` when `a` is not square, contains non-finite values, or is
/// not numerically positive-definite (a pivot is not strictly positive).
/// Only the lower triangle of `a` is read.
pub fn cholesky(a: ArrayView2<'_, f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut pivot = a[[j, j]];
        for k in 0..j {
            pivot -= l[[j, k]] * l[[j, k]];
        }
        if !(pivot > 0.0) || !pivot.is_finite() {
            return None;
        }
        let ljj = pivot.sqrt();
        l[[j, j]] = ljj;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            let v = s / ljj;
            if !v.is_finite() {
                return None;
            }
            l[[i, j]] = v;
        }
    }
    Some(l)
}

/// Solve `L x = b` by forward substitution. `l` must be lower-triangular with
/// a non-zero diagonal.
pub fn solve_lower(l: ArrayView2<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Solve `Lᵀ x = b` by back substitution, reading only the lower triangle.
pub fn solve_lower_transpose(l: ArrayView2<'_, f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = b[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Eigendecomposition of a symmetric matrix.
#[derive(Clone, Debug)]
pub struct SymmetricEigen {
    /// Eigenvalues in descending order.
    pub eigenvalues: Array1<f64>,
    /// Unit eigenvectors as columns, matching `eigenvalues`.
    pub eigenvectors: Array2<f64>,
}

impl SymmetricEigen {
    /// Decompose `a` (assumed symmetric) with cyclic Jacobi rotations.
    pub fn new(a: ArrayView2<'_, f64>) -> Self {
        let n = a.nrows();
        let mut m = symmetrize(a);
        let mut v = Array2::<f64>::eye(n);

        let total: f64 = m.iter().map(|x| x * x).sum::<f64>().sqrt();
        for _ in 0..JACOBI_MAX_SWEEPS {
            let off: f64 = off_diagonal_norm(&m);
            if off <= JACOBI_TOLERANCE * total.max(f64::MIN_POSITIVE) {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    let apq = m[[p, q]];
                    if apq == 0.0 {
                        continue;
                    }
                    let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                    // signum(0.0) is 1.0, so equal diagonals rotate by π/4.
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;
                    rotate(&mut m, &mut v, p, q, c, s);
                }
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| m[[j, j]].total_cmp(&m[[i, i]]));

        let eigenvalues = Array1::from_iter(order.iter().map(|&i| m[[i, i]]));
        let mut eigenvectors = Array2::<f64>::zeros((n, n));
        for (dst, &src) in order.iter().enumerate() {
            eigenvectors.column_mut(dst).assign(&v.column(src));
        }
        Self {
            eigenvalues,
            eigenvectors,
        }
    }
}

fn off_diagonal_norm(m: &Array2<f64>) -> f64 {
    let n = m.nrows();
    let mut s = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                s += m[[i, j]] * m[[i, j]];
            }
        }
    }
    s.sqrt()
}

/// Apply the Jacobi rotation `J(p, q, θ)` as `m ← Jᵀ m J`, `v ← v J`.
fn rotate(m: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize, c: f64, s: f64) {
    let n = m.nrows();
    for k in 0..n {
        let mkp = m[[k, p]];
        let mkq = m[[k, q]];
        m[[k, p]] = c * mkp - s * mkq;
        m[[k, q]] = s * mkp + c * mkq;
    }
    for k in 0..n {
        let mpk = m[[p, k]];
        let mqk = m[[q, k]];
        m[[p, k]] = c * mpk - s * mqk;
        m[[q, k]] = s * mpk + c * mqk;
    }
    for k in 0..n {
        let vkp = v[[k, p]];
        let vkq = v[[k, q]];
        v[[k, p]] = c * vkp - s * vkq;
        v[[k, q]] = s * vkp + c * vkq;
    }
}

/// Natural log of `n!`, summed directly.
pub fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.5], [0.6, 1.5, 3.0]];
        let l = cholesky(a.view()).expect("positive-definite");
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
        assert_eq!(l[[0, 1]], 0.0);
        assert_eq!(l[[1, 2]], 0.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite_and_singular() {
        assert!(cholesky(array![[1.0, 2.0], [2.0, 1.0]].view()).is_none());
        assert!(cholesky(array![[1.0, 1.0], [1.0, 1.0]].view()).is_none());
        assert!(cholesky(array![[f64::NAN, 0.0], [0.0, 1.0]].view()).is_none());
        assert!(cholesky(Array2::<f64>::zeros((2, 3)).view()).is_none());
    }

    #[test]
    fn test_triangular_solves_invert_factor() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(a.view()).unwrap();
        let b = array![1.0, -2.0];
        // a x = b  ⇔  L (Lᵀ x) = b
        let y = solve_lower(l.view(), b.view());
        let x = solve_lower_transpose(l.view(), y.view());
        let check = a.dot(&x);
        assert_abs_diff_eq!(check[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(check[1], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_eigen_of_diagonal_is_sorted() {
        let e = SymmetricEigen::new(array![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 2.0]].view());
        assert_abs_diff_eq!(e.eigenvalues[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.eigenvalues[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.eigenvalues[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e.eigenvectors[[1, 0]].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_eigen_principal_axis_of_correlated_matrix() {
        // Eigenvalues 3 and 1, principal axis along (1, 1)/√2.
        let e = SymmetricEigen::new(array![[2.0, 1.0], [1.0, 2.0]].view());
        assert_abs_diff_eq!(e.eigenvalues[0], 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(e.eigenvalues[1], 1.0, epsilon = 1e-10);
        let v = e.eigenvectors.column(0);
        let h = 0.5_f64.sqrt();
        assert_abs_diff_eq!(v[0].abs(), h, epsilon = 1e-10);
        assert_abs_diff_eq!(v[1].abs(), h, epsilon = 1e-10);
        assert!(v[0] * v[1] > 0.0);
    }

    #[test]
    fn test_eigen_reconstructs_dense_matrix() {
        let a = array![[5.0, 1.0, -0.5], [1.0, 4.0, 0.25], [-0.5, 0.25, 2.0]];
        let e = SymmetricEigen::new(a.view());
        let lambda = Array2::from_diag(&e.eigenvalues);
        let back = e.eigenvectors.dot(&lambda).dot(&e.eigenvectors.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_ln_factorial() {
        assert_eq!(ln_factorial(0), 0.0);
        assert_eq!(ln_factorial(1), 0.0);
        assert_abs_diff_eq!(ln_factorial(5), 120.0_f64.ln(), epsilon = 1e-12);
    }
}
