//! Dense kernels shared by the sample generator, the secant updates and the
//! trust-region solvers.
//!
//! Matrices live in `ndarray` throughout the crate. Symmetric eigenproblems are
//! handed to `nalgebra` by copying into a `DMatrix` and back.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

const EIGEN_MAX_SWEEPS: usize = 10_000;
const REDRAW_LIMIT: usize = 8;

#[inline]
pub(crate) fn norm(v: ArrayView1<'_, f64>) -> f64 {
    v.dot(&v).sqrt()
}

// Simple dense SPD Cholesky (LL^T) and solve utilities
pub(crate) fn chol_decompose(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

pub(crate) fn chol_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    // Forward solve: L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    // Backward solve: L^T x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Eigenpairs of a symmetric matrix, eigenvectors stored column-wise.
pub(crate) struct SymEigen {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

/// Symmetric eigendecomposition of `a`, reading only its lower triangle.
///
/// Returns `None` when the iteration does not converge or the input holds
/// non-finite entries.
pub(crate) fn sym_eigen(a: &Array2<f64>) -> Option<SymEigen> {
    let n = a.nrows();
    if a.ncols() != n || a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let dm = DMatrix::from_fn(n, n, |i, j| if i >= j { a[[i, j]] } else { a[[j, i]] });
    let eig = SymmetricEigen::try_new(dm, f64::EPSILON, EIGEN_MAX_SWEEPS)?;
    let values = Array1::from_shape_fn(n, |i| eig.eigenvalues[i]);
    let vectors = Array2::from_shape_fn((n, n), |(i, j)| eig.eigenvectors[(i, j)]);
    Some(SymEigen { values, vectors })
}

/// Symmetric part `(a + aᵀ) / 2`.
pub(crate) fn sym(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| 0.5 * (a[[i, j]] + a[[j, i]]))
}

/// Moore–Penrose pseudoinverse of a symmetric matrix in factored form.
///
/// Eigenvalues with `|λ| <= rel_tol * max|λ|` are treated as zero. The result
/// is returned as `(Q_r, d)` with `A⁺ = Q_r diag(d) Q_rᵀ`, keeping only the
/// retained eigenvectors. `None` when the eigendecomposition fails.
pub(crate) fn pinv_sym_factors(a: &Array2<f64>, rel_tol: f64) -> Option<(Array2<f64>, Array1<f64>)> {
    let SymEigen { values, vectors } = sym_eigen(a)?;
    let lambda_max = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let cutoff = rel_tol * lambda_max;
    let keep: Vec<usize> = (0..values.len())
        .filter(|&i| lambda_max > 0.0 && values[i].abs() > cutoff)
        .collect();
    let dropped = values.len() - keep.len();
    if dropped > 0 && lambda_max > 0.0 {
        log::trace!(
            "[BlockOpt] pseudoinverse dropped {} of {} directions below {:.3e}",
            dropped,
            values.len(),
            cutoff
        );
    }
    let q = Array2::from_shape_fn((vectors.nrows(), keep.len()), |(i, j)| vectors[[i, keep[j]]]);
    let d = Array1::from_iter(keep.iter().map(|&i| 1.0 / values[i]));
    Some((q, d))
}

/// Moore–Penrose pseudoinverse of a symmetric matrix, assembled densely.
pub(crate) fn pinv_sym(a: &Array2<f64>, rel_tol: f64) -> Option<Array2<f64>> {
    let (q, d) = pinv_sym_factors(a, rel_tol)?;
    Some(weighted_gram(&q, &d))
}

/// `Σ_j d_j w_j w_jᵀ` for the columns `w_j` of `w`.
///
/// Only the upper triangle is accumulated; the lower triangle is a mirror of
/// it, so the result is symmetric bit for bit.
pub(crate) fn weighted_gram(w: &Array2<f64>, d: &Array1<f64>) -> Array2<f64> {
    let n = w.nrows();
    let mut out = Array2::<f64>::zeros((n, n));
    for (j, &dj) in d.iter().enumerate() {
        if dj == 0.0 {
            continue;
        }
        let col = w.column(j);
        for a in 0..n {
            let wa = dj * col[a];
            if wa == 0.0 {
                continue;
            }
            for b in a..n {
                out[[a, b]] += wa * col[b];
            }
        }
    }
    for a in 0..n {
        for b in 0..a {
            out[[a, b]] = out[[b, a]];
        }
    }
    out
}

/// An `n x m` block of independent standard normal draws.
pub(crate) fn gaussian<R: Rng>(rng: &mut R, n: usize, m: usize) -> Array2<f64> {
    Array2::from_shape_simple_fn((n, m), || standard_normal(rng))
}

// Box–Muller on two uniforms; the first is mapped into (0, 1] to keep ln finite.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Remove the components of every column of `m` lying in the span of the
/// orthonormal columns of `basis`.
pub(crate) fn project_out(basis: &Array2<f64>, m: &Array2<f64>) -> Array2<f64> {
    m - &basis.dot(&basis.t().dot(m))
}

/// Orthonormalize the columns of `cols` in order with modified Gram–Schmidt,
/// applied twice per column.
///
/// The first column keeps its direction. A column that collapses after
/// projection is replaced with a fresh Gaussian draw, so the result always has
/// `cols.ncols()` orthonormal columns provided `cols.ncols() <= cols.nrows()`.
pub(crate) fn orthonormalize<R: Rng>(rng: &mut R, cols: &Array2<f64>) -> Array2<f64> {
    let (n, m) = cols.dim();
    debug_assert!(m <= n);
    let mut q = Array2::<f64>::zeros((n, m));
    for j in 0..m {
        let mut v = cols.column(j).to_owned();
        let mut attempts = 0;
        loop {
            let scale = norm(v.view()).max(f64::MIN_POSITIVE);
            for _ in 0..2 {
                for i in 0..j {
                    let qi = q.column(i);
                    let c = qi.dot(&v);
                    v.scaled_add(-c, &qi);
                }
            }
            let len = norm(v.view());
            if len.is_finite() && len > 1e-10 * scale {
                q.column_mut(j).assign(&(v / len));
                break;
            }
            attempts += 1;
            if attempts > REDRAW_LIMIT {
                // Deterministic fallback: the coordinate axis least covered so far.
                v = fallback_axis(&q, j);
                continue;
            }
            v = gaussian(rng, n, 1).column(0).to_owned();
        }
    }
    q
}

fn fallback_axis(q: &Array2<f64>, filled: usize) -> Array1<f64> {
    let n = q.nrows();
    let mut best = Array1::<f64>::zeros(n);
    let mut best_len = -1.0;
    for axis in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[axis] = 1.0;
        for i in 0..filled {
            let qi = q.column(i);
            let c = qi.dot(&e);
            e.scaled_add(-c, &qi);
        }
        let len = norm(e.view());
        if len > best_len {
            best_len = len;
            best = e;
        }
    }
    best
}
