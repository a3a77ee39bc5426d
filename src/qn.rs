//! Symmetric block quasi-Newton updates of the inverse Hessian approximation.
//!
//! Both formulas take the current approximation `H ≈ (∇²f)⁻¹`, a block of
//! directions `S` and the curvature samples `Y ≈ ∇²f S` taken along them, and
//! return a new symmetric approximation satisfying the inverse multi-secant
//! condition `H⁺ Y ≈ S` in the minimum-norm sense. Rank deficiency in the
//! secant system is handled by a relative-tolerance Moore–Penrose
//! pseudoinverse.

use crate::error::{BlockOptError, Result};
use crate::linalg::{pinv_sym, pinv_sym_factors, sym, sym_eigen, weighted_gram};
use ndarray::{Array1, Array2, Axis};

/// Block QN update formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QnUpdate {
    /// Algebraically minimal symmetric rank-`s` update, `H + R (RᵀY)⁺ Rᵀ`.
    #[default]
    Sr1,
    /// Generalized Powell-Symmetric-Broyden update.
    Psb,
}

impl QnUpdate {
    /// Returns the updated approximation, mapping each column of `y` onto the
    /// matching column of `s`.
    ///
    /// `s` and `y` are `n x s`; `delta_tol` is the relative cutoff applied to
    /// the eigenvalues of the `s x s` middle matrix before inversion.
    pub fn apply(
        self,
        h: &Array2<f64>,
        s: &Array2<f64>,
        y: &Array2<f64>,
        delta_tol: f64,
    ) -> Result<Array2<f64>> {
        debug_assert_eq!(s.dim(), y.dim());
        debug_assert_eq!(h.nrows(), y.nrows());
        let r = s - &h.dot(y);
        match self {
            QnUpdate::Sr1 => sr1(h, &r, y, delta_tol),
            QnUpdate::Psb => psb(h, &r, y, delta_tol),
        }
    }

    /// Single-secant form of [`apply`](Self::apply) for step `p` with gradient change `y`.
    pub fn apply_secant(
        self,
        h: &Array2<f64>,
        p: &Array1<f64>,
        y: &Array1<f64>,
        delta_tol: f64,
    ) -> Result<Array2<f64>> {
        if y.len() != p.len() {
            return Err(BlockOptError::DimensionMismatch {
                expected: p.len(),
                got: y.len(),
            });
        }
        let s = p.clone().insert_axis(Axis(1));
        let y = y.clone().insert_axis(Axis(1));
        self.apply(h, &s, &y, delta_tol)
    }
}

fn pinv_failure(size: usize) -> BlockOptError {
    BlockOptError::PseudoinverseFailure { size }
}

// H⁺ = H + R M⁺ Rᵀ with R = S − H Y, M = sym(RᵀY).
fn sr1(h: &Array2<f64>, r: &Array2<f64>, y: &Array2<f64>, delta_tol: f64) -> Result<Array2<f64>> {
    let s = y.ncols();
    let m = sym(&r.t().dot(y));
    let (q, d) = pinv_sym_factors(&m, delta_tol).ok_or_else(|| pinv_failure(s))?;
    let w = r.dot(&q);
    Ok(h + &weighted_gram(&w, &d))
}

// H⁺ = H + E + Eᵀ − (YP) M (YP)ᵀ with P = (YᵀY)⁺, E = R P Yᵀ, M = sym(YᵀR).
fn psb(h: &Array2<f64>, r: &Array2<f64>, y: &Array2<f64>, delta_tol: f64) -> Result<Array2<f64>> {
    let s = y.ncols();
    let p = pinv_sym(&y.t().dot(y), delta_tol).ok_or_else(|| pinv_failure(s))?;
    let yp = y.dot(&p);
    let e = r.dot(&yp.t());
    let m = sym(&y.t().dot(r));
    // M is symmetric, so factor it once and assemble the last term as Σ λ_j w_j w_jᵀ.
    let inner = sym_eigen(&m).ok_or_else(|| pinv_failure(s))?;
    let w = yp.dot(&inner.vectors);
    let correction = weighted_gram(&w, &inner.values);
    let n = h.nrows();
    let mut out = h.clone();
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] += (e[[i, j]] + e[[j, i]]) - correction[[i, j]];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{gaussian, orthonormalize};
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn target() -> Array2<f64> {
        array![[2.0, 1.0, 0.0], [1.0, 3.0, 0.0], [0.0, 0.0, 1.0]]
    }

    fn assert_matrix_eq(a: &Array2<f64>, b: &Array2<f64>, eps: f64) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = eps);
        }
    }

    fn assert_exactly_symmetric(a: &Array2<f64>) {
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_eq!(a[[i, j]].to_bits(), a[[j, i]].to_bits());
            }
        }
    }

    // n = 3, s = 2: Y = [e1 e2], S = A Y. Starting from H = I, both formulas
    // land exactly on A (hand computation: R = [[1,1],[1,2],[0,0]],
    // RᵀY = [[1,1],[1,2]], (RᵀY)⁻¹ = [[2,-1],[-1,1]], R (RᵀY)⁻¹ Rᵀ = A − I).
    #[test]
    fn small_example_recovers_closed_form() {
        let a = target();
        let y = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let s = a.dot(&y);
        let h = Array2::<f64>::eye(3);
        for formula in [QnUpdate::Sr1, QnUpdate::Psb] {
            let h_new = formula.apply(&h, &s, &y, 1e-12).unwrap();
            assert_matrix_eq(&h_new, &a, 1e-14);
            assert_matrix_eq(&h_new.dot(&y), &s, 1e-14);
            assert_exactly_symmetric(&h_new);
        }
    }

    #[test]
    fn rank_deficient_directions_use_pseudoinverse() {
        let a = target();
        let e1 = array![1.0, 0.0, 0.0];
        let y = array![[1.0, 1.0], [0.0, 0.0], [0.0, 0.0]];
        let s = a.dot(&y);
        let h = Array2::<f64>::eye(3);
        for formula in [QnUpdate::Sr1, QnUpdate::Psb] {
            let h_new = formula.apply(&h, &s, &y, 1e-12).unwrap();
            let he1 = h_new.dot(&e1);
            let ae1 = a.dot(&e1);
            for i in 0..3 {
                assert_relative_eq!(he1[i], ae1[i], epsilon = 1e-12);
            }
            assert_exactly_symmetric(&h_new);
        }
    }

    #[test]
    fn consistent_update_is_a_fixed_point() {
        let mut rng = StdRng::seed_from_u64(21);
        let b = gaussian(&mut rng, 6, 6);
        let a = &b + &b.t();
        let g = gaussian(&mut rng, 6, 2);
        let y = orthonormalize(&mut rng, &g);
        let s = a.dot(&y);
        for formula in [QnUpdate::Sr1, QnUpdate::Psb] {
            let h_new = formula.apply(&a, &s, &y, 1e-12).unwrap();
            assert_matrix_eq(&h_new, &a, 1e-12);
        }
    }

    #[test]
    fn random_updates_satisfy_secant_and_stay_symmetric() {
        let mut rng = StdRng::seed_from_u64(99);
        let n = 8;
        let b = gaussian(&mut rng, n, n);
        let a = b.t().dot(&b) + Array2::<f64>::eye(n);
        let mut h = Array2::<f64>::eye(n);
        for _ in 0..5 {
            let g = gaussian(&mut rng, n, 4);
            let y = orthonormalize(&mut rng, &g);
            let s = a.dot(&y);
            for formula in [QnUpdate::Sr1, QnUpdate::Psb] {
                let h_new = formula.apply(&h, &s, &y, 1e-12).unwrap();
                assert_exactly_symmetric(&h_new);
                assert_matrix_eq(&h_new.dot(&y), &s, 1e-6);
            }
            h = QnUpdate::Psb.apply(&h, &s, &y, 1e-12).unwrap();
        }
    }

    #[test]
    fn secant_update_matches_one_column_block() {
        let a = target();
        let y = array![0.0, 0.6, 0.8];
        let p = a.dot(&y);
        let h = Array2::<f64>::eye(3);
        for formula in [QnUpdate::Sr1, QnUpdate::Psb] {
            let h_new = formula.apply_secant(&h, &p, &y, 1e-12).unwrap();
            let hy = h_new.dot(&y);
            for i in 0..3 {
                assert_relative_eq!(hy[i], p[i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn non_finite_samples_fail_the_pseudoinverse() {
        let s = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let y = array![[f64::NAN, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let h = Array2::<f64>::eye(3);
        let err = QnUpdate::Sr1.apply(&h, &s, &y, 1e-12).unwrap_err();
        assert!(err.is_numeric());
    }
}
