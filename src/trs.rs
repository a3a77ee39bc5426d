//! Trust-region subproblem: minimize `m(p) = gᵀp + ½ pᵀH⁻¹p` subject to `‖p‖ ≤ Δ`,
//! where `H` is the inverse Hessian approximation kept by the updates.

use crate::error::{BlockOptError, Result};
use crate::linalg::{chol_decompose, chol_solve, norm, pinv_sym, sym_eigen};
use ndarray::{Array1, Array2};

const SECULAR_MAX_ITERS: usize = 200;
const SECULAR_RTOL: f64 = 1e-10;

/// Minimizer of the local model with its predicted reduction `-m(p)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrsStep {
    pub step: Array1<f64>,
    pub predicted_reduction: f64,
}

/// Solves the trust-region subproblem for a symmetric, possibly indefinite,
/// inverse Hessian approximation `H`.
///
/// Implementations must return a step with `‖p‖ ≤ Δ`.
pub trait TrustRegionSolver: Send + Sync {
    fn solve(&self, g: &Array1<f64>, h: &Array2<f64>, delta: f64) -> Result<TrsStep>;
}

fn check_inputs(g: &Array1<f64>, h: &Array2<f64>, delta: f64) -> Result<()> {
    if h.dim() != (g.len(), g.len()) {
        return Err(BlockOptError::DimensionMismatch {
            expected: g.len(),
            got: h.nrows(),
        });
    }
    if !(delta.is_finite() && delta > 0.0) {
        return Err(BlockOptError::SubproblemFailure(format!(
            "radius must be positive and finite, got {delta}"
        )));
    }
    if g.iter().any(|v| !v.is_finite()) {
        return Err(BlockOptError::SubproblemFailure(
            "gradient holds non-finite entries".to_string(),
        ));
    }
    Ok(())
}

/// Exact solver through the eigendecomposition `H = Q M Qᵀ`.
///
/// The model Hessian is `Q M⁻¹ Qᵀ`; eigenvalues of `H` at roundoff level
/// stand for unbounded curvature and the step has no component along them.
/// Finds `μ ≥ max(0, -λ_min)` with `(H⁻¹ + μI) p = -g` and `μ (Δ - ‖p‖) = 0`
/// by safeguarded Newton iteration on `1/‖p(μ)‖ - 1/Δ`, covering the hard
/// case where `g` has no component along the leftmost eigenspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct EigenTrs;

impl TrustRegionSolver for EigenTrs {
    fn solve(&self, g: &Array1<f64>, h: &Array2<f64>, delta: f64) -> Result<TrsStep> {
        check_inputs(g, h, delta)?;
        let eig = sym_eigen(h).ok_or_else(|| {
            BlockOptError::SubproblemFailure(
                "eigendecomposition of the inverse Hessian approximation did not converge"
                    .to_string(),
            )
        })?;
        let h_scale = eig.values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let keep: Vec<usize> = (0..eig.values.len())
            .filter(|&i| eig.values[i].abs() > f64::EPSILON * h_scale)
            .collect();
        if keep.is_empty() {
            return Err(BlockOptError::SubproblemFailure(
                "inverse Hessian approximation vanished".to_string(),
            ));
        }
        let n = keep.len();
        let lam = Array1::from_iter(keep.iter().map(|&i| 1.0 / eig.values[i]));
        let q = Array2::from_shape_fn((g.len(), n), |(r, c)| eig.vectors[[r, keep[c]]]);
        let gt = q.t().dot(g);

        let (imin, lam_min) = lam
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, l)| if l < best.1 { (i, l) } else { best });
        let lam_scale = lam.iter().fold(1.0_f64, |m, l| m.max(l.abs()));
        let gnorm = norm(gt.view());

        let finish = |pt: Array1<f64>| -> TrsStep {
            let pred = -pt
                .iter()
                .zip(gt.iter())
                .zip(lam.iter())
                .map(|((p, g), l)| g * p + 0.5 * l * p * p)
                .sum::<f64>();
            TrsStep {
                step: q.dot(&pt),
                predicted_reduction: pred,
            }
        };

        if gnorm == 0.0 {
            let mut pt = Array1::<f64>::zeros(n);
            if lam_min < 0.0 {
                pt[imin] = delta;
            }
            return Ok(finish(pt));
        }

        if lam_min > 0.0 {
            let newton = Array1::from_shape_fn(n, |i| -gt[i] / lam[i]);
            if norm(newton.view()) <= delta {
                return Ok(finish(newton));
            }
        }

        let lo = (-lam_min).max(0.0);
        let p_at = |mu: f64| Array1::from_shape_fn(n, |i| {
            let d = lam[i] + mu;
            if d > 0.0 {
                -gt[i] / d
            } else {
                0.0
            }
        });

        // Hard case: g is (numerically) orthogonal to the leftmost eigenspace
        // and the remaining components cannot reach the boundary at μ = lo.
        if lam_min <= 0.0 {
            let near = |i: usize| lam[i] - lam_min <= 1e-12 * lam_scale;
            let orthogonal = (0..n)
                .filter(|&i| near(i))
                .all(|i| gt[i].abs() <= 1e-12 * gnorm.max(1.0));
            if orthogonal {
                let mut pt = Array1::from_shape_fn(n, |i| {
                    let d = lam[i] + lo;
                    if near(i) || d <= 0.0 {
                        0.0
                    } else {
                        -gt[i] / d
                    }
                });
                let rest = norm(pt.view());
                if rest < delta {
                    let tau = (delta * delta - rest * rest).sqrt();
                    pt[imin] += tau;
                    return Ok(finish(pt));
                }
            }
        }

        let mut a = lo;
        let mut b = lo + gnorm / delta;
        let mut mu = b;
        let mut pt = p_at(mu);
        for _ in 0..SECULAR_MAX_ITERS {
            let pn = norm(pt.view());
            if (pn - delta).abs() <= SECULAR_RTOL * delta {
                break;
            }
            if pn > delta {
                a = mu;
            } else {
                b = mu;
            }
            // φ(μ) = 1/‖p‖ - 1/Δ,  φ'(μ) = (Σ g̃²/(λ+μ)³) / ‖p‖³
            let dphi = (0..n)
                .map(|i| {
                    let d = lam[i] + mu;
                    if d > 0.0 {
                        gt[i] * gt[i] / (d * d * d)
                    } else {
                        0.0
                    }
                })
                .sum::<f64>()
                / (pn * pn * pn);
            let phi = 1.0 / pn - 1.0 / delta;
            let newton = mu - phi / dphi;
            mu = if dphi > 0.0 && newton.is_finite() && newton > a && newton < b {
                newton
            } else {
                0.5 * (a + b)
            };
            if b - a <= f64::EPSILON * b.max(1.0) {
                mu = b;
                pt = p_at(mu);
                break;
            }
            pt = p_at(mu);
        }
        let pn = norm(pt.view());
        if !pn.is_finite() {
            return Err(BlockOptError::SubproblemFailure(
                "secular equation produced a non-finite step".to_string(),
            ));
        }
        if pn > delta {
            pt *= delta / pn;
        }
        Ok(finish(pt))
    }
}

/// Powell dogleg on the Cholesky factor of `H`.
///
/// The quasi-Newton step is `-H g` and model curvature is applied through
/// solves with the factor. When `H` is not positive definite the step is the
/// Cauchy point along `-g` under the pseudoinverse of `H`, which always lies
/// inside the region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dogleg;

// The model Hessian `H⁻¹`, either through the Cholesky factor of `H` or densely.
enum ModelHessian {
    Factor(Array2<f64>),
    Dense(Array2<f64>),
}

impl ModelHessian {
    fn apply(&self, v: &Array1<f64>) -> Array1<f64> {
        match self {
            ModelHessian::Factor(l) => chol_solve(l, v),
            ModelHessian::Dense(b) => b.dot(v),
        }
    }
}

impl TrustRegionSolver for Dogleg {
    fn solve(&self, g: &Array1<f64>, h: &Array2<f64>, delta: f64) -> Result<TrsStep> {
        check_inputs(g, h, delta)?;
        let gnorm = norm(g.view());
        if gnorm == 0.0 {
            return Ok(TrsStep {
                step: Array1::zeros(g.len()),
                predicted_reduction: 0.0,
            });
        }
        let model = match chol_decompose(h) {
            Some(l) => ModelHessian::Factor(l),
            None => ModelHessian::Dense(pinv_sym(h, f64::EPSILON).ok_or_else(|| {
                BlockOptError::SubproblemFailure(
                    "eigendecomposition of the inverse Hessian approximation did not converge"
                        .to_string(),
                )
            })?),
        };
        let gbg = g.dot(&model.apply(g));
        let step = match &model {
            ModelHessian::Factor(_) if gbg > 0.0 => {
                let p_b = -h.dot(g);
                if norm(p_b.view()) <= delta {
                    p_b
                } else {
                    let p_u = g * (-(gnorm * gnorm) / gbg);
                    let pu_norm = norm(p_u.view());
                    if pu_norm >= delta {
                        g * (-delta / gnorm)
                    } else {
                        // Root of ‖p_u + t (p_b - p_u)‖ = Δ in (0, 1].
                        let d = &p_b - &p_u;
                        let a = d.dot(&d);
                        let b = 2.0 * p_u.dot(&d);
                        let c = pu_norm * pu_norm - delta * delta;
                        let disc = (b * b - 4.0 * a * c).max(0.0);
                        let t = ((-b + disc.sqrt()) / (2.0 * a)).clamp(0.0, 1.0);
                        &p_u + &(d * t)
                    }
                }
            }
            _ => {
                let tau = if gbg > 0.0 {
                    (gnorm.powi(3) / (delta * gbg)).min(1.0)
                } else {
                    1.0
                };
                g * (-tau * delta / gnorm)
            }
        };
        let mut step = step;
        let len = norm(step.view());
        if len > delta {
            step *= delta / len;
        }
        let predicted_reduction = -(g.dot(&step) + 0.5 * step.dot(&model.apply(&step)));
        Ok(TrsStep {
            step,
            predicted_reduction,
        })
    }
}
