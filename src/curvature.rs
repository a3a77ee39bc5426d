//! Hessian sampling: `U ≈ ∇²f(x) S` along a block of directions.

use crate::error::{BlockOptError, Result};
use crate::model::Model;
use ndarray::{Array1, Array2, Zip};
use std::fmt;
use std::sync::Arc;

/// Produces curvature samples of a model along given directions.
///
/// `g` is the gradient the caller already holds at `x`. Implementations must
/// return a matrix with the shape of `s`, column `j` holding an approximation
/// of `∇²f(x) s_j`.
pub trait HessianOracle: Send + Sync {
    fn sample(
        &self,
        model: &Model,
        x: &Array1<f64>,
        g: &Array1<f64>,
        s: &Array2<f64>,
    ) -> Result<Array2<f64>>;
}

// sqrt(f64::EPSILON) = 2⁻²⁶, the step finitediff uses.
const FORWARD_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// Gradient differencing along each sample direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FiniteDifference {
    /// `(∇f(x + h s_j) - g) / h`: one extra gradient per direction.
    #[default]
    Forward,
    /// Two extra gradients per direction, second-order accurate.
    Central,
}

impl HessianOracle for FiniteDifference {
    fn sample(
        &self,
        model: &Model,
        x: &Array1<f64>,
        g: &Array1<f64>,
        s: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        let mut u = Array2::<f64>::zeros(s.dim());
        match self {
            FiniteDifference::Forward => {
                if g.len() != x.len() {
                    return Err(BlockOptError::DimensionMismatch {
                        expected: x.len(),
                        got: g.len(),
                    });
                }
                let mut trial = Array1::<f64>::zeros(x.len());
                let mut g_trial = Array1::<f64>::zeros(x.len());
                for (j, dir) in s.columns().into_iter().enumerate() {
                    Zip::from(&mut trial)
                        .and(x)
                        .and(&dir)
                        .for_each(|p, &xi, &di| *p = xi + FORWARD_STEP * di);
                    model.grad_into(&mut g_trial, &trial)?;
                    Zip::from(u.column_mut(j))
                        .and(&g_trial)
                        .and(g)
                        .for_each(|uj, &gs, &g0| *uj = (gs - g0) / FORWARD_STEP);
                }
            }
            FiniteDifference::Central => {
                for (j, dir) in s.columns().into_iter().enumerate() {
                    let hv = model.hess_sample(x, &dir.to_owned())?;
                    u.column_mut(j).assign(&hv);
                }
            }
        }
        Ok(u)
    }
}

type HessVec = Arc<dyn Fn(&Array1<f64>, &Array1<f64>) -> Array1<f64> + Send + Sync>;

/// Exact Hessian-vector products `hv(x, d) = ∇²f(x) d` supplied by the caller.
#[derive(Clone)]
pub struct HessianVectorFn {
    hv: HessVec,
}

impl HessianVectorFn {
    pub fn new<F>(hv: F) -> Self
    where
        F: Fn(&Array1<f64>, &Array1<f64>) -> Array1<f64> + Send + Sync + 'static,
    {
        Self { hv: Arc::new(hv) }
    }
}

impl fmt::Debug for HessianVectorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HessianVectorFn")
    }
}

impl HessianOracle for HessianVectorFn {
    fn sample(
        &self,
        _model: &Model,
        x: &Array1<f64>,
        _g: &Array1<f64>,
        s: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        let n = x.len();
        let mut u = Array2::<f64>::zeros(s.dim());
        for (j, dir) in s.columns().into_iter().enumerate() {
            let hv = (self.hv)(x, &dir.to_owned());
            if hv.len() != n {
                return Err(BlockOptError::DimensionMismatch {
                    expected: n,
                    got: hv.len(),
                });
            }
            u.column_mut(j).assign(&hv);
        }
        Ok(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use spectral::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // f(x) = x0² + 3 x0 x1 + 2 x1² + x2⁴, ∇²f = [[2,3,0],[3,4,0],[0,0,12 x2²]]
    fn model() -> Model {
        let mut m = Model::new("poly");
        m.set_objective(|x: &Array1<f64>| {
            x[0] * x[0] + 3.0 * x[0] * x[1] + 2.0 * x[1] * x[1] + x[2].powi(4)
        });
        m.set_gradient(|out: &mut Array1<f64>, x: &Array1<f64>| {
            out[0] = 2.0 * x[0] + 3.0 * x[1];
            out[1] = 3.0 * x[0] + 4.0 * x[1];
            out[2] = 4.0 * x[2].powi(3);
        });
        m.set_initial_iterate(array![0.0, 0.0, 1.0]);
        m
    }

    fn exact(x: &Array1<f64>) -> Array2<f64> {
        array![[2.0, 3.0, 0.0], [3.0, 4.0, 0.0], [0.0, 0.0, 12.0 * x[2] * x[2]]]
    }

    #[test]
    fn finite_differences_match_exact_hessian() {
        let m = model();
        let x = array![0.5, -1.0, 1.0];
        let s = array![[1.0, 0.0], [0.0, 0.6], [0.0, 0.8]];
        let want = exact(&x).dot(&s);
        for (oracle, tol) in [(FiniteDifference::Forward, 1e-4), (FiniteDifference::Central, 1e-6)] {
            let g = m.grad(&x).unwrap();
            let u = oracle.sample(&m, &x, &g, &s).unwrap();
            assert_eq!(u.dim(), (3, 2));
            for (a, b) in u.iter().zip(want.iter()) {
                assert_relative_eq!(*a, *b, epsilon = tol);
            }
        }
    }

    #[test]
    fn closure_oracle_is_used_verbatim() {
        let m = model();
        let oracle = HessianVectorFn::new(|x: &Array1<f64>, d: &Array1<f64>| exact(x).dot(d));
        let x = array![0.0, 0.0, 2.0];
        let s = array![[0.0], [0.0], [1.0]];
        let u = oracle.sample(&m, &x, &array![0.0, 0.0, 32.0], &s).unwrap();
        assert_that!(u[[2, 0]]).is_equal_to(48.0);
    }

    #[test]
    fn closure_with_wrong_length_is_rejected() {
        let m = model();
        let oracle = HessianVectorFn::new(|_x: &Array1<f64>, _d: &Array1<f64>| array![1.0]);
        let s = array![[1.0], [0.0], [0.0]];
        let zero = array![0.0, 0.0, 0.0];
        assert!(oracle.sample(&m, &zero, &zero, &s).is_err());
    }

    #[test]
    fn missing_gradient_is_reported() {
        let m = Model::new("bare");
        let s = array![[1.0], [0.0]];
        let err = FiniteDifference::Forward
            .sample(&m, &array![0.0, 0.0], &array![0.0, 0.0], &s)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    fn counted_model(calls: Arc<AtomicUsize>) -> Model {
        let mut m = Model::new("counted");
        m.set_objective(|x: &Array1<f64>| x.dot(x));
        m.set_gradient(move |out: &mut Array1<f64>, x: &Array1<f64>| {
            calls.fetch_add(1, Ordering::SeqCst);
            out.assign(&(x * 2.0));
        });
        m.set_initial_iterate(Array1::zeros(6));
        m
    }

    #[test]
    fn forward_differences_cost_one_gradient_per_direction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let m = counted_model(calls.clone());
        let x = Array1::linspace(-1.0, 1.0, 6);
        let g = &x * 2.0;
        let s = Array2::<f64>::eye(6);

        let u = FiniteDifference::Forward.sample(&m, &x, &g, &s).unwrap();
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(6);
        for (a, b) in u.iter().zip((Array2::<f64>::eye(6) * 2.0).iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }

        calls.store(0, Ordering::SeqCst);
        FiniteDifference::Central.sample(&m, &x, &g, &s).unwrap();
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(12);
    }

    #[test]
    fn forward_differences_reject_a_short_gradient() {
        let m = model();
        let s = array![[1.0], [0.0], [0.0]];
        let err = FiniteDifference::Forward
            .sample(&m, &array![0.0, 0.0, 1.0], &array![0.0, 0.0], &s)
            .unwrap_err();
        assert!(matches!(err, BlockOptError::DimensionMismatch { expected: 3, got: 2 }));
    }
}
