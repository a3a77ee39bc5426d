//! The unconstrained minimization problem: objective, gradient and starting point.

use crate::error::{BlockOptError, Result};
use finitediff::FiniteDiff;
use ndarray::{Array1, Array2};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Objective function `f: Rⁿ → R`.
pub type Objective = Arc<dyn Fn(&Array1<f64>) -> f64 + Send + Sync>;

/// In-place gradient `∇f!(out, x)`, writing `∇f(x)` into `out`.
pub type Gradient = Arc<dyn Fn(&mut Array1<f64>, &Array1<f64>) + Send + Sync>;

/// Specifies the unconstrained minimization of a smooth objective function.
///
/// A model is constructed with a name and loaded incrementally. Once final
/// (explicitly through [`Model::finalize`] or on the first
/// [`optimize`](crate::optimize) call), the objective, gradient and initial
/// iterate can no longer change: their setters return without touching the
/// model. The formula is descriptive and stays assignable.
#[derive(Clone)]
pub struct Model {
    name: String,
    objective: Option<Objective>,
    gradient: Option<Gradient>,
    initial_iterate: Option<Array1<f64>>,
    formula: Option<String>,
    directory: Option<PathBuf>,
    is_final: bool,
}

impl Model {
    /// An empty model with no working directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objective: None,
            gradient: None,
            initial_iterate: None,
            formula: None,
            directory: None,
            is_final: false,
        }
    }

    /// An empty model whose working directory `base/name` is created on construction.
    pub fn in_directory(name: impl Into<String>, base: impl AsRef<Path>) -> Result<Self> {
        let mut model = Self::new(name);
        let path = base.as_ref().join(&model.name);
        std::fs::create_dir_all(&path).map_err(|source| BlockOptError::Directory {
            path: path.clone(),
            source,
        })?;
        model.directory = Some(path);
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn initial_iterate(&self) -> Option<&Array1<f64>> {
        self.initial_iterate.as_ref()
    }

    /// Dimension of the problem, unknown until an initial iterate is set.
    pub fn dimension(&self) -> Option<usize> {
        self.initial_iterate.as_ref().map(|x| x.len())
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn has_objective(&self) -> bool {
        self.objective.is_some()
    }

    pub fn has_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    /// True once the model has been loaded into a simulation.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Assign the objective function. No effect on a final model.
    pub fn set_objective<F>(&mut self, f: F)
    where
        F: Fn(&Array1<f64>) -> f64 + Send + Sync + 'static,
    {
        if self.is_final {
            return;
        }
        self.objective = Some(Arc::new(f));
    }

    /// Assign the in-place gradient `∇f!(out, x)`. No effect on a final model.
    pub fn set_gradient<G>(&mut self, g: G)
    where
        G: Fn(&mut Array1<f64>, &Array1<f64>) + Send + Sync + 'static,
    {
        if self.is_final {
            return;
        }
        self.gradient = Some(Arc::new(g));
    }

    /// Assign the starting point. No effect on a final model.
    pub fn set_initial_iterate(&mut self, x0: Array1<f64>) {
        if self.is_final {
            return;
        }
        self.initial_iterate = Some(x0);
    }

    /// Attach a display formula, e.g. `"$ f(x) = x⋅x $"`.
    pub fn set_formula(&mut self, formula: impl Into<String>) {
        self.formula = Some(formula.into());
    }

    /// Freeze the model. Requires the objective, gradient and initial iterate.
    ///
    /// Calling this on a final model does nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.is_final {
            return Ok(());
        }
        self.objective_fn()?;
        self.gradient_fn()?;
        let x0 = self.initial_iterate.as_ref().ok_or_else(|| self.unset("initial iterate"))?;
        if x0.is_empty() {
            return Err(BlockOptError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }
        self.is_final = true;
        Ok(())
    }

    /// Evaluate the objective at `x`.
    pub fn obj(&self, x: &Array1<f64>) -> Result<f64> {
        let f = self.objective_fn()?;
        self.check_dimension(x)?;
        Ok(f(x))
    }

    /// Evaluate the gradient at `x` into `out`.
    pub fn grad_into(&self, out: &mut Array1<f64>, x: &Array1<f64>) -> Result<()> {
        let g = self.gradient_fn()?;
        self.check_dimension(x)?;
        self.check_dimension(out)?;
        g(out, x);
        Ok(())
    }

    /// Evaluate the gradient at `x` into a fresh vector.
    pub fn grad(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(x.len());
        self.grad_into(&mut out, x)?;
        Ok(out)
    }

    /// Hessian-vector product `∇²f(x) dx` by central differences of the gradient.
    pub fn hess_sample(&self, x: &Array1<f64>, dx: &Array1<f64>) -> Result<Array1<f64>> {
        let g = self.gradient_fn()?;
        self.check_dimension(x)?;
        self.check_dimension(dx)?;
        let grad = |p: &Array1<f64>| -> Array1<f64> {
            let mut out = Array1::zeros(p.len());
            g(&mut out, p);
            out
        };
        Ok(x.central_hessian_vec_prod(&grad, dx))
    }

    /// Dense Hessian at `x` by central differences of the gradient, symmetrized.
    ///
    /// This is a diagnostic: it costs `2n` gradient evaluations.
    pub fn hessian(&self, x: &Array1<f64>) -> Result<Array2<f64>> {
        let g = self.gradient_fn()?;
        self.check_dimension(x)?;
        let grad = |p: &Array1<f64>| -> Array1<f64> {
            let mut out = Array1::zeros(p.len());
            g(&mut out, p);
            out
        };
        let mut hess = x.central_hessian(&grad);
        for i in 0..hess.nrows() {
            for j in 0..i {
                let avg = 0.5 * (hess[[i, j]] + hess[[j, i]]);
                hess[[i, j]] = avg;
                hess[[j, i]] = avg;
            }
        }
        Ok(hess)
    }

    pub(crate) fn objective_fn(&self) -> Result<&Objective> {
        self.objective.as_ref().ok_or_else(|| self.unset("objective"))
    }

    pub(crate) fn gradient_fn(&self) -> Result<&Gradient> {
        self.gradient.as_ref().ok_or_else(|| self.unset("gradient"))
    }

    fn check_dimension(&self, v: &Array1<f64>) -> Result<()> {
        match self.dimension() {
            Some(n) if n != v.len() => Err(BlockOptError::DimensionMismatch {
                expected: n,
                got: v.len(),
            }),
            _ => Ok(()),
        }
    }

    fn unset(&self, field: &'static str) -> BlockOptError {
        BlockOptError::Unset {
            model: self.name.clone(),
            field,
        }
    }
}

fn show<T>(v: &Option<T>) -> &'static str {
    if v.is_some() {
        "assigned"
    } else {
        "missing"
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("objective", &show(&self.objective))
            .field("gradient", &show(&self.gradient))
            .field("initial_iterate", &self.initial_iterate)
            .field("dimension", &self.dimension())
            .field("directory", &self.directory)
            .field("formula", &self.formula)
            .field("is_final", &self.is_final)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use spectral::prelude::*;

    fn quadratic_model() -> Model {
        let mut m = Model::new("quadratic");
        m.set_objective(|x: &Array1<f64>| x.dot(x));
        m.set_gradient(|out: &mut Array1<f64>, x: &Array1<f64>| out.assign(&(2.0 * x)));
        m.set_initial_iterate(array![1.0, -2.0, 3.0]);
        m
    }

    #[test]
    fn empty_model_reports_unset_fields() {
        let m = Model::new("empty");
        assert_that!(&m.dimension()).is_none();
        assert!(!m.has_objective());
        let err = m.obj(&array![1.0]).unwrap_err();
        assert!(matches!(
            err,
            BlockOptError::Unset {
                field: "objective",
                ..
            }
        ));
        let err = m.grad(&array![1.0]).unwrap_err();
        assert!(matches!(err, BlockOptError::Unset { field: "gradient", .. }));
    }

    #[test]
    fn finalize_requires_every_field() {
        let mut m = Model::new("partial");
        m.set_objective(|x: &Array1<f64>| x.sum());
        assert!(m.finalize().is_err());
        m.set_gradient(|out: &mut Array1<f64>, _x: &Array1<f64>| out.fill(1.0));
        let err = m.finalize().unwrap_err();
        assert!(matches!(
            err,
            BlockOptError::Unset {
                field: "initial iterate",
                ..
            }
        ));
        m.set_initial_iterate(array![0.0, 0.0]);
        m.finalize().unwrap();
        assert!(m.is_final());
        m.finalize().unwrap();
    }

    #[test]
    fn setters_on_a_final_model_are_no_ops() {
        let mut m = quadratic_model();
        m.finalize().unwrap();
        let x = array![0.5, 0.5, 0.5];
        let f_before = m.obj(&x).unwrap();
        let g_before = m.grad(&x).unwrap();
        let x0_before = m.initial_iterate().cloned();

        m.set_objective(|_x: &Array1<f64>| 42.0);
        m.set_gradient(|out: &mut Array1<f64>, _x: &Array1<f64>| out.fill(42.0));
        m.set_initial_iterate(array![9.0]);

        assert_eq!(m.obj(&x).unwrap().to_bits(), f_before.to_bits());
        assert_eq!(m.grad(&x).unwrap(), g_before);
        assert_eq!(m.initial_iterate().cloned(), x0_before);
        assert_eq!(m.dimension(), Some(3));
    }

    #[test]
    fn formula_stays_assignable() {
        let mut m = quadratic_model();
        m.finalize().unwrap();
        m.set_formula("$ f(x) = x⋅x $");
        assert_eq!(m.formula(), Some("$ f(x) = x⋅x $"));
    }

    #[test]
    fn evaluations_check_dimension() {
        let m = quadratic_model();
        assert!(matches!(
            m.obj(&array![1.0]),
            Err(BlockOptError::DimensionMismatch {
                expected: 3,
                got: 1
            })
        ));
        assert_relative_eq!(m.obj(&array![1.0, 1.0, 1.0]).unwrap(), 3.0);
    }

    #[test]
    fn finite_difference_hessian_matches_quadratic() {
        let m = quadratic_model();
        let x = array![0.3, -0.7, 1.1];
        let h = m.hessian(&x).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 2.0 } else { 0.0 };
                assert_relative_eq!(h[[i, j]], expected, epsilon = 1e-6);
            }
        }
        let hv = m.hess_sample(&x, &array![1.0, 0.0, -1.0]).unwrap();
        assert_relative_eq!(hv[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(hv[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(hv[2], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn in_directory_creates_named_folder() {
        let base = std::env::temp_dir().join(format!("blockopt-model-{}", std::process::id()));
        let m = Model::in_directory("Rosenbrock", &base).unwrap();
        let dir = m.directory().unwrap().to_path_buf();
        assert_eq!(dir, base.join("Rosenbrock"));
        assert!(dir.is_dir());
        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn debug_output_hides_closures() {
        let m = quadratic_model();
        let text = format!("{:?}", m);
        assert!(text.contains("assigned"));
        assert!(text.contains("quadratic"));
    }
}
