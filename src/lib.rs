//! Block quasi-Newton trust-region optimization with Hessian sampling.
//!
//! This crate minimizes smooth unconstrained objectives `f: Rⁿ → R` given only
//! the objective and its gradient. At every new iterate it draws a block of `s`
//! orthonormal sample directions and measures the curvature of `f` along them
//! by differencing the gradient. The `s` measurements are folded into a dense
//! symmetric inverse Hessian approximation `H` through a multi-secant update,
//! and the step solves the trust-region subproblem on `gᵀp + ½ pᵀH⁻¹p`.
//!
//! # Features
//! - Six supplemental sample strategies ([`SampleUpdate::A`] to [`SampleUpdate::F`]),
//!   from plain random blocks to subspace iteration on the current model.
//! - Block SR1 and block PSB updates ([`QnUpdate`]) with exactly symmetric results
//!   and pseudoinverse handling of rank-deficient secant systems.
//! - Optional preliminary single-secant update along the last accepted step.
//! - Exact eigenvalue-based subproblem solver ([`EigenTrs`]) with a dogleg
//!   alternative ([`Dogleg`]); both plug in through [`TrustRegionSolver`].
//! - Pluggable Hessian sampling ([`HessianOracle`]): forward or central
//!   differences of the gradient, or user supplied Hessian-vector products.
//! - Per-run [`Trace`] of objective values, gradient norms, step lengths, radii
//!   and ratios, with counters and timers for sampling and subproblem solves.
//!
//! ## Defaults (key settings)
//! - `s = 6` samples, `Δ_max = 100`, `δ_tol = 1e-12`, `ϵ_tol = 1e-5`, 2000 iterations.
//! - Sample strategy `C`, SR1 update, no preliminary update.
//! - `H₀ = I`, `Δ₀ = min(1, Δ_max)`; steps are accepted when `ρ > 0.1`.
//!
//! # Example
//!
//! Minimize the Rosenbrock function.
//!
//! ```
//! use blockopt::{optimize, Driver, Model, QnUpdate, SampleUpdate, Status};
//! use ndarray::{array, Array1};
//!
//! let mut model = Model::new("Rosenbrock");
//! model.set_objective(|x: &Array1<f64>| {
//!     (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2)
//! });
//! model.set_gradient(|out: &mut Array1<f64>, x: &Array1<f64>| {
//!     out[0] = -2.0 * (1.0 - x[0]) - 400.0 * (x[1] - x[0].powi(2)) * x[0];
//!     out[1] = 200.0 * (x[1] - x[0].powi(2));
//! });
//! model.set_initial_iterate(array![-1.2, 1.0]);
//!
//! let mut driver = Driver::new(SampleUpdate::A, QnUpdate::Sr1, false);
//! driver.options_mut().set_samples(2).unwrap();
//!
//! let sim = optimize(&mut model, &driver).expect("optimization failed");
//! assert_eq!(sim.status(), Status::Success);
//!
//! let x_min = sim.iterate();
//! println!(
//!     "Found minimum f({}) = {:.4e} in {} iterations.",
//!     x_min,
//!     sim.objective(),
//!     sim.iterations()
//! );
//! assert!((x_min[0] - 1.0).abs() < 1e-4);
//! assert!((x_min[1] - 1.0).abs() < 1e-4);
//! ```

mod backend;
pub mod curvature;
mod driver;
mod error;
mod linalg;
mod model;
mod options;
mod qn;
mod samples;
mod simulation;
mod trace;
pub mod trs;

pub use curvature::{FiniteDifference, HessianOracle, HessianVectorFn};
pub use driver::Driver;
pub use error::{BlockOptError, Result};
pub use model::{Gradient, Model, Objective};
pub use options::DriverOptions;
pub use qn::QnUpdate;
pub use samples::SampleUpdate;
pub use simulation::{Simulation, Status};
pub use trace::{Trace, TraceRow};
pub use trs::{Dogleg, EigenTrs, TrsStep, TrustRegionSolver};

use ndarray::Array1;
use std::borrow::Cow;

/// Finalize `model` and run it under a copy of `driver` to a terminal status.
///
/// `Status::Fail` is an `Ok` outcome: the iteration budget ran out. Errors
/// are configuration problems or a run aborted by a failed evaluation or a
/// numeric breakdown; the latter leave the simulation [`Status::Aborted`].
pub fn optimize<'m>(model: &'m mut Model, driver: &Driver) -> Result<Simulation<'m>> {
    model.finalize()?;
    let mut sim = Simulation::new(model, driver.clone())?;
    sim.run()?;
    Ok(sim)
}

/// Minimize `f` from `x0` with the default driver.
///
/// The default driver draws 6 samples per iteration, so `x0` needs at least 6
/// entries.
pub fn optimize_fn<F, G>(f: F, grad: G, x0: Array1<f64>) -> Result<Simulation<'static>>
where
    F: Fn(&Array1<f64>) -> f64 + Send + Sync + 'static,
    G: Fn(&mut Array1<f64>, &Array1<f64>) + Send + Sync + 'static,
{
    let mut model = Model::new("objective");
    model.set_objective(f);
    model.set_gradient(grad);
    model.set_initial_iterate(x0);
    model.finalize()?;
    let mut sim = Simulation::with_model(Cow::Owned(model), Driver::default())?;
    sim.run()?;
    Ok(sim)
}
