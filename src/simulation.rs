use crate::backend::{Backend, Engine};
use crate::curvature::{FiniteDifference, HessianOracle};
use crate::driver::Driver;
use crate::error::{BlockOptError, Result};
use crate::model::Model;
use crate::trace::Trace;
use crate::trs::{EigenTrs, TrustRegionSolver};
use log::Level;
use ndarray::{Array1, Array2};
use std::borrow::Cow;
use std::fmt;

/// Where a simulation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Running,
    /// The gradient norm reached the convergence tolerance.
    Success,
    /// The iteration budget ran out first.
    Fail,
    /// A step returned an error. The state is that of the last completed
    /// iteration.
    Aborted,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self != Status::Running
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Fail => "FAIL",
            Status::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// A final model driven by a [`Driver`], with the record of everything the
/// run observed.
///
/// Construction evaluates the model at its initial iterate. [`run`](Self::run)
/// then iterates until the status is terminal. When a step fails with an
/// evaluation or numeric error, the error is returned once and the simulation
/// is left [`Status::Aborted`] with the state of the last completed iteration.
pub struct Simulation<'m> {
    model: Cow<'m, Model>,
    driver: Driver,
    oracle: Box<dyn HessianOracle>,
    solver: Box<dyn TrustRegionSolver>,
    backend: Backend,
    trace: Trace,
    status: Status,
}

impl<'m> Simulation<'m> {
    /// Load a final model into a new simulation.
    pub fn new(model: &'m Model, driver: Driver) -> Result<Self> {
        Self::with_model(Cow::Borrowed(model), driver)
    }

    pub(crate) fn with_model(model: Cow<'m, Model>, driver: Driver) -> Result<Self> {
        if !model.is_final() {
            return Err(BlockOptError::NotFinal(model.name().to_string()));
        }
        let backend = Backend::start(&model, driver.options())?;
        Ok(Self {
            model,
            driver,
            oracle: Box::new(FiniteDifference::default()),
            solver: Box::new(EigenTrs),
            backend,
            trace: Trace::default(),
            status: Status::Running,
        })
    }

    /// Replace the Hessian sampler (forward differences by default).
    pub fn with_oracle<O: HessianOracle + 'static>(mut self, oracle: O) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    /// Replace the trust-region subproblem solver ([`EigenTrs`] by default).
    pub fn with_solver<S: TrustRegionSolver + 'static>(mut self, solver: S) -> Self {
        self.solver = Box::new(solver);
        self
    }

    /// Iterate to a terminal status. Calling this on a terminal simulation
    /// returns its status without doing any work.
    pub fn run(&mut self) -> Result<Status> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        let enabled = |level: Level| level <= self.driver.options().log_level();
        if enabled(Level::Info) {
            log::info!(
                "[BlockOpt] {}: n={}, {:?} samples (s={}), {:?} update, pflag={}",
                self.model.name(),
                self.backend.x().len(),
                self.driver.sample_update(),
                self.driver.options().samples(),
                self.driver.qn_update(),
                self.driver.pflag()
            );
        }
        let engine = Engine {
            model: &self.model,
            driver: &self.driver,
            oracle: self.oracle.as_ref(),
            solver: self.solver.as_ref(),
        };
        let status = loop {
            if let Some(status) = self.backend.terminal(self.driver.options()) {
                break status;
            }
            if let Err(err) = self.backend.step(&engine, &mut self.trace) {
                self.status = Status::Aborted;
                if enabled(Level::Warn) {
                    log::warn!(
                        "[BlockOpt] {}: aborted after {} iterations: {}",
                        self.model.name(),
                        self.backend.iteration(),
                        err
                    );
                }
                return Err(err);
            }
        };
        self.status = status;
        if enabled(Level::Info) {
            log::info!(
                "[BlockOpt] {}: {} after {} iterations, f={:.6e}, ||g||={:.3e}, Δ={:.3e}, gHS={} ({:?}), trs={} ({:?})",
                self.model.name(),
                status,
                self.backend.iteration(),
                self.backend.f(),
                self.backend.grad_norm(),
                self.backend.delta(),
                self.trace.ghs_counter(),
                self.trace.ghs_timer(),
                self.trace.trs_counter(),
                self.trace.trs_timer()
            );
        }
        Ok(status)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// The current iterate `x_k`.
    pub fn iterate(&self) -> &Array1<f64> {
        self.backend.x()
    }

    /// `f(x_k)`.
    pub fn objective(&self) -> f64 {
        self.backend.f()
    }

    pub fn gradient(&self) -> &Array1<f64> {
        self.backend.grad()
    }

    pub fn gradient_norm(&self) -> f64 {
        self.backend.grad_norm()
    }

    /// Current trust-region radius.
    pub fn radius(&self) -> f64 {
        self.backend.delta()
    }

    /// Iterations performed, accepted or not.
    pub fn iterations(&self) -> usize {
        self.backend.iteration()
    }

    /// The current symmetric inverse Hessian approximation `H_k`.
    pub fn hessian_approximation(&self) -> &Array2<f64> {
        self.backend.h()
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }
}

impl fmt::Debug for Simulation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("model", &self.model.name())
            .field("driver", &self.driver)
            .field("status", &self.status)
            .field("iterations", &self.backend.iteration())
            .field("objective", &self.backend.f())
            .field("gradient_norm", &self.backend.grad_norm())
            .field("radius", &self.backend.delta())
            .finish()
    }
}
