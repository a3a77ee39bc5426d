//! The iteration engine: sample, update, solve, accept or reject.

use crate::curvature::HessianOracle;
use crate::driver::Driver;
use crate::error::{BlockOptError, Result};
use crate::linalg::norm;
use crate::model::Model;
use crate::options::DriverOptions;
use crate::samples::SampleContext;
use crate::simulation::Status;
use crate::trace::{Trace, TraceRow};
use crate::trs::{TrsStep, TrustRegionSolver};
use log::Level;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

const ETA_ACCEPT: f64 = 0.1;
const ETA_EXPAND: f64 = 0.75;
const BOUNDARY_FRACTION: f64 = 0.8;
const GROW: f64 = 2.0;
const SHRINK: f64 = 0.25;
const INITIAL_RADIUS: f64 = 1.0;

/// Everything a step reads but does not own.
pub(crate) struct Engine<'a> {
    pub model: &'a Model,
    pub driver: &'a Driver,
    pub oracle: &'a dyn HessianOracle,
    pub solver: &'a dyn TrustRegionSolver,
}

impl Engine<'_> {
    fn options(&self) -> &DriverOptions {
        self.driver.options()
    }

    fn enabled(&self, level: Level) -> bool {
        level <= self.options().log_level()
    }
}

/// State of one run, exclusively owned by its simulation.
#[derive(Debug, Clone)]
pub(crate) struct Backend {
    rng: StdRng,
    iteration: usize,
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
    grad_norm: f64,
    h: Array2<f64>,
    delta: f64,
    samples: Option<Array2<f64>>,
    samples_led_by_step: bool,
    // Curvature at `x` is already folded into `h`.
    sampled: bool,
    last_step: Option<Array1<f64>>,
    // (p, y) of the last accepted step, consumed by the next preliminary update.
    secant: Option<(Array1<f64>, Array1<f64>)>,
}

impl Backend {
    /// Evaluates the model at its initial iterate and validates the options against it.
    pub(crate) fn start(model: &Model, options: &DriverOptions) -> Result<Self> {
        let x = model
            .initial_iterate()
            .cloned()
            .ok_or_else(|| BlockOptError::NotFinal(model.name().to_string()))?;
        let n = x.len();
        options.validate_for(n)?;
        let f = model.obj(&x)?;
        if !f.is_finite() {
            return Err(BlockOptError::ObjectiveFailure {
                iteration: 0,
                value: f,
            });
        }
        let g = model.grad(&x)?;
        if g.iter().any(|v| !v.is_finite()) {
            return Err(BlockOptError::GradientFailure { iteration: 0 });
        }
        let grad_norm = norm(g.view());
        Ok(Self {
            rng: StdRng::seed_from_u64(options.rng_seed()),
            iteration: 0,
            x,
            f,
            g,
            grad_norm,
            h: Array2::eye(n),
            delta: INITIAL_RADIUS.min(options.delta_max()),
            samples: None,
            samples_led_by_step: false,
            sampled: false,
            last_step: None,
            secant: None,
        })
    }

    pub(crate) fn iteration(&self) -> usize {
        self.iteration
    }

    pub(crate) fn x(&self) -> &Array1<f64> {
        &self.x
    }

    pub(crate) fn f(&self) -> f64 {
        self.f
    }

    pub(crate) fn grad(&self) -> &Array1<f64> {
        &self.g
    }

    pub(crate) fn grad_norm(&self) -> f64 {
        self.grad_norm
    }

    pub(crate) fn h(&self) -> &Array2<f64> {
        &self.h
    }

    pub(crate) fn delta(&self) -> f64 {
        self.delta
    }

    /// `Success` once the gradient is small, `Fail` once the budget is spent.
    pub(crate) fn terminal(&self, options: &DriverOptions) -> Option<Status> {
        if self.grad_norm <= options.epsilon_tol() {
            Some(Status::Success)
        } else if self.iteration >= options.max_iterations() {
            Some(Status::Fail)
        } else {
            None
        }
    }

    /// One iteration. Accepted steps append a row to `trace`.
    ///
    /// Curvature is sampled and folded into `H_k` only when the iterate is
    /// new, so a rejected step retries with a smaller radius and the same
    /// model.
    pub(crate) fn step(&mut self, engine: &Engine<'_>, trace: &mut Trace) -> Result<()> {
        let k = self.iteration;
        let opts = engine.options();
        let delta_tol = opts.delta_tol();
        let qn = engine.driver.qn_update();

        if !self.sampled {
            let sample_update = engine.driver.sample_update();
            let leads = sample_update.leads_with_step(self.last_step.as_ref());
            let s_k = sample_update.generate(
                &mut self.rng,
                &SampleContext {
                    samples: opts.samples(),
                    h: &self.h,
                    previous: self.samples.as_ref(),
                    previous_led_by_step: self.samples_led_by_step,
                    last_step: self.last_step.as_ref(),
                },
            );
            let started = Instant::now();
            let y = engine.oracle.sample(engine.model, &self.x, &self.g, &s_k)?;
            trace.record_ghs(started.elapsed());
            if y.dim() != s_k.dim() {
                return Err(BlockOptError::DimensionMismatch {
                    expected: s_k.ncols(),
                    got: y.ncols(),
                });
            }
            if y.iter().any(|v| !v.is_finite()) {
                return Err(BlockOptError::GradientFailure { iteration: k });
            }

            let preliminary = match (engine.driver.pflag(), self.secant.take()) {
                (true, Some((p, dg))) => Some(qn.apply_secant(&self.h, &p, &dg, delta_tol)?),
                _ => None,
            };
            let base = preliminary.as_ref().unwrap_or(&self.h);
            self.h = qn.apply(base, &s_k, &y, delta_tol)?;
            self.samples = Some(s_k);
            self.samples_led_by_step = leads;
            self.sampled = true;
        }

        let started = Instant::now();
        let TrsStep {
            step,
            predicted_reduction: pred,
        } = engine.solver.solve(&self.g, &self.h, self.delta)?;
        trace.record_trs(started.elapsed());
        let step_norm = norm(step.view());

        let trial = &self.x + &step;
        let f_trial = engine.model.obj(&trial)?;
        if f_trial.is_nan() || f_trial == f64::NEG_INFINITY {
            return Err(BlockOptError::ObjectiveFailure {
                iteration: k,
                value: f_trial,
            });
        }
        let pred_floor = f64::EPSILON * self.f.abs().max(1.0);
        let rho = if pred.is_finite() && pred > pred_floor && f_trial.is_finite() {
            (self.f - f_trial) / pred
        } else {
            f64::NEG_INFINITY
        };

        let radius = self.delta;
        self.iteration += 1;
        if rho > ETA_ACCEPT {
            let g_new = engine.model.grad(&trial)?;
            if g_new.iter().any(|v| !v.is_finite()) {
                return Err(BlockOptError::GradientFailure { iteration: k });
            }
            if rho >= ETA_EXPAND && step_norm >= BOUNDARY_FRACTION * radius {
                self.delta = (GROW * radius).min(opts.delta_max());
            }
            if engine.driver.pflag() {
                self.secant = Some((step.clone(), &g_new - &self.g));
            }
            self.last_step = Some(step);
            self.sampled = false;
            self.x = trial;
            self.f = f_trial;
            self.grad_norm = norm(g_new.view());
            self.g = g_new;
            trace.push(TraceRow {
                f: self.f,
                grad_norm: self.grad_norm,
                step_norm,
                radius,
                rho,
            });
            if engine.enabled(Level::Debug) {
                log::debug!(
                    "[BlockOpt] k={} accepted: f={:.6e}, ||g||={:.3e}, ||p||={:.3e}, Δ={:.3e}, ρ={:.3}",
                    k,
                    self.f,
                    self.grad_norm,
                    step_norm,
                    radius,
                    rho
                );
            }
        } else {
            self.delta = SHRINK * radius;
            if engine.enabled(Level::Debug) {
                log::debug!(
                    "[BlockOpt] k={} rejected: pred={:.3e}, ρ={:.3}, Δ {:.3e} -> {:.3e}",
                    k,
                    pred,
                    rho,
                    radius,
                    self.delta
                );
            }
            let floor = f64::EPSILON * norm(self.x.view()).max(1.0);
            if self.delta < floor {
                if engine.enabled(Level::Warn) {
                    log::warn!(
                        "[BlockOpt] trust region collapsed at k={}: Δ={:.3e} below {:.3e}",
                        k,
                        self.delta,
                        floor
                    );
                }
                return Err(BlockOptError::RadiusCollapse {
                    iteration: k,
                    radius: self.delta,
                });
            }
        }
        Ok(())
    }
}
