use std::time::Duration;

/// Observations recorded while a simulation iterates.
///
/// The vectors grow by one entry per accepted step and are never rewritten.
/// The counters and timers cover every trust-region subproblem solve (`trs`)
/// and every Hessian sampling call (`ghs`), accepted or not.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    f_vals: Vec<f64>,
    grad_norms: Vec<f64>,
    step_norms: Vec<f64>,
    radii: Vec<f64>,
    rhos: Vec<f64>,
    trs_counter: usize,
    trs_timer: Duration,
    ghs_counter: usize,
    ghs_timer: Duration,
}

/// One accepted step as stored in a [`Trace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRow {
    /// Objective value at the new iterate.
    pub f: f64,
    /// Gradient norm at the new iterate.
    pub grad_norm: f64,
    /// Length of the accepted step.
    pub step_norm: f64,
    /// Trust-region radius the step was solved in.
    pub radius: f64,
    /// Ratio of actual to predicted reduction.
    pub rho: f64,
}

impl Trace {
    pub(crate) fn push(&mut self, row: TraceRow) {
        self.f_vals.push(row.f);
        self.grad_norms.push(row.grad_norm);
        self.step_norms.push(row.step_norm);
        self.radii.push(row.radius);
        self.rhos.push(row.rho);
    }

    pub(crate) fn record_trs(&mut self, elapsed: Duration) {
        self.trs_counter += 1;
        self.trs_timer += elapsed;
    }

    pub(crate) fn record_ghs(&mut self, elapsed: Duration) {
        self.ghs_counter += 1;
        self.ghs_timer += elapsed;
    }

    /// Objective values `f(x_k)` of the accepted iterates.
    pub fn f_vals(&self) -> &[f64] {
        &self.f_vals
    }

    /// Gradient norms `‖∇f(x_k)‖₂` of the accepted iterates.
    pub fn grad_norms(&self) -> &[f64] {
        &self.grad_norms
    }

    /// Lengths `‖p_k‖₂` of the accepted steps.
    pub fn step_norms(&self) -> &[f64] {
        &self.step_norms
    }

    /// Trust-region radius passed to each successful subproblem solve.
    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    /// Reduction ratio of each accepted step.
    pub fn rhos(&self) -> &[f64] {
        &self.rhos
    }

    /// Number of accepted steps recorded.
    pub fn len(&self) -> usize {
        self.f_vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f_vals.is_empty()
    }

    /// The `i`-th accepted step.
    pub fn row(&self, i: usize) -> Option<TraceRow> {
        Some(TraceRow {
            f: *self.f_vals.get(i)?,
            grad_norm: self.grad_norms[i],
            step_norm: self.step_norms[i],
            radius: self.radii[i],
            rho: self.rhos[i],
        })
    }

    /// Iterate over the accepted steps in order.
    pub fn rows(&self) -> impl Iterator<Item = TraceRow> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    pub fn trs_counter(&self) -> usize {
        self.trs_counter
    }

    pub fn trs_timer(&self) -> Duration {
        self.trs_timer
    }

    pub fn ghs_counter(&self) -> usize {
        self.ghs_counter
    }

    pub fn ghs_timer(&self) -> Duration {
        self.ghs_timer
    }

    /// Smallest recorded objective value, if any step was accepted.
    pub fn min_f(&self) -> Option<f64> {
        self.f_vals.iter().copied().reduce(f64::min)
    }

    /// Smallest recorded step length, if any step was accepted.
    pub fn min_step(&self) -> Option<f64> {
        self.step_norms.iter().copied().reduce(f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    fn row(f: f64) -> TraceRow {
        TraceRow {
            f,
            grad_norm: f * 2.0,
            step_norm: 0.5,
            radius: 1.0,
            rho: 0.9,
        }
    }

    #[test]
    fn rows_come_back_in_order() {
        let mut trace = Trace::default();
        trace.push(row(3.0));
        trace.push(row(2.0));
        trace.push(row(1.0));
        let fs: Vec<f64> = trace.rows().map(|r| r.f).collect();
        assert_eq!(fs, vec![3.0, 2.0, 1.0]);
        assert_eq!(trace.grad_norms(), &[6.0, 4.0, 2.0]);
        assert_that!(&trace.row(3)).is_none();
        assert_that!(&trace.min_f()).is_some().is_equal_to(1.0);
    }

    #[test]
    fn counters_accumulate_time() {
        let mut trace = Trace::default();
        trace.record_trs(Duration::from_millis(2));
        trace.record_trs(Duration::from_millis(3));
        trace.record_ghs(Duration::from_millis(7));
        assert_eq!(trace.trs_counter(), 2);
        assert_eq!(trace.trs_timer(), Duration::from_millis(5));
        assert_eq!(trace.ghs_counter(), 1);
        assert_eq!(trace.ghs_timer(), Duration::from_millis(7));
        assert!(trace.is_empty());
        assert_that!(&trace.min_step()).is_none();
    }
}
