//! Supplemental sample directions.
//!
//! Each iteration draws `s = 2w` orthonormal directions along which the
//! Hessian is sampled. The variants differ in what they carry over from the
//! previous iteration: nothing (`A`), the previous sample space to avoid (`B`),
//! the curvature model to steer toward its dominant eigenspace (`C`), and, for
//! `D`, `E` and `F`, additionally the direction of the last accepted step.

use crate::linalg::{gaussian, norm, orthonormalize, project_out};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use rand::Rng;

/// Supplemental sample direction update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleUpdate {
    /// Random set of orthonormal sample directions.
    A,
    /// Random orthonormal directions orthogonal to the previous sample space.
    B,
    /// One subspace-iteration step of `H_k` on half the previous samples,
    /// padded with random directions, to resolve the dominant eigenspace of
    /// `H_k`.
    #[default]
    C,
    /// `A` with the previous step direction as the first sample.
    D,
    /// `B` with the previous step direction as the first sample.
    E,
    /// `C` with the previous step direction as the first sample.
    F,
}

/// What the generator may look at when drawing `S_k`.
pub(crate) struct SampleContext<'a> {
    pub samples: usize,
    pub h: &'a Array2<f64>,
    pub previous: Option<&'a Array2<f64>>,
    /// Column 0 of `previous` is a step direction rather than a sample.
    pub previous_led_by_step: bool,
    pub last_step: Option<&'a Array1<f64>>,
}

impl SampleUpdate {
    /// Draw `S_k`: an `n x s` matrix with orthonormal columns.
    ///
    /// Requires `s <= n`, which the backend validates before iterating.
    pub(crate) fn generate<R: Rng>(self, rng: &mut R, ctx: &SampleContext<'_>) -> Array2<f64> {
        let n = ctx.h.nrows();
        let s = ctx.samples;
        debug_assert!(s >= 2 && s <= n);
        let step = ctx.last_step.filter(|_| self.leads_with_step(ctx.last_step));
        let free = s - usize::from(step.is_some());
        let body = match self {
            SampleUpdate::A | SampleUpdate::D => gaussian(rng, n, free),
            SampleUpdate::B | SampleUpdate::E => avoid_previous(rng, ctx, free),
            SampleUpdate::C | SampleUpdate::F => toward_curvature(rng, ctx, free),
        };
        let cols = match step {
            Some(p) => {
                let head = p.view().insert_axis(Axis(1));
                let joined = concatenate(Axis(1), &[head, body.view()]);
                joined.unwrap_or(body)
            }
            None => body,
        };
        orthonormalize(rng, &cols)
    }

    /// Whether [`generate`](Self::generate) puts `last_step` in column 0.
    pub(crate) fn leads_with_step(self, last_step: Option<&Array1<f64>>) -> bool {
        match self {
            SampleUpdate::A | SampleUpdate::B | SampleUpdate::C => false,
            SampleUpdate::D | SampleUpdate::E | SampleUpdate::F => last_step
                .is_some_and(|p| norm(p.view()) > 0.0 && p.iter().all(|v| v.is_finite())),
        }
    }
}

// Gaussian columns with the previous sample space projected out. When there is
// no previous sample or not enough room for a disjoint block, plain Gaussian.
fn avoid_previous<R: Rng>(rng: &mut R, ctx: &SampleContext<'_>, m: usize) -> Array2<f64> {
    let n = ctx.h.nrows();
    let z = gaussian(rng, n, m);
    match ctx.previous {
        Some(prev) if prev.ncols() + ctx.samples <= n => project_out(prev, &z),
        _ => z,
    }
}

// [H S_{k-1}[:, ..w'] | Z] where w' is half of the sample count. A leading
// step column in S_{k-1} is not a sample and is skipped.
fn toward_curvature<R: Rng>(rng: &mut R, ctx: &SampleContext<'_>, m: usize) -> Array2<f64> {
    let n = ctx.h.nrows();
    let prev = match ctx.previous {
        Some(prev) => prev,
        None => return gaussian(rng, n, m),
    };
    let skip = usize::from(ctx.previous_led_by_step).min(prev.ncols());
    let take = (ctx.samples / 2).min(m).min(prev.ncols() - skip);
    let pushed = ctx.h.dot(&prev.slice(s![.., skip..skip + take]));
    let pad = gaussian(rng, n, m - take);
    match concatenate(Axis(1), &[pushed.view(), pad.view()]) {
        Ok(cols) => cols,
        Err(_) => gaussian(rng, n, m),
    }
}
