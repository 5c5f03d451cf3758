//! # Pyramidal Lucas-Kanade tracking
//!
//! Iterative sparse optical flow as described by Bouguet, "Pyramidal Implementation of the Lucas
//! Kanade Feature Tracker". Points are tracked coarse to fine, and on every level the displacement
//! is refined with Newton-Raphson steps over a square window.

use crate::pyramid::Pyramid;
use nalgebra as na;
use rayon::prelude::*;

/// Lucas-Kanade tracker settings.
#[derive(Clone, Copy, Debug)]
pub struct LkParams {
    /// Side of the integration window in pixels.
    pub window: usize,
    /// Maximum refinement steps per level.
    pub max_iters: usize,
    /// Stop refining once a step is shorter than this, in pixels.
    pub epsilon: f32,
    /// Minimal eigenvalue of the normalised spatial gradient matrix.
    pub min_eigenvalue: f32,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            window: 21,
            max_iters: 30,
            epsilon: 0.01,
            min_eigenvalue: 1e-4,
        }
    }
}

/// Track points from `prev` into `cur`.
///
/// Returns the tracked position of every input point, or `None` where the point was lost.
///
/// # Arguments
///
/// * `prev` - pyramid of the frame the points were detected in.
/// * `cur` - pyramid of the frame to track into.
/// * `points` - positions in `prev`.
/// * `params` - tracker settings.
pub fn track(
    prev: &Pyramid,
    cur: &Pyramid,
    points: &[na::Point2<f32>],
    params: &LkParams,
) -> Vec<Option<na::Point2<f32>>> {
    points
        .par_iter()
        .map(|p| track_point(prev, cur, *p, params))
        .collect()
}

fn track_point(
    prev: &Pyramid,
    cur: &Pyramid,
    point: na::Point2<f32>,
    params: &LkParams,
) -> Option<na::Point2<f32>> {
    let levels = prev.len().min(cur.len());
    let half = (params.window / 2) as isize;
    let area = ((2 * half + 1) * (2 * half + 1)) as f32;

    let mut guess = na::Vector2::zeros();

    for lvl in (0..levels).rev() {
        let scale = (1 << lvl) as f32;
        let p = point / scale;

        let pl = prev.level(lvl);
        let cl = cur.level(lvl);

        // Spatial gradient matrix and template, sampled once per level.
        let mut g = na::Matrix2::<f32>::zeros();
        let mut template = Vec::with_capacity(area as usize);

        for oy in -half..=half {
            for ox in -half..=half {
                let (x, y) = (p.x + ox as f32, p.y + oy as f32);
                let ix = pl.gx.sample(x, y);
                let iy = pl.gy.sample(x, y);
                g += na::Matrix2::new(ix * ix, ix * iy, ix * iy, iy * iy);
                template.push((x, y, pl.img.sample(x, y), ix, iy));
            }
        }

        let (a, b, c) = (g[(0, 0)] / area, g[(0, 1)] / area, g[(1, 1)] / area);

        if vidstab::utils::min_eigenvalue(a, b, c) < params.min_eigenvalue {
            return None;
        }

        let g_inv = g.try_inverse()?;

        let mut v = na::Vector2::zeros();

        for _ in 0..params.max_iters {
            let offset = guess + v;

            let mismatch = template
                .iter()
                .fold(na::Vector2::zeros(), |acc, &(x, y, val, ix, iy)| {
                    let diff = val - cl.img.sample(x + offset.x, y + offset.y);
                    acc + na::Vector2::new(diff * ix, diff * iy)
                });

            let step = g_inv * mismatch;
            v += step;

            if !v.x.is_finite() || !v.y.is_finite() {
                return None;
            }

            if step.norm() < params.epsilon {
                break;
            }
        }

        guess = if lvl > 0 { (guess + v) * 2.0 } else { guess + v };
    }

    let out = point + guess;

    if cur.base().contains(out.x, out.y) {
        Some(out)
    } else {
        None
    }
}
