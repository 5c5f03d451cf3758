//! # Rigid transform fitting
//!
//! Least squares rotation and translation between two point sets (2D Procrustes), and a RANSAC
//! wrapper around it that rejects outlier correspondences.

use nalgebra as na;
use rand::prelude::*;
use vidstab::prelude::v1::*;

/// Point correspondence from the previous frame to the current one.
pub type Correspondence = (na::Point2<f64>, na::Point2<f64>);

/// Outcome of a robust rigid fit.
#[derive(Clone, Debug, PartialEq)]
pub enum RigidFit {
    /// A transform agreed upon by `inliers` correspondences.
    Fit { transform: Transform, inliers: usize },
    /// Not enough correspondences agree on any transform.
    NoConsensus,
}

/// RANSAC settings.
#[derive(Clone, Copy, Debug)]
pub struct RansacParams {
    /// Number of minimal samples to try.
    pub iterations: usize,
    /// Maximal reprojection error of an inlier, in pixels.
    pub threshold: f32,
    /// Minimal number of inliers of an accepted fit.
    pub min_inliers: usize,
    /// Random generator seed.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            iterations: 500,
            threshold: 3.0,
            min_inliers: 3,
            seed: 0,
        }
    }
}

/// Fit the rigid transform that best maps the first points onto the second.
///
/// Returns `None` for fewer than 2 correspondences.
pub fn procrustes(pairs: &[Correspondence]) -> Option<Transform> {
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let (sp, sq) = pairs
        .iter()
        .fold((na::Vector2::zeros(), na::Vector2::zeros()), |(sp, sq), (p, q)| {
            (sp + p.coords, sq + q.coords)
        });
    let (cp, cq) = (sp / n, sq / n);

    let (dot, cross) = pairs.iter().fold((0.0, 0.0), |(dot, cross), (p, q)| {
        let (a, b) = (p.coords - cp, q.coords - cq);
        (dot + a.dot(&b), cross + a.x * b.y - a.y * b.x)
    });

    let angle = cross.atan2(dot);
    let rot = na::Rotation2::new(angle);
    let t = cq - rot * cp;

    let transform = Transform::new(t.x, t.y, angle);

    if transform.is_finite() {
        Some(transform)
    } else {
        None
    }
}

fn residual(transform: &Transform, (p, q): &Correspondence) -> f64 {
    let rot = na::Rotation2::new(transform.da);
    let t = na::Vector2::new(transform.dx, transform.dy);
    (rot * p + t - q).norm()
}

/// Robustly fit a rigid transform with RANSAC over 2-point samples.
///
/// The best sample's inliers are refit with [`procrustes`].
pub fn ransac(pairs: &[Correspondence], params: &RansacParams) -> RigidFit {
    let min_inliers = params.min_inliers.max(2);

    if pairs.len() < min_inliers {
        return RigidFit::NoConsensus;
    }

    let rng = &mut StdRng::seed_from_u64(params.seed);

    let inliers_of = |transform: &Transform| {
        pairs
            .iter()
            .filter(|pair| residual(transform, pair) <= params.threshold as f64)
            .copied()
            .collect::<Vec<_>>()
    };

    let mut best: Vec<Correspondence> = vec![];

    for _ in 0..params.iterations {
        let sample = rand::seq::index::sample(rng, pairs.len(), 2);
        let (a, b) = (pairs[sample.index(0)], pairs[sample.index(1)]);

        // Coincident points constrain nothing.
        if (a.0 - b.0).norm() < 1e-6 {
            continue;
        }

        let transform = match procrustes(&[a, b]) {
            Some(t) => t,
            None => continue,
        };

        let inliers = inliers_of(&transform);

        if inliers.len() > best.len() {
            best = inliers;

            if best.len() == pairs.len() {
                break;
            }
        }
    }

    if best.len() < min_inliers {
        return RigidFit::NoConsensus;
    }

    // Refine on the consensus set and collect it again.
    match procrustes(&best) {
        Some(transform) => RigidFit::Fit {
            transform,
            inliers: inliers_of(&transform).len().max(best.len()),
        },
        None => RigidFit::NoConsensus,
    }
}
