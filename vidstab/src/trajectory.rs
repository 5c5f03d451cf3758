//! # Camera trajectory
//!
//! Per-frame motion deltas are accumulated into a raw trajectory, low-pass filtered into a
//! smoothed trajectory, and both are combined into corrective transforms.

use crate::prelude::v1::*;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

/// Rigid 2D transform triple.
///
/// Used for frame-to-frame motion deltas, trajectory positions, and corrective transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Horizontal translation, in pixels.
    pub dx: f64,
    /// Vertical translation, in pixels.
    pub dy: f64,
    /// Rotation, in radians.
    pub da: f64,
}

/// Estimated motion from one frame to the next.
pub type MotionDelta = Transform;

impl Transform {
    pub const ZERO: Transform = Transform {
        dx: 0.0,
        dy: 0.0,
        da: 0.0,
    };

    pub fn new(dx: f64, dy: f64, da: f64) -> Self {
        Self { dx, dy, da }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite() && self.da.is_finite()
    }

    /// Convert to a 2x3 affine matrix.
    ///
    /// The rotation-scale block is `[[cos, -sin], [sin, cos]]` and the translation column is
    /// `[dx, dy]`.
    pub fn to_affine(&self) -> na::Matrix2x3<f64> {
        let (sin, cos) = self.da.sin_cos();
        na::Matrix2x3::new(cos, -sin, self.dx, sin, cos, self.dy)
    }

    /// Extract translation and rotation from a 2x3 affine matrix.
    ///
    /// Any scale in the rotation-scale block is ignored.
    pub fn from_affine(m: &na::Matrix2x3<f64>) -> Self {
        Self {
            dx: m[(0, 2)],
            dy: m[(1, 2)],
            da: m[(1, 0)].atan2(m[(0, 0)]),
        }
    }
}

impl Add for Transform {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            dx: self.dx + rhs.dx,
            dy: self.dy + rhs.dy,
            da: self.da + rhs.da,
        }
    }
}

impl AddAssign for Transform {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Transform {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            dx: self.dx - rhs.dx,
            dy: self.dy - rhs.dy,
            da: self.da - rhs.da,
        }
    }
}

/// How the smoother fills positions without a full centered window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Copy the nearest fully averaged value.
    #[default]
    Backfill,
    /// Shrink the window symmetrically towards the sequence boundary.
    ///
    /// Linear trajectories pass through unchanged wherever the window is odd or shrunk.
    Shrink,
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Backfill => f.write_str("backfill"),
            Self::Shrink => f.write_str("shrink"),
        }
    }
}

impl FromStr for EdgeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "backfill" => Ok(Self::Backfill),
            "shrink" => Ok(Self::Shrink),
            _ => Err(anyhow!("unknown smoothing edge mode \"{s}\" (expected backfill or shrink)")),
        }
    }
}

/// Cumulative camera path, one `(x, y, angle)` entry per frame transition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    points: Vec<Transform>,
}

impl Trajectory {
    /// Accumulate motion deltas into a trajectory.
    ///
    /// `trajectory[i]` is the component-wise sum of `deltas[0..=i]`.
    pub fn build(deltas: &[MotionDelta]) -> Self {
        let points = deltas
            .iter()
            .scan(Transform::ZERO, |acc, &delta| {
                *acc += delta;
                Some(*acc)
            })
            .collect();

        Self { points }
    }

    /// Smooth the trajectory with a centered moving average.
    ///
    /// Each channel is filtered independently. Every full window averages exactly `window`
    /// entries: `window / 2` before the center and `window - 1 - window / 2` after it, so even
    /// windows lean one entry towards the past. Windows longer than the trajectory are clamped to
    /// its length.
    ///
    /// # Arguments
    ///
    /// * `window` - number of entries to average over. Must be positive.
    /// * `edge` - how to treat entries near the boundaries.
    pub fn smooth(&self, window: usize, edge: EdgeMode) -> Result<Self> {
        ensure!(window > 0, "smoothing window must be positive");

        let len = self.points.len();

        if len == 0 {
            return Ok(Self::default());
        }

        let window = if window > len {
            log::warn!("smoothing window {window} exceeds trajectory length {len}, clamping");
            len
        } else {
            window
        };

        if window == 1 {
            return Ok(self.clone());
        }

        let before = window / 2;
        let after = window - 1 - before;
        // Centers with a full window on both sides.
        let (first_full, last_full) = (before, len - 1 - after);

        let mean = |start: usize, end: usize| {
            let span = &self.points[start..=end];
            let sum = span.iter().fold(Transform::ZERO, |acc, &p| acc + p);
            let n = span.len() as f64;
            Transform::new(sum.dx / n, sum.dy / n, sum.da / n)
        };

        let points = (0..len)
            .map(|i| match edge {
                EdgeMode::Backfill => {
                    let c = i.clamp(first_full, last_full);
                    mean(c - before, c + after)
                }
                EdgeMode::Shrink if (first_full..=last_full).contains(&i) => {
                    mean(i - before, i + after)
                }
                EdgeMode::Shrink => {
                    let r = i.min(len - 1 - i).min(before);
                    mean(i - r, i + r)
                }
            })
            .collect();

        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&Transform> {
        self.points.last()
    }

    pub fn as_slice(&self) -> &[Transform] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> + '_ {
        self.points.iter()
    }

    /// Horizontal channel.
    pub fn x(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.dx)
    }

    /// Vertical channel.
    pub fn y(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.dy)
    }

    /// Rotation channel.
    pub fn angle(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.da)
    }
}

impl From<Vec<Transform>> for Trajectory {
    fn from(points: Vec<Transform>) -> Self {
        Self { points }
    }
}

/// Compute corrective transforms.
///
/// `correction[i] = raw_deltas[i] + (smoothed[i] - raw[i])`. All three inputs must be of the same
/// length.
pub fn synthesize(
    raw_deltas: &[MotionDelta],
    raw: &Trajectory,
    smoothed: &Trajectory,
) -> Result<Vec<Transform>> {
    ensure!(
        raw_deltas.len() == raw.len() && raw.len() == smoothed.len(),
        "length mismatch: {} deltas, {} raw and {} smoothed trajectory entries",
        raw_deltas.len(),
        raw.len(),
        smoothed.len()
    );

    Ok(raw_deltas
        .iter()
        .zip(raw.iter().zip(smoothed.iter()))
        .map(|(&delta, (&raw, &smooth))| delta + (smooth - raw))
        .collect())
}

/// Assign a corrective transform to every frame of the video.
///
/// Frame `i` of the first `frame_count - 1` frames uses `corrections[i]`. The last frame has no
/// outgoing transition, and uses the smoothing residual of the final trajectory entry. A single
/// frame uses the identity.
pub fn per_frame_corrections(
    frame_count: usize,
    corrections: &[Transform],
    raw: &Trajectory,
    smoothed: &Trajectory,
) -> Result<Vec<Transform>> {
    if frame_count == 0 {
        return Ok(vec![]);
    }

    ensure!(
        corrections.len() == frame_count - 1,
        "{} corrections for {frame_count} frames",
        corrections.len()
    );

    let last = match (raw.last(), smoothed.last()) {
        (Some(&raw), Some(&smooth)) => smooth - raw,
        _ => Transform::ZERO,
    };

    Ok(corrections
        .iter()
        .copied()
        .chain(std::iter::once(last))
        .collect())
}
