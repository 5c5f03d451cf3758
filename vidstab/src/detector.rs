//! # Keypoint detection
//!
//! Motion estimation only needs a capability to locate trackable points in a grayscale frame.
//! This module provides the [`KeypointDetector`] trait and a closed set of strategies, selectable
//! through [`DetectorKind`] and [`create_detector`].

use crate::prelude::v1::*;
use crate::utils::{min_eigenvalue, structure_tensor};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single detected point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    /// Position in pixel coordinates.
    pub pos: na::Point2<f32>,
    /// Detector response. Only comparable within a single detector.
    pub score: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self {
            pos: na::Point2::new(x, y),
            score,
        }
    }
}

/// Ordered set of keypoints detected in one frame.
pub type KeypointSet = Vec<Keypoint>;

/// Keypoint detection capability.
pub trait KeypointDetector: Properties + Send + Sync {
    /// Locate trackable points in a grayscale frame.
    ///
    /// Detection never fails. Images that are too small, or have no texture, yield an empty set.
    fn detect(&self, img: &GrayImage) -> KeypointSet;
}

/// Available detection strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Shi-Tomasi "good features to track" corners.
    #[default]
    Gftt,
    /// Harris corners.
    Harris,
    /// FAST segment test corners.
    Fast,
    /// Regular grid, independent of image content.
    Dense,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 4] = [Self::Gftt, Self::Harris, Self::Fast, Self::Dense];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gftt => "gftt",
            Self::Harris => "harris",
            Self::Fast => "fast",
            Self::Dense => "dense",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("unknown detector \"{s}\" (expected gftt, harris, fast or dense)"))
    }
}

/// Create a detector with default settings.
pub fn create_detector(kind: DetectorKind) -> Box<dyn KeypointDetector> {
    match kind {
        DetectorKind::Gftt => Box::new(GfttDetector::default()),
        DetectorKind::Harris => Box::new(HarrisDetector::default()),
        DetectorKind::Fast => Box::new(FastDetector::default()),
        DetectorKind::Dense => Box::new(DenseDetector::default()),
    }
}

/// Common corner selection parameters.
#[derive(Clone, Copy, Debug)]
pub struct CornerSelection {
    /// Maximum number of corners to return, strongest first.
    pub max_corners: usize,
    /// Minimal accepted response, relative to the strongest one.
    pub quality_level: f32,
    /// Minimal euclidean distance between returned corners.
    pub min_distance: f32,
}

impl Default for CornerSelection {
    fn default() -> Self {
        Self {
            max_corners: 200,
            quality_level: 0.01,
            min_distance: 30.0,
        }
    }
}

impl CornerSelection {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            (
                "max_corners",
                PropertyMut::usize(&mut self.max_corners, 1, 5000),
            ),
            (
                "quality_level",
                PropertyMut::float(&mut self.quality_level, 0.0, 1.0),
            ),
            (
                "min_distance",
                PropertyMut::float(&mut self.min_distance, 0.0, 500.0),
            ),
        ]
    }

    /// Pick the strongest, well separated local maxima of a response map.
    pub fn select(&self, response: &[f32], width: usize, height: usize) -> KeypointSet {
        let max = response.iter().copied().fold(0f32, f32::max);

        if max <= 0.0 {
            return vec![];
        }

        let threshold = max * self.quality_level;

        let mut candidates = local_maxima(response, width, height)
            .filter(|kp| kp.score >= threshold)
            .collect::<Vec<_>>();

        self.thin(&mut candidates);

        candidates
    }

    /// Sort candidates by score and drop those too close to a stronger one.
    fn thin(&self, candidates: &mut KeypointSet) {
        // Sort is stable, and candidates arrive in raster order, so ties resolve deterministically.
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let min_dist_sq = self.min_distance * self.min_distance;
        let mut accepted: KeypointSet = Vec::with_capacity(self.max_corners);

        for kp in candidates.iter() {
            if accepted.len() >= self.max_corners {
                break;
            }

            if accepted
                .iter()
                .all(|a| (a.pos - kp.pos).norm_squared() >= min_dist_sq)
            {
                accepted.push(*kp);
            }
        }

        *candidates = accepted;
    }
}

/// Iterate strict 3x3 local maxima with positive response.
fn local_maxima(
    response: &[f32],
    width: usize,
    height: usize,
) -> impl Iterator<Item = Keypoint> + '_ {
    (1..height.saturating_sub(1))
        .flat_map(move |y| (1..width.saturating_sub(1)).map(move |x| (x, y)))
        .filter_map(move |(x, y)| {
            let v = response[y * width + x];

            if v <= 0.0 {
                return None;
            }

            let is_max = (-1isize..=1)
                .flat_map(|oy| (-1isize..=1).map(move |ox| (ox, oy)))
                .filter(|&o| o != (0, 0))
                .all(|(ox, oy)| {
                    let n = response[(y as isize + oy) as usize * width + (x as isize + ox) as usize];
                    // Break plateaus in favour of the earlier pixel.
                    if (oy, ox) < (0, 0) {
                        v > n
                    } else {
                        v >= n
                    }
                });

            is_max.then(|| Keypoint::new(x as f32, y as f32, v))
        })
}

/// Shi-Tomasi corner detector.
///
/// The response is the smaller eigenvalue of the structure tensor summed over a block.
#[derive(Clone, Debug)]
pub struct GfttDetector {
    pub selection: CornerSelection,
    pub block_size: usize,
}

impl Default for GfttDetector {
    fn default() -> Self {
        Self {
            selection: Default::default(),
            block_size: 3,
        }
    }
}

impl Properties for GfttDetector {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        let mut props = self.selection.props_mut();
        props.push(("block_size", PropertyMut::usize(&mut self.block_size, 1, 15)));
        props
    }
}

impl KeypointDetector for GfttDetector {
    fn detect(&self, img: &GrayImage) -> KeypointSet {
        let (w, h) = img.dim();
        if w < 3 || h < 3 {
            return vec![];
        }

        let response = structure_tensor(img, self.block_size | 1)
            .into_iter()
            .map(|(a, b, c)| min_eigenvalue(a, b, c))
            .collect::<Vec<_>>();

        self.selection.select(&response, w, h)
    }
}

/// Harris corner detector.
#[derive(Clone, Debug)]
pub struct HarrisDetector {
    pub selection: CornerSelection,
    pub block_size: usize,
    /// Harris free parameter.
    pub k: f32,
}

impl Default for HarrisDetector {
    fn default() -> Self {
        Self {
            selection: Default::default(),
            block_size: 3,
            k: 0.04,
        }
    }
}

impl Properties for HarrisDetector {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        let mut props = self.selection.props_mut();
        props.push(("block_size", PropertyMut::usize(&mut self.block_size, 1, 15)));
        props.push(("k", PropertyMut::float(&mut self.k, 0.01, 0.3)));
        props
    }
}

impl KeypointDetector for HarrisDetector {
    fn detect(&self, img: &GrayImage) -> KeypointSet {
        let (w, h) = img.dim();
        if w < 3 || h < 3 {
            return vec![];
        }

        let response = structure_tensor(img, self.block_size | 1)
            .into_iter()
            .map(|(a, b, c)| (a * c - b * b) - self.k * (a + c) * (a + c))
            .collect::<Vec<_>>();

        self.selection.select(&response, w, h)
    }
}

/// Bresenham circle of radius 3 used by the segment test.
const CIRCLE_OFFSETS: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// FAST segment test corner detector.
///
/// A pixel is a corner if at least `arc_length` contiguous pixels on the surrounding circle are
/// all brighter, or all darker, than the centre by more than `threshold`.
#[derive(Clone, Debug)]
pub struct FastDetector {
    pub selection: CornerSelection,
    pub threshold: f32,
    pub arc_length: usize,
}

impl Default for FastDetector {
    fn default() -> Self {
        Self {
            selection: CornerSelection {
                quality_level: 0.0,
                ..Default::default()
            },
            threshold: 20.0,
            arc_length: 9,
        }
    }
}

impl Properties for FastDetector {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        let mut props = self.selection.props_mut();
        props.push(("threshold", PropertyMut::float(&mut self.threshold, 1.0, 255.0)));
        props.push(("arc_length", PropertyMut::usize(&mut self.arc_length, 9, 12)));
        props
    }
}

impl FastDetector {
    /// Score a pixel, returning 0 if it is not a corner.
    ///
    /// The score is the sum of absolute differences beyond the threshold along the best arc.
    fn score(&self, img: &GrayImage, x: usize, y: usize) -> f32 {
        let center = img.get(x, y);
        let mut diffs = [0f32; 16];

        for (d, &(ox, oy)) in diffs.iter_mut().zip(CIRCLE_OFFSETS.iter()) {
            *d = img.get((x as isize + ox) as usize, (y as isize + oy) as usize) - center;
        }

        let arc_score = |sign: f32| {
            let mut best = 0f32;
            let mut run = 0;
            let mut run_score = 0f32;

            // Walk the circle twice to handle arcs wrapping around the start.
            for i in 0..32 {
                let d = diffs[i % 16] * sign;
                if d > self.threshold {
                    run += 1;
                    run_score += d - self.threshold;
                    if run >= self.arc_length {
                        best = best.max(run_score);
                    }
                    if run >= 16 {
                        break;
                    }
                } else {
                    run = 0;
                    run_score = 0.0;
                }
            }

            best
        };

        arc_score(1.0).max(arc_score(-1.0))
    }
}

impl KeypointDetector for FastDetector {
    fn detect(&self, img: &GrayImage) -> KeypointSet {
        let (w, h) = img.dim();
        if w <= 6 || h <= 6 {
            return vec![];
        }

        let mut response = vec![0f32; w * h];

        for y in 3..(h - 3) {
            for x in 3..(w - 3) {
                response[y * w + x] = self.score(img, x, y);
            }
        }

        self.selection.select(&response, w, h)
    }
}

/// Regular grid of points.
#[derive(Clone, Debug)]
pub struct DenseDetector {
    /// Distance between neighbouring grid points.
    pub step: usize,
    /// Distance from the image edge to the first grid point.
    pub margin: usize,
}

impl Default for DenseDetector {
    fn default() -> Self {
        Self {
            step: 20,
            margin: 10,
        }
    }
}

impl Properties for DenseDetector {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            ("step", PropertyMut::usize(&mut self.step, 1, 500)),
            ("margin", PropertyMut::usize(&mut self.margin, 0, 500)),
        ]
    }
}

impl KeypointDetector for DenseDetector {
    fn detect(&self, img: &GrayImage) -> KeypointSet {
        let (w, h) = img.dim();
        let step = self.step.max(1);

        (self.margin..h.saturating_sub(self.margin))
            .step_by(step)
            .flat_map(|y| {
                (self.margin..w.saturating_sub(self.margin))
                    .step_by(step)
                    .map(move |x| Keypoint::new(x as f32, y as f32, 1.0))
            })
            .collect()
    }
}
