//! # Motion estimator built on sparse optical flow.
//!
//! Keypoints detected in the previous frame are tracked into the current one with pyramidal
//! Lucas-Kanade optical flow. The rigid transform between the two point sets is then fit with
//! RANSAC, which makes the estimate robust against independently moving objects in the scene.

use nalgebra as na;
use vidstab::prelude::v1::*;

pub mod flow;
pub mod pyramid;
pub mod rigid;

use flow::LkParams;
use pyramid::Pyramid;
use rigid::{RansacParams, RigidFit};

/// Lucas-Kanade tracking camera estimator.
pub struct KltEstimator {
    /// Number of pyramid levels, including the full resolution one.
    pyramid_levels: usize,
    lk: LkParams,
    ransac: RansacParams,
    /// Minimal number of tracked keypoints to attempt a fit.
    min_matches: usize,
}

impl Properties for KltEstimator {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![
            (
                "pyramid_levels",
                PropertyMut::usize(&mut self.pyramid_levels, 1, 8),
            ),
            ("window_size", PropertyMut::usize(&mut self.lk.window, 3, 63)),
            ("max_iters", PropertyMut::usize(&mut self.lk.max_iters, 1, 100)),
            ("epsilon", PropertyMut::float(&mut self.lk.epsilon, 0.0001, 1.0)),
            (
                "min_eigenvalue",
                PropertyMut::float(&mut self.lk.min_eigenvalue, 0.0, 1.0),
            ),
            (
                "ransac_iters",
                PropertyMut::usize(&mut self.ransac.iterations, 1, 5000),
            ),
            (
                "inlier_threshold",
                PropertyMut::float(&mut self.ransac.threshold, 0.1, 50.0),
            ),
            (
                "min_matches",
                PropertyMut::usize(&mut self.min_matches, 2, 1000),
            ),
        ]
    }
}

impl KltEstimator {
    pub fn pyramid_levels(self, pyramid_levels: usize) -> Self {
        Self {
            pyramid_levels,
            ..self
        }
    }

    pub fn window_size(self, window: usize) -> Self {
        Self {
            lk: LkParams { window, ..self.lk },
            ..self
        }
    }

    pub fn ransac_iters(self, iterations: usize) -> Self {
        Self {
            ransac: RansacParams {
                iterations,
                ..self.ransac
            },
            ..self
        }
    }

    pub fn inlier_threshold(self, threshold: f32) -> Self {
        Self {
            ransac: RansacParams {
                threshold,
                ..self.ransac
            },
            ..self
        }
    }

    pub fn seed(self, seed: u64) -> Self {
        Self {
            ransac: RansacParams { seed, ..self.ransac },
            ..self
        }
    }

    pub fn min_matches(self, min_matches: usize) -> Self {
        Self {
            min_matches,
            ..self
        }
    }
}

impl Default for KltEstimator {
    fn default() -> Self {
        Self {
            pyramid_levels: 4,
            lk: LkParams::default(),
            ransac: RansacParams::default(),
            min_matches: 3,
        }
    }
}

impl Estimator for KltEstimator {
    fn estimate(
        &mut self,
        prev: &GrayImage,
        cur: &GrayImage,
        detector: &dyn KeypointDetector,
    ) -> Estimate {
        let keypoints = detector.detect(prev);

        if keypoints.is_empty() {
            return Estimate::Degenerate(DegenerateReason::NoMatches);
        }

        let prev_pyr = Pyramid::new(prev, self.pyramid_levels);
        let cur_pyr = Pyramid::new(cur, self.pyramid_levels);

        let points = keypoints.iter().map(|k| k.pos).collect::<Vec<_>>();
        let tracked = flow::track(&prev_pyr, &cur_pyr, &points, &self.lk);

        let pairs = points
            .iter()
            .zip(tracked)
            .filter_map(|(p, t)| t.map(|t| (p.cast::<f64>(), t.cast::<f64>())))
            .collect::<Vec<(na::Point2<f64>, na::Point2<f64>)>>();

        log::trace!("Tracked {}/{} keypoints", pairs.len(), points.len());

        if pairs.is_empty() {
            return Estimate::Degenerate(DegenerateReason::NoMatches);
        }

        if pairs.len() < self.min_matches {
            return Estimate::Degenerate(DegenerateReason::TooFewMatches {
                found: pairs.len(),
                required: self.min_matches,
            });
        }

        let params = RansacParams {
            min_inliers: self.min_matches,
            ..self.ransac
        };

        match rigid::ransac(&pairs, &params) {
            RigidFit::Fit { transform, inliers } if transform.is_finite() => {
                log::trace!("Rigid fit {transform:?} with {inliers} inliers");
                Estimate::Motion(transform)
            }
            _ => Estimate::Degenerate(DegenerateReason::NoFit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidstab::detector::DenseDetector;

    fn scene(shift_x: f64, shift_y: f64, angle: f64) -> GrayImage {
        let (sin, cos) = angle.sin_cos();
        let (cx, cy) = (80.0, 60.0);
        GrayImage::from_fn(160, 120, |x, y| {
            // Sample the texture at the inverse-transformed position.
            let (x, y) = (x as f64 - shift_x - cx, y as f64 - shift_y - cy);
            let (x, y) = (cos * x + sin * y + cx, -sin * x + cos * y + cy);
            let v = (x * 0.19).sin() * (y * 0.23).cos() + 0.5 * (x * 0.07 - y * 0.05).sin();
            (120.0 + 80.0 * v) as f32
        })
    }

    #[test]
    fn estimates_translation() {
        let mut est = KltEstimator::default();
        let detector = create_detector(DetectorKind::Gftt);

        let delta = est
            .estimate(&scene(0.0, 0.0, 0.0), &scene(2.0, -1.0, 0.0), &*detector)
            .delta();

        assert!((delta.dx - 2.0).abs() < 0.2, "{delta:?}");
        assert!((delta.dy + 1.0).abs() < 0.2, "{delta:?}");
        assert!(delta.da.abs() < 0.01, "{delta:?}");
    }

    #[test]
    fn estimates_rotation() {
        let mut est = KltEstimator::default();
        let detector = DenseDetector::default();

        let delta = est
            .estimate(&scene(0.0, 0.0, 0.0), &scene(0.0, 0.0, 0.02), &detector)
            .delta();

        assert!((delta.da - 0.02).abs() < 0.005, "{delta:?}");
    }

    #[test]
    fn flat_frames_are_degenerate() {
        let mut est = KltEstimator::default();
        let flat = GrayImage::from_fn(64, 64, |_, _| 50.0);

        let estimate = est.estimate(&flat, &flat, &DenseDetector::default());
        assert!(estimate.is_degenerate());
        assert!(estimate.delta().is_zero());

        let estimate = est.estimate(&flat, &flat, &*create_detector(DetectorKind::Gftt));
        assert_eq!(
            estimate,
            Estimate::Degenerate(DegenerateReason::NoMatches)
        );
    }

    #[test]
    fn stabilizes_panning_video() {
        let frames = (0..4)
            .map(|i| {
                let img = scene(2.0 * i as f64, -(i as f64), 0.0);
                Frame::from_fn(160, 120, PixelFormat::Gray8, |x, y, px| {
                    px[0] = img.get(x, y).round() as u8
                })
            })
            .collect::<Vec<_>>();

        let config = StabilizerConfig {
            smoothing_window: 3,
            ..Default::default()
        };
        let mut stab = Stabilizer::new(config, KltEstimator::default()).unwrap();
        let mut sink = MemorySink::new();

        let report = stab.run(&mut MemorySource::new(frames), &mut sink).unwrap();
        assert_eq!(report.frames_processed, 4);
        assert_eq!(report.degenerate_estimates, 0);
        assert_eq!(sink.frames().len(), 4);

        let diag = stab.diagnostics().unwrap();
        assert_eq!(diag.deltas().len(), 3);
        for delta in diag.deltas() {
            assert!((delta.dx - 2.0).abs() < 0.3, "{delta:?}");
            assert!((delta.dy + 1.0).abs() < 0.3, "{delta:?}");
            assert!(delta.da.abs() < 0.01, "{delta:?}");
        }
        assert!((diag.raw().x().last().unwrap() - 6.0).abs() < 0.6);
    }

    #[test]
    fn properties() {
        let mut est = KltEstimator::default();
        est.set_prop("min_matches", &PropertyValue::Usize(1)).unwrap();
        assert_eq!(est.min_matches, 2);
        est.set_prop("window_size", &PropertyValue::Usize(15)).unwrap();
        assert_eq!(est.lk.window, 15);
        assert!(est.set_prop("threshold", &PropertyValue::Float(1.0)).is_err());
    }
}
