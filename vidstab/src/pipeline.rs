//! # Stabilization pipeline
//!
//! Two sequential passes over the input. The first pass estimates frame-to-frame motion, which is
//! then accumulated, smoothed and turned into corrective transforms. The second pass rewinds the
//! source and warps every frame with its correction.

use crate::prelude::v1::*;
use crate::trajectory::{per_frame_corrections, synthesize, MotionDelta};
use crate::warp::required_margin;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stabilization settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Keypoint detection strategy.
    pub detector: DetectorKind,
    /// Number of trajectory entries averaged by the smoother.
    pub smoothing_window: usize,
    /// Boundary handling of the smoother.
    pub smoothing_edge: EdgeMode,
    /// Fill rule for exposed pixels.
    pub border_type: BorderKind,
    /// Border size. Negative values crop the output.
    pub border_size: isize,
    /// Minimal number of tracked keypoints for a motion estimate.
    pub min_matches: usize,
    /// Number of frames warped concurrently when frames are independent.
    pub parallel_batch: usize,
    /// Detector properties, by name.
    pub detector_properties: BTreeMap<String, PropertyValue>,
    /// Estimator properties, by name.
    pub estimator_properties: BTreeMap<String, PropertyValue>,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            smoothing_window: 30,
            smoothing_edge: EdgeMode::default(),
            border_type: BorderKind::default(),
            border_size: 0,
            min_matches: 3,
            parallel_batch: 8,
            detector_properties: Default::default(),
            estimator_properties: Default::default(),
        }
    }
}

impl StabilizerConfig {
    pub fn border_policy(&self) -> BorderPolicy {
        BorderPolicy::new(self.border_type, self.border_size)
    }

    /// Check the settings that do not depend on the input.
    pub fn check(&self) -> Result<()> {
        ensure!(self.smoothing_window > 0, "smoothing window must be positive");
        ensure!(
            self.min_matches >= 2,
            "at least 2 matches are needed for a rigid fit, got {}",
            self.min_matches
        );
        ensure!(self.parallel_batch > 0, "parallel batch size must be positive");
        Ok(())
    }

    /// Check the settings against frames of the given size.
    pub fn validate(&self, (width, height): (usize, usize)) -> Result<()> {
        self.check()?;
        ensure!(width > 0 && height > 0, "empty {width}x{height} frames");
        self.border_policy().output_dim(width, height)?;
        Ok(())
    }
}

/// Intermediate results of a stabilization run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    deltas: Vec<MotionDelta>,
    raw: Trajectory,
    smoothed: Trajectory,
    corrections: Vec<Transform>,
}

/// Single row of the trajectory CSV export.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsRow {
    pub frame: usize,
    pub raw_x: f64,
    pub raw_y: f64,
    pub raw_a: f64,
    pub smooth_x: f64,
    pub smooth_y: f64,
    pub smooth_a: f64,
    pub dx: f64,
    pub dy: f64,
    pub da: f64,
}

impl Diagnostics {
    /// Estimated motion deltas, degenerate estimates replaced with zero.
    pub fn deltas(&self) -> &[MotionDelta] {
        &self.deltas
    }

    pub fn raw(&self) -> &Trajectory {
        &self.raw
    }

    pub fn smoothed(&self) -> &Trajectory {
        &self.smoothed
    }

    /// Per-frame corrective transforms, one for every frame.
    pub fn corrections(&self) -> &[Transform] {
        &self.corrections
    }

    /// Flatten into one row per trajectory entry.
    pub fn rows(&self) -> Vec<DiagnosticsRow> {
        self.raw
            .iter()
            .zip(self.smoothed.iter())
            .zip(self.corrections.iter())
            .enumerate()
            .map(|(frame, ((raw, smooth), c))| DiagnosticsRow {
                frame,
                raw_x: raw.dx,
                raw_y: raw.dy,
                raw_a: raw.da,
                smooth_x: smooth.dx,
                smooth_y: smooth.dy,
                smooth_a: smooth.da,
                dx: c.dx,
                dy: c.dy,
                da: c.da,
            })
            .collect()
    }
}

/// Summary of a stabilization run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StabilizationReport {
    /// Number of frames written to the sink.
    pub frames_processed: usize,
    /// Number of motion estimates that fell back to zero motion.
    pub degenerate_estimates: usize,
    /// Why the input ended before it was exhausted.
    pub early_termination: Option<String>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl fmt::Display for StabilizationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} frames processed, {} degenerate estimates",
            self.frames_processed, self.degenerate_estimates
        )?;

        if let Some(reason) = &self.early_termination {
            write!(f, ", terminated early: {reason}")?;
        }

        if self.cancelled {
            write!(f, ", cancelled")?;
        }

        Ok(())
    }
}

/// Result of the motion estimation pass.
struct Estimated {
    frame_count: usize,
    deltas: Vec<MotionDelta>,
    /// Pixel format of the first frame, which every output frame gets.
    format: Option<PixelFormat>,
}

/// Two-pass video stabilizer.
pub struct Stabilizer {
    config: StabilizerConfig,
    detector: Box<dyn KeypointDetector>,
    estimator: Box<dyn Estimator>,
    layer: Option<Arc<dyn Layer>>,
    cancel: Arc<AtomicBool>,
    diagnostics: Option<Diagnostics>,
}

impl Stabilizer {
    /// Create a new stabilizer.
    ///
    /// The configuration is checked, and detector and estimator properties are applied here, so
    /// malformed settings fail before any frame is read. Settings that depend on the frame size
    /// are checked at the start of [`run`](Self::run).
    ///
    /// # Arguments
    ///
    /// * `config` - stabilization settings.
    /// * `estimator` - motion estimator to use in the first pass.
    pub fn new(config: StabilizerConfig, estimator: impl Estimator + 'static) -> Result<Self> {
        config.check()?;

        let mut detector = create_detector(config.detector);
        detector
            .apply_props(&config.detector_properties)
            .with_context(|| format!("configuring {} detector", config.detector))?;

        let mut estimator: Box<dyn Estimator> = Box::new(estimator);

        if estimator.props_mut().iter().any(|(n, _)| *n == "min_matches") {
            estimator.set_prop("min_matches", &PropertyValue::Usize(config.min_matches))?;
        }

        estimator
            .apply_props(&config.estimator_properties)
            .context("configuring estimator")?;

        Ok(Self {
            config,
            detector,
            estimator,
            layer: None,
            cancel: Default::default(),
            diagnostics: None,
        })
    }

    /// Composite every frame onto the previous output with the given layering function.
    pub fn layer(self, layer: Arc<dyn Layer>) -> Self {
        Self {
            layer: Some(layer),
            ..self
        }
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Get a handle that cancels the run when set to `true`.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Get intermediate results of the last run.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.diagnostics.as_ref()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Stabilize a video.
    ///
    /// Frame count and order are preserved, unless the source fails mid-way or the run is
    /// cancelled. In both cases frames processed so far are still written out, and the report
    /// says why the run ended. Frames are written in the pixel format of the first frame.
    ///
    /// # Arguments
    ///
    /// * `source` - input frames. Must support rewinding.
    /// * `sink` - output for the stabilized frames.
    pub fn run(
        &mut self,
        source: &mut (impl FrameSource + ?Sized),
        sink: &mut (impl FrameSink + ?Sized),
    ) -> Result<StabilizationReport> {
        let dim = source.dimensions();

        // Sources without frames may not know their size.
        if dim == (0, 0) {
            self.config.check()?;
        } else {
            self.config.validate(dim)?;
        }

        let mut report = StabilizationReport::default();

        log::info!("Estimating motion of {}x{} video", dim.0, dim.1);

        let Estimated {
            frame_count,
            deltas,
            format,
        } = self.estimate_pass(source, dim, &mut report)?;

        let format = match format {
            Some(format) if frame_count > 0 => format,
            _ => {
                log::info!("{report}");
                sink.finish()?;
                return Ok(report);
            }
        };

        let raw = Trajectory::build(&deltas);
        let smoothed = raw.smooth(self.config.smoothing_window, self.config.smoothing_edge)?;
        let corrections = synthesize(&deltas, &raw, &smoothed)?;
        let corrections = per_frame_corrections(frame_count, &corrections, &raw, &smoothed)?;

        log::info!(
            "Smoothed trajectory of {} transitions, warping {frame_count} frames",
            raw.len()
        );

        let policy = self.config.border_policy();
        let margin = if policy.size < 0 {
            required_margin(&corrections, dim.0, dim.1)
        } else {
            0
        };

        let mut warper = Warper::new(policy, margin);

        if let Some(layer) = &self.layer {
            warper = warper.layer(layer.clone());
        }

        self.diagnostics = Some(Diagnostics {
            deltas,
            raw,
            smoothed,
            corrections,
        });

        if !report.cancelled {
            source.rewind().context("rewinding frame source")?;
            self.warp_pass(source, sink, &mut warper, dim, format, &mut report)?;
        }

        sink.finish()?;

        log::info!("{report}");

        Ok(report)
    }

    /// Read frames and estimate motion between every consecutive pair.
    fn estimate_pass(
        &mut self,
        source: &mut (impl FrameSource + ?Sized),
        dim: (usize, usize),
        report: &mut StabilizationReport,
    ) -> Result<Estimated> {
        let mut prev: Option<GrayImage> = None;
        let mut deltas = vec![];
        let mut frame_count = 0;
        let mut format = None;

        loop {
            if self.cancelled() {
                log::warn!("Cancelled during motion estimation");
                report.cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Frame source ended after {frame_count} frames: {e:#}");
                    report.early_termination = Some(format!("{e:#}"));
                    break;
                }
            };

            ensure!(
                frame.dim() == dim,
                "frame {frame_count} is {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                dim.0,
                dim.1
            );

            format.get_or_insert(frame.format());

            let gray = frame.to_gray();

            if let Some(prev) = &prev {
                let estimate = self.estimator.estimate(prev, &gray, &*self.detector);

                if let Estimate::Degenerate(reason) = estimate {
                    log::debug!("Degenerate estimate at frame {frame_count}: {reason}");
                    report.degenerate_estimates += 1;
                }

                deltas.push(estimate.delta());
            }

            prev = Some(gray);
            frame_count += 1;
        }

        Ok(Estimated {
            frame_count,
            deltas,
            format,
        })
    }

    /// Warp and write out every frame with its correction.
    fn warp_pass(
        &self,
        source: &mut (impl FrameSource + ?Sized),
        sink: &mut (impl FrameSink + ?Sized),
        warper: &mut Warper,
        dim: (usize, usize),
        format: PixelFormat,
        report: &mut StabilizationReport,
    ) -> Result<()> {
        let corrections = self
            .diagnostics
            .as_ref()
            .map(|d| d.corrections())
            .unwrap_or_default();

        let batch_size = if warper.is_compositing() {
            1
        } else {
            self.config.parallel_batch
        };

        let mut batch = Vec::with_capacity(batch_size);
        let mut idx = 0;

        while idx < corrections.len() {
            if self.cancelled() {
                log::warn!("Cancelled after {} frames", report.frames_processed);
                report.cancelled = true;
                break;
            }

            batch.clear();
            let mut exhausted = false;

            while batch.len() < batch_size && idx + batch.len() < corrections.len() {
                match source.next_frame() {
                    Ok(Some(frame)) => {
                        ensure!(frame.dim() == dim, "frame size changed between passes");
                        if frame.format() != format {
                            log::debug!(
                                "Converting frame {} from {:?} to {format:?}",
                                idx + batch.len(),
                                frame.format()
                            );
                            batch.push(frame.to_format(format));
                        } else {
                            batch.push(frame);
                        }
                    }
                    Ok(None) => {
                        report.early_termination =
                            Some("frame source ended early on the second pass".into());
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        report.early_termination = Some(format!("{e:#}"));
                        exhausted = true;
                        break;
                    }
                }
            }

            let batch_corrections = &corrections[idx..(idx + batch.len())];

            let out = if warper.is_compositing() {
                batch
                    .iter()
                    .zip(batch_corrections)
                    .map(|(frame, c)| warper.warp(frame, c))
                    .collect::<Result<Vec<_>>>()?
            } else {
                let warper = &*warper;
                batch
                    .par_iter()
                    .zip(batch_corrections.par_iter())
                    .map(|(frame, c)| warper.warp_independent(frame, c))
                    .collect::<Vec<_>>()
            };

            for frame in &out {
                sink.write_frame(frame)?;
            }

            idx += out.len();
            report.frames_processed += out.len();

            if exhausted {
                if let Some(reason) = &report.early_termination {
                    log::warn!("Frame source ended after {idx} frames: {reason}");
                }
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Reports the same motion for every pair.
    struct Constant(MotionDelta);

    impl Properties for Constant {}

    impl Estimator for Constant {
        fn estimate(&mut self, _: &GrayImage, _: &GrayImage, _: &dyn KeypointDetector) -> Estimate {
            Estimate::Motion(self.0)
        }
    }

    /// Reports a degenerate estimate for every pair.
    struct Blind;

    impl Properties for Blind {}

    impl Estimator for Blind {
        fn estimate(&mut self, _: &GrayImage, _: &GrayImage, _: &dyn KeypointDetector) -> Estimate {
            Estimate::Degenerate(DegenerateReason::NoMatches)
        }
    }

    /// Has a `min_matches` knob.
    #[derive(Default)]
    struct Knobbed {
        min_matches: usize,
    }

    impl Properties for Knobbed {
        fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
            vec![(
                "min_matches",
                PropertyMut::usize(&mut self.min_matches, 2, 1000),
            )]
        }
    }

    impl Estimator for Knobbed {
        fn estimate(&mut self, _: &GrayImage, _: &GrayImage, _: &dyn KeypointDetector) -> Estimate {
            Estimate::Motion(Transform::new(self.min_matches as f64, 0.0, 0.0))
        }
    }

    /// Fails after yielding a fixed number of frames.
    struct Failing {
        inner: MemorySource,
        fail_after: usize,
        read: usize,
    }

    impl FrameSource for Failing {
        fn dimensions(&self) -> (usize, usize) {
            self.inner.dimensions()
        }

        fn frame_rate(&self) -> Option<f64> {
            None
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.read == self.fail_after {
                bail!("truncated stream");
            }
            self.read += 1;
            self.inner.next_frame()
        }

        fn rewind(&mut self) -> Result<()> {
            self.read = 0;
            self.inner.rewind()
        }
    }

    fn textured(n: usize) -> Vec<Frame> {
        (0..n)
            .map(|_| {
                Frame::from_fn(32, 24, PixelFormat::Rgb8, |x, y, px| {
                    let v = ((x * 31 + y * 17) % 251) as u8;
                    px.copy_from_slice(&[v, v / 2, 255 - v]);
                })
            })
            .collect()
    }

    fn config(window: usize) -> StabilizerConfig {
        StabilizerConfig {
            smoothing_window: window,
            detector: DetectorKind::Dense,
            ..Default::default()
        }
    }

    #[test]
    fn static_video_is_unchanged() {
        let frames = textured(5);
        let mut source = MemorySource::new(frames.clone());
        let mut sink = MemorySink::new();

        let mut stab = Stabilizer::new(config(3), Constant(Transform::ZERO)).unwrap();
        let report = stab.run(&mut source, &mut sink).unwrap();

        assert_eq!(report.frames_processed, 5);
        assert_eq!(report.degenerate_estimates, 0);
        assert!(report.early_termination.is_none());
        assert!(sink.is_finished());
        assert_eq!(sink.frames(), &frames[..]);

        let diag = stab.diagnostics().unwrap();
        assert!(diag.corrections().iter().all(Transform::is_zero));
        assert_eq!(diag.rows().len(), 4);
    }

    #[test]
    fn linear_pan_is_kept() {
        let pan = Transform::new(2.0, 0.0, 0.0);
        let frames = textured(21);
        let mut sink = MemorySink::new();

        let mut stab = Stabilizer::new(config(10), Constant(pan)).unwrap();
        let report = stab
            .run(&mut MemorySource::new(frames), &mut sink)
            .unwrap();
        assert_eq!(report.frames_processed, 21);

        let diag = stab.diagnostics().unwrap();
        assert_eq!(diag.corrections().len(), 21);
        assert_approx_eq!(diag.raw().last().unwrap().dx, 40.0, 1e-9);

        // Steady motion passes through, apart from the half step lag of an even window.
        for i in 5..=15 {
            let c = diag.corrections()[i] - pan;
            assert_approx_eq!(c.dx, -1.0, 1e-9);
            assert_approx_eq!(c.dy, 0.0, 1e-9);
            assert_approx_eq!(c.da, 0.0, 1e-9);
        }
    }

    #[test]
    fn linear_pan_shrink_edges() {
        let pan = Transform::new(2.0, 0.0, 0.0);
        let mut stab = Stabilizer::new(
            StabilizerConfig {
                smoothing_edge: EdgeMode::Shrink,
                ..config(9)
            },
            Constant(pan),
        )
        .unwrap();

        stab.run(&mut MemorySource::new(textured(11)), &mut MemorySink::new())
            .unwrap();

        let diag = stab.diagnostics().unwrap();
        for c in &diag.corrections()[..10] {
            assert_approx_eq!((*c - pan).dx, 0.0, 1e-9);
        }
        assert_approx_eq!(diag.corrections()[10].dx, 0.0, 1e-9);
    }

    #[test]
    fn negative_border_shrinks_output() {
        let frames = textured(4);
        let mut sink = MemorySink::new();

        let mut stab = Stabilizer::new(
            StabilizerConfig {
                border_size: -2,
                ..config(3)
            },
            Constant(Transform::ZERO),
        )
        .unwrap();

        stab.run(&mut MemorySource::new(frames.clone()), &mut sink)
            .unwrap();

        assert_eq!(sink.frames().len(), 4);
        for (out, input) in sink.frames().iter().zip(&frames) {
            assert_eq!(out, &input.crop(2, 2, 28, 20));
        }
    }

    #[test]
    fn invalid_config_fails_before_reading() {
        let mut source = Failing {
            inner: MemorySource::new(textured(3)),
            fail_after: 0,
            read: 0,
        };

        let mut stab = Stabilizer::new(
            StabilizerConfig {
                border_size: -12,
                ..config(3)
            },
            Constant(Transform::ZERO),
        )
        .unwrap();

        let err = stab.run(&mut source, &mut MemorySink::new()).unwrap_err();
        assert!(err.to_string().contains("border size"), "{err}");

        for bad in [
            StabilizerConfig {
                smoothing_window: 0,
                ..config(3)
            },
            StabilizerConfig {
                min_matches: 0,
                ..config(3)
            },
            StabilizerConfig {
                parallel_batch: 0,
                ..config(3)
            },
        ] {
            assert!(Stabilizer::new(bad, Constant(Transform::ZERO)).is_err());
        }

        let unknown = StabilizerConfig {
            detector_properties: [("sharpness".to_string(), PropertyValue::Float(1.0))].into(),
            ..config(3)
        };
        assert!(Stabilizer::new(unknown, Constant(Transform::ZERO)).is_err());
    }

    #[test]
    fn min_matches_reaches_estimator() {
        let mut stab = Stabilizer::new(
            StabilizerConfig {
                min_matches: 7,
                ..config(1)
            },
            Knobbed::default(),
        )
        .unwrap();

        stab.run(&mut MemorySource::new(textured(2)), &mut MemorySink::new())
            .unwrap();
        assert_eq!(stab.diagnostics().unwrap().deltas()[0].dx, 7.0);
    }

    #[test]
    fn degenerate_estimates_are_counted() {
        let frames = textured(6);
        let mut sink = MemorySink::new();
        let mut stab = Stabilizer::new(config(3), Blind).unwrap();

        let report = stab.run(&mut MemorySource::new(frames.clone()), &mut sink).unwrap();

        assert_eq!(report.degenerate_estimates, 5);
        assert_eq!(sink.frames(), &frames[..]);
    }

    #[test]
    fn source_failure_keeps_partial_output() {
        let mut source = Failing {
            inner: MemorySource::new(textured(10)),
            fail_after: 6,
            read: 0,
        };
        let mut sink = MemorySink::new();

        let mut stab =
            Stabilizer::new(config(3), Constant(Transform::new(0.5, 0.0, 0.0))).unwrap();
        let report = stab.run(&mut source, &mut sink).unwrap();

        assert_eq!(report.frames_processed, 6);
        assert_eq!(sink.frames().len(), 6);
        assert!(report
            .early_termination
            .as_deref()
            .unwrap()
            .contains("truncated"));
        assert!(report.to_string().contains("terminated early"));
    }

    #[test]
    fn cancelled_run_emits_nothing_more() {
        let mut sink = MemorySink::new();
        let mut stab = Stabilizer::new(config(3), Constant(Transform::ZERO)).unwrap();
        stab.cancel_handle().store(true, Ordering::Relaxed);

        let report = stab
            .run(&mut MemorySource::new(textured(5)), &mut sink)
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.frames_processed, 0);
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn compositing_passes_first_frame() {
        let frames = textured(4);
        let mut sink = MemorySink::new();

        let mut stab = Stabilizer::new(
            StabilizerConfig {
                border_type: BorderKind::Trail,
                ..config(3)
            },
            Constant(Transform::new(1.0, 0.0, 0.0)),
        )
        .unwrap()
        .layer(Arc::new(crate::warp::overlay));

        let report = stab
            .run(&mut MemorySource::new(frames), &mut sink)
            .unwrap();

        assert_eq!(report.frames_processed, 4);
        assert!(sink.frames().iter().all(|f| f.dim() == (32, 24)));
    }

    #[test]
    fn single_and_empty_input() {
        let frames = textured(1);
        let mut sink = MemorySink::new();
        let mut stab = Stabilizer::new(config(30), Constant(Transform::ZERO)).unwrap();

        let report = stab
            .run(&mut MemorySource::new(frames.clone()), &mut sink)
            .unwrap();
        assert_eq!(report.frames_processed, 1);
        assert_eq!(sink.frames(), &frames[..]);

        let mut sink = MemorySink::new();
        let report = stab.run(&mut MemorySource::new(vec![]), &mut sink).unwrap();
        assert_eq!(report.frames_processed, 0);
        assert!(sink.is_finished());
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn mixed_formats_follow_first_frame() {
        let gray = Frame::from_fn(16, 16, PixelFormat::Gray8, |x, y, px| {
            px[0] = (x * 9 + y * 5) as u8
        });
        let rgb = gray.to_format(PixelFormat::Rgb8);
        let frames = vec![gray.clone(), rgb, gray.clone()];

        for border_type in [BorderKind::Trail, BorderKind::Black] {
            let mut sink = MemorySink::new();
            let mut stab = Stabilizer::new(
                StabilizerConfig {
                    border_type,
                    ..config(3)
                },
                Constant(Transform::ZERO),
            )
            .unwrap();

            let report = stab
                .run(&mut MemorySource::new(frames.clone()), &mut sink)
                .unwrap();

            assert_eq!(report.frames_processed, 3);
            assert!(sink.frames().iter().all(|f| f == &gray), "{border_type}");
        }
    }

    #[test]
    fn config_from_json() {
        let config: StabilizerConfig = serde_json::from_str(
            r#"{
                "detector": "fast",
                "smoothing_window": 15,
                "border_type": "reflect",
                "border_size": -4,
                "detector_properties": { "threshold": 30 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.detector, DetectorKind::Fast);
        assert_eq!(config.smoothing_window, 15);
        assert_eq!(config.border_type, BorderKind::Reflect);
        assert_eq!(config.border_size, -4);
        assert_eq!(config.min_matches, 3);
        assert_eq!(
            config.detector_properties.get("threshold"),
            Some(&PropertyValue::Usize(30))
        );

        assert!(serde_json::from_str::<StabilizerConfig>(r#"{ "border_type": "wrap" }"#).is_err());
    }
}
