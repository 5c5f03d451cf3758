//! # Camera motion estimator

use crate::prelude::v1::*;
use crate::trajectory::MotionDelta;
use std::fmt;

/// Why an estimate could not be produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DegenerateReason {
    /// No keypoint could be tracked into the current frame.
    NoMatches,
    /// Fewer tracked keypoints than needed for a fit.
    TooFewMatches { found: usize, required: usize },
    /// The transform fit did not reach a consensus, or produced a non-finite result.
    NoFit,
}

impl fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoMatches => f.write_str("no matched keypoints"),
            Self::TooFewMatches { found, required } => {
                write!(f, "{found} matched keypoints, {required} required")
            }
            Self::NoFit => f.write_str("transform fit failed"),
        }
    }
}

/// Outcome of a single frame-to-frame estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Estimate {
    Motion(MotionDelta),
    Degenerate(DegenerateReason),
}

impl Estimate {
    /// Get the motion, assuming a stationary camera for degenerate estimates.
    pub fn delta(&self) -> MotionDelta {
        match self {
            Self::Motion(delta) => *delta,
            Self::Degenerate(_) => MotionDelta::ZERO,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::Degenerate(_))
    }
}

/// Generic camera motion estimator
pub trait Estimator: Properties + Send {
    /// Estimate motion from one frame to the next.
    ///
    /// This function must not fail. Anything that prevents a reliable estimate is reported as
    /// [`Estimate::Degenerate`].
    ///
    /// # Arguments
    ///
    /// * `prev` - previous grayscale frame.
    /// * `cur` - current grayscale frame.
    /// * `detector` - keypoint detector to run on `prev`.
    fn estimate(
        &mut self,
        prev: &GrayImage,
        cur: &GrayImage,
        detector: &dyn KeypointDetector,
    ) -> Estimate;

    /// Estimate motion, substituting zero motion for degenerate frames.
    fn estimate_delta(
        &mut self,
        prev: &GrayImage,
        cur: &GrayImage,
        detector: &dyn KeypointDetector,
    ) -> MotionDelta {
        self.estimate(prev, cur, detector).delta()
    }
}

impl<T: Estimator + ?Sized> Estimator for Box<T> {
    fn estimate(
        &mut self,
        prev: &GrayImage,
        cur: &GrayImage,
        detector: &dyn KeypointDetector,
    ) -> Estimate {
        (**self).estimate(prev, cur, detector)
    }
}

impl<T: Properties + ?Sized> Properties for Box<T> {
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        (**self).props_mut()
    }
}
