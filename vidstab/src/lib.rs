//! # Video Stabilization Library
//!
//! This library provides a two-pass 2D video stabilization pipeline. Camera motion is estimated
//! between consecutive frames, accumulated into a trajectory, smoothed, and turned into per-frame
//! corrective transforms that are used to warp the source frames.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use vidstab::prelude::v1::*;
//! ```
//!
//! Motion estimation itself is pluggable through the [`Estimator`](estimator::Estimator) trait.
//! You may need [`nalgebra`](https://crates.io/crates/nalgebra) to make use of the functionality.

pub mod detector;
pub mod estimator;
pub mod frame;
pub mod pipeline;
pub mod props;
pub mod trajectory;
pub mod utils;
pub mod warp;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            detector::{create_detector, DetectorKind, Keypoint, KeypointDetector, KeypointSet},
            estimator::{DegenerateReason, Estimate, Estimator},
            frame::{
                Frame, FrameSink, FrameSource, GrayImage, MemorySink, MemorySource, PixelFormat,
                Rgb,
            },
            pipeline::{Diagnostics, StabilizationReport, Stabilizer, StabilizerConfig},
            props::{Properties, Property, PropertyMut, PropertyValue},
            trajectory::{EdgeMode, Trajectory, Transform},
            warp::{BorderKind, BorderPolicy, Canvas, Layer, Warper},
        };
        pub use anyhow::{anyhow, bail, ensure, Context, Error, Result};
    }
}
