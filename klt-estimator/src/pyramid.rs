//! Gaussian image pyramids.

use vidstab::prelude::v1::*;
use vidstab::utils::{gaussian_blur, sobel};

/// Smallest side a pyramid level may have.
const MIN_LEVEL_SIZE: usize = 8;

/// Single pyramid level with its spatial derivatives.
#[derive(Clone, Debug)]
pub struct Level {
    pub img: GrayImage,
    pub gx: GrayImage,
    pub gy: GrayImage,
}

impl From<GrayImage> for Level {
    fn from(img: GrayImage) -> Self {
        let (gx, gy) = sobel(&img);
        Self { img, gx, gy }
    }
}

/// Image pyramid, finest level first.
#[derive(Clone, Debug)]
pub struct Pyramid {
    levels: Vec<Level>,
}

impl Pyramid {
    /// Build a pyramid with up to `levels` levels.
    ///
    /// Fewer levels are built if the image gets too small to halve further.
    pub fn new(img: &GrayImage, levels: usize) -> Self {
        let mut out = vec![Level::from(img.clone())];

        while out.len() < levels.max(1) {
            let prev = &out[out.len() - 1].img;
            let (w, h) = prev.dim();

            if w / 2 < MIN_LEVEL_SIZE || h / 2 < MIN_LEVEL_SIZE {
                break;
            }

            out.push(downsample(prev).into());
        }

        Self { levels: out }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, idx: usize) -> &Level {
        &self.levels[idx]
    }

    pub fn base(&self) -> &GrayImage {
        &self.levels[0].img
    }
}

/// Blur and halve the image.
fn downsample(img: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur(img, 1.0);
    let (w, h) = img.dim();
    GrayImage::from_fn((w + 1) / 2, (h + 1) / 2, |x, y| blurred.get(x * 2, y * 2))
}
