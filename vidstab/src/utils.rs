//! # Utility module
//!
//! Image filtering helpers shared by keypoint detectors and optical flow.

use crate::frame::GrayImage;

/// Build a normalised 1D gaussian kernel.
///
/// # Arguments
///
/// * `sigma` - standard deviation of the gaussian.
///
/// The kernel has `2 * ceil(3 * sigma) + 1` taps, and at least 3.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let denom = 2.0 * sigma * sigma;
    let kernel = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect::<Vec<_>>();
    let sum = kernel.iter().sum::<f32>();
    kernel.into_iter().map(|v| v / sum).collect()
}

/// Convolve the image with a separable kernel, replicating the edges.
pub fn convolve_separable(img: &GrayImage, kernel: &[f32]) -> GrayImage {
    let radius = (kernel.len() / 2) as isize;
    let (w, h) = img.dim();

    let horizontal = GrayImage::from_fn(w, h, |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * img.get_clamped(x as isize + i as isize - radius, y as isize))
            .sum()
    });

    GrayImage::from_fn(w, h, |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(i, k)| k * horizontal.get_clamped(x as isize, y as isize + i as isize - radius))
            .sum()
    })
}

/// Gaussian blur the image.
pub fn gaussian_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    convolve_separable(img, &gaussian_kernel(sigma))
}

/// Compute horizontal and vertical Sobel derivatives.
///
/// Derivatives are normalised so that a unit ramp yields a unit gradient.
pub fn sobel(img: &GrayImage) -> (GrayImage, GrayImage) {
    let (w, h) = img.dim();
    let px = |x: usize, y: usize, ox: isize, oy: isize| {
        img.get_clamped(x as isize + ox, y as isize + oy)
    };

    let gx = GrayImage::from_fn(w, h, |x, y| {
        ((px(x, y, 1, -1) + 2.0 * px(x, y, 1, 0) + px(x, y, 1, 1))
            - (px(x, y, -1, -1) + 2.0 * px(x, y, -1, 0) + px(x, y, -1, 1)))
            / 8.0
    });

    let gy = GrayImage::from_fn(w, h, |x, y| {
        ((px(x, y, -1, 1) + 2.0 * px(x, y, 0, 1) + px(x, y, 1, 1))
            - (px(x, y, -1, -1) + 2.0 * px(x, y, 0, -1) + px(x, y, 1, -1)))
            / 8.0
    });

    (gx, gy)
}

/// Per-pixel structure tensor `(sum gx^2, sum gx*gy, sum gy^2)` over a square block.
///
/// # Arguments
///
/// * `img` - input image.
/// * `block_size` - side of the summation block, odd.
pub fn structure_tensor(img: &GrayImage, block_size: usize) -> Vec<(f32, f32, f32)> {
    let (gx, gy) = sobel(img);
    let (w, h) = img.dim();
    let r = (block_size / 2) as isize;

    (0..h)
        .flat_map(|y| (0..w).map(move |x| (x as isize, y as isize)))
        .map(|(x, y)| {
            let mut t = (0.0, 0.0, 0.0);
            for oy in -r..=r {
                for ox in -r..=r {
                    let dx = gx.get_clamped(x + ox, y + oy);
                    let dy = gy.get_clamped(x + ox, y + oy);
                    t.0 += dx * dx;
                    t.1 += dx * dy;
                    t.2 += dy * dy;
                }
            }
            t
        })
        .collect()
}

/// Smallest eigenvalue of a symmetric 2x2 matrix `[[a, b], [b, c]]`.
pub fn min_eigenvalue(a: f32, b: f32, c: f32) -> f32 {
    let half_trace = (a + c) * 0.5;
    let diff = (a - c) * 0.5;
    half_trace - (diff * diff + b * b).sqrt()
}
