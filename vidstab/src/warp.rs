//! # Frame warping and compositing
//!
//! Frames are warped by inverse mapping: every pixel of the working canvas is traced back through
//! the corrective transform into the bordered source frame and bilinearly sampled there. The
//! working canvas extends the source by a margin on every side. After the optional compositing
//! step the margin is cropped away again.

use crate::prelude::v1::*;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Rule for filling pixels that fall outside of the source frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderKind {
    /// Constant black.
    #[default]
    Black,
    /// Mirror the frame, including the edge pixel.
    Reflect,
    /// Repeat the edge pixel.
    Replicate,
    /// Show the previous output frame through the exposed area.
    Trail,
}

impl BorderKind {
    pub const ALL: [BorderKind; 4] = [Self::Black, Self::Reflect, Self::Replicate, Self::Trail];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Reflect => "reflect",
            Self::Replicate => "replicate",
            Self::Trail => "trail",
        }
    }

    /// Map an out-of-range index back into `0..len`.
    ///
    /// Returns `None` where the border is constant black.
    fn map_index(self, i: isize, len: usize) -> Option<usize> {
        let n = len as isize;

        if (0..n).contains(&i) {
            return Some(i as usize);
        }

        match self {
            Self::Black | Self::Trail => None,
            Self::Replicate => Some(i.clamp(0, n - 1) as usize),
            Self::Reflect => {
                let period = 2 * n;
                let i = i.rem_euclid(period);
                Some(if i < n { i } else { period - 1 - i } as usize)
            }
        }
    }
}

impl fmt::Display for BorderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BorderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                anyhow!("unknown border type \"{s}\" (expected black, reflect, replicate or trail)")
            })
    }
}

/// Border handling configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderPolicy {
    pub kind: BorderKind,
    /// Border size in pixels.
    ///
    /// Non-negative sizes extend the working canvas and keep the output at the input size.
    /// Negative sizes crop that many pixels off every side of the output.
    pub size: isize,
}

impl BorderPolicy {
    pub fn new(kind: BorderKind, size: isize) -> Self {
        Self { kind, size }
    }

    /// Get the output frame dimensions for a given input size.
    ///
    /// Fails if a negative border would leave no pixels.
    pub fn output_dim(&self, width: usize, height: usize) -> Result<(usize, usize)> {
        let shrink = 2 * self.size.min(0);
        let (w, h) = (width as isize + shrink, height as isize + shrink);
        ensure!(
            w > 0 && h > 0,
            "border size {} leaves no output for {width}x{height} frames",
            self.size
        );
        Ok((w as usize, h as usize))
    }

    /// Get the working canvas margin for a given negative-border margin.
    fn margin(&self, negative_margin: usize) -> usize {
        if self.size >= 0 {
            self.size as usize
        } else {
            negative_margin
        }
    }

    /// Get the amount cropped off every side of the working canvas.
    fn crop(&self, negative_margin: usize) -> usize {
        self.margin(negative_margin) + self.size.min(0).unsigned_abs()
    }
}

/// A frame together with its coverage mask.
///
/// The mask is 255 where the pixel was sampled from the source frame, and 0 where it was made up
/// by the border policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canvas {
    pub frame: Frame,
    pub alpha: Vec<u8>,
}

impl Canvas {
    /// Wrap a fully covered frame.
    pub fn opaque(frame: Frame) -> Self {
        let alpha = vec![255; frame.width() * frame.height()];
        Self { frame, alpha }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.frame.dim()
    }

    /// Crop the canvas down to a frame.
    pub fn crop(&self, offset: usize, width: usize, height: usize) -> Frame {
        self.frame.crop(offset, offset, width, height)
    }
}

/// Composite a warped frame onto the previous output.
pub trait Layer: Send + Sync {
    fn layer(&self, foreground: &Canvas, background: &Canvas) -> Result<Canvas>;
}

impl<F: Fn(&Canvas, &Canvas) -> Result<Canvas> + Send + Sync> Layer for F {
    fn layer(&self, foreground: &Canvas, background: &Canvas) -> Result<Canvas> {
        self(foreground, background)
    }
}

/// Mix every pixel of `foreground` and `background` with `f(fg, fg_alpha, bg, bg_alpha)`.
///
/// Both canvases must have the same size and pixel format.
fn combine(
    foreground: &Canvas,
    background: &Canvas,
    f: impl Fn(u8, u8, u8, u8) -> (u8, u8),
) -> Result<Canvas> {
    let (fg_dim, bg_dim) = (foreground.dim(), background.dim());
    ensure!(
        fg_dim == bg_dim,
        "cannot layer a {}x{} canvas onto a {}x{} one",
        fg_dim.0,
        fg_dim.1,
        bg_dim.0,
        bg_dim.1
    );

    let (fg_format, bg_format) = (foreground.frame.format(), background.frame.format());
    ensure!(
        fg_format == bg_format,
        "cannot layer a {fg_format:?} canvas onto a {bg_format:?} one"
    );

    let channels = foreground.frame.channels();
    let mut out = foreground.clone();

    let pixels = out
        .frame
        .data_mut()
        .chunks_exact_mut(channels)
        .zip(background.frame.data().chunks_exact(channels))
        .zip(out.alpha.iter_mut().zip(background.alpha.iter()));

    for ((fg, bg), (fa, &ba)) in pixels {
        let alpha = *fa;
        for (f_ch, &b_ch) in fg.iter_mut().zip(bg) {
            *f_ch = f(*f_ch, alpha, b_ch, ba).0;
        }
        *fa = f(0, alpha, 0, ba).1;
    }

    Ok(out)
}

/// Show the foreground where it is covered, and the background everywhere else.
pub fn overlay(foreground: &Canvas, background: &Canvas) -> Result<Canvas> {
    combine(foreground, background, |f, fa, b, ba| {
        if fa > 0 {
            (f, fa)
        } else {
            (b, ba)
        }
    })
}

/// Blend covered foreground pixels with the background by a fixed weight.
///
/// Uncovered foreground pixels show the background, like [`overlay`].
pub fn blend(weight: f32) -> impl Layer {
    let weight = weight.clamp(0.0, 1.0);
    move |foreground: &Canvas, background: &Canvas| {
        combine(foreground, background, |f, fa, b, ba| match (fa > 0, ba > 0) {
            (true, true) => {
                let v = f as f32 * weight + b as f32 * (1.0 - weight);
                (v.round() as u8, fa.max(ba))
            }
            (true, false) => (f, fa),
            (false, _) => (b, ba),
        })
    }
}

/// Largest distance any source corner moves under the inverse of the given transforms.
///
/// This is the margin needed so that the warped sample positions stay within the working canvas.
pub fn required_margin<'a>(
    corrections: impl IntoIterator<Item = &'a Transform>,
    width: usize,
    height: usize,
) -> usize {
    let corners = [
        na::Point2::new(0.0, 0.0),
        na::Point2::new(width as f64, 0.0),
        na::Point2::new(0.0, height as f64),
        na::Point2::new(width as f64, height as f64),
    ];

    let max = corrections
        .into_iter()
        .filter_map(|t| InverseMap::new(t))
        .flat_map(|inv| corners.map(|c| (inv.apply(c) - c).norm()))
        .fold(0f64, f64::max);

    // One extra pixel for the bilinear neighbourhood.
    max.ceil() as usize + 1
}

/// Inverse of a corrective affine transform.
#[derive(Clone, Copy, Debug)]
struct InverseMap {
    rs: na::Matrix2<f64>,
    t: na::Vector2<f64>,
}

impl InverseMap {
    fn new(correction: &Transform) -> Option<Self> {
        let m = correction.to_affine();
        let rs = na::Matrix2::new(m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)]).try_inverse()?;
        let t = na::Vector2::new(m[(0, 2)], m[(1, 2)]);
        Some(Self { rs, t })
    }

    fn apply(&self, p: na::Point2<f64>) -> na::Point2<f64> {
        na::Point2::from(self.rs * (p.coords - self.t))
    }
}

/// Warp a frame onto a working canvas.
///
/// The canvas is `margin` pixels larger than the frame on every side. The transform is applied in
/// source frame coordinates: rotation is about the top-left pixel of the source frame, not of the
/// bordered canvas, so the warped content does not depend on the border size.
///
/// # Arguments
///
/// * `frame` - source frame.
/// * `correction` - corrective transform to apply.
/// * `kind` - border fill rule.
/// * `margin` - working canvas margin.
pub fn warp_canvas(frame: &Frame, correction: &Transform, kind: BorderKind, margin: usize) -> Canvas {
    let (w, h) = frame.dim();
    let (cw, ch) = (w + 2 * margin, h + 2 * margin);
    let channels = frame.channels();
    let m = margin as f64;

    let inv = InverseMap::new(correction).unwrap_or(InverseMap {
        rs: na::Matrix2::identity(),
        t: na::Vector2::zeros(),
    });

    // Canvas pixel to source pixel, through the bordered canvas and then the source border.
    let fetch = |cx: isize, cy: isize| -> Option<&[u8]> {
        let cx = kind.map_index(cx, cw)? as isize - margin as isize;
        let cy = kind.map_index(cy, ch)? as isize - margin as isize;
        let sx = kind.map_index(cx, w)?;
        let sy = kind.map_index(cy, h)?;
        Some(frame.pixel(sx, sy))
    };

    let mut out = Frame::new(cw, ch, frame.format());
    let mut alpha = vec![0u8; cw * ch];
    let eps = 1e-6;

    for y in 0..ch {
        for x in 0..cw {
            let q = inv.apply(na::Point2::new(x as f64 - m, y as f64 - m));

            if q.x >= -eps && q.y >= -eps && q.x <= (w - 1) as f64 + eps && q.y <= (h - 1) as f64 + eps
            {
                alpha[y * cw + x] = 255;
            }

            // Back into bordered canvas coordinates.
            let (qx, qy) = (q.x + m, q.y + m);
            let (x0, y0) = (qx.floor(), qy.floor());
            let (fx, fy) = ((qx - x0) as f32, (qy - y0) as f32);
            let (x0, y0) = (x0 as isize, y0 as isize);

            let p00 = fetch(x0, y0);
            let p10 = fetch(x0 + 1, y0);
            let p01 = fetch(x0, y0 + 1);
            let p11 = fetch(x0 + 1, y0 + 1);

            let px = out.pixel_mut(x, y);

            for c in 0..channels {
                let get = |p: Option<&[u8]>| p.map(|p| p[c] as f32).unwrap_or(0.0);
                let top = get(p00) + (get(p10) - get(p00)) * fx;
                let bottom = get(p01) + (get(p11) - get(p01)) * fx;
                let v = top + (bottom - top) * fy;
                px[c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Canvas { frame: out, alpha }
}

/// Stateful frame warper.
///
/// Without a layering function (and with a border kind other than [`BorderKind::Trail`]) every
/// frame is warped independently. Otherwise the warper composites each frame onto the previous
/// output, which makes consecutive frames strictly sequential.
#[derive(Clone)]
pub struct Warper {
    policy: BorderPolicy,
    negative_margin: usize,
    layer: Option<Arc<dyn Layer>>,
    prev: Option<Canvas>,
}

impl fmt::Debug for Warper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Warper")
            .field("policy", &self.policy)
            .field("negative_margin", &self.negative_margin)
            .field("layer", &self.layer.is_some())
            .finish()
    }
}

impl Warper {
    /// Create a new warper.
    ///
    /// # Arguments
    ///
    /// * `policy` - border configuration.
    /// * `negative_margin` - working margin used when the border size is negative. See
    /// [`required_margin`].
    pub fn new(policy: BorderPolicy, negative_margin: usize) -> Self {
        Self {
            policy,
            negative_margin,
            layer: None,
            prev: None,
        }
    }

    /// Set a layering function to composite frames with.
    pub fn layer(self, layer: Arc<dyn Layer>) -> Self {
        Self {
            layer: Some(layer),
            ..self
        }
    }

    pub fn policy(&self) -> &BorderPolicy {
        &self.policy
    }

    /// Whether output frames depend on the previous output.
    pub fn is_compositing(&self) -> bool {
        self.layer.is_some() || self.policy.kind == BorderKind::Trail
    }

    /// Forget the previous output frame.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    fn canvas(&self, frame: &Frame, correction: &Transform) -> Canvas {
        warp_canvas(
            frame,
            correction,
            self.policy.kind,
            self.policy.margin(self.negative_margin),
        )
    }

    fn crop(&self, canvas: &Canvas) -> Frame {
        let (cw, ch) = canvas.dim();
        let c = self.policy.crop(self.negative_margin);
        canvas.crop(c, cw - 2 * c, ch - 2 * c)
    }

    /// Warp a frame without touching the compositing state.
    ///
    /// The layering function is ignored.
    pub fn warp_independent(&self, frame: &Frame, correction: &Transform) -> Frame {
        self.crop(&self.canvas(frame, correction))
    }

    /// Warp a frame, compositing it onto the previous output if enabled.
    ///
    /// Fails if the layering function fails, for instance when the frame does not match the size
    /// or pixel format of the previous output. The previous output is kept in that case.
    pub fn warp(&mut self, frame: &Frame, correction: &Transform) -> Result<Frame> {
        let canvas = self.canvas(frame, correction);

        if !self.is_compositing() {
            return Ok(self.crop(&canvas));
        }

        let composited = match (&self.prev, &self.layer) {
            (Some(bg), Some(layer)) => layer.layer(&canvas, bg)?,
            (Some(bg), None) => overlay(&canvas, bg)?,
            (None, _) => canvas,
        };

        let out = self.crop(&composited);
        self.prev = Some(composited);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(w: usize, h: usize) -> Frame {
        Frame::from_fn(w, h, PixelFormat::Rgb8, |x, y, px| {
            px[0] = (x * 13 + y * 7) as u8;
            px[1] = (x * y) as u8;
            px[2] = 200 - (x + y) as u8;
        })
    }

    #[test]
    fn identity_is_lossless() {
        let frame = pattern(16, 12);
        for kind in BorderKind::ALL {
            for size in [0, 3] {
                let mut warper = Warper::new(BorderPolicy::new(kind, size), 0);
                assert_eq!(warper.warp(&frame, &Transform::ZERO).unwrap(), frame, "{kind} {size}");
                assert_eq!(warper.warp(&frame, &Transform::ZERO).unwrap(), frame, "{kind} {size}");
            }
        }
    }

    #[test]
    fn output_keeps_input_size() {
        let frame = pattern(20, 10);
        let corrections = [
            Transform::new(3.5, -2.0, 0.0),
            Transform::new(0.0, 0.0, 0.2),
            Transform::new(-7.0, 4.25, -0.1),
        ];
        for kind in BorderKind::ALL {
            for size in [0, 1, 5, 12] {
                let mut warper = Warper::new(BorderPolicy::new(kind, size), 0);
                for c in &corrections {
                    assert_eq!(warper.warp(&frame, c).unwrap().dim(), (20, 10), "{kind} {size}");
                }
            }
        }
    }

    #[test]
    fn negative_border_crops() {
        let frame = pattern(20, 16);
        let policy = BorderPolicy::new(BorderKind::Black, -3);
        assert_eq!(policy.output_dim(20, 16).unwrap(), (14, 10));

        let corrections = [Transform::new(1.0, 2.0, 0.05)];
        let margin = required_margin(&corrections, 20, 16);
        let warper = Warper::new(policy, margin);

        let still = warper.warp_independent(&frame, &Transform::ZERO);
        assert_eq!(still, frame.crop(3, 3, 14, 10));
        assert_eq!(warper.warp_independent(&frame, &corrections[0]).dim(), (14, 10));

        assert!(BorderPolicy::new(BorderKind::Black, -8).output_dim(20, 16).is_err());
        assert!(BorderPolicy::new(BorderKind::Black, -7).output_dim(20, 16).is_ok());
    }

    #[test]
    fn integer_translation() {
        let frame = pattern(10, 10);
        let out = Warper::new(BorderPolicy::default(), 0)
            .warp_independent(&frame, &Transform::new(2.0, 1.0, 0.0));
        assert_eq!(out.pixel(5, 5), frame.pixel(3, 4));
        // Exposed area is black.
        assert_eq!(out.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(out.pixel(1, 9), &[0, 0, 0]);
    }

    #[test]
    fn border_fills() {
        let frame = Frame::from_fn(4, 1, PixelFormat::Gray8, |x, _, px| px[0] = 10 * (x as u8 + 1));
        let shift = Transform::new(2.0, 0.0, 0.0);

        let fill = |kind| {
            Warper::new(BorderPolicy::new(kind, 0), 0)
                .warp_independent(&frame, &shift)
                .into_raw()
        };

        assert_eq!(fill(BorderKind::Black), vec![0, 0, 10, 20]);
        assert_eq!(fill(BorderKind::Replicate), vec![10, 10, 10, 20]);
        assert_eq!(fill(BorderKind::Reflect), vec![20, 10, 10, 20]);
    }

    #[test]
    fn reflect_index() {
        let k = BorderKind::Reflect;
        assert_eq!(k.map_index(-1, 4), Some(0));
        assert_eq!(k.map_index(-2, 4), Some(1));
        assert_eq!(k.map_index(4, 4), Some(3));
        assert_eq!(k.map_index(9, 4), Some(1));
        assert_eq!(BorderKind::Black.map_index(-1, 4), None);
        assert_eq!(BorderKind::Replicate.map_index(7, 4), Some(3));
    }

    #[test]
    fn trail_shows_previous_output() {
        let first = Frame::from_fn(4, 1, PixelFormat::Gray8, |_, _, px| px[0] = 100);
        let second = Frame::from_fn(4, 1, PixelFormat::Gray8, |_, _, px| px[0] = 200);
        let mut warper = Warper::new(BorderPolicy::new(BorderKind::Trail, 0), 0);
        assert!(warper.is_compositing());

        // First frame passes through, even when shifted.
        let out = warper.warp(&first, &Transform::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(out.into_raw(), vec![0, 100, 100, 100]);

        let out = warper.warp(&second, &Transform::new(2.0, 0.0, 0.0)).unwrap();
        assert_eq!(out.into_raw(), vec![0, 100, 200, 200]);

        warper.reset();
        let out = warper.warp(&second, &Transform::new(2.0, 0.0, 0.0)).unwrap();
        assert_eq!(out.into_raw(), vec![0, 0, 200, 200]);
    }

    #[test]
    fn custom_layer() {
        let frame = Frame::from_fn(2, 1, PixelFormat::Gray8, |_, _, px| px[0] = 100);
        let mut warper =
            Warper::new(BorderPolicy::default(), 0).layer(Arc::new(blend(0.5)));
        assert!(warper.is_compositing());
        assert_eq!(warper.warp(&frame, &Transform::ZERO).unwrap().into_raw(), vec![100, 100]);

        let brighter = Frame::from_fn(2, 1, PixelFormat::Gray8, |_, _, px| px[0] = 200);
        assert_eq!(warper.warp(&brighter, &Transform::ZERO).unwrap().into_raw(), vec![150, 150]);

        // Closures are layers too.
        let mut warper = Warper::new(BorderPolicy::default(), 0).layer(Arc::new(
            |fg: &Canvas, _: &Canvas| -> Result<Canvas> { Ok(fg.clone()) },
        ));
        warper.warp(&frame, &Transform::ZERO).unwrap();
        assert_eq!(warper.warp(&brighter, &Transform::ZERO).unwrap().into_raw(), vec![200, 200]);
    }

    #[test]
    fn mismatched_layers_fail() {
        let gray = Frame::from_fn(4, 4, PixelFormat::Gray8, |_, _, px| px[0] = 50);
        let rgb = pattern(4, 4);
        let mut warper = Warper::new(BorderPolicy::new(BorderKind::Trail, 0), 0);

        warper.warp(&gray, &Transform::ZERO).unwrap();
        assert!(warper.warp(&rgb, &Transform::ZERO).is_err());
        // The previous output survives the failed frame.
        assert_eq!(warper.warp(&gray, &Transform::ZERO).unwrap(), gray);

        let small = Canvas::opaque(Frame::new(2, 2, PixelFormat::Gray8));
        assert!(overlay(&small, &Canvas::opaque(gray)).is_err());
    }

    #[test]
    fn margin_covers_rotation() {
        let corrections = [Transform::new(0.0, 0.0, 0.1), Transform::new(5.0, 0.0, 0.0)];
        let margin = required_margin(&corrections, 100, 100);
        // A 0.1 rad rotation about the origin moves the far corner by about 14 px.
        assert!((14..=17).contains(&margin), "{margin}");
        assert_eq!(required_margin(&[], 100, 100), 1);
    }

    #[test]
    fn border_kind_from_str() {
        assert_eq!("Replicate".parse::<BorderKind>().unwrap(), BorderKind::Replicate);
        assert!("wrap".parse::<BorderKind>().is_err());
    }
}
