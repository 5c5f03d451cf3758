//! # Frames, grayscale images, and frame I/O traits

use crate::prelude::v1::*;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// RGB colour structure.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn gray(v: u8) -> Self {
        Self { r: v, g: v, b: v }
    }

    /// BT.601 luma of the colour, in 0-255 range.
    pub fn luma(&self) -> f32 {
        0.299 * self.r as f32 + 0.587 * self.g as f32 + 0.114 * self.b as f32
    }
}

/// Layout of a single pixel in a [`Frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
}

impl PixelFormat {
    /// Number of interleaved bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 => 3,
        }
    }

    pub fn from_channels(channels: usize) -> Result<Self> {
        match channels {
            1 => Ok(Self::Gray8),
            3 => Ok(Self::Rgb8),
            c => Err(anyhow!("unsupported channel count {c}")),
        }
    }
}

/// Raw video frame.
///
/// Pixels are stored row-major, interleaved, with no row padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Create a new black frame.
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; width * height * format.channels()],
        }
    }

    /// Wrap existing pixel data.
    ///
    /// # Arguments
    ///
    /// * `width` - width of the frame in pixels.
    /// * `height` - height of the frame in pixels.
    /// * `format` - pixel layout of `data`.
    /// * `data` - interleaved pixel bytes, exactly `width * height * channels` long.
    pub fn from_raw(width: usize, height: usize, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = width * height * format.channels();
        ensure!(
            data.len() == expected,
            "frame buffer holds {} bytes, expected {expected} for {width}x{height} {format:?}",
            data.len()
        );
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Build a frame by evaluating `f` at every pixel.
    pub fn from_fn(
        width: usize,
        height: usize,
        format: PixelFormat,
        mut f: impl FnMut(usize, usize, &mut [u8]),
    ) -> Self {
        let mut frame = Self::new(width, height, format);
        let channels = format.channels();
        for (i, px) in frame.data.chunks_exact_mut(channels).enumerate() {
            f(i % width, i / width, px);
        }
        frame
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Get width and height of the frame.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Get the channel bytes of a single pixel.
    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let c = self.channels();
        let idx = (y * self.width + x) * c;
        &self.data[idx..idx + c]
    }

    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [u8] {
        let c = self.channels();
        let idx = (y * self.width + x) * c;
        &mut self.data[idx..idx + c]
    }

    /// Convert the frame to a floating point grayscale image.
    pub fn to_gray(&self) -> GrayImage {
        let data = match self.format {
            PixelFormat::Gray8 => self.data.iter().map(|&v| v as f32).collect(),
            PixelFormat::Rgb8 => bytemuck::cast_slice::<u8, Rgb>(&self.data)
                .iter()
                .map(Rgb::luma)
                .collect(),
        };

        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }

    /// Convert the frame to another pixel format.
    ///
    /// Colour frames are reduced to their luma, gray frames get their value in every channel.
    pub fn to_format(&self, format: PixelFormat) -> Frame {
        let data = match (self.format, format) {
            (from, to) if from == to => self.data.clone(),
            (PixelFormat::Rgb8, PixelFormat::Gray8) => bytemuck::cast_slice::<u8, Rgb>(&self.data)
                .iter()
                .map(|px| px.luma().round().clamp(0.0, 255.0) as u8)
                .collect(),
            (_, _) => {
                let rgb = self.data.iter().copied().map(Rgb::gray).collect::<Vec<_>>();
                bytemuck::cast_slice::<Rgb, u8>(&rgb).to_vec()
            }
        };

        Frame {
            width: self.width,
            height: self.height,
            format,
            data,
        }
    }

    /// Copy out a rectangular region of the frame.
    ///
    /// The region must lie within the frame.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Frame {
        assert!(x + width <= self.width && y + height <= self.height);
        let c = self.channels();
        let mut data = Vec::with_capacity(width * height * c);
        for row in y..(y + height) {
            let start = (row * self.width + x) * c;
            data.extend_from_slice(&self.data[start..start + width * c]);
        }
        Frame {
            width,
            height,
            format: self.format,
            data,
        }
    }
}

/// Single channel floating point image used for detection and optical flow.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Get a pixel, clamping coordinates to the image edge.
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }

    /// Bilinearly sample the image at subpixel coordinates.
    ///
    /// Coordinates outside the image are clamped to the edge.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);

        let p00 = self.get_clamped(x0, y0);
        let p10 = self.get_clamped(x0 + 1, y0);
        let p01 = self.get_clamped(x0, y0 + 1);
        let p11 = self.get_clamped(x0 + 1, y0 + 1);

        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        top + (bottom - top) * fy
    }

    /// Check whether a point lies within the image bounds.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width as f32 - 1.0 && y <= self.height as f32 - 1.0
    }
}

/// Ordered, finite source of video frames.
///
/// Sources must be rewindable, because stabilization reads the input twice: once to estimate
/// motion, and once more to warp the frames.
pub trait FrameSource {
    /// Get width and height of the frames in the stream.
    ///
    /// This must be known before the first frame is read.
    fn dimensions(&self) -> (usize, usize);

    /// Get the framerate of the stream.
    ///
    /// This will return `Some(framerate)` if it is known, and `None` otherwise.
    fn frame_rate(&self) -> Option<f64>;

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at the end of the stream. An `Err` means the stream ended unexpectedly.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

/// Ordered sink of stabilized frames.
pub trait FrameSink {
    /// Append a frame to the output.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn dimensions(&self) -> (usize, usize) {
        (**self).dimensions()
    }

    fn frame_rate(&self) -> Option<f64> {
        (**self).frame_rate()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).write_frame(frame)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// In-memory frame source.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: Vec<Frame>,
    pos: usize,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            pos: 0,
        }
    }
}

impl FrameSource for MemorySource {
    fn dimensions(&self) -> (usize, usize) {
        self.frames.first().map(Frame::dim).unwrap_or((0, 0))
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = self.frames.get(self.pos).cloned();
        if frame.is_some() {
            self.pos += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// In-memory frame sink.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    frames: Vec<Frame>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        ensure!(!self.finished, "write to a finished sink");
        self.frames.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn rgb_to_gray() {
        let frame = Frame::from_raw(2, 1, PixelFormat::Rgb8, vec![255, 255, 255, 255, 0, 0]).unwrap();
        let gray = frame.to_gray();
        assert_approx_eq!(gray.get(0, 0), 255.0, 1e-3);
        assert_approx_eq!(gray.get(1, 0), 0.299 * 255.0, 1e-3);
    }

    #[test]
    fn format_conversion() {
        let rgb = Frame::from_raw(2, 1, PixelFormat::Rgb8, vec![255, 255, 255, 0, 0, 255]).unwrap();
        let gray = rgb.to_format(PixelFormat::Gray8);
        assert_eq!(gray.format(), PixelFormat::Gray8);
        assert_eq!(gray.data(), &[255, 29]);

        let back = gray.to_format(PixelFormat::Rgb8);
        assert_eq!(back.data(), &[255, 255, 255, 29, 29, 29]);
        assert_eq!(back.to_format(PixelFormat::Rgb8), back);
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(Frame::from_raw(4, 4, PixelFormat::Rgb8, vec![0; 47]).is_err());
        assert!(Frame::from_raw(4, 4, PixelFormat::Gray8, vec![0; 16]).is_ok());
    }

    #[test]
    fn crop_region() {
        let frame = Frame::from_fn(4, 3, PixelFormat::Gray8, |x, y, px| {
            px[0] = (y * 4 + x) as u8
        });
        let cropped = frame.crop(1, 1, 2, 2);
        assert_eq!(cropped.dim(), (2, 2));
        assert_eq!(cropped.data(), &[5, 6, 9, 10]);
    }

    #[test]
    fn bilinear_sampling() {
        let img = GrayImage::from_fn(2, 2, |x, y| (x + 2 * y) as f32);
        assert_approx_eq!(img.sample(0.5, 0.0), 0.5);
        assert_approx_eq!(img.sample(0.5, 0.5), 1.5);
        // Clamped outside of the image.
        assert_approx_eq!(img.sample(-3.0, 5.0), 2.0);
    }

    #[test]
    fn memory_source_rewinds() {
        let frames = vec![Frame::new(2, 2, PixelFormat::Gray8); 3];
        let mut source = MemorySource::new(frames);
        assert_eq!(source.dimensions(), (2, 2));
        let mut cnt = 0;
        while source.next_frame().unwrap().is_some() {
            cnt += 1;
        }
        assert_eq!(cnt, 3);
        source.rewind().unwrap();
        assert!(source.next_frame().unwrap().is_some());
    }
}
