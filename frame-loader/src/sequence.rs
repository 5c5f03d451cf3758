//! # Image sequences
//!
//! A directory of still images, one per frame, ordered by file name.

use image::{ColorType, DynamicImage, GenericImageView, ImageFormat};
use std::path::{Path, PathBuf};
use vidstab::prelude::v1::*;

/// Frame source reading every image of a directory.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    dim: (usize, usize),
    /// Pixel format of the first decoded image.
    format: Option<PixelFormat>,
    pos: usize,
}

impl ImageSequenceSource {
    /// Open a directory of images.
    ///
    /// Files with extensions `image` does not recognise are skipped. The size of the first image
    /// determines the size of the stream, and its colour type the pixel format of every frame.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let mut files = std::fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .filter(|p| p.is_file() && ImageFormat::from_path(p).is_ok())
            .collect::<Vec<_>>();

        files.sort();

        let first = files
            .first()
            .ok_or_else(|| anyhow!("no images in {}", dir.display()))?;

        let (w, h) = image::image_dimensions(first)
            .with_context(|| format!("reading {}", first.display()))?;

        log::debug!("Opened {} images of {w}x{h} in {}", files.len(), dir.display());

        Ok(Self {
            files,
            dim: (w as usize, h as usize),
            format: None,
            pos: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn to_frame(img: DynamicImage) -> Result<Frame> {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    match img {
        DynamicImage::ImageLuma8(buf) => Frame::from_raw(w, h, PixelFormat::Gray8, buf.into_raw()),
        img => Frame::from_raw(w, h, PixelFormat::Rgb8, img.to_rgb8().into_raw()),
    }
}

impl FrameSource for ImageSequenceSource {
    fn dimensions(&self) -> (usize, usize) {
        self.dim
    }

    fn frame_rate(&self) -> Option<f64> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let path = match self.files.get(self.pos) {
            Some(path) => path,
            None => return Ok(None),
        };

        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        let frame = to_frame(img)?;

        let format = *self.format.get_or_insert(frame.format());
        let frame = if frame.format() == format {
            frame
        } else {
            frame.to_format(format)
        };

        ensure!(
            frame.dim() == self.dim,
            "{} is {}x{}, expected {}x{}",
            path.display(),
            frame.width(),
            frame.height(),
            self.dim.0,
            self.dim.1
        );

        self.pos += 1;

        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

/// Frame sink writing numbered images into a directory.
pub struct ImageSequenceSink {
    dir: PathBuf,
    extension: String,
    format: ImageFormat,
    written: usize,
}

impl ImageSequenceSink {
    /// Create the output directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - output directory, created if missing.
    /// * `codec` - image file extension, for instance `png`.
    pub fn create(dir: impl AsRef<Path>, codec: &str) -> Result<Self> {
        let format = ImageFormat::from_extension(codec)
            .ok_or_else(|| anyhow!("unknown image codec \"{codec}\""))?;

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;

        Ok(Self {
            dir,
            extension: codec.to_ascii_lowercase(),
            format,
            written: 0,
        })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let path = self
            .dir
            .join(format!("frame_{:06}.{}", self.written, self.extension));

        let color = match frame.format() {
            PixelFormat::Gray8 => ColorType::L8,
            PixelFormat::Rgb8 => ColorType::Rgb8,
        };

        image::save_buffer_with_format(
            &path,
            frame.data(),
            u32::try_from(frame.width())?,
            u32::try_from(frame.height())?,
            color,
            self.format,
        )
        .with_context(|| format!("writing {}", path.display()))?;

        self.written += 1;

        Ok(())
    }
}
