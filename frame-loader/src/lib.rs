//! Common `FrameSource` and `FrameSink` instance loader.

use std::path::Path;
use vidstab::prelude::v1::*;

pub mod sequence;
pub mod vraw;

pub use sequence::{ImageSequenceSink, ImageSequenceSource};
pub use vraw::{VrawSink, VrawSource};

fn is_vraw(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("vraw"))
        .unwrap_or(false)
}

/// Create a frame source depending on the input.
///
/// Directories are read as image sequences, and files ending with `.vraw` as raw video
/// containers.
pub fn create_source(input: &str) -> Result<Box<dyn FrameSource>> {
    if Path::new(input).is_dir() {
        Ok(Box::new(ImageSequenceSource::open(input)?))
    } else if is_vraw(input) {
        Ok(Box::new(VrawSource::open(input)?))
    } else {
        Err(anyhow!(
            "unsupported input \"{input}\" (expected a .vraw file or a directory of images)"
        ))
    }
}

/// Create a frame sink depending on the output.
///
/// # Arguments
///
/// * `output` - output path.
/// * `codec` - output encoding. `vraw` writes a raw container, anything else is taken as an image
/// file extension and writes an image sequence into the `output` directory. If `None`, `.vraw`
/// outputs are raw containers, and everything else a sequence of `png` images.
/// * `frame_rate` - frame rate to store, if the format supports it.
pub fn create_sink(
    output: &str,
    codec: Option<&str>,
    frame_rate: Option<f64>,
) -> Result<Box<dyn FrameSink>> {
    let codec = codec.unwrap_or(if is_vraw(output) { "vraw" } else { "png" });

    if codec.eq_ignore_ascii_case("vraw") {
        Ok(Box::new(VrawSink::create(output, frame_rate)?))
    } else {
        Ok(Box::new(ImageSequenceSink::create(output, codec)?))
    }
}
