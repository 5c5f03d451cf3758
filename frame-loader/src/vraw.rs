//! # Raw video container
//!
//! A `.vraw` file is a fixed header followed by tightly packed frames:
//!
//! | field      | type   |
//! |------------|--------|
//! | magic      | `VRAW` |
//! | width      | u32 LE |
//! | height     | u32 LE |
//! | channels   | u32 LE, 1 or 3 |
//! | frame rate | f64 LE, 0 if unknown |
//!
//! Every frame is `width * height * channels` bytes, row-major and interleaved.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use vidstab::prelude::v1::*;

pub const MAGIC: &[u8; 4] = b"VRAW";
pub const HEADER_SIZE: u64 = 24;

/// Stream properties stored in the header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Header {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub frame_rate: Option<f64>,
}

impl Header {
    pub fn frame_size(&self) -> usize {
        self.width * self.height * self.format.channels()
    }

    pub fn read(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).context("reading header")?;
        ensure!(&magic == MAGIC, "not a vraw stream (bad magic {magic:?})");

        let mut read_u32 = || -> Result<u32> {
            let mut buf = [0u8; std::mem::size_of::<u32>()];
            reader.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf))
        };

        let width = read_u32()? as usize;
        let height = read_u32()? as usize;
        let format = PixelFormat::from_channels(read_u32()? as usize)?;

        let mut buf = [0u8; std::mem::size_of::<f64>()];
        reader.read_exact(&mut buf)?;
        let frame_rate = f64::from_le_bytes(buf);

        ensure!(width > 0 && height > 0, "invalid frame size {width}x{height}");

        Ok(Self {
            width,
            height,
            format,
            frame_rate: Some(frame_rate).filter(|r| r.is_finite() && *r > 0.0),
        })
    }

    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(MAGIC)?;
        for v in [self.width, self.height, self.format.channels()] {
            writer.write_all(&u32::try_from(v)?.to_le_bytes())?;
        }
        writer.write_all(&self.frame_rate.unwrap_or(0.0).to_le_bytes())?;
        Ok(())
    }
}

/// Frame source reading a `.vraw` stream.
pub struct VrawSource<T> {
    reader: T,
    header: Header,
    frames_read: usize,
}

impl VrawSource<BufReader<File>> {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {path}"))?;
        Self::new(BufReader::new(file))
    }
}

impl<T: Read + Seek> VrawSource<T> {
    pub fn new(mut reader: T) -> Result<Self> {
        let header = Header::read(&mut reader)?;

        log::debug!("Opened vraw stream {header:?}");

        Ok(Self {
            reader,
            header,
            frames_read: 0,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl<T: Read + Seek> FrameSource for VrawSource<T> {
    fn dimensions(&self) -> (usize, usize) {
        (self.header.width, self.header.height)
    }

    fn frame_rate(&self) -> Option<f64> {
        self.header.frame_rate
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut data = vec![0u8; self.header.frame_size()];
        let mut filled = 0;

        while filled < data.len() {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        ensure!(
            filled == data.len(),
            "truncated frame {}: {filled} of {} bytes",
            self.frames_read,
            data.len()
        );

        self.frames_read += 1;

        Frame::from_raw(self.header.width, self.header.height, self.header.format, data).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        self.frames_read = 0;
        Ok(())
    }
}

/// Frame sink writing a `.vraw` stream.
///
/// The header is written along with the first frame, whose size and format all subsequent frames
/// must match.
pub struct VrawSink<T: Write> {
    writer: T,
    frame_rate: Option<f64>,
    header: Option<Header>,
}

impl VrawSink<BufWriter<File>> {
    pub fn create(path: &str, frame_rate: Option<f64>) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {path}"))?;
        Ok(Self::new(BufWriter::new(file), frame_rate))
    }
}

impl<T: Write> VrawSink<T> {
    pub fn new(writer: T, frame_rate: Option<f64>) -> Self {
        Self {
            writer,
            frame_rate,
            header: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.writer
    }
}

impl<T: Write> FrameSink for VrawSink<T> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let expected = Header {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            frame_rate: self.frame_rate,
        };

        match &self.header {
            Some(header) => ensure!(
                *header == expected,
                "frame {}x{} {:?} does not match the stream",
                frame.width(),
                frame.height(),
                frame.format()
            ),
            None => {
                expected.write(&mut self.writer)?;
                self.header = Some(expected);
            }
        }

        self.writer.write_all(frame.data())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
