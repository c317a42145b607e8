//! Decoded frames shared by every pipeline stage.
//!
//! A frame is a single 8-bit luma plane in row-major order. Sources convert
//! whatever they read (JPEG uploads, YUYV camera buffers, decoded video) into
//! this layout at the I/O boundary; detection and classification never see
//! any other pixel format.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("image payload is empty")]
    Empty,
    #[error("invalid image format: {0}")]
    Decode(#[from] image::ImageError),
    #[error("invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has zero width or height")]
    ZeroSized,
}

/// A single grayscale frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: usize,
}

impl Frame {
    /// Wrap an existing luma buffer (`width * height` bytes).
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, index: usize) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroSized);
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    /// Decode an encoded image (JPEG, PNG, BMP, ...) into a luma frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let luma = image::load_from_memory(bytes)?.to_luma8();
        let (width, height) = luma.dimensions();
        Self::from_gray(luma.into_raw(), width, height, 0)
    }

    /// Return the same pixels tagged with a new source index.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Position of this frame within its source (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Pixel at `(x, y)`; callers keep coordinates in bounds.
    pub(crate) fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width as usize + x]
    }
}
