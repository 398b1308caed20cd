//! Pixel buffers shared by capture, filters and the compositor.
//!
//! - `PixelLayout`: channel count and byte depth of one pixel.
//! - `FrameShape`: width, height and layout; the identity of a buffer's geometry.
//! - `FrameBuffer`: owned, row-major pixel storage with a fixed shape.
//!
//! A `FrameBuffer` never changes shape. Resizing means allocating a new buffer
//! and dropping the old one, so a reader holding a buffer can rely on its
//! dimensions for as long as it holds it.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::FrameError;

/// Channel count and per-channel byte depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    pub channels: u8,
    pub bytes_per_channel: u8,
}

impl PixelLayout {
    /// Packed 8-bit RGB, the capture format.
    pub const RGB8: PixelLayout = PixelLayout {
        channels: 3,
        bytes_per_channel: 1,
    };

    /// Packed 8-bit RGBA.
    pub const RGBA8: PixelLayout = PixelLayout {
        channels: 4,
        bytes_per_channel: 1,
    };

    /// Single 8-bit plane.
    pub const GRAY8: PixelLayout = PixelLayout {
        channels: 1,
        bytes_per_channel: 1,
    };

    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * self.bytes_per_channel as usize
    }

    pub fn is_8bit(&self) -> bool {
        self.bytes_per_channel == 1
    }
}

/// Geometry of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl FrameShape {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            width,
            height,
            layout,
        }
    }

    /// Same dimensions, different pixel layout.
    pub fn with_layout(self, layout: PixelLayout) -> Self {
        Self { layout, ..self }
    }

    /// `count` copies of this shape placed side by side.
    pub fn tiled(self, count: usize) -> Option<Self> {
        let count = u32::try_from(count).ok()?;
        let width = self.width.checked_mul(count)?;
        Some(Self { width, ..self })
    }

    /// Bytes in one row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Total storage size, or `None` if it does not fit in memory.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.layout.bytes_per_pixel())
    }

    fn validate(&self) -> Result<usize, FrameError> {
        if self.width == 0 || self.height == 0 || self.layout.bytes_per_pixel() == 0 {
            return Err(FrameError::EmptyShape(*self));
        }
        self.byte_len().ok_or(FrameError::Overflow(*self))
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} ({}ch/{}B)",
            self.width, self.height, self.layout.channels, self.layout.bytes_per_channel
        )
    }
}

/// Owned pixel storage with an immutable shape.
///
/// Fields are private: the only way to get a buffer of another size is to
/// build a new one.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    shape: FrameShape,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Allocate a zero-filled buffer.
    pub fn new(shape: FrameShape) -> Result<Self, FrameError> {
        let len = shape.validate()?;
        Ok(Self {
            shape,
            data: vec![0u8; len],
        })
    }

    /// Wrap existing pixel bytes. The length must match the shape exactly.
    pub fn from_pixels(shape: FrameShape, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = shape.validate()?;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.shape.layout
    }

    pub fn stride(&self) -> usize {
        self.shape.stride()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Overwrite this buffer with `src`. Shapes must match.
    pub fn copy_from(&mut self, src: &FrameBuffer) -> Result<(), FrameError> {
        self.ensure_same_shape(src)?;
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    /// Overwrite this buffer with `src` flipped around the vertical axis.
    pub fn copy_mirrored_from(&mut self, src: &FrameBuffer) -> Result<(), FrameError> {
        self.ensure_same_shape(src)?;
        let bpp = self.shape.layout.bytes_per_pixel();
        let stride = self.stride();
        for (dst_row, src_row) in self
            .data
            .chunks_exact_mut(stride)
            .zip(src.data.chunks_exact(stride))
        {
            for (dst_px, src_px) in dst_row
                .chunks_exact_mut(bpp)
                .zip(src_row.chunks_exact(bpp).rev())
            {
                dst_px.copy_from_slice(src_px);
            }
        }
        Ok(())
    }

    /// Copy `src` into the columns starting at `x`. Heights and layouts must
    /// match and the slice must lie fully inside this buffer.
    pub fn blit_columns(&mut self, src: &FrameBuffer, x: u32) -> Result<(), FrameError> {
        if src.height() != self.height() || src.layout() != self.layout() {
            return Err(FrameError::ShapeMismatch {
                expected: FrameShape {
                    width: src.width(),
                    ..self.shape
                },
                actual: src.shape,
            });
        }
        let end = x
            .checked_add(src.width())
            .filter(|end| *end <= self.width())
            .ok_or(FrameError::SliceOutOfBounds {
                x,
                width: src.width(),
                dest_width: self.width(),
            })?;
        let bpp = self.shape.layout.bytes_per_pixel();
        let dst_start = x as usize * bpp;
        let dst_end = end as usize * bpp;
        for y in 0..self.height() {
            self.row_mut(y)[dst_start..dst_end].copy_from_slice(src.row(y));
        }
        Ok(())
    }

    /// Zero the columns `[x, x + width)`.
    pub fn clear_columns(&mut self, x: u32, width: u32) {
        let bpp = self.shape.layout.bytes_per_pixel();
        let start = (x.min(self.width()) as usize) * bpp;
        let end = (x.saturating_add(width).min(self.width()) as usize) * bpp;
        for y in 0..self.height() {
            self.row_mut(y)[start..end].fill(0);
        }
    }

    /// SHA-256 of the pixel bytes.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }

    fn ensure_same_shape(&self, other: &FrameBuffer) -> Result<(), FrameError> {
        if self.shape != other.shape {
            return Err(FrameError::ShapeMismatch {
                expected: self.shape,
                actual: other.shape,
            });
        }
        Ok(())
    }
}

// Pixel content stays out of logs and panic messages.
impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("shape", &self.shape)
            .field("bytes", &self.data.len())
            .finish()
    }
}
