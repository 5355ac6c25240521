//! # RGBA Image Objects
//!
//! The payload that lives inside the worker: an RGBA8 pixel buffer plus its
//! dimensions, and the box filter that runs over it.
//!
//! Buffers are taken by value and handed back by value. Nothing here copies the
//! caller's allocation.

use thiserror::Error;

/// Bytes per pixel.
pub const CHANNELS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("buffer holds {actual} bytes, a {width}x{height} RGBA image needs {expected}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("a {width}x{height} RGBA image does not fit in memory")]
    Overflow { width: u32, height: u32 },
}

/// Byte length of a `width` x `height` RGBA8 buffer.
pub fn buffer_len(width: u32, height: u32) -> Result<usize, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::ZeroDimension { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(CHANNELS))
        .ok_or(ImageError::Overflow { width, height })
}

pub struct ImageObject {
    width: u32,
    height: u32,
    data: Vec<u8>,
    // second buffer for filter passes, allocated on first use
    scratch: Vec<u8>,
}

impl ImageObject {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        let expected = buffer_len(width, height)?;
        if data.len() != expected {
            return Err(ImageError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
            scratch: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// One 3x3 box-average pass over the RGB channels.
    ///
    /// Neighbours outside the image are clamped to the nearest edge pixel.
    /// Alpha is written as fully opaque.
    pub fn average_pass(&mut self) {
        let w = self.width as usize;
        let h = self.height as usize;
        if self.scratch.len() != self.data.len() {
            self.scratch.resize(self.data.len(), 0);
        }

        let src = &self.data;
        let dst = &mut self.scratch;
        for y in 0..h {
            let rows = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
            for x in 0..w {
                let cols = [x.saturating_sub(1), x, (x + 1).min(w - 1)];

                let mut sum = [0u32; 3];
                for &ry in &rows {
                    for &cx in &cols {
                        let i = (ry * w + cx) * CHANNELS;
                        for (c, total) in sum.iter_mut().enumerate() {
                            *total += u32::from(src[i + c]);
                        }
                    }
                }

                let o = (y * w + x) * CHANNELS;
                for (c, total) in sum.iter().enumerate() {
                    dst[o + c] = ((total + 4) / 9) as u8;
                }
                dst[o + 3] = u8::MAX;
            }
        }

        std::mem::swap(&mut self.data, &mut self.scratch);
    }

    /// Runs `iterations` passes back to back.
    pub fn average_filter(&mut self, iterations: u32) {
        for _ in 0..iterations {
            self.average_pass();
        }
    }

    /// Consumes the image, returning `(width, height, buffer)`.
    pub fn into_parts(self) -> (u32, u32, Vec<u8>) {
        (self.width, self.height, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_dimensions() {
        let err = ImageObject::new(0, 4, Vec::new()).err();
        assert_eq!(err, Some(ImageError::ZeroDimension { width: 0, height: 4 }));
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let err = ImageObject::new(2, 2, vec![0; 15]).err();
        assert_eq!(
            err,
            Some(ImageError::SizeMismatch {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15,
            })
        );
    }

    #[test]
    fn test_rejects_overflowing_dimensions() {
        assert_eq!(
            buffer_len(u32::MAX, u32::MAX),
            Err(ImageError::Overflow { width: u32::MAX, height: u32::MAX })
        );
    }

    #[test]
    fn test_zero_image_becomes_opaque() {
        let mut image = ImageObject::new(4, 4, vec![0; 64]).unwrap();
        image.average_pass();

        for pixel in image.data().chunks_exact(CHANNELS) {
            assert_eq!(pixel, &[0, 0, 0, 255]);
        }
    }

    #[test]
    fn test_single_bright_pixel_spreads_evenly() {
        // in a 3x3 image every pixel's clamped window holds the centre exactly once
        let mut data = vec![0; 36];
        data[4 * CHANNELS] = 90;
        let mut image = ImageObject::new(3, 3, data).unwrap();
        image.average_pass();

        for pixel in image.data().chunks_exact(CHANNELS) {
            assert_eq!(pixel, &[10, 0, 0, 255]);
        }
    }

    #[test]
    fn test_uniform_color_is_stable() {
        let data: Vec<u8> = [12, 200, 77, 0].repeat(5 * 3);
        let mut image = ImageObject::new(5, 3, data).unwrap();
        image.average_filter(7);

        for pixel in image.data().chunks_exact(CHANNELS) {
            assert_eq!(pixel, &[12, 200, 77, 255]);
        }
    }

    #[test]
    fn test_zero_iterations_leaves_buffer_untouched() {
        let data: Vec<u8> = (0..32).collect();
        let ptr = data.as_ptr();
        let mut image = ImageObject::new(4, 2, data).unwrap();
        image.average_filter(0);
        assert_eq!((image.width(), image.height()), (4, 2));

        let (w, h, back) = image.into_parts();
        assert_eq!((w, h), (4, 2));
        assert_eq!(back, (0..32).collect::<Vec<u8>>());
        assert_eq!(back.as_ptr(), ptr);
    }
}
