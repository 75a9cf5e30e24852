//! Raw frames captured from an engine and their conversion into RGBA order.
//!
//! Engines hand back whatever layout their surface uses. Chromium bitmaps are
//! BGRA with premultiplied alpha; a decoded screenshot is RGBA with straight
//! alpha. [`convert`] normalizes channel order and carries the alpha mode
//! through so the codec can be told what it is writing.

use crate::{Error, Result};

/// Byte order of the color components within one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Bgra,
    Rgba,
}

/// How the color channels relate to alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// Color channels are already scaled by alpha
    Premultiplied,
    /// Color channels are independent of alpha
    Straight,
}

/// A packed 8-bit, 4-channel pixel buffer as produced by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub channel_order: ChannelOrder,
    pub alpha_mode: AlphaMode,
}

impl RawFrame {
    /// Number of bytes a frame of `width` x `height` must hold
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    /// Fail with `FormatError` unless `pixels` matches the dimensions
    pub fn validate(&self) -> Result<()> {
        let expected = Self::expected_len(self.width, self.height);
        if self.pixels.len() != expected {
            return Err(Error::FormatError {
                width: self.width,
                height: self.height,
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }
}

/// An RGBA-ordered frame ready for a codec
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Alpha mode of `pixels`, passed on to the encoder unchanged
    pub alpha_mode: AlphaMode,
}

/// Convert a raw engine frame into RGBA channel order.
///
/// BGRA input gets bytes 0 and 2 of every pixel swapped; green and alpha stay
/// put. RGBA input is moved through untouched. Alpha is never rewritten here.
pub fn convert(frame: RawFrame) -> Result<RgbaFrame> {
    frame.validate()?;

    let RawFrame {
        width,
        height,
        mut pixels,
        channel_order,
        alpha_mode,
    } = frame;

    if channel_order == ChannelOrder::Bgra {
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }

    Ok(RgbaFrame {
        width,
        height,
        pixels,
        alpha_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, pixels: Vec<u8>, order: ChannelOrder) -> RawFrame {
        RawFrame {
            width,
            height,
            pixels,
            channel_order: order,
            alpha_mode: AlphaMode::Straight,
        }
    }

    #[test]
    fn bgra_swaps_red_and_blue_only() {
        let input: Vec<u8> = (0u8..32).collect();
        let out = convert(frame(4, 2, input.clone(), ChannelOrder::Bgra)).unwrap();
        assert_eq!(out.pixels.len(), input.len());
        for k in 0..8 {
            assert_eq!(out.pixels[4 * k], input[4 * k + 2]);
            assert_eq!(out.pixels[4 * k + 1], input[4 * k + 1]);
            assert_eq!(out.pixels[4 * k + 2], input[4 * k]);
            assert_eq!(out.pixels[4 * k + 3], input[4 * k + 3]);
        }
    }

    #[test]
    fn rgba_passes_through() {
        let input = vec![10, 20, 30, 40, 50, 60, 70, 80];
        let out = convert(frame(2, 1, input.clone(), ChannelOrder::Rgba)).unwrap();
        assert_eq!(out.pixels, input);
        assert_eq!((out.width, out.height), (2, 1));
    }

    #[test]
    fn alpha_mode_is_carried() {
        let mut raw = frame(1, 1, vec![1, 2, 3, 4], ChannelOrder::Bgra);
        raw.alpha_mode = AlphaMode::Premultiplied;
        let out = convert(raw).unwrap();
        assert_eq!(out.alpha_mode, AlphaMode::Premultiplied);
        assert_eq!(out.pixels, vec![3, 2, 1, 4]);
    }

    #[test]
    fn short_and_long_buffers_are_rejected() {
        for len in [0usize, 15, 17, 32] {
            let err = convert(frame(2, 2, vec![0; len], ChannelOrder::Bgra)).unwrap_err();
            match err {
                Error::FormatError { expected, actual, .. } => {
                    assert_eq!(expected, 16);
                    assert_eq!(actual, len);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn empty_frame_is_valid() {
        let out = convert(frame(0, 0, Vec::new(), ChannelOrder::Bgra)).unwrap();
        assert!(out.pixels.is_empty());
    }
}
