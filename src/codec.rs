//! PNG encoding and decoding of frames.

use crate::frame::{AlphaMode, ChannelOrder, RawFrame, RgbaFrame};
use crate::{Error, Result};

/// Output image formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
        }
    }
}

/// Encoded image bytes handed to the HTTP boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Encode an RGBA frame as an 8-bit RGBA PNG.
///
/// PNG stores straight alpha only, so premultiplied frames are divided back
/// out before writing. Straight frames are written byte for byte.
pub fn encode_png(frame: &RgbaFrame) -> Result<EncodedImage> {
    let expected = RawFrame::expected_len(frame.width, frame.height);
    if frame.pixels.len() != expected {
        return Err(Error::FormatError {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.pixels.len(),
        });
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(Error::EncodeError(format!(
            "cannot encode an empty {}x{} image",
            frame.width, frame.height
        )));
    }

    let straight;
    let data: &[u8] = match frame.alpha_mode {
        AlphaMode::Straight => &frame.pixels,
        AlphaMode::Premultiplied => {
            straight = unpremultiply(&frame.pixels);
            &straight
        }
    };

    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, frame.width, frame.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(data)?;
        writer.finish()?;
    }

    Ok(EncodedImage {
        format: ImageFormat::Png,
        width: frame.width,
        height: frame.height,
        bytes: buffer,
    })
}

/// Divide premultiplied RGBA pixels back to straight alpha, rounding to the
/// nearest value. Fully transparent pixels become `0, 0, 0, 0`.
pub fn unpremultiply(pixels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len());
    for px in pixels.chunks_exact(4) {
        let a = px[3] as u32;
        match a {
            0 => out.extend_from_slice(&[0, 0, 0, 0]),
            255 => out.extend_from_slice(px),
            _ => {
                for &c in &px[..3] {
                    let v = (c as u32 * 255 + a / 2) / a;
                    out.push(v.min(255) as u8);
                }
                out.push(px[3]);
            }
        }
    }
    out
}

/// Decode a PNG into a straight-alpha RGBA [`RawFrame`].
///
/// Palette, grayscale and 16-bit images are expanded to 8-bit RGBA.
pub fn decode_png(bytes: &[u8]) -> Result<RawFrame> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| Error::RenderError(format!("Captured PNG is unreadable: {}", e)))?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| Error::RenderError(format!("Captured PNG frame is unreadable: {}", e)))?;
    let data = &buf[..info.buffer_size()];

    let pixels = match info.color_type {
        png::ColorType::Rgba => data.to_vec(),
        png::ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        png::ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        png::ColorType::Indexed => {
            return Err(Error::RenderError(
                "Captured PNG was not expanded from its palette".into(),
            ))
        }
    };

    let frame = RawFrame {
        width: info.width,
        height: info.height,
        pixels,
        channel_order: ChannelOrder::Rgba,
        alpha_mode: AlphaMode::Straight,
    };
    frame.validate()?;
    Ok(frame)
}
