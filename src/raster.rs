//! Software raster backend.
//!
//! Does not run JavaScript. The frame is a deterministic bar pattern seeded
//! by the SHA-256 of the loaded document, painted in the same layout a native
//! Chromium bitmap uses (BGRA, premultiplied alpha). Identical widget markup
//! always produces identical pixels, which makes this backend useful for
//! tests and for hosts without a browser.

use crate::frame::{AlphaMode, ChannelOrder, RawFrame};
use crate::{EngineConfig, Error, RenderEngine, Result};
use log::debug;
use sha2::{Digest, Sha256};
use url::Url;

const BARS: u32 = 16;

/// Height of the translucent header band, in rows
const BAND_ROWS: u32 = 8;

pub struct SoftwareEngine {
    config: EngineConfig,
    seed: Option<[u8; 32]>,
}

impl RenderEngine for SoftwareEngine {
    fn new(config: EngineConfig) -> Result<Self>
    where
        Self: Sized,
    {
        config.validate()?;
        Ok(Self { config, seed: None })
    }

    fn navigate(&mut self, address: &str) -> Result<()> {
        self.seed = None;
        let url = Url::parse(address)
            .map_err(|e| Error::LoadError(format!("Bad address `{}`: {}", address, e)))?;
        let path = url.to_file_path().map_err(|_| {
            Error::LoadError(format!("Software backend only loads file URLs, got `{}`", address))
        })?;
        let markup = std::fs::read(&path)
            .map_err(|e| Error::LoadError(format!("Unable to load `{}`: {}", path.display(), e)))?;
        self.seed = Some(Sha256::digest(&markup).into());
        debug!("Software engine loaded {} ({} bytes)", address, markup.len());
        Ok(())
    }

    fn capture(&mut self) -> Result<RawFrame> {
        let seed = self
            .seed
            .ok_or_else(|| Error::RenderError("Nothing has been loaded".into()))?;
        let vp = self.config.viewport;
        Ok(rasterize_with_seed(vp.width, vp.height, &seed))
    }
}

/// Paint a `width` x `height` BGRA premultiplied frame derived from `seed`
pub fn rasterize_with_seed(width: u32, height: u32, seed: &[u8]) -> RawFrame {
    let digest: [u8; 32] = Sha256::digest(seed).into();
    let color = [digest[0], digest[1], digest[2]];
    let band = BAND_ROWS.min(height);
    let plot_height = height - band;

    let mut pixels = Vec::with_capacity(RawFrame::expected_len(width, height));
    for y in 0..height {
        for x in 0..width {
            let (rgb, a) = if y < band {
                (color, 128u8)
            } else if in_bar(x, y - band, width, plot_height, &digest) {
                (color, 255u8)
            } else {
                ([255, 255, 255], 255u8)
            };
            let [r, g, b] = rgb.map(|c| premultiply(c, a));
            pixels.extend_from_slice(&[b, g, r, a]);
        }
    }

    RawFrame {
        width,
        height,
        pixels,
        channel_order: ChannelOrder::Bgra,
        alpha_mode: AlphaMode::Premultiplied,
    }
}

fn in_bar(x: u32, y: u32, width: u32, plot_height: u32, digest: &[u8; 32]) -> bool {
    if width < BARS || plot_height == 0 {
        return false;
    }
    let slot = width / BARS;
    let i = (x / slot).min(BARS - 1);
    let offset = x - i * slot;
    let gap = slot / 5;
    if offset < gap || offset >= slot - gap {
        return false;
    }
    let bar_height = digest[4 + i as usize] as u32 * plot_height / 255;
    y >= plot_height - bar_height
}

fn premultiply(c: u8, a: u8) -> u8 {
    ((c as u32 * a as u32 + 127) / 255) as u8
}
