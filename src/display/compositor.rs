//! Result Compositor: draws hollow highlight boxes onto the displayed frame

use std::time::Instant;

use tracing::{trace, warn};

use crate::display::pixels::{PixelFormatDescriptor, PixelViewMut};
use crate::inference::ScaledRegion;
use crate::DisplayConfig;

/// Largest pixel the tile may need to hold
const TILE_BYTES_PER_PIXEL: usize = 4;

/// Builds each box as a filled tile with a mask-colored interior, then
/// copies it onto the frame treating the mask color as transparent.
///
/// The tile is allocated once; boxes larger than it are skipped.
pub struct Compositor {
    tile: Vec<u8>,
    max_width: u32,
    max_height: u32,
    border: u32,
    opacity: u8,
}

impl Compositor {
    pub fn new(config: &DisplayConfig) -> Self {
        let pixels = config.tile_max_width as usize * config.tile_max_height as usize;
        Self {
            tile: vec![0; pixels * TILE_BYTES_PER_PIXEL],
            max_width: config.tile_max_width,
            max_height: config.tile_max_height,
            border: config.border_width,
            opacity: config.opacity,
        }
    }

    /// Border thickness in pixels
    pub fn border(&self) -> u32 {
        self.border
    }

    /// Draw one highlight box. Returns false if the box was skipped.
    pub fn draw(&mut self, surface: &mut PixelViewMut<'_>, region: &ScaledRegion) -> bool {
        if region.width > self.max_width || region.height > self.max_height {
            warn!(
                "Detection box {}x{} exceeds the {}x{} tile, skipped",
                region.width, region.height, self.max_width, self.max_height
            );
            return false;
        }
        if region.width == 0 || region.height == 0 {
            return false;
        }

        let started = Instant::now();
        let format = surface.format();
        let mask = format.default_mask_color;

        let Ok(mut tile) = PixelViewMut::new(
            &mut self.tile,
            region.width,
            region.height,
            format.format,
        ) else {
            return false;
        };
        tile.fill(format.default_highlight_color);
        tile.fill_rect(
            self.border,
            self.border,
            region.width.saturating_sub(2 * self.border),
            region.height.saturating_sub(2 * self.border),
            mask,
        );

        let x_end = region.x.saturating_add(region.width).min(surface.width());
        let y_end = region.y.saturating_add(region.height).min(surface.height());
        for y in region.y..y_end {
            for x in region.x..x_end {
                let Some(src) = tile.get(x - region.x, y - region.y) else {
                    continue;
                };
                if src == mask {
                    continue;
                }
                let raw = match (self.opacity, surface.get(x, y)) {
                    (u8::MAX, _) | (_, None) => src,
                    (opacity, Some(dst)) => blend(format, src, dst, opacity),
                };
                surface.set(x, y, raw);
            }
        }

        trace!(
            "Box at ({}, {}) {}x{}",
            region.x,
            region.y,
            region.width,
            region.height
        );
        metrics::histogram!("argus_compose_time_us").record(started.elapsed().as_micros() as f64);
        true
    }
}

/// Per-channel `src * a + dst * (1 - a)`; bits outside the color channels
/// keep the destination's value.
fn blend(format: &PixelFormatDescriptor, src: u32, dst: u32, opacity: u8) -> u32 {
    let alpha = u32::from(opacity);
    let mut raw = dst;
    for channel in format.channels() {
        let s = channel.extract(src);
        let d = channel.extract(dst);
        let mixed = (s * alpha + d * (255 - alpha)) / 255;
        raw = (raw & !(channel.mask() << channel.offset)) | (mixed << channel.offset);
    }
    raw
}
