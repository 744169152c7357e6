use std::path::Path;
use std::time::Duration;

use image::error::{ParameterError, ParameterErrorKind};
use image::{ImageBuffer, ImageError, Rgb};
use tracing::{info, warn};

use crate::display::pixels::{PixelFormat, PixelView, PixelViewMut};
use crate::inference::gate::grayscale_to_rgb;
use crate::inference::GrayFrame;

/// Scheduler ticks to wall time
pub fn ticks(count: u64, tick_ms: u64) -> Duration {
    Duration::from_millis(count.saturating_mul(tick_ms))
}

/// Pin the calling thread to one CPU core, if it exists
pub fn pin_current_thread(core: usize) -> bool {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Cannot query CPU cores, thread not pinned");
        return false;
    };

    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            info!("Pinned thread to core {}", core);
            true
        }
        Some(_) => {
            warn!("Failed to pin thread to core {}", core);
            false
        }
        None => {
            warn!("No CPU core {}, thread not pinned", core);
            false
        }
    }
}

/// Expand a packed frame to 8-bit RGB
pub fn to_rgb_image(frame: &PixelView<'_>) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let format = frame.format();
    let width = frame.width();
    let mut image = ImageBuffer::new(width, frame.height());
    for (i, raw) in frame.pixels().enumerate() {
        let i = i as u32;
        image.put_pixel(i % width, i / width, Rgb(format.decode_rgb(raw)));
    }
    image
}

/// Write a frame out as PNG
pub fn save_snapshot(frame: &PixelView<'_>, path: &Path) -> Result<(), ImageError> {
    to_rgb_image(frame).save(path)?;
    info!("Snapshot written to {}", path.display());
    Ok(())
}

/// Write the model's grayscale input out as PNG.
///
/// Returns the (min, max) gray level of the frame.
pub fn save_gray_snapshot(frame: &GrayFrame<'_>, path: &Path) -> Result<(u8, u8), ImageError> {
    let mut data = vec![0u8; frame.data.len() * PixelFormat::Rgb32.bytes_per_pixel()];
    let mut view = PixelViewMut::new(&mut data, frame.width, frame.height, PixelFormat::Rgb32)
        .map_err(|_| {
            ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            ))
        })?;
    let range = grayscale_to_rgb(frame.data, &mut view);
    save_snapshot(&view.as_view(), path)?;
    Ok(range)
}
