//! Frame Source Adapter: the pipeline side of the firmware's get/put frame contract

use tracing::{debug, error, info};

use crate::capture::frame::{BufferAddress, BufferStatus, FrameDescriptor, StreamType};
use crate::capture::pool::{FramePools, PoolStats};
use crate::display::pixels::PixelFormat;
use crate::error::PoolError;
use crate::CaptureConfig;

/// Largest pixel the firmware may write into a slot
const MAX_BYTES_PER_PIXEL: usize = 4;

/// Hands out ring pool buffers to the frame producer and resolves the
/// metadata of frames it gives back.
///
/// Only single-plane frames are supported: every plane past the first is
/// purged on both acquire and release.
pub struct FrameSourceAdapter {
    pools: FramePools,
    full_res_format: PixelFormat,
    downscaled_format: PixelFormat,
}

impl FrameSourceAdapter {
    pub fn new(config: &CaptureConfig) -> Result<Self, PoolError> {
        let full_res_slot =
            config.full_res_width as usize * config.full_res_height as usize * MAX_BYTES_PER_PIXEL;
        let downscaled_slot = config.downscaled_width as usize
            * config.downscaled_height as usize
            * MAX_BYTES_PER_PIXEL;

        let pools = FramePools::new(full_res_slot, downscaled_slot, config.buffer_count)?;
        info!(
            "Frame source ready: {} buffers per stream, {} / {} byte slots",
            config.buffer_count,
            pools.slot_size(StreamType::FullResolution),
            pools.slot_size(StreamType::Downscaled)
        );

        Ok(Self {
            pools,
            full_res_format: config.full_res_format,
            downscaled_format: config.downscaled_format,
        })
    }

    /// Configured output format of a stream
    pub fn format(&self, stream: StreamType) -> PixelFormat {
        match stream {
            StreamType::FullResolution => self.full_res_format,
            StreamType::Downscaled => self.downscaled_format,
        }
    }

    /// Fill `planes` with the buffers the producer should capture into.
    ///
    /// Returns [`BufferStatus::Purge`] when the pool has nothing to give, in
    /// which case the producer drops the capture.
    pub fn acquire(&mut self, stream: StreamType, planes: &mut [FrameDescriptor]) -> BufferStatus {
        let Some((first, rest)) = planes.split_first_mut() else {
            return BufferStatus::Purge;
        };

        for plane in rest {
            *plane = FrameDescriptor::purged();
        }

        match self.pools.acquire_slot(stream) {
            Some(address) => {
                *first = FrameDescriptor {
                    address: Some(address),
                    status: BufferStatus::Ready,
                    ..FrameDescriptor::default()
                };
                BufferStatus::Ready
            }
            None => {
                error!("No {} buffer available!", stream);
                *first = FrameDescriptor::purged();
                BufferStatus::Purge
            }
        }
    }

    /// Take back the planes of a completed capture.
    ///
    /// All planes are marked purged; the first one is returned with its pixel
    /// format resolved. When the observed bytes per pixel disagree with the
    /// configured format, a 2-byte frame is taken as RGB565 and anything else
    /// as RGB32.
    pub fn complete(
        &mut self,
        stream: StreamType,
        planes: &mut [FrameDescriptor],
    ) -> Option<FrameDescriptor> {
        for plane in planes.iter_mut() {
            plane.status = BufferStatus::Purge;
        }

        let mut frame = *planes.first()?;
        let mut format = self.format(stream);

        if frame.address.is_some() {
            debug!(
                "-- {} frame {}: {} x {} @ {} bytes per pixel --",
                stream,
                frame.frame_id,
                frame.width,
                frame.height,
                frame.bytes_per_pixel()
            );

            let observed = frame.bytes_per_pixel();
            if observed != format.bytes_per_pixel() {
                let fallback = PixelFormat::from_bytes_per_pixel(observed);
                info!(
                    "Bytes per pixel mismatch on {} stream! Expected: {}. Using format: {:?}",
                    stream,
                    format.bytes_per_pixel(),
                    fallback
                );
                format = fallback;
            }
        }

        frame.format = format.code();
        Some(frame)
    }

    pub fn buffer(&self, address: BufferAddress) -> Result<&[u8], PoolError> {
        self.pools.buffer(address)
    }

    /// Producer access to an acquired buffer
    pub fn buffer_mut(&mut self, address: BufferAddress) -> Result<&mut [u8], PoolError> {
        self.pools.buffer_mut(address)
    }

    pub fn release_slot(&mut self, address: BufferAddress) {
        self.pools.release_slot(address);
    }

    pub fn pools(&self) -> &FramePools {
        &self.pools
    }

    pub fn stats(&self, stream: StreamType) -> PoolStats {
        self.pools.stats(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn adapter() -> FrameSourceAdapter {
        let mut config = Config::default().capture;
        config.full_res_width = 32;
        config.full_res_height = 32;
        config.downscaled_width = 16;
        config.downscaled_height = 16;
        FrameSourceAdapter::new(&config).unwrap()
    }

    #[test]
    fn test_extra_planes_are_purged() {
        let mut source = adapter();
        let mut planes = [FrameDescriptor::default(); 3];
        planes[2].address = Some(BufferAddress::new(StreamType::Downscaled, 3));

        let status = source.acquire(StreamType::Downscaled, &mut planes);

        assert_eq!(status, BufferStatus::Ready);
        assert_eq!(planes[0].status, BufferStatus::Ready);
        assert!(planes[0].address.is_some());
        assert_eq!(planes[1], FrameDescriptor::purged());
        assert_eq!(planes[2], FrameDescriptor::purged());
    }

    #[test]
    fn test_acquire_follows_capture_counter() {
        let mut source = adapter();
        let mut planes = [FrameDescriptor::default(); 1];
        let mut slots = Vec::new();
        for _ in 0..6 {
            source.acquire(StreamType::FullResolution, &mut planes);
            slots.push(planes[0].address.unwrap().slot);
        }
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_complete_resolves_configured_format() {
        let mut source = adapter();
        let mut planes = [FrameDescriptor::default(); 1];
        source.acquire(StreamType::Downscaled, &mut planes);
        planes[0].width = 16;
        planes[0].height = 16;
        planes[0].size = 16 * 16 * 2;
        planes[0].frame_id = 9;

        let frame = source.complete(StreamType::Downscaled, &mut planes).unwrap();

        assert_eq!(frame.format, PixelFormat::Rgb565.code());
        assert_eq!(frame.frame_id, 9);
        assert_eq!(planes[0].status, BufferStatus::Purge);
    }

    #[test]
    fn test_complete_falls_back_on_bytes_per_pixel_mismatch() {
        let mut source = adapter();
        let mut planes = [FrameDescriptor::default(); 1];
        source.acquire(StreamType::FullResolution, &mut planes);
        planes[0].width = 8;
        planes[0].height = 8;
        planes[0].size = 8 * 8 * 4;

        let frame = source.complete(StreamType::FullResolution, &mut planes).unwrap();
        assert_eq!(frame.format, PixelFormat::Rgb32.code());
    }

    #[test]
    fn test_complete_without_planes() {
        let mut source = adapter();
        assert_eq!(source.complete(StreamType::FullResolution, &mut []), None);
    }
}
