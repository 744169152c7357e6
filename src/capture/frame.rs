use std::fmt;

use serde::{Deserialize, Serialize};

/// ISP output streams the pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    /// Full resolution output, displayed directly
    FullResolution,
    /// Downscaler output, fed to inference
    Downscaled,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::FullResolution => f.write_str("full-resolution"),
            StreamType::Downscaled => f.write_str("downscaled"),
        }
    }
}

/// Location of a frame buffer inside one of the ring pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferAddress {
    pub stream: StreamType,
    pub slot: usize,
}

impl BufferAddress {
    pub fn new(stream: StreamType, slot: usize) -> Self {
        Self { stream, slot }
    }
}

impl fmt::Display for BufferAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.stream, self.slot)
    }
}

/// Hand-off status of a plane between firmware and adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStatus {
    /// Buffer is available to be filled
    Ready,
    /// No buffer: the firmware drops this plane
    #[default]
    Purge,
}

/// Frame descriptor exchanged with the frame-producing firmware.
///
/// On `acquire` only `address` and `status` are meaningful. On `release` the
/// firmware fills in geometry, byte size and the capture sequence number; the
/// adapter resolves `format` before dispatching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub address: Option<BufferAddress>,
    pub status: BufferStatus,
    pub width: u32,
    pub height: u32,
    /// Bytes written by the producer
    pub size: usize,
    /// Pixel format code, see [`crate::display::pixels::PixelFormat::code`]
    pub format: u32,
    /// Capture sequence number, shared by the full-res/downscaled pair
    pub frame_id: u32,
}

impl FrameDescriptor {
    /// A purged plane, as handed out when no buffer is available
    pub fn purged() -> Self {
        Self::default()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Observed bytes per pixel, or 0 when the geometry is empty
    pub fn bytes_per_pixel(&self) -> usize {
        match self.pixel_count() {
            0 => 0,
            pixels => self.size / pixels,
        }
    }
}
