pub mod frame;
pub mod pool;
pub mod sim;
pub mod source;

pub use frame::{BufferAddress, BufferStatus, FrameDescriptor, StreamType};
pub use pool::FramePools;
pub use sim::{IspTrigger, SimulatedIsp};
pub use source::FrameSourceAdapter;

/// Starts one capture on the camera.
///
/// Must not block; the stream controller calls it from its pacing loop.
pub trait CaptureTrigger: Send {
    fn trigger(&self);
}
