pub mod detector;
pub mod gate;
pub mod publish;

pub use detector::BrightSpotDetector;
pub use gate::InferenceGate;
pub use publish::ResultPublisher;

use crate::error::InferenceError;

/// Bounding box in downscaled-frame pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DetectionRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Bounding box in displayed-frame pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaledRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Independent width/height ratios between the displayed and downscaled frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Upscale {
    pub width: f32,
    pub height: f32,
}

impl Upscale {
    pub fn new(displayed: (u32, u32), downscaled: (u32, u32)) -> Self {
        let ratio = |to: u32, from: u32| if from == 0 { 0.0 } else { to as f32 / from as f32 };
        Self {
            width: ratio(displayed.0, downscaled.0),
            height: ratio(displayed.1, downscaled.1),
        }
    }

    /// Map a detection into display coordinates, never narrower or shorter
    /// than `min_size` so thin boxes stay visible.
    pub fn apply(&self, region: &DetectionRegion, min_size: u32) -> ScaledRegion {
        ScaledRegion {
            x: (region.x as f32 * self.width) as u32,
            y: (region.y as f32 * self.height) as u32,
            width: ((region.width as f32 * self.width) as u32).max(min_size),
            height: ((region.height as f32 * self.height) as u32).max(min_size),
        }
    }
}

/// 8-bit grayscale frame handed to the model
#[derive(Debug, Clone, Copy)]
pub struct GrayFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// The external model.
///
/// `regions.len()` is the result capacity; the engine returns how many
/// detections it found. A count above the capacity means detections were
/// left out, never that more were written.
pub trait InferenceEngine: Send {
    fn run_inference(
        &mut self,
        frame: GrayFrame<'_>,
        regions: &mut [DetectionRegion],
    ) -> Result<usize, InferenceError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn run_inference(
        &mut self,
        frame: GrayFrame<'_>,
        regions: &mut [DetectionRegion],
    ) -> Result<usize, InferenceError> {
        (**self).run_inference(frame, regions)
    }
}
