//! Inference Gate: grayscale conversion, model invocation and result saturation

use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::display::pixels::{PixelFormat, PixelView, PixelViewMut};
use crate::error::InferenceError;
use crate::inference::{DetectionRegion, GrayFrame, InferenceEngine, ResultPublisher};
use crate::InferenceConfig;

/// Perceptual luma weights
pub const RED_WEIGHT: f32 = 0.299;
pub const GREEN_WEIGHT: f32 = 0.587;
pub const BLUE_WEIGHT: f32 = 0.114;

/// Convert a packed color frame to 8-bit gray, one output byte per input pixel.
///
/// Each channel is scaled to the 8-bit range before weighting, so a full
/// intensity 5-bit red lands near `0.299 * 248`.
pub fn rgb_to_grayscale(src: &PixelView<'_>, dst: &mut [u8]) {
    let format = src.format();
    let scale = |bit_size: u32| (1u32 << (8 - bit_size)) as f32;
    let red = RED_WEIGHT * scale(format.red.bit_size);
    let green = GREEN_WEIGHT * scale(format.green.bit_size);
    let blue = BLUE_WEIGHT * scale(format.blue.bit_size);

    for (gray, raw) in dst.iter_mut().zip(src.pixels()) {
        let intensity = red * format.red.extract(raw) as f32
            + green * format.green.extract(raw) as f32
            + blue * format.blue.extract(raw) as f32;
        *gray = (intensity as u32).min(0xff) as u8;
    }
}

/// Expand gray values back into the destination's color layout.
///
/// Returns the (min, max) gray level seen, useful when checking what the
/// model was fed.
pub fn grayscale_to_rgb(src: &[u8], dst: &mut PixelViewMut<'_>) -> (u8, u8) {
    let format = dst.format();
    let width = dst.width();
    let mut range = (u8::MAX, u8::MIN);

    for (i, gray) in src
        .iter()
        .take(dst.width() as usize * dst.height() as usize)
        .enumerate()
    {
        range = (range.0.min(*gray), range.1.max(*gray));
        let raw = format.encode_rgb(*gray, *gray, *gray);
        dst.set(i as u32 % width, i as u32 / width, raw);
    }

    if src.is_empty() {
        (0, 0)
    } else {
        range
    }
}

/// Runs the model on downscaled frames.
///
/// The grayscale scratch buffer and result array are sized once from the
/// configuration; nothing is allocated per frame apart from the summary text.
pub struct InferenceGate<E> {
    engine: E,
    gray: Vec<u8>,
    results: Vec<DetectionRegion>,
    publisher: Option<ResultPublisher>,
    summary_label: String,
    last_size: (u32, u32),
}

impl<E: InferenceEngine> InferenceGate<E> {
    pub fn new(engine: E, config: &InferenceConfig, publisher: Option<ResultPublisher>) -> Self {
        let capacity = config.max_frame_width as usize * config.max_frame_height as usize;
        Self {
            engine,
            gray: vec![0; capacity],
            results: vec![DetectionRegion::default(); config.max_results],
            publisher,
            summary_label: config.summary_label.clone(),
            last_size: (0, 0),
        }
    }

    /// Pixels the grayscale scratch buffer can hold
    pub fn capacity(&self) -> usize {
        self.gray.len()
    }

    pub fn max_results(&self) -> usize {
        self.results.len()
    }

    /// Grayscale input of the most recent frame
    pub fn last_grayscale(&self) -> GrayFrame<'_> {
        let (width, height) = self.last_size;
        GrayFrame {
            data: &self.gray[..width as usize * height as usize],
            width,
            height,
        }
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Run one frame through the model.
    ///
    /// An unknown format code is a configuration error. Frames larger than
    /// the scratch buffer are rejected. Detections beyond the result capacity
    /// are cut off.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn run(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        format: u32,
    ) -> Result<&[DetectionRegion], InferenceError> {
        let format = PixelFormat::from_code(format)?;

        let pixels = width as usize * height as usize;
        if pixels > self.gray.len() {
            return Err(InferenceError::FrameTooLarge {
                width,
                height,
                capacity: self.gray.len(),
            });
        }

        let view = PixelView::new(data, width, height, format)?;
        let started = Instant::now();

        debug!("Converting {:?} frame to gray", format);
        rgb_to_grayscale(&view, &mut self.gray[..pixels]);
        self.last_size = (width, height);

        let frame = GrayFrame {
            data: &self.gray[..pixels],
            width,
            height,
        };
        let found = self.engine.run_inference(frame, &mut self.results)?;
        let count = found.min(self.results.len());
        if found > count {
            debug!("{} detections truncated to {}", found, count);
        }

        metrics::histogram!("argus_inference_time_us").record(started.elapsed().as_micros() as f64);
        metrics::counter!("argus_detections_total").increment(count as u64);

        for (i, region) in self.results[..count].iter().enumerate() {
            debug!(
                "{}) Detection box: {{x={},y={},w={},h={}}}",
                i, region.x, region.y, region.width, region.height
            );
        }

        let summary = format!("{}: {}", self.summary_label, found);
        info!("Complete recognition: {}", summary);
        if let Some(publisher) = &self.publisher {
            publisher.publish(summary);
        }

        Ok(&self.results[..count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::Config;

    /// Reports `found` detections, filling whatever capacity it is given
    struct Greedy {
        found: usize,
        last_input: Vec<u8>,
    }

    impl InferenceEngine for Greedy {
        fn run_inference(
            &mut self,
            frame: GrayFrame<'_>,
            regions: &mut [DetectionRegion],
        ) -> Result<usize, InferenceError> {
            self.last_input = frame.data.to_vec();
            for (i, region) in regions.iter_mut().take(self.found).enumerate() {
                *region = DetectionRegion::new(i as u32, i as u32, 4, 4);
            }
            Ok(self.found)
        }
    }

    fn gate(found: usize) -> (InferenceGate<Greedy>, flume::Receiver<String>) {
        let config = Config::default().inference;
        let (publisher, rx) = ResultPublisher::channel(4);
        let engine = Greedy {
            found,
            last_input: Vec::new(),
        };
        (InferenceGate::new(engine, &config, Some(publisher)), rx)
    }

    fn gray_of(format: PixelFormat, raw: u32) -> u8 {
        let mut data = vec![0u8; format.bytes_per_pixel()];
        PixelViewMut::new(&mut data, 1, 1, format).unwrap().set(0, 0, raw);
        let mut gray = [0u8; 1];
        rgb_to_grayscale(&PixelView::new(&data, 1, 1, format).unwrap(), &mut gray);
        gray[0]
    }

    #[test]
    fn test_pure_channels_rgb565() {
        let d = PixelFormat::Rgb565.descriptor();
        let red = gray_of(PixelFormat::Rgb565, d.encode_rgb(255, 0, 0));
        let green = gray_of(PixelFormat::Rgb565, d.encode_rgb(0, 255, 0));
        let blue = gray_of(PixelFormat::Rgb565, d.encode_rgb(0, 0, 255));

        assert!((red as f32 - 0.299 * 248.0).abs() <= 1.0, "red {red}");
        assert!((green as f32 - 0.587 * 252.0).abs() <= 1.0, "green {green}");
        assert!((blue as f32 - 0.114 * 248.0).abs() <= 1.0, "blue {blue}");
    }

    #[test]
    fn test_pure_channels_rgb32() {
        assert_eq!(gray_of(PixelFormat::Rgb32, 0x00FF_0000), 76);
        assert_eq!(gray_of(PixelFormat::Rgb32, 0x0000_FF00), 149);
        assert_eq!(gray_of(PixelFormat::Rgb32, 0x0000_00FF), 29);
        assert!(gray_of(PixelFormat::Rgb32, 0x00FF_FFFF) >= 254);
    }

    #[test]
    fn test_pure_channels_packed_10bit() {
        let d = PixelFormat::A2r10g10b10.descriptor();
        assert_eq!(gray_of(PixelFormat::A2r10g10b10, d.encode_rgb(255, 0, 0)), 76);
    }

    #[test]
    fn test_gray_round_trip_statistics() {
        let gray = [10u8, 200, 90, 40];
        let mut data = vec![0u8; 4 * 4];
        let mut view = PixelViewMut::new(&mut data, 2, 2, PixelFormat::Rgb32).unwrap();
        assert_eq!(grayscale_to_rgb(&gray, &mut view), (10, 200));
        assert_eq!(view.get(1, 0), Some(0x00C8_C8C8));
    }

    #[test]
    fn test_saturates_to_capacity() {
        let (mut gate, rx) = gate(25);
        let data = vec![0u8; 8 * 8 * 2];

        let regions = gate.run(&data, 8, 8, PixelFormat::Rgb565.code()).unwrap();

        assert_eq!(regions.len(), 10);
        assert_eq!(regions[9], DetectionRegion::new(9, 9, 4, 4));
        assert_eq!(rx.try_recv().unwrap(), "Detected faces: 25");
    }

    #[test]
    fn test_engine_sees_grayscale_input() {
        let (mut gate, _rx) = gate(0);
        let mut data = vec![0u8; 2 * 1 * 4];
        PixelViewMut::new(&mut data, 2, 1, PixelFormat::Rgb32)
            .unwrap()
            .set(1, 0, 0x00FF_FFFF);

        let regions = gate.run(&data, 2, 1, PixelFormat::Rgb32.code()).unwrap();
        assert!(regions.is_empty());
        assert_eq!(gate.engine_mut().last_input.len(), 2);
        let input = gate.engine_mut().last_input.clone();
        assert_eq!(gate.last_grayscale().data, &input[..]);
        assert_eq!(gate.engine_mut().last_input[0], 0);
        assert!(gate.engine_mut().last_input[1] >= 254);
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let (mut gate, rx) = gate(1);
        let data = vec![0u8; 200 * 200 * 2];
        let err = gate.run(&data, 200, 200, 0).unwrap_err();
        assert!(matches!(err, InferenceError::FrameTooLarge { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rejects_unknown_format() {
        let (mut gate, _rx) = gate(1);
        let data = vec![0u8; 16];
        assert_eq!(
            gate.run(&data, 2, 2, 7).unwrap_err(),
            InferenceError::Format(FormatError::Unsupported(7))
        );
    }

    #[test]
    fn test_rejects_short_buffer() {
        let (mut gate, _rx) = gate(1);
        let data = vec![0u8; 7];
        assert!(matches!(
            gate.run(&data, 2, 2, 0),
            Err(InferenceError::ShortBuffer(_))
        ));
    }
}
