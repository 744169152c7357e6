//! Simulated ISP firmware.
//!
//! On every trigger it renders one synthetic scene into both streams and
//! hands the frames back through the pipeline, full resolution first.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::{debug, warn};

use crate::capture::frame::{BufferStatus, FrameDescriptor, StreamType};
use crate::capture::CaptureTrigger;
use crate::display::pixels::{PixelFormat, PixelViewMut};
use crate::display::surface::DisplaySurface;
use crate::inference::InferenceEngine;
use crate::pipeline::Pipeline;
use crate::CaptureConfig;

const MAX_PLANES: usize = 3;
const BACKGROUND: (u8, u8, u8) = (24, 24, 48);
const OBJECT: (u8, u8, u8) = (255, 255, 255);

pub struct SimulatedIsp {
    full_res: (u32, u32),
    downscaled: (u32, u32),
    objects: u32,
    planes: usize,
    downscaled_bytes_per_pixel: Option<usize>,
    frame_id: u32,
}

impl SimulatedIsp {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            full_res: (config.full_res_width, config.full_res_height),
            downscaled: (config.downscaled_width, config.downscaled_height),
            objects: 2,
            planes: 1,
            downscaled_bytes_per_pixel: None,
            frame_id: 0,
        }
    }

    /// Number of bright squares in the scene
    pub fn with_objects(mut self, objects: u32) -> Self {
        self.objects = objects;
        self
    }

    /// Planes offered per capture, at most three
    pub fn with_planes(mut self, planes: usize) -> Self {
        self.planes = planes.clamp(1, MAX_PLANES);
        self
    }

    /// Write downscaled frames at this pixel size whatever the stream is
    /// configured for, like firmware out of step with the pipeline.
    pub fn with_downscaled_bytes_per_pixel(mut self, bytes_per_pixel: usize) -> Self {
        self.downscaled_bytes_per_pixel = Some(bytes_per_pixel);
        self
    }

    pub fn last_frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Scene objects as `(x, y, size)` in a `width` x `height` frame.
    ///
    /// Positions are fractions of the frame so both streams see the same scene.
    pub fn objects_at(&self, frame_id: u32, width: u32, height: u32) -> Vec<(u32, u32, u32)> {
        let size = (width.min(height) / 8).max(1);
        (0..self.objects)
            .map(|k| {
                let fx = (k as f32 * 0.37 + frame_id as f32 * 0.011) % 0.7 + 0.05;
                let fy = (k as f32 * 0.53 + 0.1) % 0.7 + 0.05;
                ((fx * width as f32) as u32, (fy * height as f32) as u32, size)
            })
            .collect()
    }

    /// Run one capture through both streams
    pub fn capture<S, E>(&mut self, pipeline: &mut Pipeline<S, E>)
    where
        S: DisplaySurface,
        E: InferenceEngine,
    {
        self.frame_id = self.frame_id.wrapping_add(1);
        self.deliver(pipeline, StreamType::FullResolution);
        self.deliver(pipeline, StreamType::Downscaled);
    }

    fn deliver<S: DisplaySurface, E: InferenceEngine>(
        &self,
        pipeline: &mut Pipeline<S, E>,
        stream: StreamType,
    ) {
        let (width, height) = match stream {
            StreamType::FullResolution => self.full_res,
            StreamType::Downscaled => self.downscaled,
        };
        let mut format = pipeline.source().format(stream);
        if let (StreamType::Downscaled, Some(bpp)) = (stream, self.downscaled_bytes_per_pixel) {
            format = PixelFormat::from_bytes_per_pixel(bpp);
        }

        let mut planes = [FrameDescriptor::default(); MAX_PLANES];
        let planes = &mut planes[..self.planes];

        if pipeline.acquire(stream, planes) == BufferStatus::Ready {
            if let Some(address) = planes[0].address {
                match pipeline.buffer_mut(address) {
                    Ok(buffer) => self.render(buffer, width, height, format),
                    Err(e) => warn!("Cannot write {}: {}", address, e),
                }
            }
            planes[0].size = width as usize * height as usize * format.bytes_per_pixel();
        }
        planes[0].width = width;
        planes[0].height = height;
        planes[0].frame_id = self.frame_id;

        pipeline.release(stream, planes);
    }

    fn render(&self, buffer: &mut [u8], width: u32, height: u32, format: PixelFormat) {
        let mut view = match PixelViewMut::new(buffer, width, height, format) {
            Ok(view) => view,
            Err(e) => {
                warn!("Frame does not fit its buffer: {}", e);
                return;
            }
        };
        let descriptor = format.descriptor();
        view.fill(descriptor.encode_rgb(BACKGROUND.0, BACKGROUND.1, BACKGROUND.2));

        let object = descriptor.encode_rgb(OBJECT.0, OBJECT.1, OBJECT.2);
        for (x, y, size) in self.objects_at(self.frame_id, width, height) {
            view.fill_rect(x, y, size, size, object);
        }
    }

    /// Move the ISP onto its own thread, taking ownership of the pipeline.
    ///
    /// The thread captures once per trigger and hands the pipeline back when
    /// every [`IspTrigger`] has been dropped.
    pub fn spawn<S, E>(
        self,
        pipeline: Pipeline<S, E>,
    ) -> std::io::Result<(IspTrigger, JoinHandle<Pipeline<S, E>>)>
    where
        S: DisplaySurface + 'static,
        E: InferenceEngine + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let handle = thread::Builder::new().name("isp".into()).spawn(move || {
            let mut isp = self;
            let mut pipeline = pipeline;
            while rx.recv().is_ok() {
                isp.capture(&mut pipeline);
            }
            debug!("Capture trigger gone after frame {}", isp.frame_id);
            pipeline
        })?;

        Ok((IspTrigger { tx }, handle))
    }
}

/// Stream enable line of the simulated ISP.
///
/// A trigger while a capture is still pending is dropped.
#[derive(Clone)]
pub struct IspTrigger {
    tx: Sender<()>,
}

impl CaptureTrigger for IspTrigger {
    fn trigger(&self) {
        if self.tx.try_send(()).is_err() {
            debug!("Capture already pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_scene_matches_across_streams() {
        let isp = SimulatedIsp::new(&Config::default().capture).with_objects(3);
        let full = isp.objects_at(7, 576, 576);
        let small = isp.objects_at(7, 192, 192);

        assert_eq!(full.len(), 3);
        for ((fx, fy, fs), (sx, sy, ss)) in full.iter().zip(&small) {
            assert!(fx.abs_diff(sx * 3) <= 3);
            assert!(fy.abs_diff(sy * 3) <= 3);
            assert_eq!(*fs, ss * 3);
        }
    }

    #[test]
    fn test_objects_stay_inside_frame() {
        let isp = SimulatedIsp::new(&Config::default().capture).with_objects(8);
        for frame_id in 0..200 {
            for (x, y, size) in isp.objects_at(frame_id, 192, 192) {
                assert!(x + size <= 192 && y + size <= 192);
            }
        }
    }
}
