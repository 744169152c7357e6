//! Frame Dispatch: routes completed frames to display or inference and keeps
//! the two streams paired.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::{BufferAddress, BufferStatus, FrameDescriptor, StreamType};
use crate::capture::source::FrameSourceAdapter;
use crate::display::compositor::Compositor;
use crate::display::driver::{DisplayDriver, InterruptLine};
use crate::display::pixels::{PixelFormat, PixelView, PixelViewMut};
use crate::display::surface::DisplaySurface;
use crate::error::{DisplayError, InferenceError, PipelineError, PoolError};
use crate::inference::{InferenceEngine, InferenceGate, ResultPublisher, Upscale};
use crate::pipeline::signals::FrameConsumed;
use crate::pipeline::state::{FrameState, PipelineState, StateCell};
use crate::Config;

/// Everything the frame delivery context owns.
///
/// The producer acquires and releases buffers through this type; both
/// stream callbacks run on the producer's thread with `&mut self`.
pub struct Pipeline<S, E> {
    source: FrameSourceAdapter,
    frames: FrameState,
    display: DisplayDriver<S>,
    gate: InferenceGate<E>,
    compositor: Compositor,
    consumed: Arc<FrameConsumed>,
    state: Arc<StateCell>,
    min_region_size: u32,
    displayed_slot: Option<BufferAddress>,
}

impl<S: DisplaySurface, E: InferenceEngine> Pipeline<S, E> {
    pub fn new(
        config: &Config,
        surface: Arc<S>,
        engine: E,
        publisher: Option<ResultPublisher>,
    ) -> Result<Self, PipelineError> {
        let state = Arc::new(StateCell::default());
        let source = FrameSourceAdapter::new(&config.capture)?;

        Ok(Self {
            source,
            frames: FrameState::default(),
            display: DisplayDriver::new(surface, state.clone(), &config.display),
            gate: InferenceGate::new(engine, &config.inference, publisher),
            compositor: Compositor::new(&config.display),
            consumed: Arc::new(FrameConsumed::new()),
            state,
            min_region_size: config.display.border_width * config.display.min_size_factor,
            displayed_slot: None,
        })
    }

    pub fn state(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    pub fn consumed(&self) -> Arc<FrameConsumed> {
        self.consumed.clone()
    }

    pub fn interrupt_line(&self) -> InterruptLine<S> {
        self.display.interrupt_line()
    }

    pub fn frame_state(&self) -> FrameState {
        self.frames
    }

    pub fn source(&self) -> &FrameSourceAdapter {
        &self.source
    }

    pub fn display(&self) -> &DisplayDriver<S> {
        &self.display
    }

    pub fn gate(&self) -> &InferenceGate<E> {
        &self.gate
    }

    /// Producer side of the buffer contract
    pub fn acquire(&mut self, stream: StreamType, planes: &mut [FrameDescriptor]) -> BufferStatus {
        self.source.acquire(stream, planes)
    }

    /// Producer writes into a buffer it acquired
    pub fn buffer_mut(&mut self, address: BufferAddress) -> Result<&mut [u8], PoolError> {
        self.source.buffer_mut(address)
    }

    /// Producer hands back a completed capture.
    ///
    /// Called exactly once per acquire, whatever happened to the capture.
    /// Errors are logged here; a fatal one halts the pipeline.
    pub fn release(&mut self, stream: StreamType, planes: &mut [FrameDescriptor]) {
        let Some(frame) = self.source.complete(stream, planes) else {
            return;
        };

        let result = match stream {
            StreamType::FullResolution => self.on_full_res_frame(frame).map(|_| ()),
            StreamType::Downscaled => self.on_downscaled_frame(frame).map(|_| ()),
        };
        if let Err(e) = result {
            self.report(e);
        }

        if let Some(address) = frame.address {
            if self.displayed_slot != Some(address) {
                self.source.release_slot(address);
            }
        }

        if stream == StreamType::Downscaled {
            self.consumed.give();
        }
    }

    fn report(&mut self, err: PipelineError) {
        match err {
            PipelineError::Halted => debug!("Frame ignored, pipeline halted"),
            PipelineError::OutOfOrder { .. } => warn!("{}", err),
            err if err.is_fatal() => {
                error!("Fatal pipeline error, halting: {}", err);
                self.state.halt();
            }
            err => error!("{}", err),
        }
    }

    /// Full-resolution callback. Returns whether the frame went on screen.
    ///
    /// A frame is accepted only once the previously displayed one has been
    /// inferred upon. Acceptance claims the frame id even if no buffer came
    /// with it, so the downscaled frame of the same capture still pairs up.
    #[instrument(skip(self, frame), fields(frame_id = frame.frame_id))]
    pub fn on_full_res_frame(&mut self, frame: FrameDescriptor) -> Result<bool, PipelineError> {
        let state = self.state.get();
        if state == PipelineState::Halted {
            return Err(PipelineError::Halted);
        }
        if !state.accepts_frames() {
            debug!("Pipeline {:?}, frame not displayed", state);
            return Ok(false);
        }

        if frame.frame_id < self.frames.last_displayed {
            return Err(PipelineError::OutOfOrder {
                stream: StreamType::FullResolution,
                frame_id: frame.frame_id,
                last: self.frames.last_displayed,
            });
        }

        if !self.frames.ready_for_display() {
            debug!(
                "Frame {} dropped, frame {} not yet inferred",
                frame.frame_id, self.frames.last_displayed
            );
            metrics::counter!("argus_frames_dropped_total").increment(1);
            return Ok(false);
        }

        let format = PixelFormat::from_code(frame.format)?;
        self.frames.accept_display(frame.frame_id, frame.width, frame.height, format);

        let Some(address) = frame.address else {
            warn!("Frame {} has no buffer, display unchanged", frame.frame_id);
            return Ok(false);
        };

        let needed = frame.pixel_count() * format.bytes_per_pixel();
        let available = self.source.buffer(address)?.len();
        if needed > available {
            return Err(PoolError::FrameTooLarge { needed, available }.into());
        }

        self.display.show(address, frame.width, frame.height, format)?;

        if let Some(previous) = self.displayed_slot.replace(address) {
            if previous != address {
                self.source.release_slot(previous);
            }
        }
        metrics::counter!("argus_frames_displayed_total").increment(1);
        debug!("Displaying frame {} from {}", frame.frame_id, address);
        Ok(true)
    }

    /// Downscaled callback. Returns the number of boxes drawn.
    ///
    /// Always records the frame id as inferred, even when inference cannot
    /// run, so the display throttle keeps moving. Once inference ran and a
    /// frame is on screen, the overlay handshake waits for the scan-out
    /// quorum whether or not anything was detected.
    #[instrument(skip(self, frame), fields(frame_id = frame.frame_id))]
    pub fn on_downscaled_frame(&mut self, frame: FrameDescriptor) -> Result<usize, PipelineError> {
        let state = self.state.get();
        if state == PipelineState::Halted {
            return Err(PipelineError::Halted);
        }
        if !state.accepts_frames() {
            debug!("Pipeline {:?}, frame not inferred", state);
            return Ok(0);
        }

        if frame.frame_id < self.frames.last_inferred {
            return Err(PipelineError::OutOfOrder {
                stream: StreamType::Downscaled,
                frame_id: frame.frame_id,
                last: self.frames.last_inferred,
            });
        }
        self.frames.mark_inferred(frame.frame_id);

        let address = frame
            .address
            .ok_or(InferenceError::MissingBuffer(frame.frame_id))?;
        let data = self.source.buffer(address)?;
        let regions = self.gate.run(data, frame.width, frame.height, frame.format)?;
        metrics::counter!("argus_frames_inferred_total").increment(1);

        let Some(shown) = self.display.shown() else {
            debug!("Nothing on screen yet, {} boxes not drawn", regions.len());
            return Ok(0);
        };
        let displayed = (self.frames.displayed_width, self.frames.displayed_height);
        let upscale = Upscale::new(displayed, (frame.width, frame.height));
        let buffer = self.source.buffer_mut(shown.address)?;
        let mut surface = PixelViewMut::new(buffer, shown.width, shown.height, shown.format)
            .map_err(DisplayError::from)?;

        self.display.begin_overlay();
        let mut drawn = 0;
        for region in regions {
            let scaled = upscale.apply(region, self.min_region_size);
            if self.compositor.draw(&mut surface, &scaled) {
                drawn += 1;
            }
        }
        self.display.end_overlay();

        Ok(drawn)
    }

    /// Read-only view of the frame currently on screen
    pub fn displayed_frame(&self) -> Option<PixelView<'_>> {
        let shown = self.display.shown()?;
        let buffer = self.source.buffer(shown.address).ok()?;
        PixelView::new(buffer, shown.width, shown.height, shown.format).ok()
    }

    /// Turn the display off and give back the held buffer
    pub fn shutdown(&mut self) {
        self.display.stop();
        if let Some(address) = self.displayed_slot.take() {
            self.source.release_slot(address);
        }
        info!(
            "Pipeline shut down in {:?}: last displayed {} ({}x{} {:?}), last inferred {}",
            self.state.get(),
            self.frames.last_displayed,
            self.frames.displayed_width,
            self.frames.displayed_height,
            self.frames.displayed_format,
            self.frames.last_inferred
        );
    }
}
