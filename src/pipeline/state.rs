use std::sync::atomic::{AtomicU8, Ordering};

use crate::display::pixels::PixelFormat;

/// Frame Identity Tracker.
///
/// Owned by the frame delivery context and only mutated through `&mut`, so
/// the two writers (full-res and downscaled callbacks) never race.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameState {
    pub last_displayed: u32,
    pub last_inferred: u32,
    pub displayed_width: u32,
    pub displayed_height: u32,
    pub displayed_format: Option<PixelFormat>,
}

impl FrameState {
    /// A new full-resolution frame may only go on screen once the one
    /// currently displayed has been inferred upon.
    pub fn ready_for_display(&self) -> bool {
        self.last_displayed == self.last_inferred
    }

    pub fn accept_display(&mut self, frame_id: u32, width: u32, height: u32, format: PixelFormat) {
        self.last_displayed = frame_id;
        self.displayed_width = width;
        self.displayed_height = height;
        self.displayed_format = Some(format);
    }

    pub fn mark_inferred(&mut self, frame_id: u32) {
        self.last_inferred = frame_id;
    }
}

/// Lifecycle of the display/stream pipeline
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle = 0,
    Configuring = 1,
    Streaming = 2,
    Stopping = 3,
    Stopped = 4,
    /// A fatal configuration error; nothing runs again
    Halted = 5,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Idle,
            1 => PipelineState::Configuring,
            2 => PipelineState::Streaming,
            3 => PipelineState::Stopping,
            4 => PipelineState::Stopped,
            _ => PipelineState::Halted,
        }
    }

    /// Whether completed frames should still be processed
    pub fn accepts_frames(self) -> bool {
        matches!(
            self,
            PipelineState::Idle | PipelineState::Configuring | PipelineState::Streaming
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Halted)
    }
}

/// Pipeline state shared between the delivery context and the stream controller
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PipelineState::Idle)
    }
}

impl StateCell {
    pub fn new(state: PipelineState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; fails if the state changed underneath
    pub fn advance(&self, from: PipelineState, to: PipelineState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter STOPPING unless already terminal or stopping
    pub fn begin_stop(&self) -> bool {
        let mut current = self.get();
        while current.accepts_frames() {
            if self.advance(current, PipelineState::Stopping) {
                return true;
            }
            current = self.get();
        }
        false
    }

    pub fn finish_stop(&self) -> bool {
        self.advance(PipelineState::Stopping, PipelineState::Stopped)
    }

    pub fn halt(&self) {
        self.0.store(PipelineState::Halted as u8, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.get() == PipelineState::Halted
    }
}
