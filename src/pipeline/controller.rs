//! Stream Controller: the loop that paces capture triggers

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::capture::CaptureTrigger;
use crate::pipeline::signals::{FrameConsumed, StreamGovernor, SystemEvents, EVENT_START, EVENT_STOP};
use crate::pipeline::state::StateCell;
use crate::utils::ticks;
use crate::PipelineConfig;

/// Bounded waits of one controller iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTiming {
    pub stop_poll: Duration,
    pub consumed_wait: Duration,
    pub pacing: Duration,
}

impl StreamTiming {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            stop_poll: ticks(config.stop_poll_ticks, config.tick_ms),
            consumed_wait: ticks(config.consumed_wait_ticks, config.tick_ms),
            pacing: ticks(config.pacing_ticks, config.tick_ms),
        }
    }
}

pub struct StreamController<T> {
    trigger: T,
    events: Arc<SystemEvents>,
    consumed: Arc<FrameConsumed>,
    governor: Arc<StreamGovernor>,
    state: Arc<StateCell>,
    timing: StreamTiming,
    frame_count: u32,
}

impl<T: CaptureTrigger> StreamController<T> {
    pub fn new(
        trigger: T,
        events: Arc<SystemEvents>,
        consumed: Arc<FrameConsumed>,
        governor: Arc<StreamGovernor>,
        state: Arc<StateCell>,
        timing: StreamTiming,
    ) -> Self {
        Self {
            trigger,
            events,
            consumed,
            governor,
            state,
            timing,
            frame_count: 0,
        }
    }

    /// Captures triggered so far
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// One iteration without the stop check: trigger if allowed, wait for
    /// the previous frame to be consumed, then pace.
    pub fn step(&mut self) {
        let enabled = self.governor.is_enabled() && !self.state.is_halted();
        if enabled {
            if self.frame_count == 0 || !self.governor.is_held() {
                self.frame_count += 1;
                info!("-- CAMERA STREAM TRIGGER #{} --", self.frame_count);
                self.trigger.trigger();
            }
            if !self.consumed.take(self.timing.consumed_wait) {
                debug!("Previous frame not consumed in {:?}", self.timing.consumed_wait);
            }
        }
        thread::sleep(self.timing.pacing);
    }

    /// Wait for a start, then run until a stop is requested. Leaves the
    /// pipeline STOPPED and returns the number of triggers issued.
    pub fn run(mut self) -> u32 {
        info!("Stream controller waiting for start");
        let mut started = false;
        loop {
            let mask = if started { EVENT_STOP } else { EVENT_START | EVENT_STOP };
            let raised = self.events.wait_any(mask, true, self.timing.stop_poll);
            if raised & EVENT_STOP != 0 {
                info!("Stopping processing");
                self.state.begin_stop();
                break;
            }
            if !started {
                if raised & EVENT_START == 0 {
                    continue;
                }
                info!("Stream controller running");
                started = true;
            }
            self.step();
        }
        self.state.finish_stop();
        info!("Stream controller stopped after {} triggers", self.frame_count);
        self.frame_count
    }
}
