//! Display Driver Adapter: frame presentation, overlay handshake and shutdown

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::capture::frame::BufferAddress;
use crate::display::pixels::PixelFormat;
use crate::display::surface::{DisplaySurface, SurfaceBuffer, INT_DMA_END};
use crate::error::DisplayError;
use crate::pipeline::state::{PipelineState, StateCell};
use crate::DisplayConfig;

/// Completed scan-outs since the last reset, counted from interrupt context
#[derive(Debug, Default)]
pub struct ScanoutCounter {
    shown: AtomicU32,
    lock: Mutex<()>,
    changed: Condvar,
}

impl ScanoutCounter {
    pub fn reset(&self) {
        self.shown.store(0, Ordering::Release);
    }

    pub fn record(&self) {
        self.shown.fetch_add(1, Ordering::AcqRel);
        self.changed.notify_all();
    }

    pub fn shown(&self) -> u32 {
        self.shown.load(Ordering::Acquire)
    }

    /// Wait until `count` scan-outs have been recorded or `timeout` passes
    pub fn wait_for(&self, count: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.shown() >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // record() notifies without the lock; short slices bound a missed wakeup
            let slice = (deadline - now).min(Duration::from_millis(1));
            guard = self
                .changed
                .wait_timeout(guard, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Interrupt service routine for the display controller.
///
/// Constant time, no allocation and no logging.
pub struct InterruptLine<S> {
    surface: Arc<S>,
    counter: Arc<ScanoutCounter>,
}

impl<S> Clone for InterruptLine<S> {
    fn clone(&self) -> Self {
        Self {
            surface: self.surface.clone(),
            counter: self.counter.clone(),
        }
    }
}

impl<S: DisplaySurface> InterruptLine<S> {
    pub fn handle(&self) {
        let state = self.surface.read_interrupt_state();
        self.surface.clear_interrupt(state);
        if state & INT_DMA_END != 0 {
            self.counter.record();
        }
    }
}

/// What the surface is currently scanning out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShownFrame {
    pub address: BufferAddress,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

pub struct DisplayDriver<S> {
    surface: Arc<S>,
    counter: Arc<ScanoutCounter>,
    state: Arc<StateCell>,
    quorum: u32,
    timeout: Duration,
    shown: Option<ShownFrame>,
}

impl<S: DisplaySurface> DisplayDriver<S> {
    pub fn new(surface: Arc<S>, state: Arc<StateCell>, config: &DisplayConfig) -> Self {
        Self {
            surface,
            counter: Arc::new(ScanoutCounter::default()),
            state,
            quorum: config.scanout_quorum,
            timeout: Duration::from_millis(config.scanout_timeout_ms),
            shown: None,
        }
    }

    pub fn interrupt_line(&self) -> InterruptLine<S> {
        InterruptLine {
            surface: self.surface.clone(),
            counter: self.counter.clone(),
        }
    }

    pub fn surface(&self) -> &Arc<S> {
        &self.surface
    }

    pub fn shown(&self) -> Option<ShownFrame> {
        self.shown
    }

    /// Scan-outs counted since the last overlay handshake began
    pub fn scanouts(&self) -> u32 {
        self.counter.shown()
    }

    /// Point the surface at a new framebuffer.
    ///
    /// The first call moves IDLE through CONFIGURING to STREAMING. A surface
    /// that refuses the geometry, buffer or pixel format halts the pipeline.
    pub fn show(
        &mut self,
        address: BufferAddress,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), DisplayError> {
        match self.state.get() {
            PipelineState::Halted => return Err(DisplayError::Halted),
            PipelineState::Idle => {
                self.state.advance(PipelineState::Idle, PipelineState::Configuring);
            }
            _ => {}
        }

        if let Err(e) = self.program(address, width, height, format) {
            error!("Display configuration failed: {}", e);
            self.state.halt();
            return Err(e);
        }

        if self.state.advance(PipelineState::Configuring, PipelineState::Streaming) {
            info!("Display streaming {}x{} {:?}", width, height, format);
        }
        self.shown = Some(ShownFrame {
            address,
            width,
            height,
            format,
        });
        Ok(())
    }

    fn program(
        &self,
        address: BufferAddress,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), DisplayError> {
        if height == 0 {
            return Err(DisplayError::Geometry { width, height });
        }
        let descriptor = format.descriptor();

        self.surface.disable();
        self.surface.configure(width, height, descriptor)?;
        self.surface.set_buffer(SurfaceBuffer {
            address,
            stride: width as usize * descriptor.bytes_per_pixel,
            line_count: height - 1,
        })?;
        self.surface.enable();
        Ok(())
    }

    /// Take the surface off the bus before drawing into the shown buffer
    pub fn begin_overlay(&mut self) {
        self.surface.disable();
    }

    /// Re-enable output and wait for the overlay to be scanned out.
    ///
    /// Returns false when the scan-out quorum was not reached in time; the
    /// pipeline carries on either way.
    pub fn end_overlay(&mut self) -> bool {
        self.surface.enable();
        self.counter.reset();
        self.surface.clear_interrupt(INT_DMA_END);
        self.surface.enable_interrupt(INT_DMA_END);

        let presented = self.counter.wait_for(self.quorum, self.timeout);
        self.surface.disable_interrupt(INT_DMA_END);

        if presented {
            debug!("Overlay presented after {} scan-outs", self.counter.shown());
        } else {
            warn!(
                "Overlay not presented: {} of {} scan-outs within {:?}",
                self.counter.shown(),
                self.quorum,
                self.timeout
            );
        }
        presented
    }

    /// Mask interrupts and turn the output off, completing STOPPED if the
    /// stream controller has not already
    pub fn stop(&mut self) {
        self.state.begin_stop();
        self.surface.disable_interrupt(INT_DMA_END);
        self.surface.disable();
        self.state.finish_stop();
        info!("Display stopped in {:?}", self.state.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::StreamType;
    use crate::display::surface::SimulatedDisplay;
    use crate::Config;
    use std::thread;

    fn driver() -> (DisplayDriver<SimulatedDisplay>, Arc<SimulatedDisplay>, Arc<StateCell>) {
        let surface = Arc::new(SimulatedDisplay::new());
        let state = Arc::new(StateCell::default());
        let mut config = Config::default().display;
        config.scanout_timeout_ms = 100;
        (
            DisplayDriver::new(surface.clone(), state.clone(), &config),
            surface,
            state,
        )
    }

    fn address(slot: usize) -> BufferAddress {
        BufferAddress::new(StreamType::FullResolution, slot)
    }

    #[test]
    fn test_counter_wait_succeeds() {
        let counter = Arc::new(ScanoutCounter::default());
        let recorder = {
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    thread::sleep(Duration::from_millis(1));
                    counter.record();
                }
            })
        };
        assert!(counter.wait_for(5, Duration::from_secs(5)));
        recorder.join().unwrap();
    }

    #[test]
    fn test_counter_wait_is_bounded() {
        let counter = ScanoutCounter::default();
        counter.record();
        let started = Instant::now();
        assert!(!counter.wait_for(5, Duration::from_millis(20)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_show_programs_surface_and_streams() {
        let (mut driver, surface, state) = driver();
        driver.show(address(2), 576, 576, PixelFormat::Rgb565).unwrap();

        let registers = surface.registers();
        let buffer = registers.buffer.unwrap();
        assert_eq!(buffer.address, address(2));
        assert_eq!(buffer.stride, 576 * 2);
        assert_eq!(buffer.line_count, 575);
        assert!(registers.enabled);
        assert_eq!(state.get(), PipelineState::Streaming);
        assert_eq!(driver.shown().unwrap().format, PixelFormat::Rgb565);
    }

    #[test]
    fn test_configuration_failure_halts() {
        let (mut driver, surface, state) = driver();
        surface.reject_configuration(true);

        assert!(driver.show(address(0), 576, 576, PixelFormat::Rgb32).is_err());
        assert!(state.is_halted());
        assert_eq!(
            driver.show(address(1), 576, 576, PixelFormat::Rgb32),
            Err(DisplayError::Halted)
        );
        assert!(driver.shown().is_none());
    }

    #[test]
    fn test_overlay_waits_for_quorum() {
        let (mut driver, surface, _state) = driver();
        driver.show(address(0), 16, 16, PixelFormat::Rgb565).unwrap();

        let irq = driver.interrupt_line();
        let _scanout = surface.spawn_scanout(Duration::from_millis(1), move || irq.handle());

        driver.begin_overlay();
        assert!(!surface.registers().enabled);
        assert!(driver.end_overlay());
        assert!(driver.scanouts() >= 5);
        assert!(surface.registers().enabled);
        assert_eq!(surface.read_interrupt_state(), 0);
    }

    #[test]
    fn test_overlay_times_out_without_scanout() {
        let (mut driver, _surface, _state) = driver();
        driver.show(address(0), 16, 16, PixelFormat::Rgb565).unwrap();
        driver.begin_overlay();
        assert!(!driver.end_overlay());
    }

    #[test]
    fn test_stop_disables_output() {
        let (mut driver, surface, state) = driver();
        driver.show(address(0), 16, 16, PixelFormat::Rgb565).unwrap();
        driver.stop();
        assert_eq!(state.get(), PipelineState::Stopped);
        assert!(!surface.registers().enabled);
    }
}
