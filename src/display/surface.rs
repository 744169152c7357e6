//! Display surface register interface and a simulated controller behind it

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::capture::frame::BufferAddress;
use crate::display::pixels::PixelFormatDescriptor;
use crate::error::DisplayError;

/// Raised once per completed scan-out of the framebuffer
pub const INT_DMA_END: u32 = 1 << 3;

/// Framebuffer programming: base, line length and the number of lines minus one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceBuffer {
    pub address: BufferAddress,
    pub stride: usize,
    pub line_count: u32,
}

/// Register-level operations on the display controller.
///
/// Implementations are shared between the pipeline and the interrupt
/// context, so everything goes through `&self`.
pub trait DisplaySurface: Send + Sync {
    fn configure(
        &self,
        width: u32,
        height: u32,
        format: &PixelFormatDescriptor,
    ) -> Result<(), DisplayError>;
    fn set_buffer(&self, buffer: SurfaceBuffer) -> Result<(), DisplayError>;
    fn enable(&self);
    fn disable(&self);
    fn enable_interrupt(&self, mask: u32);
    fn disable_interrupt(&self, mask: u32);
    fn clear_interrupt(&self, mask: u32);
    /// Pending interrupts that are also enabled
    fn read_interrupt_state(&self) -> u32;
}

/// Snapshot of what has been programmed into a [`SimulatedDisplay`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceRegisters {
    pub width: u32,
    pub height: u32,
    pub pixel_format_code: u32,
    pub buffer: Option<SurfaceBuffer>,
    pub enabled: bool,
    pub enable_count: u64,
    pub disable_count: u64,
}

/// In-memory display controller.
///
/// A scan-out thread started with [`SimulatedDisplay::spawn_scanout`] raises
/// [`INT_DMA_END`] at a fixed period while output is enabled.
#[derive(Debug, Default)]
pub struct SimulatedDisplay {
    registers: Mutex<SurfaceRegisters>,
    irq_enabled: AtomicU32,
    irq_raw: AtomicU32,
    scanned: AtomicU64,
    reject_configure: AtomicBool,
}

impl SimulatedDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceRegisters> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registers(&self) -> SurfaceRegisters {
        *self.lock()
    }

    /// Completed scan-outs since creation
    pub fn scanned_frames(&self) -> u64 {
        self.scanned.load(Ordering::Acquire)
    }

    /// Make every following `configure` fail, as a controller without the
    /// requested mode would.
    pub fn reject_configuration(&self, reject: bool) {
        self.reject_configure.store(reject, Ordering::Release);
    }

    /// One refresh. Returns whether the interrupt line is asserted.
    pub fn scan_out(&self) -> bool {
        if !self.lock().enabled {
            return false;
        }
        self.scanned.fetch_add(1, Ordering::AcqRel);
        self.irq_raw.fetch_or(INT_DMA_END, Ordering::AcqRel);
        self.read_interrupt_state() != 0
    }

    /// Drive [`Self::scan_out`] every `period`, calling `handler` whenever the
    /// interrupt line is asserted.
    pub fn spawn_scanout<F>(self: &Arc<Self>, period: Duration, handler: F) -> ScanoutThread
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let display = Arc::clone(self);
            let running = running.clone();
            thread::Builder::new()
                .name("scanout".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        thread::sleep(period);
                        if display.scan_out() {
                            handler();
                        }
                    }
                })
        };

        match handle {
            Ok(handle) => ScanoutThread {
                running,
                handle: Some(handle),
            },
            Err(e) => {
                warn!("Failed to start scan-out thread: {}", e);
                ScanoutThread {
                    running,
                    handle: None,
                }
            }
        }
    }
}

impl DisplaySurface for SimulatedDisplay {
    fn configure(
        &self,
        width: u32,
        height: u32,
        format: &PixelFormatDescriptor,
    ) -> Result<(), DisplayError> {
        if width == 0 || height == 0 {
            return Err(DisplayError::Geometry { width, height });
        }
        if self.reject_configure.load(Ordering::Acquire) {
            return Err(DisplayError::Pixel(format!("{:?}", format.format)));
        }

        let mut registers = self.lock();
        registers.width = width;
        registers.height = height;
        registers.pixel_format_code = format.pixel_format_code;
        debug!(
            "Surface configured {}x{} format register {:#x}",
            width, height, format.pixel_format_code
        );
        Ok(())
    }

    fn set_buffer(&self, buffer: SurfaceBuffer) -> Result<(), DisplayError> {
        if buffer.stride == 0 {
            return Err(DisplayError::Buffer(buffer.address));
        }
        self.lock().buffer = Some(buffer);
        Ok(())
    }

    fn enable(&self) {
        let mut registers = self.lock();
        registers.enabled = true;
        registers.enable_count += 1;
    }

    fn disable(&self) {
        let mut registers = self.lock();
        registers.enabled = false;
        registers.disable_count += 1;
    }

    fn enable_interrupt(&self, mask: u32) {
        self.irq_enabled.fetch_or(mask, Ordering::AcqRel);
    }

    fn disable_interrupt(&self, mask: u32) {
        self.irq_enabled.fetch_and(!mask, Ordering::AcqRel);
    }

    fn clear_interrupt(&self, mask: u32) {
        self.irq_raw.fetch_and(!mask, Ordering::AcqRel);
    }

    fn read_interrupt_state(&self) -> u32 {
        self.irq_raw.load(Ordering::Acquire) & self.irq_enabled.load(Ordering::Acquire)
    }
}

/// Stops and joins the scan-out thread on drop
pub struct ScanoutThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScanoutThread {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScanoutThread {
    fn drop(&mut self) {
        self.stop();
    }
}
