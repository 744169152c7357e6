pub mod compositor;
pub mod driver;
pub mod pixels;
pub mod surface;

pub use compositor::Compositor;
pub use driver::{DisplayDriver, InterruptLine, ShownFrame};
pub use pixels::{PixelFormat, PixelFormatDescriptor, PixelView, PixelViewMut};
pub use surface::{DisplaySurface, SimulatedDisplay};
