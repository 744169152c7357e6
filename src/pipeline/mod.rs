pub mod controller;
pub mod dispatch;
pub mod signals;
pub mod state;

pub use controller::{StreamController, StreamTiming};
pub use dispatch::Pipeline;
pub use signals::{FrameConsumed, StreamGovernor, SystemEvents};
pub use state::{FrameState, PipelineState, StateCell};
