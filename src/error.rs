//! Error types returned across component boundaries

use thiserror::Error;

use crate::capture::frame::{BufferAddress, StreamType};

/// A frame buffer too small for the geometry it is claimed to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer holds {available} bytes, {needed} required")]
pub struct ShortBuffer {
    pub needed: usize,
    pub available: usize,
}

/// Pixel format lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unsupported pixel format code {0:#x}")]
    Unsupported(u32),
}

/// Frame pool and frame source failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferAddress),

    #[error("frame of {needed} bytes does not fit {available} byte slot")]
    FrameTooLarge { needed: usize, available: usize },

    #[error("failed to map frame pool memory: {0}")]
    Map(String),
}

/// Display surface and driver failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error("surface rejected geometry {width}x{height}")]
    Geometry { width: u32, height: u32 },

    #[error("surface rejected buffer configuration at {0}")]
    Buffer(BufferAddress),

    #[error("surface rejected pixel configuration: {0}")]
    Pixel(String),

    #[error("display buffer: {0}")]
    ShortBuffer(#[from] ShortBuffer),

    #[error("display is halted")]
    Halted,
}

/// Inference gate failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("frame {width}x{height} exceeds inference capacity of {capacity} pixels")]
    FrameTooLarge {
        width: u32,
        height: u32,
        capacity: usize,
    },

    #[error("inference input: {0}")]
    ShortBuffer(#[from] ShortBuffer),

    #[error("no buffer delivered for frame {0}")]
    MissingBuffer(u32),

    #[error("inference engine failed with status {0}")]
    Engine(i32),
}

/// Configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for the frame delivery path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Display(#[from] DisplayError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("frame {frame_id} is older than {last} on the {stream} stream")]
    OutOfOrder {
        stream: StreamType,
        frame_id: u32,
        last: u32,
    },

    #[error("pipeline halted after a fatal error")]
    Halted,
}

impl PipelineError {
    /// Fatal errors leave no safe display mode to fall back to.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Format(_) | PipelineError::Halted => true,
            PipelineError::Display(DisplayError::ShortBuffer(_)) => false,
            PipelineError::Display(_) => true,
            PipelineError::Inference(InferenceError::Format(_)) => true,
            PipelineError::Pool(PoolError::Map(_)) => true,
            _ => false,
        }
    }
}
