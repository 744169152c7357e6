pub mod capture;
pub mod display;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::display::pixels::PixelFormat;
use crate::error::ConfigError;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `ARGUS__PIPELINE__TICK_MS=2`
pub const ENV_PREFIX: &str = "ARGUS";

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub inference: InferenceConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub full_res_width: u32,
    pub full_res_height: u32,
    pub downscaled_width: u32,
    pub downscaled_height: u32,
    pub full_res_format: PixelFormat,
    pub downscaled_format: PixelFormat,
    /// Slots per ring pool
    pub buffer_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Highlight border thickness in display pixels
    pub border_width: u32,
    /// Scaled boxes are never smaller than `border_width * min_size_factor`
    pub min_size_factor: u32,
    /// 0xFF copies the border straight onto the surface
    pub opacity: u8,
    /// Scan-out interrupts to observe after composing an overlay
    pub scanout_quorum: u32,
    pub scanout_timeout_ms: u64,
    /// Largest overlay tile the compositor can stage
    pub tile_max_width: u32,
    pub tile_max_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub max_frame_width: u32,
    pub max_frame_height: u32,
    pub max_results: usize,
    pub summary_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stream_enabled: bool,
    pub tick_ms: u64,
    pub stop_poll_ticks: u64,
    pub consumed_wait_ticks: u64,
    pub pacing_ticks: u64,
    pub publish_queue_depth: usize,
    pub pin_to_core: Option<usize>,
    pub run_for_secs: Option<u64>,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                full_res_width: 576,
                full_res_height: 576,
                downscaled_width: 192,
                downscaled_height: 192,
                full_res_format: PixelFormat::Rgb565,
                downscaled_format: PixelFormat::Rgb565,
                buffer_count: 4,
            },
            display: DisplayConfig {
                border_width: 2,
                min_size_factor: 3,
                opacity: 0xFF,
                scanout_quorum: 5,
                scanout_timeout_ms: 500,
                tile_max_width: 640,
                tile_max_height: 480,
            },
            inference: InferenceConfig {
                max_frame_width: 192,
                max_frame_height: 192,
                max_results: 10,
                summary_label: "Detected faces".into(),
            },
            pipeline: PipelineConfig {
                stream_enabled: true,
                tick_ms: 1,
                stop_poll_ticks: 10,
                consumed_wait_ticks: 100,
                pacing_ticks: 5,
                publish_queue_depth: 8,
                pin_to_core: None,
                run_for_secs: None,
                snapshot_path: None,
            },
        }
    }
}

impl Config {
    /// Defaults, then an optional TOML file, then `ARGUS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if capture.full_res_width == 0
            || capture.full_res_height == 0
            || capture.downscaled_width == 0
            || capture.downscaled_height == 0
        {
            return Err(ConfigError::Invalid("frame dimensions must be non-zero".into()));
        }
        if capture.buffer_count == 0 {
            return Err(ConfigError::Invalid("buffer_count must be at least 1".into()));
        }
        if self.display.border_width == 0 || self.display.min_size_factor < 3 {
            return Err(ConfigError::Invalid(
                "border_width must be non-zero and min_size_factor at least 3".into(),
            ));
        }
        let floor = self.display.border_width * self.display.min_size_factor;
        if floor > self.display.tile_max_width || floor > self.display.tile_max_height {
            return Err(ConfigError::Invalid(format!(
                "overlay tile cannot hold a {floor} pixel box"
            )));
        }
        if self.inference.max_results == 0 {
            return Err(ConfigError::Invalid("max_results must be at least 1".into()));
        }
        if self.pipeline.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be non-zero".into()));
        }
        if self.pipeline.publish_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "publish_queue_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
