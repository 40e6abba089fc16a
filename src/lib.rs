pub mod capture;
pub mod display;
pub mod interface;
pub mod pipeline;
pub mod utils;
pub mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::sensor::CameraMode;
pub use capture::{Command, Frame, ParamId, ParamSetRequest};
pub use interface::{CameraInterface, ChannelListener, UiEvent, UiListener};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub writer: WriterConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub front_preview: PreviewSize,
    pub back_preview: PreviewSize,
    pub stereo_preview: PreviewSize,
    pub default_camera: CameraMode,
    /// Sleep between queue polls while the viewer is inactive
    pub idle_poll_ms: u64,
    /// Pin the capture thread to this core
    pub cpu_core: Option<usize>,
    /// Reported until the first fps measurement
    pub initial_fps: f32,
}

impl CaptureConfig {
    pub fn preview_size(&self, mode: CameraMode) -> PreviewSize {
        match mode {
            CameraMode::Front => self.front_preview,
            CameraMode::Back => self.back_preview,
            CameraMode::Stereo => self.stereo_preview,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let preview = PreviewSize {
            width: 960,
            height: 720,
        };
        Self {
            front_preview: preview,
            back_preview: preview,
            stereo_preview: preview,
            default_camera: CameraMode::Back,
            idle_poll_ms: 10,
            cpu_core: None,
            initial_fps: 30.0, // assuming 30hz
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Output directory applied at start-up; otherwise set at runtime
    pub output_dir: Option<PathBuf>,
    pub image_quality: u8,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_quality: u8,
    /// Box filter width of the thumbnail downsampler
    pub thumbnail_blur_radius: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            image_quality: 95,
            thumbnail_width: 384,
            thumbnail_height: 288,
            thumbnail_quality: 95,
            thumbnail_blur_radius: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fps_update_period_ms: u64,
    /// Frame-time deviations at or above this are left out of jitter stats
    pub fps_jitter_cap_ms: u64,
    pub measure_jitter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps_update_period_ms: 500,
            fps_jitter_cap_ms: 500,
            measure_jitter: false,
        }
    }
}

impl Config {
    /// Defaults, overridden by the optional TOML file, overridden by
    /// `BURSTCAM_<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("BURSTCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.default_camera, CameraMode::Back);
        assert_eq!(config.capture.preview_size(CameraMode::Front).width, 960);
        assert_eq!(config.writer.thumbnail_width, 384);
        assert_eq!(config.pipeline.fps_update_period_ms, 500);
    }

    #[test]
    fn test_load_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burstcam.toml");
        std::fs::write(
            &path,
            "[writer]\nimage_quality = 80\n\n[pipeline]\nmeasure_jitter = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.writer.image_quality, 80);
        assert_eq!(config.writer.thumbnail_quality, 95);
        assert!(config.pipeline.measure_jitter);
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
