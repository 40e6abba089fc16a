//! Camera hardware abstraction
//!
//! The sensor, lens, flash and the 3A algorithms are vendor services; the
//! capture thread only drives them through these traits. Every call may block
//! until the hardware answers.

use thiserror::Error;

use crate::capture::frame::Frame;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to open {0:?} camera: {1}")]
    Open(CameraMode, String),

    #[error("sensor is not streaming and has no shots pending")]
    NotStreaming,

    #[error("frame timeout")]
    Timeout,

    #[error("hardware error: {0}")]
    Hardware(String),
}

/// Physical camera used for preview and capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CameraMode {
    Front,
    Back,
    Stereo,
}

impl CameraMode {
    /// `SELECT_CAMERA` wire values: front=0, back=1, stereo=2
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(CameraMode::Front),
            1 => Some(CameraMode::Back),
            2 => Some(CameraMode::Stereo),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            CameraMode::Front => 0,
            CameraMode::Back => 1,
            CameraMode::Stereo => 2,
        }
    }
}

/// Device action fired relative to the start of an exposure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Move the lens to `diopters`
    Focus { time_us: i32, diopters: f32 },
    /// Fire the flash; `time_us = 0` synchronizes it with the shutter
    Flash { time_us: i32, brightness: f32 },
}

/// Capture request handed to the sensor
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    /// Exposure in microseconds
    pub exposure: u32,
    pub gain: f32,
    /// Color temperature in Kelvin
    pub white_balance: u32,
    /// Output image size
    pub width: u32,
    pub height: u32,
    pub histogram: bool,
    pub sharpness: bool,
    /// Trade quality for latency (preview stream)
    pub fast_mode: bool,
    pub actions: Vec<Action>,
}

impl Shot {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            exposure: 30000,
            gain: 1.0,
            white_balance: 6500,
            width,
            height,
            histogram: false,
            sharpness: false,
            fast_mode: false,
            actions: Vec::new(),
        }
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }
}

/// Image sensor with attached lens and flash
pub trait Sensor: Send {
    /// Repeats `shot` until the next call to `stream` or `stop_streaming`.
    fn stream(&mut self, shot: &Shot) -> Result<(), SensorError>;

    fn stop_streaming(&mut self);

    /// Queues a single shot; its frame comes back through `get_frame`.
    fn capture(&mut self, shot: &Shot) -> Result<(), SensorError>;

    /// Shots queued with `capture` whose frames were not yet retrieved.
    fn shots_pending(&self) -> usize;

    /// Blocks until the next frame is ready. A pending shot is consumed even
    /// when its frame fails.
    fn get_frame(&mut self) -> Result<Frame, SensorError>;

    /// Full-resolution image size (width, height)
    fn max_image_size(&self) -> (u32, u32);

    fn min_exposure(&self) -> u32;

    fn max_exposure(&self) -> u32;

    fn max_gain(&self) -> f32;

    fn flash_max_brightness(&self) -> f32;

    /// Updates exposure and gain of `shot` from the statistics of `frame`,
    /// aiming at `target_brightness` (0..1).
    fn auto_expose(&self, shot: &mut Shot, frame: &Frame, target_brightness: f32);

    /// Updates the white balance of `shot` from `frame`.
    fn auto_white_balance(&self, shot: &mut Shot, frame: &Frame);
}

/// Contrast-detect auto-focuser bound to a sensor's lens
pub trait AutoFocus: Send {
    fn idle(&self) -> bool;

    fn start_sweep(&mut self);

    /// Feeds a frame with sharpness data; may attach a lens action to `shot`.
    fn update(&mut self, frame: &Frame, shot: &mut Shot);
}

/// Sensor plus auto-focuser for one camera mode
pub struct SensorRig {
    pub sensor: Box<dyn Sensor>,
    pub auto_focus: Box<dyn AutoFocus>,
}

/// Opens camera hardware. The capture thread calls this at start-up and on
/// every camera switch.
pub trait CameraBackend: Send {
    fn open(&mut self, mode: CameraMode) -> Result<SensorRig, SensorError>;
}
