//! Software sensor backend emitting synthetic YUV420p frames
//!
//! Frame brightness follows exposure × gain, chroma follows the requested
//! white balance, so the auto loops have something to converge on. Used by
//! the demo binary and the tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Yuv420Image};
use crate::capture::sensor::{
    Action, AutoFocus, CameraBackend, CameraMode, SensorError, SensorRig, Sensor, Shot,
};

/// Luma buckets reported by the simulated histogram unit
pub const HISTOGRAM_BUCKETS: usize = 64;

/// Exposure × gain (µs) that maps the scene to mid-gray
const MID_GRAY_EXPOSURE: f32 = 20000.0;

/// Lens position at which the simulated scene is sharpest
const SHARPEST_FOCUS: f32 = 4.0;

const SWEEP_STEPS: usize = 8;
const SWEEP_RANGE: f32 = 10.0;

#[derive(Debug, Clone)]
pub struct SimulatedSensorConfig {
    pub full_width: u32,
    pub full_height: u32,
    /// Frame interval of the preview stream; zero for as fast as possible
    pub frame_interval: Duration,
    /// Sequence numbers of frames that fail to arrive
    pub fail_frames: Vec<u64>,
}

impl Default for SimulatedSensorConfig {
    fn default() -> Self {
        Self {
            full_width: 640,
            full_height: 480,
            frame_interval: Duration::ZERO,
            fail_frames: Vec::new(),
        }
    }
}

pub struct SimulatedSensor {
    config: SimulatedSensorConfig,
    streaming: Option<Shot>,
    pending: VecDeque<Shot>,
    sequence: u64,
    focus: f32,
    last_frame: Option<Instant>,
}

impl SimulatedSensor {
    pub fn new(config: SimulatedSensorConfig) -> Self {
        Self {
            config,
            streaming: None,
            pending: VecDeque::new(),
            sequence: 0,
            focus: 10.0,
            last_frame: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    fn pace(&mut self) {
        if self.config.frame_interval.is_zero() {
            return;
        }
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.config.frame_interval {
                std::thread::sleep(self.config.frame_interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }

    fn expose(&mut self, shot: &Shot) -> Frame {
        let mut flash_brightness = 0.0;
        for action in &shot.actions {
            match *action {
                Action::Focus { diopters, .. } => self.focus = diopters,
                Action::Flash { brightness, .. } => flash_brightness = brightness,
            }
        }

        let width = shot.width.max(2) & !1;
        let height = shot.height.max(2) & !1;
        let mut image = Yuv420Image::new(width, height);

        let level = (shot.exposure as f32 * shot.gain) / MID_GRAY_EXPOSURE * 0.5 + flash_brightness * 0.25;
        // Warmer requested white balance shifts chroma towards blue, and vice versa
        let chroma_shift = ((shot.white_balance as f32 - 6500.0) / 100.0).clamp(-60.0, 60.0);
        let (y_plane, u_plane, v_plane) = image.planes_mut();

        let mut histogram = vec![0u32; HISTOGRAM_BUCKETS];
        let w = width as usize;
        for (i, px) in y_plane.iter_mut().enumerate() {
            let x = i % w;
            // Horizontal ramp around the exposure level
            let ramp = 0.75 + 0.5 * (x as f32 / w as f32);
            let value = (level * ramp * 255.0).clamp(0.0, 255.0) as u8;
            *px = value;
            histogram[value as usize * HISTOGRAM_BUCKETS / 256] += 1;
        }
        u_plane.fill((128.0 + chroma_shift) as u8);
        v_plane.fill((128.0 - chroma_shift) as u8);

        self.sequence += 1;
        let sharpness = shot.sharpness.then(|| {
            let blur = (self.focus - SHARPEST_FOCUS).abs();
            (1000.0 / (1.0 + blur)) as u64
        });

        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width,
                height,
                format: PixelFormat::Yuv420p,
                exposure: shot.exposure,
                gain: shot.gain,
                white_balance: shot.white_balance,
                focus: self.focus,
                flash_brightness,
                histogram: if shot.histogram { histogram } else { Vec::new() },
                sharpness,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }
}

impl Sensor for SimulatedSensor {
    fn stream(&mut self, shot: &Shot) -> Result<(), SensorError> {
        self.streaming = Some(shot.clone());
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.streaming = None;
    }

    fn capture(&mut self, shot: &Shot) -> Result<(), SensorError> {
        self.pending.push_back(shot.clone());
        Ok(())
    }

    fn shots_pending(&self) -> usize {
        self.pending.len()
    }

    fn get_frame(&mut self) -> Result<Frame, SensorError> {
        let shot = match self.pending.pop_front() {
            Some(shot) => shot,
            None => {
                self.pace();
                self.streaming.clone().ok_or(SensorError::NotStreaming)?
            }
        };

        let frame = self.expose(&shot);
        if self.config.fail_frames.contains(&frame.meta.sequence) {
            debug!("simulated sensor dropping frame {}", frame.meta.sequence);
            return Err(SensorError::Timeout);
        }
        Ok(frame)
    }

    fn max_image_size(&self) -> (u32, u32) {
        (self.config.full_width, self.config.full_height)
    }

    fn min_exposure(&self) -> u32 {
        1000
    }

    fn max_exposure(&self) -> u32 {
        200_000
    }

    fn max_gain(&self) -> f32 {
        8.0
    }

    fn flash_max_brightness(&self) -> f32 {
        1.0
    }

    fn auto_expose(&self, shot: &mut Shot, frame: &Frame, target_brightness: f32) {
        let Some((y_plane, _, _)) = frame.planes() else {
            return;
        };
        if y_plane.is_empty() {
            return;
        }
        let mean = y_plane.iter().map(|v| *v as u64).sum::<u64>() as f32 / y_plane.len() as f32 / 255.0;
        let ratio = (target_brightness / mean.max(0.01)).clamp(0.25, 4.0);

        // Spend exposure first, then gain
        let total = shot.exposure as f32 * shot.gain * ratio;
        let exposure = total.clamp(self.min_exposure() as f32, self.max_exposure() as f32);
        let gain = (total / exposure).clamp(1.0, self.max_gain());
        shot.exposure = exposure as u32;
        shot.gain = gain;
    }

    fn auto_white_balance(&self, shot: &mut Shot, frame: &Frame) {
        let Some((_, u_plane, v_plane)) = frame.planes() else {
            return;
        };
        if u_plane.is_empty() {
            return;
        }
        // Gray world: pull the chroma mean back to neutral
        let u_mean = u_plane.iter().map(|v| *v as i64).sum::<i64>() as f32 / u_plane.len() as f32;
        let v_mean = v_plane.iter().map(|v| *v as i64).sum::<i64>() as f32 / v_plane.len() as f32;
        let cast = (u_mean - v_mean) / 2.0;
        let corrected = shot.white_balance as f32 - cast * 100.0;
        shot.white_balance = corrected.clamp(2000.0, 10000.0) as u32;
    }
}

/// Focus sweep over a fixed number of lens positions, settling on the
/// sharpest one.
#[derive(Debug, Default)]
pub struct SimulatedAutoFocus {
    step: Option<usize>,
    best: Option<(u64, f32)>,
}

impl SimulatedAutoFocus {
    fn position(step: usize) -> f32 {
        SWEEP_RANGE * step as f32 / (SWEEP_STEPS - 1) as f32
    }
}

impl AutoFocus for SimulatedAutoFocus {
    fn idle(&self) -> bool {
        self.step.is_none()
    }

    fn start_sweep(&mut self) {
        self.step = Some(0);
        self.best = None;
    }

    fn update(&mut self, frame: &Frame, shot: &mut Shot) {
        let Some(step) = self.step else {
            return;
        };

        if let Some(sharpness) = frame.meta.sharpness {
            if self.best.map_or(true, |(score, _)| sharpness > score) {
                self.best = Some((sharpness, frame.meta.focus));
            }
        }

        let next = step + 1;
        let target = if next < SWEEP_STEPS {
            self.step = Some(next);
            Self::position(next)
        } else {
            self.step = None;
            self.best.map_or(frame.meta.focus, |(_, focus)| focus)
        };

        shot.add_action(Action::Focus {
            time_us: 0,
            diopters: target,
        });
    }
}

/// Backend producing [`SimulatedSensor`]s; the front camera runs at half the
/// back camera's full resolution.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    pub config: SimulatedSensorConfig,
    opened: Vec<CameraMode>,
}

impl SimulatedBackend {
    pub fn new(config: SimulatedSensorConfig) -> Self {
        Self {
            config,
            opened: Vec::new(),
        }
    }

    /// Modes opened so far, in order.
    pub fn opened(&self) -> &[CameraMode] {
        &self.opened
    }
}

impl CameraBackend for SimulatedBackend {
    fn open(&mut self, mode: CameraMode) -> Result<SensorRig, SensorError> {
        let mut config = self.config.clone();
        if mode == CameraMode::Front {
            config.full_width /= 2;
            config.full_height /= 2;
        }
        self.opened.push(mode);
        debug!("opening simulated {:?} camera", mode);

        Ok(SensorRig {
            sensor: Box::new(SimulatedSensor::new(config)),
            auto_focus: Box::new(SimulatedAutoFocus::default()),
        })
    }
}
