//! Capture thread: drains commands, drives the sensor, publishes results
//!
//! One loop iteration applies every queued command in submission order, then
//! (while the viewer is active) captures one preview frame, runs the auto
//! loops on it, publishes it to the preview surface and snapshots the capture
//! state for the UI. A `TakePicture` command runs the whole burst inside the
//! iteration that applies it.
//!
//! Lock discipline: the snapshot lock and the rendering lock are never held
//! at the same time. Every access below goes through a [`SharedState`]
//! helper that takes exactly one of them.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::capture::camera::{Camera, CaptureError};
use crate::capture::command::{Command, ParamId};
use crate::capture::sensor::{Action, CameraBackend, CameraMode, Shot};
use crate::capture::state::{normalize_histogram, AutoParam, CaptureState};
use crate::display::CameraInfo;
use crate::interface::{SharedState, UiListener};
use crate::pipeline::fps::FpsCounter;
use crate::utils::local_color_temperature;
use crate::writer::{AsyncImageWriter, FileFormat};
use crate::Config;

/// Brightness the auto-exposure aims for
const AUTO_EXPOSURE_TARGET: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Viewer inactive, only commands were applied
    Idle,
    /// A preview frame was captured and published
    Previewed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Touch {
    Focus,
    WhiteBalance { x: i32, y: i32 },
}

pub struct Orchestrator {
    config: Config,
    shared: Arc<SharedState>,
    listener: Arc<dyn UiListener>,
    backend: Box<dyn CameraBackend>,
    camera: Camera,
    state: CaptureState,
    /// Created by the first output directory command
    writer: Option<AsyncImageWriter>,
    /// Free file id received before the writer existed
    free_file_id: Option<u32>,
    shot: Shot,
    /// User focus as of the last published snapshot
    published_user_focus: f32,
    commands: VecDeque<Command>,
    fps: FpsCounter,
}

impl Orchestrator {
    /// Opens the default camera and publishes the initial state.
    pub fn new(
        config: Config,
        mut backend: Box<dyn CameraBackend>,
        listener: Arc<dyn UiListener>,
        shared: Arc<SharedState>,
    ) -> Result<Self, CaptureError> {
        let mode = config.capture.default_camera;
        let camera = Camera::open(backend.as_mut(), mode, config.capture.preview_size(mode))?;
        let state = CaptureState::default();

        shared.with_render(|render| render.camera = Some(camera_info(&camera)));
        shared.publish_snapshot(&state);
        shared.set_capture_fps(config.capture.initial_fps);

        let fps = FpsCounter::new(
            config.capture.initial_fps,
            Duration::from_millis(config.pipeline.fps_update_period_ms),
            Duration::from_millis(config.pipeline.fps_jitter_cap_ms),
            config.pipeline.measure_jitter,
        );

        let mut orchestrator = Self {
            shot: Shot::new(camera.width(), camera.height()),
            published_user_focus: state.preview.user.focus,
            config,
            shared,
            listener,
            backend,
            camera,
            state,
            writer: None,
            free_file_id: None,
            commands: VecDeque::new(),
            fps,
        };

        if let Some(dir) = orchestrator.config.writer.output_dir.clone() {
            orchestrator.set_output_directory(dir);
        }

        Ok(orchestrator)
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Runs the capture loop on the calling thread. Never returns.
    pub fn run(mut self) {
        if let Some(core) = self.config.capture.cpu_core {
            pin_to_core(core);
        }
        info!("Capture loop running");

        let idle = Duration::from_millis(self.config.capture.idle_poll_ms);
        loop {
            match self.step() {
                Ok(StepOutcome::Previewed) => {}
                Ok(StepOutcome::Idle) => std::thread::sleep(idle),
                Err(e) => {
                    warn!("Preview frame failed: {}", e);
                    std::thread::sleep(idle);
                }
            }
        }
    }

    /// One loop iteration.
    pub fn step(&mut self) -> Result<StepOutcome, CaptureError> {
        self.shared.queue().consume_all(&mut self.commands);

        let mut touch = None;
        while let Some(command) = self.commands.pop_front() {
            if let Some(t) = self.apply(command) {
                touch = Some(t);
            }
        }

        if !self.shared.viewer_active() {
            return Ok(StepOutcome::Idle);
        }

        self.preview_frame(touch)?;
        Ok(StepOutcome::Previewed)
    }

    fn apply(&mut self, command: Command) -> Option<Touch> {
        debug!("Applying {:?}", command);

        match command {
            Command::Shot { index, params } => {
                if let Some(slot) = self.state.pending_images.get_mut(index) {
                    *slot = params;
                }
            }
            Command::Resolution(_) | Command::OutputFormat(_) => {}
            Command::BurstSize(count) => self.state.set_pending_count(count),
            Command::ViewerActive(active) => {
                self.shared.set_viewer_active(active);
                if !active {
                    self.camera.sensor_mut().stop_streaming();
                }
            }
            Command::OutputDirectory(dir) => self.set_output_directory(dir),
            Command::OutputFileId(id) => match self.writer.as_mut() {
                Some(writer) => writer.set_free_file_id(id),
                None => self.free_file_id = Some(id),
            },
            Command::PreviewExposure(value) => self.state.preview.user.exposure = value,
            Command::PreviewFocus(value) => self.state.preview.user.focus = value,
            Command::PreviewGain(value) => self.state.preview.user.gain = value,
            Command::PreviewWhiteBalance(value) => self.state.preview.user.white_balance = value,
            Command::AutoExposure(on) => {
                self.state.preview.set_auto(AutoParam::Exposure, on);
            }
            Command::AutoFocus(on) => {
                self.state.preview.set_auto(AutoParam::Focus, on);
            }
            Command::AutoGain(on) => {
                self.state.preview.set_auto(AutoParam::Gain, on);
            }
            Command::AutoWhiteBalance(on) => {
                self.state.preview.set_auto(AutoParam::WhiteBalance, on);
            }
            Command::TakePicture(take) => {
                if take {
                    self.take_picture();
                }
            }
            Command::FocusOnTouch { .. } => return Some(Touch::Focus),
            Command::WhiteBalanceOnTouch { x, y } => {
                return Some(Touch::WhiteBalance {
                    x: (x * self.camera.width() as f32) as i32,
                    y: (y * self.camera.height() as f32) as i32,
                })
            }
            Command::SelectCamera(mode) => self.select_camera(mode),
            Command::FileSystemChanged(changed) => {
                if changed {
                    self.listener.file_system_changed();
                }
            }
        }

        None
    }

    fn set_output_directory(&mut self, dir: PathBuf) {
        if let Some(writer) = self.writer.as_ref() {
            debug!("Output directory already {:?}, ignoring {:?}", writer.output_dir(), dir);
            return;
        }

        match AsyncImageWriter::new(&dir, self.config.writer.clone()) {
            Ok(mut writer) => {
                if let Some(id) = self.free_file_id.take() {
                    writer.set_free_file_id(id);
                }
                // Round-trip through the command queue so the listener hears
                // about it from the capture thread
                let shared = self.shared.clone();
                writer.set_on_file_system_changed(Arc::new(move || {
                    shared.queue().produce(Command::FileSystemChanged(true));
                }));
                self.writer = Some(writer);
            }
            Err(e) => error!("Cannot write to {:?}: {}", dir, e),
        }
    }

    fn take_picture(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            warn!("Take picture ignored: {}", CaptureError::NoWriter);
            return;
        };

        self.shared.set_capturing(true);
        self.listener.capture_started();

        let format = FileFormat::jpeg(self.config.writer.image_quality);
        match self.camera.capture(self.state.pending_shots(), writer, format) {
            Ok(id) => info!(
                "Burst of {} queued as image set {}, {} sets waiting",
                self.state.pending_count(),
                id,
                writer.pending()
            ),
            Err(e) => error!("Burst capture failed: {}", e),
        }

        self.shared.set_capturing(false);
        self.listener.capture_completed();
    }

    fn select_camera(&mut self, mode: CameraMode) {
        if self.camera.mode() == mode {
            return;
        }

        let size = self.config.capture.preview_size(mode);
        let backend = self.backend.as_mut();
        let camera = &mut self.camera;
        self.shared.with_render(|render| {
            camera.sensor_mut().stop_streaming();
            match Camera::open(backend, mode, size) {
                Ok(opened) => {
                    *camera = opened;
                    render.camera = Some(camera_info(camera));
                }
                Err(e) => error!("Switching to {:?} camera failed: {}", mode, e),
            }
        });
    }

    #[instrument(skip_all)]
    fn preview_frame(&mut self, touch: Option<Touch>) -> Result<(), CaptureError> {
        let params = self.state.preview.effective_params();
        let shot = &mut self.shot;
        shot.exposure = params.exposure as u32;
        shot.gain = params.gain;
        shot.white_balance = params.white_balance as u32;
        shot.width = self.camera.width();
        shot.height = self.camera.height();
        shot.histogram = true;
        shot.fast_mode = true;
        shot.sharpness = !self.camera.auto_focus().idle();

        let user_focus = self.state.preview.user.focus;
        if !self.state.preview.auto_focus && self.published_user_focus != user_focus {
            shot.clear_actions();
            shot.add_action(Action::Focus {
                time_us: 0,
                diopters: user_focus,
            });
        }

        let (sensor, auto_focus) = self.camera.rig_mut();
        sensor.stream(shot)?;
        let frame = sensor.get_frame()?;
        shot.clear_actions();

        let preview = &mut self.state.preview;
        match touch {
            Some(Touch::Focus) => {
                if preview.auto_focus && auto_focus.idle() {
                    auto_focus.start_sweep();
                }
            }
            Some(Touch::WhiteBalance { x, y }) => {
                if let Some(temp) = local_color_temperature(shot.white_balance as f32, &frame, x, y) {
                    debug!("Touch white balance at ({}, {}): {}K", x, y, temp);
                    preview.user.white_balance = temp as f32;
                    self.listener.preview_param_changed(ParamId::PreviewWb);
                }
            }
            None => {}
        }

        if preview.auto_exposure || preview.auto_gain {
            sensor.auto_expose(shot, &frame, AUTO_EXPOSURE_TARGET);
            preview.evaluated.exposure = shot.exposure as f32;
            preview.evaluated.gain = shot.gain;
        }

        if preview.auto_white_balance {
            sensor.auto_white_balance(shot, &frame);
            preview.evaluated.white_balance = shot.white_balance as f32;
        }

        if !auto_focus.idle() {
            auto_focus.update(&frame, shot);
            preview.evaluated.focus = frame.meta.focus;
        }

        normalize_histogram(&frame.meta.histogram, &mut preview.histogram);

        self.shared.with_render(|render| render.publish(&frame));

        self.shared.publish_snapshot(&self.state);
        self.published_user_focus = self.state.preview.user.focus;

        if let Some(fps) = self.fps.frame_completed(Instant::now()) {
            self.shared.set_capture_fps(fps);
            metrics::gauge!("capture_fps").set(fps as f64);
        }

        Ok(())
    }
}

fn camera_info(camera: &Camera) -> CameraInfo {
    CameraInfo {
        mode: camera.mode(),
        width: camera.width(),
        height: camera.height(),
    }
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Cannot query CPU cores, capture thread not pinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => info!("Capture thread pinned to core {}", core),
        _ => warn!("Failed to pin capture thread to core {}", core),
    }
}
