//! UI boundary: parameter set/get calls, viewer frames, notifications
//!
//! Setters never touch capture state directly. They decode the request into
//! a [`Command`] and queue it for the capture thread. Getters read the
//! snapshot the capture thread publishes after every frame, so a value read
//! right after setting it may still be the old one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use crate::capture::camera::CaptureError;
use crate::capture::command::{split_id, Command, ParamId, ParamSetRequest, ProtocolError, SHOT_PARAM_COUNT};
use crate::capture::frame::Yuv420Image;
use crate::capture::orchestrator::Orchestrator;
use crate::capture::sensor::CameraBackend;
use crate::capture::state::{AutoParam, CaptureState, HISTOGRAM_SIZE, MAX_PICTURES_PER_SHOT};
use crate::display::RenderTarget;
use crate::pipeline::work_queue::WorkQueue;
use crate::Config;

/// Callbacks from the capture and writer threads.
///
/// Invoked on those threads, never on the UI thread; implementations must
/// re-dispatch if they need to.
pub trait UiListener: Send + Sync {
    fn capture_started(&self) {}

    fn capture_completed(&self) {}

    fn file_system_changed(&self) {}

    fn preview_param_changed(&self, _param: ParamId) {}
}

/// Listener that ignores everything
#[derive(Debug, Default)]
pub struct NullListener;

impl UiListener for NullListener {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    CaptureStarted,
    CaptureCompleted,
    FileSystemChanged,
    PreviewParamChanged(ParamId),
}

/// Forwards notifications into a channel, for UIs with their own event loop.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: flume::Sender<UiEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, flume::Receiver<UiEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            debug!("UI event receiver gone, dropping {:?}", event);
        }
    }
}

impl UiListener for ChannelListener {
    fn capture_started(&self) {
        self.send(UiEvent::CaptureStarted);
    }

    fn capture_completed(&self) {
        self.send(UiEvent::CaptureCompleted);
    }

    fn file_system_changed(&self) {
        self.send(UiEvent::FileSystemChanged);
    }

    fn preview_param_changed(&self, param: ParamId) {
        self.send(UiEvent::PreviewParamChanged(param));
    }
}

/// State shared between the UI, render and capture threads.
///
/// The snapshot lock and the rendering lock are independent: no code path
/// holds both. Each helper takes exactly one and releases it before
/// returning.
pub struct SharedState {
    queue: WorkQueue<Command>,
    previous_state: Mutex<CaptureState>,
    render: Mutex<RenderTarget>,
    viewer_active: AtomicBool,
    capturing: AtomicBool,
    /// f32 bits
    capture_fps: AtomicU32,
}

impl SharedState {
    pub fn new(initial_fps: f32) -> Self {
        Self {
            queue: WorkQueue::new(),
            previous_state: Mutex::new(CaptureState::default()),
            render: Mutex::new(RenderTarget::default()),
            viewer_active: AtomicBool::new(false),
            capturing: AtomicBool::new(false),
            capture_fps: AtomicU32::new(initial_fps.to_bits()),
        }
    }

    pub fn queue(&self) -> &WorkQueue<Command> {
        &self.queue
    }

    fn previous_state(&self) -> MutexGuard<'_, CaptureState> {
        self.previous_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the state published with the last frame.
    pub fn snapshot(&self) -> CaptureState {
        self.previous_state().clone()
    }

    pub fn with_snapshot<R>(&self, f: impl FnOnce(&CaptureState) -> R) -> R {
        f(&self.previous_state())
    }

    pub(crate) fn publish_snapshot(&self, state: &CaptureState) {
        self.previous_state().clone_from(state);
    }

    /// Runs `f` under the rendering lock.
    pub fn with_render<R>(&self, f: impl FnOnce(&mut RenderTarget) -> R) -> R {
        let mut render = self.render.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut render)
    }

    pub fn viewer_active(&self) -> bool {
        self.viewer_active.load(Ordering::Acquire)
    }

    pub(crate) fn set_viewer_active(&self, active: bool) {
        self.viewer_active.store(active, Ordering::Release);
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    pub(crate) fn set_capturing(&self, capturing: bool) {
        self.capturing.store(capturing, Ordering::Release);
    }

    pub fn capture_fps(&self) -> f32 {
        f32::from_bits(self.capture_fps.load(Ordering::Relaxed))
    }

    pub(crate) fn set_capture_fps(&self, fps: f32) {
        self.capture_fps.store(fps.to_bits(), Ordering::Relaxed);
    }
}

/// Handle the UI holds on the camera.
pub struct CameraInterface {
    shared: Arc<SharedState>,
    capture_thread: Option<JoinHandle<()>>,
}

impl CameraInterface {
    /// Builds the interface and its capture loop without starting a thread.
    /// The caller drives [`Orchestrator::step`] itself.
    pub fn new(
        config: Config,
        backend: Box<dyn CameraBackend>,
        listener: Arc<dyn UiListener>,
    ) -> Result<(Self, Orchestrator), CaptureError> {
        let shared = Arc::new(SharedState::new(config.capture.initial_fps));
        let orchestrator = Orchestrator::new(config, backend, listener, shared.clone())?;

        Ok((
            Self {
                shared,
                capture_thread: None,
            },
            orchestrator,
        ))
    }

    /// Builds the interface and runs the capture loop on its own thread.
    pub fn start(
        config: Config,
        backend: Box<dyn CameraBackend>,
        listener: Arc<dyn UiListener>,
    ) -> Result<Self, CaptureError> {
        let (mut interface, orchestrator) = Self::new(config, backend, listener)?;

        let handle = std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || orchestrator.run())
            .map_err(CaptureError::Thread)?;
        interface.capture_thread = Some(handle);

        info!("Camera interface started");
        Ok(interface)
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn is_running(&self) -> bool {
        self.capture_thread
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Queues a typed command.
    pub fn send(&self, command: Command) {
        self.shared.queue().produce(command);
    }

    /// Decodes and queues a raw request. Malformed requests are logged and
    /// dropped.
    pub fn submit(&self, request: &ParamSetRequest) -> Result<(), ProtocolError> {
        match request.decode() {
            Ok(command) => {
                self.send(command);
                Ok(())
            }
            Err(e) => {
                error!("Dropping request {:#x}: {}", request.id(), e);
                Err(e)
            }
        }
    }

    pub fn set_param_int(&self, param: i32, value: i32) {
        let _ = self.submit(&ParamSetRequest::int(param, value));
    }

    pub fn set_param_float(&self, param: i32, value: f32) {
        let _ = self.submit(&ParamSetRequest::float(param, value));
    }

    pub fn set_param_float_array(&self, param: i32, values: &[f32]) {
        let _ = self.submit(&ParamSetRequest::float_array(param, values));
    }

    pub fn set_param_string(&self, param: i32, value: &str) {
        let _ = self.submit(&ParamSetRequest::string(param, value));
    }

    /// Integer parameter read-back; -1 for unsupported ids.
    pub fn get_param_int(&self, param: i32) -> i32 {
        let (raw, _) = split_id(param);
        let flag = |value: bool| value as i32;

        match ParamId::from_raw(raw) {
            Some(ParamId::PreviewAutoExposureOn) => self.shared.with_snapshot(|s| flag(s.preview.auto_exposure)),
            Some(ParamId::PreviewAutoGainOn) => self.shared.with_snapshot(|s| flag(s.preview.auto_gain)),
            Some(ParamId::PreviewAutoWbOn) => self.shared.with_snapshot(|s| flag(s.preview.auto_white_balance)),
            Some(ParamId::PreviewAutoFocusOn) => self.shared.with_snapshot(|s| flag(s.preview.auto_focus)),
            Some(ParamId::BurstSize) => self.shared.with_snapshot(|s| s.pending_count() as i32),
            Some(ParamId::ViewerActive) => flag(self.shared.viewer_active()),
            Some(ParamId::TakePicture) => flag(self.shared.is_capturing()),
            Some(ParamId::SelectCamera) => self
                .shared
                .with_render(|render| render.camera.map_or(-1, |camera| camera.mode.raw())),
            _ => {
                error!("get_param_int: unsupported param id {}", raw);
                -1
            }
        }
    }

    /// Float parameter read-back; -1.0 for unsupported ids.
    pub fn get_param_float(&self, param: i32) -> f32 {
        let (raw, _) = split_id(param);
        let effective = |f: fn(&CaptureState) -> f32| self.shared.with_snapshot(f);

        match ParamId::from_raw(raw) {
            Some(ParamId::CaptureFps) => self.shared.capture_fps(),
            Some(ParamId::PreviewExposure) => effective(|s| s.preview.effective(AutoParam::Exposure)),
            Some(ParamId::PreviewFocus) => effective(|s| s.preview.effective(AutoParam::Focus)),
            Some(ParamId::PreviewGain) => effective(|s| s.preview.effective(AutoParam::Gain)),
            Some(ParamId::PreviewWb) => {
                effective(|s| s.preview.effective(AutoParam::WhiteBalance))
            }
            _ => {
                error!("get_param_float: unsupported param id {}", raw);
                -1.0
            }
        }
    }

    /// Array parameter read-back into `out`. Returns false, leaving `out`
    /// untouched, for unsupported ids or a wrongly sized `out`.
    pub fn get_param_float_array(&self, param: i32, out: &mut [f32]) -> bool {
        let (raw, sub_index) = split_id(param);

        match ParamId::from_raw(raw) {
            Some(ParamId::Shot) => {
                if out.len() != SHOT_PARAM_COUNT || sub_index as usize >= MAX_PICTURES_PER_SHOT {
                    error!("get_param_float_array(Shot): bad array size {} or index {}", out.len(), sub_index);
                    return false;
                }
                let values = self
                    .shared
                    .with_snapshot(|s| s.pending_images[sub_index as usize].to_array());
                out.copy_from_slice(&values);
                true
            }
            Some(ParamId::LuminanceHistogram) => {
                if out.len() != HISTOGRAM_SIZE {
                    error!("get_param_float_array(LuminanceHistogram): bad array size {}", out.len());
                    return false;
                }
                self.shared.with_snapshot(|s| out.copy_from_slice(&s.preview.histogram));
                true
            }
            _ => {
                error!("get_param_float_array: unsupported param id {}", raw);
                false
            }
        }
    }

    pub fn capture_fps(&self) -> f32 {
        self.shared.capture_fps()
    }

    /// Render side: runs `f` on the latest preview frame under the rendering
    /// lock. `None` until a camera is open.
    pub fn with_viewer_frame<R>(&self, f: impl FnOnce(&Yuv420Image) -> R) -> Option<R> {
        self.shared.with_render(|render| render.acquire_viewer_frame().map(f))
    }
}
