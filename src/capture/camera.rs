//! Camera aggregate: sensor, lens and flash for one camera mode

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::Frame;
use crate::capture::sensor::{Action, AutoFocus, CameraBackend, CameraMode, Sensor, SensorError, Shot};
use crate::capture::state::ShotParams;
use crate::writer::{AsyncImageWriter, FileFormat, WriterError};
use crate::PreviewSize;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error("no output directory set, cannot take pictures")]
    NoWriter,

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Live camera hardware. Owned by the capture thread; the render side only
/// ever sees its preview size.
pub struct Camera {
    mode: CameraMode,
    preview: PreviewSize,
    sensor: Box<dyn Sensor>,
    auto_focus: Box<dyn AutoFocus>,
}

impl Camera {
    pub fn open(backend: &mut dyn CameraBackend, mode: CameraMode, preview: PreviewSize) -> Result<Self, SensorError> {
        let rig = backend.open(mode)?;
        info!(
            "Opened {:?} camera, preview {}x{}, full size {:?}",
            mode,
            preview.width,
            preview.height,
            rig.sensor.max_image_size()
        );

        Ok(Self {
            mode,
            preview,
            sensor: rig.sensor,
            auto_focus: rig.auto_focus,
        })
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn width(&self) -> u32 {
        self.preview.width
    }

    pub fn height(&self) -> u32 {
        self.preview.height
    }

    pub fn sensor_mut(&mut self) -> &mut dyn Sensor {
        self.sensor.as_mut()
    }

    pub fn auto_focus(&self) -> &dyn AutoFocus {
        self.auto_focus.as_ref()
    }

    /// Sensor and auto-focuser together, for evaluating one frame.
    pub fn rig_mut(&mut self) -> (&mut dyn Sensor, &mut dyn AutoFocus) {
        (self.sensor.as_mut(), self.auto_focus.as_mut())
    }

    /// Captures one full-resolution frame per entry of `shots` and hands the
    /// resulting image set to `writer`.
    ///
    /// Preview streaming is stopped and in-flight frames are discarded first.
    /// A frame the sensor fails to deliver becomes a dropped placeholder so
    /// the remaining frames keep their burst index. No shot is left pending
    /// on the sensor, on success or error. Returns the set's file id.
    #[instrument(skip(self, shots, writer), fields(mode = ?self.mode, shots = shots.len()))]
    pub fn capture(
        &mut self,
        shots: &[ShotParams],
        writer: &mut AsyncImageWriter,
        format: FileFormat,
    ) -> Result<u32, CaptureError> {
        self.sensor.stop_streaming();
        self.discard_pending();

        // Synchronized with the shutter
        let flash = Action::Flash {
            time_us: 0,
            brightness: self.sensor.flash_max_brightness(),
        };
        let (width, height) = self.sensor.max_image_size();

        for params in shots {
            let mut shot = Shot::new(width, height);
            shot.exposure = params.exposure as u32;
            shot.gain = params.gain;
            shot.white_balance = params.white_balance as u32;
            if params.flash_on {
                shot.add_action(flash);
            }
            if let Err(e) = self.sensor.capture(&shot) {
                self.discard_pending();
                return Err(e.into());
            }
        }

        let mut set = writer.new_image_set();
        for index in 0..shots.len() {
            let frame = match self.sensor.get_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Burst frame {} lost: {}", index, e);
                    Frame::dropped(index as u64)
                }
            };
            set.add(format, frame);
        }
        self.discard_pending();

        let id = set.id();
        debug!("Captured image set {} with {} frames", id, set.len());
        writer.push(set);
        Ok(id)
    }

    /// Drops every shot still queued on the sensor, ignoring frame errors.
    fn discard_pending(&mut self) {
        let pending = self.sensor.shots_pending();
        for _ in 0..pending {
            if let Err(e) = self.sensor.get_frame() {
                debug!("Discarded in-flight frame failed: {}", e);
            }
        }
        if self.sensor.shots_pending() > 0 {
            warn!("{} shots still pending on the sensor", self.sensor.shots_pending());
        }
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("mode", &self.mode)
            .field("preview", &self.preview)
            .finish_non_exhaustive()
    }
}
