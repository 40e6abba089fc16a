//! Parameter set requests: the command protocol between the UI and the capture thread
//!
//! On the wire a request is a 32-bit id plus a byte payload. The low 16 bits
//! of the id name the parameter, the high 16 bits carry a sub-index (the burst
//! shot position for `PARAM_SHOT`). Requests are decoded once, at the UI
//! boundary, into a typed [`Command`] which is what travels through the work
//! queue.

use std::path::PathBuf;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::capture::sensor::CameraMode;
use crate::capture::state::{ShotParams, MAX_PICTURES_PER_SHOT};

/// Number of floats in a `PARAM_SHOT` payload
pub const SHOT_PARAM_COUNT: usize = 5;
pub const SHOT_PARAM_EXPOSURE: usize = 0;
pub const SHOT_PARAM_FOCUS: usize = 1;
pub const SHOT_PARAM_GAIN: usize = 2;
pub const SHOT_PARAM_WB: usize = 3;
pub const SHOT_PARAM_FLASH: usize = 4;

/// Parameter identifiers. The numeric values are shared with the UI side and
/// must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ParamId {
    Shot = 0,
    Resolution = 1,
    BurstSize = 2,
    OutputFormat = 3,
    ViewerActive = 4,
    OutputDirectory = 5,
    OutputFileId = 6,
    LuminanceHistogram = 7,
    PreviewExposure = 8,
    PreviewFocus = 9,
    PreviewGain = 10,
    PreviewWb = 11,
    PreviewAutoExposureOn = 12,
    PreviewAutoFocusOn = 13,
    PreviewAutoGainOn = 14,
    PreviewAutoWbOn = 15,
    CaptureFps = 16,
    TakePicture = 17,
    FocusOnTouch = 18,
    WbOnTouch = 19,
    SelectCamera = 20,
    /// Private: file system changed notification, posted by the writer thread
    PrivFsChanged = 100,
}

impl ParamId {
    pub fn from_raw(raw: u16) -> Option<Self> {
        use ParamId::*;
        Some(match raw {
            0 => Shot,
            1 => Resolution,
            2 => BurstSize,
            3 => OutputFormat,
            4 => ViewerActive,
            5 => OutputDirectory,
            6 => OutputFileId,
            7 => LuminanceHistogram,
            8 => PreviewExposure,
            9 => PreviewFocus,
            10 => PreviewGain,
            11 => PreviewWb,
            12 => PreviewAutoExposureOn,
            13 => PreviewAutoFocusOn,
            14 => PreviewAutoGainOn,
            15 => PreviewAutoWbOn,
            16 => CaptureFps,
            17 => TakePicture,
            18 => FocusOnTouch,
            19 => WbOnTouch,
            20 => SelectCamera,
            100 => PrivFsChanged,
            _ => return None,
        })
    }

    pub fn raw(self) -> u16 {
        self as u16
    }
}

/// Splits a wire id into (parameter tag, sub-index).
pub fn split_id(id: i32) -> (u16, u16) {
    ((id & 0xffff) as u16, ((id >> 16) & 0xffff) as u16)
}

/// Builds a wire id from a parameter and a sub-index.
pub fn compose_id(param: ParamId, sub_index: u16) -> i32 {
    ((sub_index as i32) << 16) | param.raw() as i32
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unsupported parameter id {0}")]
    UnknownParam(u16),

    #[error("parameter {param:?} is read-only")]
    ReadOnly { param: ParamId },

    #[error("parameter {param:?} expects {expected} payload bytes, got {actual}")]
    PayloadSize {
        param: ParamId,
        expected: usize,
        actual: usize,
    },

    #[error("shot index {0} out of range")]
    ShotIndex(u16),

    #[error("invalid value {value} for {param:?}")]
    InvalidValue { param: ParamId, value: i32 },

    #[error("string payload for {0:?} is not NUL-terminated UTF-8")]
    BadString(ParamId),
}

/// Raw parameter set request: id plus an owned, immutable payload.
///
/// Cloning is cheap and never aliases mutable memory: `Bytes` is immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSetRequest {
    id: i32,
    payload: Bytes,
}

impl ParamSetRequest {
    pub fn new(id: i32, payload: &[u8]) -> Self {
        Self {
            id,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn int(id: i32, value: i32) -> Self {
        Self {
            id,
            payload: Bytes::copy_from_slice(&value.to_le_bytes()),
        }
    }

    pub fn float(id: i32, value: f32) -> Self {
        Self {
            id,
            payload: Bytes::copy_from_slice(&value.to_le_bytes()),
        }
    }

    pub fn float_array(id: i32, values: &[f32]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for v in values {
            buf.put_f32_le(*v);
        }
        Self {
            id,
            payload: buf.freeze(),
        }
    }

    /// String payloads carry a trailing NUL, as the UI side sends them.
    pub fn string(id: i32, value: &str) -> Self {
        let mut buf = BytesMut::with_capacity(value.len() + 1);
        buf.put_slice(value.as_bytes());
        buf.put_u8(0);
        Self {
            id,
            payload: buf.freeze(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Low 16 bits of the id.
    pub fn param(&self) -> u16 {
        split_id(self.id).0
    }

    /// High 16 bits of the id.
    pub fn sub_index(&self) -> u16 {
        split_id(self.id).1
    }

    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    fn expect_size(&self, param: ParamId, expected: usize) -> Result<(), ProtocolError> {
        if self.payload.len() != expected {
            return Err(ProtocolError::PayloadSize {
                param,
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(())
    }

    fn as_int(&self, param: ParamId) -> Result<i32, ProtocolError> {
        self.expect_size(param, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.payload);
        Ok(i32::from_le_bytes(raw))
    }

    fn as_float(&self, param: ParamId) -> Result<f32, ProtocolError> {
        self.expect_size(param, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.payload);
        Ok(f32::from_le_bytes(raw))
    }

    fn as_floats<const N: usize>(&self, param: ParamId) -> Result<[f32; N], ProtocolError> {
        self.expect_size(param, N * 4)?;
        let mut out = [0f32; N];
        for (value, chunk) in out.iter_mut().zip(self.payload.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(out)
    }

    fn as_string(&self, param: ParamId) -> Result<String, ProtocolError> {
        let (last, body) = self
            .payload
            .split_last()
            .ok_or(ProtocolError::BadString(param))?;
        if *last != 0 {
            return Err(ProtocolError::BadString(param));
        }
        std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::BadString(param))
    }

    /// Validates the payload against the parameter tag and produces the typed
    /// command.
    pub fn decode(&self) -> Result<Command, ProtocolError> {
        let (raw, sub_index) = split_id(self.id);
        let param = ParamId::from_raw(raw).ok_or(ProtocolError::UnknownParam(raw))?;

        let command = match param {
            ParamId::Shot => {
                if sub_index as usize >= MAX_PICTURES_PER_SHOT {
                    return Err(ProtocolError::ShotIndex(sub_index));
                }
                let values = self.as_floats::<SHOT_PARAM_COUNT>(param)?;
                Command::Shot {
                    index: sub_index as usize,
                    params: ShotParams::from_array(&values),
                }
            }
            ParamId::Resolution => Command::Resolution(self.as_int(param)?),
            ParamId::BurstSize => {
                let value = self.as_int(param)?;
                if value < 0 || value as usize > MAX_PICTURES_PER_SHOT {
                    return Err(ProtocolError::InvalidValue { param, value });
                }
                Command::BurstSize(value as usize)
            }
            ParamId::OutputFormat => Command::OutputFormat(self.as_int(param)?),
            ParamId::ViewerActive => Command::ViewerActive(self.as_int(param)? != 0),
            ParamId::OutputDirectory => Command::OutputDirectory(PathBuf::from(self.as_string(param)?)),
            ParamId::OutputFileId => {
                let value = self.as_int(param)?;
                if value < 0 {
                    return Err(ProtocolError::InvalidValue { param, value });
                }
                Command::OutputFileId(value as u32)
            }
            ParamId::PreviewExposure => Command::PreviewExposure(self.as_float(param)?),
            ParamId::PreviewFocus => Command::PreviewFocus(self.as_float(param)?),
            ParamId::PreviewGain => Command::PreviewGain(self.as_float(param)?),
            ParamId::PreviewWb => Command::PreviewWhiteBalance(self.as_float(param)?),
            ParamId::PreviewAutoExposureOn => Command::AutoExposure(self.as_int(param)? != 0),
            ParamId::PreviewAutoFocusOn => Command::AutoFocus(self.as_int(param)? != 0),
            ParamId::PreviewAutoGainOn => Command::AutoGain(self.as_int(param)? != 0),
            ParamId::PreviewAutoWbOn => Command::AutoWhiteBalance(self.as_int(param)? != 0),
            ParamId::TakePicture => Command::TakePicture(self.as_int(param)? != 0),
            ParamId::FocusOnTouch => {
                let [x, y] = self.as_floats::<2>(param)?;
                Command::FocusOnTouch { x, y }
            }
            ParamId::WbOnTouch => {
                let [x, y] = self.as_floats::<2>(param)?;
                Command::WhiteBalanceOnTouch { x, y }
            }
            ParamId::SelectCamera => {
                let value = self.as_int(param)?;
                let mode = CameraMode::from_raw(value).ok_or(ProtocolError::InvalidValue { param, value })?;
                Command::SelectCamera(mode)
            }
            ParamId::PrivFsChanged => Command::FileSystemChanged(self.as_int(param)? != 0),
            ParamId::LuminanceHistogram | ParamId::CaptureFps => {
                return Err(ProtocolError::ReadOnly { param });
            }
        };

        Ok(command)
    }
}

/// Typed capture command, applied by the capture thread in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Parameters of one image of the next burst
    Shot { index: usize, params: ShotParams },
    /// Accepted for protocol compatibility, no effect
    Resolution(i32),
    BurstSize(usize),
    /// Accepted for protocol compatibility, no effect
    OutputFormat(i32),
    ViewerActive(bool),
    OutputDirectory(PathBuf),
    OutputFileId(u32),
    PreviewExposure(f32),
    PreviewFocus(f32),
    PreviewGain(f32),
    PreviewWhiteBalance(f32),
    AutoExposure(bool),
    AutoFocus(bool),
    AutoGain(bool),
    AutoWhiteBalance(bool),
    TakePicture(bool),
    /// Normalized [0, 1] preview coordinates
    FocusOnTouch { x: f32, y: f32 },
    /// Normalized [0, 1] preview coordinates
    WhiteBalanceOnTouch { x: f32, y: f32 },
    SelectCamera(CameraMode),
    FileSystemChanged(bool),
}

impl Command {
    pub fn param(&self) -> ParamId {
        match self {
            Command::Shot { .. } => ParamId::Shot,
            Command::Resolution(_) => ParamId::Resolution,
            Command::BurstSize(_) => ParamId::BurstSize,
            Command::OutputFormat(_) => ParamId::OutputFormat,
            Command::ViewerActive(_) => ParamId::ViewerActive,
            Command::OutputDirectory(_) => ParamId::OutputDirectory,
            Command::OutputFileId(_) => ParamId::OutputFileId,
            Command::PreviewExposure(_) => ParamId::PreviewExposure,
            Command::PreviewFocus(_) => ParamId::PreviewFocus,
            Command::PreviewGain(_) => ParamId::PreviewGain,
            Command::PreviewWhiteBalance(_) => ParamId::PreviewWb,
            Command::AutoExposure(_) => ParamId::PreviewAutoExposureOn,
            Command::AutoFocus(_) => ParamId::PreviewAutoFocusOn,
            Command::AutoGain(_) => ParamId::PreviewAutoGainOn,
            Command::AutoWhiteBalance(_) => ParamId::PreviewAutoWbOn,
            Command::TakePicture(_) => ParamId::TakePicture,
            Command::FocusOnTouch { .. } => ParamId::FocusOnTouch,
            Command::WhiteBalanceOnTouch { .. } => ParamId::WbOnTouch,
            Command::SelectCamera(_) => ParamId::SelectCamera,
            Command::FileSystemChanged(_) => ParamId::PrivFsChanged,
        }
    }
}
