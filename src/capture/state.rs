//! Capture state owned by the capture thread
//!
//! Preview parameters keep two values each: the one the user set and the one
//! the auto-evaluation produced. The per-parameter auto flag selects which one
//! drives the next shot.

use crate::capture::command::{
    SHOT_PARAM_COUNT, SHOT_PARAM_EXPOSURE, SHOT_PARAM_FLASH, SHOT_PARAM_FOCUS, SHOT_PARAM_GAIN,
    SHOT_PARAM_WB,
};

/// Histogram bin count exposed to the UI
pub const HISTOGRAM_SIZE: usize = 256;

/// Maximum number of images per burst
pub const MAX_PICTURES_PER_SHOT: usize = 16;

/// Single image capture parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotParams {
    /// Exposure in microseconds
    pub exposure: f32,
    /// Focus in diopters
    pub focus: f32,
    /// Gain (1.0 = base ISO)
    pub gain: f32,
    /// Color temperature in Kelvin
    pub white_balance: f32,
    pub flash_on: bool,
}

impl Default for ShotParams {
    fn default() -> Self {
        Self {
            exposure: 30000.0, // 30ms
            focus: 10.0,
            gain: 1.0,
            white_balance: 6500.0,
            flash_on: false,
        }
    }
}

impl ShotParams {
    /// From the `[exposure, focus, gain, wb, flash]` wire layout.
    pub fn from_array(values: &[f32; SHOT_PARAM_COUNT]) -> Self {
        Self {
            exposure: values[SHOT_PARAM_EXPOSURE],
            focus: values[SHOT_PARAM_FOCUS],
            gain: values[SHOT_PARAM_GAIN],
            white_balance: values[SHOT_PARAM_WB],
            flash_on: values[SHOT_PARAM_FLASH] > 0.0,
        }
    }

    pub fn to_array(&self) -> [f32; SHOT_PARAM_COUNT] {
        let mut values = [0.0; SHOT_PARAM_COUNT];
        values[SHOT_PARAM_EXPOSURE] = self.exposure;
        values[SHOT_PARAM_FOCUS] = self.focus;
        values[SHOT_PARAM_GAIN] = self.gain;
        values[SHOT_PARAM_WB] = self.white_balance;
        values[SHOT_PARAM_FLASH] = if self.flash_on { 1.0 } else { 0.0 };
        values
    }
}

/// Preview parameter that can be driven by the user or by auto-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoParam {
    Exposure,
    Gain,
    WhiteBalance,
    Focus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewState {
    pub evaluated: ShotParams,
    pub user: ShotParams,
    pub auto_exposure: bool,
    pub auto_gain: bool,
    pub auto_white_balance: bool,
    pub auto_focus: bool,
    /// Normalized luminance histogram
    pub histogram: [f32; HISTOGRAM_SIZE],
}

impl Default for PreviewState {
    fn default() -> Self {
        Self {
            evaluated: ShotParams::default(),
            user: ShotParams::default(),
            auto_exposure: true,
            auto_gain: true,
            auto_white_balance: true,
            auto_focus: false,
            histogram: [0.0; HISTOGRAM_SIZE],
        }
    }
}

impl PreviewState {
    pub fn is_auto(&self, param: AutoParam) -> bool {
        match param {
            AutoParam::Exposure => self.auto_exposure,
            AutoParam::Gain => self.auto_gain,
            AutoParam::WhiteBalance => self.auto_white_balance,
            AutoParam::Focus => self.auto_focus,
        }
    }

    fn auto_flag_mut(&mut self, param: AutoParam) -> &mut bool {
        match param {
            AutoParam::Exposure => &mut self.auto_exposure,
            AutoParam::Gain => &mut self.auto_gain,
            AutoParam::WhiteBalance => &mut self.auto_white_balance,
            AutoParam::Focus => &mut self.auto_focus,
        }
    }

    /// Sets an auto-evaluation flag.
    ///
    /// Only a real transition has an effect. Entering auto mode resumes from
    /// the last evaluated value; leaving it resumes from the user value, which
    /// a toggle never overwrites. Returns whether the flag changed.
    pub fn set_auto(&mut self, param: AutoParam, enabled: bool) -> bool {
        let flag = self.auto_flag_mut(param);
        let changed = *flag != enabled;
        *flag = enabled;
        changed
    }

    /// Value that drives the next preview shot for `param`.
    pub fn effective(&self, param: AutoParam) -> f32 {
        let source = if self.is_auto(param) {
            &self.evaluated
        } else {
            &self.user
        };
        match param {
            AutoParam::Exposure => source.exposure,
            AutoParam::Gain => source.gain,
            AutoParam::WhiteBalance => source.white_balance,
            AutoParam::Focus => source.focus,
        }
    }

    pub fn effective_params(&self) -> ShotParams {
        ShotParams {
            exposure: self.effective(AutoParam::Exposure),
            focus: self.effective(AutoParam::Focus),
            gain: self.effective(AutoParam::Gain),
            white_balance: self.effective(AutoParam::WhiteBalance),
            flash_on: false,
        }
    }
}

/// Full capture configuration: preview settings plus the pending burst.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureState {
    pub preview: PreviewState,
    pub pending_images: [ShotParams; MAX_PICTURES_PER_SHOT],
    pending_count: usize,
}

impl CaptureState {
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Sets the burst size, capped at [`MAX_PICTURES_PER_SHOT`].
    pub fn set_pending_count(&mut self, count: usize) {
        self.pending_count = count.min(MAX_PICTURES_PER_SHOT);
    }

    /// Shots of the next burst, in capture order.
    pub fn pending_shots(&self) -> &[ShotParams] {
        &self.pending_images[..self.pending_count]
    }
}

/// Normalizes raw histogram buckets into [`HISTOGRAM_SIZE`] bins.
///
/// With fewer buckets than bins, bucket `i` lands on bin `i * stride` and the
/// slots in between are zeroed. Every value is divided by the largest bucket
/// (at least 1), so the peak reads 1.0.
pub fn normalize_histogram(raw: &[u32], out: &mut [f32; HISTOGRAM_SIZE]) {
    out.fill(0.0);
    if raw.is_empty() {
        return;
    }

    let buckets = raw.len().min(HISTOGRAM_SIZE);
    let stride = HISTOGRAM_SIZE / buckets;
    let max = raw[..buckets].iter().copied().max().unwrap_or(0).max(1);
    let norm = 1.0 / max as f32;

    for (i, count) in raw[..buckets].iter().enumerate() {
        out[i * stride] = *count as f32 * norm;
    }
}
