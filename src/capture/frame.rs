use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata, including the parameters the sensor actually used
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Exposure time in microseconds
    pub exposure: u32,
    /// Analog gain (1.0 = base ISO)
    pub gain: f32,
    /// Color temperature in Kelvin
    pub white_balance: u32,
    /// Lens focus in diopters
    pub focus: f32,
    /// Flash brightness during exposure, 0.0 when the flash did not fire
    pub flash_brightness: f32,
    /// Raw luminance histogram buckets, empty when not requested
    pub histogram: Vec<u32>,
    /// Sharpness score, present when requested by the shot
    pub sharpness: Option<u64>,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar Y, then quarter-size U and V
    Yuv420p,
    Rgb24,
}

impl PixelFormat {
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuv420p => pixels + 2 * ((width as usize / 2) * (height as usize / 2)),
            PixelFormat::Rgb24 => pixels * 3,
        }
    }
}

impl Frame {
    /// Placeholder for a frame the sensor failed to deliver. Keeps its
    /// position in a burst but carries no pixels.
    pub fn dropped(sequence: u64) -> Self {
        Self {
            data: Bytes::new(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: 0,
                height: 0,
                format: PixelFormat::Yuv420p,
                exposure: 0,
                gain: 0.0,
                white_balance: 0,
                focus: 0.0,
                flash_brightness: 0.0,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.data.is_empty()
            && self.data.len() >= self.meta.format.frame_len(self.meta.width, self.meta.height)
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Y, U and V planes of a YUV420p frame.
    pub fn planes(&self) -> Option<(&[u8], &[u8], &[u8])> {
        if self.meta.format != PixelFormat::Yuv420p || !self.is_valid() {
            return None;
        }
        Some(split_planes(&self.data, self.meta.width, self.meta.height))
    }

    /// Converts the frame to packed RGB for encoding.
    pub fn to_rgb(&self) -> Option<RgbImage> {
        if !self.is_valid() {
            return None;
        }
        match self.meta.format {
            PixelFormat::Yuv420p => Some(yuv420_to_rgb(&self.data, self.meta.width, self.meta.height)),
            PixelFormat::Rgb24 => {
                let len = PixelFormat::Rgb24.frame_len(self.meta.width, self.meta.height);
                RgbImage::from_raw(self.meta.width, self.meta.height, self.data[..len].to_vec())
            }
        }
    }
}

/// Owned YUV420p picture, used for preview surfaces and thumbnails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Yuv420Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Yuv420Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; PixelFormat::Yuv420p.frame_len(width, height)],
        }
    }

    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        split_planes(&self.data, self.width, self.height)
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let luma = self.width as usize * self.height as usize;
        let chroma = (self.width as usize / 2) * (self.height as usize / 2);
        let (y, rest) = self.data.split_at_mut(luma);
        let (u, v) = rest.split_at_mut(chroma);
        (y, u, &mut v[..chroma])
    }

    /// Copies a same-sized YUV420p frame into this picture. Returns false on a
    /// size or format mismatch.
    pub fn copy_from_frame(&mut self, frame: &Frame) -> bool {
        if frame.width() != self.width || frame.height() != self.height {
            return false;
        }
        match frame.planes() {
            Some(_) => {
                let len = self.data.len();
                self.data.copy_from_slice(&frame.data[..len]);
                true
            }
            None => false,
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        yuv420_to_rgb(&self.data, self.width, self.height)
    }
}

fn split_planes(data: &[u8], width: u32, height: u32) -> (&[u8], &[u8], &[u8]) {
    let luma = width as usize * height as usize;
    let chroma = (width as usize / 2) * (height as usize / 2);
    let (y, rest) = data.split_at(luma);
    let (u, v) = rest.split_at(chroma);
    (y, u, &v[..chroma])
}

/// YUV420p to RGB24, BT.601 in 16.16 fixed point.
pub fn yuv420_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
    let (y_plane, u_plane, v_plane) = split_planes(data, width, height);
    let chroma_stride = width as usize / 2;
    let mut rgb = RgbImage::new(width, height);

    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane[y * width as usize + x] as i32;
        let cindex = (y / 2) * chroma_stride + (x / 2).min(chroma_stride.saturating_sub(1));
        let u = u_plane.get(cindex).copied().unwrap_or(128) as i32 - 128;
        let v = v_plane.get(cindex).copied().unwrap_or(128) as i32 - 128;

        let r = luma + ((v * 91881) >> 16);
        let g = luma - ((u * 22554 + v * 46802) >> 16);
        let b = luma + ((u * 112853) >> 16);

        pixel.0 = [clamp_u8(r), clamp_u8(g), clamp_u8(b)];
    }

    rgb
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32, luma: u8) -> Frame {
        let mut image = Yuv420Image::new(width, height);
        let (y, u, v) = image.planes_mut();
        y.fill(luma);
        u.fill(128);
        v.fill(128);
        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: 1,
                width,
                height,
                format: PixelFormat::Yuv420p,
                exposure: 30000,
                gain: 1.0,
                white_balance: 6500,
                focus: 10.0,
                flash_brightness: 0.0,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_yuv420_frame_len() {
        assert_eq!(PixelFormat::Yuv420p.frame_len(4, 2), 8 + 2 + 2);
        assert_eq!(PixelFormat::Rgb24.frame_len(4, 2), 24);
    }

    #[test]
    fn test_gray_converts_to_gray() {
        let frame = gray_frame(4, 4, 100);
        let rgb = frame.to_rgb().unwrap();
        assert_eq!(rgb.get_pixel(3, 3).0, [100, 100, 100]);
    }

    #[test]
    fn test_dropped_frame_is_invalid() {
        let frame = Frame::dropped(3);
        assert!(!frame.is_valid());
        assert!(frame.planes().is_none());
        assert!(frame.to_rgb().is_none());
    }

    #[test]
    fn test_copy_from_frame_requires_matching_size() {
        let frame = gray_frame(4, 4, 50);
        let mut same = Yuv420Image::new(4, 4);
        assert!(same.copy_from_frame(&frame));
        assert_eq!(same.planes().0[0], 50);

        let mut other = Yuv420Image::new(8, 4);
        assert!(!other.copy_from_frame(&frame));
    }
}
