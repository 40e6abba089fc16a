//! Render-thread side of the preview handoff
//!
//! The capture thread writes decoded preview frames into the back buffer of a
//! triple-buffered surface; the render thread swaps the front buffer once per
//! draw. Both sides reach the surface through [`RenderTarget`], which lives
//! behind the rendering lock together with the live camera's dimensions.

use tracing::debug;

use crate::capture::frame::{Frame, Yuv420Image};
use crate::capture::sensor::CameraMode;
use crate::pipeline::triple_buffer::TripleBuffer;

/// What the render thread may know about the live camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraInfo {
    pub mode: CameraMode,
    pub width: u32,
    pub height: u32,
}

/// Triple-buffered YUV420p preview surface of a fixed size.
///
/// Not synchronized itself: both roles access it under the rendering lock.
#[derive(Debug)]
pub struct PreviewSurface {
    width: u32,
    height: u32,
    buffers: TripleBuffer<Yuv420Image>,
}

impl PreviewSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffers: TripleBuffer::new([
                Yuv420Image::new(width, height),
                Yuv420Image::new(width, height),
                Yuv420Image::new(width, height),
            ]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Producer: copies `frame` into the back buffer and swaps. Frames of a
    /// different size are rejected.
    pub fn publish(&mut self, frame: &Frame) -> bool {
        if !self.buffers.back_buffer().copy_from_frame(frame) {
            return false;
        }
        self.buffers.swap_back_buffer();
        true
    }

    /// Consumer: latest completed frame. Repeated calls without a new
    /// publish return the same buffer.
    pub fn latest(&mut self) -> &Yuv420Image {
        self.buffers.swap_front_buffer()
    }

    pub fn has_pending_frame(&self) -> bool {
        self.buffers.has_pending_frame()
    }
}

/// State guarded by the rendering lock.
#[derive(Debug, Default)]
pub struct RenderTarget {
    pub camera: Option<CameraInfo>,
    pub surface: Option<PreviewSurface>,
}

impl RenderTarget {
    /// Render side: (re)allocates the surface at the live camera's size and
    /// returns the latest frame. `None` until a camera is open.
    pub fn acquire_viewer_frame(&mut self) -> Option<&Yuv420Image> {
        let camera = self.camera?;

        let stale = self
            .surface
            .as_ref()
            .map_or(true, |surface| !surface.matches(camera.width, camera.height));
        if stale {
            debug!("Allocating {}x{} preview surface", camera.width, camera.height);
            self.surface = Some(PreviewSurface::new(camera.width, camera.height));
        }

        self.surface.as_mut().map(|surface| surface.latest())
    }

    /// Capture side: publishes `frame` if a surface of the same size exists.
    pub fn publish(&mut self, frame: &Frame) -> bool {
        match self.surface.as_mut() {
            Some(surface) if surface.matches(frame.width(), frame.height()) => surface.publish(frame),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Instant;

    fn frame(width: u32, height: u32, luma: u8) -> Frame {
        let mut image = Yuv420Image::new(width, height);
        image.planes_mut().0.fill(luma);
        Frame {
            data: Bytes::from(image.data),
            meta: Arc::new(FrameMetadata {
                sequence: luma as u64,
                width,
                height,
                format: PixelFormat::Yuv420p,
                exposure: 1000,
                gain: 1.0,
                white_balance: 6500,
                focus: 0.0,
                flash_brightness: 0.0,
                histogram: Vec::new(),
                sharpness: None,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    fn back_camera(width: u32, height: u32) -> CameraInfo {
        CameraInfo {
            mode: CameraMode::Back,
            width,
            height,
        }
    }

    #[test]
    fn test_latest_frame_wins() {
        let mut surface = PreviewSurface::new(8, 8);
        assert!(surface.publish(&frame(8, 8, 10)));
        assert!(surface.publish(&frame(8, 8, 20)));

        assert_eq!(surface.latest().planes().0[0], 20);
        // No new frame: same contents
        assert_eq!(surface.latest().planes().0[0], 20);
    }

    #[test]
    fn test_wrong_size_is_rejected() {
        let mut surface = PreviewSurface::new(8, 8);
        assert!(!surface.publish(&frame(16, 8, 10)));
        assert!(!surface.has_pending_frame());
    }

    #[test]
    fn test_no_camera_no_frame() {
        let mut target = RenderTarget::default();
        assert!(target.acquire_viewer_frame().is_none());
        assert!(!target.publish(&frame(8, 8, 1)));
    }

    #[test]
    fn test_surface_follows_camera_size() {
        let mut target = RenderTarget {
            camera: Some(back_camera(8, 8)),
            surface: None,
        };
        assert_eq!(target.acquire_viewer_frame().map(|f| f.width), Some(8));
        assert!(target.publish(&frame(8, 8, 5)));
        assert_eq!(target.acquire_viewer_frame().unwrap().planes().0[0], 5);

        target.camera = Some(back_camera(16, 8));
        let image = target.acquire_viewer_frame().unwrap();
        assert_eq!((image.width, image.height), (16, 8));
        assert!(!target.publish(&frame(8, 8, 5)));
    }
}
