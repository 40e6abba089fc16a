pub mod preview;

pub use preview::{CameraInfo, PreviewSurface, RenderTarget};
