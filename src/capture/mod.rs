pub mod camera;
pub mod command;
pub mod frame;
pub mod orchestrator;
pub mod sensor;
pub mod simulated;
pub mod state;

pub use camera::{Camera, CaptureError};
pub use command::{Command, ParamId, ParamSetRequest};
pub use frame::{Frame, PixelFormat};
pub use orchestrator::{Orchestrator, StepOutcome};
