//! Burstcam headless demo: previews on a simulated camera and takes a burst

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use burstcam::capture::command::compose_id;
use burstcam::capture::simulated::SimulatedBackend;
use burstcam::{CameraInterface, ChannelListener, Command, Config, ParamId, UiEvent};
use color_eyre::Result;
use tracing::info;

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("burstcam=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Burstcam launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;
    let output_dir = config
        .writer
        .output_dir
        .take()
        .unwrap_or_else(|| std::env::temp_dir().join("burstcam"));

    let (listener, events) = ChannelListener::new();
    let camera = CameraInterface::start(config, Box::new(SimulatedBackend::default()), Arc::new(listener))?;

    camera.send(Command::ViewerActive(true));
    camera.set_param_string(ParamId::OutputDirectory.raw() as i32, &output_dir.to_string_lossy());
    camera.set_param_int(ParamId::BurstSize.raw() as i32, 3);
    for (index, exposure) in [10_000.0f32, 20_000.0, 40_000.0].into_iter().enumerate() {
        camera.set_param_float_array(
            compose_id(ParamId::Shot, index as u16),
            &[exposure, 0.0, 1.0, 6500.0, 0.0],
        );
    }

    // Let the auto loops settle before shooting
    std::thread::sleep(Duration::from_millis(500));
    camera.set_param_int(ParamId::TakePicture.raw() as i32, 1);

    let deadline = Instant::now() + Duration::from_secs(3);
    while let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(timeout) {
            Ok(UiEvent::FileSystemChanged) => info!("Files written to {:?}", output_dir),
            Ok(event) => info!("UI event: {:?}", event),
            Err(_) => break,
        }
    }

    info!(
        "Capture fps {:.1}, exposure {:.0}us, gain {:.2}",
        camera.capture_fps(),
        camera.get_param_float(ParamId::PreviewExposure.raw() as i32),
        camera.get_param_float(ParamId::PreviewGain.raw() as i32),
    );
    if let Some(luma) = camera.with_viewer_frame(|frame| frame.planes().0[0]) {
        info!("Top-left preview luma {}", luma);
    }

    Ok(())
}
