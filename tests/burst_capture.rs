//! End-to-end capture through the public interface on a simulated camera

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use burstcam::capture::command::compose_id;
use burstcam::capture::simulated::{SimulatedBackend, SimulatedSensorConfig};
use burstcam::capture::{Orchestrator, StepOutcome};
use burstcam::interface::NullListener;
use burstcam::{CameraInterface, ChannelListener, Config, ParamId, PreviewSize, UiEvent};

fn config() -> Config {
    let preview = PreviewSize { width: 64, height: 48 };
    let mut config = Config::default();
    config.capture.front_preview = preview;
    config.capture.back_preview = preview;
    config.capture.stereo_preview = preview;
    config.writer.thumbnail_width = 32;
    config.writer.thumbnail_height = 24;
    config
}

fn backend() -> Box<SimulatedBackend> {
    Box::new(SimulatedBackend::new(SimulatedSensorConfig {
        full_width: 160,
        full_height: 120,
        ..Default::default()
    }))
}

fn step_driven(config: Config) -> (CameraInterface, Orchestrator) {
    CameraInterface::new(config, backend(), Arc::new(NullListener)).unwrap()
}

fn param(id: ParamId) -> i32 {
    id.raw() as i32
}

fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"<imagestack imagecount=\"0\"></imagestack>").unwrap();
}

#[test]
fn test_burst_writes_manifest_images_and_thumbnails() {
    let dir = tempfile::tempdir().unwrap();
    let (camera, mut orch) = step_driven(config());

    camera.set_param_string(param(ParamId::OutputDirectory), &dir.path().to_string_lossy());
    camera.set_param_int(param(ParamId::BurstSize), 3);
    for (i, exposure) in [10_000.0f32, 20_000.0, 30_000.0].into_iter().enumerate() {
        camera.set_param_float_array(compose_id(ParamId::Shot, i as u16), &[exposure, 0.0, 1.0, 5000.0, 0.0]);
    }
    camera.set_param_int(param(ParamId::TakePicture), 1);

    assert_eq!(orch.step().unwrap(), StepOutcome::Idle);
    // Writer thread is joined on drop
    drop(orch);

    let manifest = std::fs::read_to_string(dir.path().join("img_0000.xml")).unwrap();
    assert!(manifest.contains("imagecount=\"3\""));
    assert!(manifest.contains("exposure=\"20000\""));
    assert!(manifest.contains("wb=\"5000\""));

    for i in 0..3 {
        let image = image::open(dir.path().join(format!("img_0000_{:02}.jpg", i))).unwrap();
        assert_eq!((image.width(), image.height()), (160, 120));
        let thumb = image::open(dir.path().join(format!("thumb_0000_{:02}.jpg", i))).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (32, 24));
    }
    assert!(!dir.path().join("img_0000_03.jpg").exists());
}

#[test]
fn test_file_ids_skip_existing_sets() {
    let dir = tempfile::tempdir().unwrap();
    for id in 0..5 {
        touch(dir.path(), &format!("img_{:04}.xml", id));
    }

    let mut config = config();
    config.writer.output_dir = Some(dir.path().to_path_buf());
    let (camera, mut orch) = step_driven(config);
    assert!(orch.has_writer());

    camera.set_param_int(param(ParamId::BurstSize), 1);
    camera.set_param_int(param(ParamId::TakePicture), 1);
    orch.step().unwrap();
    camera.set_param_int(param(ParamId::TakePicture), 1);
    orch.step().unwrap();
    drop(orch);

    assert!(dir.path().join("img_0005.xml").exists());
    assert!(dir.path().join("img_0005_00.jpg").exists());
    assert!(dir.path().join("img_0006.xml").exists());
}

#[test]
fn test_free_file_id_hint_before_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (camera, mut orch) = step_driven(config());

    camera.set_param_int(param(ParamId::OutputFileId), 42);
    camera.set_param_string(param(ParamId::OutputDirectory), &dir.path().to_string_lossy());
    camera.set_param_int(param(ParamId::BurstSize), 1);
    camera.set_param_int(param(ParamId::TakePicture), 1);
    orch.step().unwrap();
    drop(orch);

    assert!(dir.path().join("img_0042.xml").exists());
}

#[test]
fn test_second_output_directory_is_ignored() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let (camera, mut orch) = step_driven(config());

    camera.set_param_string(param(ParamId::OutputDirectory), &first.path().to_string_lossy());
    camera.set_param_string(param(ParamId::OutputDirectory), &second.path().to_string_lossy());
    camera.set_param_int(param(ParamId::BurstSize), 1);
    camera.set_param_int(param(ParamId::TakePicture), 1);
    orch.step().unwrap();
    drop(orch);

    assert!(first.path().join("img_0000.xml").exists());
    assert!(!second.path().join("img_0000.xml").exists());
}

#[test]
fn test_commands_apply_in_submission_order() {
    let (camera, mut orch) = step_driven(config());

    camera.set_param_int(param(ParamId::PreviewAutoGainOn), 0);
    camera.set_param_float(param(ParamId::PreviewGain), 2.0);
    camera.set_param_float(param(ParamId::PreviewGain), 3.0);
    camera.set_param_int(param(ParamId::BurstSize), 5);
    camera.set_param_int(param(ParamId::BurstSize), 2);
    camera.set_param_int(param(ParamId::ViewerActive), 1);
    assert_eq!(orch.step().unwrap(), StepOutcome::Previewed);

    assert_eq!(camera.get_param_float(param(ParamId::PreviewGain)), 3.0);
    assert_eq!(camera.get_param_int(param(ParamId::BurstSize)), 2);
    assert_eq!(orch.state().preview.user.gain, 3.0);
}

#[test]
fn test_switching_camera_resizes_viewer() {
    let mut config = config();
    config.capture.front_preview = PreviewSize { width: 32, height: 24 };
    let (camera, mut orch) = step_driven(config);

    assert_eq!(camera.with_viewer_frame(|f| (f.width, f.height)), Some((64, 48)));

    camera.set_param_int(param(ParamId::SelectCamera), burstcam::CameraMode::Front.raw());
    camera.set_param_int(param(ParamId::ViewerActive), 1);
    orch.step().unwrap();

    assert_eq!(camera.get_param_int(param(ParamId::SelectCamera)), burstcam::CameraMode::Front.raw());
    assert_eq!(camera.with_viewer_frame(|f| (f.width, f.height)), Some((32, 24)));
}

#[test]
fn test_threaded_capture_notifies_listener() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.capture.idle_poll_ms = 1;
    config.writer.output_dir = Some(dir.path().to_path_buf());

    let (listener, events) = ChannelListener::new();
    let camera = CameraInterface::start(config, backend(), Arc::new(listener)).unwrap();
    assert!(camera.is_running());

    camera.set_param_int(param(ParamId::ViewerActive), 1);
    camera.set_param_int(param(ParamId::BurstSize), 2);
    camera.set_param_int(param(ParamId::TakePicture), 1);

    // Manifest plus one per frame
    let mut fs_changes = 0;
    let mut started = false;
    let mut completed = false;
    let deadline = Instant::now() + Duration::from_secs(10);
    while fs_changes < 3 || !completed {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(timeout).expect("timed out waiting for UI events") {
            UiEvent::CaptureStarted => started = true,
            UiEvent::CaptureCompleted => completed = true,
            UiEvent::FileSystemChanged => fs_changes += 1,
            UiEvent::PreviewParamChanged(_) => {}
        }
    }

    assert!(started);
    assert!(dir.path().join("img_0000.xml").exists());
    assert!(dir.path().join("img_0000_01.jpg").exists());
    assert!(!camera.shared().is_capturing());
}
