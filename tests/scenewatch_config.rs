use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use scenewatch::config::{ScenewatchConfig, SourceKind};
use scenewatch::CaptureMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCENEWATCH_CONFIG",
        "SCENEWATCH_SOURCE",
        "SCENEWATCH_DEVICE",
        "SCENEWATCH_FILE",
        "SCENEWATCH_DEINTERLACE",
        "SCENEWATCH_OFFSET",
        "SCENEWATCH_SUPPRESS_MS",
        "SCENEWATCH_RESULTS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "capture": {
            "source": "passthrough",
            "device": "HDMI Capture",
            "width": 1920,
            "height": 1080,
            "deinterlace": true,
            "offset": [1, 2]
        },
        "scene": {
            "suppress_ms": 20000,
            "chatter_ms": 500,
            "exclusive_with": ["GameTimerIcon", "Lobby"]
        },
        "recognizers": {
            "win_mask": "masks/result_detail.png",
            "win_threshold": 0.9
        },
        "output": {
            "results_jsonl": "results.jsonl"
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SCENEWATCH_CONFIG", file.path());
    std::env::set_var("SCENEWATCH_OFFSET", "3,-2");
    std::env::set_var("SCENEWATCH_SUPPRESS_MS", "45000");

    let cfg = ScenewatchConfig::load().expect("load config");

    assert_eq!(cfg.capture.source, SourceKind::Passthrough);
    assert_eq!(cfg.capture.device, "HDMI Capture");
    assert_eq!((cfg.capture.width, cfg.capture.height), (1920, 1080));
    assert!(cfg.capture.deinterlace);
    assert_eq!(cfg.capture.offset, (3, -2));
    assert_eq!(cfg.scene.suppress_ms, 45_000);
    assert_eq!(cfg.scene.chatter_ms, 500);
    assert_eq!(cfg.scene.exclusive_with, vec!["GameTimerIcon", "Lobby"]);
    assert!(cfg.scene.auto_offset);
    assert_eq!(cfg.recognizers.win_threshold, 0.9);
    assert_eq!(
        cfg.results_jsonl.as_deref(),
        Some(std::path::Path::new("results.jsonl"))
    );
    assert_eq!(
        cfg.capture.mode().unwrap(),
        CaptureMode::passthrough("HDMI Capture")
    );

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
[capture]
source = "file"
file = "recordings/session1.mp4"
fps = 60

[scene]
auto_offset = false
stable_max_pixels = 20
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("SCENEWATCH_CONFIG", file.path());

    let cfg = ScenewatchConfig::load().expect("load config");
    assert_eq!(cfg.capture.source, SourceKind::File);
    assert_eq!(cfg.capture.fps, 60);
    assert!(!cfg.scene.auto_offset);
    assert_eq!(cfg.scene.stable_max_pixels, 20);
    assert_eq!(cfg.scene.suppress_ms, 30_000);
    assert_eq!(
        cfg.capture.mode().unwrap(),
        CaptureMode::file("recordings/session1.mp4")
    );

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCENEWATCH_SOURCE", "file");
    assert!(ScenewatchConfig::load().is_err());
    clear_env();

    std::env::set_var("SCENEWATCH_SUPPRESS_MS", "500");
    assert!(ScenewatchConfig::load().is_err());
    clear_env();

    std::env::set_var("SCENEWATCH_SOURCE", "network");
    assert!(ScenewatchConfig::load().is_err());
    clear_env();

    std::env::set_var("SCENEWATCH_DEINTERLACE", "maybe");
    assert!(ScenewatchConfig::load().is_err());
    clear_env();
}

#[test]
fn env_only_defaults_to_stub_camera() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ScenewatchConfig::load().expect("load defaults");
    assert_eq!(cfg.capture.source, SourceKind::Camera);
    assert!(cfg.capture.device.starts_with("stub://"));
    assert_eq!(cfg.scene.chatter_ms, 1_000);
    assert!(cfg.results_jsonl.is_none());
}
