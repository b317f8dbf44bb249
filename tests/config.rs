use std::sync::Mutex;

use tempfile::NamedTempFile;

use framepod::config::PodConfig;
use framepod::Rotation;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAMEPOD_CONFIG",
        "FRAMEPOD_IDENTIFIER",
        "FRAMEPOD_URL",
        "FRAMEPOD_PROFILE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PodConfig::load().expect("load config");
    assert_eq!(cfg.identifier, "cam1");
    assert_eq!(cfg.base_url, "http://127.0.0.1:8080/camera");
    assert_eq!(cfg.profile.capture_width, 320);
    assert_eq!(cfg.profile.frame_rate, 90);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "identifier": "cam7",
        "url": "http://base-station:9000/camera",
        "profile": "wide"
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAMEPOD_CONFIG", file.path());
    std::env::set_var("FRAMEPOD_IDENTIFIER", "cam2");

    let cfg = PodConfig::load().expect("load config");

    // Env wins over file; file wins over defaults.
    assert_eq!(cfg.identifier, "cam2");
    assert_eq!(cfg.base_url, "http://base-station:9000/camera");
    assert_eq!(cfg.profile.capture_width, 1280);
    assert_eq!(cfg.profile.rotation, Rotation::Cw90);

    clear_env();
}

#[test]
fn custom_profile_overrides_named_profile() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "profile": "standard",
        "custom_profile": {
            "sensor_mode": 4,
            "frame_rate": 30,
            "capture_width": 640,
            "capture_height": 480,
            "crop": { "left": 0, "top": 40, "width": 640, "height": 400 },
            "rotation": 180,
            "output_width": 320,
            "output_height": 200
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAMEPOD_CONFIG", file.path());

    let cfg = PodConfig::load().expect("load config");
    assert_eq!(cfg.profile.sensor_mode, 4);
    assert_eq!(cfg.profile.frame_rate, 30);
    assert_eq!(cfg.profile.rotation, Rotation::Cw180);
    assert_eq!(cfg.profile.crop.unwrap().top, 40);
    assert_eq!(cfg.profile.frame_len(), 640 * 480);

    clear_env();
}

#[test]
fn cli_overrides_beat_everything() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEPOD_IDENTIFIER", "cam-env");

    let mut cfg = PodConfig::load().expect("load config");
    cfg.apply_overrides(
        Some("cam-cli".to_string()),
        Some("http://other:8000/camera".to_string()),
        Some("wide".to_string()),
    )
    .expect("apply overrides");

    assert_eq!(cfg.identifier, "cam-cli");
    assert_eq!(cfg.base_url, "http://other:8000/camera");
    assert_eq!(cfg.profile.capture_width, 1280);

    clear_env();
}

#[test]
fn invalid_settings_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEPOD_URL", "not a url");
    assert!(PodConfig::load().is_err());
    clear_env();

    let mut cfg = PodConfig::load().expect("load config");
    assert!(cfg
        .apply_overrides(None, None, Some("unknown-profile".to_string()))
        .is_err());

    clear_env();
}
