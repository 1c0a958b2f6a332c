use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use barcode_locator::config::ServiceConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BARCODE_CONFIG",
        "BARCODE_API_ADDR",
        "BARCODE_MAX_UPLOAD_BYTES",
        "BARCODE_BACKEND",
        "BARCODE_MODEL_PATH",
        "BARCODE_CONF_THRESHOLD",
        "BARCODE_IOU_THRESHOLD",
        "BARCODE_MAX_AREA",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.max_upload_bytes, 16 * 1024 * 1024);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.input_size, 640);
    assert_eq!(cfg.thresholds.confidence, 0.60);
    assert_eq!(cfg.thresholds.iou, 0.45);
    assert_eq!(cfg.thresholds.max_area, 0.20);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": { "addr": "127.0.0.1:9100", "max_upload_bytes": 2097152 },
            "detector": { "backend": "Tract", "model_path": "models/shelf.onnx", "input_size": 512 },
            "thresholds": { "confidence": 0.5, "iou": 0.4, "max_area": 0.3 }
        }"#,
    );

    std::env::set_var("BARCODE_CONFIG", file.path());
    std::env::set_var("BARCODE_MAX_AREA", "0.15");
    std::env::set_var("BARCODE_API_ADDR", "0.0.0.0:9200");

    let cfg = ServiceConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:9200");
    assert_eq!(cfg.max_upload_bytes, 2 * 1024 * 1024);
    assert_eq!(cfg.detector.backend, "tract");
    assert_eq!(
        cfg.detector.model_path,
        Some(PathBuf::from("models/shelf.onnx"))
    );
    assert_eq!(cfg.detector.input_size, 512);
    assert_eq!(cfg.thresholds.confidence, 0.5);
    assert_eq!(cfg.thresholds.iou, 0.4);
    assert_eq!(cfg.thresholds.max_area, 0.15);

    clear_env();
}

#[test]
fn rejects_unparseable_env_value() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BARCODE_CONF_THRESHOLD", "high");
    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("BARCODE_CONF_THRESHOLD"));

    clear_env();
}

#[test]
fn rejects_threshold_outside_unit_interval() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BARCODE_IOU_THRESHOLD", "1.5");
    assert!(ServiceConfig::load().is_err());

    std::env::set_var("BARCODE_IOU_THRESHOLD", "0.45");
    std::env::set_var("BARCODE_MAX_AREA", "0");
    assert!(ServiceConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_missing_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BARCODE_CONFIG", "/nonexistent/barcode-locator.json");
    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}

#[test]
fn command_line_overrides_are_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load config");
    assert!(cfg.clone().with_detector_overrides(Some("tract".into()), None).is_err());

    let cfg = cfg
        .with_detector_overrides(Some("TRACT".into()), Some(PathBuf::from("m.onnx")))
        .expect("tract with model");
    assert_eq!(cfg.detector.backend, "tract");
}
