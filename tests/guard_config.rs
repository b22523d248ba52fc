use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use proximity_guard::config::GuardConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GUARD_CONFIG",
        "GUARD_SOURCE_URL",
        "GUARD_HTTP_ADDR",
        "GUARD_DB_PATH",
        "GUARD_TARGET_FPS",
        "GUARD_MAX_DISTANCE_M",
        "GUARD_ALERT_INTERVAL_SECS",
        "GUARD_TELEGRAM_TOKEN",
        "GUARD_TELEGRAM_CHAT_ID",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GuardConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "proximity_guard.db");
    assert_eq!(cfg.http_addr, "127.0.0.1:8780");
    assert_eq!(cfg.source.url, "stub://front_camera");
    assert_eq!(cfg.source.warmup, Duration::from_secs(2));
    assert_eq!(cfg.pipeline.frame_width, 640);
    assert_eq!(cfg.pipeline.frame_height, 480);
    assert_eq!(cfg.pipeline.target_fps, 30);
    assert_eq!(cfg.pipeline.calibration.known_width_m, 0.2);
    assert_eq!(cfg.pipeline.calibration.focal_length_px, 615.0);
    assert_eq!(cfg.pipeline.detection.diff_threshold, 25);
    assert_eq!(cfg.pipeline.detection.dilate_iterations, 2);
    assert_eq!(cfg.pipeline.detection.motion_min_area, 500);
    assert_eq!(cfg.pipeline.detection.alert_min_area, 50_000);
    assert_eq!(cfg.pipeline.alerts.min_distance_m, 0.0);
    assert_eq!(cfg.pipeline.alerts.max_distance_m, 3.0);
    assert_eq!(cfg.pipeline.alerts.interval, Duration::from_secs(10));
    assert!(cfg.telegram.is_none());

    clear_env();
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "db_path": "guard_prod.db",
            "http": { "addr": "0.0.0.0:9000" },
            "source": {
                "url": "http://192.168.1.20:8080/video",
                "width": 800,
                "height": 600,
                "target_fps": 12,
                "warmup_ms": 500
            },
            "calibration": { "known_width_m": 0.5, "focal_length_px": 700.0 },
            "detection": { "motion_min_area": 800, "alert_min_area": 40000 },
            "alerts": { "max_distance_m": 2.5, "interval_secs": 30, "queue_capacity": 4 },
            "telegram": { "bot_token": "123:abc", "chat_id": "42" }
        }"#,
    );

    std::env::set_var("GUARD_CONFIG", file.path());
    std::env::set_var("GUARD_TARGET_FPS", "15");
    std::env::set_var("GUARD_TELEGRAM_CHAT_ID", "-1001");

    let cfg = GuardConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "guard_prod.db");
    assert_eq!(cfg.http_addr, "0.0.0.0:9000");
    assert_eq!(cfg.source.url, "http://192.168.1.20:8080/video");
    assert_eq!(cfg.source.warmup, Duration::from_millis(500));
    assert_eq!(cfg.pipeline.frame_width, 800);
    assert_eq!(cfg.pipeline.frame_height, 600);
    assert_eq!(cfg.pipeline.target_fps, 15);
    assert_eq!(cfg.pipeline.calibration.known_width_m, 0.5);
    assert_eq!(cfg.pipeline.detection.motion_min_area, 800);
    assert_eq!(cfg.pipeline.detection.alert_min_area, 40_000);
    assert_eq!(cfg.pipeline.alerts.max_distance_m, 2.5);
    assert_eq!(cfg.pipeline.alerts.interval, Duration::from_secs(30));
    assert_eq!(cfg.pipeline.alerts.queue_capacity, 4);
    let telegram = cfg.telegram.expect("telegram settings");
    assert_eq!(telegram.bot_token, "123:abc");
    assert_eq!(telegram.chat_id, "-1001");
    assert_eq!(telegram.api_base, "https://api.telegram.org");

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
db_path = "guard.db"

[source]
url = "stub://yard?frames=10"

[alerts]
max_distance_m = 1.5
interval_secs = 5
"#,
    );
    std::env::set_var("GUARD_CONFIG", file.path());
    std::env::set_var("GUARD_DB_PATH", "override.db");

    let cfg = GuardConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.source.url, "stub://yard?frames=10");
    assert_eq!(cfg.pipeline.alerts.max_distance_m, 1.5);
    assert_eq!(cfg.pipeline.alerts.interval, Duration::from_secs(5));

    clear_env();
}

#[test]
fn telegram_credentials_from_env_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GUARD_TELEGRAM_TOKEN", "999:xyz");
    std::env::set_var("GUARD_TELEGRAM_CHAT_ID", "7");

    let cfg = GuardConfig::load().expect("load config");
    let telegram = cfg.telegram.expect("telegram settings");
    assert_eq!(telegram.bot_token, "999:xyz");
    assert_eq!(telegram.chat_id, "7");
    assert_eq!(telegram.timeout, Duration::from_secs(5));

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("GUARD_TELEGRAM_TOKEN", "999:xyz");
    let err = GuardConfig::load().expect_err("half-configured telegram must fail");
    assert!(err.to_string().contains("bot_token and chat_id"));
    clear_env();

    let file = write_config(
        ".json",
        r#"{ "detection": { "motion_min_area": 60000, "alert_min_area": 50000 } }"#,
    );
    std::env::set_var("GUARD_CONFIG", file.path());
    let err = GuardConfig::load().expect_err("alert gate below noise gate must fail");
    assert!(err.to_string().contains("alert_min_area"));
    clear_env();

    let file = write_config(".json", r#"{ "calibration": { "focal_length_px": 0 } }"#);
    std::env::set_var("GUARD_CONFIG", file.path());
    assert!(GuardConfig::load().is_err());
    clear_env();

    std::env::set_var("GUARD_MAX_DISTANCE_M", "far");
    assert!(GuardConfig::load().is_err());
    clear_env();

    let file = write_config(".json", r#"{ "alerts": { "min_distance_m": 2, "max_distance_m": 1 } }"#);
    std::env::set_var("GUARD_CONFIG", file.path());
    let err = GuardConfig::load().expect_err("inverted safety band must fail");
    assert!(err.to_string().contains("safety band"));
    clear_env();

    for interval in ["-1", "1e20"] {
        let file = write_config(
            ".json",
            &format!(r#"{{ "alerts": {{ "interval_secs": {} }} }}"#, interval),
        );
        std::env::set_var("GUARD_CONFIG", file.path());
        let err = GuardConfig::load().expect_err("out of range cool-down must fail");
        assert!(err.to_string().contains("alerts.interval_secs"), "{}", err);
        clear_env();
    }
}
