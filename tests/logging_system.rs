use chrono::{Datelike, Duration, Local};
use std::fs;
use std::path::PathBuf;
use sheng::logging::{LoggingConfig, build_current_log_path, cleanup_expired, init};

// 注意: tracing 的全局订阅器只能初始化一次,
// 涉及 init() 的测试必须单独运行, 因此标记为 #[ignore]

/// 测试专用的日志目录
fn test_log_dir(test_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sheng_test_logs_{test_name}"))
}

fn cleanup_test_logs(test_name: &str) {
    let log_dir = test_log_dir(test_name);
    if log_dir.exists() {
        let _ = fs::remove_dir_all(&log_dir);
    }
}

fn config(test_name: &str, level: &str, prefix: &str) -> LoggingConfig {
    LoggingConfig {
        level: level.to_string(),
        console_level: None,
        directory: test_log_dir(test_name).to_string_lossy().to_string(),
        file_prefix: prefix.to_string(),
        retention_days: 7,
    }
}

#[test]
#[ignore] // 需要单独运行: cargo test --test logging_system test_logging_file_content -- --ignored
fn test_logging_file_content() {
    let test_name = "file_content";
    cleanup_test_logs(test_name);

    init(config(test_name, "info", "content-test")).expect("日志初始化失败");

    tracing::error!("错误日志_ERROR_MSG");
    tracing::info!("编码器初始化: 48000 Hz 2 声道");
    tracing::debug!("调试日志_DEBUG_MSG");

    // 等待后台写线程落盘
    std::thread::sleep(std::time::Duration::from_millis(200));

    let log_file = build_current_log_path(
        &test_log_dir(test_name),
        "content-test",
        Local::now().date_naive(),
    );
    let content = fs::read_to_string(&log_file)
        .unwrap_or_else(|e| panic!("读取日志文件失败: {log_file:?}, 错误: {e}"));

    assert!(content.contains("错误日志_ERROR_MSG"));
    assert!(content.contains("编码器初始化: 48000 Hz 2 声道"));
    assert!(content.contains("INFO"));
    // debug 低于配置级别, 被过滤
    assert!(!content.contains("调试日志_DEBUG_MSG"));

    cleanup_test_logs(test_name);
}

#[test]
fn test_logging_file_naming_format() {
    let today = Local::now().date_naive();
    for prefix in ["sheng", "sheng-cli"] {
        let path = build_current_log_path(&test_log_dir("naming"), prefix, today);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("{prefix}.")));
        assert!(name.ends_with(".log"));
        assert!(name.contains(&today.year().to_string()));
    }
}

#[test]
fn test_logging_retention_cleanup() {
    let test_name = "retention";
    cleanup_test_logs(test_name);
    let dir = test_log_dir(test_name);
    fs::create_dir_all(&dir).unwrap();

    let today = Local::now().date_naive();
    let old = build_current_log_path(&dir, "keep-test", today - Duration::days(10));
    let recent = build_current_log_path(&dir, "keep-test", today - Duration::days(2));
    let other = build_current_log_path(&dir, "other", today - Duration::days(30));
    for path in [&old, &recent, &other] {
        fs::write(path, "log").unwrap();
    }

    let removed = cleanup_expired(&config(test_name, "info", "keep-test")).unwrap();
    assert_eq!(removed, 1);
    assert!(!old.exists());
    assert!(recent.exists());
    // 其他前缀的文件不受影响
    assert!(other.exists());

    cleanup_test_logs(test_name);
}

#[test]
fn test_logging_config_defaults() {
    let config: LoggingConfig = serde_json::from_str(
        r#"{ "level": "debug", "directory": "logs", "file_prefix": "sheng" }"#,
    )
    .unwrap();
    assert_eq!(config.retention_days, 30, "默认保留天数应该是 30");
    assert!(config.console_level.is_none());

    let cli = LoggingConfig::for_cli("sheng-cli", 2);
    assert_eq!(cli.level, "trace");
    assert_eq!(cli.console_level.as_deref(), Some("warn"));
}
