use super::LoggingConfig;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use std::fs;
use std::path::Path;

/// 删除早于保留期限的日志文件, 返回删除的文件数
pub fn cleanup_expired(config: &LoggingConfig) -> Result<usize> {
    let today = Local::now().date_naive();
    cleanup_before(config, today - ChronoDuration::days(config.retention_days))
}

fn cleanup_before(config: &LoggingConfig, cutoff: NaiveDate) -> Result<usize> {
    let directory = Path::new(&config.directory);
    if !directory.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    let entries = fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败, path={}", directory.display()))?;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(date) = parse_log_name(&file_name, &config.file_prefix) else {
            continue;
        };
        if date < cutoff {
            fs::remove_file(entry.path())
                .with_context(|| format!("删除过期日志失败, path={}", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn parse_log_name(file_name: &str, prefix: &str) -> Option<NaiveDate> {
    let date_part = file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(".log")?;
    if date_part.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_解析日志文件名() {
        assert_eq!(
            parse_log_name("sheng.2026-02-06.log", "sheng"),
            NaiveDate::from_ymd_opt(2026, 2, 6)
        );
        assert!(parse_log_name("sheng.log", "sheng").is_none());
        assert!(parse_log_name("other.2026-02-06.log", "sheng").is_none());
        assert!(parse_log_name("sheng.2026-2-6.log", "sheng").is_none());
    }

    #[test]
    fn test_只删除过期文件() {
        let temp_dir = match TempDir::new() {
            Ok(temp_dir) => temp_dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let config = LoggingConfig {
            level: "info".to_string(),
            console_level: None,
            directory: temp_dir.path().to_string_lossy().to_string(),
            file_prefix: "sheng".to_string(),
            retention_days: 7,
        };
        for name in [
            "sheng.2026-01-01.log",
            "sheng.2026-01-20.log",
            "unrelated.2020-01-01.log",
        ] {
            if let Err(err) = fs::write(temp_dir.path().join(name), b"x") {
                panic!("写入测试文件失败: {}", err);
            }
        }

        let cutoff = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap_or_default();
        let removed = cleanup_before(&config, cutoff);
        assert!(removed.is_ok(), "清理失败: {:?}", removed.err());
        assert_eq!(removed.unwrap_or(0), 1);
        assert!(!temp_dir.path().join("sheng.2026-01-01.log").exists());
        assert!(temp_dir.path().join("sheng.2026-01-20.log").exists());
        assert!(temp_dir.path().join("unrelated.2020-01-01.log").exists());
    }
}
