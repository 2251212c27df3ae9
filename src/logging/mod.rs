//! 日志初始化.
//!
//! 双输出:
//! - console: 彩色, 带源码位置, 级别由 `console_level` 决定, 为空时不输出到终端
//! - file: 无色, 按天滚动, 默认使用 `level`, `SHENG_LOG` 环境变量可覆盖
//!
//! 编解码库通过 `log` 门面输出, 安装订阅器时一并转发到 tracing.
//! 日志文件为 `{directory}/{file_prefix}.{YYYY-MM-DD}.log`, 超过保留天数的文件在初始化时删除.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod retention;

pub use retention::cleanup_expired;

/// 覆盖文件日志级别的环境变量
pub const LOG_ENV: &str = "SHENG_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub console_level: Option<String>,
    pub directory: String,
    pub file_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

impl LoggingConfig {
    /// 命令行工具的默认配置: 日志写入 `logs/`, `verbosity` 0=info, 1=debug, 2+=trace
    pub fn for_cli(file_prefix: &str, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        Self {
            level: level.to_string(),
            console_level: Some("warn".to_string()),
            directory: "logs".to_string(),
            file_prefix: file_prefix.to_string(),
            retention_days: default_retention_days(),
        }
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 安装全局日志订阅器, 进程内只能成功一次
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    match cleanup_expired(&config) {
        Ok(0) => {}
        Ok(removed) => tracing::debug!("删除 {} 个过期日志文件", removed),
        Err(err) => eprintln!("清理过期日志失败: {err:#}"),
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .with_context(|| format!("创建日志文件失败, directory={}", config.directory))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));
    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter::FILE)
        .with_filter(file_filter);

    let console_layer = config.console_level.as_deref().map(|level| {
        fmt::Layer::default()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(LineFormatter::CONSOLE)
            .with_filter(EnvFilter::new(level))
    });

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装全局日志订阅器失败")?;
    LOG_GUARD.set(guard).ok();
    Ok(())
}

/// 当天日志文件的路径
pub fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 单行日志格式
///
/// 终端: `[时:分:秒.毫秒] 级别 文件:行 > 消息`, 级别着色.
/// 文件: `[月-日 时:分:秒.毫秒] 级别 模块 > 消息`, 无色.
struct LineFormatter {
    console: bool,
}

impl LineFormatter {
    const CONSOLE: Self = Self { console: true };
    const FILE: Self = Self { console: false };
}

fn level_color(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::ERROR => "\x1b[31m",
        tracing::Level::WARN => "\x1b[33m",
        tracing::Level::INFO => "\x1b[32m",
        _ => "\x1b[34m",
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        let clock = format!(
            "{:02}:{:02}:{:02}.{:03}",
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        );
        if self.console {
            write!(
                writer,
                "[{clock}] {}{:5}\x1b[0m {}:{} > ",
                level_color(*meta.level()),
                meta.level(),
                meta.file().unwrap_or("unknown"),
                meta.line().unwrap_or(0)
            )?;
        } else {
            write!(
                writer,
                "[{:02}-{:02} {clock}] {:5} {} > ",
                now.month(),
                now.day(),
                meta.level(),
                meta.target()
            )?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
