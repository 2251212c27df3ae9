//! JSON 会话配置.
//!
//! ```json
//! {
//!     "encoder": { "sample_rate": 48000, "channels": 2, "application": "audio",
//!                  "bitrate": { "bits": 64000 }, "frame_duration": "20ms" },
//!     "decoder": { "sample_rate": 48000, "channels": 2, "gain_q8": 0 },
//!     "logging": { "level": "debug", "directory": "logs", "file_prefix": "sheng" }
//! }
//! ```
//! 缺省的字段取默认值.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use sheng_codec::opus::{DecoderConfig, EncoderConfig};

use crate::logging::LoggingConfig;

/// 一次编解码会话的全部配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
    pub logging: Option<LoggingConfig>,
}

impl SessionConfig {
    /// 解析 JSON 并校验
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("解析会话配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取会话配置失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("会话配置无效, path={}", path.display()))
    }

    /// 保存为格式化的 JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("序列化会话配置失败")?;
        fs::write(path, text).with_context(|| format!("写入会话配置失败, path={}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.encoder.validate().context("编码器配置无效")?;
        self.decoder.validate().context("解码器配置无效")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_codec::opus::{Application, Bitrate, FrameDuration};

    #[test]
    fn test_缺省字段取默认值() {
        let config = SessionConfig::from_json(
            r#"{"encoder": {"sample_rate": 16000, "channels": 1, "application": "voip",
                "bitrate": {"bits": 24000}, "frame_duration": "10ms"}}"#,
        );
        assert!(config.is_ok(), "{:?}", config.err());
        let config = config.unwrap_or_default();
        assert_eq!(config.encoder.sample_rate, 16000);
        assert_eq!(config.encoder.application, Application::Voip);
        assert_eq!(config.encoder.bitrate, Bitrate::Bits(24000));
        assert_eq!(config.encoder.frame_duration, FrameDuration::Ms10);
        assert_eq!(config.encoder.complexity, 9);
        assert_eq!(config.decoder, DecoderConfig::default());
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_非法配置被拒绝() {
        let err = SessionConfig::from_json(r#"{"encoder": {"sample_rate": 44100}}"#);
        assert!(err.is_err());
        let err = SessionConfig::from_json(r#"{"decoder": {"channels": 3}}"#);
        assert!(err.is_err());
        assert!(SessionConfig::from_json("{").is_err());
    }

    #[test]
    fn test_保存后重新加载() {
        let dir = match tempfile::TempDir::new() {
            Ok(dir) => dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let path = dir.path().join("session.json");
        let mut config = SessionConfig::default();
        config.encoder.bitrate = Bitrate::Max;
        config.logging = Some(LoggingConfig::for_cli("sheng", 1));
        assert!(config.save(&path).is_ok());
        let loaded = SessionConfig::load(&path);
        assert!(loaded.is_ok(), "{:?}", loaded.err());
        assert_eq!(loaded.unwrap_or_default(), config);
    }
}
