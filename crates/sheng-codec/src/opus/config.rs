//! 编解码会话配置.

use serde::{Deserialize, Serialize};
use sheng_core::{ShengError, ShengResult};

use super::{Application, Bandwidth, Bitrate, FrameDuration, Mode, Signal, is_valid_sample_rate};

/// 编码器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数 (1 或 2)
    pub channels: u8,
    /// 应用类型
    pub application: Application,
    /// 复杂度 0-10
    pub complexity: u8,
    /// 目标码率
    pub bitrate: Bitrate,
    /// 帧长
    pub frame_duration: FrameDuration,
    /// 可变码率
    pub vbr: bool,
    /// 信号类型提示
    pub signal: Signal,
    /// 允许的最大带宽
    pub max_bandwidth: Bandwidth,
    /// 强制编码模式 (测试与调试用)
    pub force_mode: Option<Mode>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new(48000, 2, Application::Audio)
    }
}

impl EncoderConfig {
    /// 以默认参数创建配置
    pub fn new(sample_rate: u32, channels: u8, application: Application) -> Self {
        Self {
            sample_rate,
            channels,
            application,
            complexity: 9,
            bitrate: Bitrate::Auto,
            frame_duration: FrameDuration::Ms20,
            vbr: true,
            signal: Signal::Auto,
            max_bandwidth: Bandwidth::Full,
            force_mode: None,
        }
    }

    /// 每帧每声道的采样数
    pub fn frame_samples(&self) -> usize {
        self.frame_duration.samples(self.sample_rate)
    }

    /// 检查参数范围
    pub fn validate(&self) -> ShengResult<()> {
        if !is_valid_sample_rate(self.sample_rate) {
            return Err(ShengError::InvalidConfig(format!(
                "不支持的采样率: {}",
                self.sample_rate
            )));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(ShengError::InvalidConfig(format!(
                "声道数必须为 1 或 2, 实际为 {}",
                self.channels
            )));
        }
        if self.complexity > 10 {
            return Err(ShengError::InvalidConfig(format!(
                "复杂度必须在 0-10 之间, 实际为 {}",
                self.complexity
            )));
        }
        if let Bitrate::Bits(bits) = self.bitrate {
            if !(500..=512_000).contains(&bits) {
                return Err(ShengError::InvalidConfig(format!(
                    "码率 {bits} bits/s 超出 500-512000 范围"
                )));
            }
        }
        if let Some(mode) = self.force_mode {
            if mode == Mode::Hybrid && self.sample_rate < 24000 {
                return Err(ShengError::InvalidConfig(format!(
                    "{} Hz 下无法使用混合模式",
                    self.sample_rate
                )));
            }
            if mode.has_voice() && self.application == Application::LowDelay {
                return Err(ShengError::InvalidConfig(
                    "低延迟应用只能使用音乐模式".into(),
                ));
            }
        }
        Ok(())
    }
}

/// 解码器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 输出采样率 (Hz)
    pub sample_rate: u32,
    /// 输出声道数 (1 或 2)
    pub channels: u8,
    /// 输出增益, Q8 dB
    pub gain_q8: i16,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new(48000, 2)
    }
}

impl DecoderConfig {
    /// 以默认参数创建配置
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            gain_q8: 0,
        }
    }

    /// 检查参数范围
    pub fn validate(&self) -> ShengResult<()> {
        if !is_valid_sample_rate(self.sample_rate) {
            return Err(ShengError::InvalidConfig(format!(
                "不支持的采样率: {}",
                self.sample_rate
            )));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err(ShengError::InvalidConfig(format!(
                "声道数必须为 1 或 2, 实际为 {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// 线性输出增益
    pub fn linear_gain(&self) -> f32 {
        10f32.powf(f32::from(self.gain_q8) / (20.0 * 256.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_配置校验() {
        let cfg = EncoderConfig::new(48000, 2, Application::Audio);
        assert!(cfg.validate().is_ok());
        assert!(matches!(
            EncoderConfig::new(44100, 2, Application::Audio).validate(),
            Err(ShengError::InvalidConfig(_))
        ));
        let mut cfg = EncoderConfig::new(16000, 1, Application::Voip);
        cfg.complexity = 11;
        assert!(cfg.validate().is_err());
        cfg.complexity = 5;
        cfg.force_mode = Some(Mode::Hybrid);
        assert!(cfg.validate().is_err());
        assert!(DecoderConfig::new(16000, 3).validate().is_err());
    }

    #[test]
    fn test_配置反序列化() {
        let json = r#"{
            "sample_rate": 16000,
            "channels": 1,
            "application": "voip",
            "bitrate": {"bits": 16000},
            "frame_duration": "10ms"
        }"#;
        let cfg: EncoderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.sample_rate, 16000);
        assert_eq!(cfg.bitrate, Bitrate::Bits(16000));
        assert_eq!(cfg.frame_duration, FrameDuration::Ms10);
        assert_eq!(cfg.complexity, 9);
        assert!(cfg.vbr);
    }

    #[test]
    fn test_解码增益() {
        let mut cfg = DecoderConfig::new(48000, 1);
        assert!((cfg.linear_gain() - 1.0).abs() < 1e-6);
        cfg.gain_q8 = 6 * 256;
        assert!((cfg.linear_gain() - 1.995).abs() < 0.01);
    }
}
