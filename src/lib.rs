//! # Sheng (笙)
//!
//! 纯 Rust 实现的低延迟音频编解码器.
//!
//! 编码器按信号内容与码率在语音 (线性预测)、混合、音乐 (变换) 三种模式间切换,
//! 数据包格式与 Opus 的 TOC/帧封装一致:
//! - **编解码**: `OpusEncoder` / `OpusDecoder`, 8-48 kHz, 2.5-60 ms 帧
//! - **多流**: 环绕声与 Ambisonics 的声道映射
//! - **重采样**: 语音路径内部采样率与外部采样率之间的固定延迟转换
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sheng::codec::opus::{Application, DecoderConfig, EncoderConfig, OpusDecoder, OpusEncoder};
//!
//! let mut enc = OpusEncoder::new(EncoderConfig::new(48000, 2, Application::Audio)).unwrap();
//! let mut dec = OpusDecoder::new(DecoderConfig::new(48000, 2)).unwrap();
//! let packet = enc.encode(&vec![0.0; 960 * 2]).unwrap();
//! let pcm = dec.decode(Some(&packet)).unwrap();
//! // 丢包时传入 None
//! let concealed = dec.decode(None).unwrap();
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `sheng-core` | 错误类型、比特流读写、区间编码器 |
//! | `sheng-codec` | 编解码核心与编解码器框架 |
//! | `sheng-resample` | 采样格式转换与重采样 |

pub mod config;
pub mod logging;
pub mod stream;

/// 核心类型与工具
pub use sheng_core as core;

/// 编解码器
pub use sheng_codec as codec;

/// 重采样与采样格式转换
pub use sheng_resample as resample;

/// 获取 Sheng 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置编解码器的注册表
pub fn default_codec_registry() -> sheng_codec::CodecRegistry {
    let mut registry = sheng_codec::CodecRegistry::new();
    sheng_codec::register_all(&mut registry);
    registry
}
