//! # sheng-codec
//!
//! Sheng 音频编解码器库, 提供 Opus 风格的低延迟编解码核心与 Packet/Frame 抽象.
//!
//! - [`opus`]: 编解码会话 (`OpusEncoder` / `OpusDecoder`)、模式控制、数据包封装、多流
//! - 编解码器框架: `Encoder` / `Decoder` trait 与按 `CodecId` 查找的注册表
//!
//! ## 使用示例
//!
//! ```rust
//! use sheng_codec::opus::{Application, DecoderConfig, EncoderConfig, OpusDecoder, OpusEncoder};
//!
//! let mut enc = OpusEncoder::new(EncoderConfig::new(48000, 1, Application::Audio)).unwrap();
//! let mut dec = OpusDecoder::new(DecoderConfig::new(48000, 1)).unwrap();
//!
//! let pcm = vec![0.0f32; enc.frame_samples()];
//! let packet = enc.encode(&pcm).unwrap();
//! let out = dec.decode(Some(&packet)).unwrap();
//! assert_eq!(out.len(), pcm.len());
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod encoder;
pub mod encoders;
pub mod frame;
pub mod opus;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{AudioCodecParams, CodecParameters, CodecParamsType};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use frame::{AudioFrame, Frame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置编解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
    encoders::register_all_encoders(registry);
}
