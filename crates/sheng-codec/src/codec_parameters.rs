//! 编解码器参数.
//!
//! 通过注册表创建的编解码器在 `open` 时读取这些参数. 解码器的
//! `extra_data` 为 OpusHead 记录, 为空时按单流 family 0 处理.

use sheng_core::{ChannelLayout, SampleFormat};

use crate::codec_id::CodecId;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub codec_id: CodecId,
    /// 额外数据 (OpusHead 等)
    pub extra_data: Vec<u8>,
    /// 码率 (bits/s, 0 表示自动)
    pub bit_rate: u64,
    /// 媒体类型特定参数
    pub params: CodecParamsType,
}

/// 媒体类型特定参数
#[derive(Debug, Clone)]
pub enum CodecParamsType {
    Audio(AudioCodecParams),
    /// 未携带媒体参数, 编解码器 `open` 会拒绝
    None,
}

/// 音频编解码器参数
#[derive(Debug, Clone)]
pub struct AudioCodecParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 采样格式
    pub sample_format: SampleFormat,
    /// 每帧采样数 (0 表示使用默认帧长)
    pub frame_size: u32,
}

impl CodecParameters {
    /// Opus 音频流参数, `bit_rate` 为 0 表示由编码器按声道数决定
    pub fn opus_audio(
        sample_rate: u32,
        channels: u32,
        sample_format: SampleFormat,
        frame_size: u32,
    ) -> Self {
        Self {
            codec_id: CodecId::Opus,
            extra_data: Vec::new(),
            bit_rate: 0,
            params: CodecParamsType::Audio(AudioCodecParams {
                sample_rate,
                channel_layout: ChannelLayout::from_channels(channels),
                sample_format,
                frame_size,
            }),
        }
    }

    /// 音频参数, 非音频流返回 None
    pub fn audio(&self) -> Option<&AudioCodecParams> {
        match &self.params {
            CodecParamsType::Audio(a) => Some(a),
            CodecParamsType::None => None,
        }
    }
}
