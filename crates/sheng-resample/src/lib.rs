//! # sheng-resample
//!
//! Sheng 音频重采样库, 提供:
//! - 采样格式转换 (S16 <-> F32)
//! - 声道数转换 (单声道复制、多声道平均)
//! - 有理数比例的多相 FIR 重采样, 群延迟固定且可预先指定

mod convert;
mod resampler;

pub use convert::{bytes_to_f32, f32_to_bytes, f32_to_s16, mix_channels, s16_to_f32};
pub use resampler::Resampler;
