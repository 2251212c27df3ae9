//! # sheng-core
//!
//! Sheng 音频编解码核心库, 提供错误类型、比特流读写、区间编码器等底层设施.
//!
//! 上层的编解码器 crate 只依赖这里的类型, 本 crate 不做任何 I/O.

pub mod bitreader;
pub mod bitwriter;
pub mod channel_layout;
pub mod error;
pub mod range_coder;
pub mod sample_format;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use error::{ShengError, ShengResult};
pub use range_coder::{RangeDecoder, RangeEncoder};
pub use sample_format::SampleFormat;
