//! 编码与解码共用的符号读写接口.
//!
//! 码流语法只写一遍: 编码时 `SymbolCoder::Encoder` 写入给定的值并返回实际写入的值,
//! 解码时 `SymbolCoder::Decoder` 忽略传入的值并返回读出的值. 两端因此执行完全相同的
//! 控制流, 由 `tell_frac` 驱动的比特分配在两端也一定一致.

use sheng_core::{RangeDecoder, RangeEncoder, ShengResult};

use super::laplace;

/// 区间编码器或解码器
#[derive(Debug)]
pub enum SymbolCoder<'a, 'b> {
    /// 写入
    Encoder(&'a mut RangeEncoder),
    /// 读取
    Decoder(&'a mut RangeDecoder<'b>),
}

impl SymbolCoder<'_, '_> {
    /// 是否为编码端
    pub fn is_encoder(&self) -> bool {
        matches!(self, Self::Encoder(_))
    }

    /// 已使用的位数, 精度 1/8 位
    pub fn tell_frac(&self) -> u32 {
        match self {
            Self::Encoder(e) => e.tell_frac(),
            Self::Decoder(d) => d.tell_frac(),
        }
    }

    /// 已使用的整数位数
    pub fn tell(&self) -> u32 {
        match self {
            Self::Encoder(e) => e.tell(),
            Self::Decoder(d) => d.tell(),
        }
    }

    /// 存储大小 (字节)
    pub fn storage(&self) -> usize {
        match self {
            Self::Encoder(e) => e.storage(),
            Self::Decoder(d) => d.storage(),
        }
    }

    /// 概率为 `2^-logp` 的二值符号
    pub fn bit_logp(&mut self, bit: bool, logp: u32) -> bool {
        match self {
            Self::Encoder(e) => {
                e.encode_bit_logp(bit, logp);
                bit
            }
            Self::Decoder(d) => d.decode_bit_logp(logp),
        }
    }

    /// 逆累计分布表符号
    pub fn icdf(&mut self, sym: usize, icdf: &[u8], ftb: u32) -> usize {
        match self {
            Self::Encoder(e) => {
                e.encode_icdf(sym, icdf, ftb);
                sym
            }
            Self::Decoder(d) => d.decode_icdf(icdf, ftb),
        }
    }

    /// `[0, ft)` 内的均匀整数
    pub fn uint(&mut self, value: u32, ft: u32) -> ShengResult<u32> {
        match self {
            Self::Encoder(e) => {
                e.encode_uint(value, ft);
                Ok(value)
            }
            Self::Decoder(d) => d.decode_uint(ft),
        }
    }

    /// 原始比特
    pub fn raw_bits(&mut self, value: u32, bits: u32) -> u32 {
        match self {
            Self::Encoder(e) => {
                e.encode_raw_bits(value, bits);
                value
            }
            Self::Decoder(d) => d.decode_raw_bits(bits),
        }
    }

    /// 拉普拉斯分布整数, 编码端返回截断后的值
    pub fn laplace(&mut self, value: i32, fs: u32, decay: u32) -> i32 {
        match self {
            Self::Encoder(e) => laplace::encode_laplace(e, value, fs, decay),
            Self::Decoder(d) => laplace::decode_laplace(d, fs, decay),
        }
    }
}
