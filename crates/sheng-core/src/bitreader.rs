//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从字节切片读取, 数据包的 TOC 字节、帧计数字节
//! 以及 OpusHead 配置记录都通过它解析. 多字节整数字段为小端.

use crate::{ShengError, ShengResult};

/// 比特流读取器
///
/// 读取失败时位置不变, 调用方可以据此判断数据包在哪个字段截断.
///
/// # 示例
/// ```
/// use sheng_core::bitreader::BitReader;
///
/// // TOC: config=31, stereo, code 3
/// let data = [0b1111_1111, 0x83];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(5).unwrap(), 31);
/// assert_eq!(br.read_bit().unwrap(), 1);
/// assert_eq!(br.read_bits(2).unwrap(), 3);
/// assert_eq!(br.read_bits(8).unwrap() & 0x3F, 3);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 已消耗的位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// 当前字节位置 (未对齐时指向正在读取的字节)
    pub fn byte_position(&self) -> usize {
        self.pos / 8
    }

    fn truncated(&self, wanted: usize) -> ShengError {
        ShengError::TruncatedStream(format!(
            "需要 {} 位, 剩余 {} 位 (位置 {})",
            wanted,
            self.bits_left(),
            self.pos,
        ))
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> ShengResult<u32> {
        self.read_bits(1)
    }

    /// 读取 N 个位 (最多 32 位), 返回值的低 N 位有效
    pub fn read_bits(&mut self, n: u32) -> ShengResult<u32> {
        if n > 32 {
            return Err(ShengError::InvalidArgument(format!(
                "read_bits: n={n} 超过 32 位"
            )));
        }
        let n = n as usize;
        if n > self.bits_left() {
            return Err(self.truncated(n));
        }

        // 把覆盖的字节装入 64 位窗口后一次截取
        let first = self.pos / 8;
        let last = (self.pos + n).div_ceil(8);
        let window = self.data[first..last]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let tail = last * 8 - (self.pos + n);
        let mask = (1u64 << n) - 1;
        self.pos += n;
        Ok(((window >> tail) & mask) as u32)
    }

    /// 读取二进制补码有符号整数
    pub fn read_bits_signed(&mut self, n: u32) -> ShengResult<i32> {
        let raw = self.read_bits(n)?;
        if n == 0 || n >= 32 {
            return Ok(raw as i32);
        }
        let shift = 32 - n;
        Ok(((raw << shift) as i32) >> shift)
    }

    /// 从当前位置取出原始字节切片, 仅在字节对齐时可用
    pub fn read_bytes(&mut self, n: usize) -> ShengResult<&'a [u8]> {
        if self.pos % 8 != 0 {
            return Err(ShengError::InvalidArgument("read_bytes 需要字节对齐".into()));
        }
        let start = self.pos / 8;
        let slice = self
            .data
            .get(start..start + n)
            .ok_or_else(|| self.truncated(n * 8))?;
        self.pos += n * 8;
        Ok(slice)
    }

    /// 读取小端 16 位整数
    pub fn read_u16_le(&mut self) -> ShengResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// 读取小端 32 位整数
    pub fn read_u32_le(&mut self) -> ShengResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
