//! 比特流写入器.
//!
//! 与 [`BitReader`](crate::bitreader::BitReader) 对应, 按 MSB first 写入.
//! 组包器和 OpusHead 序列化都用它生成头部字节. 可以设定容量上限,
//! 超限的写入返回 [`ShengError::Overflow`] 且不改变已写内容.

use crate::{ShengError, ShengResult};

/// 比特流写入器
///
/// # 示例
/// ```
/// use sheng_core::bitwriter::BitWriter;
///
/// // TOC: config=1, 单声道, code 2, 随后是 1 字节帧长度
/// let mut bw = BitWriter::new();
/// bw.write_bits(1, 5).unwrap();
/// bw.write_bits(0, 1).unwrap();
/// bw.write_bits(2, 2).unwrap();
/// bw.write_bits(40, 8).unwrap();
/// assert_eq!(bw.finish(), vec![0x0A, 40]);
/// ```
#[derive(Default)]
pub struct BitWriter {
    data: Vec<u8>,
    /// 尚未凑满一字节的位, 右对齐
    pending: u32,
    /// `pending` 中的有效位数 (0-7)
    pending_bits: u32,
    /// 容量上限 (字节)
    limit: Option<usize>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 容量固定为 `capacity` 字节的写入器
    pub fn with_limit(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            limit: Some(capacity),
            ..Self::default()
        }
    }

    /// 已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.pending_bits as usize
    }

    /// 剩余可写位数, 不限容量时为 None
    pub fn bits_remaining(&self) -> Option<usize> {
        self.limit
            .map(|cap| (cap * 8).saturating_sub(self.bits_written()))
    }

    fn ensure_room(&self, n: usize) -> ShengResult<()> {
        match self.bits_remaining() {
            Some(room) if n > room => Err(ShengError::Overflow(format!(
                "需要写入 {n} 位, 容量只剩 {room} 位"
            ))),
            _ => Ok(()),
        }
    }

    /// 写入值的低 N 位 (最多 32 位), 高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) -> ShengResult<()> {
        if n > 32 {
            return Err(ShengError::InvalidArgument(format!(
                "write_bits: n={n} 超过 32 位"
            )));
        }
        self.ensure_room(n as usize)?;
        let masked = u64::from(value) & ((1u64 << n) - 1);
        let mut acc = (u64::from(self.pending) << n) | masked;
        let mut bits = self.pending_bits + n;
        while bits >= 8 {
            bits -= 8;
            self.data.push((acc >> bits) as u8);
        }
        acc &= (1u64 << bits) - 1;
        self.pending = acc as u32;
        self.pending_bits = bits;
        Ok(())
    }

    /// 写入二进制补码有符号整数
    pub fn write_bits_signed(&mut self, value: i32, n: u32) -> ShengResult<()> {
        self.write_bits(value as u32, n)
    }

    /// 写入完整字节
    pub fn write_bytes(&mut self, bytes: &[u8]) -> ShengResult<()> {
        self.ensure_room(bytes.len() * 8)?;
        if self.pending_bits == 0 {
            self.data.extend_from_slice(bytes);
            return Ok(());
        }
        bytes
            .iter()
            .try_for_each(|&b| self.write_bits(u32::from(b), 8))
    }

    /// 写入小端 16 位整数
    pub fn write_u16_le(&mut self, value: u16) -> ShengResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// 写入小端 32 位整数
    pub fn write_u32_le(&mut self, value: u32) -> ShengResult<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// 完成写入, 不足一字节的部分用 0 补齐
    pub fn finish(mut self) -> Vec<u8> {
        if self.pending_bits > 0 {
            self.data
                .push((self.pending << (8 - self.pending_bits)) as u8);
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_两字节帧长度编码() {
        // 长度 700 = 252 + (700 & 3) + 4 * 112
        let mut bw = BitWriter::new();
        bw.write_bits(252, 8).unwrap();
        bw.write_bits(112, 8).unwrap();
        assert_eq!(bw.bits_written(), 16);
        assert_eq!(bw.finish(), vec![252, 112]);
    }

    #[test]
    fn test_跨字节写入与补零() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b101, 3).unwrap();
        bw.write_bits(0xFF00_FF00, 32).unwrap();
        bw.write_bits(0b1, 1).unwrap();
        // 101 + FF00FF00 + 1 + 0000 补齐
        assert_eq!(bw.finish(), vec![0xBF, 0xE0, 0x1F, 0xE0, 0x10]);
    }

    #[test]
    fn test_位宽超过32返回参数错误() {
        let mut bw = BitWriter::new();
        assert!(matches!(
            bw.write_bits(0, 33),
            Err(ShengError::InvalidArgument(_))
        ));
        assert_eq!(bw.bits_written(), 0);
    }

    #[test]
    fn test_超出容量返回溢出错误() {
        let mut bw = BitWriter::with_limit(2);
        bw.write_bits(0b101, 3).unwrap();
        let err = bw.write_u16_le(0xFFFF).unwrap_err();
        assert!(matches!(err, ShengError::Overflow(_)));
        assert_eq!(bw.bits_remaining(), Some(13));
        bw.write_bits(0x1FFF, 13).unwrap();
        assert!(matches!(bw.write_bits(1, 1), Err(ShengError::Overflow(_))));
        assert_eq!(bw.finish(), vec![0xBF, 0xFF]);
    }

    #[test]
    fn test_未对齐的字节写入() {
        let mut bw = BitWriter::new();
        bw.write_bits(0xF, 4).unwrap();
        bw.write_u16_le(0x1234).unwrap();
        bw.write_bits(0, 4).unwrap();
        assert_eq!(bw.finish(), vec![0xF3, 0x41, 0x20]);
    }

    #[test]
    fn test_与读取器配对() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b10110, 5).unwrap();
        bw.write_bits_signed(-3, 4).unwrap();
        bw.write_bits(0, 7).unwrap();
        bw.write_u16_le(0x1234).unwrap();
        bw.write_u32_le(48000).unwrap();
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(5).unwrap(), 0b10110);
        assert_eq!(br.read_bits_signed(4).unwrap(), -3);
        assert_eq!(br.read_bits(7).unwrap(), 0);
        assert_eq!(br.read_u16_le().unwrap(), 0x1234);
        assert_eq!(br.read_u32_le().unwrap(), 48000);
    }
}
