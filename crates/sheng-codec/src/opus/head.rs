//! 编解码器配置记录 (OpusHead).
//!
//! 布局 (小端):
//! ```text
//! "OpusHead" | version u8 | channels u8 | pre_skip u16 | input_rate u32
//! | output_gain i16 (Q8 dB) | family u8 | [streams u8 | coupled u8 | mapping[channels]]
//! ```
//! 映射族 0 不带映射表, 隐含单流.

use sheng_core::bitreader::BitReader;
use sheng_core::bitwriter::BitWriter;
use sheng_core::{ShengError, ShengResult};

use super::multistream::StreamMapping;

/// 记录开头的魔数
pub const MAGIC: &[u8; 8] = b"OpusHead";

/// 当前版本
pub const VERSION: u8 = 1;

/// 预跳过与码流时间都以 48 kHz 计
pub const GRANULE_RATE: u32 = 48000;

/// 配置记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    /// 解码开头需丢弃的采样数 (48 kHz)
    pub pre_skip: u16,
    /// 原始输入采样率, 仅供参考
    pub input_sample_rate: u32,
    /// 输出增益, Q8 dB
    pub output_gain: i16,
    pub mapping: StreamMapping,
}

impl OpusHead {
    pub fn new(mapping: StreamMapping, input_sample_rate: u32, pre_skip: u16) -> Self {
        Self {
            version: VERSION,
            pre_skip,
            input_sample_rate,
            output_gain: 0,
            mapping,
        }
    }

    /// 由编码器前视长度换算预跳过
    pub fn pre_skip_for(lookahead: usize, sample_rate: u32) -> u16 {
        (lookahead as u64 * u64::from(GRANULE_RATE) / u64::from(sample_rate.max(1))) as u16
    }

    /// 输出声道数
    pub fn channels(&self) -> usize {
        self.mapping.channels()
    }

    /// 解析配置记录
    pub fn parse(data: &[u8]) -> ShengResult<Self> {
        let mut br = BitReader::new(data);
        if br.read_bytes(MAGIC.len())? != MAGIC {
            return Err(ShengError::CorruptStream("配置记录缺少 OpusHead 标识".into()));
        }
        let version = br.read_bits(8)? as u8;
        if version >> 4 != 0 {
            return Err(ShengError::Unsupported(format!("不支持的配置记录版本 {version}")));
        }
        let channels = br.read_bits(8)? as usize;
        let pre_skip = br.read_u16_le()?;
        let input_sample_rate = br.read_u32_le()?;
        let output_gain = br.read_u16_le()? as i16;
        let family = br.read_bits(8)? as u8;

        let mapping = if family == 0 {
            StreamMapping::for_family(0, channels)?
        } else {
            let streams = br.read_bits(8)? as u8;
            let coupled = br.read_bits(8)? as u8;
            let table = br.read_bytes(channels)?.to_vec();
            StreamMapping::new(family, streams, coupled, table)?
        };
        Ok(Self {
            version,
            pre_skip,
            input_sample_rate,
            output_gain,
            mapping,
        })
    }

    /// 写出配置记录
    pub fn to_bytes(&self) -> ShengResult<Vec<u8>> {
        let channels = self.mapping.channels();
        if channels > 255 {
            return Err(ShengError::InvalidMapping(format!("声道数 {channels} 超过 255")));
        }
        let mut bw = BitWriter::new();
        bw.write_bytes(MAGIC)?;
        bw.write_bits(u32::from(self.version), 8)?;
        bw.write_bits(channels as u32, 8)?;
        bw.write_u16_le(self.pre_skip)?;
        bw.write_u32_le(self.input_sample_rate)?;
        bw.write_u16_le(self.output_gain as u16)?;
        bw.write_bits(u32::from(self.mapping.family), 8)?;
        if self.mapping.family != 0 {
            bw.write_bits(u32::from(self.mapping.streams), 8)?;
            bw.write_bits(u32::from(self.mapping.coupled_streams), 8)?;
            bw.write_bytes(&self.mapping.mapping)?;
        }
        Ok(bw.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_立体声记录布局() {
        let mut head = OpusHead::new(StreamMapping::for_family(0, 2).unwrap(), 44100, 312);
        head.output_gain = -256;
        let bytes = head.to_bytes().unwrap();
        assert_eq!(bytes.len(), 19);
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(&bytes[8..12], &[1, 2, 0x38, 0x01]);
        assert_eq!(&bytes[12..16], &44100u32.to_le_bytes());
        assert_eq!(&bytes[16..18], &[0x00, 0xFF]);
        assert_eq!(OpusHead::parse(&bytes).unwrap(), head);
    }

    #[test]
    fn test_环绕声映射表() {
        let head = OpusHead::new(StreamMapping::for_family(1, 6).unwrap(), 48000, 120);
        let bytes = head.to_bytes().unwrap();
        assert_eq!(bytes.len(), 21 + 6);
        assert_eq!(&bytes[19..21], &[4, 2]);
        let parsed = OpusHead::parse(&bytes).unwrap();
        assert_eq!(parsed.channels(), 6);
        assert_eq!(parsed.mapping.mapping, vec![0, 4, 1, 2, 3, 5]);
    }

    #[test]
    fn test_无效记录() {
        assert!(matches!(
            OpusHead::parse(b"OpusTags\x01\x02"),
            Err(ShengError::CorruptStream(_))
        ));
        let mut bytes = OpusHead::new(StreamMapping::for_family(0, 1).unwrap(), 16000, 0)
            .to_bytes()
            .unwrap();
        bytes[9] = 3;
        assert!(matches!(OpusHead::parse(&bytes), Err(ShengError::InvalidMapping(_))));
        bytes[9] = 1;
        bytes[8] = 0x10;
        assert!(matches!(OpusHead::parse(&bytes), Err(ShengError::Unsupported(_))));
        assert!(OpusHead::parse(&bytes[..12]).is_err());
        assert_eq!(OpusHead::pre_skip_for(40, 16000), 120);
    }
}
