//! 数据包流文件.
//!
//! 命令行工具在编码与解码之间传递数据包的简单容器:
//! ```text
//! "SHENGPKT" | head_len u16 | OpusHead | { len u16 | packet }*
//! ```
//! 整数均为小端. `len == 0` 表示该位置的数据包丢失.

use anyhow::{Context, Result, bail, ensure};
use std::io::{ErrorKind, Read, Write};

use sheng_codec::opus::head::OpusHead;

/// 文件开头的魔数
pub const STREAM_MAGIC: &[u8; 8] = b"SHENGPKT";

/// 单个数据包的长度上限, 容纳多流数据包
pub const MAX_STREAM_PACKET: usize = u16::MAX as usize;

/// 流中的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPacket {
    Data(Vec<u8>),
    Lost,
}

/// 数据包流写入器
pub struct PacketWriter<W: Write> {
    inner: W,
    packets: usize,
    bytes: usize,
}

impl<W: Write> PacketWriter<W> {
    /// 写入文件头
    pub fn new(mut inner: W, head: &OpusHead) -> Result<Self> {
        let head = head.to_bytes().context("生成配置记录失败")?;
        inner.write_all(STREAM_MAGIC)?;
        inner.write_all(&(head.len() as u16).to_le_bytes())?;
        inner.write_all(&head)?;
        Ok(Self {
            inner,
            packets: 0,
            bytes: 0,
        })
    }

    /// 写入一个数据包, `None` 记录为丢包
    pub fn write_packet(&mut self, packet: Option<&[u8]>) -> Result<()> {
        let data = packet.unwrap_or_default();
        ensure!(
            data.len() <= MAX_STREAM_PACKET,
            "数据包 {} 字节超过流格式上限",
            data.len()
        );
        ensure!(packet.is_none() || !data.is_empty(), "不能写入空数据包");
        self.inner.write_all(&(data.len() as u16).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.packets += 1;
        self.bytes += data.len();
        Ok(())
    }

    /// 已写入的数据包数与负载字节数
    pub fn stats(&self) -> (usize, usize) {
        (self.packets, self.bytes)
    }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// 数据包流读取器
pub struct PacketReader<R: Read> {
    inner: R,
    head: OpusHead,
}

impl<R: Read> PacketReader<R> {
    /// 读取并校验文件头
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        inner.read_exact(&mut magic).context("读取流文件头失败")?;
        if &magic != STREAM_MAGIC {
            bail!("不是数据包流文件");
        }
        let mut len = [0u8; 2];
        inner.read_exact(&mut len)?;
        let mut head = vec![0u8; usize::from(u16::from_le_bytes(len))];
        inner.read_exact(&mut head).context("读取配置记录失败")?;
        let head = OpusHead::parse(&head).context("解析配置记录失败")?;
        Ok(Self { inner, head })
    }

    pub fn head(&self) -> &OpusHead {
        &self.head
    }

    /// 读取下一项, 恰好在项边界结束时返回 `None`, 截断的项返回错误
    pub fn next_packet(&mut self) -> Result<Option<StreamPacket>> {
        let mut len = [0u8; 2];
        let mut filled = 0;
        while filled < len.len() {
            match self.inner.read(&mut len[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => bail!("长度前缀截断: 只读到 {filled} 字节"),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        let len = usize::from(u16::from_le_bytes(len));
        if len == 0 {
            return Ok(Some(StreamPacket::Lost));
        }
        let mut data = vec![0u8; len];
        self.inner
            .read_exact(&mut data)
            .with_context(|| format!("数据包截断, 声明 {len} 字节"))?;
        Ok(Some(StreamPacket::Data(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_codec::opus::StreamMapping;

    fn head() -> OpusHead {
        match StreamMapping::for_family(0, 2) {
            Ok(mapping) => OpusHead::new(mapping, 48000, 120),
            Err(e) => panic!("创建映射失败: {e}"),
        }
    }

    #[test]
    fn test_写入后读取() {
        let mut writer = match PacketWriter::new(Vec::new(), &head()) {
            Ok(w) => w,
            Err(e) => panic!("{e:#}"),
        };
        assert!(writer.write_packet(Some(&[1, 2, 3])).is_ok());
        assert!(writer.write_packet(None).is_ok());
        assert!(writer.write_packet(Some(&[])).is_err());
        assert_eq!(writer.stats(), (2, 3));
        let bytes = writer.finish().unwrap_or_default();

        let mut reader = match PacketReader::new(&bytes[..]) {
            Ok(r) => r,
            Err(e) => panic!("{e:#}"),
        };
        assert_eq!(reader.head(), &head());
        assert_eq!(
            reader.next_packet().ok().flatten(),
            Some(StreamPacket::Data(vec![1, 2, 3]))
        );
        assert_eq!(
            reader.next_packet().ok().flatten(),
            Some(StreamPacket::Lost)
        );
        assert_eq!(reader.next_packet().ok().flatten(), None);
    }

    #[test]
    fn test_截断的长度前缀报错() {
        let mut writer = match PacketWriter::new(Vec::new(), &head()) {
            Ok(w) => w,
            Err(e) => panic!("{e:#}"),
        };
        assert!(writer.write_packet(Some(&[9; 4])).is_ok());
        let mut bytes = writer.finish().unwrap_or_default();
        // 只剩下一个长度字节
        bytes.push(4);

        let mut reader = match PacketReader::new(&bytes[..]) {
            Ok(r) => r,
            Err(e) => panic!("{e:#}"),
        };
        assert_eq!(
            reader.next_packet().ok().flatten(),
            Some(StreamPacket::Data(vec![9; 4]))
        );
        let err = reader.next_packet().err().map(|e| e.to_string());
        assert!(err.is_some_and(|e| e.contains("长度前缀截断")));
    }

    #[test]
    fn test_非法文件头() {
        assert!(PacketReader::new(&b"NOTSHENG\x00\x00"[..]).is_err());
        let mut bytes = Vec::new();
        bytes.extend_from_slice(STREAM_MAGIC);
        bytes.extend_from_slice(&[5, 0, 1, 2]);
        assert!(PacketReader::new(&bytes[..]).is_err());
    }
}
