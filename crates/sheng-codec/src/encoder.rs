//! 编码器 trait.

use sheng_core::ShengResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 按帧推进的编码器
///
/// 输入帧长度不必等于编码帧长, 实现自行缓存. `send_frame(None)` 把剩余采样
/// 补零编出最后一个数据包, 全部取出后 `receive_packet` 返回 `Eof`.
pub trait Encoder: Send {
    fn codec_id(&self) -> CodecId;

    fn name(&self) -> &str;

    /// 按采样率、声道布局、采样格式和码率建立编码会话
    fn open(&mut self, _params: &CodecParameters) -> ShengResult<()> {
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> ShengResult<()>;

    /// 取出一个数据包, 缓存不足一帧时返回 `NeedMoreData`
    fn receive_packet(&mut self) -> ShengResult<Packet>;

    /// 丢弃缓存并重置编码状态
    fn flush(&mut self);
}
