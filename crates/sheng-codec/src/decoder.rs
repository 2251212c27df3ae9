//! 解码器 trait.

use sheng_core::ShengResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 按包推进的解码器
///
/// 每个 `send_packet` 恰好产生一帧: 正常数据包解码, `Packet::lost()` 触发丢包隐藏.
/// 空数据包表示流结束, 之后 `receive_frame` 返回 `Eof`.
/// 损坏的数据包只让本次调用失败, 解码历史保持不变.
pub trait Decoder: Send {
    fn codec_id(&self) -> CodecId;

    fn name(&self) -> &str;

    /// 按输出采样率、声道数和 `extra_data` 中的配置记录建立解码会话
    fn open(&mut self, _params: &CodecParameters) -> ShengResult<()> {
        Ok(())
    }

    /// 送入一个数据包; 上一帧尚未取出时返回 `NeedMoreData`
    fn send_packet(&mut self, packet: &Packet) -> ShengResult<()>;

    /// 取出解码帧, 没有待取帧时返回 `NeedMoreData` 或 `Eof`
    fn receive_frame(&mut self) -> ShengResult<Frame>;

    /// 回到刚打开时的状态, 包括预跳过计数
    fn flush(&mut self);
}
