//! 统一错误类型定义.
//!
//! 所有 Sheng crate 共用的错误类型. 前六个变体对应码流与配置层面的错误分类,
//! 其余变体服务于编解码器框架 (收发模型、注册表).

use thiserror::Error;

/// Sheng 统一错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShengError {
    /// 写入超出缓冲区容量
    #[error("缓冲区溢出: {0}")]
    Overflow(String),

    /// 码流提前结束
    #[error("码流截断: {0}")]
    TruncatedStream(String),

    /// 码流内容无法解释 (符号越界等)
    #[error("码流损坏: {0}")]
    CorruptStream(String),

    /// 数据包结构非法
    #[error("非法数据包: {0}")]
    MalformedPacket(String),

    /// 多流声道映射非法
    #[error("非法声道映射: {0}")]
    InvalidMapping(String),

    /// 会话配置非法
    #[error("非法配置: {0}")]
    InvalidConfig(String),

    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 编解码器错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Sheng 统一 Result 类型
pub type ShengResult<T> = Result<T, ShengError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误信息包含上下文() {
        let err = ShengError::MalformedPacket("帧长度 1300 超过 1275".into());
        assert_eq!(err.to_string(), "非法数据包: 帧长度 1300 超过 1275");
        assert_eq!(
            ShengError::NeedMoreData.to_string(),
            "数据不足, 需要更多输入"
        );
    }
}
