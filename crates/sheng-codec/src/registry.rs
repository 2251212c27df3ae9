//! 编解码器注册表.
//!
//! 按 CodecId 查找工厂函数并创建 `Box<dyn Encoder>` / `Box<dyn Decoder>`,
//! 使上层 (CLI、会话流) 不依赖具体实现类型.

use std::collections::HashMap;

use sheng_core::{ShengError, ShengResult};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;
use crate::encoder::Encoder;

pub type DecoderFactory = fn() -> ShengResult<Box<dyn Decoder>>;

pub type EncoderFactory = fn() -> ShengResult<Box<dyn Encoder>>;

/// 单个已注册实现
struct Entry<F> {
    name: &'static str,
    factory: F,
}

/// 编解码器注册表
///
/// 同一 CodecId 可注册多个实现, 先注册者优先.
#[derive(Default)]
pub struct CodecRegistry {
    decoders: HashMap<CodecId, Vec<Entry<DecoderFactory>>>,
    encoders: HashMap<CodecId, Vec<Entry<EncoderFactory>>>,
}

fn first<F: Copy>(
    table: &HashMap<CodecId, Vec<Entry<F>>>,
    codec_id: CodecId,
    kind: &str,
) -> ShengResult<F> {
    table
        .get(&codec_id)
        .and_then(|entries| entries.first())
        .map(|e| e.factory)
        .ok_or_else(|| ShengError::CodecNotFound(format!("未找到 {codec_id} 的{kind}")))
}

fn names<F>(table: &HashMap<CodecId, Vec<Entry<F>>>) -> Vec<(CodecId, &str)> {
    let mut out: Vec<(CodecId, &str)> = table
        .iter()
        .flat_map(|(id, entries)| entries.iter().map(move |e| (*id, e.name)))
        .collect();
    out.sort_by_key(|(id, _)| id.name());
    out
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: &'static str,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(Entry { name, factory });
    }

    pub fn register_encoder(
        &mut self,
        codec_id: CodecId,
        name: &'static str,
        factory: EncoderFactory,
    ) {
        self.encoders
            .entry(codec_id)
            .or_default()
            .push(Entry { name, factory });
    }

    /// 用首个注册的工厂创建解码器
    pub fn create_decoder(&self, codec_id: CodecId) -> ShengResult<Box<dyn Decoder>> {
        first(&self.decoders, codec_id, "解码器").and_then(|factory| factory())
    }

    /// 用首个注册的工厂创建编码器
    pub fn create_encoder(&self, codec_id: CodecId) -> ShengResult<Box<dyn Encoder>> {
        first(&self.encoders, codec_id, "编码器").and_then(|factory| factory())
    }

    /// 已注册的解码器, 按编解码器名称排序
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        names(&self.decoders)
    }

    /// 已注册的编码器, 按编解码器名称排序
    pub fn list_encoders(&self) -> Vec<(CodecId, &str)> {
        names(&self.encoders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_注册所有编解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        assert_eq!(registry.list_decoders(), vec![(CodecId::Opus, "opus")]);
        assert_eq!(registry.list_encoders(), vec![(CodecId::Opus, "opus")]);
    }

    #[test]
    fn test_按codec_id创建编解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        let dec = registry.create_decoder(CodecId::Opus).unwrap();
        assert_eq!(dec.codec_id(), CodecId::Opus);
        let enc = registry.create_encoder(CodecId::Opus).unwrap();
        assert_eq!(enc.codec_id(), CodecId::Opus);
    }

    #[test]
    fn test_先注册的实现优先() {
        fn failing() -> ShengResult<Box<dyn Decoder>> {
            Err(ShengError::Unsupported("占位实现".into()))
        }
        let mut registry = CodecRegistry::new();
        registry.register_decoder(CodecId::Opus, "stub", failing);
        crate::register_all(&mut registry);
        assert_eq!(registry.list_decoders().len(), 2);
        assert!(matches!(
            registry.create_decoder(CodecId::Opus),
            Err(ShengError::Unsupported(_))
        ));
    }

    #[test]
    fn test_未注册的编解码器返回错误() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_decoder(CodecId::Opus),
            Err(ShengError::CodecNotFound(_))
        ));
        assert!(registry.create_encoder(CodecId::None).is_err());
    }
}
