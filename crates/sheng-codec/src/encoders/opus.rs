//! Opus 编码器适配.
//!
//! 输入帧长度任意, 内部按编码帧长缓存后逐帧编码. 刷新时把剩余采样补零编为最后一帧.
//! 三声道及以上使用映射族 1 (Vorbis 声道顺序).

use std::collections::VecDeque;

use bytes::Bytes;
use log::debug;
use sheng_core::{SampleFormat, ShengError, ShengResult};
use sheng_resample::bytes_to_f32;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::encoder::Encoder;
use crate::frame::Frame;
use crate::opus::head::OpusHead;
use crate::opus::{
    Application, Bitrate, EncoderConfig, FrameDuration, MultistreamEncoder, StreamMapping,
    is_valid_sample_rate,
};
use crate::packet::Packet;

/// 编码会话及其输入格式
struct Session {
    encoder: MultistreamEncoder,
    input_format: SampleFormat,
    channels: usize,
    frame_samples: usize,
    head: OpusHead,
}

/// Opus 编码器
pub struct OpusFrameEncoder {
    session: Option<Session>,
    /// 尚未凑满一帧的交错采样
    buffer: Vec<f32>,
    output: VecDeque<Packet>,
    next_pts: i64,
    flushing: bool,
}

impl OpusFrameEncoder {
    /// 工厂函数
    pub fn create() -> ShengResult<Box<dyn Encoder>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            session: None,
            buffer: Vec::new(),
            output: VecDeque::new(),
            next_pts: 0,
            flushing: false,
        }
    }

    /// 与当前会话对应的配置记录, 可写入 `CodecParameters::extra_data`
    pub fn head(&self) -> Option<&OpusHead> {
        self.session.as_ref().map(|s| &s.head)
    }

    /// 编码缓冲区中所有完整的帧
    fn drain_frames(&mut self) -> ShengResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(ShengError::Codec("编码器未打开, 请先调用 open()".into()));
        };
        let frame_len = session.frame_samples * session.channels;
        while self.buffer.len() >= frame_len {
            let data = session.encoder.encode(&self.buffer[..frame_len])?;
            self.buffer.drain(..frame_len);
            let mut packet = Packet::from_data(Bytes::from(data));
            packet.pts = self.next_pts;
            packet.duration = session.frame_samples as i64;
            self.next_pts += session.frame_samples as i64;
            self.output.push_back(packet);
        }
        Ok(())
    }
}

impl Default for OpusFrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for OpusFrameEncoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Opus
    }

    fn name(&self) -> &str {
        "opus"
    }

    fn open(&mut self, params: &CodecParameters) -> ShengResult<()> {
        let audio = params
            .audio()
            .ok_or_else(|| ShengError::InvalidArgument("Opus 编码器需要音频参数".into()))?;
        if !is_valid_sample_rate(audio.sample_rate) {
            return Err(ShengError::InvalidArgument(format!(
                "不支持的采样率: {}",
                audio.sample_rate
            )));
        }
        if !matches!(audio.sample_format, SampleFormat::F32 | SampleFormat::S16) {
            return Err(ShengError::Unsupported(format!(
                "Opus 编码器不支持输入格式 {}",
                audio.sample_format
            )));
        }
        let channels = audio.channel_layout.channels as usize;
        let family = if channels <= 2 { 0 } else { 1 };
        let mapping = StreamMapping::for_family(family, channels)?;

        let mut config = EncoderConfig::new(audio.sample_rate, 1, Application::Audio);
        if audio.frame_size != 0 {
            let frame_size = audio.frame_size as usize;
            config.frame_duration = FrameDuration::from_samples(audio.sample_rate, frame_size)
                .ok_or_else(|| {
                    ShengError::InvalidArgument(format!(
                        "帧长 {} 采样在 {} Hz 下无效",
                        audio.frame_size, audio.sample_rate
                    ))
                })?;
        }
        if params.bit_rate != 0 {
            config.bitrate = Bitrate::Bits(u32::try_from(params.bit_rate).unwrap_or(u32::MAX));
        }

        let encoder = MultistreamEncoder::new(config.clone(), mapping.clone())?;
        let lookahead = encoder.streams().first().map_or(0, |e| e.lookahead());
        let head = OpusHead::new(
            mapping,
            audio.sample_rate,
            OpusHead::pre_skip_for(lookahead, audio.sample_rate),
        );
        debug!(
            "打开 Opus 编码器: {} Hz, {} 声道, 帧长 {}, 码率 {:?}",
            audio.sample_rate, channels, config.frame_duration, config.bitrate
        );
        self.session = Some(Session {
            encoder,
            input_format: audio.sample_format,
            channels,
            frame_samples: config.frame_samples(),
            head,
        });
        self.buffer.clear();
        self.output.clear();
        self.next_pts = 0;
        self.flushing = false;
        Ok(())
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> ShengResult<()> {
        let Some(session) = self.session.as_ref() else {
            return Err(ShengError::Codec("编码器未打开, 请先调用 open()".into()));
        };
        let Some(Frame::Audio(audio)) = frame else {
            // 刷新: 剩余采样补零成一帧
            self.flushing = true;
            if !self.buffer.is_empty() {
                let frame_len = session.frame_samples * session.channels;
                self.buffer.resize(frame_len, 0.0);
                self.drain_frames()?;
            }
            return Ok(());
        };
        if audio.channel_layout.channels as usize != session.channels {
            return Err(ShengError::InvalidArgument(format!(
                "输入 {} 声道, 编码器为 {} 声道",
                audio.channel_layout.channels, session.channels
            )));
        }
        if audio.sample_format != session.input_format {
            return Err(ShengError::InvalidArgument(format!(
                "输入格式 {} 与打开时的 {} 不符",
                audio.sample_format, session.input_format
            )));
        }
        let data = audio
            .data
            .first()
            .ok_or_else(|| ShengError::InvalidArgument("音频帧没有数据".into()))?;
        let samples = bytes_to_f32(data, audio.sample_format)?;
        self.buffer.extend_from_slice(&samples);
        self.drain_frames()
    }

    fn receive_packet(&mut self) -> ShengResult<Packet> {
        if let Some(packet) = self.output.pop_front() {
            return Ok(packet);
        }
        if self.flushing {
            Err(ShengError::Eof)
        } else {
            Err(ShengError::NeedMoreData)
        }
    }

    fn flush(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.encoder.reset();
        }
        self.buffer.clear();
        self.output.clear();
        self.next_pts = 0;
        self.flushing = false;
    }
}
