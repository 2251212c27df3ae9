//! Opus 解码器适配.
//!
//! 把 [`MultistreamDecoder`] 接入 `Decoder` 接口: 单/双声道流按映射族 0 处理,
//! 额外数据中有 OpusHead 时使用其中的映射表、增益与预跳过.
//! 输出 F32 交错音频帧.

use log::debug;
use sheng_core::{ChannelLayout, SampleFormat, ShengError, ShengResult};
use sheng_resample::f32_to_bytes;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::opus::head::{GRANULE_RATE, OpusHead};
use crate::opus::{DecoderConfig, MultistreamDecoder, StreamMapping, is_valid_sample_rate};
use crate::packet::{NOPTS_VALUE, Packet};

/// Opus 解码器
pub struct OpusFrameDecoder {
    decoder: Option<MultistreamDecoder>,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    /// 尚需丢弃的输出采样数 (每声道)
    skip: usize,
    skip_initial: usize,
    /// 待取出的帧
    pending: Option<Frame>,
    next_pts: i64,
    flushing: bool,
}

impl OpusFrameDecoder {
    /// 工厂函数
    pub fn create() -> ShengResult<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            decoder: None,
            sample_rate: 0,
            channel_layout: ChannelLayout::MONO,
            skip: 0,
            skip_initial: 0,
            pending: None,
            next_pts: 0,
            flushing: false,
        }))
    }

    fn decode_one(&mut self, packet: &Packet) -> ShengResult<Option<Frame>> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| ShengError::Codec("解码器未打开, 请先调用 open()".into()))?;
        let data = (!packet.lost).then_some(&packet.data[..]);
        let pcm = decoder.decode(data)?;
        let channels = self.channel_layout.channels as usize;
        let total = pcm.len() / channels;
        let drop = self.skip.min(total);
        self.skip -= drop;
        let nb_samples = total - drop;

        let pts = if packet.pts != NOPTS_VALUE {
            packet.pts
        } else {
            self.next_pts
        };
        self.next_pts = pts + total as i64;
        if nb_samples == 0 {
            return Ok(None);
        }
        let mut frame = AudioFrame::new(
            nb_samples as u32,
            self.sample_rate,
            SampleFormat::F32,
            self.channel_layout,
        );
        frame.data = vec![f32_to_bytes(&pcm[drop * channels..], SampleFormat::F32)?];
        frame.pts = pts + drop as i64;
        Ok(Some(Frame::Audio(frame)))
    }
}

impl Decoder for OpusFrameDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Opus
    }

    fn name(&self) -> &str {
        "opus"
    }

    fn open(&mut self, params: &CodecParameters) -> ShengResult<()> {
        let audio = params
            .audio()
            .ok_or_else(|| ShengError::InvalidArgument("Opus 解码器需要音频参数".into()))?;
        if !is_valid_sample_rate(audio.sample_rate) {
            return Err(ShengError::InvalidArgument(format!(
                "不支持的输出采样率: {}",
                audio.sample_rate
            )));
        }

        let mut config = DecoderConfig::new(audio.sample_rate, 1);
        let (mapping, pre_skip) = if params.extra_data.is_empty() {
            let channels = audio.channel_layout.channels as usize;
            let family = if channels <= 2 { 0 } else { 1 };
            (StreamMapping::for_family(family, channels)?, 0)
        } else {
            let head = OpusHead::parse(&params.extra_data)?;
            config.gain_q8 = head.output_gain;
            (head.mapping, head.pre_skip)
        };
        let skip =
            (u64::from(pre_skip) * u64::from(audio.sample_rate) / u64::from(GRANULE_RATE)) as usize;

        self.channel_layout = ChannelLayout::from_channels(mapping.channels() as u32);
        self.sample_rate = audio.sample_rate;
        self.skip = skip;
        self.skip_initial = skip;
        self.pending = None;
        self.next_pts = 0;
        self.flushing = false;
        debug!(
            "打开 Opus 解码器: {} Hz, {} 声道, {} 流, 预跳过 {} 采样",
            self.sample_rate,
            mapping.channels(),
            mapping.streams,
            skip
        );
        self.decoder = Some(MultistreamDecoder::new(config, mapping)?);
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> ShengResult<()> {
        if self.pending.is_some() {
            return Err(ShengError::NeedMoreData);
        }
        if packet.is_empty() && !packet.lost {
            self.flushing = true;
            return Ok(());
        }
        self.pending = self.decode_one(packet)?;
        Ok(())
    }

    fn receive_frame(&mut self) -> ShengResult<Frame> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        if self.flushing {
            Err(ShengError::Eof)
        } else {
            Err(ShengError::NeedMoreData)
        }
    }

    fn flush(&mut self) {
        if let Some(dec) = self.decoder.as_mut() {
            if let Err(e) = dec.reset() {
                log::warn!("重置 Opus 解码器失败: {e}");
            }
        }
        self.pending = None;
        self.skip = self.skip_initial;
        self.next_pts = 0;
        self.flushing = false;
    }
}
