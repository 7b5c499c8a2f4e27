use crate::core::{
    AudioData, EncodedAudioChunk, EncodedVideoChunk, Result, TrackDescriptor, VideoFrame,
};

/// 视频解码器配置（能力查询与 configure 共用）
#[derive(Debug, Clone)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub description: Option<Vec<u8>>,
    pub coded_width: u32,
    pub coded_height: u32,
}

impl VideoDecoderConfig {
    pub fn from_track(track: &TrackDescriptor) -> Self {
        Self {
            codec: track.codec.clone(),
            description: track.description.clone(),
            coded_width: track.width,
            coded_height: track.height,
        }
    }
}

/// 音频解码器配置
#[derive(Debug, Clone)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub description: Option<Vec<u8>>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioDecoderConfig {
    pub fn from_track(track: &TrackDescriptor) -> Self {
        Self {
            codec: track.codec.clone(),
            description: track.description.clone(),
            sample_rate: track.sample_rate,
            channels: track.channels,
        }
    }
}

/// 能力查询结果：支持与否 + 规整后的配置
#[derive(Debug, Clone)]
pub struct DecoderSupport<C> {
    pub supported: bool,
    pub config: C,
}

/// 外部视频解码器契约（黑盒：查询能力、送入、取出）
///
/// decode 是送入一个访问单元；解码产物通过 poll_frame 逐个取出，
/// pending 报告在途数量，供编排器限制提交深度。
pub trait VideoDecoder: Send {
    fn is_config_supported(&self, config: &VideoDecoderConfig) -> DecoderSupport<VideoDecoderConfig>;

    fn configure(&mut self, config: &VideoDecoderConfig) -> Result<()>;

    /// 送入一个编码块
    fn decode(&mut self, chunk: &EncodedVideoChunk) -> Result<()>;

    /// 取出一个已解码帧
    fn poll_frame(&mut self) -> Option<VideoFrame>;

    /// 在途（已送入未取出）的块数
    fn pending(&self) -> usize;

    /// 冲刷解码器，取出缓冲的帧
    fn flush(&mut self) -> Result<Vec<VideoFrame>>;

    fn reset(&mut self);

    fn close(&mut self);
}

/// 外部音频解码器契约
pub trait AudioDecoder: Send {
    fn is_config_supported(&self, config: &AudioDecoderConfig) -> DecoderSupport<AudioDecoderConfig>;

    fn configure(&mut self, config: &AudioDecoderConfig) -> Result<()>;

    fn decode(&mut self, chunk: &EncodedAudioChunk) -> Result<()>;

    fn poll_data(&mut self) -> Option<AudioData>;

    fn pending(&self) -> usize;

    fn flush(&mut self) -> Result<Vec<AudioData>>;

    fn reset(&mut self);

    fn close(&mut self);
}
