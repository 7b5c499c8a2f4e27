//! 喜洋洋播放器核心库
//!
//! 流媒体播放内核：字节源抽象（文件 / HTTP Range）、三个容器解封装器
//! （MP4 / MKV / MPEG-TS）、媒体时钟与帧环，以及驱动外部解码器的
//! 播放编排器。渲染、字幕绘制与具体解码器由宿主注入。

pub mod core;
pub mod demux;
pub mod player;
pub mod source;

pub use crate::core::{
    AudioData, BufferStatus, ChunkKind, ContainerKind, EncodedAudioChunk, EncodedVideoChunk,
    MediaClock, MediaInfo, MediaSource, PipelineKind, PlaybackState, PlayerError, PlayerState,
    Result, SubtitleCue, TrackDescriptor, TrackKind, VideoFrame,
};
pub use crate::demux::{open_demuxer, Demuxer, MediaChunk};
pub use crate::player::PlaybackManager;
