// 容器解封装层：MP4 / MKV / MPEG-TS

pub(crate) mod codec;
pub mod ebml;
pub mod mkv;
pub mod mp4;
pub mod subtitle;
pub mod ts;

pub use mkv::MkvDemuxer;
pub use mp4::Mp4Demuxer;
pub use ts::TsDemuxer;

use crate::core::{
    ContainerKind, EncodedAudioChunk, EncodedVideoChunk, Result, SubtitleCue, TrackDescriptor,
};
use crate::source::ByteSource;
use std::sync::Arc;

/// 解封装产物：单个编码块或字幕提示
pub enum MediaChunk {
    Video(EncodedVideoChunk),
    Audio(EncodedAudioChunk),
    Subtitle(SubtitleCue),
}

/// 容器解封装器抽象接口
///
/// 三个容器共享同一形状：打开后查询轨道，然后由编排器按需拉取。
/// next_chunk 返回 Ok(None) 表示流结束；背压通过
/// pause_extraction / resume_extraction 协作实现，暂停期间编排器
/// 不再调用 next_chunk。
pub trait Demuxer: Send {
    /// 选中的视频轨（无则 None）
    fn video_track(&self) -> Option<&TrackDescriptor>;

    /// 选中的音频轨
    fn audio_track(&self) -> Option<&TrackDescriptor>;

    /// 可用的字幕轨列表
    fn subtitle_tracks(&self) -> &[TrackDescriptor];

    /// 选择要提取的字幕轨（按 TrackDescriptor.id）
    fn select_subtitle_track(&mut self, id: u64) -> Result<()>;

    /// 拉取下一个块
    ///
    /// 返回：
    /// - Ok(Some(chunk)): 成功提取一个块
    /// - Ok(None): 流结束（所有挂起的块已冲刷）
    /// - Err(e): 提取错误
    fn next_chunk(&mut self) -> Result<Option<MediaChunk>>;

    /// 暂停提取（背压）
    fn pause_extraction(&mut self);

    /// 恢复提取
    fn resume_extraction(&mut self);

    fn is_extraction_paused(&self) -> bool;

    /// 停止并中止底层字节源
    fn stop(&mut self);

    /// 以毫秒计的总时长（未知为 0）
    fn duration_ms(&self) -> i64 {
        0
    }

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;
}

/// 根据容器格式打开对应的解封装器
pub fn open_demuxer(kind: ContainerKind, source: Arc<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
    match kind {
        ContainerKind::Mp4 => Ok(Box::new(Mp4Demuxer::open(source)?)),
        ContainerKind::Mkv => Ok(Box::new(MkvDemuxer::open(source)?)),
        ContainerKind::Ts => Ok(Box::new(TsDemuxer::open(source)?)),
    }
}
