use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络资源 URL（可显式指定容器格式）
    Url {
        url: String,
        container: Option<ContainerKind>,
    },
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> MediaSource {
        if url.starts_with("http://") || url.starts_with("https://") {
            MediaSource::Url {
                url: url.to_string(),
                container: None,
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络源
    pub fn is_network(&self) -> bool {
        matches!(self, MediaSource::Url { .. })
    }

    /// 根据扩展名 / URL 路径后缀推断容器格式
    pub fn detect_container(&self) -> Option<ContainerKind> {
        let path = match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_lowercase(),
            MediaSource::Url { url, container } => {
                if container.is_some() {
                    return *container;
                }
                // 去掉查询参数后取路径部分
                let no_query = url.split(['?', '#']).next().unwrap_or(url);
                no_query.to_lowercase()
            }
        };

        if path.ends_with(".mp4") || path.ends_with(".m4v") || path.ends_with(".mov") {
            Some(ContainerKind::Mp4)
        } else if path.ends_with(".mkv") || path.ends_with(".webm") {
            Some(ContainerKind::Mkv)
        } else if path.ends_with(".ts") || path.ends_with(".m2ts") || path.ends_with(".mts") {
            Some(ContainerKind::Ts)
        } else {
            None
        }
    }
}

/// 容器格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mp4,
    Mkv,
    Ts,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Mp4 => "MP4",
            ContainerKind::Mkv => "MKV",
            ContainerKind::Ts => "MPEG-TS",
        }
    }

    /// 原生 <video> 元素是否可以直接播放该容器（回退判断用）
    pub fn natively_playable(&self) -> bool {
        matches!(self, ContainerKind::Mp4)
    }
}

/// 轨道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

/// 字幕轨的载荷格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtitleFormat {
    /// S_TEXT/UTF8：整个 Block 即文本
    PlainText,
    /// S_TEXT/ASS 与 S_TEXT/SSA：需要按 Format 行投影出 Text 列
    Ass { format: Vec<String> },
    /// S_HDMV/PGS：位图字幕，按 .sup 包序列输出
    Pgs,
}

/// 轨道元数据（打开时确定，之后不可变）
///
/// codec 字符串遵循 ISO-BMFF 约定（avc1.* / hvc1.* / vp09.* / mp4a.40.* 等），
/// description 是解码器需要的编解码器私有数据（avcC、AudioSpecificConfig 等）。
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub id: u64,
    pub kind: TrackKind,
    pub codec: String,
    pub description: Option<Vec<u8>>,

    // 视频轨有效
    pub width: u32,
    pub height: u32,

    // 音频轨有效
    pub sample_rate: u32,
    pub channels: u16,

    /// 默认帧时长（微秒），容器未给出时为 None
    pub default_duration_us: Option<i64>,

    /// 总样本数（MP4 用于判断轨道结束，其他容器为 0）
    pub sample_count: u64,

    pub name: Option<String>,
    pub language: Option<String>,

    /// 字幕轨专用
    pub subtitle_format: Option<SubtitleFormat>,
}

impl TrackDescriptor {
    pub fn new(id: u64, kind: TrackKind, codec: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            codec: codec.into(),
            description: None,
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            default_duration_us: None,
            sample_count: 0,
            name: None,
            language: None,
            subtitle_format: None,
        }
    }
}

/// 编码块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Key,
    Delta,
}

/// 一个视频访问单元
#[derive(Debug, Clone)]
pub struct EncodedVideoChunk {
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub data: Vec<u8>,
}

/// 一个音频帧（对解码器来说总是关键帧）
#[derive(Debug, Clone)]
pub struct EncodedAudioChunk {
    pub kind: ChunkKind,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub data: Vec<u8>,
}

/// 字幕提示
///
/// 文本与位图两个变体没有公共元数据，消费端按变体匹配处理。
#[derive(Debug, Clone)]
pub enum SubtitleCue {
    /// 文本字幕（ASS/SSA 的 Text 列保留 {\...} 标签，渲染端负责解析）
    Text {
        start_us: i64,
        end_us: i64,
        text: String,
    },
    /// PGS 位图字幕：完整的 PG 包序列（13 字节包头 + 段数据），时间戳在包内
    Pgs { data: Vec<u8> },
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 解码后的视频帧
///
/// 独占所有权：渲染或被环形缓冲淘汰后调用 close() 释放。
/// Drop 时自动关闭，保证"关闭次数 = 进入次数"。
#[derive(Debug)]
pub struct VideoFrame {
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// 显式关闭并释放帧数据
    pub fn close(self) {
        // 所有权被消耗，数据随 Drop 释放
    }
}

/// 解码后的 PCM 音频块（统一 f32 交织格式）
#[derive(Debug)]
pub struct AudioData {
    pub timestamp_us: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<f32>,
}

impl AudioData {
    /// 以秒计的块时长
    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.channels as f64 / self.sample_rate as f64
    }

    /// 拷贝进设备缓冲后显式关闭
    pub fn close(self) {}
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Opening,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// 当前管线类型（只能通过 load/stop 切换）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    None,
    /// 回退到宿主原生 <video> 元素播放
    VideoElement,
    WebcodecsMp4,
    WebcodecsMkv,
    WebcodecsTs,
}

/// 播放器状态信息（供宿主 UI 读取）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub state: PlaybackState,
    pub pipeline: PipelineKind,
    pub position_ms: i64,
    pub duration_ms: i64,
    pub volume: f32,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            pipeline: PipelineKind::None,
            position_ms: 0,
            duration_ms: 0,
            volume: 1.0,
        }
    }
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferStatus {
    /// 视频编码块队列长度
    pub video_chunks: usize,

    /// 音频编码块队列长度
    pub audio_chunks: usize,

    /// 解码后视频帧环长度
    pub video_frames: usize,

    /// 已排期但未播放的音频时长（秒）
    pub audio_scheduled_sec: f64,

    /// 解封装是否因背压暂停
    pub extraction_paused: bool,
}

/// 媒体信息摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub container: String,
    pub duration_ms: i64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        assert!(MediaSource::from_url("https://a.b/c.mkv").is_network());
        assert!(!MediaSource::from_url("/tmp/movie.mp4").is_network());
    }

    #[test]
    fn test_detect_container() {
        assert_eq!(
            MediaSource::from_url("/tmp/movie.mp4").detect_container(),
            Some(ContainerKind::Mp4)
        );
        assert_eq!(
            MediaSource::from_url("https://a.b/v.webm?yes=1").detect_container(),
            Some(ContainerKind::Mkv)
        );
        assert_eq!(
            MediaSource::from_url("https://a.b/v.m2ts").detect_container(),
            Some(ContainerKind::Ts)
        );
        assert_eq!(MediaSource::from_url("/tmp/readme.txt").detect_container(), None);

        // 显式指定优先于后缀
        let forced = MediaSource::Url {
            url: "https://a.b/stream".to_string(),
            container: Some(ContainerKind::Ts),
        };
        assert_eq!(forced.detect_container(), Some(ContainerKind::Ts));
    }

    #[test]
    fn test_audio_data_duration() {
        let data = AudioData {
            timestamp_us: 0,
            sample_rate: 48000,
            channels: 2,
            data: vec![0.0; 960 * 2],
        };
        assert!((data.duration_sec() - 0.02).abs() < 1e-9);
    }
}
