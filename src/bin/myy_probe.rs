use anyhow::Result;
use log::info;
use myy_player_core::demux::{open_demuxer, MediaChunk};
use myy_player_core::source::{ByteSource, FileSource, HttpSource, HttpSourceConfig};
use myy_player_core::{MediaSource, SubtitleCue};
use std::sync::Arc;

/// 探测工具：打印容器、轨道与最前面的若干块
fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("用法: myy_probe <文件路径或 URL>");
        std::process::exit(2);
    };

    info!("🔍 探测媒体源: {}", path);
    let source = MediaSource::from_url(&path);
    let Some(container) = source.detect_container() else {
        anyhow::bail!("无法从后缀识别容器格式: {}", path);
    };

    let byte_source: Arc<dyn ByteSource> = match &source {
        MediaSource::LocalFile(p) => Arc::new(FileSource::open(p)?),
        MediaSource::Url { url, .. } => {
            Arc::new(HttpSource::open(url, HttpSourceConfig::default())?)
        }
    };
    println!("容器: {}", container.as_str());
    println!("源:   {}", byte_source.description());

    let mut demuxer = open_demuxer(container, byte_source)?;
    if let Some(track) = demuxer.video_track() {
        println!(
            "视频轨 #{}: {} {}x{}，私有数据 {} 字节",
            track.id,
            track.codec,
            track.width,
            track.height,
            track.description.as_ref().map(|d| d.len()).unwrap_or(0)
        );
    }
    if let Some(track) = demuxer.audio_track() {
        println!(
            "音频轨 #{}: {} {} Hz {} 声道",
            track.id, track.codec, track.sample_rate, track.channels
        );
    }
    for track in demuxer.subtitle_tracks() {
        println!(
            "字幕轨 #{}: {} ({})",
            track.id,
            track.codec,
            track.language.as_deref().unwrap_or("und")
        );
    }
    if let Some(first) = demuxer.subtitle_tracks().first().map(|t| t.id) {
        demuxer.select_subtitle_track(first)?;
    }

    // 打印前 10 个块
    let mut printed = 0usize;
    while printed < 10 {
        match demuxer.next_chunk()? {
            Some(MediaChunk::Video(v)) => {
                println!(
                    "  视频 {:?} ts={} µs dur={} µs {} 字节",
                    v.kind,
                    v.timestamp_us,
                    v.duration_us,
                    v.data.len()
                );
            }
            Some(MediaChunk::Audio(a)) => {
                println!(
                    "  音频 ts={} µs dur={} µs {} 字节",
                    a.timestamp_us,
                    a.duration_us,
                    a.data.len()
                );
            }
            Some(MediaChunk::Subtitle(SubtitleCue::Text { start_us, end_us, text })) => {
                println!("  字幕 [{} - {}] {}", start_us, end_us, text);
            }
            Some(MediaChunk::Subtitle(SubtitleCue::Pgs { data })) => {
                println!("  PGS 字幕 {} 字节", data.len());
            }
            None => break,
        }
        printed += 1;
    }
    demuxer.stop();
    Ok(())
}
