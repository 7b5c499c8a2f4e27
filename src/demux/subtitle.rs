use crate::core::{Result, SubtitleCue};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

// ============= ASS / SSA 预处理 =============

/// 从 CodecPrivate（ASS 头部文本）解析 [Events] 段的 Format 行
///
/// 返回字段名列表，用于把 Block 里的对白行投影到 Text 列。
pub fn parse_ass_format(header: &str) -> Option<Vec<String>> {
    let mut in_events = false;
    for line in header.lines() {
        let line = line.trim();
        if line.eq_ignore_ascii_case("[Events]") {
            in_events = true;
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_events = false;
            continue;
        }
        if in_events {
            if let Some(rest) = line.strip_prefix("Format:") {
                return Some(rest.split(',').map(|s| s.trim().to_string()).collect());
            }
        }
    }
    None
}

/// 默认的 ASS 事件字段（CodecPrivate 缺失 Format 行时使用）
pub fn default_ass_format() -> Vec<String> {
    ["Layer", "Start", "End", "Style", "Name", "MarginL", "MarginR", "MarginV", "Effect", "Text"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// 把 Matroska Block 里的 ASS 对白行投影到 Text 列
///
/// Block 内的行是 Format 字段去掉 Start/End、前面加 ReadOrder 的逗号序列；
/// Text 是最后一列，内部的逗号要保留。
pub fn ass_block_text(format: &[String], line: &str) -> Option<String> {
    let timed_fields = format
        .iter()
        .filter(|f| f.eq_ignore_ascii_case("Start") || f.eq_ignore_ascii_case("End"))
        .count();
    // ReadOrder + (Format 字段 - Start/End)
    let field_count = format.len() - timed_fields + 1;
    if field_count < 2 {
        return Some(line.to_string());
    }
    let text = line.splitn(field_count, ',').last()?;
    Some(text.to_string())
}

// ============= PGS 包装 =============

/// PG 包头魔数
pub const PG_MAGIC: [u8; 2] = [0x50, 0x47];

/// 判断载荷是否已经是 .sup 包序列
pub fn is_sup_stream(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == PG_MAGIC[0] && data[1] == PG_MAGIC[1]
}

/// 把 MKV Block 内的裸 PGS 段序列重新打包为 .sup 包
///
/// 输入是连续的 (segment_type:u8, segment_length:u16be, payload) 三元组；
/// 每段都套上 13 字节 PG 包头，PTS 用块时间戳换算的 90 kHz 时钟。
pub fn pgs_wrap_segments(payload: &[u8], pts_90k: u32, out: &mut Vec<u8>) {
    let mut pos = 0usize;
    while pos + 3 <= payload.len() {
        let seg_type = payload[pos];
        let seg_len = u16::from_be_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
        if pos + 3 + seg_len > payload.len() {
            warn!("PGS 段长度越界，丢弃残余 {} 字节", payload.len() - pos);
            break;
        }
        out.extend_from_slice(&PG_MAGIC);
        out.extend_from_slice(&pts_90k.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // DTS
        out.push(seg_type);
        out.extend_from_slice(&(seg_len as u16).to_be_bytes());
        out.extend_from_slice(&payload[pos + 3..pos + 3 + seg_len]);
        pos += 3 + seg_len;
    }
}

/// 微秒时间戳换算为 90 kHz 时钟
pub fn pts_90k_from_us(timestamp_us: i64) -> u32 {
    ((timestamp_us as f64 * 90000.0 / 1_000_000.0).round() as u64 & 0xFFFF_FFFF) as u32
}

// ============= 外部字幕文件（SRT / ASS / VTT） =============

/// 查找与视频文件同目录下的字幕文件
/// 支持的字幕文件格式：.srt, .ass, .ssa, .vtt
pub fn find_subtitle_files(video_path: &Path) -> Vec<PathBuf> {
    let mut subtitle_files = Vec::new();

    let (Some(parent_dir), Some(file_stem)) = (video_path.parent(), video_path.file_stem()) else {
        return subtitle_files;
    };
    let file_stem = file_stem.to_string_lossy();
    let subtitle_extensions = ["srt", "ass", "ssa", "vtt"];

    // 精确匹配 - video_name.srt, video_name.ass 等
    for ext in &subtitle_extensions {
        let subtitle_path = parent_dir.join(format!("{}.{}", file_stem, ext));
        if subtitle_path.exists() {
            info!("找到精确匹配字幕文件: {}", subtitle_path.display());
            subtitle_files.push(subtitle_path);
        }
    }

    // 语言标识匹配 - video_name.zh.srt, video_name.en.srt
    let language_codes = ["zh", "en", "chs", "cht", "zh-cn", "zh-tw", "ja", "ko"];
    for lang in &language_codes {
        for ext in &subtitle_extensions {
            let subtitle_path = parent_dir.join(format!("{}.{}.{}", file_stem, lang, ext));
            if subtitle_path.exists() {
                info!("找到语言标识字幕文件: {}", subtitle_path.display());
                subtitle_files.push(subtitle_path);
            }
        }
    }

    subtitle_files
}

/// 解析外部字幕文件为文本提示流
pub fn parse_subtitle_file(file_path: &Path) -> Result<Vec<SubtitleCue>> {
    let content = fs::read_to_string(file_path)
        .map_err(|e| anyhow::anyhow!("读取字幕文件失败: {}", e))?;

    let extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "srt" => Ok(parse_srt(&content)),
        "ass" | "ssa" => Ok(parse_ass_file(&content)),
        "vtt" => Ok(parse_vtt(&content)),
        _ => Err(anyhow::anyhow!("不支持的字幕文件格式: {}", extension).into()),
    }
}

/// 解析 SRT 格式字幕
fn parse_srt(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut current: Option<(i64, i64, String)> = None;

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() {
            // 空行，完成当前字幕条目
            if let Some((start_us, end_us, text)) = current.take() {
                if !text.trim().is_empty() {
                    cues.push(SubtitleCue::Text {
                        start_us,
                        end_us,
                        text: text.trim().to_string(),
                    });
                }
            }
            continue;
        }

        // 序号行忽略
        if line.chars().all(|c| c.is_ascii_digit()) && current.is_none() {
            continue;
        }

        if line.contains("-->") {
            if let Some((start, end)) = parse_time_line(line, parse_srt_timestamp) {
                current = Some((start, end, String::new()));
            } else {
                warn!("无法解析 SRT 时间行: {}", line);
            }
            continue;
        }

        if let Some((_, _, ref mut text)) = current {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
        }
    }

    // 处理最后一个条目
    if let Some((start_us, end_us, text)) = current {
        if !text.trim().is_empty() {
            cues.push(SubtitleCue::Text {
                start_us,
                end_us,
                text: text.trim().to_string(),
            });
        }
    }

    info!("解析 SRT 字幕完成，共 {} 条", cues.len());
    cues
}

/// 解析 ASS/SSA 文件的 [Events] 段
fn parse_ass_file(content: &str) -> Vec<SubtitleCue> {
    let format = parse_ass_format(content).unwrap_or_else(default_ass_format);
    let mut cues = Vec::new();
    let mut in_events = false;

    let start_idx = format.iter().position(|f| f.eq_ignore_ascii_case("Start"));
    let end_idx = format.iter().position(|f| f.eq_ignore_ascii_case("End"));

    for line in content.lines() {
        let line = line.trim();
        if line.eq_ignore_ascii_case("[Events]") {
            in_events = true;
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            in_events = false;
            continue;
        }
        if !in_events {
            continue;
        }
        let Some(rest) = line.strip_prefix("Dialogue:") else {
            continue;
        };

        let fields: Vec<&str> = rest.splitn(format.len(), ',').collect();
        if fields.len() < format.len() {
            continue;
        }
        let (Some(si), Some(ei)) = (start_idx, end_idx) else {
            continue;
        };
        let (Some(start_us), Some(end_us)) = (
            parse_ass_timestamp(fields[si].trim()),
            parse_ass_timestamp(fields[ei].trim()),
        ) else {
            continue;
        };

        // Text 是最后一列，保留 {\...} 标签交给渲染端
        let text = fields[format.len() - 1].trim();
        if !text.is_empty() {
            cues.push(SubtitleCue::Text {
                start_us,
                end_us,
                text: text.to_string(),
            });
        }
    }

    info!("解析 ASS 字幕完成，共 {} 条", cues.len());
    cues
}

/// 解析 WebVTT 格式字幕
fn parse_vtt(content: &str) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut lines = content.lines();

    // 跳过 WEBVTT 头部
    if let Some(first_line) = lines.next() {
        if !first_line.trim().starts_with("WEBVTT") {
            warn!("VTT 文件缺少 WEBVTT 头部");
        }
    }

    let mut current: Option<(i64, i64, String)> = None;

    for line in lines {
        let line = line.trim();

        if line.is_empty() {
            if let Some((start_us, end_us, text)) = current.take() {
                if !text.trim().is_empty() {
                    cues.push(SubtitleCue::Text {
                        start_us,
                        end_us,
                        text: text.trim().to_string(),
                    });
                }
            }
            continue;
        }

        if line.contains("-->") {
            if let Some((start, end)) = parse_time_line(line, parse_vtt_timestamp) {
                current = Some((start, end, String::new()));
            } else {
                warn!("无法解析 VTT 时间行: {}", line);
            }
            continue;
        }

        if line.starts_with("NOTE") || line.starts_with("STYLE") {
            continue;
        }

        if let Some((_, _, ref mut text)) = current {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
        }
    }

    if let Some((start_us, end_us, text)) = current {
        if !text.trim().is_empty() {
            cues.push(SubtitleCue::Text {
                start_us,
                end_us,
                text: text.trim().to_string(),
            });
        }
    }

    info!("解析 VTT 字幕完成，共 {} 条", cues.len());
    cues
}

/// 解析 "start --> end" 时间行
fn parse_time_line(line: &str, parse: fn(&str) -> Option<i64>) -> Option<(i64, i64)> {
    let parts: Vec<&str> = line.split("-->").map(|s| s.trim()).collect();
    if parts.len() != 2 {
        return None;
    }
    // VTT 的 end 部分后面可能跟排版设置
    let end_part = parts[1].split_whitespace().next()?;
    Some((parse(parts[0])?, parse(end_part)?))
}

/// 解析 SRT 时间戳：00:01:30,500 -> 90_500_000 µs
fn parse_srt_timestamp(timestamp: &str) -> Option<i64> {
    let parts: Vec<&str> = timestamp.split(',').collect();
    if parts.len() != 2 {
        return None;
    }
    let ms_part: i64 = parts[1].parse().ok()?;
    let hms = parse_hms(parts[0])?;
    Some((hms + ms_part) * 1000)
}

/// 解析 ASS 时间戳：0:01:30.50 -> 90_500_000 µs
fn parse_ass_timestamp(timestamp: &str) -> Option<i64> {
    let parts: Vec<&str> = timestamp.split('.').collect();
    if parts.len() != 2 {
        return None;
    }
    let centiseconds: i64 = parts[1].parse().ok()?;
    let hms = parse_hms(parts[0])?;
    Some((hms + centiseconds * 10) * 1000)
}

/// 解析 VTT 时间戳：00:01:30.500 或 01:30.500 -> µs
fn parse_vtt_timestamp(timestamp: &str) -> Option<i64> {
    let parts: Vec<&str> = timestamp.split('.').collect();
    if parts.len() != 2 {
        return None;
    }
    let ms_part: i64 = parts[1].parse().ok()?;
    let time_components: Vec<&str> = parts[0].split(':').collect();
    let ms = match time_components.len() {
        2 => {
            let minutes: i64 = time_components[0].parse().ok()?;
            let seconds: i64 = time_components[1].parse().ok()?;
            minutes * 60_000 + seconds * 1000 + ms_part
        }
        3 => parse_hms(parts[0])? + ms_part,
        _ => return None,
    };
    Some(ms * 1000)
}

/// "HH:MM:SS" -> 毫秒
fn parse_hms(time_part: &str) -> Option<i64> {
    let c: Vec<&str> = time_part.split(':').collect();
    if c.len() != 3 {
        return None;
    }
    let hours: i64 = c[0].parse().ok()?;
    let minutes: i64 = c[1].parse().ok()?;
    let seconds: i64 = c[2].parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_srt_timestamp() {
        assert_eq!(parse_srt_timestamp("00:01:30,500"), Some(90_500_000));
        assert_eq!(parse_srt_timestamp("01:23:45,123"), Some(5_025_123_000));
    }

    #[test]
    fn test_parse_ass_timestamp() {
        assert_eq!(parse_ass_timestamp("0:01:30.50"), Some(90_500_000));
        assert_eq!(parse_ass_timestamp("1:23:45.12"), Some(5_025_120_000));
    }

    #[test]
    fn test_parse_vtt_timestamp() {
        assert_eq!(parse_vtt_timestamp("00:01:30.500"), Some(90_500_000));
        assert_eq!(parse_vtt_timestamp("01:30.500"), Some(90_500_000));
    }

    #[test]
    fn test_parse_ass_format() {
        let header = "[Script Info]\nTitle: x\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";
        let format = parse_ass_format(header).unwrap();
        assert_eq!(format.len(), 10);
        assert_eq!(format[0], "Layer");
        assert_eq!(format[9], "Text");
    }

    #[test]
    fn test_ass_block_text_projection() {
        let format = default_ass_format();
        // ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text
        let line = "0,0,Default,,0,0,0,,{\\an8}你好, 世界";
        assert_eq!(
            ass_block_text(&format, line),
            Some("{\\an8}你好, 世界".to_string())
        );
    }

    #[test]
    fn test_parse_srt_multi_entry() {
        let srt = "1\n00:00:01,000 --> 00:00:02,000\n第一行\n\n2\n00:00:03,000 --> 00:00:04,500\n第二行\n继续\n";
        let cues = parse_srt(srt);
        assert_eq!(cues.len(), 2);
        match &cues[1] {
            SubtitleCue::Text { start_us, end_us, text } => {
                assert_eq!(*start_us, 3_000_000);
                assert_eq!(*end_us, 4_500_000);
                assert_eq!(text, "第二行\n继续");
            }
            _ => panic!("期望文本提示"),
        }
    }

    #[test]
    fn test_pgs_wrap_segments() {
        // 两个裸段: (0x16, len=2, [1,2]) (0x80, len=0, [])
        let payload = vec![0x16, 0x00, 0x02, 0x01, 0x02, 0x80, 0x00, 0x00];
        let mut out = Vec::new();
        pgs_wrap_segments(&payload, 90_000, &mut out);

        // 13 字节头 + 2 字节数据，再一个 13 字节头
        assert_eq!(out.len(), 13 + 2 + 13);
        assert_eq!(&out[0..2], &PG_MAGIC);
        assert_eq!(u32::from_be_bytes([out[2], out[3], out[4], out[5]]), 90_000);
        assert_eq!(out[10], 0x16);
        assert_eq!(u16::from_be_bytes([out[11], out[12]]), 2);
        assert_eq!(&out[13..15], &[0x01, 0x02]);
        assert_eq!(out[15 + 10], 0x80);
    }

    #[test]
    fn test_pts_90k_conversion() {
        assert_eq!(pts_90k_from_us(1_000_000), 90_000);
        assert_eq!(pts_90k_from_us(1_042_000), 93_780);
    }

    #[test]
    fn test_is_sup_stream() {
        assert!(is_sup_stream(&[0x50, 0x47, 0x00]));
        assert!(!is_sup_stream(&[0x16, 0x00]));
    }
}
