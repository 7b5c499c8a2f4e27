// 编解码器字符串与配置记录：ISO-BMFF 约定的 codec 标识

/// 从 AVCDecoderConfigurationRecord 构造 avc1 字符串
///
/// profile / compat / level 在记录的字节 1..4。
pub(crate) fn avc_string(avcc: &[u8]) -> Option<String> {
    if avcc.len() < 4 {
        return None;
    }
    Some(format!("avc1.{:02X}{:02X}{:02X}", avcc[1], avcc[2], avcc[3]))
}

/// 按 HEVCDecoderConfigurationRecord 构造 hvc1 字符串
pub(crate) fn hevc_string(p: &[u8]) -> Option<String> {
    if p.len() < 13 {
        return None;
    }
    let profile_space = (p[1] >> 6) & 0x03;
    let tier = (p[1] >> 5) & 0x01;
    let profile_idc = p[1] & 0x1F;
    // 兼容位按 ISO 14496-15 约定反转后取十六进制
    let compat = u32::from_be_bytes([p[2], p[3], p[4], p[5]]).reverse_bits();
    let level_idc = p[12];

    let space_prefix = ["", "A", "B", "C"][profile_space as usize];
    let mut s = format!(
        "hvc1.{}{}.{:X}.{}{}",
        space_prefix,
        profile_idc,
        compat,
        if tier == 1 { 'H' } else { 'L' },
        level_idc
    );
    // 约束字节：去掉结尾的全零
    let mut constraints: &[u8] = &p[6..12];
    while constraints.last() == Some(&0) {
        constraints = &constraints[..constraints.len() - 1];
    }
    for b in constraints {
        s.push_str(&format!(".{:X}", b));
    }
    Some(s)
}

/// 按 AV1CodecConfigurationRecord 前 3 字节构造 av01 字符串
pub(crate) fn av1_string(p: &[u8]) -> Option<String> {
    if p.len() < 3 {
        return None;
    }
    let profile = (p[1] >> 5) & 0x07;
    let level = p[1] & 0x1F;
    let tier = if (p[2] >> 7) & 1 == 1 { 'H' } else { 'M' };
    let high = (p[2] >> 6) & 1;
    let twelve = (p[2] >> 5) & 1;
    let depth = if high == 1 {
        if twelve == 1 {
            12
        } else {
            10
        }
    } else {
        8
    };
    Some(format!("av01.{}.{:02}{}.{:02}", profile, level, tier, depth))
}

/// MP4 vpcC 盒构造 vp09 字符串（盒体：version+flags 4 字节，随后 profile/level/depth）
pub(crate) fn vp9_string_from_vpcc(p: &[u8]) -> Option<String> {
    if p.len() < 7 {
        return None;
    }
    let profile = p[4];
    let level = p[5];
    let depth = p[6] >> 4;
    Some(format!("vp09.{:02}.{:02}.{:02}", profile, level, depth))
}

/// MKV V_VP9 的 CodecPrivate 是 (id, len, value) 特性三元组；缺省 vp09.00.10.08
pub(crate) fn vp9_string_from_features(private: Option<&[u8]>) -> String {
    let (mut profile, mut level, mut depth) = (0u8, 10u8, 8u8);
    if let Some(p) = private {
        let mut pos = 0usize;
        while pos + 2 <= p.len() {
            let id = p[pos];
            let len = p[pos + 1] as usize;
            if pos + 2 + len > p.len() {
                break;
            }
            if len == 1 {
                let v = p[pos + 2];
                match id {
                    1 => profile = v,
                    2 => level = v,
                    3 => depth = v,
                    _ => {}
                }
            }
            pos += 2 + len;
        }
    }
    format!("vp09.{:02}.{:02}.{:02}", profile, level, depth)
}

/// 从 AudioSpecificConfig 首字节的高 5 位取 AOT
pub(crate) fn aac_string_from_asc(asc: &[u8]) -> Option<String> {
    let aot = asc.first()? >> 3;
    Some(format!("mp4a.40.{}", aot))
}

/// 从 OpusHead 取声道数（轨道头没给时的兜底）
pub(crate) fn opus_channel_count(private: Option<&[u8]>) -> Option<u16> {
    let p = private?;
    if p.len() >= 10 && &p[0..8] == b"OpusHead" {
        Some(p[9] as u16)
    } else {
        None
    }
}
