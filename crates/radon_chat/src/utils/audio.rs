//! 音频时长探测
//!
//! 仅解析 RIFF/WAVE 头部，其他格式按 32000 字节/秒估算

/// 未能解析音频头部时使用的码率估算（字节/秒）
pub const FALLBACK_BYTES_PER_SECOND: u64 = 32_000;

/// 从 WAV 头部读取时长（整秒，向下取整）
pub fn probe_duration(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let mut byte_rate: Option<u32> = None;
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?);
        let body = offset + 8;
        match id {
            b"fmt " => {
                if body + 12 > bytes.len() {
                    return None;
                }
                byte_rate = Some(u32::from_le_bytes(bytes[body + 8..body + 12].try_into().ok()?));
            }
            b"data" => {
                let rate = byte_rate.filter(|rate| *rate > 0)?;
                // 流式录音的 data 块长度可能是占位值，以实际剩余字节为上限
                let available = (bytes.len() - body) as u64;
                let size = (size as u64).min(available);
                return u32::try_from(size / rate as u64).ok();
            }
            _ => {}
        }
        // 块按偶数字节对齐
        offset = body + size as usize + (size as usize & 1);
    }
    None
}

/// 按文件大小估算时长（整秒）
pub fn estimate_duration(size: u64) -> u32 {
    u32::try_from(size / FALLBACK_BYTES_PER_SECOND).unwrap_or(u32::MAX)
}
