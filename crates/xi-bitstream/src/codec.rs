//! 码流类型识别.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scan::scan_units;

/// 可分析的码流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// H.264 / AVC
    Avc,
    /// H.265 / HEVC
    Hevc,
    /// MPEG-2 Video (H.262)
    Mpeg2,
}

impl Codec {
    /// 显示名称
    pub fn name(self) -> &'static str {
        match self {
            Self::Avc => "H.264/AVC",
            Self::Hevc => "H.265/HEVC",
            Self::Mpeg2 => "MPEG-2 Video",
        }
    }

    /// 是否使用 emulation prevention 字节
    pub fn uses_emulation_prevention(self) -> bool {
        !matches!(self, Self::Mpeg2)
    }

    /// 根据文件扩展名识别
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "264" | "h264" | "avc" | "jsv" | "26l" => Some(Self::Avc),
            "265" | "h265" | "hevc" | "bit" => Some(Self::Hevc),
            "m2v" | "mpv" | "m2video" | "mpg2" | "262" => Some(Self::Mpeg2),
            _ => None,
        }
    }

    /// 根据码流内容探测
    ///
    /// 检查前若干个单元的首字节: MPEG-2 的 0xB3 序列头, HEVC 的 VPS/SPS/PPS/AUD
    /// 两字节头, 以及 AVC 的 SPS/PPS/AUD/SEI 一字节头. 先命中者获胜.
    pub fn probe(data: &[u8]) -> Option<Self> {
        for range in scan_units(data).take(16) {
            let unit = range.slice(data);
            let first = unit[0];
            if first == 0xB3 {
                return Some(Self::Mpeg2);
            }
            if unit.len() >= 2 && first & 0x81 == 0 {
                let hevc_type = (first >> 1) & 0x3F;
                let tid_plus1 = unit[1] & 0x07;
                if (32..=35).contains(&hevc_type) && tid_plus1 != 0 && unit[1] >> 3 == 0 {
                    return Some(Self::Hevc);
                }
            }
            if first & 0x80 == 0 && matches!(first & 0x1F, 6..=9) {
                return Some(Self::Avc);
            }
        }
        None
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
