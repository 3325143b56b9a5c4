//! 媒体类型定义.

use std::fmt;

use serde::Serialize;

/// 流的媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// 视频流
    Video,
    /// 音频流
    Audio,
    /// 其他 (字幕、数据等)
    Other,
}

impl MediaType {
    /// 英文名称, 用于 JSON 等机器可读输出
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "视频",
            Self::Audio => "音频",
            Self::Other => "其他",
        };
        write!(f, "{name}")
    }
}
