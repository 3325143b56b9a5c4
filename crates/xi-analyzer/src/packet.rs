//! 已解封装的数据包输入.
//!
//! 容器解封装不在本库范围内, 调用方把各条流的数据包通过 [`PacketSource`] 送入
//! 后台解析器. 视频包按 [`Framing`] 切分为单元并做语法解析, 其他媒体类型的包
//! 作为原始单元记录在各自的流下.

use std::collections::VecDeque;

use bytes::Bytes;
use xi_bitstream::Codec;
use xi_core::{MediaType, XiResult};

/// 包内单元的封装方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// 起始码分隔 (Annex B / MPEG-2 ES)
    AnnexB,
    /// 大端长度前缀 (avcC / hvcC), 参数为前缀字节数 1~4
    LengthPrefixed(usize),
    /// 整个包就是一个单元
    Raw,
}

/// 已解封装的数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 包数据
    pub data: Bytes,
    /// 所属流的索引
    pub stream_index: usize,
    /// 所属流的媒体类型
    pub media_type: MediaType,
    /// 视频流的码流类型, 为空时包内容不做语法解析
    pub codec: Option<Codec>,
    pub framing: Framing,
    /// 显示时间戳 (None 表示未知)
    pub pts: Option<i64>,
    /// 在容器中的字节偏移 (-1 表示未知)
    pub pos: i64,
}

impl Packet {
    /// 创建视频包
    pub fn video(stream_index: usize, codec: Codec, framing: Framing, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            stream_index,
            media_type: MediaType::Video,
            codec: Some(codec),
            framing,
            pts: None,
            pos: -1,
        }
    }

    /// 创建不做语法解析的包 (音频、字幕等)
    pub fn opaque(stream_index: usize, media_type: MediaType, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            stream_index,
            media_type,
            codec: None,
            framing: Framing::Raw,
            pts: None,
            pos: -1,
        }
    }

    /// 设置时间戳
    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空包
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 数据包来源
pub trait PacketSource: Send {
    /// 读取下一个包, 结束时返回 None
    fn next_packet(&mut self) -> XiResult<Option<Packet>>;

    /// 全部包的总字节数 (如果可知), 用于计算进度
    fn total_size(&self) -> Option<u64> {
        None
    }
}

/// 内存中的包序列
#[derive(Debug, Default)]
pub struct VecPacketSource {
    packets: VecDeque<Packet>,
    total: u64,
}

impl VecPacketSource {
    pub fn new(packets: Vec<Packet>) -> Self {
        let total = packets.iter().map(|p| p.size() as u64).sum();
        Self {
            packets: packets.into(),
            total,
        }
    }
}

impl PacketSource for VecPacketSource {
    fn next_packet(&mut self) -> XiResult<Option<Packet>> {
        Ok(self.packets.pop_front())
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.total)
    }
}
