//! 跨单元的解析上下文.
//!
//! 参数集等状态只在单元解析成功后写入, 解析函数本身只读取上下文.

use xi_core::Rational;

use crate::avc::AvcState;
use crate::codec::Codec;
use crate::dispatch::ParsedRecord;
use crate::hevc::HevcState;
use crate::mpeg2::{Mpeg2Extension, Mpeg2State};

/// 从参数集得到的视频参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<Rational>,
    /// 如 "High@4.0"
    pub profile: Option<String>,
}

/// 三种码流的解析状态
#[derive(Debug, Clone, Default)]
pub struct ParserContext {
    pub avc: AvcState,
    pub hevc: HevcState,
    pub mpeg2: Mpeg2State,
}

impl ParserContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个解析成功的单元
    pub fn store(&mut self, record: &ParsedRecord) {
        match record {
            ParsedRecord::AvcSps(sps) => self.avc.store_sps(sps.clone()),
            ParsedRecord::AvcPps(pps) => self.avc.store_pps(pps.clone()),
            ParsedRecord::AvcSlice(slice) => self.avc.activate_pps(slice.pps_id),
            ParsedRecord::HevcVps(vps) => self.hevc.store_vps(vps.clone()),
            ParsedRecord::HevcSps(sps) => self.hevc.store_sps(sps.clone()),
            ParsedRecord::HevcPps(pps) => self.hevc.store_pps(pps.clone()),
            ParsedRecord::Mpeg2Sequence(seq) => {
                // 新的序列头之后必须重新出现 sequence_extension
                self.mpeg2.sequence = Some(seq.clone());
                self.mpeg2.sequence_extension = None;
            }
            ParsedRecord::Mpeg2Extension(Mpeg2Extension::Sequence(ext)) => {
                self.mpeg2.sequence_extension = Some(ext.clone());
            }
            _ => {}
        }
    }

    /// 参数集单元对应的视频参数, 其他单元返回 None
    pub fn video_params(&self, codec: Codec, record: &ParsedRecord) -> Option<VideoParams> {
        match (codec, record) {
            (Codec::Avc, ParsedRecord::AvcSps(sps)) => Some(VideoParams {
                width: sps.width,
                height: sps.height,
                frame_rate: sps.frame_rate(),
                profile: Some(sps.profile_level()),
            }),
            (Codec::Hevc, ParsedRecord::HevcSps(sps)) => Some(VideoParams {
                width: sps.width,
                height: sps.height,
                frame_rate: sps.frame_rate(),
                profile: Some(sps.ptl.describe()),
            }),
            (
                Codec::Mpeg2,
                ParsedRecord::Mpeg2Sequence(_)
                | ParsedRecord::Mpeg2Extension(Mpeg2Extension::Sequence(_)),
            ) => {
                let (width, height) = self.mpeg2.frame_size()?;
                Some(VideoParams {
                    width,
                    height,
                    frame_rate: self.mpeg2.frame_rate(),
                    profile: self
                        .mpeg2
                        .sequence_extension
                        .as_ref()
                        .map(|e| e.profile_level()),
                })
            }
            _ => None,
        }
    }
}
