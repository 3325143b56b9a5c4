//! 流信息.
//!
//! 每条流在第一次出现单元时创建, 之后只做累加更新, 不会被删除.

use serde::Serialize;
use xi_bitstream::{Codec, VideoParams};
use xi_core::{MediaType, Rational};

/// 流信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    /// 流索引
    pub index: usize,
    pub media_type: MediaType,
    /// 码流类型, 不做语法解析的流为 None
    pub codec: Option<Codec>,
    /// 显示用的编码名称
    pub codec_name: String,
    /// 单元总数
    pub unit_count: u64,
    /// 单元负载字节总数
    pub byte_count: u64,
    /// 解析失败的单元数
    pub error_count: u64,
    /// 图像数 (每幅图像的第一个 slice 计一次)
    pub picture_count: u64,
    pub frame_rate: Option<Rational>,
    /// (宽, 高)
    pub resolution: Option<(u32, u32)>,
    /// 如 "High@4.0"
    pub profile: Option<String>,
}

impl StreamInfo {
    pub fn new(index: usize, media_type: MediaType, codec: Option<Codec>) -> Self {
        Self {
            index,
            media_type,
            codec,
            codec_name: codec.map_or_else(|| media_type.name().to_string(), |c| c.name().to_string()),
            unit_count: 0,
            byte_count: 0,
            error_count: 0,
            picture_count: 0,
            frame_rate: None,
            resolution: None,
            profile: None,
        }
    }

    /// 用参数集中的视频参数更新, 返回是否有变化
    pub fn apply_params(&mut self, params: &VideoParams) -> bool {
        let resolution = Some((params.width, params.height));
        let frame_rate = params.frame_rate.or(self.frame_rate);
        let profile = params.profile.clone().or_else(|| self.profile.clone());
        let changed =
            self.resolution != resolution || self.frame_rate != frame_rate || self.profile != profile;
        self.resolution = resolution;
        self.frame_rate = frame_rate;
        self.profile = profile;
        changed
    }

    /// 按图像数与帧率估算的时长 (秒)
    pub fn duration_secs(&self) -> Option<f64> {
        let fps = self.frame_rate?.to_f64();
        if !fps.is_finite() || fps <= 0.0 || self.picture_count == 0 {
            return None;
        }
        Some(self.picture_count as f64 / fps)
    }

    /// 平均码率估算 (bit/s)
    pub fn bit_rate(&self) -> Option<u64> {
        let secs = self.duration_secs()?;
        Some((self.byte_count as f64 * 8.0 / secs) as u64)
    }
}
