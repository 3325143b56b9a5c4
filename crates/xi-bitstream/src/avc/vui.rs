//! H.264 VUI (Video Usability Information) 参数解析 (E.1.1).

use serde::Serialize;
use xi_core::{BitReader, Rational, XiResult};

use super::hrd::{HrdParameters, parse_hrd_parameters};

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),    // 0: 未指定
    (1, 1),    // 1: 1:1
    (12, 11),  // 2: 12:11
    (10, 11),  // 3: 10:11
    (16, 11),  // 4: 16:11
    (40, 33),  // 5: 40:33
    (24, 11),  // 6: 24:11
    (20, 11),  // 7: 20:11
    (32, 11),  // 8: 32:11
    (80, 33),  // 9: 80:33
    (18, 11),  // 10: 18:11
    (15, 11),  // 11: 15:11
    (64, 33),  // 12: 64:33
    (160, 99), // 13: 160:99
    (4, 3),    // 14: 4:3
    (3, 2),    // 15: 3:2
    (2, 1),    // 16: 2:1
];

/// aspect_ratio_idc 的扩展取值
const EXTENDED_SAR: u32 = 255;

const VIDEO_FORMAT_NAMES: [&str; 6] = ["Component", "PAL", "NTSC", "SECAM", "MAC", "Unspecified"];

/// VUI 时序信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,
}

impl TimingInfo {
    /// 帧率 = time_scale / (2 * num_units_in_tick)
    pub fn frame_rate(&self) -> Option<Rational> {
        if self.num_units_in_tick == 0 || self.time_scale == 0 {
            return None;
        }
        let den = self.num_units_in_tick.checked_mul(2)?;
        Some(Rational::new(self.time_scale, den).reduce())
    }
}

/// 码流限制信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitstreamRestriction {
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

/// VUI 参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VuiParameters {
    /// 像素宽高比, 未指定时为 1:1
    pub sar: Rational,
    pub video_full_range_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub timing: Option<TimingInfo>,
    pub nal_hrd: Option<HrdParameters>,
    pub vcl_hrd: Option<HrdParameters>,
    pub low_delay_hrd_flag: bool,
    pub pic_struct_present_flag: bool,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl VuiParameters {
    /// CpbDpbDelaysPresentFlag
    pub fn cpb_dpb_delays_present(&self) -> bool {
        self.nal_hrd.is_some() || self.vcl_hrd.is_some()
    }

    /// 优先返回 NAL HRD, 其次 VCL HRD
    pub fn hrd(&self) -> Option<&HrdParameters> {
        self.nal_hrd.as_ref().or(self.vcl_hrd.as_ref())
    }
}

/// 解析 aspect_ratio_info_present_flag 及其后的 SAR 字段 (H.264 与 H.265 相同)
///
/// 未出现或未指定时返回 `None`.
pub(crate) fn parse_aspect_ratio(r: &mut BitReader) -> XiResult<Option<Rational>> {
    if !r.flag("aspect_ratio_info_present_flag")? {
        return Ok(None);
    }
    let ar_idc = r.u("aspect_ratio_idc", 8)?;
    if ar_idc == EXTENDED_SAR {
        r.annotate("Extended_SAR");
        let sar_w = r.u("sar_width", 16)?;
        let sar_h = r.u("sar_height", 16)?;
        if sar_w != 0 && sar_h != 0 {
            return Ok(Some(Rational::new(sar_w, sar_h)));
        }
    } else if let Some(&(w, h)) = SAR_TABLE.get(ar_idc as usize) {
        if w > 0 {
            r.annotate(&format!("{w}:{h}"));
            return Ok(Some(Rational::new(w, h)));
        }
        r.annotate("未指定");
    } else {
        r.annotate("保留值");
    }
    Ok(None)
}

/// video_signal_type 相关字段, 未出现时为推断值 (2 = 未指定)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VideoSignalType {
    pub video_full_range_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

pub(crate) fn parse_video_signal_type(r: &mut BitReader) -> XiResult<VideoSignalType> {
    let mut signal = VideoSignalType {
        video_full_range_flag: false,
        colour_primaries: 2,
        transfer_characteristics: 2,
        matrix_coefficients: 2,
    };
    if r.flag("video_signal_type_present_flag")? {
        let video_format = r.u("video_format", 3)?;
        if let Some(name) = VIDEO_FORMAT_NAMES.get(video_format as usize) {
            r.annotate(name);
        }
        signal.video_full_range_flag = r.flag("video_full_range_flag")?;
        if r.flag("colour_description_present_flag")? {
            signal.colour_primaries = r.u("colour_primaries", 8)? as u8;
            signal.transfer_characteristics = r.u("transfer_characteristics", 8)? as u8;
            signal.matrix_coefficients = r.u("matrix_coefficients", 8)? as u8;
        }
    }
    Ok(signal)
}

/// 解析 vui_parameters()
pub fn parse_vui(r: &mut BitReader) -> XiResult<VuiParameters> {
    r.enter("vui_parameters()");
    let mut vui = VuiParameters {
        sar: Rational::new(1, 1),
        video_full_range_flag: false,
        colour_primaries: 2,
        transfer_characteristics: 2,
        matrix_coefficients: 2,
        timing: None,
        nal_hrd: None,
        vcl_hrd: None,
        low_delay_hrd_flag: false,
        pic_struct_present_flag: false,
        bitstream_restriction: None,
    };

    if let Some(sar) = parse_aspect_ratio(r)? {
        vui.sar = sar;
    }

    if r.flag("overscan_info_present_flag")? {
        r.flag("overscan_appropriate_flag")?;
    }

    let signal = parse_video_signal_type(r)?;
    vui.video_full_range_flag = signal.video_full_range_flag;
    vui.colour_primaries = signal.colour_primaries;
    vui.transfer_characteristics = signal.transfer_characteristics;
    vui.matrix_coefficients = signal.matrix_coefficients;

    if r.flag("chroma_loc_info_present_flag")? {
        r.ue("chroma_sample_loc_type_top_field")?;
        r.ue("chroma_sample_loc_type_bottom_field")?;
    }

    if r.flag("timing_info_present_flag")? {
        let timing = TimingInfo {
            num_units_in_tick: r.u("num_units_in_tick", 32)?,
            time_scale: r.u("time_scale", 32)?,
            fixed_frame_rate_flag: r.flag("fixed_frame_rate_flag")?,
        };
        match timing.frame_rate() {
            Some(fps) => r.annotate(&format!("{:.3} fps", fps.to_f64())),
            None => r.annotate("num_units_in_tick 或 time_scale 为 0, 无法计算帧率"),
        }
        vui.timing = Some(timing);
    }

    if r.flag("nal_hrd_parameters_present_flag")? {
        vui.nal_hrd = Some(parse_hrd_parameters(r)?);
    }
    if r.flag("vcl_hrd_parameters_present_flag")? {
        vui.vcl_hrd = Some(parse_hrd_parameters(r)?);
    }
    if vui.cpb_dpb_delays_present() {
        vui.low_delay_hrd_flag = r.flag("low_delay_hrd_flag")?;
    }
    vui.pic_struct_present_flag = r.flag("pic_struct_present_flag")?;

    if r.flag("bitstream_restriction_flag")? {
        vui.bitstream_restriction = Some(BitstreamRestriction {
            motion_vectors_over_pic_boundaries_flag: r
                .flag("motion_vectors_over_pic_boundaries_flag")?,
            max_bytes_per_pic_denom: r.ue("max_bytes_per_pic_denom")?,
            max_bits_per_mb_denom: r.ue("max_bits_per_mb_denom")?,
            log2_max_mv_length_horizontal: r.ue("log2_max_mv_length_horizontal")?,
            log2_max_mv_length_vertical: r.ue("log2_max_mv_length_vertical")?,
            max_num_reorder_frames: r.ue("max_num_reorder_frames")?,
            max_dec_frame_buffering: r.ue("max_dec_frame_buffering")?,
        });
    }
    r.exit();

    Ok(vui)
}
