//! H.265 VUI 参数解析 (E.2.1).

use xi_core::{BitReader, Rational, XiResult};

use super::hrd::{HevcHrdParameters, parse_hevc_hrd_parameters};
use crate::avc::vui::{parse_aspect_ratio, parse_video_signal_type};

/// HEVC VUI 时序信息 (VPS 与 VUI 共用)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcTimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub num_ticks_poc_diff_one_minus1: Option<u32>,
}

impl HevcTimingInfo {
    /// 帧率 = time_scale / num_units_in_tick
    pub fn frame_rate(&self) -> Option<Rational> {
        if self.num_units_in_tick == 0 || self.time_scale == 0 {
            return None;
        }
        Some(Rational::new(self.time_scale, self.num_units_in_tick).reduce())
    }
}

/// 解析 num_units_in_tick / time_scale / poc_proportional 三元组
pub(crate) fn parse_timing_info(r: &mut BitReader, prefix: &str) -> XiResult<HevcTimingInfo> {
    let num_units_in_tick = r.u(&format!("{prefix}_num_units_in_tick"), 32)?;
    let time_scale = r.u(&format!("{prefix}_time_scale"), 32)?;
    let mut timing = HevcTimingInfo {
        num_units_in_tick,
        time_scale,
        num_ticks_poc_diff_one_minus1: None,
    };
    match timing.frame_rate() {
        Some(fps) => r.annotate(&format!("{:.3} fps", fps.to_f64())),
        None => r.annotate("num_units_in_tick 或 time_scale 为 0, 无法计算帧率"),
    }
    if r.flag(&format!("{prefix}_poc_proportional_to_timing_flag"))? {
        timing.num_ticks_poc_diff_one_minus1 =
            Some(r.ue(&format!("{prefix}_num_ticks_poc_diff_one_minus1"))?);
    }
    Ok(timing)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcVui {
    pub sar: Rational,
    pub video_full_range_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub field_seq_flag: bool,
    pub timing: Option<HevcTimingInfo>,
    pub hrd: Option<HevcHrdParameters>,
}

/// 解析 vui_parameters()
pub fn parse_hevc_vui(r: &mut BitReader, max_sub_layers_minus1: u32) -> XiResult<HevcVui> {
    r.enter("vui_parameters()");
    let sar = parse_aspect_ratio(r)?.unwrap_or(Rational::new(1, 1));
    if r.flag("overscan_info_present_flag")? {
        r.flag("overscan_appropriate_flag")?;
    }
    let signal = parse_video_signal_type(r)?;
    if r.flag("chroma_loc_info_present_flag")? {
        r.ue("chroma_sample_loc_type_top_field")?;
        r.ue("chroma_sample_loc_type_bottom_field")?;
    }
    r.flag("neutral_chroma_indication_flag")?;
    let field_seq_flag = r.flag("field_seq_flag")?;
    r.flag("frame_field_info_present_flag")?;
    if r.flag("default_display_window_flag")? {
        r.ue("def_disp_win_left_offset")?;
        r.ue("def_disp_win_right_offset")?;
        r.ue("def_disp_win_top_offset")?;
        r.ue("def_disp_win_bottom_offset")?;
    }

    let mut timing = None;
    let mut hrd = None;
    if r.flag("vui_timing_info_present_flag")? {
        timing = Some(parse_timing_info(r, "vui")?);
        if r.flag("vui_hrd_parameters_present_flag")? {
            hrd = Some(parse_hevc_hrd_parameters(r, true, max_sub_layers_minus1)?);
        }
    }

    if r.flag("bitstream_restriction_flag")? {
        r.flag("tiles_fixed_structure_flag")?;
        r.flag("motion_vectors_over_pic_boundaries_flag")?;
        r.flag("restricted_ref_pic_lists_flag")?;
        let idc = r.ue("min_spatial_segmentation_idc")?;
        r.check_range("min_spatial_segmentation_idc", i64::from(idc), 0, 4095)?;
        r.ue("max_bytes_per_pic_denom")?;
        r.ue("max_bits_per_min_cu_denom")?;
        r.ue("log2_max_mv_length_horizontal")?;
        r.ue("log2_max_mv_length_vertical")?;
    }
    r.exit();

    Ok(HevcVui {
        sar,
        video_full_range_flag: signal.video_full_range_flag,
        colour_primaries: signal.colour_primaries,
        transfer_characteristics: signal.transfer_characteristics,
        matrix_coefficients: signal.matrix_coefficients,
        field_seq_flag,
        timing,
        hrd,
    })
}
