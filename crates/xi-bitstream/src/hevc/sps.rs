//! H.265/HEVC SPS 解析器 (7.3.2.2).
//!
//! SPS 包含编码视频序列的参数: profile/level, 分辨率, 色度格式, CTB 尺寸,
//! 短期参考图像集与 VUI 等. slice segment header 依赖其中多项字段.

use xi_core::{BitReader, FieldValue, Rational, XiError, XiResult};

use super::ptl::{ProfileTierLevel, parse_profile_tier_level};
use super::rps::{ShortTermRps, parse_st_ref_pic_set};
use super::vps::parse_sub_layer_ordering_info;
use super::vui::{HevcVui, parse_hevc_vui};

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcSps {
    /// SPS 所引用的 VPS ID
    pub vps_id: u8,
    pub max_sub_layers_minus1: u8,
    pub ptl: ProfileTierLevel,
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    /// 原始宽度 (像素, 未裁剪)
    pub pic_width: u32,
    /// 原始高度 (像素, 未裁剪)
    pub pic_height: u32,
    /// 图像宽度 (像素, 已应用 conformance window)
    pub width: u32,
    /// 图像高度 (像素, 已应用 conformance window)
    pub height: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub log2_max_poc_lsb: u32,
    pub log2_min_cb_size: u32,
    pub log2_ctb_size: u32,
    pub scaling_list_enabled_flag: bool,
    pub amp_enabled_flag: bool,
    pub sample_adaptive_offset_enabled_flag: bool,
    pub pcm_enabled_flag: bool,
    pub st_rps: Vec<ShortTermRps>,
    pub long_term_ref_pics_present_flag: bool,
    pub lt_ref_pic_poc_lsb_sps: Vec<u32>,
    pub used_by_curr_pic_lt_sps_flag: Vec<bool>,
    pub temporal_mvp_enabled_flag: bool,
    pub strong_intra_smoothing_enabled_flag: bool,
    pub vui: Option<HevcVui>,
    pub high_precision_offsets_enabled_flag: bool,
}

impl HevcSps {
    /// ChromaArrayType
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// PicSizeInCtbsY
    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb = 1u32 << self.log2_ctb_size;
        self.pic_width
            .div_ceil(ctb)
            .saturating_mul(self.pic_height.div_ceil(ctb))
    }

    /// 帧率 (如果 VUI 中有 timing_info)
    pub fn frame_rate(&self) -> Option<Rational> {
        self.vui.as_ref()?.timing?.frame_rate()
    }

    /// 像素宽高比, 无 VUI 时为 1:1
    pub fn sar(&self) -> Rational {
        self.vui.as_ref().map_or(Rational::new(1, 1), |v| v.sar)
    }
}

/// 单边亮度尺寸上限, Sqrt(MaxLumaPs * 8) (level 6.2)
const MAX_LUMA_DIM: u32 = 16888;

/// 解析 seq_parameter_set_rbsp()
pub fn parse_hevc_sps(r: &mut BitReader) -> XiResult<HevcSps> {
    r.enter("seq_parameter_set_rbsp()");
    let vps_id = r.u("sps_video_parameter_set_id", 4)? as u8;
    let max_sub_layers_minus1 = r.u("sps_max_sub_layers_minus1", 3)?;
    r.check_range("sps_max_sub_layers_minus1", i64::from(max_sub_layers_minus1), 0, 6)?;
    r.flag("sps_temporal_id_nesting_flag")?;
    let ptl = parse_profile_tier_level(r, true, max_sub_layers_minus1)?;

    let sps_id = r.ue("sps_seq_parameter_set_id")?;
    r.check_range("sps_seq_parameter_set_id", i64::from(sps_id), 0, 15)?;
    let chroma_format_idc = r.ue("chroma_format_idc")?;
    r.check_range("chroma_format_idc", i64::from(chroma_format_idc), 0, 3)?;
    let separate_colour_plane_flag = if chroma_format_idc == 3 {
        r.flag("separate_colour_plane_flag")?
    } else {
        false
    };

    let pic_width = r.ue("pic_width_in_luma_samples")?;
    let pic_height = r.ue("pic_height_in_luma_samples")?;
    if pic_width == 0 || pic_height == 0 || pic_width > MAX_LUMA_DIM || pic_height > MAX_LUMA_DIM {
        return Err(XiError::syntax(
            "pic_width_in_luma_samples",
            format!("HEVC: 图像尺寸非法, {}x{}", pic_width, pic_height),
        ));
    }
    let (mut win_left, mut win_right, mut win_top, mut win_bottom) = (0, 0, 0, 0);
    if r.flag("conformance_window_flag")? {
        win_left = r.ue("conf_win_left_offset")?;
        win_right = r.ue("conf_win_right_offset")?;
        win_top = r.ue("conf_win_top_offset")?;
        win_bottom = r.ue("conf_win_bottom_offset")?;
    }

    let luma_minus8 = r.ue("bit_depth_luma_minus8")?;
    r.check_range("bit_depth_luma_minus8", i64::from(luma_minus8), 0, 8)?;
    let chroma_minus8 = r.ue("bit_depth_chroma_minus8")?;
    r.check_range("bit_depth_chroma_minus8", i64::from(chroma_minus8), 0, 8)?;
    let poc_minus4 = r.ue("log2_max_pic_order_cnt_lsb_minus4")?;
    r.check_range("log2_max_pic_order_cnt_lsb_minus4", i64::from(poc_minus4), 0, 12)?;

    parse_sub_layer_ordering_info(r, "sps", max_sub_layers_minus1)?;

    let min_cb_minus3 = r.ue("log2_min_luma_coding_block_size_minus3")?;
    r.check_range("log2_min_luma_coding_block_size_minus3", i64::from(min_cb_minus3), 0, 3)?;
    let diff_max_min_cb = r.ue("log2_diff_max_min_luma_coding_block_size")?;
    r.check_range("log2_diff_max_min_luma_coding_block_size", i64::from(diff_max_min_cb), 0, 3)?;
    let log2_min_cb_size = min_cb_minus3 + 3;
    let log2_ctb_size = log2_min_cb_size + diff_max_min_cb;
    r.check_range("CtbLog2SizeY", i64::from(log2_ctb_size), 4, 6)?;
    r.derive("CtbSizeY", FieldValue::Unsigned(1u64 << log2_ctb_size));
    r.ue("log2_min_luma_transform_block_size_minus2")?;
    r.ue("log2_diff_max_min_luma_transform_block_size")?;
    r.ue("max_transform_hierarchy_depth_inter")?;
    r.ue("max_transform_hierarchy_depth_intra")?;

    let scaling_list_enabled_flag = r.flag("scaling_list_enabled_flag")?;
    if scaling_list_enabled_flag && r.flag("sps_scaling_list_data_present_flag")? {
        parse_scaling_list_data(r)?;
    }

    let amp_enabled_flag = r.flag("amp_enabled_flag")?;
    let sample_adaptive_offset_enabled_flag = r.flag("sample_adaptive_offset_enabled_flag")?;
    let pcm_enabled_flag = r.flag("pcm_enabled_flag")?;
    if pcm_enabled_flag {
        r.u("pcm_sample_bit_depth_luma_minus1", 4)?;
        r.u("pcm_sample_bit_depth_chroma_minus1", 4)?;
        r.ue("log2_min_pcm_luma_coding_block_size_minus3")?;
        r.ue("log2_diff_max_min_pcm_luma_coding_block_size")?;
        r.flag("pcm_loop_filter_disabled_flag")?;
    }

    let num_short_term_ref_pic_sets = r.ue("num_short_term_ref_pic_sets")?;
    r.check_range(
        "num_short_term_ref_pic_sets",
        i64::from(num_short_term_ref_pic_sets),
        0,
        64,
    )?;
    let num_sets = num_short_term_ref_pic_sets as usize;
    let mut st_rps = Vec::with_capacity(num_sets);
    for i in 0..num_sets {
        let rps = parse_st_ref_pic_set(r, i, num_sets, &st_rps)?;
        st_rps.push(rps);
    }

    let log2_max_poc_lsb = poc_minus4 + 4;
    let long_term_ref_pics_present_flag = r.flag("long_term_ref_pics_present_flag")?;
    let mut lt_ref_pic_poc_lsb_sps = Vec::new();
    let mut used_by_curr_pic_lt_sps_flag = Vec::new();
    if long_term_ref_pics_present_flag {
        let num = r.ue("num_long_term_ref_pics_sps")?;
        r.check_range("num_long_term_ref_pics_sps", i64::from(num), 0, 32)?;
        for i in 0..num {
            lt_ref_pic_poc_lsb_sps.push(r.u(&format!("lt_ref_pic_poc_lsb_sps[{i}]"), log2_max_poc_lsb)?);
            used_by_curr_pic_lt_sps_flag.push(r.flag(&format!("used_by_curr_pic_lt_sps_flag[{i}]"))?);
        }
    }

    let temporal_mvp_enabled_flag = r.flag("sps_temporal_mvp_enabled_flag")?;
    let strong_intra_smoothing_enabled_flag = r.flag("strong_intra_smoothing_enabled_flag")?;
    let vui = if r.flag("vui_parameters_present_flag")? {
        Some(parse_hevc_vui(r, max_sub_layers_minus1)?)
    } else {
        None
    };

    let mut high_precision_offsets_enabled_flag = false;
    if r.flag("sps_extension_present_flag")? {
        let range = r.flag("sps_range_extension_flag")?;
        let multilayer = r.flag("sps_multilayer_extension_flag")?;
        let ext_3d = r.flag("sps_3d_extension_flag")?;
        let scc = r.flag("sps_scc_extension_flag")?;
        let ext_4bits = r.u("sps_extension_4bits", 4)?;
        if range {
            r.enter("sps_range_extension()");
            r.flag("transform_skip_rotation_enabled_flag")?;
            r.flag("transform_skip_context_enabled_flag")?;
            r.flag("implicit_rdpcm_enabled_flag")?;
            r.flag("explicit_rdpcm_enabled_flag")?;
            r.flag("extended_precision_processing_flag")?;
            r.flag("intra_smoothing_disabled_flag")?;
            high_precision_offsets_enabled_flag = r.flag("high_precision_offsets_enabled_flag")?;
            r.flag("persistent_rice_adaptation_enabled_flag")?;
            r.flag("cabac_bypass_alignment_enabled_flag")?;
            r.exit();
        }
        if multilayer || ext_3d || scc || ext_4bits != 0 {
            r.annotate("扩展数据未解析");
        }
    }

    // 裁剪窗口单位
    let chroma_array_type = if separate_colour_plane_flag { 0 } else { chroma_format_idc };
    let sub_width_c: u32 = if chroma_array_type == 1 || chroma_array_type == 2 { 2 } else { 1 };
    let sub_height_c: u32 = if chroma_array_type == 1 { 2 } else { 1 };
    let crop_x = sub_width_c.saturating_mul(win_left.saturating_add(win_right));
    let crop_y = sub_height_c.saturating_mul(win_top.saturating_add(win_bottom));
    if crop_x >= pic_width || crop_y >= pic_height {
        return Err(XiError::syntax(
            "conformance_window_flag",
            format!(
                "HEVC: 裁剪窗口非法, raw={}x{}, crop_x={}, crop_y={}",
                pic_width, pic_height, crop_x, crop_y
            ),
        ));
    }
    let width = pic_width - crop_x;
    let height = pic_height - crop_y;
    r.derive("PicWidth", FieldValue::Unsigned(u64::from(width)));
    r.derive("PicHeight", FieldValue::Unsigned(u64::from(height)));
    r.exit();

    Ok(HevcSps {
        vps_id,
        max_sub_layers_minus1: max_sub_layers_minus1 as u8,
        ptl,
        sps_id,
        chroma_format_idc,
        separate_colour_plane_flag,
        pic_width,
        pic_height,
        width,
        height,
        bit_depth_luma: luma_minus8 + 8,
        bit_depth_chroma: chroma_minus8 + 8,
        log2_max_poc_lsb,
        log2_min_cb_size,
        log2_ctb_size,
        scaling_list_enabled_flag,
        amp_enabled_flag,
        sample_adaptive_offset_enabled_flag,
        pcm_enabled_flag,
        st_rps,
        long_term_ref_pics_present_flag,
        lt_ref_pic_poc_lsb_sps,
        used_by_curr_pic_lt_sps_flag,
        temporal_mvp_enabled_flag,
        strong_intra_smoothing_enabled_flag,
        vui,
        high_precision_offsets_enabled_flag,
    })
}

/// 解析 scaling_list_data() (7.3.4), SPS 与 PPS 共用
///
/// 只做语法校验与跟踪, 不保留矩阵内容.
pub(crate) fn parse_scaling_list_data(r: &mut BitReader) -> XiResult<()> {
    r.enter("scaling_list_data()");
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        for matrix_id in (0..6u32).step_by(step) {
            let pred_mode = r.flag(&format!("scaling_list_pred_mode_flag[{size_id}][{matrix_id}]"))?;
            if !pred_mode {
                let delta = r.ue(&format!("scaling_list_pred_matrix_id_delta[{size_id}][{matrix_id}]"))?;
                r.check_range(
                    "scaling_list_pred_matrix_id_delta",
                    i64::from(delta),
                    0,
                    i64::from(matrix_id / step as u32),
                )?;
                continue;
            }
            let coef_num = 64.min(1u32 << (4 + (size_id << 1)));
            if size_id > 1 {
                let dc = r.se(&format!("scaling_list_dc_coef_minus8[{size_id}][{matrix_id}]"))?;
                r.check_range("scaling_list_dc_coef_minus8", i64::from(dc), -7, 247)?;
            }
            for _ in 0..coef_num {
                let delta = r.se("scaling_list_delta_coef")?;
                r.check_range("scaling_list_delta_coef", i64::from(delta), -128, 127)?;
            }
        }
    }
    r.exit();
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::hevc::ptl::test_support::write_main_ptl;
    use crate::hevc::rps::test_support::write_explicit_rps;
    use xi_core::bitwriter::BitWriter;

    /// 写出 1920x1080 Main profile SPS (CTB 64, 含一个短期 RPS)
    pub fn write_main_sps(bw: &mut BitWriter, sps_id: u32) {
        bw.write_bits(0, 4); // vps_id
        bw.write_bits(0, 3); // max_sub_layers_minus1
        bw.write_flag(true);
        write_main_ptl(bw, 120);
        bw.write_ue(sps_id);
        bw.write_ue(1); // chroma_format_idc
        bw.write_ue(1920);
        bw.write_ue(1088);
        bw.write_flag(true); // conformance_window_flag
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(4); // 4 * 2 = 8 行
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(4); // log2_max_pic_order_cnt_lsb_minus4 -> 8 位
        bw.write_flag(true);
        bw.write_ue(4);
        bw.write_ue(2);
        bw.write_ue(0);
        bw.write_ue(0); // log2_min_luma_coding_block_size_minus3
        bw.write_ue(3); // log2_diff_max_min -> CTB 64
        bw.write_ue(0);
        bw.write_ue(3);
        bw.write_ue(1);
        bw.write_ue(1);
        bw.write_flag(false); // scaling_list_enabled_flag
        bw.write_flag(false); // amp
        bw.write_flag(true); // sao
        bw.write_flag(false); // pcm
        bw.write_ue(1); // num_short_term_ref_pic_sets
        write_explicit_rps(bw, 1);
        bw.write_flag(false); // long_term_ref_pics_present_flag
        bw.write_flag(true); // sps_temporal_mvp_enabled_flag
        bw.write_flag(true); // strong_intra_smoothing
        bw.write_flag(false); // vui
        bw.write_flag(false); // extension
        bw.write_trailing_bits();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_main_sps;
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_parse_main_1080p() {
        let mut bw = BitWriter::new();
        write_main_sps(&mut bw, 0);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let sps = parse_hevc_sps(&mut r).expect("SPS 应解析成功");
        assert_eq!((sps.width, sps.height), (1920, 1080));
        assert_eq!((sps.pic_width, sps.pic_height), (1920, 1088));
        assert_eq!(sps.log2_ctb_size, 6);
        assert_eq!(sps.pic_size_in_ctbs(), 30 * 17);
        assert_eq!(sps.st_rps.len(), 1);
        assert_eq!(sps.log2_max_poc_lsb, 8);
        assert!(sps.sample_adaptive_offset_enabled_flag);
        assert_eq!(sps.ptl.general_level_idc, 120);
        assert!(!r.more_rbsp_data());
    }

    #[test]
    fn test_scaling_list_data_all_predicted() {
        let mut bw = BitWriter::new();
        // 6+6+6+2 个矩阵全部从参考矩阵预测 (delta = 0)
        for _ in 0..20 {
            bw.write_flag(false);
            bw.write_ue(0);
        }
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        parse_scaling_list_data(&mut r).unwrap();
        assert!(!r.more_rbsp_data());
    }

    #[test]
    fn test_reject_zero_width() {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(0, 3);
        bw.write_flag(true);
        crate::hevc::ptl::test_support::write_main_ptl(&mut bw, 93);
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(0);
        bw.write_ue(64);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_hevc_sps(&mut r).expect_err("宽度为 0 应失败");
        assert!(format!("{err}").contains("pic_width_in_luma_samples"));
    }

    #[test]
    fn test_reject_oversized_picture() {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4);
        bw.write_bits(0, 3);
        bw.write_flag(true);
        crate::hevc::ptl::test_support::write_main_ptl(&mut bw, 93);
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(0x4000_0000);
        bw.write_ue(0x4000_0000);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_hevc_sps(&mut r).expect_err("超大尺寸应失败");
        assert!(format!("{err}").contains("图像尺寸非法"), "{err}");
    }
}
