//! H.264 PPS (Picture Parameter Set) 解析器 (7.3.2.2).

use xi_core::{BitReader, XiResult};

use super::AvcState;
use super::scaling::{ScalingMatrices, parse_scaling_matrices};

/// PPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    /// 0=CAVLC, 1=CABAC
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_slice_groups_minus1: u32,
    pub slice_group_map_type: u32,
    pub slice_group_change_rate_minus1: u32,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub pic_init_qs: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
    pub transform_8x8_mode_flag: bool,
    pub scaling: Option<ScalingMatrices>,
    pub second_chroma_qp_index_offset: i32,
}

/// 从 NAL 头之后的 RBSP 解析 PPS
///
/// 量化矩阵的个数与回退规则取决于引用的 SPS; SPS 尚未出现时按 4:2:0 处理.
pub fn parse_pps(r: &mut BitReader, state: &AvcState) -> XiResult<Pps> {
    r.enter("pic_parameter_set_rbsp()");
    let pps_id = r.ue("pic_parameter_set_id")?;
    r.check_range("pic_parameter_set_id", i64::from(pps_id), 0, 255)?;
    let sps_id = r.ue("seq_parameter_set_id")?;
    r.check_range("seq_parameter_set_id", i64::from(sps_id), 0, 31)?;
    let sps = state.sps.get(&sps_id);
    if sps.is_none() {
        r.annotate("引用的 SPS 尚未出现");
    }

    let entropy_coding_mode_flag = r.flag("entropy_coding_mode_flag")?;
    r.annotate(if entropy_coding_mode_flag { "CABAC" } else { "CAVLC" });
    let bottom_field_pic_order_in_frame_present_flag =
        r.flag("bottom_field_pic_order_in_frame_present_flag")?;

    let num_slice_groups_minus1 = r.ue("num_slice_groups_minus1")?;
    r.check_range("num_slice_groups_minus1", i64::from(num_slice_groups_minus1), 0, 7)?;
    let mut slice_group_map_type = 0;
    let mut slice_group_change_rate_minus1 = 0;
    if num_slice_groups_minus1 > 0 {
        (slice_group_map_type, slice_group_change_rate_minus1) =
            parse_slice_groups(r, num_slice_groups_minus1)?;
    }

    let num_ref_idx_l0_default_active_minus1 = r.ue("num_ref_idx_l0_default_active_minus1")?;
    r.check_range(
        "num_ref_idx_l0_default_active_minus1",
        i64::from(num_ref_idx_l0_default_active_minus1),
        0,
        31,
    )?;
    let num_ref_idx_l1_default_active_minus1 = r.ue("num_ref_idx_l1_default_active_minus1")?;
    r.check_range(
        "num_ref_idx_l1_default_active_minus1",
        i64::from(num_ref_idx_l1_default_active_minus1),
        0,
        31,
    )?;
    let weighted_pred_flag = r.flag("weighted_pred_flag")?;
    let weighted_bipred_idc = r.u("weighted_bipred_idc", 2)?;
    r.check_range("weighted_bipred_idc", i64::from(weighted_bipred_idc), 0, 2)?;

    let pic_init_qp_minus26 = r.se("pic_init_qp_minus26")?;
    r.check_range("pic_init_qp_minus26", i64::from(pic_init_qp_minus26), -26, 25)?;
    let pic_init_qs_minus26 = r.se("pic_init_qs_minus26")?;
    r.check_range("pic_init_qs_minus26", i64::from(pic_init_qs_minus26), -26, 25)?;
    let chroma_qp_index_offset = r.se("chroma_qp_index_offset")?;
    r.check_range("chroma_qp_index_offset", i64::from(chroma_qp_index_offset), -12, 12)?;
    let deblocking_filter_control_present_flag =
        r.flag("deblocking_filter_control_present_flag")?;
    let constrained_intra_pred_flag = r.flag("constrained_intra_pred_flag")?;
    let redundant_pic_cnt_present_flag = r.flag("redundant_pic_cnt_present_flag")?;

    let mut transform_8x8_mode_flag = false;
    let mut scaling = None;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;
    if r.more_rbsp_data() {
        transform_8x8_mode_flag = r.flag("transform_8x8_mode_flag")?;
        if r.flag("pic_scaling_matrix_present_flag")? {
            let chroma_format_idc = sps.map_or(1, |s| s.chroma_format_idc);
            let list_count = 6 + if transform_8x8_mode_flag {
                if chroma_format_idc == 3 { 6 } else { 2 }
            } else {
                0
            };
            let fallback = sps.and_then(|s| s.scaling.as_ref());
            scaling = Some(parse_scaling_matrices(
                r,
                list_count,
                chroma_format_idc,
                fallback,
            )?);
        }
        second_chroma_qp_index_offset = r.se("second_chroma_qp_index_offset")?;
        r.check_range(
            "second_chroma_qp_index_offset",
            i64::from(second_chroma_qp_index_offset),
            -12,
            12,
        )?;
    }
    r.exit();

    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode_flag,
        bottom_field_pic_order_in_frame_present_flag,
        num_slice_groups_minus1,
        slice_group_map_type,
        slice_group_change_rate_minus1,
        num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_default_active_minus1,
        weighted_pred_flag,
        weighted_bipred_idc,
        pic_init_qp: 26 + pic_init_qp_minus26,
        pic_init_qs: 26 + pic_init_qs_minus26,
        chroma_qp_index_offset,
        deblocking_filter_control_present_flag,
        constrained_intra_pred_flag,
        redundant_pic_cnt_present_flag,
        transform_8x8_mode_flag,
        scaling,
        second_chroma_qp_index_offset,
    })
}

/// 解析 slice group 相关语法, 返回 (slice_group_map_type, slice_group_change_rate_minus1)
fn parse_slice_groups(r: &mut BitReader, num_slice_groups_minus1: u32) -> XiResult<(u32, u32)> {
    let map_type = r.ue("slice_group_map_type")?;
    r.check_range("slice_group_map_type", i64::from(map_type), 0, 6)?;
    let mut change_rate_minus1 = 0;
    match map_type {
        0 => {
            for i in 0..=num_slice_groups_minus1 {
                r.ue(&format!("run_length_minus1[{i}]"))?;
            }
        }
        2 => {
            for i in 0..num_slice_groups_minus1 {
                r.ue(&format!("top_left[{i}]"))?;
                r.ue(&format!("bottom_right[{i}]"))?;
            }
        }
        3..=5 => {
            r.flag("slice_group_change_direction_flag")?;
            change_rate_minus1 = r.ue("slice_group_change_rate_minus1")?;
        }
        6 => {
            let pic_size_in_map_units_minus1 = r.ue("pic_size_in_map_units_minus1")?;
            let bits = ceil_log2(num_slice_groups_minus1 + 1);
            let count = pic_size_in_map_units_minus1 as usize + 1;
            r.ensure_bits_for("pic_size_in_map_units_minus1", count, bits as usize)?;
            for i in 0..count {
                r.u(&format!("slice_group_id[{i}]"), bits)?;
            }
        }
        _ => {}
    }
    Ok((map_type, change_rate_minus1))
}

/// Ceil(Log2(v)), v >= 1
pub(crate) fn ceil_log2(v: u32) -> u32 {
    if v <= 1 {
        0
    } else {
        u32::BITS - (v - 1).leading_zeros()
    }
}
