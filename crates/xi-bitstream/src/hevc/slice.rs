//! H.265 slice segment header 解析 (7.3.6.1).
//!
//! 只解析到 byte_alignment() 为止, slice 数据本身不解码.

use xi_core::{BitReader, FieldValue, XiError, XiResult};

use super::HevcState;
use super::nal::HevcNalHeader;
use super::pps::HevcPps;
use super::rps::parse_st_ref_pic_set;
use super::sps::HevcSps;
use crate::avc::pps::ceil_log2;

/// HEVC slice 类型 (表 7-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcSliceType {
    B,
    P,
    I,
}

impl HevcSliceType {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::B),
            1 => Some(Self::P),
            2 => Some(Self::I),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::B => "B",
            Self::P => "P",
            Self::I => "I",
        }
    }
}

/// slice segment header 解析结果
///
/// 依赖 slice segment 的字段沿用前一个独立 slice segment, 此处不重复保存,
/// 对应字段为 `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcSliceHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: Option<bool>,
    pub pps_id: u32,
    pub dependent_slice_segment_flag: bool,
    pub slice_segment_address: u32,
    pub slice_type: Option<HevcSliceType>,
    pub pic_output_flag: bool,
    pub slice_pic_order_cnt_lsb: Option<u32>,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,
    /// NumPicTotalCurr
    pub num_pic_total_curr: u32,
    pub slice_qp_delta: i32,
    /// SliceQpY = 26 + init_qp_minus26 + slice_qp_delta
    pub slice_qp: Option<i32>,
    pub num_entry_point_offsets: u32,
}

/// 解析 slice_segment_header()
///
/// 引用的 PPS 或 SPS 尚未出现时返回语法错误, 字段为 `slice_pic_parameter_set_id`.
pub fn parse_hevc_slice_header(
    r: &mut BitReader,
    state: &HevcState,
    nal: &HevcNalHeader,
) -> XiResult<HevcSliceHeader> {
    r.enter("slice_segment_header()");
    let first_slice_segment_in_pic_flag = r.flag("first_slice_segment_in_pic_flag")?;
    let no_output_of_prior_pics_flag = if nal.nal_type.is_irap() {
        Some(r.flag("no_output_of_prior_pics_flag")?)
    } else {
        None
    };
    let pps_id = r.ue("slice_pic_parameter_set_id")?;
    r.check_range("slice_pic_parameter_set_id", i64::from(pps_id), 0, 63)?;
    let pps = state.pps.get(&pps_id).ok_or_else(|| {
        XiError::syntax(
            "slice_pic_parameter_set_id",
            format!("HEVC: 引用的 PPS 不存在, id={}", pps_id),
        )
    })?;
    let sps = state.sps.get(&pps.sps_id).ok_or_else(|| {
        XiError::syntax(
            "slice_pic_parameter_set_id",
            format!("HEVC: PPS {} 引用的 SPS 不存在, id={}", pps_id, pps.sps_id),
        )
    })?;

    let mut dependent_slice_segment_flag = false;
    let mut slice_segment_address = 0;
    if !first_slice_segment_in_pic_flag {
        if pps.dependent_slice_segments_enabled_flag {
            dependent_slice_segment_flag = r.flag("dependent_slice_segment_flag")?;
        }
        let pic_size = sps.pic_size_in_ctbs();
        slice_segment_address = r.u("slice_segment_address", ceil_log2(pic_size))?;
        r.check_range(
            "slice_segment_address",
            i64::from(slice_segment_address),
            0,
            i64::from(pic_size) - 1,
        )?;
    }

    let mut header = HevcSliceHeader {
        first_slice_segment_in_pic_flag,
        no_output_of_prior_pics_flag,
        pps_id,
        dependent_slice_segment_flag,
        slice_segment_address,
        slice_type: None,
        pic_output_flag: true,
        slice_pic_order_cnt_lsb: None,
        num_ref_idx_l0_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
        num_pic_total_curr: 0,
        slice_qp_delta: 0,
        slice_qp: None,
        num_entry_point_offsets: 0,
    };
    if !dependent_slice_segment_flag {
        parse_independent_fields(r, sps, pps, nal, &mut header)?;
    }

    if pps.tiles_enabled_flag || pps.entropy_coding_sync_enabled_flag {
        let num = r.ue("num_entry_point_offsets")?;
        let (cols, rows) = (i64::from(pps.tiles.0), i64::from(pps.tiles.1));
        let ctb = 1u32 << sps.log2_ctb_size;
        let ctb_rows = i64::from(sps.pic_height.div_ceil(ctb));
        let max = match (pps.tiles_enabled_flag, pps.entropy_coding_sync_enabled_flag) {
            (true, false) => cols * rows - 1,
            (false, true) => ctb_rows - 1,
            _ => cols * ctb_rows - 1,
        };
        r.check_range("num_entry_point_offsets", i64::from(num), 0, max)?;
        if num > 0 {
            let len_minus1 = r.ue("offset_len_minus1")?;
            r.check_range("offset_len_minus1", i64::from(len_minus1), 0, 31)?;
            r.ensure_bits_for("num_entry_point_offsets", num as usize, len_minus1 as usize + 1)?;
            for i in 0..num {
                r.u(&format!("entry_point_offset_minus1[{i}]"), len_minus1 + 1)?;
            }
        }
        header.num_entry_point_offsets = num;
    }

    if pps.slice_segment_header_extension_present_flag {
        let len = r.ue("slice_segment_header_extension_length")?;
        r.check_range("slice_segment_header_extension_length", i64::from(len), 0, 256)?;
        r.ensure_bits_for("slice_segment_header_extension_length", len as usize, 8)?;
        r.skip_bits(len as usize * 8)?;
    }

    // byte_alignment(): alignment_bit_equal_to_one 后补零
    let one = r.flag("alignment_bit_equal_to_one")?;
    if !one {
        return Err(XiError::syntax(
            "alignment_bit_equal_to_one",
            "HEVC: byte_alignment() 首位必须为 1",
        ));
    }
    while !r.is_byte_aligned() {
        r.flag("alignment_bit_equal_to_zero")?;
    }
    r.exit();
    Ok(header)
}

fn parse_independent_fields(
    r: &mut BitReader,
    sps: &HevcSps,
    pps: &HevcPps,
    nal: &HevcNalHeader,
    header: &mut HevcSliceHeader,
) -> XiResult<()> {
    for i in 0..pps.num_extra_slice_header_bits {
        r.flag(&format!("slice_reserved_flag[{i}]"))?;
    }
    let raw_type = r.ue("slice_type")?;
    r.check_range("slice_type", i64::from(raw_type), 0, 2)?;
    let slice_type = HevcSliceType::from_raw(raw_type)
        .ok_or_else(|| XiError::syntax("slice_type", format!("HEVC: 非法 slice_type {raw_type}")))?;
    r.annotate(slice_type.name());
    header.slice_type = Some(slice_type);
    if pps.output_flag_present_flag {
        header.pic_output_flag = r.flag("pic_output_flag")?;
    }
    if sps.separate_colour_plane_flag {
        r.u("colour_plane_id", 2)?;
    }

    let mut slice_temporal_mvp_enabled_flag = false;
    if !nal.nal_type.is_idr() {
        header.slice_pic_order_cnt_lsb =
            Some(r.u("slice_pic_order_cnt_lsb", sps.log2_max_poc_lsb)?);
        let num_sets = sps.st_rps.len();
        let rps = if !r.flag("short_term_ref_pic_set_sps_flag")? {
            parse_st_ref_pic_set(r, num_sets, num_sets, &sps.st_rps)?
        } else {
            let mut idx = 0;
            if num_sets > 1 {
                idx = r.u("short_term_ref_pic_set_idx", ceil_log2(num_sets as u32))?;
                r.check_range(
                    "short_term_ref_pic_set_idx",
                    i64::from(idx),
                    0,
                    num_sets as i64 - 1,
                )?;
            }
            sps.st_rps.get(idx as usize).cloned().ok_or_else(|| {
                XiError::syntax(
                    "short_term_ref_pic_set_sps_flag",
                    "HEVC: SPS 中没有可引用的短期参考图像集",
                )
            })?
        };
        let mut total = rps.num_used_by_curr() as u32;

        if sps.long_term_ref_pics_present_flag {
            total += parse_long_term_refs(r, sps)?;
        }
        if sps.temporal_mvp_enabled_flag {
            slice_temporal_mvp_enabled_flag = r.flag("slice_temporal_mvp_enabled_flag")?;
        }
        header.num_pic_total_curr = total;
        r.derive("NumPicTotalCurr", FieldValue::Unsigned(u64::from(total)));
    }

    let mut slice_sao_luma_flag = false;
    let mut slice_sao_chroma_flag = false;
    if sps.sample_adaptive_offset_enabled_flag {
        slice_sao_luma_flag = r.flag("slice_sao_luma_flag")?;
        if sps.chroma_array_type() != 0 {
            slice_sao_chroma_flag = r.flag("slice_sao_chroma_flag")?;
        }
    }

    if slice_type != HevcSliceType::I {
        let is_b = slice_type == HevcSliceType::B;
        if r.flag("num_ref_idx_active_override_flag")? {
            header.num_ref_idx_l0_active_minus1 = r.ue("num_ref_idx_l0_active_minus1")?;
            r.check_range(
                "num_ref_idx_l0_active_minus1",
                i64::from(header.num_ref_idx_l0_active_minus1),
                0,
                14,
            )?;
            if is_b {
                header.num_ref_idx_l1_active_minus1 = r.ue("num_ref_idx_l1_active_minus1")?;
                r.check_range(
                    "num_ref_idx_l1_active_minus1",
                    i64::from(header.num_ref_idx_l1_active_minus1),
                    0,
                    14,
                )?;
            }
        }
        if pps.lists_modification_present_flag && header.num_pic_total_curr > 1 {
            parse_ref_pic_lists_modification(r, header, is_b)?;
        }
        if is_b {
            r.flag("mvd_l1_zero_flag")?;
        }
        if pps.cabac_init_present_flag {
            r.flag("cabac_init_flag")?;
        }
        if slice_temporal_mvp_enabled_flag {
            let collocated_from_l0 = if is_b {
                r.flag("collocated_from_l0_flag")?
            } else {
                true
            };
            let refs = if collocated_from_l0 {
                header.num_ref_idx_l0_active_minus1
            } else {
                header.num_ref_idx_l1_active_minus1
            };
            if refs > 0 {
                let idx = r.ue("collocated_ref_idx")?;
                r.check_range("collocated_ref_idx", i64::from(idx), 0, i64::from(refs))?;
            }
        }
        if (pps.weighted_pred_flag && slice_type == HevcSliceType::P)
            || (pps.weighted_bipred_flag && is_b)
        {
            parse_pred_weight_table(r, sps, header, is_b)?;
        }
        let five_minus = r.ue("five_minus_max_num_merge_cand")?;
        r.check_range("five_minus_max_num_merge_cand", i64::from(five_minus), 0, 4)?;
    }

    header.slice_qp_delta = r.se("slice_qp_delta")?;
    let qp_bd_offset = 6 * (sps.bit_depth_luma as i32 - 8);
    let slice_qp = pps.init_qp + header.slice_qp_delta;
    r.check_range("SliceQpY", i64::from(slice_qp), i64::from(-qp_bd_offset), 51)?;
    r.derive("SliceQpY", FieldValue::Signed(i64::from(slice_qp)));
    header.slice_qp = Some(slice_qp);

    if pps.slice_chroma_qp_offsets_present_flag {
        let cb = r.se("slice_cb_qp_offset")?;
        r.check_range("slice_cb_qp_offset", i64::from(cb), -12, 12)?;
        let cr = r.se("slice_cr_qp_offset")?;
        r.check_range("slice_cr_qp_offset", i64::from(cr), -12, 12)?;
    }
    if pps.chroma_qp_offset_list_enabled_flag {
        r.flag("cu_chroma_qp_offset_enabled_flag")?;
    }
    let override_flag = if pps.deblocking_filter_override_enabled_flag {
        r.flag("deblocking_filter_override_flag")?
    } else {
        false
    };
    let mut deblocking_disabled = pps.pps_deblocking_filter_disabled_flag;
    if override_flag {
        deblocking_disabled = r.flag("slice_deblocking_filter_disabled_flag")?;
        if !deblocking_disabled {
            let beta = r.se("slice_beta_offset_div2")?;
            r.check_range("slice_beta_offset_div2", i64::from(beta), -6, 6)?;
            let tc = r.se("slice_tc_offset_div2")?;
            r.check_range("slice_tc_offset_div2", i64::from(tc), -6, 6)?;
        }
    }
    if pps.loop_filter_across_slices_enabled_flag
        && (slice_sao_luma_flag || slice_sao_chroma_flag || !deblocking_disabled)
    {
        r.flag("slice_loop_filter_across_slices_enabled_flag")?;
    }
    Ok(())
}

/// 长期参考图像, 返回其中被当前图像引用的个数
fn parse_long_term_refs(r: &mut BitReader, sps: &HevcSps) -> XiResult<u32> {
    let num_lt_sps_candidates = sps.lt_ref_pic_poc_lsb_sps.len() as u32;
    let num_long_term_sps = if num_lt_sps_candidates > 0 {
        let v = r.ue("num_long_term_sps")?;
        r.check_range("num_long_term_sps", i64::from(v), 0, i64::from(num_lt_sps_candidates))?;
        v
    } else {
        0
    };
    let num_long_term_pics = r.ue("num_long_term_pics")?;
    r.check_range("num_long_term_pics", i64::from(num_long_term_pics), 0, 32)?;

    let mut used = 0;
    for i in 0..num_long_term_sps + num_long_term_pics {
        if i < num_long_term_sps {
            let mut lt_idx = 0;
            if num_lt_sps_candidates > 1 {
                lt_idx = r.u(&format!("lt_idx_sps[{i}]"), ceil_log2(num_lt_sps_candidates))?;
                r.check_range(
                    "lt_idx_sps",
                    i64::from(lt_idx),
                    0,
                    i64::from(num_lt_sps_candidates) - 1,
                )?;
            }
            if sps
                .used_by_curr_pic_lt_sps_flag
                .get(lt_idx as usize)
                .copied()
                .unwrap_or(false)
            {
                used += 1;
            }
        } else {
            r.u(&format!("poc_lsb_lt[{i}]"), sps.log2_max_poc_lsb)?;
            if r.flag(&format!("used_by_curr_pic_lt_flag[{i}]"))? {
                used += 1;
            }
        }
        if r.flag(&format!("delta_poc_msb_present_flag[{i}]"))? {
            r.ue(&format!("delta_poc_msb_cycle_lt[{i}]"))?;
        }
    }
    Ok(used)
}

fn parse_ref_pic_lists_modification(
    r: &mut BitReader,
    header: &HevcSliceHeader,
    is_b: bool,
) -> XiResult<()> {
    r.enter("ref_pic_lists_modification()");
    let bits = ceil_log2(header.num_pic_total_curr);
    let lists = if is_b { 2 } else { 1 };
    for list in 0..lists {
        let count = if list == 0 {
            header.num_ref_idx_l0_active_minus1
        } else {
            header.num_ref_idx_l1_active_minus1
        };
        if r.flag(&format!("ref_pic_list_modification_flag_l{list}"))? {
            for i in 0..=count {
                let entry = r.u(&format!("list_entry_l{list}[{i}]"), bits)?;
                r.check_range(
                    "list_entry",
                    i64::from(entry),
                    0,
                    i64::from(header.num_pic_total_curr) - 1,
                )?;
            }
        }
    }
    r.exit();
    Ok(())
}

/// pred_weight_table() (7.3.6.3)
///
/// 按单层码流处理: 参考图像与当前图像 POC 不同, 每个参考都带 weight 标志.
fn parse_pred_weight_table(
    r: &mut BitReader,
    sps: &HevcSps,
    header: &HevcSliceHeader,
    is_b: bool,
) -> XiResult<()> {
    r.enter("pred_weight_table()");
    let denom = r.ue("luma_log2_weight_denom")?;
    r.check_range("luma_log2_weight_denom", i64::from(denom), 0, 7)?;
    let has_chroma = sps.chroma_array_type() != 0;
    if has_chroma {
        let delta = r.se("delta_chroma_log2_weight_denom")?;
        r.check_range(
            "ChromaLog2WeightDenom",
            i64::from(denom as i32 + delta),
            0,
            7,
        )?;
    }
    let wp_offset_range = if sps.high_precision_offsets_enabled_flag {
        1i64 << (sps.bit_depth_luma - 1)
    } else {
        128
    };

    let lists = if is_b { 2 } else { 1 };
    for list in 0..lists {
        let count = if list == 0 {
            header.num_ref_idx_l0_active_minus1
        } else {
            header.num_ref_idx_l1_active_minus1
        } as usize
            + 1;
        let mut luma_flags = Vec::with_capacity(count);
        for i in 0..count {
            luma_flags.push(r.flag(&format!("luma_weight_l{list}_flag[{i}]"))?);
        }
        let mut chroma_flags = vec![false; count];
        if has_chroma {
            for (i, flag) in chroma_flags.iter_mut().enumerate() {
                *flag = r.flag(&format!("chroma_weight_l{list}_flag[{i}]"))?;
            }
        }
        for i in 0..count {
            if luma_flags[i] {
                let w = r.se(&format!("delta_luma_weight_l{list}[{i}]"))?;
                r.check_range("delta_luma_weight", i64::from(w), -128, 127)?;
                let o = r.se(&format!("luma_offset_l{list}[{i}]"))?;
                r.check_range("luma_offset", i64::from(o), -wp_offset_range, wp_offset_range - 1)?;
            }
            if chroma_flags[i] {
                for j in 0..2 {
                    let w = r.se(&format!("delta_chroma_weight_l{list}[{i}][{j}]"))?;
                    r.check_range("delta_chroma_weight", i64::from(w), -128, 127)?;
                    let o = r.se(&format!("delta_chroma_offset_l{list}[{i}][{j}]"))?;
                    r.check_range(
                        "delta_chroma_offset",
                        i64::from(o),
                        -4 * wp_offset_range,
                        4 * wp_offset_range - 1,
                    )?;
                }
            }
        }
    }
    r.exit();
    Ok(())
}
