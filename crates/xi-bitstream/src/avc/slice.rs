//! H.264 slice header 解析 (7.3.3).
//!
//! 只解析到 slice_data() 之前, 宏块数据不在分析范围内.

use xi_core::{BitReader, FieldValue, XiError, XiResult};

use super::AvcState;
use super::nal::NalHeader;
use super::pps::{Pps, ceil_log2};
use super::sps::Sps;

/// slice_type % 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(raw: u32) -> Self {
        match raw % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        }
    }

    fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    fn is_inter_predicted(&self) -> bool {
        matches!(self, Self::P | Self::Sp | Self::B)
    }
}

/// slice header 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    /// slice_type 原始值 (5~9 表示整幅图像同类型)
    pub slice_type_raw: u32,
    pub pps_id: u32,
    pub colour_plane_id: Option<u32>,
    pub frame_num: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: Option<u32>,
    pub pic_order_cnt_lsb: Option<u32>,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_l0_active_minus1: u32,
    pub num_ref_idx_l1_active_minus1: u32,
    pub cabac_init_idc: u32,
    pub slice_qp_delta: i32,
    /// SliceQPY = 26 + pic_init_qp_minus26 + slice_qp_delta
    pub slice_qp: i32,
    pub disable_deblocking_filter_idc: u32,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
    pub slice_group_change_cycle: Option<u32>,
}

impl SliceHeader {
    /// 是否为一幅新图像的第一个 slice
    pub fn starts_picture(&self) -> bool {
        self.first_mb_in_slice == 0
    }
}

/// 解析 slice_header()
///
/// 引用的 PPS 或 SPS 尚未出现时返回语法错误, 字段为 `pic_parameter_set_id`.
pub fn parse_slice_header(
    r: &mut BitReader,
    state: &AvcState,
    nal: &NalHeader,
) -> XiResult<SliceHeader> {
    r.enter("slice_header()");
    let first_mb_in_slice = r.ue("first_mb_in_slice")?;
    let slice_type_raw = r.ue("slice_type")?;
    r.check_range("slice_type", i64::from(slice_type_raw), 0, 9)?;
    let slice_type = SliceType::from_raw(slice_type_raw);
    r.annotate(slice_type.name());
    let pps_id = r.ue("pic_parameter_set_id")?;
    r.check_range("pic_parameter_set_id", i64::from(pps_id), 0, 255)?;

    let pps = state.pps.get(&pps_id).ok_or_else(|| {
        XiError::syntax(
            "pic_parameter_set_id",
            format!("H.264: 引用的 PPS 不存在, id={}", pps_id),
        )
    })?;
    let sps = state.sps.get(&pps.sps_id).ok_or_else(|| {
        XiError::syntax(
            "pic_parameter_set_id",
            format!("H.264: PPS {} 引用的 SPS 不存在, id={}", pps_id, pps.sps_id),
        )
    })?;

    let colour_plane_id = if sps.separate_colour_plane_flag {
        Some(r.u("colour_plane_id", 2)?)
    } else {
        None
    };
    let frame_num = r.u("frame_num", sps.log2_max_frame_num)?;

    let mut field_pic_flag = false;
    let mut bottom_field_flag = false;
    if !sps.frame_mbs_only {
        field_pic_flag = r.flag("field_pic_flag")?;
        if field_pic_flag {
            bottom_field_flag = r.flag("bottom_field_flag")?;
        }
    }

    let idr_pic_id = if nal.nal_type.is_idr() {
        let id = r.ue("idr_pic_id")?;
        r.check_range("idr_pic_id", i64::from(id), 0, 65535)?;
        Some(id)
    } else {
        None
    };

    let mut pic_order_cnt_lsb = None;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0i32; 2];
    let bottom_present = pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag;
    if sps.poc_type == 0 {
        pic_order_cnt_lsb = Some(r.u("pic_order_cnt_lsb", sps.log2_max_poc_lsb)?);
        if bottom_present {
            delta_pic_order_cnt_bottom = r.se("delta_pic_order_cnt_bottom")?;
        }
    } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero_flag {
        delta_pic_order_cnt[0] = r.se("delta_pic_order_cnt[0]")?;
        if bottom_present {
            delta_pic_order_cnt[1] = r.se("delta_pic_order_cnt[1]")?;
        }
    }

    let redundant_pic_cnt = if pps.redundant_pic_cnt_present_flag {
        let v = r.ue("redundant_pic_cnt")?;
        r.check_range("redundant_pic_cnt", i64::from(v), 0, 127)?;
        v
    } else {
        0
    };

    let is_b = slice_type == SliceType::B;
    let direct_spatial_mv_pred_flag = if is_b {
        r.flag("direct_spatial_mv_pred_flag")?
    } else {
        false
    };

    let mut num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
    let mut num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
    if slice_type.is_inter_predicted() && r.flag("num_ref_idx_active_override_flag")? {
        // 场编码时上限为 31, 帧编码时为 15
        let max = if field_pic_flag { 31 } else { 15 };
        num_ref_idx_l0_active_minus1 = r.ue("num_ref_idx_l0_active_minus1")?;
        r.check_range(
            "num_ref_idx_l0_active_minus1",
            i64::from(num_ref_idx_l0_active_minus1),
            0,
            max,
        )?;
        if is_b {
            num_ref_idx_l1_active_minus1 = r.ue("num_ref_idx_l1_active_minus1")?;
            r.check_range(
                "num_ref_idx_l1_active_minus1",
                i64::from(num_ref_idx_l1_active_minus1),
                0,
                max,
            )?;
        }
    }

    parse_ref_pic_list_modification(r, slice_type)?;

    let weighted = (pps.weighted_pred_flag
        && matches!(slice_type, SliceType::P | SliceType::Sp))
        || (pps.weighted_bipred_idc == 1 && is_b);
    if weighted {
        parse_pred_weight_table(
            r,
            sps,
            is_b,
            num_ref_idx_l0_active_minus1,
            num_ref_idx_l1_active_minus1,
        )?;
    }

    if nal.ref_idc != 0 {
        parse_dec_ref_pic_marking(r, nal.nal_type.is_idr())?;
    }

    let mut cabac_init_idc = 0;
    if pps.entropy_coding_mode_flag && !slice_type.is_intra() {
        cabac_init_idc = r.ue("cabac_init_idc")?;
        r.check_range("cabac_init_idc", i64::from(cabac_init_idc), 0, 2)?;
    }

    let slice_qp_delta = r.se("slice_qp_delta")?;
    let slice_qp = pps.pic_init_qp + slice_qp_delta;
    let qp_min = -6 * (sps.bit_depth_luma as i32 - 8);
    if !(qp_min..=51).contains(&slice_qp) {
        return Err(XiError::syntax(
            "slice_qp_delta",
            format!("H.264: slice_qp 超出范围, slice_qp={}", slice_qp),
        ));
    }
    r.derive("SliceQPY", FieldValue::Signed(i64::from(slice_qp)));

    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            r.flag("sp_for_switch_flag")?;
        }
        r.se("slice_qs_delta")?;
    }

    let mut disable_deblocking_filter_idc = 0;
    let mut slice_alpha_c0_offset_div2 = 0;
    let mut slice_beta_offset_div2 = 0;
    if pps.deblocking_filter_control_present_flag {
        disable_deblocking_filter_idc = r.ue("disable_deblocking_filter_idc")?;
        r.check_range(
            "disable_deblocking_filter_idc",
            i64::from(disable_deblocking_filter_idc),
            0,
            2,
        )?;
        if disable_deblocking_filter_idc != 1 {
            slice_alpha_c0_offset_div2 = r.se("slice_alpha_c0_offset_div2")?;
            r.check_range(
                "slice_alpha_c0_offset_div2",
                i64::from(slice_alpha_c0_offset_div2),
                -6,
                6,
            )?;
            slice_beta_offset_div2 = r.se("slice_beta_offset_div2")?;
            r.check_range(
                "slice_beta_offset_div2",
                i64::from(slice_beta_offset_div2),
                -6,
                6,
            )?;
        }
    }

    let slice_group_change_cycle = if pps.num_slice_groups_minus1 > 0
        && (3..=5).contains(&pps.slice_group_map_type)
    {
        let bits = slice_group_change_cycle_bits(sps, pps)?;
        Some(r.u("slice_group_change_cycle", bits)?)
    } else {
        None
    };
    r.exit();

    Ok(SliceHeader {
        first_mb_in_slice,
        slice_type,
        slice_type_raw,
        pps_id,
        colour_plane_id,
        frame_num,
        field_pic_flag,
        bottom_field_flag,
        idr_pic_id,
        pic_order_cnt_lsb,
        delta_pic_order_cnt_bottom,
        delta_pic_order_cnt,
        redundant_pic_cnt,
        direct_spatial_mv_pred_flag,
        num_ref_idx_l0_active_minus1,
        num_ref_idx_l1_active_minus1,
        cabac_init_idc,
        slice_qp_delta,
        slice_qp,
        disable_deblocking_filter_idc,
        slice_alpha_c0_offset_div2,
        slice_beta_offset_div2,
        slice_group_change_cycle,
    })
}

/// Ceil(Log2(PicSizeInMapUnits / SliceGroupChangeRate + 1))
fn slice_group_change_cycle_bits(sps: &Sps, pps: &Pps) -> XiResult<u32> {
    let pic_size_in_map_units =
        u64::from(sps.pic_width_in_mbs) * u64::from(sps.pic_height_in_map_units);
    let rate = u64::from(pps.slice_group_change_rate_minus1) + 1;
    u32::try_from(pic_size_in_map_units.div_ceil(rate) + 1)
        .map(ceil_log2)
        .map_err(|_| {
            XiError::syntax(
                "slice_group_change_cycle",
                format!(
                    "H.264: PicSizeInMapUnits 超出范围, {}x{}",
                    sps.pic_width_in_mbs, sps.pic_height_in_map_units
                ),
            )
        })
}

fn parse_ref_pic_list_modification(r: &mut BitReader, slice_type: SliceType) -> XiResult<()> {
    if slice_type.is_intra() {
        return Ok(());
    }
    r.enter("ref_pic_list_modification()");
    parse_single_list_modification(r, 0)?;
    if slice_type == SliceType::B {
        parse_single_list_modification(r, 1)?;
    }
    r.exit();
    Ok(())
}

/// 单个列表的修改语法, 以 modification_of_pic_nums_idc == 3 结束
fn parse_single_list_modification(r: &mut BitReader, list: u32) -> XiResult<()> {
    if !r.flag(&format!("ref_pic_list_modification_flag_l{list}"))? {
        return Ok(());
    }
    let mut count = 0;
    loop {
        let idc = r.ue("modification_of_pic_nums_idc")?;
        match idc {
            0 | 1 => {
                r.ue("abs_diff_pic_num_minus1")?;
            }
            2 => {
                r.ue("long_term_pic_num")?;
            }
            3 => break,
            _ => {
                return Err(XiError::syntax(
                    "modification_of_pic_nums_idc",
                    format!("H.264: modification_of_pic_nums_idc 非法, value={}", idc),
                ));
            }
        }
        count += 1;
        if count > 96 {
            return Err(XiError::syntax(
                "modification_of_pic_nums_idc",
                "H.264: ref_pic_list_modification 项数过多",
            ));
        }
    }
    Ok(())
}

fn parse_pred_weight_table(
    r: &mut BitReader,
    sps: &Sps,
    is_b: bool,
    num_ref_idx_l0_active_minus1: u32,
    num_ref_idx_l1_active_minus1: u32,
) -> XiResult<()> {
    r.enter("pred_weight_table()");
    let luma_denom = r.ue("luma_log2_weight_denom")?;
    r.check_range("luma_log2_weight_denom", i64::from(luma_denom), 0, 7)?;
    let has_chroma = sps.chroma_array_type() != 0;
    if has_chroma {
        let chroma_denom = r.ue("chroma_log2_weight_denom")?;
        r.check_range("chroma_log2_weight_denom", i64::from(chroma_denom), 0, 7)?;
    }
    parse_weights_for_list(r, 0, num_ref_idx_l0_active_minus1, has_chroma)?;
    if is_b {
        parse_weights_for_list(r, 1, num_ref_idx_l1_active_minus1, has_chroma)?;
    }
    r.exit();
    Ok(())
}

fn parse_weights_for_list(
    r: &mut BitReader,
    list: u32,
    num_ref_idx_active_minus1: u32,
    has_chroma: bool,
) -> XiResult<()> {
    for i in 0..=num_ref_idx_active_minus1 {
        if r.flag(&format!("luma_weight_l{list}_flag[{i}]"))? {
            let w = r.se(&format!("luma_weight_l{list}[{i}]"))?;
            r.check_range(&format!("luma_weight_l{list}[{i}]"), i64::from(w), -128, 127)?;
            let o = r.se(&format!("luma_offset_l{list}[{i}]"))?;
            r.check_range(&format!("luma_offset_l{list}[{i}]"), i64::from(o), -128, 127)?;
        }
        if has_chroma && r.flag(&format!("chroma_weight_l{list}_flag[{i}]"))? {
            for j in 0..2 {
                r.se(&format!("chroma_weight_l{list}[{i}][{j}]"))?;
                r.se(&format!("chroma_offset_l{list}[{i}][{j}]"))?;
            }
        }
    }
    Ok(())
}

fn parse_dec_ref_pic_marking(r: &mut BitReader, idr: bool) -> XiResult<()> {
    r.enter("dec_ref_pic_marking()");
    if idr {
        r.flag("no_output_of_prior_pics_flag")?;
        r.flag("long_term_reference_flag")?;
    } else if r.flag("adaptive_ref_pic_marking_mode_flag")? {
        let mut count = 0;
        loop {
            let mmco = r.ue("memory_management_control_operation")?;
            match mmco {
                0 => break,
                1 => {
                    r.ue("difference_of_pic_nums_minus1")?;
                }
                2 => {
                    r.ue("long_term_pic_num")?;
                }
                3 => {
                    r.ue("difference_of_pic_nums_minus1")?;
                    r.ue("long_term_frame_idx")?;
                }
                4 => {
                    r.ue("max_long_term_frame_idx_plus1")?;
                }
                5 => {}
                6 => {
                    r.ue("long_term_frame_idx")?;
                }
                _ => {
                    return Err(XiError::syntax(
                        "memory_management_control_operation",
                        format!("H.264: memory_management_control_operation 非法, value={}", mmco),
                    ));
                }
            }
            count += 1;
            if count > 66 {
                return Err(XiError::syntax(
                    "memory_management_control_operation",
                    "H.264: dec_ref_pic_marking 项数过多",
                ));
            }
        }
    }
    r.exit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::nal::NalUnitType;
    use crate::avc::pps::parse_pps;
    use crate::avc::pps::test_support::write_simple_pps;
    use crate::avc::sps::parse_sps;
    use crate::avc::sps::test_support::write_high_sps;
    use xi_core::bitwriter::BitWriter;

    fn state_with_sps_pps(cabac: bool) -> AvcState {
        let mut state = AvcState::default();
        let mut bw = BitWriter::new();
        write_high_sps(&mut bw, 0, false);
        let sps_data = bw.finish();
        state.store_sps(parse_sps(&mut BitReader::new(&sps_data)).unwrap());

        let mut bw = BitWriter::new();
        write_simple_pps(&mut bw, 0, 0, cabac);
        let pps_data = bw.finish();
        let pps = parse_pps(&mut BitReader::new(&pps_data), &state).unwrap();
        state.store_pps(pps);
        state
    }

    fn idr_header() -> NalHeader {
        NalHeader {
            ref_idc: 3,
            nal_type: NalUnitType::SliceIdr,
        }
    }

    #[test]
    fn test_parse_idr_slice_header() {
        let state = state_with_sps_pps(false);
        let mut bw = BitWriter::new();
        bw.write_ue(0); // first_mb_in_slice
        bw.write_ue(7); // slice_type = I (整幅)
        bw.write_ue(0); // pps_id
        bw.write_bits(0, 4); // frame_num
        bw.write_ue(1); // idr_pic_id
        bw.write_bits(0, 6); // pic_order_cnt_lsb
        bw.write_flag(false); // no_output_of_prior_pics_flag
        bw.write_flag(false); // long_term_reference_flag
        bw.write_se(-2); // slice_qp_delta
        bw.write_ue(0); // disable_deblocking_filter_idc
        bw.write_se(1);
        bw.write_se(-1);
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut r = BitReader::new(&data);
        let sh = parse_slice_header(&mut r, &state, &idr_header()).expect("slice header 应解析成功");
        assert_eq!(sh.slice_type, SliceType::I);
        assert_eq!(sh.slice_type_raw, 7);
        assert_eq!(sh.idr_pic_id, Some(1));
        assert_eq!(sh.pic_order_cnt_lsb, Some(0));
        assert_eq!(sh.slice_qp, 24);
        assert_eq!(sh.slice_alpha_c0_offset_div2, 1);
        assert_eq!(sh.slice_beta_offset_div2, -1);
        assert!(sh.starts_picture());
    }

    #[test]
    fn test_parse_p_slice_with_marking_and_cabac() {
        let state = state_with_sps_pps(true);
        let nal = NalHeader {
            ref_idc: 2,
            nal_type: NalUnitType::Slice,
        };
        let mut bw = BitWriter::new();
        bw.write_ue(40); // first_mb_in_slice
        bw.write_ue(0); // P
        bw.write_ue(0);
        bw.write_bits(3, 4); // frame_num
        bw.write_bits(6, 6); // poc lsb
        bw.write_flag(true); // num_ref_idx_active_override_flag
        bw.write_ue(2);
        bw.write_flag(true); // ref_pic_list_modification_flag_l0
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_ue(3);
        bw.write_flag(true); // adaptive_ref_pic_marking_mode_flag
        bw.write_ue(1);
        bw.write_ue(0);
        bw.write_ue(0); // mmco end
        bw.write_ue(1); // cabac_init_idc
        bw.write_se(3);
        bw.write_ue(1); // disable_deblocking_filter_idc = 1
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut r = BitReader::new(&data);
        let sh = parse_slice_header(&mut r, &state, &nal).unwrap();
        assert_eq!(sh.slice_type, SliceType::P);
        assert_eq!(sh.frame_num, 3);
        assert_eq!(sh.num_ref_idx_l0_active_minus1, 2);
        assert_eq!(sh.cabac_init_idc, 1);
        assert_eq!(sh.slice_qp, 29);
        assert_eq!(sh.disable_deblocking_filter_idc, 1);
        assert!(!sh.starts_picture());
    }

    #[test]
    fn test_slice_with_missing_pps_is_syntax_error() {
        let state = AvcState::default();
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(2);
        bw.write_ue(5);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_slice_header(&mut r, &state, &idr_header()).expect_err("缺少 PPS 应失败");
        assert!(
            matches!(err, XiError::Syntax { ref field, .. } if field == "pic_parameter_set_id"),
            "实际: {err:?}"
        );
    }

    #[test]
    fn test_invalid_mmco_rejected() {
        let state = state_with_sps_pps(false);
        let nal = NalHeader {
            ref_idc: 1,
            nal_type: NalUnitType::Slice,
        };
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(2); // I
        bw.write_ue(0);
        bw.write_bits(0, 4);
        bw.write_bits(0, 6);
        bw.write_flag(true);
        bw.write_ue(7);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_slice_header(&mut r, &state, &nal).expect_err("mmco=7 应失败");
        assert!(format!("{err}").contains("memory_management_control_operation"));
    }

    #[test]
    fn test_slice_group_cycle_with_huge_picture() {
        let mut state = state_with_sps_pps(false);
        for sps in state.sps.values_mut() {
            sps.pic_width_in_mbs = u32::MAX;
            sps.pic_height_in_map_units = u32::MAX;
        }
        for pps in state.pps.values_mut() {
            pps.num_slice_groups_minus1 = 1;
            pps.slice_group_map_type = 3;
            pps.slice_group_change_rate_minus1 = 0;
        }
        let mut bw = BitWriter::new();
        bw.write_ue(0);
        bw.write_ue(7);
        bw.write_ue(0);
        bw.write_bits(0, 4);
        bw.write_ue(1);
        bw.write_bits(0, 6);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_se(0);
        bw.write_ue(1); // 关闭去块滤波
        bw.write_bits(0, 32);
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut r = BitReader::new(&data);
        let err = parse_slice_header(&mut r, &state, &idr_header())
            .expect_err("PicSizeInMapUnits 溢出应报错");
        assert!(format!("{err}").contains("slice_group_change_cycle"), "{err}");
    }

    #[test]
    fn test_oversized_sps_yields_error_unit() {
        use crate::codec::Codec;
        use crate::scan::insert_emulation_prevention;
        use crate::unit::UnitParser;

        let mut bw = BitWriter::new();
        bw.write_bits(66, 8);
        bw.write_bits(0, 8);
        bw.write_bits(30, 8);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(2);
        bw.write_ue(1);
        bw.write_flag(false);
        bw.write_ue(0xFFFF_FFFE); // pic_width_in_mbs_minus1
        bw.write_ue(0xFFFF_FFFE); // pic_height_in_map_units_minus1
        bw.write_flag(true);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_trailing_bits();
        let mut sps = vec![0x67];
        sps.extend(insert_emulation_prevention(&bw.finish()));

        let mut parser = UnitParser::new(Codec::Avc);
        let unit = parser.parse(0, &sps);
        let error = unit.error.expect("尺寸溢出的 SPS 应报错");
        assert!(error.contains("frame_cropping"), "{error}");
        assert!(unit.node.has_error());

        // 之后的 slice 找不到参数集, 单独报错
        let unit = parser.parse(64, &[0x65, 0x88, 0x80]);
        assert!(unit.error.is_some());
    }
}
