//! H.265 VPS (Video Parameter Set) 解析 (7.3.2.1).

use xi_core::{BitReader, XiResult};

use super::hrd::{HevcHrdParameters, parse_hevc_hrd_parameters};
use super::ptl::{ProfileTierLevel, parse_profile_tier_level};
use super::vui::{HevcTimingInfo, parse_timing_info};

/// VPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcVps {
    pub vps_id: u8,
    pub max_layers_minus1: u8,
    pub max_sub_layers_minus1: u8,
    pub temporal_id_nesting_flag: bool,
    pub ptl: ProfileTierLevel,
    pub max_layer_id: u8,
    pub num_layer_sets_minus1: u32,
    pub timing: Option<HevcTimingInfo>,
    /// (hrd_layer_set_idx, hrd_parameters)
    pub hrd: Vec<(u32, HevcHrdParameters)>,
}

/// 解析 video_parameter_set_rbsp()
pub fn parse_hevc_vps(r: &mut BitReader) -> XiResult<HevcVps> {
    r.enter("video_parameter_set_rbsp()");
    let vps_id = r.u("vps_video_parameter_set_id", 4)? as u8;
    r.flag("vps_base_layer_internal_flag")?;
    r.flag("vps_base_layer_available_flag")?;
    let max_layers_minus1 = r.u("vps_max_layers_minus1", 6)? as u8;
    let max_sub_layers_minus1 = r.u("vps_max_sub_layers_minus1", 3)?;
    r.check_range("vps_max_sub_layers_minus1", i64::from(max_sub_layers_minus1), 0, 6)?;
    let temporal_id_nesting_flag = r.flag("vps_temporal_id_nesting_flag")?;
    r.u("vps_reserved_0xffff_16bits", 16)?;

    let ptl = parse_profile_tier_level(r, true, max_sub_layers_minus1)?;
    parse_sub_layer_ordering_info(r, "vps", max_sub_layers_minus1)?;

    let max_layer_id = r.u("vps_max_layer_id", 6)? as u8;
    let num_layer_sets_minus1 = r.ue("vps_num_layer_sets_minus1")?;
    r.check_range("vps_num_layer_sets_minus1", i64::from(num_layer_sets_minus1), 0, 1023)?;
    let flags_per_set = usize::from(max_layer_id) + 1;
    r.ensure_bits_for(
        "vps_num_layer_sets_minus1",
        num_layer_sets_minus1 as usize * flags_per_set,
        1,
    )?;
    for i in 1..=num_layer_sets_minus1 {
        for j in 0..flags_per_set {
            r.flag(&format!("layer_id_included_flag[{i}][{j}]"))?;
        }
    }

    let mut timing = None;
    let mut hrd = Vec::new();
    if r.flag("vps_timing_info_present_flag")? {
        timing = Some(parse_timing_info(r, "vps")?);
        let num_hrd = r.ue("vps_num_hrd_parameters")?;
        r.check_range(
            "vps_num_hrd_parameters",
            i64::from(num_hrd),
            0,
            i64::from(num_layer_sets_minus1) + 1,
        )?;
        for i in 0..num_hrd {
            let layer_set_idx = r.ue(&format!("hrd_layer_set_idx[{i}]"))?;
            let cprms_present = if i > 0 {
                r.flag(&format!("cprms_present_flag[{i}]"))?
            } else {
                true
            };
            let params = parse_hevc_hrd_parameters(r, cprms_present, max_sub_layers_minus1)?;
            hrd.push((layer_set_idx, params));
        }
    }
    if r.flag("vps_extension_flag")? {
        r.annotate("扩展数据未解析");
    }
    r.exit();

    Ok(HevcVps {
        vps_id,
        max_layers_minus1,
        max_sub_layers_minus1: max_sub_layers_minus1 as u8,
        temporal_id_nesting_flag,
        ptl,
        max_layer_id,
        num_layer_sets_minus1,
        timing,
        hrd,
    })
}

/// *_sub_layer_ordering_info (VPS 与 SPS 结构相同)
pub(crate) fn parse_sub_layer_ordering_info(
    r: &mut BitReader,
    prefix: &str,
    max_sub_layers_minus1: u32,
) -> XiResult<()> {
    let present = r.flag(&format!("{prefix}_sub_layer_ordering_info_present_flag"))?;
    let start = if present { 0 } else { max_sub_layers_minus1 };
    for i in start..=max_sub_layers_minus1 {
        r.ue(&format!("{prefix}_max_dec_pic_buffering_minus1[{i}]"))?;
        r.ue(&format!("{prefix}_max_num_reorder_pics[{i}]"))?;
        r.ue(&format!("{prefix}_max_latency_increase_plus1[{i}]"))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::hevc::ptl::test_support::write_main_ptl;
    use xi_core::bitwriter::BitWriter;

    /// 最小 VPS: 单层单子层, 带 25fps 时序与一个 HRD
    pub fn write_simple_vps(bw: &mut BitWriter, with_timing: bool) {
        bw.write_bits(0, 4); // vps_id
        bw.write_flag(true);
        bw.write_flag(true);
        bw.write_bits(0, 6);
        bw.write_bits(0, 3);
        bw.write_flag(true);
        bw.write_bits(0xFFFF, 16);
        write_main_ptl(bw, 93);
        bw.write_flag(true); // sub_layer_ordering_info_present
        bw.write_ue(4);
        bw.write_ue(2);
        bw.write_ue(0);
        bw.write_bits(0, 6); // vps_max_layer_id
        bw.write_ue(0); // vps_num_layer_sets_minus1
        bw.write_flag(with_timing);
        if with_timing {
            bw.write_bits(1, 32);
            bw.write_bits(25, 32);
            bw.write_flag(false);
            bw.write_ue(1); // vps_num_hrd_parameters
            bw.write_ue(0); // hrd_layer_set_idx
            bw.write_flag(true); // nal
            bw.write_flag(false); // vcl
            bw.write_flag(false); // sub_pic
            bw.write_bits(0, 4);
            bw.write_bits(0, 4);
            bw.write_bits(23, 5);
            bw.write_bits(23, 5);
            bw.write_bits(23, 5);
            bw.write_flag(true); // fixed_pic_rate_general_flag
            bw.write_ue(0); // elemental_duration_in_tc_minus1
            bw.write_ue(0); // cpb_cnt_minus1
            bw.write_ue(9999);
            bw.write_ue(19999);
            bw.write_flag(true);
        }
        bw.write_flag(false); // vps_extension_flag
        bw.write_trailing_bits();
    }
}
