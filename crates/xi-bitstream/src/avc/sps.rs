//! H.264 SPS (Sequence Parameter Set) 解析器 (7.3.2.1.1).
//!
//! SPS 包含编码视频序列的全局参数, 包括:
//! - Profile / Level (编码规格)
//! - 图像宽度和高度 (以宏块为单位, 需要 cropping 调整)
//! - 色度格式 (chroma_format_idc)
//! - 帧率与 HRD 信息 (通过 VUI)
//! - 参考帧数量等

use bitflags::bitflags;
use xi_core::{BitReader, FieldValue, Rational, XiError, XiResult};

use super::scaling::{ScalingMatrices, parse_scaling_matrices};
use super::vui::{VuiParameters, parse_vui};

bitflags! {
    /// constraint_set0_flag ~ constraint_set5_flag
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConstraintFlags: u8 {
        const SET0 = 0x80;
        const SET1 = 0x40;
        const SET2 = 0x20;
        const SET3 = 0x10;
        const SET4 = 0x08;
        const SET5 = 0x04;
    }
}

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Sps {
    /// profile_idc (编码规格, 如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    pub constraint_flags: ConstraintFlags,
    /// level_idc (编码级别, 如 30=3.0, 41=4.1)
    pub level_idc: u8,
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub scaling: Option<ScalingMatrices>,
    /// log2(max_frame_num) = log2_max_frame_num_minus4 + 4
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(max_pic_order_cnt_lsb), 仅 poc_type==0
    pub log2_max_poc_lsb: u32,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    /// 是否为帧编码 (非场编码)
    pub frame_mbs_only: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub crop_left: u32,
    pub crop_right: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    pub vui: Option<VuiParameters>,
}

impl Sps {
    /// ChromaArrayType
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// 帧率 (如果 VUI 中有 timing_info)
    pub fn frame_rate(&self) -> Option<Rational> {
        self.vui.as_ref()?.timing?.frame_rate()
    }

    /// 像素宽高比, 无 VUI 时为 1:1
    pub fn sar(&self) -> Rational {
        self.vui.as_ref().map_or(Rational::new(1, 1), |v| v.sar)
    }

    /// 例如 "High@4.1"
    pub fn profile_level(&self) -> String {
        format!(
            "{}@{}.{}",
            profile_name(self.profile_idc),
            self.level_idc / 10,
            self.level_idc % 10
        )
    }
}

/// profile_idc 的名称 (附录 A)
pub fn profile_name(profile_idc: u8) -> &'static str {
    match profile_idc {
        66 => "Baseline",
        77 => "Main",
        88 => "Extended",
        100 => "High",
        110 => "High 10",
        122 => "High 4:2:2",
        244 => "High 4:4:4 Predictive",
        44 => "CAVLC 4:4:4 Intra",
        83 => "Scalable Baseline",
        86 => "Scalable High",
        118 => "Multiview High",
        128 => "Stereo High",
        134 => "MFC High",
        138 => "Multiview Depth High",
        139 => "Enhanced Multiview Depth High",
        _ => "Unknown",
    }
}

const CHROMA_FORMAT_NAMES: [&str; 4] = ["4:0:0", "4:2:0", "4:2:2", "4:4:4"];

/// 从 NAL 头之后的 RBSP 解析 SPS
pub fn parse_sps(r: &mut BitReader) -> XiResult<Sps> {
    r.enter("seq_parameter_set_rbsp()");
    let profile_idc = r.u("profile_idc", 8)? as u8;
    r.annotate(profile_name(profile_idc));
    let mut flags = 0u8;
    for i in 0..6 {
        if r.flag(&format!("constraint_set{i}_flag"))? {
            flags |= 0x80 >> i;
        }
    }
    let constraint_flags = ConstraintFlags::from_bits_truncate(flags);
    r.u("reserved_zero_2bits", 2)?;
    let level_idc = r.u("level_idc", 8)? as u8;
    let sps_id = r.ue("seq_parameter_set_id")?;
    r.check_range("seq_parameter_set_id", i64::from(sps_id), 0, 31)?;

    let mut chroma_format_idc = 1; // 默认 4:2:0
    let mut separate_colour_plane_flag = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut scaling = None;

    // High profile 及以上有额外字段
    if is_high_profile(profile_idc) {
        chroma_format_idc = r.ue("chroma_format_idc")?;
        r.check_range("chroma_format_idc", i64::from(chroma_format_idc), 0, 3)?;
        r.annotate(CHROMA_FORMAT_NAMES[chroma_format_idc as usize]);
        if chroma_format_idc == 3 {
            separate_colour_plane_flag = r.flag("separate_colour_plane_flag")?;
        }
        let luma_minus8 = r.ue("bit_depth_luma_minus8")?;
        r.check_range("bit_depth_luma_minus8", i64::from(luma_minus8), 0, 6)?;
        let chroma_minus8 = r.ue("bit_depth_chroma_minus8")?;
        r.check_range("bit_depth_chroma_minus8", i64::from(chroma_minus8), 0, 6)?;
        bit_depth_luma = luma_minus8 + 8;
        bit_depth_chroma = chroma_minus8 + 8;
        r.flag("qpprime_y_zero_transform_bypass_flag")?;
        if r.flag("seq_scaling_matrix_present_flag")? {
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            scaling = Some(parse_scaling_matrices(
                r,
                list_count,
                chroma_format_idc,
                None,
            )?);
        }
    }

    let log2_max_frame_num_minus4 = r.ue("log2_max_frame_num_minus4")?;
    r.check_range(
        "log2_max_frame_num_minus4",
        i64::from(log2_max_frame_num_minus4),
        0,
        12,
    )?;

    let poc_type = r.ue("pic_order_cnt_type")?;
    r.check_range("pic_order_cnt_type", i64::from(poc_type), 0, 2)?;
    let mut log2_max_poc_lsb = 0u32;
    let mut delta_pic_order_always_zero_flag = false;
    let mut offset_for_non_ref_pic = 0i32;
    let mut offset_for_top_to_bottom_field = 0i32;
    let mut offset_for_ref_frame = Vec::new();
    match poc_type {
        0 => {
            let minus4 = r.ue("log2_max_pic_order_cnt_lsb_minus4")?;
            r.check_range("log2_max_pic_order_cnt_lsb_minus4", i64::from(minus4), 0, 12)?;
            log2_max_poc_lsb = minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero_flag = r.flag("delta_pic_order_always_zero_flag")?;
            offset_for_non_ref_pic = r.se("offset_for_non_ref_pic")?;
            offset_for_top_to_bottom_field = r.se("offset_for_top_to_bottom_field")?;
            let num_ref_in_poc = r.ue("num_ref_frames_in_pic_order_cnt_cycle")?;
            r.check_range(
                "num_ref_frames_in_pic_order_cnt_cycle",
                i64::from(num_ref_in_poc),
                0,
                255,
            )?;
            for i in 0..num_ref_in_poc {
                offset_for_ref_frame.push(r.se(&format!("offset_for_ref_frame[{i}]"))?);
            }
        }
        _ => {} // poc_type == 2: 无额外字段
    }

    let max_num_ref_frames = r.ue("max_num_ref_frames")?;
    let gaps_in_frame_num_value_allowed_flag = r.flag("gaps_in_frame_num_value_allowed_flag")?;
    let pic_width_in_mbs = r.ue("pic_width_in_mbs_minus1")?.saturating_add(1);
    let pic_height_in_map_units = r.ue("pic_height_in_map_units_minus1")?.saturating_add(1);
    let frame_mbs_only = r.flag("frame_mbs_only_flag")?;
    let mb_adaptive_frame_field_flag = if frame_mbs_only {
        false
    } else {
        r.flag("mb_adaptive_frame_field_flag")?
    };
    let direct_8x8_inference_flag = r.flag("direct_8x8_inference_flag")?;

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if r.flag("frame_cropping_flag")? {
        crop_left = r.ue("frame_crop_left_offset")?;
        crop_right = r.ue("frame_crop_right_offset")?;
        crop_top = r.ue("frame_crop_top_offset")?;
        crop_bottom = r.ue("frame_crop_bottom_offset")?;
    }

    let mut sps = Sps {
        profile_idc,
        constraint_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane_flag,
        bit_depth_luma,
        bit_depth_chroma,
        scaling,
        log2_max_frame_num: log2_max_frame_num_minus4 + 4,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero_flag,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_value_allowed_flag,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only,
        mb_adaptive_frame_field_flag,
        direct_8x8_inference_flag,
        crop_left,
        crop_right,
        crop_top,
        crop_bottom,
        width: 0,
        height: 0,
        vui: None,
    };
    let (width, height) = cropped_size(&sps)?;
    sps.width = width;
    sps.height = height;
    r.derive("PicWidth", FieldValue::Unsigned(u64::from(width)));
    r.derive("PicHeight", FieldValue::Unsigned(u64::from(height)));

    if r.flag("vui_parameters_present_flag")? {
        sps.vui = Some(parse_vui(r)?);
    }
    r.exit();

    Ok(sps)
}

/// 是否为 High Profile 或更高
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    )
}

/// 获取 cropping 单位
fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let sub_width = match chroma_array_type {
        0 | 3 => 1,
        _ => 2, // 4:2:0 和 4:2:2
    };
    let sub_height = match chroma_array_type {
        0 | 2 | 3 => 1,
        _ => 2, // 4:2:0
    };
    let height_mult = if frame_mbs_only { 1 } else { 2 };

    (sub_width, sub_height * height_mult)
}

/// 计算裁剪后的像素尺寸
fn cropped_size(sps: &Sps) -> XiResult<(u32, u32)> {
    let (crop_unit_x, crop_unit_y) = cropping_unit(sps.chroma_array_type(), sps.frame_mbs_only);
    let overflow = || XiError::syntax("frame_cropping", "H.264: 计算图像尺寸时发生溢出");
    let raw_width = sps.pic_width_in_mbs.checked_mul(16).ok_or_else(overflow)?;
    let raw_height = sps
        .pic_height_in_map_units
        .checked_mul(if sps.frame_mbs_only { 16 } else { 32 })
        .ok_or_else(overflow)?;
    let crop_x = sps
        .crop_left
        .checked_add(sps.crop_right)
        .and_then(|v| v.checked_mul(crop_unit_x))
        .ok_or_else(overflow)?;
    let crop_y = sps
        .crop_top
        .checked_add(sps.crop_bottom)
        .and_then(|v| v.checked_mul(crop_unit_y))
        .ok_or_else(overflow)?;
    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(XiError::syntax(
            "frame_cropping",
            format!(
                "H.264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
                raw_width, raw_height, crop_x, crop_y
            ),
        ));
    }
    Ok((raw_width - crop_x, raw_height - crop_y))
}

#[cfg(test)]
pub(crate) mod test_support {
    use xi_core::bitwriter::BitWriter;

    /// 写出一个 1920x1080 High profile SPS 的 RBSP (不含 NAL 头)
    pub fn write_high_sps(bw: &mut BitWriter, sps_id: u32, with_vui: bool) {
        bw.write_bits(100, 8); // profile_idc
        bw.write_bits(0, 8); // constraint flags + reserved
        bw.write_bits(40, 8); // level_idc
        bw.write_ue(sps_id);
        bw.write_ue(1); // chroma_format_idc
        bw.write_ue(0); // bit_depth_luma_minus8
        bw.write_ue(0); // bit_depth_chroma_minus8
        bw.write_flag(false); // qpprime
        bw.write_flag(false); // seq_scaling_matrix_present_flag
        bw.write_ue(0); // log2_max_frame_num_minus4
        bw.write_ue(0); // pic_order_cnt_type
        bw.write_ue(2); // log2_max_pic_order_cnt_lsb_minus4
        bw.write_ue(4); // max_num_ref_frames
        bw.write_flag(false); // gaps
        bw.write_ue(119); // pic_width_in_mbs_minus1 -> 1920
        bw.write_ue(67); // pic_height_in_map_units_minus1 -> 1088
        bw.write_flag(true); // frame_mbs_only_flag
        bw.write_flag(true); // direct_8x8_inference_flag
        bw.write_flag(true); // frame_cropping_flag
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(4); // 4 * 2 = 8 行
        bw.write_flag(with_vui);
        if with_vui {
            bw.write_flag(false); // aspect_ratio
            bw.write_flag(false); // overscan
            bw.write_flag(false); // video_signal_type
            bw.write_flag(false); // chroma_loc
            bw.write_flag(true); // timing
            bw.write_bits(1, 32);
            bw.write_bits(50, 32);
            bw.write_flag(true);
            bw.write_flag(true); // nal_hrd
            bw.write_ue(0); // cpb_cnt_minus1
            bw.write_bits(4, 4);
            bw.write_bits(6, 4);
            bw.write_ue(15624); // bit_rate_value_minus1
            bw.write_ue(31249); // cpb_size_value_minus1
            bw.write_flag(false);
            bw.write_bits(23, 5);
            bw.write_bits(23, 5);
            bw.write_bits(23, 5);
            bw.write_bits(24, 5);
            bw.write_flag(false); // vcl_hrd
            bw.write_flag(false); // low_delay_hrd_flag
            bw.write_flag(true); // pic_struct_present_flag
            bw.write_flag(false); // bitstream_restriction
        }
        bw.write_trailing_bits();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_high_sps;
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_parse_sps_high_1080p() {
        let mut bw = BitWriter::new();
        write_high_sps(&mut bw, 0, false);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let sps = parse_sps(&mut r).expect("合法 SPS 应解析成功");
        assert_eq!(sps.profile_idc, 100);
        assert_eq!(sps.width, 1920);
        assert_eq!(sps.height, 1080);
        assert_eq!(sps.log2_max_poc_lsb, 6);
        assert_eq!(sps.profile_level(), "High@4.0");
        assert!(sps.vui.is_none());
        assert_eq!(sps.sar(), Rational::new(1, 1));
    }

    #[test]
    fn test_parse_sps_with_vui_hrd() {
        let mut bw = BitWriter::new();
        write_high_sps(&mut bw, 3, true);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let sps = parse_sps(&mut r).expect("带 VUI 的 SPS 应解析成功");
        assert_eq!(sps.sps_id, 3);
        assert_eq!(sps.frame_rate(), Some(Rational::new(25, 1)));
        let hrd = sps.vui.as_ref().and_then(|v| v.hrd()).expect("应有 NAL HRD");
        // (15624 + 1) << 10
        assert_eq!(hrd.bit_rate(0), Some(16_000_000));
        assert_eq!(hrd.time_offset_length, 24);
    }

    #[test]
    fn test_parse_sps_baseline_constraint_flags() {
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8);
        bw.write_bits(0b1100_0000, 8); // constraint_set0 + set1
        bw.write_bits(30, 8);
        bw.write_ue(0);
        bw.write_ue(0); // log2_max_frame_num_minus4
        bw.write_ue(2); // poc type 2
        bw.write_ue(1);
        bw.write_flag(false);
        bw.write_ue(21); // 352
        bw.write_ue(17); // 288
        bw.write_flag(true);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let sps = parse_sps(&mut r).unwrap();
        assert!(sps.constraint_flags.contains(ConstraintFlags::SET0 | ConstraintFlags::SET1));
        assert!(!sps.constraint_flags.contains(ConstraintFlags::SET2));
        assert_eq!((sps.width, sps.height), (352, 288));
        assert_eq!(sps.chroma_format_idc, 1);
    }

    #[test]
    fn test_parse_sps_reject_sps_id_out_of_range() {
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8);
        bw.write_bits(0, 8);
        bw.write_bits(30, 8);
        bw.write_ue(32);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_sps(&mut r).expect_err("sps_id=32 应失败");
        let msg = format!("{err}");
        assert!(
            msg.contains("seq_parameter_set_id"),
            "错误信息应包含字段名, actual={}",
            msg
        );
    }

    #[test]
    fn test_parse_sps_truncated_is_out_of_bits() {
        let mut bw = BitWriter::new();
        write_high_sps(&mut bw, 0, true);
        let mut data = bw.finish();
        data.truncate(12);
        let mut r = BitReader::new(&data);
        let err = parse_sps(&mut r).expect_err("截断的 SPS 应失败");
        assert!(matches!(err, XiError::OutOfBits { .. }), "实际: {err:?}");
        assert!(r.failed_field().is_some());
    }
}
