//! H.265 HRD 参数解析 (E.2.2 / E.2.3).
//!
//! 与 H.264 不同, HEVC 的 HRD 按时域子层分别给出 CPB 规格, 且公共部分
//! (`commonInfPresentFlag`) 可以省略. 省略时三个长度字段推断为 23.

use serde::Serialize;
use xi_core::{BitReader, FieldValue, XiResult};

use crate::avc::hrd::MAX_CPB_CNT_MINUS1;

/// sub_layer_hrd_parameters(): 三个序列的长度恒为 cpb_cnt_minus1 + 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubLayerHrdParameters {
    pub bit_rate_value_minus1: Vec<u32>,
    pub cpb_size_value_minus1: Vec<u32>,
    pub cbr_flag: Vec<bool>,
}

/// 单个时域子层的 HRD 信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubLayerHrd {
    pub fixed_pic_rate_general_flag: bool,
    pub fixed_pic_rate_within_cvs_flag: bool,
    pub elemental_duration_in_tc_minus1: Option<u32>,
    pub low_delay_hrd_flag: bool,
    pub cpb_cnt_minus1: u32,
    pub nal: Option<SubLayerHrdParameters>,
    pub vcl: Option<SubLayerHrdParameters>,
}

/// HEVC hrd_parameters()
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HevcHrdParameters {
    pub nal_hrd_parameters_present_flag: bool,
    pub vcl_hrd_parameters_present_flag: bool,
    pub sub_pic_hrd_params_present_flag: bool,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub au_cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub sub_layers: Vec<SubLayerHrd>,
}

impl Default for HevcHrdParameters {
    fn default() -> Self {
        Self {
            nal_hrd_parameters_present_flag: false,
            vcl_hrd_parameters_present_flag: false,
            sub_pic_hrd_params_present_flag: false,
            bit_rate_scale: 0,
            cpb_size_scale: 0,
            initial_cpb_removal_delay_length_minus1: 23,
            au_cpb_removal_delay_length_minus1: 23,
            dpb_output_delay_length_minus1: 23,
            sub_layers: Vec::new(),
        }
    }
}

impl HevcHrdParameters {
    /// BitRate[i] = (bit_rate_value_minus1[i] + 1) * 2^(6 + bit_rate_scale)
    pub fn bit_rate(&self, params: &SubLayerHrdParameters, idx: usize) -> Option<u64> {
        let v = *params.bit_rate_value_minus1.get(idx)?;
        Some((u64::from(v) + 1) << (6 + u32::from(self.bit_rate_scale)))
    }

    /// CpbSize[i] = (cpb_size_value_minus1[i] + 1) * 2^(4 + cpb_size_scale)
    pub fn cpb_size(&self, params: &SubLayerHrdParameters, idx: usize) -> Option<u64> {
        let v = *params.cpb_size_value_minus1.get(idx)?;
        Some((u64::from(v) + 1) << (4 + u32::from(self.cpb_size_scale)))
    }
}

/// 解析 hrd_parameters(commonInfPresentFlag, maxNumSubLayersMinus1)
pub fn parse_hevc_hrd_parameters(
    r: &mut BitReader,
    common_inf_present: bool,
    max_sub_layers_minus1: u32,
) -> XiResult<HevcHrdParameters> {
    r.enter("hrd_parameters()");
    let mut hrd = HevcHrdParameters::default();
    if common_inf_present {
        hrd.nal_hrd_parameters_present_flag = r.flag("nal_hrd_parameters_present_flag")?;
        hrd.vcl_hrd_parameters_present_flag = r.flag("vcl_hrd_parameters_present_flag")?;
        if hrd.nal_hrd_parameters_present_flag || hrd.vcl_hrd_parameters_present_flag {
            hrd.sub_pic_hrd_params_present_flag = r.flag("sub_pic_hrd_params_present_flag")?;
            if hrd.sub_pic_hrd_params_present_flag {
                r.u("tick_divisor_minus2", 8)?;
                r.u("du_cpb_removal_delay_increment_length_minus1", 5)?;
                r.flag("sub_pic_cpb_params_in_pic_timing_sei_flag")?;
                r.u("dpb_output_delay_du_length_minus1", 5)?;
            }
            hrd.bit_rate_scale = r.u("bit_rate_scale", 4)? as u8;
            hrd.cpb_size_scale = r.u("cpb_size_scale", 4)? as u8;
            if hrd.sub_pic_hrd_params_present_flag {
                r.u("cpb_size_du_scale", 4)?;
            }
            hrd.initial_cpb_removal_delay_length_minus1 =
                r.u("initial_cpb_removal_delay_length_minus1", 5)? as u8;
            hrd.au_cpb_removal_delay_length_minus1 =
                r.u("au_cpb_removal_delay_length_minus1", 5)? as u8;
            hrd.dpb_output_delay_length_minus1 = r.u("dpb_output_delay_length_minus1", 5)? as u8;
        }
    }

    for i in 0..=max_sub_layers_minus1 {
        r.enter(&format!("sub_layer[{i}]"));
        let fixed_pic_rate_general_flag = r.flag("fixed_pic_rate_general_flag")?;
        let fixed_pic_rate_within_cvs_flag = if fixed_pic_rate_general_flag {
            true
        } else {
            r.flag("fixed_pic_rate_within_cvs_flag")?
        };
        let mut elemental_duration_in_tc_minus1 = None;
        let mut low_delay_hrd_flag = false;
        if fixed_pic_rate_within_cvs_flag {
            let v = r.ue("elemental_duration_in_tc_minus1")?;
            r.check_range("elemental_duration_in_tc_minus1", i64::from(v), 0, 2047)?;
            elemental_duration_in_tc_minus1 = Some(v);
        } else {
            low_delay_hrd_flag = r.flag("low_delay_hrd_flag")?;
        }
        let mut cpb_cnt_minus1 = 0;
        if !low_delay_hrd_flag {
            cpb_cnt_minus1 = r.ue("cpb_cnt_minus1")?;
            r.check_range(
                "cpb_cnt_minus1",
                i64::from(cpb_cnt_minus1),
                0,
                i64::from(MAX_CPB_CNT_MINUS1),
            )?;
        }
        let nal = if hrd.nal_hrd_parameters_present_flag {
            Some(parse_sub_layer(r, &hrd, cpb_cnt_minus1)?)
        } else {
            None
        };
        let vcl = if hrd.vcl_hrd_parameters_present_flag {
            Some(parse_sub_layer(r, &hrd, cpb_cnt_minus1)?)
        } else {
            None
        };
        hrd.sub_layers.push(SubLayerHrd {
            fixed_pic_rate_general_flag,
            fixed_pic_rate_within_cvs_flag,
            elemental_duration_in_tc_minus1,
            low_delay_hrd_flag,
            cpb_cnt_minus1,
            nal,
            vcl,
        });
        r.exit();
    }
    r.exit();
    Ok(hrd)
}

fn parse_sub_layer(
    r: &mut BitReader,
    hrd: &HevcHrdParameters,
    cpb_cnt_minus1: u32,
) -> XiResult<SubLayerHrdParameters> {
    r.enter("sub_layer_hrd_parameters()");
    let count = cpb_cnt_minus1 as usize + 1;
    r.ensure_bits_for("cpb_cnt_minus1", count, 3)?;
    let mut params = SubLayerHrdParameters {
        bit_rate_value_minus1: Vec::with_capacity(count),
        cpb_size_value_minus1: Vec::with_capacity(count),
        cbr_flag: Vec::with_capacity(count),
    };
    for i in 0..count {
        params
            .bit_rate_value_minus1
            .push(r.ue(&format!("bit_rate_value_minus1[{i}]"))?);
        params
            .cpb_size_value_minus1
            .push(r.ue(&format!("cpb_size_value_minus1[{i}]"))?);
        if hrd.sub_pic_hrd_params_present_flag {
            r.ue(&format!("cpb_size_du_value_minus1[{i}]"))?;
            r.ue(&format!("bit_rate_du_value_minus1[{i}]"))?;
        }
        params.cbr_flag.push(r.flag(&format!("cbr_flag[{i}]"))?);
        if r.is_tracing() {
            if let Some(rate) = hrd.bit_rate(&params, i) {
                r.derive(&format!("BitRate[{i}]"), FieldValue::Unsigned(rate));
            }
            if let Some(size) = hrd.cpb_size(&params, i) {
                r.derive(&format!("CpbSize[{i}]"), FieldValue::Unsigned(size));
            }
        }
    }
    r.exit();
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xi_core::XiError;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_common_info_absent_uses_inferred_lengths() {
        // 只有子层部分: fixed_pic_rate_general_flag=1, elemental_duration=0, cpb_cnt=0
        let mut bw = BitWriter::new();
        bw.write_flag(true);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let hrd = parse_hevc_hrd_parameters(&mut r, false, 0).unwrap();
        assert_eq!(hrd.initial_cpb_removal_delay_length_minus1, 23);
        assert_eq!(hrd.au_cpb_removal_delay_length_minus1, 23);
        assert_eq!(hrd.dpb_output_delay_length_minus1, 23);
        assert_eq!(hrd.sub_layers.len(), 1);
        assert!(hrd.sub_layers[0].fixed_pic_rate_within_cvs_flag);
        assert!(hrd.sub_layers[0].nal.is_none());
    }

    #[test]
    fn test_nal_hrd_with_two_schedules() {
        let mut bw = BitWriter::new();
        bw.write_flag(true); // nal
        bw.write_flag(false); // vcl
        bw.write_flag(false); // sub_pic
        bw.write_bits(2, 4);
        bw.write_bits(3, 4);
        bw.write_bits(20, 5);
        bw.write_bits(21, 5);
        bw.write_bits(22, 5);
        bw.write_flag(false); // fixed_pic_rate_general_flag
        bw.write_flag(false); // fixed_pic_rate_within_cvs_flag
        bw.write_flag(false); // low_delay_hrd_flag
        bw.write_ue(1); // cpb_cnt_minus1
        for (rate, size, cbr) in [(999, 1999, false), (4999, 9999, true)] {
            bw.write_ue(rate);
            bw.write_ue(size);
            bw.write_flag(cbr);
        }
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let hrd = parse_hevc_hrd_parameters(&mut r, true, 0).unwrap();
        assert_eq!(hrd.initial_cpb_removal_delay_length_minus1, 20);
        assert_eq!(hrd.dpb_output_delay_length_minus1, 22);
        let nal = hrd.sub_layers[0].nal.as_ref().expect("应有 NAL 子层参数");
        assert_eq!(nal.bit_rate_value_minus1.len(), 2);
        assert_eq!(nal.cbr_flag, vec![false, true]);
        // (4999 + 1) << 8
        assert_eq!(hrd.bit_rate(nal, 1), Some(1_280_000));
    }

    #[test]
    fn test_reject_cpb_cnt_over_limit() {
        let mut bw = BitWriter::new();
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_flag(false);
        bw.write_ue(40);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let err = parse_hevc_hrd_parameters(&mut r, false, 0).expect_err("cpb_cnt_minus1=40 应失败");
        assert!(
            matches!(err, XiError::Syntax { ref field, .. } if field == "cpb_cnt_minus1"),
            "实际: {err:?}"
        );
    }
}
