//! H.264 HRD (Hypothetical Reference Decoder) 参数解析 (E.1.2).
//!
//! ```text
//! hrd_parameters() {
//!     cpb_cnt_minus1                              ue(v)
//!     bit_rate_scale                              u(4)
//!     cpb_size_scale                              u(4)
//!     for (SchedSelIdx = 0; SchedSelIdx <= cpb_cnt_minus1; SchedSelIdx++) {
//!         bit_rate_value_minus1[SchedSelIdx]      ue(v)
//!         cpb_size_value_minus1[SchedSelIdx]      ue(v)
//!         cbr_flag[SchedSelIdx]                   u(1)
//!     }
//!     initial_cpb_removal_delay_length_minus1     u(5)
//!     cpb_removal_delay_length_minus1             u(5)
//!     dpb_output_delay_length_minus1              u(5)
//!     time_offset_length                          u(5)
//! }
//! ```

use serde::Serialize;
use xi_core::{BitReader, FieldValue, XiResult};

/// cpb_cnt_minus1 的上限 (E.2.2)
pub const MAX_CPB_CNT_MINUS1: u32 = 31;

/// HRD 参数
///
/// 三个按 SchedSelIdx 索引的序列长度恒为 `cpb_cnt_minus1 + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HrdParameters {
    pub cpb_cnt_minus1: u32,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub bit_rate_value_minus1: Vec<u32>,
    pub cpb_size_value_minus1: Vec<u32>,
    pub cbr_flag: Vec<bool>,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

impl Default for HrdParameters {
    /// 未出现时的推断值: initial_cpb_removal_delay_length_minus1 = 23,
    /// time_offset_length = 24
    fn default() -> Self {
        Self {
            cpb_cnt_minus1: 0,
            bit_rate_scale: 0,
            cpb_size_scale: 0,
            bit_rate_value_minus1: Vec::new(),
            cpb_size_value_minus1: Vec::new(),
            cbr_flag: Vec::new(),
            initial_cpb_removal_delay_length_minus1: 23,
            cpb_removal_delay_length_minus1: 0,
            dpb_output_delay_length_minus1: 0,
            time_offset_length: 24,
        }
    }
}

impl HrdParameters {
    /// CPB 规格个数 (cpb_cnt_minus1 + 1)
    pub fn cpb_count(&self) -> usize {
        self.cpb_cnt_minus1 as usize + 1
    }

    /// BitRate[i] = (bit_rate_value_minus1[i] + 1) * 2^(6 + bit_rate_scale), 单位 bit/s
    pub fn bit_rate(&self, idx: usize) -> Option<u64> {
        let v = *self.bit_rate_value_minus1.get(idx)?;
        Some((u64::from(v) + 1) << (6 + u32::from(self.bit_rate_scale)))
    }

    /// CpbSize[i] = (cpb_size_value_minus1[i] + 1) * 2^(4 + cpb_size_scale), 单位 bit
    pub fn cpb_size(&self, idx: usize) -> Option<u64> {
        let v = *self.cpb_size_value_minus1.get(idx)?;
        Some((u64::from(v) + 1) << (4 + u32::from(self.cpb_size_scale)))
    }
}

/// 解析 hrd_parameters()
///
/// cpb_cnt_minus1 超过 31, 或声明的条目数显然超出剩余数据时返回语法错误,
/// 不会尝试读取越界的数组.
pub fn parse_hrd_parameters(r: &mut BitReader) -> XiResult<HrdParameters> {
    r.enter("hrd_parameters()");
    let mut hrd = HrdParameters {
        cpb_cnt_minus1: r.ue("cpb_cnt_minus1")?,
        ..HrdParameters::default()
    };
    r.check_range(
        "cpb_cnt_minus1",
        i64::from(hrd.cpb_cnt_minus1),
        0,
        i64::from(MAX_CPB_CNT_MINUS1),
    )?;
    hrd.bit_rate_scale = r.u("bit_rate_scale", 4)? as u8;
    hrd.cpb_size_scale = r.u("cpb_size_scale", 4)? as u8;

    let count = hrd.cpb_count();
    // 每个条目至少 3 位: 两个 ue(v) 各 1 位 + cbr_flag
    r.ensure_bits_for("cpb_cnt_minus1", count, 3)?;
    hrd.bit_rate_value_minus1.reserve(count);
    hrd.cpb_size_value_minus1.reserve(count);
    hrd.cbr_flag.reserve(count);

    for i in 0..count {
        let bit_rate_value_minus1 = r.ue(&format!("bit_rate_value_minus1[{i}]"))?;
        let cpb_size_value_minus1 = r.ue(&format!("cpb_size_value_minus1[{i}]"))?;
        let cbr_flag = r.flag(&format!("cbr_flag[{i}]"))?;
        hrd.bit_rate_value_minus1.push(bit_rate_value_minus1);
        hrd.cpb_size_value_minus1.push(cpb_size_value_minus1);
        hrd.cbr_flag.push(cbr_flag);
        if r.is_tracing() {
            if let Some(rate) = hrd.bit_rate(i) {
                r.derive(&format!("BitRate[{i}]"), FieldValue::Unsigned(rate));
            }
            if let Some(size) = hrd.cpb_size(i) {
                r.derive(&format!("CpbSize[{i}]"), FieldValue::Unsigned(size));
            }
        }
    }

    hrd.initial_cpb_removal_delay_length_minus1 =
        r.u("initial_cpb_removal_delay_length_minus1", 5)? as u8;
    hrd.cpb_removal_delay_length_minus1 = r.u("cpb_removal_delay_length_minus1", 5)? as u8;
    hrd.dpb_output_delay_length_minus1 = r.u("dpb_output_delay_length_minus1", 5)? as u8;
    hrd.time_offset_length = r.u("time_offset_length", 5)? as u8;
    r.exit();

    Ok(hrd)
}

#[cfg(test)]
pub(crate) fn write_hrd(bw: &mut xi_core::bitwriter::BitWriter, hrd: &HrdParameters) {
    bw.write_ue(hrd.cpb_cnt_minus1);
    bw.write_bits(u32::from(hrd.bit_rate_scale), 4);
    bw.write_bits(u32::from(hrd.cpb_size_scale), 4);
    for i in 0..hrd.bit_rate_value_minus1.len() {
        bw.write_ue(hrd.bit_rate_value_minus1[i]);
        bw.write_ue(hrd.cpb_size_value_minus1[i]);
        bw.write_flag(hrd.cbr_flag[i]);
    }
    bw.write_bits(u32::from(hrd.initial_cpb_removal_delay_length_minus1), 5);
    bw.write_bits(u32::from(hrd.cpb_removal_delay_length_minus1), 5);
    bw.write_bits(u32::from(hrd.dpb_output_delay_length_minus1), 5);
    bw.write_bits(u32::from(hrd.time_offset_length), 5);
}
