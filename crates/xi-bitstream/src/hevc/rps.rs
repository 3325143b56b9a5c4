//! H.265 short-term reference picture set (7.3.7 / 7.4.8).
//!
//! 帧间预测的 RPS 需要参考集合的完整 DeltaPoc 列表才能推导出自身的
//! NumNegativePics / NumPositivePics, 所以 SPS 中的每个集合都完整保存.

use xi_core::{BitReader, XiResult};

/// 一个 st_ref_pic_set 推导后的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortTermRps {
    /// DeltaPocS0 (递减, 全为负)
    pub delta_poc_s0: Vec<i32>,
    pub used_s0: Vec<bool>,
    /// DeltaPocS1 (递增, 全为正)
    pub delta_poc_s1: Vec<i32>,
    pub used_s1: Vec<bool>,
}

impl ShortTermRps {
    /// NumDeltaPocs
    pub fn num_delta_pocs(&self) -> usize {
        self.delta_poc_s0.len() + self.delta_poc_s1.len()
    }

    /// 当前图像实际引用的图像数
    pub fn num_used_by_curr(&self) -> usize {
        self.used_s0.iter().chain(&self.used_s1).filter(|u| **u).count()
    }
}

/// 每个方向最多 16 个参考图像
const MAX_PICS_PER_DIRECTION: i64 = 16;

/// 解析 st_ref_pic_set(stRpsIdx)
///
/// `sets` 为 SPS 中已解析的集合; slice header 中解析时 `idx == num_sets`.
pub fn parse_st_ref_pic_set(
    r: &mut BitReader,
    idx: usize,
    num_sets: usize,
    sets: &[ShortTermRps],
) -> XiResult<ShortTermRps> {
    r.enter(&format!("st_ref_pic_set({idx})"));
    let inter = if idx != 0 {
        r.flag("inter_ref_pic_set_prediction_flag")?
    } else {
        false
    };
    let rps = if inter {
        parse_predicted(r, idx, num_sets, sets)?
    } else {
        parse_explicit(r)?
    };
    r.exit();
    Ok(rps)
}

fn parse_explicit(r: &mut BitReader) -> XiResult<ShortTermRps> {
    let num_negative = r.ue("num_negative_pics")?;
    r.check_range("num_negative_pics", i64::from(num_negative), 0, MAX_PICS_PER_DIRECTION)?;
    let num_positive = r.ue("num_positive_pics")?;
    r.check_range(
        "num_positive_pics",
        i64::from(num_positive),
        0,
        MAX_PICS_PER_DIRECTION - i64::from(num_negative),
    )?;

    let mut rps = ShortTermRps::default();
    let mut poc = 0i32;
    for i in 0..num_negative {
        let minus1 = r.ue(&format!("delta_poc_s0_minus1[{i}]"))?;
        r.check_range(&format!("delta_poc_s0_minus1[{i}]"), i64::from(minus1), 0, 32767)?;
        poc -= minus1 as i32 + 1;
        rps.delta_poc_s0.push(poc);
        rps.used_s0.push(r.flag(&format!("used_by_curr_pic_s0_flag[{i}]"))?);
    }
    poc = 0;
    for i in 0..num_positive {
        let minus1 = r.ue(&format!("delta_poc_s1_minus1[{i}]"))?;
        r.check_range(&format!("delta_poc_s1_minus1[{i}]"), i64::from(minus1), 0, 32767)?;
        poc += minus1 as i32 + 1;
        rps.delta_poc_s1.push(poc);
        rps.used_s1.push(r.flag(&format!("used_by_curr_pic_s1_flag[{i}]"))?);
    }
    Ok(rps)
}

fn parse_predicted(
    r: &mut BitReader,
    idx: usize,
    num_sets: usize,
    sets: &[ShortTermRps],
) -> XiResult<ShortTermRps> {
    let mut delta_idx_minus1 = 0;
    if idx == num_sets {
        delta_idx_minus1 = r.ue("delta_idx_minus1")?;
        r.check_range(
            "delta_idx_minus1",
            i64::from(delta_idx_minus1),
            0,
            idx as i64 - 1,
        )?;
    }
    let ref_idx = idx - (delta_idx_minus1 as usize + 1);
    let delta_rps_sign = r.flag("delta_rps_sign")?;
    let abs_delta_rps_minus1 = r.ue("abs_delta_rps_minus1")?;
    r.check_range("abs_delta_rps_minus1", i64::from(abs_delta_rps_minus1), 0, 32767)?;
    let delta_rps = if delta_rps_sign { -1 } else { 1 } * (abs_delta_rps_minus1 as i32 + 1);

    let reference = sets.get(ref_idx).cloned().unwrap_or_default();
    let num_delta = reference.num_delta_pocs();
    let mut used_by_curr = Vec::with_capacity(num_delta + 1);
    let mut use_delta = Vec::with_capacity(num_delta + 1);
    for j in 0..=num_delta {
        let used = r.flag(&format!("used_by_curr_pic_flag[{j}]"))?;
        let use_it = if used {
            true
        } else {
            r.flag(&format!("use_delta_flag[{j}]"))?
        };
        used_by_curr.push(used);
        use_delta.push(use_it);
    }

    // (7-61) / (7-62)
    let num_neg = reference.delta_poc_s0.len();
    let mut rps = ShortTermRps::default();
    for j in (0..reference.delta_poc_s1.len()).rev() {
        let d = reference.delta_poc_s1[j] + delta_rps;
        if d < 0 && use_delta[num_neg + j] {
            rps.delta_poc_s0.push(d);
            rps.used_s0.push(used_by_curr[num_neg + j]);
        }
    }
    if delta_rps < 0 && use_delta[num_delta] {
        rps.delta_poc_s0.push(delta_rps);
        rps.used_s0.push(used_by_curr[num_delta]);
    }
    for j in 0..num_neg {
        let d = reference.delta_poc_s0[j] + delta_rps;
        if d < 0 && use_delta[j] {
            rps.delta_poc_s0.push(d);
            rps.used_s0.push(used_by_curr[j]);
        }
    }

    for j in (0..num_neg).rev() {
        let d = reference.delta_poc_s0[j] + delta_rps;
        if d > 0 && use_delta[j] {
            rps.delta_poc_s1.push(d);
            rps.used_s1.push(used_by_curr[j]);
        }
    }
    if delta_rps > 0 && use_delta[num_delta] {
        rps.delta_poc_s1.push(delta_rps);
        rps.used_s1.push(used_by_curr[num_delta]);
    }
    for j in 0..reference.delta_poc_s1.len() {
        let d = reference.delta_poc_s1[j] + delta_rps;
        if d > 0 && use_delta[num_neg + j] {
            rps.delta_poc_s1.push(d);
            rps.used_s1.push(used_by_curr[num_neg + j]);
        }
    }
    Ok(rps)
}

#[cfg(test)]
pub(crate) mod test_support {
    use xi_core::bitwriter::BitWriter;

    /// 写出显式 RPS: 负方向 delta 列表 (均为 -1 间隔), 全部被当前图像引用
    pub fn write_explicit_rps(bw: &mut BitWriter, num_negative: u32) {
        bw.write_ue(num_negative);
        bw.write_ue(0);
        for _ in 0..num_negative {
            bw.write_ue(0);
            bw.write_flag(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_explicit_rps;
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_explicit_rps() {
        let mut bw = BitWriter::new();
        bw.write_ue(2); // num_negative_pics
        bw.write_ue(1); // num_positive_pics
        bw.write_ue(0);
        bw.write_flag(true);
        bw.write_ue(1);
        bw.write_flag(false);
        bw.write_ue(3);
        bw.write_flag(true);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let rps = parse_st_ref_pic_set(&mut r, 0, 1, &[]).unwrap();
        assert_eq!(rps.delta_poc_s0, vec![-1, -3]);
        assert_eq!(rps.used_s0, vec![true, false]);
        assert_eq!(rps.delta_poc_s1, vec![4]);
        assert_eq!(rps.num_delta_pocs(), 3);
        assert_eq!(rps.num_used_by_curr(), 2);
    }

    #[test]
    fn test_inter_predicted_rps() {
        // 参考集合: S0 = [-1]
        let mut bw = BitWriter::new();
        write_explicit_rps(&mut bw, 1);
        // 集合 1 由集合 0 预测: deltaRps = -1
        bw.write_flag(true); // inter_ref_pic_set_prediction_flag
        bw.write_flag(true); // delta_rps_sign
        bw.write_ue(0); // abs_delta_rps_minus1
        bw.write_flag(true); // used_by_curr_pic_flag[0] (-1 + -1 = -2)
        bw.write_flag(true); // used_by_curr_pic_flag[1] (deltaRps 自身 = -1)
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let first = parse_st_ref_pic_set(&mut r, 0, 2, &[]).unwrap();
        let second = parse_st_ref_pic_set(&mut r, 1, 2, std::slice::from_ref(&first)).unwrap();
        assert_eq!(second.delta_poc_s0, vec![-1, -2]);
        assert!(second.delta_poc_s1.is_empty());
        assert_eq!(second.num_used_by_curr(), 2);
    }

    #[test]
    fn test_reject_too_many_pictures() {
        let mut bw = BitWriter::new();
        bw.write_ue(17);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        assert!(parse_st_ref_pic_set(&mut r, 0, 1, &[]).is_err());
    }
}
