//! H.264 量化矩阵 (scaling_list) 解析, SPS 与 PPS 共用 (7.3.2.1.1.1).

use xi_core::{BitReader, XiResult};

const DEFAULT_SCALING_4X4_INTRA: [u8; 16] = [
    6, 13, 20, 28, 13, 20, 28, 32, 20, 28, 32, 37, 28, 32, 37, 42,
];

const DEFAULT_SCALING_4X4_INTER: [u8; 16] = [
    10, 14, 20, 24, 14, 20, 24, 27, 20, 24, 27, 30, 24, 27, 30, 34,
];

const DEFAULT_SCALING_8X8_INTRA: [u8; 64] = [
    6, 10, 13, 16, 18, 23, 25, 27, 10, 11, 16, 18, 23, 25, 27, 29, 13, 16, 18, 23, 25, 27, 29, 31,
    16, 18, 23, 25, 27, 29, 31, 33, 18, 23, 25, 27, 29, 31, 33, 36, 23, 25, 27, 29, 31, 33, 36, 38,
    25, 27, 29, 31, 33, 36, 38, 40, 27, 29, 31, 33, 36, 38, 40, 42,
];

const DEFAULT_SCALING_8X8_INTER: [u8; 64] = [
    9, 13, 15, 17, 19, 21, 22, 24, 13, 13, 17, 19, 21, 22, 24, 25, 15, 17, 19, 21, 22, 24, 25, 27,
    17, 19, 21, 22, 24, 25, 27, 28, 19, 21, 22, 24, 25, 27, 28, 30, 21, 22, 24, 25, 27, 28, 30, 32,
    22, 24, 25, 27, 28, 30, 32, 33, 24, 25, 27, 28, 30, 32, 33, 35,
];

/// 一组完整的量化矩阵 (6 个 4x4, 2 或 6 个 8x8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingMatrices {
    pub lists_4x4: [[u8; 16]; 6],
    pub lists_8x8: Vec<[u8; 64]>,
}

impl ScalingMatrices {
    /// Default_4x4 / Default_8x8 组成的矩阵
    pub fn default_for(chroma_format_idc: u32) -> Self {
        let count_8x8 = if chroma_format_idc == 3 { 6 } else { 2 };
        Self {
            lists_4x4: [
                DEFAULT_SCALING_4X4_INTRA,
                DEFAULT_SCALING_4X4_INTRA,
                DEFAULT_SCALING_4X4_INTRA,
                DEFAULT_SCALING_4X4_INTER,
                DEFAULT_SCALING_4X4_INTER,
                DEFAULT_SCALING_4X4_INTER,
            ],
            lists_8x8: (0..count_8x8).map(default_8x8).collect(),
        }
    }

    /// 全 16 的平坦矩阵 (未传输量化矩阵时使用)
    pub fn flat(chroma_format_idc: u32) -> Self {
        let count_8x8 = if chroma_format_idc == 3 { 6 } else { 2 };
        Self {
            lists_4x4: [[16; 16]; 6],
            lists_8x8: vec![[16; 64]; count_8x8],
        }
    }
}

fn default_4x4(idx: usize) -> [u8; 16] {
    if idx < 3 {
        DEFAULT_SCALING_4X4_INTRA
    } else {
        DEFAULT_SCALING_4X4_INTER
    }
}

fn default_8x8(idx: usize) -> [u8; 64] {
    if idx % 2 == 0 {
        DEFAULT_SCALING_8X8_INTRA
    } else {
        DEFAULT_SCALING_8X8_INTER
    }
}

/// 解析 `list_count` 组 scaling_list, 未传输的列表按回退规则 A (SPS) 或 B (PPS) 填充
///
/// `fallback` 为回退规则 B 的来源 (PPS 回退到 SPS 的矩阵); 为 `None` 时使用规则 A.
pub fn parse_scaling_matrices(
    r: &mut BitReader,
    list_count: usize,
    chroma_format_idc: u32,
    fallback: Option<&ScalingMatrices>,
) -> XiResult<ScalingMatrices> {
    let mut m = ScalingMatrices::default_for(chroma_format_idc);
    for list_idx in 0..list_count {
        let present = r.flag(&format!("scaling_list_present_flag[{list_idx}]"))?;
        if !present {
            apply_absent_fallback(&mut m, list_idx, fallback);
            continue;
        }

        r.enter(&format!("scaling_list({list_idx})"));
        if list_idx < 6 {
            let mut list = [0u8; 16];
            let use_default = parse_scaling_list(r, &mut list)?;
            m.lists_4x4[list_idx] = if use_default {
                default_4x4(list_idx)
            } else {
                list
            };
        } else {
            let idx8 = list_idx - 6;
            let mut list = [0u8; 64];
            let use_default = parse_scaling_list(r, &mut list)?;
            if let Some(slot) = m.lists_8x8.get_mut(idx8) {
                *slot = if use_default { default_8x8(idx8) } else { list };
            }
        }
        r.exit();
    }
    Ok(m)
}

fn apply_absent_fallback(
    m: &mut ScalingMatrices,
    list_idx: usize,
    fallback: Option<&ScalingMatrices>,
) {
    if list_idx < 6 {
        m.lists_4x4[list_idx] = match (list_idx, fallback) {
            (0 | 3, Some(f)) => f.lists_4x4[list_idx],
            (0 | 3, None) => default_4x4(list_idx),
            _ => m.lists_4x4[list_idx - 1],
        };
        return;
    }

    let idx8 = list_idx - 6;
    if idx8 >= m.lists_8x8.len() {
        return;
    }
    m.lists_8x8[idx8] = match (idx8, fallback) {
        (0 | 1, Some(f)) => f
            .lists_8x8
            .get(idx8)
            .copied()
            .unwrap_or_else(|| default_8x8(idx8)),
        (0 | 1, None) => default_8x8(idx8),
        _ => m.lists_8x8[idx8 - 2],
    };
}

/// 解析单个 scaling_list, 返回 useDefaultScalingMatrixFlag
fn parse_scaling_list(r: &mut BitReader, list: &mut [u8]) -> XiResult<bool> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    let mut use_default = false;
    for (idx, slot) in list.iter_mut().enumerate() {
        if next_scale != 0 {
            let delta_scale = r.se("delta_scale")?;
            r.check_range("delta_scale", i64::from(delta_scale), -128, 127)?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
            if idx == 0 && next_scale == 0 {
                use_default = true;
                r.annotate("useDefaultScalingMatrixFlag");
            }
        }
        let cur_scale = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
        *slot = cur_scale as u8;
        last_scale = cur_scale;
    }
    Ok(use_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_absent_lists_follow_fallback_rule_a() {
        // 8 组全部未传输
        let mut bw = BitWriter::new();
        bw.write_bits(0, 8);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let m = parse_scaling_matrices(&mut r, 8, 1, None).unwrap();
        assert_eq!(m, ScalingMatrices::default_for(1));
    }

    #[test]
    fn test_use_default_flag_and_explicit_list() {
        let mut bw = BitWriter::new();
        // list 0: delta_scale = -8 -> next_scale 0 -> 使用默认矩阵
        bw.write_flag(true);
        bw.write_se(-8);
        // list 1: 首个 delta=8 得到 16, 随后 next_scale 归零, 其余沿用 16
        bw.write_flag(true);
        bw.write_se(8);
        bw.write_se(-16);
        for _ in 2..6 {
            bw.write_flag(false);
        }
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let m = parse_scaling_matrices(&mut r, 6, 1, None).unwrap();
        assert_eq!(m.lists_4x4[0], DEFAULT_SCALING_4X4_INTRA);
        assert_eq!(m.lists_4x4[1], [16u8; 16]);
        // list 2 回退到 list 1
        assert_eq!(m.lists_4x4[2], [16u8; 16]);
        // list 3 回退到默认 inter
        assert_eq!(m.lists_4x4[3], DEFAULT_SCALING_4X4_INTER);
    }
}
