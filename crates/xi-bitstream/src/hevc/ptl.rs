//! H.265 profile_tier_level() 解析 (7.3.3).

use xi_core::{BitReader, XiResult};

/// profile_tier_level 解析结果 (只保留 general 层与子层 level)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTierLevel {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_progressive_source_flag: bool,
    pub general_interlaced_source_flag: bool,
    pub general_level_idc: u8,
    /// 每个子层的 sub_layer_level_idc (未出现时为 None)
    pub sub_layer_level_idc: Vec<Option<u8>>,
}

impl ProfileTierLevel {
    /// 例如 "Main@3.1 (Main tier)"
    pub fn describe(&self) -> String {
        format!(
            "{}@{} ({} tier)",
            profile_name(self.general_profile_idc),
            level_name(self.general_level_idc),
            if self.general_tier_flag { "High" } else { "Main" }
        )
    }
}

/// general_profile_idc 的名称 (附录 A)
pub fn profile_name(profile_idc: u8) -> &'static str {
    match profile_idc {
        1 => "Main",
        2 => "Main 10",
        3 => "Main Still Picture",
        4 => "Format Range Extensions",
        5 => "High Throughput",
        6 => "Multiview Main",
        7 => "Scalable Main",
        8 => "3D Main",
        9 => "Screen Content Coding",
        _ => "Unknown",
    }
}

/// general_level_idc = 30 * level, 例如 93 -> "3.1"
pub fn level_name(level_idc: u8) -> String {
    format!("{}.{}", level_idc / 30, (level_idc % 30) / 3)
}

/// 解析 profile_tier_level(profilePresentFlag, maxNumSubLayersMinus1)
pub fn parse_profile_tier_level(
    r: &mut BitReader,
    profile_present: bool,
    max_sub_layers_minus1: u32,
) -> XiResult<ProfileTierLevel> {
    r.enter("profile_tier_level()");
    let mut ptl = ProfileTierLevel {
        general_profile_space: 0,
        general_tier_flag: false,
        general_profile_idc: 0,
        general_profile_compatibility_flags: 0,
        general_progressive_source_flag: false,
        general_interlaced_source_flag: false,
        general_level_idc: 0,
        sub_layer_level_idc: Vec::new(),
    };

    if profile_present {
        ptl.general_profile_space = r.u("general_profile_space", 2)? as u8;
        ptl.general_tier_flag = r.flag("general_tier_flag")?;
        ptl.general_profile_idc = r.u("general_profile_idc", 5)? as u8;
        r.annotate(profile_name(ptl.general_profile_idc));
        ptl.general_profile_compatibility_flags =
            r.u("general_profile_compatibility_flags", 32)?;
        ptl.general_progressive_source_flag = r.flag("general_progressive_source_flag")?;
        ptl.general_interlaced_source_flag = r.flag("general_interlaced_source_flag")?;
        r.flag("general_non_packed_constraint_flag")?;
        r.flag("general_frame_only_constraint_flag")?;
        // 43 位按 profile 区分的约束标志 + general_inbld_flag
        r.u64_bits("general_constraint_43bits", 43)?;
        r.flag("general_inbld_flag")?;
    }
    ptl.general_level_idc = r.u("general_level_idc", 8)? as u8;
    r.annotate(&format!("Level {}", level_name(ptl.general_level_idc)));

    let n = max_sub_layers_minus1 as usize;
    let mut profile_flags = Vec::with_capacity(n);
    let mut level_flags = Vec::with_capacity(n);
    for i in 0..n {
        profile_flags.push(r.flag(&format!("sub_layer_profile_present_flag[{i}]"))?);
        level_flags.push(r.flag(&format!("sub_layer_level_present_flag[{i}]"))?);
    }
    if n > 0 {
        for i in n..8 {
            r.u(&format!("reserved_zero_2bits[{i}]"), 2)?;
        }
    }
    for i in 0..n {
        if profile_flags[i] {
            r.enter(&format!("sub_layer_profile[{i}]"));
            r.u("sub_layer_profile_space", 2)?;
            r.flag("sub_layer_tier_flag")?;
            r.u("sub_layer_profile_idc", 5)?;
            r.u("sub_layer_profile_compatibility_flags", 32)?;
            r.u("sub_layer_source_and_constraint_flags", 4)?;
            r.u64_bits("sub_layer_constraint_43bits", 43)?;
            r.flag("sub_layer_inbld_flag")?;
            r.exit();
        }
        let level = if level_flags[i] {
            Some(r.u(&format!("sub_layer_level_idc[{i}]"), 8)? as u8)
        } else {
            None
        };
        ptl.sub_layer_level_idc.push(level);
    }
    r.exit();
    Ok(ptl)
}


#[cfg(test)]
mod tests {
    use super::test_support::write_main_ptl;
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_parse_general_ptl() {
        let mut bw = BitWriter::new();
        write_main_ptl(&mut bw, 93);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let ptl = parse_profile_tier_level(&mut r, true, 0).unwrap();
        assert_eq!(ptl.general_profile_idc, 1);
        assert_eq!(ptl.general_level_idc, 93);
        assert!(ptl.general_progressive_source_flag);
        assert_eq!(ptl.describe(), "Main@3.1 (Main tier)");
        assert_eq!(r.bits_read(), 96);
    }

    #[test]
    fn test_parse_ptl_with_sub_layers() {
        let mut bw = BitWriter::new();
        write_main_ptl(&mut bw, 120);
        // 两个子层: 第一个只有 level, 第二个都没有
        bw.write_flag(false);
        bw.write_flag(true);
        bw.write_flag(false);
        bw.write_flag(false);
        for _ in 2..8 {
            bw.write_bits(0, 2);
        }
        bw.write_bits(90, 8);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let ptl = parse_profile_tier_level(&mut r, true, 2).unwrap();
        assert_eq!(ptl.sub_layer_level_idc, vec![Some(90), None]);
        assert_eq!(level_name(ptl.general_level_idc), "4.0");
    }
}
