//! MPEG-2 视频序列层语法 (ISO/IEC 13818-2 6.2.2).
//!
//! 包括 sequence_header() 以及依附于它的 sequence_extension(),
//! sequence_display_extension() 和 quant_matrix_extension().

use xi_core::{BitReader, Rational, XiError, XiResult};

/// frame_rate_code 对应的帧率 (表 6-4), 0 与 9~15 为保留值
const FRAME_RATES: [Option<(u32, u32)>; 16] = [
    None,
    Some((24000, 1001)),
    Some((24, 1)),
    Some((25, 1)),
    Some((30000, 1001)),
    Some((30, 1)),
    Some((50, 1)),
    Some((60000, 1001)),
    Some((60, 1)),
    None,
    None,
    None,
    None,
    None,
    None,
    None,
];

/// aspect_ratio_information 含义 (表 6-3)
pub fn aspect_ratio_name(code: u8) -> &'static str {
    match code {
        1 => "1:1 (方形像素)",
        2 => "4:3",
        3 => "16:9",
        4 => "2.21:1",
        _ => "保留",
    }
}

/// sequence_header()
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub horizontal_size_value: u32,
    pub vertical_size_value: u32,
    pub aspect_ratio_information: u8,
    pub frame_rate_code: u8,
    /// 单位 400 bit/s
    pub bit_rate_value: u32,
    pub vbv_buffer_size_value: u32,
    pub constrained_parameters_flag: bool,
    pub load_intra_quantiser_matrix: bool,
    pub load_non_intra_quantiser_matrix: bool,
}

impl SequenceHeader {
    /// frame_rate_value, 保留码时为 None
    pub fn frame_rate(&self) -> Option<Rational> {
        FRAME_RATES
            .get(usize::from(self.frame_rate_code))
            .copied()
            .flatten()
            .map(|(num, den)| Rational::new(num, den))
    }
}

/// sequence_extension() (6.2.2.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceExtension {
    pub profile_and_level_indication: u8,
    pub progressive_sequence: bool,
    /// 1=4:2:0, 2=4:2:2, 3=4:4:4
    pub chroma_format: u8,
    pub horizontal_size_extension: u8,
    pub vertical_size_extension: u8,
    pub bit_rate_extension: u32,
    pub vbv_buffer_size_extension: u8,
    pub low_delay: bool,
    pub frame_rate_extension_n: u8,
    pub frame_rate_extension_d: u8,
}

impl SequenceExtension {
    /// 例如 "Main@Main"
    pub fn profile_level(&self) -> String {
        let escape = self.profile_and_level_indication & 0x80 != 0;
        if escape {
            return format!("扩展 profile/level (0x{:02X})", self.profile_and_level_indication);
        }
        let profile = match (self.profile_and_level_indication >> 4) & 0x07 {
            1 => "High",
            2 => "Spatially Scalable",
            3 => "SNR Scalable",
            4 => "Main",
            5 => "Simple",
            _ => "Reserved",
        };
        let level = match self.profile_and_level_indication & 0x0F {
            4 => "High",
            6 => "High 1440",
            8 => "Main",
            10 => "Low",
            _ => "Reserved",
        };
        format!("{profile}@{level}")
    }
}

/// sequence_display_extension() (6.2.2.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDisplayExtension {
    pub video_format: u8,
    /// (colour_primaries, transfer_characteristics, matrix_coefficients)
    pub colour_description: Option<(u8, u8, u8)>,
    pub display_horizontal_size: u32,
    pub display_vertical_size: u32,
}

/// 解析 sequence_header() 主体 (起始码之后)
pub fn parse_sequence_header(r: &mut BitReader) -> XiResult<SequenceHeader> {
    r.enter("sequence_header()");
    let horizontal_size_value = r.u("horizontal_size_value", 12)?;
    let vertical_size_value = r.u("vertical_size_value", 12)?;
    if horizontal_size_value == 0 || vertical_size_value == 0 {
        return Err(XiError::syntax(
            "horizontal_size_value",
            format!(
                "MPEG-2: 图像尺寸非法, {}x{}",
                horizontal_size_value, vertical_size_value
            ),
        ));
    }
    let aspect_ratio_information = r.u("aspect_ratio_information", 4)? as u8;
    r.annotate(aspect_ratio_name(aspect_ratio_information));
    let frame_rate_code = r.u("frame_rate_code", 4)? as u8;
    match FRAME_RATES[usize::from(frame_rate_code)] {
        Some((num, den)) => r.annotate(&format!("{:.3} fps", f64::from(num) / f64::from(den))),
        None => r.annotate("保留"),
    }
    let bit_rate_value = r.u("bit_rate_value", 18)?;
    read_marker_bit(r)?;
    let vbv_buffer_size_value = r.u("vbv_buffer_size_value", 10)?;
    let constrained_parameters_flag = r.flag("constrained_parameters_flag")?;
    let load_intra_quantiser_matrix = r.flag("load_intra_quantiser_matrix")?;
    if load_intra_quantiser_matrix {
        read_quantiser_matrix(r, "intra_quantiser_matrix")?;
    }
    let load_non_intra_quantiser_matrix = r.flag("load_non_intra_quantiser_matrix")?;
    if load_non_intra_quantiser_matrix {
        read_quantiser_matrix(r, "non_intra_quantiser_matrix")?;
    }
    r.exit();

    Ok(SequenceHeader {
        horizontal_size_value,
        vertical_size_value,
        aspect_ratio_information,
        frame_rate_code,
        bit_rate_value,
        vbv_buffer_size_value,
        constrained_parameters_flag,
        load_intra_quantiser_matrix,
        load_non_intra_quantiser_matrix,
    })
}

/// 解析 sequence_extension() (extension_start_code_identifier 之后)
pub fn parse_sequence_extension(r: &mut BitReader) -> XiResult<SequenceExtension> {
    r.enter("sequence_extension()");
    let profile_and_level_indication = r.u("profile_and_level_indication", 8)? as u8;
    let progressive_sequence = r.flag("progressive_sequence")?;
    let chroma_format = r.u("chroma_format", 2)? as u8;
    r.check_range("chroma_format", i64::from(chroma_format), 1, 3)?;
    let horizontal_size_extension = r.u("horizontal_size_extension", 2)? as u8;
    let vertical_size_extension = r.u("vertical_size_extension", 2)? as u8;
    let bit_rate_extension = r.u("bit_rate_extension", 12)?;
    read_marker_bit(r)?;
    let vbv_buffer_size_extension = r.u("vbv_buffer_size_extension", 8)? as u8;
    let low_delay = r.flag("low_delay")?;
    let frame_rate_extension_n = r.u("frame_rate_extension_n", 2)? as u8;
    let frame_rate_extension_d = r.u("frame_rate_extension_d", 5)? as u8;
    r.exit();

    let ext = SequenceExtension {
        profile_and_level_indication,
        progressive_sequence,
        chroma_format,
        horizontal_size_extension,
        vertical_size_extension,
        bit_rate_extension,
        vbv_buffer_size_extension,
        low_delay,
        frame_rate_extension_n,
        frame_rate_extension_d,
    };
    r.annotate(&ext.profile_level());
    Ok(ext)
}

/// 解析 sequence_display_extension()
pub fn parse_sequence_display_extension(r: &mut BitReader) -> XiResult<SequenceDisplayExtension> {
    r.enter("sequence_display_extension()");
    let video_format = r.u("video_format", 3)? as u8;
    let colour_description = if r.flag("colour_description")? {
        Some((
            r.u("colour_primaries", 8)? as u8,
            r.u("transfer_characteristics", 8)? as u8,
            r.u("matrix_coefficients", 8)? as u8,
        ))
    } else {
        None
    };
    let display_horizontal_size = r.u("display_horizontal_size", 14)?;
    read_marker_bit(r)?;
    let display_vertical_size = r.u("display_vertical_size", 14)?;
    r.exit();
    Ok(SequenceDisplayExtension {
        video_format,
        colour_description,
        display_horizontal_size,
        display_vertical_size,
    })
}

/// 解析 quant_matrix_extension()
pub fn parse_quant_matrix_extension(r: &mut BitReader) -> XiResult<()> {
    r.enter("quant_matrix_extension()");
    for name in [
        "intra_quantiser_matrix",
        "non_intra_quantiser_matrix",
        "chroma_intra_quantiser_matrix",
        "chroma_non_intra_quantiser_matrix",
    ] {
        if r.flag(&format!("load_{name}"))? {
            read_quantiser_matrix(r, name)?;
        }
    }
    r.exit();
    Ok(())
}

/// 64 个 8 位系数, 按 zigzag 顺序
fn read_quantiser_matrix(r: &mut BitReader, name: &str) -> XiResult<()> {
    r.ensure_bits_for(name, 64, 8)?;
    r.enter(name);
    for i in 0..64 {
        let v = r.u(&format!("{name}[{i}]"), 8)?;
        if v == 0 {
            return Err(XiError::syntax(name, format!("MPEG-2: 量化矩阵系数不能为 0, index={i}")));
        }
    }
    r.exit();
    Ok(())
}

pub(crate) fn read_marker_bit(r: &mut BitReader) -> XiResult<()> {
    if !r.flag("marker_bit")? {
        r.annotate("marker_bit 应为 1");
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::write_sequence_header;
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_parse_sequence_header() {
        let mut bw = BitWriter::new();
        write_sequence_header(&mut bw);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let seq = parse_sequence_header(&mut r).unwrap();
        assert_eq!((seq.horizontal_size_value, seq.vertical_size_value), (720, 576));
        assert_eq!(seq.frame_rate(), Some(Rational::new(25, 1)));
        assert_eq!(aspect_ratio_name(seq.aspect_ratio_information), "4:3");
        assert_eq!(seq.bit_rate_value, 15000);
    }

    #[test]
    fn test_sequence_header_with_intra_matrix() {
        let mut bw = BitWriter::new();
        bw.write_bits(352, 12);
        bw.write_bits(288, 12);
        bw.write_bits(1, 4);
        bw.write_bits(4, 4);
        bw.write_bits(1000, 18);
        bw.write_flag(true);
        bw.write_bits(20, 10);
        bw.write_flag(false);
        bw.write_flag(true);
        for i in 0..64 {
            bw.write_bits(8 + i, 8);
        }
        bw.write_flag(false);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let seq = parse_sequence_header(&mut r).unwrap();
        assert!(seq.load_intra_quantiser_matrix);
        assert_eq!(seq.frame_rate(), Some(Rational::new(30000, 1001)));
    }

    #[test]
    fn test_reject_zero_quantiser_coefficient() {
        let mut bw = BitWriter::new();
        bw.write_flag(true);
        for _ in 0..64 {
            bw.write_bits(0, 8);
        }
        bw.write_bits(0, 7);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        assert!(parse_quant_matrix_extension(&mut r).is_err());
    }

    #[test]
    fn test_profile_level_name() {
        let mut bw = BitWriter::new();
        super::test_support::write_sequence_extension(&mut bw);
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        r.u("extension_start_code_identifier", 4).unwrap();
        let ext = parse_sequence_extension(&mut r).unwrap();
        assert_eq!(ext.profile_level(), "Main@Main");
        assert_eq!(ext.chroma_format, 1);
    }
}
