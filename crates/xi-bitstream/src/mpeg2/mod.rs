//! MPEG-2 视频 (H.262) 语法解析.
//!
//! MPEG-2 同样以 `00 00 01` 起始码分隔语法单元, 但没有 emulation prevention,
//! 单元负载原样解析. 单元的第一个字节是起始码值, 决定后续语法结构.

use xi_core::{BitReader, FieldValue, Rational, XiResult};

pub mod picture;
pub mod sequence;

pub use picture::{
    GopHeader, Mpeg2SliceHeader, PictureCodingExtension, PictureCodingType, PictureHeader,
};
pub use sequence::{SequenceDisplayExtension, SequenceExtension, SequenceHeader};

pub const PICTURE_START_CODE: u8 = 0x00;
pub const SLICE_START_CODE_MIN: u8 = 0x01;
pub const SLICE_START_CODE_MAX: u8 = 0xAF;
pub const USER_DATA_START_CODE: u8 = 0xB2;
pub const SEQUENCE_HEADER_CODE: u8 = 0xB3;
pub const SEQUENCE_ERROR_CODE: u8 = 0xB4;
pub const EXTENSION_START_CODE: u8 = 0xB5;
pub const SEQUENCE_END_CODE: u8 = 0xB7;
pub const GROUP_START_CODE: u8 = 0xB8;

/// 起始码值的名称 (表 6-1)
pub fn start_code_name(code: u8) -> &'static str {
    match code {
        PICTURE_START_CODE => "picture_start_code",
        SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX => "slice_start_code",
        USER_DATA_START_CODE => "user_data_start_code",
        SEQUENCE_HEADER_CODE => "sequence_header_code",
        SEQUENCE_ERROR_CODE => "sequence_error_code",
        EXTENSION_START_CODE => "extension_start_code",
        SEQUENCE_END_CODE => "sequence_end_code",
        GROUP_START_CODE => "group_start_code",
        0xB9..=0xFF => "system_start_code",
        _ => "reserved",
    }
}

/// 已解析的扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mpeg2Extension {
    Sequence(SequenceExtension),
    SequenceDisplay(SequenceDisplayExtension),
    QuantMatrix,
    PictureCoding(PictureCodingExtension),
    /// 未展开的扩展, 保留 extension_start_code_identifier
    Other(u8),
}

/// extension_start_code_identifier 名称 (表 6-2)
fn extension_name(id: u8) -> &'static str {
    match id {
        1 => "Sequence Extension",
        2 => "Sequence Display Extension",
        3 => "Quant Matrix Extension",
        4 => "Copyright Extension",
        5 => "Sequence Scalable Extension",
        7 => "Picture Display Extension",
        8 => "Picture Coding Extension",
        9 => "Picture Spatial Scalable Extension",
        10 => "Picture Temporal Scalable Extension",
        _ => "reserved",
    }
}

/// 跨单元的 MPEG-2 解析状态
#[derive(Debug, Clone, Default)]
pub struct Mpeg2State {
    pub sequence: Option<SequenceHeader>,
    pub sequence_extension: Option<SequenceExtension>,
}

impl Mpeg2State {
    /// 图像宽高 (含 sequence_extension 的高位)
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        let seq = self.sequence.as_ref()?;
        let (h_ext, v_ext) = self
            .sequence_extension
            .as_ref()
            .map_or((0, 0), |e| (e.horizontal_size_extension, e.vertical_size_extension));
        Some((
            seq.horizontal_size_value | (u32::from(h_ext) << 12),
            seq.vertical_size_value | (u32::from(v_ext) << 12),
        ))
    }

    /// frame_rate = frame_rate_value * (n + 1) / (d + 1)
    pub fn frame_rate(&self) -> Option<Rational> {
        let base = self.sequence.as_ref()?.frame_rate()?;
        let Some(ext) = &self.sequence_extension else {
            return Some(base);
        };
        let num = base.num * (u32::from(ext.frame_rate_extension_n) + 1);
        let den = base.den * (u32::from(ext.frame_rate_extension_d) + 1);
        Some(Rational::new(num, den).reduce())
    }

    /// 码率 (bit/s), 单位 400 bit/s
    pub fn bit_rate(&self) -> Option<u64> {
        let seq = self.sequence.as_ref()?;
        let ext = self.sequence_extension.as_ref().map_or(0, |e| e.bit_rate_extension);
        Some((u64::from(seq.bit_rate_value) | (u64::from(ext) << 18)) * 400)
    }
}

/// 解析 extension_data 中的一个扩展 (extension_start_code 之后)
pub fn parse_extension(r: &mut BitReader) -> XiResult<Mpeg2Extension> {
    let id = r.u("extension_start_code_identifier", 4)? as u8;
    r.annotate(extension_name(id));
    let ext = match id {
        1 => Mpeg2Extension::Sequence(sequence::parse_sequence_extension(r)?),
        2 => Mpeg2Extension::SequenceDisplay(sequence::parse_sequence_display_extension(r)?),
        3 => {
            sequence::parse_quant_matrix_extension(r)?;
            Mpeg2Extension::QuantMatrix
        }
        8 => Mpeg2Extension::PictureCoding(picture::parse_picture_coding_extension(r)?),
        other => Mpeg2Extension::Other(other),
    };
    Ok(ext)
}

/// 解析 user_data(), 返回数据长度
///
/// 内容为可打印 ASCII 时附加文本预览.
pub fn parse_user_data(r: &mut BitReader) -> XiResult<usize> {
    r.enter("user_data()");
    let all = r.read_bytes(r.bits_left() / 8)?;
    // 尾部 0 字节不属于 user_data
    let len = all.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let bytes = &all[..len];
    let printable = bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ');
    let preview = if printable && !bytes.is_empty() {
        let text: String = bytes.iter().take(32).map(|&b| char::from(b)).collect();
        Some(text)
    } else {
        None
    };
    r.derive("user_data_length", FieldValue::Unsigned(len as u64));
    if let Some(text) = preview {
        r.annotate(&format!("\"{text}\""));
    }
    r.exit();
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpeg2::sequence::test_support::{write_sequence_extension, write_sequence_header};
    use crate::syntax::SyntaxTreeBuilder;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_state_frame_rate_and_bit_rate() {
        let mut bw = BitWriter::new();
        write_sequence_header(&mut bw);
        let data = bw.finish();
        let mut state = Mpeg2State {
            sequence: Some(sequence::parse_sequence_header(&mut BitReader::new(&data)).unwrap()),
            sequence_extension: None,
        };
        assert_eq!(state.frame_size(), Some((720, 576)));
        assert_eq!(state.frame_rate(), Some(Rational::new(25, 1)));
        assert_eq!(state.bit_rate(), Some(15000 * 400));

        let mut bw = BitWriter::new();
        write_sequence_extension(&mut bw);
        let data = bw.finish();
        match parse_extension(&mut BitReader::new(&data)).unwrap() {
            Mpeg2Extension::Sequence(ext) => state.sequence_extension = Some(ext),
            other => panic!("应为 sequence_extension, 实际: {other:?}"),
        }
        assert_eq!(state.frame_rate(), Some(Rational::new(25, 1)));
    }

    #[test]
    fn test_unknown_extension_kept_as_other() {
        let data = [0x40, 0x00];
        let ext = parse_extension(&mut BitReader::new(&data)).unwrap();
        assert_eq!(ext, Mpeg2Extension::Other(4));
    }

    #[test]
    fn test_user_data_preview() {
        let data = b"GA94 cc";
        let mut builder = SyntaxTreeBuilder::new("user_data");
        {
            let mut r = BitReader::with_trace(data, &mut builder);
            assert_eq!(parse_user_data(&mut r).unwrap(), 7);
        }
        let root = builder.finish();
        let node = root.find("user_data_length").expect("应有长度节点");
        assert_eq!(node.annotation.as_deref(), Some("\"GA94 cc\""));
    }

    #[test]
    fn test_start_code_names() {
        assert_eq!(start_code_name(0xB3), "sequence_header_code");
        assert_eq!(start_code_name(0x2A), "slice_start_code");
        assert_eq!(start_code_name(0xB0), "reserved");
        assert_eq!(start_code_name(0xE0), "system_start_code");
    }
}
