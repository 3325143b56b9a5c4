//! 语法解析器分派表.
//!
//! 以 `(Codec, 单元类型范围)` 查找解析函数. 新增码流类型只需追加表项.

use xi_core::{BitReader, XiError, XiResult};

use crate::avc::{self, Pps, SeiPayload, SliceHeader, Sps};
use crate::codec::Codec;
use crate::context::ParserContext;
use crate::hevc::{self, HevcPps, HevcSeiPayload, HevcSliceHeader, HevcSps, HevcVps};
use crate::mpeg2::{
    self, GopHeader, Mpeg2Extension, Mpeg2SliceHeader, PictureHeader, SequenceHeader,
};
use crate::unit::UnitHeader;

/// 解析函数类型: 读取器位于单元头之后
pub type ParseFn = fn(&mut BitReader, &ParserContext, &UnitHeader) -> XiResult<ParsedRecord>;

/// 分派表条目
pub struct ParserEntry {
    pub codec: Codec,
    /// 单元类型范围 (含两端)
    pub first_type: u8,
    pub last_type: u8,
    /// 解析器名称
    pub name: &'static str,
    pub parse: ParseFn,
}

impl ParserEntry {
    fn matches(&self, codec: Codec, unit_type: u8) -> bool {
        self.codec == codec && (self.first_type..=self.last_type).contains(&unit_type)
    }
}

/// 单元解析得到的类型化记录
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRecord {
    AvcSps(Sps),
    AvcPps(Pps),
    AvcSlice(SliceHeader),
    AvcSei(Vec<SeiPayload>),
    /// primary_pic_type
    AvcAud(u8),
    HevcVps(HevcVps),
    HevcSps(HevcSps),
    HevcPps(HevcPps),
    HevcSlice(HevcSliceHeader),
    HevcSei(Vec<HevcSeiPayload>),
    /// pic_type
    HevcAud(u8),
    Mpeg2Sequence(SequenceHeader),
    Mpeg2Extension(Mpeg2Extension),
    Mpeg2Gop(GopHeader),
    Mpeg2Picture(PictureHeader),
    Mpeg2Slice(Mpeg2SliceHeader),
    /// user_data 字节数
    Mpeg2UserData(usize),
    /// 只有单元头的单元 (序列结束、填充数据等)
    Empty,
}

impl ParsedRecord {
    /// 是否开始一幅新图像
    pub fn starts_picture(&self) -> bool {
        match self {
            Self::AvcSlice(slice) => slice.starts_picture(),
            Self::HevcSlice(slice) => slice.first_slice_segment_in_pic_flag,
            Self::Mpeg2Picture(_) => true,
            _ => false,
        }
    }

    /// 一行摘要, 用于列表显示
    pub fn summary(&self) -> String {
        match self {
            Self::AvcSps(sps) => format!(
                "id={} {} {}x{}",
                sps.sps_id,
                sps.profile_level(),
                sps.width,
                sps.height
            ),
            Self::AvcPps(pps) => format!("id={} sps={}", pps.pps_id, pps.sps_id),
            Self::AvcSlice(slice) => format!(
                "{} frame_num={} qp={}",
                slice.slice_type.name(),
                slice.frame_num,
                slice.slice_qp
            ),
            Self::AvcSei(payloads) => sei_summary(payloads.iter().map(|p| p.payload_type)),
            Self::AvcAud(t) | Self::HevcAud(t) => format!("pic_type={t}"),
            Self::HevcVps(vps) => format!("id={}", vps.vps_id),
            Self::HevcSps(sps) => format!(
                "id={} {} {}x{}",
                sps.sps_id,
                sps.ptl.describe(),
                sps.width,
                sps.height
            ),
            Self::HevcPps(pps) => format!("id={} sps={}", pps.pps_id, pps.sps_id),
            Self::HevcSlice(slice) => match (slice.slice_type, slice.slice_qp) {
                (Some(t), Some(qp)) => format!("{} addr={} qp={qp}", t.name(), slice.slice_segment_address),
                _ => format!("dependent addr={}", slice.slice_segment_address),
            },
            Self::HevcSei(payloads) => sei_summary(payloads.iter().map(|p| p.payload_type)),
            Self::Mpeg2Sequence(seq) => format!(
                "{}x{} frame_rate_code={}",
                seq.horizontal_size_value, seq.vertical_size_value, seq.frame_rate_code
            ),
            Self::Mpeg2Extension(ext) => match ext {
                Mpeg2Extension::Sequence(e) => e.profile_level(),
                Mpeg2Extension::SequenceDisplay(_) => "sequence_display".to_string(),
                Mpeg2Extension::QuantMatrix => "quant_matrix".to_string(),
                Mpeg2Extension::PictureCoding(e) => format!("picture_structure={}", e.picture_structure),
                Mpeg2Extension::Other(id) => format!("id={id}"),
            },
            Self::Mpeg2Gop(gop) => {
                let (h, m, s, p) = gop.time_code;
                format!("{h:02}:{m:02}:{s:02}:{p:02}")
            }
            Self::Mpeg2Picture(pic) => format!(
                "{} temporal_reference={}",
                pic.picture_coding_type.name(),
                pic.temporal_reference
            ),
            Self::Mpeg2Slice(slice) => format!(
                "row={} qscale={}",
                slice.vertical_position, slice.quantiser_scale_code
            ),
            Self::Mpeg2UserData(len) => format!("{len} bytes"),
            Self::Empty => String::new(),
        }
    }
}

fn sei_summary(types: impl Iterator<Item = u32>) -> String {
    let list: Vec<String> = types.map(|t| t.to_string()).collect();
    format!("payloadType=[{}]", list.join(", "))
}

/// 查找解析器
pub fn lookup(codec: Codec, unit_type: u8) -> Option<&'static ParserEntry> {
    PARSERS.iter().find(|e| e.matches(codec, unit_type))
}

/// 某一码流类型的全部解析器
pub fn entries(codec: Codec) -> impl Iterator<Item = &'static ParserEntry> {
    PARSERS.iter().filter(move |e| e.codec == codec)
}

static PARSERS: &[ParserEntry] = &[
    // H.264
    entry(Codec::Avc, 1, 1, "slice_layer_without_partitioning", avc_slice),
    entry(Codec::Avc, 5, 5, "slice_layer_without_partitioning (IDR)", avc_slice),
    entry(Codec::Avc, 6, 6, "sei_rbsp", avc_sei),
    entry(Codec::Avc, 7, 7, "seq_parameter_set_rbsp", avc_sps),
    entry(Codec::Avc, 8, 8, "pic_parameter_set_rbsp", avc_pps),
    entry(Codec::Avc, 9, 9, "access_unit_delimiter_rbsp", avc_aud),
    entry(Codec::Avc, 10, 12, "end_of_seq / end_of_stream / filler_data", header_only),
    // H.265
    entry(Codec::Hevc, 0, 9, "slice_segment_layer_rbsp", hevc_slice),
    entry(Codec::Hevc, 16, 21, "slice_segment_layer_rbsp (IRAP)", hevc_slice),
    entry(Codec::Hevc, 32, 32, "video_parameter_set_rbsp", hevc_vps),
    entry(Codec::Hevc, 33, 33, "seq_parameter_set_rbsp", hevc_sps),
    entry(Codec::Hevc, 34, 34, "pic_parameter_set_rbsp", hevc_pps),
    entry(Codec::Hevc, 35, 35, "access_unit_delimiter_rbsp", hevc_aud),
    entry(Codec::Hevc, 36, 38, "end_of_seq / end_of_bitstream / filler_data", header_only),
    entry(Codec::Hevc, 39, 40, "sei_rbsp", hevc_sei),
    // MPEG-2
    entry(Codec::Mpeg2, mpeg2::PICTURE_START_CODE, mpeg2::PICTURE_START_CODE, "picture_header", mpeg2_picture),
    entry(Codec::Mpeg2, mpeg2::SLICE_START_CODE_MIN, mpeg2::SLICE_START_CODE_MAX, "slice", mpeg2_slice),
    entry(Codec::Mpeg2, mpeg2::USER_DATA_START_CODE, mpeg2::USER_DATA_START_CODE, "user_data", mpeg2_user_data),
    entry(Codec::Mpeg2, mpeg2::SEQUENCE_HEADER_CODE, mpeg2::SEQUENCE_HEADER_CODE, "sequence_header", mpeg2_sequence),
    entry(Codec::Mpeg2, mpeg2::SEQUENCE_ERROR_CODE, mpeg2::SEQUENCE_ERROR_CODE, "sequence_error", header_only),
    entry(Codec::Mpeg2, mpeg2::EXTENSION_START_CODE, mpeg2::EXTENSION_START_CODE, "extension_data", mpeg2_extension),
    entry(Codec::Mpeg2, mpeg2::SEQUENCE_END_CODE, mpeg2::SEQUENCE_END_CODE, "sequence_end", header_only),
    entry(Codec::Mpeg2, mpeg2::GROUP_START_CODE, mpeg2::GROUP_START_CODE, "group_of_pictures_header", mpeg2_gop),
];

const fn entry(
    codec: Codec,
    first_type: u8,
    last_type: u8,
    name: &'static str,
    parse: ParseFn,
) -> ParserEntry {
    ParserEntry {
        codec,
        first_type,
        last_type,
        name,
        parse,
    }
}

fn header_only(_: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    Ok(ParsedRecord::Empty)
}

fn header_mismatch(codec: Codec) -> XiError {
    XiError::InvalidArgument(format!("单元头与码流类型 {} 不匹配", codec))
}

fn avc_sps(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    avc::parse_sps(r).map(ParsedRecord::AvcSps)
}

fn avc_pps(r: &mut BitReader, ctx: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    avc::parse_pps(r, &ctx.avc).map(ParsedRecord::AvcPps)
}

fn avc_slice(r: &mut BitReader, ctx: &ParserContext, header: &UnitHeader) -> XiResult<ParsedRecord> {
    let UnitHeader::Avc(nal) = header else {
        return Err(header_mismatch(Codec::Avc));
    };
    avc::parse_slice_header(r, &ctx.avc, nal).map(ParsedRecord::AvcSlice)
}

fn avc_sei(r: &mut BitReader, ctx: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    avc::parse_sei_rbsp(r, &ctx.avc).map(ParsedRecord::AvcSei)
}

fn avc_aud(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    avc::parse_aud(r).map(ParsedRecord::AvcAud)
}

fn hevc_vps(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    hevc::parse_hevc_vps(r).map(ParsedRecord::HevcVps)
}

fn hevc_sps(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    hevc::parse_hevc_sps(r).map(ParsedRecord::HevcSps)
}

fn hevc_pps(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    hevc::parse_hevc_pps(r).map(ParsedRecord::HevcPps)
}

fn hevc_slice(r: &mut BitReader, ctx: &ParserContext, header: &UnitHeader) -> XiResult<ParsedRecord> {
    let UnitHeader::Hevc(nal) = header else {
        return Err(header_mismatch(Codec::Hevc));
    };
    hevc::parse_hevc_slice_header(r, &ctx.hevc, nal).map(ParsedRecord::HevcSlice)
}

fn hevc_sei(r: &mut BitReader, _: &ParserContext, header: &UnitHeader) -> XiResult<ParsedRecord> {
    let UnitHeader::Hevc(nal) = header else {
        return Err(header_mismatch(Codec::Hevc));
    };
    let suffix = nal.nal_type == hevc::HevcNalUnitType::SuffixSei;
    hevc::parse_hevc_sei_rbsp(r, suffix).map(ParsedRecord::HevcSei)
}

fn hevc_aud(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    hevc::parse_aud(r).map(ParsedRecord::HevcAud)
}

fn mpeg2_sequence(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    mpeg2::sequence::parse_sequence_header(r).map(ParsedRecord::Mpeg2Sequence)
}

fn mpeg2_extension(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    mpeg2::parse_extension(r).map(ParsedRecord::Mpeg2Extension)
}

fn mpeg2_gop(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    mpeg2::picture::parse_gop_header(r).map(ParsedRecord::Mpeg2Gop)
}

fn mpeg2_picture(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    mpeg2::picture::parse_picture_header(r).map(ParsedRecord::Mpeg2Picture)
}

fn mpeg2_slice(r: &mut BitReader, ctx: &ParserContext, header: &UnitHeader) -> XiResult<ParsedRecord> {
    let UnitHeader::Mpeg2 { start_code } = header else {
        return Err(header_mismatch(Codec::Mpeg2));
    };
    let (_, vertical_size) = ctx.mpeg2.frame_size().ok_or_else(|| {
        XiError::syntax("slice_start_code", "MPEG-2: slice 之前没有序列头")
    })?;
    mpeg2::picture::parse_slice_header(r, *start_code, vertical_size).map(ParsedRecord::Mpeg2Slice)
}

fn mpeg2_user_data(r: &mut BitReader, _: &ParserContext, _: &UnitHeader) -> XiResult<ParsedRecord> {
    mpeg2::parse_user_data(r).map(ParsedRecord::Mpeg2UserData)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_codec_and_type() {
        assert_eq!(lookup(Codec::Avc, 7).map(|e| e.name), Some("seq_parameter_set_rbsp"));
        assert_eq!(lookup(Codec::Hevc, 19).map(|e| e.name), Some("slice_segment_layer_rbsp (IRAP)"));
        assert_eq!(lookup(Codec::Mpeg2, 0x42).map(|e| e.name), Some("slice"));
        // 同一类型值在不同码流中含义不同
        assert_eq!(lookup(Codec::Hevc, 7).map(|e| e.name), Some("slice_segment_layer_rbsp"));
        assert!(lookup(Codec::Avc, 20).is_none());
        assert!(lookup(Codec::Hevc, 48).is_none());
        assert!(lookup(Codec::Mpeg2, 0xB0).is_none());
    }

    #[test]
    fn test_entries_do_not_overlap() {
        for codec in [Codec::Avc, Codec::Hevc, Codec::Mpeg2] {
            for t in 0..=255u8 {
                let hits = entries(codec).filter(|e| e.matches(codec, t)).count();
                assert!(hits <= 1, "{codec} 类型 {t} 命中 {hits} 个解析器");
            }
        }
    }

    #[test]
    fn test_starts_picture() {
        let pic = ParsedRecord::Mpeg2Picture(PictureHeader {
            temporal_reference: 0,
            picture_coding_type: mpeg2::PictureCodingType::I,
            vbv_delay: 0xFFFF,
        });
        assert!(pic.starts_picture());
        assert!(!ParsedRecord::Empty.starts_picture());
        assert!(!ParsedRecord::AvcAud(0).starts_picture());
    }
}
