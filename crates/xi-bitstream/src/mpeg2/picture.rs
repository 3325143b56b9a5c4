//! MPEG-2 GOP 与图像层语法 (ISO/IEC 13818-2 6.2.2.6 ~ 6.2.4).

use xi_core::{BitReader, XiResult};

use super::sequence::read_marker_bit;

/// picture_coding_type (表 6-12)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureCodingType {
    I,
    P,
    B,
    /// MPEG-1 D 图像
    D,
    Reserved(u8),
}

impl PictureCodingType {
    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::I,
            2 => Self::P,
            3 => Self::B,
            4 => Self::D,
            other => Self::Reserved(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::I => "I",
            Self::P => "P",
            Self::B => "B",
            Self::D => "D",
            Self::Reserved(_) => "保留",
        }
    }
}

/// group_of_pictures_header()
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GopHeader {
    pub drop_frame_flag: bool,
    /// (时, 分, 秒, 图像)
    pub time_code: (u8, u8, u8, u8),
    pub closed_gop: bool,
    pub broken_link: bool,
}

/// picture_header()
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureHeader {
    pub temporal_reference: u32,
    pub picture_coding_type: PictureCodingType,
    pub vbv_delay: u32,
}

/// picture_coding_extension()
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureCodingExtension {
    /// f_code[s][t]
    pub f_code: [[u8; 2]; 2],
    pub intra_dc_precision: u8,
    /// 1=顶场, 2=底场, 3=帧
    pub picture_structure: u8,
    pub top_field_first: bool,
    pub frame_pred_frame_dct: bool,
    pub q_scale_type: bool,
    pub alternate_scan: bool,
    pub repeat_first_field: bool,
    pub progressive_frame: bool,
}

/// slice() 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mpeg2SliceHeader {
    /// slice_vertical_position (含扩展位), 从 1 开始
    pub vertical_position: u32,
    pub quantiser_scale_code: u8,
    pub intra_slice: bool,
}

/// 解析 group_of_pictures_header()
pub fn parse_gop_header(r: &mut BitReader) -> XiResult<GopHeader> {
    r.enter("group_of_pictures_header()");
    r.enter("time_code");
    let drop_frame_flag = r.flag("drop_frame_flag")?;
    let hours = r.u("time_code_hours", 5)? as u8;
    r.check_range("time_code_hours", i64::from(hours), 0, 23)?;
    let minutes = r.u("time_code_minutes", 6)? as u8;
    r.check_range("time_code_minutes", i64::from(minutes), 0, 59)?;
    read_marker_bit(r)?;
    let seconds = r.u("time_code_seconds", 6)? as u8;
    r.check_range("time_code_seconds", i64::from(seconds), 0, 59)?;
    let pictures = r.u("time_code_pictures", 6)? as u8;
    r.check_range("time_code_pictures", i64::from(pictures), 0, 59)?;
    r.exit();
    r.annotate(&format!("{hours:02}:{minutes:02}:{seconds:02}:{pictures:02}"));
    let closed_gop = r.flag("closed_gop")?;
    let broken_link = r.flag("broken_link")?;
    r.exit();
    Ok(GopHeader {
        drop_frame_flag,
        time_code: (hours, minutes, seconds, pictures),
        closed_gop,
        broken_link,
    })
}

/// 解析 picture_header()
pub fn parse_picture_header(r: &mut BitReader) -> XiResult<PictureHeader> {
    r.enter("picture_header()");
    let temporal_reference = r.u("temporal_reference", 10)?;
    let code = r.u("picture_coding_type", 3)? as u8;
    let picture_coding_type = PictureCodingType::from_code(code);
    r.annotate(picture_coding_type.name());
    let vbv_delay = r.u("vbv_delay", 16)?;
    if matches!(picture_coding_type, PictureCodingType::P | PictureCodingType::B) {
        r.flag("full_pel_forward_vector")?;
        r.u("forward_f_code", 3)?;
    }
    if picture_coding_type == PictureCodingType::B {
        r.flag("full_pel_backward_vector")?;
        r.u("backward_f_code", 3)?;
    }
    read_extra_information(r, "extra_bit_picture", "extra_information_picture")?;
    r.exit();
    Ok(PictureHeader {
        temporal_reference,
        picture_coding_type,
        vbv_delay,
    })
}

/// 解析 picture_coding_extension()
pub fn parse_picture_coding_extension(r: &mut BitReader) -> XiResult<PictureCodingExtension> {
    r.enter("picture_coding_extension()");
    let mut f_code = [[0u8; 2]; 2];
    for (s, row) in f_code.iter_mut().enumerate() {
        for (t, v) in row.iter_mut().enumerate() {
            *v = r.u(&format!("f_code[{s}][{t}]"), 4)? as u8;
        }
    }
    let intra_dc_precision = r.u("intra_dc_precision", 2)? as u8;
    r.annotate(&format!("{} 位", intra_dc_precision + 8));
    let picture_structure = r.u("picture_structure", 2)? as u8;
    r.check_range("picture_structure", i64::from(picture_structure), 1, 3)?;
    r.annotate(match picture_structure {
        1 => "顶场",
        2 => "底场",
        _ => "帧",
    });
    let top_field_first = r.flag("top_field_first")?;
    let frame_pred_frame_dct = r.flag("frame_pred_frame_dct")?;
    r.flag("concealment_motion_vectors")?;
    let q_scale_type = r.flag("q_scale_type")?;
    r.flag("intra_vlc_format")?;
    let alternate_scan = r.flag("alternate_scan")?;
    let repeat_first_field = r.flag("repeat_first_field")?;
    r.flag("chroma_420_type")?;
    let progressive_frame = r.flag("progressive_frame")?;
    if r.flag("composite_display_flag")? {
        r.flag("v_axis")?;
        r.u("field_sequence", 3)?;
        r.flag("sub_carrier")?;
        r.u("burst_amplitude", 7)?;
        r.u("sub_carrier_phase", 8)?;
    }
    r.exit();
    Ok(PictureCodingExtension {
        f_code,
        intra_dc_precision,
        picture_structure,
        top_field_first,
        frame_pred_frame_dct,
        q_scale_type,
        alternate_scan,
        repeat_first_field,
        progressive_frame,
    })
}

/// 解析 slice() 头部, 宏块数据不解析
///
/// `start_code` 为 slice_start_code 的末字节 (0x01~0xAF).
pub fn parse_slice_header(
    r: &mut BitReader,
    start_code: u8,
    vertical_size: u32,
) -> XiResult<Mpeg2SliceHeader> {
    r.enter("slice()");
    let mut vertical_position = u32::from(start_code);
    if vertical_size > 2800 {
        let ext = r.u("slice_vertical_position_extension", 3)?;
        vertical_position += ext << 7;
    }
    let quantiser_scale_code = r.u("quantiser_scale_code", 5)? as u8;
    r.check_range("quantiser_scale_code", i64::from(quantiser_scale_code), 1, 31)?;
    let mut intra_slice = false;
    if r.flag("intra_slice_flag")? {
        intra_slice = r.flag("intra_slice")?;
        r.u("reserved_bits", 7)?;
        read_extra_information(r, "extra_bit_slice", "extra_information_slice")?;
    }
    r.exit();
    Ok(Mpeg2SliceHeader {
        vertical_position,
        quantiser_scale_code,
        intra_slice,
    })
}

/// extra_bit_* / extra_information_* 循环
fn read_extra_information(r: &mut BitReader, bit: &str, info: &str) -> XiResult<()> {
    let mut count = 0usize;
    while r.flag(bit)? {
        r.u(info, 8)?;
        count += 1;
    }
    if count > 0 {
        r.annotate(&format!("{count} 字节附加信息"));
    }
    Ok(())
}
