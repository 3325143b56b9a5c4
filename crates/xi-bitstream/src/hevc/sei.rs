//! H.265 SEI 解析 (7.3.5, 附录 D).
//!
//! sei_message 的外层结构与 H.264 相同, 负载边界处理共用 AVC 的实现.
//! 这里只展开与时序和 HDR 相关的几类负载, 其余类型记录类型与长度后跳过.

use xi_core::{BitReader, XiResult};

use crate::avc::sei::{
    SeiUserDataUnregistered, parse_user_data_unregistered, read_payload_header,
    with_payload_bounds,
};

pub const HEVC_SEI_USER_DATA_UNREGISTERED: u32 = 5;
pub const HEVC_SEI_RECOVERY_POINT: u32 = 6;
pub const HEVC_SEI_DECODED_PICTURE_HASH: u32 = 132;
pub const HEVC_SEI_MASTERING_DISPLAY: u32 = 137;
pub const HEVC_SEI_CONTENT_LIGHT_LEVEL: u32 = 144;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HevcSeiPayload {
    pub payload_type: u32,
    pub payload_size: usize,
    pub message: HevcSeiMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HevcSeiMessage {
    UserDataUnregistered(SeiUserDataUnregistered),
    RecoveryPoint {
        recovery_poc_cnt: i32,
        exact_match_flag: bool,
        broken_link_flag: bool,
    },
    /// hash_type: 0=MD5, 1=CRC, 2=checksum
    DecodedPictureHash { hash_type: u8 },
    MasteringDisplay(MasteringDisplayColourVolume),
    ContentLightLevel {
        max_content_light_level: u16,
        max_pic_average_light_level: u16,
    },
    Unknown,
}

/// mastering_display_colour_volume() (D.2.28)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasteringDisplayColourVolume {
    /// (x, y), 单位 0.00002
    pub display_primaries: [(u16, u16); 3],
    pub white_point: (u16, u16),
    /// 单位 0.0001 cd/m2
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

/// H.265 SEI payloadType 名称
pub fn payload_type_name(payload_type: u32, suffix: bool) -> &'static str {
    match (payload_type, suffix) {
        (0, false) => "buffering_period",
        (1, false) => "pic_timing",
        (2, false) => "pan_scan_rect",
        (3, _) => "filler_payload",
        (4, _) => "user_data_registered_itu_t_t35",
        (5, _) => "user_data_unregistered",
        (6, false) => "recovery_point",
        (45, false) => "frame_packing_arrangement",
        (47, false) => "display_orientation",
        (129, false) => "active_parameter_sets",
        (130, false) => "decoding_unit_info",
        (132, true) => "decoded_picture_hash",
        (137, false) => "mastering_display_colour_volume",
        (144, false) => "content_light_level_info",
        (147, false) => "alternative_transfer_characteristics",
        _ => "reserved_sei_message",
    }
}

/// 解析 sei_rbsp(), `suffix` 表示 SUFFIX_SEI_NUT
pub fn parse_hevc_sei_rbsp(r: &mut BitReader, suffix: bool) -> XiResult<Vec<HevcSeiPayload>> {
    r.enter("sei_rbsp()");
    let mut payloads = Vec::new();
    while r.more_rbsp_data() {
        r.enter("sei_message()");
        let (payload_type, payload_size) = read_payload_header(r)?;
        r.annotate(payload_type_name(payload_type, suffix));
        let message = with_payload_bounds(r, payload_size, |r| {
            parse_payload(r, payload_type, payload_size, suffix)
        })?;
        r.exit();
        payloads.push(HevcSeiPayload {
            payload_type,
            payload_size,
            message,
        });
    }
    r.exit();
    Ok(payloads)
}

fn parse_payload(
    r: &mut BitReader,
    payload_type: u32,
    payload_size: usize,
    suffix: bool,
) -> XiResult<HevcSeiMessage> {
    match (payload_type, suffix) {
        (HEVC_SEI_USER_DATA_UNREGISTERED, _) => Ok(HevcSeiMessage::UserDataUnregistered(
            parse_user_data_unregistered(r, payload_size)?,
        )),
        (HEVC_SEI_RECOVERY_POINT, false) => {
            r.enter("recovery_point()");
            let recovery_poc_cnt = r.se("recovery_poc_cnt")?;
            r.check_range("recovery_poc_cnt", i64::from(recovery_poc_cnt), -32768, 32767)?;
            let exact_match_flag = r.flag("exact_match_flag")?;
            let broken_link_flag = r.flag("broken_link_flag")?;
            r.exit();
            Ok(HevcSeiMessage::RecoveryPoint {
                recovery_poc_cnt,
                exact_match_flag,
                broken_link_flag,
            })
        }
        (HEVC_SEI_DECODED_PICTURE_HASH, true) => {
            r.enter("decoded_picture_hash()");
            let hash_type = r.u("hash_type", 8)? as u8;
            r.annotate(match hash_type {
                0 => "MD5",
                1 => "CRC",
                2 => "checksum",
                _ => "reserved",
            });
            r.exit();
            Ok(HevcSeiMessage::DecodedPictureHash { hash_type })
        }
        (HEVC_SEI_MASTERING_DISPLAY, false) => {
            Ok(HevcSeiMessage::MasteringDisplay(parse_mastering_display(r)?))
        }
        (HEVC_SEI_CONTENT_LIGHT_LEVEL, false) => {
            r.enter("content_light_level_info()");
            let max_content_light_level = r.u("max_content_light_level", 16)? as u16;
            let max_pic_average_light_level = r.u("max_pic_average_light_level", 16)? as u16;
            r.exit();
            Ok(HevcSeiMessage::ContentLightLevel {
                max_content_light_level,
                max_pic_average_light_level,
            })
        }
        _ => Ok(HevcSeiMessage::Unknown),
    }
}

fn parse_mastering_display(r: &mut BitReader) -> XiResult<MasteringDisplayColourVolume> {
    r.enter("mastering_display_colour_volume()");
    let mut display_primaries = [(0u16, 0u16); 3];
    for (c, p) in display_primaries.iter_mut().enumerate() {
        p.0 = r.u(&format!("display_primaries_x[{c}]"), 16)? as u16;
        p.1 = r.u(&format!("display_primaries_y[{c}]"), 16)? as u16;
    }
    let white_point = (
        r.u("white_point_x", 16)? as u16,
        r.u("white_point_y", 16)? as u16,
    );
    let max_display_mastering_luminance = r.u("max_display_mastering_luminance", 32)?;
    let min_display_mastering_luminance = r.u("min_display_mastering_luminance", 32)?;
    r.exit();
    Ok(MasteringDisplayColourVolume {
        display_primaries,
        white_point,
        max_display_mastering_luminance,
        min_display_mastering_luminance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xi_core::bitwriter::BitWriter;

    #[test]
    fn test_content_light_level_and_unknown() {
        let mut bw = BitWriter::new();
        bw.write_bits(144, 8);
        bw.write_bits(4, 8);
        bw.write_bits(1000, 16);
        bw.write_bits(400, 16);
        // 未知类型 200, 3 字节负载
        bw.write_bits(200, 8);
        bw.write_bits(3, 8);
        bw.write_bits(0xABCDEF, 24);
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let payloads = parse_hevc_sei_rbsp(&mut r, false).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(
            payloads[0].message,
            HevcSeiMessage::ContentLightLevel {
                max_content_light_level: 1000,
                max_pic_average_light_level: 400,
            }
        );
        assert_eq!(payloads[1].payload_type, 200);
        assert_eq!(payloads[1].message, HevcSeiMessage::Unknown);
    }

    #[test]
    fn test_recovery_point_negative_poc() {
        let mut bw = BitWriter::new();
        bw.write_bits(6, 8);
        bw.write_bits(1, 8);
        bw.write_se(-2); // 00101 -> 5 位
        bw.write_flag(true);
        bw.write_flag(false);
        bw.write_bits(0, 1); // 补齐到 1 字节
        bw.write_trailing_bits();
        let data = bw.finish();
        let mut r = BitReader::new(&data);
        let payloads = parse_hevc_sei_rbsp(&mut r, false).unwrap();
        assert_eq!(
            payloads[0].message,
            HevcSeiMessage::RecoveryPoint {
                recovery_poc_cnt: -2,
                exact_match_flag: true,
                broken_link_flag: false,
            }
        );
    }

    #[test]
    fn test_decoded_picture_hash_only_in_suffix() {
        let mut bw = BitWriter::new();
        bw.write_bits(132, 8);
        bw.write_bits(1, 8);
        bw.write_bits(1, 8);
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut r = BitReader::new(&data);
        let suffix = parse_hevc_sei_rbsp(&mut r, true).unwrap();
        assert_eq!(suffix[0].message, HevcSeiMessage::DecodedPictureHash { hash_type: 1 });

        let mut r = BitReader::new(&data);
        let prefix = parse_hevc_sei_rbsp(&mut r, false).unwrap();
        assert_eq!(prefix[0].message, HevcSeiMessage::Unknown);
    }
}
