//! H.264 SEI (Supplemental Enhancement Information) 解析 (7.3.2.3, 附录 D).
//!
//! buffering_period 与 pic_timing 的字段长度来自 SPS 中的 HRD 参数,
//! 因此需要解析上下文中已激活的 SPS.

use xi_core::{BitReader, XiError, XiResult};

use super::AvcState;
use super::hrd::HrdParameters;
use super::sps::Sps;

pub const SEI_BUFFERING_PERIOD: u32 = 0;
pub const SEI_PIC_TIMING: u32 = 1;
pub const SEI_USER_DATA_UNREGISTERED: u32 = 5;
pub const SEI_RECOVERY_POINT: u32 = 6;

/// pic_struct 对应的 NumClockTS (表 D-1)
const NUM_CLOCK_TS: [u32; 9] = [1, 1, 1, 2, 2, 3, 3, 2, 3];

const PIC_STRUCT_NAMES: [&str; 9] = [
    "frame",
    "top field",
    "bottom field",
    "top field, bottom field",
    "bottom field, top field",
    "top field, bottom field, top field repeated",
    "bottom field, top field, bottom field repeated",
    "frame doubling",
    "frame tripling",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiPayload {
    pub payload_type: u32,
    pub payload_size: usize,
    pub message: SeiMessage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeiMessage {
    BufferingPeriod(SeiBufferingPeriod),
    PicTiming(SeiPicTiming),
    UserDataUnregistered(SeiUserDataUnregistered),
    RecoveryPoint(SeiRecoveryPoint),
    /// 未解析的负载 (类型不支持, 或缺少解析所需的 SPS)
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiBufferingPeriod {
    pub seq_parameter_set_id: u32,
    /// NAL HRD 的 (initial_cpb_removal_delay, initial_cpb_removal_delay_offset)
    pub nal_delays: Vec<(u32, u32)>,
    pub vcl_delays: Vec<(u32, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiPicTiming {
    pub cpb_removal_delay: Option<u32>,
    pub dpb_output_delay: Option<u32>,
    pub pic_struct: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiUserDataUnregistered {
    pub uuid_iso_iec_11578: [u8; 16],
    pub payload_len: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeiRecoveryPoint {
    pub recovery_frame_cnt: u32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
    pub changing_slice_group_idc: u8,
}

/// H.264 SEI payloadType 名称 (表 D-1 部分)
pub fn payload_type_name(payload_type: u32) -> &'static str {
    match payload_type {
        0 => "buffering_period",
        1 => "pic_timing",
        2 => "pan_scan_rect",
        3 => "filler_payload",
        4 => "user_data_registered_itu_t_t35",
        5 => "user_data_unregistered",
        6 => "recovery_point",
        7 => "dec_ref_pic_marking_repetition",
        9 => "scene_info",
        19 => "film_grain_characteristics",
        45 => "frame_packing_arrangement",
        47 => "display_orientation",
        137 => "mastering_display_colour_volume",
        144 => "content_light_level_info",
        _ => "reserved_sei_message",
    }
}

/// 解析 sei_rbsp(): 循环读取 sei_message 直到 rbsp_trailing_bits
pub fn parse_sei_rbsp(r: &mut BitReader, state: &AvcState) -> XiResult<Vec<SeiPayload>> {
    r.enter("sei_rbsp()");
    let mut payloads = Vec::new();
    while r.more_rbsp_data() {
        r.enter("sei_message()");
        let (payload_type, payload_size) = read_payload_header(r)?;
        r.annotate(payload_type_name(payload_type));
        let message = with_payload_bounds(r, payload_size, |r| {
            parse_sei_payload(r, state, payload_type, payload_size)
        })?;
        r.exit();
        payloads.push(SeiPayload {
            payload_type,
            payload_size,
            message,
        });
    }
    r.exit();
    Ok(payloads)
}

/// 读取 payloadType 与 payloadSize (0xFF 字节累加编码)
pub(crate) fn read_payload_header(r: &mut BitReader) -> XiResult<(u32, usize)> {
    let payload_type = read_ff_coded_value(r, "payload_type")?;
    let payload_size = read_ff_coded_value(r, "payload_size")? as usize;
    Ok((payload_type, payload_size))
}

fn read_ff_coded_value(r: &mut BitReader, name: &str) -> XiResult<u32> {
    let mut value = 0u32;
    loop {
        let byte = r.u(&format!("{name}_byte"), 8)?;
        value = value.checked_add(byte).ok_or_else(|| {
            XiError::syntax(name, format!("H.264: SEI {name} 溢出"))
        })?;
        if byte != 0xFF {
            break;
        }
    }
    r.annotate(&format!("{name} = {value}"));
    Ok(value)
}

/// 在 payloadSize 字节的窗口内执行负载解析, 结束后跳到负载末尾
pub(crate) fn with_payload_bounds<T>(
    r: &mut BitReader,
    payload_size: usize,
    parse: impl FnOnce(&mut BitReader) -> XiResult<T>,
) -> XiResult<T> {
    r.ensure_bits_for("payload_size", payload_size, 8)?;
    let start = r.bits_read();
    let value = parse(r)?;
    let consumed = r.bits_read() - start;
    let total = payload_size * 8;
    if consumed > total {
        return Err(XiError::syntax(
            "payload_size",
            format!(
                "SEI 负载解析越界, payload_size={}, 已读取 {} 位",
                payload_size, consumed
            ),
        ));
    }
    r.skip_bits(total - consumed)?;
    Ok(value)
}

fn parse_sei_payload(
    r: &mut BitReader,
    state: &AvcState,
    payload_type: u32,
    payload_size: usize,
) -> XiResult<SeiMessage> {
    match payload_type {
        SEI_BUFFERING_PERIOD => parse_buffering_period(r, state),
        SEI_PIC_TIMING => match state.active_sps() {
            Some(sps) => Ok(SeiMessage::PicTiming(parse_pic_timing(r, sps)?)),
            None => {
                r.annotate("缺少激活的 SPS, 跳过负载");
                Ok(SeiMessage::Unknown)
            }
        },
        SEI_USER_DATA_UNREGISTERED => {
            Ok(SeiMessage::UserDataUnregistered(parse_user_data_unregistered(
                r,
                payload_size,
            )?))
        }
        SEI_RECOVERY_POINT => Ok(SeiMessage::RecoveryPoint(parse_recovery_point(r)?)),
        _ => Ok(SeiMessage::Unknown),
    }
}

fn parse_buffering_period(r: &mut BitReader, state: &AvcState) -> XiResult<SeiMessage> {
    r.enter("buffering_period()");
    let seq_parameter_set_id = r.ue("seq_parameter_set_id")?;
    r.check_range("seq_parameter_set_id", i64::from(seq_parameter_set_id), 0, 31)?;
    let Some(sps) = state.sps.get(&seq_parameter_set_id) else {
        r.annotate("引用的 SPS 不存在, 跳过负载");
        r.exit();
        return Ok(SeiMessage::Unknown);
    };
    let vui = sps.vui.as_ref();
    let nal_delays = match vui.and_then(|v| v.nal_hrd.as_ref()) {
        Some(hrd) => read_initial_delays(r, hrd, "nal")?,
        None => Vec::new(),
    };
    let vcl_delays = match vui.and_then(|v| v.vcl_hrd.as_ref()) {
        Some(hrd) => read_initial_delays(r, hrd, "vcl")?,
        None => Vec::new(),
    };
    r.exit();
    Ok(SeiMessage::BufferingPeriod(SeiBufferingPeriod {
        seq_parameter_set_id,
        nal_delays,
        vcl_delays,
    }))
}

fn read_initial_delays(
    r: &mut BitReader,
    hrd: &HrdParameters,
    kind: &str,
) -> XiResult<Vec<(u32, u32)>> {
    let len = u32::from(hrd.initial_cpb_removal_delay_length_minus1) + 1;
    let mut delays = Vec::with_capacity(hrd.cpb_count());
    for i in 0..hrd.cpb_count() {
        let delay = r.u(&format!("{kind}_initial_cpb_removal_delay[{i}]"), len)?;
        let offset = r.u(&format!("{kind}_initial_cpb_removal_delay_offset[{i}]"), len)?;
        delays.push((delay, offset));
    }
    Ok(delays)
}

/// 解析 pic_timing()
///
/// SPS 没有 HRD 时, 长度字段使用推断值 (time_offset_length = 24).
fn parse_pic_timing(r: &mut BitReader, sps: &Sps) -> XiResult<SeiPicTiming> {
    r.enter("pic_timing()");
    let defaults = HrdParameters::default();
    let vui = sps.vui.as_ref();
    let hrd = vui.and_then(|v| v.hrd()).unwrap_or(&defaults);
    let mut timing = SeiPicTiming {
        cpb_removal_delay: None,
        dpb_output_delay: None,
        pic_struct: None,
    };

    if vui.is_some_and(|v| v.cpb_dpb_delays_present()) {
        timing.cpb_removal_delay = Some(r.u(
            "cpb_removal_delay",
            u32::from(hrd.cpb_removal_delay_length_minus1) + 1,
        )?);
        timing.dpb_output_delay = Some(r.u(
            "dpb_output_delay",
            u32::from(hrd.dpb_output_delay_length_minus1) + 1,
        )?);
    }

    if vui.is_some_and(|v| v.pic_struct_present_flag) {
        let pic_struct = r.u("pic_struct", 4)?;
        r.check_range("pic_struct", i64::from(pic_struct), 0, 8)?;
        r.annotate(PIC_STRUCT_NAMES[pic_struct as usize]);
        timing.pic_struct = Some(pic_struct as u8);
        for i in 0..NUM_CLOCK_TS[pic_struct as usize] {
            if r.flag(&format!("clock_timestamp_flag[{i}]"))? {
                parse_clock_timestamp(r, u32::from(hrd.time_offset_length))?;
            }
        }
    }
    r.exit();
    Ok(timing)
}

fn parse_clock_timestamp(r: &mut BitReader, time_offset_length: u32) -> XiResult<()> {
    r.enter("clock_timestamp()");
    r.u("ct_type", 2)?;
    r.flag("nuit_field_based_flag")?;
    r.u("counting_type", 5)?;
    let full_timestamp_flag = r.flag("full_timestamp_flag")?;
    r.flag("discontinuity_flag")?;
    r.flag("cnt_dropped_flag")?;
    r.u("n_frames", 8)?;
    if full_timestamp_flag {
        r.u("seconds_value", 6)?;
        r.u("minutes_value", 6)?;
        r.u("hours_value", 5)?;
    } else if r.flag("seconds_flag")? {
        r.u("seconds_value", 6)?;
        if r.flag("minutes_flag")? {
            r.u("minutes_value", 6)?;
            if r.flag("hours_flag")? {
                r.u("hours_value", 5)?;
            }
        }
    }
    if time_offset_length > 0 {
        r.u("time_offset", time_offset_length)?;
    }
    r.exit();
    Ok(())
}

pub(crate) fn parse_user_data_unregistered(
    r: &mut BitReader,
    payload_size: usize,
) -> XiResult<SeiUserDataUnregistered> {
    if payload_size < 16 {
        return Err(XiError::syntax(
            "uuid_iso_iec_11578",
            format!("SEI: user_data_unregistered 长度不足, size={}", payload_size),
        ));
    }
    let mut uuid = [0u8; 16];
    for (i, b) in uuid.iter_mut().enumerate() {
        *b = r.u(&format!("uuid_iso_iec_11578[{i}]"), 8)? as u8;
    }
    Ok(SeiUserDataUnregistered {
        uuid_iso_iec_11578: uuid,
        payload_len: payload_size - 16,
    })
}

fn parse_recovery_point(r: &mut BitReader) -> XiResult<SeiRecoveryPoint> {
    r.enter("recovery_point()");
    let recovery_frame_cnt = r.ue("recovery_frame_cnt")?;
    let exact_match_flag = r.flag("exact_match_flag")?;
    let broken_link_flag = r.flag("broken_link_flag")?;
    let changing_slice_group_idc = r.u("changing_slice_group_idc", 2)? as u8;
    r.exit();
    Ok(SeiRecoveryPoint {
        recovery_frame_cnt,
        exact_match_flag,
        broken_link_flag,
        changing_slice_group_idc,
    })
}
