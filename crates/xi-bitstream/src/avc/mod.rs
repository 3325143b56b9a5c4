//! H.264/AVC 语法解析.
//!
//! 覆盖 NAL 头、SPS (含 VUI/HRD)、PPS、slice header、SEI 以及 AUD.
//! 参数集在解析后存入 [`AvcState`], 供后续依赖它们的语法结构查询.

use std::collections::HashMap;

use xi_core::{BitReader, XiResult};

pub mod hrd;
pub mod nal;
pub mod pps;
pub mod scaling;
pub mod sei;
pub mod slice;
pub mod sps;
pub mod vui;

pub use hrd::{HrdParameters, parse_hrd_parameters};
pub use nal::{NalHeader, NalUnitType};
pub use pps::{Pps, parse_pps};
pub use sei::{SeiMessage, SeiPayload, parse_sei_rbsp};
pub use slice::{SliceHeader, SliceType, parse_slice_header};
pub use sps::{Sps, parse_sps};
pub use vui::{TimingInfo, VuiParameters};

/// primary_pic_type 含义 (表 7-5)
const PRIMARY_PIC_TYPE_NAMES: [&str; 8] = [
    "I",
    "I, P",
    "I, P, B",
    "SI",
    "SI, SP",
    "I, SI",
    "I, SI, P, SP",
    "I, SI, P, SP, B",
];

/// 已解析的 H.264 参数集
#[derive(Debug, Clone, Default)]
pub struct AvcState {
    pub sps: HashMap<u32, Sps>,
    pub pps: HashMap<u32, Pps>,
    /// 最近一个 slice 激活的 SPS
    active_sps: Option<u32>,
    /// 最近存入的 SPS, 在首个 slice 之前作为激活 SPS 的替代
    last_sps: Option<u32>,
}

impl AvcState {
    pub fn store_sps(&mut self, sps: Sps) {
        self.last_sps = Some(sps.sps_id);
        self.sps.insert(sps.sps_id, sps);
    }

    pub fn store_pps(&mut self, pps: Pps) {
        self.pps.insert(pps.pps_id, pps);
    }

    /// slice 引用 PPS 时激活其 SPS
    pub fn activate_pps(&mut self, pps_id: u32) {
        if let Some(pps) = self.pps.get(&pps_id) {
            self.active_sps = Some(pps.sps_id);
        }
    }

    /// 当前激活的 SPS
    pub fn active_sps(&self) -> Option<&Sps> {
        self.active_sps
            .or(self.last_sps)
            .and_then(|id| self.sps.get(&id))
    }
}

/// 解析 access_unit_delimiter_rbsp(), 返回 primary_pic_type
pub fn parse_aud(r: &mut BitReader) -> XiResult<u8> {
    r.enter("access_unit_delimiter_rbsp()");
    let primary_pic_type = r.u("primary_pic_type", 3)? as u8;
    r.annotate(PRIMARY_PIC_TYPE_NAMES[primary_pic_type as usize]);
    r.exit();
    Ok(primary_pic_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::SyntaxTreeBuilder;

    #[test]
    fn test_parse_aud_annotation() {
        let data = [0b0101_0000];
        let mut builder = SyntaxTreeBuilder::new("aud");
        {
            let mut r = BitReader::with_trace(&data, &mut builder);
            assert_eq!(parse_aud(&mut r).unwrap(), 2);
        }
        let root = builder.finish();
        let aud = root.find("access_unit_delimiter_rbsp()").expect("应有 AUD 节点");
        assert_eq!(aud.children[0].annotation.as_deref(), Some("I, P, B"));
    }

    #[test]
    fn test_active_sps_falls_back_to_last_stored() {
        use crate::avc::pps::test_support::write_simple_pps;
        use crate::avc::sps::test_support::write_high_sps;
        use xi_core::bitwriter::BitWriter;

        let mut state = AvcState::default();
        assert!(state.active_sps().is_none());
        for id in [0, 1] {
            let mut bw = BitWriter::new();
            write_high_sps(&mut bw, id, false);
            let data = bw.finish();
            state.store_sps(parse_sps(&mut BitReader::new(&data)).unwrap());
        }
        assert_eq!(state.active_sps().map(|s| s.sps_id), Some(1));

        let mut bw = BitWriter::new();
        write_simple_pps(&mut bw, 4, 0, false);
        let data = bw.finish();
        let pps = parse_pps(&mut BitReader::new(&data), &state).unwrap();
        state.store_pps(pps);
        state.activate_pps(4);
        assert_eq!(state.active_sps().map(|s| s.sps_id), Some(0));
    }
}
