//! H.265/HEVC 语法解析.
//!
//! 参数集 (VPS/SPS/PPS) 解析后存入 [`HevcState`], slice segment header
//! 通过 PPS -> SPS 的引用链查找解析所需的字段.

use std::collections::HashMap;

use xi_core::{BitReader, XiResult};

pub mod hrd;
pub mod nal;
pub mod pps;
pub mod ptl;
pub mod rps;
pub mod sei;
pub mod slice;
pub mod sps;
pub mod vps;
pub mod vui;

pub use hrd::HevcHrdParameters;
pub use nal::{HevcNalHeader, HevcNalUnitType};
pub use pps::{HevcPps, parse_hevc_pps};
pub use ptl::ProfileTierLevel;
pub use sei::{HevcSeiMessage, HevcSeiPayload, parse_hevc_sei_rbsp};
pub use slice::{HevcSliceHeader, HevcSliceType, parse_hevc_slice_header};
pub use sps::{HevcSps, parse_hevc_sps};
pub use vps::{HevcVps, parse_hevc_vps};

/// pic_type 含义 (表 7-2)
const PIC_TYPE_NAMES: [&str; 3] = ["I", "P, I", "B, P, I"];

/// 已解析的 H.265 参数集
#[derive(Debug, Clone, Default)]
pub struct HevcState {
    pub vps: HashMap<u8, HevcVps>,
    pub sps: HashMap<u32, HevcSps>,
    pub pps: HashMap<u32, HevcPps>,
}

impl HevcState {
    pub fn store_vps(&mut self, vps: HevcVps) {
        self.vps.insert(vps.vps_id, vps);
    }

    pub fn store_sps(&mut self, sps: HevcSps) {
        self.sps.insert(sps.sps_id, sps);
    }

    pub fn store_pps(&mut self, pps: HevcPps) {
        self.pps.insert(pps.pps_id, pps);
    }
}

/// 解析 access_unit_delimiter_rbsp(), 返回 pic_type
pub fn parse_aud(r: &mut BitReader) -> XiResult<u8> {
    r.enter("access_unit_delimiter_rbsp()");
    let pic_type = r.u("pic_type", 3)? as u8;
    r.annotate(PIC_TYPE_NAMES.get(usize::from(pic_type)).copied().unwrap_or("reserved"));
    r.exit();
    Ok(pic_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aud() {
        let data = [0b0101_0000];
        assert_eq!(parse_aud(&mut BitReader::new(&data)).unwrap(), 2);
        let data = [0b1111_0000];
        assert_eq!(parse_aud(&mut BitReader::new(&data)).unwrap(), 7);
    }

    #[test]
    fn test_store_replaces_same_id() {
        use crate::hevc::pps::test_support::write_simple_pps;
        use xi_core::bitwriter::BitWriter;

        let mut state = HevcState::default();
        for sps_id in [0, 2] {
            let mut bw = BitWriter::new();
            write_simple_pps(&mut bw, 1, sps_id);
            let data = bw.finish();
            state.store_pps(parse_hevc_pps(&mut BitReader::new(&data)).unwrap());
        }
        assert_eq!(state.pps.len(), 1);
        assert_eq!(state.pps[&1].sps_id, 2);
    }
}
