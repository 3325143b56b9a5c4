//! H.265/HEVC NAL 单元头.
//!
//! HEVC NAL 头部为 2 字节 (比 H.264 多一字节):
//! - forbidden_zero_bit (1 bit)
//! - nal_unit_type (6 bits)
//! - nuh_layer_id (6 bits)
//! - nuh_temporal_id_plus1 (3 bits)

use std::fmt;

use xi_core::{BitReader, XiError, XiResult};

/// HEVC NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcNalUnitType {
    /// TRAIL_N (非参考尾随图像)
    TrailN,
    /// TRAIL_R (参考尾随图像)
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    /// BLA_W_LP (Broken Link Access)
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    /// IDR_W_RADL (Instantaneous Decoding Refresh)
    IdrWRadl,
    IdrNLp,
    /// CRA_NUT (Clean Random Access)
    Cra,
    Vps,
    Sps,
    Pps,
    Aud,
    Eos,
    Eob,
    FillerData,
    PrefixSei,
    SuffixSei,
    /// 保留或未指定类型
    Unknown(u8),
}

impl HevcNalUnitType {
    /// 从类型编号创建
    pub fn from_type_id(id: u8) -> Self {
        match id {
            0 => Self::TrailN,
            1 => Self::TrailR,
            2 => Self::TsaN,
            3 => Self::TsaR,
            4 => Self::StsaN,
            5 => Self::StsaR,
            6 => Self::RadlN,
            7 => Self::RadlR,
            8 => Self::RaslN,
            9 => Self::RaslR,
            16 => Self::BlaWLp,
            17 => Self::BlaWRadl,
            18 => Self::BlaNLp,
            19 => Self::IdrWRadl,
            20 => Self::IdrNLp,
            21 => Self::Cra,
            32 => Self::Vps,
            33 => Self::Sps,
            34 => Self::Pps,
            35 => Self::Aud,
            36 => Self::Eos,
            37 => Self::Eob,
            38 => Self::FillerData,
            39 => Self::PrefixSei,
            40 => Self::SuffixSei,
            _ => Self::Unknown(id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::TrailN => 0,
            Self::TrailR => 1,
            Self::TsaN => 2,
            Self::TsaR => 3,
            Self::StsaN => 4,
            Self::StsaR => 5,
            Self::RadlN => 6,
            Self::RadlR => 7,
            Self::RaslN => 8,
            Self::RaslR => 9,
            Self::BlaWLp => 16,
            Self::BlaWRadl => 17,
            Self::BlaNLp => 18,
            Self::IdrWRadl => 19,
            Self::IdrNLp => 20,
            Self::Cra => 21,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::Aud => 35,
            Self::Eos => 36,
            Self::Eob => 37,
            Self::FillerData => 38,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否为 VCL NAL
    pub fn is_vcl(&self) -> bool {
        self.type_id() < 32
    }

    /// 是否为 IRAP (Intra Random Access Point) NAL
    pub fn is_irap(&self) -> bool {
        matches!(self.type_id(), 16..=23)
    }

    /// 是否为 IDR NAL
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// 当前实现能够解析 slice header 的 VCL 类型 (0~9, 16~21)
    pub fn is_slice(&self) -> bool {
        matches!(self.type_id(), 0..=9 | 16..=21)
    }
}

impl fmt::Display for HevcNalUnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TrailN => "TRAIL_N",
            Self::TrailR => "TRAIL_R",
            Self::TsaN => "TSA_N",
            Self::TsaR => "TSA_R",
            Self::StsaN => "STSA_N",
            Self::StsaR => "STSA_R",
            Self::RadlN => "RADL_N",
            Self::RadlR => "RADL_R",
            Self::RaslN => "RASL_N",
            Self::RaslR => "RASL_R",
            Self::BlaWLp => "BLA_W_LP",
            Self::BlaWRadl => "BLA_W_RADL",
            Self::BlaNLp => "BLA_N_LP",
            Self::IdrWRadl => "IDR_W_RADL",
            Self::IdrNLp => "IDR_N_LP",
            Self::Cra => "CRA_NUT",
            Self::Vps => "VPS_NUT",
            Self::Sps => "SPS_NUT",
            Self::Pps => "PPS_NUT",
            Self::Aud => "AUD_NUT",
            Self::Eos => "EOS_NUT",
            Self::Eob => "EOB_NUT",
            Self::FillerData => "FD_NUT",
            Self::PrefixSei => "PREFIX_SEI_NUT",
            Self::SuffixSei => "SUFFIX_SEI_NUT",
            Self::Unknown(id) => return write!(f, "保留类型({id})"),
        };
        f.write_str(name)
    }
}

/// HEVC NAL 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcNalHeader {
    pub nal_type: HevcNalUnitType,
    /// nuh_layer_id
    pub layer_id: u8,
    /// nuh_temporal_id_plus1
    pub temporal_id_plus1: u8,
}

impl HevcNalHeader {
    /// 从读取器当前位置解析 (带跟踪)
    pub fn parse(r: &mut BitReader) -> XiResult<Self> {
        r.enter("nal_unit_header()");
        let forbidden = r.flag("forbidden_zero_bit")?;
        let type_id = r.u("nal_unit_type", 6)? as u8;
        let nal_type = HevcNalUnitType::from_type_id(type_id);
        r.annotate(&nal_type.to_string());
        let layer_id = r.u("nuh_layer_id", 6)? as u8;
        let temporal_id_plus1 = r.u("nuh_temporal_id_plus1", 3)? as u8;
        r.exit();
        if forbidden {
            return Err(XiError::syntax(
                "forbidden_zero_bit",
                "HEVC: forbidden_zero_bit 非法, value=1",
            ));
        }
        if temporal_id_plus1 == 0 {
            return Err(XiError::syntax(
                "nuh_temporal_id_plus1",
                "HEVC: nuh_temporal_id_plus1 不能为 0",
            ));
        }
        Ok(Self {
            nal_type,
            layer_id,
            temporal_id_plus1,
        })
    }

    /// TemporalId
    pub fn temporal_id(&self) -> u8 {
        self.temporal_id_plus1.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_type_roundtrip() {
        for id in [0u8, 1, 9, 16, 19, 21, 32, 33, 34, 35, 39, 40] {
            assert_eq!(HevcNalUnitType::from_type_id(id).type_id(), id);
        }
        assert_eq!(HevcNalUnitType::from_type_id(50), HevcNalUnitType::Unknown(50));
    }

    #[test]
    fn test_nal_type_properties() {
        assert!(HevcNalUnitType::IdrWRadl.is_irap());
        assert!(HevcNalUnitType::IdrWRadl.is_idr());
        assert!(HevcNalUnitType::Cra.is_irap());
        assert!(!HevcNalUnitType::Cra.is_idr());
        assert!(HevcNalUnitType::TrailR.is_slice());
        assert!(!HevcNalUnitType::Vps.is_vcl());
        assert!(!HevcNalUnitType::Unknown(22).is_slice());
    }

    #[test]
    fn test_header_parse() {
        // VPS: type=32, layer=0, tid_plus1=1 -> 0x40 0x01
        let data = [0x40, 0x01];
        let mut r = BitReader::new(&data);
        let h = HevcNalHeader::parse(&mut r).unwrap();
        assert_eq!(h.nal_type, HevcNalUnitType::Vps);
        assert_eq!(h.layer_id, 0);
        assert_eq!(h.temporal_id(), 0);
    }

    #[test]
    fn test_header_reject_zero_temporal_id_plus1() {
        let data = [0x40, 0x00];
        let mut r = BitReader::new(&data);
        assert!(HevcNalHeader::parse(&mut r).is_err());
    }
}
