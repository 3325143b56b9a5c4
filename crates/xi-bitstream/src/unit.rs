//! 单元级解析入口.
//!
//! [`UnitParser`] 对一个已切分的单元负载完成: RBSP 提取, 单元头解析,
//! 分派到语法解析器, 并在单元边界捕获错误. 任何单元内错误都不会向外传播,
//! 而是体现为带错误标记的部分语法树.

use std::borrow::Cow;

use log::debug;
use xi_core::{BitReader, FieldValue, XiError, XiResult};

use crate::avc::NalHeader;
use crate::codec::Codec;
use crate::context::{ParserContext, VideoParams};
use crate::dispatch::{self, ParsedRecord};
use crate::hevc::HevcNalHeader;
use crate::mpeg2;
use crate::scan::extract_rbsp;
use crate::syntax::{SyntaxNode, SyntaxTreeBuilder, SyntaxValue};

/// 没有停止位的码流 (MPEG-2) 在负载后补的 0 字节数
///
/// 切分时去掉了负载尾部的 0 字节, 而 MPEG-2 头部可能以全 0 字段结尾.
const ZERO_PADDING: usize = 8;

/// 已解析的单元头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitHeader {
    Avc(NalHeader),
    Hevc(HevcNalHeader),
    /// MPEG-2 起始码值 (起始码前缀之后的第一个字节)
    Mpeg2 { start_code: u8 },
}

impl UnitHeader {
    /// 单元类型值
    pub fn unit_type(&self) -> u8 {
        match self {
            Self::Avc(h) => h.nal_type.type_id(),
            Self::Hevc(h) => h.nal_type.type_id(),
            Self::Mpeg2 { start_code } => *start_code,
        }
    }

    /// 单元类型名称
    pub fn type_name(&self) -> String {
        match self {
            Self::Avc(h) => h.nal_type.to_string(),
            Self::Hevc(h) => h.nal_type.to_string(),
            Self::Mpeg2 { start_code } => mpeg2::start_code_name(*start_code).to_string(),
        }
    }

    fn parse(codec: Codec, r: &mut BitReader) -> XiResult<Self> {
        match codec {
            Codec::Avc => NalHeader::parse(r).map(Self::Avc),
            Codec::Hevc => HevcNalHeader::parse(r).map(Self::Hevc),
            Codec::Mpeg2 => {
                let start_code = r.u("start_code_value", 8)? as u8;
                r.annotate(mpeg2::start_code_name(start_code));
                Ok(Self::Mpeg2 { start_code })
            }
        }
    }
}

/// 一个单元的解析结果
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    /// 单元负载在输入中的字节偏移 (起始码之后)
    pub offset: u64,
    /// 负载长度 (字节, 含 emulation prevention)
    pub len: usize,
    /// 单元类型值, 单元头都无法解析时为 None
    pub unit_type: Option<u8>,
    pub type_name: String,
    /// 语法树, 根节点名为单元类型名
    pub node: SyntaxNode,
    /// 解析成功时的类型化记录
    pub record: Option<ParsedRecord>,
    /// 参数集单元给出的视频参数
    pub params: Option<VideoParams>,
    /// 错误信息
    pub error: Option<String>,
}

impl ParsedUnit {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// 是否开始一幅新图像
    pub fn starts_picture(&self) -> bool {
        self.record.as_ref().is_some_and(ParsedRecord::starts_picture)
    }
}

/// 单元解析器, 持有跨单元的解析上下文
#[derive(Debug)]
pub struct UnitParser {
    codec: Codec,
    ctx: ParserContext,
    trace: bool,
    max_unit_size: usize,
}

impl UnitParser {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            ctx: ParserContext::new(),
            trace: true,
            max_unit_size: usize::MAX,
        }
    }

    /// 是否为每个字段生成语法节点
    ///
    /// 关闭时语法树只包含单元类型和负载长度.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// 单元负载超过该长度时只解析前 `max` 字节
    pub fn with_max_unit_size(mut self, max: usize) -> Self {
        self.max_unit_size = max.max(1);
        self
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn context(&self) -> &ParserContext {
        &self.ctx
    }

    /// 解析一个单元负载 (不含起始码)
    pub fn parse(&mut self, offset: u64, payload: &[u8]) -> ParsedUnit {
        let limited = &payload[..payload.len().min(self.max_unit_size)];
        let rbsp: Cow<'_, [u8]> = if self.codec.uses_emulation_prevention() {
            Cow::Owned(extract_rbsp(limited))
        } else {
            let mut padded = Vec::with_capacity(limited.len() + ZERO_PADDING);
            padded.extend_from_slice(limited);
            padded.resize(limited.len() + ZERO_PADDING, 0);
            Cow::Owned(padded)
        };

        let mut builder = SyntaxTreeBuilder::new("unit");
        let mut header = None;
        let (result, failed_field) = {
            let mut r = if self.trace {
                BitReader::with_trace(&rbsp, &mut builder)
            } else {
                BitReader::new(&rbsp)
            };
            let result = parse_body(self.codec, &self.ctx, &mut r, &mut header, payload.len());
            (result, r.failed_field().map(str::to_string))
        };

        let type_name = header.map_or_else(|| "unknown".to_string(), |h| h.type_name());
        let unit_type = header.map(|h| h.unit_type());
        let (record, error) = match result {
            Ok(record) => (record, None),
            Err(e) => {
                let e = e.at_unit(offset, failed_field.as_deref());
                debug!("{} 单元解析失败 (偏移 {}): {}", self.codec, offset, e);
                let message = e.to_string();
                builder.mark_error(&message);
                (None, Some(message))
            }
        };

        let mut node = if self.trace {
            builder.finish()
        } else {
            summary_node(unit_type, payload.len(), error.as_deref())
        };
        node.name = type_name.clone();

        let params = record.as_ref().and_then(|rec| {
            self.ctx.store(rec);
            self.ctx.video_params(self.codec, rec)
        });

        ParsedUnit {
            offset,
            len: payload.len(),
            unit_type,
            type_name,
            node,
            record,
            params,
            error,
        }
    }
}

/// 解析单元头和单元体; 没有对应解析器的类型只记录负载长度
fn parse_body(
    codec: Codec,
    ctx: &ParserContext,
    r: &mut BitReader,
    header: &mut Option<UnitHeader>,
    payload_len: usize,
) -> XiResult<Option<ParsedRecord>> {
    let h = UnitHeader::parse(codec, r)?;
    *header = Some(h);
    let Some(entry) = dispatch::lookup(codec, h.unit_type()) else {
        r.derive("payload_length", FieldValue::Unsigned(payload_len as u64));
        return Ok(None);
    };
    let record = (entry.parse)(r, ctx, &h)?;
    Ok(Some(record))
}

fn summary_node(unit_type: Option<u8>, len: usize, error: Option<&str>) -> SyntaxNode {
    let mut node = SyntaxNode::new("unit");
    if let Some(t) = unit_type {
        node.push(SyntaxNode::leaf("unit_type", SyntaxValue::Unsigned(u64::from(t))));
    }
    node.push(SyntaxNode::leaf(
        "payload_length",
        SyntaxValue::Unsigned(len as u64),
    ));
    if let Some(message) = error {
        node.error = true;
        node.annotation = Some(message.to_string());
    }
    node
}

/// 便捷函数: 按顺序解析 Annex B 缓冲区中的全部单元
pub fn parse_annex_b(codec: Codec, data: &[u8]) -> Vec<ParsedUnit> {
    let mut parser = UnitParser::new(codec);
    crate::scan::scan_units(data)
        .map(|range| parser.parse(range.offset as u64, range.slice(data)))
        .collect()
}

/// 起始码扫描没有找到任何单元时的错误
pub fn no_units_error(len: usize) -> XiError {
    XiError::Scan(format!("{len} 字节输入中没有找到起始码"))
}
