//! # xi-bitstream
//!
//! Xi 码流语法解析库: Annex B 起始码扫描, RBSP 提取, 以及 H.264 / H.265 / MPEG-2
//! 视频的语法元素解析.
//!
//! 每个单元解析后同时得到类型化记录 ([`ParsedRecord`]) 和一棵语法树
//! ([`SyntaxNode`]). 单元内的任何错误都在单元边界被捕获, 不影响后续单元.
//!
//! ## 使用示例
//!
//! ```rust
//! use xi_bitstream::{Codec, UnitParser, scan_units};
//!
//! let data = [0u8, 0, 0, 1, 0x09, 0x10];
//! let mut parser = UnitParser::new(Codec::Avc);
//! for range in scan_units(&data) {
//!     let unit = parser.parse(range.offset as u64, range.slice(&data));
//!     assert_eq!(unit.type_name, "AUD");
//! }
//! ```

pub mod avc;
pub mod codec;
pub mod context;
pub mod dispatch;
pub mod hevc;
pub mod mpeg2;
pub mod scan;
pub mod syntax;
pub mod unit;

// 重导出常用类型
pub use codec::Codec;
pub use context::{ParserContext, VideoParams};
pub use dispatch::{ParsedRecord, ParserEntry};
pub use scan::{ByteRange, extract_rbsp, scan_units, split_length_prefixed};
pub use syntax::{SyntaxNode, SyntaxTreeBuilder, SyntaxValue};
pub use unit::{ParsedUnit, UnitHeader, UnitParser, no_units_error, parse_annex_b};
