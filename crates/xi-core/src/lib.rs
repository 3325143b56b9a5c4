//! # xi-core
//!
//! Xi 码流分析引擎核心库, 提供统一错误类型、带跟踪的比特流读取器以及基础类型.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod media_type;
pub mod rational;

// 重导出常用类型
pub use bitreader::{BitReader, FieldValue, TraceEntry, TraceSink};
pub use error::{XiError, XiResult};
pub use media_type::MediaType;
pub use rational::Rational;
