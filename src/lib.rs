//! # Xi (析)
//!
//! 纯 Rust 实现的视频码流语法分析引擎.
//!
//! Xi 把 H.264/AVC、H.265/HEVC 与 MPEG-2 视频基本流逐单元解析为带比特位置的
//! 语法树, 并在后台线程中构建可增量读取的流模型:
//! - **位读取**: 定长字段、Exp-Golomb 码, 每次读取可记录到跟踪器
//! - **单元切分**: Annex B 起始码扫描与防竞争字节去除
//! - **语法解析**: 按 (码流类型, 单元类型) 查表分发到各解析函数
//! - **后台调度**: 可取消的解析任务, 进度与模型更新通知
//!
//! # 快速开始
//!
//! ```rust
//! use xi::bitstream::Codec;
//!
//! let data = [0x00, 0x00, 0x00, 0x01, 0x09, 0x10];
//! let view = xi::analyze(Codec::Avc, &data);
//! assert_eq!(view.total_units(), 1);
//! assert_eq!(view.unit(0).map(|u| u.type_name), Some("AUD".to_string()));
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `xi-core` | 错误类型、位读写、基础类型 |
//! | `xi-bitstream` | 单元切分与各码流的语法解析 |
//! | `xi-analyzer` | 流模型与后台解析调度 |

/// 核心类型与位读写
pub use xi_core as core;

/// 单元切分与语法解析
pub use xi_bitstream as bitstream;

/// 流模型与后台解析调度
pub use xi_analyzer as analyzer;

/// 获取 Xi 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 用默认配置同步分析一个内存中的 Annex B 缓冲区
pub fn analyze(codec: xi_bitstream::Codec, data: &[u8]) -> xi_analyzer::ModelView {
    xi_analyzer::analyze_bytes(codec, data, &xi_analyzer::AnalyzerConfig::default())
}
