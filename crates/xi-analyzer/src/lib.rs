//! # xi-analyzer
//!
//! Xi 码流分析调度库: 在后台线程中读取输入并逐单元解析, 把结果追加到共享的
//! 流模型中, 同时通过有界通道发送进度与模型更新通知.
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use xi_analyzer::{AnalyzerConfig, BackgroundParser, ParseEvent};
//!
//! let mut parser = BackgroundParser::new(AnalyzerConfig::default());
//! let events = parser.start("input.264").unwrap();
//! for event in events.iter() {
//!     if let ParseEvent::Progress(p) = event {
//!         println!("{}", xi_analyzer::status_text(p, None));
//!     }
//! }
//! let view = parser.view();
//! println!("{} 个单元", view.total_units());
//! ```

pub mod config;
pub mod model;
pub mod packet;
pub mod scheduler;
pub mod source;
pub mod status;
pub mod stream;

use std::sync::{Arc, RwLock};

use xi_bitstream::{Codec, UnitParser};

// 重导出常用类型
pub use config::AnalyzerConfig;
pub use model::{ModelView, ParseModel, StreamHint, StreamModelBuilder, UnitEntry};
pub use packet::{Framing, Packet, PacketSource, VecPacketSource};
pub use scheduler::{BackgroundParser, CancelToken, ParseEvent, RunState};
pub use status::status_text;
pub use stream::StreamInfo;

/// 在当前线程同步分析一个内存中的 Annex B 缓冲区
pub fn analyze_bytes(codec: Codec, data: &[u8], config: &AnalyzerConfig) -> ModelView {
    let model = Arc::new(RwLock::new(ParseModel::new()));
    let builder = StreamModelBuilder::new(Arc::clone(&model));
    let mut parser = UnitParser::new(codec)
        .with_trace(config.trace_fields)
        .with_max_unit_size(config.max_unit_size);
    let hint = StreamHint::video(codec);
    for range in xi_bitstream::scan_units(data) {
        let unit = parser.parse(range.offset as u64, range.slice(data));
        builder.add_parsed_unit(0, hint, unit);
    }
    ModelView::new(model)
}
