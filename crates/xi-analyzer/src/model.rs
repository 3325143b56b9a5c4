//! 流模型.
//!
//! [`ParseModel`] 保存全部已解析单元与流信息表, 只由后台解析线程追加,
//! 消费方通过 [`ModelView`] 读取. 每次运行开始时清空, 运行期间只追加不修改,
//! 因此消费方看到的总是最终结果的一个前缀.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use xi_bitstream::{Codec, ParsedUnit, SyntaxNode};
use xi_core::MediaType;

use crate::stream::StreamInfo;

/// 模型中的一个单元
#[derive(Debug, Clone, Serialize)]
pub struct UnitEntry {
    /// 全局序号
    pub index: usize,
    pub stream_index: usize,
    /// 负载在输入 (或所在包) 中的字节偏移
    pub offset: u64,
    pub len: usize,
    pub unit_type: Option<u8>,
    pub type_name: String,
    /// 一行摘要
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pts: Option<i64>,
    pub starts_picture: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub node: SyntaxNode,
}

/// 单元所属流的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHint {
    pub media_type: MediaType,
    pub codec: Option<Codec>,
    pub pts: Option<i64>,
}

impl StreamHint {
    pub fn video(codec: Codec) -> Self {
        Self {
            media_type: MediaType::Video,
            codec: Some(codec),
            pts: None,
        }
    }
}

/// 解析结果模型
#[derive(Debug, Default)]
pub struct ParseModel {
    units: Vec<UnitEntry>,
    /// 按首次出现顺序排列
    streams: Vec<StreamInfo>,
    /// stream_index -> 该流的单元在 units 中的下标
    by_stream: HashMap<usize, Vec<usize>>,
}

impl ParseModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.units.clear();
        self.streams.clear();
        self.by_stream.clear();
    }

    pub fn units(&self) -> &[UnitEntry] {
        &self.units
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.index == index)
    }

    /// 第一条视频流的索引
    pub fn video_stream_index(&self) -> Option<usize> {
        self.streams
            .iter()
            .find(|s| s.media_type == MediaType::Video)
            .map(|s| s.index)
    }

    /// 过滤后的单元数, `filter` 为 -1 时不过滤
    fn filtered_len(&self, filter: i64) -> usize {
        match usize::try_from(filter) {
            Ok(stream) => self.by_stream.get(&stream).map_or(0, Vec::len),
            Err(_) => self.units.len(),
        }
    }

    fn filtered_unit(&self, filter: i64, i: usize) -> Option<&UnitEntry> {
        match usize::try_from(filter) {
            Ok(stream) => {
                let pos = *self.by_stream.get(&stream)?.get(i)?;
                self.units.get(pos)
            }
            Err(_) => self.units.get(i),
        }
    }

    fn stream_mut(&mut self, index: usize, hint: &StreamHint) -> (&mut StreamInfo, bool) {
        match self.streams.iter().position(|s| s.index == index) {
            Some(pos) => (&mut self.streams[pos], false),
            None => {
                self.streams
                    .push(StreamInfo::new(index, hint.media_type, hint.codec));
                let last = self.streams.len() - 1;
                (&mut self.streams[last], true)
            }
        }
    }
}

/// 追加一个单元后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// 模型中的单元总数
    pub total_units: usize,
    /// 流信息表是否有变化 (新建流或视频参数更新)
    pub streams_changed: bool,
}

/// 模型构建器, 由后台解析线程持有
#[derive(Debug, Clone)]
pub struct StreamModelBuilder {
    model: Arc<RwLock<ParseModel>>,
}

impl StreamModelBuilder {
    pub fn new(model: Arc<RwLock<ParseModel>>) -> Self {
        Self { model }
    }

    /// 追加一个已解析单元
    ///
    /// 流信息在第一次出现时创建. 写锁只在追加期间持有.
    pub fn add_parsed_unit(
        &self,
        stream_index: usize,
        hint: StreamHint,
        unit: ParsedUnit,
    ) -> AddOutcome {
        let summary = unit
            .record
            .as_ref()
            .map(|r| r.summary())
            .unwrap_or_default();
        let starts_picture = unit.starts_picture();
        let mut entry = UnitEntry {
            index: 0,
            stream_index,
            offset: unit.offset,
            len: unit.len,
            unit_type: unit.unit_type,
            type_name: unit.type_name,
            summary,
            pts: hint.pts,
            starts_picture,
            error: unit.error,
            node: unit.node,
        };

        let mut model = write_model(&self.model);
        let (stream, created) = model.stream_mut(stream_index, &hint);
        stream.unit_count += 1;
        stream.byte_count += entry.len as u64;
        if entry.error.is_some() {
            stream.error_count += 1;
        }
        if starts_picture {
            stream.picture_count += 1;
        }
        let params_changed = unit
            .params
            .as_ref()
            .is_some_and(|p| stream.apply_params(p));

        entry.index = model.units.len();
        model.by_stream.entry(stream_index).or_default().push(entry.index);
        model.units.push(entry);
        AddOutcome {
            total_units: model.units.len(),
            streams_changed: created || params_changed,
        }
    }

    pub fn total_units(&self) -> usize {
        read_model(&self.model).units.len()
    }

    /// 清空模型, 每次运行开始时调用
    pub fn reset(&self) {
        write_model(&self.model).clear();
    }
}

fn read_model(model: &RwLock<ParseModel>) -> RwLockReadGuard<'_, ParseModel> {
    model.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_model(model: &RwLock<ParseModel>) -> RwLockWriteGuard<'_, ParseModel> {
    model.write().unwrap_or_else(PoisonError::into_inner)
}

/// 模型的只读视图
///
/// 可以按流过滤 (-1 表示全部). 过滤只影响视图, 模型始终保存全部单元.
/// 返回的都是克隆的快照.
#[derive(Debug, Clone)]
pub struct ModelView {
    model: Arc<RwLock<ParseModel>>,
    filter: Arc<AtomicI64>,
}

impl ModelView {
    pub fn new(model: Arc<RwLock<ParseModel>>) -> Self {
        Self {
            model,
            filter: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// 设置过滤的流索引, -1 表示显示全部
    pub fn set_filter_stream_index(&self, index: i64) {
        self.filter.store(index.max(-1), Ordering::Relaxed);
    }

    pub fn filter_stream_index(&self) -> i64 {
        self.filter.load(Ordering::Relaxed)
    }

    /// 只显示视频流; 没有视频流时显示全部
    pub fn show_video_only(&self, enabled: bool) {
        let index = if enabled {
            self.video_stream_index().map_or(-1, |i| i as i64)
        } else {
            -1
        };
        self.set_filter_stream_index(index);
    }

    /// 过滤后的单元数
    pub fn len(&self) -> usize {
        read_model(&self.model).filtered_len(self.filter_stream_index())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 过滤后的第 i 个单元
    pub fn unit(&self, i: usize) -> Option<UnitEntry> {
        read_model(&self.model)
            .filtered_unit(self.filter_stream_index(), i)
            .cloned()
    }

    /// 过滤后的全部单元
    pub fn units(&self) -> Vec<UnitEntry> {
        let model = read_model(&self.model);
        let filter = self.filter_stream_index();
        (0..model.filtered_len(filter))
            .filter_map(|i| model.filtered_unit(filter, i).cloned())
            .collect()
    }

    /// 不受过滤影响的单元总数
    pub fn total_units(&self) -> usize {
        read_model(&self.model).units.len()
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        read_model(&self.model).streams.clone()
    }

    pub fn stream_count(&self) -> usize {
        read_model(&self.model).streams.len()
    }

    pub fn video_stream_index(&self) -> Option<usize> {
        read_model(&self.model).video_stream_index()
    }
}
