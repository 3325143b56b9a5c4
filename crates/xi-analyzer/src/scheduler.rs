//! 后台解析调度.
//!
//! 每次运行使用一个独立的工作线程: 读取输入, 切分单元, 解析并追加到模型.
//! 运行状态: `Idle -> Running -> {Completed, Aborted, Failed}`.
//!
//! 通知通过有界通道发送. 进度与模型计数这类累积通知在通道满时合并为最新值,
//! 工作线程不会因为消费方处理慢而等待; 每次运行恰好发送一个 `Finished`.
//! 解析过程中的 panic 被捕获, 运行以 `Failed` 结束.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use xi_bitstream::{ByteRange, Codec, ParsedUnit, SyntaxNode, SyntaxValue, UnitParser};
use xi_core::{MediaType, XiError, XiResult};

use crate::config::AnalyzerConfig;
use crate::model::{AddOutcome, ModelView, ParseModel, StreamHint, StreamModelBuilder};
use crate::packet::{Framing, Packet, PacketSource};
use crate::source::{AnnexBReader, ReadUnit};

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl RunState {
    /// 是否为终止状态
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

/// 后台解析通知
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// 进度百分比 (0~100), 只在整数值变化时发送
    Progress(i32),
    /// 模型中的单元总数
    ModelUpdated { total_units: usize },
    /// 流信息表有变化
    StreamsUpdated,
    /// 起始码扫描警告 (如输入中没有任何起始码), 不影响运行结果
    ScanWarning(String),
    /// 运行结束. `error` 只在 `Failed` 时非空
    Finished { state: RunState, error: String },
}

/// 取消标志, 工作线程在单元之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 工作线程与控制方共享的状态
#[derive(Debug)]
struct Shared {
    state: Mutex<RunState>,
    changed: Condvar,
    /// -1 表示尚未开始
    progress: AtomicI32,
}

impl Shared {
    fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.changed.notify_all();
    }
}

/// 一次运行的句柄
struct Run {
    cancel: CancelToken,
    /// 控制方已放弃该运行, 终止通知不再等待消费方
    detached: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

enum Input {
    File(PathBuf),
    Packets(Box<dyn PacketSource>),
}

/// 后台解析器
pub struct BackgroundParser {
    config: AnalyzerConfig,
    shared: Arc<Shared>,
    builder: StreamModelBuilder,
    view: ModelView,
    run: Option<Run>,
}

impl BackgroundParser {
    pub fn new(config: AnalyzerConfig) -> Self {
        let model = Arc::new(RwLock::new(ParseModel::new()));
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::Idle),
                changed: Condvar::new(),
                progress: AtomicI32::new(-1),
            }),
            builder: StreamModelBuilder::new(Arc::clone(&model)),
            view: ModelView::new(model),
            run: None,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// 模型视图, 与解析器共享过滤设置
    pub fn view(&self) -> ModelView {
        self.view.clone()
    }

    /// 开始分析 Annex B 文件
    ///
    /// 运行中再次调用返回 `InvalidState`. 文件打开失败等 I/O 错误通过
    /// `Finished { state: Failed, .. }` 报告.
    pub fn start(&mut self, path: impl AsRef<Path>) -> XiResult<Receiver<ParseEvent>> {
        self.launch(Input::File(path.as_ref().to_path_buf()))
    }

    /// 开始分析已解封装的数据包
    pub fn start_packets<S>(&mut self, source: S) -> XiResult<Receiver<ParseEvent>>
    where
        S: PacketSource + 'static,
    {
        self.launch(Input::Packets(Box::new(source)))
    }

    /// 请求取消, 工作线程在下一个单元边界退出
    pub fn request_abort(&self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state() == RunState::Running
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    /// 当前进度 (0~100), 未开始时为 -1
    pub fn progress(&self) -> i32 {
        self.shared.progress.load(Ordering::Relaxed)
    }

    /// 等待当前运行结束, 返回终止状态; 没有运行过时立即返回 `Idle`
    pub fn wait(&self) -> RunState {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *state == RunState::Running {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *state
    }

    fn launch(&mut self, input: Input) -> XiResult<Receiver<ParseEvent>> {
        self.config.validate()?;
        if self.is_running() {
            return Err(XiError::InvalidState("后台解析正在运行".into()));
        }
        self.reap();

        self.builder.reset();
        self.shared.progress.store(0, Ordering::Relaxed);
        self.shared.set_state(RunState::Running);

        let (tx, rx) = sync_channel(self.config.channel_capacity);
        let cancel = CancelToken::new();
        let detached = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            config: self.config.clone(),
            builder: self.builder.clone(),
            cancel: cancel.clone(),
            notifier: Notifier::new(
                tx,
                Arc::clone(&self.shared),
                Arc::clone(&detached),
                self.config.model_batch_size,
            ),
        };
        let spawned = thread::Builder::new()
            .name("xi-parser".into())
            .spawn(move || worker.run(input));
        match spawned {
            Ok(handle) => {
                self.run = Some(Run {
                    cancel,
                    detached,
                    worker: handle,
                });
                Ok(rx)
            }
            Err(e) => {
                self.shared.set_state(RunState::Idle);
                Err(XiError::Io(e))
            }
        }
    }

    /// 回收已结束的工作线程
    fn reap(&mut self) {
        if let Some(run) = self.run.take() {
            run.detached.store(true, Ordering::Relaxed);
            if run.worker.join().is_err() {
                warn!("后台解析线程异常退出");
            }
        }
    }
}

impl Drop for BackgroundParser {
    fn drop(&mut self) {
        self.request_abort();
        self.reap();
    }
}

/// 通知发送与合并
struct Notifier {
    tx: SyncSender<ParseEvent>,
    shared: Arc<Shared>,
    detached: Arc<AtomicBool>,
    batch: usize,
    since_update: usize,
    last_percent: i32,
    pending_progress: Option<i32>,
    pending_total: Option<usize>,
    pending_streams: bool,
    pending_warning: Option<String>,
    /// 本次运行已经报告过扫描警告
    warned: bool,
    disconnected: bool,
}

impl Notifier {
    fn new(
        tx: SyncSender<ParseEvent>,
        shared: Arc<Shared>,
        detached: Arc<AtomicBool>,
        batch: usize,
    ) -> Self {
        Self {
            tx,
            shared,
            detached,
            batch: batch.max(1),
            since_update: 0,
            last_percent: 0,
            pending_progress: None,
            pending_total: None,
            pending_streams: false,
            pending_warning: None,
            warned: false,
            disconnected: false,
        }
    }

    fn progress(&mut self, done: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as i32
        };
        if percent != self.last_percent {
            self.last_percent = percent;
            self.shared.progress.store(percent, Ordering::Relaxed);
            self.pending_progress = Some(percent);
        }
        self.flush();
    }

    fn unit_added(&mut self, outcome: AddOutcome) {
        self.since_update += 1;
        if self.since_update >= self.batch {
            self.since_update = 0;
            self.pending_total = Some(outcome.total_units);
        }
        if outcome.streams_changed {
            self.pending_streams = true;
        }
        self.flush();
    }

    /// 扫描警告, 每次运行只发送第一条
    fn warning(&mut self, message: String) {
        if self.warned {
            debug!("{}", message);
            return;
        }
        warn!("{}", message);
        self.warned = true;
        self.pending_warning = Some(message);
        self.flush();
    }

    /// 尝试发送; 通道满时返回 false, 保留待发送的值
    fn try_emit(&mut self, event: ParseEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                self.disconnected = true;
                true
            }
        }
    }

    fn flush(&mut self) {
        if self.disconnected {
            return;
        }
        if let Some(message) = self.pending_warning.take() {
            if !self.try_emit(ParseEvent::ScanWarning(message.clone())) {
                self.pending_warning = Some(message);
                return;
            }
        }
        if let Some(total_units) = self.pending_total {
            if !self.try_emit(ParseEvent::ModelUpdated { total_units }) {
                return;
            }
            self.pending_total = None;
        }
        if self.pending_streams {
            if !self.try_emit(ParseEvent::StreamsUpdated) {
                return;
            }
            self.pending_streams = false;
        }
        if let Some(percent) = self.pending_progress {
            if self.try_emit(ParseEvent::Progress(percent)) {
                self.pending_progress = None;
            }
        }
    }

    fn has_pending(&self) -> bool {
        self.pending_warning.is_some()
            || self.pending_total.is_some()
            || self.pending_streams
            || self.pending_progress.is_some()
    }

    /// 发送终止通知
    ///
    /// 状态先切换为终止态, 再等待合并中的通知全部发出, 最后发送 `Finished`.
    /// 消费方已断开, 或控制方已放弃该运行时不再等待.
    fn finish(mut self, state: RunState, error: String, total_units: usize) {
        if self.since_update > 0 {
            self.pending_total = Some(total_units);
        }
        self.flush();
        self.shared.set_state(state);
        while self.has_pending() && !self.disconnected && !self.detached.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(2));
            self.flush();
        }
        let mut event = ParseEvent::Finished { state, error };
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    if self.detached.load(Ordering::Relaxed) {
                        debug!("消费方未读取通知, 丢弃终止通知");
                        return;
                    }
                    event = back;
                    thread::sleep(Duration::from_millis(2));
                }
            }
        }
    }
}

/// 工作线程
struct Worker {
    config: AnalyzerConfig,
    builder: StreamModelBuilder,
    cancel: CancelToken,
    notifier: Notifier,
}

impl Worker {
    fn run(mut self, input: Input) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match input {
            Input::File(path) => {
                info!("开始分析: {}", path.display());
                self.run_file(&path)
            }
            Input::Packets(source) => {
                info!("开始分析数据包输入");
                self.run_packets(source)
            }
        }));
        let (state, error) = match result {
            Ok(Ok(state)) => (state, String::new()),
            Ok(Err(e)) => {
                warn!("分析失败: {}", e);
                (RunState::Failed, e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("解析线程 panic: {}", message);
                (RunState::Failed, format!("解析线程内部错误: {}", message))
            }
        };
        if state == RunState::Completed {
            self.notifier.progress(1, 1);
        }
        let total_units = self.builder.total_units();
        info!("分析结束: {:?}, 共 {} 个单元", state, total_units);
        self.notifier.finish(state, error, total_units);
    }

    fn unit_parser(&self, codec: Codec) -> UnitParser {
        UnitParser::new(codec)
            .with_trace(self.config.trace_fields)
            .with_max_unit_size(self.config.max_unit_size)
    }

    fn run_file(&mut self, path: &Path) -> XiResult<RunState> {
        let mut file = File::open(path)?;
        let total = file.metadata()?.len();

        let mut head = Vec::new();
        (&mut file)
            .take(self.config.read_chunk_size as u64)
            .read_to_end(&mut head)?;
        let codec = match self.config.codec.or_else(|| Codec::from_path(path)) {
            Some(codec) => codec,
            None => detect_codec(&head)?,
        };
        info!("码流类型: {}", codec);

        let reader = AnnexBReader::new(Cursor::new(head).chain(file), self.config.read_chunk_size)
            .with_max_unit_size(self.config.max_unit_size);
        self.parse_annex_b(reader, total, codec)
    }

    fn parse_annex_b<R: Read>(
        &mut self,
        mut reader: AnnexBReader<R>,
        total: u64,
        codec: Codec,
    ) -> XiResult<RunState> {
        let mut parser = self.unit_parser(codec);
        let hint = StreamHint::video(codec);
        let mut count = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunState::Aborted);
            }
            let Some(read) = reader.next_unit()? else {
                break;
            };
            let mut unit = parser.parse(read.offset, &read.payload);
            if read.is_truncated() {
                mark_oversized(&mut unit, &read, self.config.max_unit_size);
            }
            let outcome = self.builder.add_parsed_unit(0, hint, unit);
            self.notifier.unit_added(outcome);
            self.notifier.progress(reader.position(), total);
            count += 1;
        }
        if count == 0 {
            self.notifier.warning(xi_bitstream::no_units_error(total as usize).to_string());
        }
        Ok(RunState::Completed)
    }

    fn run_packets(&mut self, mut source: Box<dyn PacketSource>) -> XiResult<RunState> {
        let total = source.total_size();
        let mut parsers: HashMap<usize, UnitParser> = HashMap::new();
        let mut done = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunState::Aborted);
            }
            let Some(packet) = source.next_packet()? else {
                break;
            };
            done += packet.size() as u64;
            match packet.codec {
                Some(codec) if packet.media_type == MediaType::Video => {
                    let parser = parsers
                        .entry(packet.stream_index)
                        .or_insert_with(|| self.unit_parser(codec));
                    if !parse_packet(parser, &packet, &self.builder, &mut self.notifier, &self.cancel) {
                        return Ok(RunState::Aborted);
                    }
                }
                _ => {
                    let hint = StreamHint {
                        media_type: packet.media_type,
                        codec: None,
                        pts: packet.pts,
                    };
                    let outcome =
                        self.builder
                            .add_parsed_unit(packet.stream_index, hint, opaque_unit(&packet));
                    self.notifier.unit_added(outcome);
                }
            }
            if let Some(total) = total {
                self.notifier.progress(done, total);
            }
        }
        Ok(RunState::Completed)
    }
}

/// 按包的封装方式切分并解析; 单元之间被取消时返回 false
fn parse_packet(
    parser: &mut UnitParser,
    packet: &Packet,
    builder: &StreamModelBuilder,
    notifier: &mut Notifier,
    cancel: &CancelToken,
) -> bool {
    let hint = StreamHint {
        media_type: MediaType::Video,
        codec: Some(parser.codec()),
        pts: packet.pts,
    };
    let base = u64::try_from(packet.pos).unwrap_or(0);
    let ranges = match packet.framing {
        Framing::AnnexB => {
            let ranges: Vec<ByteRange> = xi_bitstream::scan_units(&packet.data).collect();
            if ranges.is_empty() {
                notifier.warning(format!(
                    "流 {} 的数据包中没有起始码 ({} 字节)",
                    packet.stream_index,
                    packet.size()
                ));
            }
            ranges
        }
        Framing::LengthPrefixed(size) => {
            match xi_bitstream::split_length_prefixed(&packet.data, size) {
                Ok(ranges) => ranges,
                Err(e) => {
                    let mut unit = opaque_unit(packet);
                    unit.error = Some(e.to_string());
                    unit.node.error = true;
                    let outcome = builder.add_parsed_unit(packet.stream_index, hint, unit);
                    notifier.unit_added(outcome);
                    return true;
                }
            }
        }
        Framing::Raw => vec![ByteRange {
            offset: 0,
            len: packet.size(),
        }],
    };
    for range in ranges {
        if cancel.is_cancelled() {
            return false;
        }
        let unit = parser.parse(base + range.offset as u64, range.slice(&packet.data));
        let outcome = builder.add_parsed_unit(packet.stream_index, hint, unit);
        notifier.unit_added(outcome);
    }
    true
}

/// 超过上限的单元: 记录实际长度并标记错误
fn mark_oversized(unit: &mut ParsedUnit, read: &ReadUnit, max: usize) {
    unit.len = usize::try_from(read.len).unwrap_or(usize::MAX);
    unit.node.error = true;
    if unit.error.is_none() {
        let e = XiError::syntax(
            "unit",
            format!("单元长度 {} 超过上限 {}, 只解析前 {} 字节", read.len, max, max),
        )
        .at_unit(read.offset, None);
        unit.error = Some(e.to_string());
    }
}

/// panic 负载中的文本
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}

/// 不做语法解析的包, 只记录长度
fn opaque_unit(packet: &Packet) -> ParsedUnit {
    let mut node = SyntaxNode::new(format!("{} packet", packet.media_type.name()));
    node.push(SyntaxNode::leaf(
        "payload_length",
        SyntaxValue::Unsigned(packet.size() as u64),
    ));
    ParsedUnit {
        offset: u64::try_from(packet.pos).unwrap_or(0),
        len: packet.size(),
        unit_type: None,
        type_name: node.name.clone(),
        node,
        record: None,
        params: None,
        error: None,
    }
}

/// 根据文件开头的内容探测码流类型
///
/// 开头没有任何起始码时按 H.264 处理, 之后的扫描会报告警告.
fn detect_codec(head: &[u8]) -> XiResult<Codec> {
    if let Some(codec) = Codec::probe(head) {
        return Ok(codec);
    }
    if xi_bitstream::scan_units(head).next().is_none() {
        return Ok(Codec::Avc);
    }
    Err(XiError::Unsupported("无法识别码流类型, 请指定 codec".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::VecPacketSource;

    #[test]
    fn test_notifier_coalesces_when_full() {
        let shared = Arc::new(Shared {
            state: Mutex::new(RunState::Running),
            changed: Condvar::new(),
            progress: AtomicI32::new(0),
        });
        let (tx, rx) = sync_channel(1);
        let mut notifier = Notifier::new(tx, Arc::clone(&shared), Arc::new(AtomicBool::new(false)), 1);
        for done in 1..=10 {
            notifier.progress(done, 10);
        }
        // 通道只容纳第一个进度, 其余合并为最新值
        assert_eq!(rx.try_recv().ok(), Some(ParseEvent::Progress(10)));
        assert_eq!(notifier.pending_progress, Some(100));
        notifier.flush();
        assert_eq!(rx.try_recv().ok(), Some(ParseEvent::Progress(100)));
        assert_eq!(shared.progress.load(Ordering::Relaxed), 100);

        notifier.finish(RunState::Completed, String::new(), 0);
        assert_eq!(shared.state(), RunState::Completed);
        assert_eq!(
            rx.recv().ok(),
            Some(ParseEvent::Finished {
                state: RunState::Completed,
                error: String::new(),
            })
        );
    }

    #[test]
    fn test_progress_sent_only_on_change() {
        let shared = Arc::new(Shared {
            state: Mutex::new(RunState::Running),
            changed: Condvar::new(),
            progress: AtomicI32::new(0),
        });
        let (tx, rx) = sync_channel(16);
        let mut notifier = Notifier::new(tx, shared, Arc::new(AtomicBool::new(false)), 1);
        for done in 0..1000 {
            notifier.progress(done, 1000);
        }
        let events: Vec<ParseEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 16, "通道容量 16, 其余合并");
        let mut last = -1;
        for ev in events {
            let ParseEvent::Progress(p) = ev else {
                panic!("只应有进度通知: {ev:?}");
            };
            assert!(p > last, "进度应单调递增");
            last = p;
        }
    }

    #[test]
    fn test_detect_codec() {
        assert_eq!(detect_codec(&[0, 0, 1, 0x40, 0x01]).unwrap(), Codec::Hevc);
        assert_eq!(detect_codec(&[1, 2, 3]).unwrap(), Codec::Avc);
        assert!(matches!(
            detect_codec(&[0, 0, 1, 0x7F, 0x7F]),
            Err(XiError::Unsupported(_))
        ));
    }

    #[test]
    fn test_packets_with_audio_stream() {
        let mut parser = BackgroundParser::new(AnalyzerConfig::default());
        let rx = parser
            .start_packets(VecPacketSource::new(vec![
                Packet::video(0, Codec::Avc, Framing::AnnexB, vec![0, 0, 1, 0x09, 0x10]),
                Packet::opaque(1, MediaType::Audio, vec![0xAB; 16]).with_pts(0),
                Packet::video(0, Codec::Avc, Framing::LengthPrefixed(4), vec![0, 0, 0, 2, 0x09, 0x30]),
            ]))
            .expect("应能启动");
        let events: Vec<ParseEvent> = rx.iter().collect();
        assert_eq!(parser.wait(), RunState::Completed);
        assert!(matches!(events.last(), Some(ParseEvent::Finished { state: RunState::Completed, .. })));

        let view = parser.view();
        assert_eq!(view.total_units(), 3);
        assert_eq!(view.stream_count(), 2);
        let streams = view.streams();
        assert_eq!(streams[1].media_type, MediaType::Audio);
        assert_eq!(streams[1].byte_count, 16);
        view.show_video_only(true);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_missing_file_fails_with_io_error() {
        let mut parser = BackgroundParser::new(AnalyzerConfig::default());
        let rx = parser.start("/nonexistent/xi/input.264").expect("启动本身应成功");
        let events: Vec<ParseEvent> = rx.iter().collect();
        let finished: Vec<&ParseEvent> = events
            .iter()
            .filter(|e| matches!(e, ParseEvent::Finished { .. }))
            .collect();
        assert_eq!(finished.len(), 1, "应恰好一个终止通知");
        match finished[0] {
            ParseEvent::Finished { state, error } => {
                assert_eq!(*state, RunState::Failed);
                assert!(error.contains("I/O"), "{error}");
            }
            _ => unreachable!(),
        }
        assert!(!parser.is_running());
    }
}
