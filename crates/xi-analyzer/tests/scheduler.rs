//! 后台解析调度集成测试

use std::path::PathBuf;
use std::sync::mpsc;

use tempfile::TempDir;
use xi_analyzer::{
    AnalyzerConfig, BackgroundParser, Framing, Packet, PacketSource, ParseEvent, RunState,
    VecPacketSource,
};
use xi_bitstream::Codec;
use xi_bitstream::scan::insert_emulation_prevention;
use xi_core::bitwriter::BitWriter;
use xi_core::{XiError, XiResult};

// ============================================================
// 测试数据
// ============================================================

/// 352x288 Baseline@3.0 SPS 单元 (含 NAL 头, 已插入防竞争字节)
fn baseline_sps() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(66, 8); // profile_idc
    bw.write_bits(0, 8);
    bw.write_bits(30, 8); // level_idc
    bw.write_ue(0); // seq_parameter_set_id
    bw.write_ue(0); // log2_max_frame_num_minus4
    bw.write_ue(2); // pic_order_cnt_type
    bw.write_ue(1); // max_num_ref_frames
    bw.write_flag(false);
    bw.write_ue(21); // 352
    bw.write_ue(17); // 288
    bw.write_flag(true); // frame_mbs_only_flag
    bw.write_flag(false);
    bw.write_flag(false); // frame_cropping_flag
    bw.write_flag(false); // vui_parameters_present_flag
    bw.write_trailing_bits();
    let mut unit = vec![0x67];
    unit.extend(insert_emulation_prevention(&bw.finish()));
    unit
}

fn baseline_pps() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(0); // pic_parameter_set_id
    bw.write_ue(0); // seq_parameter_set_id
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_bits(0, 2);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_flag(true);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_trailing_bits();
    let mut unit = vec![0x68];
    unit.extend(insert_emulation_prevention(&bw.finish()));
    unit
}

/// HEVC SPS, 亮度宽高都是 2^30, 其余语法合法
fn hevc_oversized_sps() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(0, 4); // sps_video_parameter_set_id
    bw.write_bits(0, 3); // sps_max_sub_layers_minus1
    bw.write_flag(true);
    // profile_tier_level: Main, level 3.1
    bw.write_bits(0, 2);
    bw.write_flag(false);
    bw.write_bits(1, 5);
    bw.write_bits(0x6000_0000, 32);
    bw.write_bits(0b1001, 4);
    bw.write_bits(0, 32);
    bw.write_bits(0, 12);
    bw.write_bits(93, 8);
    bw.write_ue(0); // sps_seq_parameter_set_id
    bw.write_ue(1); // chroma_format_idc
    bw.write_ue(0x4000_0000); // pic_width_in_luma_samples
    bw.write_ue(0x4000_0000); // pic_height_in_luma_samples
    bw.write_trailing_bits();
    let mut unit = vec![0x42, 0x01];
    unit.extend(insert_emulation_prevention(&bw.finish()));
    unit
}

fn hevc_pps() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_bits(0, 3);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_ue(0);
    bw.write_ue(0);
    bw.write_se(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_se(0);
    bw.write_se(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_flag(false); // tiles_enabled_flag
    bw.write_flag(false);
    bw.write_flag(true);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_ue(0);
    bw.write_flag(false);
    bw.write_flag(false);
    bw.write_trailing_bits();
    let mut unit = vec![0x44, 0x01];
    unit.extend(insert_emulation_prevention(&bw.finish()));
    unit
}

/// TRAIL_R slice 段, 非图像内第一个
fn hevc_trailing_slice() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_flag(false); // first_slice_segment_in_pic_flag
    bw.write_ue(0); // slice_pic_parameter_set_id
    bw.write_bits(0, 32);
    bw.write_trailing_bits();
    let mut unit = vec![0x02, 0x01];
    unit.extend(insert_emulation_prevention(&bw.finish()));
    unit
}

/// 用 3 字节起始码拼接单元
fn annex_b(units: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    for unit in units {
        data.extend_from_slice(&[0x00, 0x00, 0x01]);
        data.extend_from_slice(unit);
    }
    data
}

fn write_input(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).expect("写入测试输入失败");
    path
}

fn finished_events(events: &[ParseEvent]) -> Vec<(RunState, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ParseEvent::Finished { state, error } => Some((*state, error.clone())),
            _ => None,
        })
        .collect()
}

/// 读取时 panic 的数据包来源
struct PanickingSource;

impl PacketSource for PanickingSource {
    fn next_packet(&mut self) -> XiResult<Option<Packet>> {
        panic!("数据包来源损坏");
    }
}

/// 阻塞式数据包来源, 由测试线程逐个送入
struct ChannelSource(mpsc::Receiver<Packet>);

impl PacketSource for ChannelSource {
    fn next_packet(&mut self) -> XiResult<Option<Packet>> {
        Ok(self.0.recv().ok())
    }
}

fn aud_packet() -> Packet {
    Packet::video(0, Codec::Avc, Framing::AnnexB, vec![0, 0, 0, 1, 0x09, 0x10])
}

// ============================================================
// 文件输入
// ============================================================

#[test]
fn test_sps_pps_file_builds_two_units() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = write_input(&dir, "sps_pps.264", &annex_b(&[baseline_sps(), baseline_pps()]));

    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start(&path).expect("应能启动");
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(parser.wait(), RunState::Completed);
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);

    let view = parser.view();
    let units = view.units();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].unit_type, Some(7));
    assert_eq!(units[0].type_name, "SPS");
    assert_eq!(units[0].node.uint("profile_idc"), Some(66));
    assert_eq!(units[0].node.uint("pic_width_in_mbs_minus1"), Some(21));
    assert_eq!(units[1].unit_type, Some(8));
    assert_eq!(units[1].type_name, "PPS");
    assert_eq!(units[1].node.uint("pic_parameter_set_id"), Some(0));
    assert!(units.iter().all(|u| u.error.is_none()));

    let streams = view.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].unit_count, 2);
    assert_eq!(streams[0].resolution, Some((352, 288)));
    assert_eq!(streams[0].profile.as_deref(), Some("Baseline@3.0"));
}

#[test]
fn test_truncated_unit_does_not_fail_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    // seq_parameter_set_id 的 Exp-Golomb 码缺少后缀位
    let truncated = vec![0x67, 0x42, 0x00, 0x1E, 0x01];
    let path = write_input(&dir, "truncated.264", &annex_b(&[baseline_sps(), truncated]));

    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start(&path).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);

    let view = parser.view();
    assert_eq!(view.streams()[0].unit_count, 2);
    assert_eq!(view.streams()[0].error_count, 1);
    let units = view.units();
    assert!(!units[0].node.has_error());
    assert!(units[0].node.node_count() > 10, "第一个单元应完整解析");
    assert!(units[1].node.has_error());
    assert!(units[1].error.is_some());
}

#[test]
fn test_exactly_one_finished_and_progress_monotonic() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let mut units = vec![baseline_sps(), baseline_pps()];
    units.extend((0..40).map(|_| vec![0x09, 0x10]));
    let path = write_input(&dir, "many.h264", &annex_b(&units));

    let config = AnalyzerConfig {
        read_chunk_size: 16,
        model_batch_size: 4,
        ..AnalyzerConfig::default()
    };
    let mut parser = BackgroundParser::new(config);
    let rx = parser.start(&path).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();

    assert_eq!(finished_events(&events).len(), 1);
    assert!(matches!(events.last(), Some(ParseEvent::Finished { .. })), "Finished 应是最后一个通知");

    let progress: Vec<i32> = events
        .iter()
        .filter_map(|e| match e {
            ParseEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "进度应单调递增: {progress:?}");
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(parser.progress(), 100);

    let last_total = events.iter().rev().find_map(|e| match e {
        ParseEvent::ModelUpdated { total_units } => Some(*total_units),
        _ => None,
    });
    assert_eq!(last_total, Some(42));
    assert!(events.contains(&ParseEvent::StreamsUpdated));
}

#[test]
fn test_no_start_code_warns_and_completes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = write_input(&dir, "noise.bin", &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);

    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start(&path).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();

    assert!(events.iter().any(|e| matches!(e, ParseEvent::ScanWarning(_))));
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);
    let view = parser.view();
    assert_eq!(view.stream_count(), 0);
    assert!(view.is_empty());
}

#[test]
fn test_restart_yields_fresh_model() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let first = write_input(&dir, "a.264", &annex_b(&[baseline_sps(), baseline_pps()]));
    let second = write_input(&dir, "b.264", &annex_b(&[vec![0x09, 0x10]]));

    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let view = parser.view();
    let rx = parser.start(&first).unwrap();
    rx.iter().for_each(drop);
    assert_eq!(view.total_units(), 2);

    let rx = parser.start(&second).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events).len(), 1);
    assert_eq!(view.total_units(), 1);
    assert_eq!(view.unit(0).map(|u| u.type_name), Some("AUD".to_string()));
    assert!(view.streams()[0].resolution.is_none());
}

#[test]
fn test_oversized_hevc_picture_isolated_per_unit() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let data = annex_b(&[hevc_oversized_sps(), hevc_pps(), hevc_trailing_slice()]);
    let path = write_input(&dir, "huge.265", &data);

    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start(&path).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);
    assert_eq!(parser.wait(), RunState::Completed);

    let view = parser.view();
    let units = view.units();
    assert_eq!(units.len(), 3);
    let sps_error = units[0].error.as_deref().expect("超大尺寸的 SPS 应报错");
    assert!(sps_error.contains("pic_width_in_luma_samples"), "{sps_error}");
    assert!(units[1].error.is_none());
    assert!(units[2].error.is_some(), "SPS 无效时 slice 应报错");
    assert_eq!(view.streams()[0].error_count, 2);
}

#[test]
fn test_oversized_unit_capped_while_reading() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let mut filler = vec![0x0C];
    filler.extend(std::iter::repeat_n(0xFF, 5000));
    filler.push(0x80);
    let path = write_input(
        &dir,
        "filler.264",
        &annex_b(&[baseline_sps(), filler, vec![0x09, 0x10]]),
    );

    let config = AnalyzerConfig {
        read_chunk_size: 64,
        max_unit_size: 256,
        ..AnalyzerConfig::default()
    };
    let mut parser = BackgroundParser::new(config);
    let rx = parser.start(&path).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);

    let view = parser.view();
    let units = view.units();
    assert_eq!(units.len(), 3);
    assert_eq!(units[1].len, 5002, "应记录单元的实际长度");
    let error = units[1].error.as_deref().expect("超长单元应标记错误");
    assert!(error.contains("超过上限"), "{error}");
    assert!(units[1].node.has_error());
    assert_eq!(units[2].type_name, "AUD");
    assert!(units[2].error.is_none());
    assert_eq!(view.streams()[0].error_count, 1);
}

// ============================================================
// 数据包输入
// ============================================================

#[test]
fn test_scan_warning_sent_once_per_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let packets = (0..5)
        .map(|i| Packet::video(0, Codec::Avc, Framing::AnnexB, vec![0x11 + i, 0x22, 0x33, 0x44]))
        .collect();
    let config = AnalyzerConfig {
        channel_capacity: 1,
        ..AnalyzerConfig::default()
    };
    let mut parser = BackgroundParser::new(config);
    let rx = parser.start_packets(VecPacketSource::new(packets)).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();

    let warnings: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            ParseEvent::ScanWarning(message) => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(warnings.len(), 1, "每次运行只应有一条扫描警告: {warnings:?}");
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);
}

#[test]
fn test_panic_in_worker_finishes_as_failed() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start_packets(PanickingSource).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();

    let finished = finished_events(&events);
    assert_eq!(finished.len(), 1, "应恰好一个终止通知");
    assert_eq!(finished[0].0, RunState::Failed);
    assert!(finished[0].1.contains("数据包来源损坏"), "{}", finished[0].1);
    assert_eq!(parser.wait(), RunState::Failed);
    assert!(!parser.is_running());
}

// ============================================================
// 取消与状态
// ============================================================

#[test]
fn test_abort_while_running() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (tx, source_rx) = mpsc::channel();
    tx.send(aud_packet()).unwrap();

    let config = AnalyzerConfig {
        model_batch_size: 1,
        ..AnalyzerConfig::default()
    };
    let mut parser = BackgroundParser::new(config);
    let rx = parser.start_packets(ChannelSource(source_rx)).unwrap();

    // 第一个包已处理, 工作线程阻塞在读取下一个包
    loop {
        match rx.recv().expect("运行结束前通道不应断开") {
            ParseEvent::ModelUpdated { total_units } if total_units >= 1 => break,
            _ => {}
        }
    }
    assert!(parser.is_running());
    assert_eq!(parser.state(), RunState::Running);

    parser.request_abort();
    tx.send(aud_packet()).unwrap();
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events), vec![(RunState::Aborted, String::new())]);
    assert_eq!(parser.wait(), RunState::Aborted);
    assert!(!parser.is_running());
    // 取消之前的单元保留, 取消之后送入的包不再追加
    assert_eq!(parser.view().total_units(), 1);
}

#[test]
fn test_start_while_running_is_invalid_state() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (tx, source_rx) = mpsc::channel();
    let mut parser = BackgroundParser::new(AnalyzerConfig::default());
    let rx = parser.start_packets(ChannelSource(source_rx)).unwrap();

    let second = parser.start("/nonexistent/other.264");
    assert!(matches!(second, Err(XiError::InvalidState(_))));

    // 关闭来源后第一次运行正常结束
    drop(tx);
    let events: Vec<ParseEvent> = rx.iter().collect();
    assert_eq!(finished_events(&events), vec![(RunState::Completed, String::new())]);
    assert_eq!(parser.wait(), RunState::Completed);
}

#[test]
fn test_drop_while_running_does_not_hang() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let units: Vec<Vec<u8>> = (0..500).map(|_| vec![0x09, 0x10]).collect();
    let path = write_input(&dir, "long.264", &annex_b(&units));

    let config = AnalyzerConfig {
        channel_capacity: 1,
        model_batch_size: 1,
        ..AnalyzerConfig::default()
    };
    let mut parser = BackgroundParser::new(config);
    let rx = parser.start(&path).unwrap();
    // 不读取通知, 直接释放解析器
    drop(parser);
    drop(rx);
}
