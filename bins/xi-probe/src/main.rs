//! xi-probe - 码流语法分析命令行工具
//!
//! 在后台线程中分析 H.264 / H.265 / MPEG-2 基本流文件, 输出流信息表、单元列表
//! 以及可选的语法树.

mod logging;

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use log::info;
use serde::Serialize;

use xi_analyzer::{
    AnalyzerConfig, BackgroundParser, ModelView, ParseEvent, RunState, StreamInfo, UnitEntry,
    status_text,
};
use xi_bitstream::Codec;
use xi_bitstream::dispatch;

/// Xi 码流语法分析工具
#[derive(Parser, Debug)]
#[command(name = "xi-probe", version, about = "纯 Rust 视频码流语法分析工具")]
struct Cli {
    /// 输入文件路径 (Annex B 基本流)
    input: Option<PathBuf>,

    /// 指定码流类型, 默认按扩展名或内容探测
    #[arg(short, long, value_enum)]
    codec: Option<CodecArg>,

    /// 分析配置文件 (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 输出每个单元的语法树
    #[arg(long)]
    tree: bool,

    /// 语法树最大深度
    #[arg(long)]
    depth: Option<usize>,

    /// 只输出指定流的单元
    #[arg(long)]
    stream: Option<usize>,

    /// 只输出视频流的单元
    #[arg(long)]
    video_only: bool,

    /// 不记录逐字段语法树, 只保留单元摘要
    #[arg(long)]
    no_trace: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 列出支持的单元类型与解析器
    #[arg(long)]
    list_parsers: bool,

    /// 静默模式 (不显示进度)
    #[arg(short, long)]
    quiet: bool,

    /// 日志目录
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    #[value(alias = "h264")]
    Avc,
    #[value(alias = "h265")]
    Hevc,
    #[value(alias = "mpeg2video")]
    Mpeg2,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Avc => Codec::Avc,
            CodecArg::Hevc => Codec::Hevc,
            CodecArg::Mpeg2 => Codec::Mpeg2,
        }
    }
}

// ============================================================
// JSON 输出结构体
// ============================================================

#[derive(Serialize)]
struct ProbeOutput<'a> {
    filename: String,
    state: String,
    streams: &'a [StreamInfo],
    units: &'a [UnitEntry],
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_dir, "xi-probe", cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if cli.list_parsers {
        print_parsers();
        return;
    }

    let Some(input) = cli.input.clone() else {
        print_banner();
        return;
    };

    if let Err(e) = run(&cli, &input) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli, input: &Path) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let mut parser = BackgroundParser::new(config);
    let events = parser
        .start(input)
        .with_context(|| format!("无法开始分析 '{}'", input.display()))?;

    let show_progress = !cli.quiet && std::io::stderr().is_terminal();
    let mut finished = None;
    for event in events.iter() {
        match event {
            ParseEvent::Progress(p) if show_progress => {
                eprint!("\r{}", status_text(p, None));
                std::io::stderr().flush().ok();
            }
            ParseEvent::ScanWarning(message) => {
                if !cli.quiet {
                    eprintln!("\n警告: {message}");
                }
            }
            ParseEvent::Finished { state, error } => {
                finished = Some((state, error));
            }
            _ => {}
        }
    }
    if show_progress {
        eprintln!();
    }

    let (state, error) = finished.unwrap_or_else(|| (parser.wait(), String::new()));
    match state {
        RunState::Failed => bail!("{}", status_text(-1, Some(&error))),
        RunState::Aborted => bail!("分析被中止"),
        _ => {}
    }

    let view = parser.view();
    if cli.video_only {
        view.show_video_only(true);
    } else if let Some(stream) = cli.stream {
        view.set_filter_stream_index(stream as i64);
    }
    info!(
        "{}: {} 个单元, {} 条流",
        input.display(),
        view.total_units(),
        view.stream_count()
    );

    if cli.json {
        print_json(cli, input, state, &view)
    } else {
        print_text(cli, &view);
        Ok(())
    }
}

/// 读取配置文件并应用命令行覆盖
fn load_config(cli: &Cli) -> anyhow::Result<AnalyzerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("无法读取配置文件 '{}'", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("配置文件格式错误 '{}'", path.display()))?
        }
        None => AnalyzerConfig::default(),
    };
    if let Some(codec) = cli.codec {
        config.codec = Some(codec.into());
    }
    if cli.no_trace {
        config.trace_fields = false;
    }
    config.validate()?;
    Ok(config)
}

fn print_json(cli: &Cli, input: &Path, state: RunState, view: &ModelView) -> anyhow::Result<()> {
    let streams = view.streams();
    let mut units = view.units();
    if !cli.tree {
        for unit in &mut units {
            unit.node.children.clear();
        }
    }
    let output = ProbeOutput {
        filename: input.display().to_string(),
        state: format!("{state:?}"),
        streams: &streams,
        units: &units,
    };
    let json = serde_json::to_string_pretty(&output).context("序列化分析结果失败")?;
    println!("{json}");
    Ok(())
}

fn print_text(cli: &Cli, view: &ModelView) {
    for stream in view.streams() {
        print_stream(&stream);
    }

    println!("[UNITS]");
    for unit in view.units() {
        let mark = if unit.error.is_some() { " !" } else { "" };
        println!(
            "  #{:<6} @{:<10} {:>8} B  {:<12} {}{}",
            unit.index, unit.offset, unit.len, unit.type_name, unit.summary, mark
        );
        if let Some(error) = &unit.error {
            println!("           {error}");
        }
        if cli.tree {
            let mut tree = String::new();
            if unit.node.write_tree(&mut tree, 2, cli.depth.map(|d| d + 2)).is_ok() {
                print!("{tree}");
            }
        }
    }
    println!("[/UNITS]");
}

/// 文本输出: 流信息
fn print_stream(stream: &StreamInfo) {
    println!("[STREAM #{}]", stream.index);
    println!("  类型         : {}", stream.media_type);
    println!("  编码         : {}", stream.codec_name);
    println!("  单元数       : {}", stream.unit_count);
    println!("  字节数       : {}", stream.byte_count);
    if stream.error_count > 0 {
        println!("  错误单元     : {}", stream.error_count);
    }
    if let Some((w, h)) = stream.resolution {
        println!("  分辨率       : {w}x{h}");
    }
    if let Some(profile) = &stream.profile {
        println!("  档次@级别    : {profile}");
    }
    if let Some(rate) = stream.frame_rate {
        println!("  帧率         : {rate} ({:.3} fps)", rate.to_f64());
    }
    if stream.picture_count > 0 {
        println!("  图像数       : {}", stream.picture_count);
    }
    if let Some(secs) = stream.duration_secs() {
        println!("  时长         : {secs:.3} 秒");
    }
    if let Some(br) = stream.bit_rate() {
        println!("  码率         : {} kbps", br / 1000);
    }
    println!("[/STREAM]");
    println!();
}

fn print_parsers() {
    for codec in [Codec::Avc, Codec::Hevc, Codec::Mpeg2] {
        println!("{codec}:");
        for entry in dispatch::entries(codec) {
            if entry.first_type == entry.last_type {
                println!("  {:>#6x}          {}", entry.first_type, entry.name);
            } else {
                println!(
                    "  {:>#6x}..={:<#6x}  {}",
                    entry.first_type, entry.last_type, entry.name
                );
            }
        }
    }
}

fn print_banner() {
    println!(
        "xi-probe 版本 {} -- 纯 Rust 视频码流语法分析工具",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("用法: xi-probe [选项] <输入文件>");
    println!("      xi-probe --list-parsers");
    println!();
    println!("使用 --help 查看全部选项");
}
