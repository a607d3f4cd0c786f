use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use execscan_core::{scan, write_report_json, ScanConfig, ScanReport, ScanStatus, SignatureDatabase};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod progress;

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "execscan", version, about = "本机脚本执行器检测")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 执行一次完整扫描（文件 → 进程 → 注册表）
    Scan(ScanArgs),
    /// 列出内置签名库
    Signatures,
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// 配置文件（TOML），命令行参数覆盖其中的值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 整次扫描的时间上限（秒）
    #[arg(long)]
    global_timeout: Option<f64>,

    /// 进程阶段预算（秒）
    #[arg(long)]
    process_timeout: Option<f64>,

    /// 注册表阶段预算（秒）
    #[arg(long)]
    registry_timeout: Option<f64>,

    /// 文件阶段预算（秒），默认只受全局超时约束
    #[arg(long)]
    file_timeout: Option<f64>,

    /// 每个自启动键最多枚举的值数
    #[arg(long)]
    max_registry_values: Option<usize>,

    /// 自启动匹配使用的前 N 个签名条目
    #[arg(long)]
    common_entries: Option<usize>,

    /// 三个阶段并发执行
    #[arg(long)]
    concurrent: bool,

    /// 额外的候选搜索目录（可重复）
    #[arg(long = "search-dir")]
    search_dirs: Vec<PathBuf>,

    /// 将 JSON 报告写入文件
    #[arg(long)]
    output: Option<PathBuf>,

    /// 以 JSON 输出到标准输出（替代文本摘要）
    #[arg(long)]
    json: bool,

    /// 输出 debug 级别日志
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let verbose = matches!(&cli.command, Commands::Scan(args) if args.verbose);
    init_tracing(verbose);

    match cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::Signatures => {
            list_signatures()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_scan(args: ScanArgs) -> Result<ExitCode> {
    let config = build_config(&args)?;
    info!(
        global_timeout_s = config.global_timeout_secs.as_secs_f64(),
        concurrent = config.concurrent,
        "starting scan"
    );

    // 核心只做 try_send，通道满时丢弃事件而不是阻塞扫描
    let (tx, rx) = crossbeam_channel::bounded(256);
    let bar = progress::spawn(rx, !args.json);
    let report = scan(&config, Arc::new(tx));
    if bar.join().is_err() {
        warn!("progress display thread panicked");
    }

    if let Some(path) = &args.output {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        write_report_json(&report, &mut out).context("write json report")?;
        out.flush().context("flush json report")?;
        info!(path = %path.display(), "report written");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        write_report_json(&report, &mut out).context("write json report")?;
    } else {
        print_summary(&report, &mut out)?;
    }
    out.flush().ok();

    Ok(exit_code(&report))
}

/// 配置文件（若有）→ 命令行覆盖 → 校验
fn build_config(args: &ScanArgs) -> Result<ScanConfig> {
    let mut config = match &args.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };

    if let Some(v) = args.global_timeout {
        config.global_timeout_secs = seconds("--global-timeout", v)?;
    }
    if let Some(v) = args.process_timeout {
        config.process_timeout_secs = seconds("--process-timeout", v)?;
    }
    if let Some(v) = args.registry_timeout {
        config.registry_timeout_secs = seconds("--registry-timeout", v)?;
    }
    if let Some(v) = args.file_timeout {
        config.file_timeout_secs = Some(seconds("--file-timeout", v)?);
    }
    if let Some(n) = args.max_registry_values {
        config.max_registry_enum_values = n;
    }
    if let Some(n) = args.common_entries {
        config.common_entry_limit = n;
    }
    if args.concurrent {
        config.concurrent = true;
    }
    config.search_dirs.extend(args.search_dirs.iter().cloned());

    config.validate()?;
    Ok(config)
}

fn seconds(flag: &str, value: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(d) => Ok(d),
        Err(_) => bail!("{flag} expects a non-negative number of seconds, got {value}"),
    }
}

fn print_summary(report: &ScanReport, out: &mut dyn Write) -> Result<()> {
    let status = match report.status {
        ScanStatus::CompletedFull => "complete",
        ScanStatus::CompletedPartial => "PARTIAL (time limit reached or a phase failed)",
        ScanStatus::Aborted => "ABORTED",
        ScanStatus::Idle | ScanStatus::Running => "unfinished",
    };
    writeln!(out, "scan status: {status}")?;
    if let Some(err) = &report.error {
        writeln!(out, "error: {err}")?;
    }

    for phase in &report.phases {
        let mut note = String::new();
        if phase.timed_out {
            note.push_str(" [timed out]");
        }
        if phase.autorun_skipped && !phase.timed_out {
            note.push_str(" [autorun check skipped]");
        }
        if let Some(err) = &phase.error {
            note.push_str(&format!(" [{err}]"));
        }
        writeln!(
            out,
            "  {:<8} {}/{} checked, {} found{note}",
            phase.phase.label(), phase.items_checked, phase.items_total, phase.found
        )?;
    }

    if report.detections.is_empty() {
        writeln!(out, "no executors detected")?;
    } else {
        writeln!(out, "detected {} executor(s):", report.total_found)?;
        for d in &report.detections {
            writeln!(out, "  - {d}")?;
        }
    }
    if report.is_partial() && report.status != ScanStatus::Aborted {
        writeln!(out, "results are PARTIAL: tools may have been missed")?;
    }
    writeln!(out, "elapsed: {:.2}s", report.elapsed.as_secs_f64())?;
    Ok(())
}

fn list_signatures() -> Result<()> {
    let db = SignatureDatabase::load().context("load bundled signatures")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (idx, entry) in db.entries().iter().enumerate() {
        writeln!(
            out,
            "{:>3}. {:<20} files={} patterns={} hashes={} folders={} registry={} processes={}",
            idx + 1,
            entry.name,
            entry.file_names.len(),
            entry.name_patterns.len(),
            entry.content_hashes.len(),
            entry.folder_names.len(),
            entry.registry_paths.len(),
            entry.process_names.len(),
        )?;
    }
    writeln!(out, "{} signatures", db.count())?;
    Ok(())
}

/// 0 = 未发现，1 = 发现执行器，2 = 扫描中止
fn exit_code(report: &ScanReport) -> ExitCode {
    match report.status {
        ScanStatus::Aborted => ExitCode::from(2),
        _ if report.total_found > 0 => ExitCode::from(1),
        _ => ExitCode::SUCCESS,
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    // RUST_LOG 优先；否则 --verbose 决定 debug / info
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
