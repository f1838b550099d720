//! 场景轨迹
//!
//! 读取 scenario.json，在调度器上运行并打印事件分发顺序。

use clap::Parser;
use evsim_rs::scenario::{ScenarioSpec, TraceKind, run_scenario};
use evsim_rs::sim::{SimConfig, SimTime, SyncMode};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "schedule-trace",
    about = "Run a scenario.json on the evsim-rs scheduler and print the dispatch trace"
)]
struct Args {
    /// Path to scenario.json
    #[arg(long)]
    scenario: PathBuf,

    /// Pace dispatch against the wall clock
    #[arg(long)]
    realtime: bool,

    /// Logical seconds per wall-clock second in realtime mode
    #[arg(long, default_value_t = 1.0)]
    rate: f64,

    /// Fail when realtime dispatch lags more than this many ms (default: best effort)
    #[arg(long)]
    hard_limit_ms: Option<u64>,

    /// Override the stop deadline (ms)
    #[arg(long)]
    stop_ms: Option<f64>,

    /// Override: run until this time (ms)
    #[arg(long)]
    until_ms: Option<f64>,

    /// Print the full report as JSON instead of trace lines
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    // 初始化 tracing（输出到 stderr，stdout 只留轨迹）
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut spec = match ScenarioSpec::from_json_file(&args.scenario) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.realtime {
        let sync = match args.hard_limit_ms {
            Some(limit_ms) => SyncMode::HardLimit { limit_ms },
            None => SyncMode::BestEffort,
        };
        let resolution = spec.config.as_ref().map(|c| c.resolution).unwrap_or_default();
        spec.config = Some(SimConfig::realtime(args.rate, sync).with_resolution(resolution));
    }
    if args.stop_ms.is_some() {
        spec.stop_ms = args.stop_ms;
    }
    if args.until_ms.is_some() {
        spec.until_ms = args.until_ms;
    }

    let report = match run_scenario(&spec) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(2);
            }
        }
    } else {
        for entry in &report.trace {
            let kind = match entry.kind {
                TraceKind::Fired => "fire",
                TraceKind::Destroyed => "destroy",
            };
            let ctx = entry
                .context
                .map_or_else(|| "none".to_string(), |c| c.to_string());
            println!(
                "{kind} at={} ctx={ctx} label={} wall_us={}",
                SimTime::from_nanos(entry.at_ns),
                entry.label,
                entry.wall_us
            );
        }
        println!(
            "done @ {}, dispatched={}, pending={}",
            SimTime::from_nanos(report.final_time_ns),
            report.dispatched,
            report.pending_after_run
        );
    }

    match report.error {
        Some(msg) => {
            eprintln!("error: {msg}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}
