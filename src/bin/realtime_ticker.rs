//! 实时节拍器
//!
//! 实时模式演示：仿真内部周期性 tick，另一个线程通过 `RealtimeHandle`
//! 在墙钟驱动下投递外部事件。

use clap::Parser;
use evsim_rs::sim::{Context, Event, EventResult, SimConfig, SimTime, Simulator, SyncMode, World};
use std::any::Any;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

const TICK_CONTEXT: Context = Context(0);
const PRODUCER_CONTEXT: Context = Context(1);

#[derive(Debug, Parser)]
#[command(
    name = "realtime-ticker",
    about = "Realtime scheduler demo: periodic ticks plus events injected from another thread"
)]
struct Args {
    /// Logical seconds per wall-clock second
    #[arg(long, default_value_t = 1.0)]
    rate: f64,
    /// Tick period (logical ms)
    #[arg(long, default_value_t = 100)]
    tick_ms: i64,
    /// Number of ticks
    #[arg(long, default_value_t = 10)]
    ticks: u32,
    /// Number of events injected by the producer thread
    #[arg(long, default_value_t = 3)]
    inject: u32,
    /// Wall-clock gap between injected events (ms)
    #[arg(long, default_value_t = 150)]
    inject_interval_ms: u64,
    /// Fail when dispatch lags more than this many ms (default: best effort)
    #[arg(long)]
    hard_limit_ms: Option<u64>,
}

struct Record {
    what: String,
    at: SimTime,
    context: Context,
    wall: Duration,
}

struct TickerWorld {
    started: Instant,
    records: Vec<Record>,
}

impl TickerWorld {
    fn record(&mut self, what: String, at: SimTime, context: Context) {
        let wall = self.started.elapsed();
        self.records.push(Record {
            what,
            at,
            context,
            wall,
        });
    }
}

impl World for TickerWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn ticker_world(world: &mut dyn World) -> Result<&mut TickerWorld, &'static str> {
    world
        .as_any_mut()
        .downcast_mut::<TickerWorld>()
        .ok_or("world must be TickerWorld")
}

/// 周期 tick：执行后按 `period` 调度下一次，直到 `remaining` 用完。
struct Tick {
    n: u32,
    remaining: u32,
    period: SimTime,
}

impl Event for Tick {
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult {
        let me = *self;
        ticker_world(world)?.record(format!("tick {}", me.n), sim.now(), cx);
        if me.remaining > 1 {
            // 继承当前上下文
            sim.schedule(
                me.period,
                Tick {
                    n: me.n + 1,
                    remaining: me.remaining - 1,
                    period: me.period,
                },
            )?;
        }
        Ok(())
    }
}

struct Injected {
    k: u32,
}

impl Event for Injected {
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult {
        ticker_world(world)?.record(format!("inject {}", self.k), sim.now(), cx);
        Ok(())
    }
}

fn main() -> ExitCode {
    // 初始化 tracing
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
    let sync = match args.hard_limit_ms {
        Some(limit_ms) => SyncMode::HardLimit { limit_ms },
        None => SyncMode::BestEffort,
    };

    let mut sim = match Simulator::new(SimConfig::realtime(args.rate, sync)) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let mut world = TickerWorld {
        started: Instant::now(),
        records: Vec::new(),
    };

    if args.ticks > 0 {
        let first = Tick {
            n: 1,
            remaining: args.ticks,
            period: SimTime::from_millis(args.tick_ms),
        };
        let period = SimTime::from_millis(args.tick_ms);
        if let Err(e) = sim.schedule_with_context(TICK_CONTEXT, period, first) {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    }

    let handle = match sim.realtime_handle() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let inject = args.inject;
    let gap = Duration::from_millis(args.inject_interval_ms);
    let producer = thread::spawn(move || {
        for k in 1..=inject {
            thread::sleep(gap);
            if handle
                .schedule_with_context(PRODUCER_CONTEXT, SimTime::ZERO, Injected { k })
                .is_err()
            {
                break;
            }
        }
        // handle 在此释放；队列清空后 run 随之返回
    });

    let outcome = sim.run(&mut world);
    if producer.join().is_err() {
        eprintln!("error: producer thread panicked");
    }

    for r in &world.records {
        let ideal = r.at.as_secs_f64() / args.rate;
        let lag_ms = (r.wall.as_secs_f64() - ideal) * 1e3;
        println!(
            "{} at={} ctx={} wall_ms={:.3} lag_ms={lag_ms:.3}",
            r.what,
            r.at,
            r.context,
            r.wall.as_secs_f64() * 1e3
        );
    }
    println!("done @ {}, dispatched={}", sim.now(), sim.event_count());

    let outcome = outcome.and_then(|()| sim.destroy(&mut world));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
