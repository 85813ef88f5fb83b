//! stuckwatch - stuck/hogging work detector
//!
//! Operator entry point: inspect the effective configuration or drive a
//! synthetic workload through the monitor.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use stuckwatch_core::{Monitor, MonitorConfig, MonitorReport, Sweeper, TracingListener, WorkId};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stuckwatch")]
#[command(version, about = "Detect stuck and hogging units of work")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration (environment + defaults) as JSON
    Config,

    /// Run a synthetic workload through the monitor and print the final report
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug, Clone)]
struct SimulateArgs {
    /// Worker threads
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Duration of a normal unit of work, in milliseconds
    #[arg(long, default_value_t = 20)]
    fast_ms: u64,

    /// Duration of a slow unit of work, in milliseconds
    #[arg(long, default_value_t = 3_500)]
    slow_ms: u64,

    /// Every K-th unit of work per worker is slow (0 disables)
    #[arg(long, default_value_t = 25)]
    slow_every: u64,

    /// How long workers keep submitting work
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    /// Override HOGGING_THRESHOLD_SECONDS
    #[arg(long)]
    hogging_secs: Option<i64>,

    /// Override STUCK_THRESHOLD_SECONDS (<= 0 disables monitoring)
    #[arg(long)]
    stuck_secs: Option<i64>,

    /// Sweep cadence in milliseconds (defaults to SWEEP_INTERVAL_SECONDS)
    #[arg(long)]
    sweep_ms: Option<u64>,
}

impl SimulateArgs {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(h) = self.hogging_secs {
            config.hogging_threshold_secs = h;
        }
        if let Some(s) = self.stuck_secs {
            config.stuck_threshold_secs = s;
        }
    }

    fn sweep_interval(&self, config: &MonitorConfig) -> Duration {
        self.sweep_ms.map_or_else(
            || Duration::from_secs(config.sweep_interval_secs),
            Duration::from_millis,
        )
    }

    const fn is_slow(&self, seq: u64) -> bool {
        self.slow_every > 0 && seq % self.slow_every == self.slow_every - 1
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = MonitorConfig::from_env();
    if let Commands::Simulate(args) = &cli.command {
        args.apply(&mut config);
    }

    if let Err(err) = validate(&config, &cli.command) {
        eprintln!("Error: {err}");
        std::process::exit(2);
    }

    let result = match cli.command {
        Commands::Config => print_json(&config),
        Commands::Simulate(args) => simulate(config, &args).and_then(|report| {
            eprintln!("{}", report.summary_line());
            print_json(&report)
        }),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, error_type = err.error_type(), "stuckwatch failed");
        std::process::exit(1);
    }
}

fn validate(config: &MonitorConfig, command: &Commands) -> stuckwatch_core::Result<()> {
    config.validate()?;
    if let Commands::Simulate(args) = command {
        if args.workers == 0 {
            return Err(stuckwatch_core::Error::InvalidConfig(
                "--workers must be greater than 0".into(),
            ));
        }
        if args.sweep_ms == Some(0) {
            return Err(stuckwatch_core::Error::InvalidConfig(
                "--sweep-ms must be greater than 0".into(),
            ));
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> stuckwatch_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn simulate(config: MonitorConfig, args: &SimulateArgs) -> stuckwatch_core::Result<MonitorReport> {
    let interval = args.sweep_interval(&config);
    let monitor = Arc::new(
        Monitor::builder(config)
            .listener(Arc::new(TracingListener))
            .build(),
    );
    let mut sweeper = Sweeper::start(Arc::clone(&monitor), interval)?;

    tracing::info!(
        workers = args.workers,
        fast_ms = args.fast_ms,
        slow_ms = args.slow_ms,
        slow_every = args.slow_every,
        duration_secs = args.duration_secs,
        enabled = monitor.is_enabled(),
        "simulation started"
    );

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    std::thread::scope(|s| {
        for worker in 0..args.workers {
            let monitor = &monitor;
            s.spawn(move || {
                let mut seq = 0u64;
                while Instant::now() < deadline {
                    let slow = args.is_slow(seq);
                    let (path, ms) = if slow {
                        ("GET /reports/slow", args.slow_ms)
                    } else {
                        ("GET /items", args.fast_ms)
                    };
                    let descriptor = format!("{path} worker={worker} seq={seq}");
                    monitor.track(WorkId::current_thread(), descriptor, || {
                        std::thread::sleep(Duration::from_millis(ms));
                    });
                    seq += 1;
                }
            });
        }
    });

    sweeper.stop();
    // Reconcile completions queued after the last background pass.
    monitor.sweep();

    Ok(monitor.report())
}
