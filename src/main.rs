// ========================================================================================
//
//                   symaccum: the concurrent symmetric assembly driver
//
// ========================================================================================
//
// Drives the segmented-lock accumulator end to end: builds a synthetic normal-equation
// workload from a TOML config and/or flags, assembles it on a worker pool, and
// optionally checks the result against a serial reference.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use symaccum::LockLayout;
use symaccum::assembly::{self, Assembly};
use symaccum::config::{AssemblyConfig, Backend, Locking};
use symaccum::progress::{AssemblyProgress, AssemblyStage, NoopProgress};
use symaccum::workload::Workload;

#[derive(Clone, Copy, ValueEnum)]
enum BackendCli {
    Ndarray,
    Faer,
}

impl From<BackendCli> for Backend {
    fn from(value: BackendCli) -> Self {
        match value {
            BackendCli::Ndarray => Backend::Ndarray,
            BackendCli::Faer => Backend::Faer,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LockingCli {
    Mutex,
    None,
}

impl From<LockingCli> for Locking {
    fn from(value: LockingCli) -> Self {
        match value {
            LockingCli::Mutex => Locking::Mutex,
            LockingCli::None => Locking::None,
        }
    }
}

#[derive(Args)]
struct AssembleArgs {
    /// TOML config; flags below override its values
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of equally sized segments
    #[arg(long, value_name = "N", conflicts_with = "segment_lengths")]
    segments: Option<usize>,

    /// Indices per segment for the uniform split
    #[arg(long, value_name = "LEN", conflicts_with = "segment_lengths")]
    segment_length: Option<usize>,

    /// Explicit comma-separated segment lengths
    #[arg(long, value_name = "LENS", value_delimiter = ',')]
    segment_lengths: Option<Vec<usize>>,

    /// Requested lock count (0 means one lock per segment pair)
    #[arg(long, value_name = "N")]
    locks: Option<usize>,

    /// Number of rank-one contributions to generate
    #[arg(long, value_name = "N")]
    contributions: Option<usize>,

    /// Most consecutive segments one contribution may touch
    #[arg(long, value_name = "N")]
    max_span: Option<usize>,

    /// Worker threads (defaults to the number of logical CPUs)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Seed for the workload generator
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    backend: Option<BackendCli>,

    #[arg(long, value_enum)]
    locking: Option<LockingCli>,

    /// Recompute the matrix serially and fail on any mismatch
    #[arg(long)]
    verify: bool,

    /// Write the effective config to this path before running
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,
}

impl AssembleArgs {
    fn resolve(&self) -> Result<AssemblyConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => AssemblyConfig::load(path)?,
            None => AssemblyConfig::default(),
        };
        if let Some(lengths) = &self.segment_lengths {
            config.segment_lengths = Some(lengths.clone());
        }
        if let Some(segments) = self.segments {
            config.segment_lengths = None;
            config.segments = segments;
        }
        if let Some(segment_length) = self.segment_length {
            config.segment_lengths = None;
            config.segment_length = segment_length;
        }
        if let Some(locks) = self.locks {
            config.locks = Some(locks);
        }
        if let Some(contributions) = self.contributions {
            config.contributions = contributions;
        }
        if let Some(max_span) = self.max_span {
            config.max_span = max_span;
        }
        if let Some(threads) = self.threads {
            config.threads = Some(threads);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(backend) = self.backend {
            config.backend = backend.into();
        }
        if let Some(locking) = self.locking {
            config.locking = locking.into();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser)]
#[command(
    name = "symaccum",
    version,
    about = "Concurrent assembly of symmetric matrices from localized rank-one updates."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a workload and accumulate it into a symmetric matrix
    #[command(about = "Assemble a synthetic normal-equation matrix")]
    Assemble(AssembleArgs),

    /// Print how segment pairs are spread over a lock bank
    #[command(about = "Show the lock layout for a segment count")]
    Layout {
        /// Number of segments
        #[arg(value_name = "SEGMENTS")]
        segments: usize,

        /// Requested lock count
        #[arg(long, value_name = "N")]
        locks: Option<usize>,
    },
}

/// Draws one bar per stage on stderr, hidden when stderr is not a terminal.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style);
        }
        Self { bar }
    }
}

impl AssemblyProgress for BarProgress {
    fn on_stage_start(&self, stage: AssemblyStage, total_contributions: usize) {
        self.bar.reset();
        self.bar.set_length(total_contributions as u64);
        self.bar.set_message(stage.describe());
    }

    fn on_stage_advance(&self, stage: AssemblyStage, processed_contributions: usize) {
        let _ = stage;
        self.bar.set_position(processed_contributions as u64);
    }

    fn on_stage_finish(&self, stage: AssemblyStage) {
        self.bar.finish_with_message(format!("{stage} done"));
    }
}

fn run_assemble(args: AssembleArgs) -> Result<(), Box<dyn Error>> {
    let config = args.resolve()?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
        log::info!("Wrote effective config to {}", path.display());
    }

    let workload = Workload::generate(&config)?;
    let progress = BarProgress::new();
    let assembly = assembly::assemble(&config, &workload, &progress)?;
    report(&assembly);

    if args.verify {
        let diff = assembly::verify(&assembly, &workload, &NoopProgress);
        if diff != 0.0 {
            return Err(format!("assembled matrix differs from the serial reference by {diff}").into());
        }
        println!("verified: matches the serial reference exactly");
    }
    Ok(())
}

fn report(assembly: &Assembly) {
    let (n, _) = assembly.lower.dim();
    println!("matrix:    {n}x{n} ({})", assembly.backend);
    println!("locking:   {} with {}", assembly.locking, assembly.layout);
    println!("threads:   {}", assembly.threads);
    println!("elapsed:   {:.3?}", assembly.elapsed);
    println!("checksum:  {}", assembly.checksum());
}

fn run_layout(segments: usize, locks: Option<usize>) -> Result<(), Box<dyn Error>> {
    let layout = LockLayout::new(segments, locks)?;
    println!("{layout}");
    for hi in 0..segments {
        let row: Vec<String> = (0..=hi)
            .map(|lo| layout.lock_index(lo, hi).to_string())
            .collect();
        println!("segment {hi:>4}: {}", row.join(" "));
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Assemble(args)) => run_assemble(args),
        Some(Commands::Layout { segments, locks }) => run_layout(segments, locks),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
