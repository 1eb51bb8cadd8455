//! Command line front end for the convbench 2D convolution benchmark.

mod progress;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use convbench::accelerator::{self, print_diagnostics};
use convbench::{
    AcceleratorOutcome, BenchConfig, BenchContext, BenchmarkOrchestrator, ExecutionMode,
};
use crossterm::style::Stylize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::progress::ProgressReporter;

#[derive(Parser, Debug)]
#[command(name = "convbench")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Filter side length
    #[arg(short = 'f', long, default_value_t = 3)]
    filter_width: usize,

    /// Convolutions averaged per measurement
    #[arg(short, long, default_value_t = 1)]
    iterations: usize,

    /// Output image width
    #[arg(short = 'x', long, default_value_t = 1024)]
    width: usize,

    /// Output image height
    #[arg(short = 'y', long, default_value_t = 1024)]
    height: usize,

    /// Sweep filter widths 2, 4, 8, 16, 32 and 64 instead of a single run
    #[arg(short, long)]
    benchmark: bool,

    /// Skip timing on the host
    #[arg(short, long)]
    no_cpu_timing: bool,

    /// Which paths to run
    #[arg(short, long, value_enum, default_value_t = ModeArg::All)]
    mode: ModeArg,

    /// Print accelerator device diagnostics and exit
    #[arg(short, long)]
    print_platforms: bool,

    /// Worker thread counts to time, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "4")]
    threads: Vec<usize>,

    /// Seed for the input image and filter
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Directory for the result files; cleared on every run
    #[arg(short, long, default_value = "data")]
    output_dir: PathBuf,

    /// Accelerator device index
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Check every output against the double-precision reference
    #[arg(long)]
    verify: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    All,
    #[value(alias = "0")]
    Cpu,
    #[value(aliases = ["1", "gpu"])]
    Accelerator,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::All => ExecutionMode::All,
            ModeArg::Cpu => ExecutionMode::Cpu,
            ModeArg::Accelerator => ExecutionMode::Accelerator,
        }
    }
}

impl Cli {
    fn to_config(&self) -> BenchConfig {
        BenchConfig {
            width: self.width,
            height: self.height,
            filter_width: self.filter_width,
            iterations: self.iterations,
            thread_counts: self.threads.clone(),
            sweep: self.benchmark,
            cpu_timing: !self.no_cpu_timing,
            mode: self.mode.into(),
            seed: self.seed,
            output_dir: self.output_dir.clone(),
            accelerator_device: self.device,
            verify: self.verify,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    if cli.print_platforms {
        return print_platforms(&mut io::stdout().lock());
    }

    let config = cli.to_config();
    print_info(&config, &mut io::stdout().lock())?;

    let mut context = BenchContext::new(config).context("failed to set up benchmark")?;
    let mut reporter = ProgressReporter::new(cli.verbose > 0);
    let report = BenchmarkOrchestrator::new(&mut context)
        .run_with_observer(&mut reporter)
        .context("benchmark failed")?;

    match &report.accelerator {
        AcceleratorOutcome::NotRequested => {}
        AcceleratorOutcome::NoDevice => {
            println!("{}", "No accelerator device found; accelerator run skipped".yellow());
        }
        AcceleratorOutcome::Built { device } => {
            println!("Accelerator program built for {}", device.as_str().green());
        }
    }

    if !report.measurements.is_empty() {
        tracing::info!(
            dir = %context.config().output_dir.display(),
            measurements = report.measurements.len(),
            "results written"
        );
        println!(
            "Results written to {}",
            context.config().output_dir.display()
        );
    }

    context.release();
    Ok(())
}

fn print_platforms(out: &mut impl Write) -> Result<()> {
    let devices = accelerator::enumerate_devices();
    if devices.is_empty() {
        writeln!(out, "No accelerator devices found")?;
        return Ok(());
    }
    for device in &devices {
        print_diagnostics(device, out).context("failed to print device diagnostics")?;
        writeln!(out)?;
    }
    Ok(())
}

/// Run banner printed before any work starts.
fn print_info(config: &BenchConfig, out: &mut impl Write) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "Width:          {}", config.width)?;
    writeln!(out, "Height:         {}", config.height)?;
    writeln!(
        out,
        "Filter Size:    {} x {}",
        config.filter_width, config.filter_width
    )?;
    writeln!(out, "Iterations:     {}", config.iterations)?;
    writeln!(out, "Mode:           {}", config.mode)?;

    write!(out, "Testing:        ")?;
    if config.mode.runs_cpu() && config.cpu_timing {
        for threads in &config.thread_counts {
            write!(out, "CPU ({}-threads) , ", threads)?;
        }
    }
    writeln!(out)?;
    writeln!(out)
}
