//! Benchmark configuration.

use std::fmt;
use std::path::PathBuf;

use crate::orchestrator::BENCHMARK_FILTER_WIDTHS;
use crate::{ConvBenchError, Result};

/// Which execution paths a run exercises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Host convolution followed by the accelerator build.
    #[default]
    All,
    /// Host convolution only.
    Cpu,
    /// Accelerator build only.
    Accelerator,
}

impl ExecutionMode {
    /// Whether the host convolution is timed in this mode.
    #[must_use]
    pub fn runs_cpu(self) -> bool {
        matches!(self, ExecutionMode::All | ExecutionMode::Cpu)
    }

    /// Whether the accelerator program is built in this mode.
    #[must_use]
    pub fn runs_accelerator(self) -> bool {
        matches!(self, ExecutionMode::All | ExecutionMode::Accelerator)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::All => f.write_str("All device"),
            ExecutionMode::Cpu => f.write_str("CPU"),
            ExecutionMode::Accelerator => f.write_str("Accelerator"),
        }
    }
}

/// Everything a benchmark run needs to know.
///
/// Input dimensions are never stored: [`input_width`][Self::input_width] and
/// [`input_height`][Self::input_height] derive them from the output size and
/// the widest filter the run will apply.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchConfig {
    /// Output image width in samples.
    pub width: usize,
    /// Output image height in samples.
    pub height: usize,
    /// Side length of the square filter used outside sweep mode.
    pub filter_width: usize,
    /// Convolutions per timed measurement; the reported time is the mean.
    pub iterations: usize,
    /// Worker counts to test, in order.
    pub thread_counts: Vec<usize>,
    /// Sweep [`BENCHMARK_FILTER_WIDTHS`] instead of timing `filter_width` once.
    pub sweep: bool,
    /// Host timing switch; when off every thread count is skipped.
    pub cpu_timing: bool,
    /// Execution paths to run.
    pub mode: ExecutionMode,
    /// Seed for the input and filter generator.
    pub seed: u64,
    /// Directory that receives the `.dat` result files. Cleared on every run.
    pub output_dir: PathBuf,
    /// Index into the enumerated accelerator devices.
    pub accelerator_device: usize,
    /// Compare each timed output against the double-precision reference.
    pub verify: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            width: 1024,
            height: 1024,
            filter_width: 3,
            iterations: 1,
            thread_counts: vec![Self::DEFAULT_THREADS],
            sweep: false,
            cpu_timing: true,
            mode: ExecutionMode::All,
            seed: 0,
            output_dir: PathBuf::from("data"),
            accelerator_device: 0,
            verify: false,
        }
    }
}

impl BenchConfig {
    /// Worker count used when none is configured.
    pub const DEFAULT_THREADS: usize = 4;

    /// Checks every field a run depends on.
    ///
    /// # Errors
    /// [`ConvBenchError::InvalidArgument`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("filter width", self.filter_width),
            ("iterations", self.iterations),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConvBenchError::InvalidArgument(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        if self.mode.runs_cpu() {
            if self.thread_counts.is_empty() {
                return Err(ConvBenchError::InvalidArgument(
                    "at least one thread count is required".into(),
                ));
            }
            if self.thread_counts.contains(&0) {
                return Err(ConvBenchError::InvalidArgument(
                    "thread counts must be at least 1".into(),
                ));
            }
        }

        let too_large = self
            .input_width()
            .checked_mul(self.input_height())
            .is_none();
        if too_large {
            return Err(ConvBenchError::InvalidArgument(format!(
                "{}x{} image with a {}-wide filter does not fit in memory",
                self.width,
                self.height,
                self.padding_filter_width()
            )));
        }

        Ok(())
    }

    /// Widest filter this run applies, which decides the input padding.
    #[must_use]
    pub fn padding_filter_width(&self) -> usize {
        if self.sweep {
            BENCHMARK_FILTER_WIDTHS
                .iter()
                .copied()
                .fold(self.filter_width, usize::max)
        } else {
            self.filter_width
        }
    }

    /// Padded input width.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.width.saturating_add(self.padding_filter_width().saturating_sub(1))
    }

    /// Padded input height.
    #[must_use]
    pub fn input_height(&self) -> usize {
        self.height.saturating_add(self.padding_filter_width().saturating_sub(1))
    }

    /// Result file for one thread count.
    #[must_use]
    pub fn result_file(&self, threads: usize) -> PathBuf {
        self.output_dir.join(format!("cpu_{threads}_threads.dat"))
    }
}
