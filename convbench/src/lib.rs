//! Benchmark harness for multi-threaded 2D image convolution.
//!
//! The crate times a valid-mode 2D cross-correlation over a padded
//! `f32` image while varying the number of worker threads and, in sweep
//! mode, the filter width. Every measurement is averaged over the
//! configured iteration count and appended to a tab-separated `.dat` file
//! per thread count.
//!
//! # Example
//!
//! ```
//! use convbench::{BenchConfig, BenchContext, BenchmarkOrchestrator};
//!
//! let dir = std::env::temp_dir().join("convbench-doc-example");
//! let config = BenchConfig {
//!     width: 64,
//!     height: 64,
//!     thread_counts: vec![1, 2],
//!     mode: convbench::ExecutionMode::Cpu,
//!     output_dir: dir.clone(),
//!     ..BenchConfig::default()
//! };
//!
//! let mut context = BenchContext::new(config).unwrap();
//! let report = BenchmarkOrchestrator::new(&mut context).run().unwrap();
//! assert_eq!(report.measurements.len(), 2);
//! # std::fs::remove_dir_all(dir).ok();
//! ```

#![warn(missing_docs)]

pub mod accelerator;
mod buffers;
mod config;
mod convolve;
mod orchestrator;
pub mod results;
mod timer;

use std::path::PathBuf;

use thiserror::Error;

pub use buffers::{BufferManager, HostBuffer, OUTPUT_SENTINEL};
pub use config::{BenchConfig, ExecutionMode};
pub use convolve::{
    convolve, convolve_reference, max_relative_error, ConvolutionDims, ConvolutionEngine,
};
pub use orchestrator::{
    AcceleratorOutcome, BenchContext, BenchObserver, BenchReport, BenchmarkOrchestrator,
    Measurement, NoopObserver, BENCHMARK_FILTER_WIDTHS, VERIFY_TOLERANCE,
};
pub use results::{ResultRecord, ResultSink};
pub use timer::Timer;

/// Errors that can abort a benchmark run.
///
/// None of these are retried; the first one ends the run and every buffer
/// acquired so far is released on the way out.
#[derive(Debug, Error)]
pub enum ConvBenchError {
    /// Host memory for a buffer could not be reserved.
    #[error("could not allocate {len} samples for the {buffer} buffer")]
    Allocation {
        /// Which buffer was being allocated.
        buffer: &'static str,
        /// Requested length in samples.
        len: usize,
    },
    /// The configuration is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The accelerator program failed to compile.
    #[error("accelerator program build failed on {device}:\n{log}")]
    AcceleratorBuild {
        /// Name of the target device.
        device: String,
        /// Build log reported by the compiler.
        log: String,
    },
    /// The worker pool for a thread count could not be started.
    #[error("could not start worker pool: {0}")]
    WorkerPool(String),
    /// The output disagrees with the double-precision reference kernel.
    #[error("output differs from reference (max relative error {max_rel_error:e})")]
    Verification {
        /// Largest relative error over all output samples.
        max_rel_error: f64,
    },
    /// Reading or writing a result file or directory failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path of the file or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ConvBenchError>;

impl ConvBenchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvBenchError::Io {
            path: path.into(),
            source,
        }
    }
}
