//! Benchmark driver.
//!
//! For every configured thread count the orchestrator either times the
//! configured filter once or sweeps [`BENCHMARK_FILTER_WIDTHS`], then, if
//! the mode asks for it, builds the accelerator program. Each thread count
//! is fully drained before the next starts; the only parallelism is inside
//! a single convolution call.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::accelerator::{self, AcceleratorProgram, CONVOLUTION_KERNEL_SOURCE};
use crate::{
    convolve_reference, max_relative_error, BenchConfig, BufferManager, ConvBenchError,
    ConvolutionEngine, Result, ResultSink, Timer,
};

/// Filter widths timed by a sweep, in recording order.
pub const BENCHMARK_FILTER_WIDTHS: [usize; 6] = [2, 4, 8, 16, 32, 64];

/// Largest relative error tolerated by [`BenchConfig::verify`].
pub const VERIFY_TOLERANCE: f64 = 1.0e-3;

/// Mean time of one convolution at a given thread count and filter width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// Worker threads used.
    pub threads: usize,
    /// Filter side length.
    pub filter_width: usize,
    /// Mean wall-clock seconds per convolution.
    pub seconds: f64,
}

/// What happened on the accelerator path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceleratorOutcome {
    /// The mode did not include the accelerator.
    NotRequested,
    /// No device was found, so nothing was built.
    NoDevice,
    /// The program compiled for the named device.
    Built {
        /// Device the program was built for.
        device: String,
    },
}

/// Everything a run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct BenchReport {
    /// Measurements in the order they were taken.
    pub measurements: Vec<Measurement>,
    /// Accelerator result.
    pub accelerator: AcceleratorOutcome,
}

impl BenchReport {
    /// Measurements taken with `threads` workers.
    pub fn for_threads(&self, threads: usize) -> impl Iterator<Item = &Measurement> {
        self.measurements
            .iter()
            .filter(move |m| m.threads == threads)
    }
}

/// Hooks for reporting progress while a run is in flight.
///
/// Every method defaults to doing nothing.
pub trait BenchObserver {
    /// A thread count is about to be timed over `steps` filter widths.
    fn thread_run_started(&mut self, threads: usize, steps: usize) {
        let _ = (threads, steps);
    }

    /// A measurement was just taken; `sweep` tells which mode produced it.
    fn measured(&mut self, measurement: &Measurement, sweep: bool) {
        let _ = (measurement, sweep);
    }

    /// Every measurement for `threads` has been taken.
    fn thread_run_finished(&mut self, threads: usize) {
        let _ = threads;
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl BenchObserver for NoopObserver {}

/// State shared by every stage of a run.
///
/// Built once per process run and handed to the orchestrator by reference.
/// Buffers are allocated on construction and released when the context is
/// dropped, on success and on error alike.
#[derive(Debug)]
pub struct BenchContext {
    config: BenchConfig,
    buffers: BufferManager,
    timer: Timer,
}

impl BenchContext {
    /// Validate `config` and allocate the buffers it describes.
    ///
    /// Buffers are only allocated when the mode times the host path.
    ///
    /// # Errors
    /// - [`ConvBenchError::InvalidArgument`] if the configuration is invalid
    /// - [`ConvBenchError::Allocation`] if a buffer cannot be allocated
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;

        let mut buffers = BufferManager::new(&config);
        if config.mode.runs_cpu() {
            buffers.allocate_all(&config)?;
        }

        Ok(BenchContext {
            config,
            buffers,
            timer: Timer::new(),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// The host buffers.
    #[must_use]
    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Release every buffer ahead of drop. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.buffers.release();
    }
}

/// Runs the benchmark described by a [`BenchContext`].
pub struct BenchmarkOrchestrator<'a> {
    ctx: &'a mut BenchContext,
}

impl<'a> BenchmarkOrchestrator<'a> {
    /// Drive `ctx`.
    pub fn new(ctx: &'a mut BenchContext) -> Self {
        BenchmarkOrchestrator { ctx }
    }

    /// Run without progress reporting.
    ///
    /// # Errors
    /// See [`run_with_observer`][Self::run_with_observer].
    pub fn run(&mut self) -> Result<BenchReport> {
        self.run_with_observer(&mut NoopObserver)
    }

    /// Run every configured stage, notifying `observer` along the way.
    ///
    /// The result directory is cleared first. Each thread count writes to
    /// its own file, closed once all its measurements are in.
    ///
    /// # Errors
    /// The first error from a stage, unchanged. Nothing is retried.
    pub fn run_with_observer(&mut self, observer: &mut dyn BenchObserver) -> Result<BenchReport> {
        let config = self.ctx.config.clone();
        tracing::info!(
            width = config.width,
            height = config.height,
            filter_width = config.filter_width,
            iterations = config.iterations,
            threads = ?config.thread_counts,
            mode = %config.mode,
            sweep = config.sweep,
            "starting benchmark"
        );

        ResultSink::clear_directory(&config.output_dir)?;

        let mut measurements = Vec::new();
        if config.mode.runs_cpu() {
            let mut sinks: BTreeMap<usize, ResultSink> = BTreeMap::new();
            for &threads in &config.thread_counts {
                if !config.cpu_timing {
                    tracing::debug!(threads, "cpu timing disabled, skipping");
                    continue;
                }
                let sink = match sinks.entry(threads) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => {
                        e.insert(ResultSink::open(config.result_file(threads))?)
                    }
                };
                self.run_threads(threads, sink, observer, &mut measurements)?;
            }
            for sink in sinks.into_values() {
                sink.close()?;
            }
        }

        let accelerator = if config.mode.runs_accelerator() {
            run_accelerator(&config)?
        } else {
            AcceleratorOutcome::NotRequested
        };

        Ok(BenchReport {
            measurements,
            accelerator,
        })
    }

    fn run_threads(
        &mut self,
        threads: usize,
        sink: &mut ResultSink,
        observer: &mut dyn BenchObserver,
        measurements: &mut Vec<Measurement>,
    ) -> Result<()> {
        let engine = ConvolutionEngine::new(threads)?;
        let sweep = self.ctx.config.sweep;
        let widths: Vec<usize> = if sweep {
            BENCHMARK_FILTER_WIDTHS.to_vec()
        } else {
            vec![self.ctx.config.filter_width]
        };

        tracing::info!(threads, steps = widths.len(), "starting CPU run");
        observer.thread_run_started(threads, widths.len());

        for filter_width in widths {
            if sweep || self.ctx.buffers.filter_width() != filter_width {
                self.ctx.buffers.build_filter(filter_width)?;
            }

            let seconds = self.time_convolution(&engine);
            if self.ctx.config.verify {
                self.verify_output()?;
            }

            let measurement = Measurement {
                threads,
                filter_width,
                seconds,
            };
            sink.add(filter_width, seconds)?;
            tracing::info!(threads, filter_width, seconds, "measured");
            observer.measured(&measurement, sweep);
            measurements.push(measurement);
        }

        observer.thread_run_finished(threads);
        Ok(())
    }

    /// Mean seconds per convolution over the configured iterations.
    fn time_convolution(&mut self, engine: &ConvolutionEngine) -> f64 {
        let BenchContext {
            config,
            buffers,
            timer,
        } = &mut *self.ctx;

        buffers.clear_output();
        let dims = buffers.dims();

        timer.reset();
        timer.start();
        for _ in 0..config.iterations {
            let (input, filter, output) = buffers.split_mut();
            engine.convolve(input, filter, output, dims);
        }
        timer.stop();

        timer.elapsed_seconds() / config.iterations as f64
    }

    fn verify_output(&self) -> Result<()> {
        let buffers = &self.ctx.buffers;
        let reference = convolve_reference(buffers.input(), buffers.filter(), buffers.dims());
        let max_rel_error = max_relative_error(buffers.output(), &reference);
        tracing::debug!(
            filter_width = buffers.filter_width(),
            max_rel_error,
            "verified output"
        );
        if max_rel_error > VERIFY_TOLERANCE {
            return Err(ConvBenchError::Verification { max_rel_error });
        }
        Ok(())
    }
}

fn run_accelerator(config: &BenchConfig) -> Result<AcceleratorOutcome> {
    let devices = accelerator::enumerate_devices();
    if devices.is_empty() {
        tracing::warn!("no accelerator devices found, skipping accelerator run");
        return Ok(AcceleratorOutcome::NoDevice);
    }

    let device = devices.get(config.accelerator_device).ok_or_else(|| {
        ConvBenchError::InvalidArgument(format!(
            "accelerator device {} requested but only {} found",
            config.accelerator_device,
            devices.len()
        ))
    })?;

    let program = AcceleratorProgram::build(device, CONVOLUTION_KERNEL_SOURCE)?;
    tracing::info!(device = program.device_name(), "accelerator program built");

    Ok(AcceleratorOutcome::Built {
        device: program.device_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::read_records;
    use crate::ExecutionMode;

    fn tiny_config(dir: &std::path::Path) -> BenchConfig {
        BenchConfig {
            width: 24,
            height: 16,
            filter_width: 3,
            iterations: 2,
            thread_counts: vec![1, 2],
            mode: ExecutionMode::Cpu,
            output_dir: dir.join("data"),
            ..BenchConfig::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl BenchObserver for Recorder {
        fn thread_run_started(&mut self, threads: usize, steps: usize) {
            self.events.push(format!("start {threads} {steps}"));
        }

        fn measured(&mut self, m: &Measurement, sweep: bool) {
            self.events
                .push(format!("measure {} {} {sweep}", m.threads, m.filter_width));
        }

        fn thread_run_finished(&mut self, threads: usize) {
            self.events.push(format!("finish {threads}"));
        }
    }

    #[test]
    fn test_single_run_per_thread_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = BenchContext::new(tiny_config(dir.path())).unwrap();
        let report = BenchmarkOrchestrator::new(&mut ctx).run().unwrap();

        assert_eq!(report.measurements.len(), 2);
        assert_eq!(report.measurements[0].threads, 1);
        assert_eq!(report.measurements[1].threads, 2);
        assert!(report.measurements.iter().all(|m| m.filter_width == 3));
        assert!(report.measurements.iter().all(|m| m.seconds >= 0.0));
        assert_eq!(report.accelerator, AcceleratorOutcome::NotRequested);

        let records = read_records(ctx.config().result_file(2)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measure, 3);
    }

    #[test]
    fn test_output_overwrites_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = BenchContext::new(tiny_config(dir.path())).unwrap();
        BenchmarkOrchestrator::new(&mut ctx).run().unwrap();
        assert!(ctx
            .buffers()
            .output()
            .iter()
            .all(|&v| v != crate::OUTPUT_SENTINEL));
    }

    #[test]
    fn test_sweep_observer_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            width: 8,
            height: 8,
            iterations: 1,
            thread_counts: vec![2],
            sweep: true,
            ..tiny_config(dir.path())
        };
        let mut ctx = BenchContext::new(config).unwrap();
        let mut recorder = Recorder::default();
        BenchmarkOrchestrator::new(&mut ctx)
            .run_with_observer(&mut recorder)
            .unwrap();

        let mut expected = vec!["start 2 6".to_string()];
        expected.extend(
            BENCHMARK_FILTER_WIDTHS
                .iter()
                .map(|w| format!("measure 2 {w} true")),
        );
        expected.push("finish 2".to_string());
        assert_eq!(recorder.events, expected);
        assert_eq!(ctx.buffers().filter_width(), 64);
    }

    #[test]
    fn test_cpu_timing_disabled_skips_all() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            cpu_timing: false,
            ..tiny_config(dir.path())
        };
        let mut ctx = BenchContext::new(config).unwrap();
        let report = BenchmarkOrchestrator::new(&mut ctx).run().unwrap();

        assert!(report.measurements.is_empty());
        assert!(dir.path().join("data").is_dir());
        assert!(!ctx.config().result_file(1).exists());
    }

    #[test]
    fn test_verify_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            verify: true,
            ..tiny_config(dir.path())
        };
        let mut ctx = BenchContext::new(config).unwrap();
        assert!(BenchmarkOrchestrator::new(&mut ctx).run().is_ok());
    }

    #[test]
    fn test_accelerator_only_skips_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            mode: ExecutionMode::Accelerator,
            ..tiny_config(dir.path())
        };
        let mut ctx = BenchContext::new(config).unwrap();
        assert!(ctx.buffers().input().is_empty());

        let report = BenchmarkOrchestrator::new(&mut ctx).run().unwrap();
        assert!(report.measurements.is_empty());
        #[cfg(not(feature = "opencl"))]
        assert_eq!(report.accelerator, AcceleratorOutcome::NoDevice);
    }

    #[test]
    fn test_duplicate_thread_counts_share_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            thread_counts: vec![2, 2],
            ..tiny_config(dir.path())
        };
        let mut ctx = BenchContext::new(config).unwrap();
        BenchmarkOrchestrator::new(&mut ctx).run().unwrap();

        let records = read_records(ctx.config().result_file(2)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_context_reports_allocation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            width: usize::MAX / 8,
            height: 1,
            ..tiny_config(dir.path())
        };
        let err = BenchContext::new(config).unwrap_err();
        assert!(
            matches!(err, ConvBenchError::Allocation { buffer: "input", .. }),
            "{err:?}"
        );
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_release_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = BenchContext::new(tiny_config(dir.path())).unwrap();
        BenchmarkOrchestrator::new(&mut ctx).run().unwrap();
        ctx.release();
        ctx.release();
        assert!(ctx.buffers().output().is_empty());
    }
}
