//! Valid-mode 2D cross-correlation over a pre-padded input.
//!
//! Every output sample is the dot product of the filter with the
//! `filter_width x filter_width` window whose top-left corner sits at the
//! same coordinate in the input:
//!
//! ```text
//! out[y * width + x] = sum_r sum_c filter[r * fw + c] * input[(y + r) * in_width + (x + c)]
//! ```
//!
//! Rows of the output are handed to workers; a row is only ever written by
//! the worker that owns it and each sample is reduced in the same `(r, c)`
//! order, so results do not depend on the worker count.

#[cfg(feature = "simd-dispatch")]
use multiversion::multiversion;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{ConvBenchError, Result};

/// Sizes shared by one convolution call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvolutionDims {
    /// Row stride of the input buffer.
    pub in_width: usize,
    /// Output width.
    pub width: usize,
    /// Output height.
    pub height: usize,
    /// Filter side length.
    pub filter_width: usize,
}

impl ConvolutionDims {
    /// Dimensions for an input padded exactly for `filter_width`.
    #[must_use]
    pub fn padded_for(width: usize, height: usize, filter_width: usize) -> Self {
        ConvolutionDims {
            in_width: width + filter_width.saturating_sub(1),
            width,
            height,
            filter_width,
        }
    }

    /// Number of output samples.
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.width * self.height
    }

    /// Number of filter coefficients.
    #[must_use]
    pub fn filter_len(&self) -> usize {
        self.filter_width * self.filter_width
    }

    /// Smallest input length that keeps every window in bounds.
    #[must_use]
    pub fn required_input_len(&self) -> usize {
        if self.output_len() == 0 {
            return 0;
        }
        let rows = self.height + self.filter_width - 1;
        (rows - 1) * self.in_width + self.width + self.filter_width - 1
    }

    fn check(&self, input: usize, filter: usize, output: usize) {
        assert!(self.filter_width > 0, "filter width must be at least 1");
        assert!(
            self.in_width + 1 >= self.width + self.filter_width,
            "input stride {} too small for width {} and filter {}",
            self.in_width,
            self.width,
            self.filter_width
        );
        assert_eq!(filter, self.filter_len());
        assert_eq!(output, self.output_len());
        assert!(
            input >= self.required_input_len(),
            "input holds {} samples, need {}",
            input,
            self.required_input_len()
        );
    }
}

/// Fixed-size worker pool that runs convolutions fork-join.
///
/// A pool is started once per worker count and reused for every call; a
/// call returns only after every row has been written.
pub struct ConvolutionEngine {
    worker_count: usize,
    pool: Option<ThreadPool>,
}

impl ConvolutionEngine {
    /// Start a pool with `worker_count` threads.
    ///
    /// A single worker runs on the calling thread and starts no pool.
    ///
    /// # Errors
    /// - [`ConvBenchError::InvalidArgument`] if `worker_count` is zero
    /// - [`ConvBenchError::WorkerPool`] if the threads cannot be spawned
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(ConvBenchError::InvalidArgument(
                "worker count must be at least 1".into(),
            ));
        }

        let pool = if worker_count > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(worker_count)
                .thread_name(|i| format!("convbench-worker-{i}"))
                .build()
                .map_err(|e| ConvBenchError::WorkerPool(e.to_string()))?;
            tracing::debug!(workers = worker_count, "started worker pool");
            Some(pool)
        } else {
            None
        };

        Ok(ConvolutionEngine { worker_count, pool })
    }

    /// Number of workers sharing each call.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Convolve `input` with `filter`, overwriting every sample of `output`.
    ///
    /// # Panics
    /// If the buffer lengths do not match `dims`, or the input is too small
    /// to hold every window.
    pub fn convolve(
        &self,
        input: &[f32],
        filter: &[f32],
        output: &mut [f32],
        dims: ConvolutionDims,
    ) {
        dims.check(input.len(), filter.len(), output.len());
        if dims.output_len() == 0 {
            return;
        }

        let ConvolutionDims {
            in_width,
            width,
            filter_width,
            ..
        } = dims;

        match &self.pool {
            Some(pool) => pool.install(|| {
                output
                    .par_chunks_exact_mut(width)
                    .enumerate()
                    .for_each(|(y, row)| convolve_row(input, filter, row, y, in_width, filter_width));
            }),
            None => output
                .chunks_exact_mut(width)
                .enumerate()
                .for_each(|(y, row)| convolve_row(input, filter, row, y, in_width, filter_width)),
        }
    }
}

/// One-shot convolution with a temporary pool of `worker_count` threads.
///
/// Prefer [`ConvolutionEngine`] when calling repeatedly; starting the pool
/// is not free.
///
/// # Errors
/// Same as [`ConvolutionEngine::new`].
pub fn convolve(
    input: &[f32],
    filter: &[f32],
    output: &mut [f32],
    dims: ConvolutionDims,
    worker_count: usize,
) -> Result<()> {
    ConvolutionEngine::new(worker_count)?.convolve(input, filter, output, dims);
    Ok(())
}

#[cfg_attr(
    feature = "simd-dispatch",
    multiversion(targets("x86_64+avx2+fma", "x86_64+sse2", "aarch64+neon"))
)]
fn convolve_row(
    input: &[f32],
    filter: &[f32],
    out_row: &mut [f32],
    y: usize,
    in_width: usize,
    filter_width: usize,
) {
    for (x, out) in out_row.iter_mut().enumerate() {
        let mut sum = 0f32;
        for (r, taps) in filter.chunks_exact(filter_width).enumerate() {
            let start = (y + r) * in_width + x;
            let window = &input[start..start + filter_width];
            for (&f, &v) in taps.iter().zip(window) {
                sum += f * v;
            }
        }
        *out = sum;
    }
}

/// Single-threaded convolution accumulated in `f64`.
///
/// Slow; meant as ground truth for checking [`ConvolutionEngine`].
///
/// # Panics
/// Same conditions as [`ConvolutionEngine::convolve`].
#[must_use]
pub fn convolve_reference(input: &[f32], filter: &[f32], dims: ConvolutionDims) -> Vec<f64> {
    dims.check(input.len(), filter.len(), dims.output_len());

    let fw = dims.filter_width;
    let mut out = vec![0f64; dims.output_len()];
    for y in 0..dims.height {
        for x in 0..dims.width {
            let mut sum = 0f64;
            for r in 0..fw {
                for c in 0..fw {
                    let f = f64::from(filter[r * fw + c]);
                    let v = f64::from(input[(y + r) * dims.in_width + (x + c)]);
                    sum += f * v;
                }
            }
            out[y * dims.width + x] = sum;
        }
    }
    out
}

/// Largest `|actual - expected| / |expected|` over two equally sized buffers.
///
/// Expected values near zero are compared absolutely.
#[must_use]
pub fn max_relative_error(actual: &[f32], expected: &[f64]) -> f64 {
    assert_eq!(actual.len(), expected.len());
    actual
        .iter()
        .zip(expected)
        .map(|(&a, &e)| (f64::from(a) - e).abs() / e.abs().max(1.0e-12))
        .fold(0.0, f64::max)
}
