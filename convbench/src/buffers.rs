//! Host buffers for the input image, the filter and the output image.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{BenchConfig, ConvBenchError, ConvolutionDims, Result};

/// Value written over the output before each timed run.
pub const OUTPUT_SENTINEL: f32 = -999.999;

/// A heap buffer of samples that owns its memory exclusively.
///
/// [`release`][Self::release] frees the memory early; releasing twice is a
/// no-op and a released buffer reads as empty.
#[derive(Debug)]
pub struct HostBuffer {
    name: &'static str,
    data: Option<Vec<f32>>,
}

impl HostBuffer {
    /// A buffer that holds no memory yet.
    #[must_use]
    pub const fn unallocated(name: &'static str) -> Self {
        HostBuffer { name, data: None }
    }

    /// Allocate `len` zeroed samples.
    ///
    /// # Errors
    /// [`ConvBenchError::Allocation`] if the memory cannot be reserved.
    pub fn allocate(name: &'static str, len: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| ConvBenchError::Allocation { buffer: name, len })?;
        data.resize(len, 0.0);
        Ok(HostBuffer {
            name,
            data: Some(data),
        })
    }

    /// Name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the buffer currently owns memory.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    /// Number of samples; zero once released.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Whether the buffer holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The samples; empty once released.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Mutable samples; empty once released.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Free the memory. Returns whether anything was freed.
    pub fn release(&mut self) -> bool {
        self.data.take().is_some()
    }
}

/// Owns the three buffers of a benchmark run.
///
/// Sizes come from [`BenchConfig`]: the output is `width x height`, the
/// input is padded by `filter_width - 1` for the widest filter the run
/// applies, and the filter is rebuilt whenever its width changes. All
/// memory is released on drop if [`release`][Self::release] was not
/// called first.
#[derive(Debug)]
pub struct BufferManager {
    width: usize,
    height: usize,
    in_width: usize,
    in_height: usize,
    input: HostBuffer,
    filter: HostBuffer,
    filter_width: usize,
    output: HostBuffer,
    rng: StdRng,
}

impl BufferManager {
    /// Prepare a manager for `config`'s geometry without allocating.
    #[must_use]
    pub fn new(config: &BenchConfig) -> Self {
        BufferManager {
            width: config.width,
            height: config.height,
            in_width: config.input_width(),
            in_height: config.input_height(),
            input: HostBuffer::unallocated("input"),
            filter: HostBuffer::unallocated("filter"),
            filter_width: 0,
            output: HostBuffer::unallocated("output"),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Allocate, fill and build everything a run needs.
    ///
    /// On failure every buffer acquired so far is released again.
    ///
    /// # Errors
    /// [`ConvBenchError::Allocation`] or [`ConvBenchError::InvalidArgument`].
    pub fn allocate_all(&mut self, config: &BenchConfig) -> Result<()> {
        let result = self
            .allocate_input()
            .and_then(|()| self.allocate_output())
            .and_then(|()| {
                self.fill_input_deterministic(config.seed);
                self.build_filter(config.filter_width)
            });
        if result.is_err() {
            self.release();
        }
        result
    }

    /// Allocate the padded input image.
    ///
    /// # Errors
    /// [`ConvBenchError::Allocation`] if the memory cannot be obtained.
    pub fn allocate_input(&mut self) -> Result<()> {
        let len = checked_area("input", self.in_width, self.in_height)?;
        self.input = HostBuffer::allocate("input", len)?;
        tracing::debug!(
            width = self.in_width,
            height = self.in_height,
            "allocated input buffer"
        );
        Ok(())
    }

    /// Allocate the output image.
    ///
    /// # Errors
    /// [`ConvBenchError::Allocation`] if the memory cannot be obtained.
    pub fn allocate_output(&mut self) -> Result<()> {
        let len = checked_area("output", self.width, self.height)?;
        self.output = HostBuffer::allocate("output", len)?;
        tracing::debug!(
            width = self.width,
            height = self.height,
            "allocated output buffer"
        );
        Ok(())
    }

    /// Fill the input with values in `[0, 1)` from a generator seeded with
    /// `seed`. The filter built afterwards continues the same sequence, so
    /// a seed reproduces both.
    pub fn fill_input_deterministic(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        let rng = &mut self.rng;
        for v in self.input.as_mut_slice() {
            *v = rng.gen::<f32>();
        }
    }

    /// Rebuild the filter as a `width x width` matrix of random magnitudes
    /// normalized to sum to one.
    ///
    /// The previous filter is released first when the width changes.
    ///
    /// # Errors
    /// - [`ConvBenchError::InvalidArgument`] if `width` is zero
    /// - [`ConvBenchError::Allocation`] if the memory cannot be obtained
    pub fn build_filter(&mut self, width: usize) -> Result<()> {
        if width == 0 {
            return Err(ConvBenchError::InvalidArgument(
                "filter width must be at least 1".into(),
            ));
        }

        if width != self.filter_width || !self.filter.is_allocated() {
            self.filter.release();
            self.filter_width = 0;
            let len = checked_area("filter", width, width)?;
            self.filter = HostBuffer::allocate("filter", len)?;
            self.filter_width = width;
            tracing::debug!(filter_width = width, "allocated filter buffer");
        }

        let rng = &mut self.rng;
        let coefficients = self.filter.as_mut_slice();
        let mut sum = 0f64;
        for c in coefficients.iter_mut() {
            *c = rng.gen::<f32>();
            sum += f64::from(*c);
        }

        if sum > 0.0 {
            for c in coefficients.iter_mut() {
                *c = (f64::from(*c) / sum) as f32;
            }
        } else {
            coefficients.fill(1.0 / coefficients.len() as f32);
        }

        Ok(())
    }

    /// Overwrite the output with [`OUTPUT_SENTINEL`].
    pub fn clear_output(&mut self) {
        self.output.as_mut_slice().fill(OUTPUT_SENTINEL);
    }

    /// Release all three buffers. Safe to call any number of times.
    pub fn release(&mut self) {
        let freed = [
            self.input.release(),
            self.filter.release(),
            self.output.release(),
        ];
        self.filter_width = 0;
        if freed.iter().any(|&f| f) {
            tracing::debug!("released host buffers");
        }
    }

    /// Side length of the current filter, zero when none is built.
    #[must_use]
    pub fn filter_width(&self) -> usize {
        self.filter_width
    }

    /// Row stride of the input buffer.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.in_width
    }

    /// Rows in the input buffer.
    #[must_use]
    pub fn input_height(&self) -> usize {
        self.in_height
    }

    /// Geometry for convolving with the current filter.
    #[must_use]
    pub fn dims(&self) -> ConvolutionDims {
        ConvolutionDims {
            in_width: self.in_width,
            width: self.width,
            height: self.height,
            filter_width: self.filter_width,
        }
    }

    /// Padded input samples.
    #[must_use]
    pub fn input(&self) -> &[f32] {
        self.input.as_slice()
    }

    /// Filter coefficients, row-major.
    #[must_use]
    pub fn filter(&self) -> &[f32] {
        self.filter.as_slice()
    }

    /// Output samples.
    #[must_use]
    pub fn output(&self) -> &[f32] {
        self.output.as_slice()
    }

    /// Input and filter for reading alongside the output for writing.
    pub fn split_mut(&mut self) -> (&[f32], &[f32], &mut [f32]) {
        (
            self.input.as_slice(),
            self.filter.as_slice(),
            self.output.as_mut_slice(),
        )
    }
}

fn checked_area(buffer: &'static str, width: usize, height: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .ok_or(ConvBenchError::Allocation {
            buffer,
            len: usize::MAX,
        })
}
