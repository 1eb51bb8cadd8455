//! Tests that verify every worker count produces the same output.
//!
//! Each output sample is reduced in the same (r, c) order by exactly one
//! worker, so results must match bit for bit, not just within tolerance.

use convbench::{BenchConfig, BufferManager, ConvolutionDims, ConvolutionEngine};

/// Buffers filled the same way a benchmark run fills them.
fn prepared_buffers(width: usize, height: usize, filter_width: usize, seed: u64) -> BufferManager {
    let config = BenchConfig {
        width,
        height,
        filter_width,
        seed,
        ..BenchConfig::default()
    };
    let mut buffers = BufferManager::new(&config);
    buffers.allocate_all(&config).unwrap();
    buffers
}

fn run(buffers: &BufferManager, workers: usize) -> Vec<f32> {
    let dims = buffers.dims();
    let mut output = vec![0.0f32; dims.output_len()];
    ConvolutionEngine::new(workers)
        .unwrap()
        .convolve(buffers.input(), buffers.filter(), &mut output, dims);
    output
}

// ============================================================================
// Exact match tests - worker count must not change a single bit
// ============================================================================

#[test]
fn test_single_vs_many_workers_exact() {
    let buffers = prepared_buffers(128, 96, 7, 3);
    let single = run(&buffers, 1);

    for workers in [2, 4, 8, 16] {
        let parallel = run(&buffers, workers);
        assert!(
            single == parallel,
            "{} workers produced different output than 1 worker",
            workers
        );
    }
}

#[test]
fn test_more_workers_than_rows() {
    let buffers = prepared_buffers(64, 3, 4, 11);
    assert_eq!(run(&buffers, 1), run(&buffers, 12));
}

#[test]
fn test_single_column_image() {
    let buffers = prepared_buffers(1, 40, 5, 5);
    assert_eq!(run(&buffers, 1), run(&buffers, 4));
}

// ============================================================================
// Synthetic geometry tests - for broader coverage
// ============================================================================

#[test]
fn test_parity_across_filter_widths() {
    let sizes = [(17, 13), (64, 64), (100, 37)];

    for (width, height) in sizes {
        for filter_width in [1, 2, 3, 8, 16] {
            let buffers = prepared_buffers(width, height, filter_width, 42);
            let single = run(&buffers, 1);
            let parallel = run(&buffers, 3);

            assert!(
                single == parallel,
                "{}x{} filter {}: parallel output diverged",
                width,
                height,
                filter_width
            );
        }
    }
}

#[test]
fn test_engine_reused_across_calls() {
    let buffers = prepared_buffers(48, 48, 3, 9);
    let dims = buffers.dims();
    let engine = ConvolutionEngine::new(4).unwrap();

    let mut first = vec![0.0f32; dims.output_len()];
    let mut second = vec![1.0f32; dims.output_len()];
    engine.convolve(buffers.input(), buffers.filter(), &mut first, dims);
    engine.convolve(buffers.input(), buffers.filter(), &mut second, dims);

    assert_eq!(first, second);
    assert_eq!(engine.worker_count(), 4);
}

#[test]
fn test_stride_wider_than_filter_needs() {
    // Sweep-padded input with a narrow filter, as in a sweep's first step.
    let dims = ConvolutionDims {
        in_width: 40 + 63,
        width: 40,
        height: 20,
        filter_width: 2,
    };
    let input: Vec<f32> = (0..dims.in_width * (20 + 63))
        .map(|i| ((i * 7919) % 1000) as f32 / 1000.0)
        .collect();
    let filter = [0.1f32, 0.2, 0.3, 0.4];

    let mut single = vec![0.0f32; dims.output_len()];
    let mut parallel = vec![0.0f32; dims.output_len()];
    ConvolutionEngine::new(1)
        .unwrap()
        .convolve(&input, &filter, &mut single, dims);
    ConvolutionEngine::new(6)
        .unwrap()
        .convolve(&input, &filter, &mut parallel, dims);

    assert_eq!(single, parallel);
}
