//! Benchmark that tracks memory allocations during a convolution sweep
//!
//! Run with:
//!   cargo run --release --example benchmark_allocations

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use convbench::{
    BenchConfig, BenchContext, BenchmarkOrchestrator, BufferManager, ConvolutionEngine,
    ExecutionMode,
};

/// Counts every allocation made through the global allocator.
struct CountingAllocator;

static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOCS.fetch_add(1, Ordering::Relaxed);
        ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        FREES.fetch_add(1, Ordering::Relaxed);
        System.dealloc(ptr, layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        ALLOCS.fetch_add(1, Ordering::Relaxed);
        ALLOCATED.fetch_add(new_size.saturating_sub(layout.size()), Ordering::Relaxed);
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// Snapshot of the counters since the last [`AllocStats::reset`].
#[derive(Clone, Copy, Debug)]
struct AllocStats {
    allocs: usize,
    bytes: usize,
    frees: usize,
}

impl AllocStats {
    fn reset() {
        for counter in [&ALLOCS, &ALLOCATED, &FREES] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn take() -> Self {
        AllocStats {
            allocs: ALLOCS.load(Ordering::Relaxed),
            bytes: ALLOCATED.load(Ordering::Relaxed),
            frees: FREES.load(Ordering::Relaxed),
        }
    }
}

fn mib(bytes: usize) -> String {
    format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
}

/// Allocations made by `iterations` convolutions on an already warm engine.
fn convolve_allocations(size: usize, workers: usize, iterations: usize) -> (f64, usize, usize) {
    let config = BenchConfig {
        width: size,
        height: size,
        ..BenchConfig::default()
    };
    let mut buffers = BufferManager::new(&config);
    buffers.allocate_all(&config).unwrap();
    let engine = ConvolutionEngine::new(workers).unwrap();
    let dims = buffers.dims();

    // Warmup (don't count)
    let (input, filter, output) = buffers.split_mut();
    engine.convolve(input, filter, output, dims);

    AllocStats::reset();
    let start = Instant::now();
    for _ in 0..iterations {
        let (input, filter, output) = buffers.split_mut();
        engine.convolve(input, filter, output, dims);
    }
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0 / iterations as f64;
    let stats = AllocStats::take();

    (elapsed_ms, stats.allocs, stats.bytes)
}

fn main() {
    println!("Convolution Allocation Benchmark");
    println!("================================\n");

    let sizes = [256, 512, 1024];

    println!("Buffer sizes (input padded for a 3x3 filter, f32):");
    for size in sizes {
        let bytes = ((size + 2) * (size + 2) + size * size) * 4;
        println!("  {:>4}x{:<4}: {}", size, size, mib(bytes));
    }
    println!();

    println!(
        "{:12} {:>8} {:>10} {:>12} {:>14}",
        "Size", "Workers", "Time (ms)", "Allocs", "Bytes"
    );
    println!("{:-<60}", "");
    for size in sizes {
        for workers in [1, 4] {
            let (ms, allocs, bytes) = convolve_allocations(size, workers, 10);
            println!(
                "{:12} {:>8} {:>10.2} {:>12} {:>14}",
                format!("{size}x{size}"),
                workers,
                ms,
                allocs,
                mib(bytes)
            );
        }
    }

    // A whole sweep, including the filter rebuilt at every width.
    let dir = tempfile::tempdir().unwrap();
    let config = BenchConfig {
        width: 512,
        height: 512,
        sweep: true,
        mode: ExecutionMode::Cpu,
        output_dir: dir.path().join("data"),
        ..BenchConfig::default()
    };

    AllocStats::reset();
    let start = Instant::now();
    let mut ctx = BenchContext::new(config).unwrap();
    BenchmarkOrchestrator::new(&mut ctx).run().unwrap();
    drop(ctx);
    let elapsed = start.elapsed();
    let stats = AllocStats::take();

    println!("\nFull 512x512 sweep ({:.2}s):", elapsed.as_secs_f64());
    println!("  Allocations:   {} ({})", stats.allocs, mib(stats.bytes));
    println!("  Frees:         {}", stats.frees);

    println!("\nDone.");
}
