//! Profile worker scaling to see where parallel overhead comes from
//!
//! Run with: cargo run --release --example profile_workers

use convbench::{BenchConfig, BufferManager, ConvolutionEngine};
use std::time::Instant;

fn main() {
    println!("Worker Scaling Profile");
    println!("======================\n");

    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    println!("Available CPU cores: {}\n", num_cpus);

    let config = BenchConfig {
        width: 2048,
        height: 2048,
        filter_width: 9,
        ..BenchConfig::default()
    };
    let mut buffers = BufferManager::new(&config);
    buffers
        .allocate_all(&config)
        .expect("buffers for a 2048x2048 image");
    let dims = buffers.dims();

    println!(
        "Profiling {}x{} output, {}x{} filter...\n",
        config.width, config.height, config.filter_width, config.filter_width
    );

    // Pool start-up is paid once per thread count, outside the timed loop.
    println!("1. Pool start-up cost:");
    for workers in [2, 4, num_cpus] {
        let start = Instant::now();
        let _engine = ConvolutionEngine::new(workers).unwrap();
        println!(
            "   {:>2} workers: {:.3}ms",
            workers,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    println!();

    let iterations = 5;
    let time_with = |buffers: &mut BufferManager, workers: usize| {
        let engine = ConvolutionEngine::new(workers).unwrap();
        // Warmup
        let (input, filter, output) = buffers.split_mut();
        engine.convolve(input, filter, output, dims);

        let start = Instant::now();
        for _ in 0..iterations {
            let (input, filter, output) = buffers.split_mut();
            engine.convolve(input, filter, output, dims);
        }
        start.elapsed().as_secs_f64() * 1000.0 / iterations as f64
    };

    println!("2. Full convolution comparison:");
    let seq_time = time_with(&mut buffers, 1);
    println!("   1 worker:    {:.2}ms", seq_time);

    let mut workers = 2;
    let mut par_time = seq_time;
    while workers <= num_cpus {
        par_time = time_with(&mut buffers, workers);
        println!(
            "   {:>2} workers:  {:.2}ms ({:.2}x)",
            workers,
            par_time,
            seq_time / par_time
        );
        workers *= 2;
    }

    // Calculate overhead at the largest worker count tried
    let used = (workers / 2).max(1);
    let ideal_parallel = seq_time / used as f64;
    let overhead = par_time - ideal_parallel;
    println!("\n3. Overhead analysis:");
    println!(
        "   Ideal parallel time ({}x):  {:.2}ms",
        used, ideal_parallel
    );
    println!("   Actual parallel time:        {:.2}ms", par_time);
    println!(
        "   Overhead:                    {:.2}ms ({:.0}%)",
        overhead,
        overhead / seq_time * 100.0
    );
}
