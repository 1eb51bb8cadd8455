/// Quick benchmark of convolution cost per filter width
use convbench::{BenchConfig, BufferManager, ConvolutionEngine, BENCHMARK_FILTER_WIDTHS};
use std::time::Instant;

fn main() {
    let sizes = [(512, 512), (1024, 1024)];

    for (width, height) in sizes {
        println!("\n=== {}x{} image ===", width, height);

        let config = BenchConfig {
            width,
            height,
            sweep: true,
            ..BenchConfig::default()
        };
        let mut buffers = BufferManager::new(&config);
        buffers.allocate_all(&config).unwrap();
        let engine = ConvolutionEngine::new(BenchConfig::DEFAULT_THREADS).unwrap();

        for filter_width in BENCHMARK_FILTER_WIDTHS {
            buffers.build_filter(filter_width).unwrap();
            let dims = buffers.dims();

            // Warmup
            let (input, filter, output) = buffers.split_mut();
            engine.convolve(input, filter, output, dims);

            // Benchmark
            let iterations = if filter_width >= 32 { 2 } else { 10 };
            let start = Instant::now();
            for _ in 0..iterations {
                let (input, filter, output) = buffers.split_mut();
                engine.convolve(input, filter, output, dims);
            }
            let elapsed = start.elapsed();

            let ms_per_iter = elapsed.as_secs_f64() * 1000.0 / iterations as f64;
            let gmacs = (dims.output_len() * dims.filter_len()) as f64 / 1e9 / (ms_per_iter / 1000.0);

            println!(
                "Filter {:>2}x{:<2}: {:>9.3} ms  {:>6.2} GMAC/s",
                filter_width, filter_width, ms_per_iter, gmacs
            );
        }
    }
}
