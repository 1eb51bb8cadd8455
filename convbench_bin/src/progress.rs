//! Terminal progress for a running benchmark.

use convbench::{BenchObserver, Measurement};
use indicatif::{ProgressBar, ProgressStyle};

/// Prints every measurement and shows a bar while a sweep is in flight.
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    hide_bar: bool,
}

impl ProgressReporter {
    pub fn new(hide_bar: bool) -> Self {
        ProgressReporter { bar: None, hide_bar }
    }

    fn print(&self, line: &str) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

impl BenchObserver for ProgressReporter {
    fn thread_run_started(&mut self, threads: usize, steps: usize) {
        println!("********    Starting CPU ({threads}-threads) run    ********");
        if self.hide_bar || steps < 2 {
            return;
        }

        let bar = ProgressBar::new(steps as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(format!("{threads} threads"));
        self.bar = Some(bar);
    }

    fn measured(&mut self, measurement: &Measurement, sweep: bool) {
        let line = format_measurement(measurement, sweep);
        self.print(&line);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn thread_run_finished(&mut self, _threads: usize) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        println!();
    }
}

/// One result line, in the sweep or single-run form.
pub fn format_measurement(measurement: &Measurement, sweep: bool) -> String {
    if sweep {
        format!(
            "Filter size = {}: CPU time = {} s",
            measurement.filter_width, measurement.seconds
        )
    } else {
        format!(
            "CPU ({}-threads): {}",
            measurement.threads, measurement.seconds
        )
    }
}
