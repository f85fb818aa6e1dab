use std::fmt;
use std::time::{Duration, Instant};

/// Summary statistics over a set of latency samples
#[derive(Debug, Clone)]
pub struct BenchResult {
    pub operation: String,
    pub mean: Duration,
    pub median: Duration,
    pub p99: Duration,
    pub std_dev: Duration,
    pub iterations: usize,
}

impl BenchResult {
    pub fn from_samples(name: &str, mut durations: Vec<Duration>) -> Self {
        let iterations = durations.len();
        if iterations == 0 {
            return Self {
                operation: name.to_string(),
                mean: Duration::ZERO,
                median: Duration::ZERO,
                p99: Duration::ZERO,
                std_dev: Duration::ZERO,
                iterations,
            };
        }

        durations.sort();
        let mean = durations.iter().sum::<Duration>() / iterations as u32;
        let median = if iterations % 2 == 1 {
            durations[iterations / 2]
        } else {
            let mid1 = durations[iterations / 2 - 1].as_nanos();
            let mid2 = durations[iterations / 2].as_nanos();
            Duration::from_nanos(((mid1 + mid2) / 2) as u64)
        };
        let p99 = durations[((iterations * 99).div_ceil(100)).saturating_sub(1)];

        let variance: f64 = if iterations > 1 {
            durations
                .iter()
                .map(|d| (d.as_nanos() as f64 - mean.as_nanos() as f64).powi(2))
                .sum::<f64>()
                / (iterations as f64 - 1.0)
        } else {
            0.0
        };
        let std_dev = Duration::from_nanos(variance.sqrt() as u64);

        Self {
            operation: name.to_string(),
            mean,
            median,
            p99,
            std_dev,
            iterations,
        }
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:20} | {:>10.2?} | {:>10.2?} | {:>10.2?} | {:>10.2?} | {:>8}",
            self.operation, self.mean, self.median, self.p99, self.std_dev, self.iterations
        )
    }
}

/// Time `operation` `iterations` times after one warm-up run
pub fn benchmark<F>(name: &str, iterations: usize, mut operation: F) -> BenchResult
where
    F: FnMut(),
{
    operation();

    let durations = (0..iterations)
        .map(|_| {
            let start = Instant::now();
            operation();
            start.elapsed()
        })
        .collect();
    BenchResult::from_samples(name, durations)
}

pub fn print_header() {
    println!(
        "{:20} | {:>10} | {:>10} | {:>10} | {:>10} | {:>8}",
        "Operation", "Mean", "Median", "P99", "StdDev", "Count"
    );
    println!("{}", "-".repeat(83));
}
