//! Equi-width histograms over integer columns, used to estimate predicate selectivity.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEq,
    GreaterThan,
    GreaterThanOrEq,
}

/// Buckets split `[min, max]` into near-equal integer widths; when the range does not divide
/// evenly the leading buckets are one wider.
#[derive(Debug, Clone)]
pub struct IntHistogram {
    min: i32,
    max: i32,
    base_width: i64,
    wide_buckets: usize,
    counts: Vec<u64>,
    total: u64,
}

impl IntHistogram {
    /// A histogram with at most `buckets` buckets. There are never more buckets than values in
    /// the range. `min` and `max` are swapped if given in the wrong order.
    pub fn new(buckets: usize, min: i32, max: i32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let range = i64::from(max) - i64::from(min) + 1;
        let buckets = (buckets.max(1) as i64).min(range);
        Self {
            min,
            max,
            base_width: range / buckets,
            wide_buckets: (range % buckets) as usize,
            counts: vec![0; buckets as usize],
            total: 0,
        }
    }

    fn width(&self, bucket: usize) -> i64 {
        self.base_width + i64::from(bucket < self.wide_buckets)
    }

    fn lower_bound(&self, bucket: usize) -> i64 {
        i64::from(self.min) + bucket as i64 * self.base_width + bucket.min(self.wide_buckets) as i64
    }

    fn bucket_of(&self, value: i32) -> usize {
        let offset = i64::from(value) - i64::from(self.min);
        let wide_span = self.wide_buckets as i64 * (self.base_width + 1);
        if offset < wide_span {
            (offset / (self.base_width + 1)) as usize
        } else {
            self.wide_buckets + ((offset - wide_span) / self.base_width) as usize
        }
    }

    fn in_range(&self, value: i64) -> bool {
        (i64::from(self.min)..=i64::from(self.max)).contains(&value)
    }

    /// Record one value; values outside `[min, max]` are ignored
    pub fn add_value(&mut self, value: i32) {
        if !self.in_range(i64::from(value)) {
            return;
        }
        let bucket = self.bucket_of(value);
        self.counts[bucket] += 1;
        self.total += 1;
    }

    pub fn num_buckets(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Fraction of values strictly below `value`
    fn fraction_below(&self, value: i64) -> f64 {
        if value <= i64::from(self.min) {
            return 0.0;
        }
        if value > i64::from(self.max) {
            return 1.0;
        }
        let bucket = self.bucket_of(value as i32);
        let before: u64 = self.counts[..bucket].iter().sum();
        let within = (value - self.lower_bound(bucket)) as f64 / self.width(bucket) as f64;
        (before as f64 + self.counts[bucket] as f64 * within) / self.total as f64
    }

    fn fraction_equal(&self, value: i64) -> f64 {
        if !self.in_range(value) {
            return 0.0;
        }
        let bucket = self.bucket_of(value as i32);
        self.counts[bucket] as f64 / self.width(bucket) as f64 / self.total as f64
    }

    /// Estimated fraction of recorded values satisfying `op value`
    pub fn estimate_selectivity(&self, op: PredicateOp, value: i32) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let value = i64::from(value);
        let estimate = match op {
            PredicateOp::Equals => self.fraction_equal(value),
            PredicateOp::NotEquals => 1.0 - self.fraction_equal(value),
            PredicateOp::LessThan => self.fraction_below(value),
            PredicateOp::LessThanOrEq => self.fraction_below(value + 1),
            PredicateOp::GreaterThan => 1.0 - self.fraction_below(value + 1),
            PredicateOp::GreaterThanOrEq => 1.0 - self.fraction_below(value),
        };
        estimate.clamp(0.0, 1.0)
    }

    /// Expected selectivity of an equality predicate whose constant is drawn from the data
    pub fn avg_selectivity(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f64;
        self.counts
            .iter()
            .enumerate()
            .map(|(bucket, count)| {
                let share = *count as f64 / total;
                share * share / self.width(bucket) as f64
            })
            .sum()
    }
}

impl Display for IntHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntHistogram[{}, {}] {{", self.min, self.max)?;
        for (bucket, count) in self.counts.iter().enumerate() {
            let lo = self.lower_bound(bucket);
            let hi = lo + self.width(bucket) - 1;
            if bucket > 0 {
                write!(f, ",")?;
            }
            write!(f, " [{lo}, {hi}]: {count}")?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod histogram_tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn uniform() -> IntHistogram {
        let mut histogram = IntHistogram::new(10, 1, 100);
        (1..=100).for_each(|v| histogram.add_value(v));
        histogram
    }

    #[test]
    fn test_uneven_bucket_widths() {
        let histogram = IntHistogram::new(3, 0, 9);
        assert_eq!(histogram.num_buckets(), 3);
        assert_eq!(
            (0..3).map(|b| histogram.width(b)).collect::<Vec<_>>(),
            vec![4, 3, 3]
        );
        assert_eq!(histogram.bucket_of(3), 0);
        assert_eq!(histogram.bucket_of(4), 1);
        assert_eq!(histogram.bucket_of(9), 2);
        //  never more buckets than values
        assert_eq!(IntHistogram::new(50, 1, 5).num_buckets(), 5);
    }

    #[test]
    fn test_uniform_estimates() {
        let histogram = uniform();
        assert!(close(histogram.estimate_selectivity(PredicateOp::Equals, 5), 0.01));
        assert!(close(histogram.estimate_selectivity(PredicateOp::NotEquals, 5), 0.99));
        assert!(close(histogram.estimate_selectivity(PredicateOp::LessThan, 51), 0.5));
        assert!(close(histogram.estimate_selectivity(PredicateOp::LessThanOrEq, 50), 0.5));
        assert!(close(histogram.estimate_selectivity(PredicateOp::GreaterThan, 50), 0.5));
        assert!(close(histogram.estimate_selectivity(PredicateOp::GreaterThanOrEq, 51), 0.5));
    }

    #[test]
    fn test_estimates_outside_range() {
        let histogram = uniform();
        assert_eq!(histogram.estimate_selectivity(PredicateOp::LessThan, 1), 0.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::LessThan, -7), 0.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::LessThanOrEq, 100), 1.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::GreaterThan, 100), 0.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::GreaterThanOrEq, 1), 1.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::Equals, 101), 0.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::NotEquals, 0), 1.0);
    }

    #[test]
    fn test_skewed_data() {
        let mut histogram = IntHistogram::new(4, 0, 39);
        (0..30).for_each(|_| histogram.add_value(5));
        (0..10).for_each(|v| histogram.add_value(30 + v));
        //  ignored
        histogram.add_value(40);
        histogram.add_value(-1);
        assert_eq!(histogram.total(), 40);

        assert!(close(histogram.estimate_selectivity(PredicateOp::LessThan, 10), 0.75));
        assert!(close(histogram.estimate_selectivity(PredicateOp::Equals, 5), 0.075));
        assert!(close(histogram.estimate_selectivity(PredicateOp::Equals, 15), 0.0));
        assert!(close(histogram.estimate_selectivity(PredicateOp::GreaterThanOrEq, 30), 0.25));
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = IntHistogram::new(10, 0, 1000);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::NotEquals, 3), 0.0);
        assert_eq!(histogram.estimate_selectivity(PredicateOp::GreaterThan, -5), 0.0);
        assert_eq!(histogram.avg_selectivity(), 0.0);
    }

    #[test]
    fn test_avg_selectivity_and_display() {
        let histogram = uniform();
        assert!(close(histogram.avg_selectivity(), 0.01));
        let rendered = histogram.to_string();
        assert!(rendered.starts_with("IntHistogram[1, 100]"));
        assert!(rendered.contains("[91, 100]: 10"));
    }

    #[test]
    fn test_selectivity_bounds_hold_across_values() {
        let histogram = uniform();
        let ops = [
            PredicateOp::Equals,
            PredicateOp::NotEquals,
            PredicateOp::LessThan,
            PredicateOp::LessThanOrEq,
            PredicateOp::GreaterThan,
            PredicateOp::GreaterThanOrEq,
        ];
        for value in -10..=110 {
            for op in ops {
                let s = histogram.estimate_selectivity(op, value);
                assert!((0.0..=1.0).contains(&s), "{op:?} {value} -> {s}");
            }
        }
    }
}
