//! Chunk-count estimation from a runtime size metric.
//!
//! The number of chunks a query set is split into depends on how expensive
//! each query is, which in turn scales with the size of the searched
//! database. The estimator maps that size onto a chunk target:
//!
//! `chunk_target = clamp(round(K / S), min, max)`
//!
//! where `S` is the size metric and `K` the per-chunk work capacity.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Default per-chunk capacity, tuned for BLASTN against nucleotide databases.
pub const DEFAULT_CAPACITY: f64 = 3e14;
/// Default lower bound on the chunk count (`nseq_min`).
pub const DEFAULT_MIN_CHUNKS: usize = 10;
/// Default upper bound on the chunk count (`nseq_max`).
pub const DEFAULT_MAX_CHUNKS: usize = 100_000;

/// Errors raised while estimating a partition plan.
#[derive(Debug, Error)]
pub enum SizingError {
    /// Size metric was non-positive, not finite, or could not be parsed.
    #[error("invalid size metric: {0}")]
    InvalidMetric(String),

    /// Chunk bounds violate `0 < min <= max`.
    #[error("invalid chunk bounds: min {min}, max {max}")]
    InvalidBounds {
        /// Requested lower bound.
        min: usize,
        /// Requested upper bound.
        max: usize,
    },

    /// Capacity constant was non-positive or not finite.
    #[error("invalid capacity constant: {0}")]
    InvalidCapacity(f64),

    /// Metric file could not be read.
    #[error("failed to read size metric from {path}: {source}")]
    Read {
        /// File that was being read.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
}

/// Scale of the reference resource driving the partition decision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeMetric(f64);

impl SizeMetric {
    /// Wrap a raw metric, rejecting `<= 0`, NaN and infinity.
    pub fn new(value: f64) -> Result<Self, SizingError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(SizingError::InvalidMetric(format!(
                "metric must be a positive finite number, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Raw metric value.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl std::str::FromStr for SizeMetric {
    type Err = SizingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SizingError::InvalidMetric("empty metric".to_string()));
        }
        let value = trimmed
            .parse::<u64>()
            .map(|v| v as f64)
            .or_else(|_| trimmed.parse::<f64>())
            .map_err(|_| SizingError::InvalidMetric(format!("unparsable metric '{trimmed}'")))?;
        Self::new(value)
    }
}

/// Read a size metric written by an upstream step (one decimal number).
pub fn read_size_metric<P: AsRef<Path>>(path: P) -> Result<SizeMetric, SizingError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| SizingError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let first = lines.next().unwrap_or("");
    if lines.next().is_some() {
        return Err(SizingError::InvalidMetric(format!(
            "{} holds more than one value",
            path.display()
        )));
    }
    first.parse::<SizeMetric>().map_err(|err| match err {
        SizingError::InvalidMetric(msg) => {
            SizingError::InvalidMetric(format!("{msg} (in {})", path.display()))
        }
        other => other,
    })
}

/// Inclusive bounds on the number of chunks (`nseq_min`, `nseq_max`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkBounds {
    /// Lower bound, at least 1.
    pub min: usize,
    /// Upper bound, at least `min`.
    pub max: usize,
}

impl ChunkBounds {
    /// Construct validated bounds.
    pub fn new(min: usize, max: usize) -> Result<Self, SizingError> {
        let bounds = Self { min, max };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Check `0 < min <= max`.
    pub fn validate(&self) -> Result<(), SizingError> {
        if self.min == 0 || self.min > self.max {
            return Err(SizingError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    fn clamp_f64(&self, value: f64) -> usize {
        if value <= self.min as f64 {
            self.min
        } else if value >= self.max as f64 {
            self.max
        } else {
            value as usize
        }
    }
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_CHUNKS,
            max: DEFAULT_MAX_CHUNKS,
        }
    }
}

/// Compute `clamp(round(capacity / metric), min, max)`.
pub fn chunk_target(
    metric: SizeMetric,
    bounds: ChunkBounds,
    capacity: f64,
) -> Result<usize, SizingError> {
    bounds.validate()?;
    if !capacity.is_finite() || capacity <= 0.0 {
        return Err(SizingError::InvalidCapacity(capacity));
    }
    Ok(bounds.clamp_f64((capacity / metric.value()).round()))
}

/// Outcome of the size estimation step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionPlan {
    /// Metric the plan was derived from.
    pub metric: SizeMetric,
    /// Bounds applied to the target.
    pub bounds: ChunkBounds,
    /// Capacity constant `K`.
    pub capacity: f64,
    /// Number of chunks to aim for.
    pub chunk_target: usize,
}

impl PartitionPlan {
    /// Derive a plan from a metric, bounds and capacity.
    pub fn estimate(
        metric: SizeMetric,
        bounds: ChunkBounds,
        capacity: f64,
    ) -> Result<Self, SizingError> {
        let chunk_target = chunk_target(metric, bounds, capacity)?;
        Ok(Self {
            metric,
            bounds,
            capacity,
            chunk_target,
        })
    }

    /// Records per chunk for a known or estimated record total.
    pub fn records_per_chunk(&self, total_records: u64) -> u64 {
        records_per_chunk(total_records, self.chunk_target)
    }
}

/// `max(1, ceil(total / target))`.
pub(crate) fn records_per_chunk(total_records: u64, chunk_target: usize) -> u64 {
    let target = chunk_target.max(1) as u64;
    total_records.div_ceil(target).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn small_metric_clamps_to_max() {
        let metric = SizeMetric::new(1.0).unwrap();
        let target = chunk_target(metric, ChunkBounds::default(), DEFAULT_CAPACITY).unwrap();
        assert_eq!(target, DEFAULT_MAX_CHUNKS);
    }

    #[test]
    fn huge_metric_clamps_to_min() {
        let metric = SizeMetric::new(1e18).unwrap();
        let target = chunk_target(metric, ChunkBounds::default(), DEFAULT_CAPACITY).unwrap();
        assert_eq!(target, DEFAULT_MIN_CHUNKS);
    }

    #[test]
    fn in_range_value_is_rounded() {
        let metric = SizeMetric::new(3e11).unwrap();
        let target = chunk_target(metric, ChunkBounds::default(), DEFAULT_CAPACITY).unwrap();
        assert_eq!(target, 1000);

        let metric = SizeMetric::new(8.0).unwrap();
        let bounds = ChunkBounds::new(1, 100).unwrap();
        // 100 / 8 = 12.5 rounds away from zero
        assert_eq!(chunk_target(metric, bounds, 100.0).unwrap(), 13);
    }

    #[test]
    fn rejects_non_positive_metric() {
        assert!(matches!(
            SizeMetric::new(0.0),
            Err(SizingError::InvalidMetric(_))
        ));
        assert!(matches!(
            SizeMetric::new(-3.0),
            Err(SizingError::InvalidMetric(_))
        ));
        assert!(SizeMetric::new(f64::NAN).is_err());
        assert!(SizeMetric::new(f64::INFINITY).is_err());
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(matches!(
            ChunkBounds::new(5, 4),
            Err(SizingError::InvalidBounds { min: 5, max: 4 })
        ));
        assert!(ChunkBounds::new(0, 4).is_err());
    }

    #[test]
    fn records_per_chunk_rounds_up() {
        assert_eq!(records_per_chunk(15, 10), 2);
        assert_eq!(records_per_chunk(5, 10), 1);
        assert_eq!(records_per_chunk(0, 10), 1);
        assert_eq!(records_per_chunk(100, 10), 10);
    }

    #[test]
    fn metric_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  123456789  ").unwrap();
        let metric = read_size_metric(file.path()).unwrap();
        assert_eq!(metric.value(), 123456789.0);
    }

    #[test]
    fn metric_file_with_garbage_is_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lots").unwrap();
        assert!(matches!(
            read_size_metric(file.path()),
            Err(SizingError::InvalidMetric(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0").unwrap();
        assert!(matches!(
            read_size_metric(file.path()),
            Err(SizingError::InvalidMetric(_))
        ));
    }
}
