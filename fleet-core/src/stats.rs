use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Percentiles reported for a latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum Percentile {
    #[strum(serialize = "p1")]
    P1,
    #[strum(serialize = "p5")]
    P5,
    #[strum(serialize = "p25")]
    P25,
    #[strum(serialize = "p50")]
    P50,
    #[strum(serialize = "p75")]
    P75,
    #[strum(serialize = "p95")]
    P95,
    #[strum(serialize = "p99")]
    P99,
}

impl Percentile {
    /// Index into an ascending sample of `n` elements (no interpolation).
    ///
    /// Lower percentiles count up from the front, upper ones down from the back,
    /// both with integer division. The result is clamped to `[0, n - 1]`.
    #[must_use]
    pub fn index(self, n: usize) -> usize {
        let raw = match self {
            Self::P1 => (n / 100).saturating_sub(1),
            Self::P5 => (n / 20).saturating_sub(1),
            Self::P25 => (n / 4).saturating_sub(1),
            Self::P50 => (n / 2).saturating_sub(1),
            Self::P75 => n.saturating_sub(n / 4).saturating_sub(1),
            Self::P95 => n.saturating_sub(n / 20).saturating_sub(1),
            Self::P99 => n.saturating_sub(n / 100).saturating_sub(1),
        };
        raw.min(n.saturating_sub(1))
    }
}

/// Summary statistics of one latency sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p1: Duration,
    pub p5: Duration,
    pub p25: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Sorts the sample and summarizes it. An empty sample has no summary.
    #[must_use]
    pub fn from_samples(mut samples: Vec<Duration>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let n = samples.len();
        let total: u128 = samples.iter().map(Duration::as_nanos).sum();
        let mean = nanos(total / n as u128);
        let at = |p: Percentile| samples[p.index(n)];

        Some(Self {
            count: n as u64,
            mean,
            min: samples[0],
            max: samples[n - 1],
            p1: at(Percentile::P1),
            p5: at(Percentile::P5),
            p25: at(Percentile::P25),
            p50: at(Percentile::P50),
            p75: at(Percentile::P75),
            p95: at(Percentile::P95),
            p99: at(Percentile::P99),
        })
    }

    #[must_use]
    pub fn get(&self, p: Percentile) -> Duration {
        match p {
            Percentile::P1 => self.p1,
            Percentile::P5 => self.p5,
            Percentile::P25 => self.p25,
            Percentile::P50 => self.p50,
            Percentile::P75 => self.p75,
            Percentile::P95 => self.p95,
            Percentile::P99 => self.p99,
        }
    }

    /// Combines per-worker summaries: counts add up, min/max are taken across all,
    /// mean and percentiles are the plain average of the workers' values.
    #[must_use]
    pub fn average(parts: &[Self]) -> Option<Self> {
        let first = parts.first()?;
        let k = parts.len() as u128;
        let avg = |f: fn(&Self) -> Duration| {
            nanos(parts.iter().map(|s| f(s).as_nanos()).sum::<u128>() / k)
        };

        Some(Self {
            count: parts.iter().map(|s| s.count).sum(),
            mean: avg(|s| s.mean),
            min: parts.iter().map(|s| s.min).min().unwrap_or(first.min),
            max: parts.iter().map(|s| s.max).max().unwrap_or(first.max),
            p1: avg(|s| s.p1),
            p5: avg(|s| s.p5),
            p25: avg(|s| s.p25),
            p50: avg(|s| s.p50),
            p75: avg(|s| s.p75),
            p95: avg(|s| s.p95),
            p99: avg(|s| s.p99),
        })
    }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}
