use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use serde::Serialize;

use crate::classify::{ClassifiedEvent, SourceId};
use crate::error::AnalysisError;

/// How many offenders a bin remembers.
pub const TOP_SOURCES: usize = 5;

pub fn validate_bin_width(width: f64) -> Result<(), AnalysisError> {
    if width.is_finite() && width > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::InvalidConfiguration(format!(
            "bin width must be a positive number of seconds, got {width}"
        )))
    }
}

/// Largest `i` with `i * width <= timestamp`, so bin `i` ends exactly where
/// bin `i + 1` starts. The quotient alone can land one bin off when `width`
/// is not a binary fraction.
fn bucket_index(timestamp: f64, width: f64) -> i64 {
    let mut index = (timestamp / width).floor() as i64;
    while index > i64::MIN && index as f64 * width > timestamp {
        index -= 1;
    }
    while index < i64::MAX && (index + 1) as f64 * width <= timestamp {
        index += 1;
    }
    index
}

/// Floor of `timestamp` to a multiple of `width`. Depends only on the
/// wall clock, so bins from different traces line up.
pub fn bucket_start(timestamp: f64, width: f64) -> f64 {
    bucket_index(timestamp, width) as f64 * width
}

/// Per-source counts for one bin, remembering first-seen order.
#[derive(Clone, Debug, Default)]
pub struct SourceTally {
    slots: HashMap<SourceId, usize>,
    counts: Vec<(SourceId, u64)>,
}

impl SourceTally {
    pub fn add(&mut self, source: SourceId) {
        match self.slots.get(&source) {
            Some(&slot) => self.counts[slot].1 += 1,
            None => {
                self.slots.insert(source, self.counts.len());
                self.counts.push((source, 1));
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    /// Distinct real addresses; the unknown sentinel is not an attacker.
    pub fn unique_known(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(source, _)| source.is_known())
            .count() as u64
    }

    /// Heaviest sources first, ties in first-seen order.
    pub fn top(&self, n: usize, include_unknown: bool) -> Vec<(SourceId, u64)> {
        self.counts
            .iter()
            .filter(|(source, _)| include_unknown || source.is_known())
            .copied()
            .sorted_by(|a, b| b.1.cmp(&a.1))
            .take(n)
            .collect()
    }
}

/// A bin whose stream has ended, before alerting.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub start: f64,
    pub count: u64,
    pub unique_sources: u64,
    pub top_sources: Vec<(SourceId, u64)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeBin {
    pub start: f64,
    pub count: u64,
    pub unique_sources: u64,
    pub top_sources: Vec<(SourceId, u64)>,
    pub alert: bool,
}

/// Streaming bucketer. Memory grows with the number of distinct bins
/// touched, not with the trace.
#[derive(Debug)]
pub struct BinAggregator {
    width: f64,
    bins: BTreeMap<i64, SourceTally>,
}

impl BinAggregator {
    pub fn new(width: f64) -> Result<Self, AnalysisError> {
        validate_bin_width(width)?;
        Ok(BinAggregator {
            width,
            bins: BTreeMap::new(),
        })
    }

    pub fn push(&mut self, event: &ClassifiedEvent) {
        self.bins
            .entry(bucket_index(event.timestamp, self.width))
            .or_default()
            .add(event.source);
    }

    pub fn finish(self, rank_unknown_sources: bool) -> Vec<Bucket> {
        let width = self.width;
        self.bins
            .into_iter()
            .map(|(index, tally)| Bucket {
                start: index as f64 * width,
                count: tally.total(),
                unique_sources: tally.unique_known(),
                top_sources: tally.top(TOP_SOURCES, rank_unknown_sources),
            })
            .collect()
    }
}

pub fn aggregate<I>(
    events: I,
    width: f64,
    rank_unknown_sources: bool,
) -> Result<Vec<Bucket>, AnalysisError>
where
    I: IntoIterator<Item = ClassifiedEvent>,
{
    let mut aggregator = BinAggregator::new(width)?;
    for event in events {
        aggregator.push(&event);
    }
    Ok(aggregator.finish(rank_unknown_sources))
}
