use crate::error::InvalidArgument;
use std::ops::Range;

/// Ordered, contiguous, gap-free split of `0..dim` into segments.
///
/// Segment `s` always covers higher indices than segment `s - 1`, which is the ordering
/// the updater relies on to keep every write in the lower triangle. Segments may be
/// empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentPartition {
    // `bounds[s]..bounds[s + 1]` is segment `s`.
    bounds: Vec<usize>,
}

impl SegmentPartition {
    pub fn from_lengths(lengths: &[usize]) -> Result<Self, InvalidArgument> {
        if lengths.is_empty() {
            return Err(InvalidArgument::NoSegments);
        }
        let mut bounds = Vec::with_capacity(lengths.len() + 1);
        bounds.push(0);
        let mut end = 0;
        for &len in lengths {
            end += len;
            bounds.push(end);
        }
        Ok(Self { bounds })
    }

    pub fn uniform(n_segments: usize, segment_length: usize) -> Result<Self, InvalidArgument> {
        Self::from_lengths(&vec![segment_length; n_segments])
    }

    pub fn n_segments(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Total number of indices covered.
    pub fn dim(&self) -> usize {
        self.bounds[self.bounds.len() - 1]
    }

    pub fn start(&self, segment: usize) -> usize {
        self.bounds[segment]
    }

    pub fn len_of(&self, segment: usize) -> usize {
        self.bounds[segment + 1] - self.bounds[segment]
    }

    pub fn range(&self, segment: usize) -> Range<usize> {
        self.bounds[segment]..self.bounds[segment + 1]
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.bounds.windows(2).map(|w| w[0]..w[1])
    }

    /// Segment holding global index `index`, or `None` past the end.
    pub fn segment_of(&self, index: usize) -> Option<usize> {
        if index >= self.dim() {
            return None;
        }
        // First bound strictly greater than `index` closes the owning segment; empty
        // segments share a bound with their successor and are skipped.
        Some(self.bounds.partition_point(|&b| b <= index) - 1)
    }

    /// Whether `start..start + len` lies inside `segment`.
    pub fn contains(&self, segment: usize, start: usize, len: usize) -> bool {
        let range = self.range(segment);
        start >= range.start && start + len <= range.end
    }

    pub(crate) fn check(&self, segment: usize, start: usize, len: usize) -> Result<(), InvalidArgument> {
        if self.contains(segment, start, len) {
            return Ok(());
        }
        let range = self.range(segment);
        Err(InvalidArgument::RangeOutsideSegment {
            segment,
            start,
            len,
            segment_start: range.start,
            segment_end: range.end,
        })
    }
}
