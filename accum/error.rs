use thiserror::Error;

/// Caller bookkeeping errors reported synchronously by the updater.
///
/// None of these leave the matrix modified: every check runs before a lock is taken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidArgument {
    #[error("the segment count must be at least 1")]
    NoSegments,
    #[error("{n_segments} segments have more segment pairs than fit in a usize")]
    TooManySegments { n_segments: usize },
    #[error("off-diagonal update requires two distinct segments, got segment {segment} twice")]
    EqualSegments { segment: usize },
    #[error(
        "a {rows}x{cols} block at ({row_start}, {col_start}) does not fit a {dim_rows}x{dim_cols} matrix"
    )]
    RangeOutOfBounds {
        row_start: usize,
        rows: usize,
        col_start: usize,
        cols: usize,
        dim_rows: usize,
        dim_cols: usize,
    },
    #[error(
        "{len} indices starting at {start} leave segment {segment}, which covers {segment_start}..{segment_end}"
    )]
    RangeOutsideSegment {
        segment: usize,
        start: usize,
        len: usize,
        segment_start: usize,
        segment_end: usize,
    },
    #[error("partition spans {partition} indices but the matrix is {rows}x{cols}")]
    PartitionDimMismatch {
        partition: usize,
        rows: usize,
        cols: usize,
    },
}
