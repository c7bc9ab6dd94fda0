use crate::backend::MatrixBackend;
use crate::error::InvalidArgument;
use crate::locks::{DefaultBank, LockBank, LockLayout};
use crate::segments::SegmentPartition;
use ndarray::ArrayView1;
use std::fmt;
use std::marker::PhantomData;

/// Accumulates rank-one contributions into the lower triangle of a shared symmetric
/// matrix from many threads at once.
///
/// The index range is split into ordered segments. Every update touches one pair of
/// segments (or one segment with itself), and each such pair is guarded by one lock of
/// the bank, so updates to different blocks run in parallel while updates to the same
/// block are serialized. Only entries `(i, j)` with `i >= j` are ever written.
///
/// The updater holds the matrix's exclusive borrow for its whole life; drop it to get
/// the matrix back.
pub struct SymmetricUpdater<'a, M, L = DefaultBank>
where
    M: MatrixBackend,
    L: LockBank,
{
    handle: M::Handle,
    dims: (usize, usize),
    bank: L,
    partition: Option<&'a SegmentPartition>,
    marker: PhantomData<&'a mut M>,
}

impl<'a, M> SymmetricUpdater<'a, M, DefaultBank>
where
    M: MatrixBackend,
{
    /// Builds an updater over a square matrix split by `partition`.
    ///
    /// `requested_locks` caps the bank size; `None` gives one lock per segment pair.
    /// Every update is checked against the partition before it is applied.
    pub fn new(
        matrix: &'a mut M,
        partition: &'a SegmentPartition,
        requested_locks: Option<usize>,
    ) -> Result<Self, InvalidArgument> {
        Self::with_bank(matrix, partition, requested_locks)
    }

    /// Builds an updater that knows only the segment count.
    ///
    /// # Safety
    /// Callers must pass segment ids and start offsets consistent with one ordered,
    /// contiguous, non-overlapping partition of the matrix into `n_segments` segments.
    /// Updates under different locks are assumed to write disjoint entries; a start
    /// offset that strays into another segment's range is a data race.
    pub unsafe fn from_segment_count(
        matrix: &'a mut M,
        n_segments: usize,
        requested_locks: Option<usize>,
    ) -> Result<Self, InvalidArgument> {
        unsafe { Self::with_bank_unchecked(matrix, n_segments, requested_locks) }
    }
}

impl<'a, M, L> SymmetricUpdater<'a, M, L>
where
    M: MatrixBackend,
    L: LockBank,
{
    /// Same as [`SymmetricUpdater::new`] with an explicit locking strategy.
    pub fn with_bank(
        matrix: &'a mut M,
        partition: &'a SegmentPartition,
        requested_locks: Option<usize>,
    ) -> Result<Self, InvalidArgument> {
        let (rows, cols) = matrix.dims();
        if partition.dim() != rows || rows != cols {
            return Err(InvalidArgument::PartitionDimMismatch {
                partition: partition.dim(),
                rows,
                cols,
            });
        }
        let layout = LockLayout::new(partition.n_segments(), requested_locks)?;
        Ok(Self::assemble(matrix, layout, requested_locks, Some(partition)))
    }

    /// Same as [`SymmetricUpdater::from_segment_count`] with an explicit locking strategy.
    ///
    /// # Safety
    /// See [`SymmetricUpdater::from_segment_count`].
    pub unsafe fn with_bank_unchecked(
        matrix: &'a mut M,
        n_segments: usize,
        requested_locks: Option<usize>,
    ) -> Result<Self, InvalidArgument> {
        let layout = LockLayout::new(n_segments, requested_locks)?;
        Ok(Self::assemble(matrix, layout, requested_locks, None))
    }

    fn assemble(
        matrix: &'a mut M,
        layout: LockLayout,
        requested_locks: Option<usize>,
        partition: Option<&'a SegmentPartition>,
    ) -> Self {
        let dims = matrix.dims();
        log::debug!(
            "Symmetric updater over a {}x{} matrix: {layout}",
            dims.0,
            dims.1
        );
        if let Some(requested) = requested_locks.filter(|&r| r > 0) {
            if requested != layout.n_locks() {
                log::info!(
                    "Requested {requested} locks, realized {} to cover {} segment pairs",
                    layout.n_locks(),
                    layout.n_blocks()
                );
            }
        }
        Self {
            handle: matrix.handle(),
            dims,
            bank: L::build(layout),
            partition,
            marker: PhantomData,
        }
    }

    pub fn layout(&self) -> &LockLayout {
        self.bank.layout()
    }

    pub fn dims(&self) -> (usize, usize) {
        self.dims
    }

    /// `A[start1.., start2..] += scalar * v1 * v2^T`, mirrored into the lower triangle.
    ///
    /// `v1` lies in segment `seg1` starting at global index `start1`, `v2` likewise. The
    /// operands are swapped when needed so the higher segment supplies the rows.
    /// Empty vectors are a no-op and take no lock.
    ///
    /// # Errors
    /// [`InvalidArgument::EqualSegments`] when `seg1 == seg2`; use
    /// [`SymmetricUpdater::update_diagonal`] for a block on the diagonal. Range errors
    /// when the block leaves the matrix or, for partition-checked updaters, its segment.
    ///
    /// # Panics
    /// If either segment id is outside the bank the updater was built with.
    #[allow(clippy::too_many_arguments)]
    pub fn update_off_diagonal<'v>(
        &self,
        seg1: usize,
        start1: usize,
        v1: impl Into<ArrayView1<'v, f64>>,
        seg2: usize,
        start2: usize,
        v2: impl Into<ArrayView1<'v, f64>>,
        scalar: f64,
    ) -> Result<(), InvalidArgument> {
        if seg1 == seg2 {
            return Err(InvalidArgument::EqualSegments { segment: seg1 });
        }
        let (v1, v2) = (v1.into(), v2.into());
        if v1.is_empty() || v2.is_empty() {
            return Ok(());
        }

        let ((row_seg, row_start, rows), (col_seg, col_start, cols)) = if seg1 > seg2 {
            ((seg1, start1, v1), (seg2, start2, v2))
        } else {
            ((seg2, start2, v2), (seg1, start1, v1))
        };

        let lock = self.layout().lock_index(row_seg, col_seg);
        self.check_block(row_start, rows.len(), col_start, cols.len())?;
        if let Some(partition) = self.partition {
            partition.check(row_seg, row_start, rows.len())?;
            partition.check(col_seg, col_start, cols.len())?;
        }
        debug_assert!(
            row_start >= col_start + cols.len(),
            "segment order does not match index order: rows start at {row_start}, columns end at {}",
            col_start + cols.len()
        );

        let guard = self.bank.acquire(lock);
        // SAFETY: the block is in bounds, and every write to the (row_seg, col_seg)
        // region happens under `guard`.
        unsafe { M::add_outer(self.handle, row_start, col_start, rows, cols, scalar) };
        drop(guard);
        Ok(())
    }

    /// `A[start.., start..] += scalar * v * v^T`, lower triangle of the block only.
    ///
    /// Empty `v` is a no-op.
    ///
    /// # Panics
    /// If `seg` is outside the bank the updater was built with.
    pub fn update_diagonal<'v>(
        &self,
        seg: usize,
        start: usize,
        v: impl Into<ArrayView1<'v, f64>>,
        scalar: f64,
    ) -> Result<(), InvalidArgument> {
        let v = v.into();
        if v.is_empty() {
            return Ok(());
        }

        let lock = self.layout().lock_index(seg, seg);
        self.check_block(start, v.len(), start, v.len())?;
        if let Some(partition) = self.partition {
            partition.check(seg, start, v.len())?;
        }

        let guard = self.bank.acquire(lock);
        // SAFETY: as in `update_off_diagonal`, for the (seg, seg) region.
        unsafe { M::add_lower_rank_one(self.handle, start, v, scalar) };
        drop(guard);
        Ok(())
    }

    fn check_block(
        &self,
        row_start: usize,
        rows: usize,
        col_start: usize,
        cols: usize,
    ) -> Result<(), InvalidArgument> {
        let (dim_rows, dim_cols) = self.dims;
        let fits = |start: usize, len: usize, dim: usize| {
            start.checked_add(len).is_some_and(|end| end <= dim)
        };
        if fits(row_start, rows, dim_rows) && fits(col_start, cols, dim_cols) {
            Ok(())
        } else {
            Err(InvalidArgument::RangeOutOfBounds {
                row_start,
                rows,
                col_start,
                cols,
                dim_rows,
                dim_cols,
            })
        }
    }
}

impl<'a, M, L> fmt::Debug for SymmetricUpdater<'a, M, L>
where
    M: MatrixBackend,
    L: LockBank,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricUpdater")
            .field("dims", &self.dims)
            .field("layout", self.layout())
            .field("partition_checked", &self.partition.is_some())
            .finish()
    }
}

// The handle aliases the borrowed matrix. Sharing it is sound because every write goes
// through a lock of the bank and distinct locks guard disjoint regions.
unsafe impl<'a, M, L> Sync for SymmetricUpdater<'a, M, L>
where
    M: MatrixBackend + Send,
    L: LockBank + Sync,
{
}

unsafe impl<'a, M, L> Send for SymmetricUpdater<'a, M, L>
where
    M: MatrixBackend + Send,
    L: LockBank + Send,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{MutexBank, NoopBank};
    use ndarray::{Array2, array, s};

    const SENTINEL: f64 = -7777.0;

    fn sentinel_upper(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(i, j)| if j > i { SENTINEL } else { 0.0 })
    }

    #[test]
    fn off_diagonal_update_lands_below_the_diagonal() {
        let partition = SegmentPartition::from_lengths(&[5, 3]).unwrap();
        let mut alpha = Array2::<f64>::zeros((8, 8));
        {
            let updater = SymmetricUpdater::new(&mut alpha, &partition, None).unwrap();
            updater
                .update_off_diagonal(0, 0, &[1.0, 2.0], 1, 5, &[3.0, 4.0], 2.0)
                .unwrap();
        }
        let mut expected = Array2::<f64>::zeros((8, 8));
        expected
            .slice_mut(s![5..7, 0..2])
            .assign(&array![[6.0, 12.0], [8.0, 16.0]]);
        assert_eq!(alpha, expected);
    }

    #[test]
    fn operand_order_does_not_matter() {
        let partition = SegmentPartition::from_lengths(&[5, 3]).unwrap();
        let mut forward = Array2::<f64>::zeros((8, 8));
        let mut backward = Array2::<f64>::zeros((8, 8));
        SymmetricUpdater::new(&mut forward, &partition, None)
            .unwrap()
            .update_off_diagonal(0, 1, &[1.0, 2.0, 3.0], 1, 6, &[4.0, 5.0], 1.5)
            .unwrap();
        SymmetricUpdater::new(&mut backward, &partition, None)
            .unwrap()
            .update_off_diagonal(1, 6, &[4.0, 5.0], 0, 1, &[1.0, 2.0, 3.0], 1.5)
            .unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward[(6, 1)], 6.0);
        assert_eq!(forward[(7, 3)], 22.5);
    }

    #[test]
    fn diagonal_update_touches_only_the_lower_triangle() {
        let partition = SegmentPartition::from_lengths(&[2, 3]).unwrap();
        let mut alpha = sentinel_upper(5);
        SymmetricUpdater::new(&mut alpha, &partition, None)
            .unwrap()
            .update_diagonal(1, 2, &[1.0, 2.0, 3.0], 1.0)
            .unwrap();
        assert_eq!(alpha[(2, 2)], 1.0);
        assert_eq!(alpha[(3, 2)], 2.0);
        assert_eq!(alpha[(4, 3)], 6.0);
        assert_eq!(alpha[(4, 4)], 9.0);
        assert_eq!(alpha[(2, 3)], SENTINEL);
        assert_eq!(alpha[(3, 4)], SENTINEL);
        assert_eq!(alpha[(0, 0)], 0.0);
        assert_eq!(alpha[(1, 0)], 0.0);
        assert_eq!(alpha[(1, 1)], 0.0);
        assert_eq!(alpha[(0, 1)], SENTINEL);
        for i in 0..5 {
            for j in (i + 1)..5 {
                assert_eq!(alpha[(i, j)].to_bits(), SENTINEL.to_bits(), "upper entry ({i}, {j}) written");
            }
        }
    }

    #[test]
    fn empty_vectors_leave_the_matrix_untouched() {
        let partition = SegmentPartition::from_lengths(&[3, 3]).unwrap();
        let mut alpha = sentinel_upper(6);
        let before = alpha.clone();
        {
            let updater = SymmetricUpdater::new(&mut alpha, &partition, Some(1)).unwrap();
            let empty: [f64; 0] = [];
            updater
                .update_off_diagonal(1, 3, &empty, 0, 0, &[1.0], 1.0)
                .unwrap();
            updater
                .update_off_diagonal(1, 3, &[1.0], 0, 0, &empty, 1.0)
                .unwrap();
            updater.update_diagonal(0, 0, &empty, 1.0).unwrap();
        }
        assert_eq!(
            alpha.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            before.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn equal_segments_are_rejected() {
        let partition = SegmentPartition::from_lengths(&[4]).unwrap();
        let mut alpha = Array2::<f64>::zeros((4, 4));
        {
            let updater = SymmetricUpdater::new(&mut alpha, &partition, None).unwrap();
            let err = updater
                .update_off_diagonal(0, 0, &[1.0], 0, 1, &[1.0], 1.0)
                .unwrap_err();
            assert_eq!(err, InvalidArgument::EqualSegments { segment: 0 });
        }
        assert_eq!(alpha.sum(), 0.0);
    }

    #[test]
    fn ranges_leaving_their_segment_are_rejected() {
        let partition = SegmentPartition::from_lengths(&[3, 3]).unwrap();
        let mut alpha = Array2::<f64>::zeros((6, 6));
        {
            let updater = SymmetricUpdater::new(&mut alpha, &partition, None).unwrap();
            let err = updater
                .update_off_diagonal(0, 2, &[1.0, 1.0], 1, 3, &[1.0], 1.0)
                .unwrap_err();
            assert!(matches!(
                err,
                InvalidArgument::RangeOutsideSegment { segment: 0, .. }
            ));
            let err = updater.update_diagonal(1, 4, &[1.0, 1.0, 1.0], 1.0).unwrap_err();
            assert!(matches!(err, InvalidArgument::RangeOutOfBounds { .. }));
        }
        assert_eq!(alpha.sum(), 0.0);
    }

    #[test]
    fn partition_must_span_the_matrix() {
        let partition = SegmentPartition::from_lengths(&[3, 3]).unwrap();
        let mut alpha = Array2::<f64>::zeros((5, 5));
        let err = SymmetricUpdater::new(&mut alpha, &partition, None).unwrap_err();
        assert_eq!(
            err,
            InvalidArgument::PartitionDimMismatch {
                partition: 6,
                rows: 5,
                cols: 5
            }
        );
    }

    #[test]
    fn unchecked_updater_still_bounds_checks() {
        let mut alpha = Array2::<f64>::zeros((4, 4));
        let updater = unsafe { SymmetricUpdater::from_segment_count(&mut alpha, 2, None) }.unwrap();
        let err = updater
            .update_off_diagonal(1, 3, &[1.0, 1.0], 0, 0, &[1.0], 1.0)
            .unwrap_err();
        assert!(matches!(err, InvalidArgument::RangeOutOfBounds { .. }));
        assert_eq!(updater.layout().n_locks(), 3);
    }

    #[test]
    #[should_panic(expected = "outside a lock bank built for 2 segments")]
    fn segment_beyond_the_bank_is_fatal() {
        let mut alpha = Array2::<f64>::zeros((6, 6));
        let updater = unsafe { SymmetricUpdater::from_segment_count(&mut alpha, 2, None) }.unwrap();
        let _ = updater.update_diagonal(2, 4, &[1.0], 1.0);
    }

    #[test]
    fn noop_bank_matches_mutex_bank() {
        let partition = SegmentPartition::uniform(3, 2).unwrap();
        let mut locked = Array2::<f64>::zeros((6, 6));
        let mut unlocked = Array2::<f64>::zeros((6, 6));
        let apply = |seg_a: usize, seg_b: usize| {
            (
                seg_a,
                partition.start(seg_a),
                array![1.0, 2.0],
                seg_b,
                partition.start(seg_b),
                array![-1.0, 3.0],
            )
        };
        {
            let a = SymmetricUpdater::<_, MutexBank>::with_bank(&mut locked, &partition, Some(2)).unwrap();
            let b = SymmetricUpdater::<_, NoopBank>::with_bank(&mut unlocked, &partition, Some(2)).unwrap();
            for (sa, sb) in [(0, 1), (2, 0), (1, 2)] {
                let (s1, st1, v1, s2, st2, v2) = apply(sa, sb);
                a.update_off_diagonal(s1, st1, &v1, s2, st2, &v2, 3.0).unwrap();
                b.update_off_diagonal(s1, st1, &v1, s2, st2, &v2, 3.0).unwrap();
                a.update_diagonal(s1, st1, &v1, 0.5).unwrap();
                b.update_diagonal(s1, st1, &v1, 0.5).unwrap();
            }
        }
        assert_eq!(locked, unlocked);
        for i in 0..6 {
            for j in (i + 1)..6 {
                assert_eq!(locked[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn faer_storage_is_supported() {
        let partition = SegmentPartition::from_lengths(&[5, 3]).unwrap();
        let mut alpha = faer::Mat::<f64>::zeros(8, 8);
        {
            let updater = SymmetricUpdater::new(&mut alpha, &partition, None).unwrap();
            updater
                .update_off_diagonal(0, 0, &[1.0, 2.0], 1, 5, &[3.0, 4.0], 2.0)
                .unwrap();
            updater.update_diagonal(1, 5, &[1.0, 1.0], 1.0).unwrap();
        }
        assert_eq!(alpha[(5, 0)], 6.0);
        assert_eq!(alpha[(6, 1)], 16.0);
        assert_eq!(alpha[(6, 5)], 1.0);
        assert_eq!(alpha[(5, 6)], 0.0);
    }
}
