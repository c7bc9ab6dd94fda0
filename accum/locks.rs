use crate::error::InvalidArgument;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

/// Sizing of a lock bank for a given segment count.
///
/// Every unordered pair of segments (self-pairs included) is a lock-block. Blocks are
/// enumerated with a triangular pairing and consecutive runs of `block_length` blocks
/// share one lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockLayout {
    n_segments: usize,
    n_blocks: usize,
    block_length: usize,
    n_locks: usize,
}

impl LockLayout {
    /// Sizes the bank. `requested_locks` of `None`, `Some(0)` or more than the number of
    /// blocks gives one lock per block; otherwise the realized count is the smallest
    /// count that covers every block with runs of `n_blocks / requested` blocks, which
    /// can exceed the request.
    pub fn new(n_segments: usize, requested_locks: Option<usize>) -> Result<Self, InvalidArgument> {
        if n_segments == 0 {
            return Err(InvalidArgument::NoSegments);
        }
        let n_blocks = n_segments
            .checked_add(1)
            .and_then(|next| n_segments.checked_mul(next))
            .map(|pairs| pairs / 2)
            .ok_or(InvalidArgument::TooManySegments { n_segments })?;
        let (block_length, n_locks) = match requested_locks {
            Some(requested) if requested > 0 && requested <= n_blocks => {
                let block_length = n_blocks / requested;
                (block_length, n_blocks.div_ceil(block_length))
            }
            _ => (1, n_blocks),
        };
        Ok(Self {
            n_segments,
            n_blocks,
            block_length,
            n_locks,
        })
    }

    pub fn n_segments(&self) -> usize {
        self.n_segments
    }

    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn n_locks(&self) -> usize {
        self.n_locks
    }

    /// Lock index guarding the block of segments `a` and `b`, in either order.
    ///
    /// # Panics
    /// If either segment is outside the layout. That means the bank was sized for a
    /// different partition than the one the caller is using, and writing anyway could
    /// corrupt the matrix.
    #[inline]
    pub fn lock_index(&self, a: usize, b: usize) -> usize {
        let hi = a.max(b);
        assert!(
            hi < self.n_segments,
            "segment {hi} is outside a lock bank built for {} segments",
            self.n_segments
        );
        let index = block_id(a, b) / self.block_length;
        assert!(
            index < self.n_locks,
            "lock index {index} is outside a bank of {} locks",
            self.n_locks
        );
        index
    }
}

impl fmt::Display for LockLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} segments, {} blocks, {} blocks per lock, {} locks",
            self.n_segments, self.n_blocks, self.block_length, self.n_locks
        )
    }
}

/// Triangular enumeration of unordered segment pairs: `hi * (hi + 1) / 2 + lo`.
///
/// Unique for every pair with `lo <= hi` and dense over `0..n * (n + 1) / 2`. The
/// triangle is keyed on the larger segment; keying it on the smaller one maps distinct
/// pairs such as `(0, 2)` and `(1, 1)` to the same id.
#[inline]
pub fn block_id(a: usize, b: usize) -> usize {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    hi * (hi + 1) / 2 + lo
}

/// Strategy for serializing writes to one lock-block.
///
/// Acquiring returns a guard; dropping the guard releases the lock.
pub trait LockBank {
    type Guard<'g>
    where
        Self: 'g;

    fn build(layout: LockLayout) -> Self;

    fn layout(&self) -> &LockLayout;

    /// Blocks until lock `index` is free and takes it.
    fn acquire(&self, index: usize) -> Self::Guard<'_>;
}

/// One `Mutex<()>` per lock, all allocated up front.
pub struct MutexBank {
    layout: LockLayout,
    locks: Box<[Mutex<()>]>,
}

impl LockBank for MutexBank {
    type Guard<'g> = MutexGuard<'g, ()>;

    fn build(layout: LockLayout) -> Self {
        let locks = (0..layout.n_locks())
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { layout, locks }
    }

    fn layout(&self) -> &LockLayout {
        &self.layout
    }

    fn acquire(&self, index: usize) -> Self::Guard<'_> {
        match self.locks[index].lock() {
            Ok(guard) => guard,
            // The region behind this lock may hold a half-applied update.
            Err(_) => panic!("lock {index} was poisoned by an update that panicked mid-write"),
        }
    }
}

impl fmt::Debug for MutexBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexBank")
            .field("layout", &self.layout)
            .finish()
    }
}

/// Bank for builds and callers without worker threads. Acquire is free and the type
/// is deliberately `!Sync`, so an updater built on it cannot be shared across threads.
#[derive(Debug)]
pub struct NoopBank {
    layout: LockLayout,
    marker: PhantomData<Cell<()>>,
}

impl LockBank for NoopBank {
    type Guard<'g> = ();

    fn build(layout: LockLayout) -> Self {
        Self {
            layout,
            marker: PhantomData,
        }
    }

    fn layout(&self) -> &LockLayout {
        &self.layout
    }

    #[inline]
    fn acquire(&self, index: usize) -> Self::Guard<'_> {
        debug_assert!(index < self.layout.n_locks());
    }
}

/// The bank used by [`crate::SymmetricUpdater::new`].
#[cfg(feature = "parallel")]
pub type DefaultBank = MutexBank;

/// The bank used by [`crate::SymmetricUpdater::new`].
#[cfg(not(feature = "parallel"))]
pub type DefaultBank = NoopBank;
