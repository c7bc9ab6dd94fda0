//! Synthetic normal-equation workloads.
//!
//! Each [`Contribution`] stands for one observation in a least-squares fit: a weight and
//! a gradient that is non-zero only on a few consecutive segments. Its share of the
//! normal matrix is `w * g * g^T`, which splits into one diagonal block per touched
//! segment and one off-diagonal block per pair of touched segments.

use crate::backend::MatrixBackend;
use crate::config::AssemblyConfig;
use crate::error::InvalidArgument;
use crate::locks::LockBank;
use crate::segments::SegmentPartition;
use crate::updater::SymmetricUpdater;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Gradient entries for one segment: `values[k]` belongs to global index `start + k`.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub segment: usize,
    pub start: usize,
    pub values: Array1<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    pub weight: f64,
    /// Ordered by strictly increasing segment.
    pub chunks: Vec<Chunk>,
}

impl Contribution {
    /// Global `(index, value)` pairs of the gradient.
    pub fn entries(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.chunks.iter().flat_map(|chunk| {
            chunk
                .values
                .iter()
                .enumerate()
                .map(move |(k, &v)| (chunk.start + k, v))
        })
    }

    /// Issues the diagonal and off-diagonal updates for `w * g * g^T`.
    pub fn apply<M, L>(&self, updater: &SymmetricUpdater<'_, M, L>) -> Result<(), InvalidArgument>
    where
        M: MatrixBackend,
        L: LockBank,
    {
        for (k, chunk) in self.chunks.iter().enumerate() {
            updater.update_diagonal(chunk.segment, chunk.start, &chunk.values, self.weight)?;
            for earlier in &self.chunks[..k] {
                updater.update_off_diagonal(
                    chunk.segment,
                    chunk.start,
                    &chunk.values,
                    earlier.segment,
                    earlier.start,
                    &earlier.values,
                    self.weight,
                )?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub partition: SegmentPartition,
    pub contributions: Vec<Contribution>,
}

impl Workload {
    /// Draws `config.contributions` reproducible contributions from `config.seed`.
    ///
    /// Weights and gradient entries are small integers, so any summation order gives
    /// the same matrix bit for bit.
    pub fn generate(config: &AssemblyConfig) -> Result<Self, InvalidArgument> {
        let partition = config.partition()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let n_segments = partition.n_segments();
        let contributions = (0..config.contributions)
            .map(|_| {
                let first = rng.gen_range(0..n_segments);
                let span = rng.gen_range(1..=config.max_span.max(1)).min(n_segments - first);
                let chunks = (first..first + span)
                    .filter(|&segment| partition.len_of(segment) > 0)
                    .map(|segment| {
                        let range = partition.range(segment);
                        let lo = rng.gen_range(range.clone());
                        let hi = rng.gen_range(lo + 1..=range.end);
                        let values = (lo..hi)
                            .map(|_| f64::from(rng.gen_range(-3i32..=3)))
                            .collect::<Array1<f64>>();
                        Chunk {
                            segment,
                            start: lo,
                            values,
                        }
                    })
                    .collect();
                Contribution {
                    weight: f64::from(rng.gen_range(1i32..=4)),
                    chunks,
                }
            })
            .collect();
        Ok(Self {
            partition,
            contributions,
        })
    }

    pub fn dim(&self) -> usize {
        self.partition.dim()
    }

    /// Lower triangle of `sum(w * g * g^T)`, computed serially without the updater.
    pub fn reference_lower(&self) -> Array2<f64> {
        let n = self.dim();
        let mut lower = Array2::<f64>::zeros((n, n));
        for contribution in &self.contributions {
            let entries: Vec<(usize, f64)> = contribution.entries().collect();
            for &(i, gi) in &entries {
                for &(j, gj) in &entries {
                    if j <= i {
                        lower[(i, j)] += contribution.weight * gi * gj;
                    }
                }
            }
        }
        lower
    }
}
