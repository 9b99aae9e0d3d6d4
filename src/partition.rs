//! Partitioned suffix index: the old buffer is cut into contiguous ranges
//! that are sorted independently, possibly in parallel.
//!
//! Matches never cross a partition boundary, so patches can come out
//! slightly larger than with a single index. In exchange construction
//! scales with the number of workers.

use std::ops::Range;
use std::thread;

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::suffix::{MatchIndex, OwnedSuffixArray};

/// Turns the configured suffix sort concurrency into a worker count.
///
/// `0` means sort on the calling thread, a positive value is used as is and
/// a negative value `-n` means "available parallelism minus n" (at least 1).
pub fn resolve_workers(concurrency: isize) -> usize {
    match concurrency {
        0 => 0,
        n if n > 0 => n as usize,
        n => {
            let cores = thread::available_parallelism().map_or(1, |c| c.get());
            cores.saturating_sub(n.unsigned_abs()).max(1)
        }
    }
}

/// Splits `0..len` into `partitions` near-equal contiguous ranges.
///
/// The count is clamped to `1..=len` so no range is empty unless `len` is 0.
pub fn partition_ranges(len: usize, partitions: usize) -> Vec<Range<usize>> {
    let p = partitions.clamp(1, len.max(1));
    let boundary = |k: usize| (k as u64 * len as u64 / p as u64) as usize;
    (0..p).map(|k| boundary(k)..boundary(k + 1)).collect()
}

#[derive(Debug)]
struct Partition {
    range: Range<usize>,
    sa: OwnedSuffixArray,
}

/// Suffix index made of one independently sorted array per partition.
#[derive(Debug)]
pub struct PartitionedSuffixArray<'a> {
    old: &'a [u8],
    partitions: Vec<Partition>,
    workers: usize,
}

impl<'a> PartitionedSuffixArray<'a> {
    /// Sorts each partition of `old`, on `workers` threads (0 = sequential).
    pub fn build(old: &'a [u8], partitions: usize, workers: usize) -> Result<Self> {
        let ranges = partition_ranges(old.len(), partitions);
        // never more workers than partitions to sort
        let workers = workers.min(ranges.len());
        debug!(
            partitions = ranges.len(),
            workers,
            old_len = old.len(),
            "sorting partitioned suffix array"
        );

        let sort = |range: &Range<usize>| Partition {
            range: range.clone(),
            sa: OwnedSuffixArray::build(&old[range.clone()]),
        };

        let partitions: Vec<Partition> = if workers == 0 {
            ranges.iter().map(sort).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            pool.install(|| ranges.par_iter().map(sort).collect())
        };

        Ok(Self {
            old,
            partitions,
            workers,
        })
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Threads the partitions were sorted on, 0 when sorted in place.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Longest match in any partition, with its partition index.
    ///
    /// On equal lengths the lowest partition index wins.
    pub fn search_partition(&self, new: &[u8]) -> (usize, usize, usize) {
        let mut best = (0, 0, 0);
        for (index, part) in self.partitions.iter().enumerate() {
            let local = &self.old[part.range.clone()];
            let (pos, len) = part.sa.view(local).search(new);
            if len > best.2 {
                best = (index, part.range.start + pos, len);
            }
        }
        best
    }
}

impl MatchIndex for PartitionedSuffixArray<'_> {
    #[inline]
    fn search(&self, new: &[u8]) -> (usize, usize) {
        let (_, pos, len) = self.search_partition(new);
        (pos, len)
    }
}
