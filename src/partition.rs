//! Work partitioning across ready instances.
//!
//! Jobs are split into contiguous, equal-size shards, one per instance, in
//! instance order. The shard size is `jobs.len() / slaves` (integer
//! division); the trailing `jobs.len() % slaves` jobs are left out of every
//! shard and reported by [`PartitionPlan::dropped`].
//!
//! # Example
//!
//! ```
//! use elastic_fleet::partition::partition;
//!
//! let jobs = ["s1", "s2", "s3", "s4", "s5"];
//! let plan = partition(&jobs, 2).unwrap();
//!
//! assert_eq!(plan.shard(0), &["s1", "s2"]);
//! assert_eq!(plan.shard(1), &["s3", "s4"]);
//! assert_eq!(plan.dropped(), &["s5"]);
//! ```

use crate::config::ConfigError;

/// Assignment of contiguous job slices to instance indices.
///
/// Borrows the job list; building a plan never copies jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan<'a, T> {
    shards: Vec<&'a [T]>,
    dropped: &'a [T],
}

impl<'a, T> PartitionPlan<'a, T> {
    /// Number of shards, equal to the slave count.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Jobs per shard.
    pub fn shard_size(&self) -> usize {
        self.shards.first().map_or(0, |s| s.len())
    }

    /// The shard assigned to instance `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn shard(&self, index: usize) -> &'a [T] {
        self.shards[index]
    }

    pub fn shards(&self) -> &[&'a [T]] {
        &self.shards
    }

    /// Trailing jobs that are not part of any shard.
    pub fn dropped(&self) -> &'a [T] {
        self.dropped
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            shards: self.len(),
            shard_size: self.shard_size(),
            dropped: self.dropped.len(),
        }
    }

    /// Pairs each item (typically a ready instance) with its shard.
    pub fn assign<'b, I>(&self, items: &'b [I]) -> impl Iterator<Item = (&'b I, &'a [T])> {
        items.iter().zip(self.shards.iter().copied())
    }
}

/// Shape of a plan without the jobs themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub shards: usize,
    pub shard_size: usize,
    pub dropped: usize,
}

/// Splits `jobs` into `slaves` contiguous shards of `jobs.len() / slaves`
/// elements each.
///
/// Pure and deterministic.
///
/// # Errors
///
/// Returns [`ConfigError::NoSlaves`] if `slaves` is zero.
pub fn partition<T>(jobs: &[T], slaves: usize) -> Result<PartitionPlan<'_, T>, ConfigError> {
    if slaves == 0 {
        return Err(ConfigError::NoSlaves);
    }

    let size = jobs.len() / slaves;
    let (assigned, dropped) = jobs.split_at(size * slaves);

    let shards = if size == 0 {
        vec![&assigned[..0]; slaves]
    } else {
        assigned.chunks_exact(size).collect()
    };

    Ok(PartitionPlan { shards, dropped })
}
