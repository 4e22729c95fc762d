//! Space-Efficient Sort (component 4.5): sorts by moving index permutations
//! instead of raw bytes once the input is too large to all-to-all in one
//! pass.
//!
//! Grounded on [`crate::dms::DistributedMergeSort`] itself: each quantile is
//! sorted with one independent, *flat* (single-level) DMS pass rather than
//! the caller's full multi-level hierarchy. A flat pass is exactly the
//! teacher's own `sample_sort` shape, and — since a single-level hierarchy
//! never overwrites a string's origin tag before it is harvested — it lets
//! the quantile sort's final merged container carry the caller's original
//! `(origin_pe, origin_index)` tags all the way through without any extra
//! bookkeeping beyond what [`crate::dms`] already does.

use log::{debug, info};
use mpi::topology::{Communicator, Rank, SystemCommunicator};
use mpi::traits::*;

use crate::comm_hierarchy::Hierarchy;
use crate::config::Config;
use crate::dms::{retag_with_local_positions, DistributedMergeSort};
use crate::error::Result;
use crate::policy::{DefaultPolicy, PartitionPolicy, SamplePolicy};
use crate::radix;
use crate::string_view::StringContainer;

/// The space-efficient sort driver (spec component 4.5).
pub struct SpaceEfficientSort<'a> {
    world: &'a SystemCommunicator,
    cfg: &'a Config,
}

impl<'a> SpaceEfficientSort<'a> {
    pub fn new(world: &'a SystemCommunicator, cfg: &'a Config) -> Self {
        SpaceEfficientSort { world, cfg }
    }

    /// Sort `container` (this PE's share of the input, in arbitrary order)
    /// across the whole world communicator, without ever gathering more than
    /// one quantile's worth of data into an all-to-all at a time.
    ///
    /// Returns this PE's slice of the globally sorted sequence as a list of
    /// `(origin_pe, origin_index)` pairs, `origin_index` indexing into the
    /// `container` exactly as passed in.
    pub fn sort(&self, container: &StringContainer) -> Result<Vec<(Rank, u64)>> {
        let rank = self.world.rank();

        let mut local = container.clone();
        retag_with_local_positions(&mut local, rank);
        radix::sort(&mut local)?;

        let global_total = self.global_count(local.len());
        let quantile_size = self.cfg.quantile_size.max(1);
        let num_quantiles = ((global_total as usize) + quantile_size - 1) / quantile_size;
        let num_quantiles = num_quantiles.max(1);
        info!(
            "ses: rank {} sees {} strings globally across {} quantiles",
            rank, global_total, num_quantiles
        );

        let policy = DefaultPolicy;
        let quantile_splitters = if num_quantiles > 1 {
            policy.sample_splitters(&local, num_quantiles, self.cfg, self.world)?
        } else {
            Vec::new()
        };
        let mut counts = policy.compute_partition(&local, &quantile_splitters);
        counts.resize(num_quantiles, 0);

        let mut quantiles: Vec<StringContainer> = (0..num_quantiles).map(|_| StringContainer::new()).collect();
        let mut pos = 0usize;
        for (q, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let view = local.views()[pos];
                let (pe, idx) = (
                    view.origin_pe.expect("locally retagged container always carries an origin tag"),
                    view.origin_index.expect("locally retagged container always carries an origin tag"),
                );
                quantiles[q].push_with_origin(local.get(pos), pe, idx)?;
                pos += 1;
            }
        }

        let mut result = Vec::new();
        for (q, quantile) in quantiles.into_iter().enumerate() {
            debug!("ses: rank {} processing quantile {}/{}", rank, q, num_quantiles);
            let hierarchy = Hierarchy::flat(self.world);
            let (merged, _perm) = DistributedMergeSort::new(&hierarchy, self.cfg).sort_with_permutation(quantile)?;
            result.extend(merged.views().iter().map(|v| {
                (
                    v.origin_pe.expect("quantile sort result always carries an origin tag"),
                    v.origin_index.expect("quantile sort result always carries an origin tag") as u64,
                )
            }));
        }
        Ok(result)
    }

    /// Sum of `local_len` across the whole world, via the same
    /// all-gather-and-sum idiom [`crate::policy::DefaultPolicy`] uses for
    /// splitter sampling.
    fn global_count(&self, local_len: usize) -> u64 {
        let size = self.world.size() as usize;
        let mut gathered = vec![0u64; size];
        self.world.all_gather_into(&(local_len as u64), &mut gathered[..]);
        gathered.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_count_is_pure_local_computation_shape() {
        // global_count itself requires a live communicator; exercised end to
        // end in the mpi-tests crate. Here we just confirm the quantile
        // count arithmetic it feeds doesn't divide by zero or underflow for
        // the boundary cases the driver must handle.
        let cfg = Config { quantile_size: 4, ..Config::default() };
        let quantile_size = cfg.quantile_size.max(1);
        assert_eq!((0usize + quantile_size - 1) / quantile_size, 0);
        assert_eq!((5usize + quantile_size - 1) / quantile_size, 2);
    }
}
