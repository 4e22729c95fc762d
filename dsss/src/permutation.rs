//! Permutation machinery (component 4.4): representing and applying the
//! global-sorted-order-to-input-position mapping, so [`crate::ses`] can
//! reorder indices instead of moving whole strings.
//!
//! `apply` always writes into `out[original_local_index] = global_rank`,
//! one entry per string this PE originally owned; `global_index_offset`
//! shifts every computed global rank, which is how SES concatenates
//! per-quantile permutations into one whole-input permutation.

use mpi::collective::SystemOperation;
use mpi::topology::{Communicator, Rank};
use mpi::traits::*;

use crate::error::{Result, SortError};
use crate::exchange::alltoallv_u64;

/// Flat, single-shot permutation: for each locally-held, globally-sorted
/// position, the `(origin_rank, origin_index)` of the string that produced
/// it.
#[derive(Debug, Clone, Default)]
pub struct SimplePermutation {
    ranks: Vec<Rank>,
    indices: Vec<u64>,
}

impl SimplePermutation {
    pub fn new() -> Self {
        SimplePermutation::default()
    }

    pub fn push(&mut self, origin_rank: Rank, origin_index: u64) {
        self.ranks.push(origin_rank);
        self.indices.push(origin_index);
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Ship `(origin_index, global_rank)` pairs back to each string's
    /// origin PE, which scatters them into `out`.
    pub fn apply<C: Communicator>(&self, comm: &C, out: &mut [u64], global_index_offset: u64) -> Result<()> {
        let size = comm.size();
        let local_len = self.len() as u64;
        let mut inclusive = 0u64;
        comm.scan_into(&local_len, &mut inclusive, &SystemOperation::sum());
        let start = inclusive - local_len + global_index_offset;

        let mut buckets: Vec<Vec<u64>> = (0..size).map(|_| Vec::new()).collect();
        for (i, (&r, &idx)) in self.ranks.iter().zip(self.indices.iter()).enumerate() {
            let global_rank = start + i as u64;
            let b = &mut buckets[r as usize];
            b.push(idx);
            b.push(global_rank);
        }
        scatter_pairs_into(comm, &buckets, out)
    }
}

fn scatter_pairs_into<C: Communicator>(comm: &C, buckets: &[Vec<u64>], out: &mut [u64]) -> Result<()> {
    let received = alltoallv_u64(comm, buckets);
    for chunk in received {
        for pair in chunk.chunks_exact(2) {
            let (idx, global_rank) = (pair[0], pair[1]);
            if idx as usize >= out.len() {
                return Err(SortError::protocol("permutation index out of bounds of out span"));
            }
            out[idx as usize] = global_rank;
        }
    }
    Ok(())
}

/// One level's routing record: for each of this PE's positions immediately
/// after that level's redistribute step, which rank sent it and what that
/// sender's own local index was immediately before the redistribute.
#[derive(Debug, Clone, Default)]
pub struct RemotePermutation {
    pub source_ranks: Vec<Rank>,
    pub source_indices: Vec<u64>,
}

impl RemotePermutation {
    pub fn len(&self) -> usize {
        self.source_ranks.len()
    }
}

/// A permutation built incrementally across a descending hierarchy of
/// sub-communicator levels: `local_perm` is the within-this-PE's-terminal-
/// group local permutation (the final local merge's output order, indexed
/// into the innermost level's received buffer); `levels` records, outermost
/// level first, how each redistribute step routed strings.
///
/// Applying all levels in reverse (innermost undone first) is equivalent to
/// constructing and applying the single-shot [`SimplePermutation`] the whole
/// multi-level sort implicitly defines.
#[derive(Debug, Clone, Default)]
pub struct MultiLevelPermutation {
    local_perm: Vec<u64>,
    levels: Vec<RemotePermutation>,
}

impl MultiLevelPermutation {
    pub fn new(local_perm: Vec<u64>) -> Self {
        MultiLevelPermutation { local_perm, levels: Vec::new() }
    }

    pub fn push_level(&mut self, source_ranks: Vec<Rank>, source_indices: Vec<u64>) -> Result<()> {
        if source_ranks.len() != source_indices.len() {
            return Err(SortError::protocol(
                "RemotePermutation source_ranks/source_indices length mismatch",
            ));
        }
        self.levels.push(RemotePermutation { source_ranks, source_indices });
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn apply<C: Communicator + Clone>(
        &self,
        comms: &[C],
        out: &mut [u64],
        global_index_offset: u64,
    ) -> Result<()> {
        if comms.len() != self.levels.len() {
            return Err(SortError::precondition(
                "communicator hierarchy depth does not match permutation depth",
            ));
        }
        let base = match comms.last() {
            Some(inner_comm) => {
                let local_len = self.local_perm.len() as u64;
                let mut inclusive = 0u64;
                inner_comm.scan_into(&local_len, &mut inclusive, &SystemOperation::sum());
                inclusive - local_len + global_index_offset
            }
            None => global_index_offset,
        };
        let seed: Vec<u64> = (0..self.local_perm.len() as u64).map(|pos| base + pos).collect();
        self.apply_with_seed(comms, out, &seed)
    }

    /// Shared machinery behind [`MultiLevelPermutation::apply`] and
    /// [`NonUniquePermutation::apply`]: `seed[pos]` is the already-resolved
    /// global rank for this PE's local position `pos` at the innermost
    /// level; only how `seed` is computed differs between the two.
    fn apply_with_seed<C: Communicator>(&self, comms: &[C], out: &mut [u64], seed: &[u64]) -> Result<()> {
        let mut carrier: Vec<(u64, u64)> = self
            .local_perm
            .iter()
            .zip(seed.iter())
            .map(|(&recv_idx, &global_rank)| (recv_idx, global_rank))
            .collect();

        for (level, comm) in self.levels.iter().zip(comms.iter()).rev() {
            carrier = undo_level(comm, level, &carrier)?;
        }

        for (origin_idx, global_rank) in carrier {
            if origin_idx as usize >= out.len() {
                return Err(SortError::protocol("permutation origin index out of bounds of out span"));
            }
            out[origin_idx as usize] = global_rank;
        }
        Ok(())
    }
}

fn undo_level<C: Communicator>(comm: &C, level: &RemotePermutation, carrier: &[(u64, u64)]) -> Result<Vec<(u64, u64)>> {
    let size = comm.size();
    let mut buckets: Vec<Vec<u64>> = (0..size).map(|_| Vec::new()).collect();
    for &(current_idx, payload) in carrier {
        let idx = current_idx as usize;
        if idx >= level.len() {
            return Err(SortError::protocol("permutation level index out of range"));
        }
        let dest = level.source_ranks[idx];
        let b = &mut buckets[dest as usize];
        b.push(level.source_indices[idx]);
        b.push(payload);
    }
    let received = alltoallv_u64(comm, &buckets);
    let mut next = Vec::new();
    for chunk in received {
        for pair in chunk.chunks_exact(2) {
            next.push((pair[0], pair[1]));
        }
    }
    Ok(next)
}

/// [`MultiLevelPermutation`] plus a per-position byte offset in `0..255`,
/// used to assign adjacent, distinct global ranks to runs of equal strings
/// without carrying the full `(rank, index)` tuple for each one.
#[derive(Debug, Clone)]
pub struct NonUniquePermutation {
    inner: MultiLevelPermutation,
    index_offsets: Vec<u8>,
}

impl NonUniquePermutation {
    pub fn new(local_perm: Vec<u64>, index_offsets: Vec<u8>) -> Result<Self> {
        if index_offsets.len() != local_perm.len() {
            return Err(SortError::precondition(
                "index_offsets length must match local_perm length",
            ));
        }
        Ok(NonUniquePermutation { inner: MultiLevelPermutation::new(local_perm), index_offsets })
    }

    pub fn push_level(&mut self, source_ranks: Vec<Rank>, source_indices: Vec<u64>) -> Result<()> {
        self.inner.push_level(source_ranks, source_indices)
    }

    pub fn apply<C: Communicator + Clone>(
        &self,
        comms: &[C],
        out: &mut [u64],
        global_index_offset: u64,
    ) -> Result<()> {
        if comms.len() != self.inner.levels.len() {
            return Err(SortError::precondition(
                "communicator hierarchy depth does not match permutation depth",
            ));
        }
        let local_total: u64 = self.index_offsets.iter().map(|&o| o as u64).sum();
        let pe_base = match comms.last() {
            Some(inner_comm) => {
                let mut inclusive = 0u64;
                inner_comm.scan_into(&local_total, &mut inclusive, &SystemOperation::sum());
                inclusive - local_total + global_index_offset
            }
            None => global_index_offset,
        };

        let mut running = pe_base;
        let mut seed = Vec::with_capacity(self.index_offsets.len());
        for &offset in &self.index_offsets {
            seed.push(running);
            running += offset as u64;
        }
        self.inner.apply_with_seed(comms, out, &seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_permutation_len_matches_ranks() {
        let r = RemotePermutation { source_ranks: vec![0, 1, 1], source_indices: vec![0, 0, 1] };
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn multi_level_permutation_rejects_mismatched_push() {
        let mut p = MultiLevelPermutation::new(vec![0, 1]);
        let err = p.push_level(vec![0], vec![0, 1]).unwrap_err();
        assert!(matches!(err, SortError::Protocol(_)));
    }

    #[test]
    fn non_unique_permutation_rejects_length_mismatch() {
        let err = NonUniquePermutation::new(vec![0, 1, 2], vec![1, 1]).unwrap_err();
        assert!(matches!(err, SortError::Precondition(_)));
    }

    #[test]
    fn non_unique_permutation_offsets_sum_to_total_scenario_s2() {
        // Scenario S2: P=2, PE0 = {"a","a","a"}, PE1 = {"a","a"}; five equal
        // strings overall, each consuming one offset slot, so the offsets
        // across both PEs must sum to exactly 5.
        let pe0 = NonUniquePermutation::new(vec![0, 1, 2], vec![1, 1, 1]).unwrap();
        let pe1 = NonUniquePermutation::new(vec![0, 1], vec![1, 1]).unwrap();
        let total: u64 = pe0.index_offsets.iter().chain(pe1.index_offsets.iter()).map(|&o| o as u64).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn simple_permutation_tracks_length() {
        let mut p = SimplePermutation::new();
        assert!(p.is_empty());
        p.push(0, 3);
        p.push(1, 7);
        assert_eq!(p.len(), 2);
    }
}
