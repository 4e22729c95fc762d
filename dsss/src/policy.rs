//! External collaborator interfaces named in the spec as "consumed only
//! through named interfaces": the sample, partition and redistribution
//! policies the DMS driver and SES call into.
//!
//! Each trait gets one concrete default implementation, grounded in the
//! teacher's own oversampled splitter-selection idiom
//! (`tree/src/sort.rs`/`tree/src/tree.rs::sample_sort`: fixed sample density,
//! `all_gather_into` of per-PE samples, sort-and-stride to pick splitters),
//! generalized from Morton keys to byte-strings and from a one-shot flat
//! exchange to the per-level interval form [`crate::dms`] needs.

use mpi::collective::SystemOperation;
use mpi::topology::Communicator;
use mpi::traits::*;

use crate::config::Config;
use crate::error::Result;
use crate::string_view::StringContainer;

/// Produces splitter candidates from a locally sorted run.
pub trait SamplePolicy {
    fn sample_splitters<C: Communicator>(
        &self,
        local: &StringContainer,
        num_groups: usize,
        cfg: &Config,
        comm: &C,
    ) -> Result<Vec<Vec<u8>>>;
}

/// Computes, for each of `num_groups` target groups, how many local strings
/// belong to it.
pub trait PartitionPolicy {
    fn compute_partition(&self, local: &StringContainer, splitters: &[Vec<u8>]) -> Vec<usize>;

    /// Open-question overload (see DESIGN.md): SES's quantile computation
    /// calls partitioning with a precomputed sample instead of deriving
    /// splitters from the full local run. Treated as
    /// `compute_partition(local, precomputed_sample, ...)` per the spec's
    /// Design Notes, implemented here by just running the ordinary
    /// partition against the caller-supplied splitter set.
    fn compute_partition_with_sample(
        &self,
        local: &StringContainer,
        precomputed_sample: &[Vec<u8>],
    ) -> Vec<usize> {
        self.compute_partition(local, precomputed_sample)
    }
}

/// Computes per-destination send counts for a redistribute step, given the
/// sizes of each target interval.
pub trait RedistributionPolicy {
    fn compute_send_counts(&self, interval_sizes: &[usize], level: usize) -> Vec<usize>;
}

/// The default policy bundle: fixed oversampling density, splitters picked
/// by sort-and-stride, binary-search partitioning, and a pass-through
/// redistribution policy (interval sizes already *are* the send counts by
/// construction of [`crate::dms`]'s partition step).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl SamplePolicy for DefaultPolicy {
    fn sample_splitters<C: Communicator>(
        &self,
        local: &StringContainer,
        num_groups: usize,
        cfg: &Config,
        comm: &C,
    ) -> Result<Vec<Vec<u8>>> {
        let density = cfg.sample_density.max(1);
        let size = comm.size() as usize;
        let n = local.len();

        let mut local_samples: Vec<Vec<u8>> = Vec::with_capacity(density);
        if n > 0 {
            for i in 0..density {
                let idx = (i * n) / density;
                local_samples.push(local.get(idx).to_vec());
            }
        }
        while local_samples.len() < density {
            local_samples.push(Vec::new());
        }

        let max_len = cfg.max_splitter_length(0);
        let flat: Vec<u8> = local_samples
            .iter()
            .flat_map(|s| {
                let mut padded = s.clone();
                padded.truncate(max_len);
                padded.resize(max_len, 0);
                padded
            })
            .collect();
        let mut gathered = vec![0u8; flat.len() * size];
        comm.all_gather_into(&flat[..], &mut gathered[..]);

        let mut samples: Vec<Vec<u8>> = gathered
            .chunks(max_len)
            .map(|chunk| {
                let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                chunk[..end].to_vec()
            })
            .collect();
        samples.sort();

        // Drop the first `density` samples (as the teacher does) to land on
        // exactly `num_groups - 1` splitters, then stride-pick the rest.
        let samples = if samples.len() > density { &samples[density..] } else { &samples[..] };
        if samples.is_empty() || num_groups <= 1 {
            return Ok(Vec::new());
        }
        let stride = (samples.len() / (num_groups - 1).max(1)).max(1);
        let splitters: Vec<Vec<u8>> = samples.iter().step_by(stride).cloned().collect();
        Ok(splitters)
    }
}

impl PartitionPolicy for DefaultPolicy {
    fn compute_partition(&self, local: &StringContainer, splitters: &[Vec<u8>]) -> Vec<usize> {
        let num_groups = splitters.len() + 1;
        let mut counts = vec![0usize; num_groups];
        for s in local.iter_bytes() {
            let group = splitters.partition_point(|splitter| s >= splitter.as_slice());
            counts[group] += 1;
        }
        counts
    }
}

impl RedistributionPolicy for DefaultPolicy {
    fn compute_send_counts(&self, interval_sizes: &[usize], _level: usize) -> Vec<usize> {
        interval_sizes.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_partition_respects_splitters() {
        let local = StringContainer::from_strs(["apple", "banana", "cherry", "date"]).unwrap();
        let splitters = vec![b"b".to_vec(), b"d".to_vec()];
        let counts = DefaultPolicy.compute_partition(&local, &splitters);
        // group0: < "b" -> apple; group1: "b" <= s < "d" -> banana, cherry; group2: >= "d" -> date
        assert_eq!(counts, vec![1, 2, 1]);
    }

    #[test]
    fn compute_partition_with_sample_matches_plain_overload() {
        let local = StringContainer::from_strs(["apple", "banana"]).unwrap();
        let splitters = vec![b"b".to_vec()];
        let a = DefaultPolicy.compute_partition(&local, &splitters);
        let b = DefaultPolicy.compute_partition_with_sample(&local, &splitters);
        assert_eq!(a, b);
    }

    #[test]
    fn redistribution_policy_is_pass_through() {
        let counts = DefaultPolicy.compute_send_counts(&[3, 0, 5], 2);
        assert_eq!(counts, vec![3, 0, 5]);
    }
}
