//! RQuick: robust distributed quicksort/quickselect (component 4.3).
//!
//! Used both as an alternative whole-range global sorter and, more often, as
//! the median-selection primitive the DMS driver calls for splitter
//! selection (see [`crate::dms`]). Recursion is flattened into an iterative
//! loop over progressively smaller sub-communicators, per the Design Notes
//! ("avoid actual recursion so stack depth is bounded").

use std::cmp::Ordering;

use log::{debug, trace};
use mpi::topology::{Communicator, Process, Rank};
use mpi::traits::*;

use crate::config::Config;
use crate::error::{Result, SortError};
use crate::string_view::StringContainer;

const TAG_CHARS: i32 = 0;
const TAG_INDICES: i32 = 1;
const TAG_LCPS: i32 = 2;

/// The "Data" wire packet: three parallel arrays, tag-separated so the
/// receiver can tell which array a given message belongs to without a
/// framing header. `chars` is mandatory; `indices`/`lcps` are present only
/// for indexed / LCP-carrying string sets.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub chars: Vec<u8>,
    pub indices: Option<Vec<u64>>,
    pub lcps: Option<Vec<u32>>,
}

impl Data {
    pub fn from_strings(strings: &[Vec<u8>]) -> Data {
        let mut chars = Vec::new();
        for s in strings {
            chars.extend_from_slice(s);
            chars.push(0);
        }
        Data { chars, indices: None, lcps: None }
    }

    pub fn from_container(container: &StringContainer) -> Data {
        let strings: Vec<Vec<u8>> = container.to_vecs();
        Data::from_strings(&strings)
    }

    pub fn with_indices(mut self, indices: Vec<u64>) -> Data {
        self.indices = Some(indices);
        self
    }

    pub fn with_lcps(mut self, lcps: Vec<u32>) -> Data {
        self.lcps = Some(lcps);
        self
    }

    /// Split the NUL-separated `chars` buffer back into owned strings.
    pub fn to_strings(&self) -> Vec<Vec<u8>> {
        if self.chars.is_empty() {
            return Vec::new();
        }
        let mut parts: Vec<Vec<u8>> = self.chars.split(|&b| b == 0).map(|s| s.to_vec()).collect();
        parts.pop(); // drop the empty tail segment after the final NUL
        parts
    }

    pub fn len(&self) -> usize {
        self.chars.iter().filter(|&&b| b == 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking send of all present arrays, one message per tag.
    pub fn send_to<C: Communicator>(&self, dest: &Process<'_, C>) {
        dest.send_with_tag(&self.chars[..], TAG_CHARS);
        if let Some(indices) = &self.indices {
            dest.send_with_tag(&indices[..], TAG_INDICES);
        }
        if let Some(lcps) = &self.lcps {
            dest.send_with_tag(&lcps[..], TAG_LCPS);
        }
    }

    /// Blocking receive mirroring [`Data::send_to`]. The caller must know in
    /// advance whether indices/LCPs were sent (carried out of band by the
    /// string-set variant in scope, per Design Notes' closed variant set).
    pub fn receive_from<C: Communicator>(
        src: &Process<'_, C>,
        with_indices: bool,
        with_lcps: bool,
    ) -> Data {
        let (chars, _) = src.receive_vec_with_tag::<u8>(TAG_CHARS);
        let indices = if with_indices {
            Some(src.receive_vec_with_tag::<u64>(TAG_INDICES).0)
        } else {
            None
        };
        let lcps = if with_lcps {
            Some(src.receive_vec_with_tag::<u32>(TAG_LCPS).0)
        } else {
            None
        };
        Data { chars, indices, lcps }
    }
}

/// A small buffered PRNG used only to break symmetric ties (even-overlap
/// median windows) without biasing the result toward one side. Seeded
/// deterministically from `(rank, run_id)` so replays under a fixed run id
/// always pick the same tie-breaks (testable property 5).
pub struct RandomBitStore {
    state: u64,
    buffer: u64,
    bits_left: u32,
}

impl RandomBitStore {
    pub fn new(rank: Rank, run_id: u64) -> Self {
        let seed = (rank as u64)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(run_id)
            .wrapping_add(1)
            | 1;
        RandomBitStore { state: seed, buffer: 0, bits_left: 0 }
    }

    fn next_word(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn next_bit(&mut self) -> bool {
        if self.bits_left == 0 {
            self.buffer = self.next_word();
            self.bits_left = 64;
        }
        let bit = self.buffer & 1 == 1;
        self.buffer >>= 1;
        self.bits_left -= 1;
        bit
    }
}

/// Plain lexicographic comparator for non-indexed sets.
pub fn cmp_plain(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// `(bytes, then origin index)` comparator, a strict total order required so
/// the distributed partition of an indexed set is deterministic on ties.
pub fn cmp_indexed(a: (&[u8], u64), b: (&[u8], u64)) -> Ordering {
    a.0.cmp(b.0).then(a.1.cmp(&b.1))
}

/// How many reduction rounds PE `rank` performs before handing its surviving
/// candidate to its parent: `ctz(rank)` for `rank > 0`, `ceil(log2(size))`
/// for the root (which has no parent and must out-wait every subtree).
fn trailing_rounds(rank: Rank, size: Rank) -> u32 {
    if rank == 0 {
        let s = size.max(1) as u32;
        if s <= 1 {
            0
        } else {
            32 - (s - 1).leading_zeros()
        }
    } else {
        rank.trailing_zeros()
    }
}

/// Merge two sorted batches and keep the middle `target_len` window,
/// breaking an odd-overlap tie with a shared random bit so the choice isn't
/// systematically biased toward either side.
pub fn merge_and_select_middle(
    a: &[Vec<u8>],
    b: &[Vec<u8>],
    target_len: usize,
    bits: &mut RandomBitStore,
) -> Vec<Vec<u8>> {
    let mut merged: Vec<Vec<u8>> = Vec::with_capacity(a.len() + b.len());
    merged.extend_from_slice(a);
    merged.extend_from_slice(b);
    merged.sort();
    select_middle(&merged, target_len, bits)
}

fn select_middle(merged: &[Vec<u8>], target_len: usize, bits: &mut RandomBitStore) -> Vec<Vec<u8>> {
    let total = merged.len();
    if target_len >= total {
        return merged.to_vec();
    }
    let slack = total - target_len;
    let left = if slack % 2 == 0 {
        slack / 2
    } else {
        let base = slack / 2;
        if bits.next_bit() {
            base
        } else {
            base + 1
        }
    };
    merged[left..left + target_len].to_vec()
}

/// Pick a single median candidate from the root's final, globally-balanced
/// candidate run, randomizing between the two central elements when its
/// length is even.
fn pick_single_median(candidates: &[Vec<u8>], bits: &mut RandomBitStore) -> Result<Vec<u8>> {
    if candidates.is_empty() {
        return Err(SortError::precondition(
            "median selection requires at least one candidate string",
        ));
    }
    let n = candidates.len();
    let idx = if n % 2 == 1 {
        n / 2
    } else {
        let lo = n / 2 - 1;
        if bits.next_bit() {
            lo
        } else {
            lo + 1
        }
    };
    Ok(candidates[idx].clone())
}

/// Broadcast a byte buffer known in full only on `root`'s rank: length first,
/// then the payload, mirroring the two-step scalar-then-payload broadcast
/// idiom the teacher uses for `total_weight`/`total_nblocks`.
fn broadcast_bytes<C: Communicator>(
    root_process: &Process<'_, C>,
    is_root: bool,
    local: Vec<u8>,
) -> Vec<u8> {
    let mut len = if is_root { local.len() as u64 } else { 0 };
    root_process.broadcast_into(&mut len);
    let mut buf = if is_root { local } else { vec![0u8; len as usize] };
    root_process.broadcast_into(&mut buf[..]);
    buf
}

/// Binary-tree (hypercube-by-trailing-zero-bits) median selection: each PE
/// starts with its own locally sorted run of size `target_len` and ends with
/// every PE holding the same globally-balanced median string.
pub fn select_median<C: Communicator>(
    comm: &C,
    local_sorted: &[Vec<u8>],
    target_len: usize,
    run_id: u64,
) -> Result<Vec<u8>> {
    let rank = comm.rank();
    let size = comm.size();
    let mut bits = RandomBitStore::new(rank, run_id);
    let rounds = trailing_rounds(rank, size);

    let mut candidate = local_sorted.to_vec();
    for i in 0..rounds {
        let partner = rank + (1 << i);
        if partner >= size {
            continue;
        }
        trace!("rquick median: rank {rank} receiving round {i} from {partner}");
        let incoming = Data::receive_from(&comm.process_at_rank(partner), false, false);
        let received = incoming.to_strings();
        candidate = merge_and_select_middle(&candidate, &received, target_len, &mut bits);
    }

    if rank > 0 {
        let parent = rank - (1 << rounds);
        trace!("rquick median: rank {rank} forwarding to parent {parent}");
        Data::from_strings(&candidate).send_to(&comm.process_at_rank(parent));
    }

    let root = comm.process_at_rank(0);
    let final_bytes = if rank == 0 {
        pick_single_median(&candidate, &mut bits)?
    } else {
        Vec::new()
    };
    let broadcast = broadcast_bytes(&root, rank == 0, final_bytes);
    debug!("rquick median: selected {} byte median", broadcast.len());
    Ok(broadcast)
}

/// Partition a locally sorted run around `median`, returning `(less,
/// greater_or_equal)`.
fn partition_by_median(run: &[Vec<u8>], median: &[u8]) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let split = run.partition_point(|s| cmp_plain(s, median) == Ordering::Less);
    (run[..split].to_vec(), run[split..].to_vec())
}

/// Exchange the "less" and "greater-or-equal" halves between the lower and
/// upper halves of `comm`'s ranks within one RQuick partition round.
fn exchange_halves<C: Communicator>(
    comm: &C,
    less: Vec<Vec<u8>>,
    geq: Vec<Vec<u8>>,
    lower_half: bool,
    partner: Rank,
) -> Vec<Vec<u8>> {
    let partner_process = comm.process_at_rank(partner);
    let (outgoing, keep) = if lower_half { (geq, less) } else { (less, geq) };
    Data::from_strings(&outgoing).send_to(&partner_process);
    let incoming = Data::receive_from(&partner_process, false, false).to_strings();
    let mut merged = keep;
    merged.extend(incoming);
    merged.sort();
    merged
}

/// Partition a locally sorted indexed run around `median`, returning `(less,
/// greater_or_equal)`. The split point is decided purely by byte comparison
/// against `median`, the same convention as [`partition_by_median`]; indices
/// only matter once two items tie on bytes, which [`exchange_halves_indexed`]'s
/// re-sort with [`cmp_indexed`] resolves.
fn partition_by_median_indexed(
    run: &[(Vec<u8>, u64)],
    median: &[u8],
) -> (Vec<(Vec<u8>, u64)>, Vec<(Vec<u8>, u64)>) {
    let split = run.partition_point(|(s, _)| cmp_plain(s, median) == Ordering::Less);
    (run[..split].to_vec(), run[split..].to_vec())
}

/// Index-preserving counterpart of [`exchange_halves`]: ships each string's
/// origin index alongside its bytes via [`Data::with_indices`] so the merged
/// result can be re-sorted with [`cmp_indexed`], keeping equal-valued strings
/// in index order across the exchange.
fn exchange_halves_indexed<C: Communicator>(
    comm: &C,
    less: Vec<(Vec<u8>, u64)>,
    geq: Vec<(Vec<u8>, u64)>,
    lower_half: bool,
    partner: Rank,
) -> Vec<(Vec<u8>, u64)> {
    let partner_process = comm.process_at_rank(partner);
    let (outgoing, keep) = if lower_half { (geq, less) } else { (less, geq) };
    let (out_strings, out_indices): (Vec<Vec<u8>>, Vec<u64>) = outgoing.into_iter().unzip();
    Data::from_strings(&out_strings).with_indices(out_indices).send_to(&partner_process);
    let incoming = Data::receive_from(&partner_process, true, false);
    let incoming_strings = incoming.to_strings();
    let incoming_indices = incoming.indices.unwrap_or_default();
    let mut merged = keep;
    merged.extend(incoming_strings.into_iter().zip(incoming_indices));
    merged.sort_by(|a, b| cmp_indexed((a.0.as_slice(), a.1), (b.0.as_slice(), b.1)));
    merged
}

/// Sort `local` in place across `comm` using recursive (iteratively
/// flattened) median-partitioning; bottoms out once the active
/// sub-communicator reaches size 1, at which point the local sort already
/// performed above is the final answer.
///
/// `cfg` is accepted (not just `run_id`) so callers keep passing the same
/// bundle of knobs DMS/SES use; whether a whole *level* of recursion is
/// skipped in favour of a shared-memory merge is decided one layer up (see
/// [`crate::dms`]), not inside this single-communicator sort.
pub fn sort<C: Communicator + Clone>(comm: &C, local: Vec<Vec<u8>>, _cfg: &Config, run_id: u64) -> Result<Vec<Vec<u8>>> {
    let mut current = local;
    current.sort();
    let mut size = comm.size();
    let mut rank = comm.rank();
    if size <= 1 {
        return Ok(current);
    }

    // One round at the current (sub-)communicator size, then halve: the
    // lower group is ranks [0, half) with half = ceil(size/2), the upper
    // group is [half, size). For an odd size the lower group has one extra,
    // unpaired rank that keeps its own (unsplit) partition this round.
    let mut active = comm.clone();
    loop {
        if size <= 1 {
            break;
        }
        let target_len = current.len().max(1);
        let median = select_median(&active, &current, target_len, run_id)?;
        let half = (size + 1) / 2;
        let lower_half = rank < half;
        let partner = if lower_half { rank + half } else { rank - half };
        let has_partner = if lower_half { partner < size } else { true };

        if has_partner {
            let (less, geq) = partition_by_median(&current, &median);
            current = exchange_halves(&active, less, geq, lower_half, partner);
        }
        // else: the one unmatched lower-group rank keeps its whole run and
        // simply carries it into the next (smaller) lower sub-communicator.

        let color = if lower_half { 0 } else { 1 };
        let split = active
            .split_by_color(mpi::topology::Color::with_value(color))
            .ok_or_else(|| SortError::protocol("rquick: split_by_color returned no communicator"))?;
        active = split;
        size = active.size();
        rank = active.rank();
    }
    Ok(current)
}

/// Index-preserving counterpart of [`sort`]: threads each string's origin
/// index through the same median-selection/partition/exchange rounds so a
/// run of equal-valued strings keeps strictly increasing index order across
/// the distributed partition (scenario S6).
///
/// Median selection itself only needs byte content, so it reuses
/// [`select_median`] over the indexed run's strings; only partitioning and
/// exchange need the indexed variants.
pub fn sort_indexed<C: Communicator + Clone>(
    comm: &C,
    local: Vec<(Vec<u8>, u64)>,
    _cfg: &Config,
    run_id: u64,
) -> Result<Vec<(Vec<u8>, u64)>> {
    let mut current = local;
    current.sort_by(|a, b| cmp_indexed((a.0.as_slice(), a.1), (b.0.as_slice(), b.1)));
    let mut size = comm.size();
    let mut rank = comm.rank();
    if size <= 1 {
        return Ok(current);
    }

    let mut active = comm.clone();
    loop {
        if size <= 1 {
            break;
        }
        let strings_only: Vec<Vec<u8>> = current.iter().map(|(s, _)| s.clone()).collect();
        let target_len = strings_only.len().max(1);
        let median = select_median(&active, &strings_only, target_len, run_id)?;
        let half = (size + 1) / 2;
        let lower_half = rank < half;
        let partner = if lower_half { rank + half } else { rank - half };
        let has_partner = if lower_half { partner < size } else { true };

        if has_partner {
            let (less, geq) = partition_by_median_indexed(&current, &median);
            current = exchange_halves_indexed(&active, less, geq, lower_half, partner);
        }

        let color = if lower_half { 0 } else { 1 };
        let split = active
            .split_by_color(mpi::topology::Color::with_value(color))
            .ok_or_else(|| SortError::protocol("rquick: split_by_color returned no communicator"))?;
        active = split;
        size = active.size();
        rank = active.rank();
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn data_roundtrip_via_strings() {
        let data = Data::from_strings(&s(&["apple", "banana", "cherry"]));
        assert_eq!(data.len(), 3);
        assert_eq!(data.to_strings(), s(&["apple", "banana", "cherry"]));
    }

    #[test]
    fn data_roundtrip_empty() {
        let data = Data::from_strings(&[]);
        assert_eq!(data.len(), 0);
        assert!(data.to_strings().is_empty());
    }

    #[test]
    fn trailing_rounds_matches_ctz_for_nonroot() {
        assert_eq!(trailing_rounds(4, 8), 2); // 4 = 0b100
        assert_eq!(trailing_rounds(6, 8), 1); // 6 = 0b110
        assert_eq!(trailing_rounds(1, 8), 0);
    }

    #[test]
    fn trailing_rounds_root_is_ceil_log2_size() {
        assert_eq!(trailing_rounds(0, 8), 3);
        assert_eq!(trailing_rounds(0, 9), 4);
        assert_eq!(trailing_rounds(0, 1), 0);
    }

    #[test]
    fn select_middle_even_overlap_exact() {
        let merged = s(&["a", "b", "c", "d"]);
        let mut bits = RandomBitStore::new(0, 1);
        let picked = select_middle(&merged, 2, &mut bits);
        assert_eq!(picked, s(&["b", "c"]));
    }

    #[test]
    fn select_middle_odd_overlap_is_deterministic_under_fixed_seed() {
        let merged = s(&["a", "b", "c", "d", "e"]);
        let mut bits_a = RandomBitStore::new(2, 42);
        let mut bits_b = RandomBitStore::new(2, 42);
        let first = select_middle(&merged, 2, &mut bits_a);
        let second = select_middle(&merged, 2, &mut bits_b);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn merge_and_select_middle_keeps_overall_sortedness() {
        let a = s(&["apple", "cherry"]);
        let b = s(&["banana", "date"]);
        let mut bits = RandomBitStore::new(0, 7);
        let picked = merge_and_select_middle(&a, &b, 2, &mut bits);
        let mut sorted = picked.clone();
        sorted.sort();
        assert_eq!(picked, sorted);
    }

    #[test]
    fn pick_single_median_odd_is_exact_middle() {
        let candidates = s(&["a", "b", "c"]);
        let mut bits = RandomBitStore::new(0, 1);
        assert_eq!(pick_single_median(&candidates, &mut bits).unwrap(), b"b".to_vec());
    }

    #[test]
    fn pick_single_median_rejects_empty() {
        let mut bits = RandomBitStore::new(0, 1);
        assert!(pick_single_median(&[], &mut bits).is_err());
    }

    #[test]
    fn cmp_indexed_breaks_ties_by_index() {
        assert_eq!(cmp_indexed((b"a", 5), (b"a", 3)), Ordering::Greater);
        assert_eq!(cmp_indexed((b"a", 3), (b"b", 0)), Ordering::Less);
    }

    #[test]
    fn partition_by_median_splits_at_first_not_less() {
        let run = s(&["a", "b", "c", "d"]);
        let (less, geq) = partition_by_median(&run, b"c");
        assert_eq!(less, s(&["a", "b"]));
        assert_eq!(geq, s(&["c", "d"]));
    }

    #[test]
    fn partition_by_median_indexed_keeps_pairing() {
        let run = vec![(b"a".to_vec(), 0u64), (b"a".to_vec(), 1), (b"b".to_vec(), 2)];
        let (less, geq) = partition_by_median_indexed(&run, b"b");
        assert_eq!(less, vec![(b"a".to_vec(), 0), (b"a".to_vec(), 1)]);
        assert_eq!(geq, vec![(b"b".to_vec(), 2)]);
    }

    #[test]
    fn median_selection_s5_small_case_reference_check() {
        // Scenario S5 (scaled down for a non-MPI unit test): emulate P=2,
        // each side's run is a repeated character, and check that merging +
        // picking the middle produces a string within the central run.
        let a = vec![b"kk".to_vec(); 4];
        let b = vec![b"kk".to_vec(); 4];
        let mut bits = RandomBitStore::new(0, 99);
        let picked = merge_and_select_middle(&a, &b, 4, &mut bits);
        assert!(picked.iter().all(|s| s == b"kk"));
    }
}
