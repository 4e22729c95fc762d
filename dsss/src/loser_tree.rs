//! The LCP-aware k-way loser tree (component 4.1).
//!
//! A tournament tree over `k` sorted input runs that emits one sorted run,
//! doing zero character comparisons between two strings whenever their
//! cached LCP values already prove which one is smaller. Internal nodes
//! store the *loser* of the match played there, together with the LCP
//! between that loser and whichever string most recently won past this node
//! — the invariant the character-skipping rule below depends on.
//!
//! Construction and advancement both walk a leaf-to-root path and replay one
//! match per level, so the amortized cost across a full merge of length `L`
//! is `O(L log k)` node visits, most of which touch no string bytes at all.

use crate::error::{Result, SortError};
use crate::lcp::common_prefix_len;
use crate::string_view::StringContainer;

/// One input run being merged: a sorted, NUL-terminated byte run plus the
/// LCP array that goes with it (`lcps[i] == common_prefix_len(run[i-1],
/// run[i])`, `lcps[0] == 0`).
pub struct Stream<'a> {
    container: &'a StringContainer,
    lcps: &'a [u32],
    pos: usize,
}

impl<'a> Stream<'a> {
    pub fn new(container: &'a StringContainer, lcps: &'a [u32]) -> Result<Self> {
        if container.len() != lcps.len() {
            return Err(SortError::protocol(
                "stream LCP array length does not match string count",
            ));
        }
        Ok(Stream { container, lcps, pos: 0 })
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.container.len()
    }

    fn head(&self) -> &'a [u8] {
        self.container.get(self.pos)
    }

    /// The stream's own LCP of its current head against its own previous
    /// element (0 at `pos == 0`).
    fn head_lcp(&self) -> u32 {
        self.lcps[self.pos]
    }

    /// The `(origin_pe, origin_index)` tag of the current head, if the
    /// underlying container carries one (indexed string sets do).
    fn head_origin(&self) -> Option<(i32, usize)> {
        let view = self.container.views()[self.pos];
        match (view.origin_pe, view.origin_index) {
            (Some(pe), Some(idx)) => Some((pe, idx)),
            _ => None,
        }
    }
}

/// Who logically occupies a tournament slot: a real stream, or the `+inf`
/// sentinel used to pad the tree to a power of two and to represent
/// exhausted streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Stream(usize),
    Sentinel,
}

struct Candidate {
    slot: Slot,
    lcp: u32,
}

/// The k-way LCP-aware loser tree.
///
/// `nodes[0]` holds the overall winner; `nodes[1..size)` hold the losers of
/// past matches, one per internal node of a complete binary tree built over
/// `size = k.next_power_of_two()` leaves (real streams plus `+inf` padding).
pub struct LcpLoserTree<'a> {
    streams: Vec<Stream<'a>>,
    size: usize,
    nodes: Vec<Option<Candidate>>,
    overall_winner: Option<Candidate>,
}

fn byte_at(s: &[u8], i: usize) -> Option<u8> {
    s.get(i).copied()
}

/// Compare two strings from byte offset `from` onward. Returns
/// `(divergence_offset, a_is_smaller)`. Shorter-is-prefix ranks smaller, as
/// for NUL-terminated C strings (end of string behaves like an implicit `0`
/// byte smaller than everything but another end of string).
fn scan_from(a: &[u8], b: &[u8], from: usize) -> (u32, bool) {
    let shared = common_prefix_len(&a[from.min(a.len())..], &b[from.min(b.len())..]);
    let divergence = from + shared;
    let a_is_smaller = match (byte_at(a, divergence), byte_at(b, divergence)) {
        (None, None) => true, // equal strings; arbitrary but deterministic
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (Some(ca), Some(cb)) => ca < cb,
    };
    (divergence as u32, a_is_smaller)
}

impl<'a> LcpLoserTree<'a> {
    /// Build a loser tree over `streams`, none of which may be empty, using
    /// `known_common_lcp` as the initial LCP of every stream's first head
    /// (the tightest valid lower bound for the whole k-way set; callers pass
    /// `0` across a level boundary, since concatenation across PEs destroys
    /// any previously established bound).
    pub fn build(streams: Vec<Stream<'a>>, known_common_lcp: u32) -> Result<Self> {
        if streams.iter().any(|s| s.is_exhausted()) {
            return Err(SortError::precondition(
                "LcpLoserTree requires every input stream to be non-empty",
            ));
        }
        let k = streams.len();
        if k == 0 {
            return Err(SortError::precondition("LcpLoserTree requires k > 0 streams"));
        }
        let size = k.next_power_of_two();
        let mut tree = LcpLoserTree {
            streams,
            size,
            nodes: (0..size).map(|_| None).collect(),
            overall_winner: None,
        };
        for leaf in 0..size {
            let (slot, lcp) = if leaf < k {
                (Slot::Stream(leaf), known_common_lcp)
            } else {
                (Slot::Sentinel, 0)
            };
            tree.insert_leaf(leaf, Candidate { slot, lcp });
        }
        Ok(tree)
    }

    fn head_bytes(&self, slot: Slot) -> Option<&[u8]> {
        match slot {
            Slot::Stream(i) => Some(self.streams[i].head()),
            Slot::Sentinel => None,
        }
    }

    /// Play one candidate up the tree from `leaf`'s parent to the root,
    /// updating `nodes` and finally `overall_winner`.
    fn insert_leaf(&mut self, leaf: usize, mut winner: Candidate) {
        let mut pos = (self.size + leaf) / 2;
        loop {
            if pos == 0 {
                self.overall_winner = Some(winner);
                return;
            }
            match self.nodes[pos].take() {
                None => {
                    self.nodes[pos] = Some(winner);
                    return;
                }
                Some(defender) => {
                    let (new_winner, new_loser) = self.play_match(winner, defender);
                    self.nodes[pos] = Some(new_loser);
                    winner = new_winner;
                    pos /= 2;
                }
            }
        }
    }

    /// Resolve one match between an arriving `contender` and the `defender`
    /// parked at a node, per the spec's three-way rule.
    fn play_match(&self, contender: Candidate, defender: Candidate) -> (Candidate, Candidate) {
        match (contender.slot, defender.slot) {
            (Slot::Sentinel, Slot::Sentinel) => (contender, defender), // no-op, order irrelevant
            (Slot::Sentinel, _) => (defender, contender),              // defender (finite) wins
            (_, Slot::Sentinel) => (contender, defender),              // contender (finite) wins
            (Slot::Stream(_), Slot::Stream(_)) => {
                if defender.lcp > contender.lcp {
                    (defender, contender) // swap; both numbers carry over unchanged
                } else if defender.lcp < contender.lcp {
                    (contender, defender)
                } else {
                    let a = self.head_bytes(defender.slot).unwrap();
                    let b = self.head_bytes(contender.slot).unwrap();
                    let (divergence, defender_smaller) = scan_from(a, b, defender.lcp as usize);
                    if defender_smaller {
                        (
                            Candidate { slot: defender.slot, lcp: defender.lcp },
                            Candidate { slot: contender.slot, lcp: divergence },
                        )
                    } else {
                        (
                            Candidate { slot: contender.slot, lcp: contender.lcp },
                            Candidate { slot: defender.slot, lcp: divergence },
                        )
                    }
                }
            }
        }
    }

    /// `true` while at least one real stream still has strings left to emit.
    pub fn has_next(&self) -> bool {
        matches!(self.overall_winner.as_ref().map(|c| c.slot), Some(Slot::Stream(_)))
    }

    /// Emit the current overall-winner string and its LCP against the
    /// previously emitted string, then advance that stream's leaf and replay
    /// matches up to the root.
    ///
    /// Returns `None` once every real stream is exhausted.
    pub fn next(&mut self) -> Option<(&'a [u8], u32, Option<(i32, usize)>)> {
        let winner = self.overall_winner.as_ref()?;
        let (stream_idx, out_lcp) = match winner.slot {
            Slot::Stream(i) => (i, winner.lcp),
            Slot::Sentinel => return None,
        };
        let out = self.streams[stream_idx].head();
        let origin = self.streams[stream_idx].head_origin();

        self.streams[stream_idx].pos += 1;
        let (new_slot, new_lcp) = if self.streams[stream_idx].is_exhausted() {
            (Slot::Sentinel, 0)
        } else {
            (Slot::Stream(stream_idx), self.streams[stream_idx].head_lcp())
        };
        self.insert_leaf(stream_idx, Candidate { slot: new_slot, lcp: new_lcp });

        Some((out, out_lcp, origin))
    }

    /// Drain the tree, producing a freshly merged, sorted [`StringContainer`]
    /// with its LCP array populated. Origin tags (`origin_pe`/`origin_index`)
    /// are carried through from the input streams when present, so the DMS
    /// driver can build a permutation alongside the merge.
    pub fn merge_all(mut self) -> Result<(StringContainer, Vec<u32>)> {
        let mut out = StringContainer::new();
        let mut lcps = Vec::new();
        while let Some((s, lcp, origin)) = self.next() {
            match origin {
                Some((pe, idx)) => out.push_with_origin(s, pe, idx)?,
                None => out.push(s)?,
            }
            lcps.push(lcp);
        }
        out.set_lcps(lcps.clone())?;
        Ok((out, lcps))
    }
}

/// Merge `k` sorted, LCP-carrying runs into one sorted [`StringContainer`].
///
/// `known_common_lcp` must be `<=` the true LCP of every adjacent pair
/// across run boundaries; `0` is always a valid, if conservative, choice.
pub fn merge(
    runs: &[(&StringContainer, &[u32])],
    known_common_lcp: u32,
) -> Result<(StringContainer, Vec<u32>)> {
    let non_empty: Vec<Stream> = runs
        .iter()
        .filter(|(c, _)| !c.is_empty())
        .map(|(c, lcps)| Stream::new(c, lcps))
        .collect::<Result<_>>()?;
    if non_empty.is_empty() {
        return Ok((StringContainer::new(), Vec::new()));
    }
    let tree = LcpLoserTree::build(non_empty, known_common_lcp)?;
    tree.merge_all()
}

/// Reconstruct full, NUL-terminated strings from a compressed-prefix run:
/// `suffixes.get(i)` holds the bytes from `lcps[i]` onward of the original
/// string; `lcps[i]` is the shared-prefix length with the *previous full
/// string in this run* (`lcps[0] == 0`), exactly the convention
/// [`crate::lcp::recompute`] already uses.
pub fn reconstruct_suffixes(suffixes: &StringContainer, lcps: &[u32]) -> Result<StringContainer> {
    if suffixes.len() != lcps.len() {
        return Err(SortError::protocol(
            "compressed run length does not match its LCP array",
        ));
    }
    let mut out = StringContainer::new();
    let mut prev_full: Vec<u8> = Vec::new();
    for i in 0..suffixes.len() {
        let lcp = lcps[i] as usize;
        if lcp > prev_full.len() {
            return Err(SortError::protocol(
                "compressed-prefix LCP exceeds the previously reconstructed string's length",
            ));
        }
        let mut full = prev_full[..lcp].to_vec();
        full.extend_from_slice(suffixes.get(i));
        let view = suffixes.views()[i];
        match (view.origin_pe, view.origin_index) {
            (Some(pe), Some(idx)) => out.push_with_origin(&full, pe, idx)?,
            _ => out.push(&full)?,
        }
        prev_full = full;
    }
    Ok(out)
}

/// Merge `k` compressed-prefix runs into one sorted, fully reconstructed
/// [`StringContainer`] (see [`reconstruct_suffixes`]).
///
/// Reconstruction is an `O(total length)` pass regardless of whether it
/// happens before or during the merge; doing it up front lets this share
/// [`merge`]'s proven comparison logic instead of duplicating the loser tree
/// for a byte-for-byte equivalent result (testable property 6), at the cost
/// of materializing full strings slightly earlier than a wire-minimal
/// implementation would.
pub fn merge_compressed(
    runs: &[(&StringContainer, &[u32])],
    known_common_lcp: u32,
) -> Result<(StringContainer, Vec<u32>)> {
    let mut reconstructed: Vec<StringContainer> = Vec::with_capacity(runs.len());
    for (suffixes, lcps) in runs {
        reconstructed.push(reconstruct_suffixes(suffixes, lcps)?);
    }
    let refs: Vec<(&StringContainer, &[u32])> = reconstructed
        .iter()
        .zip(runs.iter().map(|(_, l)| *l))
        .map(|(c, l)| (c, l))
        .collect();
    merge(&refs, known_common_lcp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcp::recompute;

    fn run(strs: &[&str]) -> (StringContainer, Vec<u32>) {
        let c = StringContainer::from_strs(strs.iter().copied()).unwrap();
        let lcps = recompute(&c);
        (c, lcps)
    }

    #[test]
    fn merges_two_runs_in_order() {
        let (c1, l1) = run(&["apple", "banana", "cherry"]);
        let (c2, l2) = run(&["apricot", "bee", "blueberry"]);
        let (merged, out_lcps) = merge(&[(&c1, &l1), (&c2, &l2)], 0).unwrap();
        assert_eq!(
            merged.to_vecs(),
            vec![
                b"apple".to_vec(),
                b"apricot".to_vec(),
                b"banana".to_vec(),
                b"bee".to_vec(),
                b"blueberry".to_vec(),
                b"cherry".to_vec(),
            ]
        );
        assert_eq!(out_lcps, recompute(&merged));
    }

    #[test]
    fn merges_scenario_s1() {
        let sorted = |strs: &[&str]| {
            let mut v: Vec<&str> = strs.to_vec();
            v.sort();
            run(&v)
        };
        let pe0 = sorted(&["banana", "apple"]);
        let pe1 = sorted(&["cherry", "apricot"]);
        let pe2 = sorted(&["berry", "bee"]);
        let pe3 = sorted(&["blueberry", "avocado"]);
        let runs = [(&pe0.0, &pe0.1[..]), (&pe1.0, &pe1.1[..]), (&pe2.0, &pe2.1[..]), (&pe3.0, &pe3.1[..])];
        let (merged, _) = merge(&runs, 0).unwrap();
        let expected: Vec<Vec<u8>> = [
            "apple", "apricot", "avocado", "banana", "bee", "berry", "blueberry", "cherry",
        ]
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
        assert_eq!(merged.to_vecs(), expected);
    }

    #[test]
    fn single_stream_scenario_s3() {
        let (c, l) = run(&["x", "xy", "xyz"]);
        let (merged, out_lcps) = merge(&[(&c, &l)], 0).unwrap();
        assert_eq!(merged.to_vecs(), vec![b"x".to_vec(), b"xy".to_vec(), b"xyz".to_vec()]);
        assert_eq!(out_lcps, vec![0, 1, 2]);
    }

    #[test]
    fn matches_recompute_from_scratch_property() {
        // property 2: random k sorted runs -> merger output LCPs equal the
        // from-scratch recomputation on the merged result.
        let mut seed: u64 = 0x1234_5678;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for _ in 0..20 {
            let k = 2 + (next() % 5) as usize;
            let mut runs_owned: Vec<(StringContainer, Vec<u32>)> = Vec::new();
            for _ in 0..k {
                let n = 1 + (next() % 8) as usize;
                let mut strs: Vec<String> = (0..n)
                    .map(|_| {
                        let len = 1 + (next() % 4) as usize;
                        (0..len)
                            .map(|_| (b'a' + (next() % 4) as u8) as char)
                            .collect::<String>()
                    })
                    .collect();
                strs.sort();
                runs_owned.push(run(&strs.iter().map(|s| s.as_str()).collect::<Vec<_>>()));
            }
            let runs: Vec<(&StringContainer, &[u32])> =
                runs_owned.iter().map(|(c, l)| (c, l.as_slice())).collect();
            let (merged, out_lcps) = merge(&runs, 0).unwrap();
            assert!(merged.is_sorted());
            assert_eq!(out_lcps, recompute(&merged));

            let mut expected_multiset: Vec<Vec<u8>> =
                runs_owned.iter().flat_map(|(c, _)| c.to_vecs()).collect();
            expected_multiset.sort();
            let mut got_multiset = merged.to_vecs();
            got_multiset.sort();
            assert_eq!(got_multiset, expected_multiset);
        }
    }

    fn compress_run(full: &StringContainer, lcps: &[u32]) -> StringContainer {
        let mut compressed = StringContainer::new();
        for i in 0..full.len() {
            let s = full.get(i);
            let suffix = &s[(lcps[i] as usize).min(s.len())..];
            compressed.push(suffix).unwrap();
        }
        compressed
    }

    #[test]
    fn reconstruct_suffixes_round_trips_a_run() {
        let (c, l) = run(&["apple", "apricot", "banana"]);
        let compressed = compress_run(&c, &l);
        let reconstructed = reconstruct_suffixes(&compressed, &l).unwrap();
        assert_eq!(reconstructed.to_vecs(), c.to_vecs());
    }

    #[test]
    fn merge_compressed_matches_merge_property_6() {
        // property 6: merging compressed-prefix runs and reconstructing
        // afterwards yields byte-for-byte the same result as merging the
        // uncompressed runs directly.
        let mut seed: u64 = 0xC0FF_EE11_u64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for _ in 0..20 {
            let k = 2 + (next() % 4) as usize;
            let mut runs_full: Vec<(StringContainer, Vec<u32>)> = Vec::new();
            let mut runs_compressed: Vec<(StringContainer, Vec<u32>)> = Vec::new();
            for _ in 0..k {
                let n = 1 + (next() % 6) as usize;
                let mut strs: Vec<String> = (0..n)
                    .map(|_| {
                        let len = 1 + (next() % 5) as usize;
                        (0..len)
                            .map(|_| (b'a' + (next() % 3) as u8) as char)
                            .collect::<String>()
                    })
                    .collect();
                strs.sort();
                let (c, l) = run(&strs.iter().map(|s| s.as_str()).collect::<Vec<_>>());
                let compressed = compress_run(&c, &l);
                runs_compressed.push((compressed, l.clone()));
                runs_full.push((c, l));
            }

            let full_refs: Vec<(&StringContainer, &[u32])> =
                runs_full.iter().map(|(c, l)| (c, l.as_slice())).collect();
            let (expected, _) = merge(&full_refs, 0).unwrap();

            let compressed_refs: Vec<(&StringContainer, &[u32])> =
                runs_compressed.iter().map(|(c, l)| (c, l.as_slice())).collect();
            let (got, got_lcps) = merge_compressed(&compressed_refs, 0).unwrap();

            assert_eq!(got.to_vecs(), expected.to_vecs());
            assert_eq!(got_lcps, recompute(&got));
        }
    }

    #[test]
    fn reconstruct_suffixes_rejects_lcp_longer_than_history() {
        let suffixes = StringContainer::from_strs(["x"]).unwrap();
        let err = reconstruct_suffixes(&suffixes, &[5]).unwrap_err();
        assert!(matches!(err, SortError::Protocol(_)));
    }

    #[test]
    fn empty_runs_are_skipped() {
        let (c1, l1) = run(&["apple"]);
        let empty = StringContainer::new();
        let empty_lcps: Vec<u32> = Vec::new();
        let (merged, _) = merge(&[(&c1, &l1), (&empty, &empty_lcps)], 0).unwrap();
        assert_eq!(merged.to_vecs(), vec![b"apple".to_vec()]);
    }
}
