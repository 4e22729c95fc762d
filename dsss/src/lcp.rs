//! Longest-common-prefix primitives shared by the loser tree, RQuick and the
//! DMS driver.

use crate::string_view::StringContainer;

/// Length, in bytes, of the longest common prefix of `a` and `b`.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Recompute the LCP array for a sorted run from scratch: `lcp[0] == 0`,
/// `lcp[i] == common_prefix_len(s[i-1], s[i])` for `i > 0`.
///
/// Used both to initialize a fresh container's LCPs and, in tests, as the
/// ground truth the incremental loser-tree output is checked against
/// (testable property 2).
pub fn recompute(container: &StringContainer) -> Vec<u32> {
    let mut lcps = Vec::with_capacity(container.len());
    let mut prev: Option<&[u8]> = None;
    for s in container.iter_bytes() {
        let lcp = match prev {
            Some(p) => common_prefix_len(p, s) as u32,
            None => 0,
        };
        lcps.push(lcp);
        prev = Some(s);
    }
    lcps
}

/// Zero the LCP at each chunk boundary of a container built by concatenating
/// `chunk_lens.len()` runs back to back (e.g. after an all-to-all). The LCP
/// at the first element of every chunk but the first is meaningless across
/// the join, since the two runs were sorted independently.
pub fn zero_chunk_boundaries(lcps: &mut [u32], chunk_lens: &[usize]) {
    let mut pos = 0usize;
    for (i, &len) in chunk_lens.iter().enumerate() {
        if i > 0 && len > 0 && pos < lcps.len() {
            lcps[pos] = 0;
        }
        pos += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_prefix_len_basic() {
        assert_eq!(common_prefix_len(b"xyz", b"xy"), 2);
        assert_eq!(common_prefix_len(b"xy", b"xyz"), 2);
        assert_eq!(common_prefix_len(b"abc", b"abd"), 2);
        assert_eq!(common_prefix_len(b"", b"abc"), 0);
    }

    #[test]
    fn recompute_matches_s3_scenario() {
        // Spec scenario S3: {"xyz","xy","x"} sorted -> {"x","xy","xyz"}, lcps [0,1,2].
        let c = StringContainer::from_strs(["x", "xy", "xyz"]).unwrap();
        assert_eq!(recompute(&c), vec![0, 1, 2]);
    }

    #[test]
    fn zero_chunk_boundaries_clears_joins_only() {
        let mut lcps = vec![0, 3, 2, 5, 1, 4];
        zero_chunk_boundaries(&mut lcps, &[3, 2, 1]);
        assert_eq!(lcps, vec![0, 3, 2, 0, 1, 0]);
    }
}
