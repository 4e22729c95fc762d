//! Distributed end-to-end checks, run under `mpirun` rather than `cargo
//! test`: rsmpi processes cannot multiplex inside the test harness, so these
//! are plain functions called from `main`, printing `PASS`/`FAIL`/`SKIP`
//! exactly as the teacher's own `parallel_tests::test_sample_sort` did.
//!
//! Each scenario is literally one from the library's testable-properties
//! section and is gated on the exact PE count it specifies; run with
//! `mpirun -n 8` (the largest count any scenario needs) to exercise all of
//! them in one invocation.

use mpi::topology::{Communicator, SystemCommunicator};
use mpi::traits::*;
use rand::{Rng, SeedableRng};

use dsss::comm_hierarchy::Hierarchy;
use dsss::config::Config;
use dsss::dms::DistributedMergeSort;
use dsss::exchange::{alltoallv_bytes, alltoallv_u64};
use dsss::rquick;
use dsss::string_view::{split_nul_terminated, StringContainer};

fn report(name: &str, ok: bool) {
    println!("{}: {}", name, if ok { "PASS" } else { "FAIL" });
    assert!(ok, "{} failed", name);
}

/// Gather every rank's container to rank 0, preserving rank order, by
/// routing everything into alltoallv's destination-0 bucket — the same
/// point-to-point primitive the redistribute step itself uses.
fn gather_to_root(world: &SystemCommunicator, local: &StringContainer) -> Option<Vec<Vec<u8>>> {
    let size = world.size() as usize;
    let mut buckets: Vec<Vec<u8>> = vec![Vec::new(); size];
    buckets[0] = local.bytes().to_vec();
    let received = alltoallv_bytes(world, &buckets);
    if world.rank() == 0 {
        let mut all = Vec::new();
        for chunk in received {
            all.extend(split_nul_terminated(&chunk));
        }
        Some(all)
    } else {
        None
    }
}

/// Scenario S1: P=4, fixed per-PE string sets; the global concatenation of
/// DMS's output, gathered in rank order, must equal the literal expected
/// sorted sequence.
pub fn test_s1_fixed_four_pe(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();
    if size != 4 {
        if rank == 0 {
            println!("s1_fixed_four_pe: SKIP (requires exactly 4 PEs, got {})", size);
        }
        return;
    }

    let per_pe: [&[&str]; 4] = [
        &["banana", "apple"],
        &["cherry", "apricot"],
        &["berry", "bee"],
        &["blueberry", "avocado"],
    ];
    let mut container = StringContainer::from_strs(per_pe[rank as usize].iter().copied()).unwrap();

    let hierarchy = Hierarchy::geometric(world, 4);
    let cfg = Config::default();
    DistributedMergeSort::new(&hierarchy, &cfg).sort(&mut container).unwrap();
    assert!(container.is_sorted(), "rank {} local output not sorted", rank);

    let gathered = gather_to_root(world, &container);
    if rank == 0 {
        let expected: Vec<Vec<u8>> = [
            "apple", "apricot", "avocado", "banana", "bee", "berry", "blueberry", "cherry",
        ]
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
        report("s1_fixed_four_pe", gathered.unwrap() == expected);
    }
}

/// Scenario S4: P=3, 1000 random ASCII strings per PE (length <= 32). DMS's
/// output, gathered in rank order, must equal a from-scratch sort of the
/// gathered, pre-sort input.
pub fn test_s4_random_three_pe(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();
    if size != 3 {
        if rank == 0 {
            println!("s4_random_three_pe: SKIP (requires exactly 3 PEs, got {})", size);
        }
        return;
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xA5A5_0000 + rank as u64);
    let mut container = StringContainer::new();
    for _ in 0..1000 {
        let len = 1 + rng.gen_range(0..32);
        let s: Vec<u8> = (0..len).map(|_| b'a' + rng.gen_range(0..26)).collect();
        container.push(&s).unwrap();
    }

    let original = gather_to_root(world, &container);

    let hierarchy = Hierarchy::geometric(world, 3);
    let cfg = Config::default();
    DistributedMergeSort::new(&hierarchy, &cfg).sort(&mut container).unwrap();
    assert!(container.is_sorted(), "rank {} local output not sorted", rank);

    let sorted_output = gather_to_root(world, &container);

    if rank == 0 {
        let mut expected = original.unwrap();
        expected.sort();
        report("s4_random_three_pe", sorted_output.unwrap() == expected);
    }
}

/// Scenario S5: P=8, PE `i` holds 100 copies of `"k"` repeated `i` times.
/// Binary-tree median selection, under a fixed run id, must return a string
/// of all `'k'` bytes within one character of length 4 (the central PE's
/// string length on 8 PEs numbered 0..7).
pub fn test_s5_median_eight_pe(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();
    if size != 8 {
        if rank == 0 {
            println!("s5_median_eight_pe: SKIP (requires exactly 8 PEs, got {})", size);
        }
        return;
    }

    let s = vec![b'k'; rank as usize];
    let local_sorted = vec![s; 100];
    let median = rquick::select_median(world, &local_sorted, 100, 2026).unwrap();
    let ok = median.iter().all(|&b| b == b'k') && (3..=5).contains(&median.len());
    assert!(ok, "rank {} got unexpected median {:?}", rank, median);
    if rank == 0 {
        report("s5_median_eight_pe", ok);
    }
}

/// Scenario S6: P=4, nine copies of `"a"` indexed 0..9 and scattered
/// round-robin across PEs. Running the real distributed
/// [`rquick::sort_indexed`] over the whole world and gathering its output
/// must recover indices 0..9 in strictly increasing order, the ordering
/// guarantee [`rquick::cmp_indexed`] exists to give an equal-valued run
/// across the actual partition/exchange rounds, not just a comparator.
pub fn test_s6_indexed_duplicates_four_pe(world: &SystemCommunicator) {
    let rank = world.rank();
    let size = world.size();
    if size != 4 {
        if rank == 0 {
            println!(
                "s6_indexed_duplicates_four_pe: SKIP (requires exactly 4 PEs, got {})",
                size
            );
        }
        return;
    }

    let local: Vec<(Vec<u8>, u64)> = (0u64..9)
        .filter(|i| (*i as i32) % size == rank)
        .map(|i| (b"a".to_vec(), i))
        .collect();

    let cfg = Config::default();
    let sorted = rquick::sort_indexed(world, local, &cfg, 2026).unwrap();
    let local_indices: Vec<u64> = sorted.iter().map(|(_, i)| *i).collect();

    let mut idx_buckets: Vec<Vec<u64>> = vec![Vec::new(); size as usize];
    idx_buckets[0] = local_indices;
    let recv_idx = alltoallv_u64(world, &idx_buckets);

    if rank == 0 {
        let indices: Vec<u64> = recv_idx.into_iter().flatten().collect();
        let strictly_increasing = indices.windows(2).all(|w| w[0] < w[1]);
        let full_range = indices == (0u64..9).collect::<Vec<u64>>();
        report("s6_indexed_duplicates_four_pe", strictly_increasing && full_range);
    }
}
