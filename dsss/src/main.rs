//! Demo binary: generates a random batch of ASCII strings on each PE and
//! sorts them across the whole world communicator with
//! [`dsss::dms::DistributedMergeSort`].
//!
//! Mirrors the teacher's own `tree/src/main.rs`: `mpi::initialize()`, read
//! run parameters from the environment with `.parse().unwrap_or(default)`,
//! drive one call into the library.

use std::time::SystemTime;

use mpi::topology::Communicator;
use rand::{Rng, SeedableRng};

use dsss::comm_hierarchy::Hierarchy;
use dsss::config::Config;
use dsss::dms::DistributedMergeSort;
use dsss::string_view::StringContainer;

fn random_strings(n: usize, max_len: usize, rng: &mut impl Rng) -> StringContainer {
    let mut container = StringContainer::new();
    for _ in 0..n {
        let len = 1 + rng.gen_range(0..max_len.max(1));
        let s: Vec<u8> = (0..len).map(|_| b'a' + rng.gen_range(0..26)).collect();
        container.push(&s).expect("generated strings never contain NUL");
    }
    container
}

fn main() {
    env_logger::init();

    let nstrings: usize = std::env::var("NSTRINGS").unwrap().parse().unwrap_or(10_000);
    let strlen_max: usize = std::env::var("STRLEN_MAX").unwrap().parse().unwrap_or(20);
    let seed: u64 = std::env::var("SEED").unwrap().parse().unwrap_or(0);
    let branching: usize = std::env::var("BRANCHING").unwrap().parse().unwrap_or(4);

    let start = SystemTime::now();

    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();
    let size = world.size();

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(rank as u64));
    let mut container = random_strings(nstrings, strlen_max, &mut rng);

    log::info!(
        "rank {} of {}: generated {} strings (max len {})",
        rank,
        size,
        container.len(),
        strlen_max
    );

    let hierarchy = Hierarchy::geometric(&world, branching.max(2));
    let cfg = Config::default();
    DistributedMergeSort::new(&hierarchy, &cfg)
        .sort(&mut container)
        .expect("distributed merge sort failed");

    let elapsed = start.elapsed().unwrap_or_default();
    log::info!(
        "rank {} of {}: sorted {} strings in {:?}",
        rank,
        size,
        container.len(),
        elapsed
    );
    if rank == 0 {
        println!(
            "dsss: sorted {} strings per PE across {} PEs in {:?}",
            container.len(),
            size,
            elapsed
        );
    }
}
