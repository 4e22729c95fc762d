use mpi::traits::*;

mod sorting;
use sorting::*;

fn main() {
    env_logger::init();
    let universe = mpi::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();

    if rank == 0 {
        println!("Test sorting algorithms: ");
    }

    test_s1_fixed_four_pe(&world);
    test_s4_random_three_pe(&world);
    test_s5_median_eight_pe(&world);
    test_s6_indexed_duplicates_four_pe(&world);

    if rank == 0 {
        println!("Test sorting algorithms: done");
    }
}
