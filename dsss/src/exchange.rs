//! Point-to-point all-to-all exchange.
//!
//! Grounded in the teacher's own `sample_sort` broadcast loop
//! (`tree/src/sort.rs`, step 3): each PE sends its per-destination bucket
//! and, on its own turn, drains one message from every other PE via
//! `any_process().receive_vec`. No varcount-alltoallv binding was grounded
//! anywhere in the retrieved pack, so every redistribute in this crate routes
//! through this single point-to-point implementation — see DESIGN.md.

use mpi::topology::{Communicator, Rank};
use mpi::traits::*;

fn alltoallv<C: Communicator, T>(comm: &C, buckets: &[Vec<T>]) -> Vec<Vec<T>>
where
    T: Equivalence + Clone + Default,
{
    let rank = comm.rank();
    let size = comm.size();
    let mut received: Vec<Vec<T>> = (0..size).map(|_| Vec::new()).collect();
    for i in 0..size {
        if rank != i {
            comm.process_at_rank(i).send(&buckets[i as usize][..]);
        } else {
            received[rank as usize] = buckets[rank as usize].clone();
            for _ in 1..size {
                let (msg, status) = comm.any_process().receive_vec::<T>();
                received[status.source_rank() as usize] = msg;
            }
        }
        comm.barrier();
    }
    received
}

pub fn alltoallv_bytes<C: Communicator>(comm: &C, buckets: &[Vec<u8>]) -> Vec<Vec<u8>> {
    alltoallv(comm, buckets)
}

pub fn alltoallv_u64<C: Communicator>(comm: &C, buckets: &[Vec<u64>]) -> Vec<Vec<u64>> {
    alltoallv(comm, buckets)
}

pub fn alltoallv_u32<C: Communicator>(comm: &C, buckets: &[Vec<u32>]) -> Vec<Vec<u32>> {
    alltoallv(comm, buckets)
}

pub fn alltoallv_rank<C: Communicator>(comm: &C, buckets: &[Vec<Rank>]) -> Vec<Vec<Rank>> {
    alltoallv(comm, buckets)
}
