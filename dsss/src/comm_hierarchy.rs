//! Sub-communicator hierarchy: the nested PE groupings the DMS driver and
//! RQuick both operate over.
//!
//! Built by repeatedly colour-splitting the world communicator, the same
//! `world.split_by_color(Color::with_value(..))` idiom the teacher repository
//! uses for its own `foo`/`alltoall` demo binaries, producing a chain of
//! levels from coarsest (close to the whole world) down to the finest
//! (singleton groups). The DMS driver walks this chain coarsest-first.

use mpi::topology::{Color, Communicator, Process, Rank, SystemCommunicator, UserCommunicator};

/// One level of the hierarchy: the communicator the level was split *from*
/// (`comm_orig`), the communicator this PE's group actually exchanges on at
/// this level (`comm_exchange`), how many sibling groups exist at this level
/// (`num_groups`), and this PE's group's size (`group_size`).
///
/// `comm_exchange` must be the *wide*, not-yet-narrowed communicator: the
/// sample/partition/redistribute step needs every PE in the current group to
/// see every other PE's buckets, so it always runs before this level's
/// colour-split, never after. `comm_orig` and `comm_exchange` are therefore
/// the same communicator for every level; `group_size`/`num_groups` describe
/// the narrower groups the redistribute step routes strings *into*, which
/// become the next level's starting communicator.
pub struct Level {
    pub comm_orig: UserCommunicator,
    pub comm_exchange: UserCommunicator,
    pub num_groups: usize,
    pub group_size: usize,
}

impl Level {
    pub fn rank(&self) -> Rank {
        self.comm_exchange.rank()
    }

    pub fn size(&self) -> usize {
        self.comm_exchange.size() as usize
    }

    pub fn root_process(&self) -> Process<'_, UserCommunicator> {
        self.comm_exchange.process_at_rank(0)
    }

    /// The 0-based index, among this PE's siblings, of the group it ended
    /// up in at this level — i.e. the destination group index a string
    /// assigned to "group g" of this level should be sent to.
    pub fn group_index(&self) -> usize {
        (self.comm_orig.rank() as usize) / self.local_group_size_hint()
    }

    fn local_group_size_hint(&self) -> usize {
        let orig_size = self.comm_orig.size() as usize;
        (orig_size + self.num_groups - 1) / self.num_groups
    }
}

/// A descending hierarchy of communicator levels, coarsest first, down to
/// singleton groups.
pub struct Hierarchy {
    levels: Vec<Level>,
}

impl Hierarchy {
    /// Build a hierarchy over `world` with a fixed branching factor: the
    /// first level splits `world` into `branching` groups, the next splits
    /// each of those into `branching` groups again, and so on until groups
    /// reach size 1.
    pub fn geometric(world: &SystemCommunicator, branching: usize) -> Hierarchy {
        assert!(branching >= 2, "branching factor must be at least 2");

        // The world communicator only colour-splits into a `UserCommunicator`,
        // so the very first split is handled outside the loop to get onto a
        // uniform type for the rest of the chain.
        let mut current = world
            .split_by_color(Color::with_value(0))
            .expect("split_by_color(0) on the whole world never returns None");

        let mut levels = Vec::new();
        loop {
            let size = current.size() as usize;
            if size <= 1 {
                break;
            }
            let num_groups = branching.min(size);
            let local_group_size = (size + num_groups - 1) / num_groups;
            let color_val = (current.rank() as usize) / local_group_size;
            let sub = current
                .split_by_color(Color::with_value(color_val as i32))
                .expect("split_by_color with a non-negative color never returns None");
            levels.push(Level {
                group_size: sub.size() as usize,
                num_groups,
                comm_exchange: current.clone(),
                comm_orig: current,
            });
            current = sub;
        }
        if levels.is_empty() {
            levels.push(Level {
                group_size: current.size() as usize,
                comm_orig: current.clone(),
                comm_exchange: current,
                num_groups: 1,
            });
        }
        Hierarchy { levels }
    }

    /// A single flat level spanning the whole world: one sample-sort round
    /// over every rank, the shape [`crate::ses::SpaceEfficientSort`] wants
    /// for each of its quantile passes rather than `geometric`'s descending
    /// chain of shrinking groups.
    pub fn flat(world: &SystemCommunicator) -> Hierarchy {
        let whole = world
            .split_by_color(Color::with_value(0))
            .expect("split_by_color(0) on the whole world never returns None");
        let group_size = whole.size() as usize;
        Hierarchy {
            levels: vec![Level {
                comm_orig: whole.clone(),
                comm_exchange: whole,
                num_groups: 1,
                group_size,
            }],
        }
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
