//! Runtime configuration surface.
//!
//! The source system exposes most of these as compile-time flags; in Rust we
//! keep them as runtime fields on a plain `Config` struct, since the trait
//! seams in [`crate::policy`] already give us the compile-time polymorphism
//! the source gets from its flags (see Design Notes in the spec).

/// Runtime knobs for [`crate::dms::DistributedMergeSort`], [`crate::rquick`]
/// and [`crate::ses::SpaceEfficientSort`].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Ship only the suffix past each string's already-known LCP across the
    /// network, reconstructing full strings only after the merge.
    pub compress_prefixes: bool,
    /// Use RQuick as the whole-input global sorter instead of DMS. Useful for
    /// small-to-medium inputs where DMS's multi-level hierarchy overhead
    /// isn't worth paying.
    pub rquick_as_global_sort: bool,
    /// Target size of each SES quantile, in strings.
    pub quantile_size: usize,
    /// Oversampling density: how many splitter candidates each PE contributes
    /// per level before the global splitter set is chosen.
    pub sample_density: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compress_prefixes: false,
            rquick_as_global_sort: false,
            quantile_size: 4096,
            sample_density: 10,
        }
    }
}

impl Config {
    /// Maximum splitter length used by the sample policy: long enough to be
    /// selective, short enough to keep comm volume down.
    ///
    /// `100 * (global_avg_lcp + 5)`, per the DMS sampling heuristic.
    pub fn max_splitter_length(&self, global_avg_lcp: usize) -> usize {
        100 * (global_avg_lcp + 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let cfg = Config::default();
        assert!(!cfg.compress_prefixes);
        assert!(!cfg.rquick_as_global_sort);
        assert_eq!(cfg.quantile_size, 4096);
        assert_eq!(cfg.sample_density, 10);
    }

    #[test]
    fn max_splitter_length_heuristic() {
        let cfg = Config::default();
        assert_eq!(cfg.max_splitter_length(0), 500);
        assert_eq!(cfg.max_splitter_length(3), 800);
    }
}
