//! Journal policies.
//!
//! The journal takes its tunables as plain values at open time instead of
//! reaching into process-wide configuration: how much headroom to keep
//! free, how aggressively to evict, and whether a full journal merges its
//! history in place or asks the caller to flush the zone externally.

/// Free-space management knobs.
///
/// Occupancy is `used_bytes / size_limit`. The writer compares it against
/// an allowed level derived from the matching `keep_free_*` ratio and
/// evicts flushed history when the level is exceeded. The ratios differ
/// by mode because a future merge needs room for the merged changeset.
#[derive(Debug, Clone, Copy)]
pub struct SpacePolicy {
    /// Fraction kept free when merging is off and no merged changeset
    /// exists.
    pub keep_free: f32,
    /// Fraction kept free when merging is enabled but the merged
    /// changeset has not been created yet.
    pub keep_free_for_merge: f32,
    /// Fraction kept free once a merged changeset is present.
    pub keep_free_merged: f32,
    /// Eviction requests this many times the minimum shortfall, so the
    /// sweep does not run on every insert.
    pub dispose_ratio: f32,
    /// Fraction of the size limit one insert transaction may write before
    /// the writer sub-commits with the dirty-serial marker.
    pub max_insert_txn: f32,
}

impl Default for SpacePolicy {
    fn default() -> Self {
        Self {
            keep_free: 0.50,
            keep_free_for_merge: 0.72,
            keep_free_merged: 0.44,
            dispose_ratio: 3.0,
            max_insert_txn: 0.05,
        }
    }
}

/// Options for opening a journal.
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// On-disk size limit in bytes; clamped up to the 1 MiB floor.
    pub size_limit: usize,
    /// Free-space management.
    pub space: SpacePolicy,
    /// Whether a full journal merges history in place instead of asking
    /// the caller to flush the zone externally.
    pub merge_enabled: bool,
    /// Operation budget per backing-store write transaction.
    pub max_txn_ops: usize,
}

impl JournalOptions {
    /// Options with defaults for the given size limit.
    #[must_use]
    pub fn new(size_limit: usize) -> Self {
        Self {
            size_limit,
            space: SpacePolicy::default(),
            merge_enabled: false,
            max_txn_ops: 100_000,
        }
    }

    /// Enables in-place merging.
    #[must_use]
    pub fn merge(mut self, enabled: bool) -> Self {
        self.merge_enabled = enabled;
        self
    }
}
