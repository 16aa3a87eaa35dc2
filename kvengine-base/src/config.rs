//! Tunable thresholds collected into one place, per the "collect globals
//! into an explicit engine context" design note. Every value here has the
//! same default the original C source hardcodes; a production build would
//! source these from the (out-of-scope) config-loading subsystem.

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Set: max integer elements before INTSET -> HASHTABLE promotion.
    pub set_max_intset_entries: usize,
    /// Hash: max field count before ZIPLIST -> HASHTABLE promotion.
    pub hash_max_ziplist_entries: usize,
    /// Hash: max member/value length before promotion.
    pub hash_max_ziplist_value: usize,
    /// ZSet: max entry count before ZIPLIST -> SKIPLIST promotion.
    pub zset_max_ziplist_entries: usize,
    /// ZSet: max member length before promotion.
    pub zset_max_ziplist_value: usize,
    /// String: length above which EMBSTR is promoted to RAW.
    pub embstr_max_len: usize,
    /// Quicklist: fill factor (negative selects a size-class bucket,
    /// non-negative is a per-node entry cap).
    pub list_fill: i32,
    /// Quicklist: uncompressed nodes preserved at each end.
    pub list_compress_depth: usize,
    /// Hash table: initial bucket count (must be a power of two).
    pub dict_initial_size: usize,
    /// Hash table: rehash-for-duration batch size between clock checks.
    pub dict_rehash_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            set_max_intset_entries: 512,
            hash_max_ziplist_entries: 128,
            hash_max_ziplist_value: 64,
            zset_max_ziplist_entries: 128,
            zset_max_ziplist_value: 64,
            embstr_max_len: 44,
            list_fill: 128,
            list_compress_depth: 0,
            dict_initial_size: 4,
            dict_rehash_batch: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_defaults_match_spec() {
        let c = EngineConfig::default();
        assert_eq!(c.set_max_intset_entries, 512);
        assert_eq!(c.hash_max_ziplist_entries, 128);
        assert_eq!(c.embstr_max_len, 44);
    }
}
