//! Encoding tags and the promotion/demotion rules,
//! mirroring the `OBJ_ENCODING_*` table in `redisObject.h` and the
//! threshold checks scattered through `t_hash.c`/`t_zset.c`/`t_set.c`
//! equivalents inlined into `zset.cpp`/`redisObject.cpp`. Every
//! threshold is read from `kvengine_base::EngineConfig` rather than
//! hardcoded.

use kvengine_base::EngineConfig;

/// The `OBJ_ENCODING_*` table. Not every tag is legal for
/// every `ObjType`; `RedisObject::encoding()` only ever returns the
/// subset that `body::ObjectBody` can actually construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Raw,
    Embstr,
    Int,
    Ziplist,
    Intset,
    Hashtable,
    Skiplist,
    Quicklist,
    Stream,
}

/// `true` when `len` bytes of a prospective set/hash/zset member would
/// force promotion past the per-element length cap, independent of the
/// container's element count: a single oversized element forces
/// promotion regardless of how many elements the container holds.
pub fn element_forces_promotion(len: usize, max_value_len: usize) -> bool {
    len > max_value_len
}

pub fn hash_should_be_ziplist(entries: usize, max_entry_len: usize, cfg: &EngineConfig) -> bool {
    entries <= cfg.hash_max_ziplist_entries && max_entry_len <= cfg.hash_max_ziplist_value
}

pub fn zset_should_be_ziplist(entries: usize, max_entry_len: usize, cfg: &EngineConfig) -> bool {
    entries <= cfg.zset_max_ziplist_entries && max_entry_len <= cfg.zset_max_ziplist_value
}

pub fn set_should_be_intset(entries: usize, cfg: &EngineConfig) -> bool {
    entries <= cfg.set_max_intset_entries
}

pub fn string_should_be_embstr(len: usize, cfg: &EngineConfig) -> bool {
    len <= cfg.embstr_max_len
}
