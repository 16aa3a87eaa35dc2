//! Facade crate: re-exports the public surface of the in-memory
//! composite value engine as one importable namespace, for downstream
//! (command-handler) consumers
//! that want a single import instead of pulling in each subsystem
//! crate directly.
//!
//! Nothing is implemented here. Every type and function below lives in
//! one of the leaf crates (`kvengine-*`); this crate only curates which
//! names are part of the engine's public ABI versus internal to a
//! single component.

pub use kvengine_base::{err, err_kind, Bitmap256, EngineConfig, Error, ErrorKind, Result};

pub use kvengine_alloc::{AbortingOomHandler, Allocator, OomHandler, Usable};

pub use kvengine_util::{parse_canonical_i64, siphash24, siphash24_case_insensitive, Mt64, SipSeed};

pub use kvengine_sds::{Sds, SdsHeaderKind};

pub use kvengine_ziplist::{ZlValue, Ziplist};

pub use kvengine_listpack::{InsertWhere, LpValue, Listpack};

pub use kvengine_intset::{Intset, IntsetEncoding};

pub use kvengine_dict::{Dict, DictIter, RehashPauseGuard, SipHashBuilder};

pub use kvengine_skiplist::{LexBound, LexRange, ScoreRange, Skiplist, SkiplistIter, MAXLEVEL, P as SKIPLIST_P};

pub use kvengine_rax::{Rax, RaxCursor, RaxIter, RaxValue, SeekOp};

pub use kvengine_quicklist::{Quicklist, PLAIN_NODE_THRESHOLD};

pub use kvengine_stream::{
    Consumer, ConsumerGroup, Fields, PendingEntry, Stream, StreamId, MAX_ENTRIES_PER_GROUP,
};

pub use kvengine_object::{
    estimate_size, Encoding, HashBody, LruField, ObjType, ObjectBody, RedisObject, Refcount,
    SetBody, SharedObjects, StringBody, ZsetBody, DEFAULT_SAMPLES,
};

/// Typed mutators/inspectors for each value type: string
/// append/range, list push/pop/index/range, set add/remove/is-member,
/// hash field set/get/delete, zset add/remove/rank/range, stream
/// append/range/trim. Each submodule routes on `RedisObject::encoding()`
/// and applies the encoding-transition rules in place.
pub use kvengine_object::ops;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    /// A thin smoke test that the facade actually wires the full stack
    /// together: build an allocator, a config, a STRING object, and run
    /// it through an encoding transition via the re-exported `ops`
    /// surface rather than any `kvengine-*` crate directly.
    #[test]
    fn test_facade_string_roundtrip() {
        let alloc = Allocator::new();
        let cfg = EngineConfig::default();
        let mut obj = RedisObject::new(ObjType::String, ObjectBody::String(StringBody::Raw(Sds::make(&alloc, b"hello"))));
        ops::string::append(&mut obj, &alloc, b" world").unwrap();
        ops::string::try_object_encoding(&mut obj, &cfg).unwrap();
        assert_eq!(obj.type_(), ObjType::String);
    }

    #[test]
    fn test_facade_list_is_quicklist() {
        let cfg = EngineConfig::default();
        let obj = RedisObject::make_list(&cfg);
        assert_eq!(obj.type_(), ObjType::List);
    }

    #[test]
    fn test_facade_shared_objects_reachable() {
        let shared = SharedObjects::new();
        assert!(shared.integer(42).unwrap().refcount().is_shared());
    }
}
