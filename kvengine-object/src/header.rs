//! The value header itself, binding `type` × `encoding` ×
//! `refcount` × `lru` to a `body::ObjectBody`. Mirrors the
//! `redisObject` struct in `redisObject.h` and its `incrRefCount`/
//! `decrRefCount`/`freeStringObject`-style destructors in
//! `redisObject.cpp`.

use std::cell::Cell;

use kvengine_base::{err_kind, EngineConfig, ErrorKind, Result};
use kvengine_quicklist::Quicklist;
use kvengine_stream::Stream;

use crate::body::{HashBody, ObjectBody, SetBody, StringBody, ZsetBody};
use crate::lru::LruField;
use crate::transitions::Encoding;

/// `type` determines the set of legal `encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjType {
    String,
    List,
    Set,
    Hash,
    Zset,
    Stream,
    Module,
}

/// `OBJ_SHARED_REFCOUNT` / `OBJ_STATIC_REFCOUNT` sentinels from
/// `redisObject.h`, plus ordinary counted values. Kept as a thin wrapper
/// over `i32` (not an enum) so arithmetic reads the same as the source's
/// plain `int refcount` field; the sentinel comparisons are centralized
/// here instead of sprinkled at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refcount(i32);

impl Refcount {
    pub const SHARED: Refcount = Refcount(i32::MAX);
    pub const STACK: Refcount = Refcount(i32::MAX - 1);

    pub fn new(count: i32) -> Self {
        debug_assert!(count >= 1, "a reachable header must have refcount >= 1");
        Refcount(count)
    }

    pub fn is_shared(self) -> bool {
        self == Refcount::SHARED
    }

    pub fn is_stack(self) -> bool {
        self == Refcount::STACK
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// The polymorphic value header. `refcount` is a `Cell` because
/// `incref`/`decref` are logically const operations on a shared value
/// (the same object may be reachable from many keyspace entries at
/// once, e.g. via the shared-integer pool) even though the header
/// itself is usually held behind a shared pointer by the caller.
pub struct RedisObject {
    type_: ObjType,
    lru: Cell<LruField>,
    refcount: Cell<Refcount>,
    body: ObjectBody,
}

impl RedisObject {
    pub fn new(type_: ObjType, body: ObjectBody) -> Self {
        RedisObject {
            type_,
            lru: Cell::new(LruField::default()),
            refcount: Cell::new(Refcount::new(1)),
            body,
        }
    }

    /// Construct a frozen header for the shared-object registry:
    /// freezing is implemented by setting refcount to a
    /// sentinel; decrement is a no-op on frozen headers.
    pub fn new_shared(type_: ObjType, body: ObjectBody) -> Self {
        RedisObject {
            type_,
            lru: Cell::new(LruField::default()),
            refcount: Cell::new(Refcount::SHARED),
            body,
        }
    }

    pub fn type_(&self) -> ObjType {
        self.type_
    }

    pub fn encoding(&self) -> Encoding {
        self.body.encoding()
    }

    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ObjectBody {
        &mut self.body
    }

    pub fn into_body(self) -> ObjectBody {
        self.body
    }

    pub fn lru(&self) -> LruField {
        self.lru.get()
    }

    pub fn set_lru(&self, lru: LruField) {
        if !self.refcount.get().is_shared() {
            self.lru.set(lru);
        }
    }

    pub fn refcount(&self) -> Refcount {
        self.refcount.get()
    }

    /// incref on SHARED/STACK is a saturating no-op,
    /// otherwise increments the ordinary count.
    pub fn incref(&self) {
        let rc = self.refcount.get();
        if rc.is_shared() || rc.is_stack() {
            return;
        }
        self.refcount.set(Refcount::new(rc.get() + 1));
    }

    /// Returns `Ok(true)` when the count reached zero and the caller
    /// must run the typed destructor (walk `self.body` and release it);
    /// `Ok(false)` when the object is still referenced or frozen.
    /// Decrementing a `STACK` header, or one already at zero, is a
    /// panic: negative or zero on a reachable header is not a valid
    /// state to observe.
    pub fn decref(&self) -> Result<bool> {
        let rc = self.refcount.get();
        if rc.is_shared() {
            return Ok(false);
        }
        if rc.is_stack() {
            return Err(err_kind(
                ErrorKind::WrongType,
                "decref on a stack-allocated (OBJ_STATIC_REFCOUNT) header is forbidden",
            ));
        }
        let next = rc.get() - 1;
        if next < 0 {
            panic!("decref on a header with refcount already at zero");
        }
        if next == 0 {
            return Ok(true);
        }
        self.refcount.set(Refcount::new(next));
        Ok(false)
    }

    /// Builds a new empty LIST object. Lists have one live shape
    /// (QUICKLIST); the fill/compress knobs come from
    /// `cfg` rather than being hardcoded.
    pub fn make_list(cfg: &EngineConfig) -> Self {
        let fill = cfg.list_fill.unsigned_abs() as usize;
        RedisObject::new(ObjType::List, ObjectBody::List(Quicklist::new(fill, cfg.list_compress_depth)))
    }

    pub fn make_set() -> Self {
        RedisObject::new(ObjType::Set, ObjectBody::Set(SetBody::default()))
    }

    pub fn make_hash() -> Self {
        RedisObject::new(ObjType::Hash, ObjectBody::Hash(HashBody::default()))
    }

    pub fn make_zset() -> Self {
        RedisObject::new(ObjType::Zset, ObjectBody::Zset(ZsetBody::default()))
    }

    pub fn make_stream() -> Self {
        RedisObject::new(ObjType::Stream, ObjectBody::Stream(Box::new(Stream::new())))
    }

    pub fn make_string_int(n: i64) -> Self {
        RedisObject::new(ObjType::String, ObjectBody::String(StringBody::Int(n)))
    }

    pub fn require_type(&self, expected: ObjType) -> Result<()> {
        if self.type_ == expected {
            Ok(())
        } else {
            Err(err_kind(
                ErrorKind::WrongType,
                format!("operation requires {:?}, found {:?}", expected, self.type_),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::StringBody;
    use test_log::test;

    fn string_obj(n: i64) -> RedisObject {
        RedisObject::new(ObjType::String, ObjectBody::String(StringBody::Int(n)))
    }

    #[test]
    fn test_refcount_lifecycle() {
        let o = string_obj(42);
        assert_eq!(o.refcount().get(), 1);
        o.incref();
        assert_eq!(o.refcount().get(), 2);
        assert!(!o.decref().unwrap());
        assert!(o.decref().unwrap());
    }

    #[test]
    #[should_panic]
    fn test_decref_below_zero_panics() {
        let o = string_obj(1);
        o.decref().unwrap();
        let _ = o.decref().unwrap();
    }

    #[test]
    fn test_shared_refcount_never_changes() {
        let o = RedisObject::new_shared(ObjType::String, ObjectBody::String(StringBody::Int(7)));
        assert!(o.refcount().is_shared());
        o.incref();
        assert!(o.refcount().is_shared());
        assert!(!o.decref().unwrap());
        assert!(o.refcount().is_shared());
    }

    #[test]
    fn test_wrong_type_surfaces() {
        let o = string_obj(1);
        let e = o.require_type(ObjType::List).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::WrongType);
    }
}
