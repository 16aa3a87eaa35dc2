//! Shared-object registry: a process-wide, lazily
//! built pool of refcount-frozen headers for common replies, mirroring
//! `createSharedObjects` in the classic `redisObject.cpp`
//! (`shared.ok`, `shared.czero`/`cone`, `shared.integers[...]`,
//! `shared.mbulkhdr[...]`/`shared.bulkhdr[...]`).
//!
//! Protocol framing itself (the `+`/`$`/`*` reply prefixes) is out of
//! scope here: the "bulk header" entries here are plain byte
//! strings of the form the source precomputes (`"$<n>\r\n"`), left for
//! an out-of-scope protocol layer to splice in front of a payload.

use std::collections::HashMap;
use std::rc::Rc;

use crate::body::{ObjectBody, StringBody};
use crate::header::{ObjType, RedisObject};

/// `redisObject.h`'s `OBJ_SHARED_INTEGERS`: small integers
/// 0..9999 are shared so every key holding one of them costs nothing
/// beyond a pointer/refcount bump.
pub const SHARED_INTEGERS: i64 = 10_000;
/// `OBJ_SHARED_BULKHDR_LEN`: bulk headers are precomputed for lengths
/// `0..=32`.
pub const SHARED_BULKHDR_LEN: usize = 32;

pub struct SharedObjects {
    pub ok: Rc<RedisObject>,
    pub err: Rc<RedisObject>,
    pub nil: Rc<RedisObject>,
    pub czero: Rc<RedisObject>,
    pub cone: Rc<RedisObject>,
    /// `integers[i]` is the frozen STRING/INT object for value `i`.
    pub integers: Vec<Rc<RedisObject>>,
    /// `bulk_headers[n]` is the frozen `"$<n>\r\n"` header string.
    pub bulk_headers: Vec<Rc<RedisObject>>,
    error_prefixes: HashMap<&'static str, Rc<RedisObject>>,
}

fn frozen_embstr(bytes: &[u8]) -> Rc<RedisObject> {
    Rc::new(RedisObject::new_shared(
        ObjType::String,
        ObjectBody::String(StringBody::Embstr(bytes.to_vec().into_boxed_slice())),
    ))
}

fn frozen_int(n: i64) -> Rc<RedisObject> {
    Rc::new(RedisObject::new_shared(
        ObjType::String,
        ObjectBody::String(StringBody::Int(n)),
    ))
}

const ERROR_KINDS: &[&str] = &["ERR", "WRONGTYPE", "NOSCRIPT", "BUSYKEY", "OOM", "SYNTAX"];

impl SharedObjects {
    /// Builds the whole pool eagerly, matching `createSharedObjects`'s
    /// one-shot startup pass ("lazily built" refers to
    /// construction happening once at process start, not per-access
    /// memoization).
    pub fn new() -> Self {
        let integers = (0..SHARED_INTEGERS).map(frozen_int).collect();
        let bulk_headers = (0..=SHARED_BULKHDR_LEN)
            .map(|n| frozen_embstr(format!("${}\r\n", n).as_bytes()))
            .collect();
        let error_prefixes = ERROR_KINDS
            .iter()
            .map(|&kind| (kind, frozen_embstr(format!("-{} ", kind).as_bytes())))
            .collect();

        SharedObjects {
            ok: frozen_embstr(b"+OK\r\n"),
            err: frozen_embstr(b"-ERR\r\n"),
            nil: frozen_embstr(b"$-1\r\n"),
            czero: frozen_int(0),
            cone: frozen_int(1),
            integers,
            bulk_headers,
            error_prefixes,
        }
    }

    /// Returns the frozen shared object for `value` if it falls in the
    /// shared-integer range, for callers implementing the
    /// `tryObjectEncoding` sharing check.
    pub fn integer(&self, value: i64) -> Option<Rc<RedisObject>> {
        if (0..SHARED_INTEGERS).contains(&value) {
            Some(Rc::clone(&self.integers[value as usize]))
        } else {
            None
        }
    }

    pub fn bulk_header(&self, len: usize) -> Option<Rc<RedisObject>> {
        self.bulk_headers.get(len).map(Rc::clone)
    }

    pub fn error_prefix(&self, kind: &str) -> Option<Rc<RedisObject>> {
        self.error_prefixes.get(kind).map(Rc::clone)
    }
}

impl Default for SharedObjects {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_shared_integers_are_frozen_and_in_range() {
        let shared = SharedObjects::new();
        let five = shared.integer(5).unwrap();
        assert!(five.refcount().is_shared());
        assert!(shared.integer(-1).is_none());
        assert!(shared.integer(SHARED_INTEGERS).is_none());
    }

    #[test]
    fn test_decref_on_shared_is_a_noop() {
        let shared = SharedObjects::new();
        let ok = Rc::clone(&shared.ok);
        assert!(!ok.decref().unwrap());
        assert!(ok.refcount().is_shared());
    }

    #[test]
    fn test_bulk_header_table_covers_0_to_32() {
        let shared = SharedObjects::new();
        assert!(shared.bulk_header(0).is_some());
        assert!(shared.bulk_header(32).is_some());
        assert!(shared.bulk_header(33).is_none());
    }

    #[test]
    fn test_error_prefix_lookup() {
        let shared = SharedObjects::new();
        assert!(shared.error_prefix("WRONGTYPE").is_some());
        assert!(shared.error_prefix("NOTAKIND").is_none());
    }
}
