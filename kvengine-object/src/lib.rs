//! Polymorphic value header and shared-object
//! registry: the envelope that binds `type` × `encoding` ×
//! refcount × LRU/LFU bits to one of the packed or scalable
//! representations built by the other `kvengine-*` crates, plus the
//! encoding-transition rules that promote a value from its compact form
//! to its scalable form when thresholds are crossed.
//!
//! Mirrors the classic `redisObject` layout (the `OBJ_ENCODING_*` table,
//! `tryObjectEncoding`, `trimStringObjectIfNeeded`, shared-object pool)
//! and the skiplist+dict pairing `zset` uses for its scalable encoding.

mod body;
mod header;
mod lru;
pub mod ops;
mod shared;
mod sizeof;
mod transitions;

pub use body::{HashBody, ObjectBody, SetBody, StringBody, ZsetBody};
pub use header::{ObjType, RedisObject, Refcount};
pub use lru::LruField;
pub use shared::SharedObjects;
pub use sizeof::{estimate_size, DEFAULT_SAMPLES};
pub use transitions::Encoding;
