//! Typed mutators/inspectors: the
//! per-type operation sets a command handler needs, each one inspecting
//! `RedisObject::encoding()` and routing to the matching packed or
//! scalable representation, applying the encoding-transition rules
//! in place when a threshold is crossed.

use kvengine_alloc::Allocator;
use kvengine_base::{err_kind, ErrorKind, Result};
use kvengine_dict::Dict;
use kvengine_intset::Intset;
use kvengine_listpack::{InsertWhere, LpValue, Listpack};
use kvengine_quicklist::Quicklist;
use kvengine_skiplist::Skiplist;
use kvengine_stream::{Fields, Stream, StreamId};
use tracing::trace;

use kvengine_base::EngineConfig;

use crate::body::{HashBody, ObjectBody, SetBody, StringBody, ZsetBody};
use crate::header::{ObjType, RedisObject};
use crate::transitions::{
    element_forces_promotion, hash_should_be_ziplist, set_should_be_intset,
    string_should_be_embstr, zset_should_be_ziplist,
};

fn wrong_type<T>(op: &str, ty: ObjType) -> Result<T> {
    Err(err_kind(
        ErrorKind::WrongType,
        format!("{op}: expected matching encoding body, found {ty:?}"),
    ))
}

// ---------------------------------------------------------------- string

pub mod string {
    use super::*;

    /// Equivalent of `tryObjectEncoding`: promote an int-parseable raw/
    /// embstr string to `Int`, else demote a too-long `Embstr` is never
    /// needed (embstr only gets built below the limit), else just trim
    /// a `Raw` string's slack (`trimStringObjectIfNeeded`). Order
    /// matches `redisObject.cpp::tryObjectEncoding`: check int-encodable
    /// first, then embstr, else trim.
    pub fn try_object_encoding(obj: &mut RedisObject, cfg: &EngineConfig) -> Result<()> {
        obj.require_type(ObjType::String)?;
        let ObjectBody::String(body) = obj.body_mut() else {
            return wrong_type("try_object_encoding", obj.type_());
        };
        if matches!(body, StringBody::Int(_)) {
            return Ok(());
        }
        let bytes = body.as_bytes_buf();
        if bytes.len() <= 20 {
            if let Some(n) = kvengine_util::parse_canonical_i64(&bytes) {
                trace!(target: "kvengine", value = n, "string promoted to INT encoding");
                *body = StringBody::Int(n);
                return Ok(());
            }
        }
        if string_should_be_embstr(bytes.len(), cfg) {
            if !matches!(body, StringBody::Embstr(_)) {
                trace!(target: "kvengine", len = bytes.len(), "string promoted to EMBSTR encoding");
                *body = StringBody::Embstr(bytes.into_boxed_slice());
            }
            return Ok(());
        }
        Ok(())
    }

    /// Appends `data`, forcing the body to `Raw` first if it is
    /// currently `Embstr`/`Int` (neither supports in-place growth).
    pub fn append(obj: &mut RedisObject, alloc: &Allocator, data: &[u8]) -> Result<()> {
        obj.require_type(ObjType::String)?;
        let ObjectBody::String(body) = obj.body_mut() else {
            return wrong_type("append", obj.type_());
        };
        if !matches!(body, StringBody::Raw(_)) {
            let existing = body.as_bytes_buf();
            *body = StringBody::Raw(kvengine_sds::Sds::make(alloc, &existing));
        }
        if let StringBody::Raw(sds) = body {
            sds.append(alloc, data);
        }
        Ok(())
    }

    pub fn get_bytes(obj: &RedisObject) -> Result<Vec<u8>> {
        obj.require_type(ObjType::String)?;
        match obj.body() {
            ObjectBody::String(body) => Ok(body.as_bytes_buf()),
            _ => wrong_type("get_bytes", obj.type_()),
        }
    }
}

// ----------------------------------------------------------------- list

pub mod list {
    use super::*;
    use kvengine_ziplist::ZlValue;

    fn body(obj: &RedisObject) -> Result<&Quicklist> {
        match obj.body() {
            ObjectBody::List(q) => Ok(q),
            _ => wrong_type("list op", obj.type_()),
        }
    }

    fn body_mut(obj: &mut RedisObject) -> Result<&mut Quicklist> {
        let ty = obj.type_();
        match obj.body_mut() {
            ObjectBody::List(q) => Ok(q),
            _ => wrong_type("list op", ty),
        }
    }

    /// Resolves a possibly-negative index (`-1` is the last element) against
    /// `len`, the way `LINDEX`/`LRANGE` treat their bounds. Returns `None`
    /// when the index is out of range even after the offset.
    fn resolve_index(idx: i64, len: usize) -> Option<usize> {
        let resolved = if idx < 0 { idx + len as i64 } else { idx };
        if resolved < 0 || resolved as usize >= len {
            None
        } else {
            Some(resolved as usize)
        }
    }

    pub fn push_head(obj: &mut RedisObject, value: &[u8]) -> Result<()> {
        obj.require_type(ObjType::List)?;
        body_mut(obj)?.push_head(value);
        Ok(())
    }

    pub fn push_tail(obj: &mut RedisObject, value: &[u8]) -> Result<()> {
        obj.require_type(ObjType::List)?;
        body_mut(obj)?.push_tail(value);
        Ok(())
    }

    pub fn pop_head(obj: &mut RedisObject) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::List)?;
        Ok(body_mut(obj)?.pop_head().map(lp_value_bytes))
    }

    pub fn pop_tail(obj: &mut RedisObject) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::List)?;
        Ok(body_mut(obj)?.pop_tail().map(lp_value_bytes))
    }

    /// `index` accepts negative indices counting from the tail, matching
    /// `LINDEX`.
    pub fn index(obj: &RedisObject, idx: i64) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::List)?;
        let q = body(obj)?;
        Ok(resolve_index(idx, q.len()).and_then(|i| q.get(i)).map(lp_value_bytes))
    }

    /// Inserts `value` immediately before the element currently at `idx`
    /// (negative indices count from the tail); an `idx` at `len` appends at
    /// the tail.
    pub fn insert_before(obj: &mut RedisObject, idx: i64, value: &[u8]) -> Result<()> {
        obj.require_type(ObjType::List)?;
        let q = body_mut(obj)?;
        let len = q.len();
        let target = if idx >= 0 && idx as usize == len {
            len
        } else {
            match resolve_index(idx, len) {
                Some(i) => i,
                None => return Err(err_kind(ErrorKind::OutOfRange, "list index out of range")),
            }
        };
        q.insert_before(target, value);
        Ok(())
    }

    /// `range` is inclusive of both ends, like `LRANGE`; negative indices
    /// count from the tail and the bounds are clamped into range rather
    /// than erroring.
    pub fn range(obj: &RedisObject, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        obj.require_type(ObjType::List)?;
        let q = body(obj)?;
        let len = q.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        let clamp = |idx: i64| -> i64 {
            let resolved = if idx < 0 { idx + len as i64 } else { idx };
            resolved.clamp(0, len as i64 - 1)
        };
        let (lo, hi) = (clamp(start), clamp(stop));
        if lo > hi {
            return Ok(Vec::new());
        }
        Ok((lo..=hi).filter_map(|i| q.get(i as usize)).map(lp_value_bytes).collect())
    }

    pub fn len(obj: &RedisObject) -> Result<usize> {
        obj.require_type(ObjType::List)?;
        Ok(body(obj)?.len())
    }

    fn lp_value_bytes(v: ZlValue) -> Vec<u8> {
        match v {
            ZlValue::Str(s) => s,
            ZlValue::Int(n) => n.to_string().into_bytes(),
        }
    }
}

// ------------------------------------------------------------------ set

pub mod set {
    use super::*;

    fn rebuild_as_hashtable(is: &Intset) -> Dict<Vec<u8>, ()> {
        let mut dict = Dict::new();
        for v in is.iter() {
            dict.insert_unique(v.to_string().into_bytes(), ());
        }
        dict
    }

    /// Returns `true` if `member` was newly added; adding an existing
    /// member is a no-op, not an error.
    pub fn add(obj: &mut RedisObject, cfg: &EngineConfig, member: &[u8]) -> Result<bool> {
        obj.require_type(ObjType::Set)?;
        let ObjectBody::Set(body) = obj.body_mut() else {
            return wrong_type("add", obj.type_());
        };
        let parsed = kvengine_util::parse_canonical_i64(member);
        match (body, parsed) {
            (SetBody::Intset(is), Some(n)) => {
                let inserted = is.insert(n);
                if inserted && !set_should_be_intset(is.len(), cfg) {
                    trace!(target: "kvengine", entries = is.len(), "set promoted INTSET -> HASHTABLE (cap exceeded)");
                    let mut dict = rebuild_as_hashtable(is);
                    dict.insert_unique(member.to_vec(), ());
                    *obj.body_mut() = ObjectBody::Set(SetBody::Hashtable(dict));
                }
                Ok(inserted)
            }
            (SetBody::Intset(is), None) => {
                trace!(target: "kvengine", "set promoted INTSET -> HASHTABLE (non-integer member)");
                let mut dict = rebuild_as_hashtable(is);
                let inserted = dict.insert_unique(member.to_vec(), ());
                *obj.body_mut() = ObjectBody::Set(SetBody::Hashtable(dict));
                Ok(inserted)
            }
            (SetBody::Hashtable(dict), _) => Ok(dict.insert_unique(member.to_vec(), ())),
        }
    }

    pub fn remove(obj: &mut RedisObject, member: &[u8]) -> Result<bool> {
        obj.require_type(ObjType::Set)?;
        match obj.body_mut() {
            ObjectBody::Set(SetBody::Intset(is)) => match kvengine_util::parse_canonical_i64(member) {
                Some(n) => Ok(is.remove(n)),
                None => Ok(false),
            },
            ObjectBody::Set(SetBody::Hashtable(dict)) => Ok(dict.remove(&member.to_vec()).is_some()),
            _ => wrong_type("remove", obj.type_()),
        }
    }

    pub fn is_member(obj: &RedisObject, member: &[u8]) -> Result<bool> {
        obj.require_type(ObjType::Set)?;
        match obj.body() {
            ObjectBody::Set(SetBody::Intset(is)) => Ok(kvengine_util::parse_canonical_i64(member)
                .map(|n| is.contains(n))
                .unwrap_or(false)),
            ObjectBody::Set(SetBody::Hashtable(dict)) => Ok(dict.contains_key(&member.to_vec())),
            _ => wrong_type("is_member", obj.type_()),
        }
    }

    pub fn cardinality(obj: &RedisObject) -> Result<usize> {
        obj.require_type(ObjType::Set)?;
        match obj.body() {
            ObjectBody::Set(body) => Ok(body.len()),
            _ => wrong_type("cardinality", obj.type_()),
        }
    }

    pub fn random_member(obj: &RedisObject, rng: &mut kvengine_util::Mt64) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::Set)?;
        match obj.body() {
            ObjectBody::Set(SetBody::Intset(is)) => {
                if is.is_empty() {
                    return Ok(None);
                }
                let idx = rng.next_below(is.len() as u64) as usize;
                Ok(is.get(idx).map(|v| v.to_string().into_bytes()))
            }
            ObjectBody::Set(SetBody::Hashtable(dict)) => {
                Ok(dict.random_key(rng).map(|(k, _)| k.clone()))
            }
            _ => wrong_type("random_member", obj.type_()),
        }
    }
}

// ----------------------------------------------------------------- hash

pub mod hash {
    use super::*;

    fn ziplist_find(lp: &Listpack, field: &[u8]) -> Option<usize> {
        let mut idx = 0;
        loop {
            let Some(f) = lp.get(idx) else { return None };
            let matches = match &f {
                LpValue::Str(s) => s.as_slice() == field,
                LpValue::Int(n) => n.to_string().as_bytes() == field,
            };
            if matches {
                return Some(idx);
            }
            idx += 2;
        }
    }

    fn ziplist_max_entry_len(lp: &Listpack) -> usize {
        lp.iter()
            .map(|v| match v {
                LpValue::Str(s) => s.len(),
                LpValue::Int(n) => n.to_string().len(),
            })
            .max()
            .unwrap_or(0)
    }

    fn rebuild_as_hashtable(lp: &Listpack) -> Dict<Vec<u8>, Vec<u8>> {
        let mut dict = Dict::new();
        let mut it = lp.iter();
        while let (Some(f), Some(v)) = (it.next(), it.next()) {
            let field = match f {
                LpValue::Str(s) => s,
                LpValue::Int(n) => n.to_string().into_bytes(),
            };
            let value = match v {
                LpValue::Str(s) => s,
                LpValue::Int(n) => n.to_string().into_bytes(),
            };
            dict.insert(field, value);
        }
        dict
    }

    /// Returns the previous value, if `field` already existed.
    pub fn set(
        obj: &mut RedisObject,
        cfg: &EngineConfig,
        field: &[u8],
        value: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::Hash)?;
        let ObjectBody::Hash(body) = obj.body_mut() else {
            return wrong_type("set", obj.type_());
        };
        match body {
            HashBody::Ziplist(lp) => {
                let forces = element_forces_promotion(field.len(), cfg.hash_max_ziplist_value)
                    || element_forces_promotion(value.len(), cfg.hash_max_ziplist_value);
                let prev = if let Some(idx) = ziplist_find(lp, field) {
                    let prev_val = lp.get(idx + 1).map(|v| match v {
                        LpValue::Str(s) => s,
                        LpValue::Int(n) => n.to_string().into_bytes(),
                    });
                    lp.delete(idx + 1);
                    lp.insert(idx + 1, InsertWhere::Before, value);
                    prev_val
                } else {
                    lp.append(field);
                    lp.append(value);
                    None
                };
                let entries = lp.length() / 2;
                if forces || !hash_should_be_ziplist(entries, ziplist_max_entry_len(lp), cfg) {
                    trace!(target: "kvengine", entries, "hash promoted ZIPLIST -> HASHTABLE");
                    let mut dict = rebuild_as_hashtable(lp);
                    dict.insert(field.to_vec(), value.to_vec());
                    *obj.body_mut() = ObjectBody::Hash(HashBody::Hashtable(dict));
                }
                Ok(prev)
            }
            HashBody::Hashtable(dict) => Ok(dict.insert(field.to_vec(), value.to_vec())),
        }
    }

    pub fn get(obj: &RedisObject, field: &[u8]) -> Result<Option<Vec<u8>>> {
        obj.require_type(ObjType::Hash)?;
        match obj.body() {
            ObjectBody::Hash(HashBody::Ziplist(lp)) => Ok(ziplist_find(lp, field).map(|idx| {
                match lp.get(idx + 1).unwrap() {
                    LpValue::Str(s) => s,
                    LpValue::Int(n) => n.to_string().into_bytes(),
                }
            })),
            ObjectBody::Hash(HashBody::Hashtable(dict)) => Ok(dict.get(&field.to_vec()).cloned()),
            _ => wrong_type("get", obj.type_()),
        }
    }

    /// Deletes `field`, demoting a `Hashtable` back to `Ziplist` if the
    /// result now fits under threshold.
    pub fn delete(obj: &mut RedisObject, cfg: &EngineConfig, field: &[u8]) -> Result<bool> {
        obj.require_type(ObjType::Hash)?;
        let ObjectBody::Hash(body) = obj.body_mut() else {
            return wrong_type("delete", obj.type_());
        };
        let removed = match body {
            HashBody::Ziplist(lp) => match ziplist_find(lp, field) {
                Some(idx) => {
                    lp.delete(idx + 1);
                    lp.delete(idx);
                    true
                }
                None => false,
            },
            HashBody::Hashtable(dict) => dict.remove(&field.to_vec()).is_some(),
        };
        if removed {
            if let HashBody::Hashtable(dict) = body {
                let max_len = dict.iter().map(|(k, v)| k.len().max(v.len())).max().unwrap_or(0);
                if hash_should_be_ziplist(dict.len(), max_len, cfg) {
                    trace!(target: "kvengine", entries = dict.len(), "hash demoted HASHTABLE -> ZIPLIST");
                    let mut lp = Listpack::new();
                    for (k, v) in dict.iter() {
                        lp.append(k.as_slice());
                        lp.append(v.as_slice());
                    }
                    *obj.body_mut() = ObjectBody::Hash(HashBody::Ziplist(lp));
                }
            }
        }
        Ok(removed)
    }

    pub fn len(obj: &RedisObject) -> Result<usize> {
        obj.require_type(ObjType::Hash)?;
        match obj.body() {
            ObjectBody::Hash(body) => Ok(body.len()),
            _ => wrong_type("len", obj.type_()),
        }
    }
}

// ----------------------------------------------------------------- zset

pub mod zset {
    use super::*;

    fn ziplist_pairs(lp: &Listpack) -> Vec<(String, f64)> {
        let mut out = Vec::with_capacity(lp.length() / 2);
        let mut it = lp.iter();
        while let (Some(m), Some(s)) = (it.next(), it.next()) {
            let member = match m {
                LpValue::Str(b) => String::from_utf8_lossy(&b).into_owned(),
                LpValue::Int(n) => n.to_string(),
            };
            let score = match s {
                LpValue::Str(b) => String::from_utf8_lossy(&b).parse().unwrap_or(0.0),
                LpValue::Int(n) => n as f64,
            };
            out.push((member, score));
        }
        out
    }

    fn rebuild_ziplist(pairs: &[(String, f64)]) -> Listpack {
        let mut lp = Listpack::new();
        let mut sorted = pairs.to_vec();
        sorted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        for (member, score) in sorted {
            let score_str = score.to_string();
            lp.append(member.as_bytes());
            lp.append(score_str.as_bytes());
        }
        lp
    }

    fn rebuild_skiplist(pairs: &[(String, f64)]) -> (Skiplist, Dict<String, f64>) {
        let mut sl = Skiplist::new();
        let mut dict = Dict::new();
        for (member, score) in pairs {
            sl.insert(*score, member.clone());
            dict.insert_unique(member.clone(), *score);
        }
        (sl, dict)
    }

    /// Returns the previous score, if `member` already existed.
    pub fn add(
        obj: &mut RedisObject,
        cfg: &EngineConfig,
        member: &str,
        score: f64,
    ) -> Result<Option<f64>> {
        obj.require_type(ObjType::Zset)?;
        let ObjectBody::Zset(body) = obj.body_mut() else {
            return wrong_type("add", obj.type_());
        };
        match body {
            ZsetBody::Ziplist(lp) => {
                let mut pairs = ziplist_pairs(lp);
                let prev = pairs.iter().find(|(m, _)| m == member).map(|(_, s)| *s);
                pairs.retain(|(m, _)| m != member);
                pairs.push((member.to_string(), score));
                let max_len = pairs.iter().map(|(m, _)| m.len()).max().unwrap_or(0);
                let forces = element_forces_promotion(member.len(), cfg.zset_max_ziplist_value);
                if forces || !zset_should_be_ziplist(pairs.len(), max_len, cfg) {
                    trace!(target: "kvengine", entries = pairs.len(), "zset promoted ZIPLIST -> SKIPLIST");
                    let (sl, dict) = rebuild_skiplist(&pairs);
                    *obj.body_mut() = ObjectBody::Zset(ZsetBody::Skiplist { skiplist: sl, dict });
                } else {
                    *lp = rebuild_ziplist(&pairs);
                }
                Ok(prev)
            }
            ZsetBody::Skiplist { skiplist, dict } => {
                let prev = dict.get(&member.to_string()).copied();
                match prev {
                    Some(old_score) => {
                        if !skiplist.update_score(member, old_score, score) {
                            // Non-local reorder already handled by update_score
                            // internally (delete + reinsert); nothing else to do.
                        }
                        dict.insert(member.to_string(), score);
                    }
                    None => {
                        skiplist.insert(score, member.to_string());
                        dict.insert_unique(member.to_string(), score);
                    }
                }
                Ok(prev)
            }
        }
    }

    /// Demotes a `Skiplist` back to `Ziplist` after a removal drops the
    /// zset below threshold.
    pub fn remove(obj: &mut RedisObject, cfg: &EngineConfig, member: &str) -> Result<bool> {
        obj.require_type(ObjType::Zset)?;
        let ObjectBody::Zset(body) = obj.body_mut() else {
            return wrong_type("remove", obj.type_());
        };
        match body {
            ZsetBody::Ziplist(lp) => {
                let mut pairs = ziplist_pairs(lp);
                let before = pairs.len();
                pairs.retain(|(m, _)| m != member);
                let removed = pairs.len() != before;
                if removed {
                    *lp = rebuild_ziplist(&pairs);
                }
                Ok(removed)
            }
            ZsetBody::Skiplist { skiplist, dict } => {
                let removed = match dict.remove(&member.to_string()) {
                    Some(score) => {
                        skiplist.delete(score, member);
                        true
                    }
                    None => false,
                };
                if removed {
                    let max_len = dict.iter().map(|(m, _)| m.len()).max().unwrap_or(0);
                    if zset_should_be_ziplist(dict.len(), max_len, cfg) {
                        trace!(target: "kvengine", entries = dict.len(), "zset demoted SKIPLIST -> ZIPLIST");
                        let pairs: Vec<(String, f64)> =
                            dict.iter().map(|(m, s)| (m.clone(), *s)).collect();
                        *obj.body_mut() = ObjectBody::Zset(ZsetBody::Ziplist(rebuild_ziplist(&pairs)));
                    }
                }
                Ok(removed)
            }
        }
    }

    pub fn rank(obj: &RedisObject, member: &str) -> Result<Option<u64>> {
        obj.require_type(ObjType::Zset)?;
        match obj.body() {
            ObjectBody::Zset(ZsetBody::Ziplist(lp)) => {
                let mut pairs = ziplist_pairs(lp);
                pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
                Ok(pairs.iter().position(|(m, _)| m == member).map(|i| i as u64))
            }
            ObjectBody::Zset(ZsetBody::Skiplist { skiplist, dict }) => {
                Ok(dict.get(&member.to_string()).and_then(|&score| skiplist.rank(score, member)))
            }
            _ => wrong_type("rank", obj.type_()),
        }
    }

    pub fn score(obj: &RedisObject, member: &str) -> Result<Option<f64>> {
        obj.require_type(ObjType::Zset)?;
        match obj.body() {
            ObjectBody::Zset(ZsetBody::Ziplist(lp)) => {
                Ok(ziplist_pairs(lp).into_iter().find(|(m, _)| m == member).map(|(_, s)| s))
            }
            ObjectBody::Zset(ZsetBody::Skiplist { dict, .. }) => Ok(dict.get(&member.to_string()).copied()),
            _ => wrong_type("score", obj.type_()),
        }
    }

    pub fn range_by_score(obj: &RedisObject, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        obj.require_type(ObjType::Zset)?;
        match obj.body() {
            ObjectBody::Zset(ZsetBody::Ziplist(lp)) => {
                let mut pairs = ziplist_pairs(lp);
                pairs.retain(|(_, s)| *s >= min && *s <= max);
                pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
                Ok(pairs)
            }
            ObjectBody::Zset(ZsetBody::Skiplist { skiplist, .. }) => Ok(skiplist
                .iter()
                .filter(|(s, _)| *s >= min && *s <= max)
                .map(|(s, m)| (m.to_string(), s))
                .collect()),
            _ => wrong_type("range_by_score", obj.type_()),
        }
    }

    pub fn range_by_lex(obj: &RedisObject, min: &str, max: &str) -> Result<Vec<(String, f64)>> {
        obj.require_type(ObjType::Zset)?;
        match obj.body() {
            ObjectBody::Zset(ZsetBody::Ziplist(lp)) => {
                let mut pairs = ziplist_pairs(lp);
                pairs.retain(|(m, _)| m.as_str() >= min && m.as_str() <= max);
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(pairs)
            }
            ObjectBody::Zset(ZsetBody::Skiplist { skiplist, .. }) => {
                let mut out: Vec<(String, f64)> = skiplist
                    .iter()
                    .filter(|(_, m)| *m >= min && *m <= max)
                    .map(|(s, m)| (m.to_string(), s))
                    .collect();
                out.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(out)
            }
            _ => wrong_type("range_by_lex", obj.type_()),
        }
    }

    pub fn len(obj: &RedisObject) -> Result<usize> {
        obj.require_type(ObjType::Zset)?;
        match obj.body() {
            ObjectBody::Zset(body) => Ok(body.len()),
            _ => wrong_type("len", obj.type_()),
        }
    }
}

// ---------------------------------------------------------------- stream

pub mod stream {
    use super::*;

    fn body(obj: &RedisObject) -> Result<&Stream> {
        match obj.body() {
            ObjectBody::Stream(s) => Ok(s),
            _ => wrong_type("stream op", obj.type_()),
        }
    }

    fn body_mut(obj: &mut RedisObject) -> Result<&mut Stream> {
        let ty = obj.type_();
        match obj.body_mut() {
            ObjectBody::Stream(s) => Ok(s),
            _ => wrong_type("stream op", ty),
        }
    }

    /// `id == StreamId::MAX` requests auto-sequencing off `last_id`,
    /// matching `XADD`'s `*` id form.
    pub fn append(obj: &mut RedisObject, id: Option<StreamId>, fields: Fields) -> Result<StreamId> {
        obj.require_type(ObjType::Stream)?;
        let s = body_mut(obj)?;
        match id {
            Some(id) => s.append_with_id(id, fields),
            None => Ok(s.append_auto(fields)),
        }
    }

    pub fn range(obj: &RedisObject, start: StreamId, end: StreamId) -> Result<Vec<(StreamId, Fields)>> {
        obj.require_type(ObjType::Stream)?;
        Ok(body(obj)?.range(start, end))
    }

    pub fn delete(obj: &mut RedisObject, id: StreamId) -> Result<bool> {
        obj.require_type(ObjType::Stream)?;
        Ok(body_mut(obj)?.delete(id))
    }

    /// Trims by whichever bound the caller supplies; `XTRIM` callers
    /// pick one of `MINID`/`MAXLEN`, never both at once.
    pub fn trim_by_min_id(obj: &mut RedisObject, min_id: StreamId) -> Result<usize> {
        obj.require_type(ObjType::Stream)?;
        Ok(body_mut(obj)?.trim_by_min_id(min_id))
    }

    pub fn trim_to_max_len(obj: &mut RedisObject, max_len: usize) -> Result<usize> {
        obj.require_type(ObjType::Stream)?;
        Ok(body_mut(obj)?.trim_to_max_len(max_len))
    }

    pub fn len(obj: &RedisObject) -> Result<usize> {
        obj.require_type(ObjType::Stream)?;
        Ok(body(obj)?.len())
    }

    pub fn create_group(obj: &mut RedisObject, name: &[u8], last_delivered_id: StreamId) -> Result<bool> {
        obj.require_type(ObjType::Stream)?;
        Ok(body_mut(obj)?.create_group(name, last_delivered_id))
    }

    pub fn destroy_group(obj: &mut RedisObject, name: &[u8]) -> Result<bool> {
        obj.require_type(ObjType::Stream)?;
        Ok(body_mut(obj)?.destroy_group(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_string_append_converts_embstr_to_raw_then_promotes() {
        let alloc = Allocator::new();
        let cfg = EngineConfig::default();
        let mut obj = RedisObject::new(
            ObjType::String,
            ObjectBody::String(StringBody::Embstr(b"12".to_vec().into_boxed_slice())),
        );
        string::append(&mut obj, &alloc, b"34").unwrap();
        assert_eq!(string::get_bytes(&obj).unwrap(), b"1234");
        string::try_object_encoding(&mut obj, &cfg).unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Int);
    }

    #[test]
    fn test_list_push_pop_index_and_range() {
        let cfg = EngineConfig::default();
        let mut obj = RedisObject::make_list(&cfg);
        list::push_tail(&mut obj, b"b").unwrap();
        list::push_head(&mut obj, b"a").unwrap();
        list::push_tail(&mut obj, b"c").unwrap();
        assert_eq!(list::len(&obj).unwrap(), 3);
        assert_eq!(list::index(&obj, 0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(list::index(&obj, -1).unwrap(), Some(b"c".to_vec()));
        assert_eq!(list::index(&obj, 99).unwrap(), None);

        list::insert_before(&mut obj, 1, b"a.5").unwrap();
        assert_eq!(
            list::range(&obj, 0, -1).unwrap(),
            vec![b"a".to_vec(), b"a.5".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );

        assert_eq!(list::pop_head(&mut obj).unwrap(), Some(b"a".to_vec()));
        assert_eq!(list::pop_tail(&mut obj).unwrap(), Some(b"c".to_vec()));
        assert_eq!(list::range(&obj, 0, -1).unwrap(), vec![b"a.5".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_list_wrong_type_surfaces() {
        let mut obj = RedisObject::make_set();
        let e = list::push_tail(&mut obj, b"x").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::WrongType);
    }

    #[test]
    fn test_set_promotes_intset_to_hashtable_on_non_integer() {
        let cfg = EngineConfig::default();
        let mut obj = RedisObject::make_set();
        assert!(set::add(&mut obj, &cfg, b"1").unwrap());
        assert!(set::add(&mut obj, &cfg, b"2").unwrap());
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Intset);
        assert!(set::add(&mut obj, &cfg, b"not-a-number").unwrap());
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Hashtable);
        assert!(set::is_member(&obj, b"1").unwrap());
        assert!(set::is_member(&obj, b"not-a-number").unwrap());
    }

    #[test]
    fn test_set_promotes_intset_to_hashtable_on_cap_exceeded() {
        let mut cfg = EngineConfig::default();
        cfg.set_max_intset_entries = 4;
        let mut obj = RedisObject::make_set();
        for i in 0..4 {
            set::add(&mut obj, &cfg, i.to_string().as_bytes()).unwrap();
        }
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Intset);
        set::add(&mut obj, &cfg, b"4").unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Hashtable);
        assert_eq!(set::cardinality(&obj).unwrap(), 5);
    }

    #[test]
    fn test_hash_promotes_then_demotes() {
        let mut cfg = EngineConfig::default();
        cfg.hash_max_ziplist_entries = 2;
        let mut obj = RedisObject::make_hash();
        hash::set(&mut obj, &cfg, b"f1", b"v1").unwrap();
        hash::set(&mut obj, &cfg, b"f2", b"v2").unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Ziplist);
        hash::set(&mut obj, &cfg, b"f3", b"v3").unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Hashtable);
        assert_eq!(hash::get(&obj, b"f2").unwrap(), Some(b"v2".to_vec()));

        hash::delete(&mut obj, &cfg, b"f1").unwrap();
        hash::delete(&mut obj, &cfg, b"f3").unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Ziplist);
        assert_eq!(hash::get(&obj, b"f2").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_zset_promotes_then_demotes_and_ranks() {
        let mut cfg = EngineConfig::default();
        cfg.zset_max_ziplist_entries = 2;
        let mut obj = RedisObject::make_zset();
        zset::add(&mut obj, &cfg, "a", 1.0).unwrap();
        zset::add(&mut obj, &cfg, "b", 2.0).unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Ziplist);
        zset::add(&mut obj, &cfg, "c", 0.5).unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Skiplist);
        assert_eq!(zset::rank(&obj, "c").unwrap(), Some(0));
        assert_eq!(zset::rank(&obj, "a").unwrap(), Some(1));
        assert_eq!(zset::rank(&obj, "b").unwrap(), Some(2));

        zset::remove(&mut obj, &cfg, "a").unwrap();
        zset::remove(&mut obj, &cfg, "c").unwrap();
        assert_eq!(obj.encoding(), crate::transitions::Encoding::Ziplist);
        assert_eq!(zset::score(&obj, "b").unwrap(), Some(2.0));
    }

    #[test]
    fn test_zset_range_by_score_and_lex() {
        let cfg = EngineConfig::default();
        let mut obj = RedisObject::make_zset();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            zset::add(&mut obj, &cfg, m, s).unwrap();
        }
        let r = zset::range_by_score(&obj, 1.5, 3.0).unwrap();
        assert_eq!(r, vec![("b".to_string(), 2.0), ("c".to_string(), 3.0)]);
        let r = zset::range_by_lex(&obj, "a", "b").unwrap();
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_stream_append_range_trim_and_groups() {
        let mut obj = RedisObject::make_stream();
        let f = |k: &[u8], v: &[u8]| vec![(k.to_vec(), v.to_vec())];
        let id1 = stream::append(&mut obj, None, f(b"temp", b"10")).unwrap();
        let id2 = stream::append(&mut obj, None, f(b"temp", b"11")).unwrap();
        let id3 = stream::append(&mut obj, None, f(b"temp", b"12")).unwrap();
        assert_eq!(stream::len(&obj).unwrap(), 3);

        let entries = stream::range(&obj, id1, id3).unwrap();
        assert_eq!(entries.len(), 3);

        assert!(stream::create_group(&mut obj, b"grp", id2).unwrap());
        assert!(!stream::create_group(&mut obj, b"grp", id2).unwrap());
        assert!(stream::destroy_group(&mut obj, b"grp").unwrap());

        let trimmed = stream::trim_by_min_id(&mut obj, id2).unwrap();
        assert_eq!(trimmed, 1);
        assert_eq!(stream::len(&obj).unwrap(), 2);

        assert!(stream::delete(&mut obj, id2).unwrap());
        assert_eq!(stream::len(&obj).unwrap(), 1);
    }
}
