//! Stream substrate: a radix tree keyed by 128-bit
//! `(ms, seq)` stream IDs, each leaf a listpack of entries sharing a
//! master entry's field names. Consumer-group bookkeeping is represented
//! structurally (pending-entries and consumers as their own radix trees)
//! with no command semantics, matching the `streamCG` shape.
//!
//! Every entry's field/value pairs are stored explicitly in its listpack
//! run rather than reconstructed by walking back to the master's field
//! list byte-for-byte: persistence is out of scope here, so nothing
//! downstream needs the compacted on-disk shape, only the grouping
//! behavior it produces. The master's own field names are still tracked
//! per group (`ListpackGroup::master_fields`) and an entry marks itself
//! `same_fields` against them, which is what the append/compaction
//! decision actually hinges on.

use kvengine_base::{err_kind, Error, ErrorKind, Result};
use kvengine_listpack::{LpValue, Listpack};
use kvengine_rax::Rax;
use tracing::trace;

/// Entries accumulate in one listpack group until it holds this many
/// before starting a fresh group at a new radix key.
pub const MAX_ENTRIES_PER_GROUP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId { ms: u64::MAX, seq: u64::MAX };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamId { ms, seq }
    }

    /// Big-endian 16-byte encoding; lexicographic order over this equals
    /// numeric `(ms, seq)` order, which is what makes it usable directly
    /// as a radix-tree key.
    pub fn encode(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.ms.to_be_bytes());
        out[8..].copy_from_slice(&self.seq.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> StreamId {
        let ms = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        let seq = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        StreamId { ms, seq }
    }

    fn next(self) -> Option<StreamId> {
        if self.seq < u64::MAX {
            Some(StreamId { ms: self.ms, seq: self.seq + 1 })
        } else if self.ms < u64::MAX {
            Some(StreamId { ms: self.ms + 1, seq: 0 })
        } else {
            None
        }
    }
}

pub type Fields = Vec<(Vec<u8>, Vec<u8>)>;

struct ListpackGroup {
    master_id: StreamId,
    master_fields: Vec<Vec<u8>>,
    listpack: Listpack,
    count: usize,
}

impl ListpackGroup {
    fn new(master_id: StreamId, fields: &Fields) -> Self {
        let master_fields: Vec<Vec<u8>> = fields.iter().map(|(k, _)| k.clone()).collect();
        let mut group = ListpackGroup { master_id, master_fields, listpack: Listpack::new(), count: 0 };
        group.push_entry(master_id, fields, false);
        group
    }

    fn push_entry(&mut self, id: StreamId, fields: &Fields, deleted: bool) {
        let same_fields = fields.len() == self.master_fields.len()
            && fields.iter().zip(self.master_fields.iter()).all(|((k, _), mk)| k == mk);
        self.listpack.append(LpValue::Int(if same_fields { 1 } else { 0 }));
        self.listpack.append(LpValue::Int((id.ms - self.master_id.ms) as i64));
        self.listpack.append(LpValue::Int((id.seq.wrapping_sub(self.master_id.seq)) as i64));
        self.listpack.append(LpValue::Int(fields.len() as i64));
        if same_fields {
            for (_, v) in fields {
                self.listpack.append(LpValue::Str(v.clone()));
            }
        } else {
            for (k, v) in fields {
                self.listpack.append(LpValue::Str(k.clone()));
                self.listpack.append(LpValue::Str(v.clone()));
            }
        }
        self.listpack.append(LpValue::Int(deleted as i64));
        self.count += 1;
    }

    /// Decodes every entry back into `(id, fields, deleted)`, in listpack order.
    fn decode_all(&self) -> Vec<(StreamId, Fields, bool)> {
        let mut out = Vec::with_capacity(self.count);
        let mut it = self.listpack.iter();
        while let Some(same_fields_v) = it.next() {
            let same_fields = matches!(same_fields_v, LpValue::Int(1));
            let ms_delta = lp_as_i64(it.next().unwrap());
            let seq_delta = lp_as_i64(it.next().unwrap());
            let num_fields = lp_as_i64(it.next().unwrap()) as usize;
            let mut fields = Vec::with_capacity(num_fields);
            if same_fields {
                for name in self.master_fields.iter().take(num_fields) {
                    let v = lp_as_bytes(it.next().unwrap());
                    fields.push((name.clone(), v));
                }
            } else {
                for _ in 0..num_fields {
                    let k = lp_as_bytes(it.next().unwrap());
                    let v = lp_as_bytes(it.next().unwrap());
                    fields.push((k, v));
                }
            }
            let deleted = matches!(it.next().unwrap(), LpValue::Int(1));
            let id = StreamId { ms: (self.master_id.ms as i64 + ms_delta) as u64, seq: self.master_id.seq.wrapping_add(seq_delta as u64) };
            out.push((id, fields, deleted));
        }
        out
    }
}

fn lp_as_i64(v: LpValue) -> i64 {
    match v {
        LpValue::Int(n) => n,
        LpValue::Str(_) => panic!("stream listpack layout corrupted: expected integer field"),
    }
}

fn lp_as_bytes(v: LpValue) -> Vec<u8> {
    match v {
        LpValue::Str(s) => s,
        LpValue::Int(n) => n.to_string().into_bytes(),
    }
}

/// A pending-entries-list record: which consumer currently owns a
/// delivered-but-unacknowledged entry, and when it was last delivered.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub consumer: Vec<u8>,
    pub delivery_time_ms: u64,
    pub delivery_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Consumer {
    pub seen_time_ms: u64,
}

/// A consumer group's storage: structural only, no XREADGROUP/XACK
/// behavior — just the two radix trees a full implementation would hang
/// that behavior off of.
pub struct ConsumerGroup {
    pub last_delivered_id: StreamId,
    pending: Rax<PendingEntry>,
    consumers: Rax<Consumer>,
}

impl ConsumerGroup {
    pub fn new(last_delivered_id: StreamId) -> Self {
        ConsumerGroup { last_delivered_id, pending: Rax::new(), consumers: Rax::new() }
    }

    pub fn record_pending(&mut self, id: StreamId, entry: PendingEntry) {
        self.pending.insert(&id.encode(), entry);
    }

    pub fn ack(&mut self, id: StreamId) -> bool {
        self.pending.remove(&id.encode()).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn touch_consumer(&mut self, name: &[u8], seen_time_ms: u64) {
        self.consumers.insert(name, Consumer { seen_time_ms });
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

/// The stream value itself: an append-only log indexed by `StreamId`,
/// plus its named consumer groups.
pub struct Stream {
    entries: Rax<ListpackGroup>,
    last_id: StreamId,
    max_deleted_id: StreamId,
    entries_added: u64,
    length: usize,
    groups: Vec<(Vec<u8>, ConsumerGroup)>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    pub fn new() -> Self {
        Stream {
            entries: Rax::new(),
            last_id: StreamId::MIN,
            max_deleted_id: StreamId::MIN,
            entries_added: 0,
            length: 0,
            groups: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Appends with an explicit ID, which must exceed every existing ID.
    pub fn append_with_id(&mut self, id: StreamId, fields: Fields) -> Result<StreamId> {
        if !self.is_empty_stream() && id <= self.last_id {
            return Err(err_kind(ErrorKind::OutOfRange, "stream ID must be greater than the current maximum"));
        }
        self.append_checked(id, fields);
        Ok(id)
    }

    /// Appends using the next logical ID after the current maximum — same
    /// millisecond field, incremented sequence. The engine has no wall
    /// clock dependency, keeping this deterministic: unlike the classic
    /// `mstime()`-seeded auto-ID this never advances `ms` on its own;
    /// callers wanting wall-clock IDs pass one explicitly via
    /// `append_with_id`.
    pub fn append_auto(&mut self, fields: Fields) -> StreamId {
        let id = if self.entries_added == 0 && self.last_id == StreamId::MIN {
            StreamId::MIN
        } else {
            self.last_id.next().expect("stream ID space exhausted")
        };
        self.append_checked(id, fields);
        id
    }

    fn is_empty_stream(&self) -> bool {
        self.entries_added == 0
    }

    fn append_checked(&mut self, id: StreamId, fields: Fields) {
        let can_extend = matches!(self.last_group_mut(), Some(group) if group.count < MAX_ENTRIES_PER_GROUP);
        if can_extend {
            let group = self.last_group_mut().unwrap();
            group.push_entry(id, &fields, false);
        } else {
            let group = ListpackGroup::new(id, &fields);
            self.entries.insert(&id.encode(), group);
        }
        self.last_id = id;
        self.entries_added += 1;
        self.length += 1;
        trace!(target: "kvengine", ms = id.ms, seq = id.seq, "stream entry appended");
    }

    fn last_group_mut(&mut self) -> Option<&mut ListpackGroup> {
        let last_key = self.entries.iter().last().map(|(k, _)| k)?;
        self.entries.get_mut(&last_key).and_then(kvengine_rax::RaxValue::as_mut)
    }

    /// Range query over `[start, end]` inclusive, in ID order.
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<(StreamId, Fields)> {
        let mut out = Vec::new();
        for (_, group) in self.entries.iter() {
            for (id, fields, deleted) in group.decode_all() {
                if !deleted && id >= start && id <= end {
                    out.push((id, fields));
                }
            }
        }
        out
    }

    pub fn delete(&mut self, id: StreamId) -> bool {
        let Some(key) = self.find_group_key_for(id) else { return false };
        let Some(group) = self.entries.get_mut(&key) else { return false };
        let mut entries = group.decode_all();
        let mut found = false;
        for (entry_id, _, deleted) in entries.iter_mut() {
            if *entry_id == id && !*deleted {
                *deleted = true;
                found = true;
                break;
            }
        }
        if !found {
            return false;
        }
        *group = rebuild_group(group.master_id, &entries);
        self.length -= 1;
        if id > self.max_deleted_id {
            self.max_deleted_id = id;
        }
        true
    }

    fn find_group_key_for(&self, id: StreamId) -> Option<Vec<u8>> {
        let mut best: Option<Vec<u8>> = None;
        for (key, _) in self.entries.iter() {
            if StreamId::decode(&key) <= id {
                best = Some(key);
            } else {
                break;
            }
        }
        best
    }

    /// Removes whole groups entirely below `min_id`, then trims the oldest
    /// surviving group entry-by-entry.
    pub fn trim_by_min_id(&mut self, min_id: StreamId) -> usize {
        let mut removed = 0usize;
        loop {
            let Some((key, _)) = self.entries.iter().next() else { break };
            let group = self.entries.get(&key).unwrap();
            let entries = group.decode_all();
            let max_in_group = entries.iter().map(|(id, ..)| *id).max().unwrap_or(group.master_id);
            if max_in_group < min_id {
                self.entries.remove(&key);
                removed += entries.iter().filter(|(_, _, d)| !d).count();
                self.length -= entries.iter().filter(|(_, _, d)| !d).count();
                continue;
            }
            let kept: Vec<_> = entries.iter().cloned().filter(|(id, _, deleted)| *deleted || *id >= min_id).collect();
            let dropped = entries.len() - kept.len();
            if dropped > 0 {
                if kept.is_empty() {
                    self.entries.remove(&key);
                } else {
                    let new_master = kept[0].0;
                    let rebuilt = rebuild_group(new_master, &kept);
                    self.entries.remove(&key);
                    self.entries.insert(&new_master.encode(), rebuilt);
                }
                removed += dropped;
                self.length -= dropped;
            }
            break;
        }
        removed
    }

    pub fn trim_to_max_len(&mut self, max_len: usize) -> usize {
        let mut removed = 0usize;
        while self.length > max_len {
            let Some((key, _)) = self.entries.iter().next() else { break };
            let group = self.entries.get(&key).unwrap();
            let mut entries = group.decode_all();
            if entries.is_empty() {
                self.entries.remove(&key);
                continue;
            }
            entries.remove(0);
            removed += 1;
            self.length -= 1;
            if entries.is_empty() {
                self.entries.remove(&key);
            } else {
                let new_master = entries[0].0;
                let rebuilt = rebuild_group(new_master, &entries);
                self.entries.remove(&key);
                self.entries.insert(&new_master.encode(), rebuilt);
            }
        }
        removed
    }

    pub fn create_group(&mut self, name: &[u8], last_delivered_id: StreamId) -> bool {
        if self.groups.iter().any(|(n, _)| n == name) {
            return false;
        }
        self.groups.push((name.to_vec(), ConsumerGroup::new(last_delivered_id)));
        true
    }

    pub fn group_mut(&mut self, name: &[u8]) -> Option<&mut ConsumerGroup> {
        self.groups.iter_mut().find(|(n, _)| n == name).map(|(_, g)| g)
    }

    pub fn destroy_group(&mut self, name: &[u8]) -> bool {
        let before = self.groups.len();
        self.groups.retain(|(n, _)| n != name);
        self.groups.len() != before
    }
}

fn rebuild_group(master_id: StreamId, entries: &[(StreamId, Fields, bool)]) -> ListpackGroup {
    let (_, master_fields, master_deleted) = &entries[0];
    let mut group = ListpackGroup::new(master_id, master_fields);
    group.listpack = Listpack::new();
    group.count = 0;
    for (id, fields, deleted) in entries {
        group.push_entry(*id, fields, *deleted);
    }
    let _ = master_deleted;
    group
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(pairs: &[(&str, &str)]) -> Fields {
        pairs.iter().map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec())).collect()
    }

    #[test_log::test]
    fn stream_id_encoding_preserves_order() {
        let a = StreamId::new(1, 5);
        let b = StreamId::new(1, 6);
        let c = StreamId::new(2, 0);
        assert!(a.encode() < b.encode());
        assert!(b.encode() < c.encode());
        assert_eq!(StreamId::decode(&a.encode()), a);
    }

    #[test_log::test]
    fn append_auto_increases_monotonically() {
        let mut s = Stream::new();
        let id1 = s.append_auto(f(&[("a", "1")]));
        let id2 = s.append_auto(f(&[("a", "2")]));
        assert!(id2 > id1);
        assert_eq!(s.len(), 2);
    }

    #[test_log::test]
    fn append_with_explicit_id_rejects_non_increasing() {
        let mut s = Stream::new();
        s.append_with_id(StreamId::new(5, 0), f(&[("a", "1")])).unwrap();
        assert!(s.append_with_id(StreamId::new(5, 0), f(&[("a", "2")])).is_err());
        assert!(s.append_with_id(StreamId::new(4, 9), f(&[("a", "2")])).is_err());
        assert!(s.append_with_id(StreamId::new(5, 1), f(&[("a", "2")])).is_ok());
    }

    #[test_log::test]
    fn range_returns_fields_in_id_order() {
        let mut s = Stream::new();
        let id1 = s.append_with_id(StreamId::new(1, 0), f(&[("a", "1")])).unwrap();
        let id2 = s.append_with_id(StreamId::new(1, 1), f(&[("a", "2")])).unwrap();
        let id3 = s.append_with_id(StreamId::new(2, 0), f(&[("a", "3")])).unwrap();
        let got = s.range(StreamId::MIN, StreamId::MAX);
        assert_eq!(got.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![id1, id2, id3]);
    }

    #[test_log::test]
    fn delete_marks_entry_and_shrinks_length() {
        let mut s = Stream::new();
        let id1 = s.append_with_id(StreamId::new(1, 0), f(&[("a", "1")])).unwrap();
        s.append_with_id(StreamId::new(1, 1), f(&[("a", "2")])).unwrap();
        assert!(s.delete(id1));
        assert_eq!(s.len(), 1);
        let got = s.range(StreamId::MIN, StreamId::MAX);
        assert_eq!(got.len(), 1);
    }

    #[test_log::test]
    fn trim_to_max_len_keeps_newest_entries() {
        let mut s = Stream::new();
        for i in 0..10u64 {
            s.append_with_id(StreamId::new(i, 0), f(&[("a", "1")])).unwrap();
        }
        let removed = s.trim_to_max_len(3);
        assert_eq!(removed, 7);
        assert_eq!(s.len(), 3);
        let got = s.range(StreamId::MIN, StreamId::MAX);
        assert_eq!(got.iter().map(|(id, _)| id.ms).collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test_log::test]
    fn consumer_group_tracks_pending_without_command_semantics() {
        let mut s = Stream::new();
        let id = s.append_with_id(StreamId::new(1, 0), f(&[("a", "1")])).unwrap();
        assert!(s.create_group(b"g1", StreamId::MIN));
        assert!(!s.create_group(b"g1", StreamId::MIN));
        let group = s.group_mut(b"g1").unwrap();
        group.record_pending(id, PendingEntry { consumer: b"c1".to_vec(), delivery_time_ms: 1000, delivery_count: 1 });
        assert_eq!(group.pending_len(), 1);
        assert!(group.ack(id));
        assert_eq!(group.pending_len(), 0);
        assert!(s.destroy_group(b"g1"));
    }

    #[test_log::test]
    fn entries_with_same_fields_as_master_round_trip() {
        let mut s = Stream::new();
        s.append_with_id(StreamId::new(1, 0), f(&[("x", "1"), ("y", "2")])).unwrap();
        s.append_with_id(StreamId::new(1, 1), f(&[("x", "3"), ("y", "4")])).unwrap();
        s.append_with_id(StreamId::new(1, 2), f(&[("z", "5")])).unwrap();
        let got = s.range(StreamId::MIN, StreamId::MAX);
        assert_eq!(got[0].1, f(&[("x", "1"), ("y", "2")]));
        assert_eq!(got[1].1, f(&[("x", "3"), ("y", "4")]));
        assert_eq!(got[2].1, f(&[("z", "5")]));
    }
}
