//! Linked list of packed-list nodes — "quicklist".
//!
//! Each node is either a [`kvengine_ziplist::Ziplist`] holding up to `fill`
//! small entries, or a standalone "plain" node holding a single entry too
//! large to live in a packed node. Interior nodes more than
//! `compress_depth` hops from either end are LZF-compressed at rest; a read
//! transiently decompresses without disturbing that state, matching the
//! original's `quicklistDecompressNodeForUse`/recompress dance except that
//! here a read never mutates.

mod lzf;

use kvengine_ziplist::{ZlValue, Ziplist};
use std::collections::VecDeque;
use tracing::trace;

/// Entries at or above this size always get their own plain node, mirroring
/// `SIZE_SAFETY_LIMIT` in the original quicklist.
pub const PLAIN_NODE_THRESHOLD: usize = 8192;

fn estimate_len(value: &ZlValue) -> usize {
    match value {
        ZlValue::Int(_) => 8,
        ZlValue::Str(s) => s.len(),
    }
}

fn value_bytes(value: &ZlValue) -> Vec<u8> {
    match value {
        ZlValue::Int(n) => n.to_string().into_bytes(),
        ZlValue::Str(s) => s.clone(),
    }
}

enum NodeBody {
    PackedRaw(Ziplist),
    PackedLzf { blob: Vec<u8>, orig_len: usize, count: usize },
    PlainRaw(Vec<u8>),
    PlainLzf { blob: Vec<u8>, orig_len: usize },
}

struct QuicklistNode {
    id: u64,
    body: NodeBody,
}

impl QuicklistNode {
    fn new_packed(id: u64) -> Self {
        QuicklistNode { id, body: NodeBody::PackedRaw(Ziplist::new()) }
    }

    fn new_plain(id: u64, bytes: Vec<u8>) -> Self {
        QuicklistNode { id, body: NodeBody::PlainRaw(bytes) }
    }

    fn is_plain(&self) -> bool {
        matches!(self.body, NodeBody::PlainRaw(_) | NodeBody::PlainLzf { .. })
    }

    fn is_compressed(&self) -> bool {
        matches!(self.body, NodeBody::PackedLzf { .. } | NodeBody::PlainLzf { .. })
    }

    fn count(&self) -> usize {
        match &self.body {
            NodeBody::PackedRaw(zl) => zl.len(),
            NodeBody::PackedLzf { count, .. } => *count,
            NodeBody::PlainRaw(_) | NodeBody::PlainLzf { .. } => 1,
        }
    }

    fn sz(&self) -> usize {
        match &self.body {
            NodeBody::PackedRaw(zl) => zl.total_bytes(),
            NodeBody::PackedLzf { orig_len, .. } => *orig_len,
            NodeBody::PlainRaw(b) => b.len(),
            NodeBody::PlainLzf { orig_len, .. } => *orig_len,
        }
    }

    /// Returns this node's uncompressed bytes without changing its stored
    /// compression state.
    fn peek_raw_bytes(&self) -> Vec<u8> {
        match &self.body {
            NodeBody::PackedRaw(zl) => zl.as_bytes().to_vec(),
            NodeBody::PackedLzf { blob, orig_len, .. } => lzf::decompress(blob, *orig_len),
            NodeBody::PlainRaw(b) => b.clone(),
            NodeBody::PlainLzf { blob, orig_len } => lzf::decompress(blob, *orig_len),
        }
    }

    fn decompress(&mut self) {
        match &self.body {
            NodeBody::PackedLzf { blob, orig_len, .. } => {
                let bytes = lzf::decompress(blob, *orig_len);
                self.body = NodeBody::PackedRaw(Ziplist::from_blob(bytes));
            }
            NodeBody::PlainLzf { blob, orig_len } => {
                let bytes = lzf::decompress(blob, *orig_len);
                self.body = NodeBody::PlainRaw(bytes);
            }
            _ => {}
        }
    }

    fn compress(&mut self) {
        match &self.body {
            NodeBody::PackedRaw(zl) => {
                let bytes = zl.as_bytes().to_vec();
                if let Some(blob) = lzf::compress(&bytes) {
                    self.body = NodeBody::PackedLzf { blob, orig_len: bytes.len(), count: zl.len() };
                }
            }
            NodeBody::PlainRaw(b) => {
                if let Some(blob) = lzf::compress(b) {
                    self.body = NodeBody::PlainLzf { blob, orig_len: b.len() };
                }
            }
            _ => {}
        }
    }

    fn as_ziplist_mut(&mut self) -> &mut Ziplist {
        self.decompress();
        match &mut self.body {
            NodeBody::PackedRaw(zl) => zl,
            _ => unreachable!("node holding a single oversized entry has no ziplist body"),
        }
    }
}

/// A doubly linked list of packed-list nodes.
pub struct Quicklist {
    nodes: VecDeque<QuicklistNode>,
    fill: usize,
    compress_depth: usize,
    count: usize,
    next_id: u64,
    bookmarks: Vec<(String, u64)>,
}

impl Quicklist {
    pub fn new(fill: usize, compress_depth: usize) -> Self {
        Quicklist { nodes: VecDeque::new(), fill: fill.max(1), compress_depth, count: 0, next_id: 0, bookmarks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_tail_open(&mut self) -> usize {
        let need_new = match self.nodes.back() {
            None => true,
            Some(n) => n.is_plain() || n.count() >= self.fill,
        };
        if need_new {
            let id = self.alloc_id();
            self.nodes.push_back(QuicklistNode::new_packed(id));
        } else if self.nodes.back().unwrap().is_compressed() {
            self.nodes.back_mut().unwrap().decompress();
        }
        self.nodes.len() - 1
    }

    fn ensure_head_open(&mut self) -> usize {
        let need_new = match self.nodes.front() {
            None => true,
            Some(n) => n.is_plain() || n.count() >= self.fill,
        };
        if need_new {
            let id = self.alloc_id();
            self.nodes.push_front(QuicklistNode::new_packed(id));
        } else if self.nodes.front().unwrap().is_compressed() {
            self.nodes.front_mut().unwrap().decompress();
        }
        0
    }

    pub fn push_tail(&mut self, value: impl Into<ZlValue>) {
        let value = value.into();
        if estimate_len(&value) >= PLAIN_NODE_THRESHOLD {
            let id = self.alloc_id();
            self.nodes.push_back(QuicklistNode::new_plain(id, value_bytes(&value)));
        } else {
            let idx = self.ensure_tail_open();
            self.nodes[idx].as_ziplist_mut().push_tail(value);
        }
        self.count += 1;
        self.rebalance_compression();
    }

    pub fn push_head(&mut self, value: impl Into<ZlValue>) {
        let value = value.into();
        if estimate_len(&value) >= PLAIN_NODE_THRESHOLD {
            let id = self.alloc_id();
            self.nodes.push_front(QuicklistNode::new_plain(id, value_bytes(&value)));
        } else {
            let idx = self.ensure_head_open();
            self.nodes[idx].as_ziplist_mut().push_head(value);
        }
        self.count += 1;
        self.rebalance_compression();
    }

    pub fn pop_head(&mut self) -> Option<ZlValue> {
        let front = self.nodes.front_mut()?;
        let value = if front.is_plain() {
            front.decompress();
            let bytes = match &front.body {
                NodeBody::PlainRaw(b) => b.clone(),
                _ => unreachable!(),
            };
            self.nodes.pop_front();
            Some(ZlValue::Str(bytes))
        } else {
            let zl = front.as_ziplist_mut();
            let value = zl.pop_head();
            if zl.is_empty() {
                self.nodes.pop_front();
            }
            value
        };
        if value.is_some() {
            self.count -= 1;
            self.rebalance_compression();
        }
        value
    }

    pub fn pop_tail(&mut self) -> Option<ZlValue> {
        let back = self.nodes.back_mut()?;
        let value = if back.is_plain() {
            back.decompress();
            let bytes = match &back.body {
                NodeBody::PlainRaw(b) => b.clone(),
                _ => unreachable!(),
            };
            self.nodes.pop_back();
            Some(ZlValue::Str(bytes))
        } else {
            let zl = back.as_ziplist_mut();
            let value = zl.pop_tail();
            if zl.is_empty() {
                self.nodes.pop_back();
            }
            value
        };
        if value.is_some() {
            self.count -= 1;
            self.rebalance_compression();
        }
        value
    }

    fn locate(&self, mut index: usize) -> Option<(usize, usize)> {
        if index >= self.count {
            return None;
        }
        for (node_idx, node) in self.nodes.iter().enumerate() {
            let c = node.count();
            if index < c {
                return Some((node_idx, index));
            }
            index -= c;
        }
        None
    }

    pub fn get(&self, index: usize) -> Option<ZlValue> {
        let (node_idx, local) = self.locate(index)?;
        let node = &self.nodes[node_idx];
        if node.is_plain() {
            debug_assert_eq!(local, 0);
            Some(ZlValue::Str(node.peek_raw_bytes()))
        } else {
            let bytes = node.peek_raw_bytes();
            Ziplist::from_blob(bytes).get(local)
        }
    }

    pub fn insert_before(&mut self, index: usize, value: impl Into<ZlValue>) {
        let value = value.into();
        match self.locate(index) {
            None => self.push_tail(value),
            Some((node_idx, local)) => {
                if self.nodes[node_idx].is_plain() {
                    let id = self.alloc_id();
                    let new_node = QuicklistNode::new_plain(id, value_bytes(&value));
                    self.nodes.insert(node_idx, new_node);
                    self.count += 1;
                    self.rebalance_compression();
                    return;
                }
                let full = self.nodes[node_idx].count() >= self.fill;
                if full && local == 0 {
                    // At capacity and landing on the node's own head: open a
                    // fresh node ahead of it rather than growing past fill.
                    let id = self.alloc_id();
                    let mut new_node = QuicklistNode::new_packed(id);
                    new_node.as_ziplist_mut().push_tail(value);
                    self.nodes.insert(node_idx, new_node);
                } else if full {
                    self.split_and_insert(node_idx, local, value);
                } else {
                    self.nodes[node_idx].as_ziplist_mut().insert_before(local, value);
                }
                self.count += 1;
                self.rebalance_compression();
            }
        }
    }

    /// Mid-node insert into a node already at `fill`: splits the node's
    /// ziplist at `local` into two nodes (the new value lands at the head of
    /// the second half), then tries to merge each half with its now-outer
    /// neighbour, mirroring `_quicklistMergeNodes`.
    fn split_and_insert(&mut self, node_idx: usize, local: usize, value: ZlValue) {
        let entries: Vec<ZlValue> = Ziplist::from_blob(self.nodes[node_idx].peek_raw_bytes()).iter().collect();
        let (first, second) = entries.split_at(local);

        let first_id = self.alloc_id();
        let mut first_node = QuicklistNode::new_packed(first_id);
        for v in first {
            first_node.as_ziplist_mut().push_tail(v.clone());
        }

        let second_id = self.alloc_id();
        let mut second_node = QuicklistNode::new_packed(second_id);
        second_node.as_ziplist_mut().push_tail(value);
        for v in second {
            second_node.as_ziplist_mut().push_tail(v.clone());
        }

        trace!(target: "kvengine", node_idx, local, "quicklist node split on full mid-node insert");
        self.nodes[node_idx] = first_node;
        self.nodes.insert(node_idx + 1, second_node);

        if self.try_merge_with_next(node_idx + 1) {
            trace!(target: "kvengine", "quicklist split node merged with right neighbour");
        }
        if node_idx > 0 && self.try_merge_with_next(node_idx - 1) {
            trace!(target: "kvengine", "quicklist split node merged with left neighbour");
        }
    }

    /// Merges node `idx + 1` into node `idx` if neither is a plain node and
    /// their combined entry count still fits under `fill`.
    fn try_merge_with_next(&mut self, idx: usize) -> bool {
        if idx + 1 >= self.nodes.len() {
            return false;
        }
        let eligible = {
            let a = &self.nodes[idx];
            let b = &self.nodes[idx + 1];
            !a.is_plain() && !b.is_plain() && a.count() + b.count() <= self.fill
        };
        if !eligible {
            return false;
        }
        let removed = self.nodes.remove(idx + 1).unwrap();
        let entries: Vec<ZlValue> = Ziplist::from_blob(removed.peek_raw_bytes()).iter().collect();
        let a = self.nodes[idx].as_ziplist_mut();
        for v in entries {
            a.push_tail(v);
        }
        true
    }

    pub fn delete(&mut self, index: usize) -> bool {
        let Some((node_idx, local)) = self.locate(index) else { return false };
        if self.nodes[node_idx].is_plain() {
            self.nodes.remove(node_idx);
        } else {
            let node = &mut self.nodes[node_idx];
            let zl = node.as_ziplist_mut();
            zl.delete_range(local, 1);
            if zl.is_empty() {
                self.nodes.remove(node_idx);
            }
        }
        self.count -= 1;
        self.rebalance_compression();
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = ZlValue> + '_ {
        self.nodes.iter().flat_map(|node| -> Vec<ZlValue> {
            if node.is_plain() {
                vec![ZlValue::Str(node.peek_raw_bytes())]
            } else {
                Ziplist::from_blob(node.peek_raw_bytes()).iter().collect()
            }
        })
    }

    fn rebalance_compression(&mut self) {
        let n = self.nodes.len();
        if self.compress_depth == 0 {
            for node in self.nodes.iter_mut() {
                node.decompress();
            }
            return;
        }
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let near_edge = i < self.compress_depth || i + self.compress_depth >= n;
            if near_edge {
                node.decompress();
            } else {
                node.compress();
            }
        }
        trace!(target: "kvengine", nodes = n, compressed = self.compressed_node_count(), "quicklist rebalanced");
    }

    pub fn bookmark_create(&mut self, name: &str, index: usize) -> bool {
        let Some((node_idx, _)) = self.locate(index) else { return false };
        let id = self.nodes[node_idx].id;
        self.bookmarks.retain(|(n, _)| n != name);
        self.bookmarks.push((name.to_string(), id));
        true
    }

    pub fn bookmark_find(&self, name: &str) -> Option<usize> {
        let id = self.bookmarks.iter().find(|(n, _)| n == name)?.1;
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn bookmark_delete(&mut self, name: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|(n, _)| n != name);
        self.bookmarks.len() != before
    }

    pub fn bookmarks_clear(&mut self) {
        self.bookmarks.clear();
    }

    /// Total uncompressed byte footprint across all nodes, for diagnostics.
    pub fn total_bytes(&self) -> usize {
        self.nodes.iter().map(|n| n.sz()).sum()
    }

    pub fn compressed_node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_compressed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn push_and_get_round_trip_across_nodes() {
        let mut ql = Quicklist::new(4, 0);
        for i in 0..20i64 {
            ql.push_tail(i);
        }
        assert_eq!(ql.len(), 20);
        assert!(ql.node_count() >= 5);
        for i in 0..20i64 {
            assert_eq!(ql.get(i as usize), Some(ZlValue::Int(i)));
        }
    }

    #[test_log::test]
    fn push_head_and_tail_preserve_order() {
        let mut ql = Quicklist::new(3, 0);
        ql.push_tail(ZlValue::Str(b"b".to_vec()));
        ql.push_head(ZlValue::Str(b"a".to_vec()));
        ql.push_tail(ZlValue::Str(b"c".to_vec()));
        let got: Vec<_> = ql.iter().collect();
        assert_eq!(got, vec![ZlValue::Str(b"a".to_vec()), ZlValue::Str(b"b".to_vec()), ZlValue::Str(b"c".to_vec())]);
    }

    #[test_log::test]
    fn pop_head_and_tail_drain_empty_nodes() {
        let mut ql = Quicklist::new(2, 0);
        for i in 0..6i64 {
            ql.push_tail(i);
        }
        assert_eq!(ql.pop_head(), Some(ZlValue::Int(0)));
        assert_eq!(ql.pop_tail(), Some(ZlValue::Int(5)));
        assert_eq!(ql.len(), 4);
        while ql.pop_head().is_some() {}
        assert!(ql.is_empty());
        assert_eq!(ql.node_count(), 0);
    }

    #[test_log::test]
    fn oversized_entry_gets_its_own_plain_node() {
        let mut ql = Quicklist::new(128, 0);
        ql.push_tail(ZlValue::Str(b"small".to_vec()));
        let big = vec![b'x'; PLAIN_NODE_THRESHOLD + 1];
        ql.push_tail(ZlValue::Str(big.clone()));
        ql.push_tail(ZlValue::Str(b"small2".to_vec()));
        assert_eq!(ql.node_count(), 3);
        assert_eq!(ql.get(1), Some(ZlValue::Str(big)));
    }

    #[test_log::test]
    fn interior_nodes_compress_outside_depth() {
        let mut ql = Quicklist::new(2, 1);
        for i in 0..20i64 {
            ql.push_tail(i);
        }
        assert!(ql.compressed_node_count() > 0);
        // reads still see correct values regardless of compression state.
        for i in 0..20i64 {
            assert_eq!(ql.get(i as usize), Some(ZlValue::Int(i)));
        }
    }

    #[test_log::test]
    fn compress_depth_zero_keeps_everything_raw() {
        let mut ql = Quicklist::new(2, 0);
        for i in 0..20i64 {
            ql.push_tail(i);
        }
        assert_eq!(ql.compressed_node_count(), 0);
    }

    #[test_log::test]
    fn bookmarks_track_a_node_through_mutation() {
        let mut ql = Quicklist::new(2, 0);
        for i in 0..10i64 {
            ql.push_tail(i);
        }
        assert!(ql.bookmark_create("mid", 5));
        let node_idx_before = ql.bookmark_find("mid").unwrap();
        ql.push_head(ZlValue::Int(-1));
        let node_idx_after = ql.bookmark_find("mid").unwrap();
        assert_eq!(node_idx_after, node_idx_before + 1);
        assert!(ql.bookmark_delete("mid"));
        assert_eq!(ql.bookmark_find("mid"), None);
    }

    #[test_log::test]
    fn insert_before_and_delete() {
        let mut ql = Quicklist::new(4, 0);
        ql.push_tail(ZlValue::Int(1));
        ql.push_tail(ZlValue::Int(3));
        ql.insert_before(1, ZlValue::Int(2));
        assert_eq!(ql.iter().collect::<Vec<_>>(), vec![ZlValue::Int(1), ZlValue::Int(2), ZlValue::Int(3)]);
        assert!(ql.delete(1));
        assert_eq!(ql.iter().collect::<Vec<_>>(), vec![ZlValue::Int(1), ZlValue::Int(3)]);
    }

    #[test_log::test]
    fn s6_mid_node_full_insert_splits_then_attempts_merge() {
        let fill = 4;
        let mut ql = Quicklist::new(fill, 0);
        let entry = |n: u8| ZlValue::Str(vec![n; 1000]);

        for v in 0u8..4 {
            ql.push_tail(entry(v));
        }
        for v in 10u8..14 {
            ql.push_tail(entry(v));
        }
        for v in 20u8..24 {
            ql.push_tail(entry(v));
        }
        assert_eq!(ql.node_count(), 3, "three full nodes of `fill` entries each");
        let before: Vec<_> = ql.iter().collect();
        assert_eq!(before.len(), 12);

        // Middle node's local offset is cap/2 = 2: this lands on the split case.
        let new_entry = entry(99);
        ql.insert_before(6, new_entry.clone());

        assert_eq!(ql.len(), 13);
        assert_eq!(
            ql.node_count(),
            4,
            "full mid-node insert splits into two nodes rather than growing past fill; \
             unchanged full neighbours on both sides block the post-split merge attempt"
        );

        let mut expected = before;
        expected.insert(6, new_entry);
        assert_eq!(ql.iter().collect::<Vec<_>>(), expected);
    }

    #[test_log::test]
    fn full_mid_node_insert_merges_with_an_undersized_neighbour() {
        let fill = 4;
        let mut ql = Quicklist::new(fill, 0);
        // node0 fills to cap (0..3); node1 trails behind with a single
        // entry, under-full and ripe for the post-split merge.
        for v in 0i64..5 {
            ql.push_tail(ZlValue::Int(v));
        }
        assert_eq!(ql.node_count(), 2);

        ql.insert_before(2, ZlValue::Int(99));

        // node0 splits into [0,1] and [2,3]; the second half's merge
        // attempt absorbs node1's lone entry (2 + 1 <= fill), so only one
        // new node boundary survives.
        assert_eq!(ql.len(), 6);
        assert_eq!(ql.node_count(), 2);
        assert_eq!(
            ql.iter().collect::<Vec<_>>(),
            vec![
                ZlValue::Int(0),
                ZlValue::Int(1),
                ZlValue::Int(99),
                ZlValue::Int(2),
                ZlValue::Int(3),
                ZlValue::Int(4),
            ]
        );
    }
}
