//! Packed list, cascade-update variant — "ziplist".
//!
//! A single contiguous byte blob:
//! `[total_bytes: u32][tail_offset: u32][count: u16] [entry]* [0xFF]`
//! where each entry is `[prev_len][encoding+len][data]`. `prev_len` records
//! the *total* byte size of the preceding entry (including that entry's own
//! `prev_len` field, the classic `zipRawEntryLength` convention), which is
//! what makes the cascade-update protocol necessary:
//! widening one entry's `prev_len` field grows that entry's own raw size,
//! which can in turn force its successor's `prev_len` field to widen.
//!
//! Entry tag byte (our own scheme; this format isn't required to be wire
//! compatible with anything since persistence is out of scope here):
//! - `0b00llllll` (0x00-0x3F): string, 6-bit length, 1-byte header.
//! - `0b01llllll llllllll` (0x40-0x7F + 1 byte): string, 14-bit length.
//! - `0x80` + 4 BE bytes: string, 32-bit length.
//! - `0xC0..=0xC4`: integer, width 1/2/3/4/8 bytes respectively.
//! - `0xD0..=0xDC`: 4-bit immediate integer, values 0..=12, no data.
//! - `0xFF`: list terminator (only valid as the very last blob byte).

use kvengine_util::{read_le_int, smallest_width_for_i64, write_le_int};

const HEADER_LEN: usize = 4 + 4 + 2;
const END_BYTE: u8 = 0xFF;
const COUNT_UNKNOWN: u16 = u16::MAX;
const CASCADE_WIDTH_BOUNDARY: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZlValue {
    Int(i64),
    Str(Vec<u8>),
}

impl ZlValue {
    pub fn as_bytes_display(&self) -> Vec<u8> {
        match self {
            ZlValue::Int(n) => n.to_string().into_bytes(),
            ZlValue::Str(s) => s.clone(),
        }
    }
}

impl From<&[u8]> for ZlValue {
    /// Auto-encoding: canonical base-10 integers become
    /// `Int`, everything else is stored as a string.
    fn from(bytes: &[u8]) -> Self {
        match kvengine_util::parse_canonical_i64(bytes) {
            Some(n) => ZlValue::Int(n),
            None => ZlValue::Str(bytes.to_vec()),
        }
    }
}

impl From<i64> for ZlValue {
    fn from(n: i64) -> Self {
        ZlValue::Int(n)
    }
}

fn prev_len_width_for(value: usize) -> usize {
    if value < CASCADE_WIDTH_BOUNDARY {
        1
    } else {
        5
    }
}

fn encode_prev_len_bytes(value: usize, width: usize) -> Vec<u8> {
    if width == 1 {
        vec![value as u8]
    } else {
        let mut out = Vec::with_capacity(5);
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    }
}

fn decode_prev_len(data: &[u8]) -> (usize, usize) {
    if data[0] == 0xFE {
        (u32::from_le_bytes(data[1..5].try_into().unwrap()) as usize, 5)
    } else {
        (data[0] as usize, 1)
    }
}

fn encode_content(v: &ZlValue) -> Vec<u8> {
    match v {
        ZlValue::Int(n) => {
            if (0..=12).contains(n) {
                vec![0xD0 + *n as u8]
            } else {
                let w = smallest_width_for_i64(*n);
                let tag = match w {
                    1 => 0xC0,
                    2 => 0xC1,
                    3 => 0xC2,
                    4 => 0xC3,
                    8 => 0xC4,
                    _ => unreachable!(),
                };
                let mut out = vec![tag];
                write_le_int(*n, w, &mut out);
                out
            }
        }
        ZlValue::Str(s) => {
            let len = s.len();
            if len <= 0x3F {
                let mut out = vec![len as u8];
                out.extend_from_slice(s);
                out
            } else if len <= 0x3FFF {
                let mut out = vec![0x40 | ((len >> 8) as u8), (len & 0xFF) as u8];
                out.extend_from_slice(s);
                out
            } else {
                let mut out = Vec::with_capacity(5 + len);
                out.push(0x80);
                out.extend_from_slice(&(len as u32).to_be_bytes());
                out.extend_from_slice(s);
                out
            }
        }
    }
}

/// Decode the content (encoding+len+data) at `data[0..]`, returning the
/// value and the number of bytes consumed.
fn decode_content(data: &[u8]) -> (ZlValue, usize) {
    let tag = data[0];
    match tag {
        0xD0..=0xDC => (ZlValue::Int((tag - 0xD0) as i64), 1),
        0xC0 => (ZlValue::Int(read_le_int(&data[1..2], 1)), 2),
        0xC1 => (ZlValue::Int(read_le_int(&data[1..3], 2)), 3),
        0xC2 => (ZlValue::Int(read_le_int(&data[1..4], 3)), 4),
        0xC3 => (ZlValue::Int(read_le_int(&data[1..5], 4)), 5),
        0xC4 => (ZlValue::Int(read_le_int(&data[1..9], 8)), 9),
        0x80 => {
            let len = u32::from_be_bytes(data[1..5].try_into().unwrap()) as usize;
            (ZlValue::Str(data[5..5 + len].to_vec()), 5 + len)
        }
        t if t & 0xC0 == 0x40 => {
            let len = (((t & 0x3F) as usize) << 8) | data[1] as usize;
            (ZlValue::Str(data[2..2 + len].to_vec()), 2 + len)
        }
        t if t & 0xC0 == 0x00 => {
            let len = (t & 0x3F) as usize;
            (ZlValue::Str(data[1..1 + len].to_vec()), 1 + len)
        }
        _ => panic!("invalid ziplist entry tag {:#x}", tag),
    }
}

fn content_len_only(data: &[u8]) -> usize {
    decode_content(data).1
}

/// A packed list blob, cascade-update variant.
#[derive(Debug, Clone)]
pub struct Ziplist {
    blob: Vec<u8>,
}

impl Default for Ziplist {
    fn default() -> Self {
        Self::new()
    }
}

impl Ziplist {
    pub fn new() -> Self {
        let mut blob = Vec::with_capacity(HEADER_LEN + 1);
        blob.extend_from_slice(&((HEADER_LEN + 1) as u32).to_le_bytes());
        blob.extend_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        blob.extend_from_slice(&0u16.to_le_bytes());
        blob.push(END_BYTE);
        Ziplist { blob }
    }

    pub fn from_blob(blob: Vec<u8>) -> Self {
        Ziplist { blob }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn total_bytes(&self) -> usize {
        u32::from_le_bytes(self.blob[0..4].try_into().unwrap()) as usize
    }

    fn set_total_bytes(&mut self, v: usize) {
        self.blob[0..4].copy_from_slice(&(v as u32).to_le_bytes());
    }

    fn add_total_bytes(&mut self, delta: i64) {
        let cur = self.total_bytes() as i64;
        self.set_total_bytes((cur + delta) as usize);
    }

    pub fn tail_offset(&self) -> usize {
        u32::from_le_bytes(self.blob[4..8].try_into().unwrap()) as usize
    }

    fn set_tail_offset(&mut self, v: usize) {
        self.blob[4..8].copy_from_slice(&(v as u32).to_le_bytes());
    }

    fn raw_count_field(&self) -> u16 {
        u16::from_le_bytes(self.blob[8..10].try_into().unwrap())
    }

    fn set_raw_count_field(&mut self, v: u16) {
        self.blob[8..10].copy_from_slice(&v.to_le_bytes());
    }

    fn head_offset(&self) -> usize {
        HEADER_LEN
    }

    fn terminator_offset(&self) -> usize {
        self.blob.len() - 1
    }

    fn is_empty_list(&self) -> bool {
        self.head_offset() == self.terminator_offset()
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty_list()
    }

    /// Exact when the header's count field hasn't saturated; otherwise a
    /// full forward traversal.
    pub fn len(&self) -> usize {
        let c = self.raw_count_field();
        if c != COUNT_UNKNOWN {
            c as usize
        } else {
            self.iter().count()
        }
    }

    fn bump_count(&mut self, delta: i64) {
        let cur = self.len() as i64;
        let new_count = cur + delta;
        self.set_raw_count_field(if new_count >= COUNT_UNKNOWN as i64 {
            COUNT_UNKNOWN
        } else {
            new_count as u16
        });
    }

    fn entry_total_size(&self, off: usize) -> usize {
        let (_, pw) = decode_prev_len(&self.blob[off..]);
        pw + content_len_only(&self.blob[off + pw..])
    }

    /// Forward iterator over byte offsets of each entry's start.
    fn offsets(&self) -> OffsetIter<'_> {
        OffsetIter {
            zl: self,
            offset: self.head_offset(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ZlValue> + '_ {
        self.offsets().map(move |off| self.value_at(off))
    }

    pub fn iter_rev(&self) -> impl Iterator<Item = ZlValue> + '_ {
        ReverseOffsetIter {
            zl: self,
            offset: if self.is_empty_list() { None } else { Some(self.tail_offset()) },
        }
        .map(move |off| self.value_at(off))
    }

    fn value_at(&self, off: usize) -> ZlValue {
        let (_, pw) = decode_prev_len(&self.blob[off..]);
        decode_content(&self.blob[off + pw..]).0
    }

    pub fn get(&self, index: usize) -> Option<ZlValue> {
        self.offsets().nth(index).map(|off| self.value_at(off))
    }

    fn offset_of(&self, index: usize) -> Option<usize> {
        self.offsets().nth(index)
    }

    /// Cascade-propagate a new `prev_len` value starting at `offset`. Never
    /// shrinks a field's width; stops the instant a rewrite
    /// doesn't need to grow the field.
    fn cascade_set_prev_len(&mut self, mut offset: usize, mut new_value: usize) {
        loop {
            let (_, old_width) = decode_prev_len(&self.blob[offset..]);
            let needed_width = prev_len_width_for(new_value);
            if needed_width <= old_width {
                let bytes = encode_prev_len_bytes(new_value, old_width);
                self.blob[offset..offset + old_width].copy_from_slice(&bytes);
                return;
            }
            let delta = needed_width - old_width;
            let content_off = offset + old_width;
            let content_len = content_len_only(&self.blob[content_off..]);
            let new_bytes = encode_prev_len_bytes(new_value, needed_width);
            self.blob.splice(offset..offset + old_width, new_bytes);
            self.add_total_bytes(delta as i64);
            let cur_tail = self.tail_offset();
            if cur_tail > offset {
                self.set_tail_offset(cur_tail + delta);
            }
            tracing::trace!(target: "kvengine", offset, delta, "ziplist cascade widen");
            let new_entry_total = needed_width + content_len;
            let next_offset = offset + new_entry_total;
            if next_offset == self.terminator_offset() {
                return;
            }
            offset = next_offset;
            new_value = new_entry_total;
        }
    }

    fn raw_len_of_last_entry(&self) -> usize {
        if self.is_empty_list() {
            0
        } else {
            self.entry_total_size(self.tail_offset())
        }
    }

    /// Insert `value` so that it ends up immediately before whatever entry
    /// currently starts at `at_offset` (or at the tail if `at_offset` is the
    /// terminator).
    fn insert_at(&mut self, at_offset: usize, value: ZlValue) {
        let is_append = at_offset == self.terminator_offset();
        let prev_val = if is_append {
            self.raw_len_of_last_entry()
        } else {
            decode_prev_len(&self.blob[at_offset..]).0
        };
        let prev_width = prev_len_width_for(prev_val);
        let mut entry_bytes = encode_prev_len_bytes(prev_val, prev_width);
        entry_bytes.extend_from_slice(&encode_content(&value));
        let new_raw_len = entry_bytes.len();

        self.blob.splice(at_offset..at_offset, entry_bytes);
        self.add_total_bytes(new_raw_len as i64);
        self.bump_count(1);

        if is_append {
            self.set_tail_offset(at_offset);
        } else {
            let new_tail = self.tail_offset() + new_raw_len;
            self.set_tail_offset(new_tail);
            self.cascade_set_prev_len(at_offset + new_raw_len, new_raw_len);
        }
        tracing::trace!(target: "kvengine", at_offset, new_raw_len, is_append, "ziplist insert");
    }

    pub fn push_head(&mut self, value: impl Into<ZlValue>) {
        let off = self.head_offset();
        self.insert_at(off, value.into());
    }

    pub fn push_tail(&mut self, value: impl Into<ZlValue>) {
        let off = self.terminator_offset();
        self.insert_at(off, value.into());
    }

    /// Insert before the entry currently at `index` (or at the tail if
    /// `index == len()`).
    pub fn insert_before(&mut self, index: usize, value: impl Into<ZlValue>) {
        let off = self.offset_of(index).unwrap_or_else(|| self.terminator_offset());
        self.insert_at(off, value.into());
    }

    pub fn pop_head(&mut self) -> Option<ZlValue> {
        if self.is_empty_list() {
            return None;
        }
        let v = self.value_at(self.head_offset());
        self.delete_range(0, 1);
        Some(v)
    }

    pub fn pop_tail(&mut self) -> Option<ZlValue> {
        if self.is_empty_list() {
            return None;
        }
        let idx = self.len() - 1;
        let v = self.get(idx);
        self.delete_range(idx, 1);
        v
    }

    /// Delete-range: removes up to `count` entries starting
    /// at logical `index`.
    pub fn delete_range(&mut self, index: usize, count: usize) {
        let Some(start_offset) = self.offset_of(index) else {
            return;
        };
        if count == 0 {
            return;
        }
        let new_prev_val = decode_prev_len(&self.blob[start_offset..]).0;
        let mut end_offset = start_offset;
        let mut removed = 0usize;
        let mut deleted = 0usize;
        for _ in 0..count {
            if end_offset == self.terminator_offset() {
                break;
            }
            let sz = self.entry_total_size(end_offset);
            end_offset += sz;
            removed += sz;
            deleted += 1;
        }
        let has_successor = end_offset != self.terminator_offset();
        if has_successor {
            self.cascade_set_prev_len(end_offset, new_prev_val);
        }
        self.blob.drain(start_offset..end_offset);
        self.add_total_bytes(-(removed as i64));
        self.bump_count(-(deleted as i64));

        if has_successor {
            let cur_tail = self.tail_offset();
            self.set_tail_offset(cur_tail - removed);
        } else if start_offset == self.head_offset() {
            self.set_tail_offset(self.head_offset());
        } else {
            self.set_tail_offset(start_offset - new_prev_val);
        }
        tracing::trace!(target: "kvengine", index, count, removed, "ziplist delete_range");
    }

    /// `validate_integrity(deep)`: a deep pass walks every entry,
    /// reconciling each one's `prev_len` against its predecessor's raw
    /// length.
    pub fn validate_integrity(&self, deep: bool) -> bool {
        if self.blob.len() < HEADER_LEN + 1 {
            return false;
        }
        if self.total_bytes() != self.blob.len() {
            return false;
        }
        if self.blob[self.blob.len() - 1] != END_BYTE {
            return false;
        }
        if self.tail_offset() >= self.blob.len() {
            return false;
        }
        if !deep {
            return true;
        }
        let mut offset = self.head_offset();
        let mut prev_raw_len = 0usize;
        let mut count = 0usize;
        let mut last_offset = self.head_offset();
        while offset < self.terminator_offset() {
            if offset + 1 > self.blob.len() {
                return false;
            }
            let (pv, pw) = decode_prev_len(&self.blob[offset..]);
            if count == 0 {
                if pv != 0 {
                    return false;
                }
            } else if pv != prev_raw_len {
                return false;
            }
            let content_off = offset + pw;
            if content_off >= self.blob.len() {
                return false;
            }
            let content_len = content_len_only(&self.blob[content_off..]);
            let end = content_off + content_len;
            if end > self.blob.len() {
                return false;
            }
            last_offset = offset;
            prev_raw_len = pw + content_len;
            offset = end;
            count += 1;
        }
        if offset != self.terminator_offset() {
            return false;
        }
        if count > 0 && last_offset != self.tail_offset() {
            return false;
        }
        if count == 0 && self.tail_offset() != self.head_offset() {
            return false;
        }
        let raw_count = self.raw_count_field();
        if raw_count != COUNT_UNKNOWN && raw_count as usize != count {
            return false;
        }
        true
    }

    /// Debug dumper: one line per entry, prev_len width, raw bytes of
    /// small entries.
    pub fn render_ascii(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "ziplist total={} tail={} count={}\n",
            self.total_bytes(),
            self.tail_offset(),
            self.len()
        ));
        for (i, v) in self.iter().enumerate() {
            out.push_str(&format!("  [{i}] {:?}\n", v));
        }
        out
    }
}

struct OffsetIter<'a> {
    zl: &'a Ziplist,
    offset: usize,
}

impl<'a> Iterator for OffsetIter<'a> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        if self.offset == self.zl.terminator_offset() {
            return None;
        }
        let cur = self.offset;
        self.offset += self.zl.entry_total_size(cur);
        Some(cur)
    }
}

struct ReverseOffsetIter<'a> {
    zl: &'a Ziplist,
    offset: Option<usize>,
}

impl<'a> Iterator for ReverseOffsetIter<'a> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        let cur = self.offset?;
        let (prev_val, _) = decode_prev_len(&self.zl.blob[cur..]);
        self.offset = if cur == self.zl.head_offset() {
            None
        } else {
            Some(cur - prev_val)
        };
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_log::test;

    #[test]
    fn test_empty_list_validates() {
        let zl = Ziplist::new();
        assert!(zl.validate_integrity(true));
        assert_eq!(zl.len(), 0);
    }

    #[test]
    fn test_push_tail_and_iterate() {
        let mut zl = Ziplist::new();
        zl.push_tail(ZlValue::from(b"a".as_slice()));
        zl.push_tail(ZlValue::from(b"bb".as_slice()));
        zl.push_tail(ZlValue::from(b"ccc".as_slice()));
        assert_eq!(zl.len(), 3);
        let got: Vec<_> = zl.iter().collect();
        assert_eq!(
            got,
            vec![
                ZlValue::Str(b"a".to_vec()),
                ZlValue::Str(b"bb".to_vec()),
                ZlValue::Str(b"ccc".to_vec())
            ]
        );
        assert!(zl.validate_integrity(true));
    }

    #[test]
    fn test_reverse_iteration_matches_forward_reversed() {
        let mut zl = Ziplist::new();
        for i in 0..20 {
            zl.push_tail(ZlValue::Int(i));
        }
        let fwd: Vec<_> = zl.iter().collect();
        let mut rev: Vec<_> = zl.iter_rev().collect();
        rev.reverse();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn test_push_head() {
        let mut zl = Ziplist::new();
        zl.push_tail(ZlValue::Int(1));
        zl.push_head(ZlValue::Int(0));
        let got: Vec<_> = zl.iter().collect();
        assert_eq!(got, vec![ZlValue::Int(0), ZlValue::Int(1)]);
        assert!(zl.validate_integrity(true));
    }

    #[test]
    fn test_pop_head_and_tail() {
        let mut zl = Ziplist::new();
        for i in 0..5 {
            zl.push_tail(ZlValue::Int(i));
        }
        assert_eq!(zl.pop_head(), Some(ZlValue::Int(0)));
        assert_eq!(zl.pop_tail(), Some(ZlValue::Int(4)));
        assert_eq!(zl.len(), 3);
        assert!(zl.validate_integrity(true));
    }

    #[test]
    fn test_integer_auto_encoding_scenario_s2() {
        let mut zl = Ziplist::new();
        for s in ["12", "12345", "1234567890", "non-number", "-32768"] {
            zl.push_tail(ZlValue::from(s.as_bytes()));
        }
        let got: Vec<_> = zl.iter().collect();
        assert_eq!(
            got,
            vec![
                ZlValue::Int(12),
                ZlValue::Int(12345),
                ZlValue::Int(1234567890),
                ZlValue::Str(b"non-number".to_vec()),
                ZlValue::Int(-32768),
            ]
        );
    }

    #[test]
    fn test_cascade_widens_prev_len_at_254_boundary_scenario_s1() {
        let mut zl = Ziplist::new();
        for _ in 0..128 {
            zl.push_tail(ZlValue::Str(vec![b'x'; 20]));
        }
        zl.push_tail(ZlValue::Str(vec![b'y'; 300]));
        assert!(zl.validate_integrity(true));

        zl.pop_tail();
        zl.pop_tail();
        zl.push_head(ZlValue::Str(vec![b'y'; 300]));
        for _ in 0..127 {
            zl.push_tail(ZlValue::Str(vec![b'x'; 20]));
        }
        assert!(zl.validate_integrity(true));
        // The 128th 20-byte entry (last one pushed) sits far enough from
        // the 300-byte head entry that its prev_len must have widened to
        // 5 bytes at some point during the cascade.
        let last_off = zl.offset_of(zl.len() - 1).unwrap();
        let (_, width) = decode_prev_len(&zl.blob[last_off..]);
        assert_eq!(width, 5);
    }

    #[test]
    fn test_delete_range_preserves_integrity() {
        let mut zl = Ziplist::new();
        for i in 0..50 {
            zl.push_tail(ZlValue::Int(i));
        }
        zl.delete_range(10, 20);
        assert_eq!(zl.len(), 30);
        assert!(zl.validate_integrity(true));
        let got: Vec<_> = zl.iter().collect();
        let expect: Vec<_> = (0..10).chain(30..50).map(ZlValue::Int).collect();
        assert_eq!(got, expect);
    }

    #[test]
    fn test_insert_before_middle() {
        let mut zl = Ziplist::new();
        zl.push_tail(ZlValue::Int(1));
        zl.push_tail(ZlValue::Int(3));
        zl.insert_before(1, ZlValue::Int(2));
        let got: Vec<_> = zl.iter().collect();
        assert_eq!(got, vec![ZlValue::Int(1), ZlValue::Int(2), ZlValue::Int(3)]);
        assert!(zl.validate_integrity(true));
    }

    proptest! {
        #[test]
        fn prop_random_push_pop_stays_valid(ops in proptest::collection::vec(0..3usize, 0..100)) {
            let mut zl = Ziplist::new();
            let mut model: Vec<i64> = Vec::new();
            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    0 => { zl.push_tail(ZlValue::Int(i as i64)); model.push(i as i64); }
                    1 => { zl.push_head(ZlValue::Int(i as i64)); model.insert(0, i as i64); }
                    _ => {
                        if !model.is_empty() {
                            zl.pop_tail();
                            model.pop();
                        }
                    }
                }
                prop_assert!(zl.validate_integrity(true));
                prop_assert_eq!(zl.len(), model.len());
            }
            let got: Vec<i64> = zl.iter().map(|v| match v { ZlValue::Int(n) => n, _ => panic!("expected int") }).collect();
            prop_assert_eq!(got, model);
        }
    }
}
