//! Integer set — a sorted, packed array of 16/32/64-bit
//! signed integers, encoding-promoted in place as wider values are added
//! and never demoted back down ("promote-only").

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntsetEncoding {
    I16 = 2,
    I32 = 4,
    I64 = 8,
}

impl IntsetEncoding {
    fn width(self) -> usize {
        self as usize
    }

    fn for_value(v: i64) -> IntsetEncoding {
        if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
            IntsetEncoding::I16
        } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
            IntsetEncoding::I32
        } else {
            IntsetEncoding::I64
        }
    }
}

/// `[encoding: u32][count: u32][values: sorted packed integers]`.
#[derive(Debug, Clone)]
pub struct Intset {
    encoding: IntsetEncoding,
    values: Vec<u8>,
    count: usize,
}

impl Default for Intset {
    fn default() -> Self {
        Self::new()
    }
}

impl Intset {
    pub fn new() -> Self {
        Intset {
            encoding: IntsetEncoding::I16,
            values: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn encoding(&self) -> IntsetEncoding {
        self.encoding
    }

    fn read_at(&self, idx: usize) -> i64 {
        let w = self.encoding.width();
        let b = &self.values[idx * w..idx * w + w];
        match w {
            2 => i16::from_le_bytes([b[0], b[1]]) as i64,
            4 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
            8 => i64::from_le_bytes(b.try_into().unwrap()),
            _ => unreachable!(),
        }
    }

    fn write_at(buf: &mut [u8], idx: usize, width: usize, v: i64) {
        let b = &mut buf[idx * width..idx * width + width];
        match width {
            2 => b.copy_from_slice(&(v as i16).to_le_bytes()),
            4 => b.copy_from_slice(&(v as i32).to_le_bytes()),
            8 => b.copy_from_slice(&v.to_le_bytes()),
            _ => unreachable!(),
        }
    }

    /// Binary search for `v`; `Ok(idx)` if present, `Err(idx)` giving the
    /// sorted insertion point otherwise.
    fn search(&self, v: i64) -> Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let mv = self.read_at(mid);
            match mv.cmp(&v) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Err(lo)
    }

    pub fn contains(&self, v: i64) -> bool {
        self.search(v).is_ok()
    }

    pub fn get(&self, idx: usize) -> Option<i64> {
        if idx < self.count {
            Some(self.read_at(idx))
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.count).map(move |i| self.read_at(i))
    }

    pub fn max(&self) -> Option<i64> {
        self.get(self.count.saturating_sub(1)).filter(|_| self.count > 0)
    }

    pub fn min(&self) -> Option<i64> {
        self.get(0)
    }

    /// Widen every stored element to `new_enc`, right-to-left so that
    /// in-place rewrite into the same (reused) buffer never clobbers an
    /// element before it has been read. This never narrows.
    fn upgrade(&mut self, new_enc: IntsetEncoding) {
        debug_assert!(new_enc > self.encoding);
        let new_width = new_enc.width();
        let mut new_buf = vec![0u8; self.count * new_width];
        for i in (0..self.count).rev() {
            let v = self.read_at(i);
            Self::write_at(&mut new_buf, i, new_width, v);
        }
        self.values = new_buf;
        self.encoding = new_enc;
        tracing::trace!(target: "kvengine", new_width, "intset upgrade");
    }

    /// Insert: binary-search for position; no-op if present; widen
    /// encoding first if the new element requires it, then `memmove` to
    /// open a slot and write.
    pub fn insert(&mut self, v: i64) -> bool {
        let needed = IntsetEncoding::for_value(v);
        if needed > self.encoding {
            self.upgrade(needed);
        }
        let pos = match self.search(v) {
            Ok(_) => return false,
            Err(pos) => pos,
        };
        let width = self.encoding.width();
        let slot = vec![0u8; width];
        self.values.splice(pos * width..pos * width, slot);
        Self::write_at(&mut self.values, pos, width, v);
        self.count += 1;
        true
    }

    /// Delete: find, then `memmove` left. Never narrows the encoding.
    pub fn remove(&mut self, v: i64) -> bool {
        let Ok(pos) = self.search(v) else { return false };
        let width = self.encoding.width();
        self.values.drain(pos * width..pos * width + width);
        self.count -= 1;
        true
    }

    pub fn validate_integrity(&self) -> bool {
        self.values.len() == self.count * self.encoding.width()
            && (0..self.count.saturating_sub(1)).all(|i| self.read_at(i) < self.read_at(i + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_log::test;

    #[test]
    fn test_new_is_empty_i16() {
        let s = Intset::new();
        assert!(s.is_empty());
        assert_eq!(s.encoding(), IntsetEncoding::I16);
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let mut s = Intset::new();
        for v in [5, 1, 3, 2, 4] {
            s.insert(v);
        }
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(s.validate_integrity());
    }

    #[test]
    fn test_insert_duplicate_is_noop() {
        let mut s = Intset::new();
        assert!(s.insert(7));
        assert!(!s.insert(7));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_widening_rewrites_all_elements_preserving_order() {
        let mut s = Intset::new();
        for v in [1i64, 2, 3, -4] {
            s.insert(v);
        }
        assert_eq!(s.encoding(), IntsetEncoding::I16);
        s.insert(1_000_000_000_000i64); // forces I64
        assert_eq!(s.encoding(), IntsetEncoding::I64);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![-4, 1, 2, 3, 1_000_000_000_000]);
        assert!(s.validate_integrity());
    }

    #[test]
    fn test_promote_only_never_shrinks() {
        let mut s = Intset::new();
        s.insert(100_000); // forces I32
        assert_eq!(s.encoding(), IntsetEncoding::I32);
        s.remove(100_000);
        s.insert(1); // small value again
        assert_eq!(s.encoding(), IntsetEncoding::I32, "encoding must not narrow");
    }

    #[test]
    fn test_remove() {
        let mut s = Intset::new();
        for v in 0..10 {
            s.insert(v);
        }
        assert!(s.remove(5));
        assert!(!s.remove(5));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    }

    proptest! {
        #[test]
        fn prop_insert_remove_keeps_sorted_and_valid(vs in proptest::collection::vec(any::<i64>(), 0..200)) {
            let mut s = Intset::new();
            let mut model = std::collections::BTreeSet::new();
            for v in vs {
                s.insert(v);
                model.insert(v);
            }
            prop_assert_eq!(s.iter().collect::<Vec<_>>(), model.into_iter().collect::<Vec<_>>());
            prop_assert!(s.validate_integrity());
        }
    }
}
