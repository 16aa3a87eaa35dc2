//! Dynamic string: a binary-safe buffer with explicit
//! length, free-space tracking, and amortised-growth append.
//!
//! The original lays the header directly in front of the payload bytes and
//! picks one of five header widths (5/8/16/32/64-bit length fields) so
//! that short strings cost almost nothing extra. Persistence (which would
//! care about the exact header byte layout) is out of scope here, so we
//! keep the five-way width distinction as a *classification*
//! (`SdsHeaderKind`, `choose_header_for_len`) while storing the payload
//! itself in a plain `Vec<u8>` managed through `kvengine_alloc`.

use kvengine_alloc::Allocator;

/// Which header width a string is (or would be) using: one of five
/// widths; `Sds5` has no capacity field at all, so a string
/// in that class always reallocates on append (`avail()` is always 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SdsHeaderKind {
    Sds5,
    Sds8,
    Sds16,
    Sds32,
    Sds64,
}

impl SdsHeaderKind {
    /// Largest length/capacity this header width can represent.
    pub fn max_len(self) -> u64 {
        match self {
            SdsHeaderKind::Sds5 => 31,
            SdsHeaderKind::Sds8 => u8::MAX as u64,
            SdsHeaderKind::Sds16 => u16::MAX as u64,
            SdsHeaderKind::Sds32 => u32::MAX as u64,
            SdsHeaderKind::Sds64 => u64::MAX,
        }
    }

    fn widen_to_at_least(self, other: SdsHeaderKind) -> SdsHeaderKind {
        self.max(other)
    }
}

/// Pure classification: which header width is the *smallest* that can
/// represent a string of `len` bytes. `make_room_for` uses this to decide
/// whether a realloc needs to also widen the header.
pub fn choose_header_for_len(len: usize) -> SdsHeaderKind {
    let len = len as u64;
    if len <= SdsHeaderKind::Sds5.max_len() {
        SdsHeaderKind::Sds5
    } else if len <= SdsHeaderKind::Sds8.max_len() {
        SdsHeaderKind::Sds8
    } else if len <= SdsHeaderKind::Sds16.max_len() {
        SdsHeaderKind::Sds16
    } else if len <= SdsHeaderKind::Sds32.max_len() {
        SdsHeaderKind::Sds32
    } else {
        SdsHeaderKind::Sds64
    }
}

/// A binary-safe dynamic string. `buf` never includes the implicit
/// trailing NUL (callers that need a C-compatible pointer can rely on
/// `as_c_bytes` appending one on demand).
pub struct Sds {
    header: SdsHeaderKind,
    /// Logical content. `buf.len()` is the string's `len`; `cap` is the
    /// tracked `alloc` field (always `>= buf.len()`, `0` for `Sds5`).
    buf: Vec<u8>,
    cap: usize,
}

const MAX_PREALLOC: usize = 1024 * 1024; // 1 MiB

impl Sds {
    /// `make(bytes)`: build a new string holding exactly `bytes`, no spare
    /// capacity (`sdsnewlen` allocates exactly `len` bytes up front).
    pub fn make(alloc: &Allocator, bytes: &[u8]) -> Sds {
        let buf = alloc.alloc(bytes.len());
        let mut buf = buf;
        buf.copy_from_slice(bytes);
        Sds {
            header: choose_header_for_len(bytes.len()),
            cap: bytes.len(),
            buf,
        }
    }

    pub fn make_from_int64(alloc: &Allocator, n: i64) -> Sds {
        let s = n.to_string();
        Sds::make(alloc, s.as_bytes())
    }

    pub fn dup(&self, alloc: &Allocator) -> Sds {
        Sds::make(alloc, &self.buf)
    }

    /// `free`: release the payload back to the allocator. Equivalent to
    /// dropping the value; exposed as an explicit method so callers can
    /// release early without waiting on scope exit.
    pub fn free(self, alloc: &Allocator) {
        alloc.free(self.buf);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn avail(&self) -> usize {
        self.cap - self.buf.len()
    }

    pub fn header_kind(&self) -> SdsHeaderKind {
        self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Matches the invariant that the byte at `len` is always `\0` for
    /// C-compat callers, without keeping a physical NUL in `buf`.
    pub fn as_c_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.buf.len() + 1);
        v.extend_from_slice(&self.buf);
        v.push(0);
        v
    }

    /// `make_room_for(extra)`: grow-to-fit with the classic sds
    /// double-until-1MiB-then-linear curve.
    pub fn make_room_for(&mut self, alloc: &Allocator, extra: usize) {
        if self.avail() >= extra {
            return;
        }
        let new_len = self.buf.len() + extra;
        let target_cap = if new_len < MAX_PREALLOC {
            new_len * 2
        } else {
            new_len + MAX_PREALLOC
        };
        // Never downgrade to Sds5 on growth; Sds5 only ever comes from an
        // initial `make` of a tiny string. 5 -> 8 is the floor here.
        let mut new_header = choose_header_for_len(target_cap);
        if new_header == SdsHeaderKind::Sds5 {
            new_header = SdsHeaderKind::Sds8;
        }
        new_header = new_header.widen_to_at_least(self.header);

        if new_header == self.header {
            alloc.reserve(&mut self.buf, target_cap);
        } else {
            // Width change: allocate wider, copy payload, free old.
            let mut new_buf = alloc.alloc(self.buf.len());
            new_buf.copy_from_slice(&self.buf);
            alloc.reserve(&mut new_buf, target_cap);
            let old = std::mem::replace(&mut self.buf, new_buf);
            alloc.free(old);
            self.header = new_header;
        }
        self.cap = self.buf.capacity().min(new_header.max_len() as usize);
        tracing::trace!(target: "kvengine", extra, new_cap = self.cap, "sds make_room_for");
    }

    pub fn append(&mut self, alloc: &Allocator, data: &[u8]) {
        self.make_room_for(alloc, data.len());
        self.buf.extend_from_slice(data);
    }

    pub fn append_int64(&mut self, alloc: &Allocator, n: i64) {
        self.append(alloc, n.to_string().as_bytes());
    }

    /// `append_format`: a small, allocation-light sprintf analogue.
    /// Callers format with `std::fmt` and pass the rendered bytes here;
    /// kept as a distinct entry point since it skips an intermediate
    /// owned `String` the caller would otherwise have to build.
    pub fn append_format(&mut self, alloc: &Allocator, args: std::fmt::Arguments<'_>) {
        let rendered = std::fmt::format(args);
        self.append(alloc, rendered.as_bytes());
    }

    /// Overwrite `len` bytes at `offset`, growing the string (and filling
    /// any gap with zero bytes) if `offset + data.len()` exceeds the
    /// current length.
    pub fn copy_over(&mut self, alloc: &Allocator, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        if end > self.buf.len() {
            let extra = end - self.buf.len();
            self.make_room_for(alloc, extra);
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(data);
    }

    /// `trim(cut_set)`: remove any leading/trailing bytes that appear in
    /// `cut_set`, in place (length only shrinks; `alloc` is unchanged).
    pub fn trim(&mut self, cut_set: &[u8]) {
        let start = self
            .buf
            .iter()
            .position(|b| !cut_set.contains(b))
            .unwrap_or(self.buf.len());
        let end = self
            .buf
            .iter()
            .rposition(|b| !cut_set.contains(b))
            .map(|i| i + 1)
            .unwrap_or(start);
        self.buf.copy_within(start..end, 0);
        self.buf.truncate(end - start);
    }

    /// `range(start, end)`: keep only `[start, end]` inclusive (negative
    /// indices count from the end, Redis-style), in place.
    pub fn range(&mut self, start: i64, end: i64) {
        let len = self.buf.len() as i64;
        if len == 0 {
            return;
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let mut s = norm(start);
        let mut e = norm(end).min(len - 1);
        if s > e || s >= len {
            self.buf.clear();
            return;
        }
        if s < 0 {
            s = 0;
        }
        if e < 0 {
            e = 0;
        }
        let newlen = (e - s + 1) as usize;
        self.buf.copy_within(s as usize..=e as usize, 0);
        self.buf.truncate(newlen);
    }

    pub fn compare(&self, other: &Sds) -> std::cmp::Ordering {
        self.buf.cmp(&other.buf)
    }

    /// `split(sep)`: split on every occurrence of `sep`, Redis `sdssplitlen`
    /// style (empty `sep` yields the whole string as one piece).
    pub fn split(&self, sep: &[u8]) -> Vec<Vec<u8>> {
        if sep.is_empty() {
            return vec![self.buf.clone()];
        }
        split_on(&self.buf, sep)
    }

    pub fn to_lower(&mut self) {
        for b in self.buf.iter_mut() {
            b.make_ascii_lowercase();
        }
    }

    pub fn to_upper(&mut self) {
        for b in self.buf.iter_mut() {
            b.make_ascii_uppercase();
        }
    }

    /// `cat_repr`: C-escaped, double-quoted rendering suitable for crash
    /// diagnostics / `DEBUG` output. Escape table: `\n \r \t \a \b`, other
    /// non-printable bytes as `\xHH`, printable bytes passed through, the
    /// whole thing wrapped in double quotes.
    pub fn cat_repr(&self) -> String {
        let mut out = String::with_capacity(self.buf.len() + 2);
        out.push('"');
        for &b in &self.buf {
            match b {
                b'\n' => out.push_str("\\n"),
                b'\r' => out.push_str("\\r"),
                b'\t' => out.push_str("\\t"),
                0x07 => out.push_str("\\a"),
                0x08 => out.push_str("\\b"),
                b'"' => out.push_str("\\\""),
                b'\\' => out.push_str("\\\\"),
                0x20..=0x7e => out.push(b as char),
                _ => out.push_str(&format!("\\x{:02x}", b)),
            }
        }
        out.push('"');
        out
    }

    /// `shrink_to_fit`: release slack capacity back to the allocator.
    /// Idempotent: a second call with no intervening mutation is a no-op.
    pub fn shrink_to_fit(&mut self, alloc: &Allocator) {
        if self.cap == self.buf.len() {
            return;
        }
        let want_header = choose_header_for_len(self.buf.len());
        if want_header == self.header {
            let target = self.buf.len();
            self.buf = alloc.realloc(std::mem::take(&mut self.buf), target);
        } else {
            let mut new_buf = alloc.alloc(self.buf.len());
            new_buf.copy_from_slice(&self.buf);
            let old = std::mem::replace(&mut self.buf, new_buf);
            alloc.free(old);
            self.header = want_header;
        }
        self.cap = self.buf.len();
    }
}

fn split_on(data: &[u8], sep: &[u8]) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + sep.len() <= data.len() {
        if &data[i..i + sep.len()] == sep {
            parts.push(data[start..i].to_vec());
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(data[start..].to_vec());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_log::test;

    #[test]
    fn test_make_and_len() {
        let a = Allocator::new();
        let s = Sds::make(&a, b"hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.as_bytes(), b"hello");
        assert_eq!(s.avail(), 0);
    }

    #[test]
    fn test_append_grows_and_preserves_content() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"hello");
        s.append(&a, b" world");
        assert_eq!(s.as_bytes(), b"hello world");
        assert!(s.avail() > 0);
    }

    #[test]
    fn test_header_widens_with_length_never_shrinks_to_5() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"x");
        assert_eq!(s.header_kind(), SdsHeaderKind::Sds5);
        s.append(&a, &vec![b'y'; 100]);
        assert!(s.header_kind() >= SdsHeaderKind::Sds8);
    }

    #[test]
    fn test_trim() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"  hi  ");
        s.trim(b" ");
        assert_eq!(s.as_bytes(), b"hi");
    }

    #[test]
    fn test_range_negative_indices() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"hello world");
        s.range(-5, -1);
        assert_eq!(s.as_bytes(), b"world");
    }

    #[test]
    fn test_split() {
        let a = Allocator::new();
        let s = Sds::make(&a, b"a,b,,c");
        let parts = s.split(b",");
        assert_eq!(parts, vec![b"a".to_vec(), b"b".to_vec(), b"".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_case_conversion() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"MixedCase");
        s.to_lower();
        assert_eq!(s.as_bytes(), b"mixedcase");
        s.to_upper();
        assert_eq!(s.as_bytes(), b"MIXEDCASE");
    }

    #[test]
    fn test_cat_repr_escapes_control_bytes() {
        let a = Allocator::new();
        let s = Sds::make(&a, b"a\nb\x01c\"d");
        assert_eq!(s.cat_repr(), "\"a\\nb\\x01c\\\"d\"");
    }

    #[test]
    fn test_shrink_to_fit_idempotent() {
        let a = Allocator::new();
        let mut s = Sds::make(&a, b"hi");
        s.append(&a, &vec![b'!'; 500]);
        s.shrink_to_fit(&a);
        let cap1 = s.cap;
        s.shrink_to_fit(&a);
        assert_eq!(cap1, s.cap);
        assert_eq!(s.avail(), 0);
    }

    proptest! {
        #[test]
        fn prop_binary_safe_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
            let a = Allocator::new();
            let s = Sds::make(&a, &bytes);
            prop_assert_eq!(s.len(), bytes.len());
            prop_assert_eq!(s.as_bytes(), bytes.as_slice());
        }

        #[test]
        fn prop_append_preserves_prefix(a1 in proptest::collection::vec(any::<u8>(), 0..100), a2 in proptest::collection::vec(any::<u8>(), 0..100)) {
            let a = Allocator::new();
            let mut s = Sds::make(&a, &a1);
            s.append(&a, &a2);
            let mut expect = a1.clone();
            expect.extend_from_slice(&a2);
            prop_assert_eq!(s.as_bytes(), expect.as_slice());
            prop_assert!(s.len() <= s.cap);
        }
    }
}
