//! SipHash-2-4 with a process-wide 128-bit seed, plus a
//! case-insensitive variant that folds ASCII letters to lower case during
//! absorption. Used as the default string hash for `kvengine-dict`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipSeed {
    pub k0: u64,
    pub k1: u64,
}

impl SipSeed {
    pub fn from_bytes(seed: [u8; 16]) -> Self {
        SipSeed {
            k0: u64::from_le_bytes(seed[0..8].try_into().unwrap()),
            k1: u64::from_le_bytes(seed[8..16].try_into().unwrap()),
        }
    }
}

struct SipState {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

macro_rules! sipround {
    ($s:expr) => {{
        $s.v0 = $s.v0.wrapping_add($s.v1);
        $s.v1 = $s.v1.rotate_left(13);
        $s.v1 ^= $s.v0;
        $s.v0 = $s.v0.rotate_left(32);
        $s.v2 = $s.v2.wrapping_add($s.v3);
        $s.v3 = $s.v3.rotate_left(16);
        $s.v3 ^= $s.v2;
        $s.v0 = $s.v0.wrapping_add($s.v3);
        $s.v3 = $s.v3.rotate_left(21);
        $s.v3 ^= $s.v0;
        $s.v2 = $s.v2.wrapping_add($s.v1);
        $s.v1 = $s.v1.rotate_left(17);
        $s.v1 ^= $s.v2;
        $s.v2 = $s.v2.rotate_left(32);
    }};
}

fn siphash24_with<F: Fn(u8) -> u8>(seed: SipSeed, data: &[u8], fold: F) -> u64 {
    let mut s = SipState {
        v0: seed.k0 ^ 0x736f6d6570736575,
        v1: seed.k1 ^ 0x646f72616e646f6d,
        v2: seed.k0 ^ 0x6c7967656e657261,
        v3: seed.k1 ^ 0x7465646279746573,
    };

    let len = data.len();
    let end = len - (len % 8);
    let mut i = 0;
    while i < end {
        let mut buf = [0u8; 8];
        for j in 0..8 {
            buf[j] = fold(data[i + j]);
        }
        let m = u64::from_le_bytes(buf);
        s.v3 ^= m;
        sipround!(s);
        sipround!(s);
        s.v0 ^= m;
        i += 8;
    }

    let mut last = [0u8; 8];
    for (j, b) in data[end..].iter().enumerate() {
        last[j] = fold(*b);
    }
    last[7] = (len & 0xff) as u8;
    let m = u64::from_le_bytes(last);
    s.v3 ^= m;
    sipround!(s);
    sipround!(s);
    s.v0 ^= m;

    s.v2 ^= 0xff;
    sipround!(s);
    sipround!(s);
    sipround!(s);
    sipround!(s);

    s.v0 ^ s.v1 ^ s.v2 ^ s.v3
}

/// SipHash-2-4 of `data` under `seed`.
pub fn siphash24(seed: SipSeed, data: &[u8]) -> u64 {
    siphash24_with(seed, data, |b| b)
}

/// SipHash-2-4 of `data` under `seed`, folding ASCII letters to lower case
/// as they're absorbed, so e.g. `"Foo"` and `"foo"` hash identically.
pub fn siphash24_case_insensitive(seed: SipSeed, data: &[u8]) -> u64 {
    siphash24_with(seed, data, |b| b.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const SEED: SipSeed = SipSeed { k0: 0x0706050403020100, k1: 0x0f0e0d0c0b0a0908 };

    #[test]
    fn test_deterministic() {
        let a = siphash24(SEED, b"hello world");
        let b = siphash24(SEED, b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_inputs_differ() {
        let a = siphash24(SEED, b"hello");
        let b = siphash24(SEED, b"jello");
        assert_ne!(a, b);
    }

    #[test]
    fn test_case_insensitive_variant_folds_case() {
        let a = siphash24_case_insensitive(SEED, b"FooBar");
        let b = siphash24_case_insensitive(SEED, b"foobar");
        assert_eq!(a, b);
        let c = siphash24(SEED, b"FooBar");
        let d = siphash24(SEED, b"foobar");
        assert_ne!(c, d);
    }

    #[test]
    fn test_empty_and_various_lengths() {
        for len in 0..40 {
            let data = vec![0x42u8; len];
            let _ = siphash24(SEED, &data);
        }
    }
}
