//! Small integer/float (de)serialization helpers shared by the packed
//! encodings (ziplist, listpack, intset). Centralizing the "does this byte
//! string look like a canonical base-10 integer" rule here means every
//! encoder applies identical edge-case handling: no leading zeros
//! (except the literal `"0"`), an optional leading `-`, no whitespace,
//! length 1..=20, and the parsed value must round-trip back to the same
//! bytes when formatted.

/// Parse `bytes` as a canonical base-10 `i64`, the same rule `ziplist`'s
/// `zipTryEncoding` and `listpack`'s integer detection use. Returns `None`
/// if the bytes aren't a canonical integer representation (leading zeros,
/// stray whitespace, overflow, or a value that wouldn't format back to the
/// same bytes).
pub fn parse_canonical_i64(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 20 {
        return None;
    }
    let s = std::str::from_utf8(bytes).ok()?;
    let v: i64 = s.parse().ok()?;
    // Reject non-canonical forms ("-0", "007", "+5", internal whitespace)
    // by requiring the formatted value to exactly reproduce the input.
    let mut buf = itoa_buf();
    let rendered = format_i64(v, &mut buf);
    if rendered.as_bytes() == bytes {
        Some(v)
    } else {
        None
    }
}

const ITOA_BUF_LEN: usize = 20;
fn itoa_buf() -> [u8; ITOA_BUF_LEN] {
    [0u8; ITOA_BUF_LEN]
}

/// Render `v` into `buf` (which must be at least 20 bytes), returning the
/// written prefix as a `&str`. Avoids an intermediate heap allocation in
/// the integer round-trip check above.
fn format_i64(v: i64, buf: &mut [u8; ITOA_BUF_LEN]) -> &str {
    use std::io::Write;
    let mut cursor = &mut buf[..];
    write!(cursor, "{}", v).unwrap();
    let remaining = cursor.len();
    let written = ITOA_BUF_LEN - remaining;
    std::str::from_utf8(&buf[..written]).unwrap()
}

/// Smallest signed-integer encoding width (in bytes: 1, 2, 3, 4, or 8) that
/// can represent `v`. Ziplist/listpack both use this ladder; there is no
/// 3-byte (24-bit) case in listpack, callers that don't support it should
/// round up to the next width.
pub fn smallest_width_for_i64(v: i64) -> u8 {
    if (i8::MIN as i64..=i8::MAX as i64).contains(&v) {
        1
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
        2
    } else if (-(1 << 23)..(1 << 23)).contains(&v) {
        3
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        4
    } else {
        8
    }
}

pub fn write_le_int(v: i64, width: u8, out: &mut Vec<u8>) {
    match width {
        1 => out.push(v as i8 as u8),
        2 => out.extend_from_slice(&(v as i16).to_le_bytes()),
        3 => {
            let b = (v as i32).to_le_bytes();
            out.extend_from_slice(&b[0..3]);
        }
        4 => out.extend_from_slice(&(v as i32).to_le_bytes()),
        8 => out.extend_from_slice(&v.to_le_bytes()),
        _ => panic!("unsupported integer width {}", width),
    }
}

pub fn read_le_int(bytes: &[u8], width: u8) -> i64 {
    match width {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        3 => {
            let mut b = [bytes[0], bytes[1], bytes[2], 0];
            // sign-extend the 24-bit value
            if bytes[2] & 0x80 != 0 {
                b[3] = 0xff;
            }
            i32::from_le_bytes(b) as i64
        }
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        8 => i64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        _ => panic!("unsupported integer width {}", width),
    }
}
