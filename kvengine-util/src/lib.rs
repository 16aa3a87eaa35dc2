mod numeric;
mod rand;
mod siphash;

pub use crate::rand::Mt64;
pub use numeric::{parse_canonical_i64, read_le_int, smallest_width_for_i64, write_le_int};
pub use siphash::{siphash24, siphash24_case_insensitive, SipSeed};
