//! The `ptr` field of the value header: one body shape per `(type, encoding)`
//! pair, collapsing the classic C union into a Rust enum.

use kvengine_dict::{Dict, SipHashBuilder};
use kvengine_intset::Intset;
use kvengine_listpack::Listpack;
use kvengine_quicklist::Quicklist;
use kvengine_sds::Sds;
use kvengine_skiplist::Skiplist;
use kvengine_stream::Stream;

use crate::transitions::Encoding;

/// STRING body. `Embstr` is read-only once built: any mutating string
/// op on an `Embstr` must first convert to `Raw`.
pub enum StringBody {
    Raw(Sds),
    Embstr(Box<[u8]>),
    Int(i64),
}

impl StringBody {
    pub fn encoding(&self) -> Encoding {
        match self {
            StringBody::Raw(_) => Encoding::Raw,
            StringBody::Embstr(_) => Encoding::Embstr,
            StringBody::Int(_) => Encoding::Int,
        }
    }

    pub fn as_bytes_buf(&self) -> Vec<u8> {
        match self {
            StringBody::Raw(s) => s.as_bytes().to_vec(),
            StringBody::Embstr(b) => b.to_vec(),
            StringBody::Int(n) => n.to_string().into_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StringBody::Raw(s) => s.len(),
            StringBody::Embstr(b) => b.len(),
            StringBody::Int(n) => n.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SET body. Intset members are plain `i64`s kept sorted by
/// `kvengine-intset`; once any non-integer member is added (or the cap
/// is exceeded) the set promotes to a hash table keyed by member bytes
/// mapping to `()` (set membership only, no payload).
pub enum SetBody {
    Intset(Intset),
    Hashtable(Dict<Vec<u8>, (), SipHashBuilder>),
}

impl SetBody {
    pub fn encoding(&self) -> Encoding {
        match self {
            SetBody::Intset(_) => Encoding::Intset,
            SetBody::Hashtable(_) => Encoding::Hashtable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SetBody::Intset(s) => s.len(),
            SetBody::Hashtable(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HASH body. The ziplist form stores `[field, value, field, value, ...]`
/// flat in one listpack-style blob: this encoding is still named
/// "ZIPLIST" even though it is backed by a listpack here, matching how
/// `listpack` fully superseded `ziplist` for hash/zset bodies while
/// `ziplist` remains the quicklist node format.
pub enum HashBody {
    Ziplist(Listpack),
    Hashtable(Dict<Vec<u8>, Vec<u8>, SipHashBuilder>),
}

impl HashBody {
    pub fn encoding(&self) -> Encoding {
        match self {
            HashBody::Ziplist(_) => Encoding::Ziplist,
            HashBody::Hashtable(_) => Encoding::Hashtable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HashBody::Ziplist(lp) => lp.length() / 2,
            HashBody::Hashtable(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ZSET body. The scalable form is the skiplist+dict pair from
/// `zset.cpp` (`zs->zsl` for ordered/ranked access, `zs->dict` for O(1)
/// member -> score lookup); `member` is required to be valid UTF-8 by
/// `kvengine-skiplist`'s `impl Into<String>` element bound; binary-safe
/// zset members are a known open point, carried forward rather than
/// resolved (see DESIGN.md).
pub enum ZsetBody {
    Ziplist(Listpack),
    Skiplist {
        skiplist: Skiplist,
        dict: Dict<String, f64, SipHashBuilder>,
    },
}

impl ZsetBody {
    pub fn encoding(&self) -> Encoding {
        match self {
            ZsetBody::Ziplist(_) => Encoding::Ziplist,
            ZsetBody::Skiplist { .. } => Encoding::Skiplist,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ZsetBody::Ziplist(lp) => lp.length() / 2,
            ZsetBody::Skiplist { skiplist, .. } => skiplist.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The full `(type, encoding) -> shape` binding. LIST has
/// one body shape (`Quicklist` is always the live encoding; legacy
/// ziplist/linkedlist snapshots are a persistence-load concern, out of
/// scope here). STREAM likewise has exactly one shape.
pub enum ObjectBody {
    String(StringBody),
    List(Quicklist),
    Set(SetBody),
    Hash(HashBody),
    Zset(ZsetBody),
    Stream(Box<Stream>),
}

impl ObjectBody {
    pub fn encoding(&self) -> Encoding {
        match self {
            ObjectBody::String(s) => s.encoding(),
            ObjectBody::List(_) => Encoding::Quicklist,
            ObjectBody::Set(s) => s.encoding(),
            ObjectBody::Hash(h) => h.encoding(),
            ObjectBody::Zset(z) => z.encoding(),
            ObjectBody::Stream(_) => Encoding::Stream,
        }
    }
}

impl Default for SetBody {
    fn default() -> Self {
        SetBody::Intset(Intset::new())
    }
}

impl Default for HashBody {
    fn default() -> Self {
        HashBody::Ziplist(Listpack::new())
    }
}

impl Default for ZsetBody {
    fn default() -> Self {
        ZsetBody::Ziplist(Listpack::new())
    }
}
