//! Compressed radix tree over byte-string keys.
//!
//! Backs sorted-set by-lex storage and the stream substrate's entry index.
//! Every node represents the point reached after consuming the path from the
//! root; its own `kv` slot (if any) is the value of the key that ends
//! *exactly there*, never past it. A `Compressed` node additionally owns a
//! run of bytes that must all match before its single child is reached; a
//! `Branch` node instead fans out over a sorted set of single-byte edges.
//!
//! Unlike the pointer-and-realloc node layout of the C ancestor, nodes here
//! are owned `Box`es and there is no packed on-disk representation: this
//! tree only ever exists in memory, so the compression only needs to keep
//! common byte runs from being represented one node per byte.

use kvengine_util::Mt64;

const INLINE_KEY_CAP: usize = 128;

/// A key buffer that stays on the stack for keys up to 128 bytes, matching
/// the inline key buffer the original rax reserves on its iterator stack.
#[derive(Clone)]
enum KeyBuf {
    Inline([u8; INLINE_KEY_CAP], usize),
    Heap(Vec<u8>),
}

impl KeyBuf {
    fn new() -> Self {
        KeyBuf::Inline([0u8; INLINE_KEY_CAP], 0)
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            KeyBuf::Inline(buf, len) => &buf[..*len],
            KeyBuf::Heap(v) => v.as_slice(),
        }
    }

    fn extended(&self, extra: &[u8]) -> KeyBuf {
        match self {
            KeyBuf::Inline(buf, len) => {
                if *len + extra.len() <= INLINE_KEY_CAP {
                    let mut next = *buf;
                    next[*len..*len + extra.len()].copy_from_slice(extra);
                    KeyBuf::Inline(next, *len + extra.len())
                } else {
                    let mut v = buf[..*len].to_vec();
                    v.extend_from_slice(extra);
                    KeyBuf::Heap(v)
                }
            }
            KeyBuf::Heap(v) => {
                let mut v = v.clone();
                v.extend_from_slice(extra);
                KeyBuf::Heap(v)
            }
        }
    }

    fn into_vec(self) -> Vec<u8> {
        match self {
            KeyBuf::Inline(buf, len) => buf[..len].to_vec(),
            KeyBuf::Heap(v) => v,
        }
    }
}

/// A value stored at a key, distinguishing an explicit null from absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaxValue<V> {
    Null,
    Value(V),
}

impl<V> RaxValue<V> {
    pub fn as_ref(&self) -> Option<&V> {
        match self {
            RaxValue::Null => None,
            RaxValue::Value(v) => Some(v),
        }
    }

    pub fn as_mut(&mut self) -> Option<&mut V> {
        match self {
            RaxValue::Null => None,
            RaxValue::Value(v) => Some(v),
        }
    }
}

enum Body<V> {
    Compressed { prefix: Vec<u8>, child: Box<Node<V>> },
    Branch { edges: Vec<u8>, children: Vec<Box<Node<V>>> },
}

struct Node<V> {
    kv: Option<RaxValue<V>>,
    body: Body<V>,
}

impl<V> Node<V> {
    fn empty_branch() -> Self {
        Node { kv: None, body: Body::Branch { edges: Vec::new(), children: Vec::new() } }
    }

    fn is_key(&self) -> bool {
        self.kv.is_some()
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Builds a brand-new chain of nodes for bytes that don't yet exist in the
/// tree, placing the key's value on the node whose arrival position is the
/// end of `remainder`.
fn make_chain<V>(remainder: &[u8], value: RaxValue<V>) -> Node<V> {
    if remainder.is_empty() {
        Node { kv: Some(value), body: Body::Branch { edges: Vec::new(), children: Vec::new() } }
    } else {
        Node {
            kv: None,
            body: Body::Compressed {
                prefix: remainder.to_vec(),
                child: Box::new(Node { kv: Some(value), body: Body::Branch { edges: Vec::new(), children: Vec::new() } }),
            },
        }
    }
}

fn insert_into<V>(node: &mut Node<V>, key: &[u8], value: RaxValue<V>) -> Option<RaxValue<V>> {
    if key.is_empty() {
        return node.kv.replace(value);
    }
    match &mut node.body {
        Body::Branch { edges, children } => {
            let b = key[0];
            match edges.binary_search(&b) {
                Ok(i) => insert_into(&mut children[i], &key[1..], value),
                Err(i) => {
                    edges.insert(i, b);
                    children.insert(i, Box::new(make_chain(&key[1..], value)));
                    None
                }
            }
        }
        Body::Compressed { prefix, child } => {
            let common = common_prefix_len(prefix, key);
            if common == prefix.len() {
                insert_into(child, &key[common..], value)
            } else {
                split_compressed(node, common, key, value);
                None
            }
        }
    }
}

/// Splits a compressed node's prefix at `common` bytes, handling both the
/// "key runs out mid-prefix" case and the "byte mismatch mid-prefix" case.
/// `node`'s own arrival-depth key, if any, stays with whichever replacement
/// node occupies that same depth (the trimmed node, or the split node
/// itself when the mismatch is at the very first byte).
fn split_compressed<V>(node: &mut Node<V>, common: usize, key: &[u8], value: RaxValue<V>) {
    let (prefix, child) = match std::mem::replace(&mut node.body, Body::Branch { edges: Vec::new(), children: Vec::new() }) {
        Body::Compressed { prefix, child } => (prefix, child),
        Body::Branch { .. } => unreachable!("split_compressed called on a non-compressed node"),
    };
    let old_kv = node.kv.take();

    if common == key.len() {
        // Algorithm 2: the new key ends strictly inside the old prefix.
        let postfix = Node {
            kv: Some(value),
            body: Body::Compressed { prefix: prefix[common..].to_vec(), child },
        };
        node.kv = old_kv;
        node.body = Body::Compressed { prefix: prefix[..common].to_vec(), child: Box::new(postfix) };
        return;
    }

    // Algorithm 1: a genuine byte mismatch at position `common`.
    let old_edge = prefix[common];
    let new_edge = key[common];
    let postfix_rest = &prefix[common + 1..];
    let postfix_node = if postfix_rest.is_empty() {
        *child
    } else {
        Node { kv: None, body: Body::Compressed { prefix: postfix_rest.to_vec(), child } }
    };
    let new_node = make_chain(&key[common + 1..], value);

    let (edges, children) = if old_edge < new_edge {
        (vec![old_edge, new_edge], vec![Box::new(postfix_node), Box::new(new_node)])
    } else {
        (vec![new_edge, old_edge], vec![Box::new(new_node), Box::new(postfix_node)])
    };
    let split_node = Node { kv: None, body: Body::Branch { edges, children } };

    if common == 0 {
        node.kv = old_kv;
        node.body = split_node.body;
    } else {
        node.kv = old_kv;
        node.body = Body::Compressed { prefix: prefix[..common].to_vec(), child: Box::new(split_node) };
    }
}

fn lookup<'a, V>(node: &'a Node<V>, key: &[u8]) -> Option<&'a RaxValue<V>> {
    if key.is_empty() {
        return node.kv.as_ref();
    }
    match &node.body {
        Body::Branch { edges, children } => {
            let b = key[0];
            edges.binary_search(&b).ok().and_then(|i| lookup(&children[i], &key[1..]))
        }
        Body::Compressed { prefix, child } => {
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                lookup(child, &key[prefix.len()..])
            } else {
                None
            }
        }
    }
}

fn lookup_mut<'a, V>(node: &'a mut Node<V>, key: &[u8]) -> Option<&'a mut RaxValue<V>> {
    if key.is_empty() {
        return node.kv.as_mut();
    }
    match &mut node.body {
        Body::Branch { edges, children } => {
            let b = key[0];
            edges.binary_search(&b).ok().and_then(move |i| lookup_mut(&mut children[i], &key[1..]))
        }
        Body::Compressed { prefix, child } => {
            if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                lookup_mut(child, &key[prefix.len()..])
            } else {
                None
            }
        }
    }
}

/// True when a subtree has no stored key anywhere in it: nothing to
/// relocate, nothing worth keeping a path alive for.
fn is_dead<V>(node: &Node<V>) -> bool {
    if node.kv.is_some() {
        return false;
    }
    match &node.body {
        Body::Branch { edges, .. } => edges.is_empty(),
        Body::Compressed { child, .. } => is_dead(child),
    }
}

/// Folds runs of non-key single-child nodes back into one compressed node,
/// undoing exactly the splits that `split_compressed` could have performed.
/// Only operates on a node whose own `kv` slot is already `None`: a key
/// node is a boundary that must stay addressable on its own.
fn collapse<V>(node: &mut Node<V>) {
    loop {
        if node.kv.is_some() {
            return;
        }
        match &mut node.body {
            Body::Branch { edges, children } if edges.len() == 1 => {
                let b = edges[0];
                let only_child = children.remove(0);
                edges.clear();
                node.body = Body::Compressed { prefix: vec![b], child: only_child };
            }
            Body::Compressed { prefix, child } => match &mut child.body {
                Body::Compressed { .. } if child.kv.is_none() => {
                    let inner = std::mem::replace(child.as_mut(), Node::empty_branch());
                    if let Body::Compressed { prefix: cp, child: cc } = inner.body {
                        prefix.extend(cp);
                        *child = cc;
                    }
                }
                Body::Branch { edges: ce, .. } if child.kv.is_none() && ce.len() == 1 => {
                    let inner = std::mem::replace(child.as_mut(), Node::empty_branch());
                    if let Body::Branch { mut edges, mut children } = inner.body {
                        let b = edges.remove(0);
                        let only = children.remove(0);
                        prefix.push(b);
                        *child = only;
                    }
                }
                _ => return,
            },
            _ => return,
        }
    }
}

fn delete_into<V>(node: &mut Node<V>, key: &[u8]) -> Option<RaxValue<V>> {
    if key.is_empty() {
        let old = node.kv.take();
        if old.is_some() {
            collapse(node);
        }
        return old;
    }
    let result = match &mut node.body {
        Body::Branch { edges, children } => {
            let b = key[0];
            match edges.binary_search(&b) {
                Err(_) => None,
                Ok(i) => {
                    let r = delete_into(&mut children[i], &key[1..]);
                    if r.is_some() && is_dead(&children[i]) {
                        edges.remove(i);
                        children.remove(i);
                    }
                    r
                }
            }
        }
        Body::Compressed { prefix, child } => {
            if key.len() < prefix.len() || &key[..prefix.len()] != prefix.as_slice() {
                None
            } else {
                delete_into(child, &key[prefix.len()..])
            }
        }
    };
    if result.is_some() {
        collapse(node);
    }
    result
}

enum Move {
    Stop,
    Ascend,
    Descend(usize),
}

/// Compressed radix tree mapping arbitrary byte strings to values.
pub struct Rax<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for Rax<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Rax<V> {
    pub fn new() -> Self {
        Rax { root: Node::empty_branch(), len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &[u8]) -> Option<&RaxValue<V>> {
        lookup(&self.root, key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn get_value(&self, key: &[u8]) -> Option<&V> {
        self.get(key).and_then(RaxValue::as_ref)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut RaxValue<V>> {
        lookup_mut(&mut self.root, key)
    }

    pub fn insert(&mut self, key: &[u8], value: V) -> Option<RaxValue<V>> {
        self.insert_raw(key, RaxValue::Value(value))
    }

    pub fn insert_null(&mut self, key: &[u8]) -> Option<RaxValue<V>> {
        self.insert_raw(key, RaxValue::Null)
    }

    fn insert_raw(&mut self, key: &[u8], value: RaxValue<V>) -> Option<RaxValue<V>> {
        let old = insert_into(&mut self.root, key, value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<RaxValue<V>> {
        let old = delete_into(&mut self.root, key);
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// In-order traversal over every stored key, using an explicit stack
    /// rather than call-stack recursion so depth is bounded by key length
    /// only in heap allocations, never in Rust stack frames.
    pub fn iter(&self) -> RaxIter<'_, V> {
        let mut stack = Vec::new();
        stack.push((&self.root, KeyBuf::new()));
        RaxIter { stack }
    }

    /// Walks `steps` random hops from the root, descending into a uniformly
    /// chosen child, stopping early at a key node with extra weight (the
    /// original's bias toward landing on keys), or ascending back toward
    /// the root to escape a dead end, returning the key/value pair it ends
    /// on if that position holds one.
    pub fn random_walk(&self, steps: usize, rng: &mut Mt64) -> Option<(Vec<u8>, &V)> {
        let mut path: Vec<&Node<V>> = vec![&self.root];
        let mut key_lens: Vec<usize> = vec![0];
        let mut key: Vec<u8> = Vec::new();

        for _ in 0..steps {
            let node = *path.last().unwrap();
            let mut moves = Vec::new();
            if node.is_key() {
                moves.push(Move::Stop);
                moves.push(Move::Stop);
            }
            let child_count = match &node.body {
                Body::Compressed { .. } => 1,
                Body::Branch { edges, .. } => edges.len(),
            };
            for i in 0..child_count {
                moves.push(Move::Descend(i));
            }
            if path.len() > 1 {
                moves.push(Move::Ascend);
            }
            if moves.is_empty() {
                break;
            }
            let pick = rng.next_below(moves.len() as u64) as usize;
            match &moves[pick] {
                Move::Stop => break,
                Move::Ascend => {
                    path.pop();
                    let prev_len = key_lens.pop().unwrap();
                    key.truncate(prev_len);
                }
                Move::Descend(i) => match &node.body {
                    Body::Compressed { prefix, child } => {
                        key_lens.push(key.len());
                        key.extend_from_slice(prefix);
                        path.push(child);
                    }
                    Body::Branch { edges, children } => {
                        key_lens.push(key.len());
                        key.push(edges[*i]);
                        path.push(&children[*i]);
                    }
                },
            }
        }
        let node = *path.last().unwrap();
        node.kv.as_ref().and_then(RaxValue::as_ref).map(|v| (key, v))
    }

    /// Positions a cursor at the first stored key satisfying `op` relative
    /// to `key` (`key` is ignored for `First`/`Last`). The cursor can then
    /// be driven forward or backward in sorted order with `next`/`prev`.
    pub fn seek(&self, op: SeekOp, key: &[u8]) -> RaxCursor<'_, V> {
        let found = match op {
            SeekOp::Gt => min_gt(&self.root, key, &mut Vec::new()),
            SeekOp::Ge => min_ge(&self.root, key),
            SeekOp::Lt => max_lt(&self.root, key, &mut Vec::new()),
            SeekOp::Le => max_le(&self.root, key),
            SeekOp::Eq => lookup(&self.root, key).map(|v| (key.to_vec(), v)),
            SeekOp::First => min_overall(&self.root, &mut Vec::new()),
            SeekOp::Last => max_overall(&self.root, &mut Vec::new()),
        };
        let anchor = match (&found, op) {
            (Some((k, _)), _) => Some(k.clone()),
            (None, SeekOp::First) | (None, SeekOp::Last) => None,
            (None, _) => Some(key.to_vec()),
        };
        RaxCursor { root: &self.root, anchor, current: found }
    }
}

/// Which stored key a `seek` should land a cursor on, relative to the
/// given key: the six relational operators plus the two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    First,
    Last,
}

impl SeekOp {
    /// Maps the conventional `>`, `>=`, `<`, `<=`, `=`, `^`, `$` seek
    /// operator symbols onto their `SeekOp` variant.
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            ">" => Some(SeekOp::Gt),
            ">=" => Some(SeekOp::Ge),
            "<" => Some(SeekOp::Lt),
            "<=" => Some(SeekOp::Le),
            "=" => Some(SeekOp::Eq),
            "^" => Some(SeekOp::First),
            "$" => Some(SeekOp::Last),
            _ => None,
        }
    }
}

/// Smallest key stored anywhere at or below `node`, with `acc` holding the
/// key bytes accumulated on the path from the root down to `node`.
fn min_overall<'a, V>(node: &'a Node<V>, acc: &mut Vec<u8>) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    if let Some(v) = &node.kv {
        return Some((acc.clone(), v));
    }
    match &node.body {
        Body::Compressed { prefix, child } => {
            acc.extend_from_slice(prefix);
            let r = min_overall(child, acc);
            acc.truncate(acc.len() - prefix.len());
            r
        }
        Body::Branch { edges, children } => {
            for i in 0..edges.len() {
                acc.push(edges[i]);
                let r = min_overall(&children[i], acc);
                acc.pop();
                if r.is_some() {
                    return r;
                }
            }
            None
        }
    }
}

/// Largest key stored anywhere at or below `node`.
fn max_overall<'a, V>(node: &'a Node<V>, acc: &mut Vec<u8>) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    match &node.body {
        Body::Compressed { prefix, child } => {
            acc.extend_from_slice(prefix);
            let r = max_overall(child, acc);
            acc.truncate(acc.len() - prefix.len());
            if r.is_some() {
                return r;
            }
        }
        Body::Branch { edges, children } => {
            for i in (0..edges.len()).rev() {
                acc.push(edges[i]);
                let r = max_overall(&children[i], acc);
                acc.pop();
                if r.is_some() {
                    return r;
                }
            }
        }
    }
    node.kv.as_ref().map(|v| (acc.clone(), v))
}

/// Smallest stored key strictly greater than `bound`, where `bound` is the
/// suffix not yet matched relative to `node`'s own arrival point (`acc`
/// holds the prefix already matched). A node's own `kv`, if any, is never
/// itself a candidate here: whenever `bound` is non-empty at this call,
/// `acc` (the node's arrival key) is a strict prefix of the original
/// bound and therefore smaller than it, not greater.
fn min_gt<'a, V>(node: &'a Node<V>, bound: &[u8], acc: &mut Vec<u8>) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    if bound.is_empty() {
        return match &node.body {
            Body::Compressed { prefix, child } => {
                acc.extend_from_slice(prefix);
                let r = min_overall(child, acc);
                acc.truncate(acc.len() - prefix.len());
                r
            }
            Body::Branch { edges, children } => {
                for i in 0..edges.len() {
                    acc.push(edges[i]);
                    let r = min_overall(&children[i], acc);
                    acc.pop();
                    if r.is_some() {
                        return r;
                    }
                }
                None
            }
        };
    }
    match &node.body {
        Body::Compressed { prefix, child } => {
            let n = bound.len().min(prefix.len());
            for i in 0..n {
                match prefix[i].cmp(&bound[i]) {
                    std::cmp::Ordering::Greater => {
                        acc.extend_from_slice(prefix);
                        let r = min_overall(child, acc);
                        acc.truncate(acc.len() - prefix.len());
                        return r;
                    }
                    std::cmp::Ordering::Less => return None,
                    std::cmp::Ordering::Equal => {}
                }
            }
            if prefix.len() > bound.len() {
                acc.extend_from_slice(prefix);
                let r = min_overall(child, acc);
                acc.truncate(acc.len() - prefix.len());
                r
            } else {
                acc.extend_from_slice(prefix);
                let r = min_gt(child, &bound[prefix.len()..], acc);
                acc.truncate(acc.len() - prefix.len());
                r
            }
        }
        Body::Branch { edges, children } => {
            let b = bound[0];
            if let Ok(i) = edges.binary_search(&b) {
                acc.push(b);
                let r = min_gt(&children[i], &bound[1..], acc);
                acc.pop();
                if r.is_some() {
                    return r;
                }
            }
            if let Some(i) = edges.iter().position(|&e| e > b) {
                acc.push(edges[i]);
                let r = min_overall(&children[i], acc);
                acc.pop();
                return r;
            }
            None
        }
    }
}

/// Largest stored key strictly less than `bound`. Unlike `min_gt`, a
/// node's own `kv` is always a valid fallback candidate here whenever
/// `bound` is non-empty at this call (the node's arrival key is then a
/// strict, and therefore smaller, prefix of `bound`); it's only used when
/// nothing deeper in the subtree also qualifies.
fn max_lt<'a, V>(node: &'a Node<V>, bound: &[u8], acc: &mut Vec<u8>) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    if bound.is_empty() {
        return None;
    }
    let deeper = match &node.body {
        Body::Compressed { prefix, child } => {
            let n = bound.len().min(prefix.len());
            let mut divergence = None;
            for i in 0..n {
                match prefix[i].cmp(&bound[i]) {
                    std::cmp::Ordering::Less => {
                        divergence = Some(true);
                        break;
                    }
                    std::cmp::Ordering::Greater => {
                        divergence = Some(false);
                        break;
                    }
                    std::cmp::Ordering::Equal => {}
                }
            }
            match divergence {
                Some(true) => {
                    acc.extend_from_slice(prefix);
                    let r = max_overall(child, acc);
                    acc.truncate(acc.len() - prefix.len());
                    r
                }
                Some(false) => None,
                None => {
                    if prefix.len() > bound.len() {
                        None
                    } else {
                        acc.extend_from_slice(prefix);
                        let r = max_lt(child, &bound[prefix.len()..], acc);
                        acc.truncate(acc.len() - prefix.len());
                        r
                    }
                }
            }
        }
        Body::Branch { edges, children } => {
            let b = bound[0];
            let mut r = None;
            if let Ok(i) = edges.binary_search(&b) {
                acc.push(b);
                r = max_lt(&children[i], &bound[1..], acc);
                acc.pop();
            }
            if r.is_none() {
                if let Some(i) = edges.iter().rposition(|&e| e < b) {
                    acc.push(edges[i]);
                    r = max_overall(&children[i], acc);
                    acc.pop();
                }
            }
            r
        }
    };
    deeper.or_else(|| node.kv.as_ref().map(|v| (acc.clone(), v)))
}

fn min_ge<'a, V>(root: &'a Node<V>, bound: &[u8]) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    if let Some(v) = lookup(root, bound) {
        return Some((bound.to_vec(), v));
    }
    min_gt(root, bound, &mut Vec::new())
}

fn max_le<'a, V>(root: &'a Node<V>, bound: &[u8]) -> Option<(Vec<u8>, &'a RaxValue<V>)> {
    if let Some(v) = lookup(root, bound) {
        return Some((bound.to_vec(), v));
    }
    max_lt(root, bound, &mut Vec::new())
}

/// A seekable, bidirectional cursor over stored keys in sorted order.
/// `next`/`prev` each do a fresh root-to-leaf descent bounded by the
/// current anchor key rather than retaining a persistent path stack, so
/// repositioning after an external mutation is never a correctness
/// concern (there is none: `Rax` offers no interior mutability), only a
/// recomputation one.
pub struct RaxCursor<'a, V> {
    root: &'a Node<V>,
    anchor: Option<Vec<u8>>,
    current: Option<(Vec<u8>, &'a RaxValue<V>)>,
}

impl<'a, V> RaxCursor<'a, V> {
    /// The key/value pair the cursor is presently on, if any.
    pub fn current(&self) -> Option<(&[u8], &'a RaxValue<V>)> {
        self.current.as_ref().map(|(k, v)| (k.as_slice(), *v))
    }

    /// Advances to the smallest stored key greater than the current
    /// position (or the smallest key overall, if the cursor is
    /// unanchored) and returns it.
    pub fn next(&mut self) -> Option<(&[u8], &'a RaxValue<V>)> {
        let found = match &self.anchor {
            Some(b) => min_gt(self.root, b, &mut Vec::new()),
            None => min_overall(self.root, &mut Vec::new()),
        };
        if let Some((k, _)) = &found {
            self.anchor = Some(k.clone());
        }
        self.current = found;
        self.current()
    }

    /// Advances to the largest stored key smaller than the current
    /// position (or the largest key overall, if the cursor is
    /// unanchored) and returns it.
    pub fn prev(&mut self) -> Option<(&[u8], &'a RaxValue<V>)> {
        let found = match &self.anchor {
            Some(b) => max_lt(self.root, b, &mut Vec::new()),
            None => max_overall(self.root, &mut Vec::new()),
        };
        if let Some((k, _)) = &found {
            self.anchor = Some(k.clone());
        }
        self.current = found;
        self.current()
    }
}

pub struct RaxIter<'a, V> {
    stack: Vec<(&'a Node<V>, KeyBuf)>,
}

impl<'a, V> Iterator for RaxIter<'a, V> {
    type Item = (Vec<u8>, &'a RaxValue<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (node, key) = self.stack.pop()?;
            match &node.body {
                Body::Compressed { prefix, child } => {
                    self.stack.push((child.as_ref(), key.extended(prefix)));
                }
                Body::Branch { edges, children } => {
                    for i in (0..edges.len()).rev() {
                        self.stack.push((children[i].as_ref(), key.extended(&[edges[i]])));
                    }
                }
            }
            if let Some(value) = &node.kv {
                return Some((key.into_vec(), value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn scenario_s4_compressed_split_on_mismatch() {
        let mut rax = Rax::new();
        assert_eq!(rax.insert(b"annibale", 1), None);
        assert_eq!(rax.insert(b"annientare", 2), None);

        assert_eq!(rax.get(b"annibale").and_then(RaxValue::as_ref), Some(&1));
        assert_eq!(rax.get(b"annientare").and_then(RaxValue::as_ref), Some(&2));
        assert_eq!(rax.get(b"annib"), None);
        assert_eq!(rax.len(), 2);

        let entries: Vec<_> = rax.iter().map(|(k, v)| (k, v.as_ref().copied())).collect();
        assert_eq!(
            entries,
            vec![(b"annibale".to_vec(), Some(1)), (b"annientare".to_vec(), Some(2))]
        );
    }

    #[test_log::test]
    fn algorithm_2_key_ends_inside_existing_prefix() {
        let mut rax = Rax::new();
        rax.insert(b"annibale", 1);
        // "anni" ends strictly inside the compressed prefix "annibale".
        assert_eq!(rax.insert(b"anni", 2), None);

        assert_eq!(rax.get(b"anni").and_then(RaxValue::as_ref), Some(&2));
        assert_eq!(rax.get(b"annibale").and_then(RaxValue::as_ref), Some(&1));
        assert_eq!(rax.len(), 2);
    }

    #[test_log::test]
    fn overwrite_returns_previous_value() {
        let mut rax = Rax::new();
        rax.insert(b"key", 1);
        let old = rax.insert(b"key", 2);
        assert_eq!(old.and_then(|v| v.as_ref().copied()), Some(1));
        assert_eq!(rax.get(b"key").and_then(RaxValue::as_ref), Some(&2));
        assert_eq!(rax.len(), 1);
    }

    #[test_log::test]
    fn insert_null_is_distinct_from_absence() {
        let mut rax: Rax<i32> = Rax::new();
        rax.insert_null(b"nope");
        assert!(rax.contains_key(b"nope"));
        assert_eq!(rax.get(b"nope"), Some(&RaxValue::Null));
        assert_eq!(rax.get(b"nope").and_then(RaxValue::as_ref), None);
    }

    #[test_log::test]
    fn delete_recompresses_single_child_chains() {
        let mut rax = Rax::new();
        rax.insert(b"annibale", 1);
        rax.insert(b"annientare", 2);
        assert_eq!(rax.remove(b"annientare").and_then(|v| v.as_ref().copied()), Some(2));
        assert_eq!(rax.get(b"annibale").and_then(RaxValue::as_ref), Some(&1));
        assert_eq!(rax.get(b"annientare"), None);
        assert_eq!(rax.len(), 1);

        let entries: Vec<_> = rax.iter().map(|(k, _)| k).collect();
        assert_eq!(entries, vec![b"annibale".to_vec()]);
    }

    #[test_log::test]
    fn delete_every_key_leaves_empty_tree() {
        let mut rax = Rax::new();
        let keys: &[&[u8]] = &[b"a", b"ab", b"abc", b"b", b"ba", b"bb"];
        for (i, k) in keys.iter().enumerate() {
            rax.insert(k, i as i32);
        }
        for k in keys {
            assert!(rax.remove(k).is_some());
        }
        assert!(rax.is_empty());
        assert_eq!(rax.iter().count(), 0);
        for k in keys {
            assert!(!rax.contains_key(k));
        }
    }

    #[test_log::test]
    fn iteration_is_lexicographically_sorted() {
        let mut rax = Rax::new();
        let keys: &[&[u8]] = &[b"banana", b"band", b"can", b"a", b"ant", b"an"];
        for (i, k) in keys.iter().enumerate() {
            rax.insert(k, i as i32);
        }
        let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        expected.sort();
        let got: Vec<Vec<u8>> = rax.iter().map(|(k, _)| k).collect();
        assert_eq!(got, expected);
    }

    #[test_log::test]
    fn empty_key_is_a_valid_key() {
        let mut rax = Rax::new();
        rax.insert(b"", 7);
        rax.insert(b"x", 8);
        assert_eq!(rax.get(b"").and_then(RaxValue::as_ref), Some(&7));
        let got: Vec<Vec<u8>> = rax.iter().map(|(k, _)| k).collect();
        assert_eq!(got, vec![b"".to_vec(), b"x".to_vec()]);
    }

    #[test_log::test]
    fn random_walk_lands_on_a_real_key() {
        let mut rax = Rax::new();
        for i in 0..64u32 {
            rax.insert(format!("key{:04}", i).as_bytes(), i);
        }
        let mut rng = Mt64::new(42);
        for _ in 0..50 {
            if let Some((key, value)) = rax.random_walk(64, &mut rng) {
                assert_eq!(rax.get(&key).and_then(RaxValue::as_ref), Some(value));
            }
        }
    }

    #[test_log::test]
    fn long_key_exercises_heap_fallback_buffer() {
        let mut rax = Rax::new();
        let long_key = vec![b'x'; 200];
        rax.insert(&long_key, 1);
        assert_eq!(rax.get(&long_key).and_then(RaxValue::as_ref), Some(&1));
        let got: Vec<Vec<u8>> = rax.iter().map(|(k, _)| k).collect();
        assert_eq!(got, vec![long_key]);
    }

    fn sample_rax() -> Rax<i32> {
        let mut rax = Rax::new();
        for (i, k) in [b"banana".as_slice(), b"band", b"bandana", b"can", b"a", b"ant", b"an"]
            .into_iter()
            .enumerate()
        {
            rax.insert(k, i as i32);
        }
        rax
    }

    #[test_log::test]
    fn seek_op_from_symbol_covers_all_seven_operators() {
        assert_eq!(SeekOp::from_symbol(">"), Some(SeekOp::Gt));
        assert_eq!(SeekOp::from_symbol(">="), Some(SeekOp::Ge));
        assert_eq!(SeekOp::from_symbol("<"), Some(SeekOp::Lt));
        assert_eq!(SeekOp::from_symbol("<="), Some(SeekOp::Le));
        assert_eq!(SeekOp::from_symbol("="), Some(SeekOp::Eq));
        assert_eq!(SeekOp::from_symbol("^"), Some(SeekOp::First));
        assert_eq!(SeekOp::from_symbol("$"), Some(SeekOp::Last));
        assert_eq!(SeekOp::from_symbol("~"), None);
    }

    #[test_log::test]
    fn seek_gt_lands_on_strict_successor() {
        let rax = sample_rax();
        let mut cur = rax.seek(SeekOp::Gt, b"band");
        assert_eq!(cur.current().map(|(k, _)| k.to_vec()), Some(b"bandana".to_vec()));
        assert_eq!(cur.next().map(|(k, _)| k.to_vec()), Some(b"banana".to_vec()));
        assert_eq!(cur.next().map(|(k, _)| k.to_vec()), Some(b"can".to_vec()));
        assert_eq!(cur.next(), None);
    }

    #[test_log::test]
    fn seek_ge_includes_exact_match() {
        let rax = sample_rax();
        let cur = rax.seek(SeekOp::Ge, b"band");
        assert_eq!(cur.current().map(|(k, _)| k.to_vec()), Some(b"band".to_vec()));
    }

    #[test_log::test]
    fn seek_lt_lands_on_strict_predecessor() {
        let rax = sample_rax();
        let mut cur = rax.seek(SeekOp::Lt, b"band");
        assert_eq!(cur.current().map(|(k, _)| k.to_vec()), Some(b"an".to_vec()));
        assert_eq!(cur.prev().map(|(k, _)| k.to_vec()), Some(b"ant".to_vec()));
        assert_eq!(cur.prev().map(|(k, _)| k.to_vec()), Some(b"a".to_vec()));
        assert_eq!(cur.prev(), None);
    }

    #[test_log::test]
    fn seek_le_includes_exact_match() {
        let rax = sample_rax();
        let cur = rax.seek(SeekOp::Le, b"band");
        assert_eq!(cur.current().map(|(k, _)| k.to_vec()), Some(b"band".to_vec()));
    }

    #[test_log::test]
    fn seek_eq_missing_key_anchors_without_a_current() {
        let rax = sample_rax();
        let mut cur = rax.seek(SeekOp::Eq, b"bandwidth");
        assert_eq!(cur.current(), None);
        // Even though the seek target itself doesn't exist, its anchor is
        // still meaningful for a subsequent directional step.
        assert_eq!(cur.next().map(|(k, _)| k.to_vec()), Some(b"can".to_vec()));
    }

    #[test_log::test]
    fn seek_first_and_last_bound_the_sorted_order() {
        let rax = sample_rax();
        let mut expected: Vec<Vec<u8>> = rax.iter().map(|(k, _)| k).collect();
        expected.sort();

        let mut fwd = rax.seek(SeekOp::First, b"");
        let mut got = vec![fwd.current().unwrap().0.to_vec()];
        while let Some((k, _)) = fwd.next() {
            got.push(k.to_vec());
        }
        assert_eq!(got, expected);

        let mut back = rax.seek(SeekOp::Last, b"");
        let mut got_rev = vec![back.current().unwrap().0.to_vec()];
        while let Some((k, _)) = back.prev() {
            got_rev.push(k.to_vec());
        }
        got_rev.reverse();
        assert_eq!(got_rev, expected);
    }

    #[test_log::test]
    fn cursor_can_reverse_direction_mid_walk() {
        let rax = sample_rax();
        let mut cur = rax.seek(SeekOp::First, b"");
        let first = cur.current().unwrap().0.to_vec();
        cur.next();
        cur.next();
        let forward_key = cur.current().unwrap().0.to_vec();
        // Walk back down past the seek's own landing point.
        let mut last_seen = forward_key.clone();
        loop {
            match cur.prev() {
                Some((k, _)) => last_seen = k.to_vec(),
                None => break,
            }
        }
        assert_eq!(last_seen, first);
    }

    #[test_log::test]
    fn random_walk_can_ascend_out_of_a_dead_end() {
        let mut rax = Rax::new();
        rax.insert(b"a", 1);
        rax.insert(b"ab", 2);
        // With only two keys on one chain, a walk long enough to bounce off
        // the bottom and need to backtrack must still land on a real key.
        let mut hits = 0;
        for seed in 0..100u64 {
            let mut rng = Mt64::new(seed);
            if rax.random_walk(12, &mut rng).is_some() {
                hits += 1;
            }
        }
        assert!(hits > 0);
    }
}
