//! Probabilistic multi-level ordered list with per-level span counters
//! — "zskiplist". Backs the scalable half of the
//! sorted-set encoding (`kvengine-object` pairs this with a `Dict` for
//! O(1) score lookup).
//!
//! Ordering is `(score, element)` with element byte-compare breaking
//! score ties, the classic `zskiplist` ordering rule. Nodes
//! live in an arena (`Vec<Option<Node>>`) with a free list for deleted
//! slots rather than raw pointers/`unsafe`, so level/forward/backward
//! links are plain indices.

use kvengine_util::Mt64;

pub const MAXLEVEL: usize = 32;
pub const P: f64 = 0.25;

const HEAD: usize = 0;

#[derive(Debug, Clone)]
struct Level {
    forward: Option<usize>,
    span: u64,
}

#[derive(Debug, Clone)]
struct Node {
    element: String,
    score: f64,
    backward: Option<usize>,
    levels: Vec<Level>,
}

/// Inclusive/exclusive score-range bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    fn gte_min(&self, v: f64) -> bool {
        if self.min_exclusive {
            v > self.min
        } else {
            v >= self.min
        }
    }

    fn lte_max(&self, v: f64) -> bool {
        if self.max_exclusive {
            v < self.max
        } else {
            v <= self.max
        }
    }
}

/// Lexicographical endpoint: `NegInf`/`PosInf` are the two string
/// sentinels, otherwise an inclusive/exclusive element
/// bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Inclusive(String),
    Exclusive(String),
}

#[derive(Debug, Clone)]
pub struct LexRange {
    pub min: LexBound,
    pub max: LexBound,
}

impl LexRange {
    fn gte_min(&self, v: &str) -> bool {
        match &self.min {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Inclusive(s) => v >= s.as_str(),
            LexBound::Exclusive(s) => v > s.as_str(),
        }
    }

    fn lte_max(&self, v: &str) -> bool {
        match &self.max {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Inclusive(s) => v <= s.as_str(),
            LexBound::Exclusive(s) => v < s.as_str(),
        }
    }
}

/// A probabilistic skiplist ordered by `(score, element)`.
pub struct Skiplist {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    tail: Option<usize>,
    length: usize,
    level: usize,
    rng: Mt64,
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::new()
    }
}

fn order_key(score: f64, ele: &str) -> (f64, &str) {
    (score, ele)
}

fn less_than(score_a: f64, ele_a: &str, score_b: f64, ele_b: &str) -> bool {
    order_key(score_a, ele_a) < order_key(score_b, ele_b)
}

impl Skiplist {
    pub fn new() -> Self {
        Self::with_seed(0xdead_beef_cafe_f00d)
    }

    pub fn with_seed(seed: u64) -> Self {
        let head = Node {
            element: String::new(),
            score: 0.0,
            backward: None,
            levels: (0..MAXLEVEL).map(|_| Level { forward: None, span: 0 }).collect(),
        };
        Skiplist {
            nodes: vec![Some(head)],
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
            rng: Mt64::new(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn node(&self, idx: usize) -> &Node {
        self.nodes[idx].as_ref().expect("dangling skiplist node index")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.nodes[idx].as_mut().expect("dangling skiplist node index")
    }

    /// `zslRandomLevel`: geometric distribution with `p = 0.25`, capped
    /// at `MAXLEVEL`.
    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while (self.rng.next_below(0x1_0000) as f64) < (P * 65536.0) && level < MAXLEVEL {
            level += 1;
        }
        level
    }

    fn alloc_node(&mut self, level: usize, score: f64, element: String) -> usize {
        let node = Node {
            element,
            score,
            backward: None,
            levels: (0..level).map(|_| Level { forward: None, span: 0 }).collect(),
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Descend from head, recording at each level the rightmost node not
    /// exceeding `(score, element)` plus the rank crossed to reach it.
    /// Shared by insert/delete/rank.
    fn search_path(&self, score: f64, element: &str) -> ([usize; MAXLEVEL], [u64; MAXLEVEL]) {
        let mut update = [HEAD; MAXLEVEL];
        let mut rank = [0u64; MAXLEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            if i + 1 < self.level {
                rank[i] = rank[i + 1];
            }
            loop {
                let fwd = self.node(x).levels[i].forward;
                match fwd {
                    Some(n) if less_than(self.node(n).score, &self.node(n).element, score, element) => {
                        rank[i] += self.node(x).levels[i].span;
                        x = n;
                    }
                    _ => break,
                }
            }
            update[i] = x;
        }
        (update, rank)
    }

    /// Insert `(score, element)`. Caller is responsible for ensuring the
    /// element isn't already present: the owning hash/skiplist pair
    /// checks the hash first.
    pub fn insert(&mut self, score: f64, element: impl Into<String>) {
        let element = element.into();
        let (mut update, mut rank) = self.search_path(score, &element);

        let level = self.random_level();
        if level > self.level {
            for item in update.iter_mut().take(level).skip(self.level) {
                *item = HEAD;
            }
            for r in rank.iter_mut().take(level).skip(self.level) {
                *r = 0;
            }
            for i in self.level..level {
                self.node_mut(HEAD).levels[i].span = self.length as u64;
            }
            self.level = level;
        }

        let x = self.alloc_node(level, score, element);
        for i in 0..level {
            let fwd = self.node(update[i]).levels[i].forward;
            self.node_mut(x).levels[i].forward = fwd;
            self.node_mut(update[i]).levels[i].forward = Some(x);

            let span_here = self.node(update[i]).levels[i].span;
            self.node_mut(x).levels[i].span = span_here - (rank[0] - rank[i]);
            self.node_mut(update[i]).levels[i].span = (rank[0] - rank[i]) + 1;
        }
        for i in level..self.level {
            self.node_mut(update[i]).levels[i].span += 1;
        }

        self.node_mut(x).backward = if update[0] == HEAD { None } else { Some(update[0]) };
        let next = self.node(x).levels[0].forward;
        if let Some(n) = next {
            self.node_mut(n).backward = Some(x);
        } else {
            self.tail = Some(x);
        }
        self.length += 1;
    }

    /// `zslDelete`: remove the `(score, element)` node if present.
    pub fn delete(&mut self, score: f64, element: &str) -> bool {
        let (update, _rank) = self.search_path(score, element);
        let candidate = self.node(update[0]).levels[0].forward;
        match candidate {
            Some(x) if self.node(x).score == score && self.node(x).element == element => {
                self.delete_node(x, &update);
                true
            }
            _ => false,
        }
    }

    fn delete_node(&mut self, x: usize, update: &[usize; MAXLEVEL]) {
        let x_level = self.node(x).levels.len();
        for i in 0..self.level {
            if i < x_level && self.node(update[i]).levels[i].forward == Some(x) {
                let x_span = self.node(x).levels[i].span;
                let u = &mut self.node_mut(update[i]).levels[i];
                u.span += x_span - 1;
                u.forward = self.node(x).levels[i].forward;
            } else {
                self.node_mut(update[i]).levels[i].span -= 1;
            }
        }
        let fwd0 = self.node(x).levels[0].forward;
        let back = self.node(x).backward;
        if let Some(n) = fwd0 {
            self.node_mut(n).backward = back;
        } else {
            self.tail = back;
        }
        while self.level > 1 && self.node(HEAD).levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }
        self.length -= 1;
        self.nodes[x] = None;
        self.free.push(x);
    }

    /// `zslUpdateScore`: if the new score preserves
    /// ordering against the immediate level-0 neighbours, mutate in
    /// place; otherwise delete and re-insert.
    pub fn update_score(&mut self, element: &str, old_score: f64, new_score: f64) -> bool {
        let (update, _rank) = self.search_path(old_score, element);
        let candidate = self.node(update[0]).levels[0].forward;
        let x = match candidate {
            Some(x) if self.node(x).score == old_score && self.node(x).element == element => x,
            _ => return false,
        };

        let prev_ok = match self.node(x).backward {
            None => true,
            Some(p) => self.node(p).score < new_score,
        };
        let next_ok = match self.node(x).levels[0].forward {
            None => true,
            Some(n) => new_score < self.node(n).score,
        };
        if prev_ok && next_ok {
            self.node_mut(x).score = new_score;
            return true;
        }

        let element = self.node(x).element.clone();
        self.delete_node(x, &update);
        self.insert(new_score, element);
        true
    }

    /// `zslGetRank`: 0-based rank of `(score, element)`, or `None` if
    /// absent. Spans count the step *onto* the matching node.
    pub fn rank(&self, score: f64, element: &str) -> Option<u64> {
        let mut rank = 0u64;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                match fwd {
                    Some(n)
                        if self.node(n).score < score
                            || (self.node(n).score == score && self.node(n).element.as_str() <= element) =>
                    {
                        rank += self.node(x).levels[i].span;
                        x = n;
                    }
                    _ => break,
                }
            }
            if x != HEAD && self.node(x).element == element {
                return Some(rank);
            }
        }
        None
    }

    /// `zslGetElementByRank`: 0-based rank lookup.
    pub fn by_rank(&self, n: u64) -> Option<(f64, &str)> {
        let target = n + 1; // internal walk accumulates 1-based rank like the C source
        let mut traversed = 0u64;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                match fwd {
                    Some(nxt) if traversed + self.node(x).levels[i].span <= target => {
                        traversed += self.node(x).levels[i].span;
                        x = nxt;
                    }
                    _ => break,
                }
            }
            if traversed == target {
                return Some((self.node(x).score, &self.node(x).element));
            }
        }
        None
    }

    fn is_in_score_range(&self, range: &ScoreRange) -> bool {
        if range.min > range.max || (range.min == range.max && (range.min_exclusive || range.max_exclusive)) {
            return false;
        }
        match self.tail {
            None => false,
            Some(t) => {
                if !range.gte_min(self.node(t).score) {
                    return false;
                }
                match self.node(HEAD).levels[0].forward {
                    None => false,
                    Some(h) => range.lte_max(self.node(h).score),
                }
            }
        }
    }

    /// `zslFirstInRange`.
    pub fn first_in_score_range(&self, range: &ScoreRange) -> Option<(f64, &str)> {
        if !self.is_in_score_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(n) = self.node(x).levels[i].forward {
                if range.gte_min(self.node(n).score) {
                    break;
                }
                x = n;
            }
        }
        let x = self.node(x).levels[0].forward?;
        if !range.lte_max(self.node(x).score) {
            return None;
        }
        Some((self.node(x).score, &self.node(x).element))
    }

    /// `zslLastInRange`.
    pub fn last_in_score_range(&self, range: &ScoreRange) -> Option<(f64, &str)> {
        if !self.is_in_score_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(n) = self.node(x).levels[i].forward {
                if !range.lte_max(self.node(n).score) {
                    break;
                }
                x = n;
            }
        }
        if x == HEAD {
            return None;
        }
        if !range.gte_min(self.node(x).score) {
            return None;
        }
        Some((self.node(x).score, &self.node(x).element))
    }

    fn is_in_lex_range(&self, range: &LexRange) -> bool {
        match (&range.min, &range.max) {
            (LexBound::Inclusive(a) | LexBound::Exclusive(a), LexBound::Inclusive(b) | LexBound::Exclusive(b))
                if a > b =>
            {
                return false
            }
            _ => {}
        }
        match self.tail {
            None => false,
            Some(t) => {
                if !range.gte_min(&self.node(t).element) {
                    return false;
                }
                match self.node(HEAD).levels[0].forward {
                    None => false,
                    Some(h) => range.lte_max(&self.node(h).element),
                }
            }
        }
    }

    /// `zslFirstInLexRange`.
    pub fn first_in_lex_range(&self, range: &LexRange) -> Option<(f64, &str)> {
        if !self.is_in_lex_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(n) = self.node(x).levels[i].forward {
                if range.gte_min(&self.node(n).element) {
                    break;
                }
                x = n;
            }
        }
        let x = self.node(x).levels[0].forward?;
        if !range.lte_max(&self.node(x).element) {
            return None;
        }
        Some((self.node(x).score, &self.node(x).element))
    }

    /// `zslLastInLexRange`.
    pub fn last_in_lex_range(&self, range: &LexRange) -> Option<(f64, &str)> {
        if !self.is_in_lex_range(range) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(n) = self.node(x).levels[i].forward {
                if !range.lte_max(&self.node(n).element) {
                    break;
                }
                x = n;
            }
        }
        if x == HEAD || !range.gte_min(&self.node(x).element) {
            return None;
        }
        Some((self.node(x).score, &self.node(x).element))
    }

    /// Forward, level-0 iteration in sorted order.
    pub fn iter(&self) -> SkiplistIter<'_> {
        SkiplistIter { skiplist: self, next: self.node(HEAD).levels[0].forward }
    }

    /// Verify `sum(span[i])` along any level-0-complete walk equals
    /// `length`. Used by tests/debug tooling.
    pub fn check_span_invariant(&self) -> bool {
        for i in 0..self.level {
            let mut total = 0u64;
            let mut x = HEAD;
            loop {
                total += self.node(x).levels[i].span;
                match self.node(x).levels[i].forward {
                    Some(n) => x = n,
                    None => break,
                }
            }
            if total != self.length as u64 {
                return false;
            }
        }
        true
    }
}

pub struct SkiplistIter<'a> {
    skiplist: &'a Skiplist,
    next: Option<usize>,
}

impl<'a> Iterator for SkiplistIter<'a> {
    type Item = (f64, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = self.skiplist.node(idx);
        self.next = node.levels[0].forward;
        Some((node.score, &node.element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_scenario_s3_rank_and_range() {
        let mut sl = Skiplist::with_seed(1);
        for (score, ele) in [(1.0, "a"), (2.0, "b"), (1.0, "c"), (3.0, "d"), (1.0, "aa")] {
            sl.insert(score, ele);
        }
        assert_eq!(sl.rank(1.0, "a"), Some(0));
        assert_eq!(sl.rank(1.0, "aa"), Some(1));
        assert_eq!(sl.rank(1.0, "c"), Some(2));
        assert_eq!(sl.rank(2.0, "b"), Some(3));
        assert_eq!(sl.rank(3.0, "d"), Some(4));
        assert_eq!(sl.by_rank(2).map(|(_, e)| e.to_string()), Some("c".to_string()));

        let range = ScoreRange { min: 1.0, max: 2.0, min_exclusive: false, max_exclusive: true };
        assert_eq!(sl.first_in_score_range(&range).map(|(_, e)| e.to_string()), Some("a".to_string()));
    }

    #[test]
    fn test_insert_delete_preserves_span_invariant() {
        let mut sl = Skiplist::with_seed(7);
        for i in 0..500 {
            sl.insert(i as f64, format!("el{i}"));
        }
        assert!(sl.check_span_invariant());
        for i in (0..500).step_by(3) {
            assert!(sl.delete(i as f64, &format!("el{i}")));
        }
        assert!(sl.check_span_invariant());
        assert_eq!(sl.len(), 500 - (0..500).step_by(3).count());
    }

    #[test]
    fn test_iter_is_sorted() {
        let mut sl = Skiplist::with_seed(3);
        for (score, ele) in [(5.0, "e"), (1.0, "a"), (3.0, "c"), (2.0, "b"), (4.0, "d")] {
            sl.insert(score, ele);
        }
        let got: Vec<_> = sl.iter().map(|(s, e)| (s, e.to_string())).collect();
        assert_eq!(
            got,
            vec![
                (1.0, "a".to_string()),
                (2.0, "b".to_string()),
                (3.0, "c".to_string()),
                (4.0, "d".to_string()),
                (5.0, "e".to_string()),
            ]
        );
    }

    #[test]
    fn test_update_score_in_place_vs_reinsert() {
        let mut sl = Skiplist::with_seed(11);
        sl.insert(1.0, "a");
        sl.insert(2.0, "b");
        sl.insert(3.0, "c");
        // "b" stays between "a" and "c": in-place mutation.
        assert!(sl.update_score("b", 2.0, 2.5));
        assert_eq!(sl.rank(2.5, "b"), Some(1));
        // Now push "b" past "c": requires delete + reinsert.
        assert!(sl.update_score("b", 2.5, 10.0));
        let got: Vec<_> = sl.iter().map(|(_, e)| e.to_string()).collect();
        assert_eq!(got, vec!["a".to_string(), "c".to_string(), "b".to_string()]);
        assert!(sl.check_span_invariant());
    }

    #[test]
    fn test_lex_range() {
        let mut sl = Skiplist::with_seed(4);
        for ele in ["a", "b", "c", "d", "e"] {
            sl.insert(0.0, ele);
        }
        let range = LexRange { min: LexBound::Inclusive("b".into()), max: LexBound::Exclusive("d".into()) };
        assert_eq!(sl.first_in_lex_range(&range).map(|(_, e)| e.to_string()), Some("b".to_string()));
        assert_eq!(sl.last_in_lex_range(&range).map(|(_, e)| e.to_string()), Some("c".to_string()));

        let all = LexRange { min: LexBound::NegInf, max: LexBound::PosInf };
        assert_eq!(sl.first_in_lex_range(&all).map(|(_, e)| e.to_string()), Some("a".to_string()));
        assert_eq!(sl.last_in_lex_range(&all).map(|(_, e)| e.to_string()), Some("e".to_string()));
    }

    #[test]
    fn test_empty_range_queries_return_none() {
        let sl = Skiplist::with_seed(2);
        let range = ScoreRange { min: 1.0, max: 2.0, min_exclusive: false, max_exclusive: false };
        assert_eq!(sl.first_in_score_range(&range), None);
        assert_eq!(sl.last_in_score_range(&range), None);
    }
}
