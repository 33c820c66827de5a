//! Skip-List Sorted Set
//!
//! [`SkipList`] keeps `(member, score)` nodes ordered by score, with the
//! member as a tie-break. Nodes live in an arena (`Vec<Node>`) and link to
//! each other by index; index `0` is the header sentinel.
//!
//! ```text
//! level 2: HEAD ─────────────────────► c ─────────────► NIL
//! level 1: HEAD ─────► a ────────────► c ─────────────► NIL
//! level 0: HEAD ─────► a ────► b ────► c ────► d ─────► NIL
//! ```
//!
//! The skip list alone never deduplicates members and removes only on an
//! exact score match. [`SortedSet`] pairs it with a member → score map so
//! member lookups are O(1) and each member appears once.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Highest level a node can reach.
pub const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one level up.
const P: f64 = 0.25;

const HEAD: usize = 0;
const NIL: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Node {
    member: Bytes,
    score: f64,
    forward: Vec<usize>,
}

/// Probabilistic multi-level list ordered by `(score, member)`.
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    level: usize,
    len: usize,
}

fn random_level() -> usize {
    let mut level = 1;
    while level < MAX_LEVEL && rand::random::<f64>() < P {
        level += 1;
    }
    level
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    pub fn new() -> Self {
        let head = Node {
            member: Bytes::new(),
            score: 0.0,
            forward: vec![NIL; MAX_LEVEL],
        };
        Self {
            nodes: vec![head],
            free: Vec::new(),
            level: 1,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels currently in use.
    pub fn level(&self) -> usize {
        self.level
    }

    /// True if the node at `idx` sorts strictly before `(score, member)`.
    fn precedes(&self, idx: usize, score: f64, member: &[u8]) -> bool {
        let node = &self.nodes[idx];
        match node.score.total_cmp(&score) {
            Ordering::Less => true,
            Ordering::Equal => node.member.as_ref() < member,
            Ordering::Greater => false,
        }
    }

    /// Walks down from the top level, recording the last node before
    /// `(score, member)` on each level.
    fn find_update(&self, score: f64, member: &[u8]) -> [usize; MAX_LEVEL] {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.nodes[x].forward[i];
                if next != NIL && self.precedes(next, score, member) {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }
        update
    }

    fn alloc(&mut self, member: Bytes, score: f64, level: usize) -> usize {
        let node = Node {
            member,
            score,
            forward: vec![NIL; level],
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Inserts a node. Duplicates are not merged.
    pub fn insert(&mut self, member: Bytes, score: f64) {
        // Levels above the current top already point at HEAD.
        let update = self.find_update(score, &member);

        let level = random_level();
        if level > self.level {
            self.level = level;
        }

        let idx = self.alloc(member, score, level);
        for (i, &prev) in update.iter().enumerate().take(level) {
            self.nodes[idx].forward[i] = self.nodes[prev].forward[i];
            self.nodes[prev].forward[i] = idx;
        }
        self.len += 1;
    }

    /// Removes the node matching both `member` and `score` exactly.
    pub fn remove(&mut self, member: &[u8], score: f64) -> bool {
        let update = self.find_update(score, member);
        let target = self.nodes[update[0]].forward[0];
        if target == NIL {
            return false;
        }
        {
            let node = &self.nodes[target];
            if node.score.total_cmp(&score) != Ordering::Equal || node.member.as_ref() != member {
                return false;
            }
        }

        for (i, &prev) in update.iter().enumerate().take(self.level) {
            if self.nodes[prev].forward[i] != target {
                break;
            }
            self.nodes[prev].forward[i] = self.nodes[target].forward[i];
        }
        while self.level > 1 && self.nodes[HEAD].forward[self.level - 1] == NIL {
            self.level -= 1;
        }

        let node = &mut self.nodes[target];
        node.member = Bytes::new();
        node.forward.clear();
        self.free.push(target);
        self.len -= 1;
        true
    }

    /// Level-0 traversal from the lowest score.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.nodes[HEAD].forward[0],
        }
    }

    /// Level-0 traversal starting at the first node admitted by `min`.
    pub fn iter_from(&self, min: ScoreBound) -> Iter<'_> {
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.nodes[x].forward[i];
                if next != NIL && !min.admits_as_min(self.nodes[next].score) {
                    x = next;
                } else {
                    break;
                }
            }
        }
        Iter {
            list: self,
            cur: self.nodes[x].forward[0],
        }
    }
}

/// Ascending iterator over `(member, score)`.
pub struct Iter<'a> {
    list: &'a SkipList,
    cur: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Bytes, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let node = &self.list.nodes[self.cur];
        self.cur = node.forward[0];
        Some((&node.member, node.score))
    }
}

/// One end of a score range, optionally exclusive (`(1.5` in ZRANGEBYSCORE).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            exclusive: false,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Self {
            value,
            exclusive: true,
        }
    }

    fn admits_as_min(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_as_max(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

/// Sorted set value: a skip list plus a member → score index.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    list: SkipList,
    scores: HashMap<Bytes, f64>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds or re-scores `member`. Returns true if the member is new.
    pub fn add(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.get(&member).copied() {
            Some(old) if old.total_cmp(&score) == Ordering::Equal => false,
            Some(old) => {
                self.list.remove(&member, old);
                self.list.insert(member.clone(), score);
                self.scores.insert(member, score);
                false
            }
            None => {
                self.list.insert(member.clone(), score);
                self.scores.insert(member, score);
                true
            }
        }
    }

    /// Removes `member`. Returns true if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => self.list.remove(member, score),
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Adds `delta` to the member's score (0 if absent).
    ///
    /// Returns `None` and leaves the set untouched if the result is NaN.
    pub fn incr_by(&mut self, member: Bytes, delta: f64) -> Option<f64> {
        let score = self.score(&member).unwrap_or(0.0) + delta;
        if score.is_nan() {
            return None;
        }
        self.add(member, score);
        Some(score)
    }

    /// Zero-based position of `member` in ascending order.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        self.list
            .iter_from(ScoreBound::inclusive(score))
            .position(|(m, _)| m.as_ref() == member)
            .map(|offset| self.count_below(score) + offset)
    }

    fn count_below(&self, score: f64) -> usize {
        self.list.iter().take_while(|(_, s)| *s < score).count()
    }

    /// Entries with rank in `start..=stop`.
    pub fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(Bytes, f64)> {
        if start > stop {
            return Vec::new();
        }
        self.list
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .map(|(m, s)| (m.clone(), s))
            .collect()
    }

    /// Entries with `min <= score <= max`, honoring exclusive bounds.
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> Vec<(Bytes, f64)> {
        self.list
            .iter_from(min)
            .take_while(|(_, s)| max.admits_as_max(*s))
            .map(|(m, s)| (m.clone(), s))
            .collect()
    }

    pub fn iter(&self) -> Iter<'_> {
        self.list.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn members(list: &SkipList) -> Vec<String> {
        list.iter()
            .map(|(m, _)| String::from_utf8(m.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_orders_by_score() {
        let mut list = SkipList::new();
        list.insert(b("a"), 1.0);
        list.insert(b("b"), 2.0);
        list.insert(b("c"), 1.5);
        assert_eq!(members(&list), vec!["a", "c", "b"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_insert_does_not_dedup() {
        let mut list = SkipList::new();
        list.insert(b("a"), 1.0);
        list.insert(b("a"), 1.0);
        list.insert(b("a"), 3.0);
        assert_eq!(list.len(), 3);
        assert_eq!(list.iter().count(), 3);
    }

    #[test]
    fn test_remove_requires_exact_score() {
        let mut list = SkipList::new();
        list.insert(b("a"), 1.0);
        list.insert(b("b"), 2.0);
        assert!(!list.remove(b"a", 2.0));
        assert!(!list.remove(b"zz", 1.0));
        assert!(list.remove(b"a", 1.0));
        assert!(!list.remove(b"a", 1.0));
        assert_eq!(members(&list), vec!["b"]);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_many_inserts_stay_sorted() {
        let mut list = SkipList::new();
        for i in 0..2000u64 {
            // Scrambled insertion order.
            let score = ((i * 7919) % 2000) as f64;
            list.insert(b(&format!("m{}", i)), score);
        }
        let scores: Vec<f64> = list.iter().map(|(_, s)| s).collect();
        assert_eq!(scores.len(), 2000);
        assert_eq!(list.len(), 2000);
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_level_shrinks_after_removal() {
        let mut list = SkipList::new();
        for i in 0..500 {
            list.insert(b(&format!("m{}", i)), i as f64);
        }
        assert!(list.level() >= 1);
        for i in 0..500 {
            assert!(list.remove(format!("m{}", i).as_bytes(), i as f64));
        }
        assert!(list.is_empty());
        assert_eq!(list.level(), 1);
        assert_eq!(list.iter().count(), 0);

        // Freed slots are reused.
        list.insert(b("again"), 1.0);
        assert_eq!(members(&list), vec!["again"]);
    }

    #[test]
    fn test_sorted_set_rescore() {
        let mut zset = SortedSet::new();
        assert!(zset.add(b("a"), 1.0));
        assert!(zset.add(b("b"), 2.0));
        assert!(!zset.add(b("a"), 3.0));
        assert_eq!(zset.len(), 2);
        assert_eq!(zset.score(b"a"), Some(3.0));
        let order: Vec<_> = zset.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(order, vec![b("b"), b("a")]);
    }

    #[test]
    fn test_sorted_set_remove_and_rank() {
        let mut zset = SortedSet::new();
        for (m, s) in [("x", 5.0), ("y", 1.0), ("z", 3.0), ("w", 3.0)] {
            zset.add(b(m), s);
        }
        assert_eq!(zset.rank(b"y"), Some(0));
        assert_eq!(zset.rank(b"w"), Some(1));
        assert_eq!(zset.rank(b"z"), Some(2));
        assert_eq!(zset.rank(b"x"), Some(3));
        assert_eq!(zset.rank(b"missing"), None);

        assert!(zset.remove(b"z"));
        assert!(!zset.remove(b"z"));
        assert_eq!(zset.rank(b"x"), Some(2));
        assert_eq!(zset.len(), 3);
    }

    #[test]
    fn test_sorted_set_ranges() {
        let mut zset = SortedSet::new();
        for (i, m) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            zset.add(b(m), i as f64);
        }
        let by_rank: Vec<_> = zset.range_by_rank(1, 3).into_iter().map(|(m, _)| m).collect();
        assert_eq!(by_rank, vec![b("b"), b("c"), b("d")]);
        assert!(zset.range_by_rank(3, 1).is_empty());

        let by_score: Vec<_> = zset
            .range_by_score(ScoreBound::exclusive(1.0), ScoreBound::inclusive(3.0))
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(by_score, vec![b("c"), b("d")]);

        let all = zset.range_by_score(
            ScoreBound::inclusive(f64::NEG_INFINITY),
            ScoreBound::inclusive(f64::INFINITY),
        );
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_incr_by() {
        let mut zset = SortedSet::new();
        assert_eq!(zset.incr_by(b("a"), 2.5), Some(2.5));
        assert_eq!(zset.incr_by(b("a"), 1.0), Some(3.5));
        zset.add(b("inf"), f64::INFINITY);
        assert_eq!(zset.incr_by(b("inf"), f64::NEG_INFINITY), None);
        assert_eq!(zset.score(b"inf"), Some(f64::INFINITY));
    }
}
