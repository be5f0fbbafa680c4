//! Sequence matching: longest-matching-block alignment of two sequences
//!
//! Gestalt (Ratcliff/Obershelp) matching: find the longest contiguous
//! matching block, then recurse on the pieces to its left and right. Used
//! over characters for similarity ratios and over lines for unified diffs.
//!
//! Elements that make up more than 1% of a sequence of 200+ elements are
//! "popular" and never start a match (they can still extend one). This keeps
//! matching near-linear on prose, where spaces and common letters dominate.

use std::collections::HashMap;
use std::hash::Hash;

/// Minimum length of `b` before popular elements are ignored.
const AUTOJUNK_MIN_LEN: usize = 200;

/// A matching block: `a[a_start..a_start+size] == b[b_start..b_start+size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub a_start: usize,
    pub b_start: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

/// Edit operation turning `a[a_start..a_end]` into `b[b_start..b_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub tag: OpTag,
    pub a_start: usize,
    pub a_end: usize,
    pub b_start: usize,
    pub b_end: usize,
}

impl Opcode {
    fn new(tag: OpTag, a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> Self {
        Self {
            tag,
            a_start,
            a_end,
            b_start,
            b_end,
        }
    }
}

pub struct SequenceMatcher<'a, T> {
    a: &'a [T],
    b: &'a [T],
    b2j: HashMap<&'a T, Vec<usize>>,
}

impl<'a, T: Eq + Hash> SequenceMatcher<'a, T> {
    pub fn new(a: &'a [T], b: &'a [T]) -> Self {
        let mut b2j: HashMap<&'a T, Vec<usize>> = HashMap::new();
        for (j, elt) in b.iter().enumerate() {
            b2j.entry(elt).or_default().push(j);
        }
        if b.len() >= AUTOJUNK_MIN_LEN {
            let popular = b.len() / 100 + 1;
            b2j.retain(|_, indices| indices.len() <= popular);
        }
        Self { a, b, b2j }
    }

    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Match {
        let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
        let mut j2len: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next: HashMap<usize, usize> = HashMap::new();
            if let Some(indices) = self.b2j.get(&self.a[i]) {
                for &j in indices {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| j2len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next.insert(j, k);
                    if k > best_size {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_size = k;
                    }
                }
            }
            j2len = next;
        }

        // Popular elements never seed a match but may extend one.
        while best_i > alo && best_j > blo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_size += 1;
        }
        while best_i + best_size < ahi
            && best_j + best_size < bhi
            && self.a[best_i + best_size] == self.b[best_j + best_size]
        {
            best_size += 1;
        }

        Match {
            a_start: best_i,
            b_start: best_j,
            size: best_size,
        }
    }

    /// Non-overlapping matching blocks in increasing order, adjacent blocks
    /// merged, terminated by a zero-size sentinel at `(len(a), len(b))`.
    pub fn matching_blocks(&self) -> Vec<Match> {
        let sentinel = Match {
            a_start: self.a.len(),
            b_start: self.b.len(),
            size: 0,
        };
        if self.a == self.b {
            // Identical inputs may consist only of popular elements.
            return match self.a.len() {
                0 => vec![sentinel],
                size => vec![
                    Match {
                        a_start: 0,
                        b_start: 0,
                        size,
                    },
                    sentinel,
                ],
            };
        }

        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.find_longest_match(alo, ahi, blo, bhi);
            if m.size == 0 {
                continue;
            }
            blocks.push(m);
            if alo < m.a_start && blo < m.b_start {
                queue.push((alo, m.a_start, blo, m.b_start));
            }
            if m.a_start + m.size < ahi && m.b_start + m.size < bhi {
                queue.push((m.a_start + m.size, ahi, m.b_start + m.size, bhi));
            }
        }
        blocks.sort_by_key(|m| (m.a_start, m.b_start));

        let mut merged: Vec<Match> = Vec::with_capacity(blocks.len() + 1);
        for m in blocks {
            match merged.last_mut() {
                Some(last)
                    if last.a_start + last.size == m.a_start
                        && last.b_start + last.size == m.b_start =>
                {
                    last.size += m.size;
                }
                _ => merged.push(m),
            }
        }
        merged.push(sentinel);
        merged
    }

    /// Similarity in `[0, 1]`: `2 * matches / (len(a) + len(b))`.
    ///
    /// Two empty sequences are identical (1.0).
    pub fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matches: usize = self.matching_blocks().iter().map(|m| m.size).sum();
        2.0 * matches as f64 / total as f64
    }

    pub fn opcodes(&self) -> Vec<Opcode> {
        let (mut i, mut j) = (0, 0);
        let mut codes = Vec::new();
        for m in self.matching_blocks() {
            let tag = match (i < m.a_start, j < m.b_start) {
                (true, true) => Some(OpTag::Replace),
                (true, false) => Some(OpTag::Delete),
                (false, true) => Some(OpTag::Insert),
                (false, false) => None,
            };
            if let Some(tag) = tag {
                codes.push(Opcode::new(tag, i, m.a_start, j, m.b_start));
            }
            i = m.a_start + m.size;
            j = m.b_start + m.size;
            if m.size > 0 {
                codes.push(Opcode::new(OpTag::Equal, m.a_start, i, m.b_start, j));
            }
        }
        codes
    }

    /// Opcodes grouped into hunks with up to `context` equal elements on
    /// each side. Identical inputs yield no groups.
    pub fn grouped_opcodes(&self, context: usize) -> Vec<Vec<Opcode>> {
        let mut codes = self.opcodes();
        if codes.is_empty() {
            codes.push(Opcode::new(OpTag::Equal, 0, 1, 0, 1));
        }

        if let Some(first) = codes.first_mut() {
            if first.tag == OpTag::Equal {
                first.a_start = first.a_start.max(first.a_end.saturating_sub(context));
                first.b_start = first.b_start.max(first.b_end.saturating_sub(context));
            }
        }
        if let Some(last) = codes.last_mut() {
            if last.tag == OpTag::Equal {
                last.a_end = last.a_end.min(last.a_start + context);
                last.b_end = last.b_end.min(last.b_start + context);
            }
        }

        let window = context * 2;
        let mut groups = Vec::new();
        let mut group = Vec::new();
        for mut code in codes {
            if code.tag == OpTag::Equal && code.a_end - code.a_start > window {
                group.push(Opcode::new(
                    OpTag::Equal,
                    code.a_start,
                    code.a_end.min(code.a_start + context),
                    code.b_start,
                    code.b_end.min(code.b_start + context),
                ));
                groups.push(std::mem::take(&mut group));
                code.a_start = code.a_start.max(code.a_end.saturating_sub(context));
                code.b_start = code.b_start.max(code.b_end.saturating_sub(context));
            }
            group.push(code);
        }
        if !(group.is_empty() || (group.len() == 1 && group[0].tag == OpTag::Equal)) {
            groups.push(group);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_ratio_known_values() {
        let a = chars("abcd");
        let b = chars("bcde");
        assert_eq!(SequenceMatcher::new(&a, &b).ratio(), 0.75);

        let a = chars("hello");
        let b = chars("hello");
        assert_eq!(SequenceMatcher::new(&a, &b).ratio(), 1.0);
    }

    #[test]
    fn test_ratio_empty_inputs() {
        let empty: Vec<char> = Vec::new();
        let x = chars("abc");
        assert_eq!(SequenceMatcher::new(&empty, &empty).ratio(), 1.0);
        assert_eq!(SequenceMatcher::new(&empty, &x).ratio(), 0.0);
    }

    #[test]
    fn test_matching_blocks_have_sentinel() {
        let a = chars("abxcd");
        let b = chars("abcd");
        let blocks = SequenceMatcher::new(&a, &b).matching_blocks();
        assert_eq!(
            blocks,
            vec![
                Match { a_start: 0, b_start: 0, size: 2 },
                Match { a_start: 3, b_start: 2, size: 2 },
                Match { a_start: 5, b_start: 4, size: 0 },
            ]
        );
    }

    #[test]
    fn test_opcodes() {
        let a = chars("qabxcd");
        let b = chars("abycdf");
        let tags: Vec<OpTag> = SequenceMatcher::new(&a, &b)
            .opcodes()
            .iter()
            .map(|o| o.tag)
            .collect();
        assert_eq!(
            tags,
            vec![
                OpTag::Delete,
                OpTag::Equal,
                OpTag::Replace,
                OpTag::Equal,
                OpTag::Insert
            ]
        );
    }

    #[test]
    fn test_grouped_opcodes_split_distant_changes() {
        let a: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
        let mut b = a.clone();
        b[1] = "changed".to_string();
        b[18] = "changed too".to_string();
        let groups = SequenceMatcher::new(&a, &b).grouped_opcodes(3);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_grouped_opcodes_identical_is_empty() {
        let a = vec!["x", "y"];
        assert!(SequenceMatcher::new(&a, &a).grouped_opcodes(3).is_empty());
    }

    #[test]
    fn test_identical_popular_only_input_is_fully_similar() {
        let a = chars(&"a ".repeat(200));
        assert_eq!(SequenceMatcher::new(&a, &a).ratio(), 1.0);
        assert!(SequenceMatcher::new(&a, &a).grouped_opcodes(3).is_empty());
    }

    #[test]
    fn test_popular_elements_extend_matches() {
        let mut text = "x".to_string();
        text.push_str(&"a ".repeat(150));
        let a = chars(&text);
        let mut edited = text.clone();
        edited.push('!');
        let b = chars(&edited);
        let ratio = SequenceMatcher::new(&a, &b).ratio();
        assert!(ratio > 0.99, "ratio {ratio}");
    }
}
