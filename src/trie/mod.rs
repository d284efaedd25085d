//! A call-path prefix tree over folded stacks.
//!
//! Where the analyzer answers per-symbol questions, the trie keeps the call
//! *paths* apart: `a;b;c` and `x;b;c` land in different subtrees, so the cost
//! of a symbol can be broken down by how it was reached. The tree is built
//! once from a folded mapping (the process segment is dropped) and is
//! immutable afterwards.
//!
//! Nodes live in an arena indexed by `usize` rather than behind per-node
//! allocations; deep traces chase fewer pointers that way. Children are kept
//! in ordered maps so every traversal of the same trie visits nodes in the
//! same order.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::analyze::SEPARATOR;
use crate::folded::{self, FoldedMapping};
use crate::{Error, Result};

const ROOT: usize = 0;

#[derive(Clone, Debug)]
struct Node {
    name: String,
    inclusive: u64,
    leaf: u64,
    children: BTreeMap<String, usize>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inclusive: 0,
            leaf: 0,
            children: BTreeMap::new(),
        }
    }
}

/// One row of a [`Trie::symbol_overhead`] answer.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolOverhead {
    /// The matched node's symbol.
    pub symbol: String,
    /// The full call path from the top of the trie to the node.
    pub path: Vec<String>,
    /// Leaf weight reachable from the node within the requested depth.
    pub inclusive: u64,
    /// Leaf weight of the node itself.
    pub leaf: u64,
    /// `inclusive` as a percentage of the trie total.
    pub inclusive_pct: f64,
    /// `leaf` as a percentage of the trie total.
    pub leaf_pct: f64,
}

/// A subtree exported by [`Trie::export_sorted`]: heaviest children first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    /// The frame name.
    pub name: String,
    /// Inclusive weight of the subtree.
    pub count: u64,
    /// Weight of paths terminating exactly here.
    pub leaf_count: u64,
    /// Children ordered by `(count desc, name asc)`.
    pub children: Vec<TreeNode>,
}

/// One terminating call path and its weight.
#[derive(Clone, Debug, PartialEq)]
pub struct PathStat {
    /// The `;`-joined call path, process segment excluded.
    pub path: String,
    /// Weight of samples ending exactly on this path.
    pub count: u64,
    /// `count` as a percentage of the trie total.
    pub percent: f64,
}

impl fmt::Display for PathStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12} {:>6.2}%  {}", self.count, self.percent, self.path)
    }
}

/// A call-path prefix tree built from a folded mapping.
///
/// See the [module documentation](self) for the data model.
#[derive(Clone, Debug)]
pub struct Trie {
    nodes: Vec<Node>,
    total: u64,
}

impl Trie {
    fn empty() -> Self {
        Self {
            nodes: vec![Node::new("root")],
            total: 0,
        }
    }

    /// Builds a trie from a folded mapping.
    ///
    /// The first segment of every key (the process) is dropped; keys without
    /// at least one frame are skipped and do not count toward the total.
    pub fn from_mapping(mapping: &FoldedMapping) -> Self {
        let mut trie = Self::empty();
        for (stack, &weight) in mapping {
            let mut frames = stack.split(SEPARATOR);
            // process segment
            if frames.next().is_none() {
                continue;
            }
            let frames: Vec<&str> = frames.collect();
            if frames.is_empty() {
                continue;
            }
            trie.insert(&frames, weight);
            trie.total += weight;
        }
        trie
    }

    /// Parses folded text and builds a trie from it.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Self {
        Self::from_mapping(&folded::parse_str(text))
    }

    /// Parses a folded file and builds a trie from it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_mapping(&folded::parse_file(path)?))
    }

    fn insert(&mut self, frames: &[&str], weight: u64) {
        self.nodes[ROOT].inclusive += weight;
        let mut node = ROOT;
        for (i, name) in frames.iter().enumerate() {
            node = match self.nodes[node].children.get(*name) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::new(name));
                    self.nodes[node].children.insert(name.to_string(), child);
                    child
                }
            };
            self.nodes[node].inclusive += weight;
            if i == frames.len() - 1 {
                self.nodes[node].leaf += weight;
            }
        }
    }

    /// The sum of weights of all stacks the trie was built from.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Whether the trie contains any call paths.
    pub fn is_empty(&self) -> bool {
        self.nodes[ROOT].children.is_empty()
    }

    // Percentage denominator; 1 when the trie is empty so queries divide by
    // something.
    fn denom(&self) -> f64 {
        if self.total > 0 {
            self.total as f64
        } else {
            1.0
        }
    }

    // All nodes whose name satisfies `pred`, with their full paths, in
    // deterministic depth-first order.
    fn find_nodes<F>(&self, pred: F) -> Vec<(usize, Vec<String>)>
    where
        F: Fn(&str) -> bool,
    {
        let mut results = Vec::new();
        let mut path: Vec<&str> = Vec::new();
        // (node, entered) pairs: entered nodes get popped from the path
        let mut stack: Vec<(usize, bool)> = self.nodes[ROOT]
            .children
            .values()
            .rev()
            .map(|&c| (c, false))
            .collect();
        while let Some((idx, entered)) = stack.pop() {
            if entered {
                path.pop();
                continue;
            }
            let node = &self.nodes[idx];
            path.push(&node.name);
            if pred(&node.name) {
                results.push((idx, path.iter().map(|s| s.to_string()).collect()));
            }
            stack.push((idx, true));
            for &child in node.children.values().rev() {
                stack.push((child, false));
            }
        }
        results
    }

    // Leaf weight reachable from `idx` within `depth` edges. `None` is
    // unbounded and equals the node's inclusive weight; 0 is the node's own
    // leaf weight.
    fn inclusive_within(&self, idx: usize, depth: Option<usize>) -> u64 {
        let node = &self.nodes[idx];
        match depth {
            None => node.inclusive,
            Some(0) => node.leaf,
            Some(k) => {
                let mut total = node.leaf;
                for &child in node.children.values() {
                    total += self.inclusive_within(child, Some(k - 1));
                }
                total
            }
        }
    }

    /// The cost of every node matching `symbol`, bounded by traversal depth.
    ///
    /// With `fuzzy`, nodes whose name merely contains `symbol` match too.
    /// `depth` limits how many edges below the node contribute: `None` is
    /// unbounded, `Some(0)` counts only the node's own leaf weight. Rows are
    /// sorted by inclusive weight descending.
    ///
    /// An empty `symbol` is rejected with [`Error::InvalidArgument`]; a
    /// symbol that matches nothing yields an empty list.
    pub fn symbol_overhead(
        &self,
        symbol: &str,
        depth: Option<usize>,
        fuzzy: bool,
    ) -> Result<Vec<SymbolOverhead>> {
        if symbol.is_empty() {
            return Err(Error::InvalidArgument(
                "symbol for overhead query must be non-empty".to_string(),
            ));
        }
        let matches = self.find_nodes(|name| {
            if fuzzy {
                name.contains(symbol)
            } else {
                name == symbol
            }
        });
        let denom = self.denom();
        let mut rows: Vec<SymbolOverhead> = matches
            .into_iter()
            .map(|(idx, path)| {
                let inclusive = self.inclusive_within(idx, depth);
                let leaf = self.nodes[idx].leaf;
                SymbolOverhead {
                    symbol: self.nodes[idx].name.clone(),
                    path,
                    inclusive,
                    leaf,
                    inclusive_pct: inclusive as f64 / denom * 100.0,
                    leaf_pct: leaf as f64 / denom * 100.0,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.inclusive.cmp(&a.inclusive).then_with(|| a.path.cmp(&b.path)));
        Ok(rows)
    }

    fn sorted_children(&self, idx: usize) -> Vec<usize> {
        let mut children: Vec<usize> = self.nodes[idx].children.values().copied().collect();
        children.sort_by(|&a, &b| {
            self.nodes[b]
                .inclusive
                .cmp(&self.nodes[a].inclusive)
                .then_with(|| self.nodes[a].name.cmp(&self.nodes[b].name))
        });
        children
    }

    fn build_tree(&self, idx: usize, depth: Option<usize>) -> TreeNode {
        let node = &self.nodes[idx];
        let mut out = TreeNode {
            name: node.name.clone(),
            count: node.inclusive,
            leaf_count: node.leaf,
            children: Vec::new(),
        };
        if depth == Some(0) {
            return out;
        }
        let next = depth.map(|d| d - 1);
        for child in self.sorted_children(idx) {
            out.children.push(self.build_tree(child, next));
        }
        out
    }

    /// Exports subtrees with the heaviest paths first.
    ///
    /// With no `start_symbol` the forest of all first-level children is
    /// exported; otherwise one tree per matching node (exact, or substring
    /// when `fuzzy`). Children are ordered by `(count desc, name asc)` and
    /// `depth` cuts the export after that many edges (`Some(0)` exports the
    /// starting nodes without children). Unknown symbols yield an empty
    /// forest.
    pub fn export_sorted(
        &self,
        start_symbol: Option<&str>,
        depth: Option<usize>,
        fuzzy: bool,
    ) -> Vec<TreeNode> {
        match start_symbol {
            None => self
                .sorted_children(ROOT)
                .into_iter()
                .map(|idx| self.build_tree(idx, depth))
                .collect(),
            Some(symbol) => {
                let mut matches = self.find_nodes(|name| {
                    if fuzzy {
                        name.contains(symbol)
                    } else {
                        name == symbol
                    }
                });
                matches.sort_by(|(a, pa), (b, pb)| {
                    self.nodes[*b]
                        .inclusive
                        .cmp(&self.nodes[*a].inclusive)
                        .then_with(|| self.nodes[*a].name.cmp(&self.nodes[*b].name))
                        .then_with(|| pa.cmp(pb))
                });
                matches
                    .into_iter()
                    .map(|(idx, _)| self.build_tree(idx, depth))
                    .collect()
            }
        }
    }

    /// A lazy, restartable traversal of `(path, leaf_weight)` pairs.
    ///
    /// Yields one pair for every node where at least one sample terminated,
    /// in deterministic depth-first order. [`Trie::path_stats`] materializes
    /// and sorts this.
    pub fn paths(&self) -> Paths<'_> {
        Paths {
            trie: self,
            path: Vec::new(),
            stack: self.nodes[ROOT]
                .children
                .values()
                .rev()
                .map(|&c| (c, false))
                .collect(),
        }
    }

    /// Every terminating call path with its weight and share of the total,
    /// heaviest first.
    pub fn path_stats(&self) -> Vec<PathStat> {
        let denom = self.denom();
        let mut stats: Vec<PathStat> = self
            .paths()
            .map(|(path, count)| PathStat {
                path: path.join(";"),
                count,
                percent: count as f64 / denom * 100.0,
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        stats
    }
}

/// The lazy traversal returned by [`Trie::paths`].
pub struct Paths<'a> {
    trie: &'a Trie,
    path: Vec<&'a str>,
    stack: Vec<(usize, bool)>,
}

impl<'a> Iterator for Paths<'a> {
    type Item = (Vec<&'a str>, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let trie = self.trie;
        while let Some((idx, entered)) = self.stack.pop() {
            if entered {
                self.path.pop();
                continue;
            }
            let node = &trie.nodes[idx];
            self.path.push(&node.name);
            self.stack.push((idx, true));
            for &child in node.children.values().rev() {
                self.stack.push((child, false));
            }
            if node.leaf > 0 {
                return Some((self.path.clone(), node.leaf));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trie(lines: &str) -> Trie {
        Trie::from_str(lines)
    }

    #[test]
    fn construction_totals_and_invariant() {
        let t = trie("p;a;b;c 3\np;a;b;d;e 5\nq;a;b 2\n");
        assert_eq!(t.total(), 10);
        // every node satisfies inclusive == leaf + sum(child inclusive)
        for node in &t.nodes {
            let child_sum: u64 = node
                .children
                .values()
                .map(|&c| t.nodes[c].inclusive)
                .sum();
            assert_eq!(node.inclusive, node.leaf + child_sum, "at {}", node.name);
        }
        assert_eq!(t.nodes[ROOT].inclusive, 10);
    }

    #[test]
    fn empty_mapping_builds_an_empty_trie() {
        let t = trie("");
        assert_eq!(t.total(), 0);
        assert!(t.is_empty());
        assert!(t.path_stats().is_empty());
        assert!(t.export_sorted(None, None, false).is_empty());
        assert!(t.symbol_overhead("a", None, false).unwrap().is_empty());
    }

    #[test]
    fn single_stack_single_frame() {
        let t = trie("p;main 4\n");
        assert_eq!(t.total(), 4);
        let forest = t.export_sorted(None, None, false);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].name, "main");
        assert_eq!(forest[0].count, 4);
        assert_eq!(forest[0].leaf_count, 4);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn overhead_depth_limits() {
        let t = trie("p;a;b;c 3\np;a;b;d;e 5\n");
        let unbounded = t.symbol_overhead("b", None, false).unwrap();
        assert_eq!(unbounded.len(), 1);
        assert_eq!(unbounded[0].inclusive, 8);
        assert_eq!(unbounded[0].leaf, 0);
        assert_eq!(unbounded[0].path, vec!["a", "b"]);

        // depth 0: only b's own leaf weight
        let zero = t.symbol_overhead("b", Some(0), false).unwrap();
        assert_eq!(zero[0].inclusive, 0);

        // depth 1 reaches c (leaf 3) and d (leaf 0)
        let one = t.symbol_overhead("b", Some(1), false).unwrap();
        assert_eq!(one[0].inclusive, 3);

        // depth 2 reaches e as well
        let two = t.symbol_overhead("b", Some(2), false).unwrap();
        assert_eq!(two[0].inclusive, 8);
    }

    #[test]
    fn overhead_percentages_and_sorting() {
        let t = trie("p;a;x 1\np;b;x 9\n");
        let rows = t.symbol_overhead("x", None, false).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path, vec!["b", "x"]);
        assert_eq!(rows[0].inclusive, 9);
        assert!((rows[0].inclusive_pct - 90.0).abs() < 1e-9);
        assert_eq!(rows[1].path, vec!["a", "x"]);
    }

    #[test]
    fn overhead_fuzzy_matches_substrings() {
        let t = trie("p;tcp_sendmsg 2\np;tcp_recvmsg 3\np;other 1\n");
        let rows = t.symbol_overhead("tcp_", None, true).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol, "tcp_recvmsg");
        assert!(t.symbol_overhead("", None, false).is_err());
        assert!(t.symbol_overhead("missing", None, false).unwrap().is_empty());
    }

    #[test]
    fn export_sorted_orders_heavy_children_first() {
        let t = trie("p;a;x 1\np;a;y 5\np;a;x;z 2\n");
        let trees = t.export_sorted(Some("a"), None, false);
        assert_eq!(trees.len(), 1);
        let a = &trees[0];
        assert_eq!(a.name, "a");
        assert_eq!(a.count, 8);
        assert_eq!(a.leaf_count, 0);
        let names: Vec<_> = a.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["y", "x"]);
        assert_eq!(a.children[0].count, 5);
        let x = &a.children[1];
        assert_eq!((x.count, x.leaf_count), (3, 1));
        assert_eq!(x.children[0].name, "z");
        assert_eq!((x.children[0].count, x.children[0].leaf_count), (2, 2));
    }

    #[test]
    fn export_ties_break_by_name() {
        let t = trie("p;a;m 2\np;a;k 2\n");
        let trees = t.export_sorted(Some("a"), None, false);
        let names: Vec<_> = trees[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["k", "m"]);
    }

    #[test]
    fn export_depth_cuts_children() {
        let t = trie("p;a;b;c 1\n");
        let trees = t.export_sorted(Some("a"), Some(0), false);
        assert!(trees[0].children.is_empty());
        let trees = t.export_sorted(Some("a"), Some(1), false);
        assert_eq!(trees[0].children.len(), 1);
        assert!(trees[0].children[0].children.is_empty());
    }

    #[test]
    fn export_without_start_symbol_is_the_whole_forest() {
        let t = trie("p;a;x 1\nq;b 6\n");
        let forest = t.export_sorted(None, None, false);
        let names: Vec<_> = forest.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn path_stats_sorted_by_count() {
        let t = trie("p;a;b 2\np;a 7\nq;c 1\n");
        let stats = t.path_stats();
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].path, "a");
        assert_eq!(stats[0].count, 7);
        assert!((stats[0].percent - 70.0).abs() < 1e-9);
        assert_eq!(stats[1].path, "a;b");
        assert_eq!(stats[2].path, "c");
    }

    #[test]
    fn paths_iterator_is_lazy_and_restartable() {
        let t = trie("p;a;b 2\np;a 7\n");
        let first: Vec<_> = t.paths().collect();
        let second: Vec<_> = t.paths().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        // a terminates samples and so does a;b
        assert!(first.contains(&(vec!["a"], 7)));
        assert!(first.contains(&(vec!["a", "b"], 2)));
    }

    #[test]
    fn path_stats_sum_never_exceeds_total() {
        let t = trie("p;a;b 2\np;a;c 3\np;a 1\n");
        let sum: u64 = t.path_stats().iter().map(|s| s.count).sum();
        assert_eq!(sum, t.total());
    }

    #[test]
    fn sample_order_does_not_matter() {
        let t1 = trie("p;a;b 2\np;a;c 3\n");
        let t2 = trie("p;a;c 3\np;a;b 2\n");
        assert_eq!(t1.path_stats(), t2.path_stats());
        assert_eq!(
            t1.export_sorted(None, None, false),
            t2.export_sorted(None, None, false)
        );
    }
}
