//! Read-only hotspot queries over a folded mapping.
//!
//! [`FoldedAnalyzer`] wraps a parsed folded mapping and answers the questions
//! that matter when staring at a hot profile: which symbols carry the most
//! inclusive and leaf weight, which whole stacks dominate, what the callees
//! of a given symbol cost, and what remains after narrowing to a symbol or a
//! call-path prefix/suffix. Every query walks the mapping once; nothing here
//! mutates it, so an analyzer can be shared freely between readers.

use std::fmt;
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use regex::Regex;

use crate::folded::{self, FoldedMapping};
use crate::Result;

/// The stack separator inside folded keys.
pub(crate) const SEPARATOR: char = ';';

/// Which counter a top-K symbol query is ranked by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Rank by inclusive weight (any position in the stack).
    #[default]
    Inclusive,
    /// Rank by leaf weight (innermost frame only).
    Leaf,
}

/// Inclusive and leaf cost of one symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolStat {
    /// The symbol.
    pub symbol: String,
    /// Total weight of stacks the symbol appears in, counted once per stack.
    pub inclusive: u64,
    /// Weight of stacks where the symbol is the innermost frame.
    pub leaf: u64,
}

/// One folded stack and its weight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackStat {
    /// The full stack key, process segment included.
    pub stack: String,
    /// The stack's cumulative weight.
    pub weight: u64,
}

/// Inclusive and leaf cost aggregated to one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsoStat {
    /// The module tag the symbols resolved to.
    pub dso: String,
    /// Total weight of stacks touching the module, counted once per stack.
    pub inclusive: u64,
    /// Weight of stacks whose innermost frame resolved to the module.
    pub leaf: u64,
}

/// A [`SymbolStat`] enriched with percentage shares of a total.
#[derive(Clone, Debug, PartialEq)]
pub struct SymbolShare {
    /// The symbol.
    pub symbol: String,
    /// Inclusive weight.
    pub inclusive: u64,
    /// Leaf weight.
    pub leaf: u64,
    /// Inclusive weight as a percentage in `[0, 100]`.
    pub inclusive_pct: f64,
    /// Leaf weight as a percentage in `[0, 100]`.
    pub leaf_pct: f64,
}

impl fmt::Display for SymbolShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>12} {:>6.2}% {:>12} {:>6.2}%  {}",
            self.inclusive, self.inclusive_pct, self.leaf, self.leaf_pct, self.symbol
        )
    }
}

/// A [`StackStat`] enriched with its percentage share of a total.
#[derive(Clone, Debug, PartialEq)]
pub struct StackShare {
    /// The full stack key.
    pub stack: String,
    /// The stack's cumulative weight.
    pub weight: u64,
    /// Weight as a percentage in `[0, 100]`.
    pub weight_pct: f64,
}

impl fmt::Display for StackShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>12} {:>6.2}%  {}", self.weight, self.weight_pct, self.stack)
    }
}

/// Include/exclude predicates applied to symbols while scanning.
///
/// Inclusion is any-of: if any include list is non-empty, a symbol must match
/// at least one include predicate. Exclusion always wins. The default filter
/// passes everything through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolFilter {
    /// Keep symbols starting with any of these.
    pub include_prefixes: Vec<String>,
    /// Keep symbols ending with any of these.
    pub include_suffixes: Vec<String>,
    /// Reject symbols starting with any of these.
    pub exclude_prefixes: Vec<String>,
    /// Reject symbols ending with any of these.
    pub exclude_suffixes: Vec<String>,
}

impl SymbolFilter {
    /// Whether `symbol` passes the filter.
    pub fn matches(&self, symbol: &str) -> bool {
        if !self.include_prefixes.is_empty() || !self.include_suffixes.is_empty() {
            let included = self
                .include_prefixes
                .iter()
                .any(|p| symbol.starts_with(p.as_str()))
                || self
                    .include_suffixes
                    .iter()
                    .any(|s| symbol.ends_with(s.as_str()));
            if !included {
                return false;
            }
        }
        if self
            .exclude_prefixes
            .iter()
            .any(|p| symbol.starts_with(p.as_str()))
        {
            return false;
        }
        if self
            .exclude_suffixes
            .iter()
            .any(|s| symbol.ends_with(s.as_str()))
        {
            return false;
        }
        true
    }

    fn is_empty(&self) -> bool {
        self.include_prefixes.is_empty()
            && self.include_suffixes.is_empty()
            && self.exclude_prefixes.is_empty()
            && self.exclude_suffixes.is_empty()
    }
}

/// Restricts queries to stacks whose process segment matches.
///
/// Both conditions must hold when both are set; the default filter passes
/// everything through. The regex is searched, not anchored.
#[derive(Clone, Debug, Default)]
pub struct ProcessFilter {
    /// The process segment must start with this.
    pub prefix: Option<String>,
    /// The process segment must contain a match of this.
    pub regex: Option<Regex>,
}

impl ProcessFilter {
    /// A filter on the process prefix only.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            regex: None,
        }
    }

    /// Whether `process` passes the filter.
    pub fn matches(&self, process: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            if !process.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(process) {
                return false;
            }
        }
        true
    }

    fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.regex.is_none()
    }
}

// Memoizes ProcessFilter::matches per distinct process segment, so the regex
// cost scales with the number of processes rather than the number of stacks.
struct ProcessMatcher<'a> {
    filter: &'a ProcessFilter,
    memo: AHashMap<&'a str, bool>,
}

impl<'a> ProcessMatcher<'a> {
    fn new(filter: &'a ProcessFilter) -> Self {
        Self {
            filter,
            memo: AHashMap::default(),
        }
    }

    fn matches(&mut self, process: &'a str) -> bool {
        if self.filter.is_empty() {
            return true;
        }
        let filter = self.filter;
        *self
            .memo
            .entry(process)
            .or_insert_with(|| filter.matches(process))
    }
}

/// Read-only hotspot queries over a folded mapping.
///
/// See the [module documentation](self) for an overview of the queries.
#[derive(Clone, Debug)]
pub struct FoldedAnalyzer {
    stacks: FoldedMapping,
    total_weight: u64,
}

impl FoldedAnalyzer {
    /// Wraps an existing folded mapping.
    pub fn from_mapping(stacks: FoldedMapping) -> Self {
        let total_weight = stacks.values().sum();
        Self {
            stacks,
            total_weight,
        }
    }

    /// Parses folded text and wraps the result.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Self {
        Self::from_mapping(folded::parse_str(text))
    }

    /// Parses a folded file and wraps the result.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_mapping(folded::parse_file(path)?))
    }

    /// The sum of all stack weights.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// The underlying folded mapping.
    pub fn mapping(&self) -> &FoldedMapping {
        &self.stacks
    }

    /// Iterates over `(stack key, weight)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.stacks.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The `k` heaviest stacks, by weight descending (ties broken by stack
    /// key ascending, so results are deterministic).
    pub fn topk_stacks(&self, k: usize) -> Vec<StackStat> {
        if k == 0 {
            return Vec::new();
        }
        let mut items: Vec<_> = self.stacks.iter().collect();
        items.sort_by(|(ka, wa), (kb, wb)| wb.cmp(wa).then_with(|| ka.cmp(kb)));
        items
            .into_iter()
            .take(k)
            .map(|(stack, weight)| StackStat {
                stack: stack.clone(),
                weight: *weight,
            })
            .collect()
    }

    // Shared accumulation for symbol hotspots. Inclusive weight is added once
    // per unique symbol per stack (a recursive frame doesn't double-count);
    // leaf weight goes to the innermost frame.
    fn accumulate_symbol_costs(
        &self,
        process: &ProcessFilter,
        filter: &SymbolFilter,
    ) -> AHashMap<&str, (u64, u64)> {
        let mut acc: AHashMap<&str, (u64, u64)> = AHashMap::default();
        let mut matcher = ProcessMatcher::new(process);
        let mut seen: AHashSet<&str> = AHashSet::default();
        for (stack, &weight) in &self.stacks {
            let mut frames = stack.split(SEPARATOR);
            let proc = match frames.next() {
                Some(proc) => proc,
                None => continue,
            };
            if !matcher.matches(proc) {
                continue;
            }
            seen.clear();
            let mut last = None;
            for sym in frames {
                last = Some(sym);
                if !filter.is_empty() && !filter.matches(sym) {
                    continue;
                }
                if seen.insert(sym) {
                    acc.entry(sym).or_insert((0, 0)).0 += weight;
                }
            }
            if let Some(leaf) = last {
                if filter.is_empty() || filter.matches(leaf) {
                    acc.entry(leaf).or_insert((0, 0)).1 += weight;
                }
            }
        }
        acc
    }

    /// Inclusive and leaf cost of every symbol, heaviest first.
    ///
    /// Sorted by `(inclusive desc, leaf desc, symbol asc)`.
    pub fn symbol_hotspots(
        &self,
        process: &ProcessFilter,
        filter: &SymbolFilter,
    ) -> Vec<SymbolStat> {
        let acc = self.accumulate_symbol_costs(process, filter);
        let mut stats: Vec<SymbolStat> = acc
            .into_iter()
            .map(|(symbol, (inclusive, leaf))| SymbolStat {
                symbol: symbol.to_string(),
                inclusive,
                leaf,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.inclusive
                .cmp(&a.inclusive)
                .then_with(|| b.leaf.cmp(&a.leaf))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        stats
    }

    /// The `k` heaviest symbols in the given order.
    pub fn topk_symbols(
        &self,
        k: usize,
        order: Order,
        process: &ProcessFilter,
        filter: &SymbolFilter,
    ) -> Vec<SymbolStat> {
        if k == 0 {
            return Vec::new();
        }
        let mut stats = self.symbol_hotspots(process, filter);
        if order == Order::Leaf {
            stats.sort_by(|a, b| {
                b.leaf
                    .cmp(&a.leaf)
                    .then_with(|| b.inclusive.cmp(&a.inclusive))
                    .then_with(|| a.symbol.cmp(&b.symbol))
            });
        }
        stats.truncate(k);
        stats
    }

    /// The fraction (in `[0, 1]`) of the total weight attributed to `symbol`.
    ///
    /// Returns `0.0` for symbols not present or an empty mapping.
    pub fn symbol_share(
        &self,
        symbol: &str,
        order: Order,
        process: &ProcessFilter,
        filter: &SymbolFilter,
    ) -> f64 {
        if self.total_weight == 0 {
            return 0.0;
        }
        let acc = self.accumulate_symbol_costs(process, filter);
        match acc.get(symbol) {
            Some(&(inclusive, leaf)) => {
                let val = match order {
                    Order::Inclusive => inclusive,
                    Order::Leaf => leaf,
                };
                val as f64 / self.total_weight as f64
            }
            None => 0.0,
        }
    }

    /// Cost of the direct callees of `parent_symbol`.
    ///
    /// Every occurrence of the parent that has a callee attributes the
    /// stack's weight to that callee, as leaf weight too when the callee is
    /// the innermost frame. The symbol filter applies to the callee.
    pub fn children_hotspots(
        &self,
        parent_symbol: &str,
        process: &ProcessFilter,
        filter: &SymbolFilter,
    ) -> Vec<SymbolStat> {
        let mut acc: AHashMap<&str, (u64, u64)> = AHashMap::default();
        let mut matcher = ProcessMatcher::new(process);
        for (stack, &weight) in &self.stacks {
            let frames: Vec<&str> = stack.split(SEPARATOR).collect();
            // need a process, the parent, and at least one callee
            if frames.len() < 3 {
                continue;
            }
            if !matcher.matches(frames[0]) {
                continue;
            }
            let syms = &frames[1..];
            for i in 0..syms.len() - 1 {
                if syms[i] != parent_symbol {
                    continue;
                }
                let child = syms[i + 1];
                if !filter.is_empty() && !filter.matches(child) {
                    continue;
                }
                let entry = acc.entry(child).or_insert((0, 0));
                entry.0 += weight;
                if i + 1 == syms.len() - 1 {
                    entry.1 += weight;
                }
            }
        }
        let mut stats: Vec<SymbolStat> = acc
            .into_iter()
            .map(|(symbol, (inclusive, leaf))| SymbolStat {
                symbol: symbol.to_string(),
                inclusive,
                leaf,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.inclusive
                .cmp(&a.inclusive)
                .then_with(|| b.leaf.cmp(&a.leaf))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        stats
    }

    /// Aggregates symbol costs to modules via the provided `resolver`.
    ///
    /// The resolver maps a symbol to its module tag; symbols it cannot place
    /// are skipped. Costs follow the same rules as [`Self::symbol_hotspots`],
    /// with deduplication per resolved module per stack.
    pub fn dso_hotspots<F>(&self, mut resolver: F, process: &ProcessFilter) -> Vec<DsoStat>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut acc: AHashMap<String, (u64, u64)> = AHashMap::default();
        let mut matcher = ProcessMatcher::new(process);
        let mut seen: AHashSet<String> = AHashSet::default();
        for (stack, &weight) in &self.stacks {
            let mut frames = stack.split(SEPARATOR);
            let proc = match frames.next() {
                Some(proc) => proc,
                None => continue,
            };
            if !matcher.matches(proc) {
                continue;
            }
            seen.clear();
            let mut last_dso = None;
            for sym in frames {
                let dso = match resolver(sym) {
                    Some(dso) => dso,
                    None => {
                        last_dso = None;
                        continue;
                    }
                };
                if !seen.contains(&dso) {
                    seen.insert(dso.clone());
                    acc.entry(dso.clone()).or_insert((0, 0)).0 += weight;
                }
                last_dso = Some(dso);
            }
            if let Some(dso) = last_dso {
                acc.entry(dso).or_insert((0, 0)).1 += weight;
            }
        }
        let mut stats: Vec<DsoStat> = acc
            .into_iter()
            .map(|(dso, (inclusive, leaf))| DsoStat {
                dso,
                inclusive,
                leaf,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.inclusive
                .cmp(&a.inclusive)
                .then_with(|| b.leaf.cmp(&a.leaf))
                .then_with(|| a.dso.cmp(&b.dso))
        });
        stats
    }

    // Subsets share this: keep the stacks whose symbol list satisfies `pred`.
    fn subset_by_predicate<F>(&self, mut pred: F) -> Self
    where
        F: FnMut(&str, &[&str]) -> bool,
    {
        let mut subset = FoldedMapping::default();
        for (stack, &weight) in &self.stacks {
            let frames: Vec<&str> = stack.split(SEPARATOR).collect();
            if frames.len() < 2 {
                continue;
            }
            if pred(stack, &frames[1..]) {
                *subset.entry(stack.clone()).or_insert(0) += weight;
            }
        }
        Self::from_mapping(subset)
    }

    /// The stacks containing `symbol` as an exact frame.
    ///
    /// With `contains_fallback`, stacks where the symbol appears anywhere in
    /// the key as a substring are kept too, which catches annotated variants
    /// like `sym_[k]`.
    pub fn subset_by_symbol(&self, symbol: &str, contains_fallback: bool) -> Self {
        self.subset_by_predicate(|stack, syms| {
            syms.contains(&symbol) || (contains_fallback && stack.contains(symbol))
        })
    }

    /// The stacks whose first frames equal `prefix`.
    pub fn subset_by_path_prefix<S: AsRef<str>>(&self, prefix: &[S]) -> Self {
        self.subset_by_predicate(|_, syms| {
            syms.len() >= prefix.len()
                && prefix.iter().zip(syms).all(|(p, s)| p.as_ref() == *s)
        })
    }

    /// The stacks whose last frames equal `suffix`.
    pub fn subset_by_path_suffix<S: AsRef<str>>(&self, suffix: &[S]) -> Self {
        self.subset_by_predicate(|_, syms| {
            syms.len() >= suffix.len()
                && suffix
                    .iter()
                    .zip(&syms[syms.len() - suffix.len()..])
                    .all(|(p, s)| p.as_ref() == *s)
        })
    }

    /// Of the `k` heaviest stacks, those where any frame starts with any of
    /// the given prefixes.
    pub fn filter_stacks_by_prefixes<S: AsRef<str>>(
        &self,
        prefixes: &[S],
        k: usize,
    ) -> Vec<StackStat> {
        self.topk_stacks(k)
            .into_iter()
            .filter(|stat| {
                stat.stack
                    .split(SEPARATOR)
                    .skip(1)
                    .any(|sym| prefixes.iter().any(|p| sym.starts_with(p.as_ref())))
            })
            .collect()
    }

    /// Converts symbol stats into shares over `total` (defaults to the
    /// analyzer's total weight).
    pub fn to_symbol_shares(&self, stats: &[SymbolStat], total: Option<u64>) -> Vec<SymbolShare> {
        let denom = match total.unwrap_or(self.total_weight) {
            0 => 1,
            d => d,
        } as f64;
        stats
            .iter()
            .map(|s| SymbolShare {
                symbol: s.symbol.clone(),
                inclusive: s.inclusive,
                leaf: s.leaf,
                inclusive_pct: s.inclusive as f64 / denom * 100.0,
                leaf_pct: s.leaf as f64 / denom * 100.0,
            })
            .collect()
    }

    /// Converts stack stats into shares over `total` (defaults to the
    /// analyzer's total weight).
    pub fn to_stack_shares(&self, stacks: &[StackStat], total: Option<u64>) -> Vec<StackShare> {
        let denom = match total.unwrap_or(self.total_weight) {
            0 => 1,
            d => d,
        } as f64;
        stacks
            .iter()
            .map(|s| StackShare {
                stack: s.stack.clone(),
                weight: s.weight,
                weight_pct: s.weight as f64 / denom * 100.0,
            })
            .collect()
    }
}
