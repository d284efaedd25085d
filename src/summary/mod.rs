//! High-level, one-call workflows over folded profiles.
//!
//! These compose the folded parser, the analyzer, and the trie into the
//! handful of questions that come up every time someone opens a profile:
//! "what's hot?" ([`summarize_file`]), "what's hot under this symbol?"
//! ([`subset_summary_file`]), and "which call paths carry the weight?"
//! ([`path_stats_file`]). Every function is pure: inputs are read, a value is
//! returned, nothing is mutated.

use std::fmt;
use std::path::Path;

use num_format::{Buffer, Locale};
use regex::Regex;

use crate::analyze::{
    FoldedAnalyzer, Order, ProcessFilter, StackShare, SymbolFilter, SymbolShare,
};
use crate::folded::FoldedMapping;
use crate::trie::{PathStat, Trie};
use crate::{Error, Result};

/// Configuration for the summarize workflows.
#[derive(Clone, Debug)]
pub struct SummaryOptions {
    /// How many symbols to report.
    ///
    /// Default is 20.
    pub topk_symbols: usize,

    /// How many stacks to report.
    ///
    /// Default is 20.
    pub topk_stacks: usize,

    /// Which counter symbols are ranked by.
    ///
    /// Default is inclusive weight.
    pub order: Order,

    /// Applied to symbols while scanning.
    ///
    /// Default passes everything.
    pub symbol_filter: SymbolFilter,

    /// Only consider stacks whose process segment starts with this.
    ///
    /// Default is `None`.
    pub proc_prefix: Option<String>,

    /// Only consider stacks whose process segment matches this regular
    /// expression. Compiled when the summary runs; an invalid pattern is an
    /// [`Error::InvalidArgument`].
    ///
    /// Default is `None`.
    pub proc_regex: Option<String>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            topk_symbols: 20,
            topk_stacks: 20,
            order: Order::Inclusive,
            symbol_filter: SymbolFilter::default(),
            proc_prefix: None,
            proc_regex: None,
        }
    }
}

impl SummaryOptions {
    fn process_filter(&self) -> Result<ProcessFilter> {
        let regex = match &self.proc_regex {
            Some(expr) => Some(Regex::new(expr).map_err(|e| {
                Error::InvalidArgument(format!("bad process regex {:?}: {}", expr, e))
            })?),
            None => None,
        };
        Ok(ProcessFilter {
            prefix: self.proc_prefix.clone(),
            regex,
        })
    }
}

/// The hotspot summary of one profile.
#[derive(Clone, Debug)]
pub struct Summary {
    /// The sum of all stack weights in the analyzed mapping.
    pub total_weight: u64,
    /// The heaviest symbols, with their shares of the total.
    pub top_symbols: Vec<SymbolShare>,
    /// The heaviest stacks, with their shares of the total.
    pub top_stacks: Vec<StackShare>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut total = Buffer::default();
        total.write_formatted(&self.total_weight, &Locale::en);
        writeln!(f, "total weight: {}", total.as_str())?;
        if !self.top_symbols.is_empty() {
            writeln!(f, "top symbols (inclusive / leaf):")?;
            for share in &self.top_symbols {
                writeln!(f, "  {}", share)?;
            }
        }
        if !self.top_stacks.is_empty() {
            writeln!(f, "top stacks:")?;
            for share in &self.top_stacks {
                writeln!(f, "  {}", share)?;
            }
        }
        Ok(())
    }
}

/// Call-path statistics of one profile.
#[derive(Clone, Debug)]
pub struct PathStats {
    /// The trie total the percentages are relative to.
    pub total: u64,
    /// Terminating call paths, heaviest first.
    pub paths: Vec<PathStat>,
    /// Whether rows were cut to honor the limit.
    pub truncated: bool,
}

impl fmt::Display for PathStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut total = Buffer::default();
        total.write_formatted(&self.total, &Locale::en);
        writeln!(f, "total weight: {}", total.as_str())?;
        for path in &self.paths {
            writeln!(f, "  {}", path)?;
        }
        if self.truncated {
            writeln!(f, "  …")?;
        }
        Ok(())
    }
}

/// Summarizes an existing analyzer.
pub fn summarize_analyzer(analyzer: &FoldedAnalyzer, opt: &SummaryOptions) -> Result<Summary> {
    let process = opt.process_filter()?;

    let symbols = analyzer.topk_symbols(opt.topk_symbols, opt.order, &process, &opt.symbol_filter);
    let top_symbols = analyzer.to_symbol_shares(&symbols, None);

    let mut stacks = analyzer.topk_stacks(opt.topk_stacks);
    if opt.proc_prefix.is_some() || opt.proc_regex.is_some() {
        stacks.retain(|stat| {
            let proc = stat.stack.split(';').next().unwrap_or("");
            process.matches(proc)
        });
    }
    let top_stacks = analyzer.to_stack_shares(&stacks, None);

    Ok(Summary {
        total_weight: analyzer.total_weight(),
        top_symbols,
        top_stacks,
    })
}

/// Summarizes a folded mapping.
pub fn summarize_mapping(mapping: FoldedMapping, opt: &SummaryOptions) -> Result<Summary> {
    summarize_analyzer(&FoldedAnalyzer::from_mapping(mapping), opt)
}

/// Summarizes folded text.
pub fn summarize_str(text: &str, opt: &SummaryOptions) -> Result<Summary> {
    summarize_analyzer(&FoldedAnalyzer::from_str(text), opt)
}

/// Summarizes a folded file.
pub fn summarize_file<P: AsRef<Path>>(path: P, opt: &SummaryOptions) -> Result<Summary> {
    summarize_analyzer(&FoldedAnalyzer::from_file(path)?, opt)
}

/// Summarizes the subset of folded text containing `symbol`.
///
/// The subset keeps stacks with the symbol as an exact frame, or anywhere in
/// the key as a substring. An empty symbol is rejected.
pub fn subset_summary_str(text: &str, symbol: &str, opt: &SummaryOptions) -> Result<Summary> {
    subset_summary_analyzer(&FoldedAnalyzer::from_str(text), symbol, opt)
}

/// Summarizes the subset of a folded file containing `symbol`.
///
/// See [`subset_summary_str`].
pub fn subset_summary_file<P: AsRef<Path>>(
    path: P,
    symbol: &str,
    opt: &SummaryOptions,
) -> Result<Summary> {
    subset_summary_analyzer(&FoldedAnalyzer::from_file(path)?, symbol, opt)
}

fn subset_summary_analyzer(
    analyzer: &FoldedAnalyzer,
    symbol: &str,
    opt: &SummaryOptions,
) -> Result<Summary> {
    if symbol.is_empty() {
        return Err(Error::InvalidArgument(
            "symbol for subset summary must be non-empty".to_string(),
        ));
    }
    summarize_analyzer(&analyzer.subset_by_symbol(symbol, true), opt)
}

/// Call-path statistics of folded text, truncated to `limit` rows.
///
/// A limit of 0 means unlimited.
pub fn path_stats_str(text: &str, limit: usize) -> PathStats {
    path_stats_trie(Trie::from_str(text), limit)
}

/// Call-path statistics of a folded file, truncated to `limit` rows.
///
/// See [`path_stats_str`].
pub fn path_stats_file<P: AsRef<Path>>(path: P, limit: usize) -> Result<PathStats> {
    Ok(path_stats_trie(Trie::from_file(path)?, limit))
}

fn path_stats_trie(trie: Trie, limit: usize) -> PathStats {
    let mut paths = trie.path_stats();
    let truncated = limit != 0 && paths.len() > limit;
    if truncated {
        paths.truncate(limit);
    }
    PathStats {
        total: trie.total(),
        paths,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOLDED: &str = "\
web;main;handle;parse 6
web;main;handle;render 3
web;main;idle 1
db;main;query 10
";

    #[test]
    fn summarize_reports_shares() {
        let summary = summarize_str(FOLDED, &SummaryOptions::default()).unwrap();
        assert_eq!(summary.total_weight, 20);
        // "main" is in every stack
        assert_eq!(summary.top_symbols[0].symbol, "main");
        assert_eq!(summary.top_symbols[0].inclusive, 20);
        assert!((summary.top_symbols[0].inclusive_pct - 100.0).abs() < 1e-9);
        assert_eq!(summary.top_stacks[0].stack, "db;main;query");
        assert!((summary.top_stacks[0].weight_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_respects_topk() {
        let opt = SummaryOptions {
            topk_symbols: 1,
            topk_stacks: 2,
            ..SummaryOptions::default()
        };
        let summary = summarize_str(FOLDED, &opt).unwrap();
        assert_eq!(summary.top_symbols.len(), 1);
        assert_eq!(summary.top_stacks.len(), 2);

        let none = SummaryOptions {
            topk_symbols: 0,
            topk_stacks: 0,
            ..SummaryOptions::default()
        };
        let summary = summarize_str(FOLDED, &none).unwrap();
        assert!(summary.top_symbols.is_empty());
        assert!(summary.top_stacks.is_empty());
    }

    #[test]
    fn summarize_filters_processes() {
        let opt = SummaryOptions {
            proc_prefix: Some("web".to_string()),
            ..SummaryOptions::default()
        };
        let summary = summarize_str(FOLDED, &opt).unwrap();
        // shares stay relative to the whole profile
        assert_eq!(summary.total_weight, 20);
        assert_eq!(summary.top_symbols[0].symbol, "main");
        assert_eq!(summary.top_symbols[0].inclusive, 10);
        assert!(summary.top_stacks.iter().all(|s| s.stack.starts_with("web")));
    }

    #[test]
    fn summarize_regex_filter() {
        let opt = SummaryOptions {
            proc_regex: Some("^d.$".to_string()),
            ..SummaryOptions::default()
        };
        let summary = summarize_str(FOLDED, &opt).unwrap();
        assert_eq!(summary.top_symbols[0].inclusive, 10);

        let bad = SummaryOptions {
            proc_regex: Some("[".to_string()),
            ..SummaryOptions::default()
        };
        assert!(matches!(
            summarize_str(FOLDED, &bad),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn summarize_by_leaf_order() {
        let opt = SummaryOptions {
            order: Order::Leaf,
            topk_symbols: 1,
            ..SummaryOptions::default()
        };
        let summary = summarize_str(FOLDED, &opt).unwrap();
        assert_eq!(summary.top_symbols[0].symbol, "query");
        assert_eq!(summary.top_symbols[0].leaf, 10);
    }

    #[test]
    fn subset_summary_narrows_to_the_symbol() {
        let summary = subset_summary_str(FOLDED, "handle", &SummaryOptions::default()).unwrap();
        assert_eq!(summary.total_weight, 9);
        assert!(summary
            .top_stacks
            .iter()
            .all(|s| s.stack.contains("handle")));
    }

    #[test]
    fn subset_summary_rejects_empty_symbol() {
        assert!(matches!(
            subset_summary_str(FOLDED, "", &SummaryOptions::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn path_stats_truncate_and_flag() {
        let stats = path_stats_str(FOLDED, 2);
        assert_eq!(stats.total, 20);
        assert_eq!(stats.paths.len(), 2);
        assert!(stats.truncated);
        assert_eq!(stats.paths[0].path, "main;query");
        assert_eq!(stats.paths[0].count, 10);

        let unlimited = path_stats_str(FOLDED, 0);
        assert_eq!(unlimited.paths.len(), 4);
        assert!(!unlimited.truncated);
    }

    #[test]
    fn display_renders_two_decimal_percentages() {
        let summary = summarize_str("p;a 1\np;b 2\n", &SummaryOptions::default()).unwrap();
        let rendered = summary.to_string();
        assert!(rendered.contains("total weight: 3"));
        assert!(rendered.contains("66.67%"));

        let stats = path_stats_str("p;a 1\np;b 2\n", 0);
        assert!(stats.to_string().contains("66.67%"));
    }

    #[test]
    fn empty_input_summarizes_to_zero() {
        let summary = summarize_str("", &SummaryOptions::default()).unwrap();
        assert_eq!(summary.total_weight, 0);
        assert!(summary.top_symbols.is_empty());
        assert!(summary.top_stacks.is_empty());
        let stats = path_stats_str("", 10);
        assert_eq!(stats.total, 0);
        assert!(stats.paths.is_empty());
    }
}
