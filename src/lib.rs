//! Hotfold turns raw [`perf script`] output into answers about where a program
//! spends its time.
//!
//! Sampling profilers record the call stack over and over; the interesting
//! signal only appears once those snapshots are aggregated. Hotfold implements
//! the classic aggregation pipeline in three stages:
//!
//! 1. **Collapsing** ([`collapse`]): parse the profiler's per-sample text
//!    records and fold identical call stacks into a single line with a weight,
//!    the ["folded stacks"] format popularized by flame graph tooling. Each
//!    folded key looks like `process;frame_1;...;frame_n` with frames ordered
//!    entry to leaf.
//! 2. **Folded I/O** ([`folded`]): read and write the folded text format. The
//!    parser is tolerant of metadata lines and malformed input; the writer
//!    produces lexicographically sorted, diff-friendly output.
//! 3. **Analysis** ([`analyze`], [`trie`], [`summary`]): query a folded
//!    mapping for symbol hotspots (inclusive and leaf cost), top stacks,
//!    subsets by symbol or call path, and build a call-path trie for
//!    depth-bounded overhead queries, weight-sorted subtree export, and
//!    per-path statistics. [`summary`] wraps the common workflows.
//!
//! # Collapsing a profile
//!
//! ```no_run
//! use hotfold::collapse::perf::{Folder, Options};
//! use hotfold::collapse::Collapse;
//!
//! let mut folder = Folder::from(Options::default());
//! // Reads `perf script` output, writes folded stacks.
//! folder.collapse_file(Some("perf-script.txt"), std::io::stdout())?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Querying hotspots
//!
//! ```
//! use hotfold::analyze::FoldedAnalyzer;
//!
//! let analyzer = FoldedAnalyzer::from_str("app;main;run;work 7\napp;main;idle 3\n");
//! let top = analyzer.topk_stacks(1);
//! assert_eq!(top[0].stack, "app;main;run;work");
//! assert_eq!(analyzer.total_weight(), 10);
//! ```
//!
//! The analyzer and trie are immutable once built and can be shared freely
//! between readers. The library installs no logger and keeps no global state;
//! diagnostics go through the [`log`] facade and malformed profiler input is
//! skipped rather than surfaced (see [`Error`] for what *is* surfaced).
//!
//! [`perf script`]: https://linux.die.net/man/1/perf-script
//! ["folded stacks"]: http://www.brendangregg.com/flamegraphs.html

#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

use std::io;

/// Stack collapsing for `perf script` output.
///
/// See the [crate-level documentation](crate) for details.
pub mod collapse;

/// Reading and writing the folded stack text format.
pub mod folded;

/// Hotspot queries over a folded mapping.
pub mod analyze;

/// Call-path prefix tree built from folded stacks.
pub mod trie;

/// High-level workflows composing collapse, analysis, and the trie.
pub mod summary;

/// The errors a hotfold operation can surface.
///
/// Only caller faults and I/O faults are surfaced; malformed profiler or
/// folded input is logged at debug level and skipped, and resolver failures
/// fall back to the un-expanded frame.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller passed an argument that can never produce a meaningful
    /// result, such as an empty symbol or an unparseable process regex.
    /// Detected before any work begins.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An underlying I/O operation failed, typically opening or reading a
    /// profile file.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A `Result` alias defaulting to [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
