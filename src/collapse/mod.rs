pub(crate) mod common;

/// Canonical frame strings: kernel/JIT detection, offset stripping, and the
/// normalization applied to every symbol before it joins a stack key.
pub mod frame;

/// Stack collapsing for the output of [`perf script`](https://linux.die.net/man/1/perf-script).
pub mod perf;

/// The address-to-line resolver used for inline expansion.
pub mod resolve;

// DEFAULT_NTHREADS is public so callers can reason about the default level of
// parallelism, but it doesn't need to show up in the docs.
#[doc(hidden)]
pub use self::common::DEFAULT_NTHREADS;

use std::fs::File;
use std::io;
use std::path::Path;

use self::common::{CollapsePrivate, CAPACITY_READER};

/// The abstract behavior of stack collapsing.
///
/// An implementor knows how to take the stack traces produced by a particular
/// profiler's output and fold them into the folded stack format consumed by
/// [`crate::analyze`] and [`crate::trie`], one `stack key<space>weight` line
/// per unique stack.
pub trait Collapse {
    /// Collapses the contents of the provided `reader` and writes folded
    /// stack lines to the provided `writer`.
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> io::Result<()>
    where
        R: io::BufRead,
        W: io::Write;

    /// Collapses the contents of the provided file (or of STDIN if `infile`
    /// is `None`) and writes folded stack lines to the provided `writer`.
    fn collapse_file<P, W>(&mut self, infile: Option<P>, writer: W) -> io::Result<()>
    where
        P: AsRef<Path>,
        W: io::Write,
    {
        match infile {
            Some(ref path) => {
                let file = File::open(path)?;
                let reader = io::BufReader::with_capacity(CAPACITY_READER, file);
                self.collapse(reader, writer)
            }
            None => {
                let stdio = io::stdin();
                let stdio_guard = stdio.lock();
                let reader = io::BufReader::with_capacity(CAPACITY_READER, stdio_guard);
                self.collapse(reader, writer)
            }
        }
    }

    /// Returns whether this implementation is appropriate for the given input.
    ///
    /// - `None` means "not sure -- need more input"
    /// - `Some(true)` means "yes, this implementation should work with this string"
    /// - `Some(false)` means "no, this implementation definitely won't work"
    fn is_applicable(&mut self, input: &str) -> Option<bool>;
}

impl<T> Collapse for T
where
    T: CollapsePrivate,
{
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> io::Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        <Self as CollapsePrivate>::collapse(self, reader, writer)
    }

    fn is_applicable(&mut self, input: &str) -> Option<bool> {
        <Self as CollapsePrivate>::is_applicable_(self, input)
    }
}
