use std::io::{self, BufRead};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::collapse::common::{self, CollapsePrivate, Occurrences};
use crate::collapse::frame::{self, FrameOptions};
use crate::collapse::resolve::{self, Resolve};
use crate::folded::FoldedMapping;

/// `perf` folder configuration options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Annotate JIT functions with a `_[j]` suffix.
    ///
    /// Default is `false`.
    pub annotate_jit: bool,

    /// Annotate kernel functions with a `_[k]` suffix.
    ///
    /// Default is `false`.
    pub annotate_kernel: bool,

    /// Annotate both kernel and JIT functions. Shorthand for setting the two
    /// options above.
    ///
    /// Default is `false`.
    pub annotate_all: bool,

    /// Only consider samples of the given event type (see `perf list`). If
    /// this option is set to `None`, it will be set to the first encountered
    /// event type.
    ///
    /// Default is `None`.
    pub event_filter: Option<String>,

    /// Include raw addresses (e.g., `0xbfff0836`) where symbols can't be
    /// found, and keep `+0xHEX` offsets on symbols.
    ///
    /// Default is `false`.
    pub include_addrs: bool,

    /// Include PID in the root frame. If disabled, the root frame is given
    /// the name of the profiled process.
    ///
    /// Default is `false`.
    pub include_pid: bool,

    /// Include TID and PID in the root frame. Takes precedence over
    /// `include_pid`.
    ///
    /// Default is `false`.
    pub include_tid: bool,

    /// Expand inlined call chains by consulting an address-to-line resolver
    /// for each frame (see [`crate::collapse::resolve`]).
    ///
    /// Default is `false`.
    pub expand_inline: bool,

    /// Suffix each inline-expanded name with its `file:line` source context.
    /// Only meaningful together with `expand_inline`.
    ///
    /// Default is `false`.
    pub inline_context: bool,

    /// Append `:<srcline>` to symbols whose sample carried a source-line
    /// annotation (`perf script -F +srcline`).
    ///
    /// Default is `false`.
    pub srcline: bool,

    /// The number of threads to use.
    ///
    /// Default is the number of logical cores on your machine.
    pub nthreads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            annotate_jit: false,
            annotate_kernel: false,
            annotate_all: false,
            event_filter: None,
            include_addrs: false,
            include_pid: false,
            include_tid: false,
            expand_inline: false,
            inline_context: false,
            srcline: false,
            nthreads: *common::DEFAULT_NTHREADS,
        }
    }
}

/// One entry of a sample's call stack, as printed by `perf script`.
///
/// The symbol is raw: offsets, quotes, and `->` inline markers are preserved
/// here and canonicalized later by [`frame::canonical`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Instruction pointer as a hex string; may be empty.
    pub ip: String,
    /// The raw symbol name; `[unknown]` when the profiler had none.
    pub symbol: String,
    /// The module (dso path, `[kernel.kallsyms]`-style tag, or JIT map).
    pub module: String,
    /// Source `file:line` annotation, when the input carried one.
    pub srcline: Option<String>,
}

/// A single profiler sample: process identity, event, period, and the call
/// stack in the order `perf` prints it (leaf first).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Process display name, spaces replaced with underscores.
    pub command: String,
    /// Process id, when the header carried one.
    pub pid: Option<u32>,
    /// Thread id; equal to `pid` when the header had no separate TID.
    pub tid: Option<u32>,
    /// Event name (e.g. `cycles`), when the header carried one.
    pub event: Option<String>,
    /// Weight this sample contributes; defaults to 1.
    pub period: u64,
    /// The recorded call stack, leaf first.
    pub frames: Vec<Frame>,
}

/// A pull parser turning `perf script` text into [`Sample`]s.
///
/// Malformed lines are logged at debug level and skipped; the parser never
/// fails on bad data, only on I/O errors from the underlying reader.
pub struct SampleIter<R> {
    reader: R,
    line: String,
    current: Option<Sample>,
    done: bool,
}

impl<R: BufRead> SampleIter<R> {
    /// Creates a parser over the provided reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            current: None,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for SampleIter<R> {
    type Item = io::Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.done = true;
                    return self.current.take().map(Ok);
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            if self.line.starts_with('#') {
                continue;
            }
            let line = self.line.trim_end();

            if line.is_empty() {
                // a blank line terminates the current sample
                if let Some(sample) = self.current.take() {
                    return Some(Ok(sample));
                }
                continue;
            }

            // a new header flushes whatever sample is in flight
            if let Some(sample) = parse_header_line(line) {
                if let Some(prev) = self.current.replace(sample) {
                    return Some(Ok(prev));
                }
                continue;
            }

            if let Some(frame) = parse_frame_line(line) {
                match self.current.as_mut() {
                    Some(sample) => sample.frames.push(frame),
                    None => debug!("stack line outside a sample: {}", line),
                }
                continue;
            }

            if let Some(srcline) = srcline_candidate(line) {
                if let Some(frame) = self.current.as_mut().and_then(|s| s.frames.last_mut()) {
                    frame.srcline = Some(srcline.to_string());
                    continue;
                }
            }

            debug!("ignoring unrecognized line: {}", line);
        }
    }
}

// we have an event line, like:
//
//     java 25607 4794564.109216: cycles:
//     java 12688 [002] 6544038.708352: cpu-clock:
//     V8 WorkerThread 25607 4794564.109216: cycles:
//     java 24636/25607 [000] 4794564.109216: cycles:
//     vote   913    72.176760:     257597 cycles:uppp:
//
// The command is everything up to the first all-digit word (the PID, with an
// optional /TID); the trailing `<period>? <event>:` tail is optional.
fn parse_header_line(line: &str) -> Option<Sample> {
    let (comm, pid, tid) = header_line_parts(line)?;
    let pid: u32 = pid.parse().ok()?;
    let tid: u32 = match tid {
        Some(tid) => tid.parse().ok()?,
        None => pid,
    };
    let (period, event) = header_tail(line);
    Some(Sample {
        command: comm.replace(' ', "_"),
        pid: Some(pid),
        tid: Some(tid),
        event,
        period,
        frames: Vec::new(),
    })
}

fn header_line_parts(line: &str) -> Option<(&str, &str, Option<&str>)> {
    let mut word_start = 0;
    let mut all_digits = false;
    let mut last_was_space = false;
    let mut contains_slash_at = None;
    for (idx, c) in line.char_indices() {
        if c == ' ' {
            if all_digits && !last_was_space {
                // found an all-digit word
                let (pid, tid) = if let Some(slash) = contains_slash_at {
                    // found PID + TID
                    (&line[word_start..slash], Some(&line[(slash + 1)..idx]))
                } else {
                    // found a lone PID
                    (&line[word_start..idx], None)
                };
                // also trim comm in case multiple spaces were used to separate
                let comm = line[..(word_start - 1)].trim();
                if comm.is_empty() {
                    return None;
                }
                return Some((comm, pid, tid));
            }
            word_start = idx + 1;
            all_digits = true;
        } else if c == '/' {
            if all_digits {
                contains_slash_at = Some(idx);
            }
        } else if c.is_ascii_digit() {
            // we're still all digits if we were all digits
        } else {
            all_digits = false;
            contains_slash_at = None;
        }
        last_was_space = c == ' ';
    }
    None
}

// Parses the `: [<period>] <event>:` tail of a header. Headers that end with
// only the timestamp colon have no event and an implicit period of 1.
fn header_tail(line: &str) -> (u64, Option<String>) {
    let mut words = line.split_whitespace().rev();
    let last = match words.next() {
        Some(w) => w,
        None => return (1, None),
    };
    if !last.ends_with(':') || last.len() < 2 {
        return (1, None);
    }
    let event = &last[..last.len() - 1];
    match words.next() {
        // "... 4794564.109216: cycles:"
        Some(prev) if prev.ends_with(':') => (1, Some(event.to_string())),
        // "... 72.176760: 257597 cycles:"
        Some(prev) if prev.bytes().all(|b| b.is_ascii_digit()) => match words.next() {
            Some(before) if before.ends_with(':') => {
                (prev.parse().unwrap_or(1).max(1), Some(event.to_string()))
            }
            _ => (1, None),
        },
        _ => (1, None),
    }
}

// we have a stack line that shows one stack entry from the preceding event, like:
//
//     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
//     7f533952bc77 _dl_check_map_versions+0x597 (/usr/lib/ld-2.28.so)
//     7f53389994d0 [unknown] ([unknown])
//     main (/a.out)
fn parse_frame_line(line: &str) -> Option<Frame> {
    let (ip, symbol, module) = frame_line_parts(line)?;
    let symbol = match symbol.trim() {
        // no usable symbol; the annotator substitutes the module basename
        "" | "?" => "[unknown]",
        s => s,
    };
    Some(Frame {
        ip: ip.to_string(),
        symbol: symbol.to_string(),
        module: module.to_string(),
        srcline: None,
    })
}

fn frame_line_parts(line: &str) -> Option<(&str, &str, &str)> {
    let mut rest = line.trim().rsplitn(2, ' ');
    let mut module = rest.next()?;

    // The module is always wrapped in (); requiring them both tells frame
    // lines apart from everything else and keeps `is_applicable` honest.
    if !module.starts_with('(') || !module.ends_with(')') || module.len() < 2 {
        return None;
    }
    module = &module[1..(module.len() - 1)];

    let left = rest.next()?.trim();
    match left.split_once(' ') {
        Some((first, sym)) if is_hex_word(first) => Some((first, sym.trim(), module)),
        // frames without an instruction pointer: "<symbol> (<module>)";
        // a lone hex word is an address whose symbol could not be resolved
        _ if is_hex_word(left) => Some((left, "", module)),
        _ => Some(("", left, module)),
    }
}

fn is_hex_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_hexdigit() || b == b'x' || b == b'X')
}

// A bare "file:123" location line following a frame (perf script -F +srcline).
fn srcline_candidate(line: &str) -> Option<&str> {
    let t = line.trim();
    if t.is_empty() || t.contains(' ') || t.contains('(') {
        return None;
    }
    let (file, digits) = t.rsplit_once(':')?;
    if file.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(t)
}

#[derive(Clone, Debug)]
enum EventFilterState {
    None,
    Defaulted,
    Warned,
}

/// A stack collapser for the output of `perf script`.
///
/// To construct one, either use `perf::Folder::default()` or create an
/// [`Options`] and use `perf::Folder::from(options)`. A custom inline
/// resolver can be attached with [`Folder::with_resolver`].
pub struct Folder {
    /// Similar to, but different from, the `event_filter` field on `Options`:
    /// that field is the user's configuration and never changes, while this
    /// one is captured from the first concrete event encountered when the
    /// configuration left it open.
    event_filter: Option<String>,

    event_filtering: EventFilterState,

    /// The number of stacks per job to send to the threadpool.
    nstacks_per_job: usize,

    /// Derived from the annotation options, applied to every frame.
    frame_opts: FrameOptions,

    /// Shared inline resolver; present only when expansion is requested.
    resolver: Option<Arc<Mutex<dyn Resolve + Send>>>,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(mut opt: Options) -> Self {
        if opt.nthreads == 0 {
            opt.nthreads = 1;
        }
        if opt.annotate_all {
            opt.annotate_kernel = true;
            opt.annotate_jit = true;
        }
        let frame_opts = FrameOptions {
            annotate_kernel: opt.annotate_kernel,
            annotate_jit: opt.annotate_jit,
            include_addrs: opt.include_addrs,
        };
        #[cfg(feature = "inline")]
        let resolver: Option<Arc<Mutex<dyn Resolve + Send>>> = if opt.expand_inline {
            Some(Arc::new(Mutex::new(resolve::Addr2LineResolver::new())))
        } else {
            None
        };
        #[cfg(not(feature = "inline"))]
        let resolver: Option<Arc<Mutex<dyn Resolve + Send>>> = {
            if opt.expand_inline {
                warn!("inline expansion requested, but no resolver is available; build with the `inline` feature or attach one with `Folder::with_resolver`");
            }
            None
        };
        Self {
            event_filter: opt.event_filter.clone().filter(|f| !f.is_empty()),
            event_filtering: EventFilterState::None,
            nstacks_per_job: common::DEFAULT_NSTACKS_PER_JOB,
            frame_opts,
            resolver,
            opt,
        }
    }
}

impl Default for Folder {
    fn default() -> Self {
        Options::default().into()
    }
}

impl Folder {
    /// Creates a folder that consults the provided resolver for inline
    /// expansion, regardless of the `expand_inline` option.
    ///
    /// The resolver is shared between worker threads; a resolver with a warm
    /// cache can be reused across collapse runs.
    pub fn with_resolver(mut opt: Options, resolver: Arc<Mutex<dyn Resolve + Send>>) -> Self {
        opt.expand_inline = true;
        let mut folder = Self::from(opt);
        folder.resolver = Some(resolver);
        folder
    }

    /// Collapses the contents of the provided reader into a folded mapping.
    pub fn collapse_into_mapping<R>(&mut self, reader: R) -> io::Result<FoldedMapping>
    where
        R: BufRead,
    {
        Ok(self.collapse_occurrences(reader)?.into_map())
    }

    /// Collapses the contents of the provided file into a folded mapping.
    pub fn collapse_file_into_mapping<P>(&mut self, path: P) -> io::Result<FoldedMapping>
    where
        P: AsRef<Path>,
    {
        let file = std::fs::File::open(path)?;
        let reader = io::BufReader::with_capacity(common::CAPACITY_READER, file);
        self.collapse_into_mapping(reader)
    }

    fn fold_sample(&mut self, sample: Sample, occurrences: &mut Occurrences) {
        if let Some(event) = sample.event.as_deref() {
            match self.event_filter.as_deref() {
                Some(filter) if filter != event => {
                    if let EventFilterState::Defaulted = self.event_filtering {
                        // Merging together different event types, such as
                        // instructions and cycles, produces misleading
                        // results; say which one won, once.
                        warn!("Filtering for events of type: {}", filter);
                        self.event_filtering = EventFilterState::Warned;
                    }
                    return;
                }
                Some(_) => {}
                None => {
                    // By default only keep events of the first encountered
                    // event type.
                    self.event_filter = Some(event.to_string());
                    self.event_filtering = EventFilterState::Defaulted;
                }
            }
        }

        let mut key = String::with_capacity(
            sample.command.len()
                + sample
                    .frames
                    .iter()
                    .fold(0, |a, f| a + f.symbol.len() + 1),
        );
        key.push_str(&sample.command);
        let mut itoa_buf = itoa::Buffer::new();
        if self.opt.include_tid {
            if let (Some(pid), Some(tid)) = (sample.pid, sample.tid) {
                key.push(' ');
                key.push_str(itoa_buf.format(pid));
                key.push('/');
                key.push_str(itoa_buf.format(tid));
            }
        } else if self.opt.include_pid {
            if let Some(pid) = sample.pid {
                key.push(' ');
                key.push_str(itoa_buf.format(pid));
            }
        }

        // perf prints the leaf first; the folded key is ordered entry to leaf
        for f in sample.frames.iter().rev() {
            if self.opt.expand_inline {
                if let Some(names) = self.try_expand(f) {
                    // resolver output is ordered outermost caller first
                    for name in &names {
                        key.push(';');
                        key.push_str(&frame::canonical(name, &f.module, &f.ip, &self.frame_opts));
                    }
                    continue;
                }
            }

            let mut disp = f.symbol.clone();
            if self.opt.srcline {
                if let Some(srcline) = &f.srcline {
                    disp.push(':');
                    disp.push_str(srcline);
                }
            }
            // replace the separator before splitting on inline markers, so a
            // symbol can never smuggle one in
            let disp = disp.replace(';', ":");

            // An `->` chain encodes inlining within a single frame, callee
            // first; reversing it puts the callee rightmost in the key.
            let pieces: Vec<&str> = disp.split("->").filter(|p| !p.is_empty()).collect();
            if pieces.is_empty() {
                key.push(';');
                key.push_str(&frame::canonical(&disp, &f.module, &f.ip, &self.frame_opts));
            } else {
                for piece in pieces.iter().rev() {
                    key.push(';');
                    key.push_str(&frame::canonical(
                        piece.trim(),
                        &f.module,
                        &f.ip,
                        &self.frame_opts,
                    ));
                }
            }
        }

        occurrences.insert_or_add(key, sample.period);
    }

    // Asks the resolver for the inlined call chain at this frame's address.
    // Any failure (no resolver, unexpandable module, poisoned lock, empty
    // answer) falls back to the original frame; a partial chain is never used.
    fn try_expand(&self, f: &Frame) -> Option<Vec<String>> {
        if f.ip.is_empty() || !resolve::can_expand(&f.module) {
            return None;
        }
        let resolver = self.resolver.as_ref()?;
        let mut resolver = resolver.lock().ok()?;
        let names = resolver.resolve(&f.ip, &f.module, self.opt.inline_context)?;
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }
}

impl CollapsePrivate for Folder {
    fn pre_process<R>(&mut self, reader: &mut R, occurrences: &mut Occurrences) -> io::Result<()>
    where
        R: io::BufRead,
    {
        // If the user provided an explicit event filter there is nothing to
        // capture and the workers can start right away.
        if self.event_filter.is_some() {
            return Ok(());
        }

        // Otherwise fold whole stanzas on the main thread until the implicit
        // filter is known, so that which event "wins" never depends on worker
        // scheduling. Samples without any event never settle the filter; keep
        // going until one does or the input runs out.
        let mut stanza = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let blank = line.trim().is_empty();
            stanza.push_str(&line);
            if blank {
                self.collapse_single_threaded(stanza.as_bytes(), occurrences)?;
                stanza.clear();
                if self.event_filter.is_some() {
                    return Ok(());
                }
            }
        }
        if !stanza.is_empty() {
            self.collapse_single_threaded(stanza.as_bytes(), occurrences)?;
        }
        Ok(())
    }

    fn collapse_single_threaded<R>(
        &mut self,
        reader: R,
        occurrences: &mut Occurrences,
    ) -> io::Result<()>
    where
        R: io::BufRead,
    {
        for sample in SampleIter::new(reader) {
            let sample = sample?;
            self.fold_sample(sample, occurrences);
        }
        Ok(())
    }

    fn would_end_stack(&self, line: &[u8]) -> bool {
        line.iter().all(|b| b.is_ascii_whitespace())
    }

    fn clone_and_reset_stack_context(&self) -> Self {
        Self {
            event_filter: self.event_filter.clone(),
            event_filtering: self.event_filtering.clone(),
            nstacks_per_job: self.nstacks_per_job,
            frame_opts: self.frame_opts,
            resolver: self.resolver.clone(),
            opt: self.opt.clone(),
        }
    }

    fn is_applicable_(&mut self, input: &str) -> Option<bool> {
        // Valid input has an event line followed by a stack line.
        let mut last_line_was_header = false;
        for line in input.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if line.is_empty() {
                last_line_was_header = false;
                continue;
            }
            if last_line_was_header {
                return Some(frame_line_parts(line).is_some());
            }
            if parse_header_line(line).is_none() {
                // the first line that's not empty or a comment should be a header
                return Some(false);
            }
            last_line_was_header = true;
        }
        None
    }

    fn nstacks_per_job(&self) -> usize {
        self.nstacks_per_job
    }

    fn set_nstacks_per_job(&mut self, n: usize) {
        self.nstacks_per_job = n;
    }

    fn nthreads(&self) -> usize {
        self.opt.nthreads
    }

    fn set_nthreads(&mut self, n: usize) {
        self.opt.nthreads = if n == 0 { 1 } else { n };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse_str(input: &str, mut options: Options) -> String {
        options.nthreads = 1;
        let mut folder = Folder::from(options);
        let mut out = Vec::new();
        <Folder as crate::collapse::Collapse>::collapse(&mut folder, input.as_bytes(), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn samples(input: &str) -> Vec<Sample> {
        SampleIter::new(input.as_bytes())
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn parses_header_variants() {
        let s = &samples("java 25607 4794564.109216: cycles:\n")[0];
        assert_eq!(s.command, "java");
        assert_eq!((s.pid, s.tid), (Some(25607), Some(25607)));
        assert_eq!(s.event.as_deref(), Some("cycles"));
        assert_eq!(s.period, 1);

        let s = &samples("java 24636/25607 [000] 4794564.109216: cycles:\n")[0];
        assert_eq!((s.pid, s.tid), (Some(24636), Some(25607)));

        let s = &samples("V8 WorkerThread 25607 4794564.109216: cycles:\n")[0];
        assert_eq!(s.command, "V8_WorkerThread");

        let s = &samples("vote   913    72.176760:     257597 cycles:uppp:\n")[0];
        assert_eq!(s.period, 257597);
        assert_eq!(s.event.as_deref(), Some("cycles:uppp"));

        // trailing colon only: no period, no event
        let s = &samples("java 25607 4794564.109216:\n")[0];
        assert_eq!(s.period, 1);
        assert_eq!(s.event, None);
    }

    #[test]
    fn parses_frame_variants() {
        let text = "\
worker 42 100000: 1 cycles:
\tffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
\t7f533952bc77 _dl_check_map_versions+0x597 (/usr/lib/ld-2.28.so)
\t7f53389994d0 [unknown] ([unknown])
\tmain (/a.out)
\t7f1e2215d058  (/lib/x86_64-linux-gnu/libc-2.15.so)
";
        let s = &samples(text)[0];
        assert_eq!(s.frames.len(), 5);
        assert_eq!(s.frames[0].symbol, "native_safe_halt");
        assert_eq!(s.frames[0].module, "[kernel.kallsyms]");
        assert_eq!(s.frames[0].ip, "ffffffff8103ce3b");
        assert_eq!(s.frames[1].symbol, "_dl_check_map_versions+0x597");
        assert_eq!(s.frames[2].symbol, "[unknown]");
        // frame without an instruction pointer
        assert_eq!(s.frames[3].symbol, "main");
        assert_eq!(s.frames[3].ip, "");
        // empty symbol becomes [unknown]
        assert_eq!(s.frames[4].symbol, "[unknown]");
    }

    #[test]
    fn header_flushes_pending_sample() {
        let text = "\
worker 42 100000: 1 cycles:
\tffff main (/a.out)
worker 42 100001: 1 cycles:
\tffff idle (/a.out)
";
        let ss = samples(text);
        assert_eq!(ss.len(), 2);
        assert_eq!(ss[0].frames[0].symbol, "main");
        assert_eq!(ss[1].frames[0].symbol, "idle");
    }

    #[test]
    fn srcline_attaches_to_previous_frame() {
        let text = "\
worker 42 100000: 1 cycles:
\tffff main (/a.out)
\t/src/main.c:42
";
        let s = &samples(text)[0];
        assert_eq!(s.frames[0].srcline.as_deref(), Some("/src/main.c:42"));
    }

    #[test]
    fn basic_folding_aggregates_weight() {
        let text = "\
worker 42 100000: 1 cycles:
\tffff foo (/a.out)
\tffff main (/a.out)

worker 42 100001: 1 cycles:
\tffff foo (/a.out)
\tffff main (/a.out)

";
        assert_eq!(collapse_str(text, Options::default()), "worker;main;foo 2\n");
    }

    #[test]
    fn period_is_the_sample_weight() {
        let text = "\
worker 42 72.1: 250 cycles:
\tffff main (/a.out)

worker 42 72.2: 50 cycles:
\tffff main (/a.out)
";
        assert_eq!(collapse_str(text, Options::default()), "worker;main 300\n");
    }

    #[test]
    fn implicit_event_filter_keeps_first_event() {
        let text = "\
worker 42 72.1: 1 cycles:
\tffff a (/a.out)

worker 42 72.2: 1 instructions:
\tffff b (/a.out)

worker 42 72.3: 1 cycles:
\tffff a (/a.out)
";
        assert_eq!(collapse_str(text, Options::default()), "worker;a 2\n");
    }

    #[test]
    fn explicit_event_filter_wins() {
        let text = "\
worker 42 72.1: 1 cycles:
\tffff a (/a.out)

worker 42 72.2: 1 instructions:
\tffff b (/a.out)
";
        let options = Options {
            event_filter: Some("instructions".to_string()),
            ..Options::default()
        };
        assert_eq!(collapse_str(text, options), "worker;b 1\n");
    }

    #[test]
    fn pid_and_tid_suffixes() {
        let text = "\
worker 42/43 72.1: 1 cycles:
\tffff main (/a.out)
";
        let pid = Options {
            include_pid: true,
            ..Options::default()
        };
        assert_eq!(collapse_str(text, pid), "worker 42;main 1\n");
        let tid = Options {
            include_tid: true,
            ..Options::default()
        };
        assert_eq!(collapse_str(text, tid), "worker 42/43;main 1\n");
    }

    #[test]
    fn kernel_annotation() {
        let text = "\
worker 42 72.1: 1 cycles:
\tffff schedule ([kernel.kallsyms])
\tffff main (/a.out)
";
        let options = Options {
            annotate_kernel: true,
            ..Options::default()
        };
        assert_eq!(collapse_str(text, options), "worker;main;schedule_[k] 1\n");
    }

    #[test]
    fn annotate_all_covers_kernel_and_jit() {
        let text = "\
java 42 72.1: 1 cycles:
\tffff hot_method (/tmp/perf-42.map)
\tffff schedule ([kernel.kallsyms])
";
        let options = Options {
            annotate_all: true,
            ..Options::default()
        };
        assert_eq!(
            collapse_str(text, options),
            "java;schedule_[k];hot_method_[j] 1\n"
        );
    }

    #[test]
    fn inline_markers_put_the_callee_rightmost() {
        let text = "\
worker 42 72.1: 1 cycles:
\tffff inner->middle->outer (/a.out)
";
        assert_eq!(
            collapse_str(text, Options::default()),
            "worker;outer;middle;inner 1\n"
        );
    }

    #[test]
    fn srcline_option_suffixes_symbols() {
        let text = "\
worker 42 72.1: 1 cycles:
\tffff main (/a.out)
\tmain.c:7
";
        let options = Options {
            srcline: true,
            ..Options::default()
        };
        assert_eq!(collapse_str(text, options), "worker;main:main.c:7 1\n");
    }

    #[test]
    fn empty_stack_yields_process_only_key() {
        let text = "worker 42 72.1: 1 cycles:\n\n";
        assert_eq!(collapse_str(text, Options::default()), "worker 1\n");
    }

    #[test]
    fn custom_resolver_expands_inline_chains() {
        struct Fixed;
        impl Resolve for Fixed {
            fn resolve(&mut self, _: &str, _: &str, _: bool) -> Option<Vec<String>> {
                Some(vec!["caller".to_string(), "callee".to_string()])
            }
        }
        let text = "\
worker 42 72.1: 1 cycles:
\tffff opaque (/a.out)
";
        let mut folder = Folder::with_resolver(
            Options {
                nthreads: 1,
                ..Options::default()
            },
            Arc::new(Mutex::new(Fixed)),
        );
        let mut out = Vec::new();
        <Folder as crate::collapse::Collapse>::collapse(&mut folder, text.as_bytes(), &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "worker;caller;callee 1\n");
    }

    #[test]
    fn resolver_is_skipped_for_unexpandable_modules() {
        struct Never;
        impl Resolve for Never {
            fn resolve(&mut self, _: &str, _: &str, _: bool) -> Option<Vec<String>> {
                panic!("resolver must not be consulted for [unknown]");
            }
        }
        let text = "\
worker 42 72.1: 1 cycles:
\tffff [unknown] ([unknown])
";
        let mut folder = Folder::with_resolver(
            Options {
                nthreads: 1,
                ..Options::default()
            },
            Arc::new(Mutex::new(Never)),
        );
        let mut out = Vec::new();
        <Folder as crate::collapse::Collapse>::collapse(&mut folder, text.as_bytes(), &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "worker;[unknown] 1\n");
    }

    #[test]
    fn is_applicable_recognizes_perf_output() {
        let mut folder = Folder::default();
        let yes = "worker 42 100000: 1 cycles:\n\tffff main (/a.out)\n";
        assert_eq!(
            <Folder as CollapsePrivate>::is_applicable_(&mut folder, yes),
            Some(true)
        );
        let no = "a;b;c 12\na;b 3\n";
        assert_eq!(
            <Folder as CollapsePrivate>::is_applicable_(&mut folder, no),
            Some(false)
        );
    }
}
