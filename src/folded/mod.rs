//! The folded stack text format.
//!
//! One line per unique stack, `<process>;<frame_1>;…;<frame_n> <weight>`,
//! with the weight a non-negative decimal integer. This is the interchange
//! format between the collapser, the analyzer, the trie, and downstream
//! flame graph renderers.
//!
//! Parsing is tolerant by design: profiles get concatenated, annotated, and
//! hand-edited in practice, so empty lines, `#`/`:` metadata lines, and
//! anything that doesn't look like a stack are skipped with a debug log
//! rather than failing the whole file. Serialization sorts lines by key so
//! that output is diff-friendly and `parse(serialize(m)) == m` holds.

use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::Path;

use ahash::AHashMap;
use log::debug;

const CAPACITY_READER: usize = 128 * 1024;

/// A folded mapping: unique stack key to cumulative weight.
///
/// Keys have the form `process;frame_1;…;frame_n` with frames ordered entry
/// to leaf; weights are strictly positive.
pub type FoldedMapping = AHashMap<String, u64>;

/// Parses folded lines from a string.
///
/// Malformed lines are skipped; weights of duplicate keys accumulate.
pub fn parse_str(text: &str) -> FoldedMapping {
    let mut mapping = FoldedMapping::default();
    for line in text.lines() {
        parse_line_into(&mut mapping, line);
    }
    mapping
}

/// Parses folded lines from a buffered reader.
pub fn parse_reader<R>(mut reader: R) -> io::Result<FoldedMapping>
where
    R: BufRead,
{
    let mut mapping = FoldedMapping::default();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(mapping);
        }
        parse_line_into(&mut mapping, &line);
    }
}

/// Parses a folded file.
pub fn parse_file<P>(path: P) -> io::Result<FoldedMapping>
where
    P: AsRef<Path>,
{
    let file = File::open(path)?;
    parse_reader(io::BufReader::with_capacity(CAPACITY_READER, file))
}

/// Serializes the mapping as folded lines, sorted lexicographically by key.
pub fn write<W>(mapping: &FoldedMapping, mut writer: W) -> io::Result<()>
where
    W: Write,
{
    let mut keys: Vec<_> = mapping.keys().collect();
    keys.sort();
    for key in keys {
        write_line(&mut writer, key, mapping[key])?;
    }
    Ok(())
}

/// Serializes the mapping into a string of sorted folded lines.
pub fn to_string(mapping: &FoldedMapping) -> String {
    let mut out = Vec::new();
    // writing to a Vec cannot fail
    write(mapping, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

pub(crate) fn write_line<W>(writer: &mut W, key: &str, weight: u64) -> io::Result<()>
where
    W: Write,
{
    let mut value = itoa::Buffer::new();
    writer.write_all(key.as_bytes())?;
    writer.write_all(b" ")?;
    writer.write_all(value.format(weight).as_bytes())?;
    writer.write_all(b"\n")
}

// The single-line workhorse. Splits on the last space so symbols may contain
// spaces, and skips:
//  - blank lines,
//  - `#`/`:` metadata and counter artefacts,
//  - lines without a parseable weight,
//  - keys without a `;` (no process/frame separator).
fn parse_line_into(mapping: &mut FoldedMapping, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(':') {
        return;
    }
    let (key, weight) = match line.rsplit_once(' ') {
        Some((key, weight)) => (key.trim_end(), weight),
        None => {
            debug!("dropping folded line with no weight: {}", line);
            return;
        }
    };
    let weight: u64 = match weight.parse() {
        Ok(w) => w,
        Err(_) => {
            debug!("dropping folded line with malformed weight: {}", line);
            return;
        }
    };
    if !key.contains(';') {
        debug!("dropping folded line with no stack separator: {}", line);
        return;
    }
    if weight == 0 {
        return;
    }
    *mapping.entry(key.to_string()).or_insert(0) += weight;
}
