//! Address-to-line resolution for inline expansion.
//!
//! Compilers inline aggressively, so a single instruction pointer often stands
//! for a whole chain of source-level calls. When inline expansion is enabled,
//! the collapser hands each frame's address and module to a [`Resolve`]
//! implementation and splices the returned chain into the stack in place of
//! the single frame.
//!
//! Resolution is strictly best-effort: a resolver that fails, times out, or
//! returns nothing makes the collapser fall back to the original frame. A
//! partial chain is never used.

/// Expands an instruction pointer within a module into the chain of inlined
/// functions that produced it.
pub trait Resolve {
    /// Resolves `ip` (a hex string, with or without a `0x` prefix) inside
    /// `module` into function names ordered outermost caller first, innermost
    /// callee last.
    ///
    /// When `include_context` is set, each name is suffixed with
    /// `:<file>:<line>`.
    ///
    /// Returns `None` (or an empty list) when no expansion is available.
    fn resolve(&mut self, ip: &str, module: &str, include_context: bool) -> Option<Vec<String>>;
}

/// Whether inline expansion is worth attempting for `module`.
///
/// Kernel images, perf JIT maps, and bracketed pseudo-modules such as
/// `[unknown]` or `[vdso]` carry no DWARF and are skipped outright.
pub fn can_expand(module: &str) -> bool {
    if module.is_empty() || module == "[unknown]" || module == "[unknown] (deleted)" {
        return false;
    }
    if super::frame::is_jit_module(module) {
        return false;
    }
    if module.contains("kernel.") {
        return false;
    }
    if module.starts_with('[') && module.ends_with(']') {
        return false;
    }
    true
}

#[cfg(feature = "inline")]
pub use self::addr2line_resolver::Addr2LineResolver;

#[cfg(feature = "inline")]
mod addr2line_resolver {
    use std::borrow::Cow;
    use std::fs::File;
    use std::sync::Arc;

    use addr2line::Context;
    use ahash::AHashMap;
    use gimli::{EndianArcSlice, RunTimeEndian, SectionId};
    use log::warn;
    use object::{Object, ObjectSection};

    use super::Resolve;

    type DwarfContext = Context<EndianArcSlice<RunTimeEndian>>;

    /// A [`Resolve`] implementation backed by the DWARF debug info of the
    /// module on disk, read through [`addr2line`].
    ///
    /// Contexts are cached per module, since loading the debug sections is by
    /// far the expensive part. Modules that cannot be opened or parsed are
    /// remembered as unresolvable so the warning is only emitted once.
    #[derive(Default)]
    pub struct Addr2LineResolver {
        contexts: AHashMap<String, Option<DwarfContext>>,
    }

    impl Addr2LineResolver {
        /// Creates a resolver with an empty context cache.
        pub fn new() -> Self {
            Self::default()
        }

        fn context(&mut self, module: &str) -> Option<&DwarfContext> {
            self.contexts
                .entry(module.to_string())
                .or_insert_with(|| load_context(module))
                .as_ref()
        }
    }

    impl Resolve for Addr2LineResolver {
        fn resolve(
            &mut self,
            ip: &str,
            module: &str,
            include_context: bool,
        ) -> Option<Vec<String>> {
            if !super::can_expand(module) {
                return None;
            }
            let addr = match u64::from_str_radix(ip.trim_start_matches("0x"), 16) {
                Ok(addr) => addr,
                Err(_) => return None,
            };
            let ctx = self.context(module)?;

            let mut frames = ctx.find_frames(addr).ok()?;
            let mut funcs = Vec::new();
            while let Some(frame) = frames.next().ok()? {
                let func = frame
                    .function
                    .as_ref()
                    .map(|func| {
                        let name = func.raw_name().unwrap_or_else(|_| Cow::from("??"));
                        match func.language {
                            Some(gimli::DW_LANG_Rust) => {
                                // demangle_auto leaves the trailing hash on
                                // Rust names; go through rustc_demangle with
                                // the alternate form instead.
                                format!("{:#}", rustc_demangle::demangle(&name))
                            }
                            lang => addr2line::demangle_auto(name, lang).to_string(),
                        }
                    })
                    .unwrap_or_else(|| "??".to_string());

                if include_context {
                    let (file, line) = match frame.location {
                        Some(ref loc) => (
                            loc.file
                                .as_ref()
                                .and_then(|f| f.rsplit(std::path::MAIN_SEPARATOR).next()),
                            loc.line,
                        ),
                        None => (None, None),
                    };
                    let located = match (file, line) {
                        (Some(file), Some(line)) => format!("{}:{}:{}", func, file, line),
                        (Some(file), None) => format!("{}:{}:?", func, file),
                        (None, Some(line)) => format!("{}:??:{}", func, line),
                        (None, None) => format!("{}:??:?", func),
                    };
                    funcs.push(located);
                } else {
                    funcs.push(func);
                }
            }
            if funcs.is_empty() {
                return None;
            }

            // find_frames yields the innermost frame first; callers expect the
            // outermost caller first.
            funcs.reverse();
            Some(funcs)
        }
    }

    fn load_context(module: &str) -> Option<DwarfContext> {
        let file = File::open(module)
            .map_err(|e| warn!("unable to open module {} for inline expansion: {}", module, e))
            .ok()?;

        // The underlying file may change while mapped, which would be
        // undefined behavior; profiled modules are effectively read-only for
        // the short life of a collapse run.
        let map = unsafe {
            memmap2::Mmap::map(&file)
                .map_err(|e| warn!("unable to mmap module {}: {}", module, e))
                .ok()?
        };

        let object = object::File::parse(&*map)
            .map_err(|e| warn!("unable to parse module {}: {}", module, e))
            .ok()?;

        let endian = if object.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        // Copy the debug sections into Arc-backed readers so the context owns
        // its data and can be shared with worker threads.
        let load_section = |id: SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..]));
            Ok(EndianArcSlice::new(Arc::from(&*data), endian))
        };

        let dwarf = gimli::Dwarf::load(load_section).ok()?;
        Context::from_dwarf(dwarf)
            .map_err(|e| {
                warn!("could not parse debug symbols from module {}: {}", module, e);
            })
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_guards() {
        assert!(can_expand("/usr/lib/libc-2.24.so"));
        assert!(can_expand("/lib/x86_64-linux-gnu/libpthread-2.15.so"));
        assert!(!can_expand(""));
        assert!(!can_expand("[unknown]"));
        assert!(!can_expand("[unknown] (deleted)"));
        assert!(!can_expand("[vdso]"));
        assert!(!can_expand("[kernel.kallsyms]"));
        assert!(!can_expand("/tmp/perf-10939.map"));
    }
}
