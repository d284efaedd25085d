//! Canonical frame strings.
//!
//! A raw profiler frame is a `(symbol, module, instruction pointer)` triple.
//! Before a frame can participate in a folded stack key it has to be reduced
//! to a single string that contains no `;` (the stack separator), has its
//! argument list trimmed, and carries the optional kernel/JIT annotation
//! suffix. [`canonical`] performs that reduction; it is idempotent, so frames
//! that went through it once come out unchanged a second time.

/// Controls how a raw symbol is turned into a canonical frame string.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameOptions {
    /// Append `_[k]` to frames whose module is a kernel image.
    pub annotate_kernel: bool,
    /// Append `_[j]` to frames whose module is a perf JIT map.
    pub annotate_jit: bool,
    /// Keep `+0xHEX` offsets on symbols and embed raw addresses in
    /// placeholder frames for unresolved symbols.
    pub include_addrs: bool,
}

/// Whether `module` names a kernel image.
///
/// Kernel frames come from modules like `[kernel.kallsyms]`,
/// `[nf_conntrack_ipv4]`, or a built `vmlinux`; `[unknown]` is not one.
pub fn is_kernel_module(module: &str) -> bool {
    if module.is_empty() || module.contains("unknown") {
        return false;
    }
    module.starts_with('[') || module.ends_with("vmlinux")
}

/// Whether `module` names a perf JIT map, i.e. contains `/tmp/perf-<pid>.map`.
pub fn is_jit_module(module: &str) -> bool {
    if let Some(start) = module.find("/tmp/perf-") {
        let rest = &module[start + "/tmp/perf-".len()..];
        if let Some(end) = rest.find(".map") {
            let digits = &rest[..end];
            return !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
        }
    }
    false
}

/// Strips a trailing `+0xHEX` symbol offset, if present.
pub fn strip_offset(symbol: &str) -> &str {
    if let Some(offset) = symbol.rfind("+0x") {
        let end = &symbol[(offset + 3)..];
        if !end.is_empty() && end.bytes().all(|b| b.is_ascii_hexdigit()) {
            return &symbol[..offset];
        }
    }
    symbol
}

/// Builds the canonical frame string for a raw `(symbol, module, ip)` triple.
///
/// The output is non-empty and contains no semicolons. Unresolved symbols
/// (the literal `[unknown]`) borrow the module's basename, like `[libc-2.31.so]`,
/// or carry the raw address when `include_addrs` is set.
pub fn canonical(symbol: &str, module: &str, ip: &str, opt: &FrameOptions) -> String {
    let sym = if opt.include_addrs {
        symbol
    } else {
        strip_offset(symbol)
    };

    let mut func = if sym.trim() == "[unknown]" {
        with_module_fallback(module, ip, opt.include_addrs)
    } else {
        sym.to_string()
    };

    if func.contains(';') {
        func = func.replace(';', ":");
    }
    if func.contains('"') || func.contains('\'') {
        func.retain(|c| c != '"' && c != '\'');
    }
    func = tidy_generic(func);

    // a symbol that tidied away entirely (e.g. a bare "(deleted)" marker)
    // still has to produce a frame
    if func.is_empty() {
        func = with_module_fallback(module, ip, opt.include_addrs);
    }

    if opt.annotate_kernel && is_kernel_module(module) && !func.ends_with("_[k]") {
        func.push_str("_[k]");
    }
    if opt.annotate_jit && is_jit_module(module) && !func.ends_with("_[j]") {
        func.push_str("_[j]");
    }

    func
}

// Use part of the module name as the function name when the symbol itself is
// unknown; see stackcollapse-perf's module fallback.
fn with_module_fallback(module: &str, ip: &str, include_addrs: bool) -> String {
    let inner = if module.trim().is_empty() || module == "[unknown]" {
        "unknown"
    } else {
        // everything following the last / of the module path
        &module[module.rfind('/').map(|i| i + 1).unwrap_or(0)..]
    };

    let mut res = String::with_capacity(inner.len() + ip.len() + 6);
    res.push('[');
    res.push_str(inner);
    if include_addrs && !ip.is_empty() {
        res.push_str(" <");
        res.push_str(ip);
        res.push('>');
    }
    res.push(']');
    res
}

// Remove the argument list from a function name, but _don't_ remove:
//
//  - method names carrying a `.(...).` segment, like Go's
//    "net/http.(*Client).Do"
//  - C++ anonymous namespace annotations, "(anonymous namespace)::run"
fn tidy_generic(mut func: String) -> String {
    if has_dotted_parens(&func) {
        return func;
    }
    let mut search_from = 0;
    while let Some(rel) = func[search_from..].find('(') {
        let first_paren = search_from + rel;
        if func[first_paren + 1..].starts_with("anonymous namespace)") {
            search_from = first_paren + 1;
            continue;
        }
        func.truncate(first_paren);
        break;
    }
    func
}

// Matches the `\.\(.*\)\.` guard: a '.' immediately before a '(' with a ').'
// somewhere after it.
fn has_dotted_parens(func: &str) -> bool {
    if let Some(i) = func.find(".(") {
        return func[i + 2..].contains(").");
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotated(kernel: bool, jit: bool) -> FrameOptions {
        FrameOptions {
            annotate_kernel: kernel,
            annotate_jit: jit,
            include_addrs: false,
        }
    }

    #[test]
    fn module_classes() {
        assert!(is_kernel_module("[kernel.kallsyms]"));
        assert!(is_kernel_module("[nf_conntrack_ipv4]"));
        assert!(is_kernel_module("/lib/modules/4.3.0/build/vmlinux"));
        assert!(!is_kernel_module("[unknown]"));
        assert!(!is_kernel_module("/usr/lib/libc-2.31.so"));

        assert!(is_jit_module("/tmp/perf-19982.map"));
        assert!(is_jit_module("/tmp/perf-123.map (deleted)"));
        assert!(!is_jit_module("/tmp/perf-.map"));
        assert!(!is_jit_module("/tmp/perf-abc.map"));
        assert!(!is_jit_module("[kernel.kallsyms]"));
    }

    #[test]
    fn offsets_are_stripped_unless_requested() {
        let opt = FrameOptions::default();
        assert_eq!(
            canonical("_dl_check_map_versions+0x597", "/usr/lib/ld-2.28.so", "7f53", &opt),
            "_dl_check_map_versions"
        );
        let keep = FrameOptions {
            include_addrs: true,
            ..FrameOptions::default()
        };
        assert_eq!(
            canonical("_dl_check_map_versions+0x597", "/usr/lib/ld-2.28.so", "7f53", &keep),
            "_dl_check_map_versions+0x597"
        );
        // not a hex offset
        assert_eq!(canonical("foo+0xzz", "/a.so", "", &opt), "foo+0xzz");
    }

    #[test]
    fn unknown_symbols_borrow_the_module_name() {
        let opt = FrameOptions::default();
        assert_eq!(
            canonical("[unknown]", "/usr/lib/libc-2.31.so", "7f53", &opt),
            "[libc-2.31.so]"
        );
        assert_eq!(canonical("[unknown]", "[unknown]", "7f53", &opt), "[unknown]");

        let addrs = FrameOptions {
            include_addrs: true,
            ..FrameOptions::default()
        };
        assert_eq!(
            canonical("[unknown]", "/usr/lib/libc-2.31.so", "7f53", &addrs),
            "[libc-2.31.so <7f53>]"
        );
        assert_eq!(canonical("[unknown]", "[unknown]", "7f53", &addrs), "[unknown <7f53>]");
    }

    #[test]
    fn separators_and_quotes_are_removed() {
        let opt = FrameOptions::default();
        assert_eq!(canonical("a;b;c", "/a.so", "", &opt), "a:b:c");
        assert_eq!(canonical("say_\"hi\"_'there'", "/a.so", "", &opt), "say_hi_there");
    }

    #[test]
    fn argument_lists_are_trimmed_with_guards() {
        let opt = FrameOptions::default();
        assert_eq!(canonical("Foo::bar(int, long)", "/a.so", "", &opt), "Foo::bar");
        assert_eq!(
            canonical("net/http.(*Client).Do", "/a.so", "", &opt),
            "net/http.(*Client).Do"
        );
        assert_eq!(
            canonical("(anonymous namespace)::run(int)", "/a.so", "", &opt),
            "(anonymous namespace)::run"
        );
        // a symbol that tidies away entirely falls back to the module
        assert_eq!(canonical("(deleted)", "/a.so", "", &opt), "[a.so]");
    }

    #[test]
    fn kernel_and_jit_annotations() {
        assert_eq!(
            canonical("schedule", "[kernel.kallsyms]", "ffff", &annotated(true, false)),
            "schedule_[k]"
        );
        assert_eq!(
            canonical("schedule", "[kernel.kallsyms]", "ffff", &annotated(false, false)),
            "schedule"
        );
        assert_eq!(
            canonical(
                "Ljava/io/PrintStream::print",
                "/tmp/perf-19982.map",
                "7f72",
                &annotated(false, true)
            ),
            "Ljava/io/PrintStream::print_[j]"
        );
    }

    #[test]
    fn annotation_is_idempotent() {
        let opt = FrameOptions {
            annotate_kernel: true,
            annotate_jit: true,
            include_addrs: false,
        };
        for (sym, module, ip) in [
            ("schedule", "[kernel.kallsyms]", "ffff"),
            ("[unknown]", "/usr/lib/libc-2.31.so", "7f53"),
            ("Foo::bar(int)", "/a.so", ""),
            ("a;b", "/a.so", ""),
        ] {
            let once = canonical(sym, module, ip, &opt);
            let twice = canonical(&once, module, ip, &opt);
            assert_eq!(once, twice, "annotating {:?} twice changed it", sym);
        }
    }
}
