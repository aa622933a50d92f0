//! CENTRAL (CVS/RCS) keyword demangling, applied to a freshly exported tree
//! before it is copied into the DIST working tree (§4.8 step 3).
//!
//! Recognized keywords collapse from their expanded form, e.g.
//! `$Id: module.c,v 1.4 2020/01/02 03:04:05 user Exp $` to the bare `$Id$`,
//! so DIST does not see (and re-expand) CENTRAL's revision metadata. `$Log$`
//! is a special case: the content is a running changelog and must not be
//! discarded, only renamed to `$OldLog$` so the CENTRAL tool does not keep
//! re-expanding it once the file lives in DIST.

use std::path::Path;

use bigitr_core::util::list_files;

const KEYWORDS: &[&str] = &[
    "Author", "Date", "Header", "Id", "Name", "Locker", "RCSfile", "Revision", "Source", "State",
];

/// Rewrites every recognized `$Keyword:...$` token in `text`.
pub fn demangle_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        let ch = text[i..].chars().next().expect("valid char boundary");
        if ch != '$' {
            out.push(ch);
            i += ch.len_utf8();
            continue;
        }
        match scan_token(text, i) {
            Some((ident, end)) => {
                if ident == "Log" {
                    out.push_str("$OldLog");
                    out.push_str(&text[i + 1 + ident.len()..end]);
                    out.push('$');
                } else if KEYWORDS.contains(&ident) {
                    out.push('$');
                    out.push_str(ident);
                    out.push('$');
                } else {
                    out.push_str(&text[i..=end]);
                }
                i = end + 1;
            }
            None => {
                out.push('$');
                i += 1;
            }
        }
    }
    out
}

/// Given the index of an opening `$`, returns the keyword identifier and the
/// index of the closing `$`, if this looks like a CVS keyword token
/// (`$Ident:...$` or bare `$Ident$`). ASCII-only; CVS keywords never contain
/// non-ASCII identifiers.
fn scan_token(text: &str, dollar: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let mut j = dollar + 1;
    let ident_start = j;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if j == ident_start {
        return None;
    }
    let ident = &text[ident_start..j];
    if j < bytes.len() && bytes[j] == b'$' {
        return Some((ident, j));
    }
    if j < bytes.len() && bytes[j] == b':' {
        // Scan to the next '$' on the same logical token; CVS keyword
        // expansions never contain an embedded '$'.
        if let Some(rel) = text[j..].find('$') {
            return Some((ident, j + rel));
        }
    }
    None
}

/// Applies `demangle_text` to every file under `dir`, in place. Non-UTF-8
/// files are left untouched.
pub fn demangle_tree(dir: &Path) -> std::io::Result<()> {
    for name in list_files(dir)? {
        let path = dir.join(&name);
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let demangled = demangle_text(&contents);
        if demangled != contents {
            std::fs::write(&path, demangled)?;
        }
    }
    Ok(())
}
