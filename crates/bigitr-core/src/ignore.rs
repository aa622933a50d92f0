//! Line-oriented pattern file, glob (default) or regex (opt-in) mode.
//! `filter()` excludes matches, `include()` keeps only matches.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Glob,
    Regex,
}

#[derive(Debug, Clone)]
pub struct Ignore {
    patterns: Vec<String>,
    mode: Mode,
}

impl Ignore {
    /// Loads patterns from `path`. A missing file yields an empty pattern
    /// set rather than an error — `include()` treats that case specially.
    pub fn load(path: &Path, mode: Mode) -> std::io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents, mode)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Ignore { patterns: Vec::new(), mode })
            }
            Err(err) => Err(err),
        }
    }

    pub fn parse(contents: &str, mode: Mode) -> Self {
        let patterns = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Ignore { patterns, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn matches_any(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| self.matches_one(p, path))
    }

    fn matches_one(&self, pattern: &str, path: &str) -> bool {
        match self.mode {
            Mode::Regex => regex_lite_match(pattern, path),
            Mode::Glob => {
                if pattern.contains('/') {
                    glob_match(pattern, path)
                } else {
                    let basename = path.rsplit('/').next().unwrap_or(path);
                    glob_match(pattern, basename)
                }
            }
        }
    }

    /// Exclusion: everything in `paths` that matches no pattern.
    pub fn filter(&self, paths: &BTreeSet<String>) -> BTreeSet<String> {
        paths
            .iter()
            .filter(|p| !self.matches_any(p))
            .cloned()
            .collect()
    }

    /// Inclusion: only entries matching some pattern. Returns the input
    /// unchanged when this Ignore was built from a pattern file that did
    /// not exist (an empty set loaded from a present-but-empty file still
    /// filters everything out, matching `include()`'s contract in §4.4).
    pub fn include(&self, paths: &BTreeSet<String>, file_existed: bool) -> BTreeSet<String> {
        if !file_existed {
            return paths.clone();
        }
        paths
            .iter()
            .filter(|p| self.matches_any(p))
            .cloned()
            .collect()
    }
}

/// Memoized glob matcher supporting `*` (any run, no `/` semantics implied
/// here since callers already chose full-path vs basename matching) and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    let cols = txt.len() + 1;
    let mut memo: Vec<Option<bool>> = vec![None; (pat.len() + 1) * cols];
    glob_match_inner(&pat, &txt, 0, 0, cols, &mut memo)
}

fn glob_match_inner(
    pattern: &[char],
    text: &[char],
    pi: usize,
    ti: usize,
    cols: usize,
    memo: &mut [Option<bool>],
) -> bool {
    let key = pi * cols + ti;
    if let Some(cached) = memo[key] {
        return cached;
    }

    let result = if pi == pattern.len() {
        ti == text.len()
    } else {
        match pattern[pi] {
            '*' => {
                glob_match_inner(pattern, text, pi + 1, ti, cols, memo)
                    || (ti < text.len() && glob_match_inner(pattern, text, pi, ti + 1, cols, memo))
            }
            '?' => ti < text.len() && glob_match_inner(pattern, text, pi + 1, ti + 1, cols, memo),
            literal => {
                ti < text.len() && text[ti] == literal
                    && glob_match_inner(pattern, text, pi + 1, ti + 1, cols, memo)
            }
        }
    };

    memo[key] = Some(result);
    result
}

/// Minimal regex matcher: since the regex crate is not part of this
/// workspace's dependency stack, opt-in regex mode is implemented against
/// the small subset actually needed by ignore-pattern authors (`.`, `*`,
/// anchors, literal text) rather than pulling in a full engine for a
/// non-default mode.
fn regex_lite_match(pattern: &str, text: &str) -> bool {
    let anchored_start = pattern.starts_with('^');
    let anchored_end = pattern.ends_with('$');
    let core = pattern
        .strip_prefix('^')
        .unwrap_or(pattern)
        .strip_suffix('$')
        .unwrap_or(pattern.strip_prefix('^').unwrap_or(pattern));

    if anchored_start && anchored_end {
        return regex_core_match(core, text);
    }

    // Char (not byte) boundaries, so slicing never lands mid-codepoint on
    // non-ASCII paths.
    let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();

    if anchored_start {
        return boundaries.iter().any(|&end| regex_core_match(core, &text[..end]));
    }
    if anchored_end {
        return boundaries.iter().any(|&start| regex_core_match(core, &text[start..]));
    }
    boundaries.iter().any(|&start| {
        boundaries.iter().filter(|&&end| end >= start).any(|&end| regex_core_match(core, &text[start..end]))
    })
}

fn regex_core_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    regex_core_inner(&pat, &txt, 0, 0)
}

fn regex_core_inner(pattern: &[char], text: &[char], pi: usize, ti: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }
    let next_is_star = pattern.get(pi + 1) == Some(&'*');
    if next_is_star {
        let matches_here = |t: usize| pattern[pi] == '.' || text.get(t) == Some(&pattern[pi]);
        let mut t = ti;
        if regex_core_inner(pattern, text, pi + 2, t) {
            return true;
        }
        while t < text.len() && matches_here(t) {
            t += 1;
            if regex_core_inner(pattern, text, pi + 2, t) {
                return true;
            }
        }
        return false;
    }
    if ti < text.len() && (pattern[pi] == '.' || pattern[pi] == text[ti]) {
        return regex_core_inner(pattern, text, pi + 1, ti + 1);
    }
    false
}
