//! Name pattern matching for symbol and filename search.
//!
//! Matching is specified, not regex-based: a pattern is either a
//! contiguous substring or an in-order subsequence, optionally anchored
//! to the start and/or end of the name, optionally case-folded. Case
//! folding is a simple one-to-one lowercase fold applied to both sides.

/// How a pattern is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    /// The match must begin at the first character of the name.
    pub anchor_start: bool,
    /// The last matched pattern character must land on the final
    /// character of the name.
    pub anchor_end: bool,
    /// Pattern characters must appear in order but need not be
    /// contiguous.
    pub subsequence: bool,
    /// Fold both sides to lowercase before comparing.
    pub ignore_case: bool,
}

fn fold(text: &str, ignore_case: bool) -> Vec<char> {
    if ignore_case {
        text.chars()
            .map(|c| c.to_lowercase().next().unwrap_or(c))
            .collect()
    } else {
        text.chars().collect()
    }
}

fn is_subsequence(name: &[char], pattern: &[char]) -> bool {
    let mut pattern = pattern.iter();
    let mut next = pattern.next();
    for c in name {
        match next {
            Some(p) if p == c => next = pattern.next(),
            Some(_) => {}
            None => break,
        }
    }
    next.is_none()
}

/// Test `name` against `pattern`. The empty pattern matches every name.
pub fn matches_pattern(name: &str, pattern: &str, options: &PatternOptions) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let name = fold(name, options.ignore_case);
    let pattern = fold(pattern, options.ignore_case);
    let (mut name, mut pattern) = (name.as_slice(), pattern.as_slice());

    if options.subsequence {
        if options.anchor_end {
            match (name.last(), pattern.last()) {
                (Some(n), Some(p)) if n == p => {
                    name = &name[..name.len() - 1];
                    pattern = &pattern[..pattern.len() - 1];
                }
                _ => return false,
            }
        }
        if options.anchor_start {
            if pattern.is_empty() {
                // Single-character pattern with both anchors: the match
                // must both start and end the name.
                return name.is_empty();
            }
            match name.first() {
                Some(n) if *n == pattern[0] => {
                    name = &name[1..];
                    pattern = &pattern[1..];
                }
                _ => return false,
            }
        }
        return is_subsequence(name, pattern);
    }

    match (options.anchor_start, options.anchor_end) {
        (true, true) => name == pattern,
        (true, false) => name.starts_with(pattern),
        (false, true) => name.ends_with(pattern),
        (false, false) => {
            pattern.len() <= name.len()
                && name.windows(pattern.len()).any(|window| window == pattern)
        }
    }
}
