//! Word splitting and the boundary grammar shared by every word-list and
//! full-text query node.
//!
//! The `regex` crate doesn't support lookaround, so where the original
//! implementation used zero-width lookbehind/lookahead to anchor a match to
//! a word boundary, this instead consumes the boundary character into a
//! non-capturing group and reports the span of an inner capture group as
//! the match. The semantics are the same: a boundary character never
//! overlaps two adjacent matches because tokens are always separated by at
//! least one of them.

use std::sync::LazyLock;

use regex::{
    Captures,
    Regex,
};

/// ASCII punctuation minus `-` and `_`, which are treated as word
/// characters rather than separators.
const PUNCT_CLASS: &str = "\\s!\"#$%&'()*+,./:;<=>?@\\[\\]^`{|}~";

static PUNCT_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("[{PUNCT_CLASS}]+")).unwrap());

/// The actual boundary character set `PUNCT_CLASS` spells out as a regex
/// class: whitespace plus ASCII punctuation, minus `-`/`_`. Used to trim
/// edges by `char`, not by scanning the regex source as a literal string
/// (which would also "match" the backslash and `s` that appear in
/// `PUNCT_CLASS` itself).
fn is_boundary_char(c: char) -> bool {
    c.is_whitespace() || (c.is_ascii_punctuation() && c != '-' && c != '_')
}

/// Splits `text` on runs of whitespace/punctuation, lower-cases each piece,
/// and strips any residual punctuation left at the edges.
pub fn split_words(text: &str) -> Vec<String> {
    PUNCT_SPLIT
        .split(text)
        .map(|word| word.trim_matches(is_boundary_char).to_lowercase())
        .collect()
}

/// `word` with a case-insensitive, word-boundary-anchored regex built
/// around it. `inner` is the already-escaped/assembled body (e.g. an
/// escaped literal, or `escaped_prefix` + [`not_punct_plus`]).
pub fn boundary_regex(inner: &str) -> Regex {
    Regex::new(&format!(
        "(?i)(?:^|[{PUNCT_CLASS}])({inner})(?:[{PUNCT_CLASS}]|$)"
    ))
    .expect("boundary regex assembled from escaped input must compile")
}

/// A `[^punctuation]+` fragment, for stitching prefix/suffix wildcards
/// together with the rest of a word.
pub fn not_punct_plus() -> String {
    format!("[^{PUNCT_CLASS}]+")
}

/// The span of capture group 1 from a boundary-anchored regex match -- the
/// actual word, with the consumed boundary characters excluded.
pub fn inner_span(captures: &Captures) -> (usize, usize) {
    let m = captures.get(1).expect("boundary_regex always has group 1");
    (m.start(), m.end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_whitespace() {
        assert_eq!(
            split_words("A wet, CAT-sat."),
            vec!["a", "wet", "cat-sat", ""]
        );
    }

    #[test]
    fn keeps_hyphen_and_underscore_as_word_chars() {
        assert_eq!(split_words("under_score-word"), vec!["under_score-word"]);
    }

    #[test]
    fn does_not_strip_trailing_s_as_punctuation() {
        assert_eq!(split_words("dogs"), vec!["dogs"]);
        assert_eq!(split_words("snakes and cats"), vec!["snakes", "and", "cats"]);
    }

    #[test]
    fn boundary_regex_matches_whole_words_only() {
        let re = boundary_regex(&regex::escape("cat"));
        assert!(re.is_match("a CAT."));
        assert!(!re.is_match("category"));
        let caps = re.captures("a CAT.").unwrap();
        let (start, end) = inner_span(&caps);
        assert_eq!(&"a CAT."[start..end], "CAT");
    }

    #[test]
    fn prefix_pattern_requires_strictly_longer_word() {
        let pattern = format!("{}{}", regex::escape("foo"), not_punct_plus());
        let re = boundary_regex(&pattern);
        assert!(re.is_match("foobar"));
        assert!(!re.is_match("foo"));
    }
}
