//! The query AST: a tagged variant per node kind, each able to evaluate a
//! boolean match and, for the location-producing subset, enumerate the
//! spans it matched at.

use regex::Regex;

use crate::{
    target::{
        FieldKind,
        MatchLocation,
        QueryTarget,
        Rating,
    },
    tokenizer::{
        boundary_regex,
        inner_span,
        not_punct_plus,
    },
};

#[derive(Debug, Clone)]
pub struct WordMatch {
    pub word: String,
    lower: String,
    pub field: FieldKind,
    regex: Regex,
}

impl WordMatch {
    pub fn new(word: impl Into<String>, field: FieldKind) -> Self {
        let word = word.into();
        let lower = word.to_lowercase();
        let regex = boundary_regex(&regex::escape(&word));
        Self {
            word,
            lower,
            field,
            regex,
        }
    }

    pub fn matches(&self, target: &QueryTarget) -> bool {
        target.field(self.field).words().iter().any(|w| w == &self.lower)
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        locations_from_regex(&self.regex, target, self.field)
    }
}

impl PartialEq for WordMatch {
    fn eq(&self, other: &Self) -> bool {
        self.word == other.word && self.field == other.field
    }
}

#[derive(Debug, Clone)]
pub struct PrefixMatch {
    pub prefix: String,
    lower: String,
    pub field: FieldKind,
    regex: Regex,
}

impl PrefixMatch {
    pub fn new(prefix: impl Into<String>, field: FieldKind) -> Self {
        let prefix = prefix.into();
        let lower = prefix.to_lowercase();
        let pattern = format!("{}{}", regex::escape(&prefix), not_punct_plus());
        let regex = boundary_regex(&pattern);
        Self {
            prefix,
            lower,
            field,
            regex,
        }
    }

    pub fn matches(&self, target: &QueryTarget) -> bool {
        target
            .field(self.field)
            .words()
            .iter()
            .any(|w| w.starts_with(&self.lower) && w != &self.lower)
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        locations_from_regex(&self.regex, target, self.field)
    }
}

impl PartialEq for PrefixMatch {
    fn eq(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.field == other.field
    }
}

#[derive(Debug, Clone)]
pub struct SuffixMatch {
    pub suffix: String,
    lower: String,
    pub field: FieldKind,
    regex: Regex,
}

impl SuffixMatch {
    pub fn new(suffix: impl Into<String>, field: FieldKind) -> Self {
        let suffix = suffix.into();
        let lower = suffix.to_lowercase();
        let pattern = format!("{}{}", not_punct_plus(), regex::escape(&suffix));
        let regex = boundary_regex(&pattern);
        Self {
            suffix,
            lower,
            field,
            regex,
        }
    }

    pub fn matches(&self, target: &QueryTarget) -> bool {
        target
            .field(self.field)
            .words()
            .iter()
            .any(|w| w.ends_with(&self.lower) && w != &self.lower)
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        locations_from_regex(&self.regex, target, self.field)
    }
}

impl PartialEq for SuffixMatch {
    fn eq(&self, other: &Self) -> bool {
        self.suffix == other.suffix && self.field == other.field
    }
}

/// A word containing `*` wildcards, compiled into a boundary-anchored
/// regex: `*` splits the word into literal parts joined by `[^punct]+`.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    pub source: String,
    pub field: FieldKind,
    regex: Regex,
}

impl RegexMatch {
    pub fn from_wildcards(word: &str, field: FieldKind) -> Self {
        let parts: Vec<String> = word.split('*').map(regex::escape).collect();
        let pattern = parts.join(&not_punct_plus());
        let regex = boundary_regex(&pattern);
        Self {
            source: word.to_string(),
            field,
            regex,
        }
    }

    pub fn matches(&self, target: &QueryTarget) -> bool {
        target.field(self.field).words().iter().any(|w| self.regex.is_match(w))
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        locations_from_regex(&self.regex, target, self.field)
    }
}

impl PartialEq for RegexMatch {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.field == other.field
    }
}

#[derive(Debug, Clone)]
pub struct PhraseMatch {
    pub phrase: String,
    pub field: FieldKind,
    regex: Regex,
}

impl PhraseMatch {
    pub fn new(phrase: impl Into<String>, field: FieldKind) -> Self {
        let phrase = phrase.into();
        let regex = boundary_regex(&regex::escape(&phrase));
        Self { phrase, field, regex }
    }

    pub fn matches(&self, target: &QueryTarget) -> bool {
        target.field(self.field).texts().iter().any(|t| self.regex.is_match(t))
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        locations_from_regex(&self.regex, target, self.field)
    }
}

impl PartialEq for PhraseMatch {
    fn eq(&self, other: &Self) -> bool {
        self.phrase == other.phrase && self.field == other.field
    }
}

fn locations_from_regex(regex: &Regex, target: &QueryTarget, field: FieldKind) -> Vec<MatchLocation> {
    target
        .field(field)
        .texts_dict()
        .iter()
        .flat_map(|(location, text)| {
            regex.captures_iter(text).map(move |caps| {
                let (start, end) = inner_span(&caps);
                MatchLocation::new(location.clone(), start, end)
            })
        })
        .collect()
}

/// The location-producing subset of [`Query`]: leaves plus an `Or` over the
/// same subset. Used for [`Query::Exception`]'s two operands, so the type
/// system rules out nonsensical exceptions like `Rating EXCEPT cat`.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    Word(WordMatch),
    Prefix(PrefixMatch),
    Suffix(SuffixMatch),
    Regex(RegexMatch),
    Phrase(PhraseMatch),
    Or(Vec<LocationQuery>),
}

impl LocationQuery {
    /// Flattens nested `Or`s at construction, same as [`Query::or`].
    pub fn or(children: Vec<LocationQuery>) -> LocationQuery {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                LocationQuery::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        LocationQuery::Or(flat)
    }

    pub fn matches_submission(&self, target: &QueryTarget) -> bool {
        match self {
            LocationQuery::Word(w) => w.matches(target),
            LocationQuery::Prefix(p) => p.matches(target),
            LocationQuery::Suffix(s) => s.matches(target),
            LocationQuery::Regex(r) => r.matches(target),
            LocationQuery::Phrase(p) => p.matches(target),
            LocationQuery::Or(children) => children.iter().any(|c| c.matches_submission(target)),
        }
    }

    pub fn match_locations(&self, target: &QueryTarget) -> Vec<MatchLocation> {
        match self {
            LocationQuery::Word(w) => w.match_locations(target),
            LocationQuery::Prefix(p) => p.match_locations(target),
            LocationQuery::Suffix(s) => s.match_locations(target),
            LocationQuery::Regex(r) => r.match_locations(target),
            LocationQuery::Phrase(p) => p.match_locations(target),
            LocationQuery::Or(children) => {
                let mut locations: Vec<MatchLocation> =
                    children.iter().flat_map(|c| c.match_locations(target)).collect();
                locations.sort_by(|a, b| (&a.field, a.start, a.end).cmp(&(&b.field, b.start, b.end)));
                locations.dedup();
                locations
            },
        }
    }

    pub fn into_query(self) -> Query {
        match self {
            LocationQuery::Word(w) => Query::Word(w),
            LocationQuery::Prefix(p) => Query::Prefix(p),
            LocationQuery::Suffix(s) => Query::Suffix(s),
            LocationQuery::Regex(r) => Query::Regex(r),
            LocationQuery::Phrase(p) => Query::Phrase(p),
            LocationQuery::Or(children) => {
                Query::or(children.into_iter().map(LocationQuery::into_query).collect())
            },
        }
    }
}

impl std::fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationQuery::Word(w) => display_leaf(f, w.field, &w.word, Wildcard::None),
            LocationQuery::Prefix(p) => display_leaf(f, p.field, &p.prefix, Wildcard::Trailing),
            LocationQuery::Suffix(s) => display_leaf(f, s.field, &s.suffix, Wildcard::Leading),
            LocationQuery::Regex(r) => display_leaf(f, r.field, &r.source, Wildcard::None),
            LocationQuery::Phrase(p) => display_leaf(f, p.field, &format!("\"{}\"", p.phrase), Wildcard::None),
            LocationQuery::Or(children) => write!(
                f,
                "({})",
                children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" OR ")
            ),
        }
    }
}

enum Wildcard {
    None,
    /// `word*`, i.e. a [`PrefixMatch`].
    Trailing,
    /// `*word`, i.e. a [`SuffixMatch`].
    Leading,
}

fn display_leaf(
    f: &mut std::fmt::Formatter<'_>,
    field: FieldKind,
    body: &str,
    wildcard: Wildcard,
) -> std::fmt::Result {
    let rendered = match wildcard {
        Wildcard::None => body.to_string(),
        Wildcard::Trailing => format!("{body}*"),
        Wildcard::Leading => format!("*{body}"),
    };
    if field == FieldKind::Any {
        write!(f, "{rendered}")
    } else {
        write!(f, "{field}:{rendered}")
    }
}

/// A node in the boolean query language. See the module docs on
/// [`LocationQuery`] for why `Exception`'s operands are a distinct type.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Word(WordMatch),
    Prefix(PrefixMatch),
    Suffix(SuffixMatch),
    Regex(RegexMatch),
    Phrase(PhraseMatch),
    Rating(Rating),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Exception(LocationQuery, LocationQuery),
}

impl Query {
    /// Flattens nested `And`s at construction: `And([And([a,b]), c])` keeps
    /// the three children as siblings rather than nesting.
    pub fn and(children: Vec<Query>) -> Query {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Query::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Query::And(flat)
    }

    pub fn or(children: Vec<Query>) -> Query {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Query::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Query::Or(flat)
    }

    pub fn matches_submission(&self, target: &QueryTarget) -> bool {
        match self {
            Query::Word(w) => w.matches(target),
            Query::Prefix(p) => p.matches(target),
            Query::Suffix(s) => s.matches(target),
            Query::Regex(r) => r.matches(target),
            Query::Phrase(p) => p.matches(target),
            Query::Rating(rating) => target.rating() == *rating,
            Query::And(children) => children.iter().all(|c| c.matches_submission(target)),
            Query::Or(children) => children.iter().any(|c| c.matches_submission(target)),
            Query::Not(inner) => !inner.matches_submission(target),
            Query::Exception(word, exception) => {
                let exception_locations = exception.match_locations(target);
                word.match_locations(target)
                    .iter()
                    .any(|loc| !loc.overlaps_any(&exception_locations))
            },
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::Word(w) => display_leaf(f, w.field, &w.word, Wildcard::None),
            Query::Prefix(p) => display_leaf(f, p.field, &p.prefix, Wildcard::Trailing),
            Query::Suffix(s) => display_leaf(f, s.field, &s.suffix, Wildcard::Leading),
            Query::Regex(r) => display_leaf(f, r.field, &r.source, Wildcard::None),
            Query::Phrase(p) => display_leaf(f, p.field, &format!("\"{}\"", p.phrase), Wildcard::None),
            Query::Rating(rating) => {
                let name = match rating {
                    Rating::General => "general",
                    Rating::Mature => "mature",
                    Rating::Adult => "adult",
                };
                write!(f, "rating:{name}")
            },
            Query::And(children) => write!(
                f,
                "({})",
                children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" AND ")
            ),
            Query::Or(children) => write!(
                f,
                "({})",
                children.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" OR ")
            ),
            Query::Not(inner) => write!(f, "NOT {inner}"),
            Query::Exception(word, exception) => write!(f, "{word} EXCEPT {exception}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SubmissionID;

    fn target(title: &str, rating: Rating) -> QueryTarget {
        QueryTarget::new(
            SubmissionID(1),
            vec![title.to_string()],
            vec![],
            vec![],
            vec![],
            rating,
        )
    }

    #[test]
    fn and_or_not_are_boolean() {
        let t = target("a wet cat", Rating::General);
        let cat = Query::Word(WordMatch::new("cat", FieldKind::Any));
        let dog = Query::Word(WordMatch::new("dog", FieldKind::Any));
        assert!(Query::and(vec![cat.clone(), Query::Not(Box::new(dog.clone()))]).matches_submission(&t));
        assert!(!Query::and(vec![cat, dog]).matches_submission(&t));
    }

    #[test]
    fn and_flattens_nested_children() {
        let a = Query::Word(WordMatch::new("a", FieldKind::Any));
        let b = Query::Word(WordMatch::new("b", FieldKind::Any));
        let c = Query::Word(WordMatch::new("c", FieldKind::Any));
        let nested = Query::and(vec![Query::and(vec![a.clone(), b.clone()]), c.clone()]);
        match nested {
            Query::And(children) => assert_eq!(children, vec![a, b, c]),
            _ => panic!("expected And"),
        }
    }

    #[test]
    fn prefix_requires_strictly_longer_word() {
        let t = target("foobar", Rating::General);
        let prefix = PrefixMatch::new("foo", FieldKind::Title);
        assert!(prefix.matches(&t));
        assert!(!PrefixMatch::new("foobar", FieldKind::Title).matches(&t));
    }

    #[test]
    fn exception_excludes_overlapping_locations() {
        let t = target("the cat and the catfish", Rating::General);
        let word = LocationQuery::Word(WordMatch::new("cat", FieldKind::Any));
        let exception = LocationQuery::or(vec![
            LocationQuery::Word(WordMatch::new("cats", FieldKind::Any)),
            LocationQuery::Word(WordMatch::new("catfish", FieldKind::Any)),
        ]);
        let query = Query::Exception(word, exception);
        assert!(query.matches_submission(&t));

        let t2 = target("just a catfish", Rating::General);
        assert!(!query.matches_submission(&t2));
    }

    #[test]
    fn rating_matches_exact_value() {
        let t = target("fox", Rating::Adult);
        assert!(Query::Rating(Rating::Adult).matches_submission(&t));
        assert!(!Query::Rating(Rating::General).matches_submission(&t));
    }

    #[test]
    fn display_round_trips_not_and_except() {
        let word = Query::Word(WordMatch::new("cat", FieldKind::Any));
        let not_word = Query::Not(Box::new(word.clone()));
        assert_eq!(not_word.to_string(), "NOT cat");
    }
}
