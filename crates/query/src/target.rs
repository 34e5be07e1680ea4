//! [`QueryTarget`]: the evaluable projection of a submission, and the field
//! views queries are matched against.

use std::collections::HashMap;

use serde::{
    Deserialize,
    Serialize,
};

use crate::tokenizer::split_words;

/// Opaque, totally-ordered submission identifier. Wraps the site's
/// monotonically increasing integer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionID(pub u64);

impl SubmissionID {
    pub fn key(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubmissionID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    #[serde(rename = "GENERAL")]
    General,
    #[serde(rename = "MATURE")]
    Mature,
    #[serde(rename = "ADULT")]
    Adult,
}

/// A text segment's address within a submission, e.g. `title_0`,
/// `keyword_3`. Used to check whether two match spans can overlap: they can
/// only if they share a `FieldLocation`.
pub type FieldLocation = String;

/// Which field(s) of a [`QueryTarget`] a query node should be evaluated
/// against. `Any` is the union of the other four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Title,
    Description,
    Keyword,
    Artist,
    Any,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Title => "title",
            FieldKind::Description => "desc",
            FieldKind::Keyword => "keywords",
            FieldKind::Artist => "artist",
            FieldKind::Any => "any",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The derived, queryable view of one field: its tokenized word list, its
/// raw text segments, and those same segments addressed by
/// [`FieldLocation`]. Computed once when the owning [`QueryTarget`] is
/// constructed.
#[derive(Debug, Clone, Default)]
pub struct FieldView {
    words: Vec<String>,
    texts: Vec<String>,
    texts_dict: Vec<(FieldLocation, String)>,
}

impl FieldView {
    fn tokenized(values: &[String], prefix: &str) -> Self {
        let words = values.iter().flat_map(|v| split_words(v)).collect();
        let texts_dict = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{prefix}_{i}"), v.clone()))
            .collect();
        Self {
            words,
            texts: values.to_vec(),
            texts_dict,
        }
    }

    /// Keyword/artist fields are already single tokens; each element is
    /// lower-cased wholesale rather than split on punctuation.
    fn pre_tokenized(values: &[String], prefix: &str) -> Self {
        let words = values.iter().map(|v| v.to_lowercase()).collect();
        let texts_dict = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{prefix}_{i}"), v.clone()))
            .collect();
        Self {
            words,
            texts: values.to_vec(),
            texts_dict,
        }
    }

    fn union(views: &[&FieldView]) -> Self {
        let mut words = Vec::new();
        let mut texts = Vec::new();
        let mut texts_dict = Vec::new();
        for view in views {
            words.extend(view.words.iter().cloned());
            texts.extend(view.texts.iter().cloned());
            texts_dict.extend(view.texts_dict.iter().cloned());
        }
        Self {
            words,
            texts,
            texts_dict,
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn texts_dict(&self) -> &[(FieldLocation, String)] {
        &self.texts_dict
    }
}

/// The evaluable projection of a submission: its text fields, tokenized and
/// addressed by location, plus its rating. Built once per submission and
/// reused for every subscription it's checked against.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    sub_id: SubmissionID,
    rating: Rating,
    title: FieldView,
    description: FieldView,
    keywords: FieldView,
    artist: FieldView,
    any: FieldView,
}

impl QueryTarget {
    pub fn new(
        sub_id: SubmissionID,
        title: Vec<String>,
        description: Vec<String>,
        keywords: Vec<String>,
        artist: Vec<String>,
        rating: Rating,
    ) -> Self {
        let title = FieldView::tokenized(&title, "title");
        let description = FieldView::tokenized(&description, "description");
        let keywords = FieldView::pre_tokenized(&keywords, "keyword");
        let artist = FieldView::pre_tokenized(&artist, "artist");
        let any = FieldView::union(&[&title, &description, &keywords, &artist]);
        Self {
            sub_id,
            rating,
            title,
            description,
            keywords,
            artist,
            any,
        }
    }

    pub fn sub_id(&self) -> SubmissionID {
        self.sub_id
    }

    pub fn rating(&self) -> Rating {
        self.rating
    }

    pub fn field(&self, kind: FieldKind) -> &FieldView {
        match kind {
            FieldKind::Title => &self.title,
            FieldKind::Description => &self.description,
            FieldKind::Keyword => &self.keywords,
            FieldKind::Artist => &self.artist,
            FieldKind::Any => &self.any,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct QueryTargetRecord {
    sub_id: u64,
    title: Vec<String>,
    keywords: Vec<String>,
    description: Vec<String>,
    artist: Vec<String>,
    rating: Rating,
}

impl Serialize for QueryTarget {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        QueryTargetRecord {
            sub_id: self.sub_id.0,
            title: self.title.texts.clone(),
            keywords: self.keywords.texts.clone(),
            description: self.description.texts.clone(),
            artist: self.artist.texts.clone(),
            rating: self.rating,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for QueryTarget {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let record = QueryTargetRecord::deserialize(deserializer)?;
        Ok(QueryTarget::new(
            SubmissionID(record.sub_id),
            record.title,
            record.description,
            record.keywords,
            record.artist,
            record.rating,
        ))
    }
}

/// A single `(field_location, start, end)` match span, as produced by
/// [`crate::ast::Query::match_locations`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchLocation {
    pub field: FieldLocation,
    pub start: usize,
    pub end: usize,
}

impl MatchLocation {
    pub fn new(field: impl Into<FieldLocation>, start: usize, end: usize) -> Self {
        Self {
            field: field.into(),
            start,
            end,
        }
    }

    pub fn overlaps(&self, other: &MatchLocation) -> bool {
        if self.field != other.field {
            return false;
        }
        if self.start < other.start {
            self.end > other.start
        } else {
            other.end > self.start
        }
    }

    pub fn overlaps_any(&self, others: &[MatchLocation]) -> bool {
        others.iter().any(|o| self.overlaps(o))
    }
}

/// Groups locations by field for O(1) overlap checks against a large
/// exclusion set, used by [`crate::ast::Query::Exception`].
pub fn index_by_field(locations: &[MatchLocation]) -> HashMap<&FieldLocation, Vec<&MatchLocation>> {
    let mut map: HashMap<&FieldLocation, Vec<&MatchLocation>> = HashMap::new();
    for loc in locations {
        map.entry(&loc.field).or_default().push(loc);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryTarget {
        QueryTarget::new(
            SubmissionID(42),
            vec!["A wet cat".to_string()],
            vec!["just a catfish".to_string()],
            vec!["Cat".to_string(), "Dog".to_string()],
            vec!["SomeArtist".to_string()],
            Rating::General,
        )
    }

    #[test]
    fn keyword_and_artist_fields_are_not_split() {
        let target = sample();
        assert_eq!(target.field(FieldKind::Keyword).words(), ["cat", "dog"]);
        assert_eq!(target.field(FieldKind::Artist).words(), ["someartist"]);
    }

    #[test]
    fn title_field_is_tokenized() {
        let target = sample();
        assert_eq!(target.field(FieldKind::Title).words(), ["a", "wet", "cat"]);
    }

    #[test]
    fn any_field_is_the_union() {
        let target = sample();
        let any_words = target.field(FieldKind::Any).words();
        assert!(any_words.contains(&"cat".to_string()));
        assert!(any_words.contains(&"dog".to_string()));
        assert!(any_words.contains(&"someartist".to_string()));
    }

    #[test]
    fn round_trips_through_json() {
        let target = sample();
        let json = serde_json::to_string(&target).unwrap();
        let back: QueryTarget = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sub_id(), target.sub_id());
        assert_eq!(back.rating(), target.rating());
        assert_eq!(back.field(FieldKind::Title).texts(), target.field(FieldKind::Title).texts());
    }

    #[test]
    fn overlap_requires_same_field() {
        let a = MatchLocation::new("title_0", 0, 3);
        let b = MatchLocation::new("title_0", 2, 5);
        let c = MatchLocation::new("description_0", 2, 5);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
