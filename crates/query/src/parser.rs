//! Parses subscription query strings into a [`Query`] AST, grammar:
//!
//! ```text
//! expr       ::= full_elem (connector? full_elem)*
//! connector  ::= "and" | "or"
//! full_elem  ::= negator? elem
//! negator    ::= "!" | "-" | "not"
//! elem       ::= "(" expr ")" | quoted | field | word_with_exception
//! field      ::= ("@" name | name ":") field_value
//! field_value::= quoted | "(" word_with_exception ")" | word_with_exception
//! word_with_exception ::= word (("except" | "ignore") exception_list)?
//! exception_list ::= exception_elem | "(" exception_elem ("or"? exception_elem)* ")"
//! exception_elem ::= quoted | word
//! ```
//!
//! Recognized field names: `title`; `desc`/`description`/`message`;
//! `keyword`/`keywords`/`tag`/`tags`; `artist`/`author`/`poster`/`lower`/
//! `uploader`; `rating` (whose value must be a bare word, aliased through
//! `safe`/`questionable`/`explicit`).

use std::num::NonZeroUsize;

use errors::WatcherError;
use lru::LruCache;
use parking_lot::Mutex;

use crate::{
    ast::{
        LocationQuery,
        PhraseMatch,
        PrefixMatch,
        Query,
        RegexMatch,
        SuffixMatch,
        WordMatch,
    },
    target::{
        FieldKind,
        Rating,
    },
};

const RESERVED_WORDS: [&str; 5] = ["not", "and", "or", "except", "ignore"];

fn reserved(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|r| word.eq_ignore_ascii_case(r))
}

fn invalid(message: impl Into<String>) -> WatcherError {
    WatcherError::invalid_query(message.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Quoted(String),
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, WatcherError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            },
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            },
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => s.push(escaped),
                            None => return Err(invalid("unterminated escape in quoted string")),
                        },
                        Some(other) => s.push(other),
                        None => return Err(invalid("unterminated quoted string")),
                    }
                }
                tokens.push(Token::Quoted(s));
            },
            _ => {
                if c == ':' {
                    // A colon with no preceding word content (e.g. a stray
                    // or doubled ":"): consume it as its own token so the
                    // scanner always makes progress.
                    chars.next();
                    tokens.push(Token::Word(":".to_string()));
                    continue;
                }
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"' | ':') {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(s));
                if chars.peek() == Some(&':') {
                    chars.next();
                    tokens.push(Token::Word(":".to_string()));
                }
            },
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn is_colon(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == ":")
    }

    fn try_consume_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Word(w)) = self.peek() {
            if w.eq_ignore_ascii_case(keyword) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_rparen(&mut self) -> Result<(), WatcherError> {
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            _ => Err(invalid("expected closing parenthesis")),
        }
    }

    fn parse_expr(&mut self) -> Result<Query, WatcherError> {
        let mut result = self.parse_full_element()?;
        loop {
            if self.at_end() || self.peek() == Some(&Token::RParen) {
                break;
            }
            let mut joined_with_or = false;
            if self.try_consume_keyword("or") {
                joined_with_or = true;
            } else {
                self.try_consume_keyword("and");
            }
            let rhs = self.parse_full_element()?;
            result = if joined_with_or {
                Query::or(vec![result, rhs])
            } else {
                Query::and(vec![result, rhs])
            };
        }
        Ok(result)
    }

    fn parse_full_element(&mut self) -> Result<Query, WatcherError> {
        let mut negated = self.try_consume_keyword("not");
        if !negated {
            // "-"/"!" can stand alone ("cat - dog") or prefix a word with no
            // space ("cat -dog"); the tokenizer doesn't split the latter.
            if let Some(Token::Word(w)) = self.peek() {
                if w == "!" || w == "-" {
                    self.advance();
                    negated = true;
                } else if w.len() > 1 && (w.starts_with('-') || w.starts_with('!')) {
                    let rest = w[1..].to_string();
                    self.tokens[self.pos] = Token::Word(rest);
                    negated = true;
                }
            }
        }
        let element = self.parse_element()?;
        Ok(if negated { Query::Not(Box::new(element)) } else { element })
    }

    fn parse_element(&mut self) -> Result<Query, WatcherError> {
        match self.peek() {
            Some(Token::Quoted(s)) => {
                let s = s.clone();
                self.advance();
                Ok(Query::Phrase(PhraseMatch::new(s, FieldKind::Any)))
            },
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(inner)
            },
            Some(Token::Word(w)) if w.starts_with('@') && w.len() > 1 => {
                let name = w[1..].to_string();
                self.advance();
                self.parse_field_value(&name)
            },
            Some(Token::Word(w)) => {
                let w = w.clone();
                if self.is_field_form() {
                    self.advance(); // word
                    self.advance(); // colon
                    self.parse_field_value(&w)
                } else {
                    self.advance();
                    self.parse_word_with_exception(&w, FieldKind::Any)
                }
            },
            None => Err(invalid("unexpected end of query")),
        }
    }

    /// True if the current token is a bare word immediately followed by a
    /// `:`, i.e. `name:value` field syntax.
    fn is_field_form(&self) -> bool {
        matches!(self.peek(), Some(Token::Word(_)))
            && matches!(self.tokens.get(self.pos + 1), Some(Token::Word(w)) if w == ":")
    }

    fn parse_field_value(&mut self, name: &str) -> Result<Query, WatcherError> {
        let field = resolve_field(name)?;
        if name.eq_ignore_ascii_case("rating") {
            return self.parse_rating_value();
        }
        match self.peek() {
            Some(Token::Quoted(s)) => {
                let s = s.clone();
                self.advance();
                Ok(Query::Phrase(PhraseMatch::new(s, field)))
            },
            Some(Token::LParen) => {
                self.advance();
                let word = self.expect_word()?;
                let result = self.parse_word_with_exception(&word, field)?;
                self.expect_rparen()?;
                Ok(result)
            },
            Some(Token::Word(w)) => {
                let w = w.clone();
                self.advance();
                self.parse_word_with_exception(&w, field)
            },
            None => Err(invalid("expected a field value")),
        }
    }

    fn parse_rating_value(&mut self) -> Result<Query, WatcherError> {
        let word = self.expect_word()?;
        Ok(Query::Rating(resolve_rating(&word)?))
    }

    fn expect_word(&mut self) -> Result<String, WatcherError> {
        match self.advance() {
            Some(Token::Word(w)) if w != ":" => Ok(w),
            _ => Err(invalid("expected a word")),
        }
    }

    fn parse_word_with_exception(&mut self, word: &str, field: FieldKind) -> Result<Query, WatcherError> {
        if self.try_consume_keyword("except") || self.try_consume_keyword("ignore") {
            let subject = parse_word_token(word, field)?;
            let exception = self.parse_exception_list(field)?;
            Ok(Query::Exception(subject, exception))
        } else {
            Ok(parse_word_token(word, field)?.into_query())
        }
    }

    fn parse_exception_list(&mut self, field: FieldKind) -> Result<LocationQuery, WatcherError> {
        let mut elements = Vec::new();
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            elements.push(self.parse_exception_element(field)?);
            while !matches!(self.peek(), Some(Token::RParen)) {
                self.try_consume_keyword("or");
                elements.push(self.parse_exception_element(field)?);
            }
            self.expect_rparen()?;
        } else {
            elements.push(self.parse_exception_element(field)?);
        }
        Ok(LocationQuery::or(elements))
    }

    fn parse_exception_element(&mut self, field: FieldKind) -> Result<LocationQuery, WatcherError> {
        match self.advance() {
            Some(Token::Quoted(s)) => Ok(LocationQuery::Phrase(PhraseMatch::new(s, field))),
            Some(Token::Word(w)) if w != ":" => parse_word_token(&w, field),
            _ => Err(invalid("expected a word or quoted phrase in an exception list")),
        }
    }
}

fn parse_word_token(word: &str, field: FieldKind) -> Result<LocationQuery, WatcherError> {
    if word.starts_with('*') && !word[1..].contains('*') {
        return Ok(LocationQuery::Suffix(SuffixMatch::new(&word[1..], field)));
    }
    if word.ends_with('*') && !word[..word.len() - 1].contains('*') {
        return Ok(LocationQuery::Prefix(PrefixMatch::new(&word[..word.len() - 1], field)));
    }
    if word.contains('*') {
        return Ok(LocationQuery::Regex(RegexMatch::from_wildcards(word, field)));
    }
    if reserved(word) {
        return Err(invalid(format!("'{word}' is a reserved keyword and can't be used as a bare word")));
    }
    Ok(LocationQuery::Word(WordMatch::new(word, field)))
}

fn resolve_field(name: &str) -> Result<FieldKind, WatcherError> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "title" => Ok(FieldKind::Title),
        "desc" | "description" | "message" => Ok(FieldKind::Description),
        "keyword" | "keywords" | "tag" | "tags" => Ok(FieldKind::Keyword),
        "artist" | "author" | "poster" | "lower" | "uploader" => Ok(FieldKind::Artist),
        "rating" => Ok(FieldKind::Any), // rating has no text field; value is parsed separately
        other => Err(invalid(format!("unrecognized field name '{other}'"))),
    }
}

fn resolve_rating(word: &str) -> Result<Rating, WatcherError> {
    match word.to_lowercase().as_str() {
        "general" | "safe" => Ok(Rating::General),
        "mature" | "questionable" => Ok(Rating::Mature),
        "adult" | "explicit" => Ok(Rating::Adult),
        other => Err(invalid(format!("unrecognized rating '{other}'"))),
    }
}

/// Parses a subscription query string into an AST, uncached.
pub fn parse_query(input: &str) -> Result<Query, WatcherError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    if parser.at_end() {
        return Err(invalid("empty query"));
    }
    let query = parser.parse_expr()?;
    if !parser.at_end() {
        return Err(invalid("trailing input after a complete query"));
    }
    Ok(query)
}

const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// LRU cache over [`parse_query`], keyed on the raw (case-sensitive) query
/// string -- subscriptions re-parse the same handful of query strings on
/// every fetch cycle, so this avoids re-running the parser each time.
pub struct QueryParser {
    cache: Mutex<LruCache<String, Query>>,
}

impl QueryParser {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn parse(&self, input: &str) -> Result<Query, WatcherError> {
        if let Some(cached) = self.cache.lock().get(input) {
            return Ok(cached.clone());
        }
        let query = parse_query(input)?;
        self.cache.lock().put(input.to_string(), query.clone());
        Ok(query)
    }
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorCode;

    use super::*;

    fn matches(query_str: &str, title: &str) -> bool {
        use crate::target::{
            QueryTarget,
            SubmissionID,
        };
        let query = parse_query(query_str).unwrap();
        let target = QueryTarget::new(
            SubmissionID(1),
            vec![title.to_string()],
            vec![],
            vec![],
            vec![],
            Rating::General,
        );
        query.matches_submission(&target)
    }

    #[test]
    fn implicit_and_between_bare_words() {
        assert!(matches("cat dog", "a cat and a dog"));
        assert!(!matches("cat dog", "just a cat"));
    }

    #[test]
    fn explicit_and_or_not() {
        assert!(matches("cat and -\"wet dog\"", "a dry cat"));
        assert!(!matches("cat and -\"wet dog\"", "a wet dog with a cat"));
        assert!(matches("cat or fish", "just a fish"));
    }

    #[test]
    fn field_prefix_wildcard() {
        assert!(matches("title:foo*", "a foobar story"));
        assert!(!matches("title:foo*", "just foo"));
    }

    #[test]
    fn exception_excludes_overlapping_matches() {
        assert!(matches("cat except (cats or catfish)", "a cat and a catfish"));
        assert!(!matches("cat except (cats or catfish)", "just a catfish"));
    }

    #[test]
    fn rating_and_word() {
        use crate::target::{
            QueryTarget,
            SubmissionID,
        };
        let query = parse_query("rating:adult and fox").unwrap();
        let target = QueryTarget::new(
            SubmissionID(1),
            vec!["a fox".to_string()],
            vec![],
            vec![],
            vec![],
            Rating::Adult,
        );
        assert!(query.matches_submission(&target));
    }

    #[test]
    fn reserved_word_is_rejected() {
        let err = parse_query("and").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQuery);
    }

    #[test]
    fn rating_alias_safe_maps_to_general() {
        assert_eq!(parse_query("rating:safe").unwrap(), Query::Rating(Rating::General));
    }

    #[test]
    fn display_round_trips_through_reparse() {
        let query = parse_query("cat and -dog").unwrap();
        let rendered = query.to_string();
        let reparsed = parse_query(&rendered).unwrap();
        assert_eq!(query, reparsed);
    }

    #[test]
    fn cache_returns_equivalent_ast() {
        let parser = QueryParser::new(16);
        let first = parser.parse("cat and dog").unwrap();
        let second = parser.parse("cat and dog").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unbalanced_parens_is_invalid() {
        let err = parse_query("(cat and dog").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidQuery);
    }
}
