//! Boolean query language for subscription matching: parses a query string
//! into an AST ([`ast::Query`]) that's evaluated against a submission's
//! derived [`target::QueryTarget`] projection.

pub mod ast;
pub mod parser;
pub mod target;
pub mod tokenizer;


pub use ast::{
    LocationQuery,
    Query,
};
pub use parser::{
    parse_query,
    QueryParser,
};
pub use target::{
    FieldKind,
    FieldLocation,
    MatchLocation,
    QueryTarget,
    Rating,
    SubmissionID,
};
