//! Filter expressions: textual parsing, the predicate tree, and in-process evaluation

pub mod eval;
pub mod parser;
pub mod predicate;

pub use eval::{evaluate, matches, matches_all};
pub use parser::{ParseOptions, parse, parse_with};
pub use predicate::{Comparison, Operator, Predicate};
