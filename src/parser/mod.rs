pub mod expr;
pub mod tokenizer;
mod tree_builder;

pub use tokenizer::{Keyword, Lexer, Position, Span, Token, TokenKind, tokenize};
pub use tree_builder::TreeBuilder;

use crate::ast::Program;
use crate::error::Diagnostic;

/// Parse a markup stream into a `Program` plus the accumulated diagnostics.
///
/// Diagnostics are never raised mid-parse; the caller inspects the list to
/// decide whether to abort before generation.
pub fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
    let tokens = tokenize(source);
    let mut builder = TreeBuilder::new(tokens, source);
    let program = builder.parse_program();
    let diagnostics = builder.into_diagnostics();
    (program, diagnostics)
}
