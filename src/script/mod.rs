//! Enhanced-script pipeline: detection, lowering to JavaScript, and
//! plain-JS validation for pass-through regions.

mod generator;
mod lexer;

pub use generator::HostContext;
pub use lexer::{collect_helper_calls, collect_selectors, is_enhanced};

use crate::error::Diagnostic;
use crate::parser::tokenizer::Span;
use log::debug;

/// Compiles script regions. Holds a tree-sitter JavaScript parser used to
/// sanity-check pass-through content.
pub struct ScriptCompiler {
    parser: tree_sitter::Parser,
}

impl ScriptCompiler {
    pub fn new() -> Self {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .expect("Failed to load JavaScript grammar");
        Self { parser }
    }

    /// Compile one script region. Enhanced syntax is lowered to plain
    /// JavaScript; anything else passes through verbatim, with a warning
    /// diagnostic when tree-sitter finds a syntax error in it.
    pub fn compile(
        &mut self,
        source: &str,
        host: &HostContext,
        span: Span,
    ) -> (String, Vec<Diagnostic>) {
        if is_enhanced(source) {
            debug!("lowering enhanced script region ({} bytes)", source.len());
            let (js, warnings) = generator::lower(source, host);
            let diagnostics =
                warnings.into_iter().map(|message| Diagnostic::warning(message, span)).collect();
            return (js, diagnostics);
        }

        let mut diagnostics = Vec::new();
        if let Some(tree) = self.parser.parse(source, None) {
            if tree.root_node().has_error() {
                diagnostics.push(Diagnostic::warning(
                    "script region contains invalid JavaScript; passed through verbatim",
                    span,
                ));
            }
        }
        (source.to_string(), diagnostics)
    }
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::Position;

    fn span() -> Span {
        Span::point(Position::new())
    }

    #[test]
    fn test_enhanced_region_is_lowered() {
        let mut compiler = ScriptCompiler::new();
        let (js, diagnostics) = compiler.compile("{{.box}}->focus();", &HostContext::detached(), span());
        assert_eq!(js, "document.querySelector('.box').focus();");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_plain_js_passes_through_verbatim() {
        let mut compiler = ScriptCompiler::new();
        let source = "const total = items.reduce((a, b) => a + b, 0);";
        let (js, diagnostics) = compiler.compile(source, &HostContext::detached(), span());
        assert_eq!(js, source);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_invalid_plain_js_warns_but_passes_through() {
        let mut compiler = ScriptCompiler::new();
        let source = "const = = broken;";
        let (js, diagnostics) = compiler.compile(source, &HostContext::detached(), span());
        assert_eq!(js, source);
        assert_eq!(diagnostics.len(), 1);
    }
}
