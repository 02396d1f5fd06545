use crate::parser::tokenizer::Span;
use std::fmt;

/// What went wrong, by pipeline stage and recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DiagnosticKind {
    /// Illegal character; never fatal on its own.
    Lexical,
    /// Unexpected token; the parser recovers and keeps going.
    Syntactic,
    /// Unresolved reference or unknown kind; fatal, stops generation.
    Semantic,
    /// Permissive fallback taken; informational only.
    Fallback,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::Lexical => "lexical error",
            DiagnosticKind::Syntactic => "syntax error",
            DiagnosticKind::Semantic => "error",
            DiagnosticKind::Fallback => "warning",
        }
    }
}

/// One human-readable problem, anchored to a source span.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self { kind, message: message.into(), span, help: None }
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(DiagnosticKind::Syntactic, message, span)
    }

    pub fn semantic(message: impl Into<String>, span: Span) -> Self {
        Self::new(DiagnosticKind::Semantic, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(DiagnosticKind::Fallback, message, span)
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Render the diagnostic with the offending source line and a caret row
    /// underneath the span.
    pub fn render(&self, source: &str, filename: &str) -> String {
        let mut output = String::new();
        let line = self.span.start.line;
        let col = self.span.start.column;

        output.push_str(&format!(
            "{}:{}:{}: {}: {}\n",
            filename,
            line + 1,
            col + 1,
            self.kind.as_str(),
            self.message
        ));

        if let Some(source_line) = source.lines().nth(line) {
            let line_num = format!("{}", line + 1);
            let width = line_num.len().max(2);
            output.push_str(&format!("{:>width$} | {}\n", line_num, source_line, width = width));

            let caret_len = if self.span.end.line == self.span.start.line {
                (self.span.end.column.saturating_sub(col)).max(1)
            } else {
                source_line.chars().count().saturating_sub(col).max(1)
            };
            output.push_str(&format!(
                "{:>width$} | {}{}\n",
                "",
                " ".repeat(col),
                "^".repeat(caret_len),
                width = width
            ));
        }

        if let Some(ref help) = self.help {
            output.push_str(&format!("  help: {}\n", help));
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.span.start.line + 1,
            self.span.start.column + 1,
            self.kind.as_str(),
            self.message
        )
    }
}

/// Error type of the whole pipeline.
///
/// Lexical/syntactic problems accumulate on the parser and arrive here as a
/// batch; semantic problems abort generation immediately and arrive alone.
#[derive(Debug, Clone)]
pub enum CompileError {
    Parse(Vec<Diagnostic>),
    Generate(Diagnostic),
}

impl CompileError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Parse(diagnostics) => diagnostics,
            CompileError::Generate(diagnostic) => std::slice::from_ref(diagnostic),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(diagnostics) => {
                if let Some(first) = diagnostics.first() {
                    write!(f, "{}", first)?;
                    if diagnostics.len() > 1 {
                        write!(f, " (+{} more)", diagnostics.len() - 1)?;
                    }
                }
                Ok(())
            }
            CompileError::Generate(diagnostic) => write!(f, "{}", diagnostic),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<Diagnostic> for CompileError {
    fn from(diagnostic: Diagnostic) -> Self {
        CompileError::Generate(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::Position;

    fn span_at(line: usize, column: usize, offset: usize) -> Span {
        let start = Position { line, column, offset };
        let end = Position { line, column: column + 3, offset: offset + 3 };
        Span { start, end }
    }

    #[test]
    fn test_render_includes_caret_row() {
        let diagnostic =
            Diagnostic::syntax("unexpected token", span_at(0, 4, 4)).with_help("remove it");
        let rendered = diagnostic.render("div !!! {}", "test.chtl");
        assert!(rendered.contains("test.chtl:1:5"));
        assert!(rendered.contains("div !!! {}"));
        assert!(rendered.contains("^^^"));
        assert!(rendered.contains("help: remove it"));
    }

    #[test]
    fn test_compile_error_display_counts_extras() {
        let error = CompileError::Parse(vec![
            Diagnostic::syntax("first", span_at(0, 0, 0)),
            Diagnostic::syntax("second", span_at(1, 0, 8)),
        ]);
        assert!(error.to_string().contains("+1 more"));
    }
}
