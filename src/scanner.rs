//! Segmentation scanner: splits a raw source buffer into markup, style and
//! script streams before lexing.
//!
//! Brace-delimited sub-languages (enhanced-script calls, JavaScript
//! function/object/array literals) are protected behind opaque placeholder
//! tokens first, so the line routing below never miscounts braces that
//! belong to an embedded language. Placeholders are restorable by exact
//! string substitution keyed on their ordinal.

use log::trace;

/// The three logical streams of one compilation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segments {
    pub markup: String,
    pub css: String,
    pub js: String,
}

const PLACEHOLDER_PREFIX: &str = "__CHTL_FRAG_";
const PLACEHOLDER_SUFFIX: &str = "__";

/// Function-form keywords whose brace bodies must be protected.
const ENHANCED_CALLS: &[&str] =
    &["listen", "delegate", "animate", "router", "util", "vir", "fileloader"];

pub struct Scanner {
    /// Ordinal-indexed fragment store; entry `i` restores placeholder `i`.
    fragments: Vec<String>,
}

impl Scanner {
    pub fn new() -> Self {
        Self { fragments: Vec::new() }
    }

    /// Split `source` into markup/css/js streams. Never fails: unmatched
    /// delimiters degrade to best-effort routing.
    pub fn segment(&mut self, source: &str) -> Segments {
        let protected = self.protect_fragments(source);
        trace!("scanner protected {} fragment(s)", self.fragments.len());

        let mut segments = Segments::default();
        let mut in_style = false;
        let mut in_script = false;
        let mut brace_depth: i32 = 0;

        for line in protected.lines() {
            let trimmed = line.trim();

            if in_style {
                if trimmed == "</style>" {
                    in_style = false;
                } else {
                    segments.css.push_str(line);
                    segments.css.push('\n');
                }
                continue;
            }
            if in_script {
                if trimmed == "</script>" {
                    in_script = false;
                } else {
                    segments.js.push_str(line);
                    segments.js.push('\n');
                }
                continue;
            }

            // Region markers only count at top level; inside an element body
            // a literal tag line is ordinary markup.
            if brace_depth == 0 && trimmed == "<style>" {
                in_style = true;
                continue;
            }
            if brace_depth == 0 && trimmed == "<script>" {
                in_script = true;
                continue;
            }

            brace_depth += brace_balance(line);
            if brace_depth < 0 {
                brace_depth = 0;
            }
            segments.markup.push_str(line);
            segments.markup.push('\n');
        }

        segments
    }

    /// Replace every placeholder token in `text` with its original fragment.
    pub fn restore(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (ordinal, fragment) in self.fragments.iter().enumerate() {
            let token = placeholder_token(ordinal);
            if result.contains(&token) {
                result = result.replace(&token, fragment);
            }
        }
        result
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment(&self, ordinal: usize) -> Option<&str> {
        self.fragments.get(ordinal).map(String::as_str)
    }

    /// Pre-pass: placeholder every balanced enhanced-script call and every
    /// JavaScript function/object/array literal.
    fn protect_fragments(&mut self, source: &str) -> String {
        let bytes = source.as_bytes();
        let mut output = String::with_capacity(source.len());
        let mut i = 0;

        while i < bytes.len() {
            let rest = &source[i..];
            let at_ident_boundary = !output
                .chars()
                .next_back()
                .is_some_and(|p| p.is_ascii_alphanumeric() || p == '_' || p == '-' || p == '.');

            if let Some((consumed, fragment_len)) = match_protected_start(rest, at_ident_boundary) {
                let fragment = &rest[..consumed + fragment_len];
                let ordinal = self.fragments.len();
                self.fragments.push(fragment.to_string());
                output.push_str(&placeholder_token(ordinal));
                i += fragment.len();
                continue;
            }

            // Skip string literals wholesale so their braces never trigger
            let c = rest.chars().next().unwrap_or('\0');
            if c == '"' || c == '\'' || c == '`' {
                let skipped = skip_string(rest, c);
                output.push_str(&rest[..skipped]);
                i += skipped;
                continue;
            }

            output.push(c);
            i += c.len_utf8();
        }

        output
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

pub fn placeholder_token(ordinal: usize) -> String {
    format!("{}{}{}", PLACEHOLDER_PREFIX, ordinal, PLACEHOLDER_SUFFIX)
}

/// Net `{`/`}` balance of one line, ignoring braces inside quotes.
fn brace_balance(line: &str) -> i32 {
    let mut balance = 0;
    let mut quote: Option<char> = None;
    for c in line.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '{' => balance += 1,
                '}' => balance -= 1,
                _ => {}
            },
        }
    }
    balance
}

/// If `rest` begins a protectable fragment, return the length of its head
/// (keyword and anything before the opening brace) and the length of the
/// balanced brace/bracket body. Returns None when the body never closes:
/// best-effort splitting leaves the text alone rather than swallowing the
/// rest of the input.
fn match_protected_start(rest: &str, at_ident_boundary: bool) -> Option<(usize, usize)> {
    if at_ident_boundary {
        // Enhanced-script call: keyword [name] { ... }
        for keyword in ENHANCED_CALLS {
            if let Some(head) = match_call_head(rest, keyword) {
                let body = match_balanced(&rest[head..], '{', '}')?;
                return Some((head, body));
            }
        }

        // JavaScript function literal: function [name] ( ... ) { ... }
        if let Some(head) = match_function_head(rest) {
            let body = match_balanced(&rest[head..], '{', '}')?;
            return Some((head, body));
        }
    }

    // Object/array literal after an assignment: = { ... } or = [ ... ]
    if rest.starts_with('=') && !rest.starts_with("==") && !rest.starts_with("=>") {
        let after = rest[1..].len() - rest[1..].trim_start().len();
        let body_start = 1 + after;
        let body = rest[body_start..].chars().next()?;
        if body == '{' {
            let len = match_balanced(&rest[body_start..], '{', '}')?;
            return Some((body_start, len));
        }
        if body == '[' {
            let len = match_balanced(&rest[body_start..], '[', ']')?;
            return Some((body_start, len));
        }
    }

    None
}

/// `keyword` at an identifier boundary, optionally followed by a name,
/// immediately before `{`. Returns the head length up to the brace.
fn match_call_head(rest: &str, keyword: &str) -> Option<usize> {
    let stripped = rest.strip_prefix(keyword)?;
    let boundary = stripped.chars().next();
    if boundary.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }

    let mut offset = keyword.len();
    let mut chars = stripped.chars().peekable();

    // optional whitespace, optional identifier (vir Name { ... }), whitespace
    let mut allow_name = true;
    while let Some(&c) = chars.peek() {
        if c == '{' {
            return Some(offset);
        }
        if c.is_whitespace() {
            chars.next();
            offset += c.len_utf8();
        } else if allow_name && (c.is_ascii_alphanumeric() || c == '_') {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    chars.next();
                    offset += c.len_utf8();
                } else {
                    break;
                }
            }
            allow_name = false;
        } else {
            return None;
        }
    }
    None
}

/// `function [name] ( params )` head, up to the body brace.
fn match_function_head(rest: &str) -> Option<usize> {
    let stripped = rest.strip_prefix("function")?;
    let boundary = stripped.chars().next();
    if boundary.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let paren_rel = stripped.find('(')?;
    // Only whitespace and an optional identifier may sit before the params
    if !stripped[..paren_rel].chars().all(|c| c.is_whitespace() || c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let params_len = match_balanced(&stripped[paren_rel..], '(', ')')?;
    let after_params = &stripped[paren_rel + params_len..];
    let gap = after_params.len() - after_params.trim_start().len();
    if !after_params[gap..].starts_with('{') {
        return None;
    }
    Some("function".len() + paren_rel + params_len + gap)
}

/// Length of a balanced `open ... close` run starting at the first char of
/// `text`, quote-aware. None if unbalanced at end of input.
fn match_balanced(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == '"' || c == '\'' || c == '`' {
                    quote = Some(c);
                } else if c == open {
                    depth += 1;
                } else if c == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx + c.len_utf8());
                    }
                }
            }
        }
    }
    None
}

/// Length of the string literal starting at `quote`, including both quotes
/// (or to end of input when unterminated).
fn skip_string(text: &str, quote: char) -> usize {
    let mut chars = text.char_indices();
    chars.next(); // opening quote
    for (idx, c) in chars {
        if c == quote {
            return idx + c.len_utf8();
        }
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_style_and_script_regions() {
        let source = "div { }\n<style>\n.box { color: red; }\n</style>\n<script>\nlet x = 1;\n</script>\nspan { }\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        assert_eq!(segments.markup, "div { }\nspan { }\n");
        assert_eq!(segments.css, ".box { color: red; }\n");
        assert_eq!(segments.js, "let x = 1;\n");
    }

    #[test]
    fn test_marker_inside_element_body_is_markup() {
        let source = "div {\n    text { \"<style>\" }\n}\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        assert!(segments.css.is_empty());
        assert!(segments.markup.contains("<style>"));
    }

    #[test]
    fn test_enhanced_call_is_protected() {
        let source = "script {\n    listen { click: () => { go({ deep: { x: 1 } }); } }\n}\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        assert_eq!(scanner.fragment_count(), 1);
        assert!(segments.markup.contains(&placeholder_token(0)));
        assert!(!segments.markup.contains("click"));
    }

    #[test]
    fn test_round_trip_restoration() {
        let source = "script {\n    listen { a: { b: 'x' } }\n    delegate { target: {{.item}} }\n}\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        assert_eq!(scanner.fragment_count(), 2);
        let restored = scanner.restore(&segments.markup);
        assert!(restored.contains("listen { a: { b: 'x' } }"));
        assert!(restored.contains("delegate { target: {{.item}} }"));
    }

    #[test]
    fn test_every_placeholder_has_one_restoration_entry() {
        let source = "script { listen { x: 1 } animate { y: 2 } }\n<script>\nconst cfg = { z: 3 };\n</script>\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        for ordinal in 0..scanner.fragment_count() {
            let token = placeholder_token(ordinal);
            let hits = [&segments.markup, &segments.css, &segments.js]
                .iter()
                .map(|s| s.matches(&token).count())
                .sum::<usize>();
            assert_eq!(hits, 1, "placeholder {} must appear exactly once", ordinal);
            assert!(scanner.fragment(ordinal).is_some());
        }
    }

    #[test]
    fn test_js_literals_are_protected() {
        let source = "<script>\nconst cfg = { nested: [1, 2, { three: 3 }] };\nfunction add(a, b) { return a + b; }\n</script>\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        assert!(scanner.fragment_count() >= 2);
        let restored = scanner.restore(&segments.js);
        assert!(restored.contains("{ nested: [1, 2, { three: 3 }] }"));
        assert!(restored.contains("function add(a, b) { return a + b; }"));
    }

    #[test]
    fn test_unmatched_delimiters_never_crash() {
        let source = "<style>\n.a { color: red; }\ndiv }\n";
        let mut scanner = Scanner::new();
        let segments = scanner.segment(source);
        // Region never closes: best-effort keeps routing lines to css
        assert!(segments.css.contains(".a { color: red; }"));
        assert!(segments.markup.is_empty());
    }

    #[test]
    fn test_keyword_prefix_is_not_a_call() {
        let mut scanner = Scanner::new();
        scanner.segment("div { listener { } }\n");
        assert_eq!(scanner.fragment_count(), 0);
    }
}
