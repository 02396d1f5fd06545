//! Segment lexer for the enhanced-script dialect. Splits a script body into
//! verbatim code runs, `{{...}}` selector shorthands, `->` accessors and
//! keyword helper calls; no full JavaScript parsing happens here.

/// Keywords that introduce a brace-delimited helper call.
pub const HELPER_KEYWORDS: &[&str] =
    &["listen", "delegate", "animate", "router", "util", "vir", "fileloader"];

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Verbatim JavaScript text.
    Code(String),
    /// Inner text of a `{{...}}` selector shorthand.
    Selector(String),
    /// The `->` member-access operator.
    Arrow,
    /// `keyword { ... }` helper call; the body keeps its outer braces.
    HelperCall { keyword: String, body: String },
}

/// Split a script body into segments.
pub fn scan(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut code = String::new();
    let mut rest = source;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("{{") {
            if let Some(end) = after.find("}}") {
                flush(&mut segments, &mut code);
                segments.push(Segment::Selector(after[..end].trim().to_string()));
                rest = &after[end + 2..];
                continue;
            }
        }

        if let Some(after) = rest.strip_prefix("->") {
            flush(&mut segments, &mut code);
            segments.push(Segment::Arrow);
            rest = after;
            continue;
        }

        let c = rest.chars().next().unwrap_or('\0');

        // String literals are copied wholesale so their content never
        // triggers selector or helper scanning
        if c == '"' || c == '\'' || c == '`' {
            let len = string_len(rest, c);
            code.push_str(&rest[..len]);
            rest = &rest[len..];
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let ident_len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            let ident = &rest[..ident_len];
            let boundary_ok = !code
                .chars()
                .next_back()
                .is_some_and(|p| p.is_ascii_alphanumeric() || p == '_' || p == '.');

            if boundary_ok && HELPER_KEYWORDS.contains(&ident) {
                if let Some((head, body_len)) = helper_body(&rest[ident_len..]) {
                    flush(&mut segments, &mut code);
                    let body = rest[ident_len + head..ident_len + head + body_len].to_string();
                    segments.push(Segment::HelperCall { keyword: ident.to_string(), body });
                    rest = &rest[ident_len + head + body_len..];
                    continue;
                }
            }

            code.push_str(ident);
            rest = &rest[ident_len..];
            continue;
        }

        code.push(c);
        rest = &rest[c.len_utf8()..];
    }

    flush(&mut segments, &mut code);
    segments
}

/// True when a script region contains enhanced syntax: the `{{...}}`
/// shorthand or a helper-call keyword.
pub fn is_enhanced(source: &str) -> bool {
    scan(source)
        .iter()
        .any(|segment| !matches!(segment, Segment::Code(_) | Segment::Arrow))
}

/// Selector texts referenced anywhere in a script, helper bodies included.
pub fn collect_selectors(source: &str) -> Vec<String> {
    let mut selectors = Vec::new();
    collect_into(source, &mut selectors);
    selectors
}

fn collect_into(source: &str, selectors: &mut Vec<String>) {
    for segment in scan(source) {
        match segment {
            Segment::Selector(text) => selectors.push(text),
            Segment::HelperCall { body, .. } => collect_into(&body, selectors),
            _ => {}
        }
    }
}

/// Helper-call keywords used anywhere in a script, in encounter order.
pub fn collect_helper_calls(source: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    for segment in scan(source) {
        if let Segment::HelperCall { keyword, body } = segment {
            keywords.push(keyword);
            keywords.extend(collect_helper_calls(&body));
        }
    }
    keywords
}

fn flush(segments: &mut Vec<Segment>, code: &mut String) {
    if !code.is_empty() {
        segments.push(Segment::Code(std::mem::take(code)));
    }
}

/// After a helper keyword: optional whitespace and name, then a balanced
/// brace body. Returns (head length, body length with braces).
fn helper_body(rest: &str) -> Option<(usize, usize)> {
    let mut head = 0;
    let mut seen_name = false;
    let mut chars = rest.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == '{' {
            // A selector shorthand directly after the keyword is not a body
            if rest[head..].starts_with("{{") {
                return None;
            }
            let body_len = balanced_braces(&rest[head..])?;
            return Some((head, body_len));
        }
        if c.is_whitespace() {
            chars.next();
            head += c.len_utf8();
        } else if !seen_name && (c.is_ascii_alphanumeric() || c == '_') {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    chars.next();
                    head += c.len_utf8();
                } else {
                    break;
                }
            }
            seen_name = true;
        } else {
            return None;
        }
    }
    None
}

fn balanced_braces(text: &str) -> Option<usize> {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx + 1);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn string_len(text: &str, quote: char) -> usize {
    let mut chars = text.char_indices();
    chars.next();
    for (idx, c) in chars {
        if c == quote {
            return idx + c.len_utf8();
        }
    }
    text.len()
}
