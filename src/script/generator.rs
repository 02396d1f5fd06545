//! Lowers enhanced-script segments to plain JavaScript.

use super::lexer::{Segment, scan};

/// The element owning a script block, used to resolve the `&` selector.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub tag: String,
    pub id: Option<String>,
    pub first_class: Option<String>,
}

impl HostContext {
    /// Context for scripts with no owning element (top-level regions).
    pub fn detached() -> Self {
        Self::default()
    }
}

/// Runtime helper names, one per function-form keyword.
fn helper_name(keyword: &str) -> &'static str {
    match keyword {
        "listen" => "chtlListen",
        "delegate" => "chtlDelegate",
        "animate" => "chtlAnimate",
        "router" => "chtlRouter",
        "util" => "chtlUtil",
        "vir" => "chtlVirtual",
        "fileloader" => "chtlFileLoader",
        _ => "chtlHelper",
    }
}

/// Lower a script body; returns the JavaScript text plus warning messages
/// for permissive fallbacks taken along the way.
pub fn lower(source: &str, host: &HostContext) -> (String, Vec<String>) {
    let mut output = String::new();
    let mut warnings = Vec::new();
    lower_into(source, host, &mut output, &mut warnings);
    (output, warnings)
}

fn lower_into(source: &str, host: &HostContext, output: &mut String, warnings: &mut Vec<String>) {
    for segment in scan(source) {
        match segment {
            Segment::Code(code) => output.push_str(&code),
            Segment::Arrow => output.push('.'),
            Segment::Selector(text) => output.push_str(&lower_selector(&text, host, warnings)),
            Segment::HelperCall { keyword, body } => {
                output.push_str(helper_name(&keyword));
                output.push('(');
                // Helper bodies pass through with selector/accessor
                // substitution only
                lower_into(&body, host, output, warnings);
                output.push(')');
            }
        }
    }
}

fn lower_selector(text: &str, host: &HostContext, warnings: &mut Vec<String>) -> String {
    if text == "&" {
        if let Some(id) = &host.id {
            return format!("document.querySelector('#{}')", id);
        }
        if let Some(class) = &host.first_class {
            return format!("document.querySelector('.{}')", class);
        }
        warnings.push(format!(
            "'&' selector has no id or class to resolve against on <{}>",
            if host.tag.is_empty() { "detached script" } else { &host.tag }
        ));
        return "/* unresolved & selector */ null".to_string();
    }
    if text.starts_with('.') || text.starts_with('#') {
        return format!("document.querySelector('{}')", text);
    }
    format!("document.querySelectorAll('{}')", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_detached(source: &str) -> String {
        lower(source, &HostContext::detached()).0
    }

    #[test]
    fn test_class_selector_lowering() {
        assert_eq!(lower_detached("{{.box}}"), "document.querySelector('.box')");
    }

    #[test]
    fn test_id_selector_lowering() {
        assert_eq!(lower_detached("{{#app}}"), "document.querySelector('#app')");
    }

    #[test]
    fn test_tag_selector_lowers_to_query_all() {
        assert_eq!(lower_detached("{{p}}"), "document.querySelectorAll('p')");
    }

    #[test]
    fn test_arrow_becomes_member_access() {
        assert_eq!(
            lower_detached("{{.box}}->textContent = 'hi';"),
            "document.querySelector('.box').textContent = 'hi';"
        );
    }

    #[test]
    fn test_host_selector_prefers_id() {
        let host = HostContext {
            tag: "div".into(),
            id: Some("main".into()),
            first_class: Some("card".into()),
        };
        assert_eq!(lower("{{&}}", &host).0, "document.querySelector('#main')");
    }

    #[test]
    fn test_host_selector_falls_back_to_class() {
        let host =
            HostContext { tag: "div".into(), id: None, first_class: Some("card".into()) };
        assert_eq!(lower("{{&}}", &host).0, "document.querySelector('.card')");
    }

    #[test]
    fn test_host_selector_without_anchor_is_marker_comment() {
        let (js, warnings) = lower("{{&}}", &HostContext::detached());
        assert!(js.contains("unresolved & selector"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_helper_call_lowering() {
        let js = lower_detached("listen { click: handleClick }");
        assert_eq!(js, "chtlListen({ click: handleClick })");
    }

    #[test]
    fn test_selectors_inside_helper_bodies_are_lowered() {
        let js = lower_detached("delegate { target: {{.item}}, event: 'click' }");
        assert_eq!(
            js,
            "chtlDelegate({ target: document.querySelector('.item'), event: 'click' })"
        );
    }
}
