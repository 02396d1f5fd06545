//! CHTL compiler: a source-to-source compiler turning `.chtl` markup into
//! plain HTML, CSS and JavaScript.
//!
//! The pipeline is single-threaded and synchronous per compilation unit:
//! segmentation scanner → lexer/parser → generator, with the embedded
//! enhanced-script dialect handled by its own small triad. Multiple units
//! may be compiled concurrently by an external orchestrator; the only
//! shared mutable state is [`context::CompileContext`].

pub mod ast;
pub mod context;
pub mod error;
pub mod generate;
pub mod html;
pub mod parser;
pub mod scanner;
pub mod script;

pub use context::CompileContext;
pub use error::{CompileError, Diagnostic, DiagnosticKind};
pub use generate::{CompilerConfig, GenerateResult};
pub use scanner::{Scanner, Segments};

use ast::{BodyItem, ChildItem, Element, ImportKind, Program, TemplateContent};
use log::debug;
use parser::tokenizer::{Position, Span};
use script::{HostContext, ScriptCompiler};

/// Configuration for one compilation.
#[derive(Debug, Clone)]
pub struct Options {
    /// Name used in rendered diagnostics.
    pub filename: String,
}

impl Default for Options {
    fn default() -> Self {
        Self { filename: "input.chtl".to_string() }
    }
}

/// The three output buffers plus non-fatal diagnostics collected along the
/// way. The external dispatcher merges the streams into one document and
/// owns all file I/O.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompileOutput {
    pub html: String,
    pub css: String,
    pub js: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile a source buffer with default options.
pub fn compile(source: &str) -> Result<CompileOutput, CompileError> {
    compile_with(source, Options::default())
}

/// Full pipeline: segment → parse → restore placeholders → generate.
///
/// A non-empty parser diagnostic list aborts before generation; semantic
/// generation failures abort with the single causing diagnostic.
pub fn compile_with(source: &str, options: Options) -> Result<CompileOutput, CompileError> {
    compile_impl(source, options, None)
}

/// Like [`compile_with`], but wired to a shared [`CompileContext`]: parsed
/// namespaces are registered in the cross-unit cache, and chtl/module
/// imports are checked against the module cache. Each unit's own state
/// stays exclusively owned; only the context is shared.
pub fn compile_unit(
    source: &str,
    options: Options,
    context: &CompileContext,
) -> Result<CompileOutput, CompileError> {
    compile_impl(source, options, Some(context))
}

fn compile_impl(
    source: &str,
    options: Options,
    context: Option<&CompileContext>,
) -> Result<CompileOutput, CompileError> {
    let mut scanner = Scanner::new();
    let segments = scanner.segment(source);
    debug!(
        "{}: segmented into {}/{}/{} markup/css/js bytes, {} protected fragment(s)",
        options.filename,
        segments.markup.len(),
        segments.css.len(),
        segments.js.len(),
        scanner.fragment_count()
    );

    let (mut program, parse_diagnostics) = parser::parse(&segments.markup);
    if !parse_diagnostics.is_empty() {
        return Err(CompileError::Parse(parse_diagnostics));
    }

    restore_embedded(&mut program, &scanner);

    let config = CompilerConfig::from_configurations(&program.configurations);
    let mut unresolved_imports = Vec::new();
    if let Some(context) = context {
        for namespace in &program.namespaces {
            context.register_namespace(namespace.name.clone(), options.filename.clone());
        }
        for import in &program.imports {
            if matches!(import.kind, ImportKind::Chtl | ImportKind::Module)
                && context.get_module(&import.path).is_none()
            {
                unresolved_imports.push(Diagnostic::warning(
                    format!("module '{}' is not in the import resolver's cache", import.path),
                    import.span,
                ));
            }
        }
        if context.is_debug_mode() {
            debug!("{}: {} import(s), {} namespace(s)", options.filename, program.imports.len(), program.namespaces.len());
        }
    }
    let result = generate::generate(&program, &config)?;

    let mut css = result.css;
    let region_css = scanner.restore(&segments.css);
    if !region_css.trim().is_empty() {
        css.push_str(&region_css);
    }

    let mut js = result.js;
    let mut diagnostics = result.diagnostics;
    diagnostics.extend(unresolved_imports);
    let region_js = scanner.restore(&segments.js);
    if !region_js.trim().is_empty() {
        let mut compiler = ScriptCompiler::new();
        let span = Span::point(Position::new());
        let (compiled, script_diagnostics) =
            compiler.compile(&region_js, &HostContext::detached(), span);
        js.push_str(&compiled);
        if !compiled.ends_with('\n') {
            js.push('\n');
        }
        diagnostics.extend(script_diagnostics);
    }

    Ok(CompileOutput { html: result.html, css, js, diagnostics })
}

/// Put the protected enhanced-script and JS-literal fragments back into
/// every script body and origin before generation.
fn restore_embedded(program: &mut Program, scanner: &Scanner) {
    for item in &mut program.body {
        match item {
            BodyItem::Element(element) => restore_element(element, scanner),
            BodyItem::Origin(origin) => origin.content = scanner.restore(&origin.content),
            BodyItem::Comment(_) => {}
        }
    }
    for origin in &mut program.origins {
        origin.content = scanner.restore(&origin.content);
    }
    for template in &mut program.templates {
        restore_template_content(&mut template.content, scanner);
    }
    for custom in &mut program.customs {
        restore_template_content(&mut custom.content, scanner);
        for specialization in &mut custom.specializations {
            if let ast::SpecOp::Insert { elements, .. } = &mut specialization.op {
                for element in elements {
                    restore_element(element, scanner);
                }
            }
        }
    }
}

fn restore_template_content(content: &mut TemplateContent, scanner: &Scanner) {
    if let TemplateContent::Element(elements) = content {
        for element in elements {
            restore_element(element, scanner);
        }
    }
}

fn restore_element(element: &mut Element, scanner: &Scanner) {
    if let Some(script) = &mut element.script {
        script.content = scanner.restore(&script.content);
        script.is_enhanced = script::is_enhanced(&script.content);
        if script.is_enhanced {
            script.selectors = script::collect_selectors(&script.content);
            script.functions = script::collect_helper_calls(&script.content);
        }
    }
    for child in &mut element.children {
        if let ChildItem::Element(child) = child {
            restore_element(child, scanner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_auto_class_law() {
        let output = compile("div { id: main; style { .container { width: 100%; } } }")
            .expect("compiles");
        assert!(output.html.contains("<div id=\"main\" class=\"container\">"));
        assert!(output.css.contains(".container {"));
        assert!(output.css.contains("width: 100%;"));
    }

    #[test]
    fn test_parse_errors_abort_before_generation() {
        let error = compile("div { = ; = ; = ; }").expect_err("parse fails");
        let CompileError::Parse(diagnostics) = error else {
            panic!("expected parse error");
        };
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_enhanced_script_survives_segmentation() {
        let source = "div { id: app; script { listen { click: () => { tick({ n: 1 }); } } } }";
        let output = compile(source).expect("compiles");
        assert!(output.js.contains("chtlListen({ click: () => { tick({ n: 1 }); } })"));
    }

    #[test]
    fn test_style_and_script_regions_merge_into_outputs() {
        let source = "<style>\nbody { margin: 0; }\n</style>\ndiv { }\n<script>\nconsole.log('ready');\n</script>\n";
        let output = compile(source).expect("compiles");
        assert!(output.css.contains("body { margin: 0; }"));
        assert!(output.js.contains("console.log('ready');"));
        assert!(output.html.contains("<div></div>"));
    }

    #[test]
    fn test_unresolved_reference_is_generate_error() {
        let error = compile("div { style { @Style Nope; } }").expect_err("generation fails");
        assert!(matches!(error, CompileError::Generate(_)));
    }

    #[test]
    fn test_compile_unit_uses_the_shared_context() {
        let context = CompileContext::new();
        let source = "Namespace ui { } Import @Chtl from \"widgets\"; div { }";

        let output =
            compile_unit(source, Options::default(), &context).expect("compiles");
        // The module cache has no entry yet, so the import is flagged
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(context.get_namespace("ui").as_deref(), Some("input.chtl"));

        context.register_module("widgets", "span { }");
        let output = compile_unit(source, Options::default(), &context).expect("compiles");
        assert!(output.diagnostics.is_empty());
    }
}
