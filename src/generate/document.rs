use super::css_eval::{VarResolver, evaluate_property};
use super::output::Output;
use super::{CompilerConfig, GenerateResult};
use crate::ast::*;
use crate::error::{CompileError, Diagnostic};
use crate::html;
use crate::script::{self, HostContext, ScriptCompiler};
use log::debug;

/// Walks the AST and emits HTML, scoped/global CSS and JavaScript.
///
/// Emission is deterministic: properties, selectors, attributes and rules
/// all follow declaration order, never map iteration order.
pub struct Generator<'a> {
    program: &'a Program,
    config: CompilerConfig,
    css: CssCollector,
    raw_css: String,
    js: String,
    diagnostics: Vec<Diagnostic>,
    scripts: ScriptCompiler,
    /// Names currently being expanded, guarding against reference cycles.
    applying: Vec<String>,
}

impl<'a> Generator<'a> {
    pub fn new(program: &'a Program, config: CompilerConfig) -> Self {
        let css = CssCollector::new(config.index_initial_count);
        Self {
            program,
            config,
            css,
            raw_css: String::new(),
            js: String::new(),
            diagnostics: Vec::new(),
            scripts: ScriptCompiler::new(),
            applying: Vec::new(),
        }
    }

    pub fn run(mut self) -> Result<GenerateResult, CompileError> {
        let mut out = Output::new();

        out.line(&self.doctype());
        out.line("<html>");
        out.line("<head>");
        out.indent();
        out.line("<meta charset=\"UTF-8\">");
        out.line("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">");
        for import in &self.program.imports {
            match import.kind {
                ImportKind::Css => {
                    out.line(&format!("<link rel=\"stylesheet\" href=\"{}\">", import.path))
                }
                ImportKind::Js => {
                    out.line(&format!("<script src=\"{}\"></script>", import.path))
                }
                // Resolved by the external import resolver through the
                // shared context; nothing to emit here.
                ImportKind::Html | ImportKind::Chtl | ImportKind::Module => {}
            }
        }
        out.dedent();
        out.line("</head>");
        out.line("<body>");
        out.indent();

        for item in &self.program.body {
            match item {
                BodyItem::Element(element) => self.generate_element(element, &mut out)?,
                BodyItem::Comment(comment) => out.line(&format!("<!-- {} -->", comment.text)),
                BodyItem::Origin(origin) => self.emit_origin(origin, &mut out)?,
            }
        }

        out.dedent();
        out.line("</body>");
        out.line("</html>");

        let mut css = self.css.finish();
        css.push_str(&self.raw_css);
        debug!(
            "generation done: {} css byte(s), {} js byte(s), {} diagnostic(s)",
            css.len(),
            self.js.len(),
            self.diagnostics.len()
        );
        Ok(GenerateResult { html: out.finish(), css, js: self.js, diagnostics: self.diagnostics })
    }

    fn doctype(&self) -> String {
        match &self.program.use_decl {
            Some(decl) if decl.value != "html5" => format!("<!DOCTYPE {}>", decl.value),
            _ => "<!DOCTYPE html>".to_string(),
        }
    }

    /// Emit one element, resolving element-kind template/custom application
    /// first: a tag matching a definition is replaced by the definition's
    /// content with the use-site element layered on top.
    fn generate_element(&mut self, element: &Element, out: &mut Output) -> Result<(), CompileError> {
        if let Some(constraint) =
            self.program.constraints.iter().find(|c| c.name == element.tag)
        {
            self.diagnostics.push(Diagnostic::warning(
                format!("'{}' is banned by an except constraint; element skipped", element.tag),
                constraint.span,
            ));
            return Ok(());
        }

        let is_definition = self
            .find_custom(&element.tag)
            .is_some_and(|c| c.kind() == TemplateKind::Element)
            || self
                .find_template(&element.tag)
                .is_some_and(|t| t.kind() == TemplateKind::Element);
        if is_definition {
            if self.applying.iter().any(|n| n == &element.tag) {
                return Err(CompileError::Generate(Diagnostic::semantic(
                    format!("recursive template reference '{}'", element.tag),
                    element.span,
                )));
            }
            let mut roots = self.instantiate_by_name(&element.tag, element.span)?;
            layer_use_site(&mut roots, element);
            self.applying.push(element.tag.clone());
            let mut outcome = Ok(());
            for root in &roots {
                outcome = self.generate_element(root, out);
                if outcome.is_err() {
                    break;
                }
            }
            self.applying.pop();
            return outcome;
        }

        self.emit_element(element, out)
    }

    fn emit_element(&mut self, element: &Element, out: &mut Output) -> Result<(), CompileError> {
        let is_void = html::is_void_element(&element.tag);

        // Auto-derived class/id attributes plus scoped CSS from the style
        // node. Void tags never expand selectors.
        let mut auto_classes: Vec<String> = Vec::new();
        let mut auto_id: Option<String> = None;
        let mut inline_style = None;

        if let Some(style) = &element.style {
            if !is_void {
                self.expand_style(style, element, &mut auto_classes, &mut auto_id)?;
            }
            if style.is_inline {
                let properties = self.merge_style_properties(
                    &style.properties,
                    &style.template_refs,
                )?;
                let declarations = self.evaluate_declarations(&properties)?;
                if !declarations.is_empty() {
                    inline_style = Some(
                        declarations
                            .iter()
                            .map(|(name, value)| format!("{}: {}", name, value))
                            .collect::<Vec<_>>()
                            .join("; "),
                    );
                }
            }
        }

        if let Some(script) = &element.script {
            if script.is_enhanced {
                if !self.config.disable_script_auto_add_class
                    || !self.config.disable_script_auto_add_id
                {
                    for selector in script::collect_selectors(&script.content) {
                        if let Some(class) = selector.strip_prefix('.') {
                            if !self.config.disable_script_auto_add_class {
                                auto_classes.push(class.to_string());
                            }
                        } else if let Some(id) = selector.strip_prefix('#') {
                            if !self.config.disable_script_auto_add_id && auto_id.is_none() {
                                auto_id = Some(id.to_string());
                            }
                        }
                    }
                }
            }
        }

        // Assemble attributes in declaration order; auto-derived values
        // merge into an existing slot or append at the end.
        let mut attributes: Vec<(String, Option<String>)> = element
            .attributes
            .iter()
            .map(|attribute| {
                let value = attribute.value.as_text().map(str::to_string);
                (attribute.name.clone(), value)
            })
            .collect();

        if !auto_classes.is_empty() {
            let joined = join_classes(&auto_classes);
            match attributes.iter_mut().find(|(name, _)| name == "class") {
                Some((_, value)) => match value {
                    Some(existing) => {
                        for class in &auto_classes {
                            if !existing.split_whitespace().any(|c| c == class) {
                                existing.push(' ');
                                existing.push_str(class);
                            }
                        }
                    }
                    None => *value = Some(joined),
                },
                None => attributes.push(("class".to_string(), Some(joined))),
            }
        }
        if let Some(id) = auto_id {
            // An explicitly declared id always wins over the derived one
            if !attributes.iter().any(|(name, _)| name == "id") {
                attributes.push(("id".to_string(), Some(id)));
            }
        }
        if let Some(inline) = inline_style {
            attributes.push(("style".to_string(), Some(inline)));
        }

        let mut open_tag = format!("<{}", element.tag);
        for (name, value) in &attributes {
            match value {
                Some(value) => open_tag.push_str(&format!(" {}=\"{}\"", name, value)),
                None => open_tag.push_str(&format!(" {}", name)),
            }
        }

        if is_void {
            open_tag.push_str(" />");
            out.line(&open_tag);
            return Ok(());
        }
        open_tag.push('>');

        // Scripts see the element with its final id/class in place
        if let Some(script) = &element.script {
            let host = HostContext {
                tag: element.tag.clone(),
                id: attribute_value(&attributes, "id"),
                first_class: attribute_value(&attributes, "class")
                    .and_then(|classes| classes.split_whitespace().next().map(str::to_string)),
            };
            let (js, diagnostics) = self.scripts.compile(&script.content, &host, script.span);
            self.diagnostics.extend(diagnostics);
            self.js.push_str(&js);
            if !js.ends_with('\n') {
                self.js.push('\n');
            }
        }

        let text = element.text.as_ref().map(|t| t.content.as_str());
        if element.children.is_empty() {
            match text {
                Some(text) => out.line(&format!("{}{}</{}>", open_tag, text, element.tag)),
                None => out.line(&format!("{}</{}>", open_tag, element.tag)),
            }
            return Ok(());
        }

        out.line(&open_tag);
        out.indent();
        if let Some(text) = text {
            out.line(text);
        }
        for child in &element.children {
            match child {
                ChildItem::Element(child) => self.generate_element(child, out)?,
                ChildItem::Comment(comment) => out.line(&format!("<!-- {} -->", comment.text)),
                ChildItem::OriginRef { name, span } => {
                    let Some(origin) = self.program.find_origin(name) else {
                        return Err(CompileError::Generate(Diagnostic::semantic(
                            format!("origin '{}' is not defined", name),
                            *span,
                        )));
                    };
                    self.check_origin_kind(origin)?;
                    for line in origin.content.lines() {
                        out.line(line);
                    }
                }
            }
        }
        out.dedent();
        out.line(&format!("</{}>", element.tag));
        Ok(())
    }

    /// Turn the selector groups of a local style node into scoped CSS rules
    /// and collect the auto class/id attributes they imply.
    fn expand_style(
        &mut self,
        style: &StyleNode,
        element: &Element,
        auto_classes: &mut Vec<String>,
        auto_id: &mut Option<String>,
    ) -> Result<(), CompileError> {
        for selector in &style.selectors {
            let properties =
                self.merge_style_properties(&selector.properties, &selector.template_refs)?;
            let declarations = self.evaluate_declarations(&properties)?;

            let selector_text = match selector.kind {
                SelectorKind::Class | SelectorKind::Id | SelectorKind::BareElement
                | SelectorKind::Descendant => selector.text.clone(),
                // `&` and bare pseudos resolve against the owning tag
                SelectorKind::Context | SelectorKind::PseudoClass
                | SelectorKind::PseudoElement => format!("{}{}", element.tag, selector.text),
            };

            let final_selector = self.css.add_rule(selector_text, declarations);

            match selector.kind {
                SelectorKind::Class => {
                    if !self.config.disable_style_auto_add_class {
                        if let Some(class) = final_selector.strip_prefix('.') {
                            auto_classes.push(class.to_string());
                        }
                    }
                }
                SelectorKind::Id => {
                    if !self.config.disable_style_auto_add_id && auto_id.is_none() {
                        if let Some(id) = final_selector.strip_prefix('#') {
                            *auto_id = Some(id.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// In-order merge of direct properties with referenced style templates:
    /// a template-declared property loses to a same-named property already
    /// present on the consuming style.
    fn merge_style_properties(
        &mut self,
        direct: &[StyleProperty],
        refs: &[TemplateRef],
    ) -> Result<Vec<StyleProperty>, CompileError> {
        let mut merged: Vec<StyleProperty> = direct.to_vec();
        for template_ref in refs {
            let properties = self.flatten_style_template(&template_ref.name, template_ref.span)?;
            for property in properties {
                if !merged.iter().any(|p| p.name == property.name) {
                    merged.push(property);
                }
            }
        }
        Ok(merged)
    }

    /// Resolve a style-kind template or custom to its flattened property
    /// list. Lookup happens here, at generation time, so edits to a
    /// definition are visible at every later call site in the same pass.
    fn flatten_style_template(
        &mut self,
        name: &str,
        span: crate::parser::tokenizer::Span,
    ) -> Result<Vec<StyleProperty>, CompileError> {
        if self.applying.iter().any(|n| n == name) {
            return Err(CompileError::Generate(Diagnostic::semantic(
                format!("recursive template reference '{}'", name),
                span,
            )));
        }

        let (content, inherits, specializations) =
            if let Some(template) = self.find_template(name) {
                (&template.content, template.inherits.clone(), None)
            } else if let Some(custom) = self.find_custom(name) {
                (&custom.content, custom.inherits.clone(), Some(custom.specializations.clone()))
            } else {
                return Err(CompileError::Generate(Diagnostic::semantic(
                    format!("template '{}' is not defined", name),
                    span,
                )));
            };

        let TemplateContent::Style(own) = content else {
            return Err(CompileError::Generate(Diagnostic::semantic(
                format!("'{}' is not a style template", name),
                span,
            )));
        };
        let own = own.clone();

        self.applying.push(name.to_string());
        let mut properties: Vec<StyleProperty> = Vec::new();
        for base in &inherits {
            for property in self.flatten_style_template(base, span)? {
                upsert_property(&mut properties, property);
            }
        }
        self.applying.pop();

        for property in own {
            upsert_property(&mut properties, property);
        }

        if let Some(specializations) = specializations {
            for specialization in &specializations {
                match &specialization.op {
                    SpecOp::Delete { target } => {
                        properties.retain(|p| p.name != *target);
                    }
                    SpecOp::AddStyle { properties: added } => {
                        for property in added.clone() {
                            upsert_property(&mut properties, property);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(properties)
    }

    fn evaluate_declarations(
        &mut self,
        properties: &[StyleProperty],
    ) -> Result<Vec<(String, String)>, CompileError> {
        let resolver = ProgramVars { program: self.program, config: &self.config };
        let mut declarations: Vec<(String, String)> = Vec::new();
        for property in properties {
            let value = evaluate_property(&property.value, &resolver).map_err(|message| {
                CompileError::Generate(Diagnostic::semantic(message, property.span))
            })?;
            match declarations.iter_mut().find(|(name, _)| *name == property.name) {
                Some(slot) => slot.1 = value,
                None => declarations.push((property.name.clone(), value)),
            }
        }
        Ok(declarations)
    }

    /// Instantiate an element-kind template or custom by name: inherited
    /// content first, own content after, specializations applied in
    /// declaration order.
    fn instantiate_by_name(
        &mut self,
        name: &str,
        span: crate::parser::tokenizer::Span,
    ) -> Result<Vec<Element>, CompileError> {
        if self.applying.iter().any(|n| n == name) {
            return Err(CompileError::Generate(Diagnostic::semantic(
                format!("recursive template reference '{}'", name),
                span,
            )));
        }

        let (content, inherits, specializations) = if let Some(custom) = self.find_custom(name) {
            (custom.content.clone(), custom.inherits.clone(), custom.specializations.clone())
        } else if let Some(template) = self.find_template(name) {
            (template.content.clone(), template.inherits.clone(), Vec::new())
        } else {
            return Err(CompileError::Generate(Diagnostic::semantic(
                format!("template '{}' is not defined", name),
                span,
            )));
        };

        let TemplateContent::Element(own) = content else {
            return Err(CompileError::Generate(Diagnostic::semantic(
                format!("'{}' is not an element template", name),
                span,
            )));
        };

        // An inherit deleted by a specialization never contributes content
        let deleted_inherits: Vec<&String> = specializations
            .iter()
            .filter_map(|s| match &s.op {
                SpecOp::Delete { target } if inherits.contains(target) => Some(target),
                _ => None,
            })
            .collect();

        self.applying.push(name.to_string());
        let mut roots: Vec<Element> = Vec::new();
        let mut result = Ok(());
        for base in &inherits {
            if deleted_inherits.iter().any(|d| *d == base) {
                continue;
            }
            match self.instantiate_by_name(base, span) {
                Ok(elements) => roots.extend(elements),
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        self.applying.pop();
        result?;

        roots.extend(own);

        for specialization in &specializations {
            self.apply_specialization(&mut roots, specialization, &deleted_inherits);
        }

        Ok(roots)
    }

    /// One declarative edit against the instantiated base content. Later
    /// operations on the same target override earlier ones.
    fn apply_specialization(
        &mut self,
        roots: &mut Vec<Element>,
        specialization: &Specialization,
        deleted_inherits: &[&String],
    ) {
        match &specialization.op {
            SpecOp::Delete { target } => {
                if deleted_inherits.iter().any(|d| *d == target) {
                    return; // handled before instantiation
                }
                let had_elements = remove_elements_by_tag(roots, target);
                if !had_elements {
                    if let Some(first) = roots.first_mut() {
                        first.attributes.retain(|a| a.name != *target);
                    }
                }
            }
            SpecOp::Insert { anchor, target, elements } => {
                self.apply_insert(roots, *anchor, target.as_deref(), elements, specialization.span);
            }
            SpecOp::AddStyle { properties } => {
                if let Some(first) = roots.first_mut() {
                    let style = first.style.get_or_insert_with(|| {
                        StyleNode::new(true, true, specialization.span)
                    });
                    style.properties.extend(properties.clone());
                }
            }
            SpecOp::SetAttribute { name, value } => {
                if let Some(first) = roots.first_mut() {
                    first.set_attribute(Attribute {
                        name: name.clone(),
                        value: value.clone(),
                        span: specialization.span,
                    });
                }
            }
        }
    }

    fn apply_insert(
        &mut self,
        roots: &mut Vec<Element>,
        anchor: Anchor,
        target: Option<&str>,
        elements: &[Element],
        span: crate::parser::tokenizer::Span,
    ) {
        let items: Vec<ChildItem> =
            elements.iter().cloned().map(ChildItem::Element).collect();
        match anchor {
            Anchor::Top => {
                if let Some(first) = roots.first_mut() {
                    first.children.splice(0..0, items);
                }
            }
            Anchor::Bottom => {
                if let Some(first) = roots.first_mut() {
                    first.children.extend(items);
                }
            }
            Anchor::Before | Anchor::After | Anchor::Replace => {
                let Some(target) = target else { return };
                // Root list first, then the first root's children
                if let Some(index) = roots.iter().position(|e| e.tag == target) {
                    match anchor {
                        Anchor::Before => {
                            roots.splice(index..index, elements.iter().cloned());
                        }
                        Anchor::After => {
                            roots.splice(index + 1..index + 1, elements.iter().cloned());
                        }
                        _ => {
                            roots.splice(index..index + 1, elements.iter().cloned());
                        }
                    }
                    return;
                }
                let Some(first) = roots.first_mut() else { return };
                let position = first.children.iter().position(
                    |c| matches!(c, ChildItem::Element(e) if e.tag == target),
                );
                match position {
                    Some(index) => match anchor {
                        Anchor::Before => {
                            first.children.splice(index..index, items);
                        }
                        Anchor::After => {
                            first.children.splice(index + 1..index + 1, items);
                        }
                        _ => {
                            first.children.splice(index..index + 1, items);
                        }
                    },
                    None => self.diagnostics.push(Diagnostic::warning(
                        format!("insert target '{}' not found in custom content", target),
                        span,
                    )),
                }
            }
        }
    }

    fn emit_origin(&mut self, origin: &OriginNode, out: &mut Output) -> Result<(), CompileError> {
        self.check_origin_kind(origin)?;
        match origin.kind {
            OriginKind::Style => {
                self.raw_css.push_str(&origin.content);
                if !origin.content.ends_with('\n') {
                    self.raw_css.push('\n');
                }
            }
            OriginKind::JavaScript => {
                self.js.push_str(&origin.content);
                if !origin.content.ends_with('\n') {
                    self.js.push('\n');
                }
            }
            OriginKind::Html | OriginKind::Custom(_) => {
                for line in origin.content.lines() {
                    out.line(line);
                }
            }
        }
        Ok(())
    }

    fn check_origin_kind(&self, origin: &OriginNode) -> Result<(), CompileError> {
        if let OriginKind::Custom(type_name) = &origin.kind {
            if self.config.disable_custom_origin_type {
                return Err(CompileError::Generate(Diagnostic::semantic(
                    format!("custom Origin type '@{}' is disabled by configuration", type_name),
                    origin.span,
                )));
            }
        }
        Ok(())
    }

    // --- Name resolution ---

    /// Root definitions first; namespace-owned definitions are reachable
    /// through the implicit root namespace unless disabled.
    fn find_template(&self, name: &str) -> Option<&'a Template> {
        self.program.find_template(name).or_else(|| {
            (!self.config.disable_default_namespace)
                .then(|| find_namespace_template(&self.program.namespaces, name))
                .flatten()
        })
    }

    fn find_custom(&self, name: &str) -> Option<&'a Custom> {
        self.program.find_custom(name).or_else(|| {
            (!self.config.disable_default_namespace)
                .then(|| find_namespace_custom(&self.program.namespaces, name))
                .flatten()
        })
    }
}

/// Innermost-outward search order: a namespace's own definitions win over
/// deeper ones, and declaration order breaks ties deterministically.
fn find_namespace_template<'p>(namespaces: &'p [Namespace], name: &str) -> Option<&'p Template> {
    for namespace in namespaces {
        if let Some(template) = namespace.templates.iter().find(|t| t.name == name) {
            return Some(template);
        }
        if let Some(template) = find_namespace_template(&namespace.namespaces, name) {
            return Some(template);
        }
    }
    None
}

fn find_namespace_custom<'p>(namespaces: &'p [Namespace], name: &str) -> Option<&'p Custom> {
    for namespace in namespaces {
        if let Some(custom) = namespace.customs.iter().find(|c| c.name == name) {
            return Some(custom);
        }
        if let Some(custom) = find_namespace_custom(&namespace.namespaces, name) {
            return Some(custom);
        }
    }
    None
}

/// Var-template resolution for style-value call expressions.
struct ProgramVars<'p> {
    program: &'p Program,
    config: &'p CompilerConfig,
}

impl VarResolver for ProgramVars<'_> {
    fn resolve_var(&self, callee: &str, key: &str) -> Option<String> {
        let template = self.program.find_template(callee).or_else(|| {
            (!self.config.disable_default_namespace)
                .then(|| find_namespace_template(&self.program.namespaces, callee))
                .flatten()
        })?;
        let TemplateContent::Var(bindings) = &template.content else {
            return None;
        };
        bindings.iter().find(|b| b.name == key).map(|b| b.value.clone())
    }
}

/// Layer the use-site element onto the first instantiated root: original
/// attributes override template attributes, text replaces text, children
/// append after template children.
fn layer_use_site(roots: &mut [Element], use_site: &Element) {
    let Some(first) = roots.first_mut() else { return };
    for attribute in &use_site.attributes {
        first.set_attribute(attribute.clone());
    }
    if use_site.text.is_some() {
        first.text = use_site.text.clone();
    }
    if let Some(style) = &use_site.style {
        match first.style.as_mut() {
            Some(existing) => {
                // Use-site properties land after template properties, so
                // they win the last-write merge at emission time
                existing.properties.extend(style.properties.clone());
                existing.selectors.extend(style.selectors.clone());
                existing.template_refs.extend(style.template_refs.clone());
            }
            None => first.style = Some(style.clone()),
        }
    }
    if use_site.script.is_some() {
        first.script = use_site.script.clone();
    }
    first.children.extend(use_site.children.iter().cloned());
}

fn upsert_property(properties: &mut Vec<StyleProperty>, property: StyleProperty) {
    match properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) => *existing = property,
        None => properties.push(property),
    }
}

/// Remove every element with the given tag anywhere in the instantiated
/// tree; reports whether anything matched.
fn remove_elements_by_tag(roots: &mut Vec<Element>, tag: &str) -> bool {
    let before = roots.len();
    roots.retain(|e| e.tag != tag);
    let mut removed = roots.len() != before;
    for root in roots.iter_mut() {
        removed |= remove_children_by_tag(root, tag);
    }
    removed
}

fn remove_children_by_tag(element: &mut Element, tag: &str) -> bool {
    let before = element.children.len();
    element
        .children
        .retain(|c| !matches!(c, ChildItem::Element(e) if e.tag == tag));
    let mut removed = element.children.len() != before;
    for child in element.children.iter_mut() {
        if let ChildItem::Element(child) = child {
            removed |= remove_children_by_tag(child, tag);
        }
    }
    removed
}

fn join_classes(classes: &[String]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for class in classes {
        if !seen.contains(&class.as_str()) {
            seen.push(class.as_str());
        }
    }
    seen.join(" ")
}

fn attribute_value(attributes: &[(String, Option<String>)], name: &str) -> Option<String> {
    attributes
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, value)| value.clone())
}

/// Ordered CSS rule store with first-declared-order emission, identical-rule
/// dedup, and index-suffixed disambiguation for conflicting class rules.
struct CssCollector {
    rules: Vec<CssRule>,
    next_index: usize,
}

struct CssRule {
    selector: String,
    declarations: Vec<(String, String)>,
}

impl CssCollector {
    fn new(initial_index: usize) -> Self {
        Self { rules: Vec::new(), next_index: initial_index }
    }

    /// Add a rule, returning the selector it was finally stored under.
    fn add_rule(&mut self, selector: String, declarations: Vec<(String, String)>) -> String {
        if declarations.is_empty() {
            return selector;
        }
        let Some(index) = self.rules.iter().position(|r| r.selector == selector) else {
            self.rules.push(CssRule { selector: selector.clone(), declarations });
            return selector;
        };
        // Identical redeclaration collapses into one rule
        if self.rules[index].declarations == declarations {
            return selector;
        }
        // Conflicting class rules get a disambiguating suffix; anything
        // else merges with later values winning
        if selector.starts_with('.') && !selector.contains(' ') {
            let fresh = format!("{}-{}", selector, self.next_index);
            self.next_index += 1;
            return self.add_rule(fresh, declarations);
        }
        for (name, value) in declarations {
            match self.rules[index].declarations.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => self.rules[index].declarations.push((name, value)),
            }
        }
        selector
    }

    fn finish(self) -> String {
        let mut output = Output::new();
        for rule in &self.rules {
            output.line(&format!("{} {{", rule.selector));
            output.indent();
            for (name, value) in &rule.declarations {
                output.line(&format!("{}: {};", name, value));
            }
            output.dedent();
            output.line("}");
        }
        output.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::generate;
    use crate::parser::parse;

    fn compile(source: &str) -> GenerateResult {
        let (program, diagnostics) = parse(source);
        assert!(diagnostics.is_empty(), "parse diagnostics: {:?}", diagnostics);
        generate(&program, &CompilerConfig::default()).expect("generation succeeds")
    }

    fn compile_err(source: &str) -> CompileError {
        let (program, diagnostics) = parse(source);
        assert!(diagnostics.is_empty(), "parse diagnostics: {:?}", diagnostics);
        generate(&program, &CompilerConfig::default()).expect_err("generation fails")
    }

    #[test]
    fn test_attributes_in_declaration_order() {
        let result = compile("section { id: \"x\"; class: \"y\"; }");
        assert!(result.html.contains("<section id=\"x\" class=\"y\"></section>"));
    }

    #[test]
    fn test_void_element_never_closes() {
        let result = compile("img { src: \"a.png\"; text { \"ignored\" } div { } }");
        assert!(result.html.contains("<img src=\"a.png\" />"));
        assert!(!result.html.contains("</img>"));
        assert!(!result.html.contains("ignored"));
    }

    #[test]
    fn test_auto_class_injection_and_scoped_css() {
        let result =
            compile("div { id: main; style { .container { width: 100%; } } }");
        assert!(result.html.contains("<div id=\"main\" class=\"container\">")
            || result.html.contains("<div id=\"main\" class=\"container\"></div>"));
        assert!(result.css.contains(".container {"));
        assert!(result.css.contains("width: 100%;"));
    }

    #[test]
    fn test_auto_id_injection() {
        let result = compile("div { style { #app { color: red; } } }");
        assert!(result.html.contains("id=\"app\""));
        assert!(result.css.contains("#app {"));
    }

    #[test]
    fn test_context_selector_resolves_to_owning_tag() {
        let result = compile("div { style { &:hover { color: blue; } } }");
        assert!(result.css.contains("div:hover {"));
    }

    #[test]
    fn test_inline_style_attribute() {
        let result = compile("div { style { width: 100px + 20em * 2; } }");
        assert!(result.html.contains("style=\"width: calc(100px + (20em * 2))\""));
    }

    #[test]
    fn test_style_template_merge_local_wins() {
        let result = compile(
            "Template @Style Base { color: red; margin: 0; } div { style { color: blue; @Style Base; } }",
        );
        assert!(result.html.contains("color: blue"));
        assert!(result.html.contains("margin: 0"));
        assert!(!result.html.contains("color: red"));
    }

    #[test]
    fn test_element_template_application() {
        let result = compile(
            "Template @Element Card { div { class: \"card\"; span { text { \"inner\" } } } } Card { id: \"first\"; }",
        );
        assert!(result.html.contains("<div class=\"card\" id=\"first\">"));
        assert!(result.html.contains("<span>inner</span>"));
    }

    #[test]
    fn test_unresolved_template_is_hard_error() {
        let error = compile_err("div { style { @Style Missing; } }");
        assert!(error.to_string().contains("'Missing' is not defined"));
    }

    #[test]
    fn test_custom_specializations_last_wins() {
        let result = compile(
            "Custom @Element Box { div { title: \"a\"; } title: \"b\"; title: \"c\"; } Box { }",
        );
        assert!(result.html.contains("title=\"c\""));
        assert!(!result.html.contains("title=\"b\""));
    }

    #[test]
    fn test_custom_delete_and_insert() {
        let result = compile(
            "Custom @Element Page { div { header { } main { } } delete header; insert after main { footer { } } } Page { }",
        );
        assert!(!result.html.contains("<header"));
        let main_pos = result.html.find("<main").unwrap();
        let footer_pos = result.html.find("<footer").unwrap();
        assert!(footer_pos > main_pos);
    }

    #[test]
    fn test_var_template_call() {
        let result = compile(
            "Template @Var Theme { primary: \"#336699\"; } div { style { color: Theme(primary); } }",
        );
        assert!(result.html.contains("color: #336699"));
    }

    #[test]
    fn test_imports_emit_in_declaration_order() {
        let result = compile(
            "Import @Css from \"a.css\"; Import @Js from \"b.js\"; div { }",
        );
        let link = result.html.find("<link rel=\"stylesheet\" href=\"a.css\">").unwrap();
        let script = result.html.find("<script src=\"b.js\"></script>").unwrap();
        assert!(link < script);
    }

    #[test]
    fn test_identical_rules_dedup() {
        let result = compile(
            "div { style { .note { color: red; } } } span { style { .note { color: red; } } }",
        );
        assert_eq!(result.css.matches(".note {").count(), 1);
    }

    #[test]
    fn test_conflicting_class_rules_get_index_suffix() {
        let result = compile(
            "div { style { .note { color: red; } } } span { style { .note { color: blue; } } }",
        );
        assert!(result.css.contains(".note {"));
        assert!(result.css.contains(".note-0 {"));
        assert!(result.html.contains("class=\"note-0\""));
    }

    #[test]
    fn test_enhanced_script_compiles_with_host() {
        let result = compile("div { id: app; script { {{&}}->classList.add('on'); } }");
        assert!(result.js.contains("document.querySelector('#app').classList.add('on');"));
    }

    #[test]
    fn test_origin_blocks_route_to_streams() {
        let result = compile(
            "Origin @Html { <canvas></canvas> } Origin @Style named { body { margin: 0; } } div { }",
        );
        assert!(result.html.contains("<canvas></canvas>"));
        // Named style origin is only emitted when referenced
        assert!(!result.css.contains("margin: 0"));
    }

    #[test]
    fn test_generator_comment_emitted() {
        let result = compile("-- build marker\ndiv { }");
        assert!(result.html.contains("<!-- build marker -->"));
    }

    #[test]
    fn test_except_constraint_skips_element() {
        let (program, _) = parse("except marquee; marquee { } div { }");
        let result = generate(&program, &CompilerConfig::default()).unwrap();
        assert!(!result.html.contains("<marquee"));
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn test_namespace_template_reachable_by_default() {
        let result = compile(
            "Namespace ui { Template @Style Pad { padding: 8px; } } div { style { @Style Pad; } }",
        );
        assert!(result.html.contains("padding: 8px"));
    }

    #[test]
    fn test_late_binding_resolves_at_each_generation() {
        let (mut program, _) = parse(
            "Template @Style Accent { color: red; } div { style { @Style Accent; } }",
        );
        let first = generate(&program, &CompilerConfig::default()).unwrap();
        assert!(first.html.contains("color: red"));

        // Mutating the definition after parsing affects the next pass:
        // references resolve by name at generation time, never snapshot
        if let TemplateContent::Style(props) = &mut program.templates[0].content {
            props[0].value = StyleValue::Raw("green".into());
        }
        let second = generate(&program, &CompilerConfig::default()).unwrap();
        assert!(second.html.contains("color: green"));
    }
}
