use super::expr::parse_expression;
use super::tokenizer::{Keyword, Position, Span, Token, TokenKind};
use crate::ast::*;
use crate::error::{Diagnostic, DiagnosticKind};
use log::debug;

/// Builds a `Program` from a token stream.
///
/// All parse errors are accumulated as diagnostics rather than raised;
/// recovery skips the offending token and resumes at the enclosing
/// construct, so a single pass reports every problem in the unit.
pub struct TreeBuilder<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(tokens: Vec<Token>, source: &'a str) -> Self {
        Self { tokens, pos: 0, source, diagnostics: Vec::new() }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();

        while !self.at_eof() {
            match self.current_kind() {
                TokenKind::Comment => {
                    if let Some(comment) = self.take_generator_comment() {
                        program.body.push(BodyItem::Comment(comment));
                    }
                }
                TokenKind::Keyword(Keyword::Use) => {
                    if let Some(decl) = self.parse_use() {
                        if program.use_decl.is_some() {
                            self.diagnostics.push(Diagnostic::syntax(
                                "duplicate use declaration",
                                Span::point(decl.span.start),
                            ));
                        } else {
                            program.use_decl = Some(decl);
                        }
                    }
                }
                TokenKind::Keyword(Keyword::Import) => {
                    if let Some(import) = self.parse_import(None) {
                        program.imports.push(import);
                    }
                }
                TokenKind::Keyword(Keyword::Namespace) => {
                    if let Some(namespace) = self.parse_namespace() {
                        program.namespaces.push(namespace);
                    }
                }
                TokenKind::Keyword(Keyword::Configuration) => {
                    if let Some(configuration) = self.parse_configuration() {
                        program.configurations.push(configuration);
                    }
                }
                TokenKind::Keyword(Keyword::Except) => {
                    self.parse_except(&mut program.constraints);
                }
                TokenKind::Keyword(Keyword::Template) => {
                    if let Some(template) = self.parse_template() {
                        program.templates.push(template);
                    }
                }
                TokenKind::Keyword(Keyword::Custom) => {
                    if let Some(custom) = self.parse_custom() {
                        program.customs.push(custom);
                    }
                }
                TokenKind::Keyword(Keyword::Origin) => match self.parse_origin() {
                    Some(origin) if origin.name.is_some() => program.origins.push(origin),
                    Some(origin) => program.body.push(BodyItem::Origin(origin)),
                    None => {}
                },
                TokenKind::Ident => {
                    if let Some(element) = self.parse_element() {
                        program.body.push(BodyItem::Element(element));
                    }
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("at top level"),
            }
        }

        debug!(
            "parsed program: {} top-level item(s), {} template(s), {} diagnostic(s)",
            program.body.len(),
            program.templates.len(),
            self.diagnostics.len()
        );
        program
    }

    // --- Top-level declarations ---

    /// `use html5;`
    fn parse_use(&mut self) -> Option<UseDecl> {
        let start = self.advance().position; // 'use'
        let mut parts = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::Semicolon) {
            parts.push(self.advance().literal);
        }
        self.eat(TokenKind::Semicolon);
        if parts.is_empty() {
            self.diagnostics
                .push(Diagnostic::syntax("use declaration names nothing", Span::point(start)));
            return None;
        }
        Some(UseDecl { value: parts.join(" "), span: self.span_from(start) })
    }

    /// `Import @Css from "theme.css" as dark;` — the target form
    /// `Import @Chtl Button from "lib.chtl";` names a single symbol.
    fn parse_import(&mut self, namespace: Option<&str>) -> Option<ImportNode> {
        let start = self.advance().position; // 'Import'
        if !self.eat(TokenKind::At) {
            self.expected("'@' after Import", start);
            self.recover_to_semicolon();
            return None;
        }
        let type_name = self.take_ident("import kind")?;
        let Some(kind) = ImportKind::from_type_name(&type_name) else {
            self.diagnostics.push(Diagnostic::semantic(
                format!("unknown import kind '@{}'", type_name),
                self.span_from(start),
            ));
            self.recover_to_semicolon();
            return None;
        };

        let mut target = None;
        if self.current_kind() == TokenKind::Ident {
            target = Some(self.advance().literal);
        }

        let mut path = String::new();
        if self.at_keyword(Keyword::From) {
            self.advance();
            path = self.take_path()?;
        } else if self.at(TokenKind::Str) {
            path = self.advance().literal;
        } else if let Some(symbol) = target.take() {
            // `Import @Css reset;` — bare module-style path
            path = symbol;
        } else {
            self.expected("import path", start);
        }

        let mut alias = None;
        if self.at_keyword(Keyword::As) {
            self.advance();
            alias = self.take_ident("import alias");
        }
        self.eat(TokenKind::Semicolon);

        Some(ImportNode {
            kind,
            path,
            target,
            alias,
            namespace: namespace.map(str::to_string),
            span: self.span_from(start),
        })
    }

    /// `Namespace name { ... }` with nested namespaces, templates, customs
    /// and imports.
    fn parse_namespace(&mut self) -> Option<Namespace> {
        let start = self.advance().position; // 'Namespace'
        let name = self.take_ident("namespace name")?;
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after namespace name", start);
            return None;
        }

        let mut namespace = Namespace {
            name: name.clone(),
            namespaces: Vec::new(),
            templates: Vec::new(),
            customs: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            span: self.span_from(start),
        };

        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Keyword(Keyword::Namespace) => {
                    if let Some(nested) = self.parse_namespace() {
                        namespace.namespaces.push(nested);
                    }
                }
                TokenKind::Keyword(Keyword::Template) => {
                    if let Some(template) = self.parse_template() {
                        namespace.templates.push(template);
                    }
                }
                TokenKind::Keyword(Keyword::Custom) => {
                    if let Some(custom) = self.parse_custom() {
                        namespace.customs.push(custom);
                    }
                }
                TokenKind::Keyword(Keyword::Import) => {
                    if let Some(import) = self.parse_import(Some(&name)) {
                        namespace.imports.push(import);
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside namespace"),
            }
        }
        self.eat(TokenKind::RBrace);
        namespace.span = self.span_from(start);
        Some(namespace)
    }

    /// `Configuration { key = value; ... }`; later keys overwrite earlier
    /// ones with the same name inside the block.
    fn parse_configuration(&mut self) -> Option<Configuration> {
        let start = self.advance().position; // 'Configuration'
        // Optional configuration name, tolerated and ignored
        if self.current_kind() == TokenKind::Ident && self.peek_kind() == TokenKind::LBrace {
            self.advance();
        }
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after Configuration", start);
            return None;
        }

        let mut configuration = Configuration { options: Vec::new(), span: Span::point(start) };
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident | TokenKind::Keyword(_) => {
                    let option_start = self.current().position;
                    let name = self.advance().literal;
                    if !(self.eat(TokenKind::Assign)
                        || self.eat(TokenKind::Colon)
                        || self.eat(TokenKind::ColonAssign))
                    {
                        self.expected("'=' or ':' in configuration option", option_start);
                        self.recover_to_semicolon();
                        continue;
                    }
                    let (_, raw) = self.collect_value_tokens();
                    let option =
                        ConfigOption { name, value: raw, span: self.span_from(option_start) };
                    match configuration.options.iter_mut().find(|o| o.name == option.name) {
                        Some(existing) => *existing = option,
                        None => configuration.options.push(option),
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside configuration block"),
            }
        }
        self.eat(TokenKind::RBrace);
        configuration.span = self.span_from(start);
        Some(configuration)
    }

    /// `except name, other;`
    fn parse_except(&mut self, constraints: &mut Vec<ExceptConstraint>) {
        let start = self.advance().position; // 'except'
        loop {
            match self.take_ident("constraint name") {
                Some(name) => {
                    constraints.push(ExceptConstraint { name, span: self.span_from(start) })
                }
                None => break,
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.eat(TokenKind::Semicolon);
    }

    /// `Template @Style name { ... }` — body grammar branches on the
    /// declared kind.
    fn parse_template(&mut self) -> Option<Template> {
        let start = self.advance().position; // 'Template'
        let (kind, name) = self.parse_definition_header(start)?;
        let mut inherits = Vec::new();
        let content = match kind {
            TemplateKind::Style => {
                TemplateContent::Style(self.parse_style_template_body(&mut inherits, None))
            }
            TemplateKind::Element => {
                TemplateContent::Element(self.parse_element_template_body(&mut inherits, None))
            }
            TemplateKind::Var => TemplateContent::Var(self.parse_var_body()),
        };
        Some(Template {
            name,
            content,
            inherits,
            exports: Vec::new(),
            span: self.span_from(start),
        })
    }

    /// `Custom @Element name { ... }` — template body plus specialization
    /// operations, kept in declaration order.
    fn parse_custom(&mut self) -> Option<Custom> {
        let start = self.advance().position; // 'Custom'
        let (kind, name) = self.parse_definition_header(start)?;
        let mut inherits = Vec::new();
        let mut specializations = Vec::new();
        let content = match kind {
            TemplateKind::Style => TemplateContent::Style(
                self.parse_style_template_body(&mut inherits, Some(&mut specializations)),
            ),
            TemplateKind::Element => TemplateContent::Element(
                self.parse_element_template_body(&mut inherits, Some(&mut specializations)),
            ),
            TemplateKind::Var => TemplateContent::Var(self.parse_var_body()),
        };
        Some(Custom {
            name,
            content,
            inherits,
            exports: Vec::new(),
            specializations,
            span: self.span_from(start),
        })
    }

    /// Shared `@Kind name {` header of Template/Custom definitions.
    fn parse_definition_header(&mut self, start: Position) -> Option<(TemplateKind, String)> {
        if !self.eat(TokenKind::At) {
            self.expected("'@' after Template/Custom", start);
            self.recover_to_lbrace_or_semicolon();
            return None;
        }
        let type_name = self.take_ident("template kind")?;
        let Some(kind) = TemplateKind::from_type_name(&type_name) else {
            self.diagnostics.push(Diagnostic::syntax(
                format!("unknown template kind '@{}'", type_name),
                self.span_from(start),
            ));
            self.recover_to_lbrace_or_semicolon();
            return None;
        };
        let name = self.take_ident("template name")?;
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after template name", start);
            return None;
        }
        Some((kind, name))
    }

    fn parse_style_template_body(
        &mut self,
        inherits: &mut Vec<String>,
        mut specializations: Option<&mut Vec<Specialization>>,
    ) -> Vec<StyleProperty> {
        let mut properties = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => {
                    if let Some(property) = self.parse_style_property() {
                        properties.push(property);
                    }
                }
                TokenKind::Keyword(Keyword::Inherit) | TokenKind::At => {
                    if let Some(name) = self.parse_inherit_ref() {
                        inherits.push(name);
                    }
                }
                TokenKind::Keyword(Keyword::Delete) if specializations.is_some() => {
                    let op = self.parse_delete_op();
                    if let (Some(list), Some(op)) = (specializations.as_deref_mut(), op) {
                        list.push(op);
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside style template body"),
            }
        }
        self.eat(TokenKind::RBrace);
        properties
    }

    fn parse_element_template_body(
        &mut self,
        inherits: &mut Vec<String>,
        mut specializations: Option<&mut Vec<Specialization>>,
    ) -> Vec<Element> {
        let mut elements = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => {
                    // `name: value;` in a custom body is an attribute
                    // override on the root content, not an element.
                    if self.peek_kind() == TokenKind::Colon {
                        let op = self.parse_set_attribute_op();
                        match (specializations.as_deref_mut(), op) {
                            (Some(list), Some(op)) => list.push(op),
                            (None, Some(op)) => self.diagnostics.push(Diagnostic::syntax(
                                "attribute override outside a Custom definition",
                                op.span,
                            )),
                            _ => {}
                        }
                    } else if let Some(element) = self.parse_element() {
                        elements.push(element);
                    }
                }
                TokenKind::Keyword(Keyword::Inherit) | TokenKind::At => {
                    if let Some(name) = self.parse_inherit_ref() {
                        inherits.push(name);
                    }
                }
                TokenKind::Keyword(Keyword::Delete) if specializations.is_some() => {
                    let op = self.parse_delete_op();
                    if let (Some(list), Some(op)) = (specializations.as_deref_mut(), op) {
                        list.push(op);
                    }
                }
                TokenKind::Keyword(Keyword::Insert) if specializations.is_some() => {
                    let op = self.parse_insert_op();
                    if let (Some(list), Some(op)) = (specializations.as_deref_mut(), op) {
                        list.push(op);
                    }
                }
                TokenKind::Keyword(Keyword::Style) if specializations.is_some() => {
                    let op = self.parse_add_style_op();
                    if let (Some(list), Some(op)) = (specializations.as_deref_mut(), op) {
                        list.push(op);
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside element template body"),
            }
        }
        self.eat(TokenKind::RBrace);
        elements
    }

    fn parse_var_body(&mut self) -> Vec<VarBinding> {
        let mut bindings = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => {
                    let start = self.current().position;
                    let name = self.advance().literal;
                    if !self.eat(TokenKind::Colon) {
                        self.expected("':' in var binding", start);
                        self.recover_to_semicolon();
                        continue;
                    }
                    let (tokens, raw) = self.collect_value_tokens();
                    let value = match tokens.as_slice() {
                        [single] if single.kind == TokenKind::Str => single.literal.clone(),
                        _ => raw,
                    };
                    bindings.push(VarBinding { name, value, span: self.span_from(start) });
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside var template body"),
            }
        }
        self.eat(TokenKind::RBrace);
        bindings
    }

    /// `inherit name;` or `@Style name;`
    fn parse_inherit_ref(&mut self) -> Option<String> {
        if self.at(TokenKind::At) {
            self.advance();
            self.take_ident("template kind")?; // @Style / @Element / @Var
        } else {
            self.advance(); // 'inherit'
            if self.at(TokenKind::At) {
                self.advance();
                self.take_ident("template kind")?;
            }
        }
        let name = self.take_ident("template name")?;
        self.eat(TokenKind::Semicolon);
        Some(name)
    }

    fn parse_delete_op(&mut self) -> Option<Specialization> {
        let start = self.advance().position; // 'delete'
        if self.at(TokenKind::At) {
            self.advance();
            self.take_ident("template kind")?;
        }
        let target = self.take_ident("delete target")?;
        self.eat(TokenKind::Semicolon);
        Some(Specialization { op: SpecOp::Delete { target }, span: self.span_from(start) })
    }

    /// `insert after div { ... }`, `insert top { ... }`, `insert replace
    /// header { ... }`
    fn parse_insert_op(&mut self) -> Option<Specialization> {
        let start = self.advance().position; // 'insert'
        let (anchor, target) = match self.current_kind() {
            TokenKind::Keyword(Keyword::Before) => {
                self.advance();
                (Anchor::Before, Some(self.take_ident("insert target")?))
            }
            TokenKind::Keyword(Keyword::After) => {
                self.advance();
                (Anchor::After, Some(self.take_ident("insert target")?))
            }
            TokenKind::Keyword(Keyword::Replace) => {
                self.advance();
                (Anchor::Replace, Some(self.take_ident("insert target")?))
            }
            TokenKind::Ident if self.current().literal == "top" => {
                self.advance();
                (Anchor::Top, None)
            }
            TokenKind::Ident if self.current().literal == "bottom" => {
                self.advance();
                (Anchor::Bottom, None)
            }
            _ => {
                self.expected("insert anchor (before/after/replace/top/bottom)", start);
                self.recover_to_semicolon();
                return None;
            }
        };
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after insert anchor", start);
            return None;
        }
        let mut elements = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => {
                    if let Some(element) = self.parse_element() {
                        elements.push(element);
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside insert payload"),
            }
        }
        self.eat(TokenKind::RBrace);
        Some(Specialization {
            op: SpecOp::Insert { anchor, target, elements },
            span: self.span_from(start),
        })
    }

    fn parse_add_style_op(&mut self) -> Option<Specialization> {
        let start = self.current().position;
        let style = self.parse_style_block(true, true)?;
        Some(Specialization {
            op: SpecOp::AddStyle { properties: style.properties },
            span: self.span_from(start),
        })
    }

    fn parse_set_attribute_op(&mut self) -> Option<Specialization> {
        let start = self.current().position;
        let attribute = self.parse_attribute()?;
        Some(Specialization {
            op: SpecOp::SetAttribute { name: attribute.name, value: attribute.value },
            span: self.span_from(start),
        })
    }

    /// `Origin @Html name? { raw }` — the body is captured verbatim.
    fn parse_origin(&mut self) -> Option<OriginNode> {
        let start = self.advance().position; // 'Origin'
        if !self.eat(TokenKind::At) {
            self.expected("'@' after Origin", start);
            self.recover_to_semicolon();
            return None;
        }
        let type_name = self.take_ident("origin kind")?;
        let kind = OriginKind::from_type_name(&type_name);

        let mut name = None;
        if self.current_kind() == TokenKind::Ident {
            name = Some(self.advance().literal);
        }
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after Origin header", start);
            return None;
        }
        let content = self.capture_raw_block();
        Some(OriginNode { kind, name, content, span: self.span_from(start) })
    }

    // --- Elements ---

    /// Element body parsing. Attribute vs. child element vs. bare flag
    /// attribute is decided by peeking one token past the identifier:
    /// `:` → attribute, `{` → child element, anything else → flag.
    fn parse_element(&mut self) -> Option<Element> {
        let start = self.current().position;
        let tag = self.advance().literal;
        if !self.eat(TokenKind::LBrace) {
            self.expected(&format!("'{{' after element tag '{}'", tag), start);
            return None;
        }

        let mut element = Element::new(tag, Span::point(start));
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => match self.peek_kind() {
                    TokenKind::Colon => {
                        if let Some(attribute) = self.parse_attribute() {
                            element.set_attribute(attribute);
                        }
                    }
                    TokenKind::LBrace => {
                        if let Some(child) = self.parse_element() {
                            element.children.push(ChildItem::Element(child));
                        }
                    }
                    _ => {
                        // Valueless boolean-style attribute: `disabled;`
                        let span_start = self.current().position;
                        let name = self.advance().literal;
                        self.eat(TokenKind::Semicolon);
                        element.set_attribute(Attribute {
                            name,
                            value: AttrValue::Flag,
                            span: self.span_from(span_start),
                        });
                    }
                },
                TokenKind::Keyword(Keyword::Text) => {
                    if let Some(text) = self.parse_text_block() {
                        element.text = Some(text);
                    }
                }
                TokenKind::Keyword(Keyword::Style) => {
                    if let Some(style) = self.parse_style_block(true, true) {
                        match element.style.as_mut() {
                            Some(existing) => {
                                existing.properties.extend(style.properties);
                                existing.selectors.extend(style.selectors);
                                existing.template_refs.extend(style.template_refs);
                            }
                            None => element.style = Some(style),
                        }
                    }
                }
                TokenKind::Keyword(Keyword::Script) => {
                    if let Some(script) = self.parse_script_block(true) {
                        element.script = Some(script);
                    }
                }
                TokenKind::Keyword(Keyword::Origin) => {
                    if let Some(reference) = self.parse_origin_ref() {
                        element.children.push(reference);
                    }
                }
                TokenKind::Comment => {
                    if let Some(comment) = self.take_generator_comment() {
                        element.children.push(ChildItem::Comment(comment));
                    }
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(_) if self.peek_kind() == TokenKind::Colon => {
                    // Keywords double as attribute names: `from: "x";`
                    if let Some(attribute) = self.parse_attribute() {
                        element.set_attribute(attribute);
                    }
                }
                _ => self.unexpected("inside element body"),
            }
        }
        if !self.eat(TokenKind::RBrace) {
            self.diagnostics.push(
                Diagnostic::syntax(
                    format!("element '{}' is never closed", element.tag),
                    Span::point(start),
                )
                .with_help("add the matching '}'"),
            );
        }
        element.span = self.span_from(start);
        Some(element)
    }

    /// `name: value;`
    fn parse_attribute(&mut self) -> Option<Attribute> {
        let start = self.current().position;
        let name = self.advance().literal;
        self.advance(); // ':'
        let (tokens, raw) = self.collect_value_tokens();
        let value = match tokens.as_slice() {
            [] => {
                self.diagnostics.push(Diagnostic::syntax(
                    format!("attribute '{}' has no value", name),
                    self.span_from(start),
                ));
                AttrValue::Flag
            }
            [single] if single.kind == TokenKind::Str => AttrValue::Literal(single.literal.clone()),
            _ => AttrValue::Bare(raw),
        };
        Some(Attribute { name, value, span: self.span_from(start) })
    }

    /// `text { "content" }` — string parts keep their exact text, bare
    /// tokens are joined with single spaces.
    fn parse_text_block(&mut self) -> Option<TextNode> {
        let start = self.advance().position; // 'text'
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after text", start);
            return None;
        }
        let mut parts: Vec<String> = Vec::new();
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            let token = self.advance();
            match token.kind {
                TokenKind::Comment | TokenKind::Semicolon => {}
                _ => parts.push(token.literal),
            }
        }
        self.eat(TokenKind::RBrace);
        Some(TextNode { content: parts.join(" "), span: self.span_from(start) })
    }

    /// `Origin @Html name;` in element position.
    fn parse_origin_ref(&mut self) -> Option<ChildItem> {
        let start = self.advance().position; // 'Origin'
        if !self.eat(TokenKind::At) {
            self.expected("'@' after Origin", start);
            self.recover_to_semicolon();
            return None;
        }
        self.take_ident("origin kind")?;
        let name = self.take_ident("origin name")?;
        self.eat(TokenKind::Semicolon);
        Some(ChildItem::OriginRef { name, span: self.span_from(start) })
    }

    // --- Style blocks ---

    /// Property vs. selector is decided by token kind: `.`/`#`/`&`/`:`
    /// start a selector, an identifier starts a property (unless followed
    /// by a selector continuation).
    fn parse_style_block(&mut self, is_inline: bool, is_local: bool) -> Option<StyleNode> {
        let start = self.advance().position; // 'style'
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after style", start);
            return None;
        }

        let mut style = StyleNode::new(is_inline, is_local, Span::point(start));
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Dot | TokenKind::HashName | TokenKind::Amp | TokenKind::Colon => {
                    if let Some(selector) = self.parse_style_selector() {
                        style.selectors.push(selector);
                    }
                }
                TokenKind::Ident => {
                    if self.peek_kind() == TokenKind::Colon {
                        if let Some(property) = self.parse_style_property() {
                            style.properties.push(property);
                        }
                    } else if self.peek_kind() == TokenKind::LBrace
                        || self.peek_starts_selector_part()
                    {
                        // Bare-element or descendant selector
                        if let Some(selector) = self.parse_style_selector() {
                            style.selectors.push(selector);
                        }
                    } else {
                        self.unexpected("inside style block");
                    }
                }
                TokenKind::At | TokenKind::Keyword(Keyword::Inherit) => {
                    let ref_start = self.current().position;
                    if let Some(name) = self.parse_inherit_ref() {
                        style
                            .template_refs
                            .push(TemplateRef { name, span: self.span_from(ref_start) });
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside style block"),
            }
        }
        self.eat(TokenKind::RBrace);
        style.span = self.span_from(start);
        Some(style)
    }

    fn peek_starts_selector_part(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Dot | TokenKind::HashName | TokenKind::Ident)
    }

    /// One selector group with its property body; recurses for the body.
    fn parse_style_selector(&mut self) -> Option<StyleSelector> {
        let start = self.current().position;
        let (mut text, mut kind) = match self.current_kind() {
            TokenKind::Dot => {
                self.advance();
                let name = self.take_ident("class selector name")?;
                (format!(".{}", name), SelectorKind::Class)
            }
            TokenKind::HashName => {
                let token = self.advance();
                (token.literal, SelectorKind::Id)
            }
            TokenKind::Amp => {
                self.advance();
                let suffix = self.take_selector_suffix();
                (suffix, SelectorKind::Context)
            }
            TokenKind::Colon => {
                self.advance();
                if self.at(TokenKind::Colon) {
                    self.advance();
                    let name = self.take_ident("pseudo-element name")?;
                    (format!("::{}", name), SelectorKind::PseudoElement)
                } else {
                    let name = self.take_ident("pseudo-class name")?;
                    (format!(":{}", name), SelectorKind::PseudoClass)
                }
            }
            TokenKind::Ident => {
                let token = self.advance();
                (token.literal, SelectorKind::BareElement)
            }
            _ => return None,
        };

        // Descendant chain: further parts before the body brace
        while !self.at_eof() && !self.at(TokenKind::LBrace) {
            match self.current_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.take_ident("class selector name")?;
                    text.push_str(&format!(" .{}", name));
                    kind = SelectorKind::Descendant;
                }
                TokenKind::HashName => {
                    let token = self.advance();
                    text.push_str(&format!(" {}", token.literal));
                    kind = SelectorKind::Descendant;
                }
                TokenKind::Ident => {
                    let token = self.advance();
                    text.push_str(&format!(" {}", token.literal));
                    kind = SelectorKind::Descendant;
                }
                _ => break,
            }
        }

        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after selector", start);
            return None;
        }
        let mut selector = StyleSelector {
            text,
            kind,
            properties: Vec::new(),
            template_refs: Vec::new(),
            span: Span::point(start),
        };
        while !self.at_eof() && !self.at(TokenKind::RBrace) {
            match self.current_kind() {
                TokenKind::Ident => {
                    if let Some(property) = self.parse_style_property() {
                        selector.properties.push(property);
                    }
                }
                TokenKind::At | TokenKind::Keyword(Keyword::Inherit) => {
                    let ref_start = self.current().position;
                    if let Some(name) = self.parse_inherit_ref() {
                        selector
                            .template_refs
                            .push(TemplateRef { name, span: self.span_from(ref_start) });
                    }
                }
                TokenKind::Comment | TokenKind::Semicolon => {
                    self.advance();
                }
                _ => self.unexpected("inside selector body"),
            }
        }
        self.eat(TokenKind::RBrace);
        selector.span = self.span_from(start);
        Some(selector)
    }

    /// Context selector suffix after `&`: `:hover`, `::before`, `.active`.
    fn take_selector_suffix(&mut self) -> String {
        let mut suffix = String::new();
        while !self.at_eof() && !self.at(TokenKind::LBrace) {
            match self.current_kind() {
                TokenKind::Colon => {
                    self.advance();
                    suffix.push(':');
                }
                TokenKind::Dot => {
                    self.advance();
                    suffix.push('.');
                }
                TokenKind::Ident => {
                    suffix.push_str(&self.advance().literal);
                }
                _ => break,
            }
        }
        suffix
    }

    /// `name: value;` — a value containing operators or a call goes through
    /// the expression sub-parser; everything else stays raw text.
    fn parse_style_property(&mut self) -> Option<StyleProperty> {
        let start = self.current().position;
        let name = self.advance().literal;
        if !self.eat(TokenKind::Colon) {
            self.expected(&format!("':' after property '{}'", name), start);
            self.recover_to_semicolon();
            return None;
        }
        let (tokens, raw) = self.collect_value_tokens();
        let value = if style_value_is_expression(&tokens) {
            match parse_expression(&tokens) {
                Some(expr) => StyleValue::Expr(expr),
                None => StyleValue::Raw(raw),
            }
        } else {
            StyleValue::Raw(raw)
        };
        Some(StyleProperty { name, value, span: self.span_from(start) })
    }

    // --- Script blocks ---

    /// The body is captured verbatim between the braces; enhanced-vs-plain
    /// classification happens after placeholder restoration.
    fn parse_script_block(&mut self, is_local: bool) -> Option<ScriptNode> {
        let start = self.advance().position; // 'script'
        if !self.eat(TokenKind::LBrace) {
            self.expected("'{' after script", start);
            return None;
        }
        let content = self.capture_raw_block();
        Some(ScriptNode {
            content,
            is_local,
            is_enhanced: false,
            selectors: Vec::new(),
            functions: Vec::new(),
            span: self.span_from(start),
        })
    }

    /// Verbatim source slice from after the already-consumed `{` to its
    /// matching `}`. Strings are single tokens, so brace counting over the
    /// token stream is never fooled by quoted braces.
    fn capture_raw_block(&mut self) -> String {
        let content_start = self
            .tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.position.offset + 1)
            .unwrap_or(0);
        let mut depth = 1usize;
        let mut content_end = content_start;
        while !self.at_eof() {
            let token = self.advance();
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        content_end = token.position.offset;
                        break;
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            content_end = self.source.len();
        }
        self.source[content_start.min(content_end)..content_end].trim().to_string()
    }

    // --- Value collection ---

    /// Collect tokens up to `;`/`}` (the `;` is consumed, the `}` is left
    /// for the enclosing block) and also return the verbatim source slice.
    fn collect_value_tokens(&mut self) -> (Vec<Token>, String) {
        let raw_start = self.current().position.offset;
        let mut tokens = Vec::new();
        while !self.at_eof()
            && !self.at(TokenKind::Semicolon)
            && !self.at(TokenKind::RBrace)
            && !self.at(TokenKind::LBrace)
        {
            let token = self.advance();
            if token.kind != TokenKind::Comment {
                tokens.push(token);
            }
        }
        let raw_end = self.current().position.offset;
        let raw = self.source[raw_start.min(raw_end)..raw_end].trim().to_string();
        self.eat(TokenKind::Semicolon);
        (tokens, raw)
    }

    // --- Cursor helpers ---

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.current_kind() == TokenKind::Keyword(keyword)
    }

    fn at_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn take_ident(&mut self, what: &str) -> Option<String> {
        match self.current().ident_text() {
            Some(_) => Some(self.advance().literal),
            None => {
                let span = Span::point(self.current().position);
                self.diagnostics.push(Diagnostic::syntax(
                    format!("expected {}, found '{}'", what, self.current().literal),
                    span,
                ));
                None
            }
        }
    }

    fn take_path(&mut self) -> Option<String> {
        match self.current_kind() {
            TokenKind::Str | TokenKind::Ident => Some(self.advance().literal),
            _ => {
                let span = Span::point(self.current().position);
                self.diagnostics
                    .push(Diagnostic::syntax("expected import path", span));
                None
            }
        }
    }

    fn take_generator_comment(&mut self) -> Option<GeneratorComment> {
        let token = self.advance();
        let text = token.literal.strip_prefix("--")?.trim().to_string();
        Some(GeneratorComment {
            text,
            span: Span::point(token.position),
        })
    }

    // --- Diagnostics and recovery ---

    fn span_from(&self, start: Position) -> Span {
        Span { start, end: self.current().position }
    }

    fn expected(&mut self, what: &str, start: Position) {
        self.diagnostics.push(Diagnostic::syntax(
            format!("expected {}, found '{}'", what, self.current().literal),
            Span { start, end: self.current().position },
        ));
    }

    /// Record one diagnostic and skip exactly one token, resuming at the
    /// enclosing construct.
    fn unexpected(&mut self, context: &str) {
        let token = self.current().clone();
        let kind = if token.kind == TokenKind::Illegal {
            DiagnosticKind::Lexical
        } else {
            DiagnosticKind::Syntactic
        };
        let noun = if token.kind == TokenKind::Illegal { "illegal character" } else { "unexpected token" };
        self.diagnostics.push(Diagnostic::new(
            kind,
            format!("{} '{}' {}", noun, token.literal, context),
            Span::point(token.position),
        ));
        self.advance();
    }

    fn recover_to_semicolon(&mut self) {
        while !self.at_eof() && !self.at(TokenKind::Semicolon) && !self.at(TokenKind::RBrace) {
            self.advance();
        }
        self.eat(TokenKind::Semicolon);
    }

    fn recover_to_lbrace_or_semicolon(&mut self) {
        while !self.at_eof()
            && !self.at(TokenKind::Semicolon)
            && !self.at(TokenKind::LBrace)
            && !self.at(TokenKind::RBrace)
        {
            self.advance();
        }
        self.eat(TokenKind::Semicolon);
    }
}

/// A style value goes through the expression sub-parser when it contains an
/// operator or is a call; plain literal runs stay raw text.
fn style_value_is_expression(tokens: &[Token]) -> bool {
    if tokens.len() >= 2 && tokens[0].kind == TokenKind::Ident && tokens[1].kind == TokenKind::LParen
    {
        return true;
    }
    tokens.iter().any(|t| {
        t.kind.is_expression_operator()
            || matches!(
                t.kind,
                TokenKind::AndAnd | TokenKind::OrOr | TokenKind::Le | TokenKind::Ge
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::tokenize;

    fn parse_ok(source: &str) -> Program {
        let (program, diagnostics) = parse(source);
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);
        program
    }

    fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
        let mut builder = TreeBuilder::new(tokenize(source), source);
        let program = builder.parse_program();
        (program, builder.into_diagnostics())
    }

    fn first_element(program: &Program) -> &Element {
        program
            .body
            .iter()
            .find_map(|item| match item {
                BodyItem::Element(el) => Some(el),
                _ => None,
            })
            .expect("program has no elements")
    }

    #[test]
    fn test_element_with_attributes_and_text() {
        let program = parse_ok("div { id: main; class: \"hero\"; text { \"Hello\" } }");
        let element = first_element(&program);
        assert_eq!(element.tag, "div");
        assert_eq!(element.attributes.len(), 2);
        assert_eq!(element.attributes[0].name, "id");
        assert_eq!(element.attributes[0].value, AttrValue::Bare("main".into()));
        assert_eq!(element.attributes[1].value, AttrValue::Literal("hero".into()));
        assert_eq!(element.text.as_ref().unwrap().content, "Hello");
    }

    #[test]
    fn test_attribute_last_write_wins_keeps_first_slot() {
        let program = parse_ok("div { id: one; class: c; id: two; }");
        let element = first_element(&program);
        assert_eq!(element.attributes.len(), 2);
        assert_eq!(element.attributes[0].name, "id");
        assert_eq!(element.attributes[0].value, AttrValue::Bare("two".into()));
        assert_eq!(element.attributes[1].name, "class");
    }

    #[test]
    fn test_bare_flag_attribute() {
        let program = parse_ok("input { disabled; type: checkbox; }");
        let element = first_element(&program);
        assert_eq!(element.attributes[0].name, "disabled");
        assert_eq!(element.attributes[0].value, AttrValue::Flag);
    }

    #[test]
    fn test_nested_children() {
        let program = parse_ok("div { span { text { \"a\" } } p { } }");
        let element = first_element(&program);
        assert_eq!(element.child_elements().count(), 2);
    }

    #[test]
    fn test_style_block_properties_and_selectors() {
        let program = parse_ok(
            "div { style { width: 100%; .container { margin: 0 auto; } #app { color: red; } &:hover { color: blue; } } }",
        );
        let style = first_element(&program).style.as_ref().unwrap();
        assert!(style.is_inline && style.is_local);
        assert_eq!(style.properties.len(), 1);
        assert_eq!(style.properties[0].name, "width");
        assert_eq!(style.selectors.len(), 3);
        assert_eq!(style.selectors[0].kind, SelectorKind::Class);
        assert_eq!(style.selectors[0].text, ".container");
        assert_eq!(style.selectors[1].kind, SelectorKind::Id);
        assert_eq!(style.selectors[1].text, "#app");
        assert_eq!(style.selectors[2].kind, SelectorKind::Context);
        assert_eq!(style.selectors[2].text, ":hover");
    }

    #[test]
    fn test_style_value_expression_vs_raw() {
        let program = parse_ok("div { style { width: 100px + 20em * 2; color: #f0f0f0; } }");
        let style = first_element(&program).style.as_ref().unwrap();
        assert!(matches!(style.properties[0].value, StyleValue::Expr(_)));
        assert_eq!(style.properties[1].value, StyleValue::Raw("#f0f0f0".into()));
    }

    #[test]
    fn test_script_block_raw_capture() {
        let program = parse_ok("div { script { let n = 0; if (n) { n += 1; } } }");
        let script = first_element(&program).script.as_ref().unwrap();
        assert_eq!(script.content, "let n = 0; if (n) { n += 1; }");
        assert!(script.is_local);
    }

    #[test]
    fn test_template_style_kind() {
        let program = parse_ok("Template @Style DefaultText { color: black; line-height: 1.6; }");
        let template = program.find_template("DefaultText").unwrap();
        assert_eq!(template.kind(), TemplateKind::Style);
        let TemplateContent::Style(props) = &template.content else { panic!("wrong kind") };
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_template_element_kind_with_inherit() {
        let program =
            parse_ok("Template @Element Card { inherit BaseCard; div { class: card; } }");
        let template = program.find_template("Card").unwrap();
        assert_eq!(template.kind(), TemplateKind::Element);
        assert_eq!(template.inherits, vec!["BaseCard"]);
    }

    #[test]
    fn test_template_var_kind() {
        let program = parse_ok("Template @Var Theme { primary: \"#336699\"; gap: 8px; }");
        let TemplateContent::Var(bindings) = &program.find_template("Theme").unwrap().content
        else {
            panic!("wrong kind")
        };
        assert_eq!(bindings[0].name, "primary");
        assert_eq!(bindings[0].value, "#336699");
        assert_eq!(bindings[1].value, "8px");
    }

    #[test]
    fn test_custom_with_specializations_in_order() {
        let program = parse_ok(
            "Custom @Element Panel { div { class: panel; } delete border; insert after div { footer { } } title: \"x\"; }",
        );
        let custom = program.find_custom("Panel").unwrap();
        assert_eq!(custom.specializations.len(), 3);
        assert!(matches!(custom.specializations[0].op, SpecOp::Delete { .. }));
        assert!(matches!(
            custom.specializations[1].op,
            SpecOp::Insert { anchor: Anchor::After, .. }
        ));
        assert!(matches!(custom.specializations[2].op, SpecOp::SetAttribute { .. }));
    }

    #[test]
    fn test_namespace_nesting() {
        let program = parse_ok(
            "Namespace ui { Template @Style Button { color: white; } Namespace forms { Template @Style Input { padding: 4px; } } }",
        );
        let ns = &program.namespaces[0];
        assert_eq!(ns.name, "ui");
        assert_eq!(ns.templates.len(), 1);
        assert_eq!(ns.namespaces[0].name, "forms");
        assert_eq!(ns.namespaces[0].templates[0].name, "Input");
    }

    #[test]
    fn test_configuration_last_key_wins() {
        let program =
            parse_ok("Configuration { indexInitialCount = 1; indexInitialCount = 5; }");
        let options = &program.configurations[0].options;
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "5");
    }

    #[test]
    fn test_imports_and_use() {
        let program = parse_ok(
            "use html5; Import @Css from \"theme.css\"; Import @Js from \"app.js\" as app; div { }",
        );
        assert_eq!(program.use_decl.as_ref().unwrap().value, "html5");
        assert_eq!(program.imports.len(), 2);
        assert_eq!(program.imports[0].kind, ImportKind::Css);
        assert_eq!(program.imports[1].alias.as_deref(), Some("app"));
    }

    #[test]
    fn test_origin_block_and_reference() {
        let program = parse_ok(
            "Origin @Html banner { <b>raw</b> } div { Origin @Html banner; }",
        );
        assert_eq!(program.origins.len(), 1);
        assert_eq!(program.origins[0].content, "<b>raw</b>");
        let element = first_element(&program);
        assert!(matches!(element.children[0], ChildItem::OriginRef { .. }));
    }

    #[test]
    fn test_except_constraint() {
        let program = parse_ok("except marquee; div { }");
        assert_eq!(program.constraints[0].name, "marquee");
    }

    #[test]
    fn test_errors_accumulate_without_aborting() {
        let (program, diagnostics) = parse("div { = ; = ; = ; id: main; }");
        // Three malformed lines, three diagnostics, parsing continues
        assert_eq!(diagnostics.len(), 3);
        let element = first_element(&program);
        assert_eq!(element.attribute("id").unwrap().value, AttrValue::Bare("main".into()));
    }

    #[test]
    fn test_illegal_character_is_lexical_diagnostic() {
        let (_, diagnostics) = parse("div { ~ }");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Lexical);
    }

    #[test]
    fn test_generator_comment_nodes() {
        let program = parse_ok("-- page header\ndiv { -- inner note\n }");
        assert!(matches!(&program.body[0], BodyItem::Comment(c) if c.text == "page header"));
        let element = first_element(&program);
        assert!(matches!(&element.children[0], ChildItem::Comment(c) if c.text == "inner note"));
    }

    #[test]
    fn test_descendant_selector() {
        let program = parse_ok("div { style { .list .item { color: red; } } }");
        let style = first_element(&program).style.as_ref().unwrap();
        assert_eq!(style.selectors[0].kind, SelectorKind::Descendant);
        assert_eq!(style.selectors[0].text, ".list .item");
    }
}
