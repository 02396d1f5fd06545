use crate::parser::tokenizer::Span;

/// Root of a parsed compilation unit. Owns every node below it; the whole
/// tree is dropped with the unit.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Top-level elements, generator comments and anonymous origins in
    /// document order.
    pub body: Vec<BodyItem>,
    pub imports: Vec<ImportNode>,
    pub templates: Vec<Template>,
    pub customs: Vec<Custom>,
    pub namespaces: Vec<Namespace>,
    /// Named origins, referenced from element position by name.
    pub origins: Vec<OriginNode>,
    /// At most one `use` declaration per unit.
    pub use_decl: Option<UseDecl>,
    pub configurations: Vec<Configuration>,
    pub constraints: Vec<ExceptConstraint>,
}

impl Program {
    /// Late-bound template lookup; resolution happens at generation time,
    /// never at parse time.
    pub fn find_template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn find_custom(&self, name: &str) -> Option<&Custom> {
        self.customs.iter().find(|c| c.name == name)
    }

    pub fn find_origin(&self, name: &str) -> Option<&OriginNode> {
        self.origins.iter().find(|o| o.name.as_deref() == Some(name))
    }
}

#[derive(Debug, Clone)]
pub enum BodyItem {
    Element(Element),
    Comment(GeneratorComment),
    Origin(OriginNode),
}

/// `-- text` comment, preserved into the generated HTML.
#[derive(Debug, Clone)]
pub struct GeneratorComment {
    pub text: String,
    pub span: Span,
}

/// A markup element: `div { id: main; text { "hi" } span { ... } }`
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    /// Attribute set keyed by name; insertion keeps declaration order and
    /// a later write to the same name replaces the value in place.
    pub attributes: Vec<Attribute>,
    pub text: Option<TextNode>,
    pub style: Option<StyleNode>,
    pub script: Option<ScriptNode>,
    pub children: Vec<ChildItem>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ChildItem {
    Element(Element),
    Comment(GeneratorComment),
    /// Named origin reference in element position: `Origin @Html name;`
    OriginRef { name: String, span: Span },
}

impl Element {
    pub fn new(tag: impl Into<String>, span: Span) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            text: None,
            style: None,
            script: None,
            children: Vec::new(),
            span,
        }
    }

    /// Last write wins per attribute name; first declaration keeps its slot
    /// so emission order stays the declaration order.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            existing.value = attribute.value;
            existing.span = attribute.span;
        } else {
            self.attributes.push(attribute);
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            ChildItem::Element(el) => Some(el),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Quoted string value: `id: "main";`
    Literal(String),
    /// Unquoted identifier/number/color value: `id: main;`
    Bare(String),
    /// Valueless boolean-style attribute: `disabled;`
    Flag,
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Literal(s) | AttrValue::Bare(s) => Some(s),
            AttrValue::Flag => None,
        }
    }
}

/// `text { ... }` content of an element.
#[derive(Debug, Clone)]
pub struct TextNode {
    pub content: String,
    pub span: Span,
}

/// A style block. Direct properties of an element-level block render as the
/// element's inline `style` attribute; selector groups render as scoped CSS.
#[derive(Debug, Clone)]
pub struct StyleNode {
    /// Direct properties become the owning element's inline style.
    pub is_inline: bool,
    /// Scoped to the owning element vs. page-global.
    pub is_local: bool,
    pub properties: Vec<StyleProperty>,
    pub selectors: Vec<StyleSelector>,
    /// `@Style name;` references, resolved by name at generation time.
    pub template_refs: Vec<TemplateRef>,
    pub span: Span,
}

impl StyleNode {
    pub fn new(is_inline: bool, is_local: bool, span: Span) -> Self {
        Self {
            is_inline,
            is_local,
            properties: Vec::new(),
            selectors: Vec::new(),
            template_refs: Vec::new(),
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRef {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Class,
    Id,
    PseudoClass,
    PseudoElement,
    BareElement,
    Descendant,
    /// `&`-prefixed context selector, resolved against the owning element
    /// at generation time (`&:hover` on a div becomes `div:hover`).
    Context,
}

#[derive(Debug, Clone)]
pub struct StyleSelector {
    /// Selector text as written, including its sigil (`.box`, `#app`,
    /// `:hover`); context selectors store only the suffix (`:hover`).
    pub text: String,
    pub kind: SelectorKind,
    pub properties: Vec<StyleProperty>,
    pub template_refs: Vec<TemplateRef>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StyleProperty {
    pub name: String,
    pub value: StyleValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StyleValue {
    /// Verbatim value text (no operators involved).
    Raw(String),
    /// Arithmetic/conditional expression, evaluated by the generator.
    Expr(Expr),
}

/// `script { ... }` content. Selector/function sub-lists stay empty until
/// the enhanced-script pipeline has run over the content.
#[derive(Debug, Clone)]
pub struct ScriptNode {
    pub content: String,
    pub is_local: bool,
    pub is_enhanced: bool,
    /// `{{...}}` selector texts, in encounter order.
    pub selectors: Vec<String>,
    /// Helper-call keywords used by the content, in encounter order.
    pub functions: Vec<String>,
    pub span: Span,
}

// --- Templates and customs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Style,
    Element,
    Var,
}

impl TemplateKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "Style" => Some(TemplateKind::Style),
            "Element" => Some(TemplateKind::Element),
            "Var" => Some(TemplateKind::Var),
            _ => None,
        }
    }
}

/// Content list of a template/custom, typed per declared kind.
#[derive(Debug, Clone)]
pub enum TemplateContent {
    Style(Vec<StyleProperty>),
    Element(Vec<Element>),
    Var(Vec<VarBinding>),
}

impl TemplateContent {
    pub fn kind(&self) -> TemplateKind {
        match self {
            TemplateContent::Style(_) => TemplateKind::Style,
            TemplateContent::Element(_) => TemplateKind::Element,
            TemplateContent::Var(_) => TemplateKind::Var,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarBinding {
    pub name: String,
    pub value: String,
    pub span: Span,
}

/// Named, reusable fragment resolved by name lookup at generation time.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub content: TemplateContent,
    pub inherits: Vec<String>,
    pub exports: Vec<String>,
    pub span: Span,
}

impl Template {
    pub fn kind(&self) -> TemplateKind {
        self.content.kind()
    }
}

/// Template variant supporting declarative specialization of its base
/// content.
#[derive(Debug, Clone)]
pub struct Custom {
    pub name: String,
    pub content: TemplateContent,
    pub inherits: Vec<String>,
    pub exports: Vec<String>,
    /// Applied in declaration order; later operations on the same target
    /// override earlier ones.
    pub specializations: Vec<Specialization>,
    pub span: Span,
}

impl Custom {
    pub fn kind(&self) -> TemplateKind {
        self.content.kind()
    }
}

#[derive(Debug, Clone)]
pub struct Specialization {
    pub op: SpecOp,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum SpecOp {
    /// Target kind is resolved at application time: an inherited template
    /// name deletes the inherit, a child tag deletes the element, anything
    /// else deletes the attribute.
    Delete { target: String },
    Insert { anchor: Anchor, target: Option<String>, elements: Vec<Element> },
    AddStyle { properties: Vec<StyleProperty> },
    /// Adds or overrides an attribute on the custom's root content.
    SetAttribute { name: String, value: AttrValue },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Before,
    After,
    Top,
    Bottom,
    Replace,
}

// --- Namespaces, configuration, imports ---

/// Namespaces own their children exclusively; resolution walks an explicit
/// stack from the innermost namespace outward, so no parent pointer is
/// stored.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub namespaces: Vec<Namespace>,
    pub templates: Vec<Template>,
    pub customs: Vec<Custom>,
    pub imports: Vec<ImportNode>,
    pub exports: Vec<String>,
    pub span: Span,
}

/// Flat key/value option block; later keys overwrite earlier ones with the
/// same name inside one block.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub options: Vec<ConfigOption>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ConfigOption {
    pub name: String,
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Html,
    Css,
    Js,
    Chtl,
    Module,
}

impl ImportKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "Html" => Some(ImportKind::Html),
            "Css" | "Style" => Some(ImportKind::Css),
            "JavaScript" | "Js" => Some(ImportKind::Js),
            "Chtl" => Some(ImportKind::Chtl),
            "Module" | "CJmod" => Some(ImportKind::Module),
            _ => None,
        }
    }
}

/// Carries no owned content; the external import resolver supplies it.
#[derive(Debug, Clone)]
pub struct ImportNode {
    pub kind: ImportKind,
    pub path: String,
    pub target: Option<String>,
    pub alias: Option<String>,
    pub namespace: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginKind {
    Html,
    Style,
    JavaScript,
    Custom(String),
}

impl OriginKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "Html" => OriginKind::Html,
            "Style" => OriginKind::Style,
            "JavaScript" => OriginKind::JavaScript,
            other => OriginKind::Custom(other.to_string()),
        }
    }
}

/// Raw foreign text embedded verbatim into one of the output streams.
#[derive(Debug, Clone)]
pub struct OriginNode {
    pub kind: OriginKind,
    pub name: Option<String>,
    pub content: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UseDecl {
    pub value: String,
    pub span: Span,
}

/// `except name;` — bans the named tag/template inside this unit.
#[derive(Debug, Clone)]
pub struct ExceptConstraint {
    pub name: String,
    pub span: Span,
}

// --- Style-value expressions ---

/// Expression nodes produced by the style-value sub-parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Str(String),
    Number(NumberLit),
    Prefix { op: PrefixOp, rhs: Box<Expr> },
    Infix { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `cond ? then : else`; a missing alternative is permitted and falls
    /// back to the raw condition text at evaluation time.
    Conditional { condition: Box<Expr>, then_value: Box<Expr>, else_value: Option<Box<Expr>> },
    /// Var-template usage: `ThemeColor(primary)`.
    Call { callee: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberLit {
    pub value: f64,
    pub unit: String,
}

impl NumberLit {
    /// Split a lexed number literal into value and unit suffix.
    pub fn parse(literal: &str) -> Option<Self> {
        let split = literal
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
            .unwrap_or(literal.len());
        let (num, unit) = literal.split_at(split);
        num.parse::<f64>().ok().map(|value| Self { value, unit: unit.to_string() })
    }
}

impl std::fmt::Display for NumberLit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value == self.value.floor() && self.value.abs() < 1e15 {
            write!(f, "{}{}", self.value as i64, self.unit)
        } else {
            write!(f, "{}{}", self.value, self.unit)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }
}
