mod css_eval;
mod document;
mod output;

pub use css_eval::{NoVars, VarResolver, evaluate_property};
pub use document::Generator;
pub use output::Output;

use crate::ast::{Configuration, Program};
use crate::error::{CompileError, Diagnostic};
use log::warn;

/// Generator options collected from `Configuration` blocks, with their
/// documented defaults. Later blocks and later keys overwrite earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Suppress auto class-attribute injection from style selectors.
    pub disable_style_auto_add_class: bool,
    /// Suppress auto id-attribute injection from style selectors.
    pub disable_style_auto_add_id: bool,
    /// Suppress the implicit root namespace during name resolution.
    pub disable_default_namespace: bool,
    /// Disallow non-standard Origin block types.
    pub disable_custom_origin_type: bool,
    /// Suppress auto class injection from script-side selectors.
    pub disable_script_auto_add_class: bool,
    /// Suppress auto id injection from script-side selectors.
    pub disable_script_auto_add_id: bool,
    /// Starting index for auto-generated disambiguating suffixes.
    pub index_initial_count: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            disable_style_auto_add_class: false,
            disable_style_auto_add_id: false,
            disable_default_namespace: false,
            disable_custom_origin_type: false,
            disable_script_auto_add_class: true,
            disable_script_auto_add_id: true,
            index_initial_count: 0,
        }
    }
}

impl CompilerConfig {
    pub fn from_configurations(blocks: &[Configuration]) -> Self {
        let mut config = Self::default();
        for block in blocks {
            for option in &block.options {
                match option.name.as_str() {
                    "disableStyleAutoAddClass" => {
                        config.disable_style_auto_add_class = parse_bool(&option.value)
                    }
                    "disableStyleAutoAddID" => {
                        config.disable_style_auto_add_id = parse_bool(&option.value)
                    }
                    "disableDefaultNamespace" => {
                        config.disable_default_namespace = parse_bool(&option.value)
                    }
                    "disableCustomOriginType" => {
                        config.disable_custom_origin_type = parse_bool(&option.value)
                    }
                    "disableScriptAutoAddClass" => {
                        config.disable_script_auto_add_class = parse_bool(&option.value)
                    }
                    "disableScriptAutoAddID" => {
                        config.disable_script_auto_add_id = parse_bool(&option.value)
                    }
                    "indexInitialCount" => {
                        config.index_initial_count = option.value.parse().unwrap_or(0)
                    }
                    other => warn!("ignoring unknown configuration option '{}'", other),
                }
            }
        }
        config
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes" | "on")
}

/// Generation result: the three output streams plus non-fatal diagnostics
/// (fatal problems arrive as `CompileError` instead).
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerateResult {
    pub html: String,
    pub css: String,
    pub js: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Lower a parsed program to HTML, CSS and JavaScript. Deterministic for a
/// given AST: emission follows declaration order everywhere.
pub fn generate(program: &Program, config: &CompilerConfig) -> Result<GenerateResult, CompileError> {
    Generator::new(program, config.clone()).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert!(!config.disable_style_auto_add_class);
        assert!(!config.disable_style_auto_add_id);
        assert!(config.disable_script_auto_add_class);
        assert!(config.disable_script_auto_add_id);
        assert_eq!(config.index_initial_count, 0);
    }

    #[test]
    fn test_collects_from_configuration_blocks() {
        let (program, diagnostics) = parse(
            "Configuration { disableStyleAutoAddClass = true; indexInitialCount = 3; } div { }",
        );
        assert!(diagnostics.is_empty());
        let config = CompilerConfig::from_configurations(&program.configurations);
        assert!(config.disable_style_auto_add_class);
        assert_eq!(config.index_initial_count, 3);
    }

    #[test]
    fn test_later_block_overwrites_earlier() {
        let (program, _) = parse(
            "Configuration { indexInitialCount = 1; } Configuration { indexInitialCount = 9; }",
        );
        let config = CompilerConfig::from_configurations(&program.configurations);
        assert_eq!(config.index_initial_count, 9);
    }
}
