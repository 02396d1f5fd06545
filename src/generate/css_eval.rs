//! Style-value expression evaluation.
//!
//! Arithmetic stays symbolic and is wrapped as CSS `calc(...)` with
//! precedence made explicit by parentheses; conditionals are decided at
//! generation time and only the chosen branch is emitted; var-template
//! calls are substituted through a resolver.

use crate::ast::{BinaryOp, Expr, NumberLit, PrefixOp, StyleValue};

/// Resolves `Name(key)` var-template usages to their bound value.
pub trait VarResolver {
    fn resolve_var(&self, callee: &str, key: &str) -> Option<String>;
}

/// Resolver with no var templates in scope.
pub struct NoVars;

impl VarResolver for NoVars {
    fn resolve_var(&self, _callee: &str, _key: &str) -> Option<String> {
        None
    }
}

/// Evaluate a property value to its final CSS text.
///
/// `Err` carries the message for an unresolved var-template reference,
/// which is a hard generation error for the caller.
pub fn evaluate_property(value: &StyleValue, resolver: &dyn VarResolver) -> Result<String, String> {
    match value {
        StyleValue::Raw(text) => Ok(text.clone()),
        StyleValue::Expr(expr) => evaluate(expr, resolver),
    }
}

fn evaluate(expr: &Expr, resolver: &dyn VarResolver) -> Result<String, String> {
    match expr {
        Expr::Number(lit) => Ok(lit.to_string()),
        Expr::Str(text) | Expr::Ident(text) => Ok(text.clone()),
        Expr::Prefix { op: PrefixOp::Neg, rhs } => Ok(format!("-{}", evaluate(rhs, resolver)?)),
        Expr::Prefix { op: PrefixOp::Not, rhs } => Ok(format!("!{}", evaluate(rhs, resolver)?)),
        Expr::Infix { op, .. } if op.is_arithmetic() => {
            Ok(format!("calc({})", render(expr, resolver)?))
        }
        Expr::Infix { .. } => render(expr, resolver),
        Expr::Conditional { condition, then_value, else_value } => {
            if eval_condition(condition, resolver) {
                evaluate(then_value, resolver)
            } else {
                match else_value {
                    Some(alternative) => evaluate(alternative, resolver),
                    // Documented permissive fallback: a conditional missing
                    // its alternative emits the raw condition text.
                    None => render(condition, resolver),
                }
            }
        }
        Expr::Call { callee, args } => resolve_call(callee, args, resolver),
    }
}

fn resolve_call(callee: &str, args: &[Expr], resolver: &dyn VarResolver) -> Result<String, String> {
    let key = match args.first() {
        Some(Expr::Ident(name)) | Some(Expr::Str(name)) => name.clone(),
        Some(other) => render(other, resolver)?,
        None => String::new(),
    };
    resolver
        .resolve_var(callee, &key)
        .ok_or_else(|| format!("unresolved var template reference '{}({})'", callee, key))
}

/// Decide a conditional: numeric comparison when both operands evaluate to
/// numbers, otherwise string truthiness of a literal `true`/`false` marker.
fn eval_condition(condition: &Expr, resolver: &dyn VarResolver) -> bool {
    match condition {
        Expr::Infix { op, lhs, rhs } => match op {
            BinaryOp::And => eval_condition(lhs, resolver) && eval_condition(rhs, resolver),
            BinaryOp::Or => eval_condition(lhs, resolver) || eval_condition(rhs, resolver),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq
            | BinaryOp::NotEq => {
                match (eval_number(lhs), eval_number(rhs)) {
                    (Some(a), Some(b)) if units_comparable(&a, &b) => match op {
                        BinaryOp::Lt => a.value < b.value,
                        BinaryOp::Gt => a.value > b.value,
                        BinaryOp::Le => a.value <= b.value,
                        BinaryOp::Ge => a.value >= b.value,
                        BinaryOp::Eq => a.value == b.value,
                        BinaryOp::NotEq => a.value != b.value,
                        _ => false,
                    },
                    _ => truthy_marker(condition, resolver),
                }
            }
            _ => truthy_marker(condition, resolver),
        },
        Expr::Prefix { op: PrefixOp::Not, rhs } => !eval_condition(rhs, resolver),
        _ => truthy_marker(condition, resolver),
    }
}

fn truthy_marker(condition: &Expr, resolver: &dyn VarResolver) -> bool {
    render(condition, resolver).map(|text| text == "true").unwrap_or(false)
}

fn units_comparable(a: &NumberLit, b: &NumberLit) -> bool {
    a.unit == b.unit || a.unit.is_empty() || b.unit.is_empty()
}

/// Constant-fold an expression to a number where possible; unit rules
/// follow CSS: add/sub need matching units, mul needs one unitless
/// operand, div needs a unitless non-zero divisor.
fn eval_number(expr: &Expr) -> Option<NumberLit> {
    match expr {
        Expr::Number(lit) => Some(lit.clone()),
        Expr::Prefix { op: PrefixOp::Neg, rhs } => {
            let lit = eval_number(rhs)?;
            Some(NumberLit { value: -lit.value, unit: lit.unit })
        }
        Expr::Infix { op, lhs, rhs } if op.is_arithmetic() => {
            let a = eval_number(lhs)?;
            let b = eval_number(rhs)?;
            match op {
                BinaryOp::Add | BinaryOp::Sub => {
                    if !units_comparable(&a, &b) {
                        return None;
                    }
                    let unit = if a.unit.is_empty() { b.unit } else { a.unit };
                    let value = if *op == BinaryOp::Add { a.value + b.value } else { a.value - b.value };
                    Some(NumberLit { value, unit })
                }
                BinaryOp::Mul => {
                    if !a.unit.is_empty() && !b.unit.is_empty() {
                        return None;
                    }
                    let unit = if a.unit.is_empty() { b.unit } else { a.unit };
                    Some(NumberLit { value: a.value * b.value, unit })
                }
                BinaryOp::Div => {
                    if !b.unit.is_empty() || b.value == 0.0 {
                        return None;
                    }
                    Some(NumberLit { value: a.value / b.value, unit: a.unit })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Symbolic rendering; nested infix operands get parentheses so operator
/// precedence survives into `calc()`.
fn render(expr: &Expr, resolver: &dyn VarResolver) -> Result<String, String> {
    match expr {
        Expr::Number(lit) => Ok(lit.to_string()),
        Expr::Str(text) | Expr::Ident(text) => Ok(text.clone()),
        Expr::Prefix { op, rhs } => {
            let sigil = match op {
                PrefixOp::Neg => "-",
                PrefixOp::Not => "!",
            };
            Ok(format!("{}{}", sigil, render_operand(rhs, resolver)?))
        }
        Expr::Infix { op, lhs, rhs } => Ok(format!(
            "{} {} {}",
            render_operand(lhs, resolver)?,
            op.as_str(),
            render_operand(rhs, resolver)?
        )),
        Expr::Conditional { condition, then_value, else_value } => {
            let mut text = format!(
                "{} ? {}",
                render(condition, resolver)?,
                render(then_value, resolver)?
            );
            if let Some(alternative) = else_value {
                text.push_str(&format!(" : {}", render(alternative, resolver)?));
            }
            Ok(text)
        }
        Expr::Call { callee, args } => resolve_call(callee, args, resolver),
    }
}

fn render_operand(expr: &Expr, resolver: &dyn VarResolver) -> Result<String, String> {
    match expr {
        Expr::Infix { .. } => Ok(format!("({})", render(expr, resolver)?)),
        _ => render(expr, resolver),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::expr::parse_expression;
    use crate::parser::tokenize;

    fn eval(source: &str) -> Result<String, String> {
        let expr = parse_expression(&tokenize(source)).expect("expression parses");
        evaluate(&expr, &NoVars)
    }

    #[test]
    fn test_arithmetic_becomes_calc_with_precedence_parens() {
        assert_eq!(eval("100px + 20em * 2").unwrap(), "calc(100px + (20em * 2))");
    }

    #[test]
    fn test_plain_number_passes_through() {
        assert_eq!(eval("100px").unwrap(), "100px");
        assert_eq!(eval("1.5em").unwrap(), "1.5em");
    }

    #[test]
    fn test_conditional_numeric_comparison() {
        assert_eq!(eval("200px > 100px ? 10px : 20px").unwrap(), "10px");
        assert_eq!(eval("50px > 100px ? 10px : 20px").unwrap(), "20px");
    }

    #[test]
    fn test_conditional_truthiness_marker() {
        assert_eq!(eval("true ? bold : normal").unwrap(), "bold");
        assert_eq!(eval("false ? bold : normal").unwrap(), "normal");
    }

    #[test]
    fn test_missing_alternative_falls_back_to_condition_text() {
        assert_eq!(eval("false ? bold").unwrap(), "false");
        assert_eq!(eval("10 > 20 ? bold").unwrap(), "10 > 20");
    }

    #[test]
    fn test_chained_conditions() {
        assert_eq!(eval("10 > 5 && 1 < 2 ? yes : no").unwrap(), "yes");
        assert_eq!(eval("10 > 5 && 3 < 2 ? yes : no").unwrap(), "no");
    }

    #[test]
    fn test_chosen_branch_is_evaluated_recursively() {
        assert_eq!(eval("true ? 10px + 2px : 0").unwrap(), "calc(10px + 2px)");
    }

    #[test]
    fn test_unresolved_var_call_is_an_error() {
        assert!(eval("ThemeColor(primary)").is_err());
    }

    #[test]
    fn test_var_call_resolves_through_resolver() {
        struct OneVar;
        impl VarResolver for OneVar {
            fn resolve_var(&self, callee: &str, key: &str) -> Option<String> {
                (callee == "Theme" && key == "primary").then(|| "#336699".to_string())
            }
        }
        let expr = parse_expression(&tokenize("Theme(primary)")).unwrap();
        assert_eq!(evaluate(&expr, &OneVar).unwrap(), "#336699");
    }
}
