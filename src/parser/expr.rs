//! Precedence-climbing sub-parser for arithmetic and conditional style-value
//! expressions. Operates over a pre-tokenized slice, not the live lexer.

use crate::ast::{BinaryOp, Expr, NumberLit, PrefixOp};
use crate::parser::tokenizer::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Conditional,
    Logical,
    Comparison,
    Sum,
    Product,
}

fn binary_op(kind: TokenKind) -> Option<(BinaryOp, Precedence)> {
    let pair = match kind {
        TokenKind::AndAnd => (BinaryOp::And, Precedence::Logical),
        TokenKind::OrOr => (BinaryOp::Or, Precedence::Logical),
        TokenKind::Lt => (BinaryOp::Lt, Precedence::Comparison),
        TokenKind::Gt => (BinaryOp::Gt, Precedence::Comparison),
        TokenKind::Le => (BinaryOp::Le, Precedence::Comparison),
        TokenKind::Ge => (BinaryOp::Ge, Precedence::Comparison),
        TokenKind::Eq => (BinaryOp::Eq, Precedence::Comparison),
        TokenKind::NotEq => (BinaryOp::NotEq, Precedence::Comparison),
        TokenKind::Plus => (BinaryOp::Add, Precedence::Sum),
        TokenKind::Minus => (BinaryOp::Sub, Precedence::Sum),
        TokenKind::Star => (BinaryOp::Mul, Precedence::Product),
        TokenKind::Slash => (BinaryOp::Div, Precedence::Product),
        _ => return None,
    };
    Some(pair)
}

/// Parse a token slice into an expression. An empty slice yields `None`,
/// which callers treat as "use the raw text fallback", never as an error.
pub fn parse_expression(tokens: &[Token]) -> Option<Expr> {
    let mut parser = ExprParser { tokens, pos: 0 };
    parser.parse(Precedence::Lowest)
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).filter(|t| t.kind != TokenKind::Eof)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos)?.clone();
        if token.kind == TokenKind::Eof {
            return None;
        }
        self.pos += 1;
        Some(token)
    }

    fn parse(&mut self, min: Precedence) -> Option<Expr> {
        let mut left = self.parse_prefix()?;

        while let Some(token) = self.current() {
            if token.kind == TokenKind::Question && min <= Precedence::Conditional {
                self.pos += 1;
                left = self.parse_conditional_tail(left)?;
                continue;
            }

            let Some((op, precedence)) = binary_op(token.kind) else {
                break;
            };
            if precedence <= min {
                break;
            }
            self.pos += 1;
            let right = self.parse(precedence)?;
            left = Expr::Infix { op, lhs: Box::new(left), rhs: Box::new(right) };
        }

        Some(left)
    }

    /// `? then : else` after an already-parsed condition. A missing `:`
    /// alternative is accepted; evaluation falls back to the raw condition
    /// text in that case.
    fn parse_conditional_tail(&mut self, condition: Expr) -> Option<Expr> {
        let then_value = self.parse(Precedence::Conditional)?;
        let else_value = if self.current().is_some_and(|t| t.kind == TokenKind::Colon) {
            self.pos += 1;
            Some(Box::new(self.parse(Precedence::Lowest)?))
        } else {
            None
        };
        Some(Expr::Conditional {
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value,
        })
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Number => {
                let lit = NumberLit::parse(&token.literal)
                    .unwrap_or(NumberLit { value: 0.0, unit: String::new() });
                Some(Expr::Number(lit))
            }
            TokenKind::Str => Some(Expr::Str(token.literal)),
            // Color literals ride through expressions as plain identifiers
            TokenKind::HashName => Some(Expr::Ident(token.literal)),
            TokenKind::Ident | TokenKind::Keyword(_) => {
                if self.current().is_some_and(|t| t.kind == TokenKind::LParen) {
                    self.parse_call(token.literal)
                } else {
                    Some(Expr::Ident(token.literal))
                }
            }
            TokenKind::Minus => {
                let rhs = self.parse_prefix()?;
                Some(Expr::Prefix { op: PrefixOp::Neg, rhs: Box::new(rhs) })
            }
            TokenKind::Bang => {
                let rhs = self.parse_prefix()?;
                Some(Expr::Prefix { op: PrefixOp::Not, rhs: Box::new(rhs) })
            }
            TokenKind::LParen => {
                let inner = self.parse(Precedence::Lowest)?;
                if self.current().is_some_and(|t| t.kind == TokenKind::RParen) {
                    self.pos += 1;
                }
                Some(inner)
            }
            _ => None,
        }
    }

    /// Call expressions bind tightest: `ThemeColor(primary)`.
    fn parse_call(&mut self, callee: String) -> Option<Expr> {
        self.pos += 1; // '('
        let mut args = Vec::new();
        loop {
            match self.current().map(|t| t.kind) {
                None => break,
                Some(TokenKind::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::Comma) => {
                    self.pos += 1;
                }
                Some(_) => {
                    args.push(self.parse(Precedence::Lowest)?);
                }
            }
        }
        Some(Expr::Call { callee, args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tokenizer::tokenize;

    fn parse(source: &str) -> Option<Expr> {
        parse_expression(&tokenize(source))
    }

    #[test]
    fn test_empty_slice_is_none_not_error() {
        assert_eq!(parse_expression(&[]), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let expr = parse("100px + 20em * 2").unwrap();
        let Expr::Infix { op: BinaryOp::Add, lhs, rhs } = expr else {
            panic!("expected addition at the root");
        };
        assert_eq!(*lhs, Expr::Number(NumberLit { value: 100.0, unit: "px".into() }));
        assert!(matches!(*rhs, Expr::Infix { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn test_parenthesized_grouping() {
        let expr = parse("(1 + 2) * 3").unwrap();
        let Expr::Infix { op: BinaryOp::Mul, lhs, .. } = expr else {
            panic!("expected multiplication at the root");
        };
        assert!(matches!(*lhs, Expr::Infix { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_conditional_with_comparison() {
        let expr = parse("width > 100px ? 10px : 20px").unwrap();
        let Expr::Conditional { condition, else_value, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*condition, Expr::Infix { op: BinaryOp::Gt, .. }));
        assert!(else_value.is_some());
    }

    #[test]
    fn test_conditional_missing_alternative() {
        let expr = parse("big ? 10px").unwrap();
        let Expr::Conditional { else_value, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(else_value.is_none());
    }

    #[test]
    fn test_chained_conditionals_are_right_associative() {
        let expr = parse("a > 1 ? x : b > 2 ? y : z").unwrap();
        let Expr::Conditional { else_value, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*else_value.unwrap(), Expr::Conditional { .. }));
    }

    #[test]
    fn test_call_expression() {
        let expr = parse("ThemeColor(primary)").unwrap();
        let Expr::Call { callee, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(callee, "ThemeColor");
        assert_eq!(args, vec![Expr::Ident("primary".into())]);
    }

    #[test]
    fn test_prefix_minus() {
        let expr = parse("-4px + 2px").unwrap();
        let Expr::Infix { lhs, .. } = expr else { panic!("expected infix") };
        assert!(matches!(*lhs, Expr::Prefix { op: PrefixOp::Neg, .. }));
    }

    #[test]
    fn test_logical_chain_binds_below_comparison() {
        let expr = parse("a > 1 && b < 2").unwrap();
        let Expr::Infix { op: BinaryOp::And, lhs, rhs } = expr else {
            panic!("expected logical chain at the root");
        };
        assert!(matches!(*lhs, Expr::Infix { op: BinaryOp::Gt, .. }));
        assert!(matches!(*rhs, Expr::Infix { op: BinaryOp::Lt, .. }));
    }
}
