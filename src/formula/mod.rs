//! Formula compiler.
//!
//! Turns an arithmetic formula over result-field names (`+ - * /`,
//! parentheses, numeric literals, identifiers) into a post-aggregator
//! tree. The formula is parsed as a single SQL expression with
//! sqlparser's `GenericDialect`; anything beyond one bare expression is
//! rejected.
//!
//! ```
//! use strata::formula;
//! use strata::model::PostAggregator;
//!
//! let tree = formula::compile("revenue / visits").unwrap();
//! assert!(matches!(tree, PostAggregator::Arithmetic { .. }));
//! assert!(!formula::is_valid("revenue = 1"));
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sqlparser::ast::{BinaryOperator, Expr, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};
use thiserror::Error;

use crate::model::post_aggregator::{ArithmeticOp, PostAggregator};

/// Bare identifiers in a formula.
static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap());

/// Errors raised while compiling a formula.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    /// Not a single bare expression.
    #[error("Malformed formula `{formula}`: {message}")]
    Malformed { formula: String, message: String },

    /// A syntax node other than identifier, number or binary operator.
    #[error("Unsupported construct in formula `{formula}`: {node}")]
    UnsupportedNode { formula: String, node: String },
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Compile a formula into a post-aggregator expression tree.
pub fn compile(formula: &str) -> FormulaResult<PostAggregator> {
    let expr = parse_single_expression(formula)?;
    lower(&expr, formula)
}

/// Compile a formula into a single native `Expression` post-aggregator.
///
/// The tree is still built once so invalid formulas fail here rather than
/// in the datastore.
pub fn compile_native(formula: &str) -> FormulaResult<PostAggregator> {
    compile(formula)?;
    Ok(PostAggregator::expression(formula.trim()))
}

/// Whether `formula` compiles.
pub fn is_valid(formula: &str) -> bool {
    compile(formula).is_ok()
}

/// Identifiers referenced by a formula.
pub fn identifiers(formula: &str) -> BTreeSet<String> {
    IDENTIFIER_PATTERN
        .find_iter(formula)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Append `suffix` to every bare identifier in `formula`.
pub fn rename_identifiers(formula: &str, suffix: &str) -> String {
    rename_identifiers_with(formula, &|name| format!("{}{}", name, suffix))
}

/// Replace every bare identifier in `formula` with `rename(identifier)`.
pub fn rename_identifiers_with(formula: &str, rename: &dyn Fn(&str) -> String) -> String {
    IDENTIFIER_PATTERN
        .replace_all(formula, |caps: &Captures| rename(&caps[0]))
        .into_owned()
}

fn parse_single_expression(formula: &str) -> FormulaResult<Expr> {
    let malformed = |message: String| FormulaError::Malformed {
        formula: formula.to_string(),
        message,
    };

    if formula.trim().is_empty() {
        return Err(malformed("empty formula".to_string()));
    }

    let dialect = GenericDialect {};
    let tokens = Tokenizer::new(&dialect, formula)
        .tokenize()
        .map_err(|e| malformed(e.to_string()))?
        .into_iter()
        .map(as_field_name)
        .collect();
    let mut parser = Parser::new(&dialect).with_tokens(tokens);
    let expr = parser.parse_expr().map_err(|e| malformed(e.to_string()))?;

    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(malformed(format!(
            "expected a single expression, found trailing `{}`",
            next.token
        )));
    }

    // `a = b` parses as an equality but reads as an assignment
    if let Expr::BinaryOp {
        op: BinaryOperator::Eq,
        ..
    } = &expr
    {
        return Err(malformed("assignment is not an expression".to_string()));
    }

    Ok(expr)
}

/// Every bare word in a formula names a field, even when the SQL dialect
/// reserves it (`user`, `interval`).
fn as_field_name(token: Token) -> Token {
    match token {
        Token::Word(word) if word.quote_style.is_none() => Token::Word(Word {
            value: word.value,
            quote_style: Some('"'),
            keyword: Keyword::NoKeyword,
        }),
        other => other,
    }
}

fn lower(expr: &Expr, formula: &str) -> FormulaResult<PostAggregator> {
    let unsupported = |node: String| FormulaError::UnsupportedNode {
        formula: formula.to_string(),
        node,
    };

    match expr {
        Expr::Identifier(ident) => Ok(PostAggregator::field_access(ident.value.clone())),
        Expr::Value(Value::Number(literal, _)) => literal
            .parse::<f64>()
            .map(PostAggregator::constant)
            .map_err(|e| FormulaError::Malformed {
                formula: formula.to_string(),
                message: format!("invalid number `{}`: {}", literal, e),
            }),
        Expr::Nested(inner) => lower(inner, formula),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                BinaryOperator::Plus => ArithmeticOp::Add,
                BinaryOperator::Minus => ArithmeticOp::Subtract,
                BinaryOperator::Multiply => ArithmeticOp::Multiply,
                BinaryOperator::Divide => ArithmeticOp::Divide,
                other => return Err(unsupported(format!("operator `{}`", other))),
            };
            Ok(PostAggregator::arithmetic(
                op,
                lower(left, formula)?,
                lower(right, formula)?,
            ))
        }
        other => Err(unsupported(format!("`{}`", other))),
    }
}
