//! Condition source parser.
//!
//! Parses boolean condition strings into an [`Expr`] AST:
//! - Field access: `payload.text`, `payload.attachments.title`
//! - Literals: `42`, `"string"`, `'string'`, `true`, `false`, `null`,
//!   `["a", "b"]`
//! - Binary operators: `||`, `&&`, `==`, `!=`, `<`, `<=`, `>`, `>=`,
//!   `+`, `-`, `*`, `/`, `%`
//! - Keyword operators: `in`, `contains`, `starts_with`, `ends_with`,
//!   `matches`
//! - Unary operators: `!`, `-`
//! - Function calls: `any(..)`, `all(..)`, `size(..)`, `lower(..)`, `upper(..)`
//! - Parentheses for grouping
//!
//! # Design Decisions
//! - Operator splitting scans right-to-left at depth zero so left
//!   associativity falls out naturally
//! - String literal spans are masked up front; operators never match
//!   inside quotes

use thiserror::Error;

use crate::expr::value::Value;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted field path; the first segment is the variable name.
    Path(Vec<String>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "starts_with",
            BinaryOp::EndsWith => "ends_with",
            BinaryOp::Matches => "matches",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty condition")]
    Empty,
    #[error("cannot parse expression: {0}")]
    InvalidExpression(String),
    #[error("unterminated string literal in: {0}")]
    UnterminatedString(String),
    #[error("list literals may only contain literal values: {0}")]
    NonLiteralListElement(String),
}

/// Parse a condition string into an expression tree.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }
    parse_expression(input)
}

// Precedence levels, loosest binding first. Each level is split before
// recursing, so `a || b && c` parses as `a || (b && c)`.
const SYMBOL_LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::Ne),
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[
        ("*", BinaryOp::Mul),
        ("/", BinaryOp::Div),
        ("%", BinaryOp::Mod),
    ],
];

const KEYWORD_OPS: &[(&str, BinaryOp)] = &[
    ("in", BinaryOp::In),
    ("contains", BinaryOp::Contains),
    ("starts_with", BinaryOp::StartsWith),
    ("ends_with", BinaryOp::EndsWith),
    ("matches", BinaryOp::Matches),
];

fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    let mask = string_mask(input)?;

    // Logical operators bind loosest.
    for (index, level) in SYMBOL_LEVELS.iter().enumerate() {
        // Keyword operators sit between logical and comparison levels.
        if index == 2 {
            if let Some((left, op, right)) = split_keyword(input, &mask) {
                return binary(left, op, right);
            }
        }
        if let Some((left, op, right)) = split_symbol(input, &mask, level) {
            return binary(left, op, right);
        }
    }

    parse_primary(input)
}

fn binary(left: &str, op: BinaryOp, right: &str) -> Result<Expr, ParseError> {
    Ok(Expr::Binary {
        left: Box::new(parse_expression(left)?),
        op,
        right: Box::new(parse_expression(right)?),
    })
}

/// Split on the rightmost depth-zero symbolic operator of the given level.
fn split_symbol<'a>(
    input: &'a str,
    mask: &[bool],
    level: &[(&str, BinaryOp)],
) -> Option<(&'a str, BinaryOp, &'a str)> {
    let bytes = input.as_bytes();
    let mut depth: i32 = 0;

    for i in (0..bytes.len()).rev() {
        if mask[i] {
            continue;
        }
        match bytes[i] {
            b')' | b']' => depth += 1,
            b'(' | b'[' => depth -= 1,
            _ => {}
        }
        if depth != 0 {
            continue;
        }
        for &(symbol, op) in level {
            if !input[i..].starts_with(symbol) {
                continue;
            }
            // Not part of a longer operator (`<=` vs `<`, `!=` vs `!`).
            let before_ok = i == 0 || !is_operator_byte(bytes[i - 1]);
            let after = i + symbol.len();
            let after_ok = after >= bytes.len() || !is_operator_byte(bytes[after]);
            if !before_ok || !after_ok {
                continue;
            }
            let left = input[..i].trim();
            let right = input[after..].trim();
            // An empty left side means this is a unary prefix, not a split.
            if left.is_empty() || right.is_empty() {
                continue;
            }
            // `x < -5`: the `-` belongs to the literal, not the split.
            if matches!(op, BinaryOp::Add | BinaryOp::Sub)
                && input[..i]
                    .trim_end()
                    .as_bytes()
                    .last()
                    .is_some_and(|b| is_operator_byte(*b))
            {
                continue;
            }
            return Some((left, op, right));
        }
    }
    None
}

/// Split on the rightmost depth-zero keyword operator (word-bounded).
fn split_keyword<'a>(input: &'a str, mask: &[bool]) -> Option<(&'a str, BinaryOp, &'a str)> {
    let bytes = input.as_bytes();
    let mut depth: i32 = 0;

    for i in (0..bytes.len()).rev() {
        if mask[i] {
            continue;
        }
        match bytes[i] {
            b')' | b']' => depth += 1,
            b'(' | b'[' => depth -= 1,
            _ => {}
        }
        if depth != 0 {
            continue;
        }
        for &(word, op) in KEYWORD_OPS {
            if !input[i..].starts_with(word) {
                continue;
            }
            let after = i + word.len();
            let before_ok = i > 0 && bytes[i - 1].is_ascii_whitespace();
            let after_ok = after < bytes.len() && bytes[after].is_ascii_whitespace();
            if before_ok && after_ok {
                let left = input[..i].trim();
                let right = input[after..].trim();
                if !left.is_empty() && !right.is_empty() {
                    return Some((left, op, right));
                }
            }
        }
    }
    None
}

fn is_operator_byte(b: u8) -> bool {
    matches!(
        b,
        b'=' | b'!' | b'<' | b'>' | b'&' | b'|' | b'+' | b'-' | b'*' | b'/' | b'%'
    )
}

/// Mark which byte positions sit inside a string literal.
fn string_mask(input: &str) -> Result<Vec<bool>, ParseError> {
    let mut mask = vec![false; input.len()];
    let mut quote: Option<u8> = None;
    for (i, &b) in input.as_bytes().iter().enumerate() {
        match quote {
            Some(q) => {
                mask[i] = true;
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' {
                    mask[i] = true;
                    quote = Some(b);
                }
            }
        }
    }
    if quote.is_some() {
        return Err(ParseError::UnterminatedString(input.to_string()));
    }
    Ok(mask)
}

fn parse_primary(input: &str) -> Result<Expr, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::Empty);
    }

    if let Some(rest) = input.strip_prefix('!') {
        return Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(parse_primary(rest.trim())?),
        });
    }

    if let Some(rest) = input.strip_prefix('-') {
        let rest = rest.trim();
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(parse_primary(rest)?),
            });
        }
    }

    if input.starts_with('(') && input.ends_with(')') && balanced_wrap(input, b'(', b')') {
        return parse_expression(&input[1..input.len() - 1]);
    }

    if let Some(literal) = parse_string_literal(input) {
        return Ok(Expr::Literal(literal));
    }

    match input {
        "true" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" => return Ok(Expr::Literal(Value::Null)),
        _ => {}
    }

    if let Ok(num) = input.parse::<f64>() {
        return Ok(Expr::Literal(Value::Number(num)));
    }

    if input.starts_with('[') && input.ends_with(']') && balanced_wrap(input, b'[', b']') {
        return parse_list_literal(&input[1..input.len() - 1]);
    }

    // Function call: bare identifier followed by a parenthesized argument list.
    if let Some(open) = input.find('(') {
        let name = input[..open].trim();
        if input.ends_with(')') && is_identifier(name) {
            let args_src = &input[open + 1..input.len() - 1];
            return Ok(Expr::Call {
                name: name.to_string(),
                args: parse_args(args_src)?,
            });
        }
    }

    // Dotted field path or a single identifier.
    let segments: Vec<&str> = input.split('.').map(str::trim).collect();
    if !segments.is_empty() && segments.iter().all(|s| is_identifier(s)) {
        return Ok(Expr::Path(segments.iter().map(|s| s.to_string()).collect()));
    }

    Err(ParseError::InvalidExpression(input.to_string()))
}

/// True when the outermost pair of brackets wraps the whole input.
fn balanced_wrap(input: &str, open: u8, close: u8) -> bool {
    let Ok(mask) = string_mask(input) else {
        return false;
    };
    let bytes = input.as_bytes();
    let mut depth = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if mask[i] {
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 && i != bytes.len() - 1 {
                return false;
            }
        }
    }
    depth == 0
}

fn parse_string_literal(input: &str) -> Option<Value> {
    let bytes = input.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let quote = bytes[0];
    if (quote != b'"' && quote != b'\'') || bytes[bytes.len() - 1] != quote {
        return None;
    }
    let inner = &input[1..input.len() - 1];
    // A quote in the middle means this is not a single literal.
    if inner.bytes().any(|b| b == quote) {
        return None;
    }
    Some(Value::String(inner.to_string()))
}

fn parse_list_literal(content: &str) -> Result<Expr, ParseError> {
    let mut items = Vec::new();
    for element in split_top_level_commas(content)? {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        match parse_primary(element)? {
            Expr::Literal(value) => items.push(value),
            _ => return Err(ParseError::NonLiteralListElement(element.to_string())),
        }
    }
    Ok(Expr::Literal(Value::List(items)))
}

fn parse_args(content: &str) -> Result<Vec<Expr>, ParseError> {
    let mut args = Vec::new();
    for arg in split_top_level_commas(content)? {
        let arg = arg.trim();
        if arg.is_empty() {
            continue;
        }
        args.push(parse_expression(arg)?);
    }
    Ok(args)
}

fn split_top_level_commas(content: &str) -> Result<Vec<&str>, ParseError> {
    let mask = string_mask(content)?;
    let bytes = content.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if mask[i] {
            continue;
        }
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&content[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&content[start..]);
    Ok(parts)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("42").unwrap(), Expr::Literal(Value::Number(42.0)));
        assert_eq!(
            parse(r#""hello world""#).unwrap(),
            Expr::Literal(Value::String("hello world".to_string()))
        );
        assert_eq!(
            parse("'single'").unwrap(),
            Expr::Literal(Value::String("single".to_string()))
        );
        assert_eq!(parse("true").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Null));
    }

    #[test]
    fn test_parse_list_literal() {
        assert_eq!(
            parse(r#"["a", "b"]"#).unwrap(),
            Expr::Literal(Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn test_parse_field_path() {
        assert_eq!(
            parse("payload.attachments.title").unwrap(),
            Expr::Path(vec![
                "payload".to_string(),
                "attachments".to_string(),
                "title".to_string()
            ])
        );
        assert_eq!(parse("token").unwrap(), Expr::Path(vec!["token".to_string()]));
    }

    #[test]
    fn test_parse_keyword_operator() {
        let expr = parse(r#"payload.text contains "[service1]""#).unwrap();
        let Expr::Binary { op, left, right } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Contains);
        assert_eq!(
            *left,
            Expr::Path(vec!["payload".to_string(), "text".to_string()])
        );
        assert_eq!(
            *right,
            Expr::Literal(Value::String("[service1]".to_string()))
        );
    }

    #[test]
    fn test_operator_inside_string_not_split() {
        let expr = parse(r#"payload.text == "a && b""#).unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Eq);
        assert_eq!(*right, Expr::Literal(Value::String("a && b".to_string())));
    }

    #[test]
    fn test_precedence() {
        // a || b && c  =>  a || (b && c)
        let expr = parse("a || b && c").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(
            *right,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_parentheses_override() {
        // (a || b) && c
        let expr = parse("(a || b) && c").unwrap();
        let Expr::Binary { op, left, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(
            *left,
            Expr::Binary {
                op: BinaryOp::Or,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_number_comparison() {
        let expr = parse("x < -5").unwrap();
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Lt);
        assert_eq!(*right, Expr::Literal(Value::Number(-5.0)));
    }

    #[test]
    fn test_parse_function_call() {
        let expr = parse(r#"any(payload.attachments.title contains "[x]")"#).unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "any");
        assert_eq!(args.len(), 1);
        assert!(matches!(
            args[0],
            Expr::Binary {
                op: BinaryOp::Contains,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_unary() {
        assert!(matches!(
            parse("!payload.mrkdwn").unwrap(),
            Expr::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_membership() {
        let expr = parse(r##"payload.channel in ["#ops", "#alerts"]"##).unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::In, .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse(""), Err(ParseError::Empty)));
        assert!(parse("@#$").is_err());
        assert!(matches!(
            parse(r#"payload.text == "unterminated"#),
            Err(ParseError::UnterminatedString(_))
        ));
        assert!(parse(r#"[payload.text]"#).is_err());
    }
}
