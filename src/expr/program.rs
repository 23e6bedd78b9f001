//! Condition compilation and evaluation.
//!
//! # Responsibilities
//! - Type-check parsed conditions against the declared [`Schema`]
//! - Reject conditions that cannot produce a boolean
//! - Evaluate compiled programs against a per-request [`EvalContext`]
//!   under a caller-supplied deadline
//!
//! # Design Decisions
//! - Compiled programs are immutable and evaluated without shared
//!   mutable state, so one program can serve concurrent requests
//! - The deadline is checked on every AST node; a pathological
//!   condition fails with `EvalError::Timeout` instead of stalling
//!   the request worker
//! - Literal `matches` patterns are compiled once at compile time;
//!   dynamic patterns compile per evaluation

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use regex::Regex;
use thiserror::Error;

use crate::expr::parser::{self, BinaryOp, Expr, ParseError, UnaryOp};
use crate::expr::schema::{Kind, Schema};
use crate::expr::value::Value;

/// Compile-time failure of a condition.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unknown variable or field: {0}")]
    UnknownPath(String),
    #[error("operator `{op}` cannot be applied to {left} and {right}")]
    BadOperands {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("operator `{op}` cannot be applied to {operand}")]
    BadUnaryOperand {
        op: &'static str,
        operand: String,
    },
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("function `{name}` expects {expected}, got {found}")]
    BadArguments {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("invalid regex pattern {pattern:?}: {source}")]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },
    #[error("list literal mixes element types")]
    MixedList,
    #[error("condition must evaluate to a boolean, got {0}")]
    NotBoolean(String),
}

/// Run-time failure of a condition. Recoverable: the dispatcher treats
/// any of these as a non-match.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation deadline exceeded")]
    Timeout,
    #[error("operator `{op}` cannot be applied to {value}")]
    Type { op: &'static str, value: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid regex pattern {pattern:?}: {message}")]
    BadRegex { pattern: String, message: String },
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("condition produced {0}, expected a boolean")]
    UnexpectedResult(String),
}

/// Variables visible to a condition during one evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    vars: BTreeMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// Compiles condition sources against a fixed variable schema.
#[derive(Debug, Clone)]
pub struct Engine {
    schema: Schema,
}

impl Engine {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Compile a condition source into an executable program.
    ///
    /// The schema is fully static, so a condition whose result kind is
    /// not boolean is always rejected here rather than at evaluation.
    pub fn compile(&self, source: &str) -> Result<Program, CompileError> {
        let expr = parser::parse(source)?;
        let kind = self.check(&expr)?;
        if kind != Kind::Bool {
            return Err(CompileError::NotBoolean(kind.describe()));
        }
        let mut regexes = HashMap::new();
        collect_literal_regexes(&expr, &mut regexes)?;
        Ok(Program {
            source: source.to_string(),
            expr,
            regexes,
        })
    }

    fn check(&self, expr: &Expr) -> Result<Kind, CompileError> {
        match expr {
            Expr::Literal(value) => literal_kind(value),
            Expr::Path(path) => self
                .schema
                .resolve(path)
                .ok_or_else(|| CompileError::UnknownPath(path.join("."))),
            Expr::Unary { op, operand } => {
                let kind = self.check(operand)?;
                match (op, &kind) {
                    (UnaryOp::Not, Kind::Bool) => Ok(Kind::Bool),
                    (UnaryOp::Neg, Kind::Number) => Ok(Kind::Number),
                    (UnaryOp::Not, other) => Err(CompileError::BadUnaryOperand {
                        op: "!",
                        operand: other.describe(),
                    }),
                    (UnaryOp::Neg, other) => Err(CompileError::BadUnaryOperand {
                        op: "-",
                        operand: other.describe(),
                    }),
                }
            }
            Expr::Binary { left, op, right } => {
                let lk = self.check(left)?;
                let rk = self.check(right)?;
                check_binary(*op, &lk, &rk)
            }
            Expr::Call { name, args } => self.check_call(name, args),
        }
    }

    fn check_call(&self, name: &str, args: &[Expr]) -> Result<Kind, CompileError> {
        let arity_error = |expected: &'static str, found: String| CompileError::BadArguments {
            name: name.to_string(),
            expected,
            found,
        };
        match name {
            "any" | "all" => {
                let [arg] = args else {
                    return Err(arity_error("one boolean list", format!("{} arguments", args.len())));
                };
                let kind = self.check(arg)?;
                if bottoms_out_in_bool(&kind) {
                    Ok(Kind::Bool)
                } else {
                    Err(arity_error("one boolean list", kind.describe()))
                }
            }
            "size" => {
                let [arg] = args else {
                    return Err(arity_error("one list or string", format!("{} arguments", args.len())));
                };
                match self.check(arg)? {
                    Kind::List(_) | Kind::String => Ok(Kind::Number),
                    other => Err(arity_error("one list or string", other.describe())),
                }
            }
            "lower" | "upper" => {
                let [arg] = args else {
                    return Err(arity_error("one string", format!("{} arguments", args.len())));
                };
                match self.check(arg)? {
                    Kind::String => Ok(Kind::String),
                    other => Err(arity_error("one string", other.describe())),
                }
            }
            _ => Err(CompileError::UnknownFunction(name.to_string())),
        }
    }
}

/// Operators that broadcast over a list-valued left operand, producing a
/// list of per-element results.
fn broadcasts(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Contains
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith
            | BinaryOp::Matches
    )
}

fn check_binary(op: BinaryOp, lk: &Kind, rk: &Kind) -> Result<Kind, CompileError> {
    // Broadcast: list<T> OP scalar  =>  list of element-wise results.
    if broadcasts(op) {
        if let Kind::List(inner) = lk {
            if !matches!(rk, Kind::List(_)) {
                let element = check_binary(op, inner, rk)?;
                return Ok(Kind::list(element));
            }
        }
    }

    let mismatch = || CompileError::BadOperands {
        op: op.symbol(),
        left: lk.describe(),
        right: rk.describe(),
    };

    match op {
        BinaryOp::Or | BinaryOp::And => match (lk, rk) {
            (Kind::Bool, Kind::Bool) => Ok(Kind::Bool),
            _ => Err(mismatch()),
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            if lk == rk || *lk == Kind::Null || *rk == Kind::Null {
                Ok(Kind::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (lk, rk) {
            (Kind::Number, Kind::Number) | (Kind::String, Kind::String) => Ok(Kind::Bool),
            _ => Err(mismatch()),
        },
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            match (lk, rk) {
                (Kind::Number, Kind::Number) => Ok(Kind::Number),
                _ => Err(mismatch()),
            }
        }
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith | BinaryOp::Matches => {
            match (lk, rk) {
                (Kind::String, Kind::String) => Ok(Kind::Bool),
                _ => Err(mismatch()),
            }
        }
        BinaryOp::In => match rk {
            Kind::List(inner) => {
                if **inner == *lk || **inner == Kind::Null {
                    Ok(Kind::Bool)
                } else {
                    Err(mismatch())
                }
            }
            _ => Err(mismatch()),
        },
    }
}

fn literal_kind(value: &Value) -> Result<Kind, CompileError> {
    match value {
        Value::Null => Ok(Kind::Null),
        Value::Bool(_) => Ok(Kind::Bool),
        Value::Number(_) => Ok(Kind::Number),
        Value::String(_) => Ok(Kind::String),
        Value::List(items) => {
            let mut element = Kind::Null;
            for item in items {
                let kind = literal_kind(item)?;
                if element == Kind::Null {
                    element = kind;
                } else if kind != element && kind != Kind::Null {
                    return Err(CompileError::MixedList);
                }
            }
            Ok(Kind::list(element))
        }
        Value::Map(_) => Ok(Kind::Object(BTreeMap::new())),
    }
}

/// A boolean, or lists nesting down to booleans (`any`/`all` input).
fn bottoms_out_in_bool(kind: &Kind) -> bool {
    match kind {
        Kind::Bool => true,
        Kind::List(inner) => bottoms_out_in_bool(inner),
        _ => false,
    }
}

fn collect_literal_regexes(
    expr: &Expr,
    out: &mut HashMap<String, Regex>,
) -> Result<(), CompileError> {
    match expr {
        Expr::Binary { left, op, right } => {
            if *op == BinaryOp::Matches {
                if let Expr::Literal(Value::String(pattern)) = right.as_ref() {
                    if !out.contains_key(pattern) {
                        let compiled =
                            Regex::new(pattern).map_err(|source| CompileError::BadRegex {
                                pattern: pattern.clone(),
                                source,
                            })?;
                        out.insert(pattern.clone(), compiled);
                    }
                }
            }
            collect_literal_regexes(left, out)?;
            collect_literal_regexes(right, out)
        }
        Expr::Unary { operand, .. } => collect_literal_regexes(operand, out),
        Expr::Call { args, .. } => {
            for arg in args {
                collect_literal_regexes(arg, out)?;
            }
            Ok(())
        }
        Expr::Literal(_) | Expr::Path(_) => Ok(()),
    }
}

/// A compiled, immutable condition. Safe to share across request
/// workers; evaluation never mutates the program.
#[derive(Debug)]
pub struct Program {
    source: String,
    expr: Expr,
    regexes: HashMap<String, Regex>,
}

impl Program {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the context. The result must be a boolean;
    /// anything else is an error, never a panic.
    pub fn evaluate(&self, ctx: &EvalContext, deadline: Instant) -> Result<bool, EvalError> {
        match self.eval(&self.expr, ctx, deadline)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::UnexpectedResult(other.type_name().to_string())),
        }
    }

    fn eval(&self, expr: &Expr, ctx: &EvalContext, deadline: Instant) -> Result<Value, EvalError> {
        if Instant::now() >= deadline {
            return Err(EvalError::Timeout);
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => self.eval_path(path, ctx),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, ctx, deadline)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, other) => Err(EvalError::Type {
                        op: "!",
                        value: other.type_name().to_string(),
                    }),
                    (UnaryOp::Neg, other) => Err(EvalError::Type {
                        op: "-",
                        value: other.type_name().to_string(),
                    }),
                }
            }
            Expr::Binary { left, op, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let lhs = expect_bool(*op, self.eval(left, ctx, deadline)?)?;
                    // Short-circuit before touching the right side.
                    if (*op == BinaryOp::Or && lhs) || (*op == BinaryOp::And && !lhs) {
                        return Ok(Value::Bool(lhs));
                    }
                    let rhs = expect_bool(*op, self.eval(right, ctx, deadline)?)?;
                    Ok(Value::Bool(rhs))
                }
                _ => {
                    let lhs = self.eval(left, ctx, deadline)?;
                    let rhs = self.eval(right, ctx, deadline)?;
                    self.apply(*op, lhs, &rhs)
                }
            },
            Expr::Call { name, args } => self.eval_call(name, args, ctx, deadline),
        }
    }

    fn eval_path(&self, path: &[String], ctx: &EvalContext) -> Result<Value, EvalError> {
        let (root, rest) = path
            .split_first()
            .ok_or_else(|| EvalError::UnknownVariable(String::new()))?;
        let mut value = ctx
            .get(root)
            .cloned()
            .ok_or_else(|| EvalError::UnknownVariable(root.clone()))?;
        for segment in rest {
            value = field_of(value, segment)?;
        }
        Ok(value)
    }

    fn apply(&self, op: BinaryOp, lhs: Value, rhs: &Value) -> Result<Value, EvalError> {
        // Broadcast element-wise over a list-valued left operand.
        if broadcasts(op) {
            if let Value::List(items) = &lhs {
                if !matches!(rhs, Value::List(_)) {
                    let mapped: Result<Vec<Value>, EvalError> = items
                        .iter()
                        .cloned()
                        .map(|item| self.apply(op, item, rhs))
                        .collect();
                    return Ok(Value::List(mapped?));
                }
            }
        }

        let type_error = |value: &Value| EvalError::Type {
            op: op.symbol(),
            value: value.type_name().to_string(),
        };

        match op {
            BinaryOp::Eq => Ok(Value::Bool(lhs == *rhs)),
            BinaryOp::Ne => Ok(Value::Bool(lhs != *rhs)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&lhs, rhs) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
                    _ => return Err(type_error(&lhs)),
                };
                let Some(ordering) = ordering else {
                    // NaN comparisons are false rather than an error.
                    return Ok(Value::Bool(false));
                };
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let (Value::Number(a), Value::Number(b)) = (&lhs, rhs) else {
                    return Err(type_error(&lhs));
                };
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div | BinaryOp::Mod if *b == 0.0 => {
                        return Err(EvalError::DivisionByZero)
                    }
                    BinaryOp::Div => a / b,
                    _ => a % b,
                };
                Ok(Value::Number(result))
            }
            BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
                let (Value::String(a), Value::String(b)) = (&lhs, rhs) else {
                    return Err(type_error(&lhs));
                };
                let result = match op {
                    BinaryOp::Contains => a.contains(b.as_str()),
                    BinaryOp::StartsWith => a.starts_with(b.as_str()),
                    _ => a.ends_with(b.as_str()),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Matches => {
                let (Value::String(text), Value::String(pattern)) = (&lhs, rhs) else {
                    return Err(type_error(&lhs));
                };
                match self.regexes.get(pattern) {
                    Some(compiled) => Ok(Value::Bool(compiled.is_match(text))),
                    None => {
                        let compiled =
                            Regex::new(pattern).map_err(|err| EvalError::BadRegex {
                                pattern: pattern.clone(),
                                message: err.to_string(),
                            })?;
                        Ok(Value::Bool(compiled.is_match(text)))
                    }
                }
            }
            BinaryOp::In => {
                let Value::List(items) = rhs else {
                    return Err(type_error(rhs));
                };
                Ok(Value::Bool(items.contains(&lhs)))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited in eval"),
        }
    }

    fn eval_call(
        &self,
        name: &str,
        args: &[Expr],
        ctx: &EvalContext,
        deadline: Instant,
    ) -> Result<Value, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, ctx, deadline)?);
        }
        match (name, values.as_slice()) {
            ("any", [value]) => Ok(Value::Bool(quantify(value, false)?)),
            ("all", [value]) => Ok(Value::Bool(quantify(value, true)?)),
            ("size", [Value::List(items)]) => Ok(Value::Number(items.len() as f64)),
            ("size", [Value::String(s)]) => Ok(Value::Number(s.chars().count() as f64)),
            ("lower", [Value::String(s)]) => Ok(Value::String(s.to_lowercase())),
            ("upper", [Value::String(s)]) => Ok(Value::String(s.to_uppercase())),
            (_, [value, ..]) => Err(EvalError::Type {
                op: "call",
                value: value.type_name().to_string(),
            }),
            _ => Err(EvalError::Type {
                op: "call",
                value: "no arguments".to_string(),
            }),
        }
    }
}

/// Collapse a (possibly nested) boolean list: `universal` picks all-vs-any.
fn quantify(value: &Value, universal: bool) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::List(items) => {
            let mut results = items.iter().map(|item| quantify(item, universal));
            if universal {
                results.try_fold(true, |acc, r| Ok(acc && r?))
            } else {
                results.try_fold(false, |acc, r| Ok(acc || r?))
            }
        }
        other => Err(EvalError::Type {
            op: if universal { "all" } else { "any" },
            value: other.type_name().to_string(),
        }),
    }
}

fn field_of(value: Value, field: &str) -> Result<Value, EvalError> {
    match value {
        Value::Map(mut entries) => Ok(entries.remove(field).unwrap_or(Value::Null)),
        Value::List(items) => {
            let mapped: Result<Vec<Value>, EvalError> = items
                .into_iter()
                .map(|item| field_of(item, field))
                .collect();
            Ok(Value::List(mapped?))
        }
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::Type {
            op: "field access",
            value: other.type_name().to_string(),
        }),
    }
}

fn expect_bool(op: BinaryOp, value: Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| EvalError::Type {
        op: op.symbol(),
        value: value.type_name().to_string(),
    })
}
