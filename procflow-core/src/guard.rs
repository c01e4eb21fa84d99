//! Guard expressions and gateway resolution.
//!
//! Guards are boolean expressions over instance variables, attached to the
//! edges leaving an exclusive gateway. The expression language supports:
//!
//! - `name` - boolean variable is true
//! - `name == value` - equality (`true`, `false`, integers, `"strings"`)
//! - `name != value` - inequality
//! - `name > n`, `name >= n`, `name < n`, `name <= n` - integer comparisons
//! - `!expr` - logical NOT
//! - `expr && expr` - logical AND (higher precedence than OR)
//! - `expr || expr` - logical OR
//! - `(expr)` - grouping for precedence control
//!
//! Examples:
//! - `prc_is_subject_to_clause_t`
//! - `!prc_required_to_edit && prc_confirmation`
//! - `retries < 3 || region == "north"`
//!
//! Every variable reference fixes the variable's type: a bare reference or a
//! boolean literal makes it `bool`, an integer literal or ordering makes it
//! `int`, a string literal makes it `string`. Values of any other type are
//! rejected at evaluation instead of being coerced.

use crate::definition::{Edge, NodeKind, ProcessDefinition};
use crate::error::CoreError;
use crate::variables::{VarType, VarValue, Variables};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    /// Boolean variable is true.
    Truthy(String),
    /// Equality comparison.
    Eq(String, VarValue),
    /// Inequality comparison.
    Ne(String, VarValue),
    /// Greater than.
    Gt(String, i64),
    /// Greater or equal.
    Ge(String, i64),
    /// Less than.
    Lt(String, i64),
    /// Less or equal.
    Le(String, i64),
    /// Logical AND.
    And(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical OR.
    Or(Box<GuardExpr>, Box<GuardExpr>),
    /// Logical NOT.
    Not(Box<GuardExpr>),
}

/// What a guard sees when a referenced variable is not set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingVariablePolicy {
    /// An absent boolean reads as `false`; any other absent comparison is false.
    #[default]
    DefaultFalse,
    /// An absent variable fails the evaluation.
    Error,
}

impl std::str::FromStr for MissingVariablePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default-false" | "default_false" => Ok(Self::DefaultFalse),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown missing-variable policy: '{}'", other)),
        }
    }
}

/// Failure while evaluating a single guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("variable '{0}' is not set")]
    Missing(String),

    #[error("variable '{variable}' has type {actual}, expected {expected}")]
    TypeMismatch {
        variable: String,
        expected: VarType,
        actual: VarType,
    },
}

impl EvalError {
    fn at_gateway(self, gateway: &str) -> CoreError {
        match self {
            EvalError::Missing(variable) => CoreError::VariableMissing {
                gateway: gateway.to_string(),
                variable,
            },
            EvalError::TypeMismatch {
                variable,
                expected,
                actual,
            } => CoreError::VariableTypeMismatch {
                variable,
                expected,
                actual,
            },
        }
    }
}

impl GuardExpr {
    /// Parses a guard expression from a string.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidGuard {
                reason: "empty guard expression".to_string(),
            });
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < s.len() {
            return Err(CoreError::InvalidGuard {
                reason: format!("unexpected input at '{}'", &s[parser.pos..]),
            });
        }
        Ok(expr)
    }

    /// Evaluates the guard against a variable snapshot.
    pub fn evaluate(
        &self,
        vars: &Variables,
        policy: MissingVariablePolicy,
    ) -> Result<bool, EvalError> {
        Ok(match self {
            GuardExpr::Truthy(name) => match lookup(vars, name, VarType::Bool, policy)? {
                Some(VarValue::Bool(b)) => *b,
                _ => false,
            },
            GuardExpr::Eq(name, expected) => {
                match lookup(vars, name, expected.var_type(), policy)? {
                    Some(value) => value == expected,
                    None => *expected == VarValue::Bool(false),
                }
            }
            GuardExpr::Ne(name, expected) => {
                match lookup(vars, name, expected.var_type(), policy)? {
                    Some(value) => value != expected,
                    None => *expected == VarValue::Bool(true),
                }
            }
            GuardExpr::Gt(name, n) => int_value(vars, name, policy)?.is_some_and(|v| v > *n),
            GuardExpr::Ge(name, n) => int_value(vars, name, policy)?.is_some_and(|v| v >= *n),
            GuardExpr::Lt(name, n) => int_value(vars, name, policy)?.is_some_and(|v| v < *n),
            GuardExpr::Le(name, n) => int_value(vars, name, policy)?.is_some_and(|v| v <= *n),
            GuardExpr::And(left, right) => {
                left.evaluate(vars, policy)? && right.evaluate(vars, policy)?
            }
            GuardExpr::Or(left, right) => {
                left.evaluate(vars, policy)? || right.evaluate(vars, policy)?
            }
            GuardExpr::Not(inner) => !inner.evaluate(vars, policy)?,
        })
    }

    /// Returns every variable the expression reads, with the type the
    /// expression expects it to have.
    pub fn references(&self) -> Vec<(&str, VarType)> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<(&'a str, VarType)>) {
        match self {
            GuardExpr::Truthy(name) => out.push((name.as_str(), VarType::Bool)),
            GuardExpr::Eq(name, value) | GuardExpr::Ne(name, value) => {
                out.push((name.as_str(), value.var_type()))
            }
            GuardExpr::Gt(name, _)
            | GuardExpr::Ge(name, _)
            | GuardExpr::Lt(name, _)
            | GuardExpr::Le(name, _) => out.push((name.as_str(), VarType::Int)),
            GuardExpr::And(left, right) | GuardExpr::Or(left, right) => {
                left.collect_references(out);
                right.collect_references(out);
            }
            GuardExpr::Not(inner) => inner.collect_references(out),
        }
    }
}

fn lookup<'v>(
    vars: &'v Variables,
    name: &str,
    expected: VarType,
    policy: MissingVariablePolicy,
) -> Result<Option<&'v VarValue>, EvalError> {
    match vars.get(name) {
        Some(value) if value.var_type() == expected => Ok(Some(value)),
        Some(value) => Err(EvalError::TypeMismatch {
            variable: name.to_string(),
            expected,
            actual: value.var_type(),
        }),
        None => match policy {
            MissingVariablePolicy::DefaultFalse => Ok(None),
            MissingVariablePolicy::Error => Err(EvalError::Missing(name.to_string())),
        },
    }
}

fn int_value(
    vars: &Variables,
    name: &str,
    policy: MissingVariablePolicy,
) -> Result<Option<i64>, EvalError> {
    Ok(match lookup(vars, name, VarType::Int, policy)? {
        Some(VarValue::Int(n)) => Some(*n),
        _ => None,
    })
}

/// Deepest expression tree the parser will build. Counts `!`, `(` and each
/// chained `&&`/`||` operand, which bounds recursion in `evaluate` too.
const MAX_NESTING: usize = 64;

/// Simple recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self) -> Result<(), CoreError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CoreError::InvalidGuard {
                reason: "guard nested too deeply".to_string(),
            });
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<GuardExpr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            self.enter()?;
            self.skip_whitespace();
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            self.enter()?;
            self.skip_whitespace();
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            self.enter()?;
            self.skip_whitespace();
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('(') {
            self.pos += 1;
            self.enter()?;
            let expr = self.parse_expr()?;
            self.depth -= 1;
            self.skip_whitespace();
            if self.peek_char() != Some(')') {
                return Err(CoreError::InvalidGuard {
                    reason: "expected ')'".to_string(),
                });
            }
            self.pos += 1;
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();
        let name = self.parse_identifier()?;
        self.skip_whitespace();

        if self.peek_str("==") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Eq(name, value));
        }

        if self.peek_str("!=") {
            self.pos += 2;
            let value = self.parse_value()?;
            return Ok(GuardExpr::Ne(name, value));
        }

        if self.peek_str(">=") {
            self.pos += 2;
            return Ok(GuardExpr::Ge(name, self.parse_integer()?));
        }

        if self.peek_str("<=") {
            self.pos += 2;
            return Ok(GuardExpr::Le(name, self.parse_integer()?));
        }

        if self.peek_char() == Some('>') {
            self.pos += 1;
            return Ok(GuardExpr::Gt(name, self.parse_integer()?));
        }

        if self.peek_char() == Some('<') {
            self.pos += 1;
            return Ok(GuardExpr::Lt(name, self.parse_integer()?));
        }

        Ok(GuardExpr::Truthy(name))
    }

    fn parse_identifier(&mut self) -> Result<String, CoreError> {
        let start = self.pos;

        match self.peek_char() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.pos += 1,
            Some(c) => {
                return Err(CoreError::InvalidGuard {
                    reason: format!("expected variable name, found '{}'", c),
                })
            }
            None => {
                return Err(CoreError::InvalidGuard {
                    reason: "expected variable name, found end of input".to_string(),
                })
            }
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let name = &self.input[start..self.pos];
        if name == "true" || name == "false" {
            return Err(CoreError::InvalidGuard {
                reason: format!("'{}' cannot be used as a variable name", name),
            });
        }

        Ok(name.to_string())
    }

    fn parse_value(&mut self) -> Result<VarValue, CoreError> {
        self.skip_whitespace();

        if self.peek_keyword("true") {
            self.pos += 4;
            return Ok(VarValue::Bool(true));
        }
        if self.peek_keyword("false") {
            self.pos += 5;
            return Ok(VarValue::Bool(false));
        }

        if self.peek_char() == Some('"') {
            return self.parse_string_value();
        }

        Ok(VarValue::Int(self.parse_integer()?))
    }

    fn parse_string_value(&mut self) -> Result<VarValue, CoreError> {
        self.pos += 1;

        let mut value = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return Ok(VarValue::Str(value));
            } else {
                value.push(c);
            }
        }

        Err(CoreError::InvalidGuard {
            reason: "unterminated string".to_string(),
        })
    }

    fn parse_integer(&mut self) -> Result<i64, CoreError> {
        self.skip_whitespace();
        let start = self.pos;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.peek_char() == Some('.') {
            return Err(CoreError::InvalidGuard {
                reason: format!("only integer literals are supported: '{}'", &self.input[start..]),
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<i64>().map_err(|_| CoreError::InvalidGuard {
            reason: format!("invalid integer: '{}'", num_str),
        })
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_keyword(&self, word: &str) -> bool {
        let rest = &self.input[self.pos..];
        rest.starts_with(word)
            && !rest[word.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// Picks the outgoing edge of an exclusive gateway.
///
/// Guarded edges are tried in declared order and the first match wins. When
/// nothing matches, the gateway's unguarded default edge is taken if it has
/// one. Strict mode evaluates every guard and rejects snapshots that match
/// more than one.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayEvaluator {
    strict: bool,
    missing_variables: MissingVariablePolicy,
}

impl GatewayEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_missing_variables(mut self, policy: MissingVariablePolicy) -> Self {
        self.missing_variables = policy;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn missing_variables(&self) -> MissingVariablePolicy {
        self.missing_variables
    }

    /// Resolves `gateway` against `vars`, returning the edge to follow.
    pub fn resolve<'d>(
        &self,
        definition: &'d ProcessDefinition,
        gateway: &str,
        vars: &Variables,
    ) -> Result<&'d Edge, CoreError> {
        match definition.node(gateway) {
            Some(node) if node.kind == NodeKind::ExclusiveGateway => {}
            Some(_) => {
                return Err(CoreError::NotAGateway {
                    node: gateway.to_string(),
                })
            }
            None => {
                return Err(CoreError::NodeNotFound {
                    key: definition.key.clone(),
                    node: gateway.to_string(),
                })
            }
        }

        let mut default_edge = None;
        let mut matched: Vec<&'d Edge> = Vec::new();

        for edge in definition.outgoing(gateway) {
            let Some(guard) = edge.guard() else {
                default_edge = Some(edge);
                continue;
            };

            if guard
                .evaluate(vars, self.missing_variables)
                .map_err(|e| e.at_gateway(gateway))?
            {
                matched.push(edge);
                if !self.strict {
                    break;
                }
            }
        }

        if matched.len() > 1 {
            return Err(CoreError::AmbiguousBranch {
                gateway: gateway.to_string(),
                targets: matched.iter().map(|e| e.to.clone()).collect(),
            });
        }

        matched
            .into_iter()
            .next()
            .or(default_edge)
            .ok_or_else(|| CoreError::NoBranchMatched {
                gateway: gateway.to_string(),
            })
    }
}
