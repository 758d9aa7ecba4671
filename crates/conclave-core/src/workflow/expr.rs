//! Restricted expression language for workflow conditions and handlers
//!
//! Conditions and handler assignments are parsed into a small AST and
//! evaluated by an interpreter; no source text is ever compiled or executed.
//! Supported forms: `true`/`false`/`null`, numbers, quoted strings, dotted
//! paths rooted at `common_data`, the reserved
//! `function.<tool>.arguments.<arg>` accessor over the most recent decision,
//! `agent.response`, comparison and logical operators, and parentheses.
//! `===`/`!==` are accepted as aliases of `==`/`!=`.

use crate::error::{Error, Result};
use crate::workflow::agent::Decision;
use serde_json::Value;

/// Evaluation inputs for an expression
#[derive(Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// The workflow run's common data map
    pub common_data: Option<&'a serde_json::Map<String, Value>>,
    /// Most recent structured decision of the state's bound agent
    pub decision: Option<&'a Decision>,
    /// Last agent reply text, readable as `agent.response`
    pub agent_response: Option<&'a str>,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// A parsed expression
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal JSON value
    Literal(Value),
    /// Dotted path read
    Path(Vec<String>),
    /// Logical negation
    Not(Box<Expr>),
    /// Binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Vec<String>),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Op(BinOp),
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    let err = |msg: String| Error::Expression(msg);

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                // ==, === both mean equality
                let mut n = 0;
                while i + n < chars.len() && chars[i + n] == '=' {
                    n += 1;
                }
                if n < 2 {
                    return Err(err("assignment '=' is not an operator, use '=='".into()));
                }
                tokens.push(Token::Op(BinOp::Eq));
                i += n;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    let mut n = 2;
                    while i + n < chars.len() && chars[i + n] == '=' {
                        n += 1;
                    }
                    tokens.push(Token::Op(BinOp::Ne));
                    i += n;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::Op(BinOp::And));
                    i += 2;
                } else {
                    return Err(err("single '&' is not an operator".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Op(BinOp::Or));
                    i += 2;
                } else {
                    return Err(err("single '|' is not an operator".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal".into())),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some(&next) => s.push(next),
                                None => return Err(err("unterminated escape".into())),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' | '-' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err(err("'-' must start a number".into()));
                    }
                }
                while matches!(chars.get(i), Some('0'..='9') | Some('.')) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text
                    .parse()
                    .map_err(|_| err(format!("bad number literal {text:?}")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut segments = Vec::new();
                loop {
                    let start = i;
                    while matches!(
                        chars.get(i),
                        Some(ch) if ch.is_ascii_alphanumeric() || *ch == '_'
                    ) {
                        i += 1;
                    }
                    if i == start {
                        return Err(err("empty path segment".into()));
                    }
                    segments.push(chars[start..i].iter().collect::<String>());
                    if chars.get(i) == Some(&'.') {
                        i += 1;
                    } else {
                        break;
                    }
                }
                match segments.as_slice() {
                    [kw] if kw == "true" => tokens.push(Token::True),
                    [kw] if kw == "false" => tokens.push(Token::False),
                    [kw] if kw == "null" => tokens.push(Token::Null),
                    _ => tokens.push(Token::Path(segments)),
                }
            }
            other => return Err(err(format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // or_expr := and_expr ('||' and_expr)*
    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Op(BinOp::Or)) {
            self.next();
            let right = self.and_expr()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and_expr := cmp_expr ('&&' cmp_expr)*
    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.cmp_expr()?;
        while self.peek() == Some(&Token::Op(BinOp::And)) {
            self.next();
            let right = self.cmp_expr()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // cmp_expr := unary (('=='|'!='|'<'|'<='|'>'|'>=') unary)?
    fn cmp_expr(&mut self) -> Result<Expr> {
        let left = self.unary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if !matches!(op, BinOp::And | BinOp::Or) {
                self.next();
                let right = self.unary()?;
                return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    // unary := '!' unary | primary
    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                if self.next() != Some(Token::RParen) {
                    return Err(Error::Expression("expected ')'".to_string()));
                }
                Ok(inner)
            }
            other => Err(Error::Expression(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }
}

impl Expr {
    /// Parse an expression from source text
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = lex(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::Expression(format!(
                "trailing tokens in expression {input:?}"
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a context
    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<Value> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Path(segments) => resolve_path(segments, ctx),
            Self::Not(inner) => Ok(Value::Bool(!truthy(&inner.eval(ctx)?))),
            Self::Binary(op, left, right) => {
                // Short-circuit the logical operators
                match op {
                    BinOp::And => {
                        let l = left.eval(ctx)?;
                        if !truthy(&l) {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(truthy(&right.eval(ctx)?)));
                    }
                    BinOp::Or => {
                        let l = left.eval(ctx)?;
                        if truthy(&l) {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(truthy(&right.eval(ctx)?)));
                    }
                    _ => {}
                }

                let l = left.eval(ctx)?;
                let r = right.eval(ctx)?;
                let result = match op {
                    BinOp::Eq => value_eq(&l, &r),
                    BinOp::Ne => !value_eq(&l, &r),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(*op, &l, &r)?,
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                };
                Ok(Value::Bool(result))
            }
        }
    }

    /// Evaluate to a boolean via truthiness
    pub fn eval_bool(&self, ctx: &EvalContext<'_>) -> Result<bool> {
        Ok(truthy(&self.eval(ctx)?))
    }
}

/// Parse and evaluate a condition string to a boolean
pub fn eval_condition(source: &str, ctx: &EvalContext<'_>) -> Result<bool> {
    Expr::parse(source)?.eval_bool(ctx)
}

fn resolve_path(segments: &[String], ctx: &EvalContext<'_>) -> Result<Value> {
    match segments {
        [root, rest @ ..] if root == "common_data" => {
            let Some(map) = ctx.common_data else {
                return Ok(Value::Null);
            };
            let mut current = Value::Object(map.clone());
            for key in rest {
                current = current.get(key).cloned().unwrap_or(Value::Null);
            }
            Ok(current)
        }
        [root, tool, kw, arg, rest @ ..] if root == "function" && kw == "arguments" => {
            // Resolves to null (falsy) when no matching decision was made
            let Some(decision) = ctx.decision else {
                return Ok(Value::Null);
            };
            if decision.tool_name != *tool {
                return Ok(Value::Null);
            }
            let mut current = decision.arguments.get(arg).cloned().unwrap_or(Value::Null);
            for key in rest {
                current = current.get(key).cloned().unwrap_or(Value::Null);
            }
            Ok(current)
        }
        [root, field] if root == "agent" && field == "response" => Ok(ctx
            .agent_response
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null)),
        _ => Err(Error::Expression(format!(
            "unresolvable path {:?}",
            segments.join(".")
        ))),
    }
}

/// Truthiness: false, null, 0 and "" are false; everything else is true
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality with numeric coercion between integer and float representations
fn value_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<bool> {
    if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        return Ok(match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            _ => unreachable!(),
        });
    }
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Ok(match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            BinOp::Ge => a >= b,
            _ => unreachable!(),
        });
    }
    Err(Error::Expression(format!(
        "cannot order {l:?} against {r:?}"
    )))
}

/// Render a `${expr}` template against a context.
///
/// String results are inserted verbatim; other values are inserted as JSON.
pub fn render_template(template: &str, ctx: &EvalContext<'_>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::Expression(format!("unclosed '${{' in template {template:?}")))?;
        let value = Expr::parse(&after[..end])?.eval(ctx)?;
        match value {
            Value::String(s) => out.push_str(&s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
