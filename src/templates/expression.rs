//! Expression grammar and evaluator for webhook and constraint templates.
//!
//! ```text
//! expr       := or
//! or         := and ("or" and)*
//! and        := comparison ("and" comparison)*
//! comparison := unary (("==" | "!=") unary)?
//! unary      := "not" unary | primary
//! primary    := literal | array | "(" expr ")" | call | path
//! call       := ident "(" (expr ("," expr)*)? ")"
//! path       := ident ("." ident)*
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    error::ParseError,
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};

use super::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// JSON-encode the argument
    ToJson,
    /// First argument unless it is missing or null
    Default,
    Upper,
    Lower,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "to_json" => Some(Self::ToJson),
            "default" => Some(Self::Default),
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            _ => None,
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Default => 2,
            Self::ToJson | Self::Upper | Self::Lower => 1,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ToJson => "to_json",
            Self::Default => "default",
            Self::Upper => "upper",
            Self::Lower => "lower",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Path(Vec<String>),
    Call { function: Function, args: Vec<Expr> },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Every path referenced by the expression
    pub fn paths(&self) -> Vec<&[String]> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a [String]>) {
        match self {
            Self::Literal(_) => {}
            Self::Path(path) => out.push(path.as_slice()),
            Self::Array(items) => items.iter().for_each(|e| e.collect_paths(out)),
            Self::Call { args, .. } => args.iter().for_each(|e| e.collect_paths(out)),
            Self::Not(inner) => inner.collect_paths(out),
            Self::Binary { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
        }
    }
}

/// Anything a template path can be resolved against
pub trait Resolve {
    fn resolve(&self, path: &[String]) -> Result<Value, RenderError>;
}

// Whitespace wrapper
pub(crate) fn ws<'a, F, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// A reserved word that is not the prefix of a longer identifier
pub(crate) fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(word), not(peek(nom::character::complete::satisfy(is_ident_char))))
}

fn parse_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_"), tag("-")))),
        )),
        String::from,
    )(input)
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(tuple((char('.'), digit1))),
        ))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or("Invalid float")
            } else {
                s.parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| "Invalid integer")
            }
        },
    )(input)
}

// String literals with escape sequences
fn parse_string_literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(
            delimited(
                char('"'),
                many0(alt((
                    map(tag("\\\""), |_| '"'),
                    map(tag("\\\\"), |_| '\\'),
                    map(tag("\\n"), |_| '\n'),
                    map(tag("\\t"), |_| '\t'),
                    none_of("\"\\"),
                ))),
                char('"'),
            ),
            |chars: Vec<char>| Value::String(chars.into_iter().collect()),
        ),
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            |s: &str| Value::String(s.to_string()),
        ),
    ))(input)
}

fn parse_literal(input: &str) -> IResult<&str, Expr> {
    map(
        alt((
            value(Value::Bool(true), keyword("true")),
            value(Value::Bool(false), keyword("false")),
            value(Value::Null, keyword("null")),
            parse_number,
            parse_string_literal,
        )),
        Expr::Literal,
    )(input)
}

fn parse_array(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            ws(char('[')),
            separated_list0(ws(char(',')), parse_expression),
            ws(char(']')),
        ),
        Expr::Array,
    )(input)
}

fn parse_parens(input: &str) -> IResult<&str, Expr> {
    delimited(ws(char('(')), parse_expression, ws(char(')')))(input)
}

fn parse_call(input: &str) -> IResult<&str, Expr> {
    map_res(
        pair(
            parse_identifier,
            delimited(
                ws(char('(')),
                separated_list0(ws(char(',')), parse_expression),
                ws(char(')')),
            ),
        ),
        |(name, args)| {
            let function = Function::from_name(&name).ok_or("Unknown function")?;
            if args.len() != function.arity() {
                return Err("Wrong number of arguments");
            }
            Ok(Expr::Call { function, args })
        },
    )(input)
}

fn parse_path(input: &str) -> IResult<&str, Expr> {
    map(separated_list1(char('.'), parse_identifier), Expr::Path)(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        parse_literal,
        parse_array,
        parse_parens,
        parse_call,
        parse_path,
    )))(input)
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(keyword("not")), parse_unary), |inner| {
            Expr::Not(Box::new(inner))
        }),
        parse_primary,
    ))(input)
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_unary(input)?;
    let (input, rest) = opt(pair(
        ws(alt((
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
        ))),
        parse_unary,
    ))(input)?;

    Ok(match rest {
        Some((op, right)) => (
            input,
            Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        ),
        None => (input, left),
    })
}

fn fold_binary(op: BinaryOp, first: Expr, rest: Vec<Expr>) -> Expr {
    rest.into_iter().fold(first, |left, right| Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_comparison(input)?;
    let (input, rest) = many0(preceded(ws(keyword("and")), parse_comparison))(input)?;
    Ok((input, fold_binary(BinaryOp::And, first, rest)))
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(ws(keyword("or")), parse_and))(input)?;
    Ok((input, fold_binary(BinaryOp::Or, first, rest)))
}

pub fn parse_expression(input: &str) -> IResult<&str, Expr> {
    parse_or(input)
}

/// Parse a complete expression; trailing input is an error
pub fn parse(source: &str) -> Result<Expr, RenderError> {
    match parse_expression(source) {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(RenderError::parse("unexpected trailing input", rest)),
        Err(err) => Err(RenderError::parse(format!("invalid expression: {err}"), source)),
    }
}

/// Truthiness used by `if`, `and`, `or`, `not`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

pub fn evaluate(expr: &Expr, ctx: &dyn Resolve) -> Result<Value, RenderError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => ctx.resolve(path),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate(inner, ctx)?))),
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                if !is_truthy(&evaluate(left, ctx)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&evaluate(right, ctx)?)))
            }
            BinaryOp::Or => {
                if is_truthy(&evaluate(left, ctx)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&evaluate(right, ctx)?)))
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(
                &evaluate(left, ctx)?,
                &evaluate(right, ctx)?,
            ))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(
                &evaluate(left, ctx)?,
                &evaluate(right, ctx)?,
            ))),
        },
        Expr::Call { function, args } => call(*function, args, ctx),
    }
}

fn call(function: Function, args: &[Expr], ctx: &dyn Resolve) -> Result<Value, RenderError> {
    match function {
        Function::ToJson => {
            let value = evaluate(&args[0], ctx)?;
            serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|e| RenderError::TypeMismatch {
                    function: function.name().to_string(),
                    message: e.to_string(),
                })
        }
        Function::Default => match evaluate(&args[0], ctx) {
            Ok(Value::Null) | Err(RenderError::MissingField { .. }) => evaluate(&args[1], ctx),
            other => other,
        },
        Function::Upper | Function::Lower => match evaluate(&args[0], ctx)? {
            Value::String(s) if function == Function::Upper => Ok(Value::String(s.to_uppercase())),
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(RenderError::TypeMismatch {
                function: function.name().to_string(),
                message: format!("expected a string, got {other}"),
            }),
        },
    }
}
