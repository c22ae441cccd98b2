use nom::{
    branch::alt,
    bytes::complete::tag,
    combinator::{map, value},
    sequence::{preceded, terminated},
    IResult,
};
use serde_json::Value;
use std::fmt;

use super::context::ContextShape;
use super::expression::{self, is_truthy, keyword, parse_expression, ws, Expr, Resolve};
use super::{RenderError, RenderResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Expr(Expr),
    If(Expr),
    Else,
    End,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Expr(Expr),
    If {
        condition: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template, ready to render against any [`Resolve`] context
#[derive(Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .finish()
    }
}

fn parse_block(input: &str) -> IResult<&str, Token> {
    terminated(
        ws(alt((
            value(Token::Else, keyword("else")),
            value(Token::End, keyword("end")),
            map(preceded(keyword("if"), parse_expression), Token::If),
            map(parse_expression, Token::Expr),
        ))),
        tag("}}"),
    )(input)
}

fn tokenize(source: &str) -> RenderResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;

    while !rest.is_empty() {
        let Some(start) = rest.find("{{") else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let block = &rest[start + 2..];
        let (remaining, token) = parse_block(block)
            .map_err(|_| RenderError::parse("malformed template block", block))?;
        tokens.push(token);
        rest = remaining;
    }

    Ok(tokens)
}

// Frames of the conditional stack while building the tree
struct Frame {
    condition: Expr,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

fn build(tokens: Vec<Token>, source: &str) -> RenderResult<Vec<Node>> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut [Frame]) -> &'a mut Vec<Node> {
        match stack.last_mut() {
            Some(frame) => match frame.otherwise.as_mut() {
                Some(otherwise) => otherwise,
                None => &mut frame.then,
            },
            None => root,
        }
    }

    for token in tokens {
        match token {
            Token::Text(text) => current(&mut root, &mut stack).push(Node::Text(text)),
            Token::Expr(expr) => current(&mut root, &mut stack).push(Node::Expr(expr)),
            Token::If(condition) => stack.push(Frame {
                condition,
                then: Vec::new(),
                otherwise: None,
            }),
            Token::Else => match stack.last_mut() {
                Some(frame) if frame.otherwise.is_none() => frame.otherwise = Some(Vec::new()),
                Some(_) => return Err(RenderError::parse("duplicate else", source)),
                None => return Err(RenderError::parse("else without if", source)),
            },
            Token::End => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| RenderError::parse("end without if", source))?;
                current(&mut root, &mut stack).push(Node::If {
                    condition: frame.condition,
                    then: frame.then,
                    otherwise: frame.otherwise.unwrap_or_default(),
                });
            }
        }
    }

    if !stack.is_empty() {
        return Err(RenderError::parse("unterminated if block", source));
    }
    Ok(root)
}

/// Text form of an interpolated value
fn interpolate(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_nodes(nodes: &[Node], ctx: &dyn Resolve, out: &mut String) -> RenderResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Expr(expr) => out.push_str(&interpolate(&expression::evaluate(expr, ctx)?)),
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                if is_truthy(&expression::evaluate(condition, ctx)?) {
                    render_nodes(then, ctx, out)?;
                } else {
                    render_nodes(otherwise, ctx, out)?;
                }
            }
        }
    }
    Ok(())
}

fn collect_paths<'a>(nodes: &'a [Node], out: &mut Vec<&'a [String]>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Expr(expr) => out.extend(expr.paths()),
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                out.extend(condition.paths());
                collect_paths(then, out);
                collect_paths(otherwise, out);
            }
        }
    }
}

impl Template {
    pub fn parse(source: &str) -> RenderResult<Self> {
        let nodes = build(tokenize(source)?, source)?;
        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, ctx: &dyn Resolve) -> RenderResult<String> {
        let mut out = String::with_capacity(self.source.len());
        render_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }

    /// Render and parse the output as JSON; `artifact` names the result in errors
    pub fn render_json(&self, ctx: &dyn Resolve, artifact: &str) -> RenderResult<Value> {
        let text = self.render(ctx)?;
        serde_json::from_str(&text).map_err(|e| RenderError::invalid_json(artifact, e))
    }

    /// Every field path referenced anywhere in the template, including untaken branches
    pub fn paths(&self) -> Vec<&[String]> {
        let mut out = Vec::new();
        collect_paths(&self.nodes, &mut out);
        out
    }

    /// Static check that every referenced path exists in the given context shape
    pub fn check_paths(&self, shape: ContextShape) -> RenderResult<()> {
        match self.paths().into_iter().find(|path| !shape.is_known(path)) {
            Some(path) => Err(RenderError::unknown(path)),
            None => Ok(()),
        }
    }
}
