//! Recursive-descent parser for construction, define and expectation source
//!
//! Grammar (lowest precedence first):
//! ```text
//! assignment := IDENT '=' expr
//! expr       := or
//! or         := and ('||' and)*
//! and        := equality ('&&' equality)*
//! equality   := comparison (('==' | '!=') comparison)*
//! comparison := additive (('<' | '<=' | '>' | '>=') additive)*
//! additive   := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '%') unary)*
//! unary      := ('!' | '-') unary | postfix
//! postfix    := primary ('.' IDENT ['(' args ')'] | '[' expr ']')*
//! primary    := literal | array | object | IDENT ['(' args ')'] | '(' expr ')'
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::datum::Datum;

use super::lexer::{tokenize, Token, TokenKind};

/// Deepest nesting of sub-expressions and unary operators accepted.
///
/// Keeps the encoded term inside serde_json's recursion limit on the server.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Parsed source expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar literal
    Literal { value: Datum, offset: usize },
    Array { items: Vec<Expr>, offset: usize },
    Object { fields: Vec<(String, Expr)>, offset: usize },
    /// Reference to a defined name
    Name { name: String, offset: usize },
    Unary { op: UnaryOp, operand: Box<Expr>, offset: usize },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr>, offset: usize },
    /// `target.field`
    Field { target: Box<Expr>, field: String, offset: usize },
    /// `target[index]`
    Index { target: Box<Expr>, index: Box<Expr>, offset: usize },
    /// `name(args)`, or `receiver.name(args)` with the receiver as first argument
    Call { name: String, args: Vec<Expr>, offset: usize },
}

impl Expr {
    /// Byte offset of the start of this expression
    pub fn offset(&self) -> usize {
        match self {
            Expr::Literal { offset, .. }
            | Expr::Array { offset, .. }
            | Expr::Object { offset, .. }
            | Expr::Name { offset, .. }
            | Expr::Unary { offset, .. }
            | Expr::Binary { offset, .. }
            | Expr::Field { offset, .. }
            | Expr::Index { offset, .. }
            | Expr::Call { offset, .. } => *offset,
        }
    }

    /// Evaluate a closed literal expression without any bindings
    ///
    /// Returns `None` when the expression contains names, operators other
    /// than numeric negation, field access or calls.
    pub fn to_datum(&self) -> Option<Datum> {
        match self {
            Expr::Literal { value, .. } => Some(value.clone()),
            Expr::Array { items, .. } => items
                .iter()
                .map(Expr::to_datum)
                .collect::<Option<Vec<_>>>()
                .map(Datum::Array),
            Expr::Object { fields, .. } => fields
                .iter()
                .map(|(key, value)| value.to_datum().map(|v| (key.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Datum::Object),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
                ..
            } => match operand.to_datum()? {
                Datum::Number(n) => Some(Datum::Number(-n)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Names referenced by this expression, in order of first appearance
    pub fn free_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Name { name, .. } => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Expr::Array { items, .. } | Expr::Call { args: items, .. } => {
                items.iter().for_each(|item| item.collect_names(names))
            }
            Expr::Object { fields, .. } => {
                fields.iter().for_each(|(_, v)| v.collect_names(names))
            }
            Expr::Unary { operand, .. } => operand.collect_names(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
            Expr::Field { target, .. } => target.collect_names(names),
            Expr::Index { target, index, .. } => {
                target.collect_names(names);
                index.collect_names(names);
            }
        }
    }
}

/// Parse a complete expression
pub fn parse_expression(source: &str) -> Result<Expr> {
    let mut parser = Parser::new(source)?;
    let expr = parser.expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Parse a `name = expression` define directive
pub fn parse_assignment(source: &str) -> Result<(String, Expr)> {
    let mut parser = Parser::new(source)?;
    let name = match parser.advance() {
        Token {
            kind: TokenKind::Ident(name),
            ..
        } => name,
        token => {
            return Err(Error::parse(
                token.offset,
                "Expected a name at the start of a define",
            ))
        }
    };
    parser.consume(TokenKind::Assign, "'=' after defined name")?;
    let expr = parser.expr()?;
    parser.expect_eof()?;
    Ok((name, expr))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        })
    }

    fn nested<T>(&mut self, offset: usize, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::parse(offset, "Expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and advance never moves past it
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, what: &str) -> Result<Token> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(Error::parse(
                token.offset,
                format!("Expected {}, found {}", what, describe(&token.kind)),
            ))
        }
    }

    fn expect_eof(&mut self) -> Result<()> {
        self.consume(TokenKind::Eof, "end of input").map(|_| ())
    }

    fn expr(&mut self) -> Result<Expr> {
        let offset = self.peek().offset;
        self.nested(offset, |parser| parser.binary_level(0))
    }

    /// Binary operators grouped by precedence, lowest first
    fn binary_level(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
            &[(TokenKind::OrOr, BinaryOp::Or)],
            &[(TokenKind::AndAnd, BinaryOp::And)],
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::Ne)],
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        ];

        let Some(operators) = LEVELS.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary_level(level + 1)?;
        loop {
            let next = &self.peek().kind;
            let Some((_, op)) = operators.iter().find(|(kind, _)| kind == next) else {
                break;
            };
            let op = *op;
            let offset = self.advance().offset;
            let rhs = self.binary_level(level + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                offset,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        let offset = self.advance().offset;
        let operand = self.nested(offset, Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            offset,
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let token = self.advance();
                let TokenKind::Ident(name) = token.kind else {
                    return Err(Error::parse(token.offset, "Expected a field or method name after '.'"));
                };
                if self.eat(&TokenKind::LParen) {
                    let mut args = vec![expr];
                    args.extend(self.arguments()?);
                    expr = Expr::Call {
                        name,
                        args,
                        offset: token.offset,
                    };
                } else {
                    expr = Expr::Field {
                        target: Box::new(expr),
                        field: name,
                        offset: token.offset,
                    };
                }
            } else if self.peek().kind == TokenKind::LBracket {
                let offset = self.advance().offset;
                let index = self.expr()?;
                self.consume(TokenKind::RBracket, "']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                    offset,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated arguments after an opening parenthesis
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.consume(TokenKind::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        let offset = token.offset;
        let literal = |value: Datum| -> Result<Expr> { Ok(Expr::Literal { value, offset }) };

        match token.kind {
            TokenKind::Number(n) => literal(Datum::Number(n)),
            TokenKind::Str(s) => literal(Datum::String(s)),
            TokenKind::True => literal(Datum::Bool(true)),
            TokenKind::False => literal(Datum::Bool(false)),
            TokenKind::Null => literal(Datum::Null),
            TokenKind::Ident(name) => {
                if self.eat(&TokenKind::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call { name, args, offset })
                } else {
                    Ok(Expr::Name { name, offset })
                }
            }
            TokenKind::LParen => {
                let expr = self.expr()?;
                self.consume(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.consume(TokenKind::Comma, "',' or ']'")?;
                        // Trailing comma
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                    }
                }
                Ok(Expr::Array { items, offset })
            }
            TokenKind::LBrace => {
                let mut fields: Vec<(String, Expr)> = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        let key_token = self.advance();
                        let key = match key_token.kind {
                            TokenKind::Ident(key) | TokenKind::Str(key) => key,
                            other => {
                                return Err(Error::parse(
                                    key_token.offset,
                                    format!("Expected object key, found {}", describe(&other)),
                                ))
                            }
                        };
                        self.consume(TokenKind::Colon, "':' after object key")?;
                        let value = self.expr()?;
                        // Later duplicates win
                        fields.retain(|(k, _)| k != &key);
                        fields.push((key, value));
                        if self.eat(&TokenKind::RBrace) {
                            break;
                        }
                        self.consume(TokenKind::Comma, "',' or '}'")?;
                        if self.eat(&TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                Ok(Expr::Object { fields, offset })
            }
            other => Err(Error::parse(
                offset,
                format!("Expected an expression, found {}", describe(&other)),
            )),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(s) => format!("string {:?}", s),
        TokenKind::Ident(name) => format!("name '{}'", name),
        other => format!("{:?}", other),
    }
}
