//! Recursive-descent parser for policy text.
//!
//! Supported syntax:
//! - Policies: `@id("...") permit|forbid (principal, action, resource) when { ... } unless { ... };`
//! - Scope: `== ref`, `in ref`, `in [refs]`, `is Type`, `is Type in ref`
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`
//! - Boolean operators: `&&`, `||`, `!`, `if .. then .. else ..`
//! - Membership and tests: `in`, `has`, `like`, `is`
//! - Arithmetic: `+`, `-`, `*`
//! - Access: `expr.attr`, `expr["attr"]`, `set.contains(x)`, `.containsAll(s)`, `.containsAny(s)`
//! - Literals: integers, decimals, `"strings"`, `true`, `false`, `Type::"id"`, `[..]`, `{..}`

use super::condition::{BinaryOp, Condition, Expr, Literal, Method, Pattern, Var};
use super::entity::{unescape, EntityUid, IdentifierCase};
use super::lexer::{tokenize, Spanned, Token};
use super::scope::{PolicyScope, ScopeConstraint};
use super::{Effect, Policy, PolicyMetadata};
use crate::{Error, Result};

use std::collections::BTreeMap;

/// Maximum nesting of expressions inside one condition.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

const RESERVED: &[&str] = &["true", "false", "if", "then", "else", "in", "has", "like", "is"];

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    case: IdentifierCase,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, case: IdentifierCase) -> Result<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
            depth: 0,
            case,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == keyword)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|t| t.token.clone());
        self.pos += 1;
        tok
    }

    /// Build an error located at the current token, or at the end of the text.
    fn error_here(&self, message: impl Into<String>) -> Error {
        let message = message.into();
        match self.tokens.get(self.pos) {
            Some(tok) => Error::parse_at(message, tok.line, tok.column),
            None => {
                let (line, column) = end_position(self.src);
                Error::parse_at(message, line, column)
            }
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.peek() {
            Some(tok) => self.error_here(format!("expected {}, found {}", expected, tok.describe())),
            None => self.error_here(format!("expected {}, found end of policy text", expected)),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<()> {
        if self.peek() == Some(&token) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.peek_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{}`", keyword)))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(word)) => {
                let word = word.clone();
                self.advance();
                Ok(word)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(self.error_here(format!(
                "expression nesting exceeds {} levels",
                MAX_EXPRESSION_DEPTH
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn policies(&mut self) -> Result<Vec<Policy>> {
        let mut policies = Vec::new();
        while !self.at_end() {
            let policy = self.policy(policies.len())?;
            policies.push(policy);
        }
        Ok(policies)
    }

    fn policy(&mut self, index: usize) -> Result<Policy> {
        let start = self.tokens[self.pos].start;
        let annotations = self.annotations()?;

        let effect = match self.peek() {
            Some(Token::Ident(w)) if w == "permit" => Effect::Permit,
            Some(Token::Ident(w)) if w == "forbid" => Effect::Forbid,
            _ => return Err(self.unexpected("`permit` or `forbid`")),
        };
        self.advance();

        self.expect(Token::LParen, "`(`")?;
        let principal = self.scope_constraint("principal", true)?;
        self.expect(Token::Comma, "`,`")?;
        let action = self.scope_constraint("action", false)?;
        self.expect(Token::Comma, "`,`")?;
        let resource = self.scope_constraint("resource", true)?;
        self.expect(Token::RParen, "`)`")?;

        let mut conditions = Vec::new();
        loop {
            let kind = if self.peek_keyword("when") {
                Condition::when as fn(Expr) -> Condition
            } else if self.peek_keyword("unless") {
                Condition::unless as fn(Expr) -> Condition
            } else {
                break;
            };
            self.advance();
            self.expect(Token::LBrace, "`{`")?;
            let expr = self.expr()?;
            self.expect(Token::RBrace, "`}`")?;
            conditions.push(kind(expr));
        }

        if self.peek() != Some(&Token::Semi) {
            return Err(self.unexpected("`;`"));
        }
        let end = self.tokens[self.pos].end;
        self.advance();

        let id = annotations
            .get("id")
            .cloned()
            .unwrap_or_else(|| format!("policy{}", index));

        Ok(Policy {
            id,
            effect,
            scope: PolicyScope {
                principal,
                action,
                resource,
            },
            conditions,
            annotations,
            metadata: PolicyMetadata::default(),
            source: self.src[start..end].to_string(),
        })
    }

    fn annotations(&mut self) -> Result<BTreeMap<String, String>> {
        let mut annotations = BTreeMap::new();
        while self.peek() == Some(&Token::At) {
            self.advance();
            let key = self.expect_ident("annotation name")?;
            self.expect(Token::LParen, "`(`")?;
            let value = match self.advance() {
                Some(Token::Str(s)) => unescape(&s),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("annotation string"));
                }
            };
            self.expect(Token::RParen, "`)`")?;
            if annotations.insert(key.clone(), value).is_some() {
                return Err(self.error_here(format!("duplicate annotation `@{}`", key)));
            }
        }
        Ok(annotations)
    }

    fn scope_constraint(&mut self, var: &str, allow_is: bool) -> Result<ScopeConstraint> {
        self.expect_keyword(var)?;

        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                Ok(ScopeConstraint::Eq(self.entity_ref()?))
            }
            Some(Token::Ident(w)) if w == "in" => {
                self.advance();
                if self.peek() == Some(&Token::LBracket) {
                    self.advance();
                    let mut uids = Vec::new();
                    if self.peek() != Some(&Token::RBracket) {
                        uids.push(self.entity_ref()?);
                        while self.peek() == Some(&Token::Comma) {
                            self.advance();
                            uids.push(self.entity_ref()?);
                        }
                    }
                    self.expect(Token::RBracket, "`]`")?;
                    Ok(ScopeConstraint::In(uids))
                } else {
                    Ok(ScopeConstraint::In(vec![self.entity_ref()?]))
                }
            }
            Some(Token::Ident(w)) if w == "is" && allow_is => {
                self.advance();
                let entity_type = self.type_path()?;
                let in_entity = if self.peek_keyword("in") {
                    self.advance();
                    Some(self.entity_ref()?)
                } else {
                    None
                };
                Ok(ScopeConstraint::Is {
                    entity_type,
                    in_entity,
                })
            }
            Some(Token::Comma) | Some(Token::RParen) => Ok(ScopeConstraint::Any),
            _ => Err(self.unexpected(&format!("`==`, `in`, `,` or `)` after `{}`", var))),
        }
    }

    /// `Type::"id"`, `Ns::Type::"id"` or a bare `"id"`.
    fn entity_ref(&mut self) -> Result<EntityUid> {
        match self.peek().cloned() {
            Some(Token::Str(s)) => {
                self.advance();
                let id = unescape(&s);
                if id.is_empty() {
                    self.pos -= 1;
                    return Err(self.error_here("entity id cannot be empty"));
                }
                Ok(EntityUid::untyped(id).canonical(self.case))
            }
            Some(Token::Ident(first)) if !is_reserved(&first) => {
                self.advance();
                self.entity_ref_after(first)
            }
            _ => Err(self.unexpected("entity reference")),
        }
    }

    fn entity_ref_after(&mut self, first: String) -> Result<EntityUid> {
        let mut segments = vec![first];
        loop {
            self.expect(Token::DoubleColon, "`::`")?;
            match self.advance() {
                Some(Token::Str(s)) => {
                    return Ok(EntityUid::new(segments.join("::"), unescape(&s)).canonical(self.case))
                }
                Some(Token::Ident(seg)) => segments.push(seg),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("type name or entity id"));
                }
            }
        }
    }

    fn type_path(&mut self) -> Result<String> {
        let mut segments = vec![self.expect_ident("entity type")?];
        while self.peek() == Some(&Token::DoubleColon)
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
        {
            self.advance();
            segments.push(self.expect_ident("entity type")?);
        }
        Ok(self.case.apply(&segments.join("::")))
    }

    fn expr(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = if self.peek_keyword("if") {
            self.advance();
            self.if_then_else()
        } else {
            self.or()
        };
        self.leave();
        result
    }

    fn if_then_else(&mut self) -> Result<Expr> {
        let cond = self.expr()?;
        self.expect_keyword("then")?;
        let then = self.expr()?;
        self.expect_keyword("else")?;
        let otherwise = self.expr()?;
        Ok(Expr::IfThenElse {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// or = and ("||" and)*
    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        let mut links = 0;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.and()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    /// and = relation ("&&" relation)*
    fn and(&mut self) -> Result<Expr> {
        let mut left = self.relation()?;
        let mut links = 0;
        while self.peek() == Some(&Token::And) {
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.relation()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    /// relation = add (cmp add | "in" add | "has" attr | "like" pattern | "is" type ("in" add)?)?
    fn relation(&mut self) -> Result<Expr> {
        let left = self.add()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            Some(Token::Ident(w)) if w == "in" => Some(BinaryOp::In),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.add()?;
            return Ok(Expr::binary(op, left, right));
        }

        if self.peek_keyword("has") {
            self.advance();
            let attr = match self.advance() {
                Some(Token::Ident(name)) => name,
                Some(Token::Str(s)) => unescape(&s),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("attribute name"));
                }
            };
            return Ok(Expr::HasAttr(Box::new(left), attr));
        }

        if self.peek_keyword("like") {
            self.advance();
            let raw = match self.peek().cloned() {
                Some(Token::Str(raw)) => raw,
                _ => return Err(self.unexpected("pattern string")),
            };
            let pattern = Pattern::new(&raw).map_err(|e| self.error_here(e.to_string()))?;
            self.advance();
            return Ok(Expr::Like(Box::new(left), pattern));
        }

        if self.peek_keyword("is") {
            self.advance();
            let entity_type = self.type_path()?;
            let in_expr = if self.peek_keyword("in") {
                self.advance();
                Some(Box::new(self.add()?))
            } else {
                None
            };
            return Ok(Expr::Is(Box::new(left), entity_type, in_expr));
        }

        Ok(left)
    }

    /// add = mul (("+" | "-") mul)*
    fn add(&mut self) -> Result<Expr> {
        let mut left = self.mul()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.mul()?;
            left = Expr::binary(op, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    /// mul = unary ("*" unary)*
    fn mul(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        let mut links = 0;
        while self.peek() == Some(&Token::Star) {
            self.advance();
            self.enter()?;
            links += 1;
            let right = self.unary()?;
            left = Expr::binary(BinaryOp::Mul, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    /// unary = "!" unary | "-" unary | member
    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                self.enter()?;
                let inner = self.unary();
                self.leave();
                Ok(Expr::Not(Box::new(inner?)))
            }
            Some(Token::Minus) => {
                self.advance();
                if let Some(Token::Long(n)) = self.peek().cloned() {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Long(-n)));
                }
                if let Some(Token::Decimal(n)) = self.peek().cloned() {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Decimal(-n)));
                }
                self.enter()?;
                let inner = self.unary();
                self.leave();
                Ok(Expr::Neg(Box::new(inner?)))
            }
            _ => self.member(),
        }
    }

    /// member = primary ("." ident | "." ident "(" args ")" | "[" string "]")*
    fn member(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    self.enter()?;
                    links += 1;
                    let name = self.expect_ident("attribute or method name")?;
                    if self.peek() == Some(&Token::LParen) {
                        let method = Method::from_name(&name).ok_or_else(|| {
                            self.error_here(format!("unknown method `{}`", name))
                        })?;
                        self.advance();
                        let args = self.call_args()?;
                        if args.len() != 1 {
                            return Err(self.error_here(format!(
                                "`{}` takes exactly one argument",
                                method.as_str()
                            )));
                        }
                        expr = Expr::MethodCall {
                            receiver: Box::new(expr),
                            method,
                            args,
                        };
                    } else {
                        expr = Expr::GetAttr(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    self.enter()?;
                    links += 1;
                    let key = match self.advance() {
                        Some(Token::Str(s)) => unescape(&s),
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected("attribute string"));
                        }
                    };
                    self.expect(Token::RBracket, "`]`")?;
                    expr = Expr::GetAttr(Box::new(expr), key);
                }
                _ => break,
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.expr()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                args.push(self.expr()?);
            }
        }
        self.expect(Token::RParen, "`)`")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };

        match token {
            Token::Long(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Long(n)))
            }
            Token::Decimal(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Decimal(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(unescape(&s))))
            }
            Token::Ident(word) => {
                if word == "true" || word == "false" {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Bool(word == "true")));
                }
                if let Some(var) = Var::from_keyword(&word) {
                    self.advance();
                    return Ok(Expr::Var(var));
                }
                if is_reserved(&word) {
                    return Err(self.error_here(format!("unexpected keyword `{}`", word)));
                }
                self.advance();
                Ok(Expr::Literal(Literal::Entity(self.entity_ref_after(word)?)))
            }
            Token::LParen => {
                self.advance();
                let expr = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    items.push(self.expr()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        items.push(self.expr()?);
                    }
                }
                self.expect(Token::RBracket, "`]`")?;
                Ok(Expr::Set(items))
            }
            Token::LBrace => {
                self.advance();
                self.record()
            }
            other => Err(self.error_here(format!("unexpected {}", other.describe()))),
        }
    }

    fn record(&mut self) -> Result<Expr> {
        let mut fields: Vec<(String, Expr)> = Vec::new();
        if self.peek() == Some(&Token::RBrace) {
            self.advance();
            return Ok(Expr::Record(fields));
        }
        loop {
            let key = match self.advance() {
                Some(Token::Ident(name)) => name,
                Some(Token::Str(s)) => unescape(&s),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("record key"));
                }
            };
            if fields.iter().any(|(k, _)| *k == key) {
                self.pos -= 1;
                return Err(self.error_here(format!("duplicate record key `{}`", key)));
            }
            self.expect(Token::Colon, "`:`")?;
            let value = self.expr()?;
            fields.push((key, value));

            match self.peek() {
                Some(Token::Comma) => {
                    self.advance();
                }
                Some(Token::RBrace) => {
                    self.advance();
                    return Ok(Expr::Record(fields));
                }
                _ => return Err(self.unexpected("`,` or `}`")),
            }
        }
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

fn end_position(src: &str) -> (usize, usize) {
    let line = src.lines().count().max(1);
    let column = src.lines().last().map(|l| l.chars().count() + 1).unwrap_or(1);
    (line, column)
}

/// Parse policy text holding zero or more policies.
///
/// Each policy takes its id from an `@id("...")` annotation, or `policy<N>` where `N`
/// is its position in the text.
pub fn parse_policies(text: &str, case: IdentifierCase) -> Result<Vec<Policy>> {
    Parser::new(text, case)?.policies()
}

/// Parse text that must hold exactly one policy, and give it `id`.
pub fn parse_policy(id: &str, text: &str, case: IdentifierCase) -> Result<Policy> {
    let mut policies = parse_policies(text, case)?;
    match policies.len() {
        1 => {
            let mut policy = policies.remove(0);
            policy.id = id.to_string();
            Ok(policy)
        }
        0 => Err(Error::parse("expected a policy, found empty policy text")),
        n => Err(Error::parse(format!("expected exactly one policy, found {}", n))),
    }
}

/// Parse a standalone condition expression.
pub fn parse_expression(text: &str, case: IdentifierCase) -> Result<Expr> {
    let mut parser = Parser::new(text, case)?;
    let expr = parser.expr()?;
    if !parser.at_end() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}
