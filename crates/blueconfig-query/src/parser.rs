//! Recursive-descent parser producing a normalized [`crate::ast::Query`]
//! (§4.G). Precedence, low to high: `OR → AND → NOT → COMPARISON →
//! ARITH-ADD/SUB → ARITH-MUL/DIV/MOD → TERM`.
//!
//! Negation is distributed at parse time rather than kept as a wrapper
//! node: `NOT (a AND b)` becomes `(NOT a) OR (NOT b)`, `NOT (a OR b)`
//! becomes `(NOT a) AND (NOT b)`, and `NOT cond` on a leaf condition just
//! flips that condition's `negate` flag. The normalized AST therefore
//! never carries an outer negation over a composite node.

use crate::ast::{ArithOp, CompareOp, Condition, Literal, Query, Term};
use crate::error::{QueryError, QueryResult};
use crate::lexer::{lex, Spanned, Token};

/// Parse a query string into its normalized AST. A leading `USE <ident>;`
/// sets `collection`; otherwise it defaults to `default`.
pub fn parse(input: &str) -> QueryResult<Query> {
    let tokens = lex(input).map_err(|(pos, msg)| QueryError::parse(pos, msg))?;
    let mut p = Parser { tokens, pos: 0 };

    let collection = p.parse_use_clause()?;
    let expr = p.parse_or()?;
    p.expect_eof()?;

    let query = normalize(expr, &collection);
    query
        .validate()
        .map_err(|msg| QueryError::validation(msg))?;
    Ok(query)
}

/// An intermediate, pre-normalization expression tree — kept separate
/// from [`Query`]/[`Condition`] so negation distribution has something
/// uniform to recurse over before the AST settles into its final shape.
#[derive(Debug, Clone)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Leaf(Condition),
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> QueryResult<()> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(QueryError::parse(
                self.peek_pos(),
                format!("expected {expected:?}, found {:?}", self.peek()),
            ))
        }
    }

    fn expect_eof(&mut self) -> QueryResult<()> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(QueryError::parse(self.peek_pos(), format!("unexpected trailing token {:?}", self.peek())))
        }
    }

    fn parse_use_clause(&mut self) -> QueryResult<String> {
        if matches!(self.peek(), Token::Use) {
            self.advance();
            let name = match self.advance() {
                Token::Ident(name) => name,
                other => return Err(QueryError::parse(self.peek_pos(), format!("expected identifier after USE, found {other:?}"))),
            };
            self.expect(&Token::Semicolon)?;
            Ok(name)
        } else {
            Ok("default".to_string())
        }
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut parts = vec![self.parse_and()?];
        while matches!(self.peek(), Token::Or | Token::OrOr) {
            self.advance();
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::Or(parts) })
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut parts = vec![self.parse_not()?];
        while matches!(self.peek(), Token::And | Token::AndAnd) {
            self.advance();
            parts.push(self.parse_not()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Expr::And(parts) })
    }

    fn parse_not(&mut self) -> QueryResult<Expr> {
        if matches!(self.peek(), Token::Not | Token::Bang) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> QueryResult<Expr> {
        if matches!(self.peek(), Token::LParen) {
            // could be a parenthesized sub-expression or a parenthesized term
            let save = self.pos;
            self.advance();
            if let Ok(expr) = self.try_parse_parenthesized_expr() {
                return Ok(expr);
            }
            self.pos = save;
        }

        let left = self.parse_arith_add()?;

        let (op, negate) = match self.peek() {
            Token::EqEq => (Some(CompareOp::Eq), false),
            Token::NotEq => (Some(CompareOp::Eq), true),
            Token::Gt => (Some(CompareOp::Gt), false),
            Token::Lt => (Some(CompareOp::Lt), false),
            Token::Gte => (Some(CompareOp::Gte), false),
            Token::Lte => (Some(CompareOp::Lte), false),
            _ => (None, false),
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_arith_add()?;
            return Ok(Expr::Leaf(Condition::simple(op, left, right, negate)));
        }

        if matches!(self.peek(), Token::Not) && matches!(self.tokens.get(self.pos + 1).map(|s| &s.token), Some(Token::In)) {
            self.advance();
            self.advance();
            let in_values = self.parse_in_values()?;
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::In,
                left,
                right: None,
                in_values: Some(in_values),
                pattern: None,
                start: None,
                end: None,
                negate: true,
            }));
        }
        if matches!(self.peek(), Token::In) {
            self.advance();
            let in_values = self.parse_in_values()?;
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::In,
                left,
                right: None,
                in_values: Some(in_values),
                pattern: None,
                start: None,
                end: None,
                negate: false,
            }));
        }
        if matches!(self.peek(), Token::AnyOf) {
            self.advance();
            let in_values = self.parse_in_values()?;
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::AnyOf,
                left,
                right: None,
                in_values: Some(in_values),
                pattern: None,
                start: None,
                end: None,
                negate: false,
            }));
        }
        if matches!(self.peek(), Token::Is) {
            self.advance();
            let negate = if matches!(self.peek(), Token::Not) {
                self.advance();
                true
            } else {
                false
            };
            self.expect(&Token::Null)?;
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::IsNull,
                left,
                right: None,
                in_values: None,
                pattern: None,
                start: None,
                end: None,
                negate,
            }));
        }
        if matches!(self.peek(), Token::Like) {
            self.advance();
            let pattern = match self.advance() {
                Token::Str(s) => s,
                other => return Err(QueryError::parse(self.peek_pos(), format!("expected string pattern after LIKE, found {other:?}"))),
            };
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::Like,
                left,
                right: None,
                in_values: None,
                pattern: Some(pattern),
                start: None,
                end: None,
                negate: false,
            }));
        }
        if matches!(self.peek(), Token::Between) {
            self.advance();
            let start = self.parse_arith_add()?;
            self.expect(&Token::And)?;
            let end = self.parse_arith_add()?;
            return Ok(Expr::Leaf(Condition {
                op: CompareOp::Between,
                left,
                right: None,
                in_values: None,
                pattern: None,
                start: Some(start),
                end: Some(end),
                negate: false,
            }));
        }
        if matches!(self.peek(), Token::Contains) {
            self.advance();
            let term = self.parse_arith_add()?;
            return Ok(Expr::Leaf(Condition::simple(CompareOp::Contains, left, term, false)));
        }

        // bare function call / boolean term used as a predicate
        Ok(Expr::Leaf(Condition::simple(
            CompareOp::Eq,
            left,
            Term::Literal(Literal::Bool(true)),
            false,
        )))
    }

    fn try_parse_parenthesized_expr(&mut self) -> QueryResult<Expr> {
        let expr = self.parse_or()?;
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    fn parse_in_values(&mut self) -> QueryResult<Vec<Term>> {
        if let Token::Variable(name) = self.peek().clone() {
            self.advance();
            return Ok(vec![Term::Variable(name)]);
        }
        self.expect(&Token::LParen)?;
        let mut values = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            values.push(self.parse_arith_add()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                values.push(self.parse_arith_add()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(values)
    }

    fn parse_arith_add(&mut self) -> QueryResult<Term> {
        let mut left = self.parse_arith_mul()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_arith_mul()?;
            left = Term::Arithmetic { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_arith_mul(&mut self) -> QueryResult<Term> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                Token::Percent => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Term::Arithmetic { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> QueryResult<Term> {
        match self.advance() {
            Token::Ident(name) => {
                if matches!(self.peek(), Token::LParen) {
                    self.parse_call_args(name)
                } else {
                    Ok(Term::Property(name))
                }
            }
            Token::Variable(name) => Ok(Term::Variable(name)),
            Token::Int(v) => Ok(Term::Literal(Literal::Int(v))),
            Token::Float(v) => Ok(Term::Literal(Literal::Float(v))),
            Token::Str(s) => Ok(Term::Literal(Literal::String(s))),
            Token::True => Ok(Term::Literal(Literal::Bool(true))),
            Token::False => Ok(Term::Literal(Literal::Bool(false))),
            Token::Null => Ok(Term::Literal(Literal::Null)),
            Token::Now => {
                self.expect(&Token::LParen)?;
                self.expect(&Token::RParen)?;
                Ok(Term::Now)
            }
            Token::Today => {
                self.expect(&Token::LParen)?;
                self.expect(&Token::RParen)?;
                Ok(Term::Today)
            }
            Token::Cast => {
                self.expect(&Token::LParen)?;
                let expr = self.parse_arith_add()?;
                self.expect(&Token::As)?;
                let target_type = match self.advance() {
                    Token::Ident(t) => t,
                    other => return Err(QueryError::parse(self.peek_pos(), format!("expected type name, found {other:?}"))),
                };
                self.expect(&Token::RParen)?;
                Ok(Term::Cast { expr: Box::new(expr), target_type })
            }
            Token::LParen => {
                let inner = self.parse_arith_add()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(QueryError::parse(self.peek_pos(), format!("unexpected token {other:?} in term position"))),
        }
    }

    fn parse_call_args(&mut self, name: String) -> QueryResult<Term> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            args.push(self.parse_arith_add()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                args.push(self.parse_arith_add()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Term::FunctionCall { name, args })
    }
}

/// Distribute negation via De Morgan's laws, then collapse the result
/// into the final `Query { is_or, conditions, sub_queries }` shape.
fn normalize(expr: Expr, collection: &str) -> Query {
    let expr = push_not(expr, false);
    to_query(expr, collection)
}

fn push_not(expr: Expr, negate: bool) -> Expr {
    match expr {
        Expr::Not(inner) => push_not(*inner, !negate),
        Expr::And(parts) => {
            let pushed = parts.into_iter().map(|p| push_not(p, negate)).collect();
            if negate {
                Expr::Or(pushed)
            } else {
                Expr::And(pushed)
            }
        }
        Expr::Or(parts) => {
            let pushed = parts.into_iter().map(|p| push_not(p, negate)).collect();
            if negate {
                Expr::And(pushed)
            } else {
                Expr::Or(pushed)
            }
        }
        Expr::Leaf(mut cond) => {
            if negate {
                cond.negate = !cond.negate;
            }
            Expr::Leaf(cond)
        }
    }
}

fn to_query(expr: Expr, collection: &str) -> Query {
    match expr {
        Expr::And(parts) => {
            let mut conditions = Vec::new();
            let mut sub_queries = Vec::new();
            for part in parts {
                match part {
                    Expr::Leaf(cond) => conditions.push(cond),
                    other => sub_queries.push(to_query(other, collection)),
                }
            }
            Query { is_or: false, conditions, sub_queries, collection: collection.to_string() }
        }
        Expr::Or(parts) => {
            let sub_queries = parts.into_iter().map(|p| to_query(p, collection)).collect();
            Query { is_or: true, conditions: Vec::new(), sub_queries, collection: collection.to_string() }
        }
        Expr::Leaf(cond) => Query::conjunction(collection, vec![cond]),
        Expr::Not(_) => unreachable!("push_not eliminates all Not nodes"),
    }
}
