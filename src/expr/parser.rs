use std::collections::{BTreeSet, HashMap};

use super::functions::Builtin;
use super::lexer::{tokenize, Token};
use crate::error::{PlotError, Result};

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// A parsed expression. Identifiers are already resolved: columns to row
/// slots, functions to allow-listed builtins. Nothing else is representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    Field(usize),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Chained comparison: `a < b <= c` holds when every adjacent pair holds.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    Logic(LogicOp, Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

/// Deepest nesting of parentheses, calls, unary operators and operator
/// chains an expression may reach.
pub const MAX_DEPTH: usize = 128;

pub(crate) struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    fields: &'a HashMap<String, usize>,
    builtins: &'a BTreeSet<Builtin>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(
        src: &'a str,
        fields: &'a HashMap<String, usize>,
        builtins: &'a BTreeSet<Builtin>,
    ) -> Result<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src)?,
            pos: 0,
            depth: 0,
            fields,
            builtins,
        })
    }

    pub(crate) fn parse(mut self) -> Result<Expr> {
        if self.tokens.is_empty() {
            return Err(PlotError::expression("empty expression"));
        }
        let expr = self.or_expr()?;
        if let Some(tok) = self.peek() {
            return Err(self.error(&format!("unexpected {tok:?}")));
        }
        Ok(expr)
    }

    fn error(&self, msg: &str) -> PlotError {
        PlotError::expression(format!("{msg} in `{}`", self.src))
    }

    /// One level deeper in the tree being built.
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(&format!("expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {token:?}")))
        }
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let entry = self.depth;
        self.descend()?;
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") || self.eat(&Token::Pipe) {
            self.descend()?;
            let rhs = self.and_expr()?;
            lhs = Expr::Logic(LogicOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entry;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let entry = self.depth;
        let mut lhs = self.not_expr()?;
        while self.eat_keyword("and") || self.eat(&Token::Amp) {
            self.descend()?;
            let rhs = self.not_expr()?;
            lhs = Expr::Logic(LogicOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entry;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat_keyword("not") {
            let entry = self.depth;
            self.descend()?;
            let inner = self.not_expr()?;
            self.depth = entry;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let first = self.sum()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                Some(Token::EqEq) => CmpOp::Eq,
                Some(Token::NotEq) => CmpOp::Ne,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn sum(&mut self) -> Result<Expr> {
        let entry = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entry;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let entry = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = entry;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Token::Plus) {
            UnaryOp::Pos
        } else {
            return self.power();
        };
        let entry = self.depth;
        self.descend()?;
        let inner = self.unary()?;
        self.depth = entry;
        Ok(Expr::Unary(op, Box::new(inner)))
    }

    // `-2 ** 2 == -4` and `2 ** -1 == 0.5`: the exponent may carry a sign,
    // the base binds tighter than a leading minus.
    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.eat(&Token::DoubleStar) {
            let entry = self.depth;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth = entry;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let first = self.or_expr()?;
                if self.eat(&Token::RParen) {
                    return Ok(first);
                }
                // `(a, b)` is a sequence, as used by ranges like `xr=(0, 10)`
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.peek() == Some(&Token::RParen) {
                        break;
                    }
                    items.push(self.or_expr()?);
                }
                self.expect(&Token::RParen)?;
                Ok(Expr::List(items))
            }
            Some(Token::LBracket) => {
                let items = self.sequence(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => self.identifier(name),
            Some(tok) => Err(self.error(&format!("unexpected {tok:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn sequence(&mut self, close: &Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.or_expr()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma)?;
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr> {
        if self.eat(&Token::LParen) {
            let builtin = Builtin::from_name(&name)
                .filter(|b| self.builtins.contains(b))
                .ok_or_else(|| self.error(&format!("function `{name}` is not allowed")))?;
            let args = self.sequence(&Token::RParen)?;
            return Ok(Expr::Call(builtin, args));
        }

        if let Some(&slot) = self.fields.get(&name) {
            return Ok(Expr::Field(slot));
        }

        match name.as_str() {
            "True" | "true" => Ok(Expr::Bool(true)),
            "False" | "false" => Ok(Expr::Bool(false)),
            "pi" => Ok(Expr::Number(std::f64::consts::PI)),
            "e" => Ok(Expr::Number(std::f64::consts::E)),
            "inf" => Ok(Expr::Number(f64::INFINITY)),
            "nan" => Ok(Expr::Number(f64::NAN)),
            "and" | "or" | "not" => Err(self.error(&format!("misplaced keyword `{name}`"))),
            _ => Err(self.error(&format!("unknown identifier `{name}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str, fields: &[&str]) -> Result<Expr> {
        let slots: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.to_string(), i))
            .collect();
        let builtins: BTreeSet<Builtin> = Builtin::ALL.iter().copied().collect();
        Parser::new(src, &slots, &builtins)?.parse()
    }

    #[test]
    fn fields_resolve_to_slots() {
        let expr = parse("a + b", &["a", "b"]).unwrap();
        assert_eq!(
            expr,
            Expr::Binary(BinaryOp::Add, Box::new(Expr::Field(0)), Box::new(Expr::Field(1)))
        );
    }

    #[test]
    fn power_binds_tighter_than_negation() {
        let expr = parse("-2 ** 2", &[]).unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));
    }

    #[test]
    fn column_named_like_a_function_is_a_field() {
        // `log` as a bare word is the column, `log(..)` is the builtin
        let expr = parse("log(log)", &["log"]).unwrap();
        assert_eq!(expr, Expr::Call(Builtin::Log, vec![Expr::Field(0)]));
    }

    #[test]
    fn chained_comparison_collects_all_operators() {
        let expr = parse("0 < x <= 10", &["x"]).unwrap();
        match expr {
            Expr::Compare(_, rest) => assert_eq!(rest.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tuples_and_lists() {
        assert!(matches!(parse("(0, 10)", &[]).unwrap(), Expr::List(v) if v.len() == 2));
        assert!(matches!(parse("[1, 2, 3,]", &[]).unwrap(), Expr::List(v) if v.len() == 3));
        assert!(matches!(parse("[]", &[]).unwrap(), Expr::List(v) if v.is_empty()));
    }

    #[test]
    fn nesting_is_bounded() {
        assert!(parse("((((-(1)))))", &[]).is_ok());

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(parse(&deep, &[]), Err(PlotError::Expression(_))));

        let negations = format!("{}1", "-".repeat(100_000));
        assert!(parse(&negations, &[]).is_err());

        let chain = format!("x{}", " + x".repeat(MAX_DEPTH * 2));
        assert!(parse(&chain, &["x"]).is_err());
        assert!(parse("x + x * x - x / x", &["x"]).is_ok());
    }

    #[test]
    fn unknown_names_and_functions_fail() {
        assert!(parse("foo + 1", &["a"]).is_err());
        assert!(parse("open('x')", &[]).is_err());
        assert!(parse("__import__('os')", &[]).is_err());
        assert!(parse("a b", &["a", "b"]).is_err());
        assert!(parse("", &[]).is_err());
    }
}
