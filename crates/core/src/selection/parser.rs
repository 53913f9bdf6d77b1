//! Recursive descent parser for the selection language.
//!
//! ```text
//! expr       := operand (("or" | "and") operand)*
//! operand    := "(" expr ")" | comparison | "all" | "not" operand
//!             | "within" NUMBER [PERIODIC] "of" operand
//!             | "by" "residue" operand
//!             | text_kw (STR | REGEX | INT)+
//!             | int_kw (INT | INT "-" INT | INT "to" INT)+
//! comparison := numexpr CMP numexpr
//! numexpr    := numterm (("+" | "-") numterm)*
//! numterm    := factor (("*" | "/") factor)*
//! factor     := NUMBER | "(" numexpr ")" | x | y | z | beta | occupancy
//!             | "dist" [PERIODIC] ("point" factor{3} | ("vector" | "plane") factor{6})
//!             | "-" factor
//! ```
//!
//! `or` and `and` share one precedence level and associate to the left.
//! Every rule returns `Ok(None)` when it does not match and restores the
//! token position it started from. Only a stream that is not fully consumed
//! or an invalid regex literal is an error.

use crate::selection::ast::*;
use crate::selection::error::SelectionError;
use crate::selection::token::*;

type ParseResult<T> = Result<Option<T>, SelectionError>;

/// Parser state wrapping a token stream.
pub struct Parser<'a> {
    tokens: Vec<SpannedToken>,
    pos: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<SpannedToken>, input: &'a str) -> Self {
        Self {
            tokens,
            pos: 0,
            input,
        }
    }

    pub fn parse(mut self) -> Result<Expr, SelectionError> {
        let expr = self.logical_expr()?;
        match expr {
            Some(expr) if self.at_eof() => Ok(expr),
            Some(_) => Err(SelectionError::syntax(
                "Syntax error in selection",
                self.current_span().0,
                self.input,
            )),
            None if self.at_eof() => Err(SelectionError::syntax(
                "Empty selection",
                self.current_span().0,
                self.input,
            )),
            None => Err(SelectionError::syntax(
                "Syntax error in selection",
                self.current_span().0,
                self.input,
            )),
        }
    }

    fn current(&self) -> &SpannedToken {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_span(&self) -> (usize, usize) {
        self.current().span
    }

    fn at_eof(&self) -> bool {
        self.current().token == Token::Eof
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    /// Consume the current token if it equals `expected`.
    fn accept(&mut self, expected: &Token) -> bool {
        if &self.current().token == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------
    // Logical rules
    // ------------------------------------------------------------------

    fn logical_expr(&mut self) -> ParseResult<Expr> {
        let Some(mut left) = self.logical_operand()? else {
            return Ok(None);
        };
        loop {
            let save = self.pos;
            let is_or = match self.current().token {
                Token::Or => true,
                Token::And => false,
                _ => break,
            };
            self.advance();
            match self.logical_operand()? {
                Some(right) => {
                    left = if is_or {
                        Expr::Or(Box::new(left), Box::new(right))
                    } else {
                        Expr::And(Box::new(left), Box::new(right))
                    };
                }
                None => {
                    self.pos = save;
                    break;
                }
            }
        }
        Ok(Some(left))
    }

    fn logical_operand(&mut self) -> ParseResult<Expr> {
        if let Some(e) = self.parenthesized()? {
            return Ok(Some(e));
        }
        if let Some(e) = self.comparison()? {
            return Ok(Some(e));
        }
        if self.accept(&Token::All) {
            return Ok(Some(Expr::All));
        }
        if let Some(e) = self.not_rule()? {
            return Ok(Some(e));
        }
        if let Some(e) = self.within_rule()? {
            return Ok(Some(e));
        }
        if let Some(e) = self.by_residue_rule()? {
            return Ok(Some(e));
        }
        if let Some(e) = self.text_list()? {
            return Ok(Some(e));
        }
        self.int_list()
    }

    fn parenthesized(&mut self) -> ParseResult<Expr> {
        let save = self.pos;
        if !self.accept(&Token::LParen) {
            return Ok(None);
        }
        if let Some(e) = self.logical_expr()? {
            if self.accept(&Token::RParen) {
                return Ok(Some(e));
            }
        }
        self.pos = save;
        Ok(None)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let save = self.pos;
        if let Some(lhs) = self.num_expr() {
            if let Some(op) = self.cmp_op() {
                if let Some(rhs) = self.num_expr() {
                    return Ok(Some(Expr::Compare { op, lhs, rhs }));
                }
            }
        }
        self.pos = save;
        Ok(None)
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        let op = match self.current().token {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Gt => CmpOp::Gt,
            Token::Le => CmpOp::Le,
            Token::Ge => CmpOp::Ge,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn not_rule(&mut self) -> ParseResult<Expr> {
        let save = self.pos;
        if !self.accept(&Token::Not) {
            return Ok(None);
        }
        match self.logical_operand()? {
            Some(e) => Ok(Some(Expr::Not(Box::new(e)))),
            None => {
                self.pos = save;
                Ok(None)
            }
        }
    }

    // within NUMBER [periodic] of operand
    fn within_rule(&mut self) -> ParseResult<Expr> {
        let save = self.pos;
        if !self.accept(&Token::Within) {
            return Ok(None);
        }
        let cutoff = match self.current().token {
            Token::Integer(i) => i as f64,
            Token::Float(f) => f,
            _ => {
                self.pos = save;
                return Ok(None);
            }
        };
        self.advance();
        let periodic = self.periodic_flag();
        if !self.accept(&Token::Of) {
            self.pos = save;
            return Ok(None);
        }
        match self.logical_operand()? {
            Some(inner) => Ok(Some(Expr::Within {
                cutoff,
                periodic,
                inner: Box::new(inner),
            })),
            None => {
                self.pos = save;
                Ok(None)
            }
        }
    }

    fn by_residue_rule(&mut self) -> ParseResult<Expr> {
        let save = self.pos;
        if !(self.accept(&Token::By) && self.accept(&Token::Residue)) {
            self.pos = save;
            return Ok(None);
        }
        match self.logical_operand()? {
            Some(e) => Ok(Some(Expr::ByResidue(Box::new(e)))),
            None => {
                self.pos = save;
                Ok(None)
            }
        }
    }

    fn periodic_flag(&mut self) -> bool {
        if let Token::Periodic(flag) = self.current().token {
            self.advance();
            flag
        } else {
            false
        }
    }

    // name|resname|tag|chain (STR | REGEX | INT)+
    fn text_list(&mut self) -> ParseResult<Expr> {
        let field = match self.current().token {
            Token::Name => TextField::Name,
            Token::Resname => TextField::Resname,
            Token::Tag => TextField::Tag,
            Token::Chain => TextField::Chain,
            _ => return Ok(None),
        };
        let save = self.pos;
        self.advance();

        let mut patterns = Vec::new();
        loop {
            let tok = self.current().clone();
            let pattern = match &tok.token {
                Token::Str(s) => TextPattern::Literal(s.clone()),
                Token::Integer(_) => {
                    TextPattern::Literal(self.input[tok.span.0..tok.span.1].to_string())
                }
                Token::Regex(r) => TextPattern::regex(r).map_err(|e| {
                    SelectionError::syntax(
                        format!("Invalid regular expression '{}': {}", r, e),
                        tok.span.0,
                        self.input,
                    )
                })?,
                _ => break,
            };
            patterns.push(pattern);
            self.advance();
        }

        if patterns.is_empty() {
            self.pos = save;
            return Ok(None);
        }
        Ok(Some(Expr::TextMatch { field, patterns }))
    }

    // resid|resindex|index (INT | INT "-" INT | INT "to" INT)+
    fn int_list(&mut self) -> ParseResult<Expr> {
        let field = match self.current().token {
            Token::Resid => IntField::Resid,
            Token::Resindex => IntField::Resindex,
            Token::Index => IntField::Index,
            _ => return Ok(None),
        };
        let save = self.pos;
        self.advance();

        let mut ranges = Vec::new();
        while let Some(range) = self.int_or_range() {
            ranges.push(range);
        }

        if ranges.is_empty() {
            self.pos = save;
            return Ok(None);
        }
        Ok(Some(Expr::IntMatch { field, ranges }))
    }

    fn int_or_range(&mut self) -> Option<RangeSpec> {
        let Token::Integer(lo) = self.current().token else {
            return None;
        };
        self.advance();
        let save = self.pos;
        if matches!(self.current().token, Token::Minus | Token::To) {
            self.advance();
            if let Token::Integer(hi) = self.current().token {
                self.advance();
                return Some(RangeSpec::Range(lo, hi));
            }
            self.pos = save;
        }
        Some(RangeSpec::Single(lo))
    }

    // ------------------------------------------------------------------
    // Numeric rules
    // ------------------------------------------------------------------

    fn num_expr(&mut self) -> Option<NumExpr> {
        let mut left = self.num_term()?;
        loop {
            let save = self.pos;
            let op = match self.current().token {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            match self.num_term() {
                Some(right) => {
                    left = NumExpr::Binary {
                        op,
                        lhs: Box::new(left),
                        rhs: Box::new(right),
                    };
                }
                None => {
                    self.pos = save;
                    break;
                }
            }
        }
        Some(left)
    }

    fn num_term(&mut self) -> Option<NumExpr> {
        let mut left = self.num_factor()?;
        loop {
            let save = self.pos;
            let op = match self.current().token {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                _ => break,
            };
            self.advance();
            match self.num_factor() {
                Some(right) => {
                    left = NumExpr::Binary {
                        op,
                        lhs: Box::new(left),
                        rhs: Box::new(right),
                    };
                }
                None => {
                    self.pos = save;
                    break;
                }
            }
        }
        Some(left)
    }

    fn num_factor(&mut self) -> Option<NumExpr> {
        let save = self.pos;
        let factor = match self.current().token {
            Token::Integer(i) => {
                self.advance();
                Some(NumExpr::Literal(i as f64))
            }
            Token::Float(f) => {
                self.advance();
                Some(NumExpr::Literal(f))
            }
            Token::X => self.field(NumField::X),
            Token::Y => self.field(NumField::Y),
            Token::Z => self.field(NumField::Z),
            Token::Beta => self.field(NumField::Beta),
            Token::Occupancy => self.field(NumField::Occupancy),
            Token::LParen => {
                self.advance();
                match self.num_expr() {
                    Some(e) if self.accept(&Token::RParen) => Some(e),
                    _ => None,
                }
            }
            Token::Minus => {
                self.advance();
                self.num_factor().map(|e| NumExpr::Neg(Box::new(e)))
            }
            Token::Dist => self.distance_rule(),
            _ => None,
        };
        if factor.is_none() {
            self.pos = save;
        }
        factor
    }

    fn field(&mut self, field: NumField) -> Option<NumExpr> {
        self.advance();
        Some(NumExpr::Field(field))
    }

    // dist [periodic] point f f f | dist [periodic] vector|plane f f f f f f
    fn distance_rule(&mut self) -> Option<NumExpr> {
        self.advance();
        let periodic = self.periodic_flag();
        let kind = match self.current().token {
            Token::Point => DistanceKind::Point,
            Token::Vector => DistanceKind::Vector,
            Token::Plane => DistanceKind::Plane,
            _ => return None,
        };
        self.advance();
        let mut args = Vec::with_capacity(kind.arity());
        for _ in 0..kind.arity() {
            args.push(self.num_factor()?);
        }
        Some(NumExpr::Distance(Box::new(DistanceExpr {
            kind,
            periodic,
            args,
        })))
    }
}

/// Parse a selection expression string into an AST.
pub fn parse_selection(input: &str) -> Result<Expr, SelectionError> {
    let tokens = tokenize(input)?;
    let parser = Parser::new(tokens, input);
    parser.parse()
}
