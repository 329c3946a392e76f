//! Compiled boolean guards over mine and dock cells.
//!
//! A [`Need`] is an immutable expression text compiled once into an
//! expression tree and evaluated without side effects against a bound mine
//! and optional dock. Cells are read through single-letter aliases:
//! `M.<key>.value` reads a mine bag's value (`.tyme` reads its stamp) and
//! `D.` reads the dock. Literals are integers, floats, single-quoted
//! strings, `true`, `false` and `null`; comparisons `== != < <= > >=`
//! combine with `and`, `or`, `not` and parentheses.
//!
//! # Examples
//!
//! ```
//! use boxwork::hier::{Mine, Need};
//!
//! let mut mine = Mine::new();
//! mine.put("cycle", 3i64).unwrap();
//!
//! let need = Need::new("M.cycle.value >= 3").unwrap();
//! assert!(need.eval(&mine, None));
//!
//! mine.put("cycle", 1i64).unwrap();
//! assert!(!need.eval(&mine, None));
//! ```

use crate::{Error, Result};

use super::bagging::{validate_name, Dock, Mine, Val};

/// Which part of a bag a cell term reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Value,
    Tyme,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug)]
enum Expr {
    Lit(Val),
    Cell { dock: bool, key: String, field: Field },
    Cmp { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Real(f64),
    Text(String),
    Op(CmpOp),
    Dot,
    Open,
    Close,
}

fn scan(text: &str) -> Result<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut at = 0;
    let bad = |what: &str| Error::Validation(format!("need expression: {what} in {text:?}"));
    while at < bytes.len() {
        let c = bytes[at];
        match c {
            b' ' | b'\t' | b'\n' => at += 1,
            b'(' => {
                tokens.push(Token::Open);
                at += 1;
            }
            b')' => {
                tokens.push(Token::Close);
                at += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                at += 1;
            }
            b'=' | b'!' | b'<' | b'>' => {
                let two = bytes.get(at + 1) == Some(&b'=');
                let op = match (c, two) {
                    (b'=', true) => CmpOp::Eq,
                    (b'!', true) => CmpOp::Ne,
                    (b'<', true) => CmpOp::Le,
                    (b'>', true) => CmpOp::Ge,
                    (b'<', false) => CmpOp::Lt,
                    (b'>', false) => CmpOp::Gt,
                    _ => return Err(bad("stray '='")),
                };
                tokens.push(Token::Op(op));
                at += if two { 2 } else { 1 };
            }
            b'\'' => {
                let start = at + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&b| b == b'\'')
                    .ok_or_else(|| bad("unterminated string"))?;
                tokens.push(Token::Text(text[start..start + end].to_string()));
                at = start + end + 1;
            }
            b'-' | b'0'..=b'9' => {
                let start = at;
                at += 1;
                let mut real = false;
                while at < bytes.len() && (bytes[at].is_ascii_digit() || bytes[at] == b'.') {
                    // A dot only joins the number when digits follow; otherwise
                    // it is a field separator, which cannot follow a literal.
                    if bytes[at] == b'.' {
                        if real || !bytes.get(at + 1).is_some_and(u8::is_ascii_digit) {
                            break;
                        }
                        real = true;
                    }
                    at += 1;
                }
                let lex = &text[start..at];
                if real {
                    tokens.push(Token::Real(
                        lex.parse().map_err(|_| bad("unreadable number"))?,
                    ));
                } else {
                    tokens.push(Token::Int(
                        lex.parse().map_err(|_| bad("unreadable number"))?,
                    ));
                }
            }
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => {
                let start = at;
                while at < bytes.len()
                    && (bytes[at].is_ascii_alphanumeric() || bytes[at] == b'_')
                {
                    at += 1;
                }
                tokens.push(Token::Ident(text[start..at].to_string()));
            }
            _ => return Err(bad("unexpected character")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    at: usize,
}

impl<'a> Parser<'a> {
    fn bad(&self, what: &str) -> Error {
        Error::Validation(format!("need expression: {what} in {:?}", self.text))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.conjunction()?];
        while self.keyword("or") {
            terms.push(self.conjunction()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("one term")
        } else {
            Expr::Or(terms)
        })
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut terms = vec![self.negation()?];
        while self.keyword("and") {
            terms.push(self.negation()?);
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("one term")
        } else {
            Expr::And(terms)
        })
    }

    fn negation(&mut self) -> Result<Expr> {
        if self.keyword("not") {
            Ok(Expr::Not(Box::new(self.negation()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let lhs = self.primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.at += 1;
            let rhs = self.primary()?;
            Ok(Expr::Cmp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
        } else {
            Ok(lhs)
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next().ok_or_else(|| self.bad("truncated"))? {
            Token::Open => {
                let inner = self.expr()?;
                if !self.eat(&Token::Close) {
                    return Err(self.bad("missing ')'"));
                }
                Ok(inner)
            }
            Token::Int(n) => Ok(Expr::Lit(Val::Int(n))),
            Token::Real(x) => Ok(Expr::Lit(Val::Real(x))),
            Token::Text(s) => Ok(Expr::Lit(Val::Text(s))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Lit(Val::Bool(true))),
                "false" => Ok(Expr::Lit(Val::Bool(false))),
                "null" => Ok(Expr::Lit(Val::Null)),
                "M" => self.cell(false),
                "D" => self.cell(true),
                _ => Err(self.bad("unknown word")),
            },
            _ => Err(self.bad("unexpected token")),
        }
    }

    /// Parses `.part(.part)*.field` after an `M` or `D` alias; the final
    /// component selects the bag field.
    fn cell(&mut self, dock: bool) -> Result<Expr> {
        let mut parts = Vec::new();
        while self.eat(&Token::Dot) {
            match self.next() {
                Some(Token::Ident(part)) => parts.push(part),
                _ => return Err(self.bad("dangling '.'")),
            }
        }
        let field = match parts.pop().as_deref() {
            Some("value") => Field::Value,
            Some("tyme") => Field::Tyme,
            _ => return Err(self.bad("cell must end in .value or .tyme")),
        };
        if parts.is_empty() {
            return Err(self.bad("cell missing key"));
        }
        for part in parts.iter() {
            validate_name(part)?;
        }
        Ok(Expr::Cell { dock, key: parts.join("."), field })
    }
}

impl Expr {
    fn value(&self, mine: &Mine, dock: Option<&Dock>) -> Val {
        match self {
            Expr::Lit(val) => val.clone(),
            Expr::Cell { dock: in_dock, key, field } => {
                let bag = if *in_dock {
                    dock.and_then(|dock| dock.get(key))
                } else {
                    mine.get(key)
                };
                match (bag, field) {
                    (Some(bag), Field::Value) => bag.value().clone(),
                    (Some(bag), Field::Tyme) => {
                        bag.tyme().map(Val::Real).unwrap_or(Val::Null)
                    }
                    (None, _) => Val::Null,
                }
            }
            _ => Val::Bool(self.truth(mine, dock)),
        }
    }

    fn truth(&self, mine: &Mine, dock: Option<&Dock>) -> bool {
        match self {
            Expr::Cmp { op, lhs, rhs } => {
                let lhs = lhs.value(mine, dock);
                let rhs = rhs.value(mine, dock);
                match op {
                    CmpOp::Eq => lhs == rhs,
                    CmpOp::Ne => lhs != rhs,
                    CmpOp::Lt => lhs < rhs,
                    CmpOp::Le => lhs <= rhs,
                    CmpOp::Gt => lhs > rhs,
                    CmpOp::Ge => lhs >= rhs,
                }
            }
            Expr::And(terms) => terms.iter().all(|term| term.truth(mine, dock)),
            Expr::Or(terms) => terms.iter().any(|term| term.truth(mine, dock)),
            Expr::Not(term) => !term.truth(mine, dock),
            _ => self.value(mine, dock).truthy(),
        }
    }
}

/// An immutable guard expression with its cached compiled form.
///
/// Compilation happens at construction, so a malformed expression surfaces
/// as a validation error to the caller building the box work, never at run
/// tyme. Evaluation is pure.
#[derive(Clone, Debug)]
pub struct Need {
    expr: String,
    compiled: Expr,
}

impl Need {
    /// Compiles an expression; empty text compiles to the constant true.
    pub fn new(expr: &str) -> Result<Self> {
        let compiled = if expr.trim().is_empty() {
            Expr::Lit(Val::Bool(true))
        } else {
            let tokens = scan(expr)?;
            let mut parser = Parser { text: expr, tokens, at: 0 };
            let compiled = parser.expr()?;
            if parser.at != parser.tokens.len() {
                return Err(parser.bad("trailing tokens"));
            }
            compiled
        };
        Ok(Self { expr: expr.to_string(), compiled })
    }

    /// The always-true guard.
    pub fn always() -> Self {
        Self { expr: String::new(), compiled: Expr::Lit(Val::Bool(true)) }
    }

    /// The source expression text.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Evaluates the guard against the bound cells, without side effects.
    pub fn eval(&self, mine: &Mine, dock: Option<&Dock>) -> bool {
        self.compiled.truth(mine, dock)
    }
}

impl Default for Need {
    fn default() -> Self {
        Self::always()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mine() -> Mine {
        let mut mine = Mine::new();
        mine.put("cycle", 3i64).unwrap();
        mine.put("mode", "busy").unwrap();
        mine.put("ok", true).unwrap();
        mine
    }

    #[test]
    fn empty_is_always_true() {
        let mine = mine();
        assert!(Need::new("").unwrap().eval(&mine, None));
        assert!(Need::always().eval(&mine, None));
        assert_eq!(Need::default().expr(), "");
    }

    #[test]
    fn guard_flips_with_cell() {
        let mut mine = mine();
        let need = Need::new("M.cycle.value >= 3").unwrap();
        assert!(need.eval(&mine, None));
        mine.put("cycle", 1i64).unwrap();
        assert!(!need.eval(&mine, None));
    }

    #[test]
    fn full_grammar() {
        let mine = mine();
        for (expr, want) in [
            ("M.cycle.value == 3", true),
            ("M.cycle.value == 3.0", true),
            ("M.cycle.value != 'three'", true),
            ("M.mode.value == 'busy'", true),
            ("M.ok.value", true),
            ("not M.ok.value", false),
            ("M.cycle.value > 2 and M.mode.value == 'busy'", true),
            ("M.cycle.value > 5 or M.ok.value", true),
            ("not (M.cycle.value < 2) and true", true),
            ("M.gone.value == null", true),
            ("M.gone.value", false),
            ("M.cycle.tyme == null", true),
            ("-2 < M.cycle.value", true),
            ("false", false),
        ] {
            let need = Need::new(expr).unwrap();
            assert_eq!(need.eval(&mine, None), want, "{expr}");
        }
    }

    #[test]
    fn stamped_tyme_reads() {
        use boxwork_tyme::{Tymee, Tymist};
        let mut tymist = Tymist::new(1.0);
        let mut mine = Mine::new();
        mine.wind(tymist.tymen());
        tymist.tick();
        mine.put("cycle", 1i64).unwrap();
        assert!(Need::new("M.cycle.tyme >= 1.0").unwrap().eval(&mine, None));
    }

    #[test]
    fn dock_alias_reads_dock() {
        let dir = tempfile::tempdir().unwrap();
        let mut dock = Dock::open(dir.path()).unwrap();
        dock.put("seen", 7i64).unwrap();
        let mine = Mine::new();
        let need = Need::new("D.seen.value == 7").unwrap();
        assert!(need.eval(&mine, Some(&dock)));
        assert!(!need.eval(&mine, None));
    }

    #[test]
    fn malformed_expressions_err() {
        for expr in [
            "M.cycle",            // missing field
            "M.cycle.count",      // unknown field
            "M..value",           // empty component
            "cycle >= 3",         // bare word
            "M.cycle.value >=",   // truncated
            "M.cycle.value = 3",  // single '='
            "(M.ok.value",        // unbalanced
            "'open",              // unterminated string
            "M.cycle.value ~ 3",  // stray character
            "3 3",                // trailing tokens
        ] {
            assert!(Need::new(expr).is_err(), "{expr}");
        }
    }
}
