//! Parser and evaluator for the arithmetic formulas used in unit conversions.
//!
//! A formula is written over the single free variable `x` and may only use numeric literals,
//! parentheses, unary minus and the binary operators `+ - * / %`. Anything else is rejected
//! while parsing, so a [`Formula`] that exists is always safe to evaluate.

use std::fmt;
use std::str::FromStr;

use ndarray::{ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{AtmExpError, AtmExpResult};

/// Name of the free variable substituted with the raw value.
pub const FREE_VARIABLE: &str = "x";

/// Longest formula accepted, in tokens. Bounds the height of every expression tree.
const MAX_TOKENS: usize = 512;

/// Deepest nesting of parentheses and unary minus accepted.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            // Floored modulo: the result takes the sign of the divisor
            BinaryOp::Mod => {
                let r = lhs % rhs;
                if r != 0.0 && (r < 0.0) != (rhs < 0.0) {
                    r + rhs
                } else {
                    r
                }
            }
        }
    }
}

/// Expression tree restricted to the formula grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable,
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Expr::Literal(value) => *value,
            Expr::Variable => x,
            Expr::Neg(inner) => -inner.eval(x),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(x), rhs.eval(x)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Variable,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn malformed(formula: &str, reason: impl fmt::Display) -> AtmExpError {
    AtmExpError::MalformedExpression(format!("'{formula}': {reason}"))
}

fn tokenize(formula: &str) -> AtmExpResult<Vec<Token>> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = vec![];
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part, only consumed when followed by digits
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| malformed(formula, format!("invalid number '{literal}'")))?;
                tokens.push(Token::Number(value));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if ident != FREE_VARIABLE {
                    return Err(malformed(formula, format!("unknown identifier '{ident}'")));
                }
                tokens.push(Token::Variable);
                continue;
            }
            other => return Err(malformed(formula, format!("unexpected character '{other}'"))),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

/// Recursive descent over the token stream with standard precedence.
struct Parser<'a> {
    formula: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> AtmExpResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(malformed(
                self.formula,
                format!("nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        Ok(())
    }

    fn expr(&mut self) -> AtmExpResult<Expr> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(BinaryOp::Add),
            Some(Token::Minus) => Some(BinaryOp::Sub),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> AtmExpResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(BinaryOp::Mul),
            Some(Token::Slash) => Some(BinaryOp::Div),
            Some(Token::Percent) => Some(BinaryOp::Mod),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> AtmExpResult<Expr> {
        if self.peek() == Some(Token::Minus) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> AtmExpResult<Expr> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value)),
            Some(Token::Variable) => Ok(Expr::Variable),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(malformed(self.formula, "unbalanced parentheses")),
                }
            }
            Some(token) => Err(malformed(
                self.formula,
                format!("unexpected token {token:?}"),
            )),
            None => Err(malformed(self.formula, "unexpected end of input")),
        }
    }
}

/// Parses a formula into an expression tree, rejecting unconsumed input.
pub fn parse(formula: &str) -> AtmExpResult<Expr> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err(malformed(formula, "empty expression"));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(malformed(formula, format!("longer than {MAX_TOKENS} tokens")));
    }
    let mut parser = Parser {
        formula,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(malformed(formula, format!("trailing token {token:?}")));
    }
    Ok(expr)
}

/// A parsed conversion formula, kept alongside its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.expr.eval(x)
    }

    /// Evaluates the formula element-wise, preserving the array's shape.
    pub fn eval_array<S, D>(&self, x: &ArrayBase<S, D>) -> ndarray::Array<f64, D>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        x.mapv(|value| self.expr.eval(value))
    }
}

impl FromStr for Formula {
    type Err = AtmExpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Formula {
            source: s.to_string(),
            expr: parse(s)?,
        })
    }
}

impl TryFrom<String> for Formula {
    type Error = AtmExpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Formula> for String {
    fn from(value: Formula) -> Self {
        value.source
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Parses and evaluates `formula` for a single value.
pub fn evaluate(formula: &str, x: f64) -> AtmExpResult<f64> {
    Ok(formula.parse::<Formula>()?.eval(x))
}

/// Parses and evaluates `formula` over every element of `x`.
pub fn evaluate_array<S, D>(
    formula: &str,
    x: &ArrayBase<S, D>,
) -> AtmExpResult<ndarray::Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    Ok(formula.parse::<Formula>()?.eval_array(x))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn assert_malformed(formula: &str) {
        let result = evaluate(formula, 1.0);
        assert!(
            matches!(result, Err(AtmExpError::MalformedExpression(_))),
            "'{formula}' should be rejected, got {result:?}"
        );
    }

    #[test]
    fn whitelisted_operators_should_evaluate() {
        assert_eq!(evaluate("x + 1", 2.0).unwrap(), 3.0);
        assert_eq!(evaluate("x - 1", 2.0).unwrap(), 1.0);
        assert_eq!(evaluate("x * 46698", 2.0).unwrap(), 93396.0);
        assert_eq!(evaluate("x / 4", 2.0).unwrap(), 0.5);
        assert_eq!(evaluate("x % 3", 7.0).unwrap(), 1.0);
        assert_eq!(evaluate("-x", 2.0).unwrap(), -2.0);
        assert_eq!(evaluate("--x", 2.0).unwrap(), 2.0);
    }

    #[test]
    fn pathological_formulas_should_be_rejected() {
        assert_malformed(&format!("{}x{}", "(".repeat(10_000), ")".repeat(10_000)));
        assert_malformed(&format!("{}x{}", "(".repeat(100), ")".repeat(100)));
        assert_malformed(&format!("{}x", "-".repeat(100)));
        assert_malformed(&vec!["x"; 1_000].join(" + "));
        let nested = format!("{}x{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(evaluate(&nested, 2.0).unwrap(), 2.0);
        assert_eq!(evaluate(&format!("{}x", "-".repeat(MAX_DEPTH)), 2.0).unwrap(), 2.0);
    }

    #[test]
    fn precedence_and_associativity_should_be_standard() {
        assert_eq!(evaluate("1 + 2 * x", 3.0).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * x", 3.0).unwrap(), 9.0);
        assert_eq!(evaluate("x - 1 - 1", 3.0).unwrap(), 1.0);
        assert_eq!(evaluate("x / 2 / 2", 8.0).unwrap(), 2.0);
        assert_eq!(evaluate("-x * 2", 3.0).unwrap(), -6.0);
        assert_eq!(evaluate("2 * -x", 3.0).unwrap(), -6.0);
    }

    #[test]
    fn literals_should_accept_decimals_and_exponents() {
        assert_eq!(evaluate("x * 1e6", 2.0).unwrap(), 2e6);
        assert_eq!(evaluate("x * 2.5E-3", 2.0).unwrap(), 5e-3);
        assert_eq!(evaluate(".5 * x", 2.0).unwrap(), 1.0);
        let xco2 = evaluate("x * 28.97 / 44.01 * 1e6", 1.0).unwrap();
        assert!((xco2 - 28.97 / 44.01 * 1e6).abs() < 1e-6);
    }

    #[test]
    fn modulo_should_take_the_sign_of_the_divisor() {
        assert_eq!(evaluate("x % 3", -1.0).unwrap(), 2.0);
        assert_eq!(evaluate("x % -3", 1.0).unwrap(), -2.0);
        assert_eq!(evaluate("x % -3", -1.0).unwrap(), -1.0);
        assert_eq!(evaluate("x % 360", 370.0).unwrap(), 10.0);
    }

    #[test]
    fn division_by_zero_should_follow_ieee() {
        assert_eq!(evaluate("x / 0", 1.0).unwrap(), f64::INFINITY);
        assert!(evaluate("x / 0", 0.0).unwrap().is_nan());
    }

    #[test]
    fn code_injection_should_not_parse() {
        assert_malformed("__import__('os')");
        assert_malformed("__import__('os').system('ls')");
        assert_malformed("exec(x)");
        assert_malformed("y + 1");
        assert_malformed("x ** 2");
        assert_malformed("x ^ 2");
        assert_malformed("x.real");
        assert_malformed("[x]");
    }

    #[test]
    fn partial_expressions_should_not_parse() {
        assert_malformed("");
        assert_malformed("   ");
        assert_malformed("x +");
        assert_malformed("(x + 1");
        assert_malformed("x + 1)");
        assert_malformed("x 1");
        assert_malformed("1.2.3 * x");
        assert_malformed("x * 1e");
    }

    #[test]
    fn evaluation_should_be_deterministic() {
        let formula: Formula = "(x + 273.15) * 1.8 % 7 - -2".parse().unwrap();
        for x in [-10.0, 0.0, 0.1, 42.0, 1e12] {
            let first = formula.eval(x);
            for _ in 0..10 {
                assert_eq!(formula.eval(x).to_bits(), first.to_bits());
            }
            assert_eq!(
                evaluate(formula.source(), x).unwrap().to_bits(),
                first.to_bits()
            );
        }
    }

    #[test]
    fn arrays_should_be_evaluated_element_wise() {
        let x = array![[1.0, 2.0], [3.0, f64::NAN]];
        let y = evaluate_array("x * 2 + 1", &x).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y[[0, 0]], 3.0);
        assert_eq!(y[[1, 0]], 7.0);
        assert!(y[[1, 1]].is_nan());
    }

    #[test]
    fn formula_should_deserialize_from_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            formula: Formula,
        }
        let parsed: Wrapper = serde_json::from_str(r#"{"formula": "x * 2"}"#).unwrap();
        assert_eq!(parsed.formula.eval(2.0), 4.0);
        assert_eq!(parsed.formula.to_string(), "x * 2");
        let rejected = serde_json::from_str::<Wrapper>(r#"{"formula": "os.system(x)"}"#);
        assert!(rejected.is_err());
    }
}
