//! Pratt parser for math expressions.

use super::functions::{FunctionRegistry, MathFn};
use super::lexer::{tokenize, Token};
use crate::error::ValidationError;

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Floored modulo.
    Rem,
    Pow,
}

impl BinaryOp {
    /// Apply the operator.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            // floored modulo: the result takes the sign of the divisor
            Self::Rem => lhs - rhs * (lhs / rhs).floor(),
            Self::Pow => lhs.powf(rhs),
        }
    }
}

/// Parsed expression tree. Function calls are bound to their implementation.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal.
    Number(f64),
    /// Reference to another node.
    Var(String),
    /// Unary minus.
    Neg(Box<Expr>),
    /// Infix operation.
    #[allow(missing_docs)]
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Call of a registered function.
    #[allow(missing_docs)]
    Call {
        name: String,
        func: MathFn,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

const POW_PREC: u8 = 60;

/// Returns (precedence, associativity, op) where higher precedence binds tighter.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::Plus => Some((40, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinaryOp::Div)),
        Token::Percent => Some((50, Assoc::Left, BinaryOp::Rem)),
        Token::Caret => Some((POW_PREC, Assoc::Right, BinaryOp::Pow)),
        _ => None,
    }
}

struct TokenStream<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    functions: &'a FunctionRegistry,
}

impl TokenStream<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> ValidationError {
        ValidationError::Parse {
            input: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), ValidationError> {
        match self.advance() {
            Some(ref t) if t == want => Ok(()),
            Some(t) => Err(self.error(format!("expected {what}, found {t:?}"))),
            None => Err(self.error(format!("expected {what}, found end of input"))),
        }
    }
}

/// Parse `source` into an expression, binding calls against `functions`.
pub fn parse(source: &str, functions: &FunctionRegistry) -> Result<Expr, ValidationError> {
    let mut stream = TokenStream {
        source,
        tokens: tokenize(source)?,
        pos: 0,
        functions,
    };
    if stream.tokens.is_empty() {
        return Err(stream.error("empty expression"));
    }
    let expr = parse_pratt(&mut stream, 0)?;
    if let Some(t) = stream.peek() {
        return Err(stream.error(format!("unexpected trailing {t:?}")));
    }
    Ok(expr)
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ValidationError> {
    let mut left = parse_prefix(stream)?;

    while let Some(token) = stream.peek() {
        let Some((prec, assoc, op)) = binary_op_info(token) else {
            break;
        };
        if prec < min_prec {
            break;
        }
        stream.advance();

        let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
        let right = parse_pratt(stream, next_prec)?;
        left = Expr::Binary {
            op,
            lhs: Box::new(left),
            rhs: Box::new(right),
        };
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ValidationError> {
    match stream.peek() {
        Some(Token::Minus) => {
            stream.advance();
            // `-x^2` is `-(x^2)`
            let operand = parse_pratt(stream, POW_PREC)?;
            Ok(Expr::Neg(Box::new(operand)))
        }
        Some(Token::Plus) => {
            stream.advance();
            parse_pratt(stream, POW_PREC)
        }
        _ => parse_atom(stream),
    }
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ValidationError> {
    match stream.advance() {
        Some(Token::Number(v)) => Ok(Expr::Number(v)),
        Some(Token::Ident(name)) => {
            if matches!(stream.peek(), Some(Token::LParen)) {
                let args = parse_call_args(stream)?;
                let spec = stream
                    .functions
                    .get(&name)
                    .ok_or_else(|| ValidationError::UnknownFunction { name: name.clone() })?;
                spec.arity.check(&name, args.len())?;
                Ok(Expr::Call {
                    name,
                    func: spec.func,
                    args,
                })
            } else {
                Ok(Expr::Var(name))
            }
        }
        Some(Token::LParen) => {
            let inner = parse_pratt(stream, 0)?;
            stream.expect(&Token::RParen, "')'")?;
            Ok(inner)
        }
        Some(t) => Err(stream.error(format!("unexpected {t:?}"))),
        None => Err(stream.error("unexpected end of input")),
    }
}

fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ValidationError> {
    stream.expect(&Token::LParen, "'('")?;
    let mut args = Vec::new();
    if matches!(stream.peek(), Some(Token::RParen)) {
        stream.advance();
        return Ok(args);
    }
    loop {
        args.push(parse_pratt(stream, 0)?);
        match stream.advance() {
            Some(Token::Comma) => {}
            Some(Token::RParen) => return Ok(args),
            Some(t) => return Err(stream.error(format!("expected ',' or ')', found {t:?}"))),
            None => return Err(stream.error("unclosed argument list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_const(source: &str) -> f64 {
        fn go(e: &Expr) -> f64 {
            match e {
                Expr::Number(v) => *v,
                Expr::Var(_) => panic!("unexpected variable"),
                Expr::Neg(inner) => -go(inner),
                Expr::Binary { op, lhs, rhs } => op.apply(go(lhs), go(rhs)),
                Expr::Call { func, args, .. } => {
                    let vals: Vec<f64> = args.iter().map(go).collect();
                    func(&vals)
                }
            }
        }
        go(&parse(source, &FunctionRegistry::standard()).unwrap())
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval_const("1 + 2 * 3"), 7.0);
        assert_eq!(eval_const("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_const("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval_const("2 ** 3"), 8.0);
        assert_eq!(eval_const("10 - 4 - 3"), 3.0);
        assert_eq!(eval_const("-2 ^ 2"), -4.0);
        assert_eq!(eval_const("7 % 4"), 3.0);
    }

    #[test]
    fn calls_bind_to_registry() {
        assert_eq!(eval_const("max(1, 5, 3)"), 5.0);
        assert_eq!(eval_const("pow(2, 10)"), 1024.0);
        assert!((eval_const("exp(log(3))") - 3.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = parse("foo(1)", &FunctionRegistry::standard()).unwrap_err();
        assert_eq!(err, ValidationError::UnknownFunction { name: "foo".into() });
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = parse("exp(1, 2)", &FunctionRegistry::standard()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidArity { actual: 2, .. }));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let fns = FunctionRegistry::standard();
        assert!(parse("", &fns).is_err());
        assert!(parse("1 +", &fns).is_err());
        assert!(parse("(1 + 2", &fns).is_err());
        assert!(parse("1 2", &fns).is_err());
    }
}
