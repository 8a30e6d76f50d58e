//! Tokens of the math expression language.

use logos::Logos;

use crate::error::ValidationError;

/// Expression token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    /// Numeric literal such as `3`, `0.5`, `.5`, or `1e-3`.
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    /// Variable or function name.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// `+`
    #[token("+")]
    Plus,
    /// `-`, binary or unary.
    #[token("-")]
    Minus,
    /// `*`
    #[token("*")]
    Star,
    /// `/`
    #[token("/")]
    Slash,
    /// `%`, floored modulo.
    #[token("%")]
    Percent,
    /// `^` and `**` are both exponentiation.
    #[token("^")]
    #[token("**")]
    Caret,
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// Argument separator.
    #[token(",")]
    Comma,
}

/// Tokenize `source`, rejecting any character outside the language.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ValidationError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(t) => tokens.push(t),
            Err(()) => {
                return Err(ValidationError::Parse {
                    input: source.to_string(),
                    reason: format!("unexpected '{}' at {}", lexer.slice(), lexer.span().start),
                });
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_numbers_and_operators() {
        let tokens = tokenize("1.5*x ** .5 - 2e3").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.5),
                Token::Star,
                Token::Ident("x".into()),
                Token::Caret,
                Token::Number(0.5),
                Token::Minus,
                Token::Number(2000.0),
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = tokenize("a $ b").unwrap_err();
        assert!(matches!(err, ValidationError::Parse { .. }));
    }
}
