//! Lexer for expression text using Logos

use logos::Logos;
use std::fmt;

/// Token type for the expression surface
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("=")]
    Eq,

    /// Double-quoted string; quotes stripped, `\"` and `\\` unescaped.
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    /// Bare word: operator names, identifiers, unquoted parameter values.
    #[regex(r#"[^(),=\s"]+"#, |lex| lex.slice().to_string())]
    Bare(String),
}

fn unescape(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Eq => write!(f, "="),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Bare(s) => write!(f, "{}", s),
        }
    }
}

/// A token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

/// Tokenizes the whole input up front.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, crate::error::ParseError> {
    let mut lexer = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        let position = lexer.span().start;
        match result {
            Ok(token) => tokens.push(SpannedToken { token, position }),
            Err(()) => {
                if lexer.slice().starts_with('"') {
                    return Err(crate::error::ParseError::UnterminatedString(position));
                }
                return Err(crate::error::ParseError::InvalidToken(position));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("unique(search(logs), over=\"a_f\")").unwrap();
        let kinds: Vec<&Token> = tokens.iter().map(|t| &t.token).collect();
        assert_eq!(kinds[0], &Token::Bare("unique".to_string()));
        assert_eq!(kinds[1], &Token::LParen);
        assert_eq!(kinds[2], &Token::Bare("search".to_string()));
        assert!(matches!(kinds.last().unwrap(), Token::RParen));
    }

    #[test]
    fn test_quoted_string_with_spaces() {
        let tokens = tokenize("sort=\"a_f asc, a_i desc\"").unwrap();
        assert_eq!(
            tokens[2].token,
            Token::Str("a_f asc, a_i desc".to_string())
        );
    }

    #[test]
    fn test_escaped_quote() {
        let tokens = tokenize(r#"q="hello \"world\"""#).unwrap();
        assert_eq!(tokens[2].token, Token::Str("hello \"world\"".to_string()));
    }

    #[test]
    fn test_bare_value_with_punctuation() {
        let tokens = tokenize("q=*:*").unwrap();
        assert_eq!(tokens[2].token, Token::Bare("*:*".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("q=\"oops").unwrap_err();
        assert_eq!(err, crate::error::ParseError::UnterminatedString(2));
    }
}
