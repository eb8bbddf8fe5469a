//! Recursive-descent parser from tokens to `ExprNode` trees

use crate::error::{ParseError, ParseResult};
use crate::lexer::{tokenize, SpannedToken, Token};
use rill_core::{ExprArg, ExprNode, ParamValue};

/// Parses one complete expression; trailing input is an error.
pub fn parse(input: &str) -> ParseResult<ExprNode> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.expression()?;
    if let Some(t) = parser.peek() {
        return Err(ParseError::TrailingInput(t.position));
    }
    Ok(node)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&SpannedToken> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token, what: &str) -> ParseResult<()> {
        match self.advance() {
            Some(t) if &t.token == expected => Ok(()),
            Some(t) => Err(ParseError::UnexpectedToken {
                position: t.position,
                expected: what.to_string(),
                found: t.token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    /// expression := bare '(' args? ')'
    fn expression(&mut self) -> ParseResult<ExprNode> {
        let name = match self.advance() {
            Some(SpannedToken {
                token: Token::Bare(name),
                ..
            }) => name,
            Some(t) => {
                return Err(ParseError::UnexpectedToken {
                    position: t.position,
                    expected: "operator name".to_string(),
                    found: t.token.to_string(),
                })
            }
            None => return Err(ParseError::UnexpectedEof),
        };
        self.expect(&Token::LParen, "(")?;

        let mut node = ExprNode::new(name);
        loop {
            match self.peek() {
                Some(t) if t.token == Token::RParen => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    self.argument(&mut node)?;
                    // separator or close; trailing commas are accepted
                    match self.peek() {
                        Some(t) if t.token == Token::Comma => {
                            self.advance();
                        }
                        Some(t) if t.token == Token::RParen => {}
                        Some(t) => {
                            return Err(ParseError::UnexpectedToken {
                                position: t.position,
                                expected: ", or )".to_string(),
                                found: t.token.to_string(),
                            })
                        }
                        None => return Err(ParseError::UnexpectedEof),
                    }
                }
                None => return Err(ParseError::UnexpectedEof),
            }
        }
        Ok(node)
    }

    /// argument := bare '=' value | expression | bare | string
    fn argument(&mut self, node: &mut ExprNode) -> ParseResult<()> {
        let is_bare = matches!(
            self.peek(),
            Some(SpannedToken {
                token: Token::Bare(_),
                ..
            })
        );
        if is_bare {
            match self.peek_at(1).map(|t| &t.token) {
                Some(Token::Eq) => {
                    let key = match self.advance() {
                        Some(SpannedToken {
                            token: Token::Bare(k),
                            ..
                        }) => k,
                        _ => unreachable!("peeked bare token"),
                    };
                    self.advance(); // '='
                    self.named_value(node, key)?;
                    return Ok(());
                }
                Some(Token::LParen) => {
                    let nested = self.expression()?;
                    node.args.push(ExprArg::Expr(nested));
                    return Ok(());
                }
                _ => {
                    if let Some(SpannedToken {
                        token: Token::Bare(ident),
                        ..
                    }) = self.advance()
                    {
                        // adjacent bare words form one argument
                        // ("join1_i as join1"), unless the next word
                        // starts a nested call or a named parameter
                        let mut words = ident;
                        while let Some(SpannedToken {
                            token: Token::Bare(_),
                            ..
                        }) = self.peek()
                        {
                            match self.peek_at(1).map(|t| &t.token) {
                                Some(Token::LParen) | Some(Token::Eq) => break,
                                _ => {}
                            }
                            if let Some(SpannedToken {
                                token: Token::Bare(next),
                                ..
                            }) = self.advance()
                            {
                                words.push(' ');
                                words.push_str(&next);
                            }
                        }
                        node.args.push(ExprArg::Ident(words));
                    }
                    return Ok(());
                }
            }
        }
        match self.advance() {
            Some(SpannedToken {
                token: Token::Str(s),
                ..
            }) => {
                node.args.push(ExprArg::Ident(s));
                Ok(())
            }
            Some(t) => Err(ParseError::UnexpectedToken {
                position: t.position,
                expected: "argument".to_string(),
                found: t.token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }

    /// value := string | expression | bare
    fn named_value(&mut self, node: &mut ExprNode, key: String) -> ParseResult<()> {
        match self.peek() {
            Some(SpannedToken {
                token: Token::Str(_),
                ..
            }) => {
                if let Some(SpannedToken {
                    token: Token::Str(s),
                    ..
                }) = self.advance()
                {
                    node.params.insert(key, ParamValue::Str(s));
                }
                Ok(())
            }
            Some(SpannedToken {
                token: Token::Bare(_),
                ..
            }) => {
                // a bare word followed by '(' is a nested expression value
                if matches!(self.peek_at(1).map(|t| &t.token), Some(Token::LParen)) {
                    let nested = self.expression()?;
                    node.params.insert(key, ParamValue::Expr(nested));
                } else if let Some(SpannedToken {
                    token: Token::Bare(s),
                    ..
                }) = self.advance()
                {
                    node.params.insert(key, ParamValue::Str(s));
                }
                Ok(())
            }
            Some(t) => Err(ParseError::UnexpectedToken {
                position: t.position,
                expected: "parameter value".to_string(),
                found: t.token.to_string(),
            }),
            None => Err(ParseError::UnexpectedEof),
        }
    }
}
