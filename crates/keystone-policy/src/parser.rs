//! Recursive-descent parser for rule expressions.
//!
//! Grammar, tightest binding first:
//!
//! ```text
//! primary  := expression | '(' or_expr ')'
//! not_expr := 'not' not_expr | primary
//! and_expr := not_expr ('and' and_expr)?
//! or_expr  := and_expr ('or' or_expr)?
//! ```
//!
//! `and` and `or` are right-associative. Structural checks on the raw token list run
//! before descent so malformed input fails with a fixed message.

use crate::ast::{CompiledRule, Node};
use crate::lexer::{tokenize, OperatorWord, Token};
use thiserror::Error;

/// Structural or grammatical problems in a token list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("PARSE ERROR: tokens must not be empty")]
    Empty,

    #[error("PARSE ERROR: tokens must not begin with 'and' or 'or'")]
    LeadingBinaryOperator,

    #[error("PARSE ERROR: tokens must not end with 'and', 'or' or 'not'")]
    TrailingOperator,

    #[error("PARSE ERROR: tokens must not contain two 'and'/'or' operators in a row")]
    ConsecutiveOperators,

    #[error("PARSE ERROR: tokens must not contain two expressions in a row")]
    ConsecutiveExpressions,

    #[error("PARSE ERROR: unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("PARSE ERROR: unexpected token '{0}' after end of expression")]
    TrailingTokens(String),

    #[error("PARSE ERROR: expected an expression or '(' but found {0}")]
    ExpectedPrimary(String),
}

/// Parses a token list into a compiled rule.
pub fn parse(tokens: &[Token]) -> Result<CompiledRule, ParseError> {
    validate_structure(tokens)?;

    if let [single] = tokens {
        if single.is_expression() {
            return Ok(CompiledRule::new(Node::expression(single.text.clone())));
        }
    }

    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ParseError::TrailingTokens(extra.text.clone()));
    }
    Ok(CompiledRule::new(ast))
}

/// Lexes and parses a rule string.
pub fn compile(expression: &str) -> Result<CompiledRule, ParseError> {
    parse(&tokenize(expression))
}

fn validate_structure(tokens: &[Token]) -> Result<(), ParseError> {
    let (first, last) = match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(ParseError::Empty),
    };

    if first.is_binary_operator() {
        return Err(ParseError::LeadingBinaryOperator);
    }
    if last.is_binary_operator() || last.operator_word() == Some(OperatorWord::Not) {
        return Err(ParseError::TrailingOperator);
    }

    for pair in tokens.windows(2) {
        if pair[0].is_binary_operator() && pair[1].is_binary_operator() {
            return Err(ParseError::ConsecutiveOperators);
        }
        if pair[0].is_expression() && pair[1].is_expression() {
            return Err(ParseError::ConsecutiveExpressions);
        }
    }

    let mut depth: i64 = 0;
    for token in tokens {
        match token.operator_word() {
            Some(OperatorWord::LParen) => depth += 1,
            Some(OperatorWord::RParen) => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError::UnbalancedParentheses);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::UnbalancedParentheses);
    }

    Ok(())
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_operator(&self) -> Option<OperatorWord> {
        self.peek().and_then(Token::operator_word)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_and()?;
        if self.peek_operator() == Some(OperatorWord::Or) {
            self.advance();
            let right = self.parse_or()?;
            return Ok(Node::or(left, right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let left = self.parse_not()?;
        if self.peek_operator() == Some(OperatorWord::And) {
            self.advance();
            let right = self.parse_and()?;
            return Ok(Node::and(left, right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Node, ParseError> {
        if self.peek_operator() == Some(OperatorWord::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Node::not(operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.advance() {
            Some(token) if token.is_expression() => Ok(Node::expression(token.text.clone())),
            Some(token) if token.operator_word() == Some(OperatorWord::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(close) if close.operator_word() == Some(OperatorWord::RParen) => {
                        Ok(inner)
                    }
                    _ => Err(ParseError::UnbalancedParentheses),
                }
            }
            Some(token) => Err(ParseError::ExpectedPrimary(format!("'{}'", token.text))),
            None => Err(ParseError::ExpectedPrimary("end of input".to_string())),
        }
    }
}
