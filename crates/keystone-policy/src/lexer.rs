//! Rule expression lexer.
//!
//! Splits a raw rule string into `expression` and `operator` tokens. Operators are the
//! words `and`, `or`, `not` and the grouping parentheses. Everything else is an atomic
//! expression token such as `role:admin` or `'name':%(target.role.name)s`.

use serde::{Deserialize, Serialize};

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Expression,
    Operator,
}

/// A single lexed token. Operator text keeps the case it was written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// Operator words and parentheses, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorWord {
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    /// Creates an expression token.
    pub fn expression(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Expression,
            text: text.into(),
        }
    }

    /// Creates an operator token.
    pub fn operator(text: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Operator,
            text: text.into(),
        }
    }

    pub fn is_expression(&self) -> bool {
        self.kind == TokenKind::Expression
    }

    /// Returns the operator this token stands for, if it is an operator token.
    pub fn operator_word(&self) -> Option<OperatorWord> {
        if self.kind != TokenKind::Operator {
            return None;
        }
        match self.text.as_str() {
            "(" => Some(OperatorWord::LParen),
            ")" => Some(OperatorWord::RParen),
            t if t.eq_ignore_ascii_case("and") => Some(OperatorWord::And),
            t if t.eq_ignore_ascii_case("or") => Some(OperatorWord::Or),
            t if t.eq_ignore_ascii_case("not") => Some(OperatorWord::Not),
            _ => None,
        }
    }

    /// True for `and` / `or`.
    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self.operator_word(),
            Some(OperatorWord::And) | Some(OperatorWord::Or)
        )
    }
}

const RESERVED_WORDS: [&str; 3] = ["and", "or", "not"];

/// Tokenizes a rule expression. Never fails.
pub fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c == '(' || c == ')' {
            tokens.push(Token::operator(c.to_string()));
            pos += 1;
            continue;
        }

        if let Some(null_pos) = not_null_at(&chars, pos) {
            let end = scan_expression(&chars, null_pos);
            let rest: String = chars[null_pos..end].iter().collect();
            tokens.push(Token::expression(format!("not {}", rest)));
            pos = end;
            continue;
        }

        if let Some(len) = reserved_word_at(&chars, pos) {
            tokens.push(Token::operator(chars[pos..pos + len].iter().collect::<String>()));
            pos += len;
            continue;
        }

        let end = scan_expression(&chars, pos);
        tokens.push(Token::expression(chars[pos..end].iter().collect::<String>()));
        pos = end;
    }

    tokens
}

/// Tokenizes an arbitrary JSON value. Anything but a string yields no tokens.
pub fn tokenize_value(input: &serde_json::Value) -> Vec<Token> {
    match input.as_str() {
        Some(s) => tokenize(s),
        None => Vec::new(),
    }
}

/// Length of the reserved word starting at `pos`, if one is there and properly bounded.
fn reserved_word_at(chars: &[char], pos: usize) -> Option<usize> {
    RESERVED_WORDS.iter().find_map(|word| {
        let len = word.len();
        if pos + len > chars.len() {
            return None;
        }
        let matches = chars[pos..pos + len]
            .iter()
            .zip(word.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b));
        if !matches {
            return None;
        }
        match chars.get(pos + len) {
            None => Some(len),
            Some(next) if next.is_whitespace() || *next == '(' || *next == ')' => Some(len),
            Some(_) => None,
        }
    })
}

/// Start of `null:` when `pos` begins the `not null:<path>` leaf form.
///
/// The gap between `not` and `null:` may be any run of whitespace; the token text is
/// normalized to a single space.
fn not_null_at(chars: &[char], pos: usize) -> Option<usize> {
    const NOT: [char; 3] = ['n', 'o', 't'];
    const NULL: [char; 5] = ['n', 'u', 'l', 'l', ':'];

    if chars.get(pos..pos + NOT.len())? != NOT {
        return None;
    }
    let mut cursor = pos + NOT.len();
    let gap_start = cursor;
    while chars.get(cursor).is_some_and(|c| c.is_whitespace()) {
        cursor += 1;
    }
    if cursor == gap_start || chars.get(cursor..cursor + NULL.len())? != NULL {
        return None;
    }
    Some(cursor)
}

/// Returns the end index (exclusive) of the expression token starting at `start`.
///
/// Quoted spans and nested parenthesis runs are consumed whole, so `%(path)s` and
/// `'a b':%(x)s` stay atomic. An unterminated quote swallows the rest of the input.
fn scan_expression(chars: &[char], start: usize) -> usize {
    let mut pos = start;
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    while pos < chars.len() {
        let c = chars[pos];

        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            pos += 1;
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            c if c.is_whitespace() && depth == 0 => break,
            _ => {}
        }
        pos += 1;
    }

    pos
}
