//! Query language lexer.
//!
//! Tokenizes filter expressions and migration statements. Keywords are
//! case-insensitive; every token records the character offset it starts at
//! so syntax errors can point into the source text.
//!
//! ```text
//! status in ('new', 'open') and (price >= 10.5 or created > '2020-01-01'::date)
//! ```

use std::fmt;

use crate::error::DictError;

/// Token kinds of the query language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Not,
    In,
    Like,
    Ilike,
    All,
    Any,
    True,
    False,
    Null,

    // Literals
    Identifier(String),
    String(String),
    Integer(i64),
    Decimal(f64),

    // Operators
    Eq,       // =
    Neq,      // != or <>
    Lt,       // <
    Leq,      // <=
    Gt,       // >
    Geq,      // >=
    Minus,    // -
    Dot,      // .
    Comma,    // ,
    Semicolon, // ;
    Cast,     // ::

    // Brackets
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "identifier '{}'", name),
            TokenKind::String(s) => write!(f, "string '{}'", s),
            TokenKind::Integer(n) => write!(f, "integer {}", n),
            TokenKind::Decimal(n) => write!(f, "decimal {}", n),
            TokenKind::Eof => write!(f, "end of input"),
            other => write!(f, "'{}'", other.symbol()),
        }
    }
}

impl TokenKind {
    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::In => "in",
            TokenKind::Like => "like",
            TokenKind::Ilike => "ilike",
            TokenKind::All => "all",
            TokenKind::Any => "any",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Eq => "=",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Leq => "<=",
            TokenKind::Gt => ">",
            TokenKind::Geq => ">=",
            TokenKind::Minus => "-",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Cast => "::",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            _ => "",
        }
    }

    /// Returns the keyword or identifier text for word-like tokens.
    ///
    /// Migration statements use plain words (`create`, `dict`, ...) that the
    /// lexer does not reserve, and also accept reserved words as names.
    pub fn word(&self) -> Option<&str> {
        match self {
            TokenKind::Identifier(name) => Some(name),
            TokenKind::And
            | TokenKind::Or
            | TokenKind::Not
            | TokenKind::In
            | TokenKind::Like
            | TokenKind::Ilike
            | TokenKind::All
            | TokenKind::Any
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null => Some(self.symbol()),
            _ => None,
        }
    }
}

/// A token with the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Character-level scanner producing [`Token`]s.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current = chars.first().copied();
        Lexer {
            input: chars,
            position: 0,
            current_char: current,
        }
    }

    /// Tokenizes the entire input; the last token is always `Eof`.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, DictError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Returns the next token.
    pub fn next_token(&mut self) -> Result<Token, DictError> {
        self.skip_whitespace_and_comments();

        let start = self.position;
        let kind = match self.current_char {
            None => TokenKind::Eof,
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.read_word(),
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some('\'') => self.read_string()?,
            Some('"') => self.read_quoted_identifier()?,
            Some(_) => self.read_operator()?,
        };
        Ok(Token {
            kind,
            position: start,
        })
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn error(&self, position: usize, message: impl Into<String>) -> DictError {
        DictError::QuerySyntax {
            position,
            message: message.into(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '-' && self.peek() == Some('-') {
                while let Some(c) = self.current_char {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_word(&mut self) -> TokenKind {
        let mut result = String::new();
        while let Some(ch) = self.current_char {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match result.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "in" => TokenKind::In,
            "like" => TokenKind::Like,
            "ilike" => TokenKind::Ilike,
            "all" => TokenKind::All,
            "any" => TokenKind::Any,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(result),
        }
    }

    fn read_number(&mut self) -> Result<TokenKind, DictError> {
        let start = self.position;
        let mut result = String::new();
        let mut is_decimal = false;

        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                result.push(ch);
                self.advance();
            } else if ch == '.' && !is_decimal && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_decimal = true;
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_decimal {
            result
                .parse::<f64>()
                .map(TokenKind::Decimal)
                .map_err(|e| self.error(start, format!("invalid decimal: {}", e)))
        } else {
            result
                .parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|e| self.error(start, format!("invalid integer: {}", e)))
        }
    }

    /// Reads a single-quoted string; `''` is an escaped quote.
    fn read_string(&mut self) -> Result<TokenKind, DictError> {
        let start = self.position;
        self.advance();

        let mut result = String::new();
        while let Some(ch) = self.current_char {
            if ch == '\'' {
                if self.peek() == Some('\'') {
                    result.push('\'');
                    self.advance();
                    self.advance();
                    continue;
                }
                self.advance();
                return Ok(TokenKind::String(result));
            }
            result.push(ch);
            self.advance();
        }
        Err(self.error(start, "unterminated string literal"))
    }

    /// Reads a double-quoted identifier, allowing reserved words as names.
    fn read_quoted_identifier(&mut self) -> Result<TokenKind, DictError> {
        let start = self.position;
        self.advance();

        let mut result = String::new();
        while let Some(ch) = self.current_char {
            self.advance();
            if ch == '"' {
                if result.is_empty() {
                    return Err(self.error(start, "empty quoted identifier"));
                }
                return Ok(TokenKind::Identifier(result));
            }
            result.push(ch);
        }
        Err(self.error(start, "unterminated quoted identifier"))
    }

    fn read_operator(&mut self) -> Result<TokenKind, DictError> {
        let start = self.position;
        let ch = self.current_char.unwrap_or_default();
        let next = self.peek();

        let (kind, width) = match (ch, next) {
            ('=', _) => (TokenKind::Eq, 1),
            ('!', Some('=')) => (TokenKind::Neq, 2),
            ('<', Some('>')) => (TokenKind::Neq, 2),
            ('<', Some('=')) => (TokenKind::Leq, 2),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', Some('=')) => (TokenKind::Geq, 2),
            ('>', _) => (TokenKind::Gt, 1),
            (':', Some(':')) => (TokenKind::Cast, 2),
            ('-', _) => (TokenKind::Minus, 1),
            ('.', _) => (TokenKind::Dot, 1),
            (',', _) => (TokenKind::Comma, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            ('(', _) => (TokenKind::LeftParen, 1),
            (')', _) => (TokenKind::RightParen, 1),
            ('[', _) => (TokenKind::LeftBracket, 1),
            (']', _) => (TokenKind::RightBracket, 1),
            (other, _) => {
                return Err(self.error(start, format!("unexpected character '{}'", other)));
            }
        };
        for _ in 0..width {
            self.advance();
        }
        Ok(kind)
    }
}

/// Tokenizes `input`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, DictError> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[timeout(1000)]
    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("AND or Not ILIKE null"),
            vec![
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Ilike,
                TokenKind::Null,
                TokenKind::Eof,
            ]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_numbers_and_dotted_names() {
        assert_eq!(
            kinds("price >= 10.5 and orders.count = 3"),
            vec![
                TokenKind::Identifier("price".into()),
                TokenKind::Geq,
                TokenKind::Decimal(10.5),
                TokenKind::And,
                TokenKind::Identifier("orders".into()),
                TokenKind::Dot,
                TokenKind::Identifier("count".into()),
                TokenKind::Eq,
                TokenKind::Integer(3),
                TokenKind::Eof,
            ]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_strings_casts_and_not_equal_forms() {
        assert_eq!(
            kinds("a <> 'it''s' and b != '2020-01-01'::date"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Neq,
                TokenKind::String("it's".into()),
                TokenKind::And,
                TokenKind::Identifier("b".into()),
                TokenKind::Neq,
                TokenKind::String("2020-01-01".into()),
                TokenKind::Cast,
                TokenKind::Identifier("date".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("-- header\na = 1 -- trailing"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Eq,
                TokenKind::Integer(1),
                TokenKind::Eof,
            ]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_positions_and_errors() {
        let tokens = tokenize("ab = 'x'").unwrap();
        assert_eq!(tokens[1].position, 3);
        assert_eq!(tokens[2].position, 5);

        let err = tokenize("a = 'open").unwrap_err();
        assert_eq!(
            err,
            DictError::QuerySyntax {
                position: 4,
                message: "unterminated string literal".to_string(),
            }
        );
        assert!(matches!(
            tokenize("a # 1"),
            Err(DictError::QuerySyntax { position: 2, .. })
        ));
    }
}
