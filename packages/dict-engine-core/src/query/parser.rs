//! Recursive-descent parser for filter expressions.
//!
//! Precedence, loosest first: `or`, `and`, `not`, then comparisons.
//!
//! ```text
//! expression := or
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | primary
//! primary    := "(" expression ")" | condition
//! condition  := field op constant | constant op field
//!             | field ["not"] ("like" | "ilike") string
//!             | field ["not"] "in" list
//!             | field ("all" | "any") list
//! field      := identifier ["." identifier]
//! constant   := ["-"] number | string ["::" type] | true | false | null
//! ```

use crate::error::DictError;
use crate::mapping;

use super::ast::{
    AllOrAnyExpression, ArrayMatch, CompareOperator, Constant, FieldRef, InExpression,
    LikeExpression, Predicate, QueryExpression,
};
use super::lexer::{tokenize, Token, TokenKind};

/// Parses query text. Blank text parses to [`QueryExpression::Empty`].
pub fn parse(text: &str) -> Result<QueryExpression, DictError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser::new(&tokens);
    if parser.at_end() {
        return Ok(QueryExpression::Empty);
    }
    let expression = parser.parse_expression()?;
    if !parser.at_end() {
        return Err(parser.unexpected("end of input"));
    }
    Ok(expression)
}

/// Cursor over a token slice.
///
/// Also used by the migration statement parser, which shares the helpers
/// and hands `where` clauses to [`Parser::parse_expression`].
pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parses one boolean expression starting at the cursor.
    pub fn parse_expression(&mut self) -> Result<QueryExpression, DictError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<QueryExpression, DictError> {
        let mut left = self.parse_and()?;
        while self.current() == &TokenKind::Or {
            self.advance();
            let right = self.parse_and()?;
            left = QueryExpression::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<QueryExpression, DictError> {
        let mut left = self.parse_not()?;
        while self.current() == &TokenKind::And {
            self.advance();
            let right = self.parse_not()?;
            left = QueryExpression::and(left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<QueryExpression, DictError> {
        if self.current() == &TokenKind::Not {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(QueryExpression::not(inner));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryExpression, DictError> {
        if self.current() == &TokenKind::LeftParen {
            self.advance();
            let inner = self.parse_expression()?;
            self.expect(&TokenKind::RightParen)?;
            return Ok(inner);
        }
        if self.is_constant_start() {
            return self.parse_reversed_predicate();
        }
        self.parse_condition()
    }

    /// `constant op field`, normalized to `field flipped-op constant`.
    fn parse_reversed_predicate(&mut self) -> Result<QueryExpression, DictError> {
        let value = self.parse_constant()?;
        let operator = self
            .parse_compare_operator()
            .ok_or_else(|| self.unexpected("comparison operator"))?;
        let field = self.parse_field()?;
        Ok(QueryExpression::Predicate(Predicate {
            field,
            operator: operator.flip(),
            value,
        }))
    }

    fn parse_condition(&mut self) -> Result<QueryExpression, DictError> {
        let field = self.parse_field()?;

        if let Some(operator) = self.parse_compare_operator() {
            let value = self.parse_constant()?;
            return Ok(QueryExpression::Predicate(Predicate {
                field,
                operator,
                value,
            }));
        }

        let negated = if self.current() == &TokenKind::Not {
            self.advance();
            true
        } else {
            false
        };

        let expression = match self.current().clone() {
            TokenKind::Like | TokenKind::Ilike => {
                let case_insensitive = self.current() == &TokenKind::Ilike;
                self.advance();
                let pattern = self.parse_string()?;
                let like = LikeExpression { field, pattern };
                if case_insensitive {
                    QueryExpression::Ilike(like)
                } else {
                    QueryExpression::Like(like)
                }
            }
            TokenKind::In => {
                self.advance();
                let values = self.parse_constant_list()?;
                QueryExpression::In(InExpression { field, values })
            }
            TokenKind::All | TokenKind::Any if !negated => {
                let mode = if self.current() == &TokenKind::All {
                    ArrayMatch::All
                } else {
                    ArrayMatch::Any
                };
                self.advance();
                let values = self.parse_constant_list()?;
                QueryExpression::AllOrAny(AllOrAnyExpression { field, mode, values })
            }
            _ if negated => return Err(self.unexpected("'like', 'ilike' or 'in'")),
            _ => return Err(self.unexpected("operator")),
        };

        Ok(if negated {
            QueryExpression::not(expression)
        } else {
            expression
        })
    }

    fn parse_compare_operator(&mut self) -> Option<CompareOperator> {
        let operator = match self.current() {
            TokenKind::Eq => CompareOperator::Eq,
            TokenKind::Neq => CompareOperator::Neq,
            TokenKind::Lt => CompareOperator::Ls,
            TokenKind::Gt => CompareOperator::Gt,
            TokenKind::Leq => CompareOperator::Leq,
            TokenKind::Geq => CompareOperator::Geq,
            _ => return None,
        };
        self.advance();
        Some(operator)
    }

    /// Parses `field` or `dict.field`.
    pub fn parse_field(&mut self) -> Result<FieldRef, DictError> {
        let first = self.parse_identifier()?;
        if self.current() == &TokenKind::Dot {
            self.advance();
            let field = self.parse_identifier()?;
            return Ok(FieldRef::qualified(first, field));
        }
        Ok(FieldRef::new(first))
    }

    /// Parses `( constant, ... )` or `[ constant, ... ]`.
    pub fn parse_constant_list(&mut self) -> Result<Vec<Constant>, DictError> {
        let close = match self.current() {
            TokenKind::LeftParen => TokenKind::RightParen,
            TokenKind::LeftBracket => TokenKind::RightBracket,
            _ => return Err(self.unexpected("'(' or '['")),
        };
        self.advance();

        let mut values = Vec::new();
        if self.current() == &close {
            return Err(self.unexpected("constant"));
        }
        loop {
            values.push(self.parse_constant()?);
            if self.current() == &TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&close)?;
        Ok(values)
    }

    fn is_constant_start(&self) -> bool {
        matches!(
            self.current(),
            TokenKind::String(_)
                | TokenKind::Integer(_)
                | TokenKind::Decimal(_)
                | TokenKind::Minus
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }

    /// Parses a literal with an optional `::type` cast.
    pub fn parse_constant(&mut self) -> Result<Constant, DictError> {
        let start = self.current_position();
        let constant = match self.current().clone() {
            TokenKind::String(s) => Constant::String(s),
            TokenKind::Integer(n) => Constant::Integer(n),
            TokenKind::Decimal(n) => Constant::Decimal(n),
            TokenKind::True => Constant::Boolean(true),
            TokenKind::False => Constant::Boolean(false),
            TokenKind::Null => Constant::Null,
            TokenKind::Minus => {
                self.advance();
                match self.current().clone() {
                    TokenKind::Integer(n) => Constant::Integer(-n),
                    TokenKind::Decimal(n) => Constant::Decimal(-n),
                    _ => return Err(self.unexpected("number")),
                }
            }
            _ => return Err(self.unexpected("constant")),
        };
        self.advance();

        if self.current() != &TokenKind::Cast {
            return Ok(constant);
        }
        self.advance();
        let target = self.parse_identifier()?;
        cast(constant, &target).map_err(|message| DictError::QuerySyntax {
            position: start,
            message,
        })
    }

    /// Parses a string literal.
    pub fn parse_string(&mut self) -> Result<String, DictError> {
        if let TokenKind::String(s) = self.current() {
            let result = s.clone();
            self.advance();
            Ok(result)
        } else {
            Err(self.unexpected("string"))
        }
    }

    /// Parses a name; reserved words are accepted only when double-quoted.
    pub fn parse_identifier(&mut self) -> Result<String, DictError> {
        if let TokenKind::Identifier(name) = self.current() {
            let result = name.clone();
            self.advance();
            Ok(result)
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    /// Consumes the word if the current token is it (case-insensitive).
    pub fn accept_word(&mut self, word: &str) -> bool {
        let matched = self
            .current()
            .word()
            .is_some_and(|w| w.eq_ignore_ascii_case(word));
        if matched {
            self.advance();
        }
        matched
    }

    /// Consumes the word or fails naming it.
    pub fn expect_word(&mut self, word: &str) -> Result<(), DictError> {
        if self.accept_word(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    pub fn current(&self) -> &TokenKind {
        self.tokens
            .get(self.position)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    /// Character offset of the current token (end of input past the last token).
    pub fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|t| t.position)
            .unwrap_or_default()
    }

    /// Tokens from the cursor to the end.
    pub fn remaining(&self) -> &'a [Token] {
        &self.tokens[self.position.min(self.tokens.len())..]
    }

    pub fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    pub fn expect(&mut self, expected: &TokenKind) -> Result<(), DictError> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    pub fn at_end(&self) -> bool {
        self.current() == &TokenKind::Eof
    }

    /// Builds a syntax error at the current token.
    pub fn unexpected(&self, expected: &str) -> DictError {
        DictError::QuerySyntax {
            position: self.current_position(),
            message: format!("expected {}, got {}", expected, self.current()),
        }
    }
}

fn cast(constant: Constant, target: &str) -> Result<Constant, String> {
    let target = target.to_ascii_lowercase();
    match (target.as_str(), constant) {
        ("date", Constant::String(s)) => mapping::parse_date(&s)
            .map(Constant::Date)
            .ok_or_else(|| format!("'{}' is not a valid date", s)),
        ("timestamp", Constant::String(s)) => mapping::parse_timestamp(&s)
            .map(Constant::Timestamp)
            .ok_or_else(|| format!("'{}' is not a valid timestamp", s)),
        ("string" | "text", Constant::String(s)) => Ok(Constant::String(s)),
        ("integer" | "int", Constant::Integer(n)) => Ok(Constant::Integer(n)),
        ("integer" | "int", Constant::String(s)) => s
            .parse()
            .map(Constant::Integer)
            .map_err(|_| format!("'{}' is not a valid integer", s)),
        ("decimal" | "numeric", Constant::Integer(n)) => Ok(Constant::Decimal(n as f64)),
        ("decimal" | "numeric", Constant::Decimal(n)) => Ok(Constant::Decimal(n)),
        ("decimal" | "numeric", Constant::String(s)) => s
            .parse()
            .map(Constant::Decimal)
            .map_err(|_| format!("'{}' is not a valid decimal", s)),
        ("boolean" | "bool", Constant::Boolean(b)) => Ok(Constant::Boolean(b)),
        (_, Constant::Null) => Ok(Constant::Null),
        (target, constant) => Err(format!("cannot cast {} to {}", constant, target)),
    }
}
