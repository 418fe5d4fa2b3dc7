//! Migration statement language.
//!
//! Scripts are `;`-separated statements. Schema statements:
//!
//! ```text
//! create dict orders [engine sql] [name 'Orders'] (
//!     enum status ('new', 'done'),
//!     title string required max 64,
//!     state enum(status) default 'new',
//!     tags string[],
//!     customer dict(customers.name),
//!     index ix_title (title) desc,
//!     constraint uq_title (title)
//! );
//! alter dict orders add field amount decimal min 0;
//! alter dict orders drop field amount;
//! alter dict orders rename field title to headline;
//! drop dict orders;
//! create enum orders.status ('new', 'done');
//! drop enum orders.status;
//! create index orders.ix_title (title) [asc|desc];
//! drop index orders.ix_title;
//! create constraint orders.uq_title (title);
//! drop constraint orders.uq_title;
//! ```
//!
//! Data statements:
//!
//! ```text
//! insert into orders (title, state) values ('a', 'new'), ('b', 'done');
//! update orders set state = 'done' where title = 'a';
//! delete from orders where state = 'done';
//! ```

use crate::error::{DictError, Result};
use crate::query::lexer::{tokenize, Token, TokenKind};
use crate::query::parser::Parser;
use crate::query::{Constant, QueryExpression};
use crate::schema::{
    Dict, DictConstraint, DictEnum, DictField, DictIndex, FieldSize, FieldType, SortDirection,
};

/// Statements rejected outright.
const PROHIBITED: [&str; 7] = [
    "truncate", "grant", "revoke", "attach", "detach", "pragma", "vacuum",
];

/// Change applied by `alter dict`.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddField(DictField),
    DropField(String),
    RenameField { from: String, to: String },
}

/// One parsed migration statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Dictionary without service fields; an empty engine means the default one
    CreateDict(Dict),
    AlterDict {
        dict_id: String,
        action: AlterAction,
    },
    DropDict(String),
    CreateEnum {
        dict_id: String,
        dict_enum: DictEnum,
    },
    DropEnum {
        dict_id: String,
        enum_id: String,
    },
    CreateIndex {
        dict_id: String,
        index: DictIndex,
    },
    DropIndex {
        dict_id: String,
        index_id: String,
    },
    CreateConstraint {
        dict_id: String,
        constraint: DictConstraint,
    },
    DropConstraint {
        dict_id: String,
        constraint_id: String,
    },
    Insert {
        dict_id: String,
        columns: Vec<String>,
        rows: Vec<Vec<Constant>>,
    },
    Update {
        dict_id: String,
        assignments: Vec<(String, Constant)>,
        filter: QueryExpression,
    },
    Delete {
        dict_id: String,
        filter: QueryExpression,
    },
}

/// Parses and validates a whole script.
pub fn parse_script(script: &str, content: &str) -> Result<Vec<Statement>> {
    let to_script_error = |error: DictError| DictError::MigrationScript {
        script: script.to_string(),
        message: match error {
            DictError::QuerySyntax { position, message } => {
                let (line, column) = line_column(content, position);
                format!("line {}, column {}: {}", line, column, message)
            }
            other => other.to_string(),
        },
    };

    let tokens = tokenize(content).map_err(to_script_error)?;
    split_statements(&tokens)
        .into_iter()
        .map(|tokens| parse_statement(&tokens).map_err(to_script_error))
        .collect()
}

fn line_column(content: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for ch in content.chars().take(position) {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Splits on `;`, dropping empty statements. Each slice ends with `Eof`.
fn split_statements(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::Semicolon | TokenKind::Eof => {
                if !current.is_empty() {
                    current.push(Token {
                        kind: TokenKind::Eof,
                        position: token.position,
                    });
                    statements.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(token.clone()),
        }
    }
    statements
}

fn parse_statement(tokens: &[Token]) -> Result<Statement> {
    let mut parser = Parser::new(tokens);

    let leading = parser.current().word().map(str::to_ascii_lowercase);
    if let Some(word) = leading.as_deref().filter(|w| PROHIBITED.contains(w)) {
        return Err(DictError::QuerySyntax {
            position: parser.current_position(),
            message: format!("'{}' statements are not allowed in migrations", word),
        });
    }

    let statement = if parser.accept_word("create") {
        parse_create(&mut parser)?
    } else if parser.accept_word("alter") {
        parse_alter(&mut parser)?
    } else if parser.accept_word("drop") {
        parse_drop(&mut parser)?
    } else if parser.accept_word("insert") {
        parse_insert(&mut parser)?
    } else if parser.accept_word("update") {
        parse_update(&mut parser)?
    } else if parser.accept_word("delete") {
        parse_delete(&mut parser)?
    } else {
        return Err(parser.unexpected("statement keyword"));
    };

    if !parser.at_end() {
        return Err(parser.unexpected("';'"));
    }
    Ok(statement)
}

/// Parses `dict.member`.
fn parse_member(parser: &mut Parser) -> Result<(String, String)> {
    let dict_id = parser.parse_identifier()?;
    parser.expect(&TokenKind::Dot)?;
    let member = parser.parse_identifier()?;
    Ok((dict_id, member))
}

fn parse_identifier_list(parser: &mut Parser) -> Result<Vec<String>> {
    parser.expect(&TokenKind::LeftParen)?;
    let mut ids = vec![parser.parse_identifier()?];
    while parser.current() == &TokenKind::Comma {
        parser.advance();
        ids.push(parser.parse_identifier()?);
    }
    parser.expect(&TokenKind::RightParen)?;
    Ok(ids)
}

fn parse_string_list(parser: &mut Parser) -> Result<Vec<String>> {
    parser.expect(&TokenKind::LeftParen)?;
    let mut values = vec![parser.parse_string()?];
    while parser.current() == &TokenKind::Comma {
        parser.advance();
        values.push(parser.parse_string()?);
    }
    parser.expect(&TokenKind::RightParen)?;
    Ok(values)
}

fn parse_direction(parser: &mut Parser) -> SortDirection {
    if parser.accept_word("desc") {
        SortDirection::Desc
    } else {
        parser.accept_word("asc");
        SortDirection::Asc
    }
}

fn parse_create(parser: &mut Parser) -> Result<Statement> {
    if parser.accept_word("dict") {
        return parse_create_dict(parser).map(Statement::CreateDict);
    }
    if parser.accept_word("enum") {
        let (dict_id, enum_id) = parse_member(parser)?;
        let values = parse_string_list(parser)?;
        return Ok(Statement::CreateEnum {
            dict_id,
            dict_enum: DictEnum::new(enum_id, values),
        });
    }
    if parser.accept_word("index") {
        let (dict_id, index_id) = parse_member(parser)?;
        let fields = parse_identifier_list(parser)?;
        let direction = parse_direction(parser);
        return Ok(Statement::CreateIndex {
            dict_id,
            index: DictIndex {
                id: index_id,
                fields,
                direction,
            },
        });
    }
    if parser.accept_word("constraint") {
        let (dict_id, constraint_id) = parse_member(parser)?;
        let fields = parse_identifier_list(parser)?;
        return Ok(Statement::CreateConstraint {
            dict_id,
            constraint: DictConstraint {
                id: constraint_id,
                fields,
            },
        });
    }
    Err(parser.unexpected("'dict', 'enum', 'index' or 'constraint'"))
}

fn parse_create_dict(parser: &mut Parser) -> Result<Dict> {
    let dict_id = parser.parse_identifier()?;
    let mut dict = Dict::new(dict_id, "");

    loop {
        if parser.accept_word("engine") {
            dict.engine = parser.parse_identifier()?;
        } else if parser.accept_word("name") {
            dict.name = parser.parse_string()?;
        } else {
            break;
        }
    }

    parser.expect(&TokenKind::LeftParen)?;
    loop {
        parse_dict_entry(parser, &mut dict)?;
        if parser.current() == &TokenKind::Comma {
            parser.advance();
        } else {
            break;
        }
    }
    parser.expect(&TokenKind::RightParen)?;
    Ok(dict)
}

/// One entry of `create dict (...)`: enum, index, constraint or field.
///
/// `enum`, `index` and `constraint` followed by a name and `(` declare a
/// structure; otherwise the entry is a field definition.
fn parse_dict_entry(parser: &mut Parser, dict: &mut Dict) -> Result<()> {
    let structure = match parser.current() {
        TokenKind::Identifier(word) => ["enum", "index", "constraint"]
            .into_iter()
            .find(|kind| word.eq_ignore_ascii_case(kind)),
        _ => None,
    };
    if let Some(kind) = structure {
        if !looks_like_structure(parser) {
            dict.fields.push(parse_field(parser)?);
            return Ok(());
        }
        parser.advance();
        let id = parser.parse_identifier()?;
        match kind {
            "enum" => dict.enums.push(DictEnum::new(id, parse_string_list(parser)?)),
            "index" => {
                let fields = parse_identifier_list(parser)?;
                let direction = parse_direction(parser);
                dict.indexes.push(DictIndex {
                    id,
                    fields,
                    direction,
                });
            }
            _ => {
                let fields = parse_identifier_list(parser)?;
                dict.constraints.push(DictConstraint { id, fields });
            }
        }
        return Ok(());
    }
    dict.fields.push(parse_field(parser)?);
    Ok(())
}

fn looks_like_structure(parser: &Parser) -> bool {
    let mut lookahead = Parser::new(parser.remaining());
    lookahead.advance();
    lookahead.parse_identifier().is_ok() && lookahead.current() == &TokenKind::LeftParen
}

/// Parses `id type[[]] [(ref)] options...`.
fn parse_field(parser: &mut Parser) -> Result<DictField> {
    let id = parser.parse_identifier()?;
    let type_position = parser.current_position();
    let type_name = parser.parse_identifier()?;
    let field_type: FieldType = type_name.parse().map_err(|message| DictError::QuerySyntax {
        position: type_position,
        message,
    })?;
    let mut field = DictField::new(id, field_type);

    match field_type {
        FieldType::Enum => {
            parser.expect(&TokenKind::LeftParen)?;
            field.enum_id = Some(parser.parse_identifier()?);
            parser.expect(&TokenKind::RightParen)?;
        }
        FieldType::Dict => {
            parser.expect(&TokenKind::LeftParen)?;
            let (dict_id, field_id) = parse_member(parser)?;
            parser.expect(&TokenKind::RightParen)?;
            field = field.with_dict_ref(dict_id, field_id);
        }
        _ => {}
    }

    if parser.current() == &TokenKind::LeftBracket {
        parser.advance();
        parser.expect(&TokenKind::RightBracket)?;
        field.multivalued = true;
    }

    loop {
        if parser.accept_word("required") {
            field.required = true;
        } else if parser.accept_word("multivalued") {
            field.multivalued = true;
        } else if parser.accept_word("name") {
            field.name = parser.parse_string()?;
        } else if parser.accept_word("default") {
            field.default_value = Some(parser.parse_constant()?.to_value());
        } else if parser.accept_word("min") {
            field.min_size = Some(parse_size(parser)?);
        } else if parser.accept_word("max") {
            field.max_size = Some(parse_size(parser)?);
        } else {
            break;
        }
    }
    Ok(field)
}

fn parse_size(parser: &mut Parser) -> Result<FieldSize> {
    match parser.parse_constant()? {
        Constant::Integer(n) => Ok(FieldSize::Integer(n)),
        Constant::Decimal(n) => Ok(FieldSize::Decimal(n)),
        _ => Err(parser.unexpected("number")),
    }
}

fn parse_alter(parser: &mut Parser) -> Result<Statement> {
    parser.expect_word("dict")?;
    let dict_id = parser.parse_identifier()?;
    let action = if parser.accept_word("add") {
        parser.accept_word("field");
        AlterAction::AddField(parse_field(parser)?)
    } else if parser.accept_word("drop") {
        parser.accept_word("field");
        AlterAction::DropField(parser.parse_identifier()?)
    } else if parser.accept_word("rename") {
        parser.accept_word("field");
        let from = parser.parse_identifier()?;
        parser.expect_word("to")?;
        let to = parser.parse_identifier()?;
        AlterAction::RenameField { from, to }
    } else {
        return Err(parser.unexpected("'add', 'drop' or 'rename'"));
    };
    Ok(Statement::AlterDict { dict_id, action })
}

fn parse_drop(parser: &mut Parser) -> Result<Statement> {
    if parser.accept_word("dict") {
        return Ok(Statement::DropDict(parser.parse_identifier()?));
    }
    if parser.accept_word("enum") {
        let (dict_id, enum_id) = parse_member(parser)?;
        return Ok(Statement::DropEnum { dict_id, enum_id });
    }
    if parser.accept_word("index") {
        let (dict_id, index_id) = parse_member(parser)?;
        return Ok(Statement::DropIndex { dict_id, index_id });
    }
    if parser.accept_word("constraint") {
        let (dict_id, constraint_id) = parse_member(parser)?;
        return Ok(Statement::DropConstraint {
            dict_id,
            constraint_id,
        });
    }
    Err(parser.unexpected("'dict', 'enum', 'index' or 'constraint'"))
}

fn parse_insert(parser: &mut Parser) -> Result<Statement> {
    parser.expect_word("into")?;
    let dict_id = parser.parse_identifier()?;
    let columns = parse_identifier_list(parser)?;
    parser.expect_word("values")?;

    let mut rows = Vec::new();
    loop {
        let position = parser.current_position();
        let row = parser.parse_constant_list()?;
        if row.len() != columns.len() {
            return Err(DictError::QuerySyntax {
                position,
                message: format!("expected {} values, got {}", columns.len(), row.len()),
            });
        }
        rows.push(row);
        if parser.current() == &TokenKind::Comma {
            parser.advance();
        } else {
            break;
        }
    }
    Ok(Statement::Insert {
        dict_id,
        columns,
        rows,
    })
}

fn parse_where(parser: &mut Parser, statement: &str) -> Result<QueryExpression> {
    if !parser.accept_word("where") {
        return Err(DictError::QuerySyntax {
            position: parser.current_position(),
            message: format!("'{}' without 'where' is not allowed in migrations", statement),
        });
    }
    parser.parse_expression()
}

fn parse_update(parser: &mut Parser) -> Result<Statement> {
    let dict_id = parser.parse_identifier()?;
    parser.expect_word("set")?;
    let mut assignments = Vec::new();
    loop {
        let field = parser.parse_identifier()?;
        parser.expect(&TokenKind::Eq)?;
        assignments.push((field, parser.parse_constant()?));
        if parser.current() == &TokenKind::Comma {
            parser.advance();
        } else {
            break;
        }
    }
    let filter = parse_where(parser, "update")?;
    Ok(Statement::Update {
        dict_id,
        assignments,
        filter,
    })
}

fn parse_delete(parser: &mut Parser) -> Result<Statement> {
    parser.expect_word("from")?;
    let dict_id = parser.parse_identifier()?;
    let filter = parse_where(parser, "delete")?;
    Ok(Statement::Delete { dict_id, filter })
}
