//! Filter query language: lexer, parser, AST and field resolution.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod resolve;

pub use ast::{
    AllOrAnyExpression, ArrayMatch, CompareOperator, Constant, FieldRef, InExpression,
    LikeExpression, LogicExpression, Predicate, QueryExpression, QueryVisitor,
};
pub use parser::parse;
pub use resolve::{resolve_field, DictResolver, ResolvedField, StaticResolver};
