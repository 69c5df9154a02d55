pub mod ast;
mod expression;
mod lexer;

pub use expression::ExpressionParser;
