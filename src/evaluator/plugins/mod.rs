pub mod arithmetic;
pub mod comparison;
pub mod conditional;
pub mod function;
pub mod in_list;
pub mod logical;
pub mod member;
pub mod unary;
