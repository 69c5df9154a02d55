// ============================================================================
// src/parser/expression.rs - recursive-descent parser for condition expressions
// ============================================================================

use crate::core::{Result, SchemaError, Value};
use crate::parser::ast::*;
use crate::parser::lexer::{Spanned, Token, tokenize};

const MAX_NESTING: usize = 64;

pub struct ExpressionParser {
    max_nesting: usize,
}

impl ExpressionParser {
    pub fn new() -> Self {
        Self {
            max_nesting: MAX_NESTING,
        }
    }

    pub fn parse(&self, source: &str) -> Result<Expr> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(SchemaError::Expression("Empty expression".into()));
        }

        let mut cursor = Cursor {
            tokens,
            pos: 0,
            depth: 0,
            max_depth: self.max_nesting,
        };
        let expr = cursor.conditional()?;

        if let Some(extra) = cursor.peek() {
            return Err(SchemaError::Expression(format!(
                "Unexpected token {:?} at offset {}",
                extra.token, extra.offset
            )));
        }
        Ok(expr)
    }
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self::new()
    }
}

struct Cursor {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.eat(&expected) {
            return Ok(());
        }
        Err(self.error(&format!("expected {:?}", expected)))
    }

    fn error(&self, message: &str) -> SchemaError {
        match self.peek() {
            Some(spanned) => SchemaError::Expression(format!(
                "{} but found {:?} at offset {}",
                message, spanned.token, spanned.offset
            )),
            None => SchemaError::Expression(format!("{} but reached end of input", message)),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SchemaError::Expression(format!(
                "Expression nesting exceeds {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn conditional(&mut self) -> Result<Expr> {
        self.enter()?;
        let condition = self.or()?;
        let expr = if self.eat(&Token::Question) {
            let then_branch = self.conditional()?;
            self.expect(Token::Colon)?;
            let else_branch = self.conditional()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            }
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::EqEqEq) => BinaryOp::StrictEq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                Some(Token::NotEqEq) => BinaryOp::StrictNotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = binary(left, op, right);
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.membership()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::LtEq) => BinaryOp::LtEq,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::GtEq) => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.membership()?;
            left = binary(left, op, right);
        }
    }

    fn membership(&mut self) -> Result<Expr> {
        let mut left = self.additive()?;
        while matches!(self.peek_token(), Some(Token::Ident(word)) if word == "in") {
            self.pos += 1;
            let list = self.additive()?;
            left = Expr::InList {
                expr: Box::new(left),
                list: Box::new(list),
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = binary(left, op, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                Some(Token::Percent) => BinaryOp::Modulo,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(left, op, right);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek_token() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Minus,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let expr = self.unary()?;
        self.depth -= 1;
        Ok(Expr::UnaryOp {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let property = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => {
                        self.pos -= 1;
                        return Err(self.error("expected property name after '.'"));
                    }
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        method: property,
                        args,
                    };
                } else {
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.conditional()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.advance() else {
            return Err(SchemaError::Expression(
                "Unexpected end of expression".into(),
            ));
        };

        match token {
            Token::Integer(i) => Ok(Expr::Literal(Value::Integer(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Boolean(true))),
                "false" => Ok(Expr::Literal(Value::Boolean(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat(&Token::LParen) {
                        let args = self.arguments()?;
                        Ok(Expr::Function { name: word, args })
                    } else {
                        Ok(Expr::Identifier(word))
                    }
                }
            },
            Token::LParen => {
                let inner = self.conditional()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.conditional()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::Array(items))
            }
            _ => {
                self.pos -= 1;
                Err(self.error("expected a value"))
            }
        }
    }

    /// Parses call arguments after the opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.conditional()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
        }
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Expr {
        ExpressionParser::new().parse(source).unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a + b * 2 > 10 && !done");
        let Expr::BinaryOp { op, left, right } = expr else {
            panic!("expected binary op");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(*left, Expr::BinaryOp { op: BinaryOp::Gt, .. }));
        assert!(matches!(*right, Expr::UnaryOp { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn test_member_index_and_method_chain() {
        let expr = parse("row.tags[0].toLowerCase()");
        let Expr::MethodCall { object, method, args } = expr else {
            panic!("expected method call");
        };
        assert_eq!(method, "toLowerCase");
        assert!(args.is_empty());
        assert!(matches!(*object, Expr::Index { .. }));
    }

    #[test]
    fn test_ternary_and_membership() {
        let expr = parse("status in ['open', 'closed'] ? 1 : 0");
        assert!(matches!(expr, Expr::Conditional { .. }));
    }

    #[test]
    fn test_unbalanced_input_is_rejected() {
        let parser = ExpressionParser::new();
        assert!(parser.parse("(value > 3").is_err());
        assert!(parser.parse("value >").is_err());
        assert!(parser.parse("value 3").is_err());
        assert!(parser.parse("").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(ExpressionParser::new().parse(&deep).is_err());
    }
}
