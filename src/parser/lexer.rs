use crate::core::{Result, SchemaError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Integer(i64),
    Float(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

/// Token with the byte offset it starts at, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let peek2 = chars.get(i + 2).map(|(_, c)| *c);

        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            '?' => (Token::Question, 1),
            ':' => (Token::Colon, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '.' if !peek.is_some_and(|p| p.is_ascii_digit()) => (Token::Dot, 1),
            '&' if peek == Some('&') => (Token::AndAnd, 2),
            '|' if peek == Some('|') => (Token::OrOr, 2),
            '=' if peek == Some('=') && peek2 == Some('=') => (Token::EqEqEq, 3),
            '=' if peek == Some('=') => (Token::EqEq, 2),
            '!' if peek == Some('=') && peek2 == Some('=') => (Token::NotEqEq, 3),
            '!' if peek == Some('=') => (Token::NotEq, 2),
            '!' => (Token::Bang, 1),
            '<' if peek == Some('=') => (Token::LtEq, 2),
            '<' => (Token::Lt, 1),
            '>' if peek == Some('=') => (Token::GtEq, 2),
            '>' => (Token::Gt, 1),
            '\'' | '"' => {
                let (text, consumed) = read_string(&chars, i, c)?;
                tokens.push(Spanned { token: Token::Str(text), offset });
                i += consumed;
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, consumed) = read_number(&chars, i)?;
                tokens.push(Spanned { token, offset });
                i += consumed;
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let token = match word.as_str() {
                    "and" => Token::AndAnd,
                    "or" => Token::OrOr,
                    "not" => Token::Bang,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, offset });
                continue;
            }
            other => {
                return Err(SchemaError::Expression(format!(
                    "Unexpected character '{}' at offset {}",
                    other, offset
                )));
            }
        };

        tokens.push(Spanned { token, offset });
        i += width;
    }

    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<(String, usize)> {
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((text, i - start + 1));
        }
        if c == '\\' && i + 1 < chars.len() {
            i += 1;
            text.push(match chars[i].1 {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
        } else {
            text.push(c);
        }
        i += 1;
    }

    Err(SchemaError::Expression(format!(
        "Unterminated string literal starting at offset {}",
        chars[start].0
    )))
}

fn read_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize)> {
    let mut i = start;
    let mut seen_dot = false;

    while i < chars.len() {
        let c = chars[i].1;
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.'
            && !seen_dot
            && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())
        {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }

    let literal: String = chars[start..i].iter().map(|(_, c)| *c).collect();
    let token = if seen_dot {
        literal.parse::<f64>().map(Token::Float).ok()
    } else {
        literal.parse::<i64>().map(Token::Integer).ok()
    };

    token.map(|t| (t, i - start)).ok_or_else(|| {
        SchemaError::Expression(format!(
            "Invalid number literal '{}' at offset {}",
            literal, chars[start].0
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators_prefer_longest_match() {
        assert_eq!(
            kinds("a === b !== c != d"),
            vec![
                Token::Ident("a".into()),
                Token::EqEqEq,
                Token::Ident("b".into()),
                Token::NotEqEq,
                Token::Ident("c".into()),
                Token::NotEq,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_member_dots() {
        assert_eq!(
            kinds("row.price >= 10.5"),
            vec![
                Token::Ident("row".into()),
                Token::Dot,
                Token::Ident("price".into()),
                Token::GtEq,
                Token::Float(10.5),
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#"'it\'s'"#), vec![Token::Str("it's".into())]);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("a # b").is_err());
    }
}
