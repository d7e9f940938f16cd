//! Tokenizer for the expression grammar (§4.G).

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Variable(String),

    EqEq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    AndAnd,
    OrOr,
    Bang,

    LParen,
    RParen,
    Comma,
    Semicolon,

    // keywords
    In,
    Not,
    Is,
    Null,
    Like,
    Between,
    And,
    Or,
    Contains,
    AnyOf,
    Cast,
    As,
    Now,
    Today,
    Use,
    True,
    False,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn lex(input: &str) -> Result<Vec<Spanned>, (usize, String)> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '$' {
            i += 1;
            let ident_start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            if i == ident_start {
                return Err((start, "expected identifier after '$'".to_string()));
            }
            let name: String = chars[ident_start..i].iter().collect();
            out.push(Spanned { token: Token::Variable(name), pos: start });
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let content_start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err((start, "unterminated string literal".to_string()));
            }
            let s: String = chars[content_start..i].iter().collect();
            i += 1;
            out.push(Spanned { token: Token::Str(s), pos: start });
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            let mut is_float = false;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if j < chars.len() && chars[j] == '.' && j + 1 < chars.len() && chars[j + 1].is_ascii_digit() {
                is_float = true;
                j += 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
            }
            let raw: String = chars[i..j].iter().collect();
            i = j;
            if is_float {
                let v: f64 = raw.parse().map_err(|_| (start, "invalid float literal".to_string()))?;
                out.push(Spanned { token: Token::Float(v), pos: start });
            } else {
                let v: i64 = raw.parse().map_err(|_| (start, "invalid integer literal".to_string()))?;
                out.push(Spanned { token: Token::Int(v), pos: start });
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.') {
                j += 1;
            }
            let word: String = chars[i..j].iter().collect();
            i = j;
            out.push(Spanned { token: keyword_or_ident(&word), pos: start });
            continue;
        }

        let two: Option<&str> = if i + 1 < chars.len() {
            match (c, chars[i + 1]) {
                ('=', '=') => Some("=="),
                ('!', '=') => Some("!="),
                ('>', '=') => Some(">="),
                ('<', '=') => Some("<="),
                ('&', '&') => Some("&&"),
                ('|', '|') => Some("||"),
                _ => None,
            }
        } else {
            None
        };
        if let Some(op) = two {
            let token = match op {
                "==" => Token::EqEq,
                "!=" => Token::NotEq,
                ">=" => Token::Gte,
                "<=" => Token::Lte,
                "&&" => Token::AndAnd,
                "||" => Token::OrOr,
                _ => unreachable!(),
            };
            out.push(Spanned { token, pos: start });
            i += 2;
            continue;
        }

        let single = match c {
            '>' => Some(Token::Gt),
            '<' => Some(Token::Lt),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '!' => Some(Token::Bang),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            _ => None,
        };
        match single {
            Some(token) => {
                out.push(Spanned { token, pos: start });
                i += 1;
            }
            None => return Err((start, format!("unexpected character '{c}'"))),
        }
    }

    out.push(Spanned { token: Token::Eof, pos: chars.len() });
    Ok(out)
}

fn keyword_or_ident(word: &str) -> Token {
    match word.to_ascii_uppercase().as_str() {
        "IN" => Token::In,
        "NOT" => Token::Not,
        "IS" => Token::Is,
        "NULL" => Token::Null,
        "LIKE" => Token::Like,
        "BETWEEN" => Token::Between,
        "AND" => Token::And,
        "OR" => Token::Or,
        "CONTAINS" => Token::Contains,
        "ANY_OF" => Token::AnyOf,
        "CAST" => Token::Cast,
        "AS" => Token::As,
        "NOW" => Token::Now,
        "TODAY" => Token::Today,
        "USE" => Token::Use,
        "TRUE" => Token::True,
        "FALSE" => Token::False,
        _ => Token::Ident(word.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_comparison_and_identifier() {
        assert_eq!(
            kinds("age >= 18"),
            vec![Token::Ident("age".to_string()), Token::Gte, Token::Int(18), Token::Eof]
        );
    }

    #[test]
    fn lexes_dotted_identifier_as_single_token() {
        assert_eq!(
            kinds("user.address.city"),
            vec![Token::Ident("user.address.city".to_string()), Token::Eof]
        );
    }

    #[test]
    fn lexes_variable_and_string_literal() {
        assert_eq!(
            kinds("name == $who"),
            vec![Token::Ident("name".to_string()), Token::EqEq, Token::Variable("who".to_string()), Token::Eof]
        );
        assert_eq!(kinds("'hello'"), vec![Token::Str("hello".to_string()), Token::Eof]);
    }

    #[test]
    fn lexes_keywords_case_insensitively() {
        assert_eq!(
            kinds("age between 1 and 2"),
            vec![Token::Ident("age".to_string()), Token::Between, Token::Int(1), Token::And, Token::Int(2), Token::Eof]
        );
        assert_eq!(
            kinds("age BETWEEN 1 AND 2"),
            vec![Token::Ident("age".to_string()), Token::Between, Token::Int(1), Token::And, Token::Int(2), Token::Eof]
        );
    }
}
