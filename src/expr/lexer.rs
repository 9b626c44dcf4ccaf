use crate::error::{PlotError, Result};

/// Lexical tokens of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Str(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    Amp,
    Pipe,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

/// Split an expression into tokens, rejecting anything outside the grammar
/// (attribute access, assignment, statement separators, ...).
pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let (value, next) = lex_number(&chars, i)?;
            tokens.push(Token::Number(value));
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = lex_string(&chars, i)?;
            tokens.push(Token::Str(text));
            i = next;
            continue;
        }

        let two = chars.get(i + 1).copied();
        let (token, width) = match (c, two) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('&', _) => (Token::Amp, 1),
            ('|', _) => (Token::Pipe, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            (other, _) => {
                return Err(PlotError::expression(format!(
                    "unexpected character `{other}` at position {i} in `{src}`"
                )))
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize)> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    if i < chars.len() && (chars[i].is_alphabetic() || chars[i] == '_') {
        return Err(PlotError::expression(format!(
            "malformed number near position {start}"
        )));
    }
    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|v| (v, i))
        .map_err(|_| PlotError::expression(format!("malformed number `{text}`")))
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(PlotError::expression(format!(
        "unterminated string starting at position {start}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_identifiers_and_operators() {
        let tokens = tokenize("T_a*1.8 + 32 >= 2.5e8").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("T_a".into()),
                Token::Star,
                Token::Number(1.8),
                Token::Plus,
                Token::Number(32.0),
                Token::Ge,
                Token::Number(2.5e8),
            ]
        );
    }

    #[test]
    fn strings_and_double_char_operators() {
        let tokens = tokenize("date('2012-01-01') // 2 ** 3").unwrap();
        assert_eq!(tokens[2], Token::Str("2012-01-01".into()));
        assert!(tokens.contains(&Token::DoubleSlash));
        assert!(tokens.contains(&Token::DoubleStar));
    }

    #[test]
    fn attribute_access_is_rejected() {
        assert!(tokenize("os.system").is_err());
        assert!(tokenize("a = 1").is_err());
        assert!(tokenize("a; b").is_err());
    }

    #[test]
    fn unterminated_string_is_rejected() {
        assert!(tokenize("date('2012").is_err());
    }
}
