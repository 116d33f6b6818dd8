use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source.
    pub offset: usize,
}

pub fn lex(src: &str) -> Result<Vec<Token>, EvalError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < src.len() {
        let c = src[pos..].chars().next().unwrap_or(' ');
        let start = pos;

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            pos = scan_number(src, pos);
            let text = &src[start..pos];
            let value = text.parse::<f64>().map_err(|_| EvalError::Syntax {
                message: format!("invalid number '{}'", text),
                offset: start,
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: start,
            });
            continue;
        }

        if c == '_' || c.is_ascii_alphabetic() {
            while pos < src.len() && (bytes[pos] == b'_' || bytes[pos].is_ascii_alphanumeric()) {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(src[start..pos].to_string()),
                offset: start,
            });
            continue;
        }

        if c == '\'' || c == '"' {
            let (text, end) = scan_string(src, pos, c)?;
            pos = end;
            tokens.push(Token {
                kind: TokenKind::Str(text),
                offset: start,
            });
            continue;
        }

        let two = src.get(pos..pos + 2).unwrap_or("");
        let (kind, len) = match two {
            "**" => (TokenKind::StarStar, 2),
            "==" => (TokenKind::EqEq, 2),
            "!=" => (TokenKind::Ne, 2),
            "<=" => (TokenKind::Le, 2),
            ">=" => (TokenKind::Ge, 2),
            _ => match c {
                '(' => (TokenKind::LParen, 1),
                ')' => (TokenKind::RParen, 1),
                '[' => (TokenKind::LBracket, 1),
                ']' => (TokenKind::RBracket, 1),
                ',' => (TokenKind::Comma, 1),
                '.' => (TokenKind::Dot, 1),
                '+' => (TokenKind::Plus, 1),
                '-' => (TokenKind::Minus, 1),
                '*' => (TokenKind::Star, 1),
                '/' => (TokenKind::Slash, 1),
                '%' => (TokenKind::Percent, 1),
                '<' => (TokenKind::Lt, 1),
                '>' => (TokenKind::Gt, 1),
                other => {
                    return Err(EvalError::Syntax {
                        message: format!("unexpected character '{}'", other),
                        offset: start,
                    })
                }
            },
        };
        pos += len;
        tokens.push(Token {
            kind,
            offset: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: src.len(),
    });
    Ok(tokens)
}

fn scan_number(src: &str, mut pos: usize) -> usize {
    let bytes = src.as_bytes();
    while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
        pos += 1;
    }
    // exponent only when followed by digits, so `1e` stays a syntax error downstream
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            pos = exp;
        }
    }
    pos
}

fn scan_string(src: &str, start: usize, quote: char) -> Result<(String, usize), EvalError> {
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((out, start + 1 + idx + c.len_utf8())),
            c => out.push(c),
        }
    }
    Err(EvalError::Syntax {
        message: "unterminated string literal".to_string(),
        offset: start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_lex_operators() {
        assert_eq!(
            kinds("a**2 >= .5"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::StarStar,
                TokenKind::Number(2.0),
                TokenKind::Ge,
                TokenKind::Number(0.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_strings_and_exponents() {
        assert_eq!(
            kinds(r#"'it\'s' 1e3"#),
            vec![
                TokenKind::Str("it's".to_string()),
                TokenKind::Number(1000.0),
                TokenKind::Eof,
            ]
        );
        assert!(lex("'open").is_err());
        assert!(lex("a $ b").is_err());
    }
}
