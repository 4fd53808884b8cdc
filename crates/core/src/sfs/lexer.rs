use crate::error::SfsError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Dot,
    Comma,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    /// Byte offset into the pattern.
    pub pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, SfsError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let punct = match c {
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            _ => None,
        };
        if let Some(token) = punct {
            chars.next();
            tokens.push(Spanned { token, pos });
            continue;
        }

        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_ident_continue(c) {
                    break;
                }
                ident.push(c);
                chars.next();
            }
            tokens.push(Spanned {
                token: Token::Ident(ident),
                pos,
            });
            continue;
        }

        return Err(SfsError::new(
            src,
            pos,
            format!("unexpected character '{}'", c),
        ));
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: src.len(),
    });
    Ok(tokens)
}
