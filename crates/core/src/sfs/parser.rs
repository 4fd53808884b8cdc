use super::lexer::{lex, Spanned, Token};
use crate::error::SfsError;

/// One navigation step of a pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Descend into an object field.
    Field(String),
    /// Iterate an array, pairing spec and status elements by this key.
    Keyed(String),
    /// Evaluate every member path from the current position. Always last.
    Group(Vec<Path>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub steps: Vec<Step>,
}

/// Deepest allowed nesting of `{...}` groups.
pub const MAX_GROUP_DEPTH: usize = 32;

pub fn parse(src: &str) -> Result<Path, SfsError> {
    let tokens = lex(src)?;
    let mut p = Parser {
        src,
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let path = p.parse_path()?;
    if p.cur() != &Token::Eof {
        return Err(p.err(format!("unexpected {} after pattern", p.describe())));
    }
    Ok(path)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{}'", name),
        Token::Dot => "'.'".into(),
        Token::Comma => "','".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::Eof => "end of pattern".into(),
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn err(&self, message: impl Into<String>) -> SfsError {
        SfsError::new(self.src, self.tokens[self.pos].pos, message)
    }

    fn describe(&self) -> String {
        describe(self.cur())
    }

    fn expect(&mut self, token: Token) -> Result<(), SfsError> {
        if self.cur() == &token {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!(
                "expected {}, got {}",
                describe(&token),
                self.describe()
            )))
        }
    }

    fn take_ident(&mut self) -> Result<String, SfsError> {
        match self.cur().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.err(format!("expected identifier, got {}", self.describe()))),
        }
    }

    fn parse_path(&mut self) -> Result<Path, SfsError> {
        let mut steps = Vec::new();
        loop {
            let step = self.parse_step()?;
            let is_group = matches!(step, Step::Group(_));
            steps.push(step);
            if self.cur() != &Token::Dot {
                break;
            }
            if is_group {
                return Err(self.err("a group must be the last step of a path"));
            }
            self.advance();
        }
        Ok(Path { steps })
    }

    fn parse_step(&mut self) -> Result<Step, SfsError> {
        match self.cur() {
            Token::Ident(_) => Ok(Step::Field(self.take_ident()?)),
            Token::LBracket => {
                self.advance();
                let key = self.take_ident()?;
                self.expect(Token::RBracket)?;
                Ok(Step::Keyed(key))
            }
            Token::LBrace => {
                if self.depth >= MAX_GROUP_DEPTH {
                    return Err(self.err(format!(
                        "groups nested deeper than {} levels",
                        MAX_GROUP_DEPTH
                    )));
                }
                self.depth += 1;
                self.advance();
                let mut members = vec![self.parse_path()?];
                while self.cur() == &Token::Comma {
                    self.advance();
                    members.push(self.parse_path()?);
                }
                self.expect(Token::RBrace)?;
                self.depth -= 1;
                Ok(Step::Group(members))
            }
            _ => Err(self.err(format!("expected a path step, got {}", self.describe()))),
        }
    }
}
