//! Character-level tokenizer for the internal expression language, in the `Peekable<Chars>`
//! style the teacher uses for its own hand-written query tokenizer
//! (`src/search/elastic_query.rs`).

use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    AndAnd,
    OrOr,
    Bang,
    EqEq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Question,
    Colon,
    Eof,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LexError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
}

pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
        }
    }

    pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        let Some(&c) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        match c {
            '"' => self.read_string(),
            c if c.is_ascii_digit() => Ok(self.read_number()),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_ident()),
            '&' => {
                self.chars.next();
                self.expect('&')?;
                Ok(Token::AndAnd)
            }
            '|' => {
                self.chars.next();
                self.expect('|')?;
                Ok(Token::OrOr)
            }
            '=' => {
                self.chars.next();
                self.expect('=')?;
                Ok(Token::EqEq)
            }
            '!' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Ok(Token::NotEq)
                } else {
                    Ok(Token::Bang)
                }
            }
            '>' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            '<' => {
                self.chars.next();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '+' => {
                self.chars.next();
                Ok(Token::Plus)
            }
            '-' => {
                self.chars.next();
                Ok(Token::Minus)
            }
            '*' => {
                self.chars.next();
                Ok(Token::Star)
            }
            '/' => {
                self.chars.next();
                Ok(Token::Slash)
            }
            '%' => {
                self.chars.next();
                Ok(Token::Percent)
            }
            '(' => {
                self.chars.next();
                Ok(Token::LParen)
            }
            ')' => {
                self.chars.next();
                Ok(Token::RParen)
            }
            '[' => {
                self.chars.next();
                Ok(Token::LBracket)
            }
            ']' => {
                self.chars.next();
                Ok(Token::RBracket)
            }
            ',' => {
                self.chars.next();
                Ok(Token::Comma)
            }
            '?' => {
                self.chars.next();
                Ok(Token::Question)
            }
            ':' => {
                self.chars.next();
                Ok(Token::Colon)
            }
            other => Err(LexError::UnexpectedChar(other)),
        }
    }

    fn expect(&mut self, want: char) -> Result<(), LexError> {
        match self.chars.next() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(LexError::UnexpectedChar(c)),
            None => Err(LexError::UnexpectedChar(want)),
        }
    }

    fn read_string(&mut self) -> Result<Token, LexError> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(Token::Str(s)),
                Some('\\') => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(LexError::UnterminatedString),
                },
                Some(c) => s.push(c),
                None => return Err(LexError::UnterminatedString),
            }
        }
    }

    fn read_number(&mut self) -> Token {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
            s.push(self.chars.next().unwrap());
        }
        if self.chars.peek() == Some(&'.') {
            s.push(self.chars.next().unwrap());
            while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit()) {
                s.push(self.chars.next().unwrap());
            }
        }
        Token::Number(s.parse().unwrap_or(0.0))
    }

    fn read_ident(&mut self) -> Token {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            s.push(self.chars.next().unwrap());
        }
        match s.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(s),
        }
    }
}
