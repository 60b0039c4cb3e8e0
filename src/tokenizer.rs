use log::debug;

use crate::error::{syntax_error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    Identifier(String),

    // Keywords
    Truth,
    Lie,
    Alibi,
    Universe,
    If,
    Else,
    Elif,
    Loop,
    Plot,
    Plan,
    Suicide,
    Escape,
    Files,
    And,
    Or,
    Not,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqualEqual,
    BangEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Colon,

    // Block structure
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Tokenizer::new(source).run()
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Tokenizer {
    fn new(source: &str) -> Self {
        Tokenizer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> char {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        match self.chars.get(self.pos).copied() {
            Some(c) => {
                self.pos += 1;
                if c == '\n' {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                c
            }
            None => '\0',
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        syntax_error(message, self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn run(mut self) -> Result<Vec<Token>> {
        self.measure_indent()?;

        while self.pos < self.chars.len() {
            while matches!(self.peek(), ' ' | '\t') {
                self.advance();
            }

            let (line, column) = (self.line, self.column);
            match self.peek() {
                '\0' => break,
                '#' => {
                    while !matches!(self.peek(), '\n' | '\0') {
                        self.advance();
                    }
                }
                '\n' => {
                    self.push(TokenKind::Newline, line, column);
                    self.advance();
                    self.measure_indent()?;
                }
                '"' | '\'' => {
                    let text = self.read_string()?;
                    self.push(TokenKind::Str(text), line, column);
                }
                c if c.is_ascii_digit() => {
                    let kind = self.read_number()?;
                    self.push(kind, line, column);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let ident = self.read_identifier();
                    self.push(keyword_or_identifier(ident), line, column);
                }
                _ => {
                    let kind = self.read_operator()?;
                    self.push(kind, line, column);
                }
            }
        }

        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.line, self.column);
        }
        self.push(TokenKind::Eof, self.line, self.column);

        debug!("tokenized {} tokens", self.tokens.len());
        Ok(self.tokens)
    }

    /// Measures leading whitespace at the start of a logical line and emits
    /// INDENT/DEDENT tokens against the indent stack. Blank lines and
    /// comment-only lines leave the block structure untouched.
    fn measure_indent(&mut self) -> Result<()> {
        let mut width = 0;
        loop {
            match self.peek() {
                ' ' => width += 1,
                '\t' => width += 4,
                _ => break,
            }
            self.advance();
        }

        if matches!(self.peek(), '\n' | '#' | '\0') {
            return Ok(());
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.line, self.column);
        } else if width < current {
            while self.indents.len() > 1 && self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line, self.column);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return self.error("Inconsistent indentation");
            }
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<String> {
        let quote = self.advance();
        let mut value = String::new();

        loop {
            match self.peek() {
                '\0' => return self.error("Unterminated string"),
                '\\' => {
                    self.advance();
                    let escaped = self.advance();
                    if escaped == '\0' {
                        return self.error("Unterminated string");
                    }
                    // Unrecognized escapes pass the character through as-is.
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => break,
                _ => value.push(self.advance()),
            }
        }

        self.advance(); // closing quote
        Ok(value)
    }

    /// A maximal run of digits with at most one decimal point. A second dot
    /// ends the run unconsumed; whatever follows deals with it.
    fn read_number(&mut self) -> Result<TokenKind> {
        let mut text = String::new();
        let mut has_dot = false;

        loop {
            match self.peek() {
                c if c.is_ascii_digit() => text.push(self.advance()),
                '.' if !has_dot => {
                    has_dot = true;
                    text.push(self.advance());
                }
                _ => break,
            }
        }

        if has_dot {
            match text.parse::<f64>() {
                Ok(value) => Ok(TokenKind::Float(value)),
                Err(_) => self.error(format!("Invalid number: {}", text)),
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => Ok(TokenKind::Int(value)),
                Err(_) => self.error(format!("Invalid number: {}", text)),
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            ident.push(self.advance());
        }
        ident
    }

    fn read_operator(&mut self) -> Result<TokenKind> {
        let two = match (self.peek(), self.peek_at(1)) {
            ('=', '=') => Some(TokenKind::EqualEqual),
            ('!', '=') => Some(TokenKind::BangEqual),
            ('<', '=') => Some(TokenKind::LessEqual),
            ('>', '=') => Some(TokenKind::GreaterEqual),
            _ => None,
        };
        if let Some(kind) = two {
            self.advance();
            self.advance();
            return Ok(kind);
        }

        let kind = match self.peek() {
            '=' => TokenKind::Assign,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' => TokenKind::Less,
            '>' => TokenKind::Greater,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            other => return self.error(format!("Unexpected character: {}", other)),
        };
        self.advance();
        Ok(kind)
    }
}

fn keyword_or_identifier(ident: String) -> TokenKind {
    match ident.as_str() {
        "truth" => TokenKind::Truth,
        "lie" => TokenKind::Lie,
        "alibi" => TokenKind::Alibi,
        "universe" => TokenKind::Universe,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "elif" => TokenKind::Elif,
        "loop" => TokenKind::Loop,
        "plot" => TokenKind::Plot,
        "plan" => TokenKind::Plan,
        "suicide" => TokenKind::Suicide,
        "escape" => TokenKind::Escape,
        "files" => TokenKind::Files,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        _ => TokenKind::Identifier(ident),
    }
}
