//! Lexer
//!
//! Converts source text into a stream of tokens.

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    String(String),
    Ident(String),

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,   // ++
    MinusMinus, // --

    Eq,       // =
    EqEq,     // ==
    EqEqEq,   // ===
    Bang,     // !
    BangEq,   // !=
    BangEqEq, // !==

    Lt,   // <
    LtEq, // <=
    Gt,   // >
    GtEq, // >=

    LtLt, // <<
    GtGt, // >>

    Amp,      // &
    AmpAmp,   // &&
    Pipe,     // |
    PipePipe, // ||
    Caret,    // ^
    Tilde,    // ~

    Question,  // ?
    Colon,     // :
    Semicolon, // ;
    Comma,     // ,
    Dot,       // .

    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    // Compound assignment
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    LtLtEq,
    GtGtEq,
    AmpEq,
    PipeEq,
    CaretEq,

    // Keywords
    Break,
    Continue,
    Do,
    Else,
    False,
    For,
    Function,
    If,
    New,
    Null,
    Return,
    This,
    True,
    Var,
    While,

    // Special
    Eof,
    Error(String),
}

impl Token {
    /// Short description for error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::String(s) => format!("string \"{}\"", s),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Eof => "end of input".to_string(),
            Token::Error(msg) => msg.clone(),
            other => format!("{:?}", other),
        }
    }
}

/// Source position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourcePos {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

/// Lexer over UTF-8 source text
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Get the current source position
    pub fn position(&self) -> SourcePos {
        SourcePos {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos + 1).copied()
    }

    /// Consume one character (not byte)
    fn advance(&mut self) -> Option<char> {
        let c = self.source[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consume the current byte if it equals `expected`
    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace and comments
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.advance();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.advance() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek_next() == Some(b'*') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.advance() {
                        if c == '*' && self.eat(b'/') {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Read the next token together with the position it starts at
    pub fn next_spanned(&mut self) -> (Token, SourcePos) {
        self.skip_whitespace();
        let pos = self.position();
        (self.next_token(), pos)
    }

    /// Read the next token
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Token::Eof;
        };

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            return self.read_identifier();
        }

        if c.is_ascii_digit() || (c == b'.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) {
            return self.read_number();
        }

        if c == b'"' || c == b'\'' {
            return self.read_string();
        }

        let Some(ch) = self.advance() else {
            return Token::Eof;
        };
        match ch {
            '+' if self.eat(b'+') => Token::PlusPlus,
            '+' if self.eat(b'=') => Token::PlusEq,
            '+' => Token::Plus,
            '-' if self.eat(b'-') => Token::MinusMinus,
            '-' if self.eat(b'=') => Token::MinusEq,
            '-' => Token::Minus,
            '*' if self.eat(b'=') => Token::StarEq,
            '*' => Token::Star,
            '/' if self.eat(b'=') => Token::SlashEq,
            '/' => Token::Slash,
            '%' if self.eat(b'=') => Token::PercentEq,
            '%' => Token::Percent,
            '=' if self.eat(b'=') => {
                if self.eat(b'=') { Token::EqEqEq } else { Token::EqEq }
            }
            '=' => Token::Eq,
            '!' if self.eat(b'=') => {
                if self.eat(b'=') { Token::BangEqEq } else { Token::BangEq }
            }
            '!' => Token::Bang,
            '<' if self.eat(b'<') => {
                if self.eat(b'=') { Token::LtLtEq } else { Token::LtLt }
            }
            '<' if self.eat(b'=') => Token::LtEq,
            '<' => Token::Lt,
            '>' if self.eat(b'>') => {
                if self.eat(b'=') { Token::GtGtEq } else { Token::GtGt }
            }
            '>' if self.eat(b'=') => Token::GtEq,
            '>' => Token::Gt,
            '&' if self.eat(b'&') => Token::AmpAmp,
            '&' if self.eat(b'=') => Token::AmpEq,
            '&' => Token::Amp,
            '|' if self.eat(b'|') => Token::PipePipe,
            '|' if self.eat(b'=') => Token::PipeEq,
            '|' => Token::Pipe,
            '^' if self.eat(b'=') => Token::CaretEq,
            '^' => Token::Caret,
            '~' => Token::Tilde,
            '?' => Token::Question,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            other => Token::Error(format!("unexpected character '{}'", other)),
        }
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' {
                self.advance();
            } else {
                break;
            }
        }

        match &self.source[start..self.pos] {
            "break" => Token::Break,
            "continue" => Token::Continue,
            "do" => Token::Do,
            "else" => Token::Else,
            "false" => Token::False,
            "for" => Token::For,
            "function" => Token::Function,
            "if" => Token::If,
            "new" => Token::New,
            "null" => Token::Null,
            "return" => Token::Return,
            "this" => Token::This,
            "true" => Token::True,
            "var" => Token::Var,
            "while" => Token::While,
            ident => Token::Ident(ident.to_string()),
        }
    }

    /// Read a number literal (decimal, or hex with `0x`)
    fn read_number(&mut self) -> Token {
        let start = self.pos;

        if self.peek() == Some(b'0') && matches!(self.peek_next(), Some(b'x' | b'X')) {
            self.advance();
            self.advance();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.source[digits_start..self.pos];
            return match u64::from_str_radix(digits, 16) {
                Ok(n) => Token::Number(n as f64),
                Err(_) => Token::Error(format!("invalid number: {}", &self.source[start..self.pos])),
            };
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        if self.peek() == Some(b'.') {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.advance();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[start..self.pos];
        match text.parse::<f64>() {
            Ok(n) => Token::Number(n),
            Err(_) => Token::Error(format!("invalid number: {}", text)),
        }
    }

    /// Read a string literal
    fn read_string(&mut self) -> Token {
        let Some(quote) = self.advance() else {
            return Token::Error("unterminated string".to_string());
        };
        let mut s = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => return Token::Error("unterminated string".to_string()),
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('0') => s.push('\0'),
                    Some(c) => s.push(c),
                    None => return Token::Error("unterminated string".to_string()),
                },
                Some(c) => s.push(c),
            }
        }

        Token::String(s)
    }
}
