// Lexer - source bytes to tokens.
//
// One token of look-ahead through `peek_token`, and whole-position
// save/restore for the parser's two-token decisions. Errors are sticky:
// after a malformed token, every further request returns the same Error
// token.

use smol_str::SmolStr;

use super::token::{Token, TokenKind};

#[derive(Clone)]
struct LexerState {
    pos: usize,
    line: u32,
    column: u32,
    lookahead: Option<Token>,
}

pub struct Lexer<'s> {
    src: &'s [u8],
    pub chunk: SmolStr,
    pos: usize,
    line: u32,
    column: u32,
    lookahead: Option<Token>,
    saved: Option<LexerState>,
    sticky_error: Option<Token>,
}

impl<'s> Lexer<'s> {
    pub fn new(src: &'s [u8], chunk: SmolStr) -> Self {
        Lexer {
            src,
            chunk,
            pos: 0,
            line: 1,
            column: 1,
            lookahead: None,
            saved: None,
            sticky_error: None,
        }
    }

    // ============ Public protocol ============

    /// Consume and return the next token.
    pub fn next_token(&mut self) -> Token {
        if let Some(err) = &self.sticky_error {
            return err.clone();
        }
        if let Some(tok) = self.lookahead.take() {
            return tok;
        }
        self.lex()
    }

    /// Look at the next token without consuming it. Idempotent.
    pub fn peek_token(&mut self) -> &Token {
        if self.lookahead.is_none() {
            let tok = self.next_token();
            self.lookahead = Some(tok);
        }
        self.lookahead.as_ref().expect("lookahead just filled")
    }

    /// Snapshot the full lexer position (including the look-ahead).
    pub fn save_state(&mut self) {
        self.saved = Some(LexerState {
            pos: self.pos,
            line: self.line,
            column: self.column,
            lookahead: self.lookahead.clone(),
        });
    }

    /// Rewind to the last saved position.
    pub fn restore_state(&mut self) {
        if let Some(state) = self.saved.take() {
            self.pos = state.pos;
            self.line = state.line;
            self.column = state.column;
            self.lookahead = state.lookahead;
        }
    }

    // ============ Character machinery ============

    #[inline]
    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    #[inline]
    fn peek_next(&self) -> u8 {
        self.src.get(self.pos + 1).copied().unwrap_or(0)
    }

    #[inline]
    fn is_eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        self.column += 1;
        c
    }

    /// Consume a \n, \r, \n\r or \r\n sequence as one line break.
    fn newline(&mut self) {
        let first = self.advance();
        let second = self.peek();
        if (second == b'\n' || second == b'\r') && second != first {
            self.advance();
        }
        self.line += 1;
        self.column = 1;
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    // ============ Token production ============

    fn make(&self, kind: TokenKind, line: u32, column: u32) -> Token {
        Token::simple(kind, line, column)
    }

    fn error_token(&mut self, message: String, line: u32, column: u32) -> Token {
        let tok = Token {
            kind: TokenKind::Error,
            lexeme: SmolStr::default(),
            line,
            column,
            number: 0.0,
            string: message.into_bytes(),
        };
        self.sticky_error = Some(tok.clone());
        tok
    }

    fn lex(&mut self) -> Token {
        loop {
            let (line, column) = (self.line, self.column);
            if self.is_eof() {
                return self.make(TokenKind::Eof, line, column);
            }
            match self.peek() {
                b'\n' | b'\r' => {
                    self.newline();
                }
                b' ' | b'\t' | 0x0b | 0x0c => {
                    self.advance();
                }
                b'-' => {
                    if self.peek_next() != b'-' {
                        self.advance();
                        return self.make(TokenKind::Minus, line, column);
                    }
                    self.advance();
                    self.advance();
                    if self.peek() == b'[' {
                        // Possible long comment.
                        let save = self.pos;
                        let save_col = self.column;
                        self.advance();
                        let level = self.skip_eq();
                        if self.peek() == b'[' {
                            self.advance();
                            if let Err(msg) = self.read_long_bracket(level) {
                                return self.error_token(msg, line, column);
                            }
                            continue;
                        }
                        self.pos = save;
                        self.column = save_col;
                    }
                    // Line comment.
                    while !self.is_eof() && self.peek() != b'\n' && self.peek() != b'\r' {
                        self.advance();
                    }
                }
                b'[' => {
                    if self.peek_next() == b'[' || self.peek_next() == b'=' {
                        let save = self.pos;
                        let save_col = self.column;
                        self.advance();
                        let level = self.skip_eq();
                        if self.peek() == b'[' {
                            self.advance();
                            return match self.read_long_bracket(level) {
                                Ok(bytes) => Token {
                                    kind: TokenKind::Str,
                                    lexeme: SmolStr::default(),
                                    line,
                                    column,
                                    number: 0.0,
                                    string: bytes,
                                },
                                Err(msg) => self.error_token(msg, line, column),
                            };
                        }
                        if level > 0 {
                            return self
                                .error_token("invalid long string delimiter".to_string(), line, column);
                        }
                        self.pos = save;
                        self.column = save_col;
                    }
                    self.advance();
                    return self.make(TokenKind::LeftBracket, line, column);
                }
                b'=' => {
                    self.advance();
                    let kind = if self.match_byte(b'=') {
                        TokenKind::Eq
                    } else {
                        TokenKind::Assign
                    };
                    return self.make(kind, line, column);
                }
                b'~' => {
                    self.advance();
                    if self.match_byte(b'=') {
                        return self.make(TokenKind::Ne, line, column);
                    }
                    return self.error_token("unexpected symbol near '~'".to_string(), line, column);
                }
                b'<' => {
                    self.advance();
                    let kind = if self.match_byte(b'=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    };
                    return self.make(kind, line, column);
                }
                b'>' => {
                    self.advance();
                    let kind = if self.match_byte(b'=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    };
                    return self.make(kind, line, column);
                }
                b':' => {
                    self.advance();
                    let kind = if self.match_byte(b':') {
                        TokenKind::DoubleColon
                    } else {
                        TokenKind::Colon
                    };
                    return self.make(kind, line, column);
                }
                b'.' => {
                    if self.peek_next().is_ascii_digit() {
                        return self.number(line, column);
                    }
                    self.advance();
                    if self.match_byte(b'.') {
                        if self.match_byte(b'.') {
                            return self.make(TokenKind::Dots, line, column);
                        }
                        return self.make(TokenKind::Concat, line, column);
                    }
                    return self.make(TokenKind::Dot, line, column);
                }
                b'"' | b'\'' => return self.string(line, column),
                c if c.is_ascii_digit() => return self.number(line, column),
                c if c == b'_' || c.is_ascii_alphabetic() => return self.identifier(line, column),
                c => {
                    let simple = match c {
                        b'+' => Some(TokenKind::Plus),
                        b'*' => Some(TokenKind::Star),
                        b'/' => Some(TokenKind::Slash),
                        b'%' => Some(TokenKind::Percent),
                        b'^' => Some(TokenKind::Caret),
                        b'#' => Some(TokenKind::Hash),
                        b',' => Some(TokenKind::Comma),
                        b';' => Some(TokenKind::Semicolon),
                        b'(' => Some(TokenKind::LeftParen),
                        b')' => Some(TokenKind::RightParen),
                        b'{' => Some(TokenKind::LeftBrace),
                        b'}' => Some(TokenKind::RightBrace),
                        b']' => Some(TokenKind::RightBracket),
                        _ => None,
                    };
                    self.advance();
                    match simple {
                        Some(kind) => return self.make(kind, line, column),
                        None => {
                            let msg = if c.is_ascii_graphic() {
                                format!("unexpected symbol near '{}'", c as char)
                            } else {
                                format!("unexpected symbol near char({})", c)
                            };
                            return self.error_token(msg, line, column);
                        }
                    }
                }
            }
        }
    }

    fn identifier(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        while !self.is_eof() && (self.peek() == b'_' || self.peek().is_ascii_alphanumeric()) {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        match TokenKind::keyword(text) {
            Some(kind) => self.make(kind, line, column),
            None => Token {
                kind: TokenKind::Name,
                lexeme: SmolStr::new(String::from_utf8_lossy(text)),
                line,
                column,
                number: 0.0,
                string: Vec::new(),
            },
        }
    }

    fn number(&mut self, line: u32, column: u32) -> Token {
        let start = self.pos;
        if self.peek() == b'0' && (self.peek_next() == b'x' || self.peek_next() == b'X') {
            self.advance();
            self.advance();
            while !self.is_eof() && self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            let text = &self.src[start + 2..self.pos];
            let text = std::str::from_utf8(text).unwrap_or("");
            return match u64::from_str_radix(text, 16) {
                Ok(n) if !text.is_empty() => Token {
                    kind: TokenKind::Number,
                    lexeme: SmolStr::new(String::from_utf8_lossy(&self.src[start..self.pos])),
                    line,
                    column,
                    number: n as f64,
                    string: Vec::new(),
                },
                _ => self.error_token("malformed number".to_string(), line, column),
            };
        }
        while !self.is_eof() && self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' {
            self.advance();
            while !self.is_eof() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if self.peek() == b'e' || self.peek() == b'E' {
            self.advance();
            if self.peek() == b'+' || self.peek() == b'-' {
                self.advance();
            }
            if !self.peek().is_ascii_digit() {
                return self.error_token("malformed number".to_string(), line, column);
            }
            while !self.is_eof() && self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        // A number running straight into identifier characters is
        // malformed ("3x").
        if self.peek() == b'_' || self.peek().is_ascii_alphabetic() {
            return self.error_token("malformed number".to_string(), line, column);
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        match text.parse::<f64>() {
            Ok(n) => Token {
                kind: TokenKind::Number,
                lexeme: SmolStr::new(text),
                line,
                column,
                number: n,
                string: Vec::new(),
            },
            Err(_) => self.error_token("malformed number".to_string(), line, column),
        }
    }

    fn string(&mut self, line: u32, column: u32) -> Token {
        let quote = self.advance();
        let mut out = Vec::new();
        loop {
            if self.is_eof() {
                return self.error_token("unterminated string".to_string(), line, column);
            }
            match self.peek() {
                b'\n' | b'\r' => {
                    return self.error_token("unterminated string".to_string(), line, column);
                }
                b'\\' => {
                    self.advance();
                    let esc = self.peek();
                    match esc {
                        b'a' => {
                            self.advance();
                            out.push(7);
                        }
                        b'b' => {
                            self.advance();
                            out.push(8);
                        }
                        b'f' => {
                            self.advance();
                            out.push(12);
                        }
                        b'n' => {
                            self.advance();
                            out.push(b'\n');
                        }
                        b'r' => {
                            self.advance();
                            out.push(b'\r');
                        }
                        b't' => {
                            self.advance();
                            out.push(b'\t');
                        }
                        b'v' => {
                            self.advance();
                            out.push(11);
                        }
                        b'\\' => {
                            self.advance();
                            out.push(b'\\');
                        }
                        b'\'' => {
                            self.advance();
                            out.push(b'\'');
                        }
                        b'"' => {
                            self.advance();
                            out.push(b'"');
                        }
                        b'\n' | b'\r' => {
                            self.newline();
                            out.push(b'\n');
                        }
                        b'z' => {
                            // Skip the following span of whitespace,
                            // newlines included.
                            self.advance();
                            loop {
                                match self.peek() {
                                    b'\n' | b'\r' => self.newline(),
                                    b' ' | b'\t' | 0x0b | 0x0c => {
                                        self.advance();
                                    }
                                    _ => break,
                                }
                            }
                        }
                        d if d.is_ascii_digit() => {
                            let mut value: u32 = 0;
                            let mut digits = 0;
                            while digits < 3 && self.peek().is_ascii_digit() {
                                value = value * 10 + (self.advance() - b'0') as u32;
                                digits += 1;
                            }
                            if value > 255 {
                                return self.error_token(
                                    "decimal escape too large".to_string(),
                                    line,
                                    column,
                                );
                            }
                            out.push(value as u8);
                        }
                        _ => {
                            return self.error_token(
                                "invalid escape sequence".to_string(),
                                line,
                                column,
                            );
                        }
                    }
                }
                c if c == quote => {
                    self.advance();
                    return Token {
                        kind: TokenKind::Str,
                        lexeme: SmolStr::default(),
                        line,
                        column,
                        number: 0.0,
                        string: out,
                    };
                }
                _ => out.push(self.advance()),
            }
        }
    }

    /// Count the '=' run of a long-bracket delimiter.
    fn skip_eq(&mut self) -> usize {
        let mut n = 0;
        while self.peek() == b'=' {
            self.advance();
            n += 1;
        }
        n
    }

    /// Body of a `[=*[ ... ]=*]` long string or comment; the opening
    /// bracket has been consumed.
    fn read_long_bracket(&mut self, level: usize) -> Result<Vec<u8>, String> {
        // A newline right after the opening bracket is skipped.
        if self.peek() == b'\n' || self.peek() == b'\r' {
            self.newline();
        }
        let mut out = Vec::new();
        loop {
            if self.is_eof() {
                return Err("unterminated long string".to_string());
            }
            match self.peek() {
                b']' => {
                    let save = self.pos;
                    let save_col = self.column;
                    self.advance();
                    let mut eqs = 0;
                    while self.peek() == b'=' {
                        self.advance();
                        eqs += 1;
                    }
                    if eqs == level && self.peek() == b']' {
                        self.advance();
                        return Ok(out);
                    }
                    self.pos = save;
                    self.column = save_col;
                    out.push(self.advance());
                }
                b'\n' | b'\r' => {
                    self.newline();
                    out.push(b'\n');
                }
                _ => out.push(self.advance()),
            }
        }
    }
}
