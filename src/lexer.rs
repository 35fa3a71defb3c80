// ZIL Lexer
// Tokenizes ZIL source text into a stream of tokens, one per call.
// ZIL is case-insensitive: atoms are uppercased on read.

use crate::ast::SourceLocation;
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token.
    pub text: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    LeftAngle,
    RightAngle,
    LeftParen,
    RightParen,
    /// `!` - runtime indirection marker
    Indirection,
    Number(i16),
    String(String),
    Atom(String),
    /// `,NAME`
    GlobalVariable(String),
    /// `.NAME`
    LocalVariable(String),
    /// `P?NAME`
    PropertyReference(String),
    /// `F?NAME`
    FlagReference(String),
    /// `;` to end of line; the parser discards these
    LineComment(String),
    EndOfFile,
    Invalid(char),
}

pub struct Lexer {
    input: Vec<char>,
    file: String,
    position: usize,
    line: usize,
    column: usize,
    current_char: Option<char>,
    /// Open `<` and `(` pending a match.
    bracket_stack: Vec<char>,
    bracket_mismatch: bool,
}

fn is_atom_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || "-?#.=+*/&|%\\'".contains(ch)
}

fn is_atom_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "-?#.=+*/&|%\\'".contains(ch)
}

impl Lexer {
    pub fn new(input: &str, file: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Lexer {
            input: chars,
            file: file.to_string(),
            position: 0,
            line: 1,
            column: 1,
            current_char,
            bracket_stack: Vec::new(),
            bracket_mismatch: false,
        }
    }

    /// Tokenize the whole input. The trailing EndOfFile token is included.
    pub fn tokenize_all(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::EndOfFile;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    /// True when every `<` had a matching `>` and every `(` a matching `)`.
    pub fn are_brackets_balanced(&self) -> bool {
        self.bracket_stack.is_empty() && !self.bracket_mismatch
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();

        let start_pos = self.position;
        let location = self.location();

        let Some(ch) = self.current_char else {
            // EOF is a sentinel; repeated calls keep yielding it.
            return Ok(Token {
                kind: TokenKind::EndOfFile,
                text: String::new(),
                location,
            });
        };

        let kind = match ch {
            '<' => {
                self.advance();
                self.bracket_stack.push('<');
                TokenKind::LeftAngle
            }
            '>' => {
                self.advance();
                if self.bracket_stack.pop() != Some('<') {
                    self.bracket_mismatch = true;
                }
                TokenKind::RightAngle
            }
            '(' => {
                self.advance();
                self.bracket_stack.push('(');
                TokenKind::LeftParen
            }
            ')' => {
                self.advance();
                if self.bracket_stack.pop() != Some('(') {
                    self.bracket_mismatch = true;
                }
                TokenKind::RightParen
            }
            ';' => {
                self.advance();
                let text = self.read_to_line_end();
                TokenKind::LineComment(text)
            }
            '"' => {
                self.advance();
                let value = self.read_string(&location)?;
                TokenKind::String(value)
            }
            '!' => {
                self.advance();
                TokenKind::Indirection
            }
            ',' => {
                self.advance();
                match self.current_char {
                    Some(c) if is_atom_start(c) => {
                        let name = self.read_atom_name();
                        TokenKind::GlobalVariable(name)
                    }
                    Some(c) => {
                        return Err(ParseError::InvalidSyntax(
                            format!("unexpected character '{}' after ','", c),
                            location,
                        ));
                    }
                    None => return Err(ParseError::UnexpectedEndOfFile(location)),
                }
            }
            '.' => {
                self.advance();
                match self.current_char {
                    // A leading dot followed by a digit is a number.
                    Some(c) if c.is_ascii_digit() => {
                        let value = self.read_decimal(false, &location)?;
                        TokenKind::Number(value)
                    }
                    Some(c) if is_atom_start(c) => {
                        let name = self.read_atom_name();
                        TokenKind::LocalVariable(name)
                    }
                    Some(c) => {
                        return Err(ParseError::InvalidSyntax(
                            format!("unexpected character '{}' after '.'", c),
                            location,
                        ));
                    }
                    None => return Err(ParseError::UnexpectedEndOfFile(location)),
                }
            }
            '$' => {
                self.advance();
                let value = self.read_based(16, &location)?;
                TokenKind::Number(value)
            }
            '%' if self.peek_is_based_digit(8) => {
                self.advance();
                let value = self.read_based(8, &location)?;
                TokenKind::Number(value)
            }
            '#' if self.peek_is_based_digit(2) => {
                self.advance();
                let value = self.read_based(2, &location)?;
                TokenKind::Number(value)
            }
            '-' if self.peek_is_digit() => {
                let value = self.read_decimal(true, &location)?;
                TokenKind::Number(value)
            }
            c if c.is_ascii_digit() => {
                let value = self.read_decimal(false, &location)?;
                TokenKind::Number(value)
            }
            '\\' => {
                // Escaped atom: the next character starts the atom literally,
                // so names may begin with '#', digits, etc.
                self.advance();
                match self.current_char {
                    Some(first) => {
                        self.advance();
                        let mut name = String::new();
                        name.push(first.to_ascii_uppercase());
                        name.push_str(&self.read_atom_name());
                        TokenKind::Atom(name)
                    }
                    None => return Err(ParseError::UnexpectedEndOfFile(location)),
                }
            }
            c if is_atom_start(c) => {
                let name = self.read_atom_name();
                self.classify_atom(name)
            }
            c => {
                self.advance();
                TokenKind::Invalid(c)
            }
        };

        let text: String = self.input[start_pos..self.position].iter().collect();
        Ok(Token {
            kind,
            text,
            location,
        })
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.line, self.column)
    }

    fn advance(&mut self) {
        if let Some('\n') = self.current_char {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn peek_is_digit(&self) -> bool {
        self.peek().is_some_and(|c| c.is_ascii_digit())
    }

    /// True when the character after the current prefix char begins a
    /// number in the given radix (optionally signed). Distinguishes `%FOO`
    /// and `#FOO` atoms from `%17` octal and `#101` binary literals.
    fn peek_is_based_digit(&self, radix: u32) -> bool {
        match self.peek() {
            Some('-') => self
                .input
                .get(self.position + 2)
                .is_some_and(|c| c.is_digit(radix)),
            Some(c) => c.is_digit(radix),
            None => false,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_to_line_end(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.current_char {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        text
    }

    fn read_string(&mut self, start: &SourceLocation) -> Result<String, ParseError> {
        let mut value = String::new();

        while let Some(ch) = self.current_char {
            match ch {
                '"' => {
                    self.advance();
                    return Ok(value);
                }
                '\\' => {
                    self.advance();
                    match self.current_char {
                        Some('n') => {
                            value.push('\n');
                            self.advance();
                        }
                        Some('t') => {
                            value.push('\t');
                            self.advance();
                        }
                        Some('r') => {
                            value.push('\r');
                            self.advance();
                        }
                        Some('"') => {
                            value.push('"');
                            self.advance();
                        }
                        Some('\\') => {
                            value.push('\\');
                            self.advance();
                        }
                        Some('x') => {
                            self.advance();
                            let mut code = String::new();
                            for _ in 0..2 {
                                match self.current_char {
                                    Some(c) if c.is_ascii_hexdigit() => {
                                        code.push(c);
                                        self.advance();
                                    }
                                    _ => {
                                        return Err(ParseError::InvalidSyntax(
                                            "\\x escape requires two hex digits".to_string(),
                                            start.clone(),
                                        ));
                                    }
                                }
                            }
                            let byte = u8::from_str_radix(&code, 16).unwrap();
                            value.push(byte as char);
                        }
                        Some(c) => {
                            value.push(c);
                            self.advance();
                        }
                        None => return Err(ParseError::UnexpectedEndOfFile(start.clone())),
                    }
                }
                // Unescaped newlines are allowed inside strings.
                ch => {
                    value.push(ch);
                    self.advance();
                }
            }
        }

        Err(ParseError::UnexpectedEndOfFile(start.clone()))
    }

    /// Decimal integer with 16-bit wraparound. `negative` is set when the
    /// caller already saw a leading '-'.
    fn read_decimal(
        &mut self,
        negative: bool,
        start: &SourceLocation,
    ) -> Result<i16, ParseError> {
        if negative {
            self.advance(); // consume '-'
        }

        let mut value: i16 = 0;
        let mut any = false;
        while let Some(ch) = self.current_char {
            if let Some(d) = ch.to_digit(10) {
                value = value.wrapping_mul(10).wrapping_add(d as i16);
                any = true;
                self.advance();
            } else {
                break;
            }
        }

        if !any {
            return Err(ParseError::InvalidSyntax(
                "invalid number".to_string(),
                start.clone(),
            ));
        }

        Ok(if negative { value.wrapping_neg() } else { value })
    }

    /// Hex/octal/binary literal after its prefix character. The bit
    /// pattern wraps to 16 bits.
    fn read_based(&mut self, radix: u32, start: &SourceLocation) -> Result<i16, ParseError> {
        let negative = if self.current_char == Some('-') {
            self.advance();
            true
        } else {
            false
        };

        let mut value: u16 = 0;
        let mut any = false;
        while let Some(ch) = self.current_char {
            if let Some(d) = ch.to_digit(radix) {
                value = value.wrapping_mul(radix as u16).wrapping_add(d as u16);
                any = true;
                self.advance();
            } else {
                break;
            }
        }

        if !any {
            return Err(ParseError::InvalidSyntax(
                "invalid number".to_string(),
                start.clone(),
            ));
        }

        let value = value as i16;
        Ok(if negative { value.wrapping_neg() } else { value })
    }

    fn read_atom_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(ch) = self.current_char {
            if is_atom_continue(ch) {
                name.push(ch.to_ascii_uppercase());
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    /// `P?NAME` and `F?NAME` atoms are property and flag references.
    fn classify_atom(&self, name: String) -> TokenKind {
        if let Some(rest) = name.strip_prefix("P?") {
            if !rest.is_empty() {
                return TokenKind::PropertyReference(rest.to_string());
            }
        }
        if let Some(rest) = name.strip_prefix("F?") {
            if !rest.is_empty() {
                return TokenKind::FlagReference(rest.to_string());
            }
        }
        TokenKind::Atom(name)
    }
}

#[cfg(test)]
#[path = "lexer_tests.rs"]
mod tests;
