//! Tokenizer for `.proto` sources

use crate::error::ProtoError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(u64),
    Float(f64),
    Str(String),
    Symbol(char),
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{s}'"),
            Token::Int(n) => format!("integer {n}"),
            Token::Float(f) => format!("number {f}"),
            Token::Str(s) => format!("string \"{s}\""),
            Token::Symbol(c) => format!("'{c}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

pub struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(file: &'a str, source: &str) -> Self {
        Self {
            file,
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ProtoError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let Some(c) = self.peek() else { break };
            let (line, column) = (self.line, self.column);
            let token = if c.is_ascii_alphabetic() || c == '_' {
                self.ident()
            } else if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string()?
            } else {
                self.bump();
                Token::Symbol(c)
            };
            // adjacent string literals concatenate
            if let (Token::Str(next), Some(Spanned { token: Token::Str(prev), .. })) =
                (&token, tokens.last_mut())
            {
                prev.push_str(next);
                continue;
            }
            tokens.push(Spanned { token, line, column });
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ProtoError {
        ProtoError::Syntax {
            file: self.file.to_string(),
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), ProtoError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn ident(&mut self) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::Ident(s)
    }

    fn number(&mut self) -> Result<Token, ProtoError> {
        let mut s = String::new();
        let hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X'));
        if hex {
            self.bump();
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    s.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return u64::from_str_radix(&s, 16)
                .map(Token::Int)
                .map_err(|_| self.error(format!("invalid hex literal 0x{s}")));
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
            } else if c == '.' {
                is_float = true;
                s.push(c);
            } else if c == 'e' || c == 'E' {
                is_float = true;
                s.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    s.push(sign);
                } else {
                    continue;
                }
            } else if (c == 'f' || c == 'F') && is_float {
                self.bump();
                break;
            } else {
                break;
            }
            self.bump();
        }

        if is_float {
            return s
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid float literal {s}")));
        }
        if s.len() > 1 && s.starts_with('0') {
            return u64::from_str_radix(&s[1..], 8)
                .map(Token::Int)
                .map_err(|_| self.error(format!("invalid octal literal {s}")));
        }
        s.parse::<u64>()
            .map(Token::Int)
            .map_err(|_| self.error(format!("integer literal {s} out of range")))
    }

    fn string(&mut self) -> Result<Token, ProtoError> {
        let quote = self.bump().unwrap_or('"');
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal"));
            };
            match c {
                '\n' => return Err(self.error("newline in string literal")),
                c if c == quote => break,
                '\\' => out.push(self.escape()?),
                c => out.push(c),
            }
        }
        Ok(Token::Str(out))
    }

    fn escape(&mut self) -> Result<char, ProtoError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape sequence"));
        };
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'a' => '\u{7}',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '\\' | '\'' | '"' | '?' => c,
            'x' | 'X' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match self.peek().and_then(|d| d.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            digits += 1;
                            self.bump();
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return Err(self.error("\\x escape without hex digits"));
                }
                char::from_u32(value).unwrap_or('\u{fffd}')
            }
            '0'..='7' => {
                let mut value = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            self.bump();
                        }
                        None => break,
                    }
                }
                char::from_u32(value).unwrap_or('\u{fffd}')
            }
            other => return Err(self.error(format!("unknown escape sequence \\{other}"))),
        };
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new("test.proto", src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_skips_comments() {
        let toks = tokens("// line\nmessage /* block */ Foo {}");
        assert_eq!(
            toks,
            vec![
                Token::Ident("message".into()),
                Token::Ident("Foo".into()),
                Token::Symbol('{'),
                Token::Symbol('}'),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens("0x1F 017 42 1.5 2e3"), vec![
            Token::Int(31),
            Token::Int(15),
            Token::Int(42),
            Token::Float(1.5),
            Token::Float(2000.0),
        ]);
    }

    #[test]
    fn test_string_escapes_and_concatenation() {
        assert_eq!(tokens(r#""a\"b" 'c' "\x41""#), vec![Token::Str("a\"bcA".into())]);
    }

    #[test]
    fn test_unterminated_comment_is_error() {
        assert!(Lexer::new("x.proto", "/* never closed").tokenize().is_err());
    }
}
