//! Recursive-descent parser producing a [`ProtoFile`]

use super::ast::*;
use super::lexer::{Lexer, Spanned, Token};
use crate::error::ProtoError;

/// Parse a single `.proto` source.
pub fn parse(file_name: &str, source: &str) -> Result<ProtoFile, ProtoError> {
    let tokens = Lexer::new(file_name, source).tokenize()?;
    Parser {
        file: file_name,
        tokens,
        pos: 0,
    }
    .file()
}

struct Parser<'a> {
    file: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ProtoError {
        let (line, column) = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| (s.line, s.column))
            .unwrap_or((1, 1));
        ProtoError::Syntax {
            file: self.file.to_string(),
            line,
            column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ProtoError {
        match self.peek() {
            Some(token) => self.error(format!("expected {expected}, found {}", token.describe())),
            None => self.error(format!("expected {expected}, found end of file")),
        }
    }

    fn is_symbol(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token::Symbol(s)) if *s == c)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), ProtoError> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{c}'")))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ProtoError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{kw}'")))
        }
    }

    fn ident(&mut self) -> Result<String, ProtoError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.next() {
                Some(Token::Ident(s)) => Ok(s),
                _ => Err(self.unexpected("identifier")),
            },
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn string(&mut self) -> Result<String, ProtoError> {
        match self.peek() {
            Some(Token::Str(_)) => match self.next() {
                Some(Token::Str(s)) => Ok(s),
                _ => Err(self.unexpected("string literal")),
            },
            _ => Err(self.unexpected("string literal")),
        }
    }

    /// `ident { "." ident }`
    fn full_ident(&mut self) -> Result<String, ProtoError> {
        let mut name = self.ident()?;
        while self.is_symbol('.') && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    /// Type reference, optionally absolute (leading dot)
    fn type_name(&mut self) -> Result<String, ProtoError> {
        if self.eat_symbol('.') {
            Ok(format!(".{}", self.full_ident()?))
        } else {
            self.full_ident()
        }
    }

    fn signed_int(&mut self) -> Result<i64, ProtoError> {
        let negative = self.eat_symbol('-');
        let Some(Token::Int(n)) = self.peek().cloned() else {
            return Err(self.unexpected("integer"));
        };
        let value = i64::try_from(n).map_err(|_| self.error(format!("integer {n} out of range")))?;
        self.pos += 1;
        Ok(if negative { -value } else { value })
    }

    fn end_statement(&mut self) -> Result<(), ProtoError> {
        self.expect_symbol(';')
    }

    fn file(mut self) -> Result<ProtoFile, ProtoError> {
        let mut file = ProtoFile::default();
        let mut seen_statement = false;
        while self.peek().is_some() {
            if self.eat_symbol(';') {
                continue;
            }
            let keyword = match self.peek() {
                Some(Token::Ident(s)) => s.clone(),
                _ => return Err(self.unexpected("top-level declaration")),
            };
            match keyword.as_str() {
                "syntax" => {
                    if seen_statement {
                        return Err(self.error("syntax must be the first statement"));
                    }
                    self.pos += 1;
                    self.expect_symbol('=')?;
                    let value = self.string()?;
                    file.syntax = match value.as_str() {
                        "proto2" => Syntax::Proto2,
                        "proto3" => Syntax::Proto3,
                        other => return Err(self.error(format!("unsupported syntax \"{other}\""))),
                    };
                    self.end_statement()?;
                }
                "edition" => return Err(self.error("editions are not supported")),
                "package" => {
                    self.pos += 1;
                    if file.package.is_some() {
                        return Err(self.error("multiple package declarations"));
                    }
                    file.package = Some(self.full_ident()?);
                    self.end_statement()?;
                }
                "import" => {
                    self.pos += 1;
                    let kind = if self.eat_keyword("public") {
                        ImportKind::Public
                    } else if self.eat_keyword("weak") {
                        ImportKind::Weak
                    } else {
                        ImportKind::Default
                    };
                    let path = self.string()?;
                    self.end_statement()?;
                    file.imports.push(Import { path, kind });
                }
                "option" => {
                    self.pos += 1;
                    file.options.push(self.option_body()?);
                    self.end_statement()?;
                }
                "message" => {
                    self.pos += 1;
                    file.messages.push(self.message()?);
                }
                "enum" => {
                    self.pos += 1;
                    file.enums.push(self.enumeration()?);
                }
                "service" => {
                    self.pos += 1;
                    file.services.push(self.service()?);
                }
                "extend" => {
                    self.pos += 1;
                    file.extends.push(self.extend()?);
                }
                other => return Err(self.error(format!("unexpected '{other}' at top level"))),
            }
            seen_statement = true;
        }
        Ok(file)
    }

    /// `name = value` (the `option` keyword is already consumed)
    fn option_body(&mut self) -> Result<OptionDecl, ProtoError> {
        let name = self.option_name()?;
        self.expect_symbol('=')?;
        let value = self.constant()?;
        Ok(OptionDecl { name, value })
    }

    fn option_name(&mut self) -> Result<Vec<OptionNamePart>, ProtoError> {
        let mut parts = Vec::new();
        loop {
            if self.eat_symbol('(') {
                let name = self.type_name()?;
                self.expect_symbol(')')?;
                parts.push(OptionNamePart {
                    name,
                    is_extension: true,
                });
            } else {
                parts.push(OptionNamePart {
                    name: self.ident()?,
                    is_extension: false,
                });
            }
            if !self.eat_symbol('.') {
                break;
            }
        }
        Ok(parts)
    }

    fn constant(&mut self) -> Result<OptionValue, ProtoError> {
        let negative = if self.eat_symbol('-') {
            true
        } else {
            self.eat_symbol('+');
            false
        };
        if self.peek().is_none() {
            return Err(self.unexpected("constant"));
        }
        match self.next() {
            Some(Token::Int(n)) => {
                let n = n as i128;
                Ok(OptionValue::Int(if negative { -n } else { n }))
            }
            Some(Token::Float(f)) => Ok(float_constant(if negative { -f } else { f })),
            Some(Token::Str(s)) if !negative => Ok(OptionValue::Str(s)),
            Some(Token::Ident(s)) => {
                self.pos -= 1;
                let ident = self.full_ident()?;
                match (ident.as_str(), negative) {
                    ("true", false) => Ok(OptionValue::Bool(true)),
                    ("false", false) => Ok(OptionValue::Bool(false)),
                    (_, true) => Ok(OptionValue::Ident(format!("-{s}"))),
                    _ => Ok(OptionValue::Ident(ident)),
                }
            }
            Some(Token::Symbol('{')) if !negative => self.message_literal('}'),
            Some(Token::Symbol('<')) if !negative => self.message_literal('>'),
            Some(Token::Symbol('[')) if !negative => self.list_literal(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("constant"))
            }
        }
    }

    fn message_literal(&mut self, close: char) -> Result<OptionValue, ProtoError> {
        let mut entries = Vec::new();
        while !self.eat_symbol(close) {
            let key = if self.eat_symbol('[') {
                let name = self.full_ident()?;
                self.expect_symbol(']')?;
                format!("[{name}]")
            } else {
                self.ident()?
            };
            let value = if self.eat_symbol(':') {
                self.constant()?
            } else if self.eat_symbol('{') {
                self.message_literal('}')?
            } else if self.eat_symbol('<') {
                self.message_literal('>')?
            } else {
                return Err(self.unexpected("':' or message value"));
            };
            entries.push((key, value));
            if !self.eat_symbol(',') {
                self.eat_symbol(';');
            }
            if self.peek().is_none() {
                return Err(self.unexpected(&format!("'{close}'")));
            }
        }
        Ok(OptionValue::Message(entries))
    }

    fn list_literal(&mut self) -> Result<OptionValue, ProtoError> {
        let mut items = Vec::new();
        if self.eat_symbol(']') {
            return Ok(OptionValue::List(items));
        }
        loop {
            items.push(self.constant()?);
            if self.eat_symbol(']') {
                break;
            }
            self.expect_symbol(',')?;
        }
        Ok(OptionValue::List(items))
    }

    /// `[a = 1, (b).c = 2]`, or nothing
    fn bracketed_options(&mut self) -> Result<Vec<OptionDecl>, ProtoError> {
        let mut options = Vec::new();
        if !self.eat_symbol('[') {
            return Ok(options);
        }
        loop {
            options.push(self.option_body()?);
            if self.eat_symbol(']') {
                break;
            }
            self.expect_symbol(',')?;
        }
        Ok(options)
    }

    fn message(&mut self) -> Result<MessageDecl, ProtoError> {
        let mut message = MessageDecl {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_symbol(';') {
                continue;
            }
            let keyword = match self.peek() {
                Some(Token::Ident(s)) => s.clone(),
                Some(Token::Symbol('.')) => String::new(),
                _ => return Err(self.unexpected("message member")),
            };
            let next_is_ident = matches!(self.peek_at(1), Some(Token::Ident(_)));
            match keyword.as_str() {
                "message" if next_is_ident => {
                    self.pos += 1;
                    message.messages.push(self.message()?);
                }
                "enum" if next_is_ident => {
                    self.pos += 1;
                    message.enums.push(self.enumeration()?);
                }
                "extend" if next_is_ident || matches!(self.peek_at(1), Some(Token::Symbol('.'))) => {
                    self.pos += 1;
                    message.extends.push(self.extend()?);
                }
                "option" if !matches!(self.peek_at(1), Some(Token::Ident(_))) || self.option_follows() => {
                    self.pos += 1;
                    message.options.push(self.option_body()?);
                    self.end_statement()?;
                }
                "oneof" if next_is_ident => {
                    self.pos += 1;
                    self.oneof(&mut message)?;
                }
                "reserved" if !next_is_ident => {
                    self.pos += 1;
                    self.reserved(&mut message.reserved_ranges, &mut message.reserved_names)?;
                }
                "extensions" if !next_is_ident => {
                    self.pos += 1;
                    message.extension_ranges.extend(self.ranges()?);
                    // range options are accepted and dropped
                    self.bracketed_options()?;
                    self.end_statement()?;
                }
                _ => {
                    let field = self.field(None)?;
                    message.fields.push(field);
                }
            }
        }
        Ok(message)
    }

    /// `option (x).y = ...` vs. a field whose type happens to be named `option`
    fn option_follows(&self) -> bool {
        matches!(
            (self.peek_at(1), self.peek_at(2)),
            (Some(Token::Ident(_)), Some(Token::Symbol('=')))
                | (Some(Token::Ident(_)), Some(Token::Symbol('.')))
        )
    }

    fn field(&mut self, oneof: Option<usize>) -> Result<FieldDecl, ProtoError> {
        let label = if oneof.is_some() {
            None
        } else if self.is_keyword("required") && !matches!(self.peek_at(1), Some(Token::Symbol('='))) {
            self.pos += 1;
            Some(FieldLabel::Required)
        } else if self.is_keyword("optional") && !matches!(self.peek_at(1), Some(Token::Symbol('='))) {
            self.pos += 1;
            Some(FieldLabel::Optional)
        } else if self.is_keyword("repeated") && !matches!(self.peek_at(1), Some(Token::Symbol('='))) {
            self.pos += 1;
            Some(FieldLabel::Repeated)
        } else {
            None
        };

        if self.is_keyword("group") && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            return Err(self.error("groups are not supported"));
        }

        let mut map = None;
        let type_name = if self.is_keyword("map") && matches!(self.peek_at(1), Some(Token::Symbol('<'))) {
            self.pos += 2;
            let key = self.type_name()?;
            self.expect_symbol(',')?;
            let value = self.type_name()?;
            self.expect_symbol('>')?;
            map = Some((key, value));
            String::new()
        } else {
            self.type_name()?
        };

        let name = self.ident()?;
        self.expect_symbol('=')?;
        let number = self.signed_int()?;
        let options = self.bracketed_options()?;
        self.end_statement()?;

        Ok(FieldDecl {
            name,
            number,
            label,
            type_name,
            map,
            options,
            oneof,
        })
    }

    fn oneof(&mut self, message: &mut MessageDecl) -> Result<(), ProtoError> {
        let index = message.oneofs.len();
        message.oneofs.push(OneofDecl {
            name: self.ident()?,
            options: Vec::new(),
        });
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") && self.option_follows() {
                self.pos += 1;
                let option = self.option_body()?;
                message.oneofs[index].options.push(option);
                self.end_statement()?;
                continue;
            }
            let field = self.field(Some(index))?;
            message.fields.push(field);
        }
        Ok(())
    }

    fn ranges(&mut self) -> Result<Vec<NumberRange>, ProtoError> {
        let mut ranges = Vec::new();
        loop {
            let start = self.signed_int()?;
            let end = if self.eat_keyword("to") {
                if self.eat_keyword("max") {
                    i64::MAX
                } else {
                    self.signed_int()?
                }
            } else {
                start
            };
            ranges.push(NumberRange { start, end });
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(ranges)
    }

    fn reserved(&mut self, ranges: &mut Vec<NumberRange>, names: &mut Vec<String>) -> Result<(), ProtoError> {
        if matches!(self.peek(), Some(Token::Str(_))) {
            loop {
                names.push(self.string()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
        } else {
            ranges.extend(self.ranges()?);
        }
        self.end_statement()
    }

    fn enumeration(&mut self) -> Result<EnumDecl, ProtoError> {
        let mut decl = EnumDecl {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.is_keyword("option") && !matches!(self.peek_at(1), Some(Token::Symbol('='))) {
                self.pos += 1;
                decl.options.push(self.option_body()?);
                self.end_statement()?;
                continue;
            }
            if self.is_keyword("reserved") && !matches!(self.peek_at(1), Some(Token::Symbol('='))) {
                self.pos += 1;
                self.reserved(&mut decl.reserved_ranges, &mut decl.reserved_names)?;
                continue;
            }
            let name = self.ident()?;
            self.expect_symbol('=')?;
            let number = self.signed_int()?;
            let options = self.bracketed_options()?;
            self.end_statement()?;
            decl.values.push(EnumValueDecl { name, number, options });
        }
        Ok(decl)
    }

    fn service(&mut self) -> Result<ServiceDecl, ProtoError> {
        let mut service = ServiceDecl {
            name: self.ident()?,
            ..Default::default()
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_symbol(';') {
                continue;
            }
            if self.eat_keyword("option") {
                service.options.push(self.option_body()?);
                self.end_statement()?;
                continue;
            }
            self.expect_keyword("rpc")?;
            service.methods.push(self.method()?);
        }
        Ok(service)
    }

    fn method(&mut self) -> Result<MethodDecl, ProtoError> {
        let name = self.ident()?;
        let (client_streaming, input_type) = self.method_type()?;
        self.expect_keyword("returns")?;
        let (server_streaming, output_type) = self.method_type()?;
        let mut options = Vec::new();
        if self.eat_symbol('{') {
            while !self.eat_symbol('}') {
                if self.peek().is_none() {
                    return Err(self.unexpected("'}'"));
                }
                if self.eat_symbol(';') {
                    continue;
                }
                self.expect_keyword("option")?;
                options.push(self.option_body()?);
                self.end_statement()?;
            }
            self.eat_symbol(';');
        } else {
            self.end_statement()?;
        }
        Ok(MethodDecl {
            name,
            input_type,
            output_type,
            client_streaming,
            server_streaming,
            options,
        })
    }

    /// `( [stream] Type )`
    fn method_type(&mut self) -> Result<(bool, String), ProtoError> {
        self.expect_symbol('(')?;
        let streaming = self.is_keyword("stream")
            && matches!(self.peek_at(1), Some(Token::Ident(_)) | Some(Token::Symbol('.')));
        if streaming {
            self.pos += 1;
        }
        let type_name = self.type_name()?;
        self.expect_symbol(')')?;
        Ok((streaming, type_name))
    }

    fn extend(&mut self) -> Result<ExtendDecl, ProtoError> {
        let extendee = self.type_name()?;
        self.expect_symbol('{')?;
        let mut fields = Vec::new();
        while !self.eat_symbol('}') {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_symbol(';') {
                continue;
            }
            fields.push(self.field(None)?);
        }
        Ok(ExtendDecl { extendee, fields })
    }
}

/// Decimal literals that overflow become the `inf` identifiers so they
/// render and re-parse to the same value.
fn float_constant(f: f64) -> OptionValue {
    match f {
        f if f.is_nan() => OptionValue::Ident("nan".to_string()),
        f if f == f64::INFINITY => OptionValue::Ident("inf".to_string()),
        f if f == f64::NEG_INFINITY => OptionValue::Ident("-inf".to_string()),
        f => OptionValue::Float(f),
    }
}
