//! Recursive-descent parser producing the AST of a single `.proto` file.
//!
//! The parser is predictive over the token stream from [`crate::lexer`].
//! Errors do not abort the parse: each one is recorded, the parser skips to
//! the next statement boundary, and parsing resumes until EOF or the error
//! cap is reached. Callers decide whether a non-empty error list is a
//! failure (strict mode) or a set of warnings (lenient mode).

use std::collections::{HashMap, HashSet};

use crate::ast::{
    Enumeration, EnumValue, Extend, Field, FieldType, File, Import, ImportKind, Label, MapType,
    Message, Method, Oneof, OptionName, OptionNamePart, OptionValue, ProtoOption, ReservedRange,
    ScalarType, Service,
};
use crate::error::{LexError, ParseError};
use crate::lexer;
use crate::token::{Keyword, Token, TokenKind};
use crate::well_known;

/// Largest valid field number (2^29 - 1).
pub const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Field numbers 19000-19999 are reserved for the protobuf implementation.
const IMPLEMENTATION_RESERVED: std::ops::RangeInclusive<i64> = 19_000..=19_999;

const DEFAULT_MAX_ERRORS: usize = 100;

/// Parses a complete source string, returning the AST together with every
/// accumulated error. An empty error list means the parse succeeded.
pub(crate) fn parse(source: &str) -> (File, Vec<ParseError>) {
    let tokens = match lexer::tokenize(source) {
        Ok(tokens) => tokens,
        Err(err) => return (File::default(), vec![err.into()]),
    };
    parse_tokens(tokens)
}

/// Parses a pre-lexed token stream (the streaming path lands here).
pub(crate) fn parse_tokens(tokens: Vec<Token>) -> (File, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    let file = parser.parse_file();
    (file, parser.errors)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
    max_errors: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Parser {
        debug_assert!(matches!(tokens.last(), Some(t) if t.is_eof()));
        Parser {
            tokens,
            pos: 0,
            errors: Vec::new(),
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }

    // Primitives -----------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn at_eof(&self) -> bool {
        self.peek().is_eof()
    }

    fn at_limit(&self) -> bool {
        self.errors.len() >= self.max_errors
    }

    fn advance(&mut self) -> &Token {
        let current = self.pos;
        if !self.tokens[current].is_eof() {
            self.pos += 1;
        }
        &self.tokens[current]
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek().keyword() == Some(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn next_is_keyword(&self, keyword: Keyword) -> bool {
        self.peek().keyword() == Some(keyword)
    }

    fn record(&mut self, error: ParseError) {
        if self.errors.len() < self.max_errors {
            self.errors.push(error);
        }
    }

    /// Records an `UnexpectedToken` (or `UnexpectedEof`) for the current
    /// token without consuming it.
    fn unexpected(&mut self, expected: &str) {
        let error = {
            let token = self.peek();
            if token.is_eof() {
                ParseError::UnexpectedEof {
                    expected: expected.to_owned(),
                }
            } else {
                ParseError::UnexpectedToken {
                    expected: expected.to_owned(),
                    found: token.text.clone(),
                    line: token.line,
                    column: token.column,
                }
            }
        };
        self.record(error);
    }

    /// Consumes the expected punctuation or records an error and leaves the
    /// cursor in place so the caller can resynchronize.
    fn expect(&mut self, kind: TokenKind, expected: &str) -> bool {
        if self.eat(&kind) {
            true
        } else {
            self.unexpected(expected);
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> bool {
        if self.eat_keyword(keyword) {
            true
        } else {
            self.unexpected(&format!("`{keyword}`"));
            false
        }
    }

    /// Consumes an identifier. Keywords are accepted as identifiers here;
    /// proto allows `string string = 1;`.
    fn expect_name(&mut self, expected: &str) -> Option<String> {
        match self.peek().ident() {
            Some(name) => {
                let name = name.to_owned();
                self.advance();
                Some(name)
            }
            None => {
                self.unexpected(expected);
                None
            }
        }
    }

    fn expect_string(&mut self, expected: &str) -> Option<String> {
        if let TokenKind::StringLiteral(value) = self.peek_kind() {
            let value = value.clone();
            self.advance();
            Some(value)
        } else {
            self.unexpected(expected);
            None
        }
    }

    fn expect_int(&mut self, expected: &str) -> Option<(u64, usize, usize)> {
        if let TokenKind::IntLiteral(value) = *self.peek_kind() {
            let (line, column) = (self.peek().line, self.peek().column);
            self.advance();
            Some((value, line, column))
        } else {
            self.unexpected(expected);
            None
        }
    }

    /// Skips ahead to the next statement boundary: past the next `;`, or up
    /// to (not past) a statement-starting keyword, `}`, or EOF.
    fn synchronize(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof | TokenKind::RightBrace => return,
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::Keyword(
                    Keyword::Message
                    | Keyword::Enum
                    | Keyword::Service
                    | Keyword::Rpc
                    | Keyword::Syntax
                    | Keyword::Package
                    | Keyword::Import
                    | Keyword::Option,
                ) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // File -----------------------------------------------------------------

    fn parse_file(&mut self) -> File {
        let mut file = File::default();

        if self.next_is_keyword(Keyword::Syntax) {
            self.parse_syntax(&mut file);
        } else {
            self.record(ParseError::MissingSyntax);
            file.syntax = None;
        }

        while !self.at_eof() && !self.at_limit() {
            match self.peek_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Import) => {
                    if let Some(import) = self.parse_import() {
                        file.imports.push(import);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Package) => self.parse_package(&mut file),
                TokenKind::Keyword(Keyword::Option) => {
                    if let Some(option) = self.parse_option_statement() {
                        file.options.push(option);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Message) => {
                    if let Some(message) = self.parse_message() {
                        file.messages.push(message);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Enum) => {
                    if let Some(enumeration) = self.parse_enum() {
                        file.enums.push(enumeration);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Service) => {
                    if let Some(service) = self.parse_service() {
                        file.services.push(service);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Extend) => {
                    if let Some(extend) = self.parse_extend() {
                        file.extends.push(extend);
                    } else {
                        self.synchronize();
                    }
                }
                _ => {
                    self.unexpected("a top-level declaration");
                    self.advance();
                    self.synchronize();
                }
            }
        }

        self.check_file(&file);
        file
    }

    fn parse_syntax(&mut self, file: &mut File) {
        self.expect_keyword(Keyword::Syntax);
        if !self.expect(TokenKind::Equals, "`=`") {
            self.synchronize();
            return;
        }
        match self.expect_string("a syntax string such as \"proto3\"") {
            Some(value) => {
                if value != "proto3" {
                    self.record(ParseError::InvalidSyntaxVersion(value.clone()));
                }
                file.syntax = Some(value);
            }
            None => {
                self.synchronize();
                return;
            }
        }
        self.expect(TokenKind::Semicolon, "`;`");
    }

    fn parse_import(&mut self) -> Option<Import> {
        self.expect_keyword(Keyword::Import);
        let kind = if self.eat_keyword(Keyword::Public) {
            ImportKind::Public
        } else if self.eat_keyword(Keyword::Weak) {
            ImportKind::Weak
        } else {
            ImportKind::Plain
        };
        let path = self.expect_string("an import path string")?;
        if path.is_empty() || path.contains('\\') {
            self.record(ParseError::InvalidImport(path.clone()));
        }
        self.expect(TokenKind::Semicolon, "`;`");
        Some(Import { path, kind })
    }

    fn parse_package(&mut self, file: &mut File) {
        self.expect_keyword(Keyword::Package);
        let name = match self.parse_dotted_name(false, "a package name") {
            Some(name) => name,
            None => {
                self.synchronize();
                return;
            }
        };
        if !is_valid_package_name(&name) {
            self.record(ParseError::InvalidPackageName(name.clone()));
        }
        if file.package.is_some() {
            self.record(ParseError::DuplicatePackageName);
        } else {
            file.package = Some(name);
        }
        self.expect(TokenKind::Semicolon, "`;`");
    }

    /// `ident ( "." ident )*`, optionally with a leading dot for fully
    /// qualified references.
    fn parse_dotted_name(&mut self, allow_leading_dot: bool, expected: &str) -> Option<String> {
        let mut name = String::new();
        if allow_leading_dot && self.eat(&TokenKind::Dot) {
            name.push('.');
        }
        loop {
            name.push_str(&self.expect_name(expected)?);
            if self.eat(&TokenKind::Dot) {
                name.push('.');
            } else {
                return Some(name);
            }
        }
    }

    // Options --------------------------------------------------------------

    fn parse_option_statement(&mut self) -> Option<ProtoOption> {
        self.expect_keyword(Keyword::Option);
        let option = self.parse_option_assignment()?;
        self.expect(TokenKind::Semicolon, "`;`");
        Some(option)
    }

    /// `option-name = value`, shared by option statements and `[…]` lists.
    fn parse_option_assignment(&mut self) -> Option<ProtoOption> {
        let name = self.parse_option_name()?;
        if !self.expect(TokenKind::Equals, "`=`") {
            return None;
        }
        let value = self.parse_option_value()?;
        Some(ProtoOption { name, value })
    }

    fn parse_option_name(&mut self) -> Option<OptionName> {
        let mut parts = Vec::new();
        loop {
            if self.eat(&TokenKind::LeftParen) {
                let name = self.parse_dotted_name(true, "a custom option name")?;
                if !self.expect(TokenKind::RightParen, "`)`") {
                    return None;
                }
                parts.push(OptionNamePart {
                    name,
                    is_extension: true,
                });
            } else {
                let name = self.expect_name("an option name")?;
                parts.push(OptionNamePart {
                    name,
                    is_extension: false,
                });
            }
            if !self.eat(&TokenKind::Dot) {
                return Some(OptionName { parts });
            }
        }
    }

    fn parse_option_value(&mut self) -> Option<OptionValue> {
        match self.peek_kind().clone() {
            TokenKind::StringLiteral(value) => {
                self.advance();
                Some(OptionValue::String(value))
            }
            TokenKind::IntLiteral(value) => {
                let (line, column) = (self.peek().line, self.peek().column);
                self.advance();
                match i64::try_from(value) {
                    Ok(value) => Some(OptionValue::Int(value)),
                    Err(_) => {
                        self.record(ParseError::Lex(LexError::NumberOutOfRange {
                            text: value.to_string(),
                            line,
                            column,
                        }));
                        None
                    }
                }
            }
            TokenKind::FloatLiteral(value) => {
                self.advance();
                Some(OptionValue::Float(value))
            }
            TokenKind::Minus => {
                self.advance();
                match self.peek_kind().clone() {
                    TokenKind::IntLiteral(value) => {
                        let (line, column) = (self.peek().line, self.peek().column);
                        self.advance();
                        match negate(value) {
                            Some(value) => Some(OptionValue::Int(value)),
                            None => {
                                self.record(ParseError::Lex(LexError::NumberOutOfRange {
                                    text: format!("-{value}"),
                                    line,
                                    column,
                                }));
                                None
                            }
                        }
                    }
                    TokenKind::FloatLiteral(value) => {
                        self.advance();
                        Some(OptionValue::Float(-value))
                    }
                    _ => {
                        self.unexpected("a number");
                        None
                    }
                }
            }
            TokenKind::Ident if self.peek().text == "true" => {
                self.advance();
                Some(OptionValue::Bool(true))
            }
            TokenKind::Ident if self.peek().text == "false" => {
                self.advance();
                Some(OptionValue::Bool(false))
            }
            TokenKind::Ident | TokenKind::Keyword(_) => {
                let ident = self.peek().text.clone();
                self.advance();
                Some(OptionValue::Ident(ident))
            }
            TokenKind::LeftBrace => self.parse_message_literal(),
            TokenKind::LeftBracket => self.parse_list_literal(),
            _ => {
                self.unexpected("an option value");
                None
            }
        }
    }

    /// `{ key [:] value … }` with nested braces and lists; separators
    /// between entries (`,` or `;`) are optional.
    fn parse_message_literal(&mut self) -> Option<OptionValue> {
        self.expect(TokenKind::LeftBrace, "`{`");
        let mut entries = Vec::new();
        loop {
            if self.eat(&TokenKind::RightBrace) {
                return Some(OptionValue::Message(entries));
            }
            if self.at_eof() {
                self.record(ParseError::UnexpectedEof {
                    expected: "`}`".to_owned(),
                });
                return None;
            }
            let key = self.expect_name("a message literal field name")?;
            self.eat(&TokenKind::Colon);
            let value = self.parse_option_value()?;
            entries.push((key, value));
            if !self.eat(&TokenKind::Comma) {
                self.eat(&TokenKind::Semicolon);
            }
        }
    }

    fn parse_list_literal(&mut self) -> Option<OptionValue> {
        self.expect(TokenKind::LeftBracket, "`[`");
        let mut values = Vec::new();
        if self.eat(&TokenKind::RightBracket) {
            return Some(OptionValue::List(values));
        }
        loop {
            values.push(self.parse_option_value()?);
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            if !self.expect(TokenKind::RightBracket, "`]` or `,`") {
                return None;
            }
            return Some(OptionValue::List(values));
        }
    }

    /// `[ name = value, … ]` attached to fields and enum values.
    fn parse_field_options(&mut self) -> Vec<ProtoOption> {
        let mut options = Vec::new();
        if !self.eat(&TokenKind::LeftBracket) {
            return options;
        }
        loop {
            match self.parse_option_assignment() {
                Some(option) => options.push(option),
                None => {
                    self.synchronize();
                    return options;
                }
            }
            if self.eat(&TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RightBracket, "`]` or `,`");
            return options;
        }
    }

    // Messages -------------------------------------------------------------

    fn parse_message(&mut self) -> Option<Message> {
        self.expect_keyword(Keyword::Message);
        let name = self.expect_name("a message name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidMessageName(name.clone()));
        }
        if !self.expect(TokenKind::LeftBrace, "`{`") {
            return None;
        }

        let mut message = Message {
            name,
            ..Message::default()
        };

        loop {
            if self.at_limit() {
                return Some(message);
            }
            match self.peek_kind() {
                TokenKind::RightBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.record(ParseError::UnexpectedEof {
                        expected: "`}`".to_owned(),
                    });
                    break;
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Option) => {
                    if let Some(option) = self.parse_option_statement() {
                        message.options.push(option);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Message) => {
                    if let Some(nested) = self.parse_message() {
                        message.messages.push(nested);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Enum) => {
                    if let Some(nested) = self.parse_enum() {
                        message.enums.push(nested);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Oneof) => {
                    if let Some(oneof) = self.parse_oneof() {
                        message.oneofs.push(oneof);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Reserved) => {
                    self.parse_reserved(&mut message);
                }
                TokenKind::Keyword(Keyword::Extensions | Keyword::Group) => {
                    self.unexpected("a proto3 message element (`extensions` and `group` are proto2)");
                    self.advance();
                    self.synchronize();
                }
                _ => {
                    if let Some(field) = self.parse_field(false) {
                        message.fields.push(field);
                    } else {
                        self.synchronize();
                    }
                }
            }
        }

        self.check_message(&message);
        Some(message)
    }

    fn parse_field(&mut self, in_oneof: bool) -> Option<Field> {
        let label = if self.next_is_keyword(Keyword::Repeated)
            || self.next_is_keyword(Keyword::Optional)
            || self.next_is_keyword(Keyword::Required)
        {
            let keyword = self.peek().keyword();
            if in_oneof {
                self.unexpected("a oneof field (labels are not allowed here)");
                self.advance();
                Label::Singular
            } else {
                match keyword {
                    Some(Keyword::Repeated) => {
                        self.advance();
                        Label::Repeated
                    }
                    Some(Keyword::Optional) => {
                        self.advance();
                        Label::Optional
                    }
                    _ => {
                        self.unexpected("a proto3 field (`required` is not supported)");
                        self.advance();
                        Label::Singular
                    }
                }
            }
        } else {
            Label::Singular
        };

        let ty = self.parse_field_type()?;
        let name = self.expect_name("a field name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidFieldName(name.clone()));
        }
        if !self.expect(TokenKind::Equals, "`=`") {
            return None;
        }
        let number = self.parse_field_number()?;
        let options = self.parse_field_options();
        self.expect(TokenKind::Semicolon, "`;`");

        if matches!(ty, FieldType::Map(_)) {
            if label == Label::Repeated {
                self.record(ParseError::RepeatedMapField(name.clone()));
            }
            if in_oneof {
                self.record(ParseError::MapFieldInOneof(name.clone()));
            }
        }

        Some(Field {
            name,
            number,
            label,
            ty,
            options,
        })
    }

    fn parse_field_type(&mut self) -> Option<FieldType> {
        if self.next_is_keyword(Keyword::Map) && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::LeftAngle)) {
            self.advance();
            self.advance();
            let key = match self.scalar_type() {
                Some(key) if key.is_valid_map_key() => key,
                Some(key) => {
                    self.record(ParseError::InvalidMapKeyType(key.as_str().to_owned()));
                    key
                }
                None => {
                    let text = self.peek().text.clone();
                    self.record(ParseError::InvalidMapKeyType(text));
                    self.advance();
                    ScalarType::String
                }
            };
            if !self.expect(TokenKind::Comma, "`,`") {
                return None;
            }
            let value = match self.parse_field_type()? {
                FieldType::Map(_) => {
                    self.unexpected("a non-map value type");
                    return None;
                }
                value => value,
            };
            if !self.expect(TokenKind::RightAngle, "`>`") {
                return None;
            }
            return Some(FieldType::Map(MapType {
                key,
                value: Box::new(value),
            }));
        }

        if let Some(scalar) = self.scalar_type() {
            return Some(FieldType::Scalar(scalar));
        }

        self.parse_dotted_name(true, "a field type").map(FieldType::Named)
    }

    /// Consumes a scalar type keyword if one is next.
    fn scalar_type(&mut self) -> Option<ScalarType> {
        let scalar = match self.peek().keyword()? {
            Keyword::Double => ScalarType::Double,
            Keyword::Float => ScalarType::Float,
            Keyword::Int32 => ScalarType::Int32,
            Keyword::Int64 => ScalarType::Int64,
            Keyword::Uint32 => ScalarType::Uint32,
            Keyword::Uint64 => ScalarType::Uint64,
            Keyword::Sint32 => ScalarType::Sint32,
            Keyword::Sint64 => ScalarType::Sint64,
            Keyword::Fixed32 => ScalarType::Fixed32,
            Keyword::Fixed64 => ScalarType::Fixed64,
            Keyword::Sfixed32 => ScalarType::Sfixed32,
            Keyword::Sfixed64 => ScalarType::Sfixed64,
            Keyword::Bool => ScalarType::Bool,
            Keyword::String => ScalarType::String,
            Keyword::Bytes => ScalarType::Bytes,
            _ => return None,
        };
        // Only a type position follows: `string name`, never `string.foo`.
        if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Dot)) {
            return None;
        }
        self.advance();
        Some(scalar)
    }

    fn parse_field_number(&mut self) -> Option<i32> {
        let negative = self.eat(&TokenKind::Minus);
        let (value, line, column) = self.expect_int("a field number")?;
        let number = if negative {
            match negate(value) {
                Some(number) => number,
                None => {
                    self.record(ParseError::InvalidFieldNumber {
                        number: i64::MIN,
                        line,
                        column,
                    });
                    return None;
                }
            }
        } else {
            i64::try_from(value).unwrap_or(i64::MAX)
        };
        if !(1..=MAX_FIELD_NUMBER as i64).contains(&number)
            || IMPLEMENTATION_RESERVED.contains(&number)
        {
            self.record(ParseError::InvalidFieldNumber {
                number,
                line,
                column,
            });
        }
        Some(i32::try_from(number).unwrap_or(0))
    }

    fn parse_oneof(&mut self) -> Option<Oneof> {
        self.expect_keyword(Keyword::Oneof);
        let name = self.expect_name("a oneof name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidFieldName(name.clone()));
        }
        if !self.expect(TokenKind::LeftBrace, "`{`") {
            return None;
        }
        let mut oneof = Oneof {
            name,
            fields: Vec::new(),
        };
        loop {
            match self.peek_kind() {
                TokenKind::RightBrace => {
                    self.advance();
                    return Some(oneof);
                }
                TokenKind::Eof => {
                    self.record(ParseError::UnexpectedEof {
                        expected: "`}`".to_owned(),
                    });
                    return Some(oneof);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Option) => {
                    // Oneof options are accepted but carry no meaning here.
                    if self.parse_option_statement().is_none() {
                        self.synchronize();
                    }
                }
                _ => {
                    if let Some(field) = self.parse_field(true) {
                        oneof.fields.push(field);
                    } else {
                        self.synchronize();
                    }
                }
            }
        }
    }

    fn parse_reserved(&mut self, message: &mut Message) {
        self.expect_keyword(Keyword::Reserved);
        if matches!(self.peek_kind(), TokenKind::StringLiteral(_)) {
            loop {
                match self.expect_string("a reserved field name") {
                    Some(name) => {
                        if !is_valid_ident(&name) {
                            self.record(ParseError::InvalidFieldName(name.clone()));
                        }
                        message.reserved_names.push(name);
                    }
                    None => {
                        self.synchronize();
                        return;
                    }
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        } else {
            loop {
                let Some(range) = self.parse_reserved_range() else {
                    self.synchronize();
                    return;
                };
                message.reserved_ranges.push(range);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Semicolon, "`;`");
    }

    fn parse_reserved_range(&mut self) -> Option<ReservedRange> {
        let (start, line, column) = self.expect_int("a reserved number or name")?;
        let start = i64::try_from(start).unwrap_or(i64::MAX);
        let end = if self.eat_keyword(Keyword::To) {
            if self.peek().ident() == Some("max") {
                self.advance();
                MAX_FIELD_NUMBER as i64
            } else {
                let (end, ..) = self.expect_int("a number or `max`")?;
                i64::try_from(end).unwrap_or(i64::MAX)
            }
        } else {
            start
        };
        if !(1..=MAX_FIELD_NUMBER as i64).contains(&start)
            || !(1..=MAX_FIELD_NUMBER as i64).contains(&end)
            || start > end
        {
            self.record(ParseError::InvalidFieldNumber {
                number: start.max(end),
                line,
                column,
            });
            return None;
        }
        Some(ReservedRange {
            start: start as i32,
            end: end as i32,
        })
    }

    // Enums ----------------------------------------------------------------

    fn parse_enum(&mut self) -> Option<Enumeration> {
        self.expect_keyword(Keyword::Enum);
        let name = self.expect_name("an enum name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidEnumName(name.clone()));
        }
        if !self.expect(TokenKind::LeftBrace, "`{`") {
            return None;
        }
        let mut enumeration = Enumeration {
            name,
            ..Enumeration::default()
        };
        loop {
            if self.at_limit() {
                return Some(enumeration);
            }
            match self.peek_kind() {
                TokenKind::RightBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.record(ParseError::UnexpectedEof {
                        expected: "`}`".to_owned(),
                    });
                    break;
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Option) => {
                    if let Some(option) = self.parse_option_statement() {
                        enumeration.options.push(option);
                    } else {
                        self.synchronize();
                    }
                }
                _ => {
                    if let Some(value) = self.parse_enum_value() {
                        enumeration.values.push(value);
                    } else {
                        self.synchronize();
                    }
                }
            }
        }
        self.check_enum(&enumeration);
        Some(enumeration)
    }

    fn parse_enum_value(&mut self) -> Option<EnumValue> {
        let name = self.expect_name("an enum value name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidEnumValueName(name.clone()));
        }
        if !self.expect(TokenKind::Equals, "`=`") {
            return None;
        }
        let negative = self.eat(&TokenKind::Minus);
        let (value, line, column) = self.expect_int("an enum value number")?;
        let number = if negative {
            negate(value).unwrap_or(i64::MIN)
        } else {
            i64::try_from(value).unwrap_or(i64::MAX)
        };
        let number = match i32::try_from(number) {
            Ok(number) => number,
            Err(_) => {
                self.record(ParseError::Lex(LexError::NumberOutOfRange {
                    text: number.to_string(),
                    line,
                    column,
                }));
                0
            }
        };
        let options = self.parse_field_options();
        self.expect(TokenKind::Semicolon, "`;`");
        Some(EnumValue {
            name,
            number,
            options,
        })
    }

    // Services -------------------------------------------------------------

    fn parse_service(&mut self) -> Option<Service> {
        self.expect_keyword(Keyword::Service);
        let name = self.expect_name("a service name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidServiceName(name.clone()));
        }
        if !self.expect(TokenKind::LeftBrace, "`{`") {
            return None;
        }
        let mut service = Service {
            name,
            ..Service::default()
        };
        loop {
            if self.at_limit() {
                return Some(service);
            }
            match self.peek_kind() {
                TokenKind::RightBrace => {
                    self.advance();
                    return Some(service);
                }
                TokenKind::Eof => {
                    self.record(ParseError::UnexpectedEof {
                        expected: "`}`".to_owned(),
                    });
                    return Some(service);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Option) => {
                    if let Some(option) = self.parse_option_statement() {
                        service.options.push(option);
                    } else {
                        self.synchronize();
                    }
                }
                TokenKind::Keyword(Keyword::Rpc) => {
                    if let Some(method) = self.parse_rpc() {
                        service.methods.push(method);
                    } else {
                        self.synchronize();
                    }
                }
                _ => {
                    self.unexpected("`rpc`, `option`, or `}`");
                    self.advance();
                    self.synchronize();
                }
            }
        }
    }

    fn parse_rpc(&mut self) -> Option<Method> {
        self.expect_keyword(Keyword::Rpc);
        let name = self.expect_name("an rpc name")?;
        if !is_valid_ident(&name) {
            self.record(ParseError::InvalidRpcName(name.clone()));
        }
        if !self.expect(TokenKind::LeftParen, "`(`") {
            return None;
        }
        let client_streaming = self.eat_keyword(Keyword::Stream);
        let input_type = self.parse_dotted_name(true, "a request type")?;
        if !self.expect(TokenKind::RightParen, "`)`") {
            return None;
        }
        if !self.expect_keyword(Keyword::Returns) {
            return None;
        }
        if !self.expect(TokenKind::LeftParen, "`(`") {
            return None;
        }
        let server_streaming = self.eat_keyword(Keyword::Stream);
        let output_type = self.parse_dotted_name(true, "a response type")?;
        if !self.expect(TokenKind::RightParen, "`)`") {
            return None;
        }

        let mut options = Vec::new();
        if self.eat(&TokenKind::LeftBrace) {
            loop {
                match self.peek_kind() {
                    TokenKind::RightBrace => {
                        self.advance();
                        break;
                    }
                    TokenKind::Eof => {
                        self.record(ParseError::UnexpectedEof {
                            expected: "`}`".to_owned(),
                        });
                        break;
                    }
                    TokenKind::Semicolon => {
                        self.advance();
                    }
                    TokenKind::Keyword(Keyword::Option) => {
                        if let Some(option) = self.parse_option_statement() {
                            options.push(option);
                        } else {
                            self.synchronize();
                        }
                    }
                    _ => {
                        self.unexpected("`option` or `}`");
                        self.advance();
                        self.synchronize();
                    }
                }
            }
        } else {
            self.expect(TokenKind::Semicolon, "`;` or `{`");
        }

        Some(Method {
            name,
            input_type,
            output_type,
            client_streaming,
            server_streaming,
            options,
        })
    }

    // Extends --------------------------------------------------------------

    fn parse_extend(&mut self) -> Option<Extend> {
        self.expect_keyword(Keyword::Extend);
        let target = self.parse_dotted_name(true, "an extend target")?;
        if !well_known::is_extend_target(&target) {
            self.record(ParseError::InvalidExtendTarget(target.clone()));
        }
        if !self.expect(TokenKind::LeftBrace, "`{`") {
            return None;
        }
        let mut extend = Extend {
            target,
            fields: Vec::new(),
        };
        loop {
            match self.peek_kind() {
                TokenKind::RightBrace => {
                    self.advance();
                    return Some(extend);
                }
                TokenKind::Eof => {
                    self.record(ParseError::UnexpectedEof {
                        expected: "`}`".to_owned(),
                    });
                    return Some(extend);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                _ => {
                    if let Some(field) = self.parse_field(false) {
                        extend.fields.push(field);
                    } else {
                        self.synchronize();
                    }
                }
            }
        }
    }

    // Local semantic checks -------------------------------------------------

    fn check_message(&mut self, message: &Message) {
        let mut numbers: HashMap<i32, String> = HashMap::new();
        let mut names: HashSet<String> = HashSet::new();
        let mut errors = Vec::new();

        for field in message.all_fields() {
            if numbers.insert(field.number, field.name.clone()).is_some() {
                errors.push(ParseError::DuplicateFieldNumber {
                    number: field.number,
                    message: message.name.clone(),
                });
            }
            if !names.insert(field.name.clone()) {
                errors.push(ParseError::DuplicateFieldName {
                    name: field.name.clone(),
                    message: message.name.clone(),
                });
            }
            if message
                .reserved_ranges
                .iter()
                .any(|range| range.contains(field.number))
            {
                errors.push(ParseError::ReservedFieldNumber {
                    number: field.number,
                    message: message.name.clone(),
                });
            }
            if message.reserved_names.iter().any(|name| *name == field.name) {
                errors.push(ParseError::ReservedFieldName {
                    name: field.name.clone(),
                    message: message.name.clone(),
                });
            }
        }

        let mut nested = HashSet::new();
        for name in message
            .messages
            .iter()
            .map(|m| &m.name)
            .chain(message.enums.iter().map(|e| &e.name))
        {
            if !nested.insert(name.clone()) {
                errors.push(ParseError::DuplicateNestedTypeName(name.clone()));
            }
        }

        for error in errors {
            self.record(error);
        }
    }

    fn check_enum(&mut self, enumeration: &Enumeration) {
        let allow_alias = enumeration.allows_alias();
        let mut numbers: HashMap<i32, String> = HashMap::new();
        let mut names = HashSet::new();
        let mut errors = Vec::new();

        for value in &enumeration.values {
            if let Some(previous) = numbers.get(&value.number) {
                if !allow_alias {
                    errors.push(ParseError::DuplicateEnumValue {
                        name: previous.clone(),
                        value: value.number,
                    });
                }
            } else {
                numbers.insert(value.number, value.name.clone());
            }
            if !names.insert(value.name.clone()) {
                errors.push(ParseError::DuplicateEnumValueName(value.name.clone()));
            }
        }

        for error in errors {
            self.record(error);
        }
    }

    fn check_file(&mut self, file: &File) {
        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        for name in file
            .messages
            .iter()
            .map(|m| &m.name)
            .chain(file.enums.iter().map(|e| &e.name))
            .chain(file.services.iter().map(|s| &s.name))
        {
            if !seen.insert(name.clone()) {
                errors.push(ParseError::DuplicateTypeName(name.clone()));
            }
        }
        for error in errors {
            self.record(error);
        }
    }
}

fn negate(value: u64) -> Option<i64> {
    if value <= i64::MAX as u64 {
        Some(-(value as i64))
    } else if value == i64::MAX as u64 + 1 {
        Some(i64::MIN)
    } else {
        None
    }
}

pub(crate) fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_valid_ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> File {
        let (file, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        file
    }

    fn parse_err(source: &str) -> Vec<ParseError> {
        let (_, errors) = parse(source);
        assert!(!errors.is_empty(), "expected errors for {source:?}");
        errors
    }

    #[test]
    fn simple_message() {
        let file = parse_ok(r#"syntax = "proto3"; message HelloWorld { string name = 1; }"#);
        assert_eq!(file.syntax.as_deref(), Some("proto3"));
        assert_eq!(file.messages.len(), 1);
        let message = &file.messages[0];
        assert_eq!(message.name, "HelloWorld");
        assert_eq!(message.fields.len(), 1);
        let field = &message.fields[0];
        assert_eq!(field.name, "name");
        assert_eq!(field.number, 1);
        assert_eq!(field.label, Label::Singular);
        assert_eq!(field.ty, FieldType::Scalar(ScalarType::String));
    }

    #[test]
    fn package_and_enum() {
        let file = parse_ok(
            r#"syntax = "proto3"; package a.b; enum Status { UNKNOWN = 0; ACTIVE = 1; }"#,
        );
        assert_eq!(file.package.as_deref(), Some("a.b"));
        let status = file.enumeration("Status").unwrap();
        assert_eq!(status.values[0].name, "UNKNOWN");
        assert_eq!(status.values[0].number, 0);
        assert_eq!(status.values[1].name, "ACTIVE");
        assert_eq!(status.values[1].number, 1);
    }

    #[test]
    fn imports() {
        let file = parse_ok(
            "syntax = \"proto3\";\n\
             import \"a.proto\";\n\
             import public \"b.proto\";\n\
             import weak \"c.proto\";",
        );
        assert_eq!(
            file.imports,
            vec![
                Import { path: "a.proto".into(), kind: ImportKind::Plain },
                Import { path: "b.proto".into(), kind: ImportKind::Public },
                Import { path: "c.proto".into(), kind: ImportKind::Weak },
            ]
        );
    }

    #[test]
    fn duplicate_field_number() {
        let errors = parse_err(r#"syntax = "proto3"; message M { string a = 1; int32 b = 1; }"#);
        assert!(errors.contains(&ParseError::DuplicateFieldNumber {
            number: 1,
            message: "M".to_owned()
        }));
    }

    #[test]
    fn field_number_bounds() {
        for source in [
            r#"syntax = "proto3"; message M { int32 a = 0; }"#,
            r#"syntax = "proto3"; message M { int32 a = -5; }"#,
            r#"syntax = "proto3"; message M { int32 a = 536870912; }"#,
            r#"syntax = "proto3"; message M { int32 a = 19000; }"#,
        ] {
            let errors = parse_err(source);
            assert!(
                errors
                    .iter()
                    .any(|e| matches!(e, ParseError::InvalidFieldNumber { .. })),
                "{source}: {errors:?}"
            );
        }
        // The edges of the valid space parse cleanly.
        parse_ok(r#"syntax = "proto3"; message M { int32 a = 1; int32 b = 536870911; }"#);
    }

    #[test]
    fn required_is_rejected() {
        let errors = parse_err(r#"syntax = "proto3"; message M { required int32 a = 1; }"#);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn proto2_is_rejected() {
        let errors = parse_err(r#"syntax = "proto2"; message M { optional int32 a = 1; }"#);
        assert!(errors.contains(&ParseError::InvalidSyntaxVersion("proto2".to_owned())));
    }

    #[test]
    fn missing_syntax_is_reported_but_parse_continues() {
        let (file, errors) = parse("message M { int32 a = 1; }");
        assert!(errors.contains(&ParseError::MissingSyntax));
        assert_eq!(file.messages.len(), 1);
    }

    #[test]
    fn map_fields() {
        let file = parse_ok(r#"syntax = "proto3"; message Outer { map<string, int32> counts = 3; }"#);
        let field = file.messages[0].field("counts").unwrap();
        match &field.ty {
            FieldType::Map(map) => {
                assert_eq!(map.key, ScalarType::String);
                assert_eq!(*map.value, FieldType::Scalar(ScalarType::Int32));
            }
            other => panic!("expected map, got {other:?}"),
        }

        let errors = parse_err(r#"syntax = "proto3"; message M { map<float, int32> m = 1; }"#);
        assert!(errors.contains(&ParseError::InvalidMapKeyType("float".to_owned())));

        let errors = parse_err(r#"syntax = "proto3"; message M { repeated map<string, int32> m = 1; }"#);
        assert!(errors.contains(&ParseError::RepeatedMapField("m".to_owned())));
    }

    #[test]
    fn oneof_rules() {
        let file = parse_ok(
            r#"syntax = "proto3"; message M { oneof choice { string a = 1; int32 b = 2; } }"#,
        );
        assert_eq!(file.messages[0].oneofs[0].fields.len(), 2);

        let errors =
            parse_err(r#"syntax = "proto3"; message M { oneof c { repeated string a = 1; } }"#);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ParseError::UnexpectedToken { .. })));

        let errors = parse_err(
            r#"syntax = "proto3"; message M { oneof c { map<string, int32> m = 1; } }"#,
        );
        assert!(errors.contains(&ParseError::MapFieldInOneof("m".to_owned())));
    }

    #[test]
    fn reserved_statements() {
        let file = parse_ok(
            r#"syntax = "proto3";
            message M {
                reserved 2, 15, 9 to 11, 40 to max;
                reserved "foo", "bar";
                string name = 1;
            }"#,
        );
        let message = &file.messages[0];
        assert_eq!(
            message.reserved_ranges,
            vec![
                ReservedRange { start: 2, end: 2 },
                ReservedRange { start: 15, end: 15 },
                ReservedRange { start: 9, end: 11 },
                ReservedRange { start: 40, end: MAX_FIELD_NUMBER },
            ]
        );
        assert_eq!(message.reserved_names, vec!["foo", "bar"]);

        let errors =
            parse_err(r#"syntax = "proto3"; message M { reserved 2; string a = 2; }"#);
        assert!(errors.contains(&ParseError::ReservedFieldNumber {
            number: 2,
            message: "M".to_owned()
        }));

        let errors =
            parse_err(r#"syntax = "proto3"; message M { reserved "a"; string a = 1; }"#);
        assert!(errors.contains(&ParseError::ReservedFieldName {
            name: "a".to_owned(),
            message: "M".to_owned()
        }));
    }

    #[test]
    fn enum_aliasing() {
        let errors = parse_err(r#"syntax = "proto3"; enum E { A = 0; B = 0; }"#);
        assert!(errors.contains(&ParseError::DuplicateEnumValue {
            name: "A".to_owned(),
            value: 0
        }));

        parse_ok(
            r#"syntax = "proto3"; enum E { option allow_alias = true; A = 0; B = 0; }"#,
        );
    }

    #[test]
    fn negative_enum_values() {
        let file = parse_ok(r#"syntax = "proto3"; enum E { ZERO = 0; NEG = -3; }"#);
        assert_eq!(file.enums[0].values[1].number, -3);
    }

    #[test]
    fn services() {
        let file = parse_ok(
            r#"syntax = "proto3";
            service Greeter {
                rpc SayHello (HelloRequest) returns (HelloReply);
                rpc Chat (stream ChatMessage) returns (stream ChatMessage) {
                    option deprecated = true;
                }
            }"#,
        );
        let service = &file.services[0];
        assert_eq!(service.name, "Greeter");
        assert_eq!(service.methods.len(), 2);
        let chat = &service.methods[1];
        assert!(chat.client_streaming);
        assert!(chat.server_streaming);
        assert_eq!(chat.options.len(), 1);
    }

    #[test]
    fn custom_options() {
        let file = parse_ok(
            r#"syntax = "proto3";
            option java_package = "com.example";
            option (my.custom).nested = { foo: 1 bar: "two" baz: [1, 2, 3] };
            message M {
                int32 a = 1 [deprecated = true, (my.field_opt) = FAST];
            }"#,
        );
        assert_eq!(file.options.len(), 2);
        let custom = &file.options[1];
        assert!(custom.name.is_custom());
        assert_eq!(custom.name.to_string(), "(my.custom).nested");
        match &custom.value {
            OptionValue::Message(entries) => {
                assert_eq!(entries[0], ("foo".to_owned(), OptionValue::Int(1)));
                assert_eq!(
                    entries[1],
                    ("bar".to_owned(), OptionValue::String("two".to_owned()))
                );
                assert!(matches!(entries[2].1, OptionValue::List(ref v) if v.len() == 3));
            }
            other => panic!("expected message literal, got {other:?}"),
        }
        let field = &file.messages[0].fields[0];
        assert_eq!(field.options.len(), 2);
        assert_eq!(field.options[1].value, OptionValue::Ident("FAST".to_owned()));
    }

    #[test]
    fn extend_targets() {
        let errors = parse_err(r#"syntax = "proto3"; extend MyMessage { int32 x = 100; }"#);
        assert!(errors.contains(&ParseError::InvalidExtendTarget("MyMessage".to_owned())));

        let file = parse_ok(
            r#"syntax = "proto3";
            import "google/protobuf/descriptor.proto";
            extend google.protobuf.MessageOptions { int32 x = 50000; }"#,
        );
        assert_eq!(file.extends[0].target, "google.protobuf.MessageOptions");
        assert_eq!(file.extends[0].fields[0].number, 50000);
    }

    #[test]
    fn recovery_accumulates_errors() {
        let errors = parse_err(
            r#"syntax = "proto3";
            message M {
                string a == 1;
                int32 b = 2;
            }
            enum E { A = 0; A = 1; }"#,
        );
        // Both the malformed field and the duplicate enum value name are
        // reported in a single pass.
        assert!(errors.len() >= 2, "{errors:?}");
        assert!(errors.contains(&ParseError::DuplicateEnumValueName("A".to_owned())));
    }

    #[test]
    fn duplicate_top_level_types() {
        let errors = parse_err(r#"syntax = "proto3"; message M {} enum M { A = 0; }"#);
        assert!(errors.contains(&ParseError::DuplicateTypeName("M".to_owned())));
    }

    #[test]
    fn keywords_as_identifiers() {
        let file = parse_ok(r#"syntax = "proto3"; message M { string message = 1; }"#);
        assert_eq!(file.messages[0].fields[0].name, "message");
    }

    #[test]
    fn fully_qualified_references() {
        let file = parse_ok(
            r#"syntax = "proto3"; message M { .foo.Bar baz = 1; foo.Quux quux = 2; }"#,
        );
        assert_eq!(
            file.messages[0].fields[0].ty,
            FieldType::Named(".foo.Bar".to_owned())
        );
        assert_eq!(
            file.messages[0].fields[1].ty,
            FieldType::Named("foo.Quux".to_owned())
        );
    }
}
