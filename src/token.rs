//! Tokens produced by the lexer.

use std::fmt;

/// The closed set of keywords recognized by the lexer.
///
/// Keyword matching is case-sensitive. Scalar type names are keywords too;
/// the parser decides from context whether a keyword is actually used as an
/// identifier (proto allows `string string = 1;`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Syntax,
    Import,
    Weak,
    Public,
    Package,
    Option,
    Message,
    Enum,
    Service,
    Rpc,
    Returns,
    Stream,
    Repeated,
    Optional,
    Required,
    Reserved,
    To,
    Map,
    Oneof,
    Extend,
    Extensions,
    Group,
    // Scalar type names.
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Keyword> {
        use Keyword::*;
        let keyword = match ident {
            "syntax" => Syntax,
            "import" => Import,
            "weak" => Weak,
            "public" => Public,
            "package" => Package,
            "option" => Option,
            "message" => Message,
            "enum" => Enum,
            "service" => Service,
            "rpc" => Rpc,
            "returns" => Returns,
            "stream" => Stream,
            "repeated" => Repeated,
            "optional" => Optional,
            "required" => Required,
            "reserved" => Reserved,
            "to" => To,
            "map" => Map,
            "oneof" => Oneof,
            "extend" => Extend,
            "extensions" => Extensions,
            "group" => Group,
            "double" => Double,
            "float" => Float,
            "int32" => Int32,
            "int64" => Int64,
            "uint32" => Uint32,
            "uint64" => Uint64,
            "sint32" => Sint32,
            "sint64" => Sint64,
            "fixed32" => Fixed32,
            "fixed64" => Fixed64,
            "sfixed32" => Sfixed32,
            "sfixed64" => Sfixed64,
            "bool" => Bool,
            "string" => String,
            "bytes" => Bytes,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(&self) -> &'static str {
        use Keyword::*;
        match self {
            Syntax => "syntax",
            Import => "import",
            Weak => "weak",
            Public => "public",
            Package => "package",
            Option => "option",
            Message => "message",
            Enum => "enum",
            Service => "service",
            Rpc => "rpc",
            Returns => "returns",
            Stream => "stream",
            Repeated => "repeated",
            Optional => "optional",
            Required => "required",
            Reserved => "reserved",
            To => "to",
            Map => "map",
            Oneof => "oneof",
            Extend => "extend",
            Extensions => "extensions",
            Group => "group",
            Double => "double",
            Float => "float",
            Int32 => "int32",
            Int64 => "int64",
            Uint32 => "uint32",
            Uint64 => "uint64",
            Sint32 => "sint32",
            Sint64 => "sint64",
            Fixed32 => "fixed32",
            Fixed64 => "fixed64",
            Sfixed32 => "sfixed32",
            Sfixed64 => "sfixed64",
            Bool => "bool",
            Bytes => "bytes",
            String => "string",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a token is, plus the decoded payload for literal tokens.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    LeftAngle,
    RightAngle,
    Comma,
    Semicolon,
    Equals,
    Dot,
    Colon,
    Minus,
    Keyword(Keyword),
    Ident,
    /// Integer literal. The lexer never sees a sign; a leading `-` is a
    /// separate [`TokenKind::Minus`] token.
    IntLiteral(u64),
    FloatLiteral(f64),
    /// String literal with escape sequences already decoded.
    StringLiteral(std::string::String),
    Eof,
}

/// A single token with its source position and attached comments.
///
/// `line` and `column` are 1-based and point at the first character of the
/// lexeme. EOF is always the last token of a stream and appears exactly once.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The raw lexeme text as it appears in the source.
    pub text: String,
    pub line: usize,
    pub column: usize,
    /// Comments immediately preceding this token, in source order.
    pub leading_comments: Vec<String>,
    /// A comment on the same physical line after this token.
    pub trailing_comment: Option<String>,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Token {
        Token {
            kind,
            text: text.into(),
            line,
            column,
            leading_comments: Vec::new(),
            trailing_comment: None,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match self.kind {
            TokenKind::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }

    /// The token text as an identifier, treating keywords as plain
    /// identifiers. Returns `None` for punctuation and literals.
    pub fn ident(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Ident | TokenKind::Keyword(_) => Some(&self.text),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_eof() {
            f.write_str("end of file")
        } else {
            f.write_str(&self.text)
        }
    }
}
