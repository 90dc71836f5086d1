//! Error types surfaced by the parsing pipeline.
//!
//! Each pipeline stage has its own error enum: [`LexError`] for
//! tokenization, [`ParseError`] for syntax and local semantic checks,
//! [`ResolveError`] for import resolution, and [`BuildError`] for
//! descriptor lowering. They all convert into the top-level [`Error`].

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized `Result` type for parsing operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error produced while tokenizing a `.proto` source file.
///
/// The lexer fails fast: the first malformed construct aborts lexing of the
/// file. Line and column are 1-based and refer to the offending character.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum LexError {
    #[error("invalid character `{ch}` at {line}:{column}")]
    InvalidCharacter { ch: char, line: usize, column: usize },

    #[error("unterminated string literal at {line}:{column}")]
    UnterminatedString { line: usize, column: usize },

    #[error("invalid escape sequence `{seq}` at {line}:{column}")]
    InvalidEscapeSequence {
        seq: String,
        line: usize,
        column: usize,
    },

    #[error("malformed number `{text}` at {line}:{column}")]
    InvalidNumber {
        text: String,
        line: usize,
        column: usize,
    },

    #[error("number `{text}` out of range at {line}:{column}")]
    NumberOutOfRange {
        text: String,
        line: usize,
        column: usize,
    },

    #[error("unterminated block comment at {line}:{column}")]
    UnterminatedComment { line: usize, column: usize },

    #[error("nested block comments are not allowed ({line}:{column})")]
    NestedComment { line: usize, column: usize },

    #[error("unexpected end of input, expected {expected} at {line}:{column}")]
    UnexpectedEndOfInput {
        expected: String,
        line: usize,
        column: usize,
    },

    #[error("source is not valid UTF-8 at {line}:{column}")]
    InvalidUtf8 { line: usize, column: usize },
}

/// An error produced by the parser.
///
/// Unlike lexer errors these accumulate: the parser records the error,
/// resynchronizes on the next statement boundary, and keeps going until the
/// configured error cap is reached.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("expected {expected}, found `{found}` at {line}:{column}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },

    #[error("unexpected end of file, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("unsupported syntax version `{0}`, only \"proto3\" is supported")]
    InvalidSyntaxVersion(String),

    #[error("file does not declare a syntax version; assuming \"proto3\"")]
    MissingSyntax,

    #[error("invalid import declaration `{0}`")]
    InvalidImport(String),

    #[error("field number {number} is out of range at {line}:{column}")]
    InvalidFieldNumber {
        number: i64,
        line: usize,
        column: usize,
    },

    #[error("`{0}` is not a valid map key type")]
    InvalidMapKeyType(String),

    #[error("`{0}` is not a valid message name")]
    InvalidMessageName(String),

    #[error("`{0}` is not a valid field name")]
    InvalidFieldName(String),

    #[error("`{0}` is not a valid enum name")]
    InvalidEnumName(String),

    #[error("`{0}` is not a valid enum value name")]
    InvalidEnumValueName(String),

    #[error("`{0}` is not a valid service name")]
    InvalidServiceName(String),

    #[error("`{0}` is not a valid rpc name")]
    InvalidRpcName(String),

    #[error("`{0}` is not a valid package name")]
    InvalidPackageName(String),

    #[error("type `{0}` is already defined in this scope")]
    DuplicateTypeName(String),

    #[error("the package name is declared more than once")]
    DuplicatePackageName,

    #[error("field number {number} is already used in message `{message}`")]
    DuplicateFieldNumber { number: i32, message: String },

    #[error("field `{name}` is already defined in message `{message}`")]
    DuplicateFieldName { name: String, message: String },

    #[error("nested type `{0}` is already defined")]
    DuplicateNestedTypeName(String),

    #[error("enum value number {value} is already used by `{name}` (missing `allow_alias = true`?)")]
    DuplicateEnumValue { name: String, value: i32 },

    #[error("enum value `{0}` is already defined")]
    DuplicateEnumValueName(String),

    #[error("field number {number} in message `{message}` is reserved")]
    ReservedFieldNumber { number: i32, message: String },

    #[error("field name `{name}` in message `{message}` is reserved")]
    ReservedFieldName { name: String, message: String },

    #[error("map field `{0}` cannot be repeated")]
    RepeatedMapField(String),

    #[error("map field `{0}` is not allowed inside a oneof")]
    MapFieldInOneof(String),

    #[error("`{0}` cannot be extended in proto3; only the well-known option messages can")]
    InvalidExtendTarget(String),
}

/// An error produced while locating and reading imported files.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("import root is not a directory: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("{path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("import \"{import}\" was not found in any of {searched:?}")]
    ImportNotFound {
        import: String,
        searched: Vec<PathBuf>,
    },

    #[error("circular dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("invalid import path `{path}`: {reason}")]
    InvalidImportPath { path: String, reason: String },

    #[error("duplicate file `{name}` resolved from {first} and {second}", first = .first.display(), second = .second.display())]
    DuplicateFile {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{} declares imports but no import roots were supplied", .0.display())]
    NoImportPaths(PathBuf),

    #[error("{} does not declare a syntax version", .0.display())]
    MissingSyntax(PathBuf),

    #[error("{path} declares syntax `{found}`, expected \"proto3\"", path = .path.display())]
    InvalidSyntax { path: PathBuf, found: String },
}

/// An error produced while lowering an AST into descriptors.
///
/// Builder errors are never recovered from; the first one aborts the build.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BuildError {
    #[error("type `{reference}` is not defined (referenced from `{container}`)")]
    UndefinedType { reference: String, container: String },

    #[error("the first value of enum `{0}` must be zero in proto3")]
    FirstEnumValueNotZero(String),

    #[error("enum `{0}` must declare at least one value")]
    EmptyEnum(String),

    #[error("oneof `{0}` must declare at least one field")]
    EmptyOneof(String),

    #[error("cyclic type dependency through `{0}`")]
    CyclicDependency(String),

    #[error("field `{field}` of type {ty} cannot be packed")]
    UnpackableFieldType { field: String, ty: String },

    #[error("map field `{0}` is not allowed here")]
    NestedMapNotAllowed(String),

    #[error("option `{option}` cannot be set to `{value}`")]
    InvalidOptionValue { option: String, value: String },

    #[error("option `{0}` is recognized but not supported")]
    UnsupportedOption(String),

    #[error("unknown option `{0}`")]
    UnknownOption(String),
}

/// The top-level error type returned by the public entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{}", render_parse_errors(.0))]
    Parse(Vec<ParseError>),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("{path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LexError> for Error {
    fn from(err: LexError) -> Self {
        Error::Parse(vec![ParseError::Lex(err)])
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(vec![err])
    }
}

impl Error {
    /// Returns the accumulated parse errors, if this is a parse failure.
    pub fn parse_errors(&self) -> Option<&[ParseError]> {
        match self {
            Error::Parse(errors) => Some(errors),
            _ => None,
        }
    }
}

fn render_parse_errors(errors: &[ParseError]) -> String {
    let mut buf = String::new();
    match errors.len() {
        0 => buf.push_str("parse failed"),
        1 => {
            let _ = write!(buf, "{}", errors[0]);
        }
        n => {
            let _ = write!(buf, "{} ({} more errors)", errors[0], n - 1);
        }
    }
    buf
}
