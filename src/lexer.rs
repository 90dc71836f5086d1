//! Hand-written lexer for proto3 source text.
//!
//! The lexer produces [`Token`]s with 1-based line/column positions and
//! attaches comments: comments before a token (with nothing but whitespace
//! in between) become its leading comments, preserved in source order; a
//! comment that starts on the same physical line as the previous token is
//! attached to that token as its trailing comment instead.
//!
//! The same lexer drives both the in-memory and the streaming paths. In
//! streaming mode the input arrives in chunks; whenever a token might
//! continue past the end of the current buffer the lexer rewinds to the
//! start of the token and reports [`Scan::NeedMore`], and the caller
//! appends the next chunk and retries.

use crate::error::LexError;
use crate::token::{Keyword, Token, TokenKind};

/// Outcome of a single [`Lexer::next_token`] call.
#[derive(Debug)]
pub(crate) enum Scan {
    /// A complete token. `trailing` is a comment that belongs to the
    /// previously emitted token (it started on that token's line).
    Token {
        token: Token,
        trailing: Option<String>,
    },
    /// The buffer ended mid-token; push more input and retry.
    NeedMore,
}

#[derive(Debug)]
struct PendingComment {
    text: String,
    line: usize,
}

#[derive(Clone, Copy)]
struct Checkpoint {
    pos: usize,
    line: usize,
    column: usize,
}

/// Tokenizer over a growable buffer of proto3 source text.
pub(crate) struct Lexer {
    buf: String,
    pos: usize,
    line: usize,
    column: usize,
    final_input: bool,
    last_token_line: Option<usize>,
    emitted_eof: bool,
}

impl Lexer {
    /// A lexer over a complete source string.
    pub(crate) fn new(source: &str) -> Lexer {
        Lexer {
            buf: source.to_owned(),
            pos: 0,
            line: 1,
            column: 1,
            final_input: true,
            last_token_line: None,
            emitted_eof: false,
        }
    }

    /// A lexer that will be fed incrementally via [`Lexer::push_str`].
    pub(crate) fn new_streaming() -> Lexer {
        Lexer {
            buf: String::new(),
            pos: 0,
            line: 1,
            column: 1,
            final_input: false,
            last_token_line: None,
            emitted_eof: false,
        }
    }

    /// Appends a chunk of input, discarding the already-consumed prefix so
    /// the carry-over buffer stays as small as the longest in-flight lexeme.
    pub(crate) fn push_str(&mut self, chunk: &str) {
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.buf.push_str(chunk);
    }

    /// Marks the end of the input; the next `NeedMore` position becomes EOF.
    pub(crate) fn finish(&mut self) {
        self.final_input = true;
    }

    /// Current 1-based (line, column), pointing at the next unconsumed
    /// character.
    pub(crate) fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    pub(crate) fn next_token(&mut self) -> Result<Scan, LexError> {
        let checkpoint = self.checkpoint();
        match self.scan() {
            Ok(Some((token, trailing))) => {
                self.last_token_line = Some(token.line);
                if token.kind == TokenKind::Eof {
                    self.emitted_eof = true;
                }
                Ok(Scan::Token { token, trailing })
            }
            Ok(None) => {
                self.restore(checkpoint);
                Ok(Scan::NeedMore)
            }
            Err(err) => Err(err),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            pos: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.pos = checkpoint.pos;
        self.line = checkpoint.line;
        self.column = checkpoint.column;
    }

    fn peek(&self) -> Option<char> {
        self.buf[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.buf[self.pos..].chars();
        chars.next();
        chars.next()
    }

    /// Consumes one character. A `\r\n` pair is consumed as a single line
    /// break; `\n\r` counts as two.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
            }
            '\r' => {
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(c)
    }

    /// `Ok(None)` means the buffer ended and more input may follow.
    fn scan(&mut self) -> Result<Option<(Token, Option<String>)>, LexError> {
        debug_assert!(!self.emitted_eof, "lexer polled past EOF");

        let comments = match self.skip_trivia()? {
            Some(comments) => comments,
            None => return Ok(None),
        };
        let (leading, trailing) = self.split_trailing(comments);

        let mut token = match self.peek() {
            None if !self.final_input => return Ok(None),
            None => Token::new(TokenKind::Eof, "", self.line, self.column),
            Some(c) => {
                let scanned = match c {
                    '"' => self.scan_string()?,
                    c if c.is_ascii_digit() => self.scan_number()?,
                    '.' => match self.peek_second() {
                        None if !self.final_input => return Ok(None),
                        Some(d) if d.is_ascii_digit() => self.scan_number()?,
                        _ => Some(self.scan_punctuation(TokenKind::Dot)),
                    },
                    c if c == '_' || c.is_ascii_alphabetic() => self.scan_ident()?,
                    '{' => Some(self.scan_punctuation(TokenKind::LeftBrace)),
                    '}' => Some(self.scan_punctuation(TokenKind::RightBrace)),
                    '[' => Some(self.scan_punctuation(TokenKind::LeftBracket)),
                    ']' => Some(self.scan_punctuation(TokenKind::RightBracket)),
                    '(' => Some(self.scan_punctuation(TokenKind::LeftParen)),
                    ')' => Some(self.scan_punctuation(TokenKind::RightParen)),
                    '<' => Some(self.scan_punctuation(TokenKind::LeftAngle)),
                    '>' => Some(self.scan_punctuation(TokenKind::RightAngle)),
                    ',' => Some(self.scan_punctuation(TokenKind::Comma)),
                    ';' => Some(self.scan_punctuation(TokenKind::Semicolon)),
                    '=' => Some(self.scan_punctuation(TokenKind::Equals)),
                    ':' => Some(self.scan_punctuation(TokenKind::Colon)),
                    '-' => Some(self.scan_punctuation(TokenKind::Minus)),
                    other => {
                        return Err(LexError::InvalidCharacter {
                            ch: other,
                            line: self.line,
                            column: self.column,
                        })
                    }
                };
                match scanned {
                    Some(token) => token,
                    None => return Ok(None),
                }
            }
        };

        token.leading_comments = leading;
        Ok(Some((token, trailing)))
    }

    fn split_trailing(&self, comments: Vec<PendingComment>) -> (Vec<String>, Option<String>) {
        let mut leading = Vec::with_capacity(comments.len());
        let mut trailing = None;
        for (i, comment) in comments.into_iter().enumerate() {
            if i == 0 && Some(comment.line) == self.last_token_line {
                trailing = Some(comment.text);
            } else {
                leading.push(comment.text);
            }
        }
        (leading, trailing)
    }

    /// Skips whitespace and collects comments up to the next token start.
    fn skip_trivia(&mut self) -> Result<Option<Vec<PendingComment>>, LexError> {
        let mut comments = Vec::new();
        loop {
            while let Some(c) = self.peek() {
                if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
                    self.bump();
                } else {
                    break;
                }
            }
            if self.peek() != Some('/') {
                break;
            }
            match self.peek_second() {
                None if !self.final_input => return Ok(None),
                Some('/') => match self.scan_line_comment()? {
                    Some(comment) => comments.push(comment),
                    None => return Ok(None),
                },
                Some('*') => match self.scan_block_comment()? {
                    Some(comment) => comments.push(comment),
                    None => return Ok(None),
                },
                // A lone `/` is reported as an invalid character by `scan`.
                _ => break,
            }
        }
        Ok(Some(comments))
    }

    fn scan_line_comment(&mut self) -> Result<Option<PendingComment>, LexError> {
        let line = self.line;
        self.bump();
        self.bump();
        let start = self.pos;
        loop {
            match self.peek() {
                None if !self.final_input => return Ok(None),
                None | Some('\n') | Some('\r') => break,
                Some(_) => {
                    self.bump();
                }
            }
        }
        let text = self.buf[start..self.pos].trim().to_owned();
        Ok(Some(PendingComment { text, line }))
    }

    fn scan_block_comment(&mut self) -> Result<Option<PendingComment>, LexError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        self.bump();
        let start = self.pos;
        loop {
            match self.peek() {
                None if !self.final_input => return Ok(None),
                None => return Err(LexError::UnterminatedComment { line, column }),
                Some('*') => match self.peek_second() {
                    None if !self.final_input => return Ok(None),
                    Some('/') => {
                        let text = self.buf[start..self.pos].trim().to_owned();
                        self.bump();
                        self.bump();
                        return Ok(Some(PendingComment { text, line }));
                    }
                    _ => {
                        self.bump();
                    }
                },
                Some('/') => match self.peek_second() {
                    None if !self.final_input => return Ok(None),
                    Some('*') => {
                        return Err(LexError::NestedComment {
                            line: self.line,
                            column: self.column,
                        })
                    }
                    _ => {
                        self.bump();
                    }
                },
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn scan_punctuation(&mut self, kind: TokenKind) -> Token {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        self.bump();
        Token::new(kind, &self.buf[start..self.pos], line, column)
    }

    fn scan_ident(&mut self) -> Result<Option<Token>, LexError> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_ascii_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == self.buf.len() && !self.final_input {
            // The identifier may continue in the next chunk.
            return Ok(None);
        }
        let text = &self.buf[start..self.pos];
        let kind = match Keyword::from_ident(text) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident,
        };
        Ok(Some(Token::new(kind, text, line, column)))
    }

    fn scan_number(&mut self) -> Result<Option<Token>, LexError> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let mut prev = '\0';
        let mut is_hex = false;
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                    if self.pos == start + 1 && prev == '0' && (c == 'x' || c == 'X') {
                        is_hex = true;
                    }
                    self.bump();
                    prev = c;
                }
                Some(c) if (c == '+' || c == '-') && !is_hex && (prev == 'e' || prev == 'E') => {
                    self.bump();
                    prev = c;
                }
                Some(_) => break,
                None if !self.final_input => return Ok(None),
                None => break,
            }
        }
        let text = &self.buf[start..self.pos];
        let kind = classify_number(text, line, column)?;
        Ok(Some(Token::new(kind, text, line, column)))
    }

    fn scan_string(&mut self) -> Result<Option<Token>, LexError> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None if !self.final_input => return Ok(None),
                None => return Err(LexError::UnterminatedString { line, column }),
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\n') | Some('\r') => {
                    return Err(LexError::UnterminatedString { line, column })
                }
                Some('\\') => {
                    let (esc_line, esc_column) = (self.line, self.column);
                    self.bump();
                    match self.scan_escape(esc_line, esc_column)? {
                        Some(decoded) => value.push(decoded),
                        None => return Ok(None),
                    }
                }
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
            }
        }
        Ok(Some(Token::new(
            TokenKind::StringLiteral(value),
            &self.buf[start..self.pos],
            line,
            column,
        )))
    }

    fn scan_escape(&mut self, line: usize, column: usize) -> Result<Option<char>, LexError> {
        let c = match self.peek() {
            None if !self.final_input => return Ok(None),
            None => {
                return Err(LexError::UnexpectedEndOfInput {
                    expected: "escape sequence".to_owned(),
                    line,
                    column,
                })
            }
            Some(c) => c,
        };
        self.bump();
        let decoded = match c {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            'b' => '\u{0008}',
            'f' => '\u{000C}',
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    match self.peek() {
                        None if !self.final_input => return Ok(None),
                        Some(h) => match h.to_digit(16) {
                            Some(digit) => {
                                self.bump();
                                code = code * 16 + digit;
                            }
                            None => {
                                return Err(LexError::InvalidEscapeSequence {
                                    seq: "\\u".to_owned(),
                                    line,
                                    column,
                                })
                            }
                        },
                        None => {
                            return Err(LexError::InvalidEscapeSequence {
                                seq: "\\u".to_owned(),
                                line,
                                column,
                            })
                        }
                    }
                }
                match char::from_u32(code) {
                    Some(decoded) => decoded,
                    None => {
                        return Err(LexError::InvalidEscapeSequence {
                            seq: format!("\\u{code:04X}"),
                            line,
                            column,
                        })
                    }
                }
            }
            other => {
                return Err(LexError::InvalidEscapeSequence {
                    seq: format!("\\{other}"),
                    line,
                    column,
                })
            }
        };
        Ok(Some(decoded))
    }
}

fn classify_number(text: &str, line: usize, column: usize) -> Result<TokenKind, LexError> {
    let invalid = || LexError::InvalidNumber {
        text: text.to_owned(),
        line,
        column,
    };
    let out_of_range = || LexError::NumberOutOfRange {
        text: text.to_owned(),
        line,
        column,
    };

    let bytes = text.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        let digits = &text[2..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        return u64::from_str_radix(digits, 16)
            .map(TokenKind::IntLiteral)
            .map_err(|_| out_of_range());
    }

    if text.contains(|c| c == '.' || c == 'e' || c == 'E') {
        return match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(TokenKind::FloatLiteral(value)),
            Ok(_) => Err(out_of_range()),
            Err(_) => Err(invalid()),
        };
    }

    if !bytes.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    if bytes.len() > 1 && bytes[0] == b'0' {
        if !bytes.iter().all(|b| (b'0'..=b'7').contains(b)) {
            return Err(invalid());
        }
        return u64::from_str_radix(text, 8)
            .map(TokenKind::IntLiteral)
            .map_err(|_| out_of_range());
    }

    text.parse::<u64>()
        .map(TokenKind::IntLiteral)
        .map_err(|_| out_of_range())
}

/// Tokenizes a complete source string.
///
/// The returned vector always ends with exactly one EOF token.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens: Vec<Token> = Vec::new();
    loop {
        match lexer.next_token()? {
            Scan::Token { token, trailing } => {
                if let Some(comment) = trailing {
                    if let Some(prev) = tokens.last_mut() {
                        prev.trailing_comment = Some(comment);
                    }
                }
                let eof = token.is_eof();
                tokens.push(token);
                if eof {
                    return Ok(tokens);
                }
            }
            Scan::NeedMore => unreachable!("complete input cannot be exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn punctuation_and_keywords() {
        let tokens = tokenize("message Foo { string name = 1; }").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword(Keyword::Message),
                TokenKind::Ident,
                TokenKind::LeftBrace,
                TokenKind::Keyword(Keyword::String),
                TokenKind::Ident,
                TokenKind::Equals,
                TokenKind::IntLiteral(1),
                TokenKind::Semicolon,
                TokenKind::RightBrace,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].text, "Foo");
        assert_eq!(tokens[1].line, 1);
        assert_eq!(tokens[1].column, 9);
    }

    #[test]
    fn number_forms() {
        assert_eq!(
            kinds("1 007 0x1F 1.5 2e3 1e-2 .5"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::IntLiteral(7),
                TokenKind::IntLiteral(31),
                TokenKind::FloatLiteral(1.5),
                TokenKind::FloatLiteral(2000.0),
                TokenKind::FloatLiteral(0.01),
                TokenKind::FloatLiteral(0.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn malformed_numbers() {
        for source in ["09", "0x", "1.2.3", "1e", "12abc"] {
            match tokenize(source) {
                Err(LexError::InvalidNumber { .. }) => {}
                other => panic!("{source}: expected InvalidNumber, got {other:?}"),
            }
        }
        match tokenize("99999999999999999999999999") {
            Err(LexError::NumberOutOfRange { .. }) => {}
            other => panic!("expected NumberOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""a\tbA\"""#).unwrap();
        assert_eq!(
            tokens[0].kind,
            TokenKind::StringLiteral("a\tbA\"".to_owned())
        );
    }

    #[test]
    fn string_errors() {
        assert!(matches!(
            tokenize("\"abc\ndef\""),
            Err(LexError::UnterminatedString { line: 1, column: 1 })
        ));
        assert!(matches!(
            tokenize(r#""bad \q escape""#),
            Err(LexError::InvalidEscapeSequence { .. })
        ));
    }

    #[test]
    fn comment_attachment() {
        let source = "\
// leading one
// leading two
message Foo {} // trailing
enum E {}
";
        let tokens = tokenize(source).unwrap();
        assert_eq!(
            tokens[0].leading_comments,
            vec!["leading one".to_owned(), "leading two".to_owned()]
        );
        // `// trailing` sits on the same line as the closing brace.
        let brace = tokens
            .iter()
            .find(|t| t.kind == TokenKind::RightBrace)
            .unwrap();
        assert_eq!(brace.trailing_comment.as_deref(), Some("trailing"));
        let enum_kw = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Keyword(Keyword::Enum))
            .unwrap();
        assert!(enum_kw.leading_comments.is_empty());
    }

    #[test]
    fn block_comments() {
        let tokens = tokenize("/* one */ /* two */ syntax").unwrap();
        assert_eq!(
            tokens[0].leading_comments,
            vec!["one".to_owned(), "two".to_owned()]
        );
        assert!(matches!(
            tokenize("/* outer /* inner */ */"),
            Err(LexError::NestedComment { .. })
        ));
        assert!(matches!(
            tokenize("/* never closed"),
            Err(LexError::UnterminatedComment { line: 1, column: 1 })
        ));
    }

    #[test]
    fn line_counting() {
        // \r\n is one break, \n\r is two.
        let tokens = tokenize("a\r\nb\n\rc").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 4);
    }

    #[test]
    fn eof_is_last_and_unique() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_eof());
    }

    #[test]
    fn incremental_matches_one_shot() {
        let source = "syntax = \"proto3\"; message HelloWorld { string name = 1; }";
        let expected = tokenize(source).unwrap();

        // Feed the source a few bytes at a time, splitting inside tokens.
        let mut lexer = Lexer::new_streaming();
        let mut tokens: Vec<Token> = Vec::new();
        let mut rest = source;
        loop {
            match lexer.next_token().unwrap() {
                Scan::Token { token, trailing } => {
                    if let Some(comment) = trailing {
                        tokens.last_mut().unwrap().trailing_comment = Some(comment);
                    }
                    let eof = token.is_eof();
                    tokens.push(token);
                    if eof {
                        break;
                    }
                }
                Scan::NeedMore => {
                    if rest.is_empty() {
                        lexer.finish();
                    } else {
                        let take = rest.len().min(7);
                        lexer.push_str(&rest[..take]);
                        rest = &rest[take..];
                    }
                }
            }
        }
        assert_eq!(tokens, expected);
    }
}
