//! Chunked parsing for oversize files.
//!
//! Files above a size threshold are read in fixed-size chunks and fed to
//! the lexer incrementally, so the raw text never has to sit in memory in
//! one piece. Token boundaries (and multi-byte UTF-8 sequences) may
//! straddle chunk boundaries; the lexer rewinds incomplete tokens into its
//! carry-over buffer and a small byte carry holds split UTF-8 sequences.
//! The parser behind the lexer is the ordinary one.

use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::ast;
use crate::error::{Error, LexError};
use crate::lexer::{Lexer, Scan};
use crate::parser;
use crate::token::Token;

/// Chunk size used when feeding the lexer. Also a safe lower bound for the
/// carry-over buffer, which must hold the longest in-flight lexeme.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Files at or above this size take the chunked path by default.
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 1024 * 1024;

/// Streaming front end over the ordinary parser.
#[derive(Clone, Copy, Debug)]
pub struct StreamingParser {
    chunk_size: usize,
    threshold: u64,
}

impl Default for StreamingParser {
    fn default() -> StreamingParser {
        StreamingParser::new()
    }
}

impl StreamingParser {
    pub fn new() -> StreamingParser {
        StreamingParser {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: DEFAULT_STREAMING_THRESHOLD,
        }
    }

    /// Overrides the chunk size (clamped to at least 16 bytes).
    pub fn with_chunk_size(chunk_size: usize) -> StreamingParser {
        StreamingParser {
            chunk_size: chunk_size.max(16),
            ..StreamingParser::new()
        }
    }

    /// Overrides the threshold below which files are parsed in memory.
    pub fn threshold(mut self, threshold: u64) -> StreamingParser {
        self.threshold = threshold;
        self
    }

    /// Parses `path`, streaming it chunk-by-chunk if it is large enough.
    pub fn parse_file(&self, path: &Path) -> Result<ast::File, Error> {
        let metadata = fs::metadata(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;

        if metadata.len() < self.threshold {
            let content = fs::read_to_string(path).map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })?;
            let (file, errors) = parser::parse(&content);
            return if errors.is_empty() {
                Ok(file)
            } else {
                Err(Error::Parse(errors))
            };
        }

        debug!(
            "streaming {} ({} bytes, {}-byte chunks)",
            path.display(),
            metadata.len(),
            self.chunk_size
        );
        let reader = fs::File::open(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        self.parse_reader(reader, path)
    }

    /// Parses from an arbitrary reader; `origin` is used in I/O errors.
    pub fn parse_reader<R: Read>(&self, mut reader: R, origin: &Path) -> Result<ast::File, Error> {
        let mut lexer = Lexer::new_streaming();
        let mut tokens: Vec<Token> = Vec::new();
        let mut chunk = vec![0u8; self.chunk_size];
        // Tail of a multi-byte UTF-8 sequence split across chunks.
        let mut byte_carry: Vec<u8> = Vec::new();
        let mut eof = false;

        loop {
            let scan = lexer.next_token().map_err(Error::from)?;
            match scan {
                Scan::Token { token, trailing } => {
                    if let Some(comment) = trailing {
                        if let Some(previous) = tokens.last_mut() {
                            previous.trailing_comment = Some(comment);
                        }
                    }
                    let at_eof = token.is_eof();
                    tokens.push(token);
                    if at_eof {
                        break;
                    }
                }
                Scan::NeedMore => {
                    debug_assert!(!eof, "lexer requested input after EOF");
                    let read = reader.read(&mut chunk).map_err(|source| Error::Io {
                        path: origin.to_owned(),
                        source,
                    })?;
                    if read == 0 {
                        if !byte_carry.is_empty() {
                            return Err(invalid_utf8(&lexer));
                        }
                        eof = true;
                        lexer.finish();
                        continue;
                    }
                    byte_carry.extend_from_slice(&chunk[..read]);
                    match std::str::from_utf8(&byte_carry) {
                        Ok(text) => {
                            lexer.push_str(text);
                            byte_carry.clear();
                        }
                        Err(err) if err.error_len().is_some() => {
                            return Err(invalid_utf8(&lexer));
                        }
                        Err(err) => {
                            let valid = err.valid_up_to();
                            // The prefix was just validated.
                            lexer.push_str(std::str::from_utf8(&byte_carry[..valid]).map_err(
                                |_| Error::Internal("validated UTF-8 prefix".to_owned()),
                            )?);
                            byte_carry.drain(..valid);
                        }
                    }
                }
            }
        }

        let (file, errors) = parser::parse_tokens(tokens);
        if errors.is_empty() {
            Ok(file)
        } else {
            Err(Error::Parse(errors))
        }
    }
}

fn invalid_utf8(lexer: &Lexer) -> Error {
    let (line, column) = lexer.position();
    LexError::InvalidUtf8 { line, column }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source() -> String {
        let mut source = String::from("syntax = \"proto3\";\npackage streamed;\n");
        for i in 0..50 {
            source.push_str(&format!(
                "// message number {i}\n\
                 message Chunked{i} {{\n\
                 \tstring name = 1; // name of thing\n\
                 \trepeated int32 values = 2;\n\
                 \tmap<string, int64> totals = 3;\n\
                 }}\n"
            ));
        }
        source
    }

    #[test]
    fn chunked_equals_in_memory() {
        let source = source();
        let (expected, errors) = parser::parse(&source);
        assert!(errors.is_empty());

        for chunk_size in [16, 64, 1024] {
            let parser = StreamingParser::with_chunk_size(chunk_size);
            let file = parser
                .parse_reader(Cursor::new(source.as_bytes()), Path::new("streamed.proto"))
                .unwrap();
            assert_eq!(file, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn multibyte_utf8_across_chunk_boundary() {
        let source = "syntax = \"proto3\"; // ключевые слова と 漢字\nmessage M {}";
        let (expected, errors) = parser::parse(source);
        assert!(errors.is_empty());

        let parser = StreamingParser::with_chunk_size(16);
        let file = parser
            .parse_reader(Cursor::new(source.as_bytes()), Path::new("utf8.proto"))
            .unwrap();
        assert_eq!(file, expected);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bytes = b"syntax = \"proto3\"; message M ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let parser = StreamingParser::with_chunk_size(16);
        let err = parser
            .parse_reader(Cursor::new(bytes), Path::new("bad.proto"))
            .unwrap_err();
        assert!(matches!(
            err.parse_errors(),
            Some([crate::error::ParseError::Lex(LexError::InvalidUtf8 { .. })])
        ));
    }

    #[test]
    fn small_files_take_the_in_memory_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.proto");
        fs::write(&path, "syntax = \"proto3\"; message S {}").unwrap();
        let file = StreamingParser::new().parse_file(&path).unwrap();
        assert_eq!(file.messages[0].name, "S");
    }

    #[test]
    fn threshold_forces_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forced.proto");
        fs::write(&path, source()).unwrap();
        let file = StreamingParser::with_chunk_size(32)
            .threshold(0)
            .parse_file(&path)
            .unwrap();
        assert_eq!(file.messages.len(), 50);
    }
}
