//! Byte cursor and scanner for SLang sources.
//!
//! There is no token stream: the compiler pulls bare words and single
//! delimiter bytes straight off a [`Cursor`] while it generates code. The
//! cursor is a plain `(bytes, position)` pair, so resuming a function body
//! later is just a matter of restoring a `usize`.

use crate::error::{CompileError, CompileResult};

pub const SPACE: u8 = b' ';
pub const CARRIAGE_RETURN: u8 = b'\r';
pub const LINE_FEED: u8 = b'\n';

/// Bytes that terminate a bare word besides whitespace.
pub const DELIMITERS: &[u8] = b"\"&()*+,-./:<=>{|}";

/// Cursor over an immutable source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor<'src> {
    bytes: &'src [u8],
    position: usize,
}

impl<'src> Cursor<'src> {
    pub fn new(bytes: &'src [u8]) -> Self {
        Cursor { bytes, position: 0 }
    }

    /// A cursor resumed at a previously recorded offset.
    pub fn at_offset(bytes: &'src [u8], position: usize) -> Self {
        Cursor {
            bytes,
            position: position.min(bytes.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.bytes.len());
    }

    pub fn bytes(&self) -> &'src [u8] {
        self.bytes
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    /// True when the byte under the cursor is `byte`.
    pub fn at(&self, byte: u8) -> bool {
        self.peek() == Some(byte)
    }

    pub fn advance(&mut self) {
        if self.position < self.bytes.len() {
            self.position += 1;
        }
    }

    /// Skips spaces and carriage returns, and line feeds too when
    /// `include_newline` is set. Stops *before* a line feed otherwise.
    pub fn skip_whitespace(&mut self, include_newline: bool) {
        while let Some(byte) = self.peek() {
            if !is_whitespace(byte) || (!include_newline && byte == LINE_FEED) {
                return;
            }
            self.position += 1;
        }
    }

    pub fn assert_more(&self) -> CompileResult<()> {
        if self.is_at_end() {
            return Err(CompileError::UnexpectedEof);
        }
        Ok(())
    }

    /// Skips all whitespace, then requires that input remains.
    pub fn skip_to_content(&mut self) -> CompileResult<()> {
        self.skip_whitespace(true);
        self.assert_more()
    }

    /// Whether any non-whitespace byte precedes the next line feed.
    ///
    /// Leaves the cursor on that byte (or on the line feed).
    pub fn characters_before_newline(&mut self) -> bool {
        self.skip_whitespace(false);
        matches!(self.peek(), Some(byte) if byte != LINE_FEED)
    }

    /// Reads the maximal run of non-special bytes. May be empty.
    pub fn scan_word(&mut self) -> String {
        let start = self.position;
        while let Some(byte) = self.peek() {
            if is_special(byte) {
                break;
            }
            self.position += 1;
        }
        String::from_utf8_lossy(&self.bytes[start..self.position]).into_owned()
    }

    pub fn scan_nonempty_word(&mut self) -> CompileResult<String> {
        let word = self.scan_word();
        if word.is_empty() {
            return Err(CompileError::UnexpectedEof);
        }
        Ok(word)
    }

    /// Consumes exactly `expected`, or fails with the error that belongs to
    /// that delimiter.
    pub fn consume(&mut self, expected: u8) -> CompileResult<()> {
        match self.peek() {
            Some(byte) if byte == expected => {
                self.position += 1;
                Ok(())
            }
            Some(_) => Err(missing(expected)),
            None => Err(CompileError::UnexpectedEof),
        }
    }

    /// Consumes `->` as two separate byte checks.
    pub fn consume_arrow(&mut self) -> CompileResult<()> {
        self.consume(b'-')?;
        self.consume(b'>')
    }
}

fn missing(expected: u8) -> CompileError {
    match expected {
        b'=' => CompileError::MissingAssignment,
        b',' => CompileError::MissingCommaAfterArguments,
        b'-' | b'>' => CompileError::MissingReturnType,
        other => CompileError::MissingCharacter(other as char),
    }
}

pub fn is_whitespace(byte: u8) -> bool {
    matches!(byte, SPACE | CARRIAGE_RETURN | LINE_FEED)
}

pub fn is_special(byte: u8) -> bool {
    is_whitespace(byte) || DELIMITERS.contains(&byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_words_up_to_delimiters() {
        let mut cursor = Cursor::new(b"count:Int32");
        assert_eq!(cursor.scan_word(), "count");
        assert_eq!(cursor.position(), 5);
        cursor.consume(b':').expect("colon");
        assert_eq!(cursor.scan_word(), "Int32");
        assert!(cursor.is_at_end());
    }

    #[test]
    fn dot_splits_member_access() {
        let mut cursor = Cursor::new(b"point.x");
        assert_eq!(cursor.scan_word(), "point");
        assert!(cursor.at(b'.'));
    }

    #[test]
    fn empty_word_is_unexpected_eof() {
        let mut cursor = Cursor::new(b"(a)");
        assert_eq!(cursor.scan_nonempty_word(), Err(CompileError::UnexpectedEof));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn consume_reports_delimiter_specific_errors() {
        assert_eq!(
            Cursor::new(b"x").consume(b'='),
            Err(CompileError::MissingAssignment)
        );
        assert_eq!(
            Cursor::new(b"x").consume(b','),
            Err(CompileError::MissingCommaAfterArguments)
        );
        assert_eq!(
            Cursor::new(b"=>").consume_arrow(),
            Err(CompileError::MissingReturnType)
        );
        assert_eq!(
            Cursor::new(b"x").consume(b'{'),
            Err(CompileError::MissingCharacter('{'))
        );
        assert_eq!(Cursor::new(b"").consume(b'{'), Err(CompileError::UnexpectedEof));
    }

    #[test]
    fn arrow_is_two_bytes() {
        let mut cursor = Cursor::new(b"-> Int32");
        cursor.consume_arrow().expect("arrow");
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn newline_sensitive_skip_stops_before_line_feed() {
        let mut cursor = Cursor::new(b"a   \r\n  b");
        cursor.scan_word();
        assert!(!cursor.characters_before_newline());
        assert_eq!(cursor.peek(), Some(LINE_FEED));

        cursor.skip_whitespace(true);
        assert_eq!(cursor.peek(), Some(b'b'));
    }

    #[test]
    fn characters_before_newline_sees_operators() {
        let mut cursor = Cursor::new(b"a + b\n");
        cursor.scan_word();
        assert!(cursor.characters_before_newline());
        assert_eq!(cursor.peek(), Some(b'+'));
    }

    #[test]
    fn tabs_are_part_of_words() {
        let mut cursor = Cursor::new(b"a\tb c");
        assert_eq!(cursor.scan_word(), "a\tb");
    }

    #[test]
    fn skip_to_content_requires_input() {
        let mut cursor = Cursor::new(b"  \n ");
        assert_eq!(cursor.skip_to_content(), Err(CompileError::UnexpectedEof));
    }

    #[test]
    fn resumes_at_recorded_offset() {
        let source = b"abc def";
        let mut cursor = Cursor::at_offset(source, 4);
        assert_eq!(cursor.scan_word(), "def");
        assert_eq!(Cursor::at_offset(source, 99).position(), source.len());
    }
}
