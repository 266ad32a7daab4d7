//! Source ingestion: decoding, normalization, spans, and stable node ids.
//!
//! All text entering the pipeline passes through [`normalize`] exactly once.
//! Normalization strips a UTF-8 BOM, converts CRLF line endings to LF, and
//! applies Unicode NFC. The lexer and every span in the system reference the
//! normalized text, so BOM/CRLF/NFD variants of the same logical source
//! produce identical token streams.

use std::fmt;

use unicode_normalization::{IsNormalized, UnicodeNormalization, is_nfc_quick};

/// The UTF-8 byte order mark.
const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Error produced when source bytes are not valid UTF-8.
#[derive(Debug, Clone)]
pub struct DecodeError {
    /// Byte offset of the first invalid sequence.
    pub offset: usize,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source is not valid UTF-8 (first invalid byte at offset {})", self.offset)
    }
}

impl std::error::Error for DecodeError {}

/// Normalizes raw source bytes into canonical text.
///
/// Steps, in order: strip the UTF-8 BOM if present, decode as UTF-8,
/// convert CRLF to LF, apply Unicode NFC.
///
/// The function is idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(bytes: &[u8]) -> Result<String, DecodeError> {
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError {
        offset: e.valid_up_to(),
    })?;
    let text = if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text.to_owned()
    };
    if is_nfc_quick(text.chars()) == IsNormalized::Yes {
        Ok(text)
    } else {
        Ok(text.nfc().collect())
    }
}

/// A position in normalized source text.
///
/// Lines and columns are 1-based; `offset` is the byte offset into the
/// normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
    pub offset: u32,
}

impl Pos {
    /// The position of the first byte of a file.
    #[must_use]
    pub const fn start() -> Self {
        Self { line: 1, col: 1, offset: 0 }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A half-open byte range in normalized source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    #[must_use]
    pub const fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    /// A synthetic span for nodes created by desugaring with no source text.
    #[must_use]
    pub const fn synthetic() -> Self {
        Self {
            start: Pos { line: 0, col: 0, offset: 0 },
            end: Pos { line: 0, col: 0, offset: 0 },
        }
    }

    /// Merges two spans into the smallest span covering both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            start: if self.start.offset <= other.start.offset {
                self.start
            } else {
                other.start
            },
            end: if self.end.offset >= other.end.offset {
                self.end
            } else {
                other.end
            },
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A stable identifier for an AST node.
///
/// Computed deterministically from the file path and the node's byte range
/// in the normalized source, so the same logical node gets the same id on
/// every run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Sid(String);

impl Sid {
    #[must_use]
    pub fn new(path: &str, span: Span) -> Self {
        Self(format!("{path}#{}:{}", span.start.offset, span.end.offset))
    }

    /// A sid for nodes synthesized by the compiler with no source range.
    #[must_use]
    pub fn synthetic(path: &str, tag: &str) -> Self {
        Self(format!("{path}#synthetic:{tag}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped() {
        let with_bom = [&[0xEF, 0xBB, 0xBF][..], b"module t"].concat();
        assert_eq!(normalize(&with_bom).unwrap(), "module t");
    }

    #[test]
    fn crlf_becomes_lf() {
        assert_eq!(normalize(b"a\r\nb").unwrap(), "a\nb");
    }

    #[test]
    fn nfd_becomes_nfc() {
        // "é" as e + combining acute vs precomposed
        let nfd = "e\u{0301}";
        let nfc = "\u{00E9}";
        assert_eq!(normalize(nfd.as_bytes()).unwrap(), nfc);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs: &[&[u8]] = &[b"plain", b"a\r\nb\r\n", "e\u{0301}xpose".as_bytes()];
        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(once.as_bytes()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn invalid_utf8_reports_offset() {
        let err = normalize(&[b'a', 0xFF, b'b']).unwrap_err();
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn sid_is_deterministic() {
        let span = Span::new(Pos { line: 1, col: 1, offset: 4 }, Pos { line: 1, col: 5, offset: 8 });
        assert_eq!(Sid::new("lib/a", span), Sid::new("lib/a", span));
        assert_eq!(Sid::new("lib/a", span).as_str(), "lib/a#4:8");
    }
}
