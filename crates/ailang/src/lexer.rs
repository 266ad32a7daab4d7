//! Tokenizer over normalized source text.
//!
//! The lexer consumes text produced by [`crate::source::normalize`] and emits
//! a typed token stream with positions. It never panics: malformed input
//! produces `PAR00x` reports and the scanner resynchronizes at the next
//! character.
//!
//! `test`, `tests`, and `property` are contextual keywords — they are lexed
//! as identifiers and disambiguated by the parser.

use crate::{
    diagnostic::{Phase, Report},
    source::{Pos, Span},
};

/// The kind of a token, including its decoded payload for literals.
#[derive(Debug, Clone, PartialEq, strum::Display)]
pub enum TokenKind {
    // Keywords.
    Module,
    Import,
    Export,
    Func,
    Type,
    Class,
    Instance,
    Let,
    Letrec,
    In,
    If,
    Then,
    Else,
    Match,
    True,
    False,

    // Literals and identifiers.
    Ident,
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),

    // Delimiters.
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Colon,
    ColonColon,
    Dot,
    DotDot,
    Ellipsis,
    Backslash,
    Backtick,
    Pipe,
    Underscore,

    // Operators.
    Arrow,      // ->
    FatArrow,   // =>
    LeftArrow,  // <-
    PlusPlus,   // ++
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Assign,     // =

    Eof,
}

/// A token: kind, the literal text it was scanned from, and its position.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    /// True for identifiers with exactly this name. Used by the parser for
    /// contextual keywords.
    #[must_use]
    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }
}

/// Reserved words. `test`/`tests`/`property` are deliberately absent.
fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "module" => TokenKind::Module,
        "import" => TokenKind::Import,
        "export" => TokenKind::Export,
        "func" => TokenKind::Func,
        "type" => TokenKind::Type,
        "class" => TokenKind::Class,
        "instance" => TokenKind::Instance,
        "let" => TokenKind::Let,
        "letrec" => TokenKind::Letrec,
        "in" => TokenKind::In,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "match" => TokenKind::Match,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => return None,
    };
    Some(kind)
}

/// Tokenizes normalized source text.
///
/// Returns the token stream (always terminated by `Eof`) plus any lexical
/// reports. The stream is still usable when reports are present: the parser
/// relies on this for error recovery.
pub fn tokenize(file: &str, text: &str) -> (Vec<Token>, Vec<Report>) {
    Lexer::new(file, text).run()
}

struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    /// Byte offset of each char, plus a final entry for text length.
    offsets: Vec<u32>,
    index: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    reports: Vec<Report>,
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (offset, c) in text.char_indices() {
            chars.push(c);
            offsets.push(u32::try_from(offset).unwrap_or(u32::MAX));
        }
        offsets.push(u32::try_from(text.len()).unwrap_or(u32::MAX));
        Self {
            file,
            chars,
            offsets,
            index: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            reports: Vec::new(),
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            line: self.line,
            col: self.col,
            offset: self.offsets[self.index],
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.index).copied()?;
        self.index += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: Pos) {
        let end = self.pos();
        let text: String = self.text_between(start, end);
        self.tokens.push(Token {
            kind,
            text,
            span: Span::new(start, end),
        });
    }

    fn text_between(&self, start: Pos, end: Pos) -> String {
        let from = self.offsets.iter().position(|&o| o == start.offset).unwrap_or(0);
        let to = self.offsets.iter().position(|&o| o == end.offset).unwrap_or(self.chars.len());
        self.chars[from..to].iter().collect()
    }

    fn report(&mut self, code: &str, message: String, start: Pos) {
        let span = Span::new(start, self.pos());
        self.reports.push(Report::new(Phase::Parse, code, message).with_span(self.file, span));
    }

    fn run(mut self) -> (Vec<Token>, Vec<Report>) {
        while let Some(c) = self.peek() {
            let start = self.pos();
            match c {
                ' ' | '\t' | '\n' => {
                    self.bump();
                }
                '-' if self.peek2() == Some('-') => self.skip_comment(),
                '-' if self.peek2() == Some('>') => {
                    self.bump();
                    self.bump();
                    self.push(TokenKind::Arrow, start);
                }
                c if c.is_ascii_digit() => self.lex_number(start),
                c if c.is_alphabetic() || c == '_' => self.lex_word(start),
                '"' => self.lex_string(start),
                '\'' => self.lex_char(start),
                _ => self.lex_operator(start),
            }
        }
        let end = self.pos();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            span: Span::new(end, end),
        });
        (self.tokens, self.reports)
    }

    /// `--` comments run to end of line.
    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self, start: Pos) {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = if word == "_" {
            TokenKind::Underscore
        } else {
            keyword(&word).unwrap_or(TokenKind::Ident)
        };
        self.push(kind, start);
    }

    fn lex_number(&mut self, start: Pos) {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // A fractional part only when the dot is followed by a digit, so
        // `xs.1` and `1..2` never lex a float.
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if self.peek() == Some('e') || self.peek() == Some('E') {
            let mut lookahead = self.index + 1;
            if matches!(self.chars.get(lookahead), Some('+' | '-')) {
                lookahead += 1;
            }
            if self.chars.get(lookahead).is_some_and(char::is_ascii_digit) {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => self.push(TokenKind::Float(value), start),
                Err(_) => self.report("PAR004", format!("malformed float literal `{text}`"), start),
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(TokenKind::Int(value), start),
                Err(_) => self.report("PAR004", format!("integer literal `{text}` out of range"), start),
            }
        }
    }

    fn lex_escape(&mut self, start: Pos) -> Option<char> {
        self.bump(); // backslash
        let Some(c) = self.bump() else {
            self.report("PAR002", "unterminated escape sequence".to_owned(), start);
            return None;
        };
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            other => {
                self.report("PAR003", format!("invalid escape sequence `\\{other}`"), start);
                return None;
            }
        };
        Some(decoded)
    }

    fn lex_string(&mut self, start: Pos) {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.report("PAR002", "unterminated string literal".to_owned(), start);
                    return;
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    if let Some(c) = self.lex_escape(start) {
                        value.push(c);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
        self.push(TokenKind::Str(value), start);
    }

    fn lex_char(&mut self, start: Pos) {
        self.bump(); // opening quote
        let value = match self.peek() {
            None | Some('\n') => {
                self.report("PAR002", "unterminated character literal".to_owned(), start);
                return;
            }
            Some('\\') => self.lex_escape(start),
            Some(c) => {
                self.bump();
                Some(c)
            }
        };
        if self.peek() == Some('\'') {
            self.bump();
        } else {
            self.report("PAR002", "unterminated character literal".to_owned(), start);
            return;
        }
        if let Some(c) = value {
            self.push(TokenKind::Char(c), start);
        }
    }

    fn lex_operator(&mut self, start: Pos) {
        let c = self.bump().expect("caller checked peek");
        let two = self.peek();
        let kind = match (c, two) {
            ('=', Some('=')) => {
                self.bump();
                TokenKind::EqEq
            }
            ('=', Some('>')) => {
                self.bump();
                TokenKind::FatArrow
            }
            ('=', _) => TokenKind::Assign,
            ('!', Some('=')) => {
                self.bump();
                TokenKind::NotEq
            }
            ('!', _) => TokenKind::Bang,
            ('<', Some('=')) => {
                self.bump();
                TokenKind::Le
            }
            ('<', Some('-')) => {
                self.bump();
                TokenKind::LeftArrow
            }
            ('<', _) => TokenKind::Lt,
            ('>', Some('=')) => {
                self.bump();
                TokenKind::Ge
            }
            ('>', _) => TokenKind::Gt,
            ('&', Some('&')) => {
                self.bump();
                TokenKind::AndAnd
            }
            ('|', Some('|')) => {
                self.bump();
                TokenKind::OrOr
            }
            ('|', _) => TokenKind::Pipe,
            ('+', Some('+')) => {
                self.bump();
                TokenKind::PlusPlus
            }
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            (':', Some(':')) => {
                self.bump();
                TokenKind::ColonColon
            }
            (':', _) => TokenKind::Colon,
            ('.', Some('.')) => {
                if self.chars.get(self.index + 1) == Some(&'.') {
                    self.bump();
                    self.bump();
                    TokenKind::Ellipsis
                } else {
                    self.bump();
                    TokenKind::DotDot
                }
            }
            ('.', _) => TokenKind::Dot,
            ('(', _) => TokenKind::LParen,
            (')', _) => TokenKind::RParen,
            ('[', _) => TokenKind::LBracket,
            (']', _) => TokenKind::RBracket,
            ('{', _) => TokenKind::LBrace,
            ('}', _) => TokenKind::RBrace,
            (',', _) => TokenKind::Comma,
            (';', _) => TokenKind::Semi,
            ('\\', _) => TokenKind::Backslash,
            ('`', _) => TokenKind::Backtick,
            (other, _) => {
                self.report("PAR001", format!("unexpected character `{other}`"), start);
                return;
            }
        };
        self.push(kind, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::normalize;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let (tokens, reports) = tokenize("test.ail", text);
        assert!(reports.is_empty(), "unexpected reports: {reports:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("module export func test"),
            vec![
                TokenKind::Module,
                TokenKind::Export,
                TokenKind::Func,
                TokenKind::Ident, // contextual keyword stays an identifier
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            kinds("-> => <- :: ++ == != <= >="),
            vec![
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::LeftArrow,
                TokenKind::ColonColon,
                TokenKind::PlusPlus,
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            kinds("1 42 3.5 2e3 1.5e-2"),
            vec![
                TokenKind::Int(1),
                TokenKind::Int(42),
                TokenKind::Float(3.5),
                TokenKind::Float(2000.0),
                TokenKind::Float(0.015),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dot_after_int_is_field_access_not_float() {
        assert_eq!(
            kinds("r.field"),
            vec![TokenKind::Ident, TokenKind::Dot, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\"c""#),
            vec![TokenKind::Str("a\nb\"c".to_owned()), TokenKind::Eof]
        );
    }

    #[test]
    fn char_literals() {
        assert_eq!(
            kinds(r"'x' '\n'"),
            vec![TokenKind::Char('x'), TokenKind::Char('\n'), TokenKind::Eof]
        );
    }

    #[test]
    fn backtick_lexes_for_quasiquote() {
        assert_eq!(
            kinds("`x"),
            vec![TokenKind::Backtick, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("1 -- the rest is ignored ++ ==\n2"),
            vec![TokenKind::Int(1), TokenKind::Int(2), TokenKind::Eof]
        );
    }

    #[test]
    fn positions_reference_normalized_source() {
        let (tokens, _) = tokenize("test.ail", "ab\ncd");
        assert_eq!(tokens[0].span.start.line, 1);
        assert_eq!(tokens[1].span.start.line, 2);
        assert_eq!(tokens[1].span.start.col, 1);
        assert_eq!(tokens[1].span.start.offset, 3);
    }

    #[test]
    fn unterminated_string_reports_par002() {
        let (_, reports) = tokenize("test.ail", "\"abc");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].code, "PAR002");
    }

    #[test]
    fn unexpected_character_recovers() {
        let (tokens, reports) = tokenize("test.ail", "1 @ 2");
        assert_eq!(reports[0].code, "PAR001");
        // scanning continues past the bad character
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Int(2)));
    }

    #[test]
    fn bom_crlf_nfd_variants_lex_identically() {
        let base = "func f() -> Int { 1 }\n";
        let with_bom: Vec<u8> = [&[0xEF, 0xBB, 0xBF][..], base.as_bytes()].concat();
        let with_crlf = base.replace('\n', "\r\n");
        for variant in [with_bom, with_crlf.into_bytes()] {
            let normalized = normalize(&variant).unwrap();
            let (a, _) = tokenize("t.ail", base);
            let (b, _) = tokenize("t.ail", &normalized);
            let ka: Vec<_> = a.iter().map(|t| t.kind.clone()).collect();
            let kb: Vec<_> = b.iter().map(|t| t.kind.clone()).collect();
            assert_eq!(ka, kb);
        }
    }
}
