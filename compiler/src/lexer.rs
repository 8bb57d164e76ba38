// lexer.rs — Lexer for Tempo .tpl template files.
//
// Template source is two-level: raw text interleaved with `{...}`
// commands. The segmenter splits a file into those two segment kinds
// (respecting quoted strings inside commands), then the command interior
// is tokenized with a `logos` DFA. Expression parsing happens later in
// the parser, on the token stream.
//
// Preconditions: input is valid UTF-8.
// Postconditions: every byte of the source is covered by exactly one
//   segment; token spans are absolute file offsets.
// Failure modes: unterminated commands produce `LexError`; lexing
//   continues with the remainder treated as raw text.

use logos::Logos;
use std::fmt;

/// Byte-offset range used before spans are converted to `ast::Span`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: ByteSpan,
    pub message: String,
}

/// One top-level segment of a template file.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal template output between commands.
    RawText { text: String, span: ByteSpan },
    /// A `{...}` command; `tokens` cover the interior, spans are absolute.
    Command {
        tokens: Vec<(Token, ByteSpan)>,
        span: ByteSpan,
    },
}

impl Segment {
    pub fn span(&self) -> ByteSpan {
        match self {
            Segment::RawText { span, .. } => *span,
            Segment::Command { span, .. } => *span,
        }
    }
}

/// Result of segmenting + lexing one file.
#[derive(Debug)]
pub struct LexResult {
    pub segments: Vec<Segment>,
    pub errors: Vec<LexError>,
}

/// Tokens inside a `{...}` command.
///
/// Keywords that matter to the expression grammar are fixed tokens;
/// command names (`if`, `template`, `call`, ...) are ordinary `Ident`s
/// and the parser matches on their text via the span.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // ── Expression keywords ──
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("in")]
    In,

    // ── Symbols ──
    #[token("@")]
    At,
    #[token("$")]
    Dollar,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("|")]
    Pipe,
    #[token("?")]
    Question,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // ── Literals ──
    //
    // Float must appear before Int so the longer match wins.
    /// Float literal, e.g. `3.25`, `1.0e-3`.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    Float(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// String literal, single- or double-quoted, `\'`/`\"`/`\\` escapes.
    #[regex(r#"'([^'\\]|\\.)*'"#, parse_string)]
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`. Text retrieved via span.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::In => write!(f, "in"),
            Token::At => write!(f, "@"),
            Token::Dollar => write!(f, "$"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Pipe => write!(f, "|"),
            Token::Question => write!(f, "?"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Float(v) => write!(f, "{v}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '\'' => result.push('\''),
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Segmenter ──

/// Find the byte offset of the `}` closing the command that starts at
/// `open` (the offset of `{`). Quoted strings inside the command may
/// contain braces. Returns None when unterminated.
fn find_command_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'}' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Segment + lex a Tempo source file.
///
/// Non-fatal: unterminated commands are reported and the remaining text
/// becomes raw text; unrecognized characters inside a command are
/// reported and skipped.
pub fn lex(source: &str) -> LexResult {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    let mut flush_text = |segments: &mut Vec<Segment>, start: usize, end: usize| {
        if start < end {
            segments.push(Segment::RawText {
                text: source[start..end].to_string(),
                span: ByteSpan { start, end },
            });
        }
    };

    while pos < bytes.len() {
        if bytes[pos] != b'{' {
            pos += 1;
            continue;
        }
        match find_command_end(bytes, pos) {
            Some(close) => {
                flush_text(&mut segments, text_start, pos);
                let inner_start = pos + 1;
                let inner = &source[inner_start..close];
                let mut tokens = Vec::new();
                for (result, range) in Token::lexer(inner).spanned() {
                    let span = ByteSpan {
                        start: inner_start + range.start,
                        end: inner_start + range.end,
                    };
                    match result {
                        Ok(token) => tokens.push((token, span)),
                        Err(()) => errors.push(LexError {
                            span,
                            message: format!(
                                "unexpected character in command: {:?}",
                                &inner[range.start..range.end]
                            ),
                        }),
                    }
                }
                segments.push(Segment::Command {
                    tokens,
                    span: ByteSpan {
                        start: pos,
                        end: close + 1,
                    },
                });
                pos = close + 1;
                text_start = pos;
            }
            None => {
                errors.push(LexError {
                    span: ByteSpan {
                        start: pos,
                        end: bytes.len(),
                    },
                    message: "unterminated command: missing '}'".to_string(),
                });
                // Rest of the file becomes raw text.
                break;
            }
        }
    }
    flush_text(&mut segments, text_start, bytes.len());

    LexResult { segments, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Segment> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.segments
    }

    fn command_tokens(seg: &Segment) -> Vec<Token> {
        match seg {
            Segment::Command { tokens, .. } => tokens.iter().map(|(t, _)| t.clone()).collect(),
            other => panic!("expected command segment, got {:?}", other),
        }
    }

    #[test]
    fn raw_text_only() {
        let segs = lex_ok("hello world");
        assert_eq!(segs.len(), 1);
        assert_eq!(
            segs[0],
            Segment::RawText {
                text: "hello world".to_string(),
                span: ByteSpan { start: 0, end: 11 }
            }
        );
    }

    #[test]
    fn text_command_text() {
        let segs = lex_ok("a{if true}b");
        assert_eq!(segs.len(), 3);
        assert!(matches!(&segs[0], Segment::RawText { text, .. } if text == "a"));
        assert_eq!(command_tokens(&segs[1]), vec![Token::Ident, Token::True]);
        assert!(matches!(&segs[2], Segment::RawText { text, .. } if text == "b"));
    }

    #[test]
    fn command_spans_are_absolute() {
        let segs = lex_ok("ab{sp}");
        match &segs[1] {
            Segment::Command { tokens, span } => {
                assert_eq!(*span, ByteSpan { start: 2, end: 6 });
                assert_eq!(tokens.len(), 1);
                assert_eq!(tokens[0].1, ByteSpan { start: 3, end: 5 });
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn brace_inside_string_does_not_close() {
        let segs = lex_ok(r#"{msg desc="a}b"}x"#);
        assert_eq!(segs.len(), 2);
        let tokens = command_tokens(&segs[0]);
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Ident,
                Token::Assign,
                Token::Str("a}b".to_string()),
            ]
        );
        assert!(matches!(&segs[1], Segment::RawText { text, .. } if text == "x"));
    }

    #[test]
    fn expression_tokens() {
        let segs = lex_ok("{$a + 2 * 3.5 == 'x' and not $b}");
        assert_eq!(
            command_tokens(&segs[0]),
            vec![
                Token::Dollar,
                Token::Ident,
                Token::Plus,
                Token::Int(2),
                Token::Star,
                Token::Float(3.5),
                Token::EqEq,
                Token::Str("x".to_string()),
                Token::And,
                Token::Not,
                Token::Dollar,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn closing_command() {
        let segs = lex_ok("{/if}");
        assert_eq!(command_tokens(&segs[0]), vec![Token::Slash, Token::Ident]);
    }

    #[test]
    fn header_decl_tokens() {
        let segs = lex_ok("{@param s: bool}");
        assert_eq!(
            command_tokens(&segs[0]),
            vec![Token::At, Token::Ident, Token::Ident, Token::Colon, Token::Ident]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `android` is an identifier, not keyword `and` + `roid`
        let segs = lex_ok("{and android}");
        assert_eq!(command_tokens(&segs[0]), vec![Token::And, Token::Ident]);
    }

    #[test]
    fn unterminated_command_reports_error() {
        let result = lex("text {if true");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("unterminated"));
        assert_eq!(result.segments.len(), 1);
        assert!(matches!(&result.segments[0], Segment::RawText { text, .. } if text == "text "));
    }

    #[test]
    fn string_escapes() {
        let segs = lex_ok(r#"{msg desc="say \"hi\""}"#);
        let tokens = command_tokens(&segs[0]);
        assert_eq!(tokens[3], Token::Str(r#"say "hi""#.to_string()));
    }

    #[test]
    fn every_byte_covered() {
        let source = "a{if $x}b{/if}c";
        let segs = lex_ok(source);
        let mut pos = 0;
        for seg in &segs {
            assert_eq!(seg.span().start, pos);
            pos = seg.span().end;
        }
        assert_eq!(pos, source.len());
    }
}
