// diag.rs — Unified diagnostics model and the shared error sink.
//
// Provides the diagnostic types used across all compiler phases plus the
// ErrorSink that passes report into. Passes never fail on user errors:
// they record a Diagnostic and continue, so one run surfaces many
// diagnostics. The sink preserves insertion order and exposes a snapshot
// marker so a pass can ask "has any error been reported since M" without
// reading individual entries.
//
// Preconditions: none (types only).
// Failure modes: the exploding sink panics on the first error-level
//   report; it is reserved for pipeline-internal assertions.

use std::fmt;

use crate::ast::SourceLocation;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0201`, `W0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, grouped by the phase that owns them.
pub mod codes {
    use super::DiagCode;

    // Parse / lex
    pub const E0100: DiagCode = DiagCode("E0100"); // unexpected character
    pub const E0101: DiagCode = DiagCode("E0101"); // unterminated command
    pub const E0102: DiagCode = DiagCode("E0102"); // malformed command
    pub const E0103: DiagCode = DiagCode("E0103"); // expression syntax error
    pub const E0104: DiagCode = DiagCode("E0104"); // missing or duplicate namespace
    pub const E0105: DiagCode = DiagCode("E0105"); // unclosed block command

    // Headers and names
    pub const E0200: DiagCode = DiagCode("E0200"); // duplicate declaration
    pub const E0201: DiagCode = DiagCode("E0201"); // undefined variable
    pub const E0202: DiagCode = DiagCode("E0202"); // unknown declared type
    pub const E0203: DiagCode = DiagCode("E0203"); // prop outside element template
    pub const E0204: DiagCode = DiagCode("E0204"); // v1 expression rejected

    // Expression types
    pub const E0300: DiagCode = DiagCode("E0300"); // operand type mismatch
    pub const E0301: DiagCode = DiagCode("E0301"); // unknown function
    pub const E0302: DiagCode = DiagCode("E0302"); // unknown global

    // Registry / templates
    pub const E0400: DiagCode = DiagCode("E0400"); // duplicate template
    pub const E0401: DiagCode = DiagCode("E0401"); // duplicate delegate candidate
    pub const E0402: DiagCode = DiagCode("E0402"); // delegate group without exactly one default

    // HTML
    pub const E0500: DiagCode = DiagCode("E0500"); // unclosed HTML tag
    pub const E0501: DiagCode = DiagCode("E0501"); // mismatched close tag
    pub const E0502: DiagCode = DiagCode("E0502"); // command not allowed in tag context

    // Calls / visibility / deps
    pub const E0600: DiagCode = DiagCode("E0600"); // call to private template
    pub const E0601: DiagCode = DiagCode("E0601"); // unknown call target
    pub const E0602: DiagCode = DiagCode("E0602"); // missing required param
    pub const E0603: DiagCode = DiagCode("E0603"); // unknown param at call site
    pub const E0604: DiagCode = DiagCode("E0604"); // call-site type mismatch
    pub const E0605: DiagCode = DiagCode("E0605"); // call into indirect dependency

    // Policy
    pub const E0700: DiagCode = DiagCode("E0700"); // conformance violation
    pub const E0701: DiagCode = DiagCode("E0701"); // unknown logging element

    // Autoescape
    pub const E0800: DiagCode = DiagCode("E0800"); // non-strict template where strict required
    pub const E0801: DiagCode = DiagCode("E0801"); // bad contextual usage
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedLocation {
    pub loc: SourceLocation,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase. Always carries a source
/// location; messages are formatted at the reporting site against a
/// stable code.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: SourceLocation,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocation>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, loc: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(loc: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, loc, message)
    }

    pub fn warning(loc: SourceLocation, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, loc, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related location.
    pub fn with_related(mut self, loc: SourceLocation, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            loc,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.loc, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.loc, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        for rel in &self.related {
            write!(f, "\n  note: {}: {}", rel.loc, rel.label)?;
        }
        Ok(())
    }
}

// ── Error sink ───────────────────────────────────────────────────────────

/// Opaque marker into the sink's report stream. Obtained from
/// `ErrorSink::snapshot` and consumed by `ErrorSink::errors_since`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Append-only accumulator for diagnostics, shared across all passes of a
/// compile run. Reports are kept in insertion order. The sink is never
/// read for control flow except through the snapshot API.
#[derive(Debug, Default)]
pub struct ErrorSink {
    diags: Vec<Diagnostic>,
    error_count: usize,
    exploding: bool,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that panics on the first error-level report. Used inside
    /// passes to assert that their own subroutines cannot produce user
    /// errors; reaching the panic is a pipeline bug, not a user mistake.
    pub fn exploding() -> Self {
        Self {
            exploding: true,
            ..Self::default()
        }
    }

    pub fn report(&mut self, diag: Diagnostic) {
        if diag.level == DiagLevel::Error {
            if self.exploding {
                panic!("internal: unexpected error diagnostic: {}", diag);
            }
            self.error_count += 1;
        }
        self.diags.push(diag);
    }

    /// Opaque marker for the current end of the report stream.
    pub fn snapshot(&self) -> Checkpoint {
        Checkpoint(self.error_count)
    }

    /// Number of error-level diagnostics reported since `marker`.
    pub fn errors_since(&self, marker: Checkpoint) -> usize {
        self.error_count - marker.0
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diags
    }
}
