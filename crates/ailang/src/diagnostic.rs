//! Structured, coded diagnostics ("ailang.error/v1").
//!
//! Every user-facing error in the pipeline is a [`Report`]: a machine-readable
//! code from the central registry, a one-line message, an optional source
//! span, sorted structured data, and an optional fix suggestion. JSON output
//! is deterministic — keys are emitted in sorted order and no HTML escaping
//! is applied — so identical inputs always produce byte-identical reports.

use std::{collections::BTreeMap, fmt};

use crate::source::Span;

/// Schema identifier emitted on every report.
pub const ERROR_SCHEMA: &str = "ailang.error/v1";

/// Checks whether a found schema version is acceptable where `expected` is
/// required. `v1.x` is accepted wherever `v1` is expected.
#[must_use]
pub fn schema_accepts(expected: &str, found: &str) -> bool {
    if expected == found {
        return true;
    }
    let Some((base, _minor)) = found.rsplit_once('.') else {
        return false;
    };
    base == expected
}

/// The pipeline phase a report originates from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Parse,
    Module,
    Loader,
    Desugar,
    Typecheck,
    Elaborate,
    Link,
    Eval,
    Runtime,
}

/// Report severity. Warnings are surfaced but do not abort the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A source span in report form, with the owning file path.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReportSpan {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl ReportSpan {
    #[must_use]
    pub fn new(file: &str, span: Span) -> Self {
        Self {
            file: file.to_owned(),
            line: span.start.line,
            col: span.start.col,
            end_line: span.end.line,
            end_col: span.end.col,
        }
    }
}

/// A suggested fix with a confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Fix {
    pub suggestion: String,
    pub confidence: f64,
}

/// A structured diagnostic.
///
/// Construction goes through [`Report::new`] plus the `with_*` builders;
/// the `schema` field is fixed at creation so serialized reports always
/// carry the version they were built against.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Report {
    pub schema: String,
    pub phase: Phase,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<ReportSpan>,
    /// Structured payload. A `BTreeMap` keeps key order sorted and stable.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
}

impl Report {
    #[must_use]
    pub fn new(phase: Phase, code: &str, message: impl Into<String>) -> Self {
        Self {
            schema: ERROR_SCHEMA.to_owned(),
            phase,
            code: code.to_owned(),
            severity: Severity::Error,
            message: message.into(),
            span: None,
            data: BTreeMap::new(),
            fix: None,
        }
    }

    #[must_use]
    pub fn warning(phase: Phase, code: &str, message: impl Into<String>) -> Self {
        let mut report = Self::new(phase, code, message);
        report.severity = Severity::Warning;
        report
    }

    #[must_use]
    pub fn with_span(mut self, file: &str, span: Span) -> Self {
        if span != Span::synthetic() {
            self.span = Some(ReportSpan::new(file, span));
        }
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_fix(mut self, suggestion: impl Into<String>, confidence: f64) -> Self {
        self.fix = Some(Fix {
            suggestion: suggestion.into(),
            confidence: confidence.clamp(0.0, 1.0),
        });
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Serializes the report to its canonical JSON form.
    ///
    /// Struct fields serialize in declaration order and `data` keys are
    /// sorted by the `BTreeMap`, so output is stable across runs.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("report serialization cannot fail")
    }

    /// Maps a report to the process exit code contract:
    /// 1 compile, 2 type, 3 link, 4 runtime, 5 capability/effect.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.code.starts_with("EVA004") || self.code.starts_with("EVA005") || self.code.starts_with("EVA006") {
            return 5;
        }
        match self.phase {
            Phase::Parse | Phase::Module | Phase::Loader | Phase::Desugar | Phase::Elaborate => 1,
            Phase::Typecheck => 2,
            Phase::Link => 3,
            Phase::Eval | Phase::Runtime => 4,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.phase, self.code, self.message)?;
        if let Some(span) = &self.span {
            write!(f, " at {}:{}:{}", span.file, span.line, span.col)?;
        }
        Ok(())
    }
}

impl std::error::Error for Report {}

/// One entry in the error-code registry.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CodeInfo {
    pub code: &'static str,
    pub phase: Phase,
    pub category: &'static str,
    pub description: &'static str,
}

/// The full error-code registry, exposed for documentation and AI-facing
/// diagnostics. Sorted by code.
pub const CODE_REGISTRY: &[CodeInfo] = &[
    CodeInfo { code: "DSG001", phase: Phase::Desugar, category: "desugar", description: "invalid desugaring" },
    CodeInfo { code: "DSG002", phase: Phase::Desugar, category: "desugar", description: "construct not supported by the core" },
    CodeInfo { code: "DSG003", phase: Phase::Desugar, category: "desugar", description: "alpha-rename collision" },
    CodeInfo { code: "ELB001", phase: Phase::Elaborate, category: "elaborate", description: "invalid core structure" },
    CodeInfo { code: "ELB002", phase: Phase::Elaborate, category: "elaborate", description: "dictionary resolution failed" },
    CodeInfo { code: "ELB004", phase: Phase::Elaborate, category: "elaborate", description: "non-exhaustive pattern match" },
    CodeInfo { code: "ELB005", phase: Phase::Elaborate, category: "elaborate", description: "unreachable match arm" },
    CodeInfo { code: "ELB006", phase: Phase::Elaborate, category: "elaborate", description: "operand is not atomic (ANF violation)" },
    CodeInfo { code: "EVA001", phase: Phase::Eval, category: "eval", description: "unbound variable at evaluation time" },
    CodeInfo { code: "EVA002", phase: Phase::Eval, category: "eval", description: "no pattern arm matched" },
    CodeInfo { code: "EVA003", phase: Phase::Eval, category: "eval", description: "value has unexpected runtime type" },
    CodeInfo { code: "EVA004", phase: Phase::Eval, category: "capability", description: "capability not granted" },
    CodeInfo { code: "EVA005", phase: Phase::Eval, category: "capability", description: "operation outside sandbox constraints" },
    CodeInfo { code: "EVA006", phase: Phase::Eval, category: "capability", description: "effect budget exhausted" },
    CodeInfo { code: "LDR001", phase: Phase::Loader, category: "loader", description: "module file not found" },
    CodeInfo { code: "LDR002", phase: Phase::Loader, category: "loader", description: "circular module dependency" },
    CodeInfo { code: "LDR003", phase: Phase::Loader, category: "loader", description: "imported symbol is not exported" },
    CodeInfo { code: "LDR004", phase: Phase::Loader, category: "loader", description: "ambiguous import path" },
    CodeInfo { code: "LNK001", phase: Phase::Link, category: "link", description: "no instance for dictionary key" },
    CodeInfo { code: "LNK002", phase: Phase::Link, category: "link", description: "ambiguous (overlapping) instances" },
    CodeInfo { code: "LNK003", phase: Phase::Link, category: "link", description: "module not found during linking" },
    CodeInfo { code: "LNK004", phase: Phase::Link, category: "link", description: "instance dependency cycle" },
    CodeInfo { code: "LNK005", phase: Phase::Link, category: "link", description: "interface digest mismatch" },
    CodeInfo { code: "MOD001", phase: Phase::Module, category: "module", description: "module name does not match file path" },
    CodeInfo { code: "MOD002", phase: Phase::Module, category: "module", description: "multiple module headers in one file" },
    CodeInfo { code: "MOD003", phase: Phase::Module, category: "module", description: "duplicate export" },
    CodeInfo { code: "PAR001", phase: Phase::Parse, category: "lex", description: "unexpected character" },
    CodeInfo { code: "PAR002", phase: Phase::Parse, category: "lex", description: "unterminated string or char literal" },
    CodeInfo { code: "PAR003", phase: Phase::Parse, category: "lex", description: "invalid escape sequence" },
    CodeInfo { code: "PAR004", phase: Phase::Parse, category: "lex", description: "malformed numeric literal" },
    CodeInfo { code: "PAR010", phase: Phase::Parse, category: "parse", description: "unexpected token" },
    CodeInfo { code: "PAR011", phase: Phase::Parse, category: "parse", description: "missing delimiter" },
    CodeInfo { code: "PAR012", phase: Phase::Parse, category: "parse", description: "invalid declaration header" },
    CodeInfo { code: "RT001", phase: Phase::Runtime, category: "runtime", description: "unbound global reference" },
    CodeInfo { code: "RT002", phase: Phase::Runtime, category: "runtime", description: "pattern match failed at runtime" },
    CodeInfo { code: "RT003", phase: Phase::Runtime, category: "runtime", description: "division or modulo by zero" },
    CodeInfo { code: "RT004", phase: Phase::Runtime, category: "runtime", description: "record field missing at runtime" },
    CodeInfo { code: "RT005", phase: Phase::Runtime, category: "runtime", description: "index out of bounds" },
    CodeInfo { code: "RT006", phase: Phase::Runtime, category: "runtime", description: "effect operation failed" },
    CodeInfo { code: "RT_REC_001", phase: Phase::Runtime, category: "recursion", description: "recursive value used before initialization" },
    CodeInfo { code: "RT_REC_002", phase: Phase::Runtime, category: "recursion", description: "internal: uninitialized recursion cell" },
    CodeInfo { code: "RT_REC_003", phase: Phase::Runtime, category: "recursion", description: "recursion depth limit exceeded" },
    CodeInfo { code: "TC001", phase: Phase::Typecheck, category: "type", description: "type mismatch" },
    CodeInfo { code: "TC002", phase: Phase::Typecheck, category: "type", description: "unbound variable" },
    CodeInfo { code: "TC003", phase: Phase::Typecheck, category: "type", description: "class constraint failure" },
    CodeInfo { code: "TC004", phase: Phase::Typecheck, category: "type", description: "occurs check violation" },
    CodeInfo { code: "TC005", phase: Phase::Typecheck, category: "type", description: "kind mismatch" },
    CodeInfo { code: "TC006", phase: Phase::Typecheck, category: "type", description: "missing type annotation" },
    CodeInfo { code: "TC007", phase: Phase::Typecheck, category: "type", description: "ambiguous type after defaulting" },
    CodeInfo { code: "TC008", phase: Phase::Typecheck, category: "type", description: "effect constraint violation" },
    CodeInfo { code: "TC009", phase: Phase::Typecheck, category: "type", description: "no instance for class constraint" },
    CodeInfo { code: "TC_REC_001", phase: Phase::Typecheck, category: "record", description: "record field missing" },
    CodeInfo { code: "TC_REC_002", phase: Phase::Typecheck, category: "record", description: "record update adds unknown field" },
    CodeInfo { code: "TC_REC_003", phase: Phase::Typecheck, category: "record", description: "row occurs check violation" },
    CodeInfo { code: "TC_REC_004", phase: Phase::Typecheck, category: "record", description: "row kind mismatch" },
];

/// Looks up a code in the registry.
#[must_use]
pub fn code_info(code: &str) -> Option<&'static CodeInfo> {
    CODE_REGISTRY.iter().find(|info| info.code == code)
}

/// Result alias used by every pipeline phase: a value, or a non-empty list
/// of reports. Later phases are skipped when earlier reports exist.
pub type PhaseResult<T> = Result<T, Vec<Report>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_versioning_accepts_minor_revisions() {
        assert!(schema_accepts("ailang.error/v1", "ailang.error/v1"));
        assert!(schema_accepts("ailang.error/v1", "ailang.error/v1.2"));
        assert!(!schema_accepts("ailang.error/v1", "ailang.error/v2"));
        assert!(!schema_accepts("ailang.error/v1", "ailang.iface/v1"));
    }

    #[test]
    fn json_output_is_stable() {
        let report = Report::new(Phase::Typecheck, "TC001", "type mismatch")
            .with_data("expected", serde_json::json!("Int"))
            .with_data("actual", serde_json::json!("Float"));
        let a = report.to_json();
        let b = report.to_json();
        assert_eq!(a, b);
        // data keys sorted by BTreeMap
        let actual_pos = a.find("\"actual\"").unwrap();
        let expected_pos = a.find("\"expected\"").unwrap();
        assert!(actual_pos < expected_pos);
    }

    #[test]
    fn every_registry_code_has_description() {
        for info in CODE_REGISTRY {
            assert!(!info.description.is_empty(), "{} missing description", info.code);
        }
    }

    #[test]
    fn registry_is_sorted_and_unique() {
        for pair in CODE_REGISTRY.windows(2) {
            assert!(pair[0].code < pair[1].code, "{} >= {}", pair[0].code, pair[1].code);
        }
    }

    #[test]
    fn capability_codes_exit_five() {
        let report = Report::new(Phase::Eval, "EVA004", "capability not granted");
        assert_eq!(report.exit_code(), 5);
        let report = Report::new(Phase::Eval, "EVA002", "no arm matched");
        assert_eq!(report.exit_code(), 4);
    }

    #[test]
    fn fix_confidence_is_clamped() {
        let report = Report::new(Phase::Parse, "PAR010", "unexpected token").with_fix("add a closing paren", 1.7);
        assert!((report.fix.unwrap().confidence - 1.0).abs() < f64::EPSILON);
    }
}
