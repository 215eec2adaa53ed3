pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::{Position, Span};
use crate::bytecode::codec::FormatError;
use crate::compiler::{CompileError, CompileErrorKind};
use crate::lexer::LexError;
use crate::parser::{ParseError, ParseErrorKind};
use crate::vm::{RuntimeError, RuntimeErrorKind};

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

/// A renderer-neutral error report.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
    /// Where the primary label points, for reports rendered without source text.
    pub location: Option<Position>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
            location: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_location(mut self, position: Position) -> Self {
        self.location = Some(position);
        self
    }
}

// ---- From impls for the pipeline's error types ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let d = Diagnostic::error(e.kind.description())
            .with_code(e.kind.code())
            .with_span(e.span, "here");
        match e.suggestion() {
            Some(s) => d.with_suggestion(s),
            None => d,
        }
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        let d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_span(e.span, "here");
        match &e.kind {
            ParseErrorKind::Expected { expected, .. } if expected == "';'" => {
                d.with_suggestion("statements end with ';'")
            }
            ParseErrorKind::NestingTooDeep { .. } => {
                d.with_note("split the expression using intermediate 'let' bindings")
            }
            _ => d,
        }
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let label = match &e.kind {
            CompileErrorKind::UndefinedVariable(_) => "not found in this scope",
            CompileErrorKind::DuplicateParameter { .. } => "declared again here",
            _ => "here",
        };
        let d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_span(e.span, label);
        match &e.kind {
            CompileErrorKind::UndefinedVariable(name) => d.with_suggestion(format!(
                "declare it first with 'let {name} = ...;' (functions cannot read locals of enclosing code)"
            )),
            CompileErrorKind::DuplicateParameter { first, .. } => {
                d.with_secondary_span(*first, "first declared here")
            }
            _ => d,
        }
    }
}

impl From<&FormatError> for Diagnostic {
    fn from(e: &FormatError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code());
        match e {
            FormatError::BadMagic => d.with_note("'interpret' expects a .zyi file produced by 'zy compile'"),
            FormatError::UnsupportedVersion { .. } => d.with_suggestion("recompile the source with this version of zy"),
            _ => d,
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let offset = e.position.offset as usize;
        let mut d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_note(format!("at instruction {}", e.ip));
        // Position 0:0 means the module carried no location for this instruction
        if e.position.line > 0 {
            d = d.with_span(Span::new(offset, offset + 1), "here").with_location(e.position);
        }
        if let RuntimeErrorKind::StackOverflow { .. } = e.kind {
            d = d.with_suggestion("check that recursive functions reach a base case, or raise --max-call-depth");
        }
        d
    }
}
