//! zy: a small scripting language.
//!
//! Source text goes through [`lexer`], [`parser`] and [`compiler`] to become a
//! [`Module`]; a module can be persisted as a `.zyi` artifact with
//! [`serialize_module`] / [`deserialize_module`] and executed by the [`vm`].
//!
//! ```
//! let config = zy::Config::default();
//! let module = zy::compile_source("let x = 1 + 2 * 3; print x;", &config).unwrap();
//! let execution = zy::run(&module, &config);
//! assert_eq!(execution.output, vec!["7"]);
//! ```

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod value;
pub mod vm;

pub use bytecode::Module;
pub use bytecode::codec::{FormatError, deserialize_module, serialize_module};
pub use config::Config;
pub use vm::{Execution, run};

use ast::SourceMap;
use compiler::CompileError;
use diagnostic::Diagnostic;
use lexer::LexError;
use parser::ParseError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why `compile_source` produced no module.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileFailure {
    /// Lexing stopped at `error`; `parse` holds the problems found in the
    /// text before it.
    #[error("{error}")]
    Lex { error: LexError, parse: Vec<ParseError> },
    #[error("{} parse error(s)", .0.len())]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(CompileError),
}

impl CompileFailure {
    /// One diagnostic per underlying error, in source order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            CompileFailure::Lex { error, parse } => parse
                .iter()
                .map(Diagnostic::from)
                .chain(std::iter::once(Diagnostic::from(error)))
                .collect(),
            CompileFailure::Parse(errors) => errors.iter().map(Diagnostic::from).collect(),
            CompileFailure::Compile(e) => vec![Diagnostic::from(e)],
        }
    }
}

/// Parse source text into an AST. Parse errors are collected up to
/// `config.max_parse_errors`. A lex error still fails the parse, but the text
/// before it is parsed so its errors are reported alongside.
pub fn parse_source(source: &str, config: &Config) -> Result<ast::Program, CompileFailure> {
    let (tokens, lex_error) = lexer::lex_partial(source);
    let (program, mut errors) = parser::Parser::new(tokens, config).parse_program();
    match lex_error {
        Some(error) => {
            // The stream was cut short at the bad token; errors from there on are artifacts of that
            errors.retain(|e| e.span.start < error.span.start);
            Err(CompileFailure::Lex { error, parse: errors })
        }
        None if errors.is_empty() => Ok(program),
        None => Err(CompileFailure::Parse(errors)),
    }
}

/// Lex, parse and compile source text into a module.
pub fn compile_source(source: &str, config: &Config) -> Result<Module, CompileFailure> {
    let program = parse_source(source, config)?;
    compiler::compile(&program, &SourceMap::new(source)).map_err(CompileFailure::Compile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_reports_each_stage() {
        let config = Config::default();
        assert!(matches!(
            compile_source("let x = \"open", &config),
            Err(CompileFailure::Lex { parse, .. }) if parse.is_empty()
        ));
        match compile_source("let = 1; print 2", &config) {
            Err(CompileFailure::Parse(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected parse errors, got {other:?}"),
        }
        assert!(matches!(
            compile_source("print y;", &config),
            Err(CompileFailure::Compile(_))
        ));
    }

    #[test]
    fn diagnostics_carry_codes() {
        let failure = compile_source("print y;", &Config::default()).unwrap_err();
        let diags = failure.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some("ZY-C001"));
    }

    #[test]
    fn lex_error_reported_with_earlier_parse_errors() {
        let failure = compile_source("let = 1;\nprint 2\nlet s = \"open", &Config::default()).unwrap_err();
        match &failure {
            CompileFailure::Lex { error, parse } => {
                assert_eq!(error.kind.code(), "ZY-L002");
                let lines: Vec<u32> = parse.iter().map(|e| e.position.line).collect();
                assert_eq!(lines, vec![1, 3], "{parse:?}");
            }
            other => panic!("expected a lex failure, got {other:?}"),
        }
        let codes: Vec<_> = failure.diagnostics().iter().filter_map(|d| d.code).collect();
        assert_eq!(codes, vec!["ZY-P001", "ZY-P001", "ZY-L002"]);
    }

    #[test]
    fn version_is_crate_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
