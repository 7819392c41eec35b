//! Located error rendering shared by the CLI and the editor API.
//!
//! Parser, type and lowering diagnostics render as
//! `<file>:<line>:<col>: <message>`; lexical messages already carry their
//! location, so they are prefixed with the file name only.

use serde::Serialize;

use crate::checker::TypeError;
use crate::lexer::LexError;
use crate::lower::LowerError;
use crate::parser::ParseError;
use crate::token::SourceLoc;

/// Any front-end failure. The type checker accumulates, so its variant
/// carries every diagnostic from the run.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    Type(Vec<TypeError>),
    Lower(LowerError),
}

impl std::error::Error for CompileError {}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Lex(error) => error.fmt(f),
            CompileError::Parse(error) => error.fmt(f),
            CompileError::Type(errors) => match errors.first() {
                Some(error) => error.fmt(f),
                None => write!(f, "type check failed"),
            },
            CompileError::Lower(error) => error.fmt(f),
        }
    }
}

impl From<LexError> for CompileError {
    fn from(error: LexError) -> Self {
        CompileError::Lex(error)
    }
}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        CompileError::Parse(error)
    }
}

impl From<Vec<TypeError>> for CompileError {
    fn from(errors: Vec<TypeError>) -> Self {
        CompileError::Type(errors)
    }
}

impl From<LowerError> for CompileError {
    fn from(error: LowerError) -> Self {
        CompileError::Lower(error)
    }
}

pub fn located(path: &str, loc: SourceLoc, message: &str) -> String {
    format!("{path}:{}:{}: {message}", loc.line, loc.column)
}

impl CompileError {
    /// One located line per diagnostic.
    pub fn messages(&self, path: &str) -> Vec<String> {
        match self {
            CompileError::Lex(error) => vec![format!("{path}: {error}")],
            CompileError::Parse(error) => vec![located(path, error.loc(), &error.to_string())],
            CompileError::Type(errors) => errors
                .iter()
                .map(|error| located(path, error.loc(), &error.to_string()))
                .collect(),
            CompileError::Lower(error) => vec![located(path, error.loc(), &error.to_string())],
        }
    }
}

#[derive(Serialize)]
struct ErrorJson<'a> {
    ok: bool,
    error: &'a str,
}

/// The editor-facing error shape:
/// `{"ok": false, "error": "<file>:<line>:<col>: <message>"}`.
pub fn editor_json(error: &CompileError, path: &str) -> String {
    let messages = error.messages(path);
    let first = messages.first().map(String::as_str).unwrap_or("error");
    serde_json::to_string(&ErrorJson {
        ok: false,
        error: first,
    })
    .expect("error JSON serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn parse_failure(source: &str) -> CompileError {
        match tokenize(source) {
            Err(error) => CompileError::Lex(error),
            Ok(tokens) => CompileError::Parse(
                parse_tokens(tokens).expect_err("expected parse failure"),
            ),
        }
    }

    #[test]
    fn parse_errors_carry_the_location_prefix() {
        let error = parse_failure("Filter T where T.x > 0");
        assert_eq!(
            error.messages("report.eac"),
            vec!["report.eac:1:23: Expected ., got EOF ''"]
        );
    }

    #[test]
    fn editor_json_shape() {
        let error = parse_failure("Filter T where T.x > 0");
        assert_eq!(
            editor_json(&error, "report.eac"),
            r#"{"ok":false,"error":"report.eac:1:23: Expected ., got EOF ''"}"#
        );
    }

    #[test]
    fn type_errors_render_one_line_each() {
        let program = parse_tokens(tokenize("Set x to missing.\nFilter T where T.a > 0.").expect("tokenize"))
            .expect("parse");
        let errors = crate::checker::check(&program).expect_err("expected type errors");
        let error = CompileError::from(errors);
        let messages = error.messages("x.eac");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("x.eac:1:10: "));
        assert!(messages[1].contains("unknown table 'T'"));
    }
}
