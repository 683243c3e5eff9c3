use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(keycast::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(keycast::config::invalid))]
    Invalid { message: String },

    #[error("Value out of range for `{field}`: {value} (expected {min}..={max})")]
    #[diagnostic(code(keycast::config::out_of_range))]
    OutOfRange {
        field: String,
        value: i64,
        min: u64,
        max: u64,
    },

    #[error("Configuration file not found: {}", path.display())]
    #[diagnostic(
        code(keycast::config::not_found),
        help("Omit --config to run with the built-in defaults")
    )]
    NotFound { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
