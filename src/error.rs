//! Error Types
//!
//! Per-concern error enums. The relational evaluator itself does not
//! error-return; failures surface at the boundaries (value parsing, CSV
//! decode, program parsing, wire IO) and are mapped to HTTP statuses by the
//! executor.

use std::io;
use thiserror::Error;

use crate::value::DataType;

/// Scalar parsing and range errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Literal does not parse as the requested type (bad digit, overflow,
    /// out of range)
    #[error("value '{0}' is not of type '{1}'")]
    BadLiteral(String, DataType),

    /// String value exceeds the maximum length
    #[error("string exceeds {0} bytes")]
    StringTooLong(usize),
}

pub type ValueResult<T> = Result<T, ValueError>;

/// CSV decode errors, reported with 1-based line numbers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsvError {
    #[error("bad csv: missing header")]
    MissingHeader,

    #[error("bad header: {0}")]
    BadHeader(String),

    #[error("bad tuple on line {line}: {detail}")]
    BadTuple { line: usize, detail: String },
}

pub type CsvResult<T> = Result<T, CsvError>;

/// Program source errors with a 1-based line position
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {msg}")]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

impl ParseError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        ParseError { line, msg: msg.into() }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Internal RPC errors (chunked framing, fixed-width fields, message tags)
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected message tag {got} (expected {expected})")]
    BadTag { expected: i32, got: i32 },

    #[error("chunk of {0} bytes exceeds the block limit")]
    ChunkTooLarge(usize),

    #[error("connection closed mid-message")]
    Truncated,

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type WireResult<T> = Result<T, WireError>;

/// HTTP request errors; every variant maps to a 400 response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("connection closed")]
    Closed,
}

pub type HttpResult<T> = Result<T, HttpError>;
