//! Engine-wide size limits.
//!
//! Every limit here is part of the wire and storage contract: fixed-width
//! name and address fields are padded to these sizes, and block-framed IO
//! rejects frames larger than [`MAX_BLOCK`].

/// Maximum number of named relational type declarations per program.
pub const MAX_TYPES: usize = 128;

/// Maximum number of attributes per relational type.
pub const MAX_ATTRS: usize = 64;

/// Maximum length of identifiers (variables, attributes, functions).
pub const MAX_NAME: usize = 32;

/// Maximum number of global variables.
pub const MAX_VARS: usize = 128;

/// Maximum number of statements per function.
pub const MAX_STMTS: usize = 128;

/// Maximum length of a string value in bytes.
pub const MAX_STRING: usize = 1024;

/// Size of a block for framed IO operations.
pub const MAX_BLOCK: usize = 66_560;

/// Maximum length of a `host:port` string.
pub const MAX_ADDR: usize = 64;
