//! # Relata
//!
//! A small distributed relational database that serves user-defined
//! functions over HTTP. Clients POST or GET CSV-encoded relations to
//! named functions; each function runs a sequence of relational-algebra
//! statements against typed global variables and streams the result back
//! as chunked CSV.
//!
//! One binary, four roles:
//!
//! - `tx`, the transaction coordinator: multi-version, multi-reader /
//!   single-writer scheduling, version assignment, state persistence and
//!   program distribution
//! - `vol`, a storage volume: one file per committed `(variable,
//!   version)`, atomic-rename writes, pull replication and periodic sync
//! - `exec`, the HTTP front-end and relational executor with its
//!   processor pool
//! - `start`, all three in one process
//!
//! The pieces talk over a small chunk-framed TCP protocol; the only
//! persistent identity in the system is the `(variable name, version)`
//! pair.

pub mod algebra;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod csv;
pub mod env;
pub mod error;
pub mod executor;
pub mod expr;
pub mod head;
pub mod http;
pub mod index;
pub mod limits;
pub mod monitor;
pub mod summary;
pub mod tuple;
pub mod value;
pub mod volume;
pub mod wire;

pub use algebra::{Rel, VarScope};
pub use config::Config;
pub use coordinator::{CoordClient, Coordinator};
pub use env::{Environment, Func};
pub use expr::{Expr, Params};
pub use head::Head;
pub use summary::Summary;
pub use tuple::{Tuple, TupleBuf};
pub use value::{DataType, Value};
pub use volume::Volume;
