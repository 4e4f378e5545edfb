//! SQL utilities for the PostgreSQL executor
//!
//! Provides statement rendering, DDL generation and identifier sanitization.

pub mod ddl;
pub mod render;
pub mod sanitize;

pub use ddl::DdlGenerator;
pub use render::{Bind, Rendered};
pub use sanitize::{POSTGRES_RESERVED_WORDS, quote_identifier, quote_qualified, validate_identifier};
