//! Core types for the mywire MySQL wire protocol.
//!
//! This crate provides the leaf types shared by the protocol layer and its
//! callers:
//!
//! - structured error taxonomy (`Error` and its kind enums)
//! - dynamically-typed `Value` for decoded column data
//! - `Row` / `ColumnInfo` result types with typed access
//!
//! It knows nothing about packets or framing; that lives in the `mywire`
//! crate.

pub mod error;
pub mod row;
pub mod value;

pub use error::{Error, Result};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
