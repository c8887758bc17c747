//! Common types for docwire
//!
//! This crate provides the error type shared by the cursor and write-validation layers.

pub mod error;

pub use error::{DocwireError, InvalidFieldNameError, Result};
