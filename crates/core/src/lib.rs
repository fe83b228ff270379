//! Core domain types, errors, and constants for `quotevault`.
//!
//! This crate holds the building blocks shared by the storage engine and the
//! operator CLI: the persisted record model, the quote/component shapes and
//! the catalog of business rules that constrain them.
//!
//! ## Key Components
//!
//! - **`errors`**: The general `Error` enum and `Result` alias used for
//!   configuration, file system and validation failures.
//! - **`types`**: Records, store names, quotes, component records and the
//!   `ComponentCatalog` describing exclusion groups and dependencies.
//! - **`constants`**: Environment variable names, file names and the schema
//!   version expected by this build.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    types::*,
};
