//! Shared data model for compiled Yarn programs and converted dialogue databases.

pub mod database;
pub mod program;
pub mod validate;

pub use database::*;
pub use program::*;
pub use validate::{ValidationError, validate_database};
