//! Pre-execution checks of a dependency graph.
pub mod error;
mod rules;
pub mod validator;

pub use error::{ValidationError, ValidationErrorType};
pub use validator::Validator;
