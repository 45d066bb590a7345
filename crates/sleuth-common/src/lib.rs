pub mod error;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use types::SourceLocation;
