pub mod error;
pub mod types;
pub mod value;

pub use error::StepLangError;
pub use types::*;
pub use value::*;
