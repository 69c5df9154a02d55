pub mod error;
pub mod value;

pub use error::{Result, SchemaError};
pub use value::{Record, Value};
