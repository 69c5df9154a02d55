pub mod context;
pub mod expander;
pub mod parser;
pub mod types;
pub mod validator;

pub use context::{EnvSource, ParseContext};
pub use expander::expand;
pub use parser::{SchemaParser, parse_schema};
pub use types::*;
pub use validator::validate;
