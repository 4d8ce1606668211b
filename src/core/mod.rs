mod error;
mod value;

pub use error::{DbError, Result};
pub use value::{DataType, Value};
