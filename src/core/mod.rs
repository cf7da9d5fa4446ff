pub mod convert;
pub mod error;
pub mod value;

pub use convert::ContextValue;
pub use error::{ContextError, Result};
pub use value::{ContextValues, DataType, Value};
