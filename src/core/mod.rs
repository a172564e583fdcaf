pub mod error;
pub mod types;
pub mod value;

pub use error::{RepositoryError, Result, ValidationErrors};
pub use types::{Edge, FieldType};
pub use value::{DATE_FORMAT, Value, format_date, parse_date};
