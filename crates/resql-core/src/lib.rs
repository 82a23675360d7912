pub mod error;
pub mod types;

pub use error::{ResqlError, Result};
pub use types::{Value, ValueRef};
