pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod result;
pub mod session;

pub use client::{Client, PreparedStatement};
pub use config::{generate_client_name, ClientConfig};
pub use endpoint::Endpoint;
pub use result::{ColumnIndex, FromValue, ResultStream, Row, StreamState};
pub use resql_core::{ResqlError, Result, Value, ValueRef};

#[cfg(test)]
mod mock;
#[cfg(test)]
mod tests;
