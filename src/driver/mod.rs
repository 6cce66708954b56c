//! Async MySQL/MariaDB driver.
//!
//! The connection task and command state machines built on top of
//! [`crate::protocol`].

pub mod command;
pub mod connection;
pub mod prepared;
pub mod query;
pub mod queue;
pub mod row;
pub mod stream;
pub mod tls;

pub use command::{BoxError, Command, CommandState, MetadataHandler, Ping, QueryMetadata, RowHandler};
pub use connection::{CommandHandle, MySqlConnection, QueryResult};
pub use prepared::PreparedQuery;
pub use query::QueryCommand;
pub use row::MySqlRow;
pub use stream::{MySqlStream, RawStream};
