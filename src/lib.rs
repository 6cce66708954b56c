//! QAIL MySQL Driver
//!
//! Native MySQL / MariaDB client protocol engine.
//!
//! # Architecture
//!
//! ## Protocol (Pure, Sync)
//! - `protocol::PacketCodec` - framing and sequence checking
//! - `protocol::Lifecycle` - handshake, TLS upgrade and authentication
//! - `types` - length-encoded values, null bitmaps, temporal layouts
//!
//! ## Driver (Async I/O)
//! - `driver::MySqlConnection` - one tokio task per connection
//! - Commands are queued FIFO and pipelined over the socket
//!
//! # Example
//!
//! ```ignore
//! use qail_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::builder()
//!     .host("127.0.0.1")
//!     .user("app")
//!     .password("secret")
//!     .database("shop")
//!     .build();
//! let conn = MySqlConnection::connect(&config).await?;
//!
//! let rows = conn.simple_query("SELECT 1").await?;
//! assert_eq!(rows[0].get_i64(0), Some(1));
//!
//! let result = conn
//!     .query("INSERT INTO users (name) VALUES (?)", &["alice".into()])
//!     .await?;
//! println!("new id: {}", result.metadata.last_insert_id);
//!
//! conn.close().await?;
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{MySqlConfig, MySqlConfigBuilder, TlsMode};
pub use driver::{
    Command, CommandHandle, CommandState, MySqlConnection, MySqlRow, QueryMetadata, QueryResult,
};
pub use error::{MySqlError, MySqlResult, ServerError};
pub use types::{ColumnType, MySqlTime, MySqlValue};
