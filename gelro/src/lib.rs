//! Gel Binary Protocol Driver Core
//!
//! A transport-agnostic client engine for the Gel (EdgeDB) binary
//! protocol: connection state machine, statement preparation and codec
//! caching, and the self-describing codec system built dynamically from
//! server type descriptors.
//!
//! The core talks to the outside world through the [`Transport`] trait,
//! two narrow entry points: send raw bytes, wait for more bytes. Socket
//! or HTTP tunnel glue, connection strings, pooling and retries live in
//! the caller.
//!
//! # Examples
//!
//! ```no_run
//! use gelro::{ConnectParams, Connection, Value};
//!
//! # async fn app(socket: impl gelro::Transport) -> gelro::Result<()> {
//! let params = ConnectParams::new("edgedb", "main");
//! let mut conn = Connection::connect(socket, &params).await?;
//!
//! let row = conn.query_required_single("select 1 + 1", None).await?;
//! assert_eq!(row, Value::Int64(2));
//!
//! let json = conn.query_json("select {1, 2, 3}", None).await?;
//! assert_eq!(json, "[1, 2, 3]");
//! # Ok(())
//! # }
//! ```

mod common;
mod ext;

// Protocol
pub mod buffer;
pub mod protocol;

// Encoding
pub mod codecs;
pub mod model;

// Component
mod statement;

// Operation
pub mod connection;
pub mod transport;

mod error;

pub use codecs::{Codec, CodecKind, CodecsRegistry};
pub use connection::{ConnectParams, Connection, FetchResult, ServerSettings};
pub use model::{QueryArgs, Value};
pub use protocol::{Cardinality, OutputFormat, ProtocolVersion, QueryOptions, TransactionStatus};
pub use transport::Transport;

pub use error::{
    Aborted, DecodeError, EncodeError, Error, ErrorKind, NoDataError, ProtocolError,
    Result, ServerError, ServerErrorKind, UnsupportedAuth,
};
