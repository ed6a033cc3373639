//! Synchronous MySQL wire protocol core.
//!
//! This crate implements the packet layer of a MySQL client from scratch:
//!
//! - Packet framing with sequence numbers and 16 MiB splitting
//! - The length-encoded integer codec
//! - Typed decoders and encoders for every protocol message (greeting,
//!   handshake response, OK/EOF/error, result-set header, field metadata,
//!   text and binary rows, prepared-statement and change-user responses,
//!   auth-switch and public-key exchange)
//! - The command dispatcher and connection state machine
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB - 1 are split, with an empty terminal packet when
//!   the payload is an exact multiple
//! - Request/response pairing via sequence numbers, reset on every command
//!
//! The transport socket is not part of this crate: anything implementing
//! [`Transport`] (which every `Read + Write` type does) can carry a
//! connection. Authentication cryptography is likewise external; this layer
//! frames opaque auth blobs and surfaces plugin-switch requests.
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire::{Connection, WireConfig};
//!
//! let stream = std::net::TcpStream::connect("localhost:3306")?;
//! let mut conn = Connection::new(stream, WireConfig::new().user("root"));
//! let greeting = conn.read_greeting()?;
//! let auth_blob = scramble(&greeting.auth_plugin_data, password); // external
//! conn.send_handshake_response(&auth_blob, greeting.auth_plugin.as_deref())?;
//! ```

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use commands::Command;
pub use config::WireConfig;
pub use connection::{AFFECTED_ROWS_ERROR, Connection, Transport, WireState};
pub use types::FieldType;

pub use mywire_core::{Error, Result, Row, Value};
