//! Typed packet payload codecs.
//!
//! One decoder or encoder per protocol message. Decoders take a complete,
//! reassembled payload (framing already stripped) and either produce a typed
//! packet or fail with a protocol error carrying the exact byte deficit.
//! A server-reported error (leading 0xFF) is *not* a decode failure: the
//! packet decoded fine, the server said no, and every reply enum carries an
//! `Err(ErrPacket)` variant for it.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::{Error, ProtocolError, QueryError, QueryErrorKind};
use mywire_core::Result;

use crate::protocol::lenenc::Lenenc;
use crate::protocol::reader::PacketReader;
use crate::protocol::writer::PacketWriter;
use crate::protocol::{ERROR_MARKER, EOF_MARKER, UNKNOWN_SQLSTATE, capabilities, client_err};

/// Upper bound on server error message bytes we keep.
const ERRMSG_CAP: usize = 512;

/// Scramble length of the 4.1+ handshake.
const SCRAMBLE_LENGTH: usize = 20;

/// Scramble length of the pre-4.1 handshake (first fragment of 4.1+).
const SCRAMBLE_LENGTH_323: usize = 8;

/// Build the protocol error for a packet whose payload ended early.
pub(crate) fn truncated(what: &str, reader: &PacketReader<'_>) -> Error {
    let deficit = reader.shortfall().max(1);
    tracing::warn!(packet = what, deficit, "packet shorter than expected");
    Error::Protocol(ProtocolError {
        message: format!("{what} packet {deficit} bytes shorter than expected"),
        raw_data: None,
        source: None,
    })
}

pub(crate) fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}

/// An error the server embedded in a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Server (or client CR_xxx) error code
    pub code: u16,
    /// Five-character SQLSTATE
    pub sqlstate: String,
    /// Human-readable message
    pub message: String,
}

impl ErrPacket {
    /// Parse the tail of an error packet (the bytes after the 0xFF marker).
    ///
    /// Best-effort: this never fails. An empty or 2-byte tail yields
    /// `CR_UNKNOWN_ERROR` with the default SQLSTATE; a `#` that is not
    /// followed by a full 5-byte SQLSTATE abandons both the SQLSTATE and
    /// the message.
    pub fn parse(tail: &[u8]) -> Self {
        let mut code = client_err::CR_UNKNOWN_ERROR;
        let mut sqlstate = UNKNOWN_SQLSTATE.to_string();
        let mut message = String::new();

        if tail.len() > 2 {
            let mut reader = PacketReader::new(tail);
            // The length check above guarantees these two bytes
            code = reader.read_u16_le().unwrap_or(client_err::CR_UNKNOWN_ERROR);
            if reader.peek() == Some(b'#') {
                reader.skip(1);
                match reader.read_string(5) {
                    Some(state) => sqlstate = state,
                    None => {
                        return Self {
                            code,
                            sqlstate,
                            message,
                        };
                    }
                }
            }
            let rest = reader.read_rest();
            let take = rest.len().min(ERRMSG_CAP);
            message = String::from_utf8_lossy(&rest[..take]).into_owned();
        }

        Self {
            code,
            sqlstate,
            message,
        }
    }

    /// Check if this is a unique constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        // MySQL error code 1062 = ER_DUP_ENTRY
        self.code == 1062
    }

    /// Check if this is a foreign key constraint violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        // MySQL error codes 1451, 1452 = foreign key violations
        self.code == 1451 || self.code == 1452
    }

    /// Convert to the structured query error handed to callers.
    pub fn to_query_error(&self) -> QueryError {
        let kind = if self.is_duplicate_key()
            || self.is_foreign_key_violation()
            || self.sqlstate.starts_with("23")
        {
            QueryErrorKind::Constraint
        } else if self.code == 1064 {
            QueryErrorKind::Syntax
        } else if self.code == 1146 || self.code == 1054 {
            QueryErrorKind::NotFound
        } else if self.code == 1044 || self.code == 1045 || self.code == 1142 {
            QueryErrorKind::Permission
        } else {
            QueryErrorKind::Database
        };
        QueryError {
            kind,
            code: self.code,
            sqlstate: self.sqlstate.clone(),
            message: self.message.clone(),
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Info string, when the server sent one
    pub message: Option<String>,
}

impl OkPacket {
    /// Parse the fields after the marker byte.
    fn parse_fields(reader: &mut PacketReader<'_>, what: &str) -> Result<Self> {
        let affected_rows = reader
            .read_lenenc_int()
            .ok_or_else(|| truncated(what, reader))?;
        let last_insert_id = reader
            .read_lenenc_int()
            .ok_or_else(|| truncated(what, reader))?;
        let status_flags = reader
            .read_u16_le()
            .ok_or_else(|| truncated(what, reader))?;
        let warnings = reader
            .read_u16_le()
            .ok_or_else(|| truncated(what, reader))?;

        // Optional trailing message: present only when bytes remain and the
        // length prefix is non-zero
        let message = if reader.is_empty() {
            None
        } else {
            match reader.read_lenenc() {
                Some(Lenenc::Int(0)) | None => None,
                Some(Lenenc::Int(n)) => {
                    let take = (n as usize).min(reader.remaining());
                    reader.read_string(take)
                }
                Some(Lenenc::Null) => Some(reader.read_rest_string()),
            }
        };

        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            message,
        })
    }
}

/// Decoded response where an OK packet was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OkReply {
    Ok(OkPacket),
    Err(ErrPacket),
}

impl OkReply {
    /// Decode an OK-or-error payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let marker = reader.read_u8().ok_or_else(|| truncated("OK", &reader))?;
        if marker == ERROR_MARKER {
            return Ok(OkReply::Err(ErrPacket::parse(reader.read_rest())));
        }
        tracing::trace!(marker, "decoding OK packet");
        Ok(OkReply::Ok(OkPacket::parse_fields(&mut reader, "OK")?))
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

/// Decoded response where an EOF packet was expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EofReply {
    Eof(EofPacket),
    Err(ErrPacket),
}

impl EofReply {
    /// Decode an EOF-or-error payload.
    ///
    /// The server sends a 1-byte EOF after PREPARE/EXECUTE metadata but a
    /// 5-byte one after results; the short form has no warning/status
    /// fields.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let marker = reader.read_u8().ok_or_else(|| truncated("EOF", &reader))?;
        if marker == ERROR_MARKER {
            return Ok(EofReply::Err(ErrPacket::parse(reader.read_rest())));
        }

        if payload.len() > 1 {
            let warnings = reader
                .read_u16_le()
                .ok_or_else(|| truncated("EOF", &reader))?;
            let status_flags = reader
                .read_u16_le()
                .ok_or_else(|| truncated("EOF", &reader))?;
            Ok(EofReply::Eof(EofPacket {
                warnings,
                status_flags,
            }))
        } else {
            Ok(EofReply::Eof(EofPacket {
                warnings: 0,
                status_flags: 0,
            }))
        }
    }
}

/// The server wants the client to switch authentication plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    /// Name of the plugin to switch to
    pub plugin: String,
    /// Fresh plugin data (scramble), opaque to this layer
    pub data: Vec<u8>,
}

/// Decoded reply to a handshake response or auth data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Ok(OkPacket),
    Err(ErrPacket),
    Switch(AuthSwitchRequest),
}

impl AuthReply {
    /// Decode the server's answer during authentication.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let marker = reader
            .read_u8()
            .ok_or_else(|| truncated("AUTH_RESPONSE", &reader))?;

        if marker == ERROR_MARKER {
            return Ok(AuthReply::Err(ErrPacket::parse(reader.read_rest())));
        }
        if marker == EOF_MARKER {
            // Authentication switch request
            let plugin = reader.read_null_string().unwrap_or_default();
            let data = reader.read_rest().to_vec();
            tracing::debug!(plugin = %plugin, "server requested auth plugin switch");
            return Ok(AuthReply::Switch(AuthSwitchRequest { plugin, data }));
        }
        Ok(AuthReply::Ok(OkPacket::parse_fields(
            &mut reader,
            "AUTH_RESPONSE",
        )?))
    }
}

/// The initial handshake the server sends on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// Protocol version, 10 for every server this layer supports
    pub protocol_version: u8,
    /// Server version string, e.g. "8.0.36"
    pub server_version: String,
    /// Connection (thread) id
    pub thread_id: u32,
    /// Full capability bitset, assembled from both packet regions
    pub capabilities: u32,
    /// Server default charset
    pub charset: u8,
    /// Server status flags
    pub status_flags: u16,
    /// Scramble / auth plugin data; 8 bytes pre-4.1, 20 for 4.1+, longer
    /// when the server declares an extended length
    pub auth_plugin_data: Vec<u8>,
    /// Authentication plugin name, when CLIENT_PLUGIN_AUTH is set
    pub auth_plugin: Option<String>,
    /// True for a pre-4.1 handshake (payload ended after the 8-byte scramble)
    pub pre41: bool,
}

/// Decoded greeting payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreetingReply {
    Handshake(Greeting),
    Err(ErrPacket),
}

impl GreetingReply {
    /// Decode the greeting payload.
    ///
    /// Any premature end of the declared payload is fatal: a connection
    /// whose greeting cannot be read is unusable.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| truncated("GREET", &reader))?;

        if protocol_version == ERROR_MARKER {
            let mut err = ErrPacket::parse(reader.read_rest());
            // The server doesn't send a SQLSTATE in the greeting. 1040 is
            // "Too many connections", whose state is 08004 (server bug#26426).
            if err.code == 1040 {
                err.sqlstate = "08004".to_string();
            }
            return Ok(GreetingReply::Err(err));
        }

        let server_version = reader
            .read_null_string()
            .ok_or_else(|| truncated("GREET", &reader))?;
        let thread_id = reader
            .read_u32_le()
            .ok_or_else(|| truncated("GREET", &reader))?;

        let mut auth_plugin_data = reader
            .read_bytes(SCRAMBLE_LENGTH_323)
            .ok_or_else(|| truncated("GREET", &reader))?
            .to_vec();

        // filler
        reader.skip(1).ok_or_else(|| truncated("GREET", &reader))?;

        let caps_lo = reader
            .read_u16_le()
            .ok_or_else(|| truncated("GREET", &reader))?;
        let charset = reader
            .read_u8()
            .ok_or_else(|| truncated("GREET", &reader))?;
        let status_flags = reader
            .read_u16_le()
            .ok_or_else(|| truncated("GREET", &reader))?;

        // 13 reserved bytes; 4.1 servers pad with zeros, 5.5+ smuggles the
        // high capability half and the scramble length into the first three
        let pad = reader
            .read_bytes(13)
            .ok_or_else(|| truncated("GREET", &reader))?;
        let pad: [u8; 13] = pad.try_into().unwrap_or([0; 13]);

        let mut capabilities = u32::from(caps_lo);
        let mut pre41 = false;

        if reader.is_empty() {
            pre41 = true;
        } else {
            // Second scramble fragment plus its trailing NUL
            let frag = reader
                .read_bytes(SCRAMBLE_LENGTH - SCRAMBLE_LENGTH_323)
                .ok_or_else(|| truncated("GREET", &reader))?;
            auth_plugin_data.extend_from_slice(frag);

            if reader.is_empty() {
                // 4.1/5.1 form: nothing after the scramble terminator
            } else {
                // 5.5+: the pad region was data all along
                capabilities |= u32::from(u16::from_le_bytes([pad[0], pad[1]])) << 16;
                let declared_len = usize::from(pad[2]);
                if declared_len > SCRAMBLE_LENGTH {
                    // The terminator byte position is where the extra
                    // scramble bytes begin
                    let extra = reader
                        .read_bytes(declared_len - SCRAMBLE_LENGTH)
                        .ok_or_else(|| truncated("GREET", &reader))?;
                    auth_plugin_data.extend_from_slice(extra);
                } else {
                    reader.skip(1).ok_or_else(|| truncated("GREET", &reader))?;
                }
            }
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            if reader.is_empty() {
                return Err(truncated("GREET", &reader));
            }
            reader.read_null_string()
        } else {
            None
        };

        tracing::debug!(
            protocol = protocol_version,
            server = %server_version,
            thread_id,
            capabilities,
            scramble_len = auth_plugin_data.len(),
            plugin = auth_plugin.as_deref().unwrap_or("n/a"),
            "greeting decoded"
        );

        Ok(GreetingReply::Handshake(Greeting {
            protocol_version,
            server_version,
            thread_id,
            capabilities,
            charset,
            status_flags,
            auth_plugin_data,
            auth_plugin,
            pre41,
        }))
    }
}

/// Decoded result-set header: the first response packet of COM_QUERY or
/// COM_STMT_EXECUTE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSetHeader {
    /// The server reported an error
    Err(ErrPacket),
    /// LOAD DATA LOCAL INFILE: the server wants this file
    LocalInfile(String),
    /// An upsert (no rows follow); same layout as an OK packet
    Upsert(OkPacket),
    /// A result set with this many columns follows
    Columns(u64),
}

impl ResultSetHeader {
    /// Decode the result-set header payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        match reader.peek() {
            None => return Err(truncated("RSET_HEADER", &reader)),
            Some(ERROR_MARKER) => {
                reader.skip(1);
                return Ok(ResultSetHeader::Err(ErrPacket::parse(reader.read_rest())));
            }
            Some(_) => {}
        }

        let field_count = reader
            .read_lenenc()
            .ok_or_else(|| truncated("RSET_HEADER", &reader))?;

        match field_count {
            Lenenc::Null => {
                // LOAD LOCAL INFILE: the remaining bytes name the file
                let filename = reader.read_rest_string();
                tracing::debug!(file = %filename, "LOAD LOCAL INFILE requested");
                Ok(ResultSetHeader::LocalInfile(filename))
            }
            Lenenc::Int(0) => Ok(ResultSetHeader::Upsert(OkPacket::parse_fields(
                &mut reader,
                "RSET_HEADER",
            )?)),
            Lenenc::Int(n) => Ok(ResultSetHeader::Columns(n)),
        }
    }
}

/// 1 + 4 (id) + 2 (field_c) + 2 (param_c)
const PREPARE_RESPONSE_SIZE_41: usize = 9;
/// ... + 1 (filler) + 2 (warnings)
const PREPARE_RESPONSE_SIZE_50: usize = 12;

/// Successful response to COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Server-assigned statement id, used in execute/reset/close
    pub statement_id: u32,
    /// Number of columns in the result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders
    pub num_params: u16,
    /// Warnings generated during prepare (5.0+ form only)
    pub warnings: u16,
}

/// Decoded response to COM_STMT_PREPARE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareReply {
    Ok(StmtPrepareOk),
    Err(ErrPacket),
}

impl PrepareReply {
    /// Decode the prepare response payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let marker = reader
            .read_u8()
            .ok_or_else(|| truncated("PREPARE", &reader))?;
        if marker == ERROR_MARKER {
            return Ok(PrepareReply::Err(ErrPacket::parse(reader.read_rest())));
        }

        if payload.len() != PREPARE_RESPONSE_SIZE_41 && payload.len() < PREPARE_RESPONSE_SIZE_50 {
            tracing::warn!(size = payload.len(), "wrong COM_STMT_PREPARE response size");
            return Err(protocol_error(format!(
                "Wrong COM_STMT_PREPARE response size. Received {}",
                payload.len()
            )));
        }

        let statement_id = reader
            .read_u32_le()
            .ok_or_else(|| truncated("PREPARE", &reader))?;
        let num_columns = reader
            .read_u16_le()
            .ok_or_else(|| truncated("PREPARE", &reader))?;
        let num_params = reader
            .read_u16_le()
            .ok_or_else(|| truncated("PREPARE", &reader))?;

        let warnings = if payload.len() > PREPARE_RESPONSE_SIZE_41 {
            // 0x00 filler sent by the server for 5.0+ clients
            reader.skip(1).ok_or_else(|| truncated("PREPARE", &reader))?;
            reader
                .read_u16_le()
                .ok_or_else(|| truncated("PREPARE", &reader))?
        } else {
            0
        };

        Ok(PrepareReply::Ok(StmtPrepareOk {
            statement_id,
            num_columns,
            num_params,
            warnings,
        }))
    }
}

/// Decoded response to COM_CHANGE_USER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeUserReply {
    /// Authentication accepted
    Ok,
    /// The server reported an error
    Err(ErrPacket),
    /// The server wants a different auth plugin
    Switch(AuthSwitchRequest),
}

impl ChangeUserReply {
    /// Decode the change-user response payload.
    ///
    /// A bare one-byte 0xFE on a 4.1+ connection means the server asked for
    /// pre-4.1 authentication, which is unsupported and fails outright.
    pub fn parse(payload: &[u8], secure_connection: bool) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let marker = reader
            .read_u8()
            .ok_or_else(|| truncated("CHANGE_USER", &reader))?;

        if payload.len() == 1 && marker == EOF_MARKER && secure_connection {
            return Err(protocol_error(
                "Server requested pre-4.1 authentication, which is not supported",
            ));
        }

        if marker == ERROR_MARKER {
            return Ok(ChangeUserReply::Err(ErrPacket::parse(reader.read_rest())));
        }

        if marker == EOF_MARKER && !reader.is_empty() {
            let plugin = reader.read_null_string().unwrap_or_default();
            let data = reader.read_rest().to_vec();
            tracing::debug!(plugin = %plugin, "server requested auth plugin switch");
            return Ok(ChangeUserReply::Switch(AuthSwitchRequest { plugin, data }));
        }

        Ok(ChangeUserReply::Ok)
    }
}

/// Decode a SHA-256 public key response: one marker byte, then the key.
pub fn parse_public_key(payload: &[u8]) -> Result<Vec<u8>> {
    let mut reader = PacketReader::new(payload);
    reader
        .skip(1)
        .ok_or_else(|| truncated("SHA256_PK_REQUEST_RESPONSE", &reader))?;
    Ok(reader.read_rest().to_vec())
}

/// Payload of a SHA-256 public key request.
pub const SHA256_PK_REQUEST_PAYLOAD: [u8; 1] = [0x01];

/// The client handshake response (and its COM_CHANGE_USER variant).
///
/// The auth data is an opaque blob computed elsewhere; this type only frames
/// it. `encode` fails before anything is transmitted when the blob cannot be
/// represented.
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    /// Negotiated client capability flags
    pub client_flags: u32,
    /// Maximum packet size the client will send
    pub max_packet_size: u32,
    /// Requested charset
    pub charset: u8,
    /// User name
    pub user: &'a str,
    /// Opaque authentication blob
    pub auth_data: &'a [u8],
    /// Database to select, if any
    pub database: Option<&'a str>,
    /// Auth plugin name, written when CLIENT_PLUGIN_AUTH is negotiated
    pub auth_plugin: Option<&'a str>,
    /// Connect attributes, written when CLIENT_CONNECT_ATTRS is negotiated
    pub connect_attrs: &'a [(String, String)],
    /// COM_CHANGE_USER payloads drop the flags/charset prefix and append
    /// the charset after the database instead
    pub is_change_user: bool,
}

impl HandshakeResponse<'_> {
    /// Encode the payload (no frame header).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = PacketWriter::with_capacity(128 + self.auth_data.len());

        if !self.is_change_user {
            w.write_u32_le(self.client_flags);
            w.write_u32_le(self.max_packet_size);
            w.write_u8(self.charset);
            w.write_zeros(23);
        }

        w.write_null_string(self.user);

        if self.client_flags & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            w.write_lenenc_bytes(self.auth_data);
        } else {
            if self.auth_data.len() > 0xFF {
                return Err(protocol_error(
                    "Authentication data too long. \
                     Won't fit into the buffer and will be truncated. \
                     Authentication will thus fail",
                ));
            }
            w.write_u8(self.auth_data.len() as u8);
            w.write_bytes(self.auth_data);
        }

        if let Some(db) = self.database {
            w.write_null_string(db);
        } else if self.is_change_user
            || self.client_flags & capabilities::CLIENT_CONNECT_WITH_DB != 0
        {
            w.write_u8(0);
        }

        if self.is_change_user && self.charset != 0 {
            w.write_u16_le(u16::from(self.charset));
        }

        if self.client_flags & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            if let Some(plugin) = self.auth_plugin {
                w.write_null_string(plugin);
            }
        }

        if self.client_flags & capabilities::CLIENT_CONNECT_ATTRS != 0
            && !self.connect_attrs.is_empty()
        {
            let mut attrs = PacketWriter::new();
            for (key, value) in self.connect_attrs {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            w.write_lenenc_bytes(attrs.as_bytes());
        }

        Ok(w.into_bytes())
    }
}
